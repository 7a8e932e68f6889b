// Copyright (c) 2026 shaneyale (shaneyale86@gmail.com)
// All rights reserved.

//! # URI 组件过滤模块
//!
//! 无状态的 RFC 3986 工具函数集合，供 [`crate::uri::Uri`] 在写入各组件前调用：
//! 1. 路径、查询串与片段的百分号编码（不会重复编码已合法的 `%XX` 序列）。
//! 2. scheme、host、port 的合法性校验。
//! 3. 通用 URI 字符串到组件的拆分（`parse_url`）。

use crate::exception::{Exception, Result};
use crate::param::STANDARD_PORTS;
use lazy_static::lazy_static;
use regex::Regex;
use std::net::{Ipv4Addr, Ipv6Addr};

lazy_static! {
    static ref SCHEME: Regex = Regex::new(r"(?i)^[a-z][-a-z0-9.+]*$").unwrap();
    static ref HOSTNAME: Regex = Regex::new(
        r"(?i)^[a-z0-9_](?:[a-z0-9_-]{0,61}[a-z0-9_])?(?:\.[a-z0-9_](?:[a-z0-9_-]{0,61}[a-z0-9_])?)*\.?$"
    )
    .unwrap();
    /// RFC 3986 附录 B 给出的通用拆分表达式
    static ref URI_REFERENCE: Regex =
        Regex::new(r"^(?:([^:/?#]+):)?(?://([^/?#]*))?([^?#]*)(?:\?([^#]*))?(?:#(.*))?$").unwrap();
    static ref HOST_PORT_ONLY: Regex = Regex::new(r"^\d+(?:[/?#].*)?$").unwrap();
}

/// 端口参数的输入形式：空、整数或数字字符串
#[derive(Debug, Clone, PartialEq)]
pub enum PortInput {
    None,
    Number(i64),
    Text(String),
}

impl From<Option<u16>> for PortInput {
    fn from(port: Option<u16>) -> Self {
        match port {
            Some(p) => PortInput::Number(p as i64),
            None => PortInput::None,
        }
    }
}

impl From<u16> for PortInput {
    fn from(port: u16) -> Self {
        PortInput::Number(port as i64)
    }
}

impl From<i32> for PortInput {
    fn from(port: i32) -> Self {
        PortInput::Number(port as i64)
    }
}

impl From<i64> for PortInput {
    fn from(port: i64) -> Self {
        PortInput::Number(port)
    }
}

impl From<&str> for PortInput {
    fn from(port: &str) -> Self {
        PortInput::Text(port.to_string())
    }
}

impl From<String> for PortInput {
    fn from(port: String) -> Self {
        PortInput::Text(port)
    }
}

/// `parse_url` 的拆分结果。
///
/// 出现了字面量 `?`/`#` 但其后为空时，`query`/`fragment` 为 `Some("")` 而非 `None`。
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct UrlParts {
    pub scheme: Option<String>,
    pub user: Option<String>,
    pub pass: Option<String>,
    pub host: Option<String>,
    pub port: Option<u16>,
    pub path: String,
    pub query: Option<String>,
    pub fragment: Option<String>,
}

fn is_unreserved_or_sub_delim(b: u8) -> bool {
    b.is_ascii_alphanumeric()
        || matches!(
            b,
            b'_' | b'.' | b'~' | b'!' | b'$' | b'&' | b'\'' | b'(' | b')' | b'*' | b'+' | b',' | b';' | b'='
        )
}

fn encode(input: &str, extra: &[u8]) -> String {
    let bytes = input.as_bytes();
    let mut out = String::with_capacity(bytes.len());
    let mut i = 0;
    while i < bytes.len() {
        let b = bytes[i];
        if b == b'%' {
            // 已合法的 %XX 序列原样保留
            if i + 2 < bytes.len()
                && bytes[i + 1].is_ascii_hexdigit()
                && bytes[i + 2].is_ascii_hexdigit()
            {
                out.push('%');
                out.push(bytes[i + 1] as char);
                out.push(bytes[i + 2] as char);
                i += 3;
                continue;
            }
            out.push_str("%25");
        } else if is_unreserved_or_sub_delim(b) || b == b':' || b == b'@' || extra.contains(&b) {
            out.push(b as char);
        } else {
            out.push_str(&format!("%{:02X}", b));
        }
        i += 1;
    }
    out
}

/// 对路径进行百分号编码。
///
/// 允许的字符集为 `[A-Za-z0-9_.~!$&'()*+,;=%:@/]`，其余字符（含多字节字符的每个
/// 字节）编码为 `%XX`。该函数是幂等的。
pub fn filter_path(path: &str) -> String {
    encode(path, b"/")
}

/// 对查询串或片段进行百分号编码，字符集在路径基础上额外允许 `?`
pub fn filter_query_and_fragment(value: &str) -> String {
    encode(value, b"/?")
}

/// 校验并规范化端口。
///
/// 数字字符串会被转换为整数；`None` 原样通过；其余情况要求整数位于 `[1, 65535]`。
pub fn filter_port(port: impl Into<PortInput>) -> Result<Option<u16>> {
    let number = match port.into() {
        PortInput::None => return Ok(None),
        PortInput::Number(n) => n,
        PortInput::Text(s) => match s.trim().parse::<i64>() {
            Ok(n) => n,
            Err(_) => {
                return Err(Exception::invalid(format!(
                    "Invalid port: {} (must be an integer between 1 and 65535)",
                    s
                )))
            }
        },
    };
    if !(1..=65535).contains(&number) {
        return Err(Exception::invalid(format!(
            "Invalid port: {} (must be an integer between 1 and 65535)",
            number
        )));
    }
    Ok(Some(number as u16))
}

/// 判断 host 是否为合法的 IP 字面量（IPv6 可带方括号）
pub fn is_ip_literal(host: &str) -> bool {
    if let Some(inner) = host.strip_prefix('[').and_then(|h| h.strip_suffix(']')) {
        return inner.parse::<Ipv6Addr>().is_ok();
    }
    host.parse::<Ipv4Addr>().is_ok() || host.parse::<Ipv6Addr>().is_ok()
}

/// 校验 host：允许空串、`localhost`、主机名/FQDN 以及 IP 字面量
pub fn assert_host(host: &str) -> Result<()> {
    if host.is_empty() || host.eq_ignore_ascii_case("localhost") {
        return Ok(());
    }
    if is_ip_literal(host) || HOSTNAME.is_match(host) {
        return Ok(());
    }
    Err(Exception::invalid(format!("Invalid host: {}", host)))
}

/// 校验 scheme：允许空串，否则必须满足 `^[a-z][-a-z0-9.+]*$`（不区分大小写）
pub fn assert_scheme(scheme: &str) -> Result<()> {
    if scheme.is_empty() || SCHEME.is_match(scheme) {
        return Ok(());
    }
    Err(Exception::invalid(format!("Invalid scheme: {}", scheme)))
}

/// 端口是否为该 scheme 的标准端口
pub fn is_standard_port(scheme: &str, port: u16) -> bool {
    STANDARD_PORTS
        .get(scheme.to_ascii_lowercase().as_str())
        .map_or(false, |standard| *standard == port)
}

fn non_empty(s: &str) -> Option<String> {
    match s.is_empty() {
        true => None,
        false => Some(s.to_string()),
    }
}

/// 按 RFC 3986 通用语法拆分 URI 字符串。
///
/// 可以处理不带 scheme 的输入（`//host/path`、`/path`、`host:port/path`）。
pub fn parse_url(url: &str) -> Result<UrlParts> {
    let unable = || Exception::invalid(format!("Unable to parse URI: {}", url));

    if url.chars().any(|c| c.is_ascii_control() && c != '\t') {
        return Err(unable());
    }

    // `host:port[/path]` 形式没有 scheme，按照 authority 处理
    let mut source = url.to_string();
    if let Some((head, rest)) = url.split_once(':') {
        if !head.is_empty()
            && !head.contains(|c: char| matches!(c, '/' | '?' | '#'))
            && !rest.starts_with("//")
            && !rest.is_empty()
            && HOST_PORT_ONLY.is_match(rest)
            && HOSTNAME.is_match(head)
        {
            source = format!("//{}", url);
        }
    }

    let captures = URI_REFERENCE.captures(&source).ok_or_else(unable)?;
    let mut parts = UrlParts::default();

    if let Some(scheme) = captures.get(1) {
        if !SCHEME.is_match(scheme.as_str()) {
            return Err(unable());
        }
        parts.scheme = Some(scheme.as_str().to_string());
    }

    if let Some(authority) = captures.get(2) {
        let mut authority = authority.as_str();
        if let Some(at) = authority.rfind('@') {
            let user_info = &authority[..at];
            authority = &authority[at + 1..];
            match user_info.split_once(':') {
                Some((user, pass)) => {
                    parts.user = Some(user.to_string());
                    parts.pass = Some(pass.to_string());
                }
                None => parts.user = Some(user_info.to_string()),
            }
        }

        let (host, port) = if authority.starts_with('[') {
            let end = authority.find(']').ok_or_else(unable)?;
            let rest = &authority[end + 1..];
            let port = match rest {
                "" => None,
                _ => Some(rest.strip_prefix(':').ok_or_else(unable)?),
            };
            (&authority[..=end], port)
        } else {
            match authority.rsplit_once(':') {
                Some((host, port)) => (host, Some(port)),
                None => (authority, None),
            }
        };

        parts.host = non_empty(host);
        if let Some(port) = port.filter(|p| !p.is_empty()) {
            if !port.bytes().all(|b| b.is_ascii_digit()) {
                return Err(unable());
            }
            parts.port = filter_port(port).map_err(|_| unable())?;
        }
    }

    parts.path = captures.get(3).map_or("", |m| m.as_str()).to_string();
    parts.query = captures.get(4).map(|m| m.as_str().to_string());
    parts.fragment = captures.get(5).map(|m| m.as_str().to_string());
    Ok(parts)
}
