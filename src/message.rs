// Copyright (c) 2026 shaneyale (shaneyale86@gmail.com)
// All rights reserved.

//! # HTTP 消息模块
//!
//! `Message` 由协议版本、标头集合（`HeaderBag`）与消息体（`Stream`）组成，
//! 是请求与响应的共同部分。
//!
//! ## 标头规则（RFC 7230）
//! - 标头名按 token 语法校验，查找时不区分大小写，保留首次登记的写法。
//! - 标头值去除首尾空格/制表符，值列表不能为空。
//! - `Host` 至多一个值，且总是排在所有标头的第一位（RFC 7230 §5.4）。

use crate::{
    exception::{Exception, Result},
    param::{CRLF, DEFAULT_PROTOCOL_VERSION, PROTOCOL_VERSIONS},
    stream::Stream,
};
use lazy_static::lazy_static;
use log::warn;
use regex::Regex;
use std::{collections::HashMap, sync::OnceLock};

lazy_static! {
    static ref HEADER_NAME: Regex = Regex::new(r"^[A-Za-z0-9!#$%&'*+\-.^_`|~]+$").unwrap();
    /// 可见 ASCII、空格与制表符；0x80 以上的字符按 obs-text 放行
    static ref HEADER_VALUE: Regex = Regex::new(r"^[\x20\x09\x21-\x7E\x{80}-\x{10FFFF}]*$").unwrap();
}

/// 可以转换为标头值列表的类型
pub trait IntoHeaderValues {
    fn into_header_values(self) -> Vec<String>;
}

impl IntoHeaderValues for &str {
    fn into_header_values(self) -> Vec<String> {
        vec![self.to_string()]
    }
}

impl IntoHeaderValues for String {
    fn into_header_values(self) -> Vec<String> {
        vec![self]
    }
}

impl IntoHeaderValues for &String {
    fn into_header_values(self) -> Vec<String> {
        vec![self.clone()]
    }
}

impl IntoHeaderValues for Vec<String> {
    fn into_header_values(self) -> Vec<String> {
        self
    }
}

impl IntoHeaderValues for Vec<&str> {
    fn into_header_values(self) -> Vec<String> {
        self.into_iter().map(String::from).collect()
    }
}

impl IntoHeaderValues for &[&str] {
    fn into_header_values(self) -> Vec<String> {
        self.iter().map(|v| v.to_string()).collect()
    }
}

impl<const N: usize> IntoHeaderValues for [&str; N] {
    fn into_header_values(self) -> Vec<String> {
        self.iter().map(|v| v.to_string()).collect()
    }
}

/// 校验标头名
pub fn assert_header_name(name: &str) -> Result<()> {
    if name.is_empty() {
        return Err(Exception::invalid("Header name must be a non-empty string"));
    }
    if !HEADER_NAME.is_match(name) {
        return Err(Exception::invalid(format!(
            "\"{}\" is not a valid header name, it must be an RFC 7230 compatible string",
            name
        )));
    }
    Ok(())
}

/// 校验并规范化标头值：去除首尾空格/制表符，值列表不能为空
pub fn normalize_header_values(name: &str, values: Vec<String>) -> Result<Vec<String>> {
    if values.is_empty() {
        return Err(Exception::invalid(format!(
            "Header \"{}\" values must be a non-empty list",
            name
        )));
    }
    values
        .into_iter()
        .map(|value| {
            let value = value.trim_matches(|c: char| c == ' ' || c == '\t').to_string();
            if !HEADER_VALUE.is_match(&value) {
                return Err(Exception::invalid(format!(
                    "\"{}\" is not valid header value for \"{}\"",
                    value.escape_debug(),
                    name
                )));
            }
            Ok(value)
        })
        .collect()
}

/// 有序、不区分大小写、支持多值的标头集合
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct HeaderBag {
    /// 规范名 -> 值列表，保持插入顺序
    entries: Vec<(String, Vec<String>)>,
    /// 小写名 -> 规范名
    names: HashMap<String, String>,
}

impl HeaderBag {
    pub fn new() -> Self {
        Self::default()
    }

    fn position(&self, name: &str) -> Option<usize> {
        let canonical = self.names.get(&name.to_ascii_lowercase())?;
        self.entries.iter().position(|(n, _)| n == canonical)
    }

    pub fn contains(&self, name: &str) -> bool {
        self.names.contains_key(&name.to_ascii_lowercase())
    }

    /// 取全部值；不存在时返回空切片
    pub fn get(&self, name: &str) -> &[String] {
        match self.position(name) {
            Some(i) => &self.entries[i].1,
            None => &[],
        }
    }

    /// 以 `, ` 连接的单行值
    pub fn line(&self, name: &str) -> String {
        self.get(name).join(", ")
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &[String])> {
        self.entries.iter().map(|(n, v)| (n.as_str(), v.as_slice()))
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// 删除标头（不区分大小写），返回是否确实删除了
    pub fn remove(&mut self, name: &str) -> bool {
        match self.position(name) {
            Some(i) => {
                self.entries.remove(i);
                self.names.remove(&name.to_ascii_lowercase());
                true
            }
            None => false,
        }
    }

    /// 替换标头。新的写法成为规范名，Host 被移到最前
    pub fn set(&mut self, name: &str, values: Vec<String>) -> Result<()> {
        let lower = name.to_ascii_lowercase();
        let values = match lower == "host" {
            true => single_host(values)?,
            false => values,
        };
        self.remove(name);
        self.names.insert(lower.clone(), name.to_string());
        match lower == "host" {
            true => self.entries.insert(0, (name.to_string(), values)),
            false => self.entries.push((name.to_string(), values)),
        }
        Ok(())
    }

    /// 追加值，保留已有的规范名与位置
    pub fn append(&mut self, name: &str, values: Vec<String>) -> Result<()> {
        match self.position(name) {
            Some(i) => {
                let mut merged = self.entries[i].1.clone();
                merged.extend(values);
                if name.eq_ignore_ascii_case("host") {
                    merged = single_host(merged)?;
                }
                self.entries[i].1 = merged;
                Ok(())
            }
            None => self.set(name, values),
        }
    }
}

/// Host 去重后至多保留一个值
fn single_host(values: Vec<String>) -> Result<Vec<String>> {
    let mut distinct: Vec<String> = Vec::with_capacity(1);
    for value in values {
        if !distinct.contains(&value) {
            distinct.push(value);
        }
    }
    if distinct.len() > 1 {
        return Err(Exception::invalid(
            "Only one Host header value is allowed",
        ));
    }
    Ok(distinct)
}

/// 请求与响应共有的消息部分
#[derive(Debug, Clone)]
pub struct Message {
    protocol_version: String,
    headers: HeaderBag,
    /// 首次访问时才创建的空消息体
    body: OnceLock<Stream>,
}

impl Default for Message {
    fn default() -> Self {
        Self::new()
    }
}

impl Message {
    pub fn new() -> Self {
        Self {
            protocol_version: DEFAULT_PROTOCOL_VERSION.to_string(),
            headers: HeaderBag::new(),
            body: OnceLock::new(),
        }
    }

    pub fn protocol_version(&self) -> &str {
        &self.protocol_version
    }

    pub fn set_protocol_version(&mut self, version: &str) -> Result<()> {
        assert_protocol_version(version)?;
        self.protocol_version = version.to_string();
        Ok(())
    }

    pub fn headers(&self) -> &HeaderBag {
        &self.headers
    }

    pub fn headers_mut(&mut self) -> &mut HeaderBag {
        &mut self.headers
    }

    pub fn body(&self) -> &Stream {
        self.body.get_or_init(Stream::new)
    }

    pub fn set_body(&mut self, body: Stream) {
        self.body = OnceLock::from(body);
    }

    /// 标头序列化：每个标头一行 `Name: v1, v2\r\n`
    pub fn head_lines(&self) -> String {
        let mut out = String::new();
        for (name, values) in self.headers.iter() {
            out.push_str(&format!("{}: {}{}", name, values.join(", "), CRLF));
        }
        out
    }

    /// 消息体的全部字节。可定位时先回到开头；读取失败时记录警告并返回空
    pub fn body_bytes(&self) -> Vec<u8> {
        let body = self.body();
        if body.is_seekable() {
            if let Err(e) = body.rewind() {
                warn!("无法回到消息体开头，按空消息体序列化: {}", e);
                return Vec::new();
            }
        }
        match body.get_contents() {
            Ok(bytes) => bytes,
            Err(e) => {
                warn!("无法读取消息体，按空消息体序列化: {}", e);
                Vec::new()
            }
        }
    }
}

/// 校验协议版本
pub fn assert_protocol_version(version: &str) -> Result<()> {
    if PROTOCOL_VERSIONS.contains(&version) {
        return Ok(());
    }
    Err(Exception::invalid(format!(
        "Unsupported HTTP protocol version \"{}\" provided. Expected one of: {}",
        version,
        PROTOCOL_VERSIONS.join(", ")
    )))
}

/// 不可变 HTTP 消息的公共接口。
///
/// 所有 `with_*` 方法都是写时复制：先克隆自身、修改副本，再返回副本，
/// 原实例保持不变。
pub trait HttpMessage: Clone + Sized {
    fn message(&self) -> &Message;

    fn message_mut(&mut self) -> &mut Message;

    /// 标头被删除后的钩子，请求类型借此重新同步 Host
    fn after_header_removed(&mut self, _name: &str) -> Result<()> {
        Ok(())
    }

    fn protocol_version(&self) -> &str {
        self.message().protocol_version()
    }

    fn with_protocol_version(&self, version: &str) -> Result<Self> {
        assert_protocol_version(version)?;
        if version == self.protocol_version() {
            return Ok(self.clone());
        }
        let mut new = self.clone();
        new.message_mut().set_protocol_version(version)?;
        Ok(new)
    }

    /// 全部标头，保持插入顺序（Host 总在最前）
    fn headers(&self) -> &HeaderBag {
        self.message().headers()
    }

    fn has_header(&self, name: &str) -> bool {
        self.message().headers().contains(name)
    }

    /// 标头的全部值；不存在时为空
    fn header(&self, name: &str) -> Vec<String> {
        self.message().headers().get(name).to_vec()
    }

    /// 以 `, ` 连接的标头值；不存在时为空串
    fn header_line(&self, name: &str) -> String {
        self.message().headers().line(name)
    }

    /// 替换同名标头
    fn with_header(&self, name: &str, value: impl IntoHeaderValues) -> Result<Self> {
        assert_header_name(name)?;
        let values = normalize_header_values(name, value.into_header_values())?;
        let mut new = self.clone();
        new.message_mut().headers_mut().set(name, values)?;
        Ok(new)
    }

    /// 与已有的同名标头合并
    fn with_added_header(&self, name: &str, value: impl IntoHeaderValues) -> Result<Self> {
        assert_header_name(name)?;
        let values = normalize_header_values(name, value.into_header_values())?;
        let mut new = self.clone();
        new.message_mut().headers_mut().append(name, values)?;
        Ok(new)
    }

    /// 删除标头；标头不存在时原样返回
    fn without_header(&self, name: &str) -> Result<Self> {
        if !self.has_header(name) {
            return Ok(self.clone());
        }
        let mut new = self.clone();
        new.message_mut().headers_mut().remove(name);
        new.after_header_removed(name)?;
        Ok(new)
    }

    /// 消息体；未设置时为一个空的内存流
    fn body(&self) -> &Stream {
        self.message().body()
    }

    /// 替换消息体；传入同一个流句柄时原样返回
    fn with_body(&self, body: Stream) -> Self {
        if body.ptr_eq(self.body()) {
            return self.clone();
        }
        let mut new = self.clone();
        new.message_mut().set_body(body);
        new
    }
}

impl HttpMessage for Message {
    fn message(&self) -> &Message {
        self
    }

    fn message_mut(&mut self) -> &mut Message {
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn names(message: &Message) -> Vec<String> {
        message.headers().iter().map(|(n, _)| n.to_string()).collect()
    }

    #[test]
    fn test_default_message() {
        let message = Message::new();
        assert_eq!(HttpMessage::protocol_version(&message), "1.1");
        assert!(HttpMessage::headers(&message).is_empty());
        assert_eq!(HttpMessage::body(&message).get_size(), Some(0));
    }

    #[test]
    fn test_header_case_insensitive() {
        let message = Message::new().with_header("X-Foo", "a").unwrap();
        assert!(message.has_header("x-foo"));
        assert_eq!(message.header_line("X-FOO"), "a");
        assert_eq!(message.header("x-FoO"), vec!["a".to_string()]);
    }

    #[test]
    fn test_absent_header() {
        let message = Message::new();
        assert!(!message.has_header("X-Missing"));
        assert!(message.header("X-Missing").is_empty());
        assert_eq!(message.header_line("X-Missing"), "");
    }

    #[test]
    fn test_with_header_replaces_and_keeps_original() {
        let original = Message::new().with_header("Accept", "text/html").unwrap();
        let replaced = original.with_header("accept", ["a/b", "c/d"]).unwrap();
        assert_eq!(original.header_line("Accept"), "text/html");
        assert_eq!(replaced.header_line("Accept"), "a/b, c/d");
        assert_eq!(names(&replaced), vec!["accept".to_string()]);
    }

    #[test]
    fn test_with_added_header_merges() {
        let message = Message::new()
            .with_header("X-List", "one")
            .unwrap()
            .with_added_header("x-list", vec!["two", "three"])
            .unwrap();
        assert_eq!(message.header_line("X-List"), "one, two, three");
        assert_eq!(names(&message), vec!["X-List".to_string()]);
    }

    #[test]
    fn test_values_are_trimmed() {
        let message = Message::new().with_header("X-Trim", " \tvalue \t").unwrap();
        assert_eq!(message.header_line("x-trim"), "value");
    }

    #[test]
    fn test_invalid_header_names() {
        let message = Message::new();
        for bad in ["", "Bad Name", "Bad:Name", "Bad\r\nName", "Ünicode"] {
            let err = message.with_header(bad, "x").unwrap_err();
            assert!(err.is_invalid_argument(), "{:?} should be rejected", bad);
        }
    }

    #[test]
    fn test_invalid_header_values() {
        let message = Message::new();
        assert!(message.with_header("X-Foo", "a\r\nInjected: 1").is_err());
        assert!(message.with_header("X-Foo", "nul\0byte").is_err());
        assert!(message.with_header("X-Foo", Vec::<String>::new()).is_err());
        assert!(message.with_header("X-Foo", "").is_ok());
    }

    #[test]
    fn test_host_is_reordered_first() {
        let message = Message::new()
            .with_header("Content-Type", "text/html")
            .unwrap()
            .with_header("Host", "example.com")
            .unwrap();
        assert_eq!(names(&message), vec!["Host".to_string(), "Content-Type".to_string()]);
    }

    #[test]
    fn test_single_host_value() {
        let message = Message::new().with_header("Host", "a").unwrap();
        let err = message.with_added_header("Host", "b").unwrap_err();
        assert!(err.is_invalid_argument());
        assert!(Message::new().with_header("Host", ["a", "b"]).is_err());
        let same = message.with_added_header("host", "a").unwrap();
        assert_eq!(same.header("Host"), vec!["a".to_string()]);
    }

    #[test]
    fn test_without_header() {
        let message = Message::new()
            .with_header("X-A", "1")
            .unwrap()
            .with_header("X-B", "2")
            .unwrap();
        let removed = message.without_header("x-a").unwrap();
        assert!(!removed.has_header("X-A"));
        assert!(message.has_header("X-A"));
        let unchanged = removed.without_header("X-Nope").unwrap();
        assert_eq!(unchanged.headers(), removed.headers());
    }

    #[test]
    fn test_protocol_version() {
        let message = Message::new().with_protocol_version("2").unwrap();
        assert_eq!(HttpMessage::protocol_version(&message), "2");
        assert!(message.with_protocol_version("4.0").unwrap_err().is_invalid_argument());
        assert!(message.with_protocol_version("HTTP/1.1").is_err());
    }

    #[test]
    fn test_with_body() {
        let body = Stream::from_string("payload");
        let message = Message::new().with_body(body.clone());
        assert!(HttpMessage::body(&message).ptr_eq(&body));
        let same = message.with_body(body.clone());
        assert!(HttpMessage::body(&same).ptr_eq(&body));
        assert_eq!(HttpMessage::body(&message).to_string(), "payload");
    }

    #[test]
    fn test_body_bytes_rewinds_and_tolerates_detached_body() {
        let body = Stream::from_string("payload");
        body.read(3).unwrap();
        let message = Message::new().with_body(body.clone());
        assert_eq!(message.body_bytes(), b"payload");

        body.detach();
        assert!(message.body_bytes().is_empty());
    }

    #[test]
    fn test_head_lines() {
        let message = Message::new()
            .with_header("X-A", ["1", "2"])
            .unwrap()
            .with_header("Host", "example.com")
            .unwrap();
        assert_eq!(message.head_lines(), "Host: example.com\r\nX-A: 1, 2\r\n");
    }
}
