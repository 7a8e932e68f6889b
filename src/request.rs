// Copyright (c) 2026 shaneyale (shaneyale86@gmail.com)
// All rights reserved.

//! # HTTP 请求模块
//!
//! `Request` 在 [`Message`] 之上增加了请求方法、目标 `Uri` 与可选的
//! request-target 覆盖值。
//!
//! ## Host 同步规则
//! 1. 构造时若 `Uri` 含有 host，立即派生 `Host: host[:port]` 标头。
//! 2. `with_uri` 默认用新 `Uri` 覆盖 Host；`preserve_host` 为真且已存在 Host 时保持不变。
//! 3. 新 `Uri` 没有 host 时，保留原有的 Host 标头。
//! 4. 删除 Host 标头后按当前 `Uri` 重新派生。

use crate::{
    exception::{Exception, Result},
    message::{HttpMessage, Message},
    param::CRLF,
    uri::Uri,
};
use lazy_static::lazy_static;
use regex::Regex;

lazy_static! {
    static ref METHOD: Regex = Regex::new(r"(?i)^[a-z]+$").unwrap();
}

/// 请求目标 URI 的输入形式：尚未解析的字符串或已构造的 `Uri`
#[derive(Debug, Clone)]
pub enum UriInput {
    Str(String),
    Uri(Uri),
}

impl From<&str> for UriInput {
    fn from(s: &str) -> Self {
        UriInput::Str(s.to_string())
    }
}

impl From<String> for UriInput {
    fn from(s: String) -> Self {
        UriInput::Str(s)
    }
}

impl From<Uri> for UriInput {
    fn from(uri: Uri) -> Self {
        UriInput::Uri(uri)
    }
}

impl From<&Uri> for UriInput {
    fn from(uri: &Uri) -> Self {
        UriInput::Uri(uri.clone())
    }
}

impl UriInput {
    pub fn into_uri(self) -> Result<Uri> {
        match self {
            UriInput::Str(s) => Uri::new(&s),
            UriInput::Uri(uri) => Ok(uri),
        }
    }
}

/// 校验请求方法：非空且只包含字母
pub fn assert_method(method: &str) -> Result<()> {
    if METHOD.is_match(method) {
        return Ok(());
    }
    Err(Exception::invalid(format!(
        "Unsupported HTTP method \"{}\" provided",
        method
    )))
}

/// 不可变的 HTTP 请求
#[derive(Debug, Clone)]
pub struct Request {
    message: Message,
    /// 请求方法，构造时统一转为大写
    method: String,
    uri: Uri,
    /// 显式指定的 request-target
    request_target: Option<String>,
}

impl Request {
    /// 构造请求。方法会被校验并转为大写，Host 标头由 `Uri` 派生。
    pub fn new(method: &str, uri: impl Into<UriInput>) -> Result<Self> {
        assert_method(method)?;
        let mut request = Self {
            message: Message::new(),
            method: method.to_ascii_uppercase(),
            uri: uri.into().into_uri()?,
            request_target: None,
        };
        request.update_host_from_uri()?;
        Ok(request)
    }

    /// `Uri` 含有 host 时写入 `Host: host[:port]`，否则保持原样
    pub(crate) fn update_host_from_uri(&mut self) -> Result<()> {
        let host = self.uri.host();
        if host.is_empty() {
            return Ok(());
        }
        let value = match self.uri.port() {
            Some(port) => format!("{}:{}", host, port),
            None => host.to_string(),
        };
        self.message
            .headers_mut()
            .set("Host", vec![value])
    }

    /// 序列化为 HTTP/1.x 报文：请求行、标头、空行与消息体
    pub fn as_bytes(&self) -> Vec<u8> {
        let mut bytes = format!(
            "{} {} HTTP/{}{}",
            self.method,
            HttpRequest::request_target(self),
            self.message.protocol_version(),
            CRLF
        )
        .into_bytes();
        bytes.extend(self.message.head_lines().into_bytes());
        bytes.extend(CRLF.as_bytes());
        bytes.extend(self.message.body_bytes());
        bytes
    }
}

impl HttpMessage for Request {
    fn message(&self) -> &Message {
        &self.message
    }

    fn message_mut(&mut self) -> &mut Message {
        &mut self.message
    }

    fn after_header_removed(&mut self, name: &str) -> Result<()> {
        if name.eq_ignore_ascii_case("host") {
            self.update_host_from_uri()?;
        }
        Ok(())
    }
}

/// 请求（含服务端请求）的公共接口
pub trait HttpRequest: HttpMessage {
    fn request(&self) -> &Request;

    fn request_mut(&mut self) -> &mut Request;

    fn method(&self) -> &str {
        &self.request().method
    }

    /// 替换请求方法（保留大小写），不影响 Host 标头
    fn with_method(&self, method: &str) -> Result<Self> {
        assert_method(method)?;
        if method == self.method() {
            return Ok(self.clone());
        }
        let mut new = self.clone();
        new.request_mut().method = method.to_string();
        Ok(new)
    }

    fn uri(&self) -> &Uri {
        &self.request().uri
    }

    /// 替换 `Uri`，按需同步 Host 标头
    fn with_uri(&self, uri: Uri, preserve_host: bool) -> Result<Self> {
        let mut new = self.clone();
        let keep_host = preserve_host && new.has_header("Host");
        let request = new.request_mut();
        request.uri = uri;
        if !keep_host {
            request.update_host_from_uri()?;
        }
        Ok(new)
    }

    /// 显式指定的 request-target，否则为 origin-form `path[?query]`
    fn request_target(&self) -> String {
        let request = self.request();
        if let Some(target) = &request.request_target {
            return target.clone();
        }
        let mut target = match request.uri.path() {
            "" => "/".to_string(),
            path => path.to_string(),
        };
        if !request.uri.query().is_empty() {
            target.push('?');
            target.push_str(request.uri.query());
        }
        target
    }

    fn with_request_target(&self, target: &str) -> Result<Self> {
        if target.chars().any(char::is_whitespace) {
            return Err(Exception::invalid(
                "Invalid request target provided; cannot contain whitespace",
            ));
        }
        let mut new = self.clone();
        new.request_mut().request_target = Some(target.to_string());
        Ok(new)
    }
}

impl HttpRequest for Request {
    fn request(&self) -> &Request {
        self
    }

    fn request_mut(&mut self) -> &mut Request {
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::stream::Stream;

    #[test]
    fn test_host_derived_at_construction() {
        let request = Request::new("GET", "http://example.com:8080/x").unwrap();
        assert_eq!(request.header_line("Host"), "example.com:8080");
        let request = Request::new("GET", "https://example.com:443/x").unwrap();
        assert_eq!(request.header_line("Host"), "example.com");
        let request = Request::new("GET", "/relative").unwrap();
        assert!(!request.has_header("Host"));
    }

    #[test]
    fn test_method_validation() {
        assert_eq!(Request::new("post", "/").unwrap().method(), "POST");
        assert!(Request::new("", "/").unwrap_err().is_invalid_argument());
        assert!(Request::new("GE T", "/").is_err());
        assert!(Request::new("M-SEARCH", "/").is_err());

        let request = Request::new("GET", "http://example.com/").unwrap();
        let patched = request.with_method("patch").unwrap();
        assert_eq!(patched.method(), "patch");
        assert_eq!(request.method(), "GET");
        assert_eq!(patched.header_line("Host"), "example.com");
        assert!(request.with_method("B@D").is_err());
    }

    #[test]
    fn test_accepts_uri_instance() {
        let uri = Uri::new("http://example.org/a?b=c").unwrap();
        let request = Request::new("GET", uri.clone()).unwrap();
        assert_eq!(request.uri(), &uri);
        assert!(Request::new("GET", "http://[bad").is_err());
    }

    #[test]
    fn test_request_target() {
        let request = Request::new("GET", "http://example.com").unwrap();
        assert_eq!(request.request_target(), "/");
        let request = Request::new("GET", "http://example.com/p?q=1").unwrap();
        assert_eq!(request.request_target(), "/p?q=1");
        let request = request.with_request_target("*").unwrap();
        assert_eq!(request.request_target(), "*");
        let err = request.with_request_target("/with space").unwrap_err();
        assert!(err.is_invalid_argument());
    }

    #[test]
    fn test_with_uri_replaces_host() {
        let request = Request::new("GET", "http://foo.com/").unwrap();
        let request = request.with_uri(Uri::new("http://bar.com/").unwrap(), false).unwrap();
        assert_eq!(request.header_line("Host"), "bar.com");
    }

    #[test]
    fn test_with_uri_preserve_host() {
        let request = Request::new("GET", "/")
            .unwrap()
            .with_header("Host", "foo.com")
            .unwrap();
        let bar = Uri::new("http://bar.com/").unwrap();
        let preserved = request.with_uri(bar.clone(), true).unwrap();
        assert_eq!(preserved.header_line("Host"), "foo.com");
        assert_eq!(preserved.uri().host(), "bar.com");
        let replaced = request.with_uri(bar, false).unwrap();
        assert_eq!(replaced.header_line("Host"), "bar.com");
    }

    #[test]
    fn test_with_same_uri_resyncs_host() {
        let request = Request::new("GET", "http://foo.com/")
            .unwrap()
            .with_header("Host", "other.com")
            .unwrap();
        let same = request.uri().clone();
        let kept = request.with_uri(same.clone(), true).unwrap();
        assert_eq!(kept.header_line("Host"), "other.com");
        let synced = request.with_uri(same, false).unwrap();
        assert_eq!(synced.header_line("Host"), "foo.com");
    }

    #[test]
    fn test_with_uri_preserve_host_without_existing_host() {
        let request = Request::new("GET", "/").unwrap();
        let uri = Uri::new("http://bar.com:8080/").unwrap();
        let request = request.with_uri(uri, true).unwrap();
        assert_eq!(request.header_line("Host"), "bar.com:8080");
    }

    #[test]
    fn test_with_uri_without_host_keeps_header() {
        let request = Request::new("GET", "http://foo.com/").unwrap();
        let request = request.with_uri(Uri::new("/local").unwrap(), false).unwrap();
        assert_eq!(request.header_line("Host"), "foo.com");
    }

    #[test]
    fn test_host_header_kept_first() {
        let request = Request::new("GET", "/")
            .unwrap()
            .with_header("Accept", "*/*")
            .unwrap()
            .with_uri(Uri::new("http://example.com/").unwrap(), false)
            .unwrap();
        let names: Vec<&str> = request.headers().iter().map(|(n, _)| n).collect();
        assert_eq!(names, vec!["Host", "Accept"]);
    }

    #[test]
    fn test_without_host_rederives() {
        let request = Request::new("GET", "http://example.com/")
            .unwrap()
            .with_header("Host", "other.com")
            .unwrap();
        let request = request.without_header("host").unwrap();
        assert_eq!(request.header_line("Host"), "example.com");

        let local = Request::new("GET", "/")
            .unwrap()
            .with_header("Host", "other.com")
            .unwrap()
            .without_header("Host")
            .unwrap();
        assert!(!local.has_header("Host"));
    }

    #[test]
    fn test_as_bytes() {
        let request = Request::new("POST", "http://example.com/submit?x=1")
            .unwrap()
            .with_header("Content-Type", "text/plain")
            .unwrap()
            .with_body(Stream::from_string("hi"));
        let raw = String::from_utf8(request.as_bytes()).unwrap();
        assert_eq!(
            raw,
            "POST /submit?x=1 HTTP/1.1\r\nHost: example.com\r\nContent-Type: text/plain\r\n\r\nhi"
        );
    }
}
