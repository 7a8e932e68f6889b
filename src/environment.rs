// Copyright (c) 2026 shaneyale (shaneyale86@gmail.com)
// All rights reserved.

//! # 运行环境模块
//!
//! 把宿主服务器提供的原始环境（CGI 风格的服务器参数、查询参数、表单、Cookie、
//! 上传文件描述树与请求体）转换为消息模型所需的结构：
//! - 服务器参数 → 标头列表（含 Authorization 的推导）；
//! - 服务器参数 → `Uri`；
//! - 上传文件描述树 → `UploadedFiles` 树；
//! - 请求体 → 按 Content-Type 解析出的结构化数据。
//!
//! 所有函数都是纯函数，环境快照作为参数显式传入。

use crate::{
    exception::{Exception, Result},
    query::{build_query, parse_str, ParseStrOptions},
    uploaded_file::{UploadedFile, UploadedFileSpec},
    uri::Uri,
    util::{base64_encode, title_case_header},
};
use lazy_static::lazy_static;
use log::{debug, warn};
use percent_encoding::percent_decode_str;
use regex::Regex;
use serde_json::{Map, Value};
use std::collections::BTreeMap;

/// 服务器参数快照
pub type ServerParams = BTreeMap<String, String>;

lazy_static! {
    static ref COOKIE_PAIR: Regex = Regex::new(r"(?:^\s*|\s*;\s*)([^=;\s]+)=([^;]*)").unwrap();
    static ref ABSOLUTE_PREFIX: Regex = Regex::new(r"^[^/:]+://[^/]+").unwrap();
}

/// 请求方不可控的原始环境快照
#[derive(Debug, Clone, Default)]
pub struct Environment {
    pub server: ServerParams,
    pub get: Map<String, Value>,
    pub post: Map<String, Value>,
    pub cookies: Map<String, Value>,
    /// 原始上传文件描述树
    pub files: Value,
    /// 原始请求体
    pub input: Vec<u8>,
}

impl Environment {
    pub fn new() -> Self {
        Self {
            files: Value::Object(Map::new()),
            ..Default::default()
        }
    }

    /// 由 CGI 进程环境变量与标准输入构造快照。
    ///
    /// 查询参数取自 `QUERY_STRING`，Cookie 取自 `HTTP_COOKIE`，
    /// 表单请求体按查询字符串规则解析到 `post`。
    pub fn from_cgi<I>(vars: I, input: Vec<u8>, opts: &ParseStrOptions) -> Self
    where
        I: IntoIterator<Item = (String, String)>,
    {
        let server: ServerParams = vars.into_iter().collect();
        let get = server
            .get("QUERY_STRING")
            .map(|q| parse_str(q, opts))
            .unwrap_or_default();
        let cookies = server
            .get("HTTP_COOKIE")
            .map(|c| parse_cookie_header(c))
            .unwrap_or_default();
        let post = match server.get("CONTENT_TYPE") {
            Some(t) if media_type(t) == "application/x-www-form-urlencoded" => {
                parse_str(&String::from_utf8_lossy(&input), opts)
            }
            _ => Map::new(),
        };
        debug!("从CGI环境构建快照，共{}个服务器参数", server.len());
        Self {
            server,
            get,
            post,
            cookies,
            files: Value::Object(Map::new()),
            input,
        }
    }
}

/// 解析 `Cookie` 标头，值按百分号编码解码
pub fn parse_cookie_header(header: &str) -> Map<String, Value> {
    COOKIE_PAIR
        .captures_iter(header)
        .map(|cap| {
            (
                cap[1].to_string(),
                Value::String(percent_decode_str(&cap[2]).decode_utf8_lossy().into_owned()),
            )
        })
        .collect()
}

fn non_empty<'a>(params: &'a ServerParams, key: &str) -> Option<&'a str> {
    params.get(key).map(String::as_str).filter(|v| !v.is_empty())
}

/// 缺少 `HTTP_AUTHORIZATION` 时按优先级推导 Authorization 标头：
/// `REDIRECT_HTTP_AUTHORIZATION` > Basic（`PHP_AUTH_USER`/`PHP_AUTH_PW`）> `PHP_AUTH_DIGEST`
fn authorization_header(params: &ServerParams) -> Option<String> {
    if params.contains_key("HTTP_AUTHORIZATION") {
        return None;
    }
    if let Some(value) = non_empty(params, "REDIRECT_HTTP_AUTHORIZATION") {
        return Some(value.to_string());
    }
    if let Some(user) = non_empty(params, "PHP_AUTH_USER") {
        let password = params.get("PHP_AUTH_PW").map_or("", String::as_str);
        let credentials = format!("{}:{}", user, password);
        return Some(format!("Basic {}", base64_encode(credentials.as_bytes())));
    }
    non_empty(params, "PHP_AUTH_DIGEST").map(String::from)
}

/// 由服务器参数重建标头列表。
///
/// # 映射规则
/// - `CONTENT_TYPE`、`CONTENT_LENGTH`、`CONTENT_MD5` 精确映射；
/// - `HTTP_` 前缀去掉后按单词首字母大写并以连字符连接（`HTTP_X_FOO_BAR` → `X-Foo-Bar`）；
/// - 重写规则产生的 `REDIRECT_` 前缀在未带前缀的键不存在时去掉；
/// - 空值忽略。
pub fn headers_from_server_params(params: &ServerParams) -> Vec<(String, String)> {
    let mut headers = Vec::new();
    if let Some(value) = authorization_header(params) {
        headers.push(("Authorization".to_string(), value));
    }

    for (key, value) in params {
        if value.is_empty() {
            continue;
        }
        let key = match key.strip_prefix("REDIRECT_") {
            Some(stripped) if params.contains_key(stripped) => continue,
            Some(stripped) if stripped == "HTTP_AUTHORIZATION" => continue,
            Some(stripped) => stripped,
            None => key.as_str(),
        };
        let name = match key {
            "CONTENT_TYPE" => "Content-Type".to_string(),
            "CONTENT_LENGTH" => "Content-Length".to_string(),
            "CONTENT_MD5" => "Content-Md5".to_string(),
            _ => match key.strip_prefix("HTTP_") {
                Some(rest) if !rest.is_empty() => title_case_header(rest),
                _ => continue,
            },
        };
        headers.push((name, value.clone()));
    }
    headers
}

/// 拆分 `host[:port]`，支持带方括号的 IPv6 字面量
fn split_host_port(value: &str) -> (String, Option<String>) {
    if value.starts_with('[') {
        if let Some(close) = value.find(']') {
            let host = value[..=close].to_string();
            let port = value[close + 1..].strip_prefix(':').map(String::from);
            return (host, port);
        }
    }
    match value.rsplit_once(':') {
        Some((host, port)) if !host.contains(':') => (host.to_string(), Some(port.to_string())),
        _ => (value.to_string(), None),
    }
}

fn parse_port(raw: &str) -> Option<u16> {
    match raw.trim().parse::<u16>() {
        Ok(port) if port > 0 => Some(port),
        _ => {
            warn!("忽略无法解析的端口：{}", raw);
            None
        }
    }
}

/// 由服务器参数推导请求 `Uri`，查询串缺失时以 `get` 参数序列化结果兜底
pub fn uri_from_environment(params: &ServerParams, get: &Map<String, Value>) -> Result<Uri> {
    let https = non_empty(params, "HTTPS").map_or(false, |v| !v.eq_ignore_ascii_case("off"));
    let mut uri = Uri::default().with_scheme(if https { "https" } else { "http" })?;

    let (host, mut port) = match non_empty(params, "HTTP_HOST") {
        Some(value) => {
            let (host, port) = split_host_port(value);
            (host, port.as_deref().and_then(parse_port))
        }
        None => {
            let host = non_empty(params, "SERVER_NAME")
                .or_else(|| non_empty(params, "SERVER_ADDR"))
                .unwrap_or("");
            (host.to_string(), None)
        }
    };
    if port.is_none() {
        port = non_empty(params, "SERVER_PORT").and_then(parse_port);
    }
    if !host.is_empty() {
        uri = uri.with_host(&host)?.with_port(port)?;
    }

    let (path, query, fragment) = match non_empty(params, "REQUEST_URI") {
        Some(request_uri) => {
            let request_uri = ABSOLUTE_PREFIX.replace(request_uri, "");
            let (rest, fragment) = match request_uri.split_once('#') {
                Some((rest, fragment)) => (rest.to_string(), fragment.to_string()),
                None => (request_uri.to_string(), String::new()),
            };
            let (path, query) = match rest.split_once('?') {
                Some((path, query)) => (path.to_string(), query.to_string()),
                None => (rest.clone(), String::new()),
            };
            (path, query, fragment)
        }
        None => {
            let path = non_empty(params, "ORIG_PATH_INFO").unwrap_or("/");
            (path.to_string(), String::new(), String::new())
        }
    };
    let query = match query.is_empty() {
        false => query,
        true => match non_empty(params, "QUERY_STRING") {
            Some(q) => q.trim_start_matches('?').to_string(),
            None => build_query(get),
        },
    };

    debug!("从环境推导出请求URI：host={} path={}", host, path);
    uri.with_path(&path)?
        .with_query(&query)?
        .with_fragment(&fragment)
}

/// 上传文件树：叶子必须是 `UploadedFile`
#[derive(Debug, Clone)]
pub enum UploadedFiles {
    File(UploadedFile),
    List(Vec<UploadedFiles>),
    Map(Vec<(String, UploadedFiles)>),
}

impl Default for UploadedFiles {
    fn default() -> Self {
        UploadedFiles::Map(Vec::new())
    }
}

impl UploadedFiles {
    /// 按名称查找子树（仅对 `Map` 有效）
    pub fn get(&self, name: &str) -> Option<&UploadedFiles> {
        match self {
            UploadedFiles::Map(entries) => {
                entries.iter().find(|(k, _)| k == name).map(|(_, v)| v)
            }
            _ => None,
        }
    }

    pub fn index(&self, i: usize) -> Option<&UploadedFiles> {
        match self {
            UploadedFiles::List(items) => items.get(i),
            _ => None,
        }
    }

    pub fn as_file(&self) -> Option<&UploadedFile> {
        match self {
            UploadedFiles::File(file) => Some(file),
            _ => None,
        }
    }

    pub fn len(&self) -> usize {
        match self {
            UploadedFiles::File(_) => 1,
            UploadedFiles::List(items) => items.len(),
            UploadedFiles::Map(entries) => entries.len(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// 深度优先遍历所有叶子文件
    pub fn files(&self) -> Vec<&UploadedFile> {
        match self {
            UploadedFiles::File(file) => vec![file],
            UploadedFiles::List(items) => items.iter().flat_map(|i| i.files()).collect(),
            UploadedFiles::Map(entries) => entries.iter().flat_map(|(_, v)| v.files()).collect(),
        }
    }
}

fn invalid_files(detail: &str) -> Exception {
    Exception::invalid(format!("Invalid value in files specification: {}", detail))
}

/// 取出并行数组（或对象）在某个位置的值
fn field_at(field: Option<&Value>, index: usize, key: &str) -> Value {
    match field {
        Some(Value::Array(items)) => items.get(index).cloned().unwrap_or(Value::Null),
        Some(Value::Object(map)) => map.get(key).cloned().unwrap_or(Value::Null),
        _ => Value::Null,
    }
}

/// 把 `tmp_name` 等字段为并行数组的描述拆为逐项描述
fn normalize_nested_spec(spec: &Map<String, Value>) -> Result<UploadedFiles> {
    const FIELDS: [&str; 5] = ["size", "error", "name", "type", "full_path"];
    let build = |index: usize, key: &str, tmp_name: &Value| -> Result<UploadedFiles> {
        let mut item = Map::new();
        item.insert("tmp_name".to_string(), tmp_name.clone());
        for field in FIELDS {
            item.insert(field.to_string(), field_at(spec.get(field), index, key));
        }
        file_from_spec(&item)
    };

    match spec.get("tmp_name") {
        Some(Value::Array(names)) => names
            .iter()
            .enumerate()
            .map(|(i, tmp)| build(i, "", tmp))
            .collect::<Result<Vec<_>>>()
            .map(UploadedFiles::List),
        Some(Value::Object(names)) => names
            .iter()
            .map(|(key, tmp)| Ok((key.clone(), build(0, key.as_str(), tmp)?)))
            .collect::<Result<Vec<_>>>()
            .map(UploadedFiles::Map),
        _ => Err(invalid_files("tmp_name must be a list or a map")),
    }
}

fn file_from_spec(spec: &Map<String, Value>) -> Result<UploadedFiles> {
    if matches!(spec.get("tmp_name"), Some(Value::Array(_) | Value::Object(_))) {
        return normalize_nested_spec(spec);
    }
    let mut spec = spec.clone();
    spec.retain(|_, v| !v.is_null());
    let spec: UploadedFileSpec = serde_json::from_value(Value::Object(spec))
        .map_err(|e| invalid_files(&e.to_string()))?;
    UploadedFile::from_spec(&spec).map(UploadedFiles::File)
}

fn normalize_value(value: &Value) -> Result<UploadedFiles> {
    match value {
        Value::Object(map) if map.contains_key("tmp_name") => file_from_spec(map),
        Value::Object(_) => normalize_files(value),
        Value::Array(items) => items
            .iter()
            .map(normalize_value)
            .collect::<Result<Vec<_>>>()
            .map(UploadedFiles::List),
        other => Err(invalid_files(&other.to_string())),
    }
}

/// 把原始上传文件描述树一比一地规范化为 `UploadedFiles`
pub fn normalize_files(files: &Value) -> Result<UploadedFiles> {
    match files {
        Value::Null => Ok(UploadedFiles::default()),
        Value::Object(map) => map
            .iter()
            .map(|(key, value)| Ok((key.clone(), normalize_value(value)?)))
            .collect::<Result<Vec<_>>>()
            .map(UploadedFiles::Map),
        other => Err(invalid_files(&other.to_string())),
    }
}

/// 取 Content-Type 的媒体类型部分（小写，去掉参数）
pub fn media_type(content_type: &str) -> String {
    content_type
        .split(';')
        .next()
        .unwrap_or("")
        .trim()
        .to_ascii_lowercase()
}

/// 按 Content-Type 解析请求体。
///
/// - `application/json`：解码为对象或数组，失败返回 `None`；
/// - `application/x-www-form-urlencoded`：按查询字符串规则解析原始字节；
/// - `multipart/form-data`：使用宿主已解析的表单；
/// - 其他类型返回 `None`。
pub fn parse_body(
    content_type: &str,
    raw: &[u8],
    form: &Map<String, Value>,
    opts: &ParseStrOptions,
) -> Option<Value> {
    match media_type(content_type).as_str() {
        "application/json" => match serde_json::from_slice::<Value>(raw) {
            Ok(value @ (Value::Object(_) | Value::Array(_))) => Some(value),
            Ok(_) => None,
            Err(e) => {
                debug!("JSON请求体解析失败：{}", e);
                None
            }
        },
        "application/x-www-form-urlencoded" => Some(Value::Object(parse_str(
            &String::from_utf8_lossy(raw),
            opts,
        ))),
        "multipart/form-data" => Some(Value::Object(form.clone())),
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn params(pairs: &[(&str, &str)]) -> ServerParams {
        pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect()
    }

    fn header<'a>(headers: &'a [(String, String)], name: &str) -> Option<&'a str> {
        headers
            .iter()
            .find(|(n, _)| n == name)
            .map(|(_, v)| v.as_str())
    }

    #[test]
    fn test_header_mapping() {
        let headers = headers_from_server_params(&params(&[
            ("HTTP_X_FOO_BAR", "baz"),
            ("CONTENT_TYPE", "text/plain"),
            ("CONTENT_LENGTH", "3"),
            ("CONTENT_MD5", "abc"),
            ("HTTP_CONTENT_TYPE", "application/json"),
            ("SERVER_NAME", "ignored"),
            ("HTTP_EMPTY", ""),
        ]));
        assert_eq!(header(&headers, "X-Foo-Bar"), Some("baz"));
        assert_eq!(header(&headers, "Content-Length"), Some("3"));
        assert_eq!(header(&headers, "Content-Md5"), Some("abc"));
        assert!(headers.iter().all(|(n, _)| n != "Server-Name" && n != "Empty"));
    }

    #[test]
    fn test_authorization_precedence() {
        let redirect = params(&[
            ("REDIRECT_HTTP_AUTHORIZATION", "Bearer token"),
            ("PHP_AUTH_USER", "user"),
        ]);
        let headers = headers_from_server_params(&redirect);
        assert_eq!(header(&headers, "Authorization"), Some("Bearer token"));

        let basic = params(&[("PHP_AUTH_USER", "user"), ("PHP_AUTH_PW", "pass"), ("PHP_AUTH_DIGEST", "d")]);
        let headers = headers_from_server_params(&basic);
        assert_eq!(header(&headers, "Authorization"), Some("Basic dXNlcjpwYXNz"));

        let digest = params(&[("PHP_AUTH_DIGEST", "Digest username=\"u\"")]);
        let headers = headers_from_server_params(&digest);
        assert_eq!(header(&headers, "Authorization"), Some("Digest username=\"u\""));

        let explicit = params(&[("HTTP_AUTHORIZATION", "Token x"), ("PHP_AUTH_USER", "user")]);
        let headers = headers_from_server_params(&explicit);
        let values: Vec<&str> = headers
            .iter()
            .filter(|(n, _)| n == "Authorization")
            .map(|(_, v)| v.as_str())
            .collect();
        assert_eq!(values, vec!["Token x"]);

        assert!(header(&headers_from_server_params(&params(&[])), "Authorization").is_none());
    }

    #[test]
    fn test_redirect_prefix_stripped() {
        let headers = headers_from_server_params(&params(&[("REDIRECT_HTTP_X_TRACE", "1")]));
        assert_eq!(header(&headers, "X-Trace"), Some("1"));
        let headers = headers_from_server_params(&params(&[
            ("REDIRECT_HTTP_X_TRACE", "old"),
            ("HTTP_X_TRACE", "new"),
        ]));
        assert_eq!(header(&headers, "X-Trace"), Some("new"));
    }

    #[test]
    fn test_uri_from_host_header() {
        let uri = uri_from_environment(
            &params(&[
                ("HTTPS", "on"),
                ("HTTP_HOST", "Example.com:8443"),
                ("SERVER_PORT", "443"),
                ("REQUEST_URI", "/items?sort=name#top"),
            ]),
            &Map::new(),
        )
        .unwrap();
        assert_eq!(uri.to_string(), "https://example.com:8443/items?sort=name#top");
    }

    #[test]
    fn test_uri_server_name_and_port_fallback() {
        let uri = uri_from_environment(
            &params(&[
                ("HTTPS", "off"),
                ("SERVER_NAME", "example.org"),
                ("SERVER_PORT", "8080"),
                ("QUERY_STRING", "?a=1"),
            ]),
            &Map::new(),
        )
        .unwrap();
        assert_eq!(uri.to_string(), "http://example.org:8080/?a=1");

        let uri = uri_from_environment(
            &params(&[("SERVER_ADDR", "::1"), ("SERVER_PORT", "80")]),
            &Map::new(),
        )
        .unwrap();
        assert_eq!(uri.host(), "[::1]");
        assert_eq!(uri.port(), None);
    }

    #[test]
    fn test_uri_ipv6_host_header() {
        let uri = uri_from_environment(&params(&[("HTTP_HOST", "[::1]:8080")]), &Map::new()).unwrap();
        assert_eq!(uri.host(), "[::1]");
        assert_eq!(uri.port(), Some(8080));
    }

    #[test]
    fn test_uri_absolute_request_uri_and_get_fallback() {
        let uri = uri_from_environment(
            &params(&[("HTTP_HOST", "a.com"), ("REQUEST_URI", "http://proxy.com/p")]),
            &Map::new(),
        )
        .unwrap();
        assert_eq!(uri.to_string(), "http://a.com/p");

        let get = json!({"q": "x y"});
        let uri = uri_from_environment(&params(&[("HTTP_HOST", "a.com")]), get.as_object().unwrap())
            .unwrap();
        assert_eq!(uri.to_string(), "http://a.com/?q=x+y");
    }

    #[test]
    fn test_normalize_parallel_arrays() {
        let files = json!({
            "avatar": {
                "tmp_name": ["/tmp/a", "/tmp/b"],
                "name": ["x.png", "y.png"],
                "size": [10, 20],
                "error": [0, 0],
                "type": ["image/png", "image/png"]
            }
        });
        let tree = normalize_files(&files).unwrap();
        let avatar = tree.get("avatar").unwrap();
        assert_eq!(avatar.len(), 2);
        let first = avatar.index(0).and_then(UploadedFiles::as_file).unwrap();
        let second = avatar.index(1).and_then(UploadedFiles::as_file).unwrap();
        assert_eq!(first.client_filename(), Some("x.png"));
        assert_eq!(first.size(), Some(10));
        assert_eq!(second.client_filename(), Some("y.png"));
        assert_eq!(second.size(), Some(20));
    }

    #[test]
    fn test_normalize_nested_maps_and_single_files() {
        let files = json!({
            "doc": {"tmp_name": "/tmp/d", "name": "d.txt", "size": 1, "error": 0, "type": "text/plain"},
            "form": {
                "tmp_name": {"cv": "/tmp/cv"},
                "name": {"cv": "cv.pdf"},
                "size": {"cv": 3},
                "error": {"cv": 0},
                "type": {"cv": "application/pdf"}
            },
            "missing": {"tmp_name": "", "name": "", "size": 0, "error": 4, "type": ""}
        });
        let tree = normalize_files(&files).unwrap();
        assert_eq!(tree.files().len(), 3);
        let cv = tree.get("form").and_then(|f| f.get("cv")).and_then(UploadedFiles::as_file).unwrap();
        assert_eq!(cv.client_media_type(), Some("application/pdf"));
        let missing = tree.get("missing").and_then(UploadedFiles::as_file).unwrap();
        assert!(missing.stream().is_err());
    }

    #[test]
    fn test_normalize_rejects_scalars() {
        assert!(normalize_files(&json!({"a": 1})).unwrap_err().is_invalid_argument());
        assert!(normalize_files(&json!("x")).is_err());
        assert!(normalize_files(&json!({"a": {"tmp_name": "/t", "size": -1}})).is_err());
        assert!(normalize_files(&Value::Null).unwrap().is_empty());
    }

    #[test]
    fn test_parse_body() {
        let opts = ParseStrOptions::default();
        let form = json!({"field": "v"});
        let form = form.as_object().unwrap();
        assert_eq!(
            parse_body("application/json; charset=utf-8", br#"{"a":1}"#, form, &opts),
            Some(json!({"a": 1}))
        );
        assert_eq!(parse_body("application/json", b"{broken", form, &opts), None);
        assert_eq!(parse_body("application/json", b"5", form, &opts), None);
        assert_eq!(
            parse_body("application/x-www-form-urlencoded", b"a.b=1&c[]=2", form, &opts),
            Some(json!({"a.b": "1", "c": ["2"]}))
        );
        assert_eq!(
            parse_body("multipart/form-data; boundary=x", b"--x", form, &opts),
            Some(json!({"field": "v"}))
        );
        assert_eq!(parse_body("text/plain", b"hi", form, &opts), None);
    }

    #[test]
    fn test_parse_cookie_header() {
        let cookies = parse_cookie_header("session=abc%20def; theme=dark;empty=");
        assert_eq!(
            Value::Object(cookies),
            json!({"session": "abc def", "theme": "dark", "empty": ""})
        );
    }

    #[test]
    fn test_environment_from_cgi() {
        let vars = vec![
            ("QUERY_STRING".to_string(), "a=1".to_string()),
            ("HTTP_COOKIE".to_string(), "k=v".to_string()),
            ("CONTENT_TYPE".to_string(), "application/x-www-form-urlencoded".to_string()),
        ];
        let env = Environment::from_cgi(vars, b"f=2".to_vec(), &ParseStrOptions::default());
        assert_eq!(Value::Object(env.get), json!({"a": "1"}));
        assert_eq!(Value::Object(env.cookies), json!({"k": "v"}));
        assert_eq!(Value::Object(env.post), json!({"f": "2"}));
        assert_eq!(env.input, b"f=2");
    }
}
