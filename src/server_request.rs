// Copyright (c) 2026 shaneyale (shaneyale86@gmail.com)
// All rights reserved.

//! # 服务端请求模块
//!
//! `ServerRequest` 是服务器视角下收到的请求：在 [`Request`] 之上附带
//! 服务器参数快照、Cookie、查询参数、解析后的请求体、上传文件树以及
//! 由应用自行写入的属性。
//!
//! ## 构造方式
//! - `ServerRequest::new`：给定方法、URI 与服务器参数，派生标头、查询参数与协议版本。
//! - `ServerRequest::from_environment`：由完整的环境快照重建整个请求。

use crate::{
    config::Config,
    environment::{
        headers_from_server_params, normalize_files, parse_body, parse_cookie_header,
        uri_from_environment, Environment, ServerParams, UploadedFiles,
    },
    exception::{Exception, Result},
    message::{assert_header_name, normalize_header_values, HttpMessage, Message},
    query::{parse_str, ParseStrOptions},
    request::{HttpRequest, Request, UriInput},
    stream::Stream,
};
use lazy_static::lazy_static;
use log::{debug, warn};
use regex::Regex;
use serde_json::{Map, Value};

lazy_static! {
    /// Cookie 名必须是 token
    static ref COOKIE_NAME: Regex = Regex::new(r"^[!#$%&'*+\-.^_`|~0-9A-Za-z]+$").unwrap();
}

/// 服务器收到的不可变 HTTP 请求
#[derive(Debug, Clone)]
pub struct ServerRequest {
    request: Request,
    server_params: ServerParams,
    cookie_params: Map<String, Value>,
    query_params: Map<String, Value>,
    parsed_body: Option<Value>,
    uploaded_files: UploadedFiles,
    attributes: Map<String, Value>,
}

impl ServerRequest {
    /// 构造服务端请求，查询串中的 `.` 与空格原样保留
    pub fn new(
        method: &str,
        uri: impl Into<UriInput>,
        server_params: ServerParams,
    ) -> Result<Self> {
        Self::from_parts(
            method,
            uri,
            server_params,
            crate::param::DEFAULT_PROTOCOL_VERSION,
            &ParseStrOptions::default(),
        )
    }

    /// # 逻辑步骤
    /// 1. 构造底层 `Request`（校验方法与 URI）。
    /// 2. 由服务器参数派生标头，非法的标头记录警告后跳过。
    /// 3. 解析 URI 查询串得到初始查询参数。
    /// 4. `REQUEST_METHOD` 缺失时补全；协议版本取自 `SERVER_PROTOCOL`，否则使用 `fallback_protocol`。
    pub(crate) fn from_parts(
        method: &str,
        uri: impl Into<UriInput>,
        mut server_params: ServerParams,
        fallback_protocol: &str,
        opts: &ParseStrOptions,
    ) -> Result<Self> {
        let mut request = Request::new(method, uri)?;

        for (name, value) in headers_from_server_params(&server_params) {
            let values = match assert_header_name(&name)
                .and_then(|_| normalize_header_values(&name, vec![value]))
            {
                Ok(values) => values,
                Err(e) => {
                    warn!("忽略无法转换的服务器参数标头{}：{}", name, e);
                    continue;
                }
            };
            if let Err(e) = request.message_mut().headers_mut().set(&name, values) {
                warn!("忽略无法设置的标头{}：{}", name, e);
            }
        }

        let query_params = parse_str(request.uri().query(), opts);

        server_params
            .entry("REQUEST_METHOD".to_string())
            .or_insert_with(|| method.to_string());

        let protocol = match server_params.get("SERVER_PROTOCOL") {
            Some(p) if !p.is_empty() => p.strip_prefix("HTTP/").unwrap_or(p).to_string(),
            _ => fallback_protocol.to_string(),
        };
        request.message_mut().set_protocol_version(&protocol)?;

        Ok(Self {
            request,
            server_params,
            cookie_params: Map::new(),
            query_params,
            parsed_body: None,
            uploaded_files: UploadedFiles::default(),
            attributes: Map::new(),
        })
    }

    /// 由环境快照重建完整的服务端请求。
    ///
    /// 方法取自 `REQUEST_METHOD`（缺省为 GET），URI 由服务器参数推导；
    /// Cookie 缺失时从 `Cookie` 标头解析，查询参数缺失时从 URI 查询串解析；
    /// 请求体按 Content-Type 解析，上传文件描述树被规范化。
    pub fn from_environment(env: &Environment, config: &Config) -> Result<Self> {
        let opts = config.parse_options();
        let method = env
            .server
            .get("REQUEST_METHOD")
            .map(String::as_str)
            .filter(|m| !m.is_empty())
            .unwrap_or("GET");
        let uri = uri_from_environment(&env.server, &env.get)?;

        let mut request = Self::from_parts(
            method,
            uri,
            env.server.clone(),
            config.protocol_version(),
            &opts,
        )?;

        let cookies = match env.cookies.is_empty() {
            false => env.cookies.clone(),
            true => match request.header_line("Cookie").as_str() {
                "" => Map::new(),
                header => parse_cookie_header(header),
            },
        };
        request.cookie_params = cookies
            .into_iter()
            .filter(|(name, _)| match COOKIE_NAME.is_match(name) {
                true => true,
                false => {
                    warn!("忽略名称非法的Cookie：{}", name.escape_debug());
                    false
                }
            })
            .collect();
        if !env.get.is_empty() {
            request.query_params = env.get.clone();
        }
        request
            .request
            .message_mut()
            .set_body(Stream::from_string(&env.input));
        request.parsed_body = parse_body(
            &request.header_line("Content-Type"),
            &env.input,
            &env.post,
            &opts,
        );
        request.uploaded_files = normalize_files(&env.files)?;

        debug!(
            "从环境重建服务端请求：{} {}",
            request.method(),
            request.uri()
        );
        Ok(request)
    }
}

// --- Getter 访问器实现 ---

impl ServerRequest {
    pub fn server_params(&self) -> &ServerParams {
        &self.server_params
    }

    pub fn cookie_params(&self) -> &Map<String, Value> {
        &self.cookie_params
    }

    pub fn query_params(&self) -> &Map<String, Value> {
        &self.query_params
    }

    pub fn parsed_body(&self) -> Option<&Value> {
        self.parsed_body.as_ref()
    }

    pub fn uploaded_files(&self) -> &UploadedFiles {
        &self.uploaded_files
    }

    pub fn attributes(&self) -> &Map<String, Value> {
        &self.attributes
    }

    pub fn attribute(&self, name: &str) -> Option<&Value> {
        self.attributes.get(name)
    }

    /// 属性不存在时返回 `default`
    pub fn attribute_or<'a>(&'a self, name: &str, default: &'a Value) -> &'a Value {
        self.attributes.get(name).unwrap_or(default)
    }
}

fn assert_string_leaves(value: &Value, path: &str) -> Result<()> {
    match value {
        Value::String(_) => Ok(()),
        Value::Array(items) => items
            .iter()
            .enumerate()
            .try_for_each(|(i, v)| assert_string_leaves(v, &format!("{}[{}]", path, i))),
        Value::Object(map) => map
            .iter()
            .try_for_each(|(k, v)| assert_string_leaves(v, &format!("{}[{}]", path, k))),
        other => Err(Exception::invalid(format!(
            "Query parameter \"{}\" must be a string or a nested structure of strings, {} given",
            path, other
        ))),
    }
}

// --- 不可变派生（with_*） ---

impl ServerRequest {
    pub fn with_cookie_params(&self, cookies: Map<String, Value>) -> Result<Self> {
        if let Some(name) = cookies.keys().find(|name| !COOKIE_NAME.is_match(name)) {
            return Err(Exception::invalid(format!(
                "Cookie name \"{}\" must be a valid token",
                name.escape_debug()
            )));
        }
        let mut new = self.clone();
        new.cookie_params = cookies;
        Ok(new)
    }

    pub fn with_query_params(&self, query: Map<String, Value>) -> Result<Self> {
        for (key, value) in &query {
            assert_string_leaves(value, key)?;
        }
        let mut new = self.clone();
        new.query_params = query;
        Ok(new)
    }

    /// 请求体只能是对象、数组或空
    pub fn with_parsed_body(&self, body: Option<Value>) -> Result<Self> {
        match &body {
            None | Some(Value::Object(_)) | Some(Value::Array(_)) => {}
            Some(other) => {
                return Err(Exception::invalid(format!(
                    "Parsed body must be an object, an array or empty, {} given",
                    other
                )))
            }
        }
        let mut new = self.clone();
        new.parsed_body = body;
        Ok(new)
    }

    pub fn with_uploaded_files(&self, files: UploadedFiles) -> Self {
        let mut new = self.clone();
        new.uploaded_files = files;
        new
    }

    pub fn with_attribute(&self, name: &str, value: Value) -> Result<Self> {
        if name.is_empty() {
            return Err(Exception::invalid("Attribute name must be a non-empty string"));
        }
        let mut new = self.clone();
        new.attributes.insert(name.to_string(), value);
        Ok(new)
    }

    /// 删除属性；属性不存在时原样返回
    pub fn without_attribute(&self, name: &str) -> Self {
        if !self.attributes.contains_key(name) {
            return self.clone();
        }
        let mut new = self.clone();
        new.attributes.shift_remove(name);
        new
    }
}

impl HttpMessage for ServerRequest {
    fn message(&self) -> &Message {
        self.request.message()
    }

    fn message_mut(&mut self) -> &mut Message {
        self.request.message_mut()
    }

    fn after_header_removed(&mut self, name: &str) -> Result<()> {
        self.request.after_header_removed(name)
    }
}

impl HttpRequest for ServerRequest {
    fn request(&self) -> &Request {
        &self.request
    }

    fn request_mut(&mut self) -> &mut Request {
        &mut self.request
    }
}
