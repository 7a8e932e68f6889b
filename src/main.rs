// Copyright (c) 2026 shaneyale (shaneyale86@gmail.com)
// All rights reserved.

//! # CGI 请求检查器
//!
//! 作为 CGI 程序运行：从进程环境变量与标准输入重建 `ServerRequest`，
//! 然后输出一份纯文本报告，列出服务端看到的方法、URI、标头、查询参数、
//! Cookie、解析后的请求体以及上传文件。
//!
//! 适合挂在任意支持 CGI 的服务器后面排查反向代理与重写规则带来的差异。

use http_message::{
    Config, Environment, HttpMessage, HttpRequest, Response, ServerRequest, Stream,
};

use log::{error, info, warn};
use log4rs;
use serde_json::Value;

use std::{
    fmt::Write as _,
    io::{self, Read, Write},
};

/// # 程序入口点
///
/// 初始化日志、加载配置，读取请求体后生成报告并以 CGI 格式写到标准输出。
fn main() {
    // 1. 初始化日志系统：通过外部 YAML 配置级别与输出目的地
    if let Err(e) = log4rs::init_file("config/log4rs.yaml", Default::default()) {
        eprintln!("日志系统初始化失败：{}", e);
    }

    // 2. 环境配置加载：从 TOML 文件读取运行参数
    let config = Config::from_toml("config/development.toml");
    info!("配置文件已载入");

    // 3. 按 CONTENT_LENGTH 读取请求体，缺失时不读取标准输入
    let input = read_body(std::env::var("CONTENT_LENGTH").ok());
    let env = Environment::from_cgi(std::env::vars(), input, &config.parse_options());

    let response = match ServerRequest::from_environment(&env, &config) {
        Ok(request) => report(&request),
        Err(e) => {
            error!("无法从CGI环境重建请求：{}", e);
            failure(&e.to_string())
        }
    };

    let mut stdout = io::stdout().lock();
    if let Err(e) = stdout
        .write_all(&cgi_bytes(&response))
        .and_then(|_| stdout.flush())
    {
        error!("写出CGI响应失败：{}", e);
    }
}

fn read_body(content_length: Option<String>) -> Vec<u8> {
    let length = match content_length.as_deref().map(str::trim).map(str::parse::<u64>) {
        Some(Ok(n)) => n,
        Some(Err(_)) => {
            warn!("CONTENT_LENGTH无法解析，忽略请求体");
            return Vec::new();
        }
        None => return Vec::new(),
    };
    let mut input = Vec::new();
    if let Err(e) = io::stdin().take(length).read_to_end(&mut input) {
        warn!("读取请求体失败：{}", e);
    }
    input
}

/// 生成描述请求的纯文本报告
fn report(request: &ServerRequest) -> Response {
    let mut text = String::new();
    let _ = writeln!(text, "{} {}", request.method(), request.request_target());
    let _ = writeln!(text, "uri: {}", request.uri());
    let _ = writeln!(text, "protocol: HTTP/{}", request.protocol_version());

    let _ = writeln!(text, "\n[headers]");
    for (name, values) in request.headers().iter() {
        let _ = writeln!(text, "{}: {}", name, values.join(", "));
    }

    let sections = [
        ("query", Value::Object(request.query_params().clone())),
        ("cookies", Value::Object(request.cookie_params().clone())),
        ("body", request.parsed_body().cloned().unwrap_or(Value::Null)),
    ];
    for (title, value) in sections {
        let pretty = serde_json::to_string_pretty(&value).unwrap_or_default();
        let _ = writeln!(text, "\n[{}]\n{}", title, pretty);
    }

    let _ = writeln!(text, "\n[files]");
    for file in request.uploaded_files().files() {
        let _ = writeln!(
            text,
            "{} ({} bytes, {}) {}",
            file.client_filename().unwrap_or("-"),
            file.size().map_or("?".to_string(), |s| s.to_string()),
            file.client_media_type().unwrap_or("-"),
            file.error_message()
        );
    }

    plain_text(Response::default(), text)
}

fn failure(message: &str) -> Response {
    match Response::new(400) {
        Ok(response) => plain_text(response, format!("{}\n", message)),
        Err(_) => plain_text(Response::default(), format!("{}\n", message)),
    }
}

fn plain_text(response: Response, text: String) -> Response {
    let length = text.len().to_string();
    let body = Stream::from_string(text);
    match response
        .with_header("Content-Type", "text/plain; charset=utf-8")
        .and_then(|r| r.with_header("Content-Length", length.as_str()))
    {
        Ok(r) => r.with_body(body),
        Err(e) => {
            error!("设置响应标头失败：{}", e);
            response.with_body(body)
        }
    }
}

/// CGI 输出以 `Status:` 行代替状态行
fn cgi_bytes(response: &Response) -> Vec<u8> {
    let mut bytes = format!(
        "Status: {} {}\r\n",
        response.status_code(),
        response.reason_phrase()
    )
    .into_bytes();
    for (name, values) in response.headers().iter() {
        bytes.extend(format!("{}: {}\r\n", name, values.join(", ")).into_bytes());
    }
    bytes.extend(b"\r\n");
    bytes.extend(response.body().to_string().into_bytes());
    bytes
}
