// Copyright (c) 2026 shaneyale (shaneyale86@gmail.com)
// All rights reserved.

//! # 协议参数与常量模块
//!
//! 该模块集中定义了消息模型遵循的 HTTP 协议常量，包括：
//! - HTTP 状态码及其标准原因短语（Reason Phrase）。
//! - 允许的协议版本。
//! - 各 scheme 的标准端口。

use lazy_static::lazy_static;
use std::collections::HashMap;

/// HTTP 协议规定的换行符（Carriage Return Line Feed）
pub const CRLF: &str = "\r\n";

/// 默认协议版本
pub const DEFAULT_PROTOCOL_VERSION: &str = "1.1";

/// 基于流的上传文件在移动时每次复制的字节数（1 MiB）
pub const UPLOAD_CHUNK_SIZE: usize = 1024 * 1024;

/// 消息允许使用的协议版本
pub const PROTOCOL_VERSIONS: [&str; 7] = ["0.9", "1.0", "1.1", "2", "2.0", "3", "3.0"];

lazy_static! {
    /// scheme 与其标准端口的映射表。
    ///
    /// 只收录 ftp/http/https，其他 scheme 的端口一律视为非标准端口。
    pub static ref STANDARD_PORTS: HashMap<&'static str, u16> = {
        let mut map = HashMap::new();
        map.insert("ftp", 21);
        map.insert("http", 80);
        map.insert("https", 443);
        map
    };
}

lazy_static! {
    /// HTTP 状态码与其对应的标准原因短语映射表。
    ///
    /// 参考标准：[IANA HTTP Status Code Registry](https://www.iana.org/assignments/http-status-codes)。
    pub static ref STATUS_CODES: HashMap<u16, &'static str> = {
        let mut map = HashMap::new();
        // 1xx: 信息响应 (Informational)
        map.insert(100, "Continue");
        map.insert(101, "Switching Protocols");
        map.insert(102, "Processing");
        map.insert(103, "Early Hints");

        // 2xx: 成功响应 (Successful)
        map.insert(200, "OK");
        map.insert(201, "Created");
        map.insert(202, "Accepted");
        map.insert(203, "Non-Authoritative Information");
        map.insert(204, "No Content");
        map.insert(205, "Reset Content");
        map.insert(206, "Partial Content");
        map.insert(207, "Multi-Status");
        map.insert(208, "Already Reported");
        map.insert(226, "IM Used");

        // 3xx: 重定向 (Redirection)
        map.insert(300, "Multiple Choices");
        map.insert(301, "Moved Permanently");
        map.insert(302, "Found");
        map.insert(303, "See Other");
        map.insert(304, "Not Modified");
        map.insert(305, "Use Proxy");
        // 306 已弃用 (Reserved)
        map.insert(307, "Temporary Redirect");
        map.insert(308, "Permanent Redirect");

        // 4xx: 客户端错误 (Client Error)
        map.insert(400, "Bad Request");
        map.insert(401, "Unauthorized");
        map.insert(402, "Payment Required");
        map.insert(403, "Forbidden");
        map.insert(404, "Not Found");
        map.insert(405, "Method Not Allowed");
        map.insert(406, "Not Acceptable");
        map.insert(407, "Proxy Authentication Required");
        map.insert(408, "Request Timeout");
        map.insert(409, "Conflict");
        map.insert(410, "Gone");
        map.insert(411, "Length Required");
        map.insert(412, "Precondition Failed");
        map.insert(413, "Content Too Large");
        map.insert(414, "URI Too Long");
        map.insert(415, "Unsupported Media Type");
        map.insert(416, "Range Not Satisfiable");
        map.insert(417, "Expectation Failed");
        map.insert(418, "I'm a teapot");
        map.insert(421, "Misdirected Request");
        map.insert(422, "Unprocessable Content");
        map.insert(423, "Locked");
        map.insert(424, "Failed Dependency");
        map.insert(425, "Too Early");
        map.insert(426, "Upgrade Required");
        map.insert(428, "Precondition Required");
        map.insert(429, "Too Many Requests");
        map.insert(431, "Request Header Fields Too Large");
        map.insert(451, "Unavailable For Legal Reasons");

        // 5xx: 服务端错误 (Server Error)
        map.insert(500, "Internal Server Error");
        map.insert(501, "Not Implemented");
        map.insert(502, "Bad Gateway");
        map.insert(503, "Service Unavailable");
        map.insert(504, "Gateway Timeout");
        map.insert(505, "HTTP Version Not Supported");
        map.insert(506, "Variant Also Negotiates");
        map.insert(507, "Insufficient Storage");
        map.insert(508, "Loop Detected");
        map.insert(510, "Not Extended");
        map.insert(511, "Network Authentication Required");
        map
    };
}

/// 查询状态码对应的标准原因短语，未知状态码返回空串
pub fn reason_phrase(code: u16) -> &'static str {
    STATUS_CODES.get(&code).copied().unwrap_or("")
}
