// Copyright (c) 2026 shaneyale (shaneyale86@gmail.com)
// All rights reserved.

//! # HTTP 响应模块
//!
//! `Response` 在 [`Message`] 之上增加状态码与原因短语。构造函数与
//! `with_status` 共用同一套过滤逻辑：
//! 1. 状态码必须位于 `[100, 599]`。
//! 2. 未给出原因短语时，按 IANA 标准表查找（未知状态码为空串）。
//! 3. 原因短语中除制表符外不得包含控制字符。

use crate::{
    exception::{Exception, Result},
    message::{HttpMessage, Message},
    param::{reason_phrase, CRLF},
};
use lazy_static::lazy_static;
use regex::Regex;

lazy_static! {
    static ref CONTROL_CHARS: Regex = Regex::new(r"[\x00-\x08\x0A-\x1F\x7F]").unwrap();
}

/// 不可变的 HTTP 响应
#[derive(Debug, Clone)]
pub struct Response {
    message: Message,
    status_code: u16,
    reason_phrase: String,
}

impl Default for Response {
    fn default() -> Self {
        Self {
            message: Message::new(),
            status_code: 200,
            reason_phrase: "OK".to_string(),
        }
    }
}

/// 校验状态码与原因短语，空原因短语按标准表补全
fn filter_status(code: i64, reason: &str) -> Result<(u16, String)> {
    if !(100..=599).contains(&code) {
        return Err(Exception::invalid(format!(
            "Invalid status code {}; must be an integer between 100 and 599, inclusive",
            code
        )));
    }
    let code = code as u16;
    let reason = match reason.is_empty() {
        true => reason_phrase(code).to_string(),
        false => reason.to_string(),
    };
    if CONTROL_CHARS.is_match(&reason) {
        return Err(Exception::invalid(format!(
            "Reason phrase contains invalid characters: {}",
            reason.escape_debug()
        )));
    }
    Ok((code, reason))
}

fn parse_status(code: &str) -> Result<i64> {
    code.trim().parse::<i64>().map_err(|_| {
        Exception::invalid(format!(
            "Invalid status code \"{}\"; must be an integer between 100 and 599, inclusive",
            code
        ))
    })
}

impl Response {
    /// 以标准原因短语构造响应
    pub fn new(code: u16) -> Result<Self> {
        Self::with_reason(code, "")
    }

    pub fn with_reason(code: u16, reason: &str) -> Result<Self> {
        let (status_code, reason_phrase) = filter_status(code as i64, reason)?;
        Ok(Self {
            message: Message::new(),
            status_code,
            reason_phrase,
        })
    }

    /// 状态码以数字字符串给出时使用
    pub fn from_status_str(code: &str, reason: &str) -> Result<Self> {
        let (status_code, reason_phrase) = filter_status(parse_status(code)?, reason)?;
        Ok(Self {
            message: Message::new(),
            status_code,
            reason_phrase,
        })
    }

    pub fn status_code(&self) -> u16 {
        self.status_code
    }

    pub fn reason_phrase(&self) -> &str {
        &self.reason_phrase
    }

    /// 返回新的响应；`reason` 为空时使用标准原因短语
    pub fn with_status(&self, code: u16, reason: &str) -> Result<Self> {
        self.with_filtered_status(code as i64, reason)
    }

    /// 状态码以数字字符串给出时使用
    pub fn with_status_str(&self, code: &str, reason: &str) -> Result<Self> {
        self.with_filtered_status(parse_status(code)?, reason)
    }

    fn with_filtered_status(&self, code: i64, reason: &str) -> Result<Self> {
        let (status_code, reason_phrase) = filter_status(code, reason)?;
        let mut new = self.clone();
        new.status_code = status_code;
        new.reason_phrase = reason_phrase;
        Ok(new)
    }

    /// 状态行，例如 `HTTP/1.1 404 Not Found`
    pub fn status_line(&self) -> String {
        let mut line = format!(
            "HTTP/{} {}",
            self.message.protocol_version(),
            self.status_code
        );
        if !self.reason_phrase.is_empty() {
            line.push(' ');
            line.push_str(&self.reason_phrase);
        }
        line
    }

    /// 序列化为 HTTP/1.x 报文：状态行、标头、空行与消息体
    pub fn as_bytes(&self) -> Vec<u8> {
        let mut bytes = format!("{}{}", self.status_line(), CRLF).into_bytes();
        bytes.extend(self.message.head_lines().into_bytes());
        bytes.extend(CRLF.as_bytes());
        bytes.extend(self.message.body_bytes());
        bytes
    }
}

impl HttpMessage for Response {
    fn message(&self) -> &Message {
        &self.message
    }

    fn message_mut(&mut self) -> &mut Message {
        &mut self.message
    }
}
