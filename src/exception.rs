// Copyright (c) 2026 shaneyale (shaneyale86@gmail.com)
// All rights reserved.

//! # Exception 模块
//!
//! 该模块定义了消息模型在构造、派生与资源操作过程中可能返回的错误。
//!
//! ## 错误分类
//! - **InvalidArgument**：调用方传入了语法或语义上非法的值（非法的标头、URI 组件、
//!   状态码、方法、MIME 类型、Cookie 名称等）。总是在出错的构造函数或 `with_*`
//!   调用处同步返回。
//! - **Runtime**：针对底层资源的操作因环境原因失败（文件无法打开、流已分离、
//!   流不可读写/不可定位、移动文件失败等）。消息中携带文件路径、偏移量等上下文。

use std::{fmt, io};

/// 消息模型操作失败的原因。
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Exception {
    /// 调用方提供了非法参数。
    InvalidArgument(String),
    /// 资源操作因环境原因失败。
    Runtime(String),
}

use Exception::*;

/// 模块内统一使用的 `Result` 别名。
pub type Result<T> = std::result::Result<T, Exception>;

impl Exception {
    pub fn invalid(message: impl Into<String>) -> Self {
        InvalidArgument(message.into())
    }

    pub fn runtime(message: impl Into<String>) -> Self {
        Runtime(message.into())
    }

    /// 是否为参数错误
    pub fn is_invalid_argument(&self) -> bool {
        matches!(self, InvalidArgument(_))
    }

    /// 是否为运行时错误
    pub fn is_runtime(&self) -> bool {
        matches!(self, Runtime(_))
    }

    /// 错误描述文本（不含分类前缀）
    pub fn message(&self) -> &str {
        match self {
            InvalidArgument(m) | Runtime(m) => m,
        }
    }
}

impl fmt::Display for Exception {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            InvalidArgument(m) => write!(f, "Invalid argument: {}", m),
            Runtime(m) => write!(f, "Runtime error: {}", m),
        }
    }
}

impl std::error::Error for Exception {}

impl From<io::Error> for Exception {
    fn from(e: io::Error) -> Self {
        Runtime(e.to_string())
    }
}
