// Copyright (c) 2026 shaneyale (shaneyale86@gmail.com)
// All rights reserved.

//! # Exception 模块
//!
//! 请求生命周期中的两类错误：
//! - [`Exception`]：传输层报文解析失败，请求尚未进入分发流程。
//! - [`HttpException`]：分发过程中（认证、路由、存储）抛出的结构化 HTTP 错误，
//!   携带状态码、消息以及可选的认证质询头，在唯一的分发边界处被转换为错误响应。

use std::{fmt, io};

/// 报文解析阶段的异常类型。
#[derive(Debug, Copy, Clone, PartialEq)]
pub enum Exception {
    /// 请求头无法解析为合法的 UTF-8 字符串。
    RequestIsNotUtf8,
    /// 请求行缺少方法、路径或版本。
    MalformedRequest,
    /// 客户端使用了服务器不支持的 HTTP 方法。
    UnSupportedRequestMethod,
    /// 客户端使用了服务器不支持的 HTTP 协议版本。
    UnsupportedHttpVersion,
    /// 请求体超过配置的上限，或 `Content-Length` 无法解析。
    InvalidBody,
}

use Exception::*;

impl Exception {
    /// 解析异常对应的响应状态码
    pub fn status_code(&self) -> u16 {
        match self {
            UnSupportedRequestMethod => 405,
            _ => 400,
        }
    }
}

impl fmt::Display for Exception {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RequestIsNotUtf8 => write!(f, "Request bytes can't be parsed in UTF-8"),
            MalformedRequest => write!(f, "Malformed request line"),
            UnSupportedRequestMethod => write!(f, "Unsupported request method"),
            UnsupportedHttpVersion => write!(f, "Unsupported HTTP version"),
            InvalidBody => write!(f, "Invalid or oversized request body"),
        }
    }
}

impl std::error::Error for Exception {}

/// 分发过程中抛出的 HTTP 错误。
///
/// 错误沿调用栈一路传播到 [`crate::server::Server::handle`]，在那里暂存的输出被丢弃，
/// 并以 `status` + 纯文本 `message` 重新生成响应。
#[derive(Debug, Clone, PartialEq)]
pub struct HttpException {
    status: u16,
    message: String,
    challenge: Option<String>,
}

impl HttpException {
    pub fn new(status: u16, message: impl Into<String>) -> Self {
        Self {
            status,
            message: message.into(),
            challenge: None,
        }
    }

    pub fn bad_request(message: impl Into<String>) -> Self {
        Self::new(400, message)
    }

    /// 401，同时携带 `WWW-Authenticate` 质询头的值
    pub fn unauthorized(challenge: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            status: 401,
            message: message.into(),
            challenge: Some(challenge.into()),
        }
    }

    /// 404 的响应体为空
    pub fn not_found() -> Self {
        Self::new(404, "")
    }

    pub fn method_not_allowed() -> Self {
        Self::new(405, "")
    }

    pub fn server_error(message: impl Into<String>) -> Self {
        Self::new(500, message)
    }

    pub fn status(&self) -> u16 {
        self.status
    }

    pub fn message(&self) -> &str {
        &self.message
    }

    pub fn challenge(&self) -> Option<&str> {
        self.challenge.as_deref()
    }
}

impl fmt::Display for HttpException {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.message.is_empty() {
            write!(f, "HTTP {}", self.status)
        } else {
            write!(f, "HTTP {}: {}", self.status, self.message)
        }
    }
}

impl std::error::Error for HttpException {}

/// 文件系统错误一律映射为 500，并保留诊断信息。
impl From<io::Error> for HttpException {
    fn from(e: io::Error) -> Self {
        Self::server_error(format!("Storage failure: {}", e))
    }
}
