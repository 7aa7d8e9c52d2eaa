// Copyright (c) 2026 shaneyale (shaneyale86@gmail.com)
// All rights reserved.

//! # HTTP 请求处理模块
//!
//! 负责将 TCP 流中读取的原始字节解析为强类型的 [`Request`]，
//! 并在此基础上构建分发层使用的只读视图 [`RequestContext`]：
//! 1. 请求行（方法、请求目标、版本）的解析。
//! 2. 标头的提取（名称大小写不敏感）。
//! 3. 请求体按 `Content-Length` 截取。
//! 4. `Accept` 的内容协商分类。
//! 5. 查询字符串参数的解码。

use std::collections::HashMap;

use bytes::Bytes;
use log::error;
use url::form_urlencoded;

use crate::{exception::Exception, param::*};

/// 一个完整的 HTTP 请求。
#[derive(Debug, Clone)]
pub struct Request {
    method: HttpRequestMethod,
    /// 原始请求目标（包含查询字符串）
    target: String,
    version: HttpVersion,
    /// 标头列表，名称已转为小写，保留出现顺序
    headers: Vec<(String, String)>,
    /// 客户端支持的压缩编码列表（按解析顺序排列）
    accept_encoding: Vec<HttpEncoding>,
    body: Bytes,
}

impl Request {
    /// 从原始字节缓冲区尝试构建 `Request` 实例。
    ///
    /// # 逻辑步骤
    /// 1. 以 `\r\n\r\n` 切分请求头与请求体，请求头必须是合法的 UTF-8。
    /// 2. 解析请求行：提取方法、请求目标和协议版本。
    /// 3. 迭代解析标头。
    /// 4. 若存在 `Content-Length`，请求体按该长度截取；缓冲区不足则判定为非法请求体。
    ///
    /// # 参数
    /// * `buffer` - 从网络 Socket 读取的原始数据。
    /// * `id` - 全局请求 ID，用于在多线程环境下追踪日志。
    pub fn try_from(buffer: &[u8], id: u128) -> Result<Self, Exception> {
        let (head, rest) = match find_subsequence(buffer, HEADER_TERMINATOR) {
            Some(pos) => (&buffer[..pos], &buffer[pos + HEADER_TERMINATOR.len()..]),
            None => (buffer, &buffer[buffer.len()..]),
        };

        let request_string = match std::str::from_utf8(head) {
            Ok(string) => string,
            Err(_) => {
                error!("[ID{}]无法解析HTTP请求", id);
                return Err(Exception::RequestIsNotUtf8);
            }
        };

        let mut request_lines = request_string.split(CRLF);
        let first_line = request_lines.next().unwrap_or("");
        let first_line_parts: Vec<&str> = first_line.split(' ').filter(|p| !p.is_empty()).collect();

        if first_line_parts.len() != 3 {
            error!("[ID{}]HTTP请求行格式不正确：{}", id, first_line);
            return Err(Exception::MalformedRequest);
        }

        let method_str = first_line_parts[0].to_uppercase();
        let method = match HttpRequestMethod::from_token(&method_str) {
            Some(m) => m,
            None => {
                error!("[ID{}]不支持的HTTP请求方法：{}", id, &method_str);
                return Err(Exception::UnSupportedRequestMethod);
            }
        };

        let version_str = first_line_parts[2].to_uppercase();
        let version = match version_str.as_str() {
            "HTTP/1.1" => HttpVersion::V1_1,
            "HTTP/1.0" => HttpVersion::V1_0,
            _ => {
                error!("[ID{}]不支持的HTTP协议版本：{}", id, &version_str);
                return Err(Exception::UnsupportedHttpVersion);
            }
        };

        let target = first_line_parts[1].to_string();

        let mut headers = Vec::new();
        for line in request_lines {
            if let Some((name, value)) = line.split_once(':') {
                headers.push((name.trim().to_lowercase(), value.trim().to_string()));
            }
        }

        // 这里的逻辑比较简单，只要包含关键词即视为支持
        let mut accept_encoding = vec![];
        if let Some(encoding) = lookup(&headers, "accept-encoding") {
            if encoding.contains("gzip") {
                accept_encoding.push(HttpEncoding::Gzip);
            }
            if encoding.contains("deflate") {
                accept_encoding.push(HttpEncoding::Deflate);
            }
        }

        let body = match lookup(&headers, "content-length") {
            Some(len) => {
                let len: usize = match len.parse() {
                    Ok(l) => l,
                    Err(_) => {
                        error!("[ID{}]无法解析Content-Length：{}", id, len);
                        return Err(Exception::InvalidBody);
                    }
                };
                if rest.len() < len {
                    error!("[ID{}]请求体不完整：期望{}字节，实际{}字节", id, len, rest.len());
                    return Err(Exception::InvalidBody);
                }
                Bytes::copy_from_slice(&rest[..len])
            }
            None => Bytes::copy_from_slice(rest),
        };

        Ok(Self {
            method,
            target,
            version,
            headers,
            accept_encoding,
            body,
        })
    }
}

impl Request {
    pub fn version(&self) -> &HttpVersion {
        &self.version
    }

    /// 获取原始请求目标（含查询参数）
    pub fn target(&self) -> &str {
        &self.target
    }

    pub fn method(&self) -> HttpRequestMethod {
        self.method
    }

    /// 按名称（大小写不敏感）获取第一个同名标头
    pub fn header(&self, name: &str) -> Option<&str> {
        lookup(&self.headers, &name.to_lowercase())
    }

    pub fn user_agent(&self) -> &str {
        self.header("user-agent").unwrap_or("")
    }

    pub fn accept_encoding(&self) -> &[HttpEncoding] {
        &self.accept_encoding
    }

    pub fn body(&self) -> &Bytes {
        &self.body
    }
}

fn lookup<'a>(headers: &'a [(String, String)], name: &str) -> Option<&'a str> {
    headers
        .iter()
        .find(|(n, _)| n == name)
        .map(|(_, v)| v.as_str())
}

/// 在 `haystack` 中查找 `needle` 第一次出现的位置
pub fn find_subsequence(haystack: &[u8], needle: &[u8]) -> Option<usize> {
    haystack.windows(needle.len()).position(|w| w == needle)
}

/// `Accept` 标头的协商分类
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum Accept {
    Json,
    Html,
    Any,
}

/// 含 `application/json` 视为 JSON；否则含 `text/html` 或 `*/*` 视为 HTML；其余为 Any。
pub fn classify_accept(header: Option<&str>) -> Accept {
    match header {
        Some(h) if h.contains("application/json") => Accept::Json,
        Some(h) if h.contains("text/html") || h.contains("*/*") => Accept::Html,
        _ => Accept::Any,
    }
}

/// 分发层看到的单个请求的只读视图。
///
/// `path` 已剥离根 URL 的路径前缀、查询字符串、末尾与开头的 `/`。
/// 查询参数单独解码保存，同名参数以最后一次出现为准。
#[derive(Debug, Clone)]
pub struct RequestContext {
    request: Request,
    path: String,
    accept: Accept,
    query: HashMap<String, String>,
}

impl RequestContext {
    pub fn new(request: Request, root_path: &str) -> Self {
        let path = route_path(request.target(), root_path);
        let accept = classify_accept(request.header("accept"));
        let query = match request.target().split_once('?') {
            Some((_, query)) => form_urlencoded::parse(query.as_bytes())
                .into_owned()
                .collect(),
            None => HashMap::new(),
        };
        Self {
            request,
            path,
            accept,
            query,
        }
    }

    pub fn method(&self) -> HttpRequestMethod {
        self.request.method()
    }

    pub fn path(&self) -> &str {
        &self.path
    }

    pub fn accept(&self) -> Accept {
        self.accept
    }

    pub fn query_param(&self, name: &str) -> Option<&str> {
        self.query.get(name).map(String::as_str)
    }

    pub fn body(&self) -> &Bytes {
        self.request.body()
    }

    pub fn header(&self, name: &str) -> Option<&str> {
        self.request.header(name)
    }

    pub fn origin(&self) -> Option<&str> {
        self.request.header("origin")
    }

    pub fn authorization(&self) -> Option<&str> {
        self.request.header("authorization")
    }

    pub fn request(&self) -> &Request {
        &self.request
    }
}

/// 将请求目标转换为路由路径
fn route_path(target: &str, root_path: &str) -> String {
    let path = target.split('?').next().unwrap_or("");
    let path = match path.strip_prefix(root_path) {
        Some(rest) if !root_path.is_empty() && (rest.is_empty() || rest.starts_with('/')) => rest,
        _ => path,
    };
    let path = path.strip_suffix('/').unwrap_or(path);
    path.strip_prefix('/').unwrap_or(path).to_string()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn parse(raw: &str) -> Request {
        Request::try_from(raw.as_bytes(), 0).unwrap()
    }

    /// 验证常规 GET 请求的解析，包括目标与标头
    #[test]
    fn test_parse_get_request() {
        let request = parse("GET / HTTP/1.1\r\nHost: localhost:7878\r\nUser-Agent: Test-Browser\r\nAccept-Encoding: gzip, deflate, br\r\n\r\n");

        assert_eq!(request.method(), HttpRequestMethod::Get);
        assert_eq!(request.target(), "/");
        assert_eq!(request.user_agent(), "Test-Browser");
        assert!(request.accept_encoding().contains(&HttpEncoding::Gzip));
        assert!(request.accept_encoding().contains(&HttpEncoding::Deflate));
        assert!(request.body().is_empty());
    }

    #[test]
    fn test_parse_put_with_body() {
        let request = parse("PUT /a/b HTTP/1.1\r\nHost: x\r\nContent-Length: 5\r\n\r\nhello");

        assert_eq!(request.method(), HttpRequestMethod::Put);
        assert_eq!(request.body().as_ref(), b"hello");
    }

    #[test]
    fn test_body_truncated_to_content_length() {
        let request = parse("POST / HTTP/1.1\r\nContent-Length: 3\r\n\r\nabcdef");
        assert_eq!(request.body().as_ref(), b"abc");
    }

    #[test]
    fn test_binary_body_is_preserved() {
        let mut raw = b"PUT /bin HTTP/1.1\r\nContent-Length: 4\r\n\r\n".to_vec();
        raw.extend_from_slice(&[0xff, 0x00, 0xfe, 0x0a]);
        let request = Request::try_from(&raw, 0).unwrap();
        assert_eq!(request.body().as_ref(), &[0xff, 0x00, 0xfe, 0x0a]);
    }

    #[test]
    fn test_incomplete_body_rejected() {
        let result = Request::try_from(b"PUT /a HTTP/1.1\r\nContent-Length: 10\r\n\r\nabc", 0);
        assert_eq!(result.unwrap_err(), Exception::InvalidBody);
    }

    #[test]
    fn test_delete_and_options_supported() {
        assert_eq!(parse("DELETE /x HTTP/1.1\r\n\r\n").method(), HttpRequestMethod::Delete);
        assert_eq!(parse("OPTIONS * HTTP/1.1\r\n\r\n").method(), HttpRequestMethod::Options);
    }

    #[test]
    fn test_unsupported_method() {
        let result = Request::try_from(b"PATCH /resource HTTP/1.1\r\n\r\n", 0);
        assert_eq!(result.unwrap_err(), Exception::UnSupportedRequestMethod);
    }

    #[test]
    fn test_unsupported_http_version() {
        let result = Request::try_from(b"GET / HTTP/2.0\r\nHost: localhost\r\n\r\n", 0);
        assert_eq!(result.unwrap_err(), Exception::UnsupportedHttpVersion);
    }

    #[test]
    fn test_malformed_request_line() {
        let result = Request::try_from(b"GET\r\n\r\n", 0);
        assert_eq!(result.unwrap_err(), Exception::MalformedRequest);
    }

    #[test]
    fn test_invalid_utf8() {
        let result = Request::try_from(&[0xFF, 0xFE, 0xFD], 0);
        assert_eq!(result.unwrap_err(), Exception::RequestIsNotUtf8);
    }

    /// 验证 Header 字段名大小写不敏感
    #[test]
    fn test_case_insensitive_headers() {
        let request = parse("GET / HTTP/1.1\r\nORIGIN: http://a.example.com\r\nif-modified-since: x\r\n\r\n");

        assert_eq!(request.header("Origin"), Some("http://a.example.com"));
        assert_eq!(request.header("If-Modified-Since"), Some("x"));
    }

    #[test]
    fn test_lowercase_method() {
        assert_eq!(parse("get / HTTP/1.1\r\n\r\n").method(), HttpRequestMethod::Get);
    }

    #[test]
    fn test_classify_accept() {
        assert_eq!(classify_accept(Some("application/json")), Accept::Json);
        assert_eq!(
            classify_accept(Some("text/html,application/json;q=0.9")),
            Accept::Json
        );
        assert_eq!(classify_accept(Some("text/html,application/xhtml+xml")), Accept::Html);
        assert_eq!(classify_accept(Some("*/*")), Accept::Html);
        assert_eq!(classify_accept(Some("text/plain")), Accept::Any);
        assert_eq!(classify_accept(None), Accept::Any);
    }

    #[test]
    fn test_route_path() {
        assert_eq!(route_path("/", ""), "");
        assert_eq!(route_path("/a/b/c/", ""), "a/b/c");
        assert_eq!(route_path("/a?x=1", ""), "a");
        assert_eq!(route_path("/kv/item", "/kv"), "item");
        assert_eq!(route_path("/kv", "/kv"), "");
        assert_eq!(route_path("/kv/", "/kv"), "");
        assert_eq!(route_path("/kvx/item", "/kv"), "kvx/item");
    }

    #[test]
    fn test_context_accept_and_path() {
        let request = parse("GET /kv/x/y HTTP/1.1\r\nAccept: application/json\r\n\r\n");
        let ctx = RequestContext::new(request, "/kv");
        assert_eq!(ctx.path(), "x/y");
        assert_eq!(ctx.accept(), Accept::Json);
        assert_eq!(ctx.method(), HttpRequestMethod::Get);
    }

    #[test]
    fn test_context_query_params() {
        let request = parse("GET /kv/?owner=bob%20s&props=a,b&owner=eve HTTP/1.1\r\n\r\n");
        let ctx = RequestContext::new(request, "/kv");
        assert_eq!(ctx.path(), "");
        assert_eq!(ctx.query_param("owner"), Some("eve"));
        assert_eq!(ctx.query_param("props"), Some("a,b"));
        assert_eq!(ctx.query_param("missing"), None);

        let ctx = RequestContext::new(parse("GET /x HTTP/1.1\r\n\r\n"), "");
        assert_eq!(ctx.query_param("owner"), None);
    }
}
