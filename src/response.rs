use std::io::{self, Write};

use bytes::BytesMut;
use chrono::prelude::*;
use flate2::{
    write::{DeflateEncoder, GzEncoder},
    Compression,
};
use log::{debug, error};

use crate::{exception::HttpException, param::*, util::format_http_date};

/// 分阶段提交的 HTTP 响应构建器。
///
/// 处理函数写入的所有内容先缓存在这里，只有整个分发流程成功后才会被序列化发送。
/// 调用 [`Response::begin_stage`] 之后设置的标头与全部响应体都属于“暂存区”，
/// 一旦分发失败，[`Response::rollback`] 会整体丢弃暂存内容并改写为错误响应；
/// 在此之前设置的标头（例如 CORS 标头）会被保留。
#[derive(Debug, Clone)]
pub struct Response {
    version: HttpVersion,
    status_code: u16,
    information: String,
    headers: Vec<(String, String)>,
    body: BytesMut,
    stage_mark: Option<usize>,
    date: DateTime<Utc>,
    server_name: String,
}

impl Response {
    pub fn new() -> Self {
        Self {
            version: HttpVersion::V1_1,
            status_code: 200,
            information: "OK".to_string(),
            headers: Vec::new(),
            body: BytesMut::new(),
            stage_mark: None,
            date: Utc::now(),
            server_name: SERVER_NAME.to_string(),
        }
    }

    pub fn set_code(&mut self, code: u16) -> &mut Self {
        self.status_code = code;
        self.information = match STATUS_CODES.get(&code) {
            Some(&info) => info.to_string(),
            None => {
                error!("非法的状态码：{}。这条错误说明代码编写出现了错误。", code);
                "Unknown".to_string()
            }
        };
        self
    }

    pub fn set_version(&mut self, version: HttpVersion) -> &mut Self {
        self.version = version;
        self
    }

    /// 设置标头，覆盖同名（大小写不敏感）的已有标头
    pub fn set_header(&mut self, name: &str, value: impl Into<String>) -> &mut Self {
        let value = value.into();
        match self
            .headers
            .iter_mut()
            .find(|(n, _)| n.eq_ignore_ascii_case(name))
        {
            Some(entry) => entry.1 = value,
            None => self.headers.push((name.to_string(), value)),
        }
        self
    }

    /// 追加标头，允许同名标头出现多次（如 `Vary`）
    pub fn add_header(&mut self, name: &str, value: impl Into<String>) -> &mut Self {
        self.headers.push((name.to_string(), value.into()));
        self
    }

    pub fn write(&mut self, data: &[u8]) -> &mut Self {
        self.body.extend_from_slice(data);
        self
    }

    /// 追加一个 `Vary` 字段，已存在时不重复追加
    pub fn add_vary(&mut self, field: &str) -> &mut Self {
        let present = self
            .headers
            .iter()
            .any(|(n, v)| n.eq_ignore_ascii_case("Vary") && v.eq_ignore_ascii_case(field));
        if !present {
            self.add_header("Vary", field);
        }
        self
    }

    /// 标记暂存区的起点
    pub fn begin_stage(&mut self) {
        self.stage_mark = Some(self.headers.len());
    }

    /// 丢弃暂存区内的全部输出，改写为只包含状态码与消息的错误响应。
    pub fn rollback(&mut self, e: &HttpException) {
        let mark = self.stage_mark.unwrap_or(self.headers.len());
        self.headers.truncate(mark);
        self.body.clear();
        self.set_code(e.status());
        if let Some(challenge) = e.challenge() {
            self.set_header("WWW-Authenticate", challenge);
        }
        if !e.message().is_empty() {
            self.set_header("Content-Type", "text/plain; charset=utf-8");
            self.write(e.message().as_bytes());
        }
    }

    /// 将响应序列化为报文。
    ///
    /// `head_only` 时不发送响应体，但标头（含压缩后的 `Content-Length`）与完整响应一致；
    /// `encoding` 为协商出的压缩方式。
    /// 204 与 304 既没有响应体，也没有 `Content-Length`。
    pub fn as_bytes(&self, head_only: bool, encoding: Option<HttpEncoding>) -> Vec<u8> {
        let version: &str = match self.version {
            HttpVersion::V1_0 => "HTTP/1.0",
            HttpVersion::V1_1 => "HTTP/1.1",
        };
        let bodiless = self.status_code == 204 || self.status_code == 304;

        let mut content_encoding = None;
        let content: Vec<u8> = if bodiless || self.body.is_empty() {
            Vec::new()
        } else {
            match encoding {
                Some(mode) => match compress(self.body.to_vec(), mode) {
                    Ok(c) => {
                        content_encoding = Some(mode);
                        c
                    }
                    Err(e) => {
                        error!("压缩响应体失败: {}，返回未压缩内容", e);
                        self.body.to_vec()
                    }
                },
                None => self.body.to_vec(),
            }
        };

        let mut header = String::new();
        header.push_str(&format!(
            "{} {} {}{}",
            version, self.status_code, self.information, CRLF
        ));
        for (name, value) in &self.headers {
            header.push_str(&[name.as_str(), ": ", value, CRLF].concat());
        }
        if let Some(e) = content_encoding {
            header.push_str(&format!("Content-Encoding: {}{}", e, CRLF));
            header.push_str(&["Vary: Accept-Encoding", CRLF].concat());
        }
        if !bodiless {
            header.push_str(&format!("Content-Length: {}{}", content.len(), CRLF));
        }
        header.push_str(&["Date: ", &format_http_date(self.date.into()), CRLF].concat());
        header.push_str(&["Server: ", &self.server_name, CRLF].concat());
        header.push_str(&["Connection: close", CRLF, CRLF].concat());

        let mut bytes = header.into_bytes();
        if !head_only {
            bytes.extend_from_slice(&content);
        }
        bytes
    }
}

impl Default for Response {
    fn default() -> Self {
        Self::new()
    }
}

impl Response {
    pub fn status_code(&self) -> u16 {
        self.status_code
    }

    pub fn information(&self) -> &str {
        &self.information
    }

    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers
            .iter()
            .find(|(n, _)| n.eq_ignore_ascii_case(name))
            .map(|(_, v)| v.as_str())
    }

    /// 同名标头的全部取值
    pub fn header_values(&self, name: &str) -> Vec<&str> {
        self.headers
            .iter()
            .filter(|(n, _)| n.eq_ignore_ascii_case(name))
            .map(|(_, v)| v.as_str())
            .collect()
    }

    pub fn body(&self) -> &[u8] {
        &self.body
    }
}

fn compress(data: Vec<u8>, mode: HttpEncoding) -> io::Result<Vec<u8>> {
    let original_size = data.len();
    let result = match mode {
        HttpEncoding::Gzip => {
            let mut encoder = GzEncoder::new(Vec::new(), Compression::default());
            encoder.write_all(&data)?;
            encoder.finish()
        }
        HttpEncoding::Deflate => {
            let mut encoder = DeflateEncoder::new(Vec::new(), Compression::default());
            encoder.write_all(&data)?;
            encoder.finish()
        }
    };

    if let Ok(ref compressed) = result {
        debug!(
            "压缩完成: {}, 原始大小: {} bytes, 压缩后: {} bytes",
            mode,
            original_size,
            compressed.len()
        );
    }

    result
}

/// gzip 优先，其次 deflate
pub fn decide_encoding(accept_encoding: &[HttpEncoding]) -> Option<HttpEncoding> {
    if accept_encoding.contains(&HttpEncoding::Gzip) {
        Some(HttpEncoding::Gzip)
    } else if accept_encoding.contains(&HttpEncoding::Deflate) {
        Some(HttpEncoding::Deflate)
    } else {
        None
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn render(response: &Response) -> String {
        String::from_utf8_lossy(&response.as_bytes(false, None)).to_string()
    }

    #[test]
    fn test_response_new() {
        let response = Response::new();
        assert_eq!(response.status_code(), 200);
        assert_eq!(response.information(), "OK");
        assert!(response.body().is_empty());
    }

    #[test]
    fn test_response_as_bytes_basic() {
        let response_str = render(&Response::new());

        assert!(response_str.starts_with("HTTP/1.1 200 OK\r\n"));
        assert!(response_str.contains("Content-Length: 0"));
        assert!(response_str.contains("Server: keyval-server"));
        assert!(response_str.contains("Date: "));
        assert!(response_str.contains(" GMT\r\n"));
        assert!(response_str.ends_with("\r\n\r\n"));
    }

    #[test]
    fn test_response_as_bytes_with_content() {
        let mut response = Response::new();
        response
            .set_header("Content-Type", "text/plain")
            .write(b"Hello");

        let response_str = render(&response);
        assert!(response_str.contains("Content-Type: text/plain"));
        assert!(response_str.contains("Content-Length: 5"));
        assert!(response_str.ends_with("Hello"));
    }

    #[test]
    fn test_head_only_keeps_length_drops_body() {
        let mut response = Response::new();
        response.write(b"Hello");
        let text = String::from_utf8_lossy(&response.as_bytes(true, None)).to_string();
        assert!(text.contains("Content-Length: 5"));
        assert!(text.ends_with("\r\n\r\n"));
    }

    #[test]
    fn test_head_only_matches_compressed_headers() {
        let mut response = Response::new();
        response.write(&vec![b'A'; 1000]);
        let full = response.as_bytes(false, Some(HttpEncoding::Gzip));
        let head = response.as_bytes(true, Some(HttpEncoding::Gzip));

        let header_end = head.len();
        assert_eq!(&full[..header_end], &head[..]);
        assert!(head.ends_with(b"\r\n\r\n"));
        assert!(String::from_utf8_lossy(&head).contains("Content-Encoding: gzip"));
    }

    #[test]
    fn test_no_content_has_no_length() {
        let mut response = Response::new();
        response.set_code(204);
        let text = render(&response);
        assert!(text.starts_with("HTTP/1.1 204 No Content"));
        assert!(!text.contains("Content-Length"));

        response.set_code(304);
        assert!(!render(&response).contains("Content-Length"));
    }

    #[test]
    fn test_status_code_various() {
        for (code, expected_info) in [
            (200, "OK"),
            (201, "Created"),
            (204, "No Content"),
            (304, "Not Modified"),
            (400, "Bad Request"),
            (401, "Unauthorized"),
            (404, "Not Found"),
            (405, "Method Not Allowed"),
            (500, "Internal Server Error"),
        ] {
            let mut response = Response::new();
            response.set_code(code);
            assert_eq!(response.status_code(), code);
            assert_eq!(response.information(), expected_info);
        }
    }

    #[test]
    fn test_set_header_replaces_add_header_appends() {
        let mut response = Response::new();
        response.set_header("Content-Type", "a");
        response.set_header("content-type", "b");
        response.add_header("Vary", "Origin");
        response.add_header("Vary", "Accept");

        assert_eq!(response.header_values("Content-Type"), vec!["b"]);
        assert_eq!(response.header_values("Vary"), vec!["Origin", "Accept"]);
    }

    #[test]
    fn test_add_vary_once() {
        let mut response = Response::new();
        response.add_vary("Accept").add_vary("Origin").add_vary("accept");
        assert_eq!(response.header_values("Vary"), vec!["Accept", "Origin"]);
    }

    #[test]
    fn test_rollback_discards_staged_output() {
        let mut response = Response::new();
        response.add_header("Vary", "Origin");
        response.begin_stage();
        response
            .set_header("Content-Type", "application/json")
            .add_header("Vary", "Accept")
            .write(b"{\"partial\":");

        response.rollback(&HttpException::server_error("boom"));

        assert_eq!(response.status_code(), 500);
        assert_eq!(response.body(), b"boom");
        assert_eq!(response.header_values("Vary"), vec!["Origin"]);
        assert_eq!(response.header("Content-Type"), Some("text/plain; charset=utf-8"));
    }

    #[test]
    fn test_rollback_not_found_is_empty() {
        let mut response = Response::new();
        response.begin_stage();
        response.write(b"something");
        response.rollback(&HttpException::not_found());

        assert_eq!(response.status_code(), 404);
        assert!(response.body().is_empty());
        assert!(response.header("Content-Type").is_none());
    }

    #[test]
    fn test_rollback_sets_challenge() {
        let mut response = Response::new();
        response.begin_stage();
        response.rollback(&HttpException::unauthorized("Basic realm=\"r\"", "login"));
        assert_eq!(response.header("WWW-Authenticate"), Some("Basic realm=\"r\""));
    }

    #[test]
    fn test_gzip_encoding_applied() {
        let mut response = Response::new();
        response.write(&vec![b'A'; 1000]);
        let bytes = response.as_bytes(false, Some(HttpEncoding::Gzip));
        let text = String::from_utf8_lossy(&bytes);
        assert!(text.contains("Content-Encoding: gzip"));
        assert!(text.contains("Vary: Accept-Encoding"));
        assert!(bytes.len() < 1000);
    }

    #[test]
    fn test_empty_body_not_encoded() {
        let bytes = Response::new().as_bytes(false, Some(HttpEncoding::Gzip));
        assert!(!String::from_utf8_lossy(&bytes).contains("Content-Encoding"));
    }

    #[test]
    fn test_decide_encoding() {
        assert_eq!(
            decide_encoding(&[HttpEncoding::Deflate, HttpEncoding::Gzip]),
            Some(HttpEncoding::Gzip)
        );
        assert_eq!(decide_encoding(&[HttpEncoding::Deflate]), Some(HttpEncoding::Deflate));
        assert_eq!(decide_encoding(&[]), None);
    }

    #[test]
    fn test_compress_deflate_shrinks() {
        let data = vec![b'A'; 10000];
        let result = compress(data.clone(), HttpEncoding::Deflate).unwrap();
        assert!(result.len() < data.len());
    }
}
