// Copyright (c) 2026 shaneyale (shaneyale86@gmail.com)
// All rights reserved.

//! # 内容协商与 JSON 输出
//!
//! 根据 [`Accept`] 分类决定 JSON 的呈现方式：
//! - `json` / `any`：紧凑 JSON，`Content-Type: application/json`。
//! - `html`：单趟扫描重新缩进后的 JSON，嵌在 `<pre>` 中，URL 字符串渲染为超链接，
//!   便于直接在浏览器里查看。
//!
//! 集合输出前可以按查询参数筛选：[`filter`] 按 `?name=value` 保留条目，
//! [`filter_properties`] 按 `?props=a,b` 只保留列出的属性。

use std::collections::BTreeMap;

use lazy_static::lazy_static;
use regex::Regex;
use serde::Serialize;
use serde_json::{Map, Value};

use crate::{
    exception::HttpException,
    request::{Accept, RequestContext},
    response::Response,
};

const INDENT: &str = "    ";

lazy_static! {
    static ref LINK_PATTERN: Regex = Regex::new(r#""(https?://[^"]+)""#).unwrap();
}

/// 序列化为紧凑 JSON：`/` 不转义，非 ASCII 字符直接以 UTF-8 输出。
pub fn to_json<T: Serialize + ?Sized>(value: &T) -> Result<String, HttpException> {
    let json = serde_json::to_string(value)
        .map_err(|e| HttpException::server_error(format!("JSON encoding failed: {}", e)))?;
    Ok(unescape_unicode(&json))
}

/// 把 JSON 文本中的 `\uXXXX`（含代理对）还原为真正的 UTF-8 字符，`\/` 还原为 `/`。
///
/// 控制字符、`"` 与 `\` 的转义会原样保留，保证输出仍是合法 JSON。
pub fn unescape_unicode(json: &str) -> String {
    let mut out = String::with_capacity(json.len());
    let mut rest = json;
    while let Some(pos) = rest.find('\\') {
        out.push_str(&rest[..pos]);
        let tail = &rest[pos..];
        match decode_escape(tail) {
            Some((ch, consumed)) => {
                out.push(ch);
                rest = &tail[consumed..];
            }
            None if tail[1..].starts_with('/') => {
                out.push('/');
                rest = &tail[2..];
            }
            None => {
                // 反斜杠连同其后一个字符原样复制，避免把 `\\u` 误判为转义
                let next_len = tail[1..].chars().next().map_or(0, char::len_utf8);
                out.push_str(&tail[..1 + next_len]);
                rest = &tail[1 + next_len..];
            }
        }
    }
    out.push_str(rest);
    out
}

fn decode_escape(s: &str) -> Option<(char, usize)> {
    let high = parse_u16_escape(s)?;
    let (code, consumed) = if (0xD800..0xDC00).contains(&high) {
        let low = parse_u16_escape(s.get(6..)?)?;
        if !(0xDC00..0xE000).contains(&low) {
            return None;
        }
        let code = 0x10000 + ((u32::from(high) - 0xD800) << 10) + (u32::from(low) - 0xDC00);
        (code, 12)
    } else {
        (u32::from(high), 6)
    };
    let ch = char::from_u32(code)?;
    if ch < ' ' || ch == '"' || ch == '\\' {
        return None;
    }
    Some((ch, consumed))
}

fn parse_u16_escape(s: &str) -> Option<u16> {
    let digits = s.strip_prefix("\\u")?.get(..4)?;
    if !digits.bytes().all(|b| b.is_ascii_hexdigit()) {
        return None;
    }
    u16::from_str_radix(digits, 16).ok()
}

/// 单趟扫描的 JSON 重新缩进。
///
/// 引号外的空白全部丢弃后按规则重新插入：`{`/`[` 之后与 `,` 之后换行并缩进，
/// `}`/`]` 之前先回退一级再换行，`:` 之后补一个空格。引号内（考虑反斜杠转义）的内容原样保留。
pub fn prettify_json(json: &str) -> String {
    let mut result = String::with_capacity(json.len() * 2);
    let mut level: usize = 0;
    let mut in_quotes = false;
    let mut escaped = false;
    let mut ends_line_level: Option<usize> = None;

    for c in json.chars() {
        let mut new_line_level = ends_line_level.take();
        let mut emit = Some(c);
        let mut post = "";

        if in_quotes {
            if escaped {
                escaped = false;
            } else if c == '\\' {
                escaped = true;
            } else if c == '"' {
                in_quotes = false;
            }
        } else {
            match c {
                '"' => in_quotes = true,
                '}' | ']' => {
                    level = level.saturating_sub(1);
                    new_line_level = Some(level);
                }
                '{' | '[' => {
                    level += 1;
                    ends_line_level = Some(level);
                }
                ',' => ends_line_level = Some(level),
                ':' => post = " ",
                ' ' | '\t' | '\n' | '\r' => {
                    emit = None;
                    ends_line_level = new_line_level.take();
                }
                _ => {}
            }
        }

        if let Some(l) = new_line_level {
            result.push('\n');
            result.push_str(&INDENT.repeat(l));
        }
        if let Some(ch) = emit {
            result.push(ch);
        }
        result.push_str(post);
    }

    result
}

/// 以协商出的形式输出一段 JSON 文本，并设置 `Vary: Accept`。
pub fn send_json(ctx: &RequestContext, response: &mut Response, json: &str) {
    response.add_vary("Accept");
    let json = unescape_unicode(json);
    if ctx.accept() == Accept::Html {
        let pretty = prettify_json(&json).replace('<', "&lt;").replace('>', "&gt;");
        let linked = LINK_PATTERN.replace_all(&pretty, r#"<a href="${1}">${1}</a>"#);
        response.set_header("Content-Type", "text/html; charset=utf-8");
        response.write(b"<meta charset=\"utf-8\">");
        response.write(format!("<pre>{}</pre>", linked).as_bytes());
    } else {
        response.set_header("Content-Type", "application/json; charset=utf-8");
        response.write(json.as_bytes());
    }
}

pub fn send_as_json<T: Serialize + ?Sized>(
    ctx: &RequestContext,
    response: &mut Response,
    value: &T,
) -> Result<(), HttpException> {
    let json = to_json(value)?;
    send_json(ctx, response, &json);
    Ok(())
}

/// 输出集合中的单个条目，条目不存在时返回 404。
pub fn send_collection_item_as_json<V: Serialize>(
    ctx: &RequestContext,
    response: &mut Response,
    list: &BTreeMap<String, V>,
    key: &str,
) -> Result<(), HttpException> {
    let item = list.get(key).ok_or_else(HttpException::not_found)?;
    send_as_json(ctx, response, item)
}

/// 只保留与查询参数一致的条目。
///
/// 对 `names` 中的每个属性名，请求带有同名查询参数且条目含有该属性时，两者必须相等；
/// 缺少查询参数或条目没有该属性的，不参与比较。
pub fn filter(
    ctx: &RequestContext,
    mut list: BTreeMap<String, Value>,
    names: &[&str],
) -> BTreeMap<String, Value> {
    list.retain(|_, item| {
        names.iter().all(|name| {
            match (ctx.query_param(name), item.get(*name)) {
                (Some(wanted), Some(actual)) => property_text(actual) == wanted,
                _ => true,
            }
        })
    });
    list
}

/// 请求带有 `?props=a,b` 时，每个条目只保留列出且存在的属性。
pub fn filter_properties(
    ctx: &RequestContext,
    list: BTreeMap<String, Value>,
) -> BTreeMap<String, Value> {
    let props: Vec<&str> = match ctx.query_param("props") {
        Some(p) => p.split(',').collect(),
        None => return list,
    };
    list.into_iter()
        .map(|(key, item)| {
            let projected: Map<String, Value> = props
                .iter()
                .filter_map(|name| item.get(*name).map(|v| (name.to_string(), v.clone())))
                .collect();
            (key, Value::Object(projected))
        })
        .collect()
}

/// 字符串按原文比较，其它值按紧凑 JSON 文本比较
fn property_text(value: &Value) -> String {
    match value {
        Value::String(s) => s.clone(),
        other => other.to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::request::Request;

    fn context(accept: &str) -> RequestContext {
        let raw = format!("GET / HTTP/1.1\r\nAccept: {}\r\n\r\n", accept);
        RequestContext::new(Request::try_from(raw.as_bytes(), 0).unwrap(), "")
    }

    #[test]
    fn test_prettify_nested() {
        let pretty = prettify_json(r#"{"a":1,"b":[1,2]}"#);
        let expected = "{\n    \"a\": 1,\n    \"b\": [\n        1,\n        2\n    ]\n}";
        assert_eq!(pretty, expected);
    }

    #[test]
    fn test_prettify_ignores_input_whitespace() {
        let compact = prettify_json(r#"{"a":1,"b":[1,2]}"#);
        let spaced = prettify_json("{ \"a\" :\t1 ,\r\n \"b\" : [ 1 , 2 ] }");
        assert_eq!(compact, spaced);
    }

    #[test]
    fn test_prettify_keeps_punctuation_inside_strings() {
        let pretty = prettify_json(r#"{"k,e:y":"v{a}l, [x]: y"}"#);
        assert_eq!(pretty, "{\n    \"k,e:y\": \"v{a}l, [x]: y\"\n}");
    }

    #[test]
    fn test_prettify_escaped_quotes_and_backslashes() {
        let pretty = prettify_json(r#"["a\"b,c","d\\",1]"#);
        assert_eq!(pretty, "[\n    \"a\\\"b,c\",\n    \"d\\\\\",\n    1\n]");
    }

    #[test]
    fn test_prettify_empty_containers() {
        assert_eq!(prettify_json("[]"), "[\n]");
        assert_eq!(prettify_json("{}"), "{\n}");
    }

    #[test]
    fn test_to_json_unescaped_slashes_and_unicode() {
        let json = to_json(&vec!["http://a.b/c", "é€😀"]).unwrap();
        assert_eq!(json, r#"["http://a.b/c","é€😀"]"#);
    }

    #[test]
    fn test_unescape_unicode() {
        assert_eq!(unescape_unicode(r#""caf\u00e9""#), "\"café\"");
        assert_eq!(unescape_unicode(r#"["\ud83d\ude00"]"#), "[\"😀\"]");
        assert_eq!(unescape_unicode(r#""a\/b""#), r#""a/b""#);
        // 被转义的反斜杠后面的 u 不是转义序列
        assert_eq!(unescape_unicode(r#""\\u00e9""#), r#""\\u00e9""#);
        // 引号与控制字符的转义必须保留
        assert_eq!(unescape_unicode(r#""\u0022\u000a""#), r#""\u0022\u000a""#);
        assert_eq!(unescape_unicode(r#""\ud83d""#), r#""\ud83d""#);
    }

    #[test]
    fn test_send_json_plain() {
        let ctx = context("application/json");
        let mut response = Response::new();
        send_as_json(&ctx, &mut response, &vec!["x"]).unwrap();

        assert_eq!(response.body(), br#"["x"]"#);
        assert_eq!(
            response.header("Content-Type"),
            Some("application/json; charset=utf-8")
        );
        assert_eq!(response.header_values("Vary"), vec!["Accept"]);
    }

    #[test]
    fn test_send_json_html_links_and_escapes() {
        let ctx = context("text/html");
        let mut response = Response::new();
        send_as_json(&ctx, &mut response, &vec!["http://host/a", "<b>"]).unwrap();

        let body = String::from_utf8(response.body().to_vec()).unwrap();
        assert!(body.starts_with("<meta charset=\"utf-8\"><pre>["));
        assert!(body.contains("<a href=\"http://host/a\">http://host/a</a>"));
        assert!(body.contains("\"&lt;b&gt;\""));
        assert!(body.ends_with("]</pre>"));
        assert_eq!(response.header("Content-Type"), Some("text/html; charset=utf-8"));
    }

    #[test]
    fn test_send_collection_item() {
        let ctx = context("application/json");
        let mut list = BTreeMap::new();
        list.insert("one".to_string(), 1);

        let mut response = Response::new();
        send_collection_item_as_json(&ctx, &mut response, &list, "one").unwrap();
        assert_eq!(response.body(), b"1");

        let err = send_collection_item_as_json(&ctx, &mut response, &list, "two").unwrap_err();
        assert_eq!(err.status(), 404);
    }

    fn query_context(target: &str) -> RequestContext {
        let raw = format!("GET {} HTTP/1.1\r\nAccept: application/json\r\n\r\n", target);
        RequestContext::new(Request::try_from(raw.as_bytes(), 0).unwrap(), "")
    }

    fn people() -> BTreeMap<String, Value> {
        let mut list = BTreeMap::new();
        list.insert("1".to_string(), serde_json::json!({"name": "ann", "role": "admin", "age": 30}));
        list.insert("2".to_string(), serde_json::json!({"name": "bob", "role": "user", "age": 41}));
        list.insert("3".to_string(), serde_json::json!({"name": "cy", "age": 30}));
        list
    }

    #[test]
    fn test_filter_by_query() {
        let ctx = query_context("/people?role=admin");
        let kept = filter(&ctx, people(), &["role", "name"]);
        // 没有 role 属性的条目不参与比较
        assert_eq!(kept.keys().collect::<Vec<_>>(), vec!["1", "3"]);

        let ctx = query_context("/people?age=30&role=user");
        let kept = filter(&ctx, people(), &["age", "role"]);
        assert_eq!(kept.keys().collect::<Vec<_>>(), vec!["3"]);
    }

    #[test]
    fn test_filter_ignores_unlisted_params() {
        let ctx = query_context("/people?role=admin");
        assert_eq!(filter(&ctx, people(), &["name"]).len(), 3);
        assert_eq!(filter(&query_context("/people"), people(), &["role"]).len(), 3);
    }

    #[test]
    fn test_filter_properties() {
        let ctx = query_context("/people?props=name,missing");
        let projected = filter_properties(&ctx, people());
        assert_eq!(projected["2"], serde_json::json!({"name": "bob"}));
        assert_eq!(projected.len(), 3);

        let untouched = filter_properties(&query_context("/people"), people());
        assert_eq!(untouched, people());
    }

    #[test]
    fn test_filtered_collection_item() {
        let ctx = query_context("/people/2?props=role");
        let list = filter_properties(&ctx, people());
        let mut response = Response::new();
        send_collection_item_as_json(&ctx, &mut response, &list, "2").unwrap();
        assert_eq!(response.body(), br#"{"role":"user"}"#);
    }
}
