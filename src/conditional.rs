//! 基于 `If-Modified-Since` 的条件请求。

use std::time::{Duration, SystemTime, UNIX_EPOCH};

use log::debug;

use crate::{
    exception::HttpException,
    request::RequestContext,
    response::Response,
    util::{format_http_date, parse_http_date},
};

/// HTTP-date 只有秒级精度，比较前先截断
fn truncate_to_seconds(time: SystemTime) -> SystemTime {
    match time.duration_since(UNIX_EPOCH) {
        Ok(d) => UNIX_EPOCH + Duration::from_secs(d.as_secs()),
        Err(_) => time,
    }
}

/// 客户端缓存仍然新鲜时返回 304，否则返回 200、设置 `Last-Modified` 并调用 `produce_body`。
///
/// 无法解析的 `If-Modified-Since` 视同不存在。
pub fn if_modified_since<F>(
    ctx: &RequestContext,
    response: &mut Response,
    timestamp: SystemTime,
    produce_body: F,
) -> Result<(), HttpException>
where
    F: FnOnce(&mut Response) -> Result<(), HttpException>,
{
    let modified = truncate_to_seconds(timestamp);
    let since = ctx.header("if-modified-since").and_then(parse_http_date);

    match since {
        Some(since) if since >= modified => {
            debug!("资源自 {} 起未修改，返回304", format_http_date(since));
            response.set_code(304);
            Ok(())
        }
        _ => {
            response.set_code(200);
            response.set_header("Last-Modified", format_http_date(modified));
            produce_body(response)
        }
    }
}
