use std::sync::atomic::{AtomicU64, Ordering};
use std::time::SystemTime;

use chrono::{DateTime, NaiveDateTime, Utc};
use md5::{Digest, Md5};

/// IMF-fixdate，例如 `Sun, 06 Nov 1994 08:49:37 GMT`
const HTTP_DATE_FORMAT: &str = "%a, %d %b %Y %H:%M:%S GMT";
/// RFC 850 的旧格式
const RFC850_FORMAT: &str = "%A, %d-%b-%y %H:%M:%S GMT";
/// ANSI C `asctime()` 格式
const ASCTIME_FORMAT: &str = "%a %b %e %H:%M:%S %Y";

static LAST_MICROS: AtomicU64 = AtomicU64::new(0);

/// 基于时间的唯一标识：秒数与微秒数的十六进制拼接（13 个字符左右）。
///
/// 同一进程内严格递增，即使两次调用落在同一微秒内也不会重复。
pub fn unique_id() -> String {
    let now = Utc::now().timestamp_micros().max(0) as u64;
    let prev = match LAST_MICROS.fetch_update(Ordering::SeqCst, Ordering::SeqCst, |last| {
        Some(now.max(last + 1))
    }) {
        Ok(p) | Err(p) => p,
    };
    let micros = now.max(prev + 1);
    format!("{:x}{:05x}", micros / 1_000_000, micros % 1_000_000)
}

/// 小写十六进制的 MD5 摘要
pub fn md5_hex(input: impl AsRef<[u8]>) -> String {
    let mut hasher = Md5::new();
    hasher.update(input.as_ref());
    hex::encode(hasher.finalize())
}

/// 以 GMT 的 HTTP-date 格式输出时间
pub fn format_http_date(time: SystemTime) -> String {
    DateTime::<Utc>::from(time).format(HTTP_DATE_FORMAT).to_string()
}

/// 解析三种 HTTP-date 格式中的任意一种，失败返回 `None`
pub fn parse_http_date(value: &str) -> Option<SystemTime> {
    let value = value.trim();
    if let Ok(dt) = DateTime::parse_from_rfc2822(value) {
        return Some(dt.with_timezone(&Utc).into());
    }
    [HTTP_DATE_FORMAT, RFC850_FORMAT, ASCTIME_FORMAT]
        .iter()
        .find_map(|fmt| NaiveDateTime::parse_from_str(value, fmt).ok())
        .map(|naive| naive.and_utc().into())
}
