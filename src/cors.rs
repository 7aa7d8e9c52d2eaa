//! 跨域资源共享（CORS）过滤器。
//!
//! 允许列表中的每一项是一个域名通配符：`.` 按字面匹配，`*` 匹配一个或多个非 `.` 字符。
//! 通配符被编译为首尾锚定的正则表达式，因此 `*.example.com` 匹配 `api.example.com`，
//! 但不匹配裸域名 `example.com`，也不匹配 `api.example.com.evil.net`。

use log::{debug, warn};
use regex::Regex;

use crate::{param::HttpRequestMethod, request::RequestContext, response::Response};

/// 过滤器处理完毕后，请求是否还需要继续分发
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum CorsOutcome {
    Continue,
    /// OPTIONS 预检已经应答，请求到此结束
    Preflight,
}

#[derive(Debug, Clone)]
pub struct CorsFilter {
    patterns: Vec<Regex>,
}

/// 将域名通配符翻译为正则表达式
pub fn glob_to_regex(glob: &str) -> String {
    let body: String = glob
        .split('*')
        .map(regex::escape)
        .collect::<Vec<_>>()
        .join("[^.]+");
    format!("^{}$", body)
}

impl CorsFilter {
    pub fn new(allowed: &[String]) -> Self {
        let patterns = allowed
            .iter()
            .filter_map(|glob| match Regex::new(&glob_to_regex(glob)) {
                Ok(re) => Some(re),
                Err(e) => {
                    warn!("忽略无法编译的CORS通配符 `{}`：{}", glob, e);
                    None
                }
            })
            .collect();
        Self { patterns }
    }

    /// `origin` 去掉协议前缀后是否命中允许列表。带端口时，含端口与不含端口的形式任一命中即可。
    pub fn is_allowed(&self, origin: &str) -> bool {
        let domain = match origin.find("://") {
            Some(pos) => &origin[pos + 3..],
            None => origin,
        };
        let host = domain.split(':').next().unwrap_or(domain);
        self.patterns
            .iter()
            .any(|re| re.is_match(domain) || re.is_match(host))
    }

    /// 设置 CORS 响应头；OPTIONS 请求作为预检直接应答。
    pub fn apply(&self, ctx: &RequestContext, response: &mut Response) -> CorsOutcome {
        if let Some(origin) = ctx.origin() {
            response.add_vary("Origin");
            if self.is_allowed(origin) {
                response.set_header("Access-Control-Allow-Origin", origin);
                response.set_header("Access-Control-Allow-Credentials", "true");
            } else {
                debug!("来源 {} 不在CORS允许列表中", origin);
            }
        }

        if ctx.method() != HttpRequestMethod::Options {
            return CorsOutcome::Continue;
        }

        if let Some(methods) = ctx.header("access-control-request-method") {
            response.set_header("Access-Control-Allow-Methods", methods);
        }
        if let Some(headers) = ctx.header("access-control-request-headers") {
            response.set_header("Access-Control-Allow-Headers", headers);
        }
        response.set_code(200);
        CorsOutcome::Preflight
    }
}
