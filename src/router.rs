// Copyright (c) 2026 shaneyale (shaneyale86@gmail.com)
// All rights reserved.

//! # 路由分发模块
//!
//! 路由表是一个按注册顺序排列的列表，先注册者优先，没有基于“具体程度”的排序。
//!
//! ## 路径模式
//! - `**`：匹配一个或多个路径段（贪婪），整体作为一个捕获。
//! - `*`：恰好匹配一个路径段，单独作为一个捕获。
//! - 其余字符按字面匹配；空模式只匹配空路径。
//!
//! ## 方法集合
//! 每条路由携带若干 `(方法集合, 处理函数)`，按声明顺序选取第一个包含请求方法的条目；
//! 请求方法不是 `OPTIONS` 时，通配符 `*` 也算包含。
//!
//! ## 落空规则
//! 模式命中但没有方法可用、或处理函数返回 [`Handled::Pass`] 时，继续尝试后续路由。
//! 全部路由尝试完毕：曾有模式命中但无方法可用则返回 405，否则返回 404。

use log::{debug, warn};
use regex::Regex;

use crate::{
    exception::HttpException, param::HttpRequestMethod, request::RequestContext,
    response::Response,
};

/// 处理函数的执行结果
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum Handled {
    Yes,
    /// 没有合适的表示，交给后续路由
    Pass,
}

/// 处理函数：接收请求视图、响应构建器与按出现顺序排列的捕获。
pub type Handler = Box<
    dyn Fn(&RequestContext, &mut Response, &[String]) -> Result<Handled, HttpException>
        + Send
        + Sync,
>;

/// 把闭包装箱为 [`Handler`]，闭包参数类型由此约束推导
pub fn handler<F>(f: F) -> Handler
where
    F: Fn(&RequestContext, &mut Response, &[String]) -> Result<Handled, HttpException>
        + Send
        + Sync
        + 'static,
{
    Box::new(f)
}

/// 编译后的路径模式
#[derive(Debug, Clone)]
pub struct RoutePattern {
    source: String,
    regex: Regex,
}

impl RoutePattern {
    /// 模式开头的 `/` 会被忽略，与已剥离前导 `/` 的请求路径对齐
    pub fn compile(pattern: &str) -> Result<Self, regex::Error> {
        let trimmed = pattern.strip_prefix('/').unwrap_or(pattern);
        let mut expr = String::from("^");
        let mut literal = String::new();
        let mut chars = trimmed.chars().peekable();

        while let Some(c) = chars.next() {
            if c != '*' {
                literal.push(c);
                continue;
            }
            expr.push_str(&regex::escape(&literal));
            literal.clear();
            if chars.peek() == Some(&'*') {
                chars.next();
                expr.push_str("(.+)");
            } else {
                expr.push_str("([^/]+)");
            }
        }
        expr.push_str(&regex::escape(&literal));
        expr.push('$');

        Ok(Self {
            source: pattern.to_string(),
            regex: Regex::new(&expr)?,
        })
    }

    /// 命中时返回全部捕获
    pub fn captures(&self, path: &str) -> Option<Vec<String>> {
        let caps = self.regex.captures(path)?;
        Some(
            caps.iter()
                .skip(1)
                .map(|m| m.map_or_else(String::new, |m| m.as_str().to_string()))
                .collect(),
        )
    }

    pub fn source(&self) -> &str {
        &self.source
    }
}

/// 一组方法标记，例如 `"GET, HEAD"` 或 `"*"`
#[derive(Debug, Clone, PartialEq)]
pub struct MethodSet {
    methods: Vec<HttpRequestMethod>,
    wildcard: bool,
}

impl MethodSet {
    /// 按逗号或空白切分，未知的方法名被忽略
    pub fn parse(tokens: &str) -> Self {
        let mut methods = Vec::new();
        let mut wildcard = false;
        for token in tokens
            .split(|c: char| c == ',' || c.is_whitespace())
            .filter(|t| !t.is_empty())
        {
            if token == "*" {
                wildcard = true;
                continue;
            }
            match HttpRequestMethod::from_token(&token.to_uppercase()) {
                Some(m) => methods.push(m),
                None => warn!("忽略未知的方法标记：{}", token),
            }
        }
        Self { methods, wildcard }
    }

    pub fn contains(&self, method: HttpRequestMethod) -> bool {
        self.methods.contains(&method) || (self.wildcard && method != HttpRequestMethod::Options)
    }
}

pub struct Route {
    pattern: RoutePattern,
    handlers: Vec<(MethodSet, Handler)>,
}

impl Route {
    fn resolve(&self, method: HttpRequestMethod) -> Option<&Handler> {
        self.handlers
            .iter()
            .find(|(set, _)| set.contains(method))
            .map(|(_, handler)| handler)
    }
}

/// 有序路由表
#[derive(Default)]
pub struct Router {
    routes: Vec<Route>,
}

impl Router {
    pub fn new() -> Self {
        Self { routes: Vec::new() }
    }

    /// 追加一条路由
    pub fn register(
        &mut self,
        pattern: &str,
        handlers: Vec<(&str, Handler)>,
    ) -> Result<&mut Self, regex::Error> {
        let pattern = RoutePattern::compile(pattern)?;
        let handlers = handlers
            .into_iter()
            .map(|(methods, handler)| (MethodSet::parse(methods), handler))
            .collect();
        self.routes.push(Route { pattern, handlers });
        Ok(self)
    }

    pub fn len(&self) -> usize {
        self.routes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.routes.is_empty()
    }

    /// 按注册顺序尝试每条路由
    pub fn dispatch(
        &self,
        ctx: &RequestContext,
        response: &mut Response,
    ) -> Result<(), HttpException> {
        let method = ctx.method();
        let mut pattern_matched = false;

        for route in &self.routes {
            let captures = match route.pattern.captures(ctx.path()) {
                Some(c) => c,
                None => continue,
            };
            let handler = match route.resolve(method) {
                Some(h) => h,
                None => {
                    pattern_matched = true;
                    continue;
                }
            };
            match handler(ctx, response, &captures)? {
                Handled::Yes => return Ok(()),
                Handled::Pass => {
                    debug!("路由 `{}` 放弃处理 {}", route.pattern.source(), ctx.path());
                }
            }
        }

        if pattern_matched {
            Err(HttpException::method_not_allowed())
        } else {
            Err(HttpException::not_found())
        }
    }
}
