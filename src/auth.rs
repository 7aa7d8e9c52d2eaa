// Copyright (c) 2026 shaneyale (shaneyale86@gmail.com)
// All rights reserved.

//! # HTTP 认证模块
//!
//! 提供 Basic 与 Digest（RFC 2617，`qop="auth"`）两种认证方式：
//! - Basic：解码 `Authorization: Basic ...`，交给可插拔的 [`CredentialVerifier`] 校验。
//! - Digest：用结构化的 `key=value` / `key="value"` 解析器提取摘要字段，
//!   对每个账户计算期望的 `response`，第一个吻合的账户即为登录名。
//!
//! 服务端 nonce 在进程启动时生成一次，不做持久化，也不做重放检查。
//! 账户密码以明文保存在配置中，Digest 的计算需要明文密码。

use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;

use base64::{engine::general_purpose::STANDARD, Engine};
use log::{debug, warn};

use crate::{
    exception::HttpException, param::AUTH_REQUIRED_MESSAGE, request::RequestContext,
    util::md5_hex,
};

/// 登录名与密码的校验能力
#[cfg_attr(test, mockall::automock)]
pub trait CredentialVerifier: Send + Sync {
    fn verify(&self, login: &str, password: &str) -> bool;
}

/// 明文账户表
#[derive(Debug, Clone, Default)]
pub struct Credentials {
    accounts: BTreeMap<String, String>,
}

impl Credentials {
    pub fn new(accounts: BTreeMap<String, String>) -> Self {
        Self { accounts }
    }

    pub fn is_empty(&self) -> bool {
        self.accounts.is_empty()
    }

    /// 按登录名排序遍历
    pub fn iter(&self) -> impl Iterator<Item = (&str, &str)> {
        self.accounts.iter().map(|(l, p)| (l.as_str(), p.as_str()))
    }
}

impl CredentialVerifier for Credentials {
    fn verify(&self, login: &str, password: &str) -> bool {
        self.accounts.get(login).map_or(false, |p| p == password)
    }
}

/// 从 `Authorization: Basic base64(login:password)` 中取出登录名与密码
pub fn basic_credentials(ctx: &RequestContext) -> Option<(String, String)> {
    let value = ctx.authorization()?;
    let encoded = strip_scheme(value, "basic")?;
    let decoded = STANDARD.decode(encoded.trim()).ok()?;
    let decoded = String::from_utf8(decoded).ok()?;
    let (login, password) = decoded.split_once(':')?;
    Some((login.to_string(), password.to_string()))
}

/// 去掉大小写不敏感的认证方案前缀
fn strip_scheme<'a>(value: &'a str, scheme: &str) -> Option<&'a str> {
    let value = value.trim_start();
    let head = value.get(..scheme.len())?;
    let rest = &value[scheme.len()..];
    if head.eq_ignore_ascii_case(scheme) && rest.starts_with(' ') {
        Some(rest.trim_start())
    } else {
        None
    }
}

pub fn basic_challenge(realm: &str) -> String {
    format!("Basic realm=\"{}\"", realm)
}

/// Basic 认证，成功时返回登录名
pub fn basic_auth(
    ctx: &RequestContext,
    realm: &str,
    verifier: &dyn CredentialVerifier,
) -> Result<String, HttpException> {
    if let Some((login, password)) = basic_credentials(ctx) {
        if verifier.verify(&login, &password) {
            return Ok(login);
        }
        debug!("Basic认证失败：{}", login);
    }
    Err(HttpException::unauthorized(
        basic_challenge(realm),
        AUTH_REQUIRED_MESSAGE,
    ))
}

/// 摘要字符串：优先取 `Authorization: Digest ...`，
/// 其次取部分前端代理转发的 `Authentication: Digest ...`。
pub fn digest_string(ctx: &RequestContext) -> Option<&str> {
    ["authorization", "authentication"]
        .iter()
        .filter_map(|name| ctx.header(name))
        .find_map(|value| strip_scheme(value, "digest"))
}

/// 解析 `key=value, key="value", ...`。语法错误返回 `None`。
///
/// 带引号的值支持反斜杠转义；不带引号的值到 `,` 或空白为止。
pub fn parse_digest_fields(input: &str) -> Option<HashMap<String, String>> {
    let mut fields = HashMap::new();
    let mut chars = input.chars().peekable();

    loop {
        while matches!(chars.peek(), Some(c) if *c == ',' || c.is_whitespace()) {
            chars.next();
        }
        if chars.peek().is_none() {
            break;
        }

        let mut key = String::new();
        while let Some(&c) = chars.peek() {
            if c.is_ascii_alphanumeric() || c == '_' || c == '-' {
                key.push(c);
                chars.next();
            } else {
                break;
            }
        }
        while matches!(chars.peek(), Some(c) if c.is_whitespace()) {
            chars.next();
        }
        if key.is_empty() || chars.next() != Some('=') {
            return None;
        }
        while matches!(chars.peek(), Some(c) if c.is_whitespace()) {
            chars.next();
        }

        let mut value = String::new();
        if chars.peek() == Some(&'"') {
            chars.next();
            let mut closed = false;
            while let Some(c) = chars.next() {
                match c {
                    '\\' => value.push(chars.next()?),
                    '"' => {
                        closed = true;
                        break;
                    }
                    _ => value.push(c),
                }
            }
            if !closed {
                return None;
            }
        } else {
            while let Some(&c) = chars.peek() {
                if c == ',' || c.is_whitespace() {
                    break;
                }
                value.push(c);
                chars.next();
            }
        }

        fields.insert(key.to_lowercase(), value);
    }

    Some(fields)
}

/// 客户端提交的、计算所需字段齐全的摘要
#[derive(Debug, Clone, PartialEq)]
pub struct DigestResponse {
    pub uri: String,
    pub nonce: String,
    pub nc: String,
    pub cnonce: String,
    pub qop: String,
    pub response: String,
}

impl DigestResponse {
    /// 缺少任一必需字段时返回 `None`
    pub fn from_fields(mut fields: HashMap<String, String>) -> Option<Self> {
        Some(Self {
            uri: fields.remove("uri")?,
            nonce: fields.remove("nonce")?,
            nc: fields.remove("nc")?,
            cnonce: fields.remove("cnonce")?,
            qop: fields.remove("qop")?,
            response: fields.remove("response")?,
        })
    }

    /// 按账户计算期望的 `response`
    pub fn expected(&self, login: &str, realm: &str, password: &str, method: &str) -> String {
        let a1 = md5_hex(format!("{}:{}:{}", login, realm, password));
        let a2 = md5_hex(format!("{}:{}", method, self.uri));
        md5_hex(format!(
            "{}:{}:{}:{}:{}:{}",
            a1, self.nonce, self.nc, self.cnonce, self.qop, a2
        ))
    }
}

pub fn digest_challenge(realm: &str, nonce: &str) -> String {
    format!(
        "Digest realm=\"{}\",qop=\"auth\",nonce=\"{}\",opaque=\"{}\"",
        realm,
        nonce,
        md5_hex(realm)
    )
}

/// Digest 认证，成功时返回登录名
pub fn digest_auth(
    ctx: &RequestContext,
    realm: &str,
    nonce: &str,
    credentials: &Credentials,
) -> Result<String, HttpException> {
    let digest = digest_string(ctx)
        .and_then(parse_digest_fields)
        .and_then(DigestResponse::from_fields);

    match digest {
        Some(digest) => {
            let method = ctx.method().as_str();
            let found = credentials.iter().find(|(login, password)| {
                digest.expected(login, realm, password, method) == digest.response
            });
            if let Some((login, _)) = found {
                return Ok(login.to_string());
            }
            warn!("Digest认证失败：uri={}", digest.uri);
        }
        None => debug!("缺少完整的Digest认证信息"),
    }

    Err(HttpException::unauthorized(
        digest_challenge(realm, nonce),
        AUTH_REQUIRED_MESSAGE,
    ))
}

/// 分发前的认证关卡
#[derive(Clone)]
pub enum AuthGuard {
    Basic {
        realm: String,
        verifier: Arc<dyn CredentialVerifier>,
    },
    Digest {
        realm: String,
        nonce: String,
        credentials: Credentials,
    },
}

impl AuthGuard {
    pub fn basic(realm: impl Into<String>, verifier: Arc<dyn CredentialVerifier>) -> Self {
        Self::Basic {
            realm: realm.into(),
            verifier,
        }
    }

    pub fn digest(
        realm: impl Into<String>,
        nonce: impl Into<String>,
        credentials: Credentials,
    ) -> Self {
        Self::Digest {
            realm: realm.into(),
            nonce: nonce.into(),
            credentials,
        }
    }

    /// 校验请求，返回通过认证的登录名
    pub fn check(&self, ctx: &RequestContext) -> Result<String, HttpException> {
        match self {
            Self::Basic { realm, verifier } => basic_auth(ctx, realm, verifier.as_ref()),
            Self::Digest {
                realm,
                nonce,
                credentials,
            } => digest_auth(ctx, realm, nonce, credentials),
        }
    }
}
