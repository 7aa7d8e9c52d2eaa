// Copyright (c) 2026 shaneyale (shaneyale86@gmail.com)
// All rights reserved.

//! # 请求生命周期
//!
//! [`Server::handle`] 是每个请求唯一的分发边界：
//! 1. 构建 [`RequestContext`]。
//! 2. CORS 过滤；OPTIONS 预检在此直接结束。
//! 3. 标记暂存区，之后的输出都可以回滚。
//! 4. 配置了账户时先认证。
//! 5. 路由分发。任何一步返回 [`HttpException`]，暂存输出整体丢弃并改写为错误响应。
//!
//! [`key_value_routes`] 在路由表上挂载键值存储的集合端点与条目端点。

use std::{fs, io, path::PathBuf, sync::Arc};

use log::{debug, error, info, warn};

use crate::{
    auth::{AuthGuard, Credentials},
    conditional::if_modified_since,
    config::{AuthScheme, Config},
    cors::{CorsFilter, CorsOutcome},
    exception::HttpException,
    negotiate::send_as_json,
    request::{Accept, Request, RequestContext},
    response::Response,
    router::{handler, Handled, Router},
    store::ResourceStore,
    util::unique_id,
};

pub struct Server {
    router: Router,
    cors: Option<CorsFilter>,
    guard: Option<AuthGuard>,
    root_path: String,
}

impl Server {
    /// `root_path` 为需要从请求路径中剥离的前缀，例如 `/kv`
    pub fn new(router: Router, root_path: impl Into<String>) -> Self {
        Self {
            router,
            cors: None,
            guard: None,
            root_path: root_path.into(),
        }
    }

    pub fn with_cors(mut self, cors: CorsFilter) -> Self {
        self.cors = Some(cors);
        self
    }

    pub fn with_guard(mut self, guard: AuthGuard) -> Self {
        self.guard = Some(guard);
        self
    }

    /// 按配置组装键值存储服务：打开数据目录、注册路由、挂载 CORS 与认证。
    pub fn from_config(config: &Config) -> io::Result<Self> {
        let store = Arc::new(ResourceStore::open(config.data_dir(), config.cache_size())?);
        info!("数据目录：{}", store.data_dir().display());

        let router = key_value_routes(
            store,
            config.public_root().to_string(),
            config.webapp().map(|p| p.to_path_buf()),
        )
        .map_err(|e| io::Error::new(io::ErrorKind::InvalidInput, e))?;

        let mut server = Self::new(router, config.root_path());
        if !config.cors().is_empty() {
            server = server.with_cors(CorsFilter::new(config.cors()));
        }
        if !config.accounts().is_empty() {
            let credentials = Credentials::new(config.accounts().clone());
            let guard = match config.auth() {
                AuthScheme::Basic => AuthGuard::basic(config.realm(), Arc::new(credentials)),
                AuthScheme::Digest => AuthGuard::digest(config.realm(), unique_id(), credentials),
            };
            info!("已启用{:?}认证，账户数：{}", config.auth(), config.accounts().len());
            server = server.with_guard(guard);
        }
        Ok(server)
    }

    /// 处理一个完整的请求，总是产生一个响应
    pub fn handle(&self, request: Request, id: u128) -> Response {
        let version = *request.version();
        let ctx = RequestContext::new(request, &self.root_path);
        let mut response = Response::new();
        response.set_version(version);

        if let Some(cors) = &self.cors {
            if cors.apply(&ctx, &mut response) == CorsOutcome::Preflight {
                debug!("[ID{}]CORS预检请求已应答", id);
                return response;
            }
        }

        response.begin_stage();
        if let Err(e) = self.process(&ctx, &mut response, id) {
            match e.status() {
                s if s >= 500 => error!("[ID{}]{} {}：{}", id, ctx.method(), ctx.path(), e),
                401 => debug!("[ID{}]{}", id, e),
                _ => warn!("[ID{}]{} {}：{}", id, ctx.method(), ctx.path(), e),
            }
            response.rollback(&e);
        }
        response
    }

    fn process(
        &self,
        ctx: &RequestContext,
        response: &mut Response,
        id: u128,
    ) -> Result<(), HttpException> {
        if let Some(guard) = &self.guard {
            let login = guard.check(ctx)?;
            debug!("[ID{}]用户 {} 认证通过", id, login);
        }
        self.router.dispatch(ctx, response)
    }
}

/// 集合端点 `/` 与条目端点 `/{id}`（`id` 可以包含 `/`）
pub fn key_value_routes(
    store: Arc<ResourceStore>,
    public_root: String,
    webapp: Option<PathBuf>,
) -> Result<Router, regex::Error> {
    let mut router = Router::new();
    let public_root = Arc::new(public_root);

    let list_store = Arc::clone(&store);
    let list_root = Arc::clone(&public_root);
    let create_store = Arc::clone(&store);
    let create_root = Arc::clone(&public_root);
    router.register(
        "",
        vec![
            (
                "GET",
                handler(move |ctx, response, _| {
                    // 列表与页面由 Accept 决定
                    response.add_vary("Accept");
                    if ctx.accept() == Accept::Json {
                        let uris: Vec<String> = list_store
                            .list()?
                            .iter()
                            .map(|id| ResourceStore::uri(&list_root, id))
                            .collect();
                        send_as_json(ctx, response, &uris)?;
                        return Ok(Handled::Yes);
                    }
                    match &webapp {
                        Some(page) => {
                            let html = fs::read(page)?;
                            response
                                .set_header("Content-Type", "text/html; charset=utf-8")
                                .write(&html);
                            Ok(Handled::Yes)
                        }
                        None => Ok(Handled::Pass),
                    }
                }),
            ),
            (
                "POST",
                handler(move |ctx, response, _| {
                    let id = unique_id();
                    create_store.write(&id, ctx.body())?;
                    let uri = ResourceStore::uri(&create_root, &id);
                    response
                        .set_code(201)
                        .set_header("Location", uri.as_str())
                        .set_header("Content-Location", uri.as_str())
                        .set_header("Access-Control-Expose-Headers", "location, content-location");
                    Ok(Handled::Yes)
                }),
            ),
        ],
    )?;

    let read_store = Arc::clone(&store);
    let update_store = Arc::clone(&store);
    let delete_store = store;
    router.register(
        "/**",
        vec![
            (
                "GET, HEAD",
                handler(move |ctx, response, captures| {
                    let id = resource_id(captures)?;
                    let meta = read_store
                        .metadata(id)?
                        .ok_or_else(HttpException::not_found)?;
                    response.set_header("Content-Type", "text/plain; charset=utf-8");
                    // HEAD 同样写入内容，由传输层丢弃响应体，长度与压缩标头和 GET 一致
                    if_modified_since(ctx, response, meta.modified, |response| {
                        let content = read_store.read(id)?;
                        response.write(&content);
                        Ok(())
                    })?;
                    Ok(Handled::Yes)
                }),
            ),
            (
                "PUT",
                handler(move |ctx, response, captures| {
                    update_store.write(resource_id(captures)?, ctx.body())?;
                    response.set_code(204);
                    Ok(Handled::Yes)
                }),
            ),
            (
                "DELETE",
                handler(move |_, response, captures| {
                    delete_store.delete(resource_id(captures)?)?;
                    response.set_code(204);
                    Ok(Handled::Yes)
                }),
            ),
        ],
    )?;

    Ok(router)
}

fn resource_id(captures: &[String]) -> Result<&str, HttpException> {
    captures
        .first()
        .map(String::as_str)
        .ok_or_else(HttpException::not_found)
}
