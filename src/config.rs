use std::collections::BTreeMap;
use std::fs::File;
use std::io::{self, prelude::*};
use std::path::{Path, PathBuf};

use log::{error, warn};
use serde_derive::{Deserialize, Serialize};
use url::Url;

/// 当配置了账户表时使用的认证方式
#[derive(Serialize, Deserialize, Debug, Clone, Copy, PartialEq, Default)]
#[serde(rename_all = "lowercase")]
pub enum AuthScheme {
    Basic,
    #[default]
    Digest,
}

#[derive(Serialize, Deserialize, Debug, Clone)]
pub struct Config {
    /// 服务对外的根 URL，例如 `http://mydomain.com/kv/`
    url_root: String,
    data_dir: PathBuf,
    port: u16,
    local: bool,
    #[serde(default)]
    worker_threads: usize,
    #[serde(default = "default_cache_size")]
    cache_size: usize,
    #[serde(default = "default_max_body_size")]
    max_body_size: usize,
    #[serde(default = "default_realm")]
    realm: String,
    #[serde(default)]
    auth: AuthScheme,
    /// 允许跨域访问的域名通配符列表
    #[serde(default)]
    cors: Vec<String>,
    /// 登录名 -> 密码（明文）
    #[serde(default)]
    accounts: BTreeMap<String, String>,
    /// 以 HTML 请求根路径时返回的页面
    #[serde(default)]
    webapp: Option<PathBuf>,
}

fn default_cache_size() -> usize {
    64
}

fn default_max_body_size() -> usize {
    8388608 // 8MB
}

fn default_realm() -> String {
    "realm".to_string()
}

impl Config {
    pub fn new() -> Self {
        Self {
            url_root: "http://localhost:7878/".to_string(),
            data_dir: PathBuf::from("data"),
            port: 7878,
            local: true,
            worker_threads: 0,
            cache_size: default_cache_size(),
            max_body_size: default_max_body_size(),
            realm: default_realm(),
            auth: AuthScheme::default(),
            cors: Vec::new(),
            accounts: BTreeMap::new(),
            webapp: None,
        }
    }

    /// 从 TOML 文件读取配置。文件无法读取时返回错误；内容无法解析时记录错误并使用默认配置。
    pub fn from_toml(filename: impl AsRef<Path>) -> io::Result<Self> {
        let mut file = File::open(filename.as_ref())?;
        let mut str_val = String::new();
        file.read_to_string(&mut str_val)?;
        Ok(Self::from_toml_str(&str_val))
    }

    pub fn from_toml_str(content: &str) -> Self {
        let mut raw_config: Config = match toml::from_str(content) {
            Ok(t) => t,
            Err(e) => {
                error!("无法成功从配置文件构建配置对象，使用默认配置：{}", e);
                Config::new()
            }
        };
        if raw_config.worker_threads == 0 {
            raw_config.worker_threads = num_cpus::get();
        }
        if Url::parse(&raw_config.url_root).is_err() && !raw_config.url_root.starts_with('/') {
            warn!(
                "url_root `{}` 既不是绝对 URL 也不是以 / 开头的路径，将按路径前缀处理",
                raw_config.url_root
            );
        }
        raw_config
    }

    pub fn with_data_dir(mut self, data_dir: impl Into<PathBuf>) -> Self {
        self.data_dir = data_dir.into();
        self
    }

    pub fn with_url_root(mut self, url_root: impl Into<String>) -> Self {
        self.url_root = url_root.into();
        self
    }

    pub fn with_cors(mut self, cors: Vec<String>) -> Self {
        self.cors = cors;
        self
    }

    pub fn with_account(mut self, login: &str, password: &str) -> Self {
        self.accounts.insert(login.to_string(), password.to_string());
        self
    }

    pub fn with_realm(mut self, realm: impl Into<String>) -> Self {
        self.realm = realm.into();
        self
    }

    pub fn with_auth(mut self, auth: AuthScheme) -> Self {
        self.auth = auth;
        self
    }

    pub fn with_webapp(mut self, webapp: impl Into<PathBuf>) -> Self {
        self.webapp = Some(webapp.into());
        self
    }
}

impl Default for Config {
    fn default() -> Self {
        Self::new()
    }
}

impl Config {
    pub fn url_root(&self) -> &str {
        &self.url_root
    }

    /// 去掉末尾 `/` 的根 URL，用于拼接资源的公开 URI
    pub fn public_root(&self) -> &str {
        self.url_root.strip_suffix('/').unwrap_or(&self.url_root)
    }

    /// 根 URL 的路径部分（不含末尾 `/`），需要从请求路径中剥离
    pub fn root_path(&self) -> String {
        let path = match Url::parse(&self.url_root) {
            Ok(url) => url.path().to_string(),
            Err(_) => self.url_root.clone(),
        };
        path.trim_end_matches('/').to_string()
    }

    pub fn data_dir(&self) -> &Path {
        &self.data_dir
    }

    pub fn port(&self) -> u16 {
        self.port
    }

    pub fn local(&self) -> bool {
        self.local
    }

    pub fn worker_threads(&self) -> usize {
        self.worker_threads
    }

    pub fn cache_size(&self) -> usize {
        self.cache_size
    }

    pub fn max_body_size(&self) -> usize {
        self.max_body_size
    }

    pub fn realm(&self) -> &str {
        &self.realm
    }

    pub fn auth(&self) -> AuthScheme {
        self.auth
    }

    pub fn cors(&self) -> &[String] {
        &self.cors
    }

    pub fn accounts(&self) -> &BTreeMap<String, String> {
        &self.accounts
    }

    pub fn webapp(&self) -> Option<&Path> {
        self.webapp.as_deref()
    }
}
