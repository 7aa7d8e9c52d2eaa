// Copyright (c) 2026 shaneyale (shaneyale86@gmail.com)
// All rights reserved.

//! # 键值存储服务端
//!
//! 基于 Tokio 运行时的多线程服务端入口：
//! - 载入 log4rs 日志配置与 TOML 运行配置（路径可由第一个命令行参数指定）
//! - 按配置的线程数构建运行时并监听端口
//! - 每个连接读取一个完整请求（请求头 + `Content-Length` 请求体），交给 [`Server`] 处理
//! - 收到 Ctrl-C 后停止接受新连接

use std::{
    env,
    net::{Ipv4Addr, SocketAddrV4},
    process,
    sync::Arc,
    time::Instant,
};

use bytes::{Bytes, BytesMut};
use keyval::{
    exception::Exception,
    param::{HttpRequestMethod, CRLF, HEADER_TERMINATOR},
    request::find_subsequence,
    response::decide_encoding,
    Config, HttpException, Request, Response, Server,
};
use log::{debug, error, info, warn};
use tokio::{
    io::{AsyncReadExt, AsyncWriteExt},
    net::{TcpListener, TcpStream},
    runtime::Builder,
    signal,
};

const DEFAULT_CONFIG: &str = "config/development.toml";
const LOG_CONFIG: &str = "config/log4rs.yaml";
/// 单次读取的缓冲区大小
const READ_CHUNK: usize = 4096;
/// 请求头的长度上限
const MAX_HEADER_SIZE: usize = 64 * 1024;

/// 读取一个请求的结果
enum ReadOutcome {
    /// 客户端未发送任何数据就关闭了连接
    Closed,
    Complete(Bytes),
    /// 报文在读取阶段即可判定为非法
    Rejected(Exception),
    Failed(std::io::Error),
}

fn main() {
    // 1. 初始化日志系统
    if let Err(e) = log4rs::init_file(LOG_CONFIG, Default::default()) {
        eprintln!("无法载入日志配置{}：{}", LOG_CONFIG, e);
        process::exit(1);
    }

    // 2. 载入配置
    let config_path = env::args().nth(1).unwrap_or_else(|| DEFAULT_CONFIG.to_string());
    let config = match Config::from_toml(&config_path) {
        Ok(config) => config,
        Err(e) => {
            error!("无法读取配置文件{}：{}", config_path, e);
            process::exit(1);
        }
    };
    info!("配置文件{}已载入", config_path);
    info!("url root: {}", config.url_root());

    // 3. 按配置的线程数构建运行时
    let runtime = match Builder::new_multi_thread()
        .worker_threads(config.worker_threads().max(1))
        .enable_all()
        .build()
    {
        Ok(runtime) => runtime,
        Err(e) => {
            error!("无法构建Tokio运行时：{}", e);
            process::exit(1);
        }
    };

    runtime.block_on(serve(config));
}

async fn serve(config: Config) {
    let server = match Server::from_config(&config) {
        Ok(server) => Arc::new(server),
        Err(e) => {
            error!("无法初始化数据目录{}：{}", config.data_dir().display(), e);
            return;
        }
    };

    let port = config.port();
    let address = match config.local() {
        true => Ipv4Addr::new(127, 0, 0, 1),
        false => Ipv4Addr::new(0, 0, 0, 0),
    };
    let socket = SocketAddrV4::new(address, port);
    let listener = match TcpListener::bind(socket).await {
        Ok(listener) => listener,
        Err(e) => {
            error!("无法绑定端口：{}，错误：{}", port, e);
            return;
        }
    };
    info!("服务端在{}上监听Socket连接", socket);

    let max_body_size = config.max_body_size();
    let shutdown = signal::ctrl_c();
    tokio::pin!(shutdown);
    let mut id: u128 = 0;

    loop {
        tokio::select! {
            accepted = listener.accept() => {
                let (mut stream, addr) = match accepted {
                    Ok(pair) => pair,
                    Err(e) => {
                        error!("接受连接失败：{}", e);
                        continue;
                    }
                };
                debug!("[ID{}]TCP连接已建立：{}", id, addr);
                let server = Arc::clone(&server);
                tokio::spawn(async move {
                    handle_connection(&mut stream, id, server, max_body_size).await;
                });
                id += 1;
            }
            _ = &mut shutdown => {
                info!("收到停机信号，停止接受新连接");
                break;
            }
        }
    }
}

/// 单个连接的生命周期：读取、解析、分发、发送
async fn handle_connection(stream: &mut TcpStream, id: u128, server: Arc<Server>, max_body_size: usize) {
    let start_time = Instant::now();

    let buffer = match read_request(stream, max_body_size).await {
        ReadOutcome::Closed => return,
        ReadOutcome::Complete(buffer) => buffer,
        ReadOutcome::Rejected(e) => {
            warn!("[ID{}]请求被拒绝：{}", id, e);
            send(stream, id, &exception_response(e), false, None).await;
            return;
        }
        ReadOutcome::Failed(e) => {
            error!("[ID{}]读取TCPStream时遇到错误: {}", id, e);
            return;
        }
    };
    debug!("[ID{}]HTTP请求接收完毕，{}字节", id, buffer.len());

    let request = match Request::try_from(&buffer, id) {
        Ok(request) => request,
        Err(e) => {
            send(stream, id, &exception_response(e), false, None).await;
            return;
        }
    };

    let head_only = request.method() == HttpRequestMethod::Head;
    let encoding = decide_encoding(request.accept_encoding());
    let version = *request.version();
    let method = request.method();
    let target = request.target().to_string();
    let user_agent = request.user_agent().to_string();

    // 分发过程中有同步的文件读写，放到阻塞线程池中执行
    let response = match tokio::task::spawn_blocking(move || server.handle(request, id)).await {
        Ok(response) => response,
        Err(e) => {
            error!("[ID{}]处理请求的任务异常退出：{}", id, e);
            let mut response = Response::new();
            response.rollback(&HttpException::server_error("Internal error"));
            response
        }
    };

    debug!(
        "[ID{}]HTTP响应构建完成，服务端用时{}ms。",
        id,
        start_time.elapsed().as_millis()
    );
    info!(
        "[ID{}] {}, {}, {}, {}, {}, {}, ",
        id,
        version,
        target,
        method,
        response.status_code(),
        response.information(),
        user_agent,
    );

    send(stream, id, &response, head_only, encoding).await;
}

async fn send(
    stream: &mut TcpStream,
    id: u128,
    response: &Response,
    head_only: bool,
    encoding: Option<keyval::HttpEncoding>,
) {
    let bytes = response.as_bytes(head_only, encoding);
    debug!("[ID{}]发送响应，长度: {}", id, bytes.len());
    if let Err(e) = stream.write_all(&bytes).await {
        error!("[ID{}]发送响应失败: {}", id, e);
        return;
    }
    let _ = stream.flush().await;
}

fn exception_response(e: Exception) -> Response {
    let mut response = Response::new();
    response.rollback(&HttpException::new(e.status_code(), e.to_string()));
    response
}

/// 读取请求头，再按 `Content-Length` 读取请求体
async fn read_request(stream: &mut TcpStream, max_body_size: usize) -> ReadOutcome {
    let mut buffer = BytesMut::with_capacity(READ_CHUNK);

    let header_end = loop {
        if let Some(pos) = find_subsequence(&buffer, HEADER_TERMINATOR) {
            break pos + HEADER_TERMINATOR.len();
        }
        if buffer.len() > MAX_HEADER_SIZE {
            return ReadOutcome::Rejected(Exception::MalformedRequest);
        }
        match stream.read_buf(&mut buffer).await {
            Ok(0) if buffer.is_empty() => return ReadOutcome::Closed,
            // 对端半关闭，按已收到的内容解析
            Ok(0) => break buffer.len(),
            Ok(_) => {}
            Err(e) => return ReadOutcome::Failed(e),
        }
    };

    let body_len = match content_length(&buffer[..header_end]) {
        Ok(len) => len,
        Err(e) => return ReadOutcome::Rejected(e),
    };
    if body_len > max_body_size {
        return ReadOutcome::Rejected(Exception::InvalidBody);
    }

    let total = header_end + body_len;
    while buffer.len() < total {
        match stream.read_buf(&mut buffer).await {
            Ok(0) => break,
            Ok(_) => {}
            Err(e) => return ReadOutcome::Failed(e),
        }
    }
    ReadOutcome::Complete(buffer.freeze())
}

/// 从原始请求头中取出 `Content-Length`，缺省为 0
fn content_length(head: &[u8]) -> Result<usize, Exception> {
    let head = String::from_utf8_lossy(head);
    for line in head.split(CRLF).skip(1) {
        if let Some((name, value)) = line.split_once(':') {
            if name.trim().eq_ignore_ascii_case("content-length") {
                return value.trim().parse().map_err(|_| Exception::InvalidBody);
            }
        }
    }
    Ok(0)
}
