//! HTTP 服务：一套路由，两种传输。
//!
//! 构建时二选一：TCP 上的 HTTP/1.1（TLS 可选，通过 ALPN 支持 h2），或 QUIC 上的 HTTP/3（必须配置 TLS）。
//! 两种传输共用同一条请求管线，处理器看到的 [`Transport`](crate::Transport) 完全一致。

pub(crate) mod config;
pub(crate) mod endpoint;
mod http;
pub(crate) mod lifecycle;
#[cfg(feature = "http3")]
mod quic;
pub(crate) mod service;
pub(crate) mod tls;

use std::convert::Infallible;
use std::future::Future;
use std::net::{SocketAddr, TcpListener};
#[cfg(feature = "http3")]
use std::net::UdpSocket;
use std::sync::Arc;
use std::time::Duration;

use bytes::Bytes;
use ::http::{HeaderMap, Method, Uri};
use once_cell::sync::OnceCell;
use parking_lot::Mutex;
use serde_json::Value;
use tracing::info;
use url::Url;

use crate::context::Context;
use crate::core::codec::Codecs;
use crate::error::ServerError;
use crate::middleware::selector::Selector;
use crate::route::{RouteGroup, RouteInfo, Router};
use crate::{DuetError, Handler, HandlerFn, MiddleWareHandler, Request, Response, Result};
use config::ServerConfig;
use endpoint::{Resolved, bind_addr};
use lifecycle::{Lifecycle, State};
use service::ServeHandler;
use tls::TlsConfig;

enum Backend {
    Tcp {
        listener: Mutex<Option<TcpListener>>,
    },
    #[cfg(feature = "http3")]
    Quic {
        socket: Mutex<Option<UdpSocket>>,
        endpoint: Mutex<Option<quinn::Endpoint>>,
    },
}

/// HTTP 服务
///
/// ```no_run
/// use duet::prelude::*;
/// use std::sync::Arc;
///
/// #[tokio::main]
/// async fn main() {
///     let mut server = Server::builder().address("127.0.0.1:8000").build();
///     server.handle_fn("/index/{id}", |req: Request| async move {
///         Ok(req.param("id").unwrap_or_default().to_string())
///     });
///     let server = Arc::new(server);
///     server.start(Context::background()).await.unwrap();
/// }
/// ```
pub struct Server {
    network: String,
    address: String,
    timeout: Duration,
    tls: Option<TlsConfig>,
    explicit_endpoint: Option<Url>,
    max_body_size: Option<usize>,
    router: Router,
    filters: Vec<Arc<dyn MiddleWareHandler>>,
    selectors: Vec<Selector>,
    codecs: Codecs,
    backend: Backend,
    resolved: OnceCell<std::result::Result<Resolved, ServerError>>,
    lifecycle: Lifecycle,
}

impl Server {
    pub fn builder() -> ServerBuilder {
        ServerBuilder::default()
    }

    /// 是否使用 QUIC/HTTP3 传输
    pub fn is_http3(&self) -> bool {
        !matches!(self.backend, Backend::Tcp { .. })
    }

    pub fn state(&self) -> State {
        self.lifecycle.state()
    }

    /// 注册路径模板路由，匹配任意方法。
    pub fn handle(&mut self, path: &str, handler: impl Handler) -> &mut Self {
        self.router.handle(path, Arc::new(handler));
        self
    }

    pub fn handle_fn<F, Fut, T>(&mut self, path: &str, func: F) -> &mut Self
    where
        F: Fn(Request) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<T>> + Send + 'static,
        T: Into<Response> + Send + 'static,
    {
        self.handle(path, HandlerFn::new(func))
    }

    /// 注册路径前缀路由
    pub fn handle_prefix(&mut self, prefix: &str, handler: impl Handler) -> &mut Self {
        self.router.handle_prefix(prefix, Arc::new(handler));
        self
    }

    /// 注册请求头路由
    pub fn handle_header(&mut self, key: &str, value: &str, handler: impl Handler) -> &mut Self {
        self.router.handle_header(key, value, Arc::new(handler));
        self
    }

    /// 创建路由分组
    pub fn route(&mut self, prefix: &str) -> RouteGroup<'_> {
        RouteGroup::new(&mut self.router, prefix)
    }

    /// 按 operation 选择性挂载中间件：`/*`、`/prefix/*` 或完整的 operation。
    pub fn use_middleware(&mut self, selector: &str, middleware: impl MiddleWareHandler) -> &mut Self {
        self.selectors
            .push(Selector::new(selector, Arc::new(middleware)));
        self
    }

    /// 遍历所有带方法的路由
    pub fn walk_route<F, E>(&self, f: F) -> std::result::Result<(), E>
    where
        F: FnMut(RouteInfo) -> std::result::Result<(), E>,
    {
        self.router.walk(f)
    }

    /// 遍历所有带方法的路由，并为每条路由给出服务的完整请求入口。
    ///
    /// 入口包含过滤器、路由匹配与请求管线，可挂到其它路由器上复用本服务的路由。
    pub fn walk_handle<F>(&self, mut handle: F)
    where
        F: FnMut(Method, &str, Arc<dyn Handler>),
    {
        let entry: Arc<dyn Handler> = self.serve_handler();
        let walked = self.router.walk(|info: RouteInfo| {
            handle(info.method, &info.path, Arc::clone(&entry));
            Ok::<_, Infallible>(())
        });
        if let Err(never) = walked {
            match never {}
        }
    }

    /// 对外暴露的地址，例如 `https://127.0.0.1:8000`。
    ///
    /// 首次调用时会绑定监听地址，结果（包括错误）会被缓存。
    /// `Url` 不保留协议默认端口，读取端口请用 `port_or_known_default`。
    pub fn endpoint(&self) -> std::result::Result<Url, ServerError> {
        self.resolve().map(|resolved| resolved.url)
    }

    /// 不经过网络直接处理一个请求
    pub async fn serve_request(&self, req: Request) -> Response {
        self.serve_handler().dispatch(req).await
    }

    /// 启动服务并阻塞到服务停止；`ctx` 作为所有请求 Context 的父级。
    pub async fn start(&self, ctx: Context) -> std::result::Result<(), ServerError> {
        let resolved = self.resolve()?;
        match &self.backend {
            Backend::Tcp { listener } => self.start_http(ctx, resolved, listener).await,
            #[cfg(feature = "http3")]
            Backend::Quic { socket, endpoint } => {
                self.start_http3(ctx, resolved, socket, endpoint).await
            }
        }
    }

    async fn start_http(
        &self,
        ctx: Context,
        resolved: Resolved,
        listener: &Mutex<Option<TcpListener>>,
    ) -> std::result::Result<(), ServerError> {
        let acceptor = match &self.tls {
            Some(tls) => Some(
                tls.tls_acceptor()
                    .map_err(|e| ServerError::Tls(format!("{e:#}")))?,
            ),
            None => None,
        };
        if !self.lifecycle.begin()? {
            return Ok(());
        }
        let Some(listener) = listener.lock().take() else {
            self.lifecycle.finish();
            return Err(ServerError::AlreadyStarted);
        };
        info!("[HTTP] server listening on: {}", resolved.local_addr);
        let result = http::serve(
            listener,
            acceptor,
            self.serve_handler(),
            ctx,
            &self.lifecycle,
        )
        .await;
        self.lifecycle.finish();
        result
    }

    #[cfg(feature = "http3")]
    async fn start_http3(
        &self,
        ctx: Context,
        resolved: Resolved,
        socket: &Mutex<Option<UdpSocket>>,
        endpoint: &Mutex<Option<quinn::Endpoint>>,
    ) -> std::result::Result<(), ServerError> {
        let Some(tls) = &self.tls else {
            return Err(ServerError::TlsRequired);
        };
        let server_config = tls
            .quic_server_config()
            .map_err(|e| ServerError::Tls(format!("{e:#}")))?;
        if !self.lifecycle.begin()? {
            return Ok(());
        }
        let existing = endpoint.lock().clone();
        let quic = match existing {
            Some(existing) => {
                existing.set_server_config(Some(server_config));
                Ok(existing)
            }
            None => match socket.lock().take() {
                Some(socket) => socket
                    .set_nonblocking(true)
                    .and_then(|_| {
                        quinn::Endpoint::new(
                            quinn::EndpointConfig::default(),
                            Some(server_config),
                            socket,
                            Arc::new(quinn::TokioRuntime),
                        )
                    })
                    .map(|created| {
                        *endpoint.lock() = Some(created.clone());
                        created
                    })
                    .map_err(ServerError::serve),
                None => Err(ServerError::AlreadyStarted),
            },
        };
        let quic = match quic {
            Ok(quic) => quic,
            Err(err) => {
                self.lifecycle.finish();
                return Err(err);
            }
        };
        info!("[HTTP3] server listening on: {}", resolved.local_addr);
        let result = quic::serve(
            quic,
            self.serve_handler(),
            ctx,
            &self.lifecycle,
            self.max_body_size,
        )
        .await;
        self.lifecycle.finish();
        result
    }

    /// 停止服务。
    ///
    /// TCP：停止接受新连接并等待已有连接结束，`ctx` 结束时中断剩余连接并返回错误。
    /// QUIC：立即关闭端点，不等待。
    pub async fn stop(&self, ctx: Context) -> std::result::Result<(), ServerError> {
        match &self.backend {
            Backend::Tcp { .. } => {
                info!("[HTTP] server stopping");
                if self.lifecycle.request_stop() {
                    return Ok(());
                }
                self.lifecycle.wait_stopped(&ctx).await
            }
            #[cfg(feature = "http3")]
            Backend::Quic { endpoint, .. } => {
                info!("[HTTP3] server stopping");
                self.lifecycle.request_stop();
                if let Some(endpoint) = endpoint.lock().as_ref() {
                    endpoint.close(0u32.into(), quic::CLOSE_REASON);
                }
                Ok(())
            }
        }
    }

    fn resolve(&self) -> std::result::Result<Resolved, ServerError> {
        self.resolved
            .get_or_init(|| self.listen_and_endpoint())
            .clone()
    }

    fn listen_and_endpoint(&self) -> std::result::Result<Resolved, ServerError> {
        let listen_err = |e: std::io::Error| ServerError::listen(&self.address, e);
        let bound: SocketAddr = match &self.backend {
            Backend::Tcp { listener } => {
                let mut slot = listener.lock();
                match slot.as_ref() {
                    Some(listener) => listener.local_addr().map_err(listen_err)?,
                    None => {
                        let addr = bind_addr(&self.network, &self.address).map_err(listen_err)?;
                        let listener = TcpListener::bind(addr).map_err(listen_err)?;
                        let local = listener.local_addr().map_err(listen_err)?;
                        *slot = Some(listener);
                        local
                    }
                }
            }
            #[cfg(feature = "http3")]
            Backend::Quic { socket, endpoint } => {
                if let Some(endpoint) = endpoint.lock().as_ref() {
                    endpoint.local_addr().map_err(listen_err)?
                } else {
                    let mut slot = socket.lock();
                    match slot.as_ref() {
                        Some(socket) => socket.local_addr().map_err(listen_err)?,
                        None => {
                            let addr = bind_addr(&udp_network(&self.network), &self.address)
                                .map_err(listen_err)?;
                            let socket = UdpSocket::bind(addr).map_err(listen_err)?;
                            let local = socket.local_addr().map_err(listen_err)?;
                            *slot = Some(socket);
                            local
                        }
                    }
                }
            }
        };
        let resolved = endpoint::resolve(
            &self.address,
            bound,
            self.tls.is_some(),
            self.explicit_endpoint.as_ref(),
        );
        if let Err(err) = &resolved {
            tracing::error!(address = %self.address, error = %err, "failed to resolve endpoint");
        }
        resolved
    }

    fn serve_handler(&self) -> Arc<ServeHandler> {
        let endpoint = match self.resolved.get() {
            Some(Ok(resolved)) => resolved.display.clone(),
            _ => String::new(),
        };
        Arc::new(ServeHandler::new(
            self.router.clone(),
            &self.filters,
            self.selectors.clone(),
            self.codecs.clone(),
            self.timeout,
            endpoint,
        ))
    }
}

#[cfg(feature = "http3")]
fn udp_network(network: &str) -> String {
    match network {
        "tcp4" | "udp4" => "udp4".to_string(),
        "tcp6" | "udp6" => "udp6".to_string(),
        _ => "udp".to_string(),
    }
}

/// Server 构建器
pub struct ServerBuilder {
    network: String,
    address: String,
    listener: Option<TcpListener>,
    #[cfg(feature = "http3")]
    http3_endpoint: Option<quinn::Endpoint>,
    endpoint: Option<Url>,
    timeout: Duration,
    tls: Option<TlsConfig>,
    enable_http3: bool,
    strict_slash: bool,
    path_prefix: String,
    max_body_size: Option<usize>,
    filters: Vec<Arc<dyn MiddleWareHandler>>,
    selectors: Vec<Selector>,
    codecs: Codecs,
    not_found: Option<Arc<dyn Handler>>,
    method_not_allowed: Option<Arc<dyn Handler>>,
}

impl Default for ServerBuilder {
    fn default() -> Self {
        let config = ServerConfig::default();
        Self {
            network: config.network,
            address: config.address,
            listener: None,
            #[cfg(feature = "http3")]
            http3_endpoint: None,
            endpoint: None,
            timeout: Duration::from_millis(config.timeout_ms),
            tls: None,
            enable_http3: config.enable_http3,
            strict_slash: config.strict_slash,
            path_prefix: String::new(),
            max_body_size: config.max_body_size,
            filters: Vec::new(),
            selectors: Vec::new(),
            codecs: Codecs::default(),
            not_found: None,
            method_not_allowed: None,
        }
    }
}

impl ServerBuilder {
    /// 用配置文件中的内容初始化构建器，配置了证书路径时会加载证书。
    pub fn with_config(mut self, config: ServerConfig) -> std::result::Result<Self, ServerError> {
        if let Some(endpoint) = &config.endpoint {
            let url = Url::parse(endpoint).map_err(|e| ServerError::Endpoint {
                address: endpoint.clone(),
                reason: e.to_string(),
            })?;
            self.endpoint = Some(url);
        }
        if let (Some(cert), Some(key)) = (&config.cert_path, &config.key_path) {
            let tls = TlsConfig::builder()
                .cert_path(cert)
                .key_path(key)
                .build()
                .map_err(|e| ServerError::Tls(format!("{e:#}")))?;
            self.tls = Some(tls);
        }
        if config.enable_http3 && cfg!(not(feature = "http3")) {
            tracing::warn!("http3 feature is disabled, falling back to TCP");
        }
        self.timeout = config.timeout();
        self.network = config.network;
        self.address = config.address;
        self.enable_http3 = config.enable_http3;
        self.strict_slash = config.strict_slash;
        self.path_prefix = config.path_prefix.unwrap_or_default();
        self.max_body_size = config.max_body_size;
        Ok(self)
    }

    /// `tcp`、`tcp4` 或 `tcp6`
    pub fn network(mut self, network: &str) -> Self {
        self.network = network.to_string();
        self
    }

    /// 监听地址，例如 `:8000`、`127.0.0.1:0`
    pub fn address(mut self, address: &str) -> Self {
        self.address = address.to_string();
        self
    }

    /// 使用已绑定的 TCP 监听器
    pub fn listener(mut self, listener: TcpListener) -> Self {
        self.listener = Some(listener);
        self
    }

    /// 使用已创建的 QUIC 端点，启动时会替换为本服务的 TLS 配置。
    #[cfg(feature = "http3")]
    pub fn http3_endpoint(mut self, endpoint: quinn::Endpoint) -> Self {
        self.http3_endpoint = Some(endpoint);
        self
    }

    /// 显式指定对外地址
    pub fn endpoint(mut self, endpoint: Url) -> Self {
        self.endpoint = Some(endpoint);
        self
    }

    /// 单个请求的超时时间，`Duration::ZERO` 表示不限制。
    pub fn timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    pub fn tls_config(mut self, tls: TlsConfig) -> Self {
        self.tls = Some(tls);
        self
    }

    /// 使用 QUIC/HTTP3 传输
    #[cfg(feature = "http3")]
    pub fn enable_http3(mut self, enable: bool) -> Self {
        self.enable_http3 = enable;
        self
    }

    pub fn strict_slash(mut self, strict_slash: bool) -> Self {
        self.strict_slash = strict_slash;
        self
    }

    /// 所有路由注册时自动加上的前缀
    pub fn path_prefix(mut self, prefix: &str) -> Self {
        self.path_prefix = prefix.to_string();
        self
    }

    /// HTTP/3 请求体大小上限
    pub fn max_body_size(mut self, max: usize) -> Self {
        self.max_body_size = Some(max);
        self
    }

    /// 服务级过滤器，在路由匹配之前执行。
    pub fn filter(mut self, filter: impl MiddleWareHandler) -> Self {
        self.filters.push(Arc::new(filter));
        self
    }

    /// 按 operation 选择性挂载中间件
    pub fn middleware(mut self, selector: &str, middleware: impl MiddleWareHandler) -> Self {
        self.selectors
            .push(Selector::new(selector, Arc::new(middleware)));
        self
    }

    pub fn request_decoder<F>(mut self, decoder: F) -> Self
    where
        F: Fn(&HeaderMap, &Bytes) -> Result<Value> + Send + Sync + 'static,
    {
        self.codecs.decode_request = Arc::new(decoder);
        self
    }

    /// 路径参数解码器：把路径参数转换为表单编码字符串，供 `Request::bind_vars` 使用。
    pub fn request_vars_decoder<F>(mut self, decoder: F) -> Self
    where
        F: Fn(&[(String, String)]) -> Result<String> + Send + Sync + 'static,
    {
        self.codecs.decode_vars = Arc::new(decoder);
        self
    }

    /// 查询串解码器，供 `Request::bind_query` 使用。
    pub fn request_query_decoder<F>(mut self, decoder: F) -> Self
    where
        F: Fn(&Uri) -> Result<String> + Send + Sync + 'static,
    {
        self.codecs.decode_query = Arc::new(decoder);
        self
    }

    pub fn response_encoder<F>(mut self, encoder: F) -> Self
    where
        F: Fn(&HeaderMap, &Value) -> Result<Response> + Send + Sync + 'static,
    {
        self.codecs.encode_response = Arc::new(encoder);
        self
    }

    pub fn error_encoder<F>(mut self, encoder: F) -> Self
    where
        F: Fn(&DuetError) -> Response + Send + Sync + 'static,
    {
        self.codecs.encode_error = Arc::new(encoder);
        self
    }

    /// 未匹配任何路由时的处理器
    pub fn not_found(mut self, handler: impl Handler) -> Self {
        self.not_found = Some(Arc::new(handler));
        self
    }

    /// 路径匹配但方法不匹配时的处理器
    pub fn method_not_allowed(mut self, handler: impl Handler) -> Self {
        self.method_not_allowed = Some(Arc::new(handler));
        self
    }

    pub fn build(self) -> Server {
        let mut router = Router::new(&self.path_prefix, self.strict_slash);
        if let Some(handler) = self.not_found {
            router.not_found = handler;
        }
        if let Some(handler) = self.method_not_allowed {
            router.method_not_allowed = handler;
        }

        #[cfg(feature = "http3")]
        let backend = if self.enable_http3 {
            info!("Server is HTTP3");
            Backend::Quic {
                socket: Mutex::new(None),
                endpoint: Mutex::new(self.http3_endpoint),
            }
        } else {
            Backend::Tcp {
                listener: Mutex::new(self.listener),
            }
        };
        #[cfg(not(feature = "http3"))]
        let backend = Backend::Tcp {
            listener: Mutex::new(self.listener),
        };

        Server {
            network: self.network,
            address: self.address,
            timeout: self.timeout,
            tls: self.tls,
            explicit_endpoint: self.endpoint,
            max_body_size: self.max_body_size,
            router,
            filters: self.filters,
            selectors: self.selectors,
            codecs: self.codecs,
            backend,
            resolved: OnceCell::new(),
            lifecycle: Lifecycle::default(),
        }
    }
}
