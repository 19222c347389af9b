//! 请求级传输元数据。
//!
//! 每个请求在进入处理器之前都会获得一个 [`Transport`]，并挂在请求的 Context 上。
//! 无论请求来自 TCP 还是 QUIC，它的内容与构造方式都完全一致。

use std::net::SocketAddr;
use std::sync::Arc;

use http::header::HeaderName;
use http::{HeaderMap, HeaderValue, Method, Uri, Version};
use parking_lot::RwLock;

use crate::context::Context;

/// 可共享的请求头/响应头容器。
///
/// 克隆后的实例共享同一份数据：处理器写入的响应头会被请求管线合并进最终响应。
#[derive(Clone, Default)]
pub struct HeaderCarrier(Arc<RwLock<HeaderMap>>);

impl std::fmt::Debug for HeaderCarrier {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_tuple("HeaderCarrier").field(&*self.0.read()).finish()
    }
}

impl From<HeaderMap> for HeaderCarrier {
    fn from(headers: HeaderMap) -> Self {
        Self(Arc::new(RwLock::new(headers)))
    }
}

impl HeaderCarrier {
    pub fn new() -> Self {
        Self::default()
    }

    /// 读取第一个值；不存在或不是合法字符串时返回 `None`。
    pub fn get(&self, key: &str) -> Option<String> {
        self.0
            .read()
            .get(key)
            .and_then(|v| v.to_str().ok())
            .map(str::to_string)
    }

    /// 覆盖写入。非法的名称或值会被忽略并记录日志。
    pub fn set(&self, key: &str, value: &str) {
        if let Some((name, value)) = header_pair(key, value) {
            self.0.write().insert(name, value);
        }
    }

    /// 追加写入，保留已有的值。
    pub fn add(&self, key: &str, value: &str) {
        if let Some((name, value)) = header_pair(key, value) {
            self.0.write().append(name, value);
        }
    }

    pub fn keys(&self) -> Vec<String> {
        self.0.read().keys().map(|k| k.as_str().to_string()).collect()
    }

    pub fn values(&self, key: &str) -> Vec<String> {
        self.0
            .read()
            .get_all(key)
            .iter()
            .filter_map(|v| v.to_str().ok())
            .map(str::to_string)
            .collect()
    }

    /// 拷贝出当前内容
    pub fn snapshot(&self) -> HeaderMap {
        self.0.read().clone()
    }

    pub(crate) fn replace(&self, headers: HeaderMap) {
        *self.0.write() = headers;
    }
}

fn header_pair(key: &str, value: &str) -> Option<(HeaderName, HeaderValue)> {
    let name = match HeaderName::from_bytes(key.as_bytes()) {
        Ok(name) => name,
        Err(e) => {
            tracing::warn!(key, "invalid header name: {e}");
            return None;
        }
    };
    match HeaderValue::from_str(value) {
        Ok(value) => Some((name, value)),
        Err(e) => {
            tracing::warn!(key, "invalid header value: {e}");
            None
        }
    }
}

/// Transport 请求元数据
#[derive(Clone, Debug)]
pub struct Transport {
    pub(crate) endpoint: String,
    pub(crate) operation: String,
    pub(crate) path_template: String,
    pub(crate) request_header: HeaderCarrier,
    pub(crate) reply_header: HeaderCarrier,
    pub(crate) method: Method,
    pub(crate) uri: Uri,
    pub(crate) version: Version,
    pub(crate) remote: Option<SocketAddr>,
}

impl Transport {
    /// 传输协议名
    pub fn kind(&self) -> &'static str {
        "http"
    }

    /// 服务对外暴露的地址，未解析时为空字符串。
    pub fn endpoint(&self) -> &str {
        &self.endpoint
    }

    /// 用于中间件选择与日志的操作名，等于命中的路径模板。
    pub fn operation(&self) -> &str {
        &self.operation
    }

    pub fn path_template(&self) -> &str {
        &self.path_template
    }

    pub fn request_header(&self) -> &HeaderCarrier {
        &self.request_header
    }

    pub fn reply_header(&self) -> &HeaderCarrier {
        &self.reply_header
    }

    pub fn method(&self) -> &Method {
        &self.method
    }

    pub fn uri(&self) -> &Uri {
        &self.uri
    }

    pub fn version(&self) -> Version {
        self.version
    }

    pub fn remote(&self) -> Option<SocketAddr> {
        self.remote
    }

    /// 从 Context 中取出 Transport
    pub fn from_context(ctx: &Context) -> Option<&Transport> {
        ctx.value::<Transport>()
    }
}
