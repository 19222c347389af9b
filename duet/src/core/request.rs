use std::net::SocketAddr;

use bytes::Bytes;
use http::request::Parts;
use http::{Extensions, HeaderMap, HeaderValue, Method, Uri, Version};
use serde::Serialize;
use serde::de::DeserializeOwned;

use crate::context::Context;
use crate::core::codec::{Codecs, bind_form};
use crate::core::req_body::ReqBody;
use crate::route::MatchedRoute;
use crate::transport::Transport;
use crate::{Response, Result};

/// 请求体
/// ```
/// use duet::Request;
/// let req = Request::empty();
/// assert_eq!(req.uri().path(), "/");
/// ```
#[derive(Debug)]
pub struct Request {
    parts: Parts,
    body: ReqBody,
    remote: Option<SocketAddr>,
    context: Context,
}

impl Default for Request {
    fn default() -> Self {
        Self::empty()
    }
}

impl Request {
    /// 创建空请求体
    pub fn empty() -> Self {
        let (parts, _) = http::Request::new(()).into_parts();
        Self::from_parts(parts, ReqBody::Empty)
    }

    /// 从请求体创建请求
    #[inline]
    pub fn from_parts(parts: Parts, body: ReqBody) -> Self {
        Self {
            parts,
            body,
            remote: None,
            context: Context::background(),
        }
    }

    /// 从 `http::Request` 转换，主要用于测试与自定义传输。
    pub fn from_http<B: Into<ReqBody>>(req: http::Request<B>) -> Self {
        let (parts, body) = req.into_parts();
        Self::from_parts(parts, body.into())
    }

    #[inline]
    pub fn remote(&self) -> Option<SocketAddr> {
        self.remote
    }

    #[inline]
    pub fn set_remote(&mut self, remote: SocketAddr) {
        self.remote = Some(remote);
    }

    /// 获取请求方法
    #[inline]
    pub fn method(&self) -> &Method {
        &self.parts.method
    }
    #[inline]
    pub fn uri(&self) -> &Uri {
        &self.parts.uri
    }
    #[inline]
    pub fn version(&self) -> Version {
        self.parts.version
    }
    #[inline]
    pub fn headers(&self) -> &HeaderMap<HeaderValue> {
        &self.parts.headers
    }
    #[inline]
    pub fn headers_mut(&mut self) -> &mut HeaderMap<HeaderValue> {
        &mut self.parts.headers
    }
    #[inline]
    pub fn extensions(&self) -> &Extensions {
        &self.parts.extensions
    }
    #[inline]
    pub fn extensions_mut(&mut self) -> &mut Extensions {
        &mut self.parts.extensions
    }

    /// 请求所属的 Context
    #[inline]
    pub fn context(&self) -> &Context {
        &self.context
    }
    #[inline]
    pub fn set_context(&mut self, context: Context) {
        self.context = context;
    }

    /// 当前请求的传输层元数据；仅在经过服务端请求管线后存在。
    #[inline]
    pub fn transport(&self) -> Option<&Transport> {
        Transport::from_context(&self.context)
    }

    /// 命中路由的路径模板，例如 `/index/{id}`。
    pub fn path_template(&self) -> Option<&str> {
        self.extensions()
            .get::<MatchedRoute>()
            .and_then(|m| m.template())
    }

    /// 读取路径参数
    pub fn param(&self, key: &str) -> Option<&str> {
        self.extensions()
            .get::<MatchedRoute>()
            .and_then(|m| m.param(key))
    }

    /// 把路径参数绑定为目标类型，经由服务端配置的路径参数解码器。
    ///
    /// ```
    /// use duet::Request;
    /// use std::collections::HashMap;
    /// let req = Request::empty();
    /// let vars: HashMap<String, String> = req.bind_vars().unwrap();
    /// assert!(vars.is_empty());
    /// ```
    pub fn bind_vars<T: DeserializeOwned>(&self) -> Result<T> {
        let params = self
            .extensions()
            .get::<MatchedRoute>()
            .map(|m| m.params())
            .unwrap_or_default();
        let form = (self.codecs().decode_vars)(params)?;
        bind_form(&form)
    }

    /// 把查询串绑定为目标类型，经由服务端配置的查询串解码器。
    pub fn bind_query<T: DeserializeOwned>(&self) -> Result<T> {
        let form = (self.codecs().decode_query)(self.uri())?;
        bind_form(&form)
    }

    pub fn replace_body(&mut self, body: ReqBody) -> ReqBody {
        std::mem::replace(&mut self.body, body)
    }

    pub fn take_body(&mut self) -> ReqBody {
        self.replace_body(ReqBody::Empty)
    }

    /// 读取完整请求体
    pub async fn bytes(&mut self) -> Result<Bytes> {
        self.take_body().collect_bytes().await
    }

    /// 使用服务端配置的请求解码器解析请求体。
    pub async fn decode<T: DeserializeOwned>(&mut self) -> Result<T> {
        let codecs = self.codecs();
        let body = self.bytes().await?;
        let value = (codecs.decode_request)(self.headers(), &body)?;
        Ok(serde_json::from_value(value)?)
    }

    /// 使用服务端配置的响应编码器生成响应。
    pub fn reply<T: Serialize>(&self, value: &T) -> Result<Response> {
        let codecs = self.codecs();
        let value = serde_json::to_value(value)?;
        (codecs.encode_response)(self.headers(), &value)
    }

    fn codecs(&self) -> Codecs {
        self.context.value::<Codecs>().cloned().unwrap_or_default()
    }
}
