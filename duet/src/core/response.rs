use std::fmt;
use std::fmt::{Display, Formatter};

use bytes::Bytes;
use http::header::{CONTENT_TYPE, LOCATION};
use http::{HeaderMap, HeaderValue};
use http_body_util::Full;
use serde::Serialize;
use serde_json::Value;

use crate::StatusCode;

/// 响应体
/// ```
/// use duet::Response;
/// let res = Response::empty();
/// assert_eq!(res.status(), duet::StatusCode::OK);
/// ```
#[derive(Clone)]
pub struct Response {
    pub(crate) status: StatusCode,
    pub(crate) headers: HeaderMap,
    pub(crate) body: Bytes,
}

impl fmt::Debug for Response {
    #[inline]
    fn fmt(&self, f: &mut Formatter) -> fmt::Result {
        writeln!(f, "{} {:?}", self.status, self.headers)
    }
}

impl Display for Response {
    #[inline]
    fn fmt(&self, f: &mut Formatter) -> fmt::Result {
        fmt::Debug::fmt(self, f)
    }
}

impl Default for Response {
    fn default() -> Self {
        Self::empty()
    }
}

impl Response {
    /// 创建空响应体
    pub fn empty() -> Self {
        Self {
            status: StatusCode::OK,
            headers: HeaderMap::new(),
            body: Bytes::new(),
        }
    }
    #[inline]
    /// 生成文本响应
    pub fn text(text: &str) -> Self {
        let mut res = Self::empty();
        res.set_content_type(mime::TEXT_PLAIN_UTF_8.as_ref());
        res.body = Bytes::copy_from_slice(text.as_bytes());
        res
    }
    #[inline]
    /// 生成json响应，序列化失败时返回 500。
    pub fn json<T: Serialize>(json: &T) -> Self {
        match serde_json::to_vec(json) {
            Ok(body) => {
                let mut res = Self::empty();
                res.set_content_type(mime::APPLICATION_JSON.as_ref());
                res.body = body.into();
                res
            }
            Err(e) => {
                tracing::error!("failed to serialize response: {e}");
                Self::text(&e.to_string()).with_status(StatusCode::INTERNAL_SERVER_ERROR)
            }
        }
    }
    /// 生成 301 重定向响应
    pub fn redirect(location: &str) -> Self {
        let mut res = Self::empty().with_status(StatusCode::MOVED_PERMANENTLY);
        match HeaderValue::from_str(location) {
            Ok(value) => {
                res.headers.insert(LOCATION, value);
            }
            Err(e) => {
                tracing::error!("invalid redirect location {location:?}: {e}");
                res.set_status(StatusCode::INTERNAL_SERVER_ERROR);
            }
        }
        res
    }

    #[inline]
    pub fn status(&self) -> StatusCode {
        self.status
    }
    /// 设置响应状态
    #[inline]
    pub fn set_status(&mut self, status: StatusCode) {
        self.status = status;
    }
    /// 包含响应状态
    #[inline]
    pub fn with_status(mut self, status: StatusCode) -> Self {
        self.status = status;
        self
    }
    #[inline]
    pub fn headers(&self) -> &HeaderMap {
        &self.headers
    }
    #[inline]
    pub fn headers_mut(&mut self) -> &mut HeaderMap {
        &mut self.headers
    }
    /// 包含响应头
    pub fn with_header(mut self, key: http::HeaderName, value: HeaderValue) -> Self {
        self.headers.insert(key, value);
        self
    }
    #[inline]
    pub fn body(&self) -> &Bytes {
        &self.body
    }
    /// 设置响应body
    #[inline]
    pub fn set_body(&mut self, body: impl Into<Bytes>) {
        self.body = body.into();
    }

    fn set_content_type(&mut self, value: &'static str) {
        self.headers
            .insert(CONTENT_TYPE, HeaderValue::from_static(value));
    }

    /// 转换为 hyper 可写出的响应
    pub fn into_http(self) -> http::Response<Full<Bytes>> {
        let mut res = http::Response::new(Full::new(self.body));
        *res.status_mut() = self.status;
        *res.headers_mut() = self.headers;
        res
    }

    /// 拆分为响应头部分与响应体，HTTP/3 写出时使用。
    pub fn into_parts(self) -> (http::Response<()>, Bytes) {
        let mut res = http::Response::new(());
        *res.status_mut() = self.status;
        *res.headers_mut() = self.headers;
        (res, self.body)
    }
}

impl From<&str> for Response {
    fn from(value: &str) -> Self {
        Self::text(value)
    }
}

impl From<String> for Response {
    fn from(value: String) -> Self {
        Self::text(&value)
    }
}

impl From<Value> for Response {
    fn from(value: Value) -> Self {
        Self::json(&value)
    }
}

impl From<()> for Response {
    fn from(_: ()) -> Self {
        Self::empty()
    }
}

impl From<StatusCode> for Response {
    fn from(status: StatusCode) -> Self {
        Self::empty().with_status(status)
    }
}
