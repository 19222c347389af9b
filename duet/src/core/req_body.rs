use std::fmt;

use bytes::Bytes;
use http_body_util::BodyExt;
use hyper::body::Incoming;

use crate::{DuetError, Result};

/// 请求体
///
/// TCP 连接上的请求体以 hyper 的 `Incoming` 流式读取；HTTP/3 请求体在进入路由前已读完，
/// 以 `Once` 形式交付。
pub enum ReqBody {
    /// Empty body.
    Empty,
    /// Once bytes body.
    Once(Bytes),
    /// Incoming default body.
    Incoming(Incoming),
}

impl fmt::Debug for ReqBody {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ReqBody::Empty => f.write_str("Empty"),
            ReqBody::Once(bytes) => f.debug_tuple("Once").field(bytes).finish(),
            ReqBody::Incoming(_) => f.write_str("Incoming"),
        }
    }
}

impl From<Incoming> for ReqBody {
    fn from(incoming: Incoming) -> Self {
        Self::Incoming(incoming)
    }
}

impl From<Bytes> for ReqBody {
    fn from(bytes: Bytes) -> Self {
        if bytes.is_empty() {
            Self::Empty
        } else {
            Self::Once(bytes)
        }
    }
}

impl From<()> for ReqBody {
    fn from(_: ()) -> Self {
        Self::Empty
    }
}

impl From<&'static str> for ReqBody {
    fn from(value: &'static str) -> Self {
        Bytes::from_static(value.as_bytes()).into()
    }
}

impl ReqBody {
    /// 读取完整请求体
    pub async fn collect_bytes(self) -> Result<Bytes> {
        match self {
            ReqBody::Empty => Ok(Bytes::new()),
            ReqBody::Once(bytes) => Ok(bytes),
            ReqBody::Incoming(body) => Ok(body
                .collect()
                .await
                .map_err(|e| DuetError::BodyError(e.to_string()))?
                .to_bytes()),
        }
    }
}
