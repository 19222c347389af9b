use crate::{Response, StatusCode};
use serde::Serialize;
use std::io;
use std::sync::Arc;
use thiserror::Error;

/// BoxedError
pub type BoxedError = Box<dyn std::error::Error + Send + Sync>;

/// DuetError 是请求处理链路上的错误类型，最终由错误编码器转换为响应。
#[derive(Error, Debug)]
pub enum DuetError {
    /// IO 错误
    #[error("io error: {0}")]
    IOError(#[from] io::Error),
    /// 序列化/反序列化 错误
    #[error("serde_json error `{0}`")]
    SerdeJsonError(#[from] serde_json::Error),
    /// 请求体读取错误
    #[error("request body error: {0}")]
    BodyError(String),
    /// anyhow错误
    #[error("{0}")]
    AnyhowError(#[from] anyhow::Error),
    /// 业务错误
    #[error("business error: {reason}: {message} ({code})")]
    BusinessError {
        /// 状态码
        code: StatusCode,
        /// 错误原因（机器可读）
        reason: String,
        /// 错误信息
        message: String,
    },
    #[error("not found")]
    NotFound,
}

pub type DuetResult<T> = Result<T, DuetError>;

impl From<(StatusCode, String)> for DuetError {
    fn from(value: (StatusCode, String)) -> Self {
        Self::business_error(value.0, "", value.1)
    }
}

impl From<(u16, String)> for DuetError {
    fn from(value: (u16, String)) -> Self {
        let code = StatusCode::from_u16(value.0).unwrap_or(StatusCode::INTERNAL_SERVER_ERROR);
        Self::business_error(code, "", value.1)
    }
}

impl From<String> for DuetError {
    fn from(value: String) -> Self {
        Self::business_error(StatusCode::INTERNAL_SERVER_ERROR, "", value)
    }
}

impl From<BoxedError> for DuetError {
    fn from(value: BoxedError) -> Self {
        Self::business_error(StatusCode::INTERNAL_SERVER_ERROR, "", value.to_string())
    }
}

impl DuetError {
    pub fn business_error<R: Into<String>, M: Into<String>>(
        code: StatusCode,
        reason: R,
        message: M,
    ) -> Self {
        Self::BusinessError {
            code,
            reason: reason.into(),
            message: message.into(),
        }
    }
    pub fn bad_request<R: Into<String>, M: Into<String>>(reason: R, message: M) -> Self {
        Self::business_error(StatusCode::BAD_REQUEST, reason, message)
    }
    pub fn unauthorized<R: Into<String>, M: Into<String>>(reason: R, message: M) -> Self {
        Self::business_error(StatusCode::UNAUTHORIZED, reason, message)
    }
    pub fn status(&self) -> StatusCode {
        match self {
            Self::BusinessError { code, .. } => *code,
            Self::SerdeJsonError(_) => StatusCode::UNPROCESSABLE_ENTITY,
            Self::BodyError(_) => StatusCode::BAD_REQUEST,
            Self::NotFound => StatusCode::NOT_FOUND,
            _ => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
    pub fn reason(&self) -> &str {
        match self {
            Self::BusinessError { reason, .. } => reason,
            Self::NotFound => "NOT_FOUND",
            _ => "",
        }
    }
    pub fn message(&self) -> String {
        match self {
            Self::BusinessError { message, .. } => message.clone(),
            Self::SerdeJsonError(e) => e.to_string(),
            _ => self.to_string(),
        }
    }
}

#[derive(Serialize)]
struct ErrorBody<'a> {
    code: u16,
    reason: &'a str,
    message: String,
}

/// 默认错误编码：`{"code": .., "reason": .., "message": ..}`。
pub fn default_error_encoder(err: &DuetError) -> Response {
    let body = ErrorBody {
        code: err.status().as_u16(),
        reason: err.reason(),
        message: err.message(),
    };
    let mut res = Response::json(&body);
    res.set_status(err.status());
    res
}

impl From<DuetError> for Response {
    fn from(value: DuetError) -> Self {
        default_error_encoder(&value)
    }
}

/// Context 结束的原因。
#[derive(Error, Debug, Clone, Copy, PartialEq, Eq)]
pub enum ContextError {
    #[error("context canceled")]
    Canceled,
    #[error("context deadline exceeded")]
    DeadlineExceeded,
}

/// 服务生命周期（监听、启动、关停）上的错误。
///
/// 需要 `Clone`：监听失败会被缓存在 Server 上，之后每次调用都返回同一个错误。
#[derive(Error, Debug, Clone)]
pub enum ServerError {
    #[error("failed to listen on {address}: {source}")]
    Listen {
        address: String,
        #[source]
        source: Arc<io::Error>,
    },
    #[error("failed to resolve endpoint for {address}: {reason}")]
    Endpoint { address: String, reason: String },
    #[error("[HTTP3] TLS is required")]
    TlsRequired,
    #[error("invalid tls config: {0}")]
    Tls(String),
    #[error("server is already serving")]
    AlreadyStarted,
    #[error("serve failed: {0}")]
    Serve(#[source] Arc<io::Error>),
    #[error("shutdown interrupted: {0}")]
    Shutdown(#[from] ContextError),
}

impl ServerError {
    pub(crate) fn listen(address: impl Into<String>, source: io::Error) -> Self {
        Self::Listen {
            address: address.into(),
            source: Arc::new(source),
        }
    }
    pub(crate) fn serve(source: io::Error) -> Self {
        Self::Serve(Arc::new(source))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::Value;

    #[test]
    fn test_from_io_error() {
        let io_err = io::Error::new(io::ErrorKind::NotFound, "file not found");
        let err: DuetError = io_err.into();
        assert!(matches!(err, DuetError::IOError(_)));
        assert_eq!(err.status(), StatusCode::INTERNAL_SERVER_ERROR);
    }

    #[test]
    fn test_from_serde_json_error() {
        let json_err = serde_json::from_str::<Value>("invalid json").unwrap_err();
        let err: DuetError = json_err.into();
        assert_eq!(err.status(), StatusCode::UNPROCESSABLE_ENTITY);
    }

    #[test]
    fn test_from_status_code_string_tuple() {
        let err: DuetError = (StatusCode::BAD_REQUEST, "Invalid input".to_string()).into();
        assert_eq!(err.status(), StatusCode::BAD_REQUEST);
        assert_eq!(err.message(), "Invalid input");
    }

    #[test]
    fn test_from_u16_tuple_falls_back_on_invalid_code() {
        let err: DuetError = (1000u16, "weird".to_string()).into();
        assert_eq!(err.status(), StatusCode::INTERNAL_SERVER_ERROR);
    }

    #[test]
    fn test_bad_request_encodes_reason() {
        let res: Response = DuetError::bad_request("xxx", "zzz").into();
        assert_eq!(res.status(), StatusCode::BAD_REQUEST);
        let body: Value = serde_json::from_slice(res.body()).unwrap();
        assert_eq!(body["code"], 400);
        assert_eq!(body["reason"], "xxx");
        assert_eq!(body["message"], "zzz");
    }

    #[test]
    fn test_not_found_encodes_reason() {
        let res: Response = DuetError::NotFound.into();
        assert_eq!(res.status(), StatusCode::NOT_FOUND);
        let body: Value = serde_json::from_slice(res.body()).unwrap();
        assert_eq!(body["reason"], "NOT_FOUND");
        assert_eq!(body["message"], "not found");
    }

    #[test]
    fn test_server_error_is_clone_and_keeps_source() {
        let err = ServerError::listen(
            "127.0.0.1:1",
            io::Error::new(io::ErrorKind::AddrInUse, "in use"),
        );
        let cloned = err.clone();
        assert_eq!(err.to_string(), cloned.to_string());
        assert!(std::error::Error::source(&cloned).is_some());
    }

    #[test]
    fn test_tls_required_message() {
        assert_eq!(ServerError::TlsRequired.to_string(), "[HTTP3] TLS is required");
    }
}
