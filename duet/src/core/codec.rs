use std::sync::Arc;

use bytes::Bytes;
use http::{HeaderMap, Uri};
use http::header::CONTENT_TYPE;
use serde::de::DeserializeOwned;
use serde_json::Value;

use crate::error::default_error_encoder;
use crate::{DuetError, Response, Result, StatusCode};

pub type DecodeRequestFn = Arc<dyn Fn(&HeaderMap, &Bytes) -> Result<Value> + Send + Sync>;
pub type DecodeVarsFn = Arc<dyn Fn(&[(String, String)]) -> Result<String> + Send + Sync>;
pub type DecodeQueryFn = Arc<dyn Fn(&Uri) -> Result<String> + Send + Sync>;
pub type EncodeResponseFn = Arc<dyn Fn(&HeaderMap, &Value) -> Result<Response> + Send + Sync>;
pub type EncodeErrorFn = Arc<dyn Fn(&DuetError) -> Response + Send + Sync>;

/// 请求解码、响应编码与错误编码的组合。
///
/// 服务端在请求管线中把它挂到 Context 上，`Request::decode`、`Request::bind_vars`、
/// `Request::bind_query` 与 `Request::reply` 由此读取。
///
/// 路径参数与查询串解码器输出 `application/x-www-form-urlencoded` 形式的字符串，
/// 再按表单规则反序列化为目标类型。
#[derive(Clone)]
pub struct Codecs {
    pub decode_vars: DecodeVarsFn,
    pub decode_query: DecodeQueryFn,
    pub decode_request: DecodeRequestFn,
    pub encode_response: EncodeResponseFn,
    pub encode_error: EncodeErrorFn,
}

impl Default for Codecs {
    fn default() -> Self {
        Self {
            decode_vars: Arc::new(default_vars_decoder),
            decode_query: Arc::new(default_query_decoder),
            decode_request: Arc::new(default_request_decoder),
            encode_response: Arc::new(default_response_encoder),
            encode_error: Arc::new(default_error_encoder),
        }
    }
}

impl std::fmt::Debug for Codecs {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str("Codecs")
    }
}

/// 默认路径参数解码：按表单编码拼接。
pub fn default_vars_decoder(params: &[(String, String)]) -> Result<String> {
    Ok(url::form_urlencoded::Serializer::new(String::new())
        .extend_pairs(params)
        .finish())
}

/// 默认查询串解码：原样使用 URI 中的查询串。
pub fn default_query_decoder(uri: &Uri) -> Result<String> {
    Ok(uri.query().unwrap_or_default().to_string())
}

/// 把表单编码的字符串反序列化为目标类型，失败时返回 400。
pub(crate) fn bind_form<T: DeserializeOwned>(form: &str) -> Result<T> {
    serde_html_form::from_str(form)
        .map_err(|e| DuetError::bad_request("CODEC", format!("bind form failed: {e}")))
}

/// 默认请求解码：空请求体解析为 `null`，其余内容按 JSON 解析。
pub fn default_request_decoder(headers: &HeaderMap, body: &Bytes) -> Result<Value> {
    if body.is_empty() {
        return Ok(Value::Null);
    }
    if let Some(content_type) = headers.get(CONTENT_TYPE).and_then(|v| v.to_str().ok()) {
        let is_json = content_type
            .parse::<mime::Mime>()
            .map(|m| m.subtype() == mime::JSON || m.suffix() == Some(mime::JSON))
            .unwrap_or(false);
        if !is_json {
            return Err(DuetError::business_error(
                StatusCode::UNSUPPORTED_MEDIA_TYPE,
                "CODEC",
                format!("unregister Content-Type: {content_type}"),
            ));
        }
    }
    Ok(serde_json::from_slice(body)?)
}

/// 默认响应编码：JSON。
pub fn default_response_encoder(_headers: &HeaderMap, value: &Value) -> Result<Response> {
    Ok(Response::json(value))
}
