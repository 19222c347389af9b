/// The `duet` library.
mod context;
mod core;
mod error;
mod handler;
pub mod middleware;
pub mod prelude;
mod route;
mod server;
mod transport;

pub use crate::context::Context;
pub use crate::core::codec::{
    Codecs, DecodeQueryFn, DecodeRequestFn, DecodeVarsFn, EncodeErrorFn, EncodeResponseFn,
    default_query_decoder, default_request_decoder, default_response_encoder,
    default_vars_decoder,
};
pub use crate::core::{req_body::ReqBody, request::Request, response::Response};
pub use crate::middleware::{MiddleWareHandler, next::Next};
pub use crate::route::{RouteGroup, RouteInfo};
pub use crate::server::config::ServerConfig;
pub use crate::server::lifecycle::State;
pub use crate::server::tls::{TlsConfig, TlsConfigBuilder};
pub use crate::server::{Server, ServerBuilder};
pub use crate::transport::{HeaderCarrier, Transport};
pub use error::DuetResult as Result;
pub use error::{BoxedError, ContextError, DuetError, ServerError, default_error_encoder};
pub use handler::{Handler, HandlerFn};
pub use hyper::{Method, StatusCode, header};
