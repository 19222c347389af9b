pub use crate::{
    Context, DuetError, Handler, HandlerFn, Method, MiddleWareHandler, Next, Request, Response,
    Result, RouteGroup, Server, ServerConfig, StatusCode, TlsConfig, Transport,
};
pub use async_trait::async_trait;
