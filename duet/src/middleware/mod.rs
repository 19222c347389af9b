pub(crate) mod next;
pub(crate) mod selector;

use async_trait::async_trait;

use crate::{Next, Request, Response, Result};

/// 中间件：拿到请求与后续调用链，决定是否以及如何继续调用。
#[async_trait]
pub trait MiddleWareHandler: Send + Sync + 'static {
    async fn handle(&self, req: Request, next: &Next) -> Result<Response>;
}
