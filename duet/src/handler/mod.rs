mod handler_fn;

use async_trait::async_trait;
use std::sync::Arc;

use crate::{Request, Response, Result};

pub use handler_fn::HandlerFn;

#[async_trait]
pub trait Handler: Send + Sync + 'static {
    async fn call(&self, req: Request) -> Result<Response>;
}

#[async_trait]
impl<H: Handler + ?Sized> Handler for Arc<H> {
    async fn call(&self, req: Request) -> Result<Response> {
        (**self).call(req).await
    }
}
