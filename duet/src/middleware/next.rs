use crate::{Handler, MiddleWareHandler, Request, Response, Result};
use async_trait::async_trait;
use std::sync::Arc;

/// 洋葱模型的调用链：依次经过中间件，最后到达终点处理器。
#[derive(Clone)]
pub enum Next {
    Middleware(Arc<dyn MiddleWareHandler>, Arc<Next>),
    EndPoint(Arc<dyn Handler>),
}

impl Next {
    pub fn build_from_slice(
        endpoint: Arc<dyn Handler>,
        middlewares: &[Arc<dyn MiddleWareHandler>],
    ) -> Self {
        middlewares
            .iter()
            .rev()
            .fold(Next::EndPoint(endpoint), |next, mw| {
                Next::Middleware(Arc::clone(mw), Arc::new(next))
            })
    }
}

#[async_trait]
impl Handler for Next {
    async fn call(&self, req: Request) -> Result<Response> {
        match self {
            Next::Middleware(mw, next) => mw.handle(req, next).await,
            Next::EndPoint(ep) => ep.call(req).await,
        }
    }
}
