use async_trait::async_trait;
use std::future::Future;
use std::sync::Arc;

use crate::{Handler, Request, Response, Result};

/// 闭包处理器：`async fn(Request) -> Result<T>`，`T` 可转换为响应。
pub struct HandlerFn<F> {
    func: F,
}

impl<F> HandlerFn<F> {
    pub fn new<Fut, T>(func: F) -> Self
    where
        F: Fn(Request) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<T>> + Send + 'static,
        T: Into<Response> + Send + 'static,
    {
        Self { func }
    }

    pub fn arc(self) -> Arc<Self> {
        Arc::new(self)
    }
}

#[async_trait]
impl<F, Fut, T> Handler for HandlerFn<F>
where
    F: Fn(Request) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = Result<T>> + Send + 'static,
    T: Into<Response> + Send + 'static,
{
    async fn call(&self, req: Request) -> Result<Response> {
        (self.func)(req).await.map(Into::into)
    }
}
