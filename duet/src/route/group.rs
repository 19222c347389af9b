use std::sync::Arc;

use http::Method;

use super::Router;
use super::template::join;
use crate::{Handler, MiddleWareHandler, Next};

/// 带公共前缀与过滤器的路由分组
///
/// ```
/// use duet::prelude::*;
///
/// let mut server = Server::builder().build();
/// server
///     .route("/v1")
///     .get("/users/{id}", HandlerFn::new(|req: Request| async move {
///         Ok(req.param("id").unwrap_or_default().to_string())
///     }));
/// ```
pub struct RouteGroup<'a> {
    router: &'a mut Router,
    prefix: String,
    filters: Vec<Arc<dyn MiddleWareHandler>>,
}

impl<'a> RouteGroup<'a> {
    pub(crate) fn new(router: &'a mut Router, prefix: &str) -> Self {
        Self {
            router,
            prefix: prefix.to_string(),
            filters: Vec::new(),
        }
    }

    /// 追加分组过滤器，只作用于之后在本分组注册的路由。
    pub fn filter(mut self, filter: impl MiddleWareHandler) -> Self {
        self.filters.push(Arc::new(filter));
        self
    }

    /// 嵌套分组，继承前缀与过滤器
    pub fn group(&mut self, prefix: &str) -> RouteGroup<'_> {
        RouteGroup {
            prefix: join(&self.prefix, prefix),
            filters: self.filters.clone(),
            router: &mut *self.router,
        }
    }

    pub fn handle(&mut self, method: Method, path: &str, handler: impl Handler) -> &mut Self {
        let handler: Arc<dyn Handler> = if self.filters.is_empty() {
            Arc::new(handler)
        } else {
            Arc::new(Next::build_from_slice(Arc::new(handler), &self.filters))
        };
        self.router
            .add_template(Some(vec![method]), &join(&self.prefix, path), handler);
        self
    }

    pub fn get(&mut self, path: &str, handler: impl Handler) -> &mut Self {
        self.handle(Method::GET, path, handler)
    }
    pub fn head(&mut self, path: &str, handler: impl Handler) -> &mut Self {
        self.handle(Method::HEAD, path, handler)
    }
    pub fn post(&mut self, path: &str, handler: impl Handler) -> &mut Self {
        self.handle(Method::POST, path, handler)
    }
    pub fn put(&mut self, path: &str, handler: impl Handler) -> &mut Self {
        self.handle(Method::PUT, path, handler)
    }
    pub fn patch(&mut self, path: &str, handler: impl Handler) -> &mut Self {
        self.handle(Method::PATCH, path, handler)
    }
    pub fn delete(&mut self, path: &str, handler: impl Handler) -> &mut Self {
        self.handle(Method::DELETE, path, handler)
    }
    pub fn connect(&mut self, path: &str, handler: impl Handler) -> &mut Self {
        self.handle(Method::CONNECT, path, handler)
    }
    pub fn options(&mut self, path: &str, handler: impl Handler) -> &mut Self {
        self.handle(Method::OPTIONS, path, handler)
    }
    pub fn trace(&mut self, path: &str, handler: impl Handler) -> &mut Self {
        self.handle(Method::TRACE, path, handler)
    }
}
