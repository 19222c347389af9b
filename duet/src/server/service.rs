use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use http::HeaderMap;

use crate::core::codec::Codecs;
use crate::middleware::selector::{Selector, select};
use crate::route::{RouteMatch, Router};
use crate::transport::{HeaderCarrier, Transport};
use crate::{DuetError, Handler, MiddleWareHandler, Next, Request, Response, Result};

/// 两种传输共用的请求入口：过滤器 → 路由匹配 → 请求管线 → 处理器。
pub(crate) struct ServeHandler {
    entry: Next,
    codecs: Codecs,
}

impl ServeHandler {
    pub(crate) fn new(
        router: Router,
        filters: &[Arc<dyn MiddleWareHandler>],
        selectors: Vec<Selector>,
        codecs: Codecs,
        timeout: Duration,
        endpoint: String,
    ) -> Self {
        let dispatch = Dispatch {
            router,
            selectors,
            codecs: codecs.clone(),
            timeout,
            endpoint,
        };
        Self {
            entry: Next::build_from_slice(Arc::new(dispatch), filters),
            codecs,
        }
    }

    pub(crate) async fn dispatch(&self, req: Request) -> Response {
        match self.entry.call(req).await {
            Ok(res) => res,
            Err(err) => self.encode_error(&err),
        }
    }

    pub(crate) fn encode_error(&self, err: &DuetError) -> Response {
        (self.codecs.encode_error)(err)
    }
}

#[async_trait]
impl Handler for ServeHandler {
    async fn call(&self, req: Request) -> Result<Response> {
        Ok(self.dispatch(req).await)
    }
}

struct Dispatch {
    router: Router,
    selectors: Vec<Selector>,
    codecs: Codecs,
    timeout: Duration,
    endpoint: String,
}

struct Redirect(String);

/// 请求头同步：调用处理器前，把中间件经由 Transport 写入的请求头合并回请求，
/// 再用合并结果刷新载体，两种视图在处理器看来一致。
struct SyncRequestHeaders {
    target: Arc<dyn Handler>,
    carrier: HeaderCarrier,
    original: HeaderMap,
}

#[async_trait]
impl Handler for SyncRequestHeaders {
    async fn call(&self, mut req: Request) -> Result<Response> {
        let current = self.carrier.snapshot();
        for name in current.keys() {
            if current
                .get_all(name)
                .iter()
                .eq(self.original.get_all(name).iter())
            {
                continue;
            }
            let headers = req.headers_mut();
            headers.remove(name);
            for value in current.get_all(name) {
                headers.append(name.clone(), value.clone());
            }
        }
        self.carrier.replace(req.headers().clone());
        self.target.call(req).await
    }
}

#[async_trait]
impl Handler for Redirect {
    async fn call(&self, _req: Request) -> Result<Response> {
        Ok(Response::redirect(&self.0))
    }
}

#[async_trait]
impl Handler for Dispatch {
    async fn call(&self, mut req: Request) -> Result<Response> {
        let target: Arc<dyn Handler> = match self.router.find(&req) {
            RouteMatch::Found(entry, matched) => {
                req.extensions_mut().insert(matched);
                Arc::clone(&entry.handler)
            }
            RouteMatch::Redirect(to) => Arc::new(Redirect(to)),
            RouteMatch::MethodNotAllowed => Arc::clone(&self.router.method_not_allowed),
            RouteMatch::NotFound => Arc::clone(&self.router.not_found),
        };
        Ok(self.pipeline(req, target).await)
    }
}

impl Dispatch {
    /// 请求管线：派生带超时的子 Context，注入 Transport，再调用处理器。
    ///
    /// 子 Context 的守卫在函数返回、出错或 future 被丢弃时都会取消子 Context。
    async fn pipeline(&self, mut req: Request, target: Arc<dyn Handler>) -> Response {
        let (ctx, _guard) = if self.timeout > Duration::ZERO {
            req.context().with_timeout(self.timeout)
        } else {
            req.context().with_cancel()
        };

        let path_template = req
            .path_template()
            .map(str::to_string)
            .unwrap_or_else(|| req.uri().path().to_string());
        let original = req.headers().clone();
        let request_header = HeaderCarrier::from(original.clone());
        let reply_header = HeaderCarrier::new();
        let transport = Transport {
            endpoint: self.endpoint.clone(),
            operation: path_template.clone(),
            path_template,
            request_header: request_header.clone(),
            reply_header: reply_header.clone(),
            method: req.method().clone(),
            uri: req.uri().clone(),
            version: req.version(),
            remote: req.remote(),
        };
        let middlewares = select(&self.selectors, transport.operation());
        req.set_context(ctx.with_value(transport).with_value(self.codecs.clone()));

        let result = if middlewares.is_empty() {
            target.call(req).await
        } else {
            let endpoint = Arc::new(SyncRequestHeaders {
                target,
                carrier: request_header,
                original,
            });
            Next::build_from_slice(endpoint, &middlewares).call(req).await
        };
        let mut res = result.unwrap_or_else(|err| (self.codecs.encode_error)(&err));

        let reply = reply_header.snapshot();
        for name in reply.keys() {
            if res.headers().contains_key(name) {
                continue;
            }
            for value in reply.get_all(name) {
                res.headers_mut().append(name.clone(), value.clone());
            }
        }
        res
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::context::Context;
    use crate::{HandlerFn, StatusCode};
    use http::Method;
    use serde_json::Value;

    fn request(method: Method, uri: &str) -> Request {
        Request::from_http(
            http::Request::builder()
                .method(method)
                .uri(uri)
                .body(())
                .unwrap(),
        )
    }

    fn operation_echo() -> Arc<dyn Handler> {
        Arc::new(HandlerFn::new(|req: Request| async move {
            let transport = req.transport().ok_or_else(|| {
                DuetError::business_error(StatusCode::INTERNAL_SERVER_ERROR, "", "no transport")
            })?;
            transport.reply_header().set("x-operation", transport.operation());
            Ok(transport.operation().to_string())
        }))
    }

    fn serve_handler(router: Router, timeout: Duration) -> ServeHandler {
        ServeHandler::new(
            router,
            &[],
            Vec::new(),
            Codecs::default(),
            timeout,
            "http://127.0.0.1:8000".into(),
        )
    }

    #[tokio::test]
    async fn test_operation_is_path_template() {
        let mut router = Router::default();
        router.handle("/index/{id}", operation_echo());
        let handler = serve_handler(router, Duration::from_secs(1));
        let res = handler.dispatch(request(Method::GET, "/index/42")).await;
        assert_eq!(res.status(), StatusCode::OK);
        assert_eq!(res.body().as_ref(), b"/index/{id}");
        assert_eq!(res.headers()["x-operation"], "/index/{id}");
    }

    #[tokio::test]
    async fn test_not_found_still_gets_transport() {
        let mut router = Router::default();
        router.not_found = operation_echo();
        let handler = serve_handler(router, Duration::from_secs(1));
        let res = handler.dispatch(request(Method::GET, "/missing/7")).await;
        assert_eq!(res.body().as_ref(), b"/missing/7");
    }

    #[tokio::test]
    async fn test_default_fallbacks_are_404() {
        let mut router = Router::default();
        let mut group = crate::RouteGroup::new(&mut router, "");
        group.get("/only-get", operation_echo());
        let handler = serve_handler(router, Duration::from_secs(1));

        let res = handler.dispatch(request(Method::GET, "/missing")).await;
        assert_eq!(res.status(), StatusCode::NOT_FOUND);
        let body: Value = serde_json::from_slice(res.body()).unwrap();
        assert_eq!(body["code"], 404);

        let res = handler.dispatch(request(Method::POST, "/only-get")).await;
        assert_eq!(res.status(), StatusCode::NOT_FOUND);
    }

    #[tokio::test]
    async fn test_redirect_on_trailing_slash() {
        let mut router = Router::default();
        router.handle("/index", operation_echo());
        let handler = serve_handler(router, Duration::from_secs(1));
        let res = handler.dispatch(request(Method::GET, "/index/")).await;
        assert_eq!(res.status(), StatusCode::MOVED_PERMANENTLY);
        assert_eq!(res.headers()[http::header::LOCATION], "/index");
    }

    #[tokio::test]
    async fn test_reply_header_does_not_override_response() {
        let mut router = Router::default();
        router.handle(
            "/index",
            Arc::new(HandlerFn::new(|req: Request| async move {
                if let Some(transport) = req.transport() {
                    transport.reply_header().set("x-a", "carrier");
                    transport.reply_header().set("x-b", "carrier");
                }
                Ok(Response::text("ok").with_header(
                    http::HeaderName::from_static("x-a"),
                    http::HeaderValue::from_static("handler"),
                ))
            })),
        );
        let handler = serve_handler(router, Duration::from_secs(1));
        let res = handler.dispatch(request(Method::GET, "/index")).await;
        assert_eq!(res.headers()["x-a"], "handler");
        assert_eq!(res.headers()["x-b"], "carrier");
    }

    #[tokio::test]
    async fn test_request_context_has_deadline_and_is_cancelled_after() {
        let (tx, rx) = tokio::sync::oneshot::channel::<Context>();
        let tx = Arc::new(parking_lot::Mutex::new(Some(tx)));
        let mut router = Router::default();
        router.handle(
            "/ctx",
            Arc::new(HandlerFn::new(move |req: Request| {
                let tx = Arc::clone(&tx);
                async move {
                    assert!(req.context().deadline().is_some());
                    assert!(req.context().err().is_none());
                    if let Some(tx) = tx.lock().take() {
                        let _ = tx.send(req.context().clone());
                    }
                    Ok(())
                }
            })),
        );
        let handler = serve_handler(router, Duration::from_secs(5));
        handler.dispatch(request(Method::GET, "/ctx")).await;
        let ctx = rx.await.unwrap();
        assert_eq!(ctx.err(), Some(crate::ContextError::Canceled));
    }

    #[tokio::test]
    async fn test_zero_timeout_means_no_deadline() {
        let mut router = Router::default();
        router.handle(
            "/ctx",
            Arc::new(HandlerFn::new(|req: Request| async move {
                Ok(req.context().deadline().is_none().to_string())
            })),
        );
        let handler = serve_handler(router, Duration::ZERO);
        let res = handler.dispatch(request(Method::GET, "/ctx")).await;
        assert_eq!(res.body().as_ref(), b"true");
    }

    #[tokio::test]
    async fn test_selector_middleware_sees_operation() {
        struct Deny;

        #[async_trait]
        impl MiddleWareHandler for Deny {
            async fn handle(&self, _req: Request, _next: &Next) -> Result<Response> {
                Err(DuetError::unauthorized("DENIED", "denied"))
            }
        }

        let mut router = Router::default();
        router.handle("/admin/{id}", operation_echo());
        router.handle("/public", operation_echo());
        let handler = ServeHandler::new(
            router,
            &[],
            vec![Selector::new("/admin/*", Arc::new(Deny))],
            Codecs::default(),
            Duration::from_secs(1),
            String::new(),
        );
        let res = handler.dispatch(request(Method::GET, "/admin/1")).await;
        assert_eq!(res.status(), StatusCode::UNAUTHORIZED);
        let res = handler.dispatch(request(Method::GET, "/public")).await;
        assert_eq!(res.status(), StatusCode::OK);
    }

    struct InjectViaTransport;

    #[async_trait]
    impl MiddleWareHandler for InjectViaTransport {
        async fn handle(&self, req: Request, next: &Next) -> Result<Response> {
            if let Some(transport) = req.transport() {
                transport.request_header().set("x-injected", "yes");
            }
            next.call(req).await
        }
    }

    struct InjectDirectly;

    #[async_trait]
    impl MiddleWareHandler for InjectDirectly {
        async fn handle(&self, mut req: Request, next: &Next) -> Result<Response> {
            req.headers_mut()
                .insert("x-direct", http::HeaderValue::from_static("yes"));
            next.call(req).await
        }
    }

    fn header_views() -> Arc<dyn Handler> {
        Arc::new(HandlerFn::new(|req: Request| async move {
            let carrier = req
                .transport()
                .map(|t| (t.request_header().get("x-injected"), t.request_header().get("x-direct")))
                .unwrap_or_default();
            Ok(serde_json::json!({
                "headers_injected": req.headers().get("x-injected").and_then(|v| v.to_str().ok()),
                "headers_direct": req.headers().get("x-direct").and_then(|v| v.to_str().ok()),
                "carrier_injected": carrier.0,
                "carrier_direct": carrier.1,
            }))
        }))
    }

    #[tokio::test]
    async fn test_request_header_set_through_transport_reaches_handler() {
        let mut router = Router::default();
        router.handle("/index", header_views());
        let handler = ServeHandler::new(
            router,
            &[],
            vec![
                Selector::new("/*", Arc::new(InjectViaTransport)),
                Selector::new("/*", Arc::new(InjectDirectly)),
            ],
            Codecs::default(),
            Duration::from_secs(1),
            String::new(),
        );
        let res = handler.dispatch(request(Method::GET, "/index")).await;
        let body: Value = serde_json::from_slice(res.body()).unwrap();
        assert_eq!(body["headers_injected"], "yes");
        assert_eq!(body["carrier_injected"], "yes");
        assert_eq!(body["headers_direct"], "yes");
        assert_eq!(body["carrier_direct"], "yes");
    }
}
