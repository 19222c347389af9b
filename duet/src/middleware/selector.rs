use std::sync::Arc;

use crate::MiddleWareHandler;

/// 按 operation 选择中间件。
///
/// - `/*`：匹配全部请求
/// - `/foo/*`：operation 以 `/foo/` 开头
/// - 其余：operation 完全相等
#[derive(Clone)]
pub(crate) struct Selector {
    pattern: Pattern,
    middleware: Arc<dyn MiddleWareHandler>,
}

#[derive(Clone, Debug, PartialEq, Eq)]
enum Pattern {
    All,
    Prefix(String),
    Exact(String),
}

impl Selector {
    pub(crate) fn new(selector: &str, middleware: Arc<dyn MiddleWareHandler>) -> Self {
        let pattern = if selector == "/*" || selector == "*" {
            Pattern::All
        } else if let Some(prefix) = selector.strip_suffix('*') {
            Pattern::Prefix(prefix.to_string())
        } else {
            Pattern::Exact(selector.to_string())
        };
        Self {
            pattern,
            middleware,
        }
    }

    pub(crate) fn matches(&self, operation: &str) -> bool {
        match &self.pattern {
            Pattern::All => true,
            Pattern::Prefix(prefix) => operation.starts_with(prefix.as_str()),
            Pattern::Exact(exact) => operation == exact,
        }
    }
}

/// 收集与 operation 匹配的中间件，保持注册顺序。
pub(crate) fn select(selectors: &[Selector], operation: &str) -> Vec<Arc<dyn MiddleWareHandler>> {
    selectors
        .iter()
        .filter(|s| s.matches(operation))
        .map(|s| Arc::clone(&s.middleware))
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{Handler, Next, Request, Response, Result};
    use async_trait::async_trait;

    struct Noop;

    #[async_trait]
    impl MiddleWareHandler for Noop {
        async fn handle(&self, req: Request, next: &Next) -> Result<Response> {
            next.call(req).await
        }
    }

    fn selector(pattern: &str) -> Selector {
        Selector::new(pattern, Arc::new(Noop))
    }

    #[test]
    fn test_global_selector() {
        let s = selector("/*");
        assert_eq!(s.pattern, Pattern::All);
        assert!(s.matches("/index/{id}"));
        assert!(s.matches(""));
    }

    #[test]
    fn test_prefix_selector() {
        let s = selector("/index/*");
        assert!(s.matches("/index/{id}"));
        assert!(!s.matches("/index"));
        assert!(!s.matches("/errors/cause"));
    }

    #[test]
    fn test_exact_selector() {
        let s = selector("/index");
        assert!(s.matches("/index"));
        assert!(!s.matches("/index/{id}"));
    }

    #[test]
    fn test_select_keeps_order() {
        let selectors = vec![selector("/index"), selector("/*"), selector("/other")];
        assert_eq!(select(&selectors, "/index").len(), 2);
        assert_eq!(select(&selectors, "/nothing").len(), 1);
    }
}
