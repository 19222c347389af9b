//! 有序路由表。
//!
//! 每条路由由可选的方法集合、路径条件（模板 / 前缀 / 任意）与请求头条件组成，条件之间为与关系。
//! 按注册顺序匹配，先注册者优先。

mod group;
pub(crate) mod template;

use std::sync::Arc;

use http::header::HeaderName;
use http::{HeaderValue, Method};

use crate::{DuetError, Handler, HandlerFn, Request};
use template::{PathTemplate, TemplateMatch, join};

pub use group::RouteGroup;

/// 路由遍历时的只读视图
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RouteInfo {
    pub method: Method,
    pub path: String,
}

/// 命中路由后挂在请求扩展上的信息
#[derive(Debug, Clone, Default)]
pub(crate) struct MatchedRoute {
    template: Option<Arc<str>>,
    params: Vec<(String, String)>,
}

impl MatchedRoute {
    pub(crate) fn template(&self) -> Option<&str> {
        self.template.as_deref()
    }

    pub(crate) fn params(&self) -> &[(String, String)] {
        &self.params
    }

    pub(crate) fn param(&self, key: &str) -> Option<&str> {
        self.params
            .iter()
            .find(|(k, _)| k == key)
            .map(|(_, v)| v.as_str())
    }
}

#[derive(Debug)]
enum PathMatcher {
    Template(PathTemplate),
    Prefix(String),
    Any,
}

pub(crate) struct RouteEntry {
    methods: Option<Vec<Method>>,
    path: PathMatcher,
    headers: Vec<(HeaderName, HeaderValue)>,
    template: Option<Arc<str>>,
    pub(crate) handler: Arc<dyn Handler>,
}

pub(crate) enum RouteMatch {
    Found(Arc<RouteEntry>, MatchedRoute),
    Redirect(String),
    MethodNotAllowed,
    NotFound,
}

impl std::fmt::Debug for RouteMatch {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            RouteMatch::Found(_, m) => f.debug_tuple("Found").field(m).finish(),
            RouteMatch::Redirect(to) => f.debug_tuple("Redirect").field(to).finish(),
            RouteMatch::MethodNotAllowed => f.write_str("MethodNotAllowed"),
            RouteMatch::NotFound => f.write_str("NotFound"),
        }
    }
}

#[derive(Clone)]
pub(crate) struct Router {
    routes: Vec<Arc<RouteEntry>>,
    prefix: String,
    strict_slash: bool,
    pub(crate) not_found: Arc<dyn Handler>,
    pub(crate) method_not_allowed: Arc<dyn Handler>,
}

fn default_fallback() -> Arc<dyn Handler> {
    Arc::new(HandlerFn::new(|_req: Request| async {
        Err::<(), _>(DuetError::NotFound)
    }))
}

impl Default for Router {
    fn default() -> Self {
        Self::new("", true)
    }
}

impl Router {
    pub(crate) fn new(prefix: &str, strict_slash: bool) -> Self {
        Self {
            routes: Vec::new(),
            prefix: prefix.trim_end_matches('/').to_string(),
            strict_slash,
            not_found: default_fallback(),
            method_not_allowed: default_fallback(),
        }
    }

    /// 注册路径模板路由，匹配任意方法。
    pub(crate) fn handle(&mut self, path: &str, handler: Arc<dyn Handler>) {
        self.add_template(None, path, handler);
    }

    /// 注册路径前缀路由
    pub(crate) fn handle_prefix(&mut self, prefix: &str, handler: Arc<dyn Handler>) {
        let prefix = if self.prefix.is_empty() {
            prefix.to_string()
        } else {
            format!("{}{prefix}", self.prefix)
        };
        self.push(RouteEntry {
            methods: None,
            template: Some(Arc::from(prefix.as_str())),
            path: PathMatcher::Prefix(prefix),
            headers: Vec::new(),
            handler,
        });
    }

    /// 注册请求头路由：请求头 `key` 的值等于 `value` 时命中，不限路径。
    pub(crate) fn handle_header(&mut self, key: &str, value: &str, handler: Arc<dyn Handler>) {
        let name = match HeaderName::from_bytes(key.as_bytes()) {
            Ok(name) => name,
            Err(e) => {
                tracing::error!(key, "skip route with invalid header name: {e}");
                return;
            }
        };
        let value = match HeaderValue::from_str(value) {
            Ok(value) => value,
            Err(e) => {
                tracing::error!(key, "skip route with invalid header value: {e}");
                return;
            }
        };
        let (path, template) = if self.prefix.is_empty() {
            (PathMatcher::Any, None)
        } else {
            (
                PathMatcher::Prefix(self.prefix.clone()),
                Some(Arc::from(self.prefix.as_str())),
            )
        };
        self.push(RouteEntry {
            methods: None,
            path,
            headers: vec![(name, value)],
            template,
            handler,
        });
    }

    pub(crate) fn add_template(
        &mut self,
        methods: Option<Vec<Method>>,
        path: &str,
        handler: Arc<dyn Handler>,
    ) {
        let full = if self.prefix.is_empty() {
            path.to_string()
        } else {
            join(&self.prefix, path)
        };
        match PathTemplate::parse(&full, self.strict_slash) {
            Ok(template) => self.push(RouteEntry {
                methods,
                template: Some(Arc::from(template.as_str())),
                path: PathMatcher::Template(template),
                headers: Vec::new(),
                handler,
            }),
            Err(e) => tracing::error!(path = %full, "skip route with invalid template: {e}"),
        }
    }

    fn push(&mut self, entry: RouteEntry) {
        tracing::debug!(
            template = entry.template.as_deref().unwrap_or("*"),
            methods = ?entry.methods,
            "route registered"
        );
        self.routes.push(Arc::new(entry));
    }

    /// 按注册顺序查找路由
    pub(crate) fn find(&self, req: &Request) -> RouteMatch {
        let path = req.uri().path();
        let mut method_mismatch = false;
        for entry in &self.routes {
            let params = match &entry.path {
                PathMatcher::Template(template) => match template.matches(path) {
                    TemplateMatch::Matched(params) => Ok(params),
                    TemplateMatch::Redirect(to) => Err(to),
                    TemplateMatch::Unmatched => continue,
                },
                PathMatcher::Prefix(prefix) if path.starts_with(prefix.as_str()) => Ok(Vec::new()),
                PathMatcher::Prefix(_) => continue,
                PathMatcher::Any => Ok(Vec::new()),
            };
            let headers_match = entry
                .headers
                .iter()
                .all(|(name, value)| req.headers().get(name) == Some(value));
            if !headers_match {
                continue;
            }
            if let Some(methods) = &entry.methods
                && !methods.contains(req.method())
            {
                method_mismatch = true;
                continue;
            }
            return match params {
                Ok(params) => RouteMatch::Found(
                    Arc::clone(entry),
                    MatchedRoute {
                        template: entry.template.clone(),
                        params,
                    },
                ),
                Err(to) => RouteMatch::Redirect(match req.uri().query() {
                    Some(query) => format!("{to}?{query}"),
                    None => to,
                }),
            };
        }
        if method_mismatch {
            RouteMatch::MethodNotAllowed
        } else {
            RouteMatch::NotFound
        }
    }

    /// 遍历所有带方法的路由，回调返回错误时立即停止并返回该错误。
    pub(crate) fn walk<F, E>(&self, mut f: F) -> Result<(), E>
    where
        F: FnMut(RouteInfo) -> Result<(), E>,
    {
        for entry in &self.routes {
            let (Some(methods), Some(template)) = (&entry.methods, &entry.template) else {
                continue;
            };
            for method in methods {
                f(RouteInfo {
                    method: method.clone(),
                    path: template.to_string(),
                })?;
            }
        }
        Ok(())
    }
}
