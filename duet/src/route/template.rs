use regex::Regex;

/// 路径模板，例如 `/index/{id}`、`/files/{name:[a-z]+\.txt}`。
///
/// 模板整体编译为一个锚定的正则；变量默认匹配 `[^/]+`。
#[derive(Debug, Clone)]
pub(crate) struct PathTemplate {
    raw: String,
    regex: Regex,
    names: Vec<String>,
    trailing_slash: bool,
    strict_slash: bool,
}

#[derive(Debug, thiserror::Error)]
pub(crate) enum TemplateError {
    #[error("unbalanced braces in {0:?}")]
    Unbalanced(String),
    #[error("missing variable name in {0:?}")]
    MissingName(String),
    #[error(transparent)]
    Regex(#[from] regex::Error),
}

/// 模板匹配结果
#[derive(Debug, PartialEq, Eq)]
pub(crate) enum TemplateMatch {
    Matched(Vec<(String, String)>),
    /// 仅末尾斜杠不同，携带应重定向到的路径。
    Redirect(String),
    Unmatched,
}

impl PathTemplate {
    pub(crate) fn parse(raw: &str, strict_slash: bool) -> Result<Self, TemplateError> {
        let trailing_slash = raw.len() > 1 && raw.ends_with('/');
        let body = if strict_slash && trailing_slash {
            &raw[..raw.len() - 1]
        } else {
            raw
        };
        let mut pattern = String::from("^");
        let mut names = Vec::new();
        let mut rest = body;
        while let Some(start) = rest.find('{') {
            pattern.push_str(&regex::escape(&rest[..start]));
            let end = closing_brace(&rest[start..])
                .ok_or_else(|| TemplateError::Unbalanced(raw.into()))?;
            let inner = &rest[start + 1..start + end];
            let (name, var_pattern) = match inner.split_once(':') {
                Some((name, p)) => (name.trim(), p),
                None => (inner.trim(), "[^/]+"),
            };
            if name.is_empty() {
                return Err(TemplateError::MissingName(raw.into()));
            }
            pattern.push_str(&format!("(?P<v{}>{var_pattern})", names.len()));
            names.push(name.to_string());
            rest = &rest[start + end + 1..];
        }
        if rest.contains('}') {
            return Err(TemplateError::Unbalanced(raw.into()));
        }
        pattern.push_str(&regex::escape(rest));
        if strict_slash && body != "/" {
            pattern.push_str("/?");
        }
        pattern.push('$');
        Ok(Self {
            raw: raw.to_string(),
            regex: Regex::new(&pattern)?,
            names,
            trailing_slash,
            strict_slash,
        })
    }

    pub(crate) fn as_str(&self) -> &str {
        &self.raw
    }

    pub(crate) fn matches(&self, path: &str) -> TemplateMatch {
        let Some(caps) = self.regex.captures(path) else {
            return TemplateMatch::Unmatched;
        };
        if self.strict_slash && path != "/" && path.ends_with('/') != self.trailing_slash {
            let target = if self.trailing_slash {
                format!("{path}/")
            } else {
                path.trim_end_matches('/').to_string()
            };
            return TemplateMatch::Redirect(target);
        }
        let params = self
            .names
            .iter()
            .enumerate()
            .filter_map(|(i, name)| {
                caps.name(&format!("v{i}"))
                    .map(|m| (name.clone(), m.as_str().to_string()))
            })
            .collect();
        TemplateMatch::Matched(params)
    }
}

/// 返回与开头 `{` 配对的 `}` 的下标
fn closing_brace(s: &str) -> Option<usize> {
    let mut depth = 0usize;
    for (i, c) in s.char_indices() {
        match c {
            '{' => depth += 1,
            '}' => {
                depth = depth.checked_sub(1)?;
                if depth == 0 {
                    return Some(i);
                }
            }
            _ => {}
        }
    }
    None
}

/// 拼接路由前缀与路径，去掉多余的斜杠。
pub(crate) fn join(prefix: &str, path: &str) -> String {
    let prefix = prefix.trim_end_matches('/');
    let path = path.trim_start_matches('/');
    match (prefix.is_empty(), path.is_empty()) {
        (true, true) => "/".to_string(),
        (true, false) => format!("/{path}"),
        (false, true) => prefix.to_string(),
        (false, false) => format!("{prefix}/{path}"),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn params(m: TemplateMatch) -> Vec<(String, String)> {
        match m {
            TemplateMatch::Matched(p) => p,
            other => panic!("unexpected {other:?}"),
        }
    }

    #[test]
    fn test_literal_template() {
        let t = PathTemplate::parse("/index", false).unwrap();
        assert!(params(t.matches("/index")).is_empty());
        assert_eq!(t.matches("/index/"), TemplateMatch::Unmatched);
        assert_eq!(t.matches("/indexx"), TemplateMatch::Unmatched);
    }

    #[test]
    fn test_variable_template() {
        let t = PathTemplate::parse("/index/{id}", false).unwrap();
        assert_eq!(
            params(t.matches("/index/42")),
            vec![("id".to_string(), "42".to_string())]
        );
        assert_eq!(t.matches("/index/42/x"), TemplateMatch::Unmatched);
        assert_eq!(t.as_str(), "/index/{id}");
    }

    #[test]
    fn test_regex_variable_with_braces() {
        let t = PathTemplate::parse("/code/{code:[0-9]{3}}", false).unwrap();
        assert_eq!(
            params(t.matches("/code/404")),
            vec![("code".to_string(), "404".to_string())]
        );
        assert_eq!(t.matches("/code/4040"), TemplateMatch::Unmatched);
    }

    #[test]
    fn test_literal_is_escaped() {
        let t = PathTemplate::parse("/a.b", false).unwrap();
        assert_eq!(t.matches("/axb"), TemplateMatch::Unmatched);
    }

    #[test]
    fn test_strict_slash_redirects_both_ways() {
        let t = PathTemplate::parse("/index", true).unwrap();
        assert!(params(t.matches("/index")).is_empty());
        assert_eq!(
            t.matches("/index/"),
            TemplateMatch::Redirect("/index".into())
        );
        let t = PathTemplate::parse("/dir/", true).unwrap();
        assert_eq!(t.matches("/dir"), TemplateMatch::Redirect("/dir/".into()));
        assert!(params(t.matches("/dir/")).is_empty());
    }

    #[test]
    fn test_invalid_templates() {
        assert!(matches!(
            PathTemplate::parse("/a/{id", false),
            Err(TemplateError::Unbalanced(_))
        ));
        assert!(matches!(
            PathTemplate::parse("/a/{:x}", false),
            Err(TemplateError::MissingName(_))
        ));
        assert!(matches!(
            PathTemplate::parse("/a/{id:(}", false),
            Err(TemplateError::Regex(_))
        ));
    }

    #[test]
    fn test_join() {
        assert_eq!(join("/v1", "/users"), "/v1/users");
        assert_eq!(join("/v1/", "users"), "/v1/users");
        assert_eq!(join("/v1", "/"), "/v1");
        assert_eq!(join("", ""), "/");
        assert_eq!(join("", "/index"), "/index");
    }
}
