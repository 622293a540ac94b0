//! Route patterns.
//!
//! A pattern is a path made of literal text and glob tokens:
//!
//! | token          | matches                                               |
//! |----------------|-------------------------------------------------------|
//! | `?`            | a single character other than `/`                     |
//! | `*`            | zero or more characters of one segment                |
//! | `**`           | the rest of the path, slashes included                |
//! | `/**`          | zero or more trailing segments (`/m/**` matches `/m`) |
//! | `:name`        | a named segment                                       |
//! | `{name}`       | a named segment                                       |
//! | `{name:regex}` | a named variable constrained by `regex`               |
//!
//! A pattern without any token is matched by string equality. Otherwise a
//! single regex is compiled for `VERB + pattern`, every token becoming a
//! capture group.

use crate::{
    error::TopazError,
    utils::{normalize_path, MethodExtension},
};
use http::Method;
use percent_encoding::percent_decode_str;
use regex::Regex;
use std::{
    collections::{BTreeMap, HashMap},
    sync::OnceLock,
};

static TOKENS: OnceLock<Regex> = OnceLock::new();

fn tokens() -> &'static Regex {
    TOKENS.get_or_init(|| {
        Regex::new(r"\?|/\*\*|\*\*|\*|:([^/]+)|\{((?:\{[^/]+?\}|[^/{}]|\\[{}])+?)\}").expect("token regex is valid")
    })
}

/// Variables extracted from a path
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PathMatch {
    /// Named variables
    pub vars: HashMap<String, String>,
    /// Every capture group, named or not, by declaration index
    pub positional: BTreeMap<usize, String>,
}

#[derive(Debug)]
enum Matcher {
    Literal,
    Regex { regex: Regex, groups: Vec<Group> },
}

#[derive(Debug)]
struct Group {
    name: String,
    var: Option<String>,
}

/// Immutable compiled matcher for a verb and a path pattern
#[derive(Debug)]
pub struct RoutePattern {
    method: Method,
    pattern: String,
    vars: Vec<String>,
    glob: bool,
    case_sensitive: bool,
    matcher: Matcher,
}

impl RoutePattern {
    pub fn new(method: Method, pattern: &str) -> Result<RoutePattern, TopazError> {
        Self::with_case_sensitivity(method, pattern, true)
    }

    pub fn with_case_sensitivity(method: Method, pattern: &str, case_sensitive: bool) -> Result<RoutePattern, TopazError> {
        let pattern = if pattern.trim() == "*" { "/**".to_string() } else { normalize_path(pattern) };
        if pattern.contains("{}") {
            return Err(TopazError::InvalidPattern(format!("{}: empty variable name", pattern)));
        }

        let mut vars = Vec::new();
        let mut groups = Vec::new();
        let mut glob = false;
        let mut expr = String::with_capacity(pattern.len() * 2);
        if !case_sensitive {
            expr.push_str("(?i)");
        }
        expr.push('^');
        if method.is_any() {
            expr.push_str("[^/]+");
        } else {
            expr.push_str(&regex::escape(method.as_str()));
        }

        let mut last = 0;
        for caps in tokens().captures_iter(&pattern) {
            let token = caps.get(0).expect("group 0 is always present");
            expr.push_str(&regex::escape(&pattern[last..token.start()]));
            last = token.end();

            let name = format!("g{}", groups.len());
            let (body, var) = match token.as_str() {
                "?" => ("[^/]".to_string(), None),
                "/**" => {
                    glob = true;
                    expr.push_str(&format!("(?P<{}>/.*)?", name));
                    groups.push(Group { name, var: None });
                    continue;
                }
                "**" => {
                    glob = true;
                    (".*".to_string(), None)
                }
                "*" => {
                    glob = true;
                    ("[^/]*".to_string(), None)
                }
                _ => {
                    let (var, constraint) = if let Some(colon_var) = caps.get(1) {
                        (colon_var.as_str().to_string(), None)
                    } else {
                        let inner = caps.get(2).map(|m| m.as_str()).unwrap_or_default();
                        match inner.split_once(':') {
                            Some((var, re)) => (var.trim().to_string(), Some(re.to_string())),
                            None => (inner.trim().to_string(), None),
                        }
                    };

                    if var.is_empty() {
                        return Err(TopazError::InvalidPattern(format!("{}: empty variable name", pattern)));
                    }

                    vars.push(var.clone());
                    (constraint.unwrap_or_else(|| "[^/]+".to_string()), Some(var))
                }
            };

            expr.push_str(&format!("(?P<{}>{})", name, body));
            groups.push(Group { name, var });
        }

        let matcher = if groups.is_empty() {
            Matcher::Literal
        } else {
            expr.push_str(&regex::escape(&pattern[last..]));
            expr.push('$');
            let regex = Regex::new(&expr).map_err(|e| TopazError::InvalidPattern(format!("{}: {}", pattern, e)))?;
            Matcher::Regex { regex, groups }
        };

        Ok(RoutePattern {
            method,
            pattern,
            vars,
            glob,
            case_sensitive,
            matcher,
        })
    }

    /// The normalized pattern
    #[inline]
    pub fn pattern(&self) -> &str {
        &self.pattern
    }

    #[inline]
    pub fn method(&self) -> &Method {
        &self.method
    }

    /// Named variables in declaration order
    #[inline]
    pub fn vars(&self) -> &[String] {
        &self.vars
    }

    /// Whether the pattern contains a `*`, `**` or `/**` wildcard
    #[inline]
    pub fn is_glob(&self) -> bool {
        self.glob
    }

    #[inline]
    pub fn is_literal(&self) -> bool {
        matches!(self.matcher, Matcher::Literal)
    }

    /// Match a normalized path requested with `method`
    pub fn matches(&self, method: &Method, path: &str) -> Option<PathMatch> {
        match &self.matcher {
            Matcher::Literal => {
                let verb_matches = self.method.is_any() || &self.method == method;
                let path_matches = if self.case_sensitive {
                    self.pattern == path
                } else {
                    self.pattern.eq_ignore_ascii_case(path)
                };

                if verb_matches && path_matches {
                    Some(PathMatch::default())
                } else {
                    None
                }
            }
            Matcher::Regex { regex, groups } => {
                let key = format!("{}{}", method, path);
                let caps = regex.captures(&key)?;
                let mut result = PathMatch::default();
                for (index, group) in groups.iter().enumerate() {
                    if let Some(m) = caps.name(&group.name) {
                        let raw = m.as_str();
                        let value = percent_decode_str(raw.strip_prefix('/').unwrap_or(raw)).decode_utf8_lossy().into_owned();
                        if let Some(var) = &group.var {
                            result.vars.insert(var.clone(), value.clone());
                        }
                        result.positional.insert(index, value);
                    }
                }
                Some(result)
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn get(p: &str) -> RoutePattern {
        RoutePattern::new(Method::GET, p).unwrap()
    }

    #[test]
    fn literal_fast_path() {
        let p = get("/hello/world/");
        assert!(p.is_literal());
        assert_eq!(p.pattern(), "/hello/world");
        assert!(p.matches(&Method::GET, "/hello/world").is_some());
        assert!(p.matches(&Method::POST, "/hello/world").is_none());
        assert!(p.matches(&Method::GET, "/hello").is_none());
    }

    #[test]
    fn literal_with_regex_chars() {
        let p = get("/file.json");
        assert!(p.matches(&Method::GET, "/file.json").is_some());
        assert!(p.matches(&Method::GET, "/fileXjson").is_none());
    }

    #[test]
    fn double_star_matches_zero_segments() {
        let p = get("/m/**");
        assert!(p.is_glob());
        for path in ["/m", "/m/x", "/m/x/y"] {
            assert!(p.matches(&Method::GET, path).is_some(), "{}", path);
        }
        for path in ["/mobile", "/movie", "/"] {
            assert!(p.matches(&Method::GET, path).is_none(), "{}", path);
        }
        assert_eq!(p.matches(&Method::GET, "/m/x/y").unwrap().positional.get(&0).map(String::as_str), Some("x/y"));
    }

    #[test]
    fn regex_constrained_variable() {
        let p = get("/V{var:\\d{4,7}}");
        assert_eq!(p.vars(), &["var".to_string()]);
        assert_eq!(p.matches(&Method::GET, "/V1234").unwrap().vars["var"], "1234");
        assert!(p.matches(&Method::GET, "/V1234567").is_some());
        assert!(p.matches(&Method::GET, "/V12").is_none());
        assert!(p.matches(&Method::GET, "/V12345678").is_none());
    }

    #[test]
    fn named_variables_in_order() {
        for pattern in ["/user/:id/book/:title", "/user/{id}/book/{title}"] {
            let p = get(pattern);
            assert_eq!(p.vars(), &["id".to_string(), "title".to_string()]);
            assert!(!p.is_glob());
            let m = p.matches(&Method::GET, "/user/42/book/dune%20messiah").unwrap();
            assert_eq!(m.vars["id"], "42");
            assert_eq!(m.vars["title"], "dune messiah");
            assert_eq!(m.positional[&0], "42");
            assert_eq!(m.positional[&1], "dune messiah");
            assert!(p.matches(&Method::GET, "/user/42/book").is_none());
        }
    }

    #[test]
    fn single_star_and_question_mark() {
        let p = get("/static/*.js");
        assert!(p.matches(&Method::GET, "/static/app.js").is_some());
        assert!(p.matches(&Method::GET, "/static/js/app.js").is_none());

        let p = get("/v?/items");
        assert_eq!(p.matches(&Method::GET, "/v2/items").unwrap().positional[&0], "2");
        assert!(p.matches(&Method::GET, "/v22/items").is_none());
    }

    #[test]
    fn any_method_and_bare_star() {
        let p = RoutePattern::new(Method::any(), "*").unwrap();
        assert_eq!(p.pattern(), "/**");
        assert!(p.matches(&Method::DELETE, "/").is_some());
        assert!(p.matches(&Method::POST, "/a/b").is_some());

        let p = RoutePattern::new(Method::any(), "/x").unwrap();
        assert!(p.matches(&Method::PUT, "/x").is_some());
    }

    #[test]
    fn case_insensitive() {
        let p = RoutePattern::with_case_sensitivity(Method::GET, "/Users/:id", false).unwrap();
        assert!(p.matches(&Method::GET, "/users/1").is_some());
        let p = RoutePattern::with_case_sensitivity(Method::GET, "/Users", false).unwrap();
        assert!(p.matches(&Method::GET, "/USERS").is_some());
        assert!(get("/Users").matches(&Method::GET, "/users").is_none());
    }

    #[test]
    fn invalid_patterns() {
        assert!(RoutePattern::new(Method::GET, "/a/{}").is_err());
        assert!(RoutePattern::new(Method::GET, "/a/{id:(}").is_err());
    }
}
