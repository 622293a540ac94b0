use std::{
    any::Any,
    collections::{BTreeMap, HashMap},
    net::SocketAddr,
    ops::{Deref, DerefMut},
    str::FromStr,
};

use cookie::{Cookie, CookieJar};
use http::{
    header::{ACCEPT, CONTENT_TYPE, COOKIE},
    Method, Request as RawRequest,
};

use crate::{
    body::{Body, FromBytes},
    error::TopazError,
    media_type::MediaType,
    pattern::PathMatch,
    route::Route,
    utils::normalize_path,
};

/// Struct that wraps a hyper request + some magic
pub struct Request {
    #[doc(hidden)]
    inner: RawRequest<Body>,
    #[doc(hidden)]
    path: String,
    #[doc(hidden)]
    route: Option<Route>,
    #[doc(hidden)]
    captures: HashMap<String, String>,
    #[doc(hidden)]
    positional: BTreeMap<usize, String>,
    #[doc(hidden)]
    query: Vec<(String, String)>,
    #[doc(hidden)]
    form: Vec<(String, String)>,
    #[doc(hidden)]
    accept: Vec<MediaType>,
    #[doc(hidden)]
    content_type: MediaType,
    #[doc(hidden)]
    cookies: CookieJar,
    #[doc(hidden)]
    peer_addr: Option<SocketAddr>,
    #[doc(hidden)]
    locals: HashMap<String, Box<dyn Any + Send + Sync>>,
    #[cfg(feature = "operation")]
    #[doc(hidden)]
    operation_id: crate::http_context::operation::OperationId,
}

impl Request {
    #[doc(hidden)]
    pub fn new(raw: RawRequest<Body>, peer_addr: Option<SocketAddr>) -> Self {
        let path = normalize_path(raw.uri().path());
        let query = raw
            .uri()
            .query()
            .map(|q| serde_urlencoded::from_str::<Vec<(String, String)>>(q).unwrap_or_default())
            .unwrap_or_default();

        let accept = {
            let values = raw
                .headers()
                .get_all(ACCEPT)
                .iter()
                .filter_map(|v| v.to_str().ok())
                .collect::<Vec<_>>()
                .join(",");
            let parsed = MediaType::parse_list(&values);
            if parsed.is_empty() {
                vec![MediaType::any()]
            } else {
                parsed
            }
        };

        let content_type = raw
            .headers()
            .get(CONTENT_TYPE)
            .and_then(|v| v.to_str().ok())
            .and_then(|v| MediaType::parse(v).ok())
            .unwrap_or_else(MediaType::any);

        let mut req = Request {
            inner: raw,
            path,
            route: None,
            captures: Default::default(),
            positional: Default::default(),
            query,
            form: Vec::new(),
            accept,
            content_type,
            cookies: Default::default(),
            peer_addr,
            locals: Default::default(),
            #[cfg(feature = "operation")]
            operation_id: Default::default(),
        };
        req.parse_cookies();
        req
    }

    /// Return the Peer SocketAddr if one was available when receiving the request
    #[inline]
    pub fn peer_addr(&self) -> Option<&SocketAddr> {
        self.peer_addr.as_ref()
    }

    /// Normalized path, relative to the router context path
    #[inline]
    pub fn path(&self) -> &str {
        &self.path
    }

    pub(crate) fn set_path(&mut self, path: String) {
        self.path = path;
    }

    pub(crate) fn set_method(&mut self, method: Method) {
        *self.inner.method_mut() = method;
    }

    /// The route currently executing, if any
    #[inline]
    pub fn route(&self) -> Option<&Route> {
        self.route.as_ref()
    }

    pub(crate) fn set_route(&mut self, route: &Route) {
        self.captures = route.captures().clone();
        self.positional = route.positional().clone();
        self.route = Some(route.clone());
    }

    pub(crate) fn set_path_match(&mut self, m: PathMatch) {
        self.captures = m.vars;
        self.positional = m.positional;
    }

    /// Get the cookies sent by the browsers
    #[inline]
    pub fn cookies(&self) -> &CookieJar {
        &self.cookies
    }

    #[inline]
    pub fn cookies_mut(&mut self) -> &mut CookieJar {
        &mut self.cookies
    }

    /// Access the captured variables from the request path. E.g. a path
    /// composed as `/user/{user_id}/profile` will store a capture named
    /// `"user_id"`.
    #[inline]
    pub fn captures(&self) -> &HashMap<String, String> {
        &self.captures
    }

    /// Every capture of the current route, named or not (`*`, `**`, `?`), by
    /// declaration index
    #[inline]
    pub fn positional(&self) -> &BTreeMap<usize, String> {
        &self.positional
    }

    /// Query string parameters, in order, with repetitions
    #[inline]
    pub fn query_params(&self) -> &[(String, String)] {
        &self.query
    }

    /// Url encoded form fields of the body, in order, with repetitions
    #[inline]
    pub fn form_params(&self) -> &[(String, String)] {
        &self.form
    }

    /// First value of a parameter, looked up in the path captures, then the
    /// query string, then the url encoded form
    pub fn param(&self, name: &str) -> Option<&str> {
        self.captures
            .get(name)
            .map(String::as_str)
            .or_else(|| self.params(name).into_iter().next())
    }

    /// Every value of a query or form parameter
    pub fn params(&self, name: &str) -> Vec<&str> {
        self.query
            .iter()
            .chain(self.form.iter())
            .filter(|(k, _)| k == name)
            .map(|(_, v)| v.as_str())
            .collect()
    }

    /// Parse a required parameter
    pub fn param_as<T: FromStr>(&self, name: &str) -> Result<T, TopazError> {
        let raw = self.param(name).ok_or_else(|| TopazError::MissingParameter(name.to_string()))?;
        raw.parse::<T>().map_err(|_| TopazError::InvalidParameter(name.to_string()))
    }

    /// Media types accepted by the client, by precedence. A request without
    /// `Accept` header accepts `*/*`.
    #[inline]
    pub fn accept(&self) -> &[MediaType] {
        &self.accept
    }

    /// Whether `media_type` is acceptable for the client
    pub fn accepts(&self, media_type: &MediaType) -> bool {
        crate::media_type::matches(&self.accept, std::slice::from_ref(media_type))
    }

    /// `Content-Type` of the body, `*/*` when not provided
    #[inline]
    pub fn content_type(&self) -> &MediaType {
        &self.content_type
    }

    pub fn header(&self, name: &str) -> Option<&str> {
        self.inner.headers().get(name).and_then(|v| v.to_str().ok())
    }

    /// Store a value for the rest of the dispatch, replacing any value under
    /// the same name
    pub fn set_local<T: Any + Send + Sync>(&mut self, name: &str, value: T) {
        self.locals.insert(name.to_string(), Box::new(value));
    }

    pub fn local<T: Any + Send + Sync>(&self, name: &str) -> Option<&T> {
        self.locals.get(name).and_then(|v| v.downcast_ref::<T>())
    }

    pub fn local_mut<T: Any + Send + Sync>(&mut self, name: &str) -> Option<&mut T> {
        self.locals.get_mut(name).and_then(|v| v.downcast_mut::<T>())
    }

    pub fn remove_local<T: Any + Send + Sync>(&mut self, name: &str) -> Option<T> {
        match self.locals.remove(name)?.downcast::<T>() {
            Ok(v) => Some(*v),
            Err(other) => {
                self.locals.insert(name.to_string(), other);
                None
            }
        }
    }

    /// Buffer the body and decode url encoded fields, if any
    pub(crate) async fn load_body(&mut self, limit: Option<usize>) -> Result<(), TopazError> {
        self.inner.body_mut().load(limit).await?;
        if self.content_type.essence() == MediaType::form().essence() {
            let bytes = self.inner.body().bytes()?;
            self.form = serde_urlencoded::from_bytes::<Vec<(String, String)>>(bytes.as_ref())?;
        }
        Ok(())
    }

    /// Take the body and convert it into `T::Out`
    #[inline]
    pub fn take_body_as<T: FromBytes>(&mut self) -> Result<T::Out, TopazError> {
        self.inner.body_mut().take_as::<T>()
    }

    /// Parse cookies from the Cookie header
    pub fn parse_cookies(&mut self) {
        let jar = &mut self.cookies;
        if let Some(cookie_iter) = self
            .inner
            .headers()
            .get(COOKIE)
            .and_then(|cookies| cookies.to_str().ok())
            .map(|cookies_str| cookies_str.split("; "))
            .map(|cookie_iter| cookie_iter.filter_map(|cookie_s| Cookie::parse(cookie_s.to_string()).ok()))
        {
            cookie_iter.for_each(|c| jar.add_original(c));
        }
    }

    #[cfg(feature = "operation")]
    pub fn operation_id(&self) -> &crate::http_context::operation::OperationId {
        &self.operation_id
    }

    #[cfg(feature = "operation")]
    pub(crate) fn operation_id_mut(&mut self) -> &mut crate::http_context::operation::OperationId {
        &mut self.operation_id
    }
}

#[cfg(feature = "json")]
mod json {
    use serde::Deserialize;

    use crate::body::Json;

    use super::*;

    impl Request {
        pub fn json<T>(&mut self) -> Result<T, TopazError>
        where
            T: for<'a> Deserialize<'a>,
        {
            self.take_body_as::<Json<T>>()
        }
    }
}

#[cfg(feature = "form")]
mod form {
    use serde::Deserialize;

    use crate::body::Form;

    use super::*;

    impl Request {
        pub fn form<T>(&mut self) -> Result<T, TopazError>
        where
            T: for<'a> Deserialize<'a>,
        {
            self.take_body_as::<Form<T>>()
        }
    }
}

impl Deref for Request {
    type Target = RawRequest<Body>;

    fn deref(&self) -> &Self::Target {
        &self.inner
    }
}

impl DerefMut for Request {
    fn deref_mut(&mut self) -> &mut Self::Target {
        &mut self.inner
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn request(uri: &str) -> http::request::Builder {
        RawRequest::builder().method("GET").uri(uri)
    }

    #[test]
    fn params_lookup_order() {
        let raw = request("/a?id=query&tag=x&tag=y").body(Body::empty()).unwrap();
        let mut req = Request::new(raw, None);
        assert_eq!(req.param("id"), Some("query"));
        assert_eq!(req.params("tag"), vec!["x", "y"]);

        req.set_path_match(PathMatch {
            vars: [("id".to_string(), "path".to_string())].into_iter().collect(),
            positional: Default::default(),
        });
        assert_eq!(req.param("id"), Some("path"));
        assert!(matches!(req.param_as::<u32>("id"), Err(TopazError::InvalidParameter(_))));
        assert!(matches!(req.param_as::<u32>("nope"), Err(TopazError::MissingParameter(_))));
    }

    #[test]
    fn accept_and_content_type() {
        let raw = request("/").header(ACCEPT, "text/html;q=0.5, application/json").body(Body::empty()).unwrap();
        let req = Request::new(raw, None);
        assert_eq!(req.accept()[0], MediaType::json());
        assert!(req.accepts(&MediaType::html()));
        assert!(!req.accepts(&MediaType::xml()));
        assert!(req.content_type().is_any());

        let req = Request::new(request("/").body(Body::empty()).unwrap(), None);
        assert!(req.accepts(&MediaType::xml()));

        let raw = request("/").header(ACCEPT, "garbage, ;;").body(Body::empty()).unwrap();
        let req = Request::new(raw, None);
        assert_eq!(req.accept(), &[MediaType::any()][..]);
        assert!(req.accepts(&MediaType::json()));
    }

    #[test]
    fn locals_are_typed() {
        let mut req = Request::new(request("/").body(Body::empty()).unwrap(), None);
        req.set_local("user", 42u64);
        assert_eq!(req.local::<u64>("user"), Some(&42));
        assert_eq!(req.local::<String>("user"), None);
        assert_eq!(req.remove_local::<String>("user"), None);
        assert_eq!(req.remove_local::<u64>("user"), Some(42));
    }

    #[tokio::test]
    async fn form_fields_are_params() {
        let raw = request("/?a=1")
            .header(CONTENT_TYPE, "application/x-www-form-urlencoded")
            .body(Body::from("a=2&b=3"))
            .unwrap();
        let mut req = Request::new(raw, None);
        req.load_body(None).await.unwrap();
        assert_eq!(req.params("a"), vec!["1", "2"]);
        assert_eq!(req.param("b"), Some("3"));
        assert_eq!(req.take_body_as::<String>().unwrap(), "a=2&b=3");
    }

    #[tokio::test]
    async fn body_limit() {
        let raw = request("/").body(Body::from_raw(hyper::Body::from("0123456789"))).unwrap();
        let mut req = Request::new(raw, None);
        assert!(matches!(req.load_body(Some(4)).await, Err(TopazError::PayloadTooLarge(4))));
    }
}
