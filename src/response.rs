use std::convert::TryFrom;

use cookie::{Cookie, CookieJar};
use http::{
    header::{HeaderName, CONTENT_TYPE, SET_COOKIE},
    response::{Builder as RawBuilder, Parts},
    HeaderMap, HeaderValue, Response as RawResponse, StatusCode, Version,
};
use hyper::body::Body as RawBody;

use crate::{error::TopazError, media_type::MediaType};

/// Outgoing response of a dispatch.
///
/// A response is *committed* once something was sent through the
/// [`HttpContext`](crate::http_context::HttpContext). Nothing can be written
/// to a committed response; until then it can be freely reset.
pub struct Response {
    #[doc(hidden)]
    status: Option<StatusCode>,
    #[doc(hidden)]
    version: Option<Version>,
    #[doc(hidden)]
    headers: HeaderMap,
    #[doc(hidden)]
    cookies: CookieJar,
    #[doc(hidden)]
    body: RawBody,
    #[doc(hidden)]
    committed: bool,
}

impl Response {
    /// Creates an instance of a response builder
    pub fn builder() -> Builder {
        Builder::new()
    }

    pub(crate) fn new() -> Self {
        Response {
            status: None,
            version: None,
            headers: HeaderMap::new(),
            cookies: CookieJar::new(),
            body: RawBody::empty(),
            committed: false,
        }
    }

    /// Status set so far, `None` until a responder or a filter sets one
    #[inline]
    pub fn status(&self) -> Option<StatusCode> {
        self.status
    }

    #[inline]
    pub fn set_status(&mut self, status: StatusCode) {
        if self.committed {
            warn!("Ignoring status {}: response already committed", status);
            return;
        }
        self.status = Some(status);
    }

    #[inline]
    pub fn headers(&self) -> &HeaderMap {
        &self.headers
    }

    #[inline]
    pub fn headers_mut(&mut self) -> &mut HeaderMap {
        &mut self.headers
    }

    /// First value of a header, if it is visible ascii
    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers.get(name).and_then(|v| v.to_str().ok())
    }

    /// Insert a header, replacing any previous value
    pub fn set_header<K, V>(&mut self, key: K, value: V) -> Result<(), TopazError>
    where
        HeaderName: TryFrom<K>,
        <HeaderName as TryFrom<K>>::Error: Into<http::Error>,
        HeaderValue: TryFrom<V>,
        <HeaderValue as TryFrom<V>>::Error: Into<http::Error>,
    {
        let name = HeaderName::try_from(key).map_err(Into::<http::Error>::into)?;
        let value = HeaderValue::try_from(value).map_err(Into::<http::Error>::into)?;
        self.headers.insert(name, value);
        Ok(())
    }

    pub fn append_header<K, V>(&mut self, key: K, value: V) -> Result<(), TopazError>
    where
        HeaderName: TryFrom<K>,
        <HeaderName as TryFrom<K>>::Error: Into<http::Error>,
        HeaderValue: TryFrom<V>,
        <HeaderValue as TryFrom<V>>::Error: Into<http::Error>,
    {
        let name = HeaderName::try_from(key).map_err(Into::<http::Error>::into)?;
        let value = HeaderValue::try_from(value).map_err(Into::<http::Error>::into)?;
        self.headers.append(name, value);
        Ok(())
    }

    /// Media type of the response, from its `Content-Type` header
    pub fn content_type(&self) -> Option<MediaType> {
        self.headers
            .get(CONTENT_TYPE)
            .and_then(|v| v.to_str().ok())
            .and_then(|v| MediaType::parse(v).ok())
    }

    /// Get the cookies that will be sent with the response
    #[inline]
    pub fn cookies(&self) -> &CookieJar {
        &self.cookies
    }

    #[inline]
    pub fn cookies_mut(&mut self) -> &mut CookieJar {
        &mut self.cookies
    }

    /// Whether a body (possibly empty) was already sent
    #[inline]
    pub fn committed(&self) -> bool {
        self.committed
    }

    /// Discard status, headers, cookies and body. Returns `false`, leaving
    /// the response untouched, when it is already committed.
    pub fn reset(&mut self) -> bool {
        if self.committed {
            return false;
        }

        self.status = None;
        self.version = None;
        self.headers.clear();
        self.cookies = CookieJar::new();
        self.body = RawBody::empty();
        true
    }

    /// Merge a builder into the response. Status is replaced only if the
    /// builder explicitly set one, builder headers replace existing ones.
    pub(crate) fn apply(&mut self, builder: Builder) -> Result<(), TopazError> {
        let (parts, status_set, body, cookies) = builder.into_parts()?;
        let Parts { status, version, headers, .. } = parts;

        if status_set {
            self.status = Some(status);
        }
        if version != Version::default() {
            self.version = Some(version);
        }
        self.headers.extend(headers);
        if let Some(cookies) = cookies {
            for c in cookies.iter() {
                self.cookies.add(c.clone());
            }
        }
        if let Some(body) = body {
            self.body = body;
        }
        Ok(())
    }

    /// Mark the response as committed, defaulting the status to `200`
    pub(crate) fn commit(&mut self) {
        if self.status.is_none() {
            self.status = Some(StatusCode::OK);
        }
        self.committed = true;
    }

    /// Commit whatever was set so far with an empty body
    pub(crate) fn end(&mut self) {
        if !self.committed {
            self.body = RawBody::empty();
            self.commit();
        }
    }

    pub(crate) fn into_raw(self) -> Result<RawResponse<RawBody>, TopazError> {
        let Response {
            status,
            version,
            headers,
            cookies,
            body,
            committed: _,
        } = self;

        let mut raw = RawResponse::new(body);
        *raw.status_mut() = status.unwrap_or(StatusCode::OK);
        if let Some(version) = version {
            *raw.version_mut() = version;
        }
        *raw.headers_mut() = headers;
        for c in cookies.iter() {
            raw.headers_mut().append(SET_COOKIE, HeaderValue::from_str(c.to_string().as_str())?);
        }

        Ok(raw)
    }
}

impl Default for Response {
    fn default() -> Self {
        Self::new()
    }
}

/// Struct used to conveniently build a response
pub struct Builder {
    #[doc(hidden)]
    inner: RawBuilder,
    #[doc(hidden)]
    cookies: Option<CookieJar>,
    #[doc(hidden)]
    body: Option<RawBody>,
    #[doc(hidden)]
    status_set: bool,
}

impl Builder {
    /// Creates a new default instance of `Builder`.
    /// ```
    /// # use topaz::prelude::*;
    ///
    /// let response = Builder::new()
    ///     .status(200)
    ///     .build()
    ///     .unwrap();
    /// ```
    #[inline]
    pub fn new() -> Self {
        Builder {
            inner: RawBuilder::new(),
            cookies: None,
            body: None,
            status_set: false,
        }
    }

    #[inline]
    pub(crate) fn status_if_not_set<T>(self, status: T) -> Builder
    where
        StatusCode: TryFrom<T>,
        <StatusCode as TryFrom<T>>::Error: Into<http::Error>,
    {
        if !self.status_set {
            self.status(status)
        } else {
            self
        }
    }

    /// Set the HTTP status for this response.
    ///
    /// By default the response keeps whatever status was set on it before,
    /// `200` if none was.
    #[inline]
    pub fn status<T>(mut self, status: T) -> Builder
    where
        StatusCode: TryFrom<T>,
        <StatusCode as TryFrom<T>>::Error: Into<http::Error>,
    {
        self.status_set = true;
        self.inner = self.inner.status(status);
        self
    }

    #[inline]
    pub fn version(mut self, version: Version) -> Builder {
        self.inner = self.inner.version(version);
        self
    }

    /// Appends a header to this response builder.
    ///
    /// ```
    /// # use topaz::prelude::*;
    ///
    /// let response = Builder::new()
    ///     .header("X-Custom-Foo", "bar")
    ///     .build()
    ///     .unwrap();
    /// assert_eq!(response.headers()["X-Custom-Foo"], "bar");
    /// ```
    #[inline]
    pub fn header<K, V>(mut self, key: K, value: V) -> Builder
    where
        HeaderName: TryFrom<K>,
        <HeaderName as TryFrom<K>>::Error: Into<http::Error>,
        HeaderValue: TryFrom<V>,
        <HeaderValue as TryFrom<V>>::Error: Into<http::Error>,
    {
        self.inner = self.inner.header(key, value);
        self
    }

    /// Get headers on this response builder, `None` when the builder has an
    /// error
    #[inline]
    pub fn headers_ref(&self) -> Option<&HeaderMap<HeaderValue>> {
        self.inner.headers_ref()
    }

    #[inline]
    pub fn headers_mut(&mut self) -> Option<&mut HeaderMap<HeaderValue>> {
        self.inner.headers_mut()
    }

    #[inline]
    pub fn content_type(self, media_type: &MediaType) -> Builder {
        self.header(CONTENT_TYPE, media_type.to_string())
    }

    /// Set the `Content-Type` header unless a previous responder already did
    #[inline]
    pub fn content_type_if_not_set(self, media_type: &MediaType) -> Builder {
        if self.headers_ref().map(|h| h.contains_key(CONTENT_TYPE)).unwrap_or(true) {
            self
        } else {
            self.content_type(media_type)
        }
    }

    /// Adds a cookie to this builder
    /// ```
    /// # use topaz::prelude::*;
    ///
    /// let cookie = Cookie::new("MyCookie", "MyCookieValue");
    ///
    /// let response = Builder::new()
    ///     .cookie(cookie)
    ///     .build()
    ///     .unwrap();
    ///
    /// assert_eq!(response.cookies().get("MyCookie").map(|c| c.value()), Some("MyCookieValue"))
    /// ```
    #[inline]
    pub fn cookie(mut self, cookie: Cookie<'static>) -> Builder {
        self.cookies.get_or_insert_with(CookieJar::new).add(cookie);
        self
    }

    #[inline]
    pub fn body<B: Into<RawBody>>(mut self, body: B) -> Builder {
        self.body = Some(body.into());
        self
    }

    pub(crate) fn into_parts(self) -> Result<(Parts, bool, Option<RawBody>, Option<CookieJar>), TopazError> {
        let Builder {
            inner,
            cookies,
            body,
            status_set,
        } = self;
        let (parts, _) = inner.body(())?.into_parts();
        Ok((parts, status_set, body, cookies))
    }

    /// Finish the builder into a committed `Response`
    #[inline]
    pub fn build(self) -> Result<Response, TopazError> {
        let mut response = Response::new();
        response.apply(self)?;
        response.commit();
        Ok(response)
    }
}

impl Default for Builder {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(feature = "json")]
mod json {
    use serde::Serialize;

    use super::*;

    impl Builder {
        pub fn json<T: Serialize>(self, t: &T) -> Result<Builder, (Builder, TopazError)> {
            match serde_json::to_vec(t) {
                Ok(v) => Ok(self.content_type_if_not_set(&MediaType::json()).body(v)),
                Err(e) => Err((self, e.into())),
            }
        }
    }
}

#[cfg(feature = "form")]
mod form {
    use serde::Serialize;

    use super::*;

    impl Builder {
        pub fn form<T: Serialize>(self, t: &T) -> Result<Builder, (Builder, TopazError)> {
            match serde_urlencoded::to_string(t) {
                Ok(v) => Ok(self.content_type_if_not_set(&MediaType::form()).body(v)),
                Err(e) => Err((self, TopazError::rendering(e))),
            }
        }
    }
}
