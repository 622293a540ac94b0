use http::{
    header::{InvalidHeaderValue, ToStrError},
    Error as HttpCrateError, StatusCode,
};
use hyper::Error as HyperError;
use std::{error::Error as StdError, io::Error as IoError};
use thiserror::Error;

/// Boxed error type used to carry user errors through the dispatch loop
pub type BoxError = Box<dyn StdError + Send + Sync + 'static>;

/// Type representing an internal error inherent to the underlying http
/// stack
#[derive(Debug, Error)]
pub enum InternalError {
    #[error("http: {0}")]
    Http(#[from] HttpCrateError),
    #[error("hyper: {0}")]
    Hyper(#[from] HyperError),
    #[error("header value is not visible ascii: {0}")]
    ToStr(#[from] ToStrError),
}

/// Error type throughout the topaz stack
#[derive(Debug, Error)]
pub enum TopazError {
    /// No route matched the path, for any verb
    #[error("no route matches {0}")]
    NotFound(String),
    /// The path matches a route registered under another verb
    #[error("method {0} is not allowed")]
    MethodNotAllowed(String),
    /// No producible type satisfies the request `Accept` header
    #[error("none of the acceptable types {0} can be produced")]
    NotAcceptable(String),
    /// The request `Content-Type` is not consumed by the matching routes
    #[error("content type {0} is not supported")]
    UnsupportedMediaType(String),
    /// Explicit framework error carrying the status to respond with
    #[error("{1}")]
    Status(StatusCode, String),
    /// Error returned by user code while the chain was executing
    #[error("handler failed: {0}")]
    Handler(#[source] BoxError),
    /// Error raised while turning a handler result into a response
    #[error("unable to render response: {0}")]
    Rendering(#[source] BoxError),
    #[error("handler panicked: {0}")]
    Panic(String),
    #[error("missing parameter {0}")]
    MissingParameter(String),
    #[error("unable to parse parameter {0}")]
    InvalidParameter(String),
    /// Request body is bigger than the configured limit (in bytes)
    #[error("request body exceeds {0} bytes")]
    PayloadTooLarge(usize),
    /// Body was taken and cannot be read again
    #[error("request body was already taken")]
    BodyAlreadyTaken,
    #[error("invalid route pattern: {0}")]
    InvalidPattern(String),
    #[error("no executor named {0}")]
    ExecutorNotFound(String),
    /// Every handle of a deferred was dropped before it was resolved
    #[error("deferred was dropped without being resolved")]
    DeferredDropped,
    #[error(transparent)]
    Internal(#[from] InternalError),
    #[error("io: {0}")]
    Io(#[from] IoError),
    /// Error from (de)serializing json data
    #[cfg(feature = "json")]
    #[error("json: {0}")]
    Json(#[from] serde_json::Error),
    /// Error from deserializing form data
    #[error("form: {0}")]
    Form(#[from] serde_urlencoded::de::Error),
    #[error("{0}")]
    Other(String),
}

impl TopazError {
    /// Explicit error with the status the client should receive
    pub fn status<S: Into<String>>(status: StatusCode, message: S) -> Self {
        TopazError::Status(status, message.into())
    }

    /// Wrap any user error. A `TopazError` passed through here is returned
    /// as is, so its intrinsic status survives.
    pub fn handler<E: Into<BoxError>>(e: E) -> Self {
        let boxed: BoxError = e.into();
        match boxed.downcast::<TopazError>() {
            Ok(e) => *e,
            Err(other) => TopazError::Handler(other),
        }
    }

    /// Wrap an error raised by a renderer or a responder
    pub fn rendering<E: Into<BoxError>>(e: E) -> Self {
        TopazError::Rendering(e.into())
    }

    /// Status dictated by the kind of error itself, without consulting any
    /// status table
    pub fn intrinsic_status(&self) -> Option<StatusCode> {
        match self {
            TopazError::NotFound(_) => Some(StatusCode::NOT_FOUND),
            TopazError::MethodNotAllowed(_) => Some(StatusCode::METHOD_NOT_ALLOWED),
            TopazError::NotAcceptable(_) => Some(StatusCode::NOT_ACCEPTABLE),
            TopazError::UnsupportedMediaType(_) => Some(StatusCode::UNSUPPORTED_MEDIA_TYPE),
            TopazError::Status(s, _) => Some(*s),
            TopazError::MissingParameter(_) | TopazError::InvalidParameter(_) | TopazError::Form(_) => Some(StatusCode::BAD_REQUEST),
            #[cfg(feature = "json")]
            TopazError::Json(_) => Some(StatusCode::BAD_REQUEST),
            TopazError::PayloadTooLarge(_) => Some(StatusCode::PAYLOAD_TOO_LARGE),
            _ => None,
        }
    }
}

impl From<HttpCrateError> for TopazError {
    fn from(e: HttpCrateError) -> Self {
        TopazError::Internal(InternalError::Http(e))
    }
}

impl From<InvalidHeaderValue> for TopazError {
    fn from(e: InvalidHeaderValue) -> Self {
        TopazError::Internal(InternalError::Http(HttpCrateError::from(e)))
    }
}

impl From<HyperError> for TopazError {
    fn from(e: HyperError) -> Self {
        TopazError::Internal(InternalError::Hyper(e))
    }
}

impl From<ToStrError> for TopazError {
    fn from(e: ToStrError) -> Self {
        TopazError::Internal(InternalError::ToStr(e))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[derive(Debug, Error)]
    #[error("boom")]
    struct Boom;

    #[test]
    fn handler_keeps_framework_errors() {
        let e = TopazError::handler(TopazError::status(StatusCode::CONFLICT, "taken"));
        assert_eq!(e.intrinsic_status(), Some(StatusCode::CONFLICT));
    }

    #[test]
    fn handler_wraps_user_errors() {
        let e = TopazError::handler(Boom);
        assert!(matches!(e, TopazError::Handler(_)));
        assert_eq!(e.intrinsic_status(), None);
        assert_eq!(e.source().map(|s| s.to_string()), Some("boom".to_string()));
    }
}
