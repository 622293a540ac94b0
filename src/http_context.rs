use std::sync::Arc;

use futures::Stream;
use http::{header::LOCATION, StatusCode};
use hyper::body::{Body as RawBody, Buf, Bytes};

use crate::{
    deferred::Deferred,
    error::TopazError,
    media_type::MediaType,
    request::Request,
    responder::{DynResponder, Outcome, Responder},
    response::{Builder, Response},
    route::{guarded, AfterFn, CompleteFn, Route},
    router::Router,
};

#[cfg(feature = "operation")]
pub static OPERATION_ID_HEADER: &str = "Operation-Id";

/// Context representing the relationship between a request and its response
/// for the duration of a dispatch
pub struct HttpContext {
    pub request: Request,
    pub response: Response,
    #[cfg(feature = "operation")]
    /// Unique Identifier of the current request->response chain
    pub operation_id: crate::http_context::operation::OperationId,
    after: Vec<Arc<AfterFn>>,
    complete: Vec<Arc<CompleteFn>>,
    deferred: Option<Deferred>,
    router: Router,
}

impl HttpContext {
    pub(crate) fn new(request: Request, router: Router) -> Self {
        #[cfg(not(feature = "operation"))]
        {
            HttpContext {
                request,
                response: Response::new(),
                after: Vec::new(),
                complete: Vec::new(),
                deferred: None,
                router,
            }
        }

        #[cfg(feature = "operation")]
        {
            use std::str::FromStr;
            let mut request = request;
            let operation_id = request
                .headers()
                .get(OPERATION_ID_HEADER)
                .and_then(|h| h.to_str().ok())
                .and_then(|op_id_str| operation::OperationId::from_str(op_id_str).ok())
                .unwrap_or_else(operation::OperationId::new);
            *request.operation_id_mut() = operation_id;
            HttpContext {
                request,
                response: Response::new(),
                operation_id,
                after: Vec::new(),
                complete: Vec::new(),
                deferred: None,
                router,
            }
        }
    }

    #[inline]
    pub fn router(&self) -> &Router {
        &self.router
    }

    /// The route currently executing
    #[inline]
    pub fn route(&self) -> Option<&Route> {
        self.request.route()
    }

    /// Best media type the current route can produce for this request
    pub fn negotiated(&self) -> Option<&MediaType> {
        self.route().and_then(|r| r.produces().first())
    }

    /// Send a responder and commit the response. After filters run first, a
    /// send on a committed response is ignored.
    pub fn send<R: Responder>(&mut self, responder: R) -> Result<(), TopazError> {
        if self.response.committed() {
            warn!("Response to {} {} already committed, ignoring send", self.request.method(), self.request.path());
            return Ok(());
        }

        let builder = responder.respond_with_builder(Builder::new(), self)?;
        self.commit(builder)
    }

    pub(crate) fn send_dyn(&mut self, mut responder: Box<dyn DynResponder + Send>) -> Result<(), TopazError> {
        if self.response.committed() {
            warn!("Response to {} {} already committed, ignoring send", self.request.method(), self.request.path());
            return Ok(());
        }

        let builder = responder.dyn_respond(Builder::new(), self)?;
        self.commit(builder)
    }

    #[inline]
    pub fn send_bytes<B: Into<Bytes>>(&mut self, bytes: B) -> Result<(), TopazError> {
        self.send(bytes.into())
    }

    /// Send whatever remains in `buf`
    pub fn send_buffer<B: Buf>(&mut self, mut buf: B) -> Result<(), TopazError> {
        let bytes = buf.copy_to_bytes(buf.remaining());
        self.send(bytes)
    }

    /// Commit the response with a streamed body
    pub fn send_stream<S, O, E>(&mut self, stream: S) -> Result<(), TopazError>
    where
        S: Stream<Item = Result<O, E>> + Send + 'static,
        O: Into<Bytes> + 'static,
        E: Into<Box<dyn std::error::Error + Send + Sync>> + 'static,
    {
        self.send(Builder::new().body(RawBody::wrap_stream(stream)))
    }

    /// Commit a `302 Found` pointing to `location`
    pub fn redirect(&mut self, location: &str) -> Result<(), TopazError> {
        self.send(Builder::new().status(StatusCode::FOUND).header(LOCATION, location))
    }

    /// Commit whatever was set on the response so far, with an empty body
    pub fn end(&mut self) -> Result<(), TopazError> {
        if self.response.committed() {
            return Ok(());
        }
        self.commit(Builder::new())
    }

    fn commit(&mut self, builder: Builder) -> Result<(), TopazError> {
        self.response.apply(builder)?;
        for after in std::mem::take(&mut self.after) {
            guarded(|| after(&self.request, &mut self.response)).and_then(|r| r)?;
        }
        self.response.commit();
        Ok(())
    }

    /// Hand the request to a deferred. The chain stops and the dispatch waits
    /// for the deferred completion.
    pub fn detach(&mut self, deferred: Deferred) {
        if self.deferred.is_some() {
            warn!("Request {} {} is already detached, ignoring deferred", self.request.method(), self.request.path());
            return;
        }
        self.deferred = Some(deferred);
    }

    #[inline]
    pub fn is_detached(&self) -> bool {
        self.deferred.is_some()
    }

    pub(crate) fn take_deferred(&mut self) -> Option<Deferred> {
        self.deferred.take()
    }

    pub(crate) fn apply(&mut self, outcome: Outcome) -> Result<(), TopazError> {
        match outcome {
            Outcome::Sync(responder) => self.send_dyn(responder),
            Outcome::Async(deferred) => {
                self.detach(deferred);
                Ok(())
            }
            Outcome::Error(e) => Err(e),
        }
    }

    pub(crate) fn set_listeners(&mut self, after: Vec<Arc<AfterFn>>, complete: Vec<Arc<CompleteFn>>) {
        self.after = after;
        self.complete = complete;
    }

    /// Prepare the response for an error page. After filters only apply to
    /// regular responses.
    pub(crate) fn reset_for_error(&mut self) -> bool {
        self.after.clear();
        self.response.reset()
    }

    pub(crate) fn take_complete(&mut self) -> Vec<Arc<CompleteFn>> {
        std::mem::take(&mut self.complete)
    }

    pub(crate) fn into_response(self) -> Response {
        #[cfg(feature = "operation")]
        {
            let mut response = self.response;
            if let Ok(value) = http::HeaderValue::from_str(&self.operation_id.to_string()) {
                response.headers_mut().insert(OPERATION_ID_HEADER, value);
            }
            response
        }

        #[cfg(not(feature = "operation"))]
        self.response
    }
}

#[cfg(feature = "operation")]
pub mod operation {
    use std::{
        fmt::{Debug, Display, Formatter},
        str::FromStr,
    };
    use uuid::Uuid;

    /// Represent a single operation from a incoming request until a response is
    /// produced
    #[derive(Clone, Copy, Eq, Hash, Ord, PartialEq, PartialOrd, Default)]
    pub struct OperationId(Uuid);

    impl OperationId {
        pub fn new() -> OperationId {
            OperationId(Uuid::new_v4())
        }

        pub fn to_u128(&self) -> u128 {
            self.0.as_u128()
        }
    }

    impl Display for OperationId {
        fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
            Display::fmt(&self.0.hyphenated(), f)
        }
    }

    impl Debug for OperationId {
        fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
            Display::fmt(&self.0.hyphenated(), f)
        }
    }

    impl FromStr for OperationId {
        type Err = uuid::Error;

        fn from_str(s: &str) -> Result<Self, Self::Err> {
            Uuid::parse_str(s).map(OperationId)
        }
    }
}
