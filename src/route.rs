//! Route definitions and bound routes.
//!
//! A [`RouteDefinition`] is what gets registered on the router: a verb, a
//! pattern, a handler and the media types it consumes and produces. Matching
//! a definition against a request yields a [`Route`], the definition bound to
//! that request's variables and negotiated media types.

use crate::{
    chain::Chain,
    error::TopazError,
    http_context::HttpContext,
    media_type::{self, MediaType},
    pattern::RoutePattern,
    request::Request,
    responder::{IntoOutcome, Outcome},
    response::Response,
};
use futures::{future::BoxFuture, FutureExt};
use http::Method;
use std::{
    any::Any,
    collections::{BTreeMap, HashMap},
    fmt::{Debug, Formatter},
    panic::{catch_unwind, AssertUnwindSafe, Location},
    sync::Arc,
};

/// Signature of a filter: it receives the chain and decides whether and when
/// to call the next route
pub type FilterFn = dyn for<'a> Fn(&'a mut HttpContext, Chain) -> BoxFuture<'a, Result<(), TopazError>> + Send + Sync;
pub type BeforeFn = dyn Fn(&mut HttpContext) -> Result<(), TopazError> + Send + Sync;
pub type AfterFn = dyn Fn(&Request, &mut Response) -> Result<(), TopazError> + Send + Sync;
pub type CompleteFn = dyn Fn(&Request, &Response, Option<&TopazError>) + Send + Sync;

/// Every shape a route handler can take. Whatever the shape, the dispatch
/// loop calls it the same way, with the context and the rest of the chain.
#[derive(Clone)]
pub enum RouteHandler {
    /// Handler ignoring the request
    NoArg(Arc<dyn Fn() -> Outcome + Send + Sync>),
    /// Handler reading the request
    OneArg(Arc<dyn Fn(&mut Request) -> Outcome + Send + Sync>),
    Filter(Arc<FilterFn>),
    /// Runs, then continues the chain
    Before(Arc<BeforeFn>),
    /// Runs right before the response is committed
    After(Arc<AfterFn>),
    /// Runs once the dispatch is over, whatever the outcome
    Complete(Arc<CompleteFn>),
}

impl RouteHandler {
    pub fn no_arg<F, R>(f: F) -> Self
    where
        F: Fn() -> R + Send + Sync + 'static,
        R: IntoOutcome,
    {
        RouteHandler::NoArg(Arc::new(move || f().into_outcome()))
    }

    pub fn one_arg<F, R>(f: F) -> Self
    where
        F: Fn(&mut Request) -> R + Send + Sync + 'static,
        R: IntoOutcome,
    {
        RouteHandler::OneArg(Arc::new(move |req: &mut Request| f(req).into_outcome()))
    }

    pub fn filter<F>(f: F) -> Self
    where
        F: for<'a> Fn(&'a mut HttpContext, Chain) -> BoxFuture<'a, Result<(), TopazError>> + Send + Sync + 'static,
    {
        RouteHandler::Filter(Arc::new(f))
    }

    pub fn before<F>(f: F) -> Self
    where
        F: Fn(&mut HttpContext) -> Result<(), TopazError> + Send + Sync + 'static,
    {
        RouteHandler::Before(Arc::new(f))
    }

    pub fn after<F>(f: F) -> Self
    where
        F: Fn(&Request, &mut Response) -> Result<(), TopazError> + Send + Sync + 'static,
    {
        RouteHandler::After(Arc::new(f))
    }

    pub fn complete<F>(f: F) -> Self
    where
        F: Fn(&Request, &Response, Option<&TopazError>) + Send + Sync + 'static,
    {
        RouteHandler::Complete(Arc::new(f))
    }

    pub fn kind(&self) -> &'static str {
        match self {
            RouteHandler::NoArg(_) => "handler",
            RouteHandler::OneArg(_) => "handler",
            RouteHandler::Filter(_) => "filter",
            RouteHandler::Before(_) => "before",
            RouteHandler::After(_) => "after",
            RouteHandler::Complete(_) => "complete",
        }
    }

    /// Whether the handler answers the request, as opposed to a filter or a
    /// listener around it
    pub fn is_terminal(&self) -> bool {
        matches!(self, RouteHandler::NoArg(_) | RouteHandler::OneArg(_))
    }

    /// Run the handler. Handlers producing an outcome apply it to the context
    /// before continuing the chain; filters continue it themselves.
    pub(crate) fn invoke<'a>(&self, ctx: &'a mut HttpContext, chain: Chain) -> BoxFuture<'a, Result<(), TopazError>> {
        match self {
            RouteHandler::NoArg(f) => {
                let outcome = guarded(|| f()).unwrap_or_else(Outcome::Error);
                Box::pin(async move {
                    ctx.apply(outcome)?;
                    chain.next(ctx).await
                })
            }
            RouteHandler::OneArg(f) => {
                let outcome = guarded(|| f(&mut ctx.request)).unwrap_or_else(Outcome::Error);
                Box::pin(async move {
                    ctx.apply(outcome)?;
                    chain.next(ctx).await
                })
            }
            RouteHandler::Filter(f) => match guarded(move || f(ctx, chain)) {
                Ok(fut) => AssertUnwindSafe(fut)
                    .catch_unwind()
                    .map(|r| r.unwrap_or_else(|p| Err(panic_error(p))))
                    .boxed(),
                Err(e) => futures::future::ready(Err(e)).boxed(),
            },
            RouteHandler::Before(f) => {
                let result = guarded(|| f(ctx)).and_then(|r| r);
                Box::pin(async move {
                    result?;
                    chain.next(ctx).await
                })
            }
            RouteHandler::After(_) | RouteHandler::Complete(_) => chain.next(ctx),
        }
    }
}

impl Debug for RouteHandler {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.kind())
    }
}

/// Call user code, turning a panic into an error
pub(crate) fn guarded<T, F: FnOnce() -> T>(f: F) -> Result<T, TopazError> {
    catch_unwind(AssertUnwindSafe(f)).map_err(panic_error)
}

pub(crate) fn panic_error(payload: Box<dyn Any + Send>) -> TopazError {
    let message = payload
        .downcast_ref::<&str>()
        .map(|s| s.to_string())
        .or_else(|| payload.downcast_ref::<String>().cloned())
        .unwrap_or_else(|| "unknown panic".to_string());
    TopazError::Panic(message)
}

/// A handler registered for a verb and a pattern
pub struct RouteDefinition {
    pattern: RoutePattern,
    handler: RouteHandler,
    consumes: Vec<MediaType>,
    produces: Vec<MediaType>,
    name: Option<String>,
    attributes: HashMap<String, String>,
    source: Option<&'static Location<'static>>,
}

impl RouteDefinition {
    /// Define a route. `*` as pattern matches every path.
    #[track_caller]
    pub fn new(method: Method, pattern: &str, handler: RouteHandler) -> Result<Self, TopazError> {
        Ok(RouteDefinition {
            pattern: RoutePattern::new(method, pattern)?,
            handler,
            consumes: vec![MediaType::any()],
            produces: vec![MediaType::any()],
            name: None,
            attributes: HashMap::new(),
            source: Some(Location::caller()),
        })
    }

    /// Recompile the pattern with the router case sensitivity
    pub(crate) fn set_case_sensitive(&mut self, case_sensitive: bool) -> Result<(), TopazError> {
        self.pattern = RoutePattern::with_case_sensitivity(self.pattern.method().clone(), self.pattern.pattern(), case_sensitive)?;
        Ok(())
    }

    /// Media types this route accepts as request body. An empty list means
    /// `*/*`.
    pub fn with_consumes<I: IntoIterator<Item = MediaType>>(mut self, types: I) -> Self {
        self.consumes = types.into_iter().collect();
        if self.consumes.is_empty() {
            self.consumes.push(MediaType::any());
        }
        self
    }

    /// Media types this route can respond with. An empty list means `*/*`.
    pub fn with_produces<I: IntoIterator<Item = MediaType>>(mut self, types: I) -> Self {
        self.produces = types.into_iter().collect();
        if self.produces.is_empty() {
            self.produces.push(MediaType::any());
        }
        self
    }

    pub fn with_name(mut self, name: &str) -> Self {
        self.name = Some(name.to_string());
        self
    }

    pub fn with_attribute(mut self, key: &str, value: &str) -> Self {
        self.attributes.insert(key.to_string(), value.to_string());
        self
    }

    #[inline]
    pub fn method(&self) -> &Method {
        self.pattern.method()
    }

    #[inline]
    pub fn pattern(&self) -> &RoutePattern {
        &self.pattern
    }

    #[inline]
    pub fn handler(&self) -> &RouteHandler {
        &self.handler
    }

    #[inline]
    pub fn consumes(&self) -> &[MediaType] {
        &self.consumes
    }

    #[inline]
    pub fn produces(&self) -> &[MediaType] {
        &self.produces
    }

    #[inline]
    pub fn name(&self) -> Option<&str> {
        self.name.as_deref()
    }

    #[inline]
    pub fn attributes(&self) -> &HashMap<String, String> {
        &self.attributes
    }

    /// Where in the source the route was registered
    #[inline]
    pub fn source(&self) -> Option<&'static Location<'static>> {
        self.source
    }

    /// Whether a body of type `content_type` is accepted. A request without
    /// `Content-Type` (`*/*`) is accepted by every route.
    pub fn can_consume(&self, content_type: &MediaType) -> bool {
        content_type.is_any() || self.consumes.iter().any(|c| c.matches(content_type))
    }

    /// Whether at least one of the accepted types can be produced
    pub fn can_produce(&self, accept: &[MediaType]) -> bool {
        media_type::matches(accept, &self.produces)
    }

    /// Bind the definition to a request when verb, path and media types all
    /// match
    pub fn matches(self: &Arc<Self>, method: &Method, path: &str, content_type: &MediaType, accept: &[MediaType]) -> Option<Route> {
        let path_match = self.pattern.matches(method, path)?;
        if !self.can_consume(content_type) || !self.can_produce(accept) {
            return None;
        }

        Some(Route {
            definition: self.clone(),
            method: method.clone(),
            path: path.to_string(),
            captures: path_match.vars,
            positional: path_match.positional,
            produces: media_type::filter(accept, &self.produces),
        })
    }
}

impl Debug for RouteDefinition {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RouteDefinition")
            .field("method", self.method())
            .field("pattern", &self.pattern.pattern())
            .field("handler", &self.handler)
            .field("name", &self.name)
            .field("source", &self.source.map(|l| l.to_string()))
            .finish()
    }
}

/// A definition bound to a request
#[derive(Clone, Debug)]
pub struct Route {
    definition: Arc<RouteDefinition>,
    method: Method,
    path: String,
    captures: HashMap<String, String>,
    positional: BTreeMap<usize, String>,
    produces: Vec<MediaType>,
}

impl Route {
    /// Bind a definition to a path without matching it
    pub(crate) fn bind(definition: Arc<RouteDefinition>, method: &Method, path: &str) -> Self {
        Route {
            definition,
            method: method.clone(),
            path: path.to_string(),
            captures: HashMap::new(),
            positional: BTreeMap::new(),
            produces: vec![MediaType::any()],
        }
    }

    #[inline]
    pub fn definition(&self) -> &RouteDefinition {
        &self.definition
    }

    /// Verb the route was matched with
    #[inline]
    pub fn method(&self) -> &Method {
        &self.method
    }

    #[inline]
    pub fn path(&self) -> &str {
        &self.path
    }

    #[inline]
    pub fn pattern(&self) -> &str {
        self.definition.pattern.pattern()
    }

    #[inline]
    pub fn captures(&self) -> &HashMap<String, String> {
        &self.captures
    }

    #[inline]
    pub fn positional(&self) -> &BTreeMap<usize, String> {
        &self.positional
    }

    /// Produced types narrowed to what the request accepts, best first
    #[inline]
    pub fn produces(&self) -> &[MediaType] {
        &self.produces
    }

    #[inline]
    pub fn name(&self) -> Option<&str> {
        self.definition.name()
    }

    #[inline]
    pub fn attributes(&self) -> &HashMap<String, String> {
        self.definition.attributes()
    }

    #[inline]
    pub fn consumes(&self) -> &[MediaType] {
        self.definition.consumes()
    }

    #[inline]
    pub fn source(&self) -> Option<&'static Location<'static>> {
        self.definition.source()
    }

    #[inline]
    pub(crate) fn handler(&self) -> &RouteHandler {
        &self.definition.handler
    }
}
