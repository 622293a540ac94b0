//! The router holds every route definition and drives the dispatch of a
//! request:
//!
//! 1. the body is buffered and the path normalized, relative to the context
//!    path;
//! 2. the verb is overridden when configured to;
//! 3. websocket upgrades are handed to socket routes;
//! 4. matching routes are bound, in registration order, followed by the
//!    406/415, 405 and 404 fallbacks;
//! 5. the chain runs until a route stops it or the response is committed;
//! 6. errors are rendered by the error handlers, deferred completions are
//!    awaited;
//! 7. complete listeners run and the status line is logged, once.

use crate::{
    body::{Body, DEFAULT_MAX_BODY_SIZE},
    chain::Chain,
    deferred::{BlockingExecutor, Completion, Deferred, Executor, ExecutorRef},
    error::TopazError,
    error_handler::{ErrorHandler, ErrorHandling, StatusTable},
    http_context::HttpContext,
    media_type::MediaType,
    request::Request,
    responder::IntoOutcome,
    response::Response,
    route::{guarded, Route, RouteDefinition, RouteHandler},
    socket::{self, SocketHandler, SocketRoute},
    utils::{normalize_path, strip_context_path, MethodExtension, VERBS},
};
use futures::future::BoxFuture;
use http::{Method, Request as RawRequest, Response as RawResponse, StatusCode};
use hyper::body::Body as RawBody;
use std::{collections::HashMap, error::Error as StdError, net::SocketAddr, sync::Arc};
use tokio::sync::oneshot;

#[cfg(feature = "json")]
use crate::renderer::{JsonRenderer, Renderer, TextRenderer};

/// Query or form parameter conventionally used to override the verb
pub const DEFAULT_METHOD_OVERRIDE_PARAM: &str = "_method";

/// Where to read the verb a client could not send on the wire
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum MethodOverride {
    Header(String),
    /// Query string parameter or url encoded form field
    Param(String),
}

impl Default for MethodOverride {
    fn default() -> Self {
        MethodOverride::Param(DEFAULT_METHOD_OVERRIDE_PARAM.to_string())
    }
}

#[derive(Debug, Clone)]
pub struct RouterConfig {
    /// Prefix every routed path lives under, `/` by default
    pub context_path: String,
    /// Disabled by default
    pub method_override: Option<MethodOverride>,
    pub case_sensitive: bool,
    /// Request bodies bigger than this are rejected, `None` for no limit
    pub max_body_size: Option<usize>,
}

impl Default for RouterConfig {
    fn default() -> Self {
        RouterConfig {
            context_path: "/".to_string(),
            method_override: None,
            case_sensitive: true,
            max_body_size: Some(DEFAULT_MAX_BODY_SIZE),
        }
    }
}

/// Builder collecting routes and configuration. Registration order matters:
/// routes matching the same request run in the order they were added.
pub struct RouterBuilder {
    config: RouterConfig,
    routes: Vec<RouteDefinition>,
    sockets: Vec<(String, Arc<SocketHandler>)>,
    error_handlers: Vec<Arc<ErrorHandler>>,
    statuses: StatusTable,
    executors: HashMap<String, Arc<dyn Executor>>,
    default_executor: Arc<dyn Executor>,
    #[cfg(feature = "json")]
    renderers: Vec<Arc<dyn Renderer>>,
    errors: Vec<TopazError>,
}

impl Default for RouterBuilder {
    fn default() -> Self {
        RouterBuilder {
            config: RouterConfig::default(),
            routes: Vec::new(),
            sockets: Vec::new(),
            error_handlers: Vec::new(),
            statuses: StatusTable::new(),
            executors: HashMap::new(),
            default_executor: Arc::new(BlockingExecutor),
            #[cfg(feature = "json")]
            renderers: Vec::new(),
            errors: Vec::new(),
        }
    }
}

impl RouterBuilder {
    /// Register a route definition as is
    pub fn add(mut self, definition: RouteDefinition) -> Self {
        self.routes.push(definition);
        self
    }

    /// Register a handler of any shape. An invalid pattern is reported by
    /// [`build`](RouterBuilder::build).
    #[track_caller]
    pub fn handler(mut self, method: Method, pattern: &str, handler: RouteHandler) -> Self {
        match RouteDefinition::new(method, pattern, handler) {
            Ok(definition) => self.add(definition),
            Err(e) => {
                self.errors.push(e);
                self
            }
        }
    }

    /// Register a handler reading the request
    ///
    /// ```rust
    /// # use topaz::prelude::*;
    /// let router = Router::builder()
    ///     .route(Method::GET, "/user/:id", |req: &mut Request| req.param_as::<u64>("id").map(|id| format!("user {}", id)))
    ///     .build();
    /// assert!(router.is_ok());
    /// ```
    #[track_caller]
    pub fn route<F, R>(self, method: Method, pattern: &str, handler: F) -> Self
    where
        F: Fn(&mut Request) -> R + Send + Sync + 'static,
        R: IntoOutcome,
    {
        self.handler(method, pattern, RouteHandler::one_arg(handler))
    }

    #[track_caller]
    pub fn get<F, R>(self, pattern: &str, handler: F) -> Self
    where
        F: Fn(&mut Request) -> R + Send + Sync + 'static,
        R: IntoOutcome,
    {
        self.route(Method::GET, pattern, handler)
    }

    #[track_caller]
    pub fn post<F, R>(self, pattern: &str, handler: F) -> Self
    where
        F: Fn(&mut Request) -> R + Send + Sync + 'static,
        R: IntoOutcome,
    {
        self.route(Method::POST, pattern, handler)
    }

    #[track_caller]
    pub fn put<F, R>(self, pattern: &str, handler: F) -> Self
    where
        F: Fn(&mut Request) -> R + Send + Sync + 'static,
        R: IntoOutcome,
    {
        self.route(Method::PUT, pattern, handler)
    }

    #[track_caller]
    pub fn delete<F, R>(self, pattern: &str, handler: F) -> Self
    where
        F: Fn(&mut Request) -> R + Send + Sync + 'static,
        R: IntoOutcome,
    {
        self.route(Method::DELETE, pattern, handler)
    }

    #[track_caller]
    pub fn patch<F, R>(self, pattern: &str, handler: F) -> Self
    where
        F: Fn(&mut Request) -> R + Send + Sync + 'static,
        R: IntoOutcome,
    {
        self.route(Method::PATCH, pattern, handler)
    }

    /// Register a filter. It must call `chain.next(ctx)` for the routes
    /// after it to run.
    ///
    /// ```rust
    /// # use topaz::prelude::*;
    /// let router = Router::builder()
    ///     .filter(Method::any(), "*", |ctx, chain| {
    ///         Box::pin(async move {
    ///             if ctx.request.header("Authorization").is_none() {
    ///                 return ctx.send(StatusCode::UNAUTHORIZED);
    ///             }
    ///             chain.next(ctx).await
    ///         })
    ///     })
    ///     .build();
    /// assert!(router.is_ok());
    /// ```
    #[track_caller]
    pub fn filter<F>(self, method: Method, pattern: &str, filter: F) -> Self
    where
        F: for<'a> Fn(&'a mut HttpContext, Chain) -> BoxFuture<'a, Result<(), TopazError>> + Send + Sync + 'static,
    {
        self.handler(method, pattern, RouteHandler::filter(filter))
    }

    /// Register code running before the next routes
    #[track_caller]
    pub fn before<F>(self, method: Method, pattern: &str, before: F) -> Self
    where
        F: Fn(&mut HttpContext) -> Result<(), TopazError> + Send + Sync + 'static,
    {
        self.handler(method, pattern, RouteHandler::before(before))
    }

    /// Register code running right before a matching response is committed
    #[track_caller]
    pub fn after<F>(self, method: Method, pattern: &str, after: F) -> Self
    where
        F: Fn(&Request, &mut Response) -> Result<(), TopazError> + Send + Sync + 'static,
    {
        self.handler(method, pattern, RouteHandler::after(after))
    }

    /// Register code running once a matching request is over
    #[track_caller]
    pub fn complete<F>(self, method: Method, pattern: &str, complete: F) -> Self
    where
        F: Fn(&Request, &Response, Option<&TopazError>) + Send + Sync + 'static,
    {
        self.handler(method, pattern, RouteHandler::complete(complete))
    }

    pub fn web_socket<F>(mut self, pattern: &str, handler: F) -> Self
    where
        F: Fn(&mut HttpContext) -> Result<(), TopazError> + Send + Sync + 'static,
    {
        self.sockets.push((pattern.to_string(), Arc::new(handler)));
        self
    }

    /// Add an error handler, tried after the ones already added
    pub fn error_handler<F>(mut self, handler: F) -> Self
    where
        F: Fn(&mut HttpContext, &TopazError) -> Result<(), TopazError> + Send + Sync + 'static,
    {
        self.error_handlers.push(Arc::new(handler));
        self
    }

    /// Respond with `status` to errors of type `E`, or caused by one
    pub fn map_error<E: StdError + 'static>(mut self, status: StatusCode) -> Self {
        self.statuses.map::<E>(status);
        self
    }

    /// Register an executor deferred work can be handed to by name
    pub fn executor(mut self, name: &str, executor: Arc<dyn Executor>) -> Self {
        self.executors.insert(name.to_string(), executor);
        self
    }

    /// Executor running `Deferred::run` work, tokio's blocking pool by
    /// default
    pub fn default_executor(mut self, executor: Arc<dyn Executor>) -> Self {
        self.default_executor = executor;
        self
    }

    /// Add a renderer for [`Model`](crate::renderer::Model) responses. When
    /// none is added, json and plain text renderers are used.
    #[cfg(feature = "json")]
    pub fn renderer<R: Renderer + 'static>(mut self, renderer: R) -> Self {
        self.renderers.push(Arc::new(renderer));
        self
    }

    pub fn context_path(mut self, context_path: &str) -> Self {
        self.config.context_path = normalize_path(context_path);
        self
    }

    pub fn method_override(mut self, method_override: MethodOverride) -> Self {
        self.config.method_override = Some(method_override);
        self
    }

    pub fn case_sensitive(mut self, case_sensitive: bool) -> Self {
        self.config.case_sensitive = case_sensitive;
        self
    }

    pub fn max_body_size(mut self, limit: Option<usize>) -> Self {
        self.config.max_body_size = limit;
        self
    }

    pub fn configure(mut self, config: RouterConfig) -> Self {
        self.config = config;
        self.config.context_path = normalize_path(&self.config.context_path);
        self
    }

    /// Freeze the routes. Fails with the first invalid pattern registered.
    pub fn build(self) -> Result<Router, TopazError> {
        let RouterBuilder {
            config,
            routes,
            sockets,
            error_handlers,
            statuses,
            executors,
            default_executor,
            #[cfg(feature = "json")]
            mut renderers,
            errors,
        } = self;

        if let Some(e) = errors.into_iter().next() {
            return Err(e);
        }

        let routes = routes
            .into_iter()
            .map(|mut definition| {
                if !config.case_sensitive {
                    definition.set_case_sensitive(false)?;
                }
                Ok(Arc::new(definition))
            })
            .collect::<Result<Vec<_>, TopazError>>()?;

        let sockets = sockets
            .into_iter()
            .map(|(pattern, handler)| SocketRoute::new(&pattern, config.case_sensitive, handler))
            .collect::<Result<Vec<_>, TopazError>>()?;

        #[cfg(feature = "json")]
        if renderers.is_empty() {
            renderers.push(Arc::new(JsonRenderer));
            renderers.push(Arc::new(TextRenderer));
        }

        Ok(Router {
            inner: Arc::new(RouterInner {
                config,
                routes,
                fallbacks: Fallbacks::new()?,
                sockets,
                errors: ErrorHandling {
                    handlers: error_handlers,
                    statuses,
                },
                executors,
                default_executor,
                #[cfg(feature = "json")]
                renderers,
            }),
        })
    }
}

/// Synthetic routes closing every chain
struct Fallbacks {
    negotiation: Arc<RouteDefinition>,
    method_not_allowed: Arc<RouteDefinition>,
    not_found: Arc<RouteDefinition>,
}

impl Fallbacks {
    fn new() -> Result<Self, TopazError> {
        let fallback = |name: &str, handler: RouteHandler| -> Result<Arc<RouteDefinition>, TopazError> {
            Ok(Arc::new(RouteDefinition::new(Method::any(), "*", handler)?.with_name(name)))
        };

        Ok(Fallbacks {
            negotiation: fallback("negotiation", RouteHandler::filter(check_negotiation))?,
            method_not_allowed: fallback("method-not-allowed", RouteHandler::filter(check_method))?,
            not_found: fallback("not-found", RouteHandler::filter(not_found))?,
        })
    }
}

fn check_negotiation<'a>(ctx: &'a mut HttpContext, chain: Chain) -> BoxFuture<'a, Result<(), TopazError>> {
    Box::pin(async move {
        if let Some(e) = ctx.router().negotiation_error(&ctx.request) {
            return Err(e);
        }
        chain.next(ctx).await
    })
}

fn check_method<'a>(ctx: &'a mut HttpContext, chain: Chain) -> BoxFuture<'a, Result<(), TopazError>> {
    Box::pin(async move {
        if ctx.router().has_alternative_method(&ctx.request) {
            return Err(TopazError::MethodNotAllowed(ctx.request.method().to_string()));
        }
        chain.next(ctx).await
    })
}

fn not_found<'a>(ctx: &'a mut HttpContext, _chain: Chain) -> BoxFuture<'a, Result<(), TopazError>> {
    let path = ctx.request.uri().path().to_string();
    Box::pin(futures::future::ready(Err(TopazError::NotFound(path))))
}

struct RouterInner {
    config: RouterConfig,
    routes: Vec<Arc<RouteDefinition>>,
    fallbacks: Fallbacks,
    sockets: Vec<SocketRoute>,
    errors: ErrorHandling,
    executors: HashMap<String, Arc<dyn Executor>>,
    default_executor: Arc<dyn Executor>,
    #[cfg(feature = "json")]
    renderers: Vec<Arc<dyn Renderer>>,
}

/// Immutable set of routes, cheap to clone
#[derive(Clone)]
pub struct Router {
    inner: Arc<RouterInner>,
}

impl Router {
    pub fn builder() -> RouterBuilder {
        RouterBuilder::default()
    }

    #[inline]
    pub fn config(&self) -> &RouterConfig {
        &self.inner.config
    }

    /// Route definitions, in registration order
    #[inline]
    pub fn routes(&self) -> &[Arc<RouteDefinition>] {
        &self.inner.routes
    }

    #[cfg(feature = "json")]
    #[inline]
    pub fn renderers(&self) -> &[Arc<dyn Renderer>] {
        &self.inner.renderers
    }

    /// Dispatch a request coming from hyper
    pub async fn dispatch_raw(&self, req: RawRequest<RawBody>, peer_addr: Option<SocketAddr>) -> RawResponse<RawBody> {
        let request = Request::new(req.map(Body::from_raw), peer_addr);
        let response = self.dispatch(request).await;
        response.into_raw().unwrap_or_else(|e| {
            error!("Unable to build response: {}", e);
            let mut raw = RawResponse::new(RawBody::empty());
            *raw.status_mut() = StatusCode::INTERNAL_SERVER_ERROR;
            raw
        })
    }

    /// Dispatch a request. Errors never escape: they end up rendered in the
    /// returned response.
    pub async fn dispatch(&self, request: Request) -> Response {
        let mut ctx = HttpContext::new(request, self.clone());

        let error = match self.run(&mut ctx).await {
            Ok(()) => match ctx.take_deferred() {
                Some(deferred) => self.await_deferred(&mut ctx, deferred).await.err(),
                None => None,
            },
            Err(e) => {
                if ctx.take_deferred().is_some() {
                    debug!("Discarding the deferred of a failed request");
                }
                Some(e)
            }
        };

        if let Some(e) = &error {
            self.inner.errors.handle(&mut ctx, e);
        }

        if !ctx.response.committed() {
            if let Err(e) = ctx.end() {
                warn!("Unable to end the response: {}", e);
                ctx.reset_for_error();
                ctx.response.set_status(StatusCode::INTERNAL_SERVER_ERROR);
                ctx.response.end();
            }
        }

        self.finish(&mut ctx, error.as_ref());
        ctx.into_response()
    }

    async fn run(&self, ctx: &mut HttpContext) -> Result<(), TopazError> {
        ctx.request.load_body(self.inner.config.max_body_size).await?;

        let in_context = match strip_context_path(&self.inner.config.context_path, ctx.request.path()) {
            Some(path) => {
                let path = path.to_string();
                ctx.request.set_path(path);
                true
            }
            None => false,
        };

        if let Some(method) = self.method_override(&ctx.request)? {
            debug!("Overriding {} with {}", ctx.request.method(), method);
            ctx.request.set_method(method);
        }

        if in_context && socket::is_upgrade(&ctx.request) {
            for socket in &self.inner.sockets {
                if let Some(result) = socket.try_handle(ctx) {
                    return result;
                }
            }
        }

        let mut chain = Vec::new();
        let mut after = Vec::new();
        let mut complete = Vec::new();
        for route in self.bind_routes(&ctx.request, in_context) {
            match route.handler().clone() {
                RouteHandler::After(f) => after.push(f),
                RouteHandler::Complete(f) => complete.push(f),
                _ => chain.push(route),
            }
        }
        ctx.set_listeners(after, complete);

        Chain::new(chain).next(ctx).await
    }

    /// Every route matching the request in registration order, then the
    /// fallbacks. A request outside of the context path only gets the 404
    /// fallback.
    fn bind_routes(&self, req: &Request, in_context: bool) -> Vec<Route> {
        let method = req.method();
        let path = req.path();
        let fallbacks = &self.inner.fallbacks;

        let mut routes = Vec::new();
        if in_context {
            routes.extend(
                self.inner
                    .routes
                    .iter()
                    .filter_map(|definition| definition.matches(method, path, req.content_type(), req.accept())),
            );
            routes.push(Route::bind(fallbacks.negotiation.clone(), method, path));
            routes.push(Route::bind(fallbacks.method_not_allowed.clone(), method, path));
        }
        routes.push(Route::bind(fallbacks.not_found.clone(), method, path));
        routes
    }

    fn method_override(&self, req: &Request) -> Result<Option<Method>, TopazError> {
        let value = match &self.inner.config.method_override {
            None => return Ok(None),
            Some(MethodOverride::Header(name)) => req.header(name),
            Some(MethodOverride::Param(name)) => req.params(name).into_iter().next(),
        };

        match value.map(str::trim).filter(|v| !v.is_empty()) {
            Some(v) => Method::from_bytes(v.to_ascii_uppercase().as_bytes())
                .map(Some)
                .map_err(|_| TopazError::status(StatusCode::BAD_REQUEST, format!("invalid method override {}", v))),
            None => Ok(None),
        }
    }

    /// Definitions taking part in the 405 and 406/415 checks: handlers
    /// bound to a verb on a non glob path
    fn answering_routes(&self) -> impl Iterator<Item = &Arc<RouteDefinition>> {
        self.inner
            .routes
            .iter()
            .filter(|d| d.handler().is_terminal() && !d.method().is_any() && !d.pattern().is_glob())
    }

    /// 406 or 415 when an answering route matches verb and path but none of
    /// them matches the media types. 406 wins when both apply.
    fn negotiation_error(&self, req: &Request) -> Option<TopazError> {
        let mut not_acceptable = false;
        let mut unsupported = false;

        let candidates = self
            .answering_routes()
            .filter(|d| d.pattern().matches(req.method(), req.path()).is_some());

        for definition in candidates {
            let produces = definition.can_produce(req.accept());
            let consumes = definition.can_consume(req.content_type());
            if produces && consumes {
                return None;
            }
            not_acceptable |= !produces;
            unsupported |= !consumes;
        }

        if not_acceptable {
            let accept = req.accept().iter().map(MediaType::to_string).collect::<Vec<_>>().join(", ");
            Some(TopazError::NotAcceptable(accept))
        } else if unsupported {
            Some(TopazError::UnsupportedMediaType(req.content_type().to_string()))
        } else {
            None
        }
    }

    /// Whether an answering route exists for the path under another verb
    fn has_alternative_method(&self, req: &Request) -> bool {
        let method = req.method();
        VERBS
            .iter()
            .filter(|verb| *verb != method)
            .any(|verb| self.answering_routes().any(|d| d.pattern().matches(verb, req.path()).is_some()))
    }

    async fn await_deferred(&self, ctx: &mut HttpContext, deferred: Deferred) -> Result<(), TopazError> {
        let (tx, rx) = oneshot::channel::<Completion>();
        deferred.on_complete(move |completion| {
            if tx.send(completion).is_err() {
                debug!("Request went away before its deferred completed");
            }
        });

        if let Some((executor, work)) = deferred.take_task() {
            let executor = self.resolve_executor(executor)?;
            let handle = deferred.clone();
            executor.execute(Box::new(move || {
                let fallback = handle.clone();
                if let Err(e) = guarded(move || work(handle)) {
                    fallback.reject(e);
                }
            }));
        }
        drop(deferred);

        debug!("{} {} detached", ctx.request.method(), ctx.request.path());
        match rx.await {
            Ok(Ok(responder)) => {
                debug!("{} {} resolved", ctx.request.method(), ctx.request.path());
                ctx.send_dyn(responder)
            }
            Ok(Err(e)) => Err(e),
            Err(_) => Err(TopazError::DeferredDropped),
        }
    }

    fn resolve_executor(&self, executor: ExecutorRef) -> Result<Arc<dyn Executor>, TopazError> {
        match executor {
            ExecutorRef::Default => Ok(self.inner.default_executor.clone()),
            ExecutorRef::Named(name) => self.inner.executors.get(&name).cloned().ok_or(TopazError::ExecutorNotFound(name)),
            ExecutorRef::Instance(executor) => Ok(executor),
        }
    }

    /// End of request bookkeeping
    fn finish(&self, ctx: &mut HttpContext, error: Option<&TopazError>) {
        for listener in ctx.take_complete() {
            if let Err(e) = guarded(|| listener(&ctx.request, &ctx.response, error)) {
                warn!("Complete listener failed: {}", e);
            }
        }

        let status = ctx.response.status().unwrap_or(StatusCode::OK);
        #[cfg(feature = "operation")]
        let line = format!("[{}] {} {} -> {}", ctx.operation_id, ctx.request.method(), ctx.request.uri().path(), status.as_u16());
        #[cfg(not(feature = "operation"))]
        let line = format!("{} {} -> {}", ctx.request.method(), ctx.request.uri().path(), status.as_u16());

        if status.is_server_error() {
            match error {
                Some(e) => error!("{}: {}", line, e),
                None => error!("{}", line),
            }
        } else {
            debug!("{}", line);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn invalid_pattern_fails_build() {
        let result = Router::builder().get("/ok", |_: &mut Request| "ok").get("/a/{}", |_: &mut Request| "ko").build();
        assert!(matches!(result, Err(TopazError::InvalidPattern(_))));
    }

    #[test]
    fn binds_in_registration_order_then_fallbacks() {
        let router = Router::builder()
            .get("/a", |_: &mut Request| "1")
            .before(Method::any(), "*", |_| Ok(()))
            .get("/b", |_: &mut Request| "2")
            .build()
            .unwrap();

        let raw = RawRequest::builder().uri("/a").body(Body::empty()).unwrap();
        let req = Request::new(raw, None);
        let names = router
            .bind_routes(&req, true)
            .iter()
            .map(|r| r.name().map(str::to_string).unwrap_or_else(|| r.pattern().to_string()))
            .collect::<Vec<_>>();
        assert_eq!(names, vec!["/a", "/**", "negotiation", "method-not-allowed", "not-found"]);

        let names = router.bind_routes(&req, false).iter().filter_map(|r| r.name().map(str::to_string)).collect::<Vec<_>>();
        assert_eq!(names, vec!["not-found"]);
    }

    #[test]
    fn route_sources_point_at_registration() {
        let router = Router::builder().get("/a", |_: &mut Request| "1").build().unwrap();
        assert_eq!(router.routes()[0].source().map(|l| l.file()), Some(file!()));
    }
}
