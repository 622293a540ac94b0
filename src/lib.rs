//! ### Topaz is the routing and dispatch core of an async http stack
//! Routes are matched by verb, path pattern and media types, then run as a
//! chain of filters and handlers in registration order. Handlers can answer
//! right away or hand the request to a [`Deferred`](deferred::Deferred)
//! completed later, from any thread.
//!
//! Just `use` the prelude module, and you're ready to go!
//!
//! ## Quick server setup
//! ```ignore
//! use topaz::prelude::*;
//!
//! #[tokio::main]
//! async fn main() -> Result<(), TopazError> {
//!     env_logger::init();
//!
//!     let server = Server::builder()
//!         .configure_listener(|l| l.interface("127.0.0.1:3000"))
//!         .configure_router(|r| {
//!             r.before(Method::any(), "*", |ctx| {
//!                 ctx.response.set_header("X-Powered-By", "topaz")
//!             })
//!             .get("/{variable}/print", |req: &mut Request| req.param_as::<String>("variable"))
//!             .get("/slow", |_: &mut Request| Deferred::run(|| Ok::<_, TopazError>("done")))
//!         })
//!         .build()?;
//!
//!     server.run().await
//! }
//! ```

#[macro_use]
extern crate log;

/// Buffered request bodies
pub mod body;
/// Cursor over the routes matching a request
pub mod chain;
/// Deferred responses and executors
pub mod deferred;
/// Error definitions
pub mod error;
///
pub mod error_handler;
/// Context enveloping every request <-> response
pub mod http_context;
/// Media types and content negotiation
pub mod media_type;
/// Route path patterns
pub mod pattern;
#[cfg(feature = "json")]
#[cfg_attr(docsrs, doc(cfg(feature = "json")))]
pub mod renderer;
/// The Http Request type
pub mod request;
/// Definition of type which can map to a response
pub mod responder;
/// The Http Response type
pub mod response;
/// Route definitions and handlers
pub mod route;
/// Route registration and request dispatch
pub mod router;
/// Server implementation
pub mod server;
///
pub mod socket;
///
pub mod utils;
///
pub use cookie;
///
pub use http;
///
pub use hyper;

/// Contains everything you need to bootstrap your http server
///
/// ```rust
/// use topaz::prelude::*;
///
/// let router = Router::builder()
///     .get("/", |_: &mut Request| "hello")
///     .build();
/// assert!(router.is_ok());
/// ```
pub mod prelude {
    ///
    pub use crate::body::Body;
    ///
    pub use crate::body::Bytes;
    ///
    #[cfg(feature = "form")]
    pub use crate::body::Form;
    ///
    #[cfg(feature = "json")]
    pub use crate::body::Json;
    ///
    pub use crate::chain::Chain;
    ///
    pub use crate::deferred::Deferred;
    ///
    pub use crate::deferred::Executor;
    ///
    pub use crate::error::TopazError;
    ///
    pub use crate::http_context::HttpContext;
    ///
    pub use crate::media_type::MediaType;
    ///
    #[cfg(feature = "json")]
    pub use crate::renderer::Model;
    ///
    pub use crate::request::Request;
    ///
    pub use crate::responder::Responder;
    ///
    pub use crate::response::Builder;
    ///
    pub use crate::response::Response;
    ///
    pub use crate::route::RouteDefinition;
    ///
    pub use crate::route::RouteHandler;
    ///
    pub use crate::router::MethodOverride;
    ///
    pub use crate::router::Router;
    ///
    pub use crate::server::Server;
    ///
    pub use crate::utils::MethodExtension;
    ///
    pub use cookie::Cookie;
    ///
    pub use cookie::CookieJar;
    ///
    pub use http::header;
    ///
    pub use http::Method;
    ///
    pub use http::StatusCode;
}
