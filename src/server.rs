//! Server binds a tcp listener and serves every connection with the router
//! as hyper service.

use std::{net::SocketAddr, time::Duration};

use futures::{
    future::BoxFuture,
    task::{Context, Poll},
};
use http::{header::SERVER, HeaderValue, Request as RawRequest, Response as RawResponse};
use hyper::{body::Body as RawBody, server::conn::Http, service::Service};
use tokio::net::TcpListener;

use crate::{
    error::TopazError,
    router::{Router, RouterBuilder},
};

/// Default time for connection handling is 30 seconds
pub const DEFAULT_REQUEST_TIMEOUT_MS: u64 = 30_000;
/// Default listener ip addr is AnyAddr (0.0.0.0)
pub const DEFAULT_LISTENER_IFACE: &str = "0.0.0.0:0";
pub const DEFAULT_SERVER_NAME: &str = "Topaz";

pub struct ListenerBuilder {
    iface: Option<String>,
    server_name: Option<String>,
    request_timeout_ms: Option<u64>,
}

impl ListenerBuilder {
    #[inline]
    pub fn new() -> Self {
        ListenerBuilder {
            iface: None,
            server_name: None,
            request_timeout_ms: Some(DEFAULT_REQUEST_TIMEOUT_MS),
        }
    }

    #[inline]
    pub fn interface(mut self, s: &str) -> Self {
        self.iface = Some(s.to_string());
        self
    }

    /// `None` lets connections live as long as the client keeps them open
    #[inline]
    pub fn request_timeout<T: Into<Option<u64>>>(mut self, timeout_ms: T) -> Self {
        self.request_timeout_ms = timeout_ms.into();
        self
    }

    /// Value of the `Server` header
    #[inline]
    pub fn server_name(mut self, name: &str) -> Self {
        self.server_name = Some(name.to_string());
        self
    }

    #[doc(hidden)]
    #[inline]
    pub(crate) fn build(self) -> ListenerConfig {
        let ListenerBuilder {
            iface,
            server_name,
            request_timeout_ms,
        } = self;

        ListenerConfig {
            iface: iface.unwrap_or_else(|| DEFAULT_LISTENER_IFACE.to_string()),
            request_timeout_ms,
            server_name: server_name.unwrap_or_else(|| DEFAULT_SERVER_NAME.to_string()),
        }
    }
}

impl Default for ListenerBuilder {
    fn default() -> Self {
        Self::new()
    }
}

pub struct ListenerConfig {
    iface: String,
    request_timeout_ms: Option<u64>,
    server_name: String,
}

pub struct Builder {
    listener: Option<ListenerBuilder>,
    router: RouterBuilder,
}

impl Builder {
    #[inline]
    pub fn configure_listener<F>(mut self, f: F) -> Self
    where
        F: FnOnce(ListenerBuilder) -> ListenerBuilder,
    {
        let l = self.listener.take().unwrap_or_default();
        self.listener = Some(f(l));
        self
    }

    #[inline]
    pub fn configure_router<F>(mut self, f: F) -> Self
    where
        F: FnOnce(RouterBuilder) -> RouterBuilder,
    {
        self.router = f(self.router);
        self
    }

    /// Fails when a route pattern is invalid
    pub fn build(self) -> Result<Server, TopazError> {
        Ok(Server {
            listener_config: self.listener.unwrap_or_default().build(),
            router: self.router.build()?,
        })
    }
}

pub struct Server {
    listener_config: ListenerConfig,
    router: Router,
}

impl Server {
    /// Produce a server builder
    #[inline]
    pub fn builder() -> Builder {
        Builder {
            listener: None,
            router: Router::builder(),
        }
    }

    #[inline]
    pub fn router(&self) -> &Router {
        &self.router
    }

    /// Return a future with will run the server. Simply run this future inside
    /// the tokio executor or await it in a async context
    pub async fn run(self) -> Result<(), TopazError> {
        let Server { listener_config, router } = self;
        let server_value = HeaderValue::from_str(&listener_config.server_name)?;

        let http = Http::new();
        let listener = TcpListener::bind(listener_config.iface.as_str()).await?;
        let local_addr = listener.local_addr()?;
        info!("{} started and listening on : http://{}", &listener_config.server_name, local_addr);

        loop {
            let (client_socket, peer_addr) = match listener.accept().await {
                Ok(accepted) => accepted,
                Err(e) => {
                    warn!("incoming connection encountered an error: {}", e);
                    continue;
                }
            };

            let service = RouterService {
                router: router.clone(),
                peer_addr: Some(peer_addr),
                server_name: server_value.clone(),
            };
            let connection = http.serve_connection(client_socket, service);
            let request_timeout_ms = listener_config.request_timeout_ms;

            tokio::spawn(async move {
                let result = match request_timeout_ms {
                    Some(ms) => match tokio::time::timeout(Duration::from_millis(ms), connection).await {
                        Ok(result) => result,
                        Err(_) => {
                            debug!("Connection with {} timed out", peer_addr);
                            return;
                        }
                    },
                    None => connection.await,
                };

                if let Err(e) = result {
                    log_connection_error(&e, peer_addr);
                }
            });
        }
    }
}

/// Resets and broken pipes are the client going away, not worth a warning
fn log_connection_error(e: &hyper::Error, peer_addr: SocketAddr) {
    let transport = e.is_incomplete_message()
        || e.is_canceled()
        || std::error::Error::source(e)
            .and_then(|s| s.downcast_ref::<std::io::Error>())
            .map(|io| {
                matches!(
                    io.kind(),
                    std::io::ErrorKind::ConnectionReset | std::io::ErrorKind::BrokenPipe | std::io::ErrorKind::ConnectionAborted
                )
            })
            .unwrap_or(false);

    if transport {
        debug!("Connection with {} closed: {}", peer_addr, e);
    } else {
        warn!("Connection with {} failed: {}", peer_addr, e);
    }
}

#[doc(hidden)]
#[derive(Clone)]
pub struct RouterService {
    router: Router,
    peer_addr: Option<SocketAddr>,
    server_name: HeaderValue,
}

impl Service<RawRequest<RawBody>> for RouterService {
    type Error = TopazError;
    type Future = BoxFuture<'static, Result<Self::Response, Self::Error>>;
    type Response = RawResponse<RawBody>;

    fn poll_ready(&mut self, _cx: &mut Context<'_>) -> Poll<Result<(), Self::Error>> {
        Poll::Ready(Ok(()))
    }

    fn call(&mut self, req: RawRequest<RawBody>) -> Self::Future {
        let router = self.router.clone();
        let peer_addr = self.peer_addr;
        let server_name = self.server_name.clone();
        Box::pin(async move {
            let mut res = router.dispatch_raw(req, peer_addr).await;
            res.headers_mut().insert(SERVER, server_name);
            Ok(res)
        })
    }
}
