//! WebSocket hand-off.
//!
//! Framing is left to the socket handler: the router only recognizes upgrade
//! requests, matches them against socket routes and hands the context over.
//! No http route runs for a request handed to a socket route.

use crate::{error::TopazError, http_context::HttpContext, pattern::RoutePattern, request::Request, utils::MethodExtension};
use http::{
    header::{CONNECTION, UPGRADE},
    Method,
};
use std::{
    fmt::{Debug, Formatter},
    sync::Arc,
};

pub type SocketHandler = dyn Fn(&mut HttpContext) -> Result<(), TopazError> + Send + Sync;

#[derive(Clone)]
pub struct SocketRoute {
    pattern: Arc<RoutePattern>,
    handler: Arc<SocketHandler>,
}

impl SocketRoute {
    pub(crate) fn new(pattern: &str, case_sensitive: bool, handler: Arc<SocketHandler>) -> Result<Self, TopazError> {
        Ok(SocketRoute {
            pattern: Arc::new(RoutePattern::with_case_sensitivity(Method::any(), pattern, case_sensitive)?),
            handler,
        })
    }

    #[inline]
    pub fn pattern(&self) -> &str {
        self.pattern.pattern()
    }

    pub(crate) fn try_handle(&self, ctx: &mut HttpContext) -> Option<Result<(), TopazError>> {
        let m = self.pattern.matches(ctx.request.method(), ctx.request.path())?;
        debug!("Handing {} over to socket route {}", ctx.request.path(), self.pattern.pattern());
        ctx.request.set_path_match(m);
        Some(crate::route::guarded(|| (self.handler)(ctx)).and_then(|r| r))
    }
}

impl Debug for SocketRoute {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SocketRoute").field("pattern", &self.pattern.pattern()).finish()
    }
}

/// Whether the request asks for a websocket upgrade
pub fn is_upgrade(req: &Request) -> bool {
    let connection_upgrade = req
        .headers()
        .get_all(CONNECTION)
        .iter()
        .filter_map(|v| v.to_str().ok())
        .flat_map(|v| v.split(','))
        .any(|token| token.trim().eq_ignore_ascii_case("upgrade"));

    connection_upgrade
        && req
            .header(UPGRADE.as_str())
            .map(|u| u.trim().eq_ignore_ascii_case("websocket"))
            .unwrap_or(false)
}
