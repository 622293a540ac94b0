use crate::{error::TopazError, http_context::HttpContext, route::Route};
use futures::{future::BoxFuture, FutureExt};
use std::sync::Arc;

/// Ordered list of the routes matching a request, with a cursor on the next
/// one to run.
///
/// Every route receives the rest of the chain. Handlers continue it on their
/// own, filters decide whether and when to call [`Chain::next`].
#[derive(Clone)]
pub struct Chain {
    routes: Arc<[Route]>,
    index: usize,
}

impl Chain {
    pub(crate) fn new(routes: Vec<Route>) -> Self {
        Chain {
            routes: routes.into(),
            index: 0,
        }
    }

    /// Run the next route. Does nothing once the chain is exhausted, the
    /// response committed or the request detached by a deferred.
    pub fn next<'a>(self, ctx: &'a mut HttpContext) -> BoxFuture<'a, Result<(), TopazError>> {
        if ctx.response.committed() || ctx.is_detached() {
            return futures::future::ready(Ok(())).boxed();
        }

        let route = match self.routes.get(self.index) {
            Some(route) => route.clone(),
            None => return futures::future::ready(Ok(())).boxed(),
        };

        trace!("{} {} -> {} {}", ctx.request.method(), ctx.request.path(), route.definition().handler().kind(), route.pattern());
        ctx.request.set_route(&route);
        let rest = Chain {
            routes: self.routes,
            index: self.index + 1,
        };
        route.handler().invoke(ctx, rest)
    }

    /// Routes left to run, the next one first
    pub fn remaining(&self) -> &[Route] {
        self.routes.get(self.index..).unwrap_or_default()
    }
}
