//! Error handling: status resolution and error pages.

use crate::{
    error::TopazError,
    http_context::HttpContext,
    media_type::{self, MediaType},
    response::Builder,
    route::guarded,
};
use http::{header::CONTENT_TYPE, StatusCode};
use std::{error::Error as StdError, sync::Arc};

/// Handler given a chance to render an error. It should commit the response
/// (e.g. through [`HttpContext::send`]) to stop the search; otherwise the
/// next handler, then the built-in page, is tried.
pub type ErrorHandler = dyn Fn(&mut HttpContext, &TopazError) -> Result<(), TopazError> + Send + Sync;

type Matcher = Box<dyn Fn(&(dyn StdError + 'static)) -> bool + Send + Sync>;

/// Maps error types to response statuses.
///
/// The lookup walks the error and its `source()` chain, the first link with
/// a mapping wins. Framework errors carrying an intrinsic status (`NotFound`,
/// `Status`, ...) are never remapped.
#[derive(Default)]
pub struct StatusTable {
    entries: Vec<(Matcher, StatusCode)>,
}

impl StatusTable {
    pub fn new() -> Self {
        Self::default()
    }

    /// Respond with `status` when an error of type `E` is found in the chain
    pub fn map<E: StdError + 'static>(&mut self, status: StatusCode) {
        self.entries.push((Box::new(|e: &(dyn StdError + 'static)| e.is::<E>()), status));
    }

    pub fn status_of(&self, error: &TopazError) -> StatusCode {
        if let Some(status) = error.intrinsic_status() {
            return status;
        }

        let mut current: Option<&(dyn StdError + 'static)> = Some(error);
        while let Some(e) = current {
            if let Some(status) = e.downcast_ref::<TopazError>().and_then(TopazError::intrinsic_status) {
                return status;
            }
            if let Some((_, status)) = self.entries.iter().find(|(matches, _)| matches(e)) {
                return *status;
            }
            current = e.source();
        }

        StatusCode::INTERNAL_SERVER_ERROR
    }
}

pub(crate) struct ErrorHandling {
    pub(crate) handlers: Vec<Arc<ErrorHandler>>,
    pub(crate) statuses: StatusTable,
}

impl ErrorHandling {
    /// Render `error` on a response that is not committed yet
    pub(crate) fn handle(&self, ctx: &mut HttpContext, error: &TopazError) {
        if !ctx.reset_for_error() {
            warn!(
                "{} {} failed after the response was committed: {}",
                ctx.request.method(),
                ctx.request.path(),
                error
            );
            return;
        }

        let status = self.statuses.status_of(error);
        ctx.response.set_status(status);

        for handler in &self.handlers {
            let result = guarded(|| handler(ctx, error)).and_then(|r| r);
            if ctx.response.committed() {
                if let Err(e) = result {
                    debug!("Error handler failed after committing the response: {}", e);
                }
                return;
            }

            if let Err(e) = result {
                warn!("Error handler failed while handling `{}`: {}", error, e);
            }
            ctx.reset_for_error();
            ctx.response.set_status(status);
        }

        if let Err(e) = error_page(ctx, error, status) {
            error!("Unable to send the error page: {}", e);
            ctx.response.set_status(StatusCode::INTERNAL_SERVER_ERROR);
            ctx.response.end();
        }
    }
}

/// Built-in error page, json for clients preferring it, html otherwise
pub(crate) fn error_page(ctx: &mut HttpContext, error: &TopazError, status: StatusCode) -> Result<(), TopazError> {
    let reason = status.canonical_reason().unwrap_or("Unknown");
    let message = error.to_string();

    #[cfg(feature = "json")]
    {
        let prefers_json = media_type::best(ctx.request.accept(), &[MediaType::html(), MediaType::json()]) == Some(MediaType::json());
        if prefers_json {
            let body = serde_json::json!({
                "message": message,
                "reason": reason,
                "status": status.as_u16(),
            });
            return ctx.send(Builder::new().status(status).header(CONTENT_TYPE, "application/json").body(body.to_string()));
        }
    }

    let page = format!(
        "<!doctype html><html><head><title>{code} {reason}</title></head><body><h1>{code} {reason}</h1><p>{message}</p></body></html>",
        code = status.as_u16(),
        reason = escape_html(reason),
        message = escape_html(&message),
    );
    ctx.send(Builder::new().status(status).header(CONTENT_TYPE, "text/html; charset=utf-8").body(page))
}

fn escape_html(s: &str) -> String {
    let mut escaped = String::with_capacity(s.len());
    for c in s.chars() {
        match c {
            '&' => escaped.push_str("&amp;"),
            '<' => escaped.push_str("&lt;"),
            '>' => escaped.push_str("&gt;"),
            '"' => escaped.push_str("&quot;"),
            '\'' => escaped.push_str("&#39;"),
            c => escaped.push(c),
        }
    }
    escaped
}

#[cfg(test)]
mod tests {
    use super::*;
    use thiserror::Error;

    #[derive(Debug, Error)]
    #[error("missing")]
    struct Missing;

    #[derive(Debug, Error)]
    #[error("lookup failed")]
    struct Lookup(#[source] Missing);

    #[derive(Debug, Error)]
    #[error("other")]
    struct Other;

    fn table() -> StatusTable {
        let mut table = StatusTable::new();
        table.map::<Missing>(StatusCode::NOT_FOUND);
        table.map::<std::num::ParseIntError>(StatusCode::BAD_REQUEST);
        table
    }

    #[test]
    fn maps_by_type() {
        assert_eq!(table().status_of(&TopazError::handler(Missing)), StatusCode::NOT_FOUND);
        let parse = "x".parse::<u8>().unwrap_err();
        assert_eq!(table().status_of(&TopazError::handler(parse)), StatusCode::BAD_REQUEST);
    }

    #[test]
    fn walks_the_source_chain() {
        assert_eq!(table().status_of(&TopazError::handler(Lookup(Missing))), StatusCode::NOT_FOUND);
        assert_eq!(table().status_of(&TopazError::handler(Other)), StatusCode::INTERNAL_SERVER_ERROR);
    }

    #[test]
    fn intrinsic_status_wins() {
        let mut table = table();
        table.map::<TopazError>(StatusCode::IM_A_TEAPOT);
        assert_eq!(table.status_of(&TopazError::NotFound("/".to_string())), StatusCode::NOT_FOUND);
        assert_eq!(table.status_of(&TopazError::Panic("x".to_string())), StatusCode::IM_A_TEAPOT);
    }

    #[test]
    fn escapes_html() {
        assert_eq!(escape_html("<a href=\"x\">&'"), "&lt;a href=&quot;x&quot;&gt;&amp;&#39;");
    }
}
