#![allow(clippy::let_and_return)]
use crate::{
    deferred::Deferred,
    error::{BoxError, TopazError},
    http_context::HttpContext,
    media_type::MediaType,
    response::Builder,
};
use http::StatusCode;

macro_rules! impl_status_responder {
    ( $( $x:ty ),+ ) => {
        $(
            impl Responder for $x {
                fn respond_with_builder(self, builder: Builder, _ctx: &HttpContext) -> Result<Builder, TopazError> {
                    let status = u16::try_from(self).map_err(|_| TopazError::rendering(format!("{} is not a status code", self)))?;
                    Ok(builder.status(status))
                }
            }
        )+
    }
}

macro_rules! impl_body_responder {
    ( $( $x:ty ),+ ) => {
        $(
            impl Responder for $x {
                fn respond_with_builder(self, builder: Builder, _ctx: &HttpContext) -> Result<Builder, TopazError> {
                    Ok(builder.content_type_if_not_set(&MediaType::octet_stream()).body(self))
                }
            }
        )+
    }
}

macro_rules! impl_plain_body_responder {
    ( $( $x:ty ),+ ) => {
        $(
            impl Responder for $x {
                fn respond_with_builder(self, builder: Builder, ctx: &HttpContext) -> Result<Builder, TopazError> {
                    Ok(builder.content_type_if_not_set(&text_type(ctx)).body(self))
                }
            }
        )+
    }
}

macro_rules! impl_tuple_responder {

    ( $($idx:tt -> $T:ident),+ ) => {

            impl<$($T:Responder),+> Responder for ($($T),+) {
                fn respond_with_builder(self, builder: Builder, ctx: &HttpContext) -> Result<Builder, TopazError> {
                    $(let builder = self.$idx.respond_with_builder(builder, ctx)?;)+
                    Ok(builder)
                }
            }
    }
}

/// Text bodies use the negotiated type when the route narrowed it to a
/// concrete `text/*` one, `text/plain` otherwise
fn text_type(ctx: &HttpContext) -> MediaType {
    ctx.negotiated()
        .filter(|t| !t.is_wildcard() && t.type_() == "text")
        .cloned()
        .unwrap_or_else(MediaType::plain)
}

/// Responder defines what type can generate a response
pub trait Responder {
    /// Consume self into a builder
    ///
    /// ```rust
    /// # use topaz::prelude::*;
    /// struct CustomResponder(String);
    ///
    /// impl Responder for CustomResponder {
    ///     fn respond_with_builder(self, builder: Builder, ctx: &HttpContext) -> Result<Builder, TopazError> {
    ///         // Put the string as the response body
    ///         Ok(builder.body(self.0))
    ///     }
    /// }
    /// ```
    fn respond_with_builder(self, builder: Builder, ctx: &HttpContext) -> Result<Builder, TopazError>;
}

impl Responder for StatusCode {
    fn respond_with_builder(self, builder: Builder, _ctx: &HttpContext) -> Result<Builder, TopazError> {
        Ok(builder.status(self))
    }
}

impl Responder for () {
    fn respond_with_builder(self, builder: Builder, _ctx: &HttpContext) -> Result<Builder, TopazError> {
        Ok(builder)
    }
}

impl<T: Responder> Responder for Option<T> {
    fn respond_with_builder(self, builder: Builder, ctx: &HttpContext) -> Result<Builder, TopazError> {
        if let Some(r) = self {
            r.respond_with_builder(builder, ctx)
        } else {
            Ok(builder.status_if_not_set(404))
        }
    }
}

impl Responder for Builder {
    fn respond_with_builder(self, _builder: Builder, _ctx: &HttpContext) -> Result<Builder, TopazError> {
        Ok(self)
    }
}

#[cfg(feature = "json")]
#[cfg_attr(docsrs, doc(cfg(feature = "json")))]
mod json {
    use super::*;
    use crate::body::Json;
    use serde::Serialize;

    impl<T: Serialize> Responder for Json<T> {
        fn respond_with_builder(self, builder: Builder, _ctx: &HttpContext) -> Result<Builder, TopazError> {
            builder.json(&self.0).map_err(|(_, e)| TopazError::rendering(e))
        }
    }
}

#[cfg(feature = "form")]
#[cfg_attr(docsrs, doc(cfg(feature = "form")))]
mod form {
    use super::*;
    use crate::body::Form;
    use serde::Serialize;

    impl<T: Serialize> Responder for Form<T> {
        fn respond_with_builder(self, builder: Builder, _ctx: &HttpContext) -> Result<Builder, TopazError> {
            builder.form(&self.0).map_err(|(_, e)| e)
        }
    }
}

impl_status_responder!(u16, i16, u32, i32, u64, i64, usize, isize);
impl_plain_body_responder!(String, &'static str);
impl_body_responder!(Vec<u8>, &'static [u8], hyper::body::Bytes);
impl_tuple_responder!(0->A, 1->B);
impl_tuple_responder!(0->A, 1->B, 2->C);
impl_tuple_responder!(0->A, 1->B, 2->C, 3->D);
impl_tuple_responder!(0->A, 1->B, 2->C, 3->D, 4->E);

/// Trait used by the dispatch loop, not meant for manual implementation
pub trait DynResponder {
    #[doc(hidden)]
    fn dyn_respond(&mut self, builder: Builder, ctx: &HttpContext) -> Result<Builder, TopazError>;
}

impl<T> DynResponder for Option<T>
where
    T: Responder,
{
    fn dyn_respond(&mut self, builder: Builder, ctx: &HttpContext) -> Result<Builder, TopazError> {
        match self.take() {
            Some(r) => r.respond_with_builder(builder, ctx),
            None => Err(TopazError::Other("responder was already consumed".to_string())),
        }
    }
}

/// What a handler produced: a value to send right away, a deferred
/// completion, or an error to route through the error handlers
pub enum Outcome {
    Sync(Box<dyn DynResponder + Send>),
    Async(Deferred),
    Error(TopazError),
}

impl Outcome {
    pub fn responder<R: Responder + Send + 'static>(r: R) -> Self {
        Outcome::Sync(Box::new(Some(r)))
    }
}

/// Conversion of handler return values into an [`Outcome`]. Implemented for
/// every [`Responder`], for [`Deferred`] and for `Result<T, E>` where the
/// error is any boxable error.
pub trait IntoOutcome {
    fn into_outcome(self) -> Outcome;
}

impl<R: Responder + Send + 'static> IntoOutcome for R {
    fn into_outcome(self) -> Outcome {
        Outcome::responder(self)
    }
}

impl IntoOutcome for Deferred {
    fn into_outcome(self) -> Outcome {
        Outcome::Async(self)
    }
}

impl IntoOutcome for Outcome {
    fn into_outcome(self) -> Outcome {
        self
    }
}

impl<T: IntoOutcome, E: Into<BoxError>> IntoOutcome for Result<T, E> {
    fn into_outcome(self) -> Outcome {
        match self {
            Ok(t) => t.into_outcome(),
            Err(e) => Outcome::Error(TopazError::handler(e)),
        }
    }
}
