//! Rendering of handler models into response bodies.
//!
//! A handler returning a [`Model`] leaves the choice of representation to the
//! router: the first renderer able to produce one of the route's negotiated
//! types writes the body.

use crate::{
    error::{BoxError, TopazError},
    http_context::HttpContext,
    media_type::MediaType,
    responder::Responder,
    response::Builder,
};
use hyper::body::Bytes;
use serde::Serialize;
use serde_json::Value;

pub trait Renderer: Send + Sync {
    /// Media types this renderer writes
    fn media_types(&self) -> Vec<MediaType>;

    fn render(&self, model: &Value, media_type: &MediaType) -> Result<Bytes, BoxError>;
}

/// Writes models as json
#[derive(Debug, Default, Clone, Copy)]
pub struct JsonRenderer;

impl Renderer for JsonRenderer {
    fn media_types(&self) -> Vec<MediaType> {
        vec![MediaType::json()]
    }

    fn render(&self, model: &Value, _media_type: &MediaType) -> Result<Bytes, BoxError> {
        Ok(serde_json::to_vec(model)?.into())
    }
}

/// Writes string models as is and anything else as compact json, as
/// `text/plain`
#[derive(Debug, Default, Clone, Copy)]
pub struct TextRenderer;

impl Renderer for TextRenderer {
    fn media_types(&self) -> Vec<MediaType> {
        vec![MediaType::plain()]
    }

    fn render(&self, model: &Value, _media_type: &MediaType) -> Result<Bytes, BoxError> {
        match model {
            Value::String(s) => Ok(Bytes::from(s.clone())),
            other => Ok(other.to_string().into()),
        }
    }
}

/// A value whose representation is negotiated
#[derive(Debug, Clone, PartialEq)]
pub struct Model(pub Value);

impl Model {
    pub fn from_serialize<T: Serialize>(value: &T) -> Result<Model, TopazError> {
        Ok(Model(serde_json::to_value(value)?))
    }
}

impl From<Value> for Model {
    fn from(v: Value) -> Self {
        Model(v)
    }
}

impl Responder for Model {
    fn respond_with_builder(self, builder: Builder, ctx: &HttpContext) -> Result<Builder, TopazError> {
        let any = [MediaType::any()];
        let wanted: &[MediaType] = match ctx.route() {
            Some(route) if !route.produces().is_empty() => route.produces(),
            _ => &any,
        };

        for media_type in wanted {
            for renderer in ctx.router().renderers() {
                if let Some(concrete) = renderer.media_types().into_iter().find(|t| t.matches(media_type)) {
                    let body = renderer.render(&self.0, &concrete).map_err(TopazError::rendering)?;
                    return Ok(builder.content_type(&concrete).body(body));
                }
            }
        }

        Err(TopazError::NotAcceptable(
            wanted.iter().map(|t| t.to_string()).collect::<Vec<_>>().join(", "),
        ))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn text_renderer_unquotes_strings() {
        let t = TextRenderer;
        assert_eq!(t.render(&json!("hi"), &MediaType::plain()).unwrap(), Bytes::from("hi"));
        assert_eq!(t.render(&json!({"a": 1}), &MediaType::plain()).unwrap(), Bytes::from("{\"a\":1}"));
    }

    #[test]
    fn json_renderer() {
        let body = JsonRenderer.render(&json!([1, 2]), &MediaType::json()).unwrap();
        assert_eq!(body, Bytes::from("[1,2]"));
    }
}
