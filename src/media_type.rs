//! Media types and content negotiation.
//!
//! A [`MediaType`] is ordered by its quality value (descending) and then by
//! its specificity: a concrete `type/subtype` outranks `type/*` which
//! outranks `*/*`. Parsing is delegated to the [`mime`] crate.

use crate::error::TopazError;
use mime::Mime;
use std::{
    cmp::Ordering,
    fmt::{Display, Formatter},
    str::FromStr,
};

#[derive(Debug, Clone)]
pub struct MediaType {
    mime: Mime,
    quality: f32,
}

impl MediaType {
    pub fn parse(s: &str) -> Result<MediaType, TopazError> {
        let s = s.trim();
        if s == "*" {
            return Ok(MediaType::any());
        }

        let mime = Mime::from_str(s).map_err(|e| TopazError::Other(format!("invalid media type {}: {}", s, e)))?;
        let quality = mime
            .get_param("q")
            .and_then(|q| q.as_str().parse::<f32>().ok())
            .map(|q| q.clamp(0.0, 1.0))
            .unwrap_or(1.0);

        Ok(MediaType { mime, quality })
    }

    /// Parse a comma separated list of media types (an `Accept` header
    /// value). Invalid entries are skipped and the result is sorted by
    /// precedence, stable on ties.
    pub fn parse_list(header: &str) -> Vec<MediaType> {
        let mut types = header
            .split(',')
            .filter(|s| !s.trim().is_empty())
            .filter_map(|s| match MediaType::parse(s) {
                Ok(t) => Some(t),
                Err(e) => {
                    debug!("Ignoring media type: {}", e);
                    None
                }
            })
            .collect::<Vec<_>>();
        types.sort_by(MediaType::cmp_precedence);
        types
    }

    /// `*/*`
    pub fn any() -> Self {
        Self::from(mime::STAR_STAR)
    }

    pub fn json() -> Self {
        Self::from(mime::APPLICATION_JSON)
    }

    pub fn html() -> Self {
        Self::from(mime::TEXT_HTML)
    }

    pub fn plain() -> Self {
        Self::from(mime::TEXT_PLAIN)
    }

    pub fn xml() -> Self {
        Self::from(mime::TEXT_XML)
    }

    pub fn form() -> Self {
        Self::from(mime::APPLICATION_WWW_FORM_URLENCODED)
    }

    pub fn multipart() -> Self {
        Self::from(mime::MULTIPART_FORM_DATA)
    }

    pub fn octet_stream() -> Self {
        Self::from(mime::APPLICATION_OCTET_STREAM)
    }

    #[inline]
    pub fn type_(&self) -> &str {
        self.mime.type_().as_str()
    }

    #[inline]
    pub fn subtype(&self) -> &str {
        self.mime.subtype().as_str()
    }

    /// `type/subtype` without any parameter
    #[inline]
    pub fn essence(&self) -> &str {
        self.mime.essence_str()
    }

    #[inline]
    pub fn quality(&self) -> f32 {
        self.quality
    }

    pub fn param(&self, name: &str) -> Option<&str> {
        self.mime.get_param(name).map(|v| v.as_str())
    }

    pub fn mime(&self) -> &Mime {
        &self.mime
    }

    #[inline]
    pub fn is_any(&self) -> bool {
        self.type_() == "*" && self.subtype() == "*"
    }

    #[inline]
    pub fn is_wildcard(&self) -> bool {
        self.type_() == "*" || self.subtype() == "*"
    }

    /// 2 for `type/subtype`, 1 for `type/*` and 0 for `*/*`
    pub fn specificity(&self) -> u8 {
        if self.type_() == "*" {
            0
        } else if self.subtype() == "*" {
            1
        } else {
            2
        }
    }

    /// Wildcard aware comparison, in both directions
    pub fn matches(&self, other: &MediaType) -> bool {
        let type_matches = self.type_() == "*" || other.type_() == "*" || self.type_() == other.type_();
        let subtype_matches = self.subtype() == "*" || other.subtype() == "*" || self.subtype() == other.subtype();
        type_matches && subtype_matches
    }

    /// Quality descending. Equal qualities compare equal, so a stable sort
    /// keeps the header order.
    pub fn cmp_precedence(a: &MediaType, b: &MediaType) -> Ordering {
        b.quality.partial_cmp(&a.quality).unwrap_or(Ordering::Equal)
    }

    fn most_specific(requested: &MediaType, produced: &MediaType) -> MediaType {
        if produced.specificity() >= requested.specificity() {
            MediaType {
                mime: produced.mime.clone(),
                quality: requested.quality,
            }
        } else {
            requested.clone()
        }
    }
}

impl From<Mime> for MediaType {
    fn from(mime: Mime) -> Self {
        MediaType { mime, quality: 1.0 }
    }
}

impl FromStr for MediaType {
    type Err = TopazError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        MediaType::parse(s)
    }
}

/// Two media types are equal when their essence is, parameters and quality
/// are not considered
impl PartialEq for MediaType {
    fn eq(&self, other: &Self) -> bool {
        self.essence() == other.essence()
    }
}

impl Eq for MediaType {}

impl Display for MediaType {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.essence())?;
        for (name, value) in self.mime.params().filter(|(n, _)| n.as_str() != "q") {
            write!(f, ";{}={}", name, value)?;
        }
        Ok(())
    }
}

/// Whether at least one requested type matches at least one produced type
pub fn matches(requested: &[MediaType], produced: &[MediaType]) -> bool {
    requested
        .iter()
        .filter(|r| r.quality > 0.0)
        .any(|r| produced.iter().any(|p| r.matches(p)))
}

/// The best produced type for the requested ones, walking requested types by
/// precedence. The returned type is the most specific of the matching pair.
pub fn best(requested: &[MediaType], produced: &[MediaType]) -> Option<MediaType> {
    let mut sorted = requested.iter().filter(|r| r.quality > 0.0).collect::<Vec<_>>();
    sorted.sort_by(|a, b| MediaType::cmp_precedence(a, b));

    sorted
        .into_iter()
        .find_map(|r| produced.iter().find(|p| r.matches(p)).map(|p| MediaType::most_specific(r, p)))
}

/// Narrow `produced` to what `requested` accepts, preserving the requested
/// precedence order. Duplicates are removed.
pub fn filter(requested: &[MediaType], produced: &[MediaType]) -> Vec<MediaType> {
    let mut sorted = requested.iter().filter(|r| r.quality > 0.0).collect::<Vec<_>>();
    sorted.sort_by(|a, b| MediaType::cmp_precedence(a, b));

    let mut narrowed: Vec<MediaType> = Vec::new();
    for r in sorted {
        for p in produced.iter().filter(|p| r.matches(p)) {
            let candidate = MediaType::most_specific(r, p);
            if !narrowed.contains(&candidate) {
                narrowed.push(candidate);
            }
        }
    }
    narrowed
}
