use crate::error::TopazError;
use hyper::body::{Body as RawBody, Buf, HttpBody};

pub use hyper::body::Bytes;

/// Default limit applied when buffering a request body: 8 MiB
pub const DEFAULT_MAX_BODY_SIZE: usize = 8 * 1024 * 1024;

pub(crate) enum BodyInner {
    Raw(RawBody),
    Memory(Bytes),
}

/// Request body. The dispatch loop buffers it in memory before routing, so
/// handlers can read it synchronously.
pub struct Body {
    inner: Option<BodyInner>,
}

impl Body {
    pub fn empty() -> Self {
        Body {
            inner: Some(BodyInner::Memory(Bytes::new())),
        }
    }

    #[inline]
    pub(crate) fn from_raw(raw: RawBody) -> Self {
        Body {
            inner: Some(BodyInner::Raw(raw)),
        }
    }

    /// Read the whole body in memory, failing with `PayloadTooLarge` once
    /// more than `limit` bytes were received
    pub(crate) async fn load(&mut self, limit: Option<usize>) -> Result<(), TopazError> {
        let mut raw = match self.inner.take() {
            Some(BodyInner::Raw(r)) => r,
            Some(memory) => {
                self.inner = Some(memory);
                return Ok(());
            }
            None => return Err(TopazError::BodyAlreadyTaken),
        };

        let bytes = buffer(&mut raw, limit).await?;
        self.inner = Some(BodyInner::Memory(bytes));
        Ok(())
    }

    /// Whether the body is buffered and was not taken
    pub fn is_loaded(&self) -> bool {
        matches!(self.inner, Some(BodyInner::Memory(_)))
    }

    /// Borrow the buffered bytes
    pub fn bytes(&self) -> Result<&Bytes, TopazError> {
        match &self.inner {
            Some(BodyInner::Memory(b)) => Ok(b),
            Some(BodyInner::Raw(_)) => Err(TopazError::Other("request body was not loaded".to_string())),
            None => Err(TopazError::BodyAlreadyTaken),
        }
    }

    /// Move the body out. Reading this one afterward fails with
    /// `BodyAlreadyTaken`.
    #[inline]
    pub fn take(&mut self) -> Self {
        Body { inner: self.inner.take() }
    }

    /// Take the buffered body and convert it into `T::Out`
    pub fn take_as<T: FromBytes>(&mut self) -> Result<T::Out, TopazError> {
        match self.inner.take() {
            Some(BodyInner::Memory(b)) => T::from_bytes(b),
            Some(raw) => {
                self.inner = Some(raw);
                Err(TopazError::Other("request body was not loaded".to_string()))
            }
            None => Err(TopazError::BodyAlreadyTaken),
        }
    }
}

/// Upper bound of the up front allocation made from a declared length
const MAX_PREALLOCATION: usize = 64 * 1024;

async fn buffer<B>(raw: &mut B, limit: Option<usize>) -> Result<Bytes, TopazError>
where
    B: HttpBody + Unpin,
    TopazError: From<B::Error>,
{
    let declared = usize::try_from(raw.size_hint().lower()).unwrap_or(usize::MAX);
    if let Some(limit) = limit.filter(|l| declared > *l) {
        return Err(TopazError::PayloadTooLarge(limit));
    }

    let mut vec = Vec::with_capacity(declared.min(MAX_PREALLOCATION));
    while let Some(buf) = raw.data().await.transpose()? {
        if let Some(limit) = limit.filter(|l| vec.len() + buf.remaining() > *l) {
            return Err(TopazError::PayloadTooLarge(limit));
        }
        vec.extend_from_slice(buf.chunk());
    }

    Ok(vec.into())
}

impl Default for Body {
    fn default() -> Self {
        Body { inner: None }
    }
}

impl From<Bytes> for Body {
    fn from(b: Bytes) -> Self {
        Body {
            inner: Some(BodyInner::Memory(b)),
        }
    }
}

impl From<&'static str> for Body {
    fn from(s: &'static str) -> Self {
        Body::from(Bytes::from_static(s.as_bytes()))
    }
}

impl From<String> for Body {
    fn from(s: String) -> Self {
        Body::from(Bytes::from(s))
    }
}

pub trait FromBytes {
    type Out;
    fn from_bytes(bytes: Bytes) -> Result<Self::Out, TopazError>
    where
        Self: Sized;
}

impl FromBytes for Bytes {
    type Out = Bytes;

    #[inline]
    fn from_bytes(bytes: Bytes) -> Result<Self, TopazError> {
        Ok(bytes)
    }
}

impl FromBytes for String {
    type Out = String;

    #[inline]
    fn from_bytes(bytes: Bytes) -> Result<Self, TopazError> {
        String::from_utf8(bytes.to_vec()).map_err(|e| TopazError::status(http::StatusCode::BAD_REQUEST, e.to_string()))
    }
}

impl FromBytes for Vec<u8> {
    type Out = Vec<u8>;

    #[inline]
    fn from_bytes(bytes: Bytes) -> Result<Self, TopazError> {
        Ok(bytes.to_vec())
    }
}

/// Typed payload wrappers. The wrapper is what a handler sends back, its
/// inner type is what `take_as` hands out.
macro_rules! payload {
    ($(#[$doc:meta])* $name:ident, $feature:literal, $decode:path) => {
        $(#[$doc])*
        #[cfg(feature = $feature)]
        #[derive(Debug, Clone, PartialEq, Eq, Default)]
        pub struct $name<T>(pub T);

        #[cfg(feature = $feature)]
        impl<T> $name<T> {
            pub fn into_inner(self) -> T {
                self.0
            }
        }

        #[cfg(feature = $feature)]
        impl<T> std::ops::Deref for $name<T> {
            type Target = T;

            fn deref(&self) -> &T {
                &self.0
            }
        }

        #[cfg(feature = $feature)]
        impl<T> std::ops::DerefMut for $name<T> {
            fn deref_mut(&mut self) -> &mut T {
                &mut self.0
            }
        }

        #[cfg(feature = $feature)]
        impl<T: serde::de::DeserializeOwned> FromBytes for $name<T> {
            type Out = T;

            #[inline]
            fn from_bytes(bytes: Bytes) -> Result<T, TopazError> {
                Ok($decode(bytes.as_ref())?)
            }
        }
    };
}

payload!(
    /// `application/json` payload
    Json,
    "json",
    serde_json::from_slice
);

payload!(
    /// `application/x-www-form-urlencoded` payload
    Form,
    "form",
    serde_urlencoded::from_bytes
);
