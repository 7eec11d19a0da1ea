//! HTTP types shared by the middleware stages.

use bytes::Bytes;
use http_body_util::{BodyExt, Empty, Full};

/// Error type carried by request bodies.
pub type BoxError = Box<dyn std::error::Error + Send + Sync>;

/// A boxed request body.
pub type Body = http_body_util::combinators::BoxBody<Bytes, BoxError>;

/// The request type flowing through the modifier.
pub type Request = http::Request<Body>;

/// A body holding `bytes`.
pub fn full(bytes: impl Into<Bytes>) -> Body {
    Full::new(bytes.into())
        .map_err(|never| match never {})
        .boxed()
}

/// A body with no content.
pub fn empty() -> Body {
    Empty::<Bytes>::new()
        .map_err(|never| match never {})
        .boxed()
}
