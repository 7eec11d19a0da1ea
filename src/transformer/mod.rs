//! Request and response transformers.

mod body;
mod header;
mod query;

pub use body::{BodyTransformer, RequestBodies};
pub use header::HeaderTransformer;
pub use query::QueryTransformer;

use crate::funcs::library;
use crate::template::{Template, TemplateBuilder, TemplateError, MISSING_VALUE};
use http::StatusCode;

/// Template action delimiters. Distinct from braces so templates can sit
/// inside literal JSON.
pub const LEFT_DELIM: &str = "[[";
pub const RIGHT_DELIM: &str = "]]";

/// JSON-escaped form of the missing-value placeholder.
const MISSING_VALUE_ESCAPED: &str = "\\u003cno value\\u003e";

/// Compile a template bound to the function library.
pub fn compile(name: &str, src: &str) -> Result<Template, TemplateError> {
    TemplateBuilder::new(name)
        .funcs(library())
        .delims(LEFT_DELIM, RIGHT_DELIM)
        .parse(src)
}

/// Remove every missing-value placeholder from rendered output.
pub fn strip_missing(rendered: &str) -> String {
    rendered
        .replace(MISSING_VALUE, "")
        .replace(MISSING_VALUE_ESCAPED, "")
}

/// Whether `s` holds template syntax rather than a literal.
pub fn contains_template(s: &str) -> bool {
    s.contains(LEFT_DELIM) && s.contains(RIGHT_DELIM)
}

/// Transform errors.
#[derive(Debug, thiserror::Error)]
pub enum TransformError {
    #[error("failed to read request body: {0}")]
    ReadBody(String),

    #[error("request body exceeds {limit} bytes")]
    BodyTooLarge { limit: usize },

    #[error("failed to parse request JSON: {0}")]
    InvalidJson(#[from] serde_json::Error),

    #[error("failed to execute request template: {0}")]
    RequestTemplate(#[source] TemplateError),

    #[error("response masking error: {0}")]
    ResponseTemplate(#[source] TemplateError),

    #[error("invalid header name: {0}")]
    InvalidHeaderName(String),

    #[error("invalid value for header {0}")]
    InvalidHeaderValue(String),

    #[error("invalid URI: {0}")]
    InvalidUri(String),

    #[error("template error: {0}")]
    Template(#[from] TemplateError),
}

impl TransformError {
    /// Status code used when this error ends the request.
    pub fn status(&self) -> StatusCode {
        match self {
            TransformError::ReadBody(_)
            | TransformError::InvalidJson(_)
            | TransformError::RequestTemplate(_)
            | TransformError::InvalidHeaderName(_)
            | TransformError::InvalidHeaderValue(_)
            | TransformError::Template(_) => StatusCode::BAD_REQUEST,
            TransformError::BodyTooLarge { .. } => StatusCode::PAYLOAD_TOO_LARGE,
            TransformError::ResponseTemplate(_) | TransformError::InvalidUri(_) => {
                StatusCode::INTERNAL_SERVER_ERROR
            }
        }
    }
}
