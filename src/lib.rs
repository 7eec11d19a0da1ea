//! Template-driven request/response modifier middleware for Zentinel.
//!
//! The modifier sits in front of a downstream [`Handler`] and rewrites
//! traffic with `[[ ]]`-delimited templates:
//!
//! - Request headers and query parameters
//! - The JSON request body
//! - The response body, selected by status code
//!
//! Every template sees the same per-request environment: the original
//! request, the parsed bodies, a [`TemplateContext`] with timestamps and a
//! request id, and (for response templates) the downstream response.
//!
//! ## Configuration Example
//!
//! ```yaml
//! request: '{"question": "[[ .request.api.body.ask ]]"}'
//! response:
//!   200: '{"answer": "[[ .response.body.text ]]", "id": "[[ .context.request_id ]]"}'
//! headers:
//!   X-Request-ID: "req_[[ .context.unixtime ]]"
//! query:
//!   transform:
//!     question_id: "[[ .request.query.ask_id ]]"
//! ```

pub mod capture;
pub mod config;
pub mod context;
pub mod environment;
pub mod funcs;
pub mod middleware;
pub mod template;
pub mod transformer;
pub mod types;

pub use capture::{ResponseCapture, ResponseRecorder, ResponseSink};
pub use config::ModifierConfig;
pub use context::TemplateContext;
pub use middleware::{handler_fn, Handler, HandlerFn, Modifier, ModifierError};
pub use transformer::TransformError;
pub use types::{Body, Request};
