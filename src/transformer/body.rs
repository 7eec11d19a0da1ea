//! Request and response body transformer.

use super::{strip_missing, TransformError};
use crate::capture::{set_content_length, CapturedResponse, ResponseSink};
use crate::context::TemplateContext;
use crate::environment::{
    header_snapshot, parse_json_body, parse_json_lenient, parse_response_body, Environment,
    RequestInfo, ResponseInfo,
};
use crate::template::{Template, Value};
use crate::types::{empty, full, Request};
use bytes::Bytes;
use http::header::{CONTENT_LENGTH, CONTENT_TYPE, TRANSFER_ENCODING};
use http::HeaderValue;
use http_body::Body as _;
use http_body_util::{BodyExt, LengthLimitError, Limited};
use std::collections::HashMap;
use tracing::{debug, trace};

/// Request body before and after the request stage.
#[derive(Debug, Clone, PartialEq)]
pub struct RequestBodies {
    pub original: Bytes,
    pub modified: Bytes,
}

/// Rewrites the request body before forwarding and the response body
/// after the downstream handler has run.
pub struct BodyTransformer {
    /// Request body template
    request: Option<Template>,
    /// Response body templates keyed by status code
    response: HashMap<u16, Template>,
    /// Upper bound for buffering the request body
    max_body_size: usize,
}

impl BodyTransformer {
    /// Create from compiled request and response templates.
    pub fn new(
        request: Option<Template>,
        response: HashMap<u16, Template>,
        max_body_size: usize,
    ) -> Self {
        Self {
            request,
            response,
            max_body_size,
        }
    }

    /// Whether a request body template is configured.
    pub fn has_request_template(&self) -> bool {
        self.request.is_some()
    }

    /// Whether any response template is configured.
    pub fn has_response_templates(&self) -> bool {
        !self.response.is_empty()
    }

    /// Status codes with a response template, ascending.
    pub fn response_statuses(&self) -> Vec<u16> {
        let mut statuses: Vec<u16> = self.response.keys().copied().collect();
        statuses.sort_unstable();
        statuses
    }

    /// Render the request template over the parsed request body and install
    /// the result as the new body.
    ///
    /// Returns `None` when there is no request template or no body.
    pub async fn modify_request_body(
        &self,
        req: &mut Request,
        ctx: &TemplateContext,
    ) -> Result<Option<RequestBodies>, TransformError> {
        let Some(tmpl) = &self.request else {
            return Ok(None);
        };
        if req.body().is_end_stream() {
            trace!("Request has no body");
            return Ok(None);
        }

        let original = self.read_body(req).await?;
        let parsed = parse_json_body(&original)?;

        let info = RequestInfo::from_request(req);
        let data = Environment::for_request(&info, ctx)
            .with_api_body(parsed)
            .to_value();
        let rendered = tmpl
            .execute(&data)
            .map_err(TransformError::RequestTemplate)?;
        let modified = Bytes::from(strip_missing(&rendered));

        debug!(
            original_len = original.len(),
            modified_len = modified.len(),
            "Rewrote request body"
        );
        install_body(req, modified.clone());

        Ok(Some(RequestBodies { original, modified }))
    }

    /// Buffer the request body and put it back unchanged, so response
    /// templates can still see it.
    pub async fn buffer_request_body(
        &self,
        req: &mut Request,
    ) -> Result<Option<RequestBodies>, TransformError> {
        if req.body().is_end_stream() {
            return Ok(None);
        }
        let original = self.read_body(req).await?;
        install_body(req, original.clone());
        Ok(Some(RequestBodies {
            modified: original.clone(),
            original,
        }))
    }

    async fn read_body(&self, req: &mut Request) -> Result<Bytes, TransformError> {
        let body = std::mem::replace(req.body_mut(), empty());
        let collect: std::pin::Pin<
            Box<
                dyn std::future::Future<
                        Output = Result<http_body_util::Collected<Bytes>, crate::types::BoxError>,
                    > + Send,
            >,
        > = Box::pin(Limited::new(body, self.max_body_size).collect());
        match collect.await {
            Ok(collected) => Ok(collected.to_bytes()),
            Err(e) if e.is::<LengthLimitError>() => Err(TransformError::BodyTooLarge {
                limit: self.max_body_size,
            }),
            Err(e) => Err(TransformError::ReadBody(e.to_string())),
        }
    }

    /// Write the captured response to `sink`, rewritten by the template
    /// registered for its status code if there is one.
    ///
    /// Without a matching template the captured status and body pass through
    /// unchanged. With one, output that parses as JSON is written minified
    /// with `Content-Type: application/json`; anything else is written as
    /// rendered. Either way `Content-Length` is recomputed and the captured
    /// status is kept.
    pub fn modify_response(
        &self,
        sink: &mut dyn ResponseSink,
        captured: CapturedResponse,
        request: &RequestInfo,
        bodies: Option<&RequestBodies>,
        ctx: &TemplateContext,
    ) -> Result<(), TransformError> {
        let status = captured.status;
        let Some(tmpl) = self.response.get(&status.as_u16()) else {
            trace!(status = status.as_u16(), "No response template for status");
            sink.write_status(status);
            sink.write_body(&captured.body);
            return Ok(());
        };

        let (api_body, modified_body) = match bodies {
            Some(b) => (parse_json_lenient(&b.original), parse_json_lenient(&b.modified)),
            None => (Value::Null, Value::Null),
        };
        let response = ResponseInfo {
            status: status.as_u16(),
            headers: header_snapshot(sink.headers()),
            body: parse_response_body(&captured.body),
        };
        let data = Environment::for_request(request, ctx)
            .with_api_body(api_body)
            .with_modified_body(modified_body)
            .with_response(response)
            .to_value();

        let rendered = tmpl
            .execute(&data)
            .map_err(TransformError::ResponseTemplate)?;
        let cleaned = strip_missing(&rendered);

        let body = match serde_json::from_str::<serde_json::Value>(&cleaned) {
            Ok(json) => {
                sink.headers_mut()
                    .insert(CONTENT_TYPE, HeaderValue::from_static("application/json"));
                Bytes::from(json.to_string())
            }
            Err(e) => {
                debug!(status = status.as_u16(), error = %e, "Response template output is not JSON");
                Bytes::from(cleaned)
            }
        };

        debug!(status = status.as_u16(), len = body.len(), "Rewrote response body");
        set_content_length(sink.headers_mut(), body.len());
        sink.write_status(status);
        sink.write_body(&body);
        Ok(())
    }
}

/// Install a fully buffered body. The new length replaces any chunked framing.
fn install_body(req: &mut Request, bytes: Bytes) {
    req.headers_mut().remove(TRANSFER_ENCODING);
    req.headers_mut()
        .insert(CONTENT_LENGTH, HeaderValue::from(bytes.len()));
    *req.body_mut() = full(bytes);
}
