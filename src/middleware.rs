//! Modifier middleware implementation.

use crate::capture::{write_error, ResponseCapture, ResponseSink};
use crate::config::ModifierConfig;
use crate::context::TemplateContext;
use crate::environment::RequestInfo;
use crate::template::TemplateError;
use crate::transformer::{
    compile, BodyTransformer, HeaderTransformer, QueryTransformer, RequestBodies, TransformError,
};
use crate::types::Request;
use async_trait::async_trait;
use bytes::Bytes;
use std::collections::HashMap;
use std::future::Future;
use std::sync::Arc;
use tracing::{debug, error, info, info_span, warn, Instrument, Span};

/// A component that produces a response for a request.
#[async_trait]
pub trait Handler: Send + Sync {
    /// Serve `req`, writing the response into `sink`.
    async fn serve(&self, req: Request, sink: &mut dyn ResponseSink);
}

/// Adapts an async closure returning a response into a [`Handler`].
pub struct HandlerFn<F> {
    f: F,
}

/// Wrap a closure as a [`Handler`].
pub fn handler_fn<F, Fut>(f: F) -> HandlerFn<F>
where
    F: Fn(Request) -> Fut + Send + Sync,
    Fut: Future<Output = http::Response<Bytes>> + Send,
{
    HandlerFn { f }
}

#[async_trait]
impl<F, Fut> Handler for HandlerFn<F>
where
    F: Fn(Request) -> Fut + Send + Sync,
    Fut: Future<Output = http::Response<Bytes>> + Send,
{
    async fn serve(&self, req: Request, sink: &mut dyn ResponseSink) {
        let (parts, body) = (self.f)(req).await.into_parts();
        sink.headers_mut().extend(parts.headers);
        sink.write_status(parts.status);
        sink.write_body(&body);
    }
}

/// Message-rewriting middleware.
///
/// Each request runs header, query and request body rewrites in that
/// order, then calls the downstream handler. When response templates are
/// configured the handler's output is captured and rewritten before it
/// reaches the client.
pub struct Modifier {
    name: String,
    next: Arc<dyn Handler>,
    headers: HeaderTransformer,
    query: QueryTransformer,
    body: BodyTransformer,
    /// Diagnostics for every request handled by this instance
    span: Span,
}

impl Modifier {
    /// Create a new modifier from configuration.
    ///
    /// Body templates must compile. Header and query entries that do not
    /// compile are logged and skipped.
    pub fn new(
        config: &ModifierConfig,
        name: impl Into<String>,
        next: Arc<dyn Handler>,
    ) -> Result<Self, ModifierError> {
        let name = name.into();
        let span = info_span!("modifier", name = %name);
        let _enter = span.enter();

        let request = config
            .request_template()
            .map(|src| compile("request", src))
            .transpose()
            .map_err(|source| ModifierError::Template {
                field: "request".to_string(),
                source,
            })?;

        let mut response = HashMap::with_capacity(config.response.len());
        for (status, src) in &config.response {
            let tmpl = compile("response", src).map_err(|source| ModifierError::Template {
                field: format!("response.{}", status),
                source,
            })?;
            response.insert(*status, tmpl);
        }

        let headers = HeaderTransformer::new(&config.headers);
        let query = config
            .query_templates()
            .map(QueryTransformer::new)
            .unwrap_or_else(|| QueryTransformer::new(&HashMap::new()));
        let body = BodyTransformer::new(request, response, config.settings.max_body_size);

        info!(
            headers = headers.len(),
            query = query.len(),
            request_template = body.has_request_template(),
            response_templates = ?body.response_statuses(),
            "Modifier initialized"
        );
        drop(_enter);

        Ok(Self {
            name,
            next,
            headers,
            query,
            body,
            span,
        })
    }

    /// Create from a YAML configuration string.
    pub fn from_yaml(
        yaml: &str,
        name: impl Into<String>,
        next: Arc<dyn Handler>,
    ) -> Result<Self, ModifierError> {
        let config: ModifierConfig = serde_yaml::from_str(yaml)?;
        Self::new(&config, name, next)
    }

    /// Create from a JSON configuration string.
    pub fn from_json(
        json: &str,
        name: impl Into<String>,
        next: Arc<dyn Handler>,
    ) -> Result<Self, ModifierError> {
        let config: ModifierConfig = serde_json::from_str(json)?;
        Self::new(&config, name, next)
    }

    /// Instance name, recorded on the request span.
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Number of active header templates.
    pub fn header_templates(&self) -> usize {
        self.headers.len()
    }

    /// Number of active query templates.
    pub fn query_templates(&self) -> usize {
        self.query.len()
    }

    /// Whether a request body template is configured.
    pub fn has_request_template(&self) -> bool {
        self.body.has_request_template()
    }

    /// Status codes with a response template, ascending.
    pub fn response_statuses(&self) -> Vec<u16> {
        self.body.response_statuses()
    }

    /// Process one request.
    pub async fn handle(&self, req: Request, sink: &mut dyn ResponseSink) {
        self.process(req, sink)
            .instrument(self.span.clone())
            .await
    }

    async fn process(&self, mut req: Request, sink: &mut dyn ResponseSink) {
        let ctx = TemplateContext::new();
        debug!(
            method = %req.method(),
            uri = %req.uri(),
            request_id = %ctx.get("request_id").map(ToString::to_string).unwrap_or_default(),
            "Processing request"
        );

        self.headers.modify_headers(&mut req, &ctx);

        if let Err(e) = self.query.modify_query(&mut req, &ctx) {
            warn!(error = %e, "Query modification failed");
        }

        let bodies = match self.request_stage(&mut req, &ctx).await {
            Ok(bodies) => bodies,
            Err(e) => {
                let status = e.status();
                warn!(status = status.as_u16(), error = %e, "Request body modification failed");
                write_error(sink, status, &format!("Request masking error: {}", e));
                return;
            }
        };

        if !self.body.has_response_templates() {
            self.next.serve(req, sink).await;
            return;
        }

        let request = RequestInfo::from_request(&req);
        let captured = {
            let mut capture = ResponseCapture::new(&mut *sink);
            self.next.serve(req, &mut capture).await;
            capture.finish()
        };

        if let Err(e) =
            self.body
                .modify_response(&mut *sink, captured, &request, bodies.as_ref(), &ctx)
        {
            let status = e.status();
            error!(status = status.as_u16(), error = %e, "Response body modification failed");
            write_error(sink, status, &e.to_string());
        }
    }

    async fn request_stage(
        &self,
        req: &mut Request,
        ctx: &TemplateContext,
    ) -> Result<Option<RequestBodies>, TransformError> {
        if self.body.has_request_template() {
            self.body.modify_request_body(req, ctx).await
        } else if self.body.has_response_templates() {
            self.body.buffer_request_body(req).await
        } else {
            Ok(None)
        }
    }
}

#[async_trait]
impl Handler for Modifier {
    async fn serve(&self, req: Request, sink: &mut dyn ResponseSink) {
        self.handle(req, sink).await
    }
}

/// Modifier construction errors.
#[derive(Debug, thiserror::Error)]
pub enum ModifierError {
    #[error("YAML parse error: {0}")]
    Yaml(#[from] serde_yaml::Error),

    #[error("JSON parse error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("invalid {field} template: {source}")]
    Template {
        field: String,
        #[source]
        source: TemplateError,
    },
}
