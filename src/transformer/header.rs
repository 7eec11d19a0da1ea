//! Header manipulation transformer.

use super::{compile, contains_template, strip_missing, TransformError};
use crate::context::TemplateContext;
use crate::environment::{header_snapshot, Environment, RequestInfo};
use crate::template::Template;
use http::{HeaderName, HeaderValue};
use std::collections::HashMap;
use tracing::{debug, warn};

/// Header manipulation transformer.
pub struct HeaderTransformer {
    /// Compiled templates keyed by target header
    templates: Vec<(HeaderName, Template)>,
}

impl HeaderTransformer {
    /// Create a new header transformer from configuration.
    ///
    /// Entries with an empty template, an invalid header name or a template
    /// that does not compile are logged and skipped.
    pub fn new(config: &HashMap<String, String>) -> Self {
        let mut templates = Vec::with_capacity(config.len());

        for (name, src) in config {
            if src.is_empty() {
                continue;
            }
            let header = match HeaderName::try_from(name.as_str()) {
                Ok(h) => h,
                Err(e) => {
                    warn!(header = %name, error = %e, "Skipping invalid header name");
                    continue;
                }
            };
            match compile(&format!("header_{}", name), src) {
                Ok(tmpl) => templates.push((header, tmpl)),
                Err(e) => warn!(header = %name, error = %e, "Skipping header template"),
            }
        }

        Self { templates }
    }

    /// Number of usable header templates.
    pub fn len(&self) -> usize {
        self.templates.len()
    }

    pub fn is_empty(&self) -> bool {
        self.templates.is_empty()
    }

    /// Render every header template against the original request and
    /// install the results.
    ///
    /// A header present before the transform is replaced; any other header
    /// is appended. Results that are empty after trimming are dropped.
    pub fn modify_headers<B>(&self, req: &mut http::Request<B>, ctx: &TemplateContext) {
        if self.templates.is_empty() {
            return;
        }

        let original = header_snapshot(req.headers());
        let info = RequestInfo::from_request(req);
        let data = Environment::for_request(&info, ctx).to_value();

        let mut rendered = Vec::with_capacity(self.templates.len());
        for (name, tmpl) in &self.templates {
            let value = match tmpl.execute(&data) {
                Ok(out) => strip_missing(&out).trim().to_string(),
                Err(e) => {
                    warn!(header = %name, error = %e, "Header template failed");
                    continue;
                }
            };
            if value.is_empty() {
                continue;
            }
            match HeaderValue::try_from(value) {
                Ok(v) => rendered.push((name.clone(), v)),
                Err(e) => warn!(header = %name, error = %e, "Rendered header value is invalid"),
            }
        }

        let headers = req.headers_mut();
        for (name, value) in rendered {
            match original.get(name.as_str()) {
                Some(was) => {
                    debug!(header = %name, value = ?value, was = %was, "Set header");
                    headers.insert(name, value);
                }
                None => {
                    debug!(header = %name, value = ?value, "Added header");
                    headers.append(name, value);
                }
            }
        }
    }

    /// Replace a header. `value` may be an inline template.
    pub fn set_header<B>(
        &self,
        req: &mut http::Request<B>,
        name: &str,
        value: &str,
        ctx: &TemplateContext,
    ) -> Result<(), TransformError> {
        let Some((name, value)) = resolve(req, name, value, ctx)? else {
            return Ok(());
        };
        debug!(header = %name, value = ?value, "Set header");
        req.headers_mut().insert(name, value);
        Ok(())
    }

    /// Append a header value without touching existing ones. `value` may be
    /// an inline template.
    pub fn add_header<B>(
        &self,
        req: &mut http::Request<B>,
        name: &str,
        value: &str,
        ctx: &TemplateContext,
    ) -> Result<(), TransformError> {
        let Some((name, value)) = resolve(req, name, value, ctx)? else {
            return Ok(());
        };
        debug!(header = %name, value = ?value, "Added header");
        req.headers_mut().append(name, value);
        Ok(())
    }

    /// Remove every value of a header.
    pub fn remove_header<B>(&self, req: &mut http::Request<B>, name: &str) {
        if req.headers_mut().remove(name).is_some() {
            debug!(header = %name, "Removed header");
        }
    }
}

/// Render an inline header value. `None` when there is nothing to write.
fn resolve<B>(
    req: &http::Request<B>,
    name: &str,
    value: &str,
    ctx: &TemplateContext,
) -> Result<Option<(HeaderName, HeaderValue)>, TransformError> {
    if value.is_empty() {
        return Ok(None);
    }
    let header =
        HeaderName::try_from(name).map_err(|_| TransformError::InvalidHeaderName(name.to_string()))?;

    let value = if contains_template(value) {
        let info = RequestInfo::from_request(req);
        let data = Environment::for_request(&info, ctx).to_value();
        let out = compile("dynamic", value)?.execute(&data)?;
        strip_missing(&out)
    } else {
        value.to_string()
    };
    if value.is_empty() {
        return Ok(None);
    }

    let value = HeaderValue::try_from(value)
        .map_err(|_| TransformError::InvalidHeaderValue(name.to_string()))?;
    Ok(Some((header, value)))
}
