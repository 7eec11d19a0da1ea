//! Query string transformer.

use super::{compile, strip_missing, TransformError};
use crate::context::TemplateContext;
use crate::environment::{Environment, RequestInfo};
use crate::template::Template;
use http::uri::{PathAndQuery, Uri};
use std::collections::{BTreeMap, HashMap};
use tracing::{debug, warn};

/// Query string transformer.
pub struct QueryTransformer {
    /// Compiled templates keyed by target parameter
    templates: Vec<(String, Template)>,
}

impl QueryTransformer {
    /// Create a new query transformer from configuration.
    ///
    /// Templates that do not compile are logged and skipped.
    pub fn new(config: &HashMap<String, String>) -> Self {
        let templates = config
            .iter()
            .filter_map(|(param, src)| match compile(&format!("query_{}", param), src) {
                Ok(tmpl) => Some((param.clone(), tmpl)),
                Err(e) => {
                    warn!(param = %param, error = %e, "Skipping query template");
                    None
                }
            })
            .collect();

        Self { templates }
    }

    /// Number of usable query templates.
    pub fn len(&self) -> usize {
        self.templates.len()
    }

    pub fn is_empty(&self) -> bool {
        self.templates.is_empty()
    }

    /// Render every query template against the current request and rewrite
    /// the request URI.
    ///
    /// An existing parameter is replaced, a new one is appended. Results
    /// that are empty once placeholders are stripped are dropped. Template
    /// failures skip that parameter only.
    pub fn modify_query<B>(
        &self,
        req: &mut http::Request<B>,
        ctx: &TemplateContext,
    ) -> Result<(), TransformError> {
        if self.templates.is_empty() {
            return Ok(());
        }

        let info = RequestInfo::from_request(req);
        let data = Environment::for_request(&info, ctx).to_value();
        let mut params = info.query.clone();

        for (param, tmpl) in &self.templates {
            let value = match tmpl.execute(&data) {
                Ok(out) => strip_missing(&out),
                Err(e) => {
                    warn!(param = %param, error = %e, "Query template failed");
                    continue;
                }
            };
            if value.is_empty() {
                continue;
            }

            match params.get_mut(param) {
                Some(existing) => {
                    debug!(param = %param, value = %value, "Overwriting query parameter");
                    *existing = vec![value];
                }
                None => {
                    debug!(param = %param, value = %value, "Adding query parameter");
                    params.insert(param.clone(), vec![value]);
                }
            }
        }

        let uri = with_query(req.uri(), &encode_query(&params))?;
        *req.uri_mut() = uri;
        Ok(())
    }
}

/// Encode parameters sorted by key.
pub fn encode_query(params: &BTreeMap<String, Vec<String>>) -> String {
    params
        .iter()
        .flat_map(|(k, values)| {
            values
                .iter()
                .map(move |v| format!("{}={}", urlencoding::encode(k), urlencoding::encode(v)))
        })
        .collect::<Vec<_>>()
        .join("&")
}

/// Replace the query component of `uri`.
fn with_query(uri: &Uri, query: &str) -> Result<Uri, TransformError> {
    let path_and_query = if query.is_empty() {
        uri.path().to_string()
    } else {
        format!("{}?{}", uri.path(), query)
    };

    let mut parts = uri.clone().into_parts();
    parts.path_and_query = Some(
        PathAndQuery::try_from(path_and_query)
            .map_err(|e| TransformError::InvalidUri(e.to_string()))?,
    );
    Uri::from_parts(parts).map_err(|e| TransformError::InvalidUri(e.to_string()))
}
