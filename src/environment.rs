//! Builds the data tree templates are rendered against.
//!
//! ```text
//! request.method / request.path / request.url
//! request.headers.<lower-case name>     first value of each header
//! request.query.<key>                   string, or list when repeated
//! request.api.body                      parsed original request body
//! request.modified.body                 parsed rewritten request body (response stage)
//! response.body / .status / .headers    response stage only
//! context.*                             the per-request TemplateContext
//! ```

use crate::context::TemplateContext;
use crate::template::Value;
use http::HeaderMap;
use std::collections::BTreeMap;

/// Request metadata exposed to templates.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct RequestInfo {
    /// HTTP method
    pub method: String,
    /// Request path (without query string)
    pub path: String,
    /// Path and query as received
    pub url: String,
    /// First value of each header, keyed by lower-case name
    pub headers: BTreeMap<String, String>,
    /// Decoded query parameters
    pub query: BTreeMap<String, Vec<String>>,
}

impl RequestInfo {
    /// Snapshot the metadata of a request.
    pub fn from_request<B>(req: &http::Request<B>) -> Self {
        Self {
            method: req.method().to_string(),
            path: req.uri().path().to_string(),
            url: req.uri().to_string(),
            headers: header_snapshot(req.headers()),
            query: parse_query_string(req.uri().query()),
        }
    }

    /// Get a header value by name, ignoring case.
    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers
            .get(&name.to_ascii_lowercase())
            .map(String::as_str)
    }

    fn to_value(&self) -> BTreeMap<String, Value> {
        let headers = self
            .headers
            .iter()
            .map(|(k, v)| (k.clone(), Value::from(v.as_str())))
            .collect::<BTreeMap<_, _>>();

        let query = self
            .query
            .iter()
            .map(|(k, values)| {
                let value = match values.as_slice() {
                    [single] => Value::from(single.as_str()),
                    many => Value::List(many.iter().map(|v| Value::from(v.as_str())).collect()),
                };
                (k.clone(), value)
            })
            .collect::<BTreeMap<_, _>>();

        BTreeMap::from([
            ("method".to_string(), Value::from(self.method.as_str())),
            ("path".to_string(), Value::from(self.path.as_str())),
            ("url".to_string(), Value::from(self.url.as_str())),
            ("headers".to_string(), Value::Map(headers)),
            ("query".to_string(), Value::Map(query)),
        ])
    }
}

/// Captured response data exposed to response templates.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ResponseInfo {
    pub status: u16,
    pub headers: BTreeMap<String, String>,
    pub body: Value,
}

/// The template data tree for one stage of one request.
#[derive(Debug, Clone)]
pub struct Environment<'a> {
    request: &'a RequestInfo,
    context: &'a TemplateContext,
    api_body: Option<Value>,
    modified_body: Option<Value>,
    response: Option<ResponseInfo>,
}

impl<'a> Environment<'a> {
    /// Environment exposing request metadata and the context.
    pub fn for_request(request: &'a RequestInfo, context: &'a TemplateContext) -> Self {
        Self {
            request,
            context,
            api_body: None,
            modified_body: None,
            response: None,
        }
    }

    /// Expose the original request body as `request.api.body`.
    pub fn with_api_body(mut self, body: Value) -> Self {
        self.api_body = Some(body);
        self
    }

    /// Expose the rewritten request body as `request.modified.body`.
    pub fn with_modified_body(mut self, body: Value) -> Self {
        self.modified_body = Some(body);
        self
    }

    /// Expose the captured response as `response.*`.
    pub fn with_response(mut self, response: ResponseInfo) -> Self {
        self.response = Some(response);
        self
    }

    /// Assemble the tree.
    pub fn to_value(&self) -> Value {
        let mut request = self.request.to_value();
        if let Some(body) = &self.api_body {
            request.insert("api".to_string(), body_branch(body.clone()));
        }
        if let Some(body) = &self.modified_body {
            request.insert("modified".to_string(), body_branch(body.clone()));
        }

        let mut root = BTreeMap::from([
            ("request".to_string(), Value::Map(request)),
            ("context".to_string(), self.context.to_value()),
        ]);

        if let Some(response) = &self.response {
            let headers = response
                .headers
                .iter()
                .map(|(k, v)| (k.clone(), Value::from(v.as_str())))
                .collect::<BTreeMap<_, _>>();
            root.insert(
                "response".to_string(),
                Value::Map(BTreeMap::from([
                    ("body".to_string(), response.body.clone()),
                    ("status".to_string(), Value::Int(i64::from(response.status))),
                    ("headers".to_string(), Value::Map(headers)),
                ])),
            );
        }

        Value::Map(root)
    }
}

fn body_branch(body: Value) -> Value {
    Value::Map(BTreeMap::from([("body".to_string(), body)]))
}

/// First value of every header, keyed by lower-case name.
pub fn header_snapshot(headers: &HeaderMap) -> BTreeMap<String, String> {
    let mut snapshot = BTreeMap::new();
    for (name, value) in headers {
        snapshot
            .entry(name.as_str().to_ascii_lowercase())
            .or_insert_with(|| String::from_utf8_lossy(value.as_bytes()).into_owned());
    }
    snapshot
}

/// Parse a request body as JSON. An empty body is `null`.
pub fn parse_json_body(bytes: &[u8]) -> Result<Value, serde_json::Error> {
    if bytes.is_empty() {
        return Ok(Value::Null);
    }
    serde_json::from_slice(bytes).map(Value::from_json)
}

/// Parse a body for display only; anything that is not JSON becomes `null`.
pub fn parse_json_lenient(bytes: &[u8]) -> Value {
    parse_json_body(bytes).unwrap_or(Value::Null)
}

/// Parse a response body, falling back to its raw text.
pub fn parse_response_body(bytes: &[u8]) -> Value {
    parse_json_body(bytes)
        .unwrap_or_else(|_| Value::String(String::from_utf8_lossy(bytes).into_owned()))
}

/// Parse a query string into a parameter map.
pub fn parse_query_string(query: Option<&str>) -> BTreeMap<String, Vec<String>> {
    let mut params: BTreeMap<String, Vec<String>> = BTreeMap::new();

    if let Some(qs) = query {
        for part in qs.split('&').filter(|p| !p.is_empty()) {
            let (k, v) = part.split_once('=').unwrap_or((part, ""));
            params.entry(decode_component(k)).or_default().push(decode_component(v));
        }
    }

    params
}

fn decode_component(raw: &str) -> String {
    let spaced = raw.replace('+', " ");
    urlencoding::decode(&spaced)
        .map(|s| s.into_owned())
        .unwrap_or(spaced)
}
