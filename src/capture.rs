//! Response sinks.
//!
//! The downstream handler writes its response into a [`ResponseSink`].
//! When response templates are configured the modifier hands it a
//! [`ResponseCapture`] instead of the client's sink, so status and body can
//! still be rewritten after the handler has finished.

use bytes::{Bytes, BytesMut};
use http::header::{CONTENT_LENGTH, CONTENT_TYPE, X_CONTENT_TYPE_OPTIONS};
use http::{HeaderMap, HeaderValue, StatusCode};

/// Where a handler writes its response.
pub trait ResponseSink: Send {
    /// Response headers.
    fn headers(&self) -> &HeaderMap;

    fn headers_mut(&mut self) -> &mut HeaderMap;

    /// Set the status code.
    fn write_status(&mut self, status: StatusCode);

    /// Append body bytes.
    fn write_body(&mut self, bytes: &[u8]);
}

/// A sink that keeps what reaches the client.
///
/// Like a server connection, the first status written wins and writing
/// body bytes before any status commits `200 OK`.
#[derive(Debug, Default)]
pub struct ResponseRecorder {
    status: Option<StatusCode>,
    headers: HeaderMap,
    body: BytesMut,
}

impl ResponseRecorder {
    /// An empty recorder with no status committed.
    pub fn new() -> Self {
        Self::default()
    }

    /// The committed status, `200` if nothing was written.
    pub fn status(&self) -> StatusCode {
        self.status.unwrap_or(StatusCode::OK)
    }

    /// Body bytes written so far.
    pub fn body(&self) -> &[u8] {
        &self.body
    }

    /// The recorded response as an `http::Response`.
    pub fn into_response(self) -> http::Response<Bytes> {
        let status = self.status();
        let mut response = http::Response::new(self.body.freeze());
        *response.status_mut() = status;
        *response.headers_mut() = self.headers;
        response
    }
}

impl ResponseSink for ResponseRecorder {
    fn headers(&self) -> &HeaderMap {
        &self.headers
    }

    fn headers_mut(&mut self) -> &mut HeaderMap {
        &mut self.headers
    }

    fn write_status(&mut self, status: StatusCode) {
        self.status.get_or_insert(status);
    }

    fn write_body(&mut self, bytes: &[u8]) {
        self.status.get_or_insert(StatusCode::OK);
        self.body.extend_from_slice(bytes);
    }
}

/// Status and body captured from a downstream handler.
#[derive(Debug, Clone, PartialEq)]
pub struct CapturedResponse {
    pub status: StatusCode,
    pub body: Bytes,
}

/// A buffering stand-in for the client's sink.
///
/// Headers go straight to the wrapped sink. Status (last write wins) and
/// body bytes are held back; nothing is forwarded until the caller writes
/// the final response itself.
pub struct ResponseCapture<'a> {
    inner: &'a mut dyn ResponseSink,
    status: StatusCode,
    body: BytesMut,
}

impl<'a> ResponseCapture<'a> {
    /// Wrap `inner`. Header writes still reach it directly.
    pub fn new(inner: &'a mut dyn ResponseSink) -> Self {
        Self {
            inner,
            status: StatusCode::OK,
            body: BytesMut::new(),
        }
    }

    /// The captured status, last write wins.
    pub fn status(&self) -> StatusCode {
        self.status
    }

    /// Buffered downstream body.
    pub fn body(&self) -> &[u8] {
        &self.body
    }

    /// Release the wrapped sink and return what was captured.
    pub fn finish(self) -> CapturedResponse {
        CapturedResponse {
            status: self.status,
            body: self.body.freeze(),
        }
    }
}

impl ResponseSink for ResponseCapture<'_> {
    fn headers(&self) -> &HeaderMap {
        self.inner.headers()
    }

    fn headers_mut(&mut self) -> &mut HeaderMap {
        self.inner.headers_mut()
    }

    fn write_status(&mut self, status: StatusCode) {
        self.status = status;
    }

    fn write_body(&mut self, bytes: &[u8]) {
        self.body.extend_from_slice(bytes);
    }
}

/// Reply with a plain-text error message.
pub fn write_error(sink: &mut dyn ResponseSink, status: StatusCode, message: &str) {
    let headers = sink.headers_mut();
    headers.remove(CONTENT_LENGTH);
    headers.insert(
        CONTENT_TYPE,
        HeaderValue::from_static("text/plain; charset=utf-8"),
    );
    headers.insert(X_CONTENT_TYPE_OPTIONS, HeaderValue::from_static("nosniff"));
    sink.write_status(status);
    sink.write_body(message.as_bytes());
    sink.write_body(b"\n");
}

/// Set `Content-Length` to `len`.
pub fn set_content_length(headers: &mut HeaderMap, len: usize) {
    headers.insert(CONTENT_LENGTH, HeaderValue::from(len));
}
