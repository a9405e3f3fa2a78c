//! HTTP response construction and serialisation.
//!
//! A [`HttpResponse`] is addressed back to the connection its request came
//! from. Headers keep insertion order and compare names case-insensitively;
//! `Server` is seeded at construction, `Date` and `Content-Length` are
//! filled in at serialisation time when absent. The body is either an
//! in-memory buffer or anything seekable, resolved through the length
//! protocol in [`Body::remaining_len`].

use std::{
    fmt,
    io::{self, Read, Seek, SeekFrom},
};

use bytes::{Bytes, BytesMut};
use log::warn;
use thiserror::Error;

use crate::websocket::WebSocketResponse;

mod date;
mod status;
pub use status::reason_phrase;

/// Errors raised while serialising a response.
#[derive(Debug, Error)]
pub enum ResponseError {
    /// The body does not expose a usable length: the seek/tell protocol
    /// failed.
    #[error("response body does not expose a length: {0}")]
    Length(#[source] io::Error),

    /// Reading the body out of a stream failed.
    #[error("failed to read response body: {0}")]
    Read(#[source] io::Error),
}

/// Capability required of streaming response bodies: the seek/tell pair
/// used to resolve `Content-Length` without consuming the stream.
pub trait BodyStream: Read + Seek + Send {}

impl<T: Read + Seek + Send> BodyStream for T {}

/// A response body: an in-memory buffer, or a seekable stream.
pub enum Body {
    /// Bytes already in memory.
    Buffer(Bytes),
    /// A seekable byte source, read from its current position at
    /// serialisation time.
    Stream(Box<dyn BodyStream>),
}

impl Body {
    /// An empty buffer body.
    #[must_use]
    pub fn empty() -> Self { Self::Buffer(Bytes::new()) }

    /// The number of body bytes that serialisation will emit.
    ///
    /// Buffers report their length. Streams are measured by recording the
    /// current position, seeking to the end, and seeking back, so the
    /// stream position is unchanged afterwards.
    ///
    /// # Errors
    ///
    /// Returns [`ResponseError::Length`] when seeking fails.
    pub fn remaining_len(&mut self) -> Result<u64, ResponseError> {
        match self {
            Self::Buffer(bytes) => Ok(bytes.len() as u64),
            Self::Stream(stream) => {
                let position = stream.stream_position().map_err(ResponseError::Length)?;
                let end = stream.seek(SeekFrom::End(0)).map_err(ResponseError::Length)?;
                stream
                    .seek(SeekFrom::Start(position))
                    .map_err(ResponseError::Length)?;
                Ok(end.saturating_sub(position))
            }
        }
    }

    /// Read the bytes that serialisation will emit, leaving a stream's
    /// position where it was.
    ///
    /// # Errors
    ///
    /// Returns [`ResponseError::Read`] when reading or rewinding fails.
    pub fn read_remaining(&mut self) -> Result<Bytes, ResponseError> {
        match self {
            Self::Buffer(bytes) => Ok(bytes.clone()),
            Self::Stream(stream) => {
                let position = stream.stream_position().map_err(ResponseError::Read)?;
                let mut contents = Vec::new();
                stream
                    .read_to_end(&mut contents)
                    .map_err(ResponseError::Read)?;
                stream
                    .seek(SeekFrom::Start(position))
                    .map_err(ResponseError::Read)?;
                Ok(Bytes::from(contents))
            }
        }
    }
}

impl Default for Body {
    fn default() -> Self { Self::empty() }
}

impl fmt::Debug for Body {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Buffer(bytes) => f.debug_tuple("Buffer").field(&bytes.len()).finish(),
            Self::Stream(_) => f.debug_tuple("Stream").finish(),
        }
    }
}

impl From<Bytes> for Body {
    fn from(bytes: Bytes) -> Self { Self::Buffer(bytes) }
}

impl From<Vec<u8>> for Body {
    fn from(bytes: Vec<u8>) -> Self { Self::Buffer(Bytes::from(bytes)) }
}

impl From<&'static str> for Body {
    fn from(text: &'static str) -> Self { Self::Buffer(Bytes::from(text)) }
}

impl From<String> for Body {
    fn from(text: String) -> Self { Self::Buffer(Bytes::from(text)) }
}

impl From<Box<dyn BodyStream>> for Body {
    fn from(stream: Box<dyn BodyStream>) -> Self { Self::Stream(stream) }
}

/// Response headers: insertion-ordered, names compared
/// case-insensitively.
#[derive(Clone, Debug, Default)]
pub struct ResponseHeaders {
    entries: Vec<(String, String)>,
}

impl ResponseHeaders {
    /// An empty header block.
    #[must_use]
    pub fn new() -> Self { Self::default() }

    /// The first value whose name matches, ignoring ASCII case.
    #[must_use]
    pub fn get(&self, name: &str) -> Option<&str> {
        self.entries
            .iter()
            .find(|(entry, _)| entry.eq_ignore_ascii_case(name))
            .map(|(_, value)| value.as_str())
    }

    /// Whether a header with this name is present.
    #[must_use]
    pub fn contains(&self, name: &str) -> bool { self.get(name).is_some() }

    /// Replace the header's value in place, or append it when absent.
    pub fn set(&mut self, name: impl Into<String>, value: impl Into<String>) {
        let name = name.into();
        let value = value.into();
        match self
            .entries
            .iter_mut()
            .find(|(entry, _)| entry.eq_ignore_ascii_case(&name))
        {
            Some(entry) => entry.1 = value,
            None => self.entries.push((name, value)),
        }
    }

    /// Append a header without disturbing existing values of the same name.
    pub fn append(&mut self, name: impl Into<String>, value: impl Into<String>) {
        self.entries.push((name.into(), value.into()));
    }

    /// Remove every header with this name.
    pub fn remove(&mut self, name: &str) {
        self.entries
            .retain(|(entry, _)| !entry.eq_ignore_ascii_case(name));
    }

    /// Iterate entries in insertion order.
    pub fn iter(&self) -> impl Iterator<Item = (&str, &str)> {
        self.entries
            .iter()
            .map(|(name, value)| (name.as_str(), value.as_str()))
    }

    /// Number of header entries.
    #[must_use]
    pub fn len(&self) -> usize { self.entries.len() }

    /// Whether the block is empty.
    #[must_use]
    pub fn is_empty(&self) -> bool { self.entries.is_empty() }
}

/// One HTTP response under construction.
#[derive(Debug)]
pub struct HttpResponse {
    sender_id: String,
    conn_id: u64,
    status: Option<u16>,
    headers: ResponseHeaders,
    body: Body,
}

impl HttpResponse {
    /// An empty response addressed to `conn_id` on `sender_id`, with only
    /// the `Server` header seeded.
    #[must_use]
    pub fn new(sender_id: impl Into<String>, conn_id: u64) -> Self {
        let mut headers = ResponseHeaders::new();
        headers.set("Server", crate::SERVER_TOKEN);
        Self {
            sender_id: sender_id.into(),
            conn_id,
            status: None,
            headers,
            body: Body::empty(),
        }
    }

    /// Identity of the server instance this response is routed through.
    #[must_use]
    pub fn sender_id(&self) -> &str { &self.sender_id }

    /// Target connection id.
    #[must_use]
    pub fn conn_id(&self) -> u64 { self.conn_id }

    /// The assigned status, if any.
    #[must_use]
    pub fn status(&self) -> Option<u16> { self.status }

    /// Assign the HTTP status.
    pub fn set_status(&mut self, status: u16) { self.status = Some(status); }

    /// Whether a status has been assigned yet.
    #[must_use]
    pub fn handled(&self) -> bool { self.status.is_some() }

    /// The header block.
    #[must_use]
    pub fn headers(&self) -> &ResponseHeaders { &self.headers }

    /// Mutable access to the header block.
    pub fn headers_mut(&mut self) -> &mut ResponseHeaders { &mut self.headers }

    /// Replace the body.
    pub fn set_body(&mut self, body: impl Into<Body>) { self.body = body.into(); }

    /// The body.
    #[must_use]
    pub fn body(&self) -> &Body { &self.body }

    /// Mutable access to the body.
    pub fn body_mut(&mut self) -> &mut Body { &mut self.body }

    /// Return the response to its just-constructed state: headers cleared
    /// and `Server` re-seeded, status unset, body emptied.
    pub fn reset(&mut self) {
        self.headers = ResponseHeaders::new();
        self.headers.set("Server", crate::SERVER_TOKEN);
        self.status = None;
        self.body = Body::empty();
    }

    /// `status / 100`, or 0 when no status is assigned.
    #[must_use]
    pub fn category(&self) -> u16 { self.status.map_or(0, |s| s / 100) }

    /// Whether the status is 1xx.
    #[must_use]
    pub fn is_informational(&self) -> bool { self.category() == 1 }

    /// Whether the status is 2xx.
    #[must_use]
    pub fn is_successful(&self) -> bool { self.category() == 2 }

    /// Whether the status is 3xx.
    #[must_use]
    pub fn is_redirect(&self) -> bool { self.category() == 3 }

    /// Whether the status is 4xx.
    #[must_use]
    pub fn is_clienterror(&self) -> bool { self.category() == 4 }

    /// Whether the status is 5xx.
    #[must_use]
    pub fn is_servererror(&self) -> bool { self.category() == 5 }

    /// Set the `Connection` header: `keep-alive` when enabled, `close`
    /// otherwise.
    pub fn set_keepalive(&mut self, enabled: bool) {
        self.headers
            .set("Connection", if enabled { "keep-alive" } else { "close" });
    }

    /// Whether the current `Connection` header requests keep-alive,
    /// matched case-insensitively.
    #[must_use]
    pub fn keepalive(&self) -> bool {
        self.headers
            .get("Connection")
            .is_some_and(|v| v.to_ascii_lowercase().contains("keep-alive"))
    }

    /// The status line, `HTTP/1.1 SSS Reason\r\n`, with the status
    /// zero-padded to three digits.
    ///
    /// An unassigned status logs a warning and falls back to 200.
    #[must_use]
    pub fn status_line(&self) -> String {
        let status = self.status.unwrap_or_else(|| {
            warn!(
                "response for connection {} has no status; defaulting to 200",
                self.conn_id
            );
            200
        });
        let reason = reason_phrase(status).unwrap_or("Unknown");
        format!("HTTP/1.1 {status:03} {reason}\r\n")
    }

    /// Serialise the response: status line, header block, blank line, body.
    ///
    /// `Date` and `Content-Length` are populated first when absent. A
    /// stream body is measured and read without disturbing its position, so
    /// serialising twice emits identical bytes.
    ///
    /// # Errors
    ///
    /// Returns a [`ResponseError`] when the body's length protocol or the
    /// body read fails; no partial output is produced.
    pub fn to_bytes(&mut self) -> Result<Bytes, ResponseError> {
        if !self.headers.contains("Date") {
            self.headers.set("Date", date::now());
        }
        if !self.headers.contains("Content-Length") {
            let length = self.body.remaining_len()?;
            self.headers.set("Content-Length", length.to_string());
        }
        let body = self.body.read_remaining()?;

        let mut buf = BytesMut::new();
        buf.extend_from_slice(self.status_line().as_bytes());
        for (name, value) in self.headers.iter() {
            buf.extend_from_slice(name.as_bytes());
            buf.extend_from_slice(b": ");
            buf.extend_from_slice(value.as_bytes());
            buf.extend_from_slice(b"\r\n");
        }
        buf.extend_from_slice(b"\r\n");
        buf.extend_from_slice(&body);
        Ok(buf.freeze())
    }
}

/// An outbound reply, whichever protocol the exchange speaks.
#[derive(Debug)]
pub enum Response {
    /// An HTTP response.
    Http(HttpResponse),
    /// A WebSocket frame.
    WebSocket(WebSocketResponse),
}

impl Response {
    /// Identity of the server instance the reply is routed through.
    #[must_use]
    pub fn sender_id(&self) -> &str {
        match self {
            Self::Http(response) => response.sender_id(),
            Self::WebSocket(response) => response.sender_id(),
        }
    }

    /// Target connection id.
    #[must_use]
    pub fn conn_id(&self) -> u64 {
        match self {
            Self::Http(response) => response.conn_id(),
            Self::WebSocket(response) => response.conn_id(),
        }
    }

    /// Serialise the reply payload.
    ///
    /// # Errors
    ///
    /// Returns a [`ResponseError`] when an HTTP body cannot be measured or
    /// read.
    pub fn to_bytes(&mut self) -> Result<Bytes, ResponseError> {
        match self {
            Self::Http(response) => response.to_bytes(),
            Self::WebSocket(response) => Ok(response.to_bytes()),
        }
    }
}

impl From<HttpResponse> for Response {
    fn from(response: HttpResponse) -> Self { Self::Http(response) }
}

impl From<WebSocketResponse> for Response {
    fn from(response: WebSocketResponse) -> Self { Self::WebSocket(response) }
}
