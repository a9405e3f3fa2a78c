//! Request envelope decoding and the request taxonomy.
//!
//! One inbound transport message carries
//! `sender_id SP conn_id SP path SP headers-tnetstring body-tnetstring`.
//! [`RequestEnvelope::decode`] splits that frame; [`Request::from_envelope`]
//! classifies it by its `METHOD` header through a [`RequestRegistry`] and
//! builds the matching variant: plain HTTP, a JSON or XML message, or a
//! WebSocket frame. Client disconnects arrive as JSON messages with body
//! `{"type":"disconnect"}` and are tagged during construction.

use bytes::{Bytes, BytesMut};
use thiserror::Error;

use crate::{
    response::HttpResponse,
    tnetstring::{self, TNetstringError, Value},
    websocket::{Frame, OpCode},
};

mod registry;
pub use registry::{RequestKind, RequestRegistry};

/// Errors raised while decoding or classifying one inbound frame.
///
/// All of these are per-frame conditions: the run loop logs them, drops the
/// frame, and continues with the next one.
#[derive(Clone, Debug, Error, PartialEq)]
pub enum RequestError {
    /// The headers or body blob is not a well-formed tnetstring.
    #[error(transparent)]
    Tnetstring(#[from] TNetstringError),

    /// The envelope is structurally broken: missing fields, a non-numeric
    /// connection id, headers that are neither a dictionary nor a JSON
    /// object, or a variant payload that does not parse.
    #[error("bad request: {0}")]
    BadRequest(String),

    /// `METHOD` is absent, not a word, or no registered variant claims it.
    #[error("no request variant claims METHOD {0:?}")]
    UnhandledMethod(String),
}

fn bad(message: impl Into<String>) -> RequestError { RequestError::BadRequest(message.into()) }

/// One header value: a plain string, or the list form Mongrel2 produces for
/// repeated headers.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum HeaderValue {
    /// A single string value.
    Text(String),
    /// Multiple values delivered for the same name.
    List(Vec<String>),
}

impl HeaderValue {
    /// The value when it is a single string.
    #[must_use]
    pub fn as_str(&self) -> Option<&str> {
        match self {
            Self::Text(value) => Some(value),
            Self::List(_) => None,
        }
    }

    /// The first value, whichever form the header takes.
    #[must_use]
    pub fn first(&self) -> Option<&str> {
        match self {
            Self::Text(value) => Some(value),
            Self::List(values) => values.first().map(String::as_str),
        }
    }
}

impl From<&str> for HeaderValue {
    fn from(value: &str) -> Self { Self::Text(value.to_owned()) }
}

impl From<String> for HeaderValue {
    fn from(value: String) -> Self { Self::Text(value) }
}

impl From<Vec<String>> for HeaderValue {
    fn from(values: Vec<String>) -> Self { Self::List(values) }
}

/// Request headers: an insertion-ordered, case-sensitive mapping, exactly as
/// delivered by the server. Mongrel2 lowercases client headers itself and
/// reserves uppercase names (`METHOD`, `PATH`, `URI`, …) for its own
/// metadata, so no folding happens here.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct Headers {
    entries: Vec<(String, HeaderValue)>,
}

impl Headers {
    /// Create an empty header map.
    #[must_use]
    pub fn new() -> Self { Self::default() }

    /// Append a header, keeping insertion order.
    pub fn insert(&mut self, name: impl Into<String>, value: impl Into<HeaderValue>) {
        self.entries.push((name.into(), value.into()));
    }

    /// Look up the first header with exactly this name.
    #[must_use]
    pub fn get(&self, name: &str) -> Option<&HeaderValue> {
        self.entries
            .iter()
            .find(|(entry, _)| entry == name)
            .map(|(_, value)| value)
    }

    /// Look up the first value of the header with exactly this name.
    #[must_use]
    pub fn get_str(&self, name: &str) -> Option<&str> {
        self.get(name).and_then(HeaderValue::first)
    }

    /// Iterate entries in insertion order.
    pub fn iter(&self) -> impl Iterator<Item = (&str, &HeaderValue)> {
        self.entries
            .iter()
            .map(|(name, value)| (name.as_str(), value))
    }

    /// Number of header entries.
    #[must_use]
    pub fn len(&self) -> usize { self.entries.len() }

    /// Whether no headers were delivered.
    #[must_use]
    pub fn is_empty(&self) -> bool { self.entries.is_empty() }

    fn from_payload(payload: Value) -> Result<Self, RequestError> {
        match payload {
            Value::Dict(entries) => Self::from_tnetstring_entries(entries),
            // Mongrel2 configured for JSON headers delivers them as one
            // string payload.
            Value::Str(text) => Self::from_json(&text),
            other => Err(bad(format!(
                "header payload is a {other}, not a dictionary"
            ))),
        }
    }

    fn from_tnetstring_entries(entries: Vec<(String, Value)>) -> Result<Self, RequestError> {
        let mut headers = Self::new();
        for (name, value) in entries {
            let value = match value {
                Value::Str(bytes) => HeaderValue::Text(utf8_header(&name, &bytes)?),
                Value::List(items) => {
                    let mut values = Vec::with_capacity(items.len());
                    for item in items {
                        let Value::Str(bytes) = item else {
                            return Err(bad(format!("header {name:?} value is not a string")));
                        };
                        values.push(utf8_header(&name, &bytes)?);
                    }
                    HeaderValue::List(values)
                }
                _ => return Err(bad(format!("header {name:?} value is not a string"))),
            };
            headers.entries.push((name, value));
        }
        Ok(headers)
    }

    fn from_json(text: &[u8]) -> Result<Self, RequestError> {
        let parsed: serde_json::Value = serde_json::from_slice(text)
            .map_err(|e| bad(format!("header payload is not valid JSON: {e}")))?;
        let serde_json::Value::Object(object) = parsed else {
            return Err(bad("header payload is not a JSON object"));
        };
        let mut headers = Self::new();
        for (name, value) in object {
            let value = match value {
                serde_json::Value::String(text) => HeaderValue::Text(text),
                serde_json::Value::Array(items) => {
                    let mut values = Vec::with_capacity(items.len());
                    for item in items {
                        let serde_json::Value::String(text) = item else {
                            return Err(bad(format!("header {name:?} value is not a string")));
                        };
                        values.push(text);
                    }
                    HeaderValue::List(values)
                }
                _ => return Err(bad(format!("header {name:?} value is not a string"))),
            };
            headers.entries.push((name, value));
        }
        Ok(headers)
    }

    fn to_tnetstring(&self) -> Value {
        Value::Dict(
            self.entries
                .iter()
                .map(|(name, value)| {
                    let value = match value {
                        HeaderValue::Text(text) => Value::Str(Bytes::copy_from_slice(text.as_bytes())),
                        HeaderValue::List(values) => Value::List(
                            values
                                .iter()
                                .map(|v| Value::Str(Bytes::copy_from_slice(v.as_bytes())))
                                .collect(),
                        ),
                    };
                    (name.clone(), value)
                })
                .collect(),
        )
    }
}

fn utf8_header(name: &str, bytes: &[u8]) -> Result<String, RequestError> {
    std::str::from_utf8(bytes)
        .map(str::to_owned)
        .map_err(|_| bad(format!("header {name:?} value is not valid UTF-8")))
}

/// The decoded form of one inbound frame, before classification.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct RequestEnvelope {
    sender_id: String,
    conn_id: u64,
    path: String,
    headers: Headers,
    body: Bytes,
    raw: Bytes,
}

impl RequestEnvelope {
    /// Assemble an envelope from parts, deriving the raw frame from them.
    #[must_use]
    pub fn new(
        sender_id: impl Into<String>,
        conn_id: u64,
        path: impl Into<String>,
        headers: Headers,
        body: impl Into<Bytes>,
    ) -> Self {
        let mut envelope = Self {
            sender_id: sender_id.into(),
            conn_id,
            path: path.into(),
            headers,
            body: body.into(),
            raw: Bytes::new(),
        };
        envelope.raw = envelope.encode();
        envelope
    }

    /// Decode one wire frame.
    ///
    /// The frame is split at its first three spaces into sender id,
    /// connection id, and path; the remainder holds two adjacent
    /// tnetstrings, headers then body. Bytes past the body are ignored.
    ///
    /// # Errors
    ///
    /// Returns [`RequestError::Tnetstring`] for malformed blobs and
    /// [`RequestError::BadRequest`] for a structurally broken envelope.
    pub fn decode(frame: &[u8]) -> Result<Self, RequestError> {
        let (sender, rest) = split_token(frame, "sender id")?;
        let (conn, rest) = split_token(rest, "connection id")?;
        let (path, rest) = split_token(rest, "path")?;

        let sender_id = std::str::from_utf8(sender)
            .map_err(|_| bad("sender id is not valid UTF-8"))?
            .to_owned();
        let conn_id = std::str::from_utf8(conn)
            .ok()
            .and_then(|s| s.parse::<u64>().ok())
            .ok_or_else(|| bad("malformed connection id"))?;
        let path = std::str::from_utf8(path)
            .map_err(|_| bad("path is not valid UTF-8"))?
            .to_owned();

        let (header_payload, rest) = tnetstring::decode(rest)?;
        let headers = Headers::from_payload(header_payload)?;
        let (body_payload, _) = tnetstring::decode(rest)?;
        let body = match body_payload {
            Value::Str(body) => body,
            other => return Err(bad(format!("request body is a {other}, not a string"))),
        };

        Ok(Self {
            sender_id,
            conn_id,
            path,
            headers,
            body,
            raw: Bytes::copy_from_slice(frame),
        })
    }

    /// Serialise the envelope back into its wire form.
    #[must_use]
    pub fn encode(&self) -> Bytes {
        let mut buf = BytesMut::new();
        buf.extend_from_slice(self.sender_id.as_bytes());
        buf.extend_from_slice(b" ");
        buf.extend_from_slice(self.conn_id.to_string().as_bytes());
        buf.extend_from_slice(b" ");
        buf.extend_from_slice(self.path.as_bytes());
        buf.extend_from_slice(b" ");
        tnetstring::encode_into(&self.headers.to_tnetstring(), &mut buf);
        tnetstring::encode_into(&Value::Str(self.body.clone()), &mut buf);
        buf.freeze()
    }

    /// Identity of the originating server instance.
    #[must_use]
    pub fn sender_id(&self) -> &str { &self.sender_id }

    /// Client connection id within that server.
    #[must_use]
    pub fn conn_id(&self) -> u64 { self.conn_id }

    /// Request path, or the routing key for message requests.
    #[must_use]
    pub fn path(&self) -> &str { &self.path }

    /// Headers as delivered.
    #[must_use]
    pub fn headers(&self) -> &Headers { &self.headers }

    /// Raw body bytes.
    #[must_use]
    pub fn body(&self) -> &Bytes { &self.body }

    /// The undecoded frame, retained for diagnostics.
    #[must_use]
    pub fn raw(&self) -> &Bytes { &self.raw }

    /// The `METHOD` header, when present.
    #[must_use]
    pub fn method(&self) -> Option<&str> { self.headers.get_str("METHOD") }
}

fn split_token<'a>(
    input: &'a [u8],
    what: &'static str,
) -> Result<(&'a [u8], &'a [u8]), RequestError> {
    let pos = input
        .iter()
        .position(|&b| b == b' ')
        .ok_or_else(|| bad(format!("truncated envelope: missing {what}")))?;
    Ok((&input[..pos], &input[pos + 1..]))
}

/// A classified inbound request, one variant per `METHOD` family.
#[derive(Clone, Debug)]
pub enum Request {
    /// A plain HTTP exchange.
    Http(HttpRequest),
    /// A JSON message request (`METHOD: JSON`).
    Json(JsonRequest),
    /// An XML message request (`METHOD: XML`).
    Xml(XmlRequest),
    /// A WebSocket frame (`METHOD: WEBSOCKET`).
    WebSocket(WebSocketRequest),
}

impl Request {
    /// Classify `envelope` through `registry` and build the matching
    /// variant.
    ///
    /// # Errors
    ///
    /// Returns [`RequestError::UnhandledMethod`] when no variant claims the
    /// `METHOD` token, and [`RequestError::BadRequest`] when the variant's
    /// payload does not parse (invalid JSON, non-UTF-8 XML, or a malformed
    /// WebSocket frame).
    pub fn from_envelope(
        envelope: RequestEnvelope,
        registry: &RequestRegistry,
    ) -> Result<Self, RequestError> {
        match registry.classify(envelope.method())? {
            RequestKind::Http => Ok(Self::Http(HttpRequest { envelope })),
            RequestKind::Json => JsonRequest::from_envelope(envelope).map(Self::Json),
            RequestKind::Xml => XmlRequest::from_envelope(envelope).map(Self::Xml),
            RequestKind::WebSocket => {
                WebSocketRequest::from_envelope(envelope).map(Self::WebSocket)
            }
        }
    }

    /// The underlying envelope, whichever variant this is.
    #[must_use]
    pub fn envelope(&self) -> &RequestEnvelope {
        match self {
            Self::Http(request) => &request.envelope,
            Self::Json(request) => &request.envelope,
            Self::Xml(request) => &request.envelope,
            Self::WebSocket(request) => &request.envelope,
        }
    }

    /// True only for the JSON disconnect notice.
    #[must_use]
    pub fn is_disconnect(&self) -> bool {
        match self {
            Self::Json(request) => request.is_disconnect(),
            _ => false,
        }
    }

    /// Identity of the originating server instance.
    #[must_use]
    pub fn sender_id(&self) -> &str { self.envelope().sender_id() }

    /// Client connection id within that server.
    #[must_use]
    pub fn conn_id(&self) -> u64 { self.envelope().conn_id() }

    /// Request path or routing key.
    #[must_use]
    pub fn path(&self) -> &str { self.envelope().path() }
}

/// One HTTP request, already parsed by the front-end server.
#[derive(Clone, Debug)]
pub struct HttpRequest {
    envelope: RequestEnvelope,
}

impl HttpRequest {
    /// The HTTP verb.
    #[must_use]
    pub fn method(&self) -> &str { self.envelope.method().unwrap_or("") }

    /// The underlying envelope.
    #[must_use]
    pub fn envelope(&self) -> &RequestEnvelope { &self.envelope }

    /// Request path.
    #[must_use]
    pub fn path(&self) -> &str { self.envelope.path() }

    /// The full request URI, query string included.
    #[must_use]
    pub fn uri(&self) -> Option<&str> { self.envelope.headers.get_str("URI") }

    /// The route pattern that matched in the server's host configuration.
    #[must_use]
    pub fn pattern(&self) -> Option<&str> { self.envelope.headers.get_str("PATTERN") }

    /// Protocol version, e.g. `HTTP/1.1`.
    #[must_use]
    pub fn version(&self) -> Option<&str> { self.envelope.headers.get_str("VERSION") }

    /// The `host` header.
    #[must_use]
    pub fn host(&self) -> Option<&str> { self.envelope.headers.get_str("host") }

    /// The `content-type` header.
    #[must_use]
    pub fn content_type(&self) -> Option<&str> {
        self.envelope.headers.get_str("content-type")
    }

    /// The `content-length` header, when present and numeric.
    #[must_use]
    pub fn content_length(&self) -> Option<u64> {
        self.envelope
            .headers
            .get_str("content-length")
            .and_then(|v| v.parse().ok())
    }

    /// Body bytes.
    #[must_use]
    pub fn body(&self) -> &Bytes { self.envelope.body() }

    /// Whether the exchange must not be kept alive: the client either sent
    /// `Connection: close` or speaks HTTP/1.0.
    #[must_use]
    pub fn should_close(&self) -> bool {
        if self
            .envelope
            .headers
            .get_str("connection")
            .is_some_and(|v| v.eq_ignore_ascii_case("close"))
        {
            return true;
        }
        self.version() == Some("HTTP/1.0")
    }

    /// Spool file path of an asynchronous upload in progress, when the
    /// server announced one.
    #[must_use]
    pub fn upload_started(&self) -> Option<&str> {
        self.envelope.headers.get_str("x-mongrel2-upload-start")
    }

    /// Whether an announced asynchronous upload has finished spooling. The
    /// done header must echo the start header, otherwise the notice is
    /// spurious and the body must not be trusted.
    #[must_use]
    pub fn upload_done(&self) -> bool {
        match (
            self.upload_started(),
            self.envelope.headers.get_str("x-mongrel2-upload-done"),
        ) {
            (Some(started), Some(done)) => started == done,
            _ => false,
        }
    }

    /// Build an empty response addressed back to this request's connection.
    #[must_use]
    pub fn response(&self) -> HttpResponse {
        HttpResponse::new(self.envelope.sender_id(), self.envelope.conn_id())
    }
}

/// A JSON message request; the parsed document replaces the raw body.
#[derive(Clone, Debug)]
pub struct JsonRequest {
    envelope: RequestEnvelope,
    data: serde_json::Value,
    disconnect: bool,
}

impl JsonRequest {
    fn from_envelope(envelope: RequestEnvelope) -> Result<Self, RequestError> {
        let data: serde_json::Value = serde_json::from_slice(envelope.body())
            .map_err(|e| bad(format!("request body is not valid JSON: {e}")))?;
        if !data.is_object() {
            return Err(bad("JSON request body is not an object"));
        }
        let disconnect = data.get("type").and_then(serde_json::Value::as_str)
            == Some("disconnect");
        Ok(Self {
            envelope,
            data,
            disconnect,
        })
    }

    /// The underlying envelope.
    #[must_use]
    pub fn envelope(&self) -> &RequestEnvelope { &self.envelope }

    /// The parsed JSON document.
    #[must_use]
    pub fn data(&self) -> &serde_json::Value { &self.data }

    /// Whether this is the server's disconnect notice for the connection.
    #[must_use]
    pub fn is_disconnect(&self) -> bool { self.disconnect }
}

/// An XML message request carrying its body as text.
#[derive(Clone, Debug)]
pub struct XmlRequest {
    envelope: RequestEnvelope,
    text: String,
}

impl XmlRequest {
    fn from_envelope(envelope: RequestEnvelope) -> Result<Self, RequestError> {
        let text = std::str::from_utf8(envelope.body())
            .map_err(|_| bad("XML request body is not valid UTF-8"))?
            .to_owned();
        Ok(Self { envelope, text })
    }

    /// The underlying envelope.
    #[must_use]
    pub fn envelope(&self) -> &RequestEnvelope { &self.envelope }

    /// The XML fragment.
    #[must_use]
    pub fn text(&self) -> &str { &self.text }
}

/// A WebSocket frame delivered by the server, body parsed per RFC 6455.
#[derive(Clone, Debug)]
pub struct WebSocketRequest {
    envelope: RequestEnvelope,
    frame: Frame,
    flags: u8,
}

impl WebSocketRequest {
    fn from_envelope(envelope: RequestEnvelope) -> Result<Self, RequestError> {
        let frame = Frame::parse(envelope.body())
            .map_err(|e| bad(format!("malformed WebSocket frame: {e}")))?;
        let flags = match envelope.headers.get_str("FLAGS") {
            Some(hex) => u8::from_str_radix(hex, 16)
                .map_err(|_| bad(format!("FLAGS header {hex:?} is not a hex byte")))?,
            None => frame.header_byte(),
        };
        Ok(Self {
            envelope,
            frame,
            flags,
        })
    }

    /// The underlying envelope.
    #[must_use]
    pub fn envelope(&self) -> &RequestEnvelope { &self.envelope }

    /// The parsed frame.
    #[must_use]
    pub fn frame(&self) -> &Frame { &self.frame }

    /// The first frame byte as announced by the `FLAGS` header:
    /// FIN, the reserved bits, and the opcode.
    #[must_use]
    pub fn flags(&self) -> u8 { self.flags }

    /// Frame opcode.
    #[must_use]
    pub fn opcode(&self) -> OpCode { self.frame.opcode() }

    /// Whether this frame ends its message.
    #[must_use]
    pub fn fin(&self) -> bool { self.frame.fin() }

    /// Unmasked payload bytes.
    #[must_use]
    pub fn payload(&self) -> &Bytes { self.frame.payload() }
}

#[cfg(test)]
mod tests;
