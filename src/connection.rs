//! The handler's connection to one Mongrel2 server.
//!
//! A [`Connection`] owns the socket pair for a `(send_spec, recv_spec)`
//! endpoint pair: requests are pulled in and decoded into typed
//! [`Request`]s, replies are wrapped in the outbound envelope and published
//! back. The reply envelope is asymmetric with the request one:
//!
//! ```text
//! sender_id SP <len>:<id1 SP id2 …>, SP payload
//! ```
//!
//! where the connection id list travels as a netstring. An empty payload
//! with a valid id list instructs the server to close those connections.

use bytes::{Bytes, BytesMut};
use log::debug;
use thiserror::Error;

use crate::{
    request::{Request, RequestEnvelope, RequestError, RequestRegistry},
    response::{Response, ResponseError},
    transport::{MessageTransport, ReplySink, RequestSource, TransportError},
};

/// Errors raised by connection operations.
#[derive(Debug, Error)]
pub enum ConnectionError {
    /// The connection was closed; no further operations are possible.
    #[error("connection is closed")]
    Closed,

    /// The underlying transport failed.
    #[error(transparent)]
    Transport(#[from] TransportError),

    /// An inbound frame could not be decoded or classified.
    #[error(transparent)]
    Request(#[from] RequestError),

    /// An outbound response could not be serialised.
    #[error(transparent)]
    Response(#[from] ResponseError),
}

impl ConnectionError {
    /// Whether this error condemns a single frame rather than the
    /// connection: the run loop logs it, drops the frame, and keeps going.
    #[must_use]
    pub fn is_per_frame(&self) -> bool { matches!(self, Self::Request(_)) }
}

/// The two transport endpoints of one handler, plus the identity replies
/// are published under.
pub struct Connection<T: MessageTransport> {
    transport: T,
    app_id: String,
    send_spec: String,
    recv_spec: String,
    source: Option<T::Source>,
    sink: Option<T::Sink>,
}

impl<T: MessageTransport + Clone> Connection<T> {
    /// Open the socket pair: the reply sink on `send_spec` registered under
    /// `app_id`, and the request source on `recv_spec`.
    ///
    /// # Errors
    ///
    /// Returns [`ConnectionError::Transport`] when either endpoint cannot
    /// be opened.
    pub async fn open(
        transport: T,
        app_id: impl Into<String>,
        send_spec: impl Into<String>,
        recv_spec: impl Into<String>,
    ) -> Result<Self, ConnectionError> {
        let app_id = app_id.into();
        let send_spec = send_spec.into();
        let recv_spec = recv_spec.into();
        let sink = transport.open_sink(&send_spec, &app_id).await?;
        let source = transport.open_source(&recv_spec).await?;
        debug!("connected {app_id}: requests from {recv_spec}, replies to {send_spec}");
        Ok(Self {
            transport,
            app_id,
            send_spec,
            recv_spec,
            source: Some(source),
            sink: Some(sink),
        })
    }

    /// A new connection with the same identity and endpoint specs on
    /// freshly opened sockets. The original stays usable until closed, so a
    /// restart can drain or abandon it independently.
    ///
    /// # Errors
    ///
    /// Returns [`ConnectionError::Transport`] when either endpoint cannot
    /// be reopened.
    pub async fn dup(&self) -> Result<Self, ConnectionError> {
        Self::open(
            self.transport.clone(),
            self.app_id.clone(),
            self.send_spec.clone(),
            self.recv_spec.clone(),
        )
        .await
    }
}

impl<T: MessageTransport> Connection<T> {
    /// The identity replies are published under.
    #[must_use]
    pub fn app_id(&self) -> &str { &self.app_id }

    /// Endpoint spec of the reply sink.
    #[must_use]
    pub fn send_spec(&self) -> &str { &self.send_spec }

    /// Endpoint spec of the request source.
    #[must_use]
    pub fn recv_spec(&self) -> &str { &self.recv_spec }

    /// Whether [`close`](Self::close) has been called.
    #[must_use]
    pub fn is_closed(&self) -> bool { self.source.is_none() }

    /// Drop both sockets. Idempotent; subsequent operations fail with
    /// [`ConnectionError::Closed`].
    pub fn close(&mut self) {
        self.source = None;
        self.sink = None;
    }

    /// Block until the next request frame arrives, then decode and
    /// classify it through `registry`.
    ///
    /// # Errors
    ///
    /// [`ConnectionError::Closed`] after [`close`](Self::close);
    /// [`ConnectionError::Transport`] when the socket fails;
    /// [`ConnectionError::Request`] when the frame is malformed or its
    /// `METHOD` is unhandled, either of which condemns only that frame.
    pub async fn receive(
        &mut self,
        registry: &RequestRegistry,
    ) -> Result<Request, ConnectionError> {
        let source = self.source.as_mut().ok_or(ConnectionError::Closed)?;
        let frame = source.recv().await?;
        let envelope = RequestEnvelope::decode(&frame)?;
        let request = Request::from_envelope(envelope, registry)?;
        Ok(request)
    }

    /// Serialise `response` and send it to its own connection.
    ///
    /// # Errors
    ///
    /// [`ConnectionError::Closed`] after [`close`](Self::close);
    /// [`ConnectionError::Response`] when an HTTP body cannot be measured
    /// or read; [`ConnectionError::Transport`] when the send fails.
    pub async fn reply(&mut self, response: &mut Response) -> Result<(), ConnectionError> {
        let payload = response.to_bytes()?;
        let sender_id = response.sender_id().to_owned();
        let conn_id = response.conn_id();
        self.deliver(&sender_id, &[conn_id], payload).await
    }

    /// Send one payload to any number of connections on `sender_id` as a
    /// single transport write.
    ///
    /// # Errors
    ///
    /// [`ConnectionError::Closed`] after [`close`](Self::close);
    /// [`ConnectionError::Transport`] when the send fails.
    pub async fn deliver(
        &mut self,
        sender_id: &str,
        conn_ids: &[u64],
        payload: Bytes,
    ) -> Result<(), ConnectionError> {
        let sink = self.sink.as_mut().ok_or(ConnectionError::Closed)?;
        let frame = encode_reply(sender_id, conn_ids, &payload);
        sink.send(frame).await?;
        Ok(())
    }

    /// Instruct the server to close these connections: the reply envelope
    /// with an empty payload.
    ///
    /// # Errors
    ///
    /// [`ConnectionError::Closed`] after [`close`](Self::close);
    /// [`ConnectionError::Transport`] when the send fails.
    pub async fn send_close(
        &mut self,
        sender_id: &str,
        conn_ids: &[u64],
    ) -> Result<(), ConnectionError> {
        self.deliver(sender_id, conn_ids, Bytes::new()).await
    }
}

/// Build the outbound envelope: `sender_id <len>:<ids>, <payload>` with the
/// space-separated id list wrapped as a netstring.
fn encode_reply(sender_id: &str, conn_ids: &[u64], payload: &[u8]) -> Bytes {
    let ids = conn_ids
        .iter()
        .map(u64::to_string)
        .collect::<Vec<_>>()
        .join(" ");
    let mut buf =
        BytesMut::with_capacity(sender_id.len() + ids.len() + payload.len() + 16);
    buf.extend_from_slice(sender_id.as_bytes());
    buf.extend_from_slice(b" ");
    buf.extend_from_slice(ids.len().to_string().as_bytes());
    buf.extend_from_slice(b":");
    buf.extend_from_slice(ids.as_bytes());
    buf.extend_from_slice(b", ");
    buf.extend_from_slice(payload);
    buf.freeze()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        transport::memory::MemoryTransport,
        websocket::{WebSocketResponse, CLOSE_POLICY_VIOLATION},
    };

    const SEND_SPEC: &str = "tcp://127.0.0.1:9996";
    const RECV_SPEC: &str = "tcp://127.0.0.1:9997";

    async fn open(transport: &MemoryTransport) -> Connection<MemoryTransport> {
        Connection::open(transport.clone(), "app-1", SEND_SPEC, RECV_SPEC)
            .await
            .expect("memory endpoints always open")
    }

    #[test]
    fn reply_envelope_wraps_ids_in_a_netstring() {
        let frame = encode_reply("abc", &[42], b"PAYLOAD");
        assert_eq!(frame.as_ref(), b"abc 2:42, PAYLOAD");

        let frame = encode_reply("abc", &[1, 23, 456], b"x");
        assert_eq!(frame.as_ref(), b"abc 8:1 23 456, x");

        let close = encode_reply("abc", &[7], b"");
        assert_eq!(close.as_ref(), b"abc 1:7, ");
    }

    #[tokio::test]
    async fn receive_decodes_and_classifies() {
        let transport = MemoryTransport::new();
        let mut conn = open(&transport).await;
        transport.push_request(RECV_SPEC, &b"abc 42 / 11:4:PATH,1:/,}0:,"[..]);

        let request = conn
            .receive(&RequestRegistry::new())
            .await
            .expect("frame is well formed");
        assert_eq!(request.sender_id(), "abc");
        assert_eq!(request.conn_id(), 42);
        assert!(matches!(request, Request::Http(_)));
    }

    #[tokio::test]
    async fn reply_publishes_under_the_app_identity() {
        let transport = MemoryTransport::new();
        let mut published = transport
            .take_published(SEND_SPEC)
            .expect("stream has not been taken");
        let mut conn = open(&transport).await;
        assert_eq!(transport.sink_identity(SEND_SPEC), Some("app-1".into()));

        let mut response = Response::from(WebSocketResponse::close(
            "abc",
            4,
            CLOSE_POLICY_VIOLATION,
        ));
        conn.reply(&mut response).await.expect("sink is alive");

        let frame = published.recv().await.expect("reply was published");
        assert_eq!(frame.as_ref(), b"abc 1:4, \x88\x02\x03\xF0");
    }

    #[tokio::test]
    async fn close_is_idempotent_and_fails_further_operations() {
        let transport = MemoryTransport::new();
        let mut conn = open(&transport).await;
        conn.close();
        conn.close();
        assert!(conn.is_closed());

        let err = conn
            .receive(&RequestRegistry::new())
            .await
            .expect_err("closed connections do not receive");
        assert!(matches!(err, ConnectionError::Closed));

        let err = conn
            .send_close("abc", &[1])
            .await
            .expect_err("closed connections do not send");
        assert!(matches!(err, ConnectionError::Closed));
    }

    #[tokio::test]
    async fn dup_opens_fresh_sockets_with_the_same_identity() {
        let transport = MemoryTransport::new();
        let conn = open(&transport).await;
        let dup = conn.dup().await.expect("memory endpoints always open");

        assert_eq!(dup.app_id(), conn.app_id());
        assert_eq!(dup.send_spec(), conn.send_spec());
        assert_eq!(dup.recv_spec(), conn.recv_spec());
        assert_eq!(transport.source_opens(RECV_SPEC), 2);
        assert!(!conn.is_closed());
    }
}
