//! The message transport the handler core runs over.
//!
//! Mongrel2 handlers speak to the server through two endpoints: requests
//! arrive on a pull endpoint that the server load-balances across every
//! handler replica sharing an identity, and replies leave on a publish
//! endpoint where the server subscribes to its own sender id. The core only
//! needs whole-message semantics from those endpoints, so it depends on the
//! traits here rather than any particular messaging library; [`memory`]
//! provides an in-process implementation for tests and embedders.

use std::io;

use async_trait::async_trait;
use bytes::Bytes;
use thiserror::Error;

pub mod memory;

/// Errors raised by a transport implementation.
#[derive(Debug, Error)]
pub enum TransportError {
    /// An endpoint could not be opened.
    #[error("endpoint {spec:?} unavailable: {reason}")]
    Endpoint {
        /// The endpoint spec that failed.
        spec: String,
        /// Implementation-specific failure description.
        reason: String,
    },

    /// The underlying I/O object failed.
    #[error("transport I/O failure: {0}")]
    Io(#[from] io::Error),

    /// The peer end of the socket is gone.
    #[error("transport socket disconnected")]
    Disconnected,
}

/// Receiving half of a handler's socket pair: one inbound request frame per
/// call, blocking until a frame arrives.
#[async_trait]
pub trait RequestSource: Send {
    /// Receive the next whole request frame.
    ///
    /// # Errors
    ///
    /// Returns a [`TransportError`] when the endpoint fails or disconnects.
    async fn recv(&mut self) -> Result<Bytes, TransportError>;
}

/// Sending half of a handler's socket pair: one outbound reply frame per
/// call. A frame is never fragmented.
#[async_trait]
pub trait ReplySink: Send {
    /// Send one whole reply frame.
    ///
    /// # Errors
    ///
    /// Returns a [`TransportError`] when the endpoint fails or disconnects.
    async fn send(&mut self, frame: Bytes) -> Result<(), TransportError>;
}

/// Factory for the two endpoints a [`crate::Connection`] owns.
///
/// Opening the same source spec again yields an independent socket; frames
/// queued on an earlier socket stay with it. That is what connection
/// duplication relies on during restart.
#[async_trait]
pub trait MessageTransport: Send + Sync + 'static {
    /// The inbound socket type.
    type Source: RequestSource;
    /// The outbound socket type.
    type Sink: ReplySink;

    /// Open the request (pull) endpoint.
    ///
    /// # Errors
    ///
    /// Returns a [`TransportError`] when the endpoint cannot be opened.
    async fn open_source(&self, spec: &str) -> Result<Self::Source, TransportError>;

    /// Open the reply (publish) endpoint, registering `identity` so queued
    /// replies survive a handler crash.
    ///
    /// # Errors
    ///
    /// Returns a [`TransportError`] when the endpoint cannot be opened.
    async fn open_sink(&self, spec: &str, identity: &str)
        -> Result<Self::Sink, TransportError>;
}
