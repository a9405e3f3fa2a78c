//! In-process message transport.
//!
//! A [`MemoryTransport`] is a hub of named endpoints backed by unbounded
//! channels. Tests and embedders push request frames into a source spec
//! with [`MemoryTransport::push_request`] and read the handler's replies
//! back out with [`MemoryTransport::take_published`]; the handler side goes
//! through the [`MessageTransport`] trait like any other implementation.
//!
//! Endpoint semantics mirror the real thing where the core depends on it:
//! frames pushed before the source is opened are buffered and delivered to
//! the first socket; re-opening a source spec starts a fresh queue, so
//! frames still sitting on the previous socket are abandoned with it
//! (exactly what connection duplication wants); sinks fan into one per-spec
//! stream however many times the endpoint is re-opened.

use std::{
    collections::{HashMap, VecDeque},
    sync::{Arc, Mutex},
};

use async_trait::async_trait;
use bytes::Bytes;
use tokio::sync::mpsc;

use super::{MessageTransport, ReplySink, RequestSource, TransportError};

#[derive(Default)]
struct SourceEndpoint {
    tx: Option<mpsc::UnboundedSender<Bytes>>,
    backlog: VecDeque<Bytes>,
    opens: usize,
}

struct SinkEndpoint {
    tx: mpsc::UnboundedSender<Bytes>,
    rx: Option<mpsc::UnboundedReceiver<Bytes>>,
    identity: Option<String>,
}

impl Default for SinkEndpoint {
    fn default() -> Self {
        let (tx, rx) = mpsc::unbounded_channel();
        Self {
            tx,
            rx: Some(rx),
            identity: None,
        }
    }
}

#[derive(Default)]
struct Hub {
    sources: HashMap<String, SourceEndpoint>,
    sinks: HashMap<String, SinkEndpoint>,
}

/// An in-process transport hub. Clones share the same endpoints.
#[derive(Clone, Default)]
pub struct MemoryTransport {
    hub: Arc<Mutex<Hub>>,
}

impl MemoryTransport {
    /// A hub with no endpoints yet; endpoints appear as they are used.
    #[must_use]
    pub fn new() -> Self { Self::default() }

    /// Deliver a request frame to `spec`. Frames pushed before the source
    /// is opened are buffered for the first socket.
    pub fn push_request(&self, spec: &str, frame: impl Into<Bytes>) {
        let frame = frame.into();
        let mut hub = self.lock();
        let endpoint = hub.sources.entry(spec.to_owned()).or_default();
        match &endpoint.tx {
            // A dead receiver means the socket was dropped; queue for the
            // next one like frames that arrived while no handler was up.
            Some(tx) if tx.send(frame.clone()).is_ok() => {}
            _ => endpoint.backlog.push_back(frame),
        }
    }

    /// Take the stream of frames published to `spec`, across every socket
    /// generation. Returns `None` once the stream has been taken.
    #[must_use]
    pub fn take_published(&self, spec: &str) -> Option<mpsc::UnboundedReceiver<Bytes>> {
        self.lock()
            .sinks
            .entry(spec.to_owned())
            .or_default()
            .rx
            .take()
    }

    /// The identity most recently registered on `spec`'s sink.
    #[must_use]
    pub fn sink_identity(&self, spec: &str) -> Option<String> {
        self.lock()
            .sinks
            .get(spec)
            .and_then(|endpoint| endpoint.identity.clone())
    }

    /// How many times `spec`'s source endpoint has been opened.
    #[must_use]
    pub fn source_opens(&self, spec: &str) -> usize {
        self.lock()
            .sources
            .get(spec)
            .map_or(0, |endpoint| endpoint.opens)
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, Hub> {
        self.hub.lock().unwrap_or_else(std::sync::PoisonError::into_inner)
    }
}

/// Receiving socket handed out by [`MemoryTransport::open_source`].
pub struct MemorySource {
    rx: mpsc::UnboundedReceiver<Bytes>,
}

#[async_trait]
impl RequestSource for MemorySource {
    async fn recv(&mut self) -> Result<Bytes, TransportError> {
        self.rx.recv().await.ok_or(TransportError::Disconnected)
    }
}

/// Sending socket handed out by [`MemoryTransport::open_sink`].
pub struct MemorySink {
    tx: mpsc::UnboundedSender<Bytes>,
}

#[async_trait]
impl ReplySink for MemorySink {
    async fn send(&mut self, frame: Bytes) -> Result<(), TransportError> {
        self.tx.send(frame).map_err(|_| TransportError::Disconnected)
    }
}

#[async_trait]
impl MessageTransport for MemoryTransport {
    type Source = MemorySource;
    type Sink = MemorySink;

    async fn open_source(&self, spec: &str) -> Result<Self::Source, TransportError> {
        let (tx, rx) = mpsc::unbounded_channel();
        let mut hub = self.lock();
        let endpoint = hub.sources.entry(spec.to_owned()).or_default();
        while let Some(frame) = endpoint.backlog.pop_front() {
            // The receiver is alive in this scope; delivery cannot fail.
            let _ = tx.send(frame);
        }
        endpoint.tx = Some(tx);
        endpoint.opens += 1;
        Ok(MemorySource { rx })
    }

    async fn open_sink(
        &self,
        spec: &str,
        identity: &str,
    ) -> Result<Self::Sink, TransportError> {
        let mut hub = self.lock();
        let endpoint = hub.sinks.entry(spec.to_owned()).or_default();
        endpoint.identity = Some(identity.to_owned());
        Ok(MemorySink {
            tx: endpoint.tx.clone(),
        })
    }
}
