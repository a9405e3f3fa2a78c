//! The receive-dispatch-reply loop.

use log::{debug, error, info, warn};
use tokio::time::{sleep, Duration};
use tokio_util::sync::CancellationToken;

use super::{
    signals::{SignalEvent, SignalEvents},
    Handler,
};
use crate::{
    config::HandlerSettings,
    connection::{Connection, ConnectionError},
    request::{Request, RequestRegistry},
    response::Response,
    transport::{MessageTransport, TransportError},
};

/// Delay before the first retry after a transport failure.
const RETRY_INITIAL_DELAY: Duration = Duration::from_millis(10);
/// Ceiling for the retry delay once failures have compounded.
const RETRY_MAX_DELAY: Duration = Duration::from_secs(1);

/// Exponential back-off for transport failures on a connection that is
/// still open: start small, double per failure, reset on the next good
/// frame.
struct RetryBackoff {
    delay: Duration,
}

impl RetryBackoff {
    fn new() -> Self {
        Self {
            delay: RETRY_INITIAL_DELAY,
        }
    }

    async fn wait(&mut self) {
        sleep(self.delay).await;
        self.delay = (self.delay * 2).min(RETRY_MAX_DELAY);
    }

    fn reset(&mut self) { self.delay = RETRY_INITIAL_DELAY; }
}

/// Drives one [`Handler`] over one [`Connection`].
///
/// The loop blocks waiting for a frame, dispatches it to the handler entry
/// point its variant selects, and publishes the reply, observing signals
/// and the shutdown token between frames. Per-frame decode failures are
/// logged and dropped; transport failures are retried with exponential
/// back-off while the connection stays open.
///
/// # Examples
///
/// ```no_run
/// use mongrel2_handler::{
///     transport::memory::MemoryTransport, Handler, HandlerRuntime, HandlerSettings,
/// };
///
/// struct App;
/// impl Handler for App {}
///
/// # #[tokio::main(flavor = "current_thread")]
/// # async fn main() -> Result<(), mongrel2_handler::ConnectionError> {
/// let settings = HandlerSettings::new(
///     "54c6755b-9628-40a4-9a2d-cc82a816345e",
///     "tcp://127.0.0.1:9996",
///     "tcp://127.0.0.1:9997",
/// );
/// let mut runtime = HandlerRuntime::connect(MemoryTransport::new(), &settings, App).await?;
/// runtime.run().await
/// # }
/// ```
pub struct HandlerRuntime<T: MessageTransport, H: Handler> {
    conn: Connection<T>,
    handler: H,
    registry: RequestRegistry,
    shutdown: CancellationToken,
    requests_handled: u64,
}

enum LoopEvent {
    Cancelled,
    Signal(SignalEvent),
    Inbound(Result<Request, ConnectionError>),
}

impl<T: MessageTransport + Clone, H: Handler> HandlerRuntime<T, H> {
    /// Open a connection for `settings` and wrap it around `handler`.
    ///
    /// # Errors
    ///
    /// Returns [`ConnectionError::Transport`] when an endpoint cannot be
    /// opened; that failure is unrecoverable and should exit the process
    /// with a non-zero status.
    pub async fn connect(
        transport: T,
        settings: &HandlerSettings,
        handler: H,
    ) -> Result<Self, ConnectionError> {
        let conn = Connection::open(
            transport,
            settings.app_id.clone(),
            settings.send_spec.clone(),
            settings.recv_spec.clone(),
        )
        .await?;
        Ok(Self::new(conn, handler))
    }

    /// Swap the connection for a fresh duplicate and close the original.
    /// A receive in flight on the old sockets is abandoned with them.
    ///
    /// # Errors
    ///
    /// Returns [`ConnectionError::Transport`] when the duplicate cannot be
    /// opened; the original connection is left untouched in that case.
    pub async fn restart(&mut self) -> Result<(), ConnectionError> {
        info!("restarting: reopening {}", self.conn.app_id());
        let fresh = self.conn.dup().await?;
        let mut old = std::mem::replace(&mut self.conn, fresh);
        old.close();
        Ok(())
    }

    /// Run the loop until the connection closes: via a `TERM`/`INT` signal,
    /// the shutdown token, or [`shutdown`](Self::shutdown). `HUP` swaps the
    /// connection and the loop resumes on the fresh sockets; `USR1` logs a
    /// checkpoint.
    ///
    /// # Errors
    ///
    /// Returns [`ConnectionError::Transport`] only when a `HUP` restart
    /// cannot reopen its endpoints. Everything else is absorbed by the
    /// loop's retry and per-frame policies.
    pub async fn run(&mut self) -> Result<(), ConnectionError> {
        let mut signals = SignalEvents::install().map_err(TransportError::Io)?;
        let result = self.run_loop(&mut signals).await;
        // Listeners detach when dropped; later signals get the process
        // defaults.
        drop(signals);
        result
    }

    async fn run_loop(&mut self, signals: &mut SignalEvents) -> Result<(), ConnectionError> {
        let mut backoff = RetryBackoff::new();
        while !self.conn.is_closed() {
            let event = {
                let Self {
                    conn,
                    registry,
                    shutdown,
                    ..
                } = self;
                tokio::select! {
                    biased;
                    () = shutdown.cancelled() => LoopEvent::Cancelled,
                    signal = signals.next() => LoopEvent::Signal(signal),
                    received = conn.receive(registry) => LoopEvent::Inbound(received),
                }
            };
            match event {
                LoopEvent::Cancelled => {
                    info!("shutdown requested; closing connection");
                    self.conn.close();
                }
                LoopEvent::Signal(SignalEvent::Stop) => {
                    info!("received a stop signal; closing connection");
                    self.conn.close();
                }
                LoopEvent::Signal(SignalEvent::Restart) => {
                    self.restart().await?;
                }
                LoopEvent::Signal(SignalEvent::Checkpoint) => {
                    info!(
                        "checkpoint: {} requests handled on {}",
                        self.requests_handled,
                        self.conn.app_id()
                    );
                }
                LoopEvent::Inbound(Ok(request)) => {
                    backoff.reset();
                    self.requests_handled += 1;
                    debug!(
                        "request {} for {} from connection {}",
                        self.requests_handled,
                        request.path(),
                        request.conn_id()
                    );
                    if let Some(mut response) = self.dispatch(&request).await {
                        self.send_reply(&mut response).await;
                    }
                }
                LoopEvent::Inbound(Err(ConnectionError::Closed)) => break,
                LoopEvent::Inbound(Err(error)) if error.is_per_frame() => {
                    warn!("dropping undecodable frame: {error}");
                }
                LoopEvent::Inbound(Err(error)) => {
                    error!("transport failure while receiving: {error}; retrying");
                    backoff.wait().await;
                }
            }
        }
        Ok(())
    }
}

impl<T: MessageTransport, H: Handler> HandlerRuntime<T, H> {
    /// Wrap an already-open connection around `handler`.
    #[must_use]
    pub fn new(conn: Connection<T>, handler: H) -> Self {
        Self {
            conn,
            handler,
            registry: RequestRegistry::new(),
            shutdown: CancellationToken::new(),
            requests_handled: 0,
        }
    }

    /// The method-token registry. Mutate it before calling
    /// [`run`](Self::run); the loop only reads it.
    #[must_use]
    pub fn registry(&self) -> &RequestRegistry { &self.registry }

    /// Mutable access to the registry, for init-time registration.
    pub fn registry_mut(&mut self) -> &mut RequestRegistry { &mut self.registry }

    /// The connection currently driven by the loop.
    #[must_use]
    pub fn connection(&self) -> &Connection<T> { &self.conn }

    /// A token that stops the loop when cancelled, from any task. The
    /// request in flight completes and its reply is sent first.
    #[must_use]
    pub fn shutdown_token(&self) -> CancellationToken { self.shutdown.clone() }

    /// Close the connection; the loop observes this and terminates.
    pub fn shutdown(&mut self) {
        self.shutdown.cancel();
        self.conn.close();
    }

    /// How many requests have been dispatched since construction.
    #[must_use]
    pub fn requests_handled(&self) -> u64 { self.requests_handled }

    /// Route one request to the handler entry point its variant selects.
    /// Handler errors are logged here and produce no reply; a disconnect
    /// notice never produces one.
    async fn dispatch(&mut self, request: &Request) -> Option<Response> {
        if request.is_disconnect() {
            if let Request::Json(notice) = request {
                if let Err(error) = self.handler.handle_disconnect(notice).await {
                    error!(
                        "disconnect handler failed for connection {}: {error}",
                        request.conn_id()
                    );
                }
            }
            return None;
        }
        let outcome = match request {
            Request::Http(request) => self.handler.handle(request).await,
            Request::Json(request) => self.handler.handle_json(request).await,
            Request::Xml(request) => self.handler.handle_xml(request).await,
            Request::WebSocket(request) => self.handler.handle_websocket(request).await,
        };
        match outcome {
            Ok(response) => response,
            Err(error) => {
                error!(
                    "handler failed for connection {}: {error}",
                    request.conn_id()
                );
                None
            }
        }
    }

    async fn send_reply(&mut self, response: &mut Response) {
        if self.conn.is_closed() {
            return;
        }
        match self.conn.reply(response).await {
            Ok(()) | Err(ConnectionError::Closed) => {}
            Err(error @ ConnectionError::Response(_)) => {
                error!(
                    "reply for connection {} not sent: {error}",
                    response.conn_id()
                );
            }
            Err(error) => {
                error!(
                    "transport failure while replying to connection {}: {error}",
                    response.conn_id()
                );
            }
        }
    }
}
