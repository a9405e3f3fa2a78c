//! Signal wiring for the run loop.
//!
//! The conventional Mongrel2 handler contract: `HUP` swaps the connection
//! for a fresh one, `TERM` and `INT` shut the loop down gracefully, `USR1`
//! logs a checkpoint. Listeners are plain tokio signal streams polled
//! between frames, so no work happens in signal-handler context; dropping
//! the struct detaches the listeners again on loop exit.

use std::io;

/// What the loop should do about a delivered signal.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub(super) enum SignalEvent {
    /// `HUP`: swap the connection.
    Restart,
    /// `TERM` or `INT`: close the connection and exit the loop.
    Stop,
    /// `USR1`: log progress, change nothing.
    Checkpoint,
}

#[cfg(unix)]
pub(super) use unix::SignalEvents;

#[cfg(unix)]
mod unix {
    use tokio::signal::unix::{signal, Signal, SignalKind};

    use super::{io, SignalEvent};

    pub(in crate::handler) struct SignalEvents {
        hangup: Signal,
        terminate: Signal,
        interrupt: Signal,
        user1: Signal,
    }

    impl SignalEvents {
        pub(in crate::handler) fn install() -> io::Result<Self> {
            Ok(Self {
                hangup: signal(SignalKind::hangup())?,
                terminate: signal(SignalKind::terminate())?,
                interrupt: signal(SignalKind::interrupt())?,
                user1: signal(SignalKind::user_defined1())?,
            })
        }

        pub(in crate::handler) async fn next(&mut self) -> SignalEvent {
            tokio::select! {
                _ = self.terminate.recv() => SignalEvent::Stop,
                _ = self.interrupt.recv() => SignalEvent::Stop,
                _ = self.hangup.recv() => SignalEvent::Restart,
                _ = self.user1.recv() => SignalEvent::Checkpoint,
            }
        }
    }
}

#[cfg(not(unix))]
pub(super) use fallback::SignalEvents;

#[cfg(not(unix))]
mod fallback {
    use super::{io, SignalEvent};

    /// No signal surface on this platform; control the loop through its
    /// cancellation token instead.
    pub(in crate::handler) struct SignalEvents;

    impl SignalEvents {
        pub(in crate::handler) fn install() -> io::Result<Self> { Ok(Self) }

        pub(in crate::handler) async fn next(&mut self) -> SignalEvent {
            std::future::pending().await
        }
    }
}
