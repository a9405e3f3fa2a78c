//! The user-facing handler seam and its run loop.
//!
//! Application logic implements [`Handler`]: one entry point per request
//! variant, each with the conventional default, so a handler only overrides
//! the exchanges it cares about. A [`HandlerRuntime`] drives the
//! receive-dispatch-reply loop around it.

use async_trait::async_trait;

use crate::{
    request::{HttpRequest, JsonRequest, WebSocketRequest, XmlRequest},
    response::Response,
    websocket::{WebSocketResponse, CLOSE_POLICY_VIOLATION},
};

mod runtime;
mod signals;
pub use runtime::HandlerRuntime;

/// Error type handler methods may fail with. The run loop logs it and
/// sends no reply for that request.
pub type HandlerError = Box<dyn std::error::Error + Send + Sync>;

/// Outcome of one handler entry point: optionally a reply, or an error the
/// run loop will log and swallow.
pub type HandlerResult = Result<Option<Response>, HandlerError>;

/// Application logic attached to a [`HandlerRuntime`].
///
/// Every method has a default, so an implementation starts from
/// `impl Handler for MyApp {}` and grows from there:
///
/// - [`handle`](Self::handle) answers `204 No Content`,
/// - [`handle_json`](Self::handle_json), [`handle_xml`](Self::handle_xml),
///   and [`handle_disconnect`](Self::handle_disconnect) reply with nothing,
/// - [`handle_websocket`](Self::handle_websocket) closes the socket with a
///   policy violation, the safe answer for traffic nobody asked for.
#[async_trait]
pub trait Handler: Send {
    /// Answer one HTTP request.
    ///
    /// # Errors
    ///
    /// Implementations may fail with any boxed error; the run loop logs it
    /// and moves on without replying.
    async fn handle(&mut self, request: &HttpRequest) -> HandlerResult {
        let mut response = request.response();
        response.set_status(204);
        Ok(Some(Response::Http(response)))
    }

    /// Answer one JSON message request.
    ///
    /// # Errors
    ///
    /// As for [`handle`](Self::handle).
    async fn handle_json(&mut self, _request: &JsonRequest) -> HandlerResult { Ok(None) }

    /// Answer one XML message request.
    ///
    /// # Errors
    ///
    /// As for [`handle`](Self::handle).
    async fn handle_xml(&mut self, _request: &XmlRequest) -> HandlerResult { Ok(None) }

    /// Answer one WebSocket frame.
    ///
    /// # Errors
    ///
    /// As for [`handle`](Self::handle).
    async fn handle_websocket(&mut self, request: &WebSocketRequest) -> HandlerResult {
        Ok(Some(Response::WebSocket(WebSocketResponse::close(
            request.envelope().sender_id(),
            request.envelope().conn_id(),
            CLOSE_POLICY_VIOLATION,
        ))))
    }

    /// Observe a client disconnect notice. Whatever this returns, no reply
    /// is sent; the connection is already gone.
    ///
    /// # Errors
    ///
    /// As for [`handle`](Self::handle).
    async fn handle_disconnect(&mut self, _request: &JsonRequest) -> HandlerResult {
        Ok(None)
    }
}

#[cfg(test)]
mod tests;
