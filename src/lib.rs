#![doc(html_root_url = "https://docs.rs/mongrel2-handler/latest")]
//! Handler-side runtime for the Mongrel2 web server.
//!
//! Mongrel2 hands every request it accepts to an out-of-process *handler*
//! over a pair of message sockets: requests arrive on a load-balanced pull
//! endpoint, replies leave on a publish endpoint filtered by the server's
//! identity. This crate implements the handler side of that contract: the
//! tnetstring codec, the request envelope decoder and taxonomy, the HTTP and
//! WebSocket response builders, the reply envelope encoder, and the
//! receive-dispatch-reply run loop with its signal-driven restart and
//! shutdown semantics.
//!
//! The transport itself is abstracted behind [`transport::MessageTransport`];
//! an in-process implementation ([`transport::memory::MemoryTransport`]) is
//! provided for tests and embedders.

pub mod config;
pub mod connection;
pub mod handler;
pub mod request;
pub mod response;
pub mod tnetstring;
pub mod transport;
pub mod websocket;

pub use config::{HandlerSettings, SettingsSource, StaticSettings};
pub use connection::{Connection, ConnectionError};
pub use handler::{Handler, HandlerError, HandlerResult, HandlerRuntime};
pub use request::{
    Headers,
    HttpRequest,
    JsonRequest,
    Request,
    RequestEnvelope,
    RequestError,
    RequestKind,
    RequestRegistry,
    WebSocketRequest,
    XmlRequest,
};
pub use response::{Body, HttpResponse, Response, ResponseError};
pub use websocket::{Frame, FrameError, OpCode, WebSocketResponse};

/// `Server` header token advertised by freshly constructed responses.
pub const SERVER_TOKEN: &str = concat!("mongrel2-handler/", env!("CARGO_PKG_VERSION"));
