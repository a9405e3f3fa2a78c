//! Handler endpoint configuration.
//!
//! A handler needs exactly three values to attach itself to a server: the
//! identity it publishes replies under and the two endpoint specs. They can
//! be given directly, or looked up from whatever configuration store the
//! deployment keeps by `send_ident` through the [`SettingsSource`] seam;
//! the store itself (Mongrel2 keeps these rows in its config database) is
//! not this crate's concern.

use serde::Deserialize;
use thiserror::Error;

/// Errors raised by settings lookup.
#[derive(Clone, Debug, Error, PartialEq, Eq)]
pub enum SettingsError {
    /// No handler row carries this `send_ident`.
    #[error("no handler configured with send_ident {0:?}")]
    UnknownHandler(String),
}

/// The `(app_id, send_spec, recv_spec)` triple identifying one handler
/// attachment.
#[derive(Clone, Debug, Deserialize, PartialEq, Eq)]
pub struct HandlerSettings {
    /// Identity registered on the reply endpoint, and the `send_ident`
    /// under which the handler is configured.
    pub app_id: String,
    /// Endpoint spec replies are published to.
    pub send_spec: String,
    /// Endpoint spec requests are pulled from.
    pub recv_spec: String,
}

impl HandlerSettings {
    /// Assemble a settings triple.
    #[must_use]
    pub fn new(
        app_id: impl Into<String>,
        send_spec: impl Into<String>,
        recv_spec: impl Into<String>,
    ) -> Self {
        Self {
            app_id: app_id.into(),
            send_spec: send_spec.into(),
            recv_spec: recv_spec.into(),
        }
    }
}

/// A store of handler rows, queried by `send_ident`.
pub trait SettingsSource: Send + Sync {
    /// Look up the handler row whose `send_ident` equals `id`.
    fn find_handler_by_send_ident(&self, id: &str) -> Option<HandlerSettings>;

    /// Like [`find_handler_by_send_ident`](Self::find_handler_by_send_ident),
    /// but missing rows become an error.
    ///
    /// # Errors
    ///
    /// Returns [`SettingsError::UnknownHandler`] when no row matches.
    fn require(&self, id: &str) -> Result<HandlerSettings, SettingsError> {
        self.find_handler_by_send_ident(id)
            .ok_or_else(|| SettingsError::UnknownHandler(id.to_owned()))
    }
}

/// A fixed, in-memory settings source for tests and embedders that carry
/// their configuration in code.
#[derive(Clone, Debug, Default)]
pub struct StaticSettings {
    entries: Vec<HandlerSettings>,
}

impl StaticSettings {
    /// An empty source.
    #[must_use]
    pub fn new() -> Self { Self::default() }

    /// Add a handler row.
    #[must_use]
    pub fn with(mut self, settings: HandlerSettings) -> Self {
        self.entries.push(settings);
        self
    }
}

impl SettingsSource for StaticSettings {
    fn find_handler_by_send_ident(&self, id: &str) -> Option<HandlerSettings> {
        self.entries
            .iter()
            .find(|settings| settings.app_id == id)
            .cloned()
    }
}

impl FromIterator<HandlerSettings> for StaticSettings {
    fn from_iter<I: IntoIterator<Item = HandlerSettings>>(iter: I) -> Self {
        Self {
            entries: iter.into_iter().collect(),
        }
    }
}
