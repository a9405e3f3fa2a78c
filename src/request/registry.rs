//! Method-token to request-variant registry.
//!
//! Classification is driven by the `METHOD` header: each token maps to the
//! request variant that will be constructed for it. The registry is owned by
//! the handler runtime, populated before the run loop starts, and read-only
//! afterwards; tests build their own instances instead of sharing process
//! state.

use std::collections::HashMap;

use super::RequestError;

/// Discriminant selecting which [`super::Request`] variant a method token
/// produces.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum RequestKind {
    /// A plain HTTP exchange.
    Http,
    /// A JSON message request.
    Json,
    /// An XML message request.
    Xml,
    /// A WebSocket frame.
    WebSocket,
}

const HTTP_VERBS: [&str; 9] = [
    "GET", "HEAD", "POST", "PUT", "DELETE", "OPTIONS", "PATCH", "TRACE", "CONNECT",
];

/// Mapping from `METHOD` token to request variant, with a settable
/// fallthrough for unknown tokens.
#[derive(Clone, Debug)]
pub struct RequestRegistry {
    entries: HashMap<String, RequestKind>,
    default: Option<RequestKind>,
}

impl Default for RequestRegistry {
    /// Seeds the standard HTTP verbs plus the `JSON`, `XML`, and
    /// `WEBSOCKET` message tokens, with no fallthrough.
    fn default() -> Self {
        let mut entries = HashMap::new();
        for verb in HTTP_VERBS {
            entries.insert(verb.to_owned(), RequestKind::Http);
        }
        entries.insert("JSON".to_owned(), RequestKind::Json);
        entries.insert("XML".to_owned(), RequestKind::Xml);
        entries.insert("WEBSOCKET".to_owned(), RequestKind::WebSocket);
        Self {
            entries,
            default: None,
        }
    }
}

impl RequestRegistry {
    /// A registry with the standard token set installed.
    #[must_use]
    pub fn new() -> Self { Self::default() }

    /// A registry with no tokens at all, for building up from scratch.
    #[must_use]
    pub fn empty() -> Self {
        Self {
            entries: HashMap::new(),
            default: None,
        }
    }

    /// Claim `token` for `kind`, replacing any previous claim.
    ///
    /// # Errors
    ///
    /// Returns [`RequestError::UnhandledMethod`] when `token` is not a word
    /// (`METHOD` tokens must match `^\w+$`).
    pub fn register(&mut self, token: &str, kind: RequestKind) -> Result<(), RequestError> {
        if !is_method_token(token) {
            return Err(RequestError::UnhandledMethod(token.to_owned()));
        }
        self.entries.insert(token.to_owned(), kind);
        Ok(())
    }

    /// Install `kind` as the fallthrough for tokens with no explicit claim.
    ///
    /// Replaces any previous fallthrough. Fallthrough hits are never written
    /// into the token table, so replacing the default cannot leave stale
    /// claims behind.
    pub fn set_default(&mut self, kind: RequestKind) { self.default = Some(kind); }

    /// The current fallthrough, if one is installed.
    #[must_use]
    pub fn default_kind(&self) -> Option<RequestKind> { self.default }

    /// Resolve a `METHOD` header to a request variant.
    ///
    /// # Errors
    ///
    /// Returns [`RequestError::UnhandledMethod`] when the header is absent,
    /// not a word, or matches neither a claimed token nor the fallthrough.
    pub fn classify(&self, method: Option<&str>) -> Result<RequestKind, RequestError> {
        let method =
            method.ok_or_else(|| RequestError::UnhandledMethod(String::new()))?;
        if !is_method_token(method) {
            return Err(RequestError::UnhandledMethod(method.to_owned()));
        }
        self.entries
            .get(method)
            .copied()
            .or(self.default)
            .ok_or_else(|| RequestError::UnhandledMethod(method.to_owned()))
    }
}

fn is_method_token(token: &str) -> bool {
    !token.is_empty()
        && token
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || c == '_')
}
