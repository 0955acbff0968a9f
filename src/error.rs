//! Crate-wide error taxonomy for the GPST tunnel protocol.

use thiserror::Error;

/// Reason a request was rejected by the gateway or portal.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum RejectReason {
    #[error("invalid username or password")]
    InvalidCredentials,

    #[error("invalid client certificate")]
    InvalidCertificate,

    #[error("GlobalProtect gateway or portal does not exist")]
    GatewayOrPortalMissing,

    #[error("invalid authentication cookie")]
    InvalidAuthCookie,

    #[error("{0}")]
    Server(String),
}

/// Errors surfaced by the GPST tunnel session.
///
/// `Interrupted` propagates untouched: no retry, no reconnect, no state
/// mutation. `Transport` errors trigger a reconnect inside the mainloop
/// and are only surfaced when reconnection itself fails. Everything
/// else ends the operation that produced it.
#[derive(Error, Debug)]
pub enum GpstError {
    #[error("transport error: {0}")]
    Transport(String),

    #[error("operation interrupted")]
    Interrupted,

    #[error("tunnel disconnected")]
    Disconnected,

    #[error("short packet received ({0} bytes)")]
    ShortFrame(usize),

    #[error("unknown packet received")]
    UnknownFrame,

    #[error("SSL wrote too few bytes: asked for {wanted}, sent {wrote}")]
    ShortWrite { wanted: usize, wrote: usize },

    #[error("failed to parse server response")]
    ParseFailure,

    #[error("server rejected request: {0}")]
    ServerRejected(RejectReason),

    #[error("tunnel setup failed: {0}")]
    SetupFailed(String),

    #[error("configuration changed across reconnect: {0}")]
    ConfigInconsistent(String),

    #[error("missing required field: {0}")]
    MissingField(&'static str),

    #[error("reconnect failed: {0}")]
    ReconnectFailed(#[source] Box<GpstError>),
}

impl GpstError {
    /// True for the interrupted signal, which must pass through every
    /// layer without being translated or acted upon.
    pub fn is_interrupted(&self) -> bool {
        matches!(self, GpstError::Interrupted)
    }
}
