//! Collaborator seams for the GPST core.
//!
//! The TLS stream, its reconnection, and generic HTTPS request
//! issuance are owned by the embedding client. This module defines the
//! traits the tunnel session drives them through. All transport I/O is
//! non-blocking: an operation that cannot make progress returns
//! [`IoStatus::WouldBlock`] instead of suspending the caller.

use crate::error::GpstError;

/// Outcome of a non-blocking read or write that did not fail.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IoStatus {
    /// The operation transferred this many bytes (never 0).
    Ready(usize),
    /// No progress was possible without blocking.
    WouldBlock,
}

/// TCP segment-size hints read from the live connection, used to infer
/// the tunnel MTU when the server reports none.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SegmentHints {
    /// Kernel path-MTU estimate for the connection.
    pub pmtu: Option<u16>,
    /// Receive-side maximum segment size.
    pub rcv_mss: Option<u16>,
    /// Send-side maximum segment size.
    pub snd_mss: Option<u16>,
}

/// An established, encrypted stream to the gateway.
///
/// Contract:
/// - `read`/`write` are the setup-phase operations: `read` returns the
///   number of bytes received (0 means the peer closed), `write` sends
///   the whole buffer. Both may fail with [`GpstError::Interrupted`],
///   which callers propagate without retrying.
/// - `read_nonblock`/`write_nonblock` never return `Ready(0)`; a
///   closed connection is an `Err(Transport)`, absence of data is
///   `WouldBlock`.
pub trait Transport {
    fn read(&mut self, buf: &mut [u8]) -> Result<usize, GpstError>;

    fn write(&mut self, buf: &[u8]) -> Result<(), GpstError>;

    fn read_nonblock(&mut self, buf: &mut [u8]) -> Result<IoStatus, GpstError>;

    fn write_nonblock(&mut self, buf: &[u8]) -> Result<IoStatus, GpstError>;

    /// Segment-size introspection for MTU calculation. Implementations
    /// without access to the socket return `None` and the calculator
    /// falls back to its defaults.
    fn segment_hints(&self) -> Option<SegmentHints> {
        None
    }

    /// Whether the gateway was reached over IPv6 (changes the IP
    /// header allowance subtracted from the base MTU).
    fn peer_is_ipv6(&self) -> bool {
        false
    }
}

/// Opens a fresh [`Transport`] to the gateway, used at setup and on
/// every reconnect.
pub trait Connector {
    fn connect(&mut self) -> Result<Box<dyn Transport>, GpstError>;
}

impl<F> Connector for F
where
    F: FnMut() -> Result<Box<dyn Transport>, GpstError>,
{
    fn connect(&mut self) -> Result<Box<dyn Transport>, GpstError> {
        self()
    }
}

/// HTTP-layer failure classes the gateway is known to produce. The
/// first two map onto specific rejection reasons before the response
/// body is even inspected.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum HttpError {
    /// HTTP-level permission denied (invalid username or password).
    PermissionDenied,
    /// Malformed-message response (invalid client certificate).
    BadMessage,
    /// The request was interrupted; propagates untranslated.
    Interrupted,
    /// Anything else the HTTP layer could not recover from.
    Other(String),
}

/// Issues the two fixed HTTPS request shapes this core needs. Response
/// bodies come back as owned strings; transport-level failures map to
/// [`HttpError`].
pub trait HttpClient {
    fn post(
        &mut self,
        path: &str,
        content_type: &str,
        body: &str,
    ) -> Result<String, HttpError>;
}
