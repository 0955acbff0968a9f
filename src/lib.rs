//! GPST tunnel - GlobalProtect SSL-VPN tunnel protocol
//!
//! This crate implements the tunnel sub-protocol spoken by Palo Alto
//! Networks GlobalProtect gateways over the established TLS session:
//! fetching the tunnel configuration, the GET-tunnel handshake, packet
//! framing, and the keepalive/DPD/rekey state machine.
//!
//! # Architecture
//!
//! - `config`: Connection state and the getconfig fetch
//! - `transport`: Traits the embedding client implements (TLS stream,
//!   reconnection, HTTPS requests)
//! - `packet`: The 16-byte GPST frame header
//! - `response`: XML and pseudo-JavaScript response interpretation
//! - `handshake`: The GET-tunnel / `START_TUNNEL` exchange
//! - `timers`: Keepalive, DPD and rekey scheduling
//! - `tunnel`: The re-entrant non-blocking mainloop
//!
//! # Usage
//!
//! The embedding client authenticates out of band, hands the session
//! cookie plus its transport and HTTP collaborators to
//! [`GpstTunnel::new`], calls [`GpstTunnel::setup`], and then drives
//! [`GpstTunnel::mainloop`] from its own readiness loop.

pub mod config;
pub mod error;
pub mod handshake;
pub mod mtu;
pub mod packet;
pub mod query;
pub mod response;
pub mod timers;
pub mod transport;
pub mod tunnel;
pub mod xml;

pub use config::{ConnectionState, RekeyMethod, SessionOptions};
pub use error::{GpstError, RejectReason};
pub use packet::Packet;
pub use response::{Challenge, ResponseOutcome};
pub use transport::{Connector, HttpClient, HttpError, IoStatus, SegmentHints, Transport};
pub use tunnel::GpstTunnel;
