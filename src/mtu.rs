//! Tunnel MTU inference.
//!
//! GlobalProtect gateways are routinely observed to report
//! `<mtu>0</mtu>`, so deriving the tunnel MTU from transport hints is
//! the common path, not an edge case.

use crate::transport::SegmentHints;
use tracing::debug;

/// ESP encapsulation allowance subtracted from the base MTU.
pub const ESP_OVERHEAD: u16 = 73;
pub const UDP_HEADER_SIZE: u16 = 8;
pub const IPV4_HEADER_SIZE: u16 = 20;
pub const IPV6_HEADER_SIZE: u16 = 40;

/// Base MTU assumed when no introspection data is available.
const DEFAULT_BASE_MTU: u16 = 1406;

/// Floor for the base MTU (IPv6 minimum, kept as a safety margin even
/// though the SSL tunnel never carries IPv6).
const MIN_BASE_MTU: u16 = 1280;

/// TCP option allowance when deriving a base MTU from an MSS value.
const MSS_OVERHEAD: u16 = 13;

/// Derive the tunnel MTU.
///
/// `req_mtu` and `req_base_mtu` are user-forced values (0 = not
/// forced). When either is unforced, `hints` from the live connection
/// are consulted: a reported path MTU wins, else the smaller of the
/// send/receive segment sizes minus a fixed allowance. With no hints
/// at all the base MTU defaults to 1406, and it is always clamped to a
/// 1280 floor before the ESP/UDP/IP overheads are subtracted.
pub fn calculate_mtu(
    req_mtu: u16,
    req_base_mtu: u16,
    hints: Option<&SegmentHints>,
    ipv6_peer: bool,
) -> u16 {
    let mut mtu = req_mtu;
    let mut base_mtu = req_base_mtu;

    if mtu == 0 || base_mtu == 0 {
        if let Some(hints) = hints {
            debug!(
                "Transport hints: rcv mss {:?}, snd mss {:?}, pmtu {:?}",
                hints.rcv_mss, hints.snd_mss, hints.pmtu
            );

            if base_mtu == 0 {
                base_mtu = hints.pmtu.unwrap_or(0);
            }

            if base_mtu == 0 {
                base_mtu = match (hints.rcv_mss, hints.snd_mss) {
                    (Some(rcv), Some(snd)) => rcv.min(snd).saturating_sub(MSS_OVERHEAD),
                    (Some(mss), None) | (None, Some(mss)) => mss.saturating_sub(MSS_OVERHEAD),
                    (None, None) => 0,
                };
            }
        }
    }

    if base_mtu == 0 {
        base_mtu = DEFAULT_BASE_MTU;
    }

    if base_mtu < MIN_BASE_MTU {
        base_mtu = MIN_BASE_MTU;
    }

    if mtu == 0 {
        // Remove IP/UDP and ESP overhead from the base MTU.
        mtu = base_mtu - ESP_OVERHEAD - UDP_HEADER_SIZE;
        mtu -= if ipv6_peer {
            IPV6_HEADER_SIZE
        } else {
            IPV4_HEADER_SIZE
        };
    }

    mtu
}
