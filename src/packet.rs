//! GPST packet framing.
//!
//! Every IP packet crosses the SSL stream wrapped in a fixed 16-byte
//! header:
//!
//! ```text
//! 0000: Magic "\x1a\x2b\x3c\x4d"
//! 0004: Big-endian EtherType (0x0800 for IPv4, 0x0000 for keepalive)
//! 0006: Big-endian 16-bit payload length (header not included)
//! 0008: Little-endian 32-bit flag, 1 for data / 0 for keepalive
//! 000c: Little-endian 32-bit flag, always 0
//! 0010: payload
//! ```
//!
//! The trailing flags are sanity-checked but never grounds for
//! rejection; a bad magic or ethertype is unrecoverable because the
//! stream has no resynchronization mechanism.

use thiserror::Error;
use tracing::debug;

pub const MAGIC: u32 = 0x1a2b3c4d;
pub const HEADER_SIZE: usize = 16;
pub const ETHERTYPE_KEEPALIVE: u16 = 0x0000;
pub const ETHERTYPE_IPV4: u16 = 0x0800;

/// The shared DPD/keepalive frame: magic plus an all-zero remainder.
/// Reused by value for every probe, never pooled or freed.
pub const DPD_FRAME: [u8; HEADER_SIZE] = [
    0x1a, 0x2b, 0x3c, 0x4d, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00,
    0x00,
];

/// Packet framing errors. Only `LengthMismatch` is survivable (the
/// frame is dropped); the rest indicate a desynchronized stream.
#[derive(Error, Debug)]
pub enum FrameError {
    #[error("frame too short ({0} bytes, minimum {HEADER_SIZE})")]
    TooShort(usize),

    #[error("invalid magic header")]
    BadMagic,

    #[error("unknown ethertype: {0:#06x}")]
    UnknownEthertype(u16),

    #[error("frame length mismatch: header declares {expected} total bytes, read {actual}")]
    LengthMismatch { expected: usize, actual: usize },
}

/// A framed data packet: one owned buffer holding the 16-byte header
/// followed by the IP payload. A packet lives in exactly one place at
/// a time (incoming queue, outgoing queue, or the in-flight slot).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Packet {
    buf: Vec<u8>,
}

impl Packet {
    /// Frame an IPv4 payload for transmission. The length field is 16
    /// bits; anything larger than the tunnel MTU has no business here.
    pub fn from_payload(payload: &[u8]) -> Self {
        debug_assert!(payload.len() <= u16::MAX as usize);
        let mut buf = Vec::with_capacity(HEADER_SIZE + payload.len());
        buf.extend_from_slice(&MAGIC.to_be_bytes());
        buf.extend_from_slice(&ETHERTYPE_IPV4.to_be_bytes());
        buf.extend_from_slice(&(payload.len() as u16).to_be_bytes());
        buf.extend_from_slice(&1u32.to_le_bytes());
        buf.extend_from_slice(&0u32.to_le_bytes());
        buf.extend_from_slice(payload);
        Self { buf }
    }

    fn from_frame(frame: &[u8]) -> Self {
        Self {
            buf: frame.to_vec(),
        }
    }

    /// The IP payload carried inside the frame.
    pub fn payload(&self) -> &[u8] {
        &self.buf[HEADER_SIZE..]
    }

    pub fn payload_len(&self) -> usize {
        self.buf.len() - HEADER_SIZE
    }

    /// The full wire frame, header included. Retransmission after a
    /// stalled write must reuse these exact bytes.
    pub fn frame(&self) -> &[u8] {
        &self.buf
    }
}

/// A successfully decoded inbound frame.
#[derive(Debug)]
pub enum Decoded {
    /// DPD/keepalive acknowledgement; nothing to enqueue.
    Keepalive,
    /// IPv4 data packet for the incoming queue.
    Data(Packet),
}

/// Decode one inbound frame. `frame` must hold exactly the bytes one
/// read produced; a declared payload length that disagrees with it is
/// a `LengthMismatch` and the frame is discarded by the caller.
pub fn decode(frame: &[u8]) -> Result<Decoded, FrameError> {
    if frame.len() < HEADER_SIZE {
        return Err(FrameError::TooShort(frame.len()));
    }

    let magic = u32::from_be_bytes([frame[0], frame[1], frame[2], frame[3]]);
    let ethertype = u16::from_be_bytes([frame[4], frame[5]]);
    let payload_len = u16::from_be_bytes([frame[6], frame[7]]) as usize;
    let flag_one = u32::from_le_bytes([frame[8], frame[9], frame[10], frame[11]]);
    let flag_zero = u32::from_le_bytes([frame[12], frame[13], frame[14], frame[15]]);

    if magic != MAGIC {
        return Err(FrameError::BadMagic);
    }

    if frame.len() != HEADER_SIZE + payload_len {
        return Err(FrameError::LengthMismatch {
            expected: HEADER_SIZE + payload_len,
            actual: frame.len(),
        });
    }

    match ethertype {
        ETHERTYPE_KEEPALIVE => {
            if flag_one != 0 || flag_zero != 0 {
                debug!(
                    "Expected zeroed trailing flags in DPD/keepalive header, got: {}",
                    hex_dump(&frame[8..HEADER_SIZE])
                );
            }
            Ok(Decoded::Keepalive)
        }
        ETHERTYPE_IPV4 => {
            if flag_one != 1 || flag_zero != 0 {
                debug!(
                    "Expected 0100000000000000 trailing flags in data header, got: {}",
                    hex_dump(&frame[8..HEADER_SIZE])
                );
            }
            Ok(Decoded::Data(Packet::from_frame(frame)))
        }
        other => Err(FrameError::UnknownEthertype(other)),
    }
}

/// Render bytes as space-separated hex for diagnostic dumps.
pub fn hex_dump(bytes: &[u8]) -> String {
    bytes
        .iter()
        .map(|b| format!("{:02x}", b))
        .collect::<Vec<_>>()
        .join(" ")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_encode_layout() {
        let payload = [0x45, 0x00, 0x00, 0x54, 0xab, 0xcd];
        let pkt = Packet::from_payload(&payload);
        let frame = pkt.frame();

        assert_eq!(frame.len(), HEADER_SIZE + payload.len());
        assert_eq!(&frame[0..4], &[0x1a, 0x2b, 0x3c, 0x4d]);
        assert_eq!(u16::from_be_bytes([frame[4], frame[5]]), ETHERTYPE_IPV4);
        assert_eq!(
            u16::from_be_bytes([frame[6], frame[7]]) as usize,
            payload.len()
        );
        assert_eq!(&frame[8..12], &1u32.to_le_bytes());
        assert_eq!(&frame[12..16], &0u32.to_le_bytes());
        assert_eq!(&frame[16..], &payload);
    }

    #[test]
    fn test_round_trip_various_lengths() {
        for len in [0usize, 1, 20, 576, 1305] {
            let payload: Vec<u8> = (0..len).map(|i| (i % 251) as u8).collect();
            let pkt = Packet::from_payload(&payload);
            match decode(pkt.frame()).unwrap() {
                Decoded::Data(decoded) => {
                    assert_eq!(decoded.payload(), &payload[..]);
                    assert_eq!(decoded.payload_len(), len);
                }
                Decoded::Keepalive => panic!("data frame decoded as keepalive"),
            }
        }
    }

    #[test]
    #[should_panic]
    #[cfg(debug_assertions)]
    fn test_payload_larger_than_length_field() {
        Packet::from_payload(&vec![0u8; u16::MAX as usize + 1]);
    }

    #[test]
    fn test_decode_keepalive() {
        assert!(matches!(decode(&DPD_FRAME), Ok(Decoded::Keepalive)));
    }

    #[test]
    fn test_keepalive_with_dirty_flags_still_keepalive() {
        let mut frame = DPD_FRAME;
        frame[8] = 0x01;
        assert!(matches!(decode(&frame), Ok(Decoded::Keepalive)));
    }

    #[test]
    fn test_data_with_wrong_flags_still_accepted() {
        let mut frame = Packet::from_payload(&[1, 2, 3]).frame().to_vec();
        frame[8] = 0x00;
        frame[12] = 0x07;
        assert!(matches!(decode(&frame), Ok(Decoded::Data(_))));
    }

    #[test]
    fn test_bad_magic_is_unknown_regardless_of_rest() {
        let mut frame = Packet::from_payload(&[1, 2, 3]).frame().to_vec();
        frame[0] = 0xff;
        assert!(matches!(decode(&frame), Err(FrameError::BadMagic)));

        // Even with a consistent header otherwise.
        let mut ka = DPD_FRAME;
        ka[3] = 0x00;
        assert!(matches!(decode(&ka), Err(FrameError::BadMagic)));
    }

    #[test]
    fn test_length_mismatch_discards() {
        let mut frame = Packet::from_payload(&[1, 2, 3, 4]).frame().to_vec();
        // Header claims 100 payload bytes but only 4 follow.
        frame[6..8].copy_from_slice(&100u16.to_be_bytes());
        match decode(&frame) {
            Err(FrameError::LengthMismatch { expected, actual }) => {
                assert_eq!(expected, 116);
                assert_eq!(actual, 20);
            }
            other => panic!("unexpected: {:?}", other),
        }
    }

    #[test]
    fn test_truncated_header() {
        assert!(matches!(
            decode(&[0x1a, 0x2b, 0x3c]),
            Err(FrameError::TooShort(3))
        ));
    }

    #[test]
    fn test_unknown_ethertype_fatal() {
        let mut frame = DPD_FRAME.to_vec();
        frame[4..6].copy_from_slice(&0x86ddu16.to_be_bytes()); // IPv6 not carried
        assert!(matches!(
            decode(&frame),
            Err(FrameError::UnknownEthertype(0x86dd))
        ));
    }

    #[test]
    fn test_dpd_frame_decodes_against_itself() {
        // The static probe frame must satisfy our own decoder.
        let pkt = Packet::from_payload(&[]);
        assert_eq!(pkt.frame().len(), HEADER_SIZE);
        assert_eq!(&DPD_FRAME[0..4], &pkt.frame()[0..4]);
    }
}
