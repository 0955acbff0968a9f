//! The GPST tunnel session and its re-entrant mainloop.
//!
//! [`GpstTunnel`] owns the packet queues, the activity timestamps and
//! the transport, and drives everything from a single non-blocking
//! [`GpstTunnel::mainloop`] pass: drain inbound frames, finish any
//! stalled transmit, fire due timers, then drain the outbound queue.
//! The caller wires the transport into its own readiness loop and
//! calls back in whenever the socket is readable or the returned
//! timeout expires.

use crate::config::{ConnectionState, SessionOptions, fetch_config};
use crate::error::GpstError;
use crate::handshake::connect_tunnel;
use crate::packet::{self, DPD_FRAME, Decoded, FrameError, HEADER_SIZE, Packet, hex_dump};
use crate::timers::{self, KaAction, Timestamps};
use crate::transport::{Connector, HttpClient, IoStatus, Transport};
use std::collections::VecDeque;
use std::time::{Duration, Instant};
use tracing::{debug, error, info, trace};

/// The frame currently being transmitted. At most one frame is in
/// flight at a time; a stalled write retries the exact same bytes on
/// the next pass. DPD probes have no payload to retain, so they get
/// their own variant instead of a queued packet.
enum InFlight {
    Data(Packet),
    Dpd,
}

impl InFlight {
    fn frame(&self) -> &[u8] {
        match self {
            InFlight::Data(pkt) => pkt.frame(),
            InFlight::Dpd => &DPD_FRAME[..],
        }
    }
}

enum FlushOutcome {
    /// The in-flight slot is empty again.
    Sent,
    /// The write made no progress; the frame stays in flight.
    Stalled,
    /// A transport failure forced a reconnect; the frame is gone.
    Reconnected,
}

/// A GlobalProtect SSL tunnel session.
pub struct GpstTunnel {
    http: Box<dyn HttpClient>,
    connector: Box<dyn Connector>,
    transport: Option<Box<dyn Transport>>,
    state: ConnectionState,
    opts: SessionOptions,
    cookie: String,
    incoming: VecDeque<Packet>,
    outgoing: VecDeque<Packet>,
    current: Option<InFlight>,
    times: Timestamps,
}

impl GpstTunnel {
    pub fn new(
        http: Box<dyn HttpClient>,
        connector: Box<dyn Connector>,
        cookie: impl Into<String>,
        opts: SessionOptions,
    ) -> Self {
        Self {
            http,
            connector,
            transport: None,
            state: ConnectionState::new(),
            opts,
            cookie: cookie.into(),
            incoming: VecDeque::new(),
            outgoing: VecDeque::new(),
            current: None,
            times: Timestamps::fresh(Instant::now()),
        }
    }

    /// The negotiated configuration (valid after [`setup`](Self::setup)).
    pub fn state(&self) -> &ConnectionState {
        &self.state
    }

    /// Queue an IPv4 packet for transmission on the next mainloop pass.
    pub fn queue_packet(&mut self, payload: &[u8]) {
        self.outgoing.push_back(Packet::from_payload(payload));
    }

    /// Take the next received packet, if any.
    pub fn pop_incoming(&mut self) -> Option<Packet> {
        self.incoming.pop_front()
    }

    /// Establish the session: open the transport, fetch the tunnel
    /// configuration, and run the GET-tunnel handshake.
    pub fn setup(&mut self) -> Result<(), GpstError> {
        self.establish()
    }

    /// One non-blocking pass over the session. Returns whether any
    /// inbound data packet was queued this pass; `timeout` is lowered
    /// to the soonest timer deadline so the caller knows how long it
    /// may sleep.
    pub fn mainloop(&mut self, timeout: &mut Duration) -> Result<bool, GpstError> {
        let mut work_done = false;

        if self.transport.is_none() {
            self.reconnect()?;
            return Ok(true);
        }

        // Inbound frames first. The read buffer allows for oversized
        // frames so a length mismatch is diagnosable rather than a
        // truncated read.
        loop {
            let receive_len = usize::max(2048, self.state.mtu as usize + 256) + HEADER_SIZE;
            let mut buf = vec![0u8; receive_len];
            let transport = match self.transport.as_deref_mut() {
                Some(t) => t,
                None => return Err(GpstError::Disconnected),
            };
            let n = match transport.read_nonblock(&mut buf) {
                Ok(IoStatus::Ready(n)) => n,
                Ok(IoStatus::WouldBlock) => break,
                Err(e) if e.is_interrupted() => return Err(e),
                Err(e) => {
                    error!("Tunnel read failed: {}", e);
                    self.reconnect()?;
                    return Ok(true);
                }
            };

            if n < HEADER_SIZE {
                error!("Short packet received ({} bytes)", n);
                return Err(GpstError::ShortFrame(n));
            }

            match packet::decode(&buf[..n]) {
                Ok(Decoded::Keepalive) => {
                    self.times.last_rx = Instant::now();
                    debug!("Got GPST DPD/keepalive response");
                }
                Ok(Decoded::Data(pkt)) => {
                    self.times.last_rx = Instant::now();
                    trace!("Received data packet of {} bytes", pkt.payload_len());
                    self.incoming.push_back(pkt);
                    work_done = true;
                }
                Err(FrameError::LengthMismatch { expected, actual }) => {
                    // Drop the frame; the stream itself is still
                    // aligned because each read yields one frame.
                    error!(
                        "Unexpected packet length: read {} bytes but header declares {}. Header: {}",
                        actual,
                        expected,
                        hex_dump(&buf[..HEADER_SIZE])
                    );
                }
                Err(e) => {
                    error!(
                        "Unknown packet ({}). Header dump follows: {}",
                        e,
                        hex_dump(&buf[..HEADER_SIZE])
                    );
                    return Err(GpstError::UnknownFrame);
                }
            }
        }

        // Retry a frame left in flight by an earlier stalled write.
        if self.current.is_some() {
            match self.flush_or_recover()? {
                FlushOutcome::Sent => {}
                FlushOutcome::Reconnected => return Ok(true),
                FlushOutcome::Stalled => {
                    return self.handle_stall(timeout, work_done);
                }
            }
        }

        match timers::keepalive_action(&self.state, &self.times, Instant::now(), timeout) {
            KaAction::None => {}
            KaAction::Rekey => {
                info!("GlobalProtect rekey due");
                self.reconnect()?;
                return Ok(true);
            }
            KaAction::DpdDead => {
                error!("GPST Dead Peer Detection detected dead peer!");
                self.reconnect()?;
                return Ok(true);
            }
            KaAction::Keepalive if !self.outgoing.is_empty() => {
                // Pending data is about to go out; it counts.
            }
            KaAction::Keepalive | KaAction::Dpd => {
                debug!("Send GPST DPD/keepalive request");
                self.current = Some(InFlight::Dpd);
                match self.flush_or_recover()? {
                    FlushOutcome::Sent => {}
                    FlushOutcome::Reconnected => return Ok(true),
                    FlushOutcome::Stalled => return self.handle_stall(timeout, work_done),
                }
            }
        }

        // Drain the outbound queue until the write side stalls.
        while self.current.is_none() {
            let Some(pkt) = self.outgoing.pop_front() else {
                break;
            };
            trace!("Sending data packet of {} bytes", pkt.payload_len());
            self.current = Some(InFlight::Data(pkt));
            match self.flush_or_recover()? {
                FlushOutcome::Sent => {}
                FlushOutcome::Reconnected => return Ok(true),
                FlushOutcome::Stalled => return self.handle_stall(timeout, work_done),
            }
        }

        Ok(work_done)
    }

    /// A write stalled with a frame in flight. Probes cannot help a
    /// stream that will not accept bytes, so only the terminal timers
    /// are consulted; the caller's timeout is still lowered so it
    /// wakes up for them.
    fn handle_stall(&mut self, timeout: &mut Duration, work_done: bool) -> Result<bool, GpstError> {
        match timers::stalled_action(&self.state, &self.times, Instant::now(), timeout) {
            KaAction::Rekey => {
                info!("GlobalProtect rekey due");
                self.reconnect()?;
                Ok(true)
            }
            KaAction::DpdDead => {
                error!("GPST Dead Peer Detection detected dead peer!");
                self.reconnect()?;
                Ok(true)
            }
            _ => Ok(work_done),
        }
    }

    /// Attempt to transmit the in-flight frame, translating transport
    /// failures into a reconnect. Short writes and interruptions
    /// propagate untouched.
    fn flush_or_recover(&mut self) -> Result<FlushOutcome, GpstError> {
        match self.flush_current() {
            Ok(outcome) => Ok(outcome),
            Err(e) if e.is_interrupted() => Err(e),
            Err(GpstError::Transport(msg)) => {
                error!("Tunnel write failed: {}", msg);
                self.reconnect()?;
                Ok(FlushOutcome::Reconnected)
            }
            Err(e) => Err(e),
        }
    }

    fn flush_current(&mut self) -> Result<FlushOutcome, GpstError> {
        let frame: &[u8] = match &self.current {
            Some(inflight) => inflight.frame(),
            None => return Ok(FlushOutcome::Sent),
        };
        let wanted = frame.len();

        // Stamped before the attempt so a stalled stream does not
        // provoke a useless keepalive on top of the stall.
        self.times.last_tx = Instant::now();

        let transport = match self.transport.as_deref_mut() {
            Some(t) => t,
            None => return Err(GpstError::Disconnected),
        };
        match transport.write_nonblock(frame)? {
            IoStatus::WouldBlock => Ok(FlushOutcome::Stalled),
            IoStatus::Ready(n) if n == wanted => {
                self.current = None;
                Ok(FlushOutcome::Sent)
            }
            IoStatus::Ready(n) => Err(GpstError::ShortWrite { wanted, wrote: n }),
        }
    }

    /// Tear down and re-establish the tunnel. Whatever frame was in
    /// flight is lost with the old transport. Failures other than an
    /// interruption are wrapped so the caller can distinguish a failed
    /// recovery from a failed steady-state operation.
    fn reconnect(&mut self) -> Result<(), GpstError> {
        self.current = None;
        self.transport = None;
        match self.establish() {
            Ok(()) => Ok(()),
            Err(e) if e.is_interrupted() => Err(e),
            Err(e) => {
                error!("Reconnect failed: {}", e);
                Err(GpstError::ReconnectFailed(Box::new(e)))
            }
        }
    }

    fn establish(&mut self) -> Result<(), GpstError> {
        let mut transport = self.connector.connect()?;
        let hints = transport.segment_hints();
        let ipv6 = transport.peer_is_ipv6();
        fetch_config(
            self.http.as_mut(),
            &mut self.state,
            &self.cookie,
            &self.opts,
            hints,
            ipv6,
        )?;
        connect_tunnel(transport.as_mut(), &self.state.urlpath, &self.cookie)?;
        self.transport = Some(transport);
        self.times = Timestamps::fresh(Instant::now());
        Ok(())
    }
}
