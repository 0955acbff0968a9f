//! Keepalive, DPD and rekey scheduling.
//!
//! The mainloop is re-entrant and owns no clock of its own; each pass
//! it asks this module what is due right now and how long the caller
//! may sleep before something becomes due.

use crate::config::{ConnectionState, RekeyMethod};
use std::time::{Duration, Instant};

/// What the mainloop should do this pass.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum KaAction {
    /// Nothing due; the caller may sleep for the returned timeout.
    None,
    /// Send a keepalive probe (nothing transmitted for a full interval).
    Keepalive,
    /// Send a DPD probe (nothing received for a full interval).
    Dpd,
    /// Two DPD intervals with no inbound traffic; the peer is dead.
    DpdDead,
    /// The rekey interval has elapsed; re-establish the tunnel.
    Rekey,
}

/// Monotonic activity timestamps maintained by the session.
#[derive(Debug, Clone, Copy)]
pub struct Timestamps {
    /// When the tunnel was last (re-)established.
    pub last_rekey: Instant,
    /// Last time any frame arrived from the gateway.
    pub last_rx: Instant,
    /// Last time a transmit was attempted.
    pub last_tx: Instant,
}

impl Timestamps {
    pub fn fresh(now: Instant) -> Self {
        Self {
            last_rekey: now,
            last_rx: now,
            last_tx: now,
        }
    }
}

/// Pick the most urgent due action, lowering `timeout` to the soonest
/// upcoming deadline when nothing is due yet.
///
/// Priority when several deadlines have passed: rekey, then dead-peer
/// detection, then the DPD probe, then keepalive. DPD deadlines run
/// off last receipt; keepalive runs off last transmit.
pub fn keepalive_action(
    state: &ConnectionState,
    times: &Timestamps,
    now: Instant,
    timeout: &mut Duration,
) -> KaAction {
    if let RekeyMethod::Tunnel { interval } = state.rekey {
        match deadline(times.last_rekey, interval, now) {
            Due::Now => return KaAction::Rekey,
            Due::In(wait) => lower(timeout, wait),
        }
    }

    if !state.dpd_interval.is_zero() {
        if let Due::Now = deadline(times.last_rx, state.dpd_interval * 2, now) {
            return KaAction::DpdDead;
        }
        match deadline(times.last_rx, state.dpd_interval, now) {
            Due::Now => return KaAction::Dpd,
            Due::In(wait) => lower(timeout, wait),
        }
    }

    if !state.keepalive_interval.is_zero() {
        match deadline(times.last_tx, state.keepalive_interval, now) {
            Due::Now => return KaAction::Keepalive,
            Due::In(wait) => lower(timeout, wait),
        }
    }

    KaAction::None
}

/// Decide what to do when the transport write side has stalled.
/// Keepalive and DPD probes are pointless on a stalled stream, so only
/// the terminal conditions are reported; `timeout` is still lowered to
/// the soonest of them so the caller wakes up in time to act.
pub fn stalled_action(
    state: &ConnectionState,
    times: &Timestamps,
    now: Instant,
    timeout: &mut Duration,
) -> KaAction {
    if !state.dpd_interval.is_zero() {
        match deadline(times.last_rx, state.dpd_interval * 2, now) {
            Due::Now => return KaAction::DpdDead,
            Due::In(wait) => lower(timeout, wait),
        }
    }
    if let RekeyMethod::Tunnel { interval } = state.rekey {
        match deadline(times.last_rekey, interval, now) {
            Due::Now => return KaAction::Rekey,
            Due::In(wait) => lower(timeout, wait),
        }
    }
    KaAction::None
}

enum Due {
    Now,
    In(Duration),
}

fn deadline(since: Instant, interval: Duration, now: Instant) -> Due {
    let due_at = since + interval;
    if now >= due_at {
        Due::Now
    } else {
        Due::In(due_at - now)
    }
}

fn lower(timeout: &mut Duration, wait: Duration) {
    if wait < *timeout {
        *timeout = wait;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn state(dpd: u64, ka: u64, rekey: Option<u64>) -> ConnectionState {
        ConnectionState {
            dpd_interval: Duration::from_secs(dpd),
            keepalive_interval: Duration::from_secs(ka),
            rekey: match rekey {
                Some(secs) => RekeyMethod::Tunnel {
                    interval: Duration::from_secs(secs),
                },
                None => RekeyMethod::None,
            },
            ..Default::default()
        }
    }

    #[test]
    fn test_nothing_due_lowers_timeout() {
        let now = Instant::now();
        let times = Timestamps::fresh(now);
        let mut timeout = Duration::from_secs(60);
        let action = keepalive_action(&state(10, 10, Some(3540)), &times, now, &mut timeout);
        assert_eq!(action, KaAction::None);
        // Soonest deadline is the 10s DPD/keepalive pair.
        assert_eq!(timeout, Duration::from_secs(10));
    }

    #[test]
    fn test_dpd_due_after_quiet_receive_side() {
        let now = Instant::now();
        let mut times = Timestamps::fresh(now);
        times.last_rx = now - Duration::from_secs(11);
        let mut timeout = Duration::from_secs(60);
        assert_eq!(
            keepalive_action(&state(10, 10, None), &times, now, &mut timeout),
            KaAction::Dpd
        );
    }

    #[test]
    fn test_dpd_dead_after_two_intervals() {
        let now = Instant::now();
        let mut times = Timestamps::fresh(now);
        times.last_rx = now - Duration::from_secs(21);
        let mut timeout = Duration::from_secs(60);
        assert_eq!(
            keepalive_action(&state(10, 10, None), &times, now, &mut timeout),
            KaAction::DpdDead
        );
    }

    #[test]
    fn test_keepalive_runs_off_transmit_side() {
        let now = Instant::now();
        let mut times = Timestamps::fresh(now);
        times.last_tx = now - Duration::from_secs(11);
        // Receive side is fresh, so DPD is not due.
        let mut timeout = Duration::from_secs(60);
        assert_eq!(
            keepalive_action(&state(10, 10, None), &times, now, &mut timeout),
            KaAction::Keepalive
        );
    }

    #[test]
    fn test_rekey_takes_priority() {
        let now = Instant::now();
        let mut times = Timestamps::fresh(now);
        times.last_rekey = now - Duration::from_secs(4000);
        times.last_rx = now - Duration::from_secs(30);
        let mut timeout = Duration::from_secs(60);
        assert_eq!(
            keepalive_action(&state(10, 10, Some(3540)), &times, now, &mut timeout),
            KaAction::Rekey
        );
    }

    #[test]
    fn test_disabled_timers_never_fire() {
        let now = Instant::now();
        let mut times = Timestamps::fresh(now);
        times.last_rx = now - Duration::from_secs(3600);
        times.last_tx = now - Duration::from_secs(3600);
        let mut timeout = Duration::from_secs(60);
        assert_eq!(
            keepalive_action(&state(0, 0, None), &times, now, &mut timeout),
            KaAction::None
        );
        assert_eq!(timeout, Duration::from_secs(60));
    }

    #[test]
    fn test_stalled_ignores_probes() {
        let now = Instant::now();
        let mut times = Timestamps::fresh(now);
        times.last_rx = now - Duration::from_secs(11);
        // A due DPD probe is not actionable on a stalled stream.
        let mut timeout = Duration::from_secs(60);
        assert_eq!(
            stalled_action(&state(10, 10, None), &times, now, &mut timeout),
            KaAction::None
        );

        times.last_rx = now - Duration::from_secs(25);
        assert_eq!(
            stalled_action(&state(10, 10, None), &times, now, &mut timeout),
            KaAction::DpdDead
        );
    }

    #[test]
    fn test_stalled_still_lowers_timeout() {
        let now = Instant::now();
        let mut times = Timestamps::fresh(now);
        times.last_rx = now - Duration::from_secs(11);
        let mut timeout = Duration::from_secs(60);
        stalled_action(&state(10, 10, None), &times, now, &mut timeout);
        // Dead-peer deadline is 2 * 10s after last receipt.
        assert_eq!(timeout, Duration::from_secs(9));
    }

    #[test]
    fn test_stalled_rekey_still_reported() {
        let now = Instant::now();
        let mut times = Timestamps::fresh(now);
        times.last_rekey = now - Duration::from_secs(4000);
        let mut timeout = Duration::from_secs(60);
        assert_eq!(
            stalled_action(&state(10, 10, Some(3540)), &times, now, &mut timeout),
            KaAction::Rekey
        );
    }
}
