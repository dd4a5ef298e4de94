//! RTT estimation and keep-alive, both built on tagged PING
//! round trips.
//!
//! A negative payload (interpreted as a big-endian i64) is an RTT probe;
//! its reply updates `rtt`. A non-negative, monotonically increasing
//! payload is a keep-alive tag; its reply clears the "waiting for pong"
//! state so the idle timer can be re-armed.

use std::time::{Duration, Instant};

use crate::frame::ping::Payload;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum KeepAlivePolicy {
    /// Send keep-alive pings even on an otherwise-idle connection.
    Always,
    /// Only ping while at least one stream is open.
    WithActiveRequests,
    Disabled,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum KeepAliveState {
    Idle,
    PingSent,
}

pub struct KeepAlive {
    policy: KeepAlivePolicy,
    ping_delay: Duration,
    ping_timeout: Duration,
    state: KeepAliveState,
    next_tag: u64,
    sent_at: Option<Instant>,
    rtt: Option<Duration>,
    /// When the connection was last known to be active — the last inbound
    /// frame, or the last pong. `should_ping` only fires once this is more
    /// than `ping_delay` in the past.
    idle_since: Instant,
    /// Counts down from -1 so every RTT-probe tag is distinct from, and
    /// distinguishable from, the non-negative tags `send_keepalive` hands
    /// out.
    next_rtt_tag: i64,
}

impl KeepAlive {
    pub fn new(policy: KeepAlivePolicy, ping_delay: Duration, ping_timeout: Duration) -> KeepAlive {
        KeepAlive {
            policy,
            ping_delay,
            ping_timeout,
            state: KeepAliveState::Idle,
            next_tag: 0,
            sent_at: None,
            rtt: None,
            idle_since: Instant::now(),
            next_rtt_tag: -1,
        }
    }

    pub fn rtt(&self) -> Option<Duration> {
        self.rtt
    }

    /// Records any evidence the connection is alive (an inbound frame, a
    /// pong) so the idle clock `should_ping` measures against restarts.
    pub fn note_activity(&mut self, now: Instant) {
        self.idle_since = now;
    }

    pub fn should_ping(&self, has_active_streams: bool, now: Instant) -> bool {
        let idle_long_enough = now.saturating_duration_since(self.idle_since) >= self.ping_delay;
        match self.policy {
            KeepAlivePolicy::Disabled => false,
            KeepAlivePolicy::Always => self.state == KeepAliveState::Idle && idle_long_enough,
            KeepAlivePolicy::WithActiveRequests => {
                has_active_streams && self.state == KeepAliveState::Idle && idle_long_enough
            }
        }
    }

    pub fn ping_delay(&self) -> Duration {
        self.ping_delay
    }

    pub fn ping_timeout(&self) -> Duration {
        self.ping_timeout
    }

    /// Builds the next keep-alive tag and transitions to `PingSent`.
    pub fn send_keepalive(&mut self, now: Instant) -> Payload {
        let tag = self.next_tag;
        self.next_tag = self.next_tag.wrapping_add(1);
        self.state = KeepAliveState::PingSent;
        self.sent_at = Some(now);
        (tag as i64).to_be_bytes()
    }

    /// Hands back the next RTT-probe tag (always negative) without
    /// touching keep-alive state — RTT probes can run concurrently with a
    /// pending keep-alive ping, and the caller tracks its own send time.
    pub fn next_rtt_tag(&mut self) -> i64 {
        let tag = self.next_rtt_tag;
        self.next_rtt_tag -= 1;
        tag
    }

    /// Call when a PING ACK arrives. `sent_at` is the probe's own send
    /// time, recovered by the caller from whatever table it keeps of
    /// outstanding RTT probes; keep-alive pongs instead use the state
    /// recorded by `send_keepalive`.
    pub fn on_pong(&mut self, tag: i64, now: Instant) {
        if tag < 0 {
            return;
        }
        if self.state == KeepAliveState::PingSent {
            if let Some(sent_at) = self.sent_at.take() {
                self.rtt = Some(now.saturating_duration_since(sent_at));
            }
            self.state = KeepAliveState::Idle;
            self.idle_since = now;
        }
    }

    pub fn on_rtt_pong(&mut self, round_trip: Duration) {
        self.rtt = Some(round_trip);
    }

    pub fn is_timed_out(&self, now: Instant) -> bool {
        match (self.state, self.sent_at) {
            (KeepAliveState::PingSent, Some(sent_at)) => {
                now.saturating_duration_since(sent_at) >= self.ping_timeout
            }
            _ => false,
        }
    }
}
