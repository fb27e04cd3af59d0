//! # Link Supervisor
//!
//! Tracks how recently the transmitter was heard from and forces a neutral
//! intent once the radio link goes quiet.
//!
//! [`LinkSupervisor::tick`] must run every control cycle whether or not a
//! radio message arrived, so a transmitter that dies silently cannot leave a
//! non-zero throttle asserted.

use std::time::{Duration, Instant};

use tracing::{debug, info, warn};

use super::intent::RemoteIntent;

/// Default radio silence tolerated before failsafe
pub const DEFAULT_LINK_TIMEOUT: Duration = Duration::from_millis(100);

/// Recency of the last radio message
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LinkState {
    /// When the last valid message arrived, `None` before the first one
    pub last_received: Option<Instant>,

    /// Whether the last tick found the link within its timeout
    pub is_fresh: bool,
}

/// Freshness gate between the radio and the output arbiter
///
/// # Examples
///
/// ```
/// use std::time::{Duration, Instant};
/// use emtb_remote::link::intent::RemoteIntent;
/// use emtb_remote::link::supervisor::LinkSupervisor;
///
/// let mut supervisor = LinkSupervisor::new(Duration::from_millis(100));
/// let t0 = Instant::now();
/// let intent = RemoteIntent { throttle: 50, cruise: false, deadband: 5, amp_fwd: 20, amp_break: 50 };
///
/// supervisor.on_receive(intent, t0);
/// assert_eq!(supervisor.tick(t0 + Duration::from_millis(50)), intent);
/// assert_eq!(supervisor.tick(t0 + Duration::from_millis(150)).throttle, 0);
/// ```
#[derive(Debug, Clone)]
pub struct LinkSupervisor {
    timeout: Duration,
    intent: RemoteIntent,
    state: LinkState,
    messages: u64,
    dropped: u64,
    link_losses: u64,
}

impl Default for LinkSupervisor {
    fn default() -> Self {
        Self::new(DEFAULT_LINK_TIMEOUT)
    }
}

impl LinkSupervisor {
    /// Creates a supervisor that has not yet heard from the transmitter.
    #[must_use]
    pub fn new(timeout: Duration) -> Self {
        Self {
            timeout,
            intent: RemoteIntent::default(),
            state: LinkState {
                last_received: None,
                is_fresh: false,
            },
            messages: 0,
            dropped: 0,
            link_losses: 0,
        }
    }

    /// Stores a freshly received intent.
    pub fn on_receive(&mut self, intent: RemoteIntent, now: Instant) {
        if !self.state.is_fresh && self.state.last_received.is_some() {
            info!("Radio link restored after {} losses", self.link_losses);
        }

        self.intent = intent;
        self.state.last_received = Some(now);
        self.state.is_fresh = true;
        self.messages += 1;
    }

    /// Parses and stores a raw radio payload.
    ///
    /// Malformed payloads are dropped and do not refresh the link.
    pub fn on_receive_bytes(&mut self, payload: &[u8], now: Instant) -> bool {
        match RemoteIntent::from_bytes(payload) {
            Some(intent) => {
                self.on_receive(intent, now);
                true
            }
            None => {
                debug!("Dropping radio payload of {} bytes", payload.len());
                self.dropped += 1;
                false
            }
        }
    }

    /// Supervises the link and returns the intent to act on.
    ///
    /// Past the timeout the stored intent is overwritten with its neutral
    /// form (throttle 0, cruise off, limits kept).
    pub fn tick(&mut self, now: Instant) -> RemoteIntent {
        let stale = match self.state.last_received {
            Some(last) => now.saturating_duration_since(last) > self.timeout,
            None => true,
        };

        if stale {
            if self.state.is_fresh {
                self.link_losses += 1;
                warn!(
                    "Radio link lost (no message for over {} ms), forcing neutral",
                    self.timeout.as_millis()
                );
            }
            self.state.is_fresh = false;
            self.intent = self.intent.neutral();
        }

        self.intent
    }

    /// Current link state.
    pub fn state(&self) -> LinkState {
        self.state
    }

    /// Whether the last tick found the link fresh.
    pub fn is_fresh(&self) -> bool {
        self.state.is_fresh
    }

    /// Configured timeout window.
    pub fn timeout(&self) -> Duration {
        self.timeout
    }

    /// Valid messages received so far.
    pub fn messages(&self) -> u64 {
        self.messages
    }

    /// Malformed payloads dropped so far.
    pub fn dropped(&self) -> u64 {
        self.dropped
    }

    /// Fresh-to-stale transitions so far.
    pub fn link_losses(&self) -> u64 {
        self.link_losses
    }
}
