//! # Ramp Interlock
//!
//! Startup gate that keeps the receiver silent until the throttle has rested
//! near center for a continuous window. A transmitter booting with a deflected
//! or noisy stick therefore cannot command a large instantaneous current.
//!
//! Only samples from a fresh link count: the supervisor's startup and stale
//! intents are centered by construction and say nothing about the stick.
//!
//! Once released the interlock stays released; link loss is handled by the
//! supervisor forcing neutral, not by re-arming this gate.

use std::time::{Duration, Instant};

use tracing::info;

use crate::link::intent::RemoteIntent;

/// Default time the throttle must rest centered before output is enabled
pub const DEFAULT_WAIT_FOR_SEND: Duration = Duration::from_millis(2000);

/// Default margin beyond the deadband still counted as centered
pub const DEFAULT_CENTER_BAND: u8 = 10;

/// Startup centering gate
#[derive(Debug, Clone)]
pub struct RampInterlock {
    wait_for_send: Duration,
    center_band: u8,
    centered_since: Option<Instant>,
    released: bool,
}

impl Default for RampInterlock {
    fn default() -> Self {
        Self::new(DEFAULT_WAIT_FOR_SEND, DEFAULT_CENTER_BAND)
    }
}

impl RampInterlock {
    /// Creates a closed interlock.
    #[must_use]
    pub fn new(wait_for_send: Duration, center_band: u8) -> Self {
        Self {
            wait_for_send,
            center_band,
            centered_since: None,
            released: false,
        }
    }

    /// Whether the intent's throttle counts as centered.
    ///
    /// Centered means `|throttle| - deadband < center_band`.
    pub fn is_centered(&self, intent: &RemoteIntent) -> bool {
        let magnitude = (intent.throttle as i16).abs();
        magnitude - (intent.deadband as i16) < self.center_band as i16
    }

    /// Feeds one sample and reports whether output may be sent.
    ///
    /// Any off-center or stale sample restarts the window.
    pub fn update(&mut self, intent: &RemoteIntent, link_fresh: bool, now: Instant) -> bool {
        if self.released {
            return true;
        }

        if !link_fresh || !self.is_centered(intent) {
            self.centered_since = None;
            return false;
        }

        let since = *self.centered_since.get_or_insert(now);
        if now.saturating_duration_since(since) > self.wait_for_send {
            self.released = true;
            info!(
                "Throttle centered for {} ms, enabling motor output",
                self.wait_for_send.as_millis()
            );
        }

        self.released
    }

    /// Whether output has been enabled.
    pub fn is_released(&self) -> bool {
        self.released
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn ms(value: u64) -> Duration {
        Duration::from_millis(value)
    }

    fn with_throttle(throttle: i8) -> RemoteIntent {
        RemoteIntent {
            throttle,
            cruise: false,
            deadband: 5,
            amp_fwd: 40,
            amp_break: 100,
        }
    }

    #[test]
    fn test_centered_band() {
        let interlock = RampInterlock::default();
        assert!(interlock.is_centered(&with_throttle(0)));
        assert!(interlock.is_centered(&with_throttle(14)));
        assert!(interlock.is_centered(&with_throttle(-14)));
        assert!(!interlock.is_centered(&with_throttle(15)));
        assert!(!interlock.is_centered(&with_throttle(-128)));
    }

    #[test]
    fn test_startup_deadband_counts_as_centered() {
        let interlock = RampInterlock::default();
        assert!(interlock.is_centered(&RemoteIntent::default()));
    }

    #[test]
    fn test_releases_after_continuous_window() {
        let mut interlock = RampInterlock::new(ms(2000), 10);
        let t0 = Instant::now();

        assert!(!interlock.update(&with_throttle(0), true, t0));
        assert!(!interlock.update(&with_throttle(2), true, t0 + ms(1000)));
        assert!(!interlock.update(&with_throttle(0), true, t0 + ms(2000)));
        assert!(interlock.update(&with_throttle(0), true, t0 + ms(2001)));
        assert!(interlock.is_released());
    }

    #[test]
    fn test_off_center_sample_restarts_window() {
        let mut interlock = RampInterlock::new(ms(2000), 10);
        let t0 = Instant::now();

        interlock.update(&with_throttle(0), true, t0);
        interlock.update(&with_throttle(100), true, t0 + ms(1500));
        assert!(!interlock.update(&with_throttle(0), true, t0 + ms(2500)));
        assert!(!interlock.update(&with_throttle(0), true, t0 + ms(4500)));
        assert!(interlock.update(&with_throttle(0), true, t0 + ms(4501)));
    }

    #[test]
    fn test_never_releases_while_deflected() {
        let mut interlock = RampInterlock::new(ms(2000), 10);
        let t0 = Instant::now();

        for step in 0..100 {
            assert!(!interlock.update(&with_throttle(90), true, t0 + ms(step * 100)));
        }
    }

    #[test]
    fn test_stale_samples_never_release() {
        let mut interlock = RampInterlock::new(ms(2000), 10);
        let t0 = Instant::now();

        // Startup intent is centered, but nobody is transmitting
        for step in 0..40 {
            assert!(!interlock.update(&RemoteIntent::default(), false, t0 + ms(step * 100)));
        }

        // The window starts with the first fresh sample
        assert!(!interlock.update(&with_throttle(0), true, t0 + ms(4000)));
        assert!(!interlock.update(&with_throttle(0), true, t0 + ms(6000)));
        assert!(interlock.update(&with_throttle(0), true, t0 + ms(6001)));
    }

    #[test]
    fn test_stale_sample_restarts_window() {
        let mut interlock = RampInterlock::new(ms(2000), 10);
        let t0 = Instant::now();

        interlock.update(&with_throttle(0), true, t0);
        interlock.update(&with_throttle(0), false, t0 + ms(1500));
        assert!(!interlock.update(&with_throttle(0), true, t0 + ms(2500)));
        assert!(interlock.update(&with_throttle(0), true, t0 + ms(4501)));
    }

    #[test]
    fn test_stays_released() {
        let mut interlock = RampInterlock::new(ms(10), 10);
        let t0 = Instant::now();
        interlock.update(&with_throttle(0), true, t0);
        interlock.update(&with_throttle(0), true, t0 + ms(11));

        assert!(interlock.update(&with_throttle(127), true, t0 + ms(20)));
    }
}
