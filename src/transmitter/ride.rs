//! Speed, distance and ride time derived from controller telemetry.

use std::f32::consts::PI;
use std::time::{Duration, Instant};

use crate::config::RideConfig;

/// Drivetrain geometry converting motor readings into ride figures
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct RideMetrics {
    wheel_diameter_mm: f32,
    gear_ratio: f32,
    motor_poles: u32,
    distance_correction: f32,
}

impl Default for RideMetrics {
    fn default() -> Self {
        Self::from_config(&RideConfig::default())
    }
}

impl RideMetrics {
    pub fn from_config(config: &RideConfig) -> Self {
        Self {
            wheel_diameter_mm: config.wheel_diameter_mm,
            gear_ratio: config.gear_ratio,
            motor_poles: config.motor_poles,
            distance_correction: config.distance_correction,
        }
    }

    /// Ground speed in km/h from electrical RPM.
    pub fn speed_kmh(&self, erpm: i32) -> f32 {
        let pole_pairs = (self.motor_poles / 2) as f32;
        erpm as f32 * self.wheel_diameter_mm * PI * 60.0 / (pole_pairs * self.gear_ratio * 1_000_000.0)
    }

    /// Distance in km from absolute tachometer pulses.
    ///
    /// The controller counts `poles * 3` pulses per motor revolution.
    pub fn distance_km(&self, tachometer_abs: i32) -> f32 {
        let pulses_per_rev = (self.motor_poles * 3) as f32;
        tachometer_abs as f32 * self.wheel_diameter_mm * PI
            / (pulses_per_rev * self.gear_ratio * 1_000_000.0)
            * self.distance_correction
    }
}

/// Elapsed ride time, resettable by the rider
#[derive(Debug, Clone, Copy)]
pub struct RideTimer {
    started: Instant,
}

impl RideTimer {
    pub fn new(now: Instant) -> Self {
        Self { started: now }
    }

    pub fn reset(&mut self, now: Instant) {
        self.started = now;
    }

    pub fn elapsed(&self, now: Instant) -> Duration {
        now.saturating_duration_since(self.started)
    }
}
