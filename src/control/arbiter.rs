//! # Output Arbiter
//!
//! Decides, once per control tick, which commands reach the motor controller.
//!
//! ## Modes
//!
//! | Mode | Entered when | Emits |
//! |------|--------------|-------|
//! | `Idle` | ramp interlock still closed (needs a fresh link) | nothing |
//! | `Neutral` | link stale | SET_CURRENT 0 and SET_CURRENT_BRAKE 0 |
//! | `CurrentControl` | cruise off | SET_CURRENT, SET_CURRENT_BRAKE, or both at 0 inside the deadband |
//! | `CruiseDuty` | cruise on | one SET_DUTY when the measured duty is latched, then nothing |
//!
//! ## Current scaling
//!
//! - forward: `throttle / 127 * amp_fwd * 0.5 A`
//! - brake: `|throttle| / 127 * amp_break * 0.1 A`
//!
//! Both are clamped to the transmitter's limit and to the configured maxima.

use std::time::{Duration, Instant};

use serde::Serialize;
use tracing::{debug, info};

use super::interlock::RampInterlock;
use crate::config::ControlConfig;
use crate::link::intent::{RemoteIntent, THROTTLE_FULL_SCALE};
use crate::vesc::encoder::MotorCommand;
use crate::vesc::protocol::TelemetrySnapshot;

/// Output mode chosen on the last tick
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum OutputMode {
    /// Ramp interlock not yet satisfied
    Idle,
    /// Cruise engaged; `latched` holds the duty once it has been sampled
    CruiseDuty {
        /// Duty sent with SET_DUTY, `None` while waiting for a usable sample
        latched: Option<f32>,
    },
    /// Throttle or brake current
    CurrentControl,
    /// Link stale, both directions zeroed
    Neutral,
}

/// Safety bounds applied before encoding
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ArbiterLimits {
    /// Smallest measured duty that may be latched for cruise
    pub cruise_min_duty: f32,
    /// Largest duty ever sent
    pub max_duty: f32,
    /// Largest forward current ever sent, A
    pub max_current_amps: f32,
    /// Largest brake current ever sent, A
    pub max_brake_amps: f32,
}

impl Default for ArbiterLimits {
    fn default() -> Self {
        Self {
            cruise_min_duty: 0.05,
            max_duty: 0.95,
            max_current_amps: 127.5,
            max_brake_amps: 25.5,
        }
    }
}

/// Command arbitration state machine
#[derive(Debug, Clone)]
pub struct OutputArbiter {
    interlock: RampInterlock,
    limits: ArbiterLimits,
    mode: OutputMode,
    latched_duty: Option<f32>,
}

impl Default for OutputArbiter {
    fn default() -> Self {
        Self::new(RampInterlock::default(), ArbiterLimits::default())
    }
}

impl OutputArbiter {
    /// Creates an arbiter in `Idle`.
    #[must_use]
    pub fn new(interlock: RampInterlock, limits: ArbiterLimits) -> Self {
        Self {
            interlock,
            limits,
            mode: OutputMode::Idle,
            latched_duty: None,
        }
    }

    /// Builds an arbiter from the `[control]` configuration section.
    #[must_use]
    pub fn from_config(config: &ControlConfig) -> Self {
        Self::new(
            RampInterlock::new(Duration::from_millis(config.wait_for_send_ms), config.center_band),
            ArbiterLimits {
                cruise_min_duty: config.cruise_min_duty,
                max_duty: config.max_duty,
                max_current_amps: config.max_current_amps,
                max_brake_amps: config.max_brake_amps,
            },
        )
    }

    /// Mode chosen on the last tick.
    pub fn mode(&self) -> OutputMode {
        self.mode
    }

    /// Whether the ramp interlock has released output.
    pub fn output_enabled(&self) -> bool {
        self.interlock.is_released()
    }

    /// Runs one arbitration step.
    ///
    /// # Arguments
    ///
    /// * `now` - Tick time
    /// * `intent` - Supervised intent (already neutral when stale)
    /// * `link_fresh` - Whether the supervisor considers the link fresh
    /// * `telemetry` - Most recent snapshot from the controller, if any
    ///
    /// # Returns
    ///
    /// Commands to encode and send this tick, possibly none.
    pub fn tick(
        &mut self,
        now: Instant,
        intent: &RemoteIntent,
        link_fresh: bool,
        telemetry: Option<&TelemetrySnapshot>,
    ) -> Vec<MotorCommand> {
        if !self.interlock.update(intent, link_fresh, now) {
            self.mode = OutputMode::Idle;
            return Vec::new();
        }

        if !link_fresh {
            if self.latched_duty.take().is_some() {
                info!("Cruise dropped on stale link");
            }
            self.mode = OutputMode::Neutral;
            return neutral_commands();
        }

        if intent.cruise {
            return self.cruise(telemetry);
        }

        if self.latched_duty.take().is_some() {
            info!("Cruise released");
        }
        self.mode = OutputMode::CurrentControl;
        self.current_commands(intent)
    }

    fn cruise(&mut self, telemetry: Option<&TelemetrySnapshot>) -> Vec<MotorCommand> {
        if let Some(duty) = self.latched_duty {
            self.mode = OutputMode::CruiseDuty { latched: Some(duty) };
            return Vec::new();
        }

        match telemetry.map(|snapshot| snapshot.duty_now) {
            Some(duty) if duty >= self.limits.cruise_min_duty => {
                let duty = duty.min(self.limits.max_duty);
                info!("Cruise engaged, holding duty {:.3}", duty);
                self.latched_duty = Some(duty);
                self.mode = OutputMode::CruiseDuty { latched: Some(duty) };
                vec![MotorCommand::SetDuty(duty)]
            }
            measured => {
                debug!("Cruise requested, measured duty {:?} below threshold", measured);
                self.mode = OutputMode::CruiseDuty { latched: None };
                Vec::new()
            }
        }
    }

    fn current_commands(&self, intent: &RemoteIntent) -> Vec<MotorCommand> {
        let throttle = intent.throttle as i16;
        let deadband = intent.deadband as i16;

        if throttle > deadband {
            let limit = intent.forward_limit_amps().min(self.limits.max_current_amps);
            let amps = throttle as f32 / THROTTLE_FULL_SCALE * intent.forward_limit_amps();
            vec![MotorCommand::SetCurrent(amps.clamp(0.0, limit))]
        } else if throttle < -deadband {
            let limit = intent.brake_limit_amps().min(self.limits.max_brake_amps);
            let amps = -throttle as f32 / THROTTLE_FULL_SCALE * intent.brake_limit_amps();
            vec![MotorCommand::SetCurrentBrake(amps.clamp(0.0, limit))]
        } else {
            neutral_commands()
        }
    }
}

/// Zero current in both directions, so neither setpoint stays latched.
pub fn neutral_commands() -> Vec<MotorCommand> {
    vec![MotorCommand::SetCurrent(0.0), MotorCommand::SetCurrentBrake(0.0)]
}
