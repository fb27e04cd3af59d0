//! # Control Module
//!
//! Turns the supervised remote intent and the latest controller telemetry into
//! motor commands.
//!
//! This module handles:
//! - The startup ramp interlock
//! - Cruise latching on measured duty
//! - Throttle and brake current scaling with safety clamps

pub mod arbiter;
pub mod interlock;
