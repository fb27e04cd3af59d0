//! # EMTB Remote Library
//!
//! Wireless throttle remote for VESC-driven boards and bikes.
//!
//! The receiver bridges remote intents arriving over a packet radio to VESC
//! serial commands, with a link failsafe, a startup ramp interlock and a cruise
//! latch; its telemetry goes back to the hand-held transmitter inside the
//! radio acknowledgements.

pub mod config;
pub mod control;
pub mod error;
pub mod link;
pub mod radio;
pub mod receiver;
pub mod serial;
pub mod telemetry;
pub mod transmitter;
pub mod vesc;
