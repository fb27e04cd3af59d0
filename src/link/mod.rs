//! # Radio Link Module
//!
//! Remote intent wire format and radio link supervision.
//!
//! This module handles:
//! - The 5-byte intent layout sent by the transmitter
//! - Recency tracking of received intents
//! - Failsafe: neutral throttle and cruise once the link goes stale

pub mod intent;
pub mod supervisor;
