//! # VESC UART Protocol Module
//!
//! Implementation of the VESC serial protocol spoken by the motor controller.
//!
//! This module handles:
//! - Frame packing with short/long length markers and terminator
//! - CRC16-XMODEM checksum calculation
//! - Stream decoding with a parse cursor kept across polls
//! - SET_DUTY / SET_CURRENT / SET_CURRENT_BRAKE command payloads
//! - GET_VALUES telemetry decoding

pub mod protocol;
pub mod encoder;
pub mod decoder;
pub mod crc;
