//! # VESC Protocol Constants and Types
//!
//! Core protocol definitions for the VESC UART link.
//!
//! ## Frame layout
//!
//! ```text
//! short: [0x02][len:u8]      [payload..][crc_hi][crc_lo][0x03]
//! long:  [0x03][len_hi][len_lo][payload..][crc_hi][crc_lo][0x03]
//! ```
//!
//! The first payload byte is always the packet id.

use serde::{Deserialize, Serialize};

use crate::error::{FrameError, Result};

/// Start marker of a frame whose length fits one byte
pub const VESC_MARKER_SHORT: u8 = 0x02;

/// Start marker of a frame with a two-byte length
pub const VESC_MARKER_LONG: u8 = 0x03;

/// Fixed terminator closing every frame
pub const VESC_TERMINATOR: u8 = 0x03;

/// Framing overhead of a short frame: marker + len + crc(2) + terminator
pub const VESC_SHORT_FRAME_OVERHEAD: usize = 5;

/// Framing overhead of a long frame: marker + len(2) + crc(2) + terminator
pub const VESC_LONG_FRAME_OVERHEAD: usize = 6;

/// Largest payload sent with the short marker
pub const VESC_MAX_SHORT_PAYLOAD: usize = 255;

/// Largest payload the 2-byte length field can describe
pub const VESC_MAX_PAYLOAD_SIZE: usize = u16::MAX as usize;

/// Receive buffer cap; a declared payload beyond this is an overflow
pub const VESC_RX_BUFFER_SIZE: usize = 256;

/// Command payload size: packet id + i32 value
pub const VESC_COMMAND_PAYLOAD_SIZE: usize = 5;

/// Temperature block at the head of a GET_VALUES body (7 x i16, unused)
pub const TELEMETRY_TEMPERATURE_BLOCK: usize = 14;

/// Watt-hour and relative tachometer block (3 x i32, unused)
pub const TELEMETRY_ENERGY_BLOCK: usize = 12;

/// Bytes the field decoder walks after the packet id
pub const TELEMETRY_BODY_SIZE: usize = 54;

/// Shortest GET_VALUES payload accepted as a complete response (id + body + trailer)
pub const TELEMETRY_MIN_PAYLOAD_SIZE: usize = 56;

/// Fixed-point scale factors of the wire contract
///
/// Wire value = physical value x scale.
pub mod scale {
    /// Motor current, A
    pub const CURRENT_MOTOR: f32 = 100.0;
    /// Input current, A
    pub const CURRENT_IN: f32 = 100.0;
    /// Measured duty cycle, fraction
    pub const DUTY_NOW: f32 = 1_000.0;
    /// Input voltage, V
    pub const V_IN: f32 = 10.0;
    /// Consumed charge, Ah
    pub const AMP_HOURS: f32 = 10_000.0;
    /// Regenerated charge, Ah
    pub const AMP_HOURS_CHARGED: f32 = 10_000.0;
    /// SET_DUTY command, fraction
    pub const SET_DUTY: f32 = 100_000.0;
    /// SET_CURRENT command, A
    pub const SET_CURRENT: f32 = 1_000.0;
    /// SET_CURRENT_BRAKE command, A
    pub const SET_CURRENT_BRAKE: f32 = 1_000.0;
}

/// Packet ids (first payload byte) used by this bridge
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u8)]
pub enum PacketId {
    /// Request / response for the live values block
    GetValues = 4,
    /// Hold a duty cycle
    SetDuty = 5,
    /// Drive with a motor current
    SetCurrent = 6,
    /// Brake with a current
    SetCurrentBrake = 7,
}

impl PacketId {
    /// Wire opcode
    pub const fn opcode(self) -> u8 {
        self as u8
    }
}

impl TryFrom<u8> for PacketId {
    type Error = FrameError;

    fn try_from(value: u8) -> std::result::Result<Self, Self::Error> {
        match value {
            4 => Ok(Self::GetValues),
            5 => Ok(Self::SetDuty),
            6 => Ok(Self::SetCurrent),
            7 => Ok(Self::SetCurrentBrake),
            other => Err(FrameError::UnknownPacketId(other)),
        }
    }
}

/// Decoded motor controller state from a GET_VALUES response
///
/// Replaced wholesale on every successful decode.
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
pub struct TelemetrySnapshot {
    /// Motor phase current in amperes
    pub current_motor: f32,

    /// Battery input current in amperes
    pub current_in: f32,

    /// Measured duty cycle as a fraction (-1.0 to 1.0)
    pub duty_now: f32,

    /// Electrical RPM
    pub rpm: i32,

    /// Input voltage in volts
    pub v_in: f32,

    /// Consumed charge in amp-hours
    pub amp_hours: f32,

    /// Regenerated charge in amp-hours
    pub amp_hours_charged: f32,

    /// Absolute tachometer pulses (odometer)
    pub tachometer_abs: i32,
}

/// One VESC frame worth of payload
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct VescFrame {
    /// Payload data, packet id first
    pub payload: Vec<u8>,
}

impl VescFrame {
    /// Create a new frame
    ///
    /// # Errors
    ///
    /// Returns error if payload exceeds VESC_MAX_PAYLOAD_SIZE (65535 bytes)
    pub fn new(payload: Vec<u8>) -> Result<Self> {
        if payload.len() > VESC_MAX_PAYLOAD_SIZE {
            return Err(FrameError::PayloadTooLarge(payload.len()).into());
        }

        Ok(Self { payload })
    }

    /// Payload length as carried in the length field
    pub fn length(&self) -> usize {
        self.payload.len()
    }

    /// First payload byte, if any
    pub fn packet_id(&self) -> Option<u8> {
        self.payload.first().copied()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::RemoteError;

    #[test]
    fn test_frame_constants() {
        assert_eq!(VESC_MARKER_SHORT, 0x02);
        assert_eq!(VESC_MARKER_LONG, 0x03);
        assert_eq!(VESC_TERMINATOR, 0x03);
        assert_eq!(VESC_RX_BUFFER_SIZE, 256);
    }

    #[test]
    fn test_telemetry_layout_adds_up() {
        // temps + 2 x i32 + i16 + i32 + i16 + 2 x i32 + energy block + i32
        let walked = TELEMETRY_TEMPERATURE_BLOCK + 4 + 4 + 2 + 4 + 2 + 4 + 4 + TELEMETRY_ENERGY_BLOCK + 4;
        assert_eq!(walked, TELEMETRY_BODY_SIZE);
        assert!(TELEMETRY_MIN_PAYLOAD_SIZE > 1 + TELEMETRY_BODY_SIZE);
    }

    #[test]
    fn test_packet_id_opcodes() {
        assert_eq!(PacketId::GetValues.opcode(), 4);
        assert_eq!(PacketId::SetDuty.opcode(), 5);
        assert_eq!(PacketId::SetCurrent.opcode(), 6);
        assert_eq!(PacketId::SetCurrentBrake.opcode(), 7);
    }

    #[test]
    fn test_packet_id_try_from() {
        assert_eq!(PacketId::try_from(4).unwrap(), PacketId::GetValues);
        assert_eq!(PacketId::try_from(7).unwrap(), PacketId::SetCurrentBrake);
        assert_eq!(PacketId::try_from(0), Err(FrameError::UnknownPacketId(0)));
    }

    #[test]
    fn test_vesc_frame() {
        let frame = VescFrame::new(vec![4]).unwrap();
        assert_eq!(frame.length(), 1);
        assert_eq!(frame.packet_id(), Some(4));
        assert_eq!(VescFrame::new(vec![]).unwrap().packet_id(), None);
    }

    #[test]
    fn test_vesc_frame_payload_too_large() {
        let result = VescFrame::new(vec![0u8; VESC_MAX_PAYLOAD_SIZE + 1]);
        match result {
            Err(RemoteError::Frame(FrameError::PayloadTooLarge(len))) => {
                assert_eq!(len, VESC_MAX_PAYLOAD_SIZE + 1)
            }
            other => panic!("Expected PayloadTooLarge, got: {:?}", other),
        }
    }

    #[test]
    fn test_snapshot_default_is_zeroed() {
        let snapshot = TelemetrySnapshot::default();
        assert_eq!(snapshot.rpm, 0);
        assert_eq!(snapshot.duty_now, 0.0);
        assert_eq!(snapshot.tachometer_abs, 0);
    }
}
