//! # VESC Packet Encoder
//!
//! Packs payloads into VESC frames and builds the motor command payloads.

use bytes::{BufMut, BytesMut};

use super::crc::crc16;
use super::protocol::*;
use crate::error::FrameError;

/// A command for the motor controller
///
/// Values are physical units; no clamping happens here. Callers bound
/// currents and duty before encoding.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum MotorCommand {
    /// Hold a duty cycle (fraction, -1.0 to 1.0)
    SetDuty(f32),
    /// Drive with a motor current in amperes
    SetCurrent(f32),
    /// Brake with a current in amperes
    SetCurrentBrake(f32),
}

impl MotorCommand {
    /// Packet id the command is sent with
    pub fn packet_id(&self) -> PacketId {
        match self {
            Self::SetDuty(_) => PacketId::SetDuty,
            Self::SetCurrent(_) => PacketId::SetCurrent,
            Self::SetCurrentBrake(_) => PacketId::SetCurrentBrake,
        }
    }

    /// Fixed-point value carried on the wire
    pub fn wire_value(&self) -> i32 {
        let (value, factor) = match *self {
            Self::SetDuty(fraction) => (fraction, scale::SET_DUTY),
            Self::SetCurrent(amps) => (amps, scale::SET_CURRENT),
            Self::SetCurrentBrake(amps) => (amps, scale::SET_CURRENT_BRAKE),
        };

        (value * factor).round() as i32
    }

    /// Command payload: packet id followed by the big-endian value
    ///
    /// # Examples
    ///
    /// ```
    /// use emtb_remote::vesc::encoder::MotorCommand;
    ///
    /// let payload = MotorCommand::SetCurrent(5.0).payload();
    /// assert_eq!(payload, [6, 0x00, 0x00, 0x13, 0x88]);
    /// ```
    pub fn payload(&self) -> [u8; VESC_COMMAND_PAYLOAD_SIZE] {
        let mut payload = [0u8; VESC_COMMAND_PAYLOAD_SIZE];
        payload[0] = self.packet_id().opcode();
        payload[1..].copy_from_slice(&self.wire_value().to_be_bytes());
        payload
    }
}

/// Pack a payload into a complete VESC frame
///
/// Payloads up to 255 bytes use the short marker with a 1-byte length,
/// longer ones the long marker with a 2-byte length. The CRC covers the
/// payload only and is appended high byte first.
///
/// # Errors
///
/// Returns `FrameError::PayloadTooLarge` if the payload exceeds 65535 bytes
///
/// # Examples
///
/// ```
/// use emtb_remote::vesc::encoder::encode_frame;
///
/// let frame = encode_frame(&[4]).unwrap();
/// assert_eq!(frame, vec![0x02, 0x01, 0x04, 0x40, 0x84, 0x03]);
/// ```
pub fn encode_frame(payload: &[u8]) -> Result<Vec<u8>, FrameError> {
    if payload.len() > VESC_MAX_PAYLOAD_SIZE {
        return Err(FrameError::PayloadTooLarge(payload.len()));
    }

    Ok(pack(payload))
}

/// Encode a motor command into a complete frame (10 bytes)
pub fn encode_command_frame(command: &MotorCommand) -> Vec<u8> {
    pack(&command.payload())
}

/// Encode the GET_VALUES request frame (6 bytes)
pub fn encode_get_values_request() -> Vec<u8> {
    pack(&[PacketId::GetValues.opcode()])
}

/// Frame a payload already known to fit the length field
fn pack(payload: &[u8]) -> Vec<u8> {
    let len = payload.len();
    let mut frame = BytesMut::with_capacity(len + VESC_LONG_FRAME_OVERHEAD);

    if len <= VESC_MAX_SHORT_PAYLOAD {
        frame.put_u8(VESC_MARKER_SHORT);
        frame.put_u8(len as u8);
    } else {
        frame.put_u8(VESC_MARKER_LONG);
        frame.put_u16(len as u16);
    }

    frame.put_slice(payload);
    frame.put_u16(crc16(payload));
    frame.put_u8(VESC_TERMINATOR);

    frame.to_vec()
}
