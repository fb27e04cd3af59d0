//! # Acknowledgement Payload
//!
//! Telemetry snapshot as carried back to the transmitter in the radio
//! acknowledgement. 32 bytes, little-endian, in field order:
//!
//! | Offset | Type | Field |
//! |--------|------|-------|
//! | 0 | f32 | current_motor |
//! | 4 | f32 | current_in |
//! | 8 | f32 | duty_now |
//! | 12 | i32 | rpm |
//! | 16 | f32 | v_in |
//! | 20 | f32 | amp_hours |
//! | 24 | f32 | amp_hours_charged |
//! | 28 | i32 | tachometer_abs |

use bytes::{Buf, BufMut};

use crate::vesc::protocol::TelemetrySnapshot;

/// Size of the acknowledgement payload
pub const ACK_PAYLOAD_SIZE: usize = 32;

/// Pack a snapshot for the acknowledgement
pub fn encode_ack(snapshot: &TelemetrySnapshot) -> [u8; ACK_PAYLOAD_SIZE] {
    let mut out = [0u8; ACK_PAYLOAD_SIZE];
    let mut buf = &mut out[..];

    buf.put_f32_le(snapshot.current_motor);
    buf.put_f32_le(snapshot.current_in);
    buf.put_f32_le(snapshot.duty_now);
    buf.put_i32_le(snapshot.rpm);
    buf.put_f32_le(snapshot.v_in);
    buf.put_f32_le(snapshot.amp_hours);
    buf.put_f32_le(snapshot.amp_hours_charged);
    buf.put_i32_le(snapshot.tachometer_abs);

    out
}

/// Unpack an acknowledgement payload
///
/// Returns `None` unless exactly 32 bytes are given.
pub fn decode_ack(bytes: &[u8]) -> Option<TelemetrySnapshot> {
    if bytes.len() != ACK_PAYLOAD_SIZE {
        return None;
    }

    let mut buf = bytes;
    Some(TelemetrySnapshot {
        current_motor: buf.get_f32_le(),
        current_in: buf.get_f32_le(),
        duty_now: buf.get_f32_le(),
        rpm: buf.get_i32_le(),
        v_in: buf.get_f32_le(),
        amp_hours: buf.get_f32_le(),
        amp_hours_charged: buf.get_f32_le(),
        tachometer_abs: buf.get_i32_le(),
    })
}
