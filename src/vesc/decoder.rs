//! # VESC Packet Decoder
//!
//! Unpacks VESC frames from the serial byte stream, classifies responses and
//! decodes the GET_VALUES telemetry block.
//!
//! The stream decoder keeps its parse position between polls, so a frame
//! split across two serial reads is reassembled instead of dropped:
//!
//! ```text
//! AwaitingMarker -> AwaitingLength -> AwaitingPayload -> AwaitingChecksum -> AwaitingTerminator
//!       ^                                                                          |
//!       +------------------------- frame or error ---------------------------------+
//! ```

use bytes::Buf;
use serde::Serialize;

use super::crc::crc16;
use super::protocol::*;
use crate::error::{FieldError, FrameError, Result};

/// Parse position of the stream decoder
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DecoderState {
    /// Discarding bytes until a start marker
    AwaitingMarker,
    /// Reading the 1- or 2-byte length field
    AwaitingLength,
    /// Collecting payload bytes
    AwaitingPayload,
    /// Collecting the 2 CRC bytes
    AwaitingChecksum,
    /// Expecting the terminator
    AwaitingTerminator,
}

/// Incremental frame decoder for a serial byte stream
///
/// # Examples
///
/// ```
/// use emtb_remote::vesc::decoder::FrameDecoder;
/// use emtb_remote::vesc::encoder::encode_frame;
///
/// let frame = encode_frame(&[4, 1, 2, 3]).unwrap();
/// let mut decoder = FrameDecoder::new();
///
/// // First half arrives in one poll, the rest in the next
/// assert!(decoder.feed(&frame[..4]).is_empty());
/// let results = decoder.feed(&frame[4..]);
/// assert_eq!(results.len(), 1);
/// assert_eq!(results[0].as_ref().unwrap().payload, vec![4, 1, 2, 3]);
/// ```
#[derive(Debug, Clone)]
pub struct FrameDecoder {
    state: DecoderState,
    /// Length bytes still to read (1 for short, 2 for long frames)
    length_bytes_left: usize,
    declared_len: usize,
    payload: Vec<u8>,
    crc: u16,
    crc_bytes_read: usize,
}

impl Default for FrameDecoder {
    fn default() -> Self {
        Self::new()
    }
}

impl FrameDecoder {
    /// Creates a decoder waiting for a start marker.
    #[must_use]
    pub fn new() -> Self {
        Self {
            state: DecoderState::AwaitingMarker,
            length_bytes_left: 0,
            declared_len: 0,
            payload: Vec::with_capacity(VESC_RX_BUFFER_SIZE),
            crc: 0,
            crc_bytes_read: 0,
        }
    }

    /// Current parse position.
    pub fn state(&self) -> DecoderState {
        self.state
    }

    /// Drops any partial frame and waits for the next marker.
    pub fn reset(&mut self) {
        self.state = DecoderState::AwaitingMarker;
        self.length_bytes_left = 0;
        self.declared_len = 0;
        self.payload.clear();
        self.crc = 0;
        self.crc_bytes_read = 0;
    }

    /// Feeds a chunk of bytes, returning every frame completed or rejected in it.
    pub fn feed(&mut self, bytes: &[u8]) -> Vec<std::result::Result<VescFrame, FrameError>> {
        bytes.iter().filter_map(|&byte| self.push(byte)).collect()
    }

    /// Feeds a single byte.
    ///
    /// Returns `None` while a frame is still being assembled.
    pub fn push(&mut self, byte: u8) -> Option<std::result::Result<VescFrame, FrameError>> {
        match self.state {
            DecoderState::AwaitingMarker => {
                self.scan_marker(byte);
                None
            }
            DecoderState::AwaitingLength => {
                self.declared_len = (self.declared_len << 8) | byte as usize;
                self.length_bytes_left -= 1;

                if self.length_bytes_left > 0 {
                    return None;
                }

                if self.declared_len > VESC_RX_BUFFER_SIZE {
                    return Some(self.fail(FrameError::Overflow));
                }

                self.payload.clear();
                self.state = if self.declared_len == 0 {
                    DecoderState::AwaitingChecksum
                } else {
                    DecoderState::AwaitingPayload
                };
                None
            }
            DecoderState::AwaitingPayload => {
                self.payload.push(byte);
                if self.payload.len() == self.declared_len {
                    self.crc = 0;
                    self.crc_bytes_read = 0;
                    self.state = DecoderState::AwaitingChecksum;
                }
                None
            }
            DecoderState::AwaitingChecksum => {
                self.crc = (self.crc << 8) | byte as u16;
                self.crc_bytes_read += 1;
                if self.crc_bytes_read == 2 {
                    self.state = DecoderState::AwaitingTerminator;
                }
                None
            }
            DecoderState::AwaitingTerminator => {
                if byte != VESC_TERMINATOR {
                    let error = self.fail(FrameError::Overflow);
                    // The stray byte may start the next frame
                    self.scan_marker(byte);
                    return Some(error);
                }

                let calculated = crc16(&self.payload);
                if calculated != self.crc {
                    let received = self.crc;
                    return Some(self.fail(FrameError::ChecksumMismatch { received, calculated }));
                }

                let payload = std::mem::take(&mut self.payload);
                self.reset();
                Some(Ok(VescFrame { payload }))
            }
        }
    }

    fn scan_marker(&mut self, byte: u8) {
        self.length_bytes_left = match byte {
            VESC_MARKER_SHORT => 1,
            VESC_MARKER_LONG => 2,
            // Not a frame start, keep scanning
            _ => return,
        };
        self.declared_len = 0;
        self.state = DecoderState::AwaitingLength;
    }

    fn fail(&mut self, error: FrameError) -> std::result::Result<VescFrame, FrameError> {
        self.reset();
        Err(error)
    }
}

/// Decode one complete VESC frame from a buffer
///
/// Bytes ahead of the first marker are skipped. Anything after the first
/// frame is ignored.
///
/// # Errors
///
/// - `Overflow`: declared payload over 256 bytes, or no terminator at the declared offset
/// - `ChecksumMismatch`: CRC of the payload differs from the embedded CRC
/// - `Incomplete`: the buffer ends before the frame does
///
/// # Examples
///
/// ```
/// use emtb_remote::vesc::decoder::decode_frame;
///
/// let frame = decode_frame(&[0x02, 0x01, 0x04, 0x40, 0x84, 0x03]).unwrap();
/// assert_eq!(frame.payload, vec![0x04]);
/// ```
pub fn decode_frame(raw: &[u8]) -> std::result::Result<VescFrame, FrameError> {
    let mut decoder = FrameDecoder::new();

    for &byte in raw {
        if let Some(result) = decoder.push(byte) {
            return result;
        }
    }

    Err(FrameError::Incomplete)
}

/// Classify a decoded frame as a telemetry response
///
/// Returns the packet id and the body following it.
///
/// # Errors
///
/// - `Incomplete`: payload not longer than 55 bytes
/// - `UnknownPacketId`: any id other than GET_VALUES
pub fn parse_response(frame: &VescFrame) -> std::result::Result<(PacketId, &[u8]), FrameError> {
    if frame.payload.len() < TELEMETRY_MIN_PAYLOAD_SIZE {
        return Err(FrameError::Incomplete);
    }

    match PacketId::try_from(frame.payload[0])? {
        PacketId::GetValues => Ok((PacketId::GetValues, &frame.payload[1..])),
        _ => Err(FrameError::UnknownPacketId(frame.payload[0])),
    }
}

/// Decode the GET_VALUES body into a telemetry snapshot
///
/// Field walk (big-endian):
///
/// | Offset | Width | Field | Scale |
/// |--------|-------|-------|-------|
/// | 0 | 14 | temperatures (skipped) | |
/// | 14 | i32 | motor current | 1/100 A |
/// | 18 | i32 | input current | 1/100 A |
/// | 22 | i16 | duty cycle | 1/1000 |
/// | 24 | i32 | rpm | 1 |
/// | 28 | i16 | input voltage | 1/10 V |
/// | 30 | i32 | amp hours | 1/10000 Ah |
/// | 34 | i32 | amp hours charged | 1/10000 Ah |
/// | 38 | 12 | watt hours, tachometer (skipped) | |
/// | 50 | i32 | absolute tachometer | 1 |
///
/// # Arguments
///
/// * `packet_id` - Packet id the body arrived with
/// * `body` - Payload after the packet id
///
/// # Errors
///
/// - `UnsupportedPacket`: packet id is not GET_VALUES
/// - `Truncated`: body shorter than 54 bytes
pub fn decode_telemetry(packet_id: u8, body: &[u8]) -> std::result::Result<TelemetrySnapshot, FieldError> {
    if packet_id != PacketId::GetValues.opcode() {
        return Err(FieldError::UnsupportedPacket(packet_id));
    }

    if body.len() < TELEMETRY_BODY_SIZE {
        return Err(FieldError::Truncated {
            needed: TELEMETRY_BODY_SIZE,
            got: body.len(),
        });
    }

    let mut cursor = body;
    cursor.advance(TELEMETRY_TEMPERATURE_BLOCK);

    let current_motor = cursor.get_i32() as f32 / scale::CURRENT_MOTOR;
    let current_in = cursor.get_i32() as f32 / scale::CURRENT_IN;
    let duty_now = cursor.get_i16() as f32 / scale::DUTY_NOW;
    let rpm = cursor.get_i32();
    let v_in = cursor.get_i16() as f32 / scale::V_IN;
    let amp_hours = cursor.get_i32() as f32 / scale::AMP_HOURS;
    let amp_hours_charged = cursor.get_i32() as f32 / scale::AMP_HOURS_CHARGED;

    cursor.advance(TELEMETRY_ENERGY_BLOCK);
    let tachometer_abs = cursor.get_i32();

    Ok(TelemetrySnapshot {
        current_motor,
        current_in,
        duty_now,
        rpm,
        v_in,
        amp_hours,
        amp_hours_charged,
        tachometer_abs,
    })
}

/// Classify a frame and decode its telemetry in one step
pub fn decode_response(frame: &VescFrame) -> Result<TelemetrySnapshot> {
    let (packet_id, body) = parse_response(frame)?;
    Ok(decode_telemetry(packet_id.opcode(), body)?)
}

/// Counts of accepted and rejected inbound frames
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct RejectionCounters {
    /// Frames decoded into telemetry
    pub accepted: u64,
    /// Frames dropped for exceeding the buffer or missing the terminator
    pub overflow: u64,
    /// Frames dropped on CRC mismatch
    pub checksum_mismatch: u64,
    /// Responses too short to hold telemetry, or abandoned mid-frame
    pub incomplete: u64,
    /// Responses with an unhandled packet id
    pub unknown_packet: u64,
    /// Bodies the field decoder refused
    pub field_errors: u64,
}

impl RejectionCounters {
    /// Count a successful decode.
    pub fn record_accepted(&mut self) {
        self.accepted += 1;
    }

    /// Count a framing or classification rejection.
    pub fn record_frame_error(&mut self, error: &FrameError) {
        match error {
            FrameError::Overflow | FrameError::PayloadTooLarge(_) => self.overflow += 1,
            FrameError::ChecksumMismatch { .. } => self.checksum_mismatch += 1,
            FrameError::Incomplete => self.incomplete += 1,
            FrameError::UnknownPacketId(_) => self.unknown_packet += 1,
        }
    }

    /// Count a field decoding rejection.
    pub fn record_field_error(&mut self, _error: &FieldError) {
        self.field_errors += 1;
    }

    /// Total rejections of any kind.
    pub fn rejected(&self) -> u64 {
        self.overflow + self.checksum_mismatch + self.incomplete + self.unknown_packet + self.field_errors
    }
}


#[cfg(test)]
mod tests {
    use super::fixtures::*;
    use super::*;
    use crate::error::RemoteError;
    use crate::vesc::encoder::{encode_frame, encode_get_values_request};

    #[test]
    fn test_round_trip_all_short_lengths() {
        for len in 0..=255usize {
            let payload: Vec<u8> = (0..len).map(|i| (i * 7 + len) as u8).collect();
            let frame = encode_frame(&payload).unwrap();
            let decoded = decode_frame(&frame).unwrap();
            assert_eq!(decoded.payload, payload, "round trip failed at length {}", len);
        }
    }

    #[test]
    fn test_round_trip_long_marker_within_cap() {
        let payload = vec![0x5A; VESC_RX_BUFFER_SIZE];
        let frame = encode_frame(&payload).unwrap();
        assert_eq!(frame[0], VESC_MARKER_LONG);
        assert_eq!(decode_frame(&frame).unwrap().payload, payload);
    }

    #[test]
    fn test_long_payload_beyond_cap_overflows() {
        let frame = encode_frame(&vec![0x11; VESC_RX_BUFFER_SIZE + 1]).unwrap();
        assert_eq!(decode_frame(&frame), Err(FrameError::Overflow));
    }

    #[test]
    fn test_any_payload_byte_mutation_fails_checksum() {
        let payload = values_payload(&sample_snapshot());
        let frame = encode_frame(&payload).unwrap();

        for index in 2..2 + payload.len() {
            let mut corrupted = frame.clone();
            corrupted[index] ^= 0x01;
            let result = decode_frame(&corrupted);
            assert!(
                matches!(result, Err(FrameError::ChecksumMismatch { .. })),
                "mutation at byte {} gave {:?}",
                index,
                result
            );
        }
    }

    #[test]
    fn test_corrupted_crc_fails_checksum() {
        let mut frame = encode_get_values_request();
        frame[4] ^= 0xFF;
        match decode_frame(&frame) {
            Err(FrameError::ChecksumMismatch { received, calculated }) => {
                assert_eq!(calculated, 0x4084);
                assert_eq!(received, 0x407B);
            }
            other => panic!("Expected ChecksumMismatch, got: {:?}", other),
        }
    }

    #[test]
    fn test_missing_terminator_overflows() {
        let mut frame = encode_get_values_request();
        let last = frame.len() - 1;
        frame[last] = 0x00;
        assert_eq!(decode_frame(&frame), Err(FrameError::Overflow));
    }

    #[test]
    fn test_truncated_buffer_is_incomplete() {
        let frame = encode_frame(&[4, 5, 6, 7]).unwrap();
        assert_eq!(decode_frame(&frame[..frame.len() - 1]), Err(FrameError::Incomplete));
        assert_eq!(decode_frame(&[]), Err(FrameError::Incomplete));
    }

    #[test]
    fn test_leading_noise_is_skipped() {
        let mut raw = vec![0xFF, 0x00, 0x7E];
        raw.extend(encode_get_values_request());
        assert_eq!(decode_frame(&raw).unwrap().payload, vec![4]);
    }

    #[test]
    fn test_stream_decoder_reassembles_across_polls() {
        let payload = values_payload(&sample_snapshot());
        let frame = encode_frame(&payload).unwrap();
        let mut decoder = FrameDecoder::new();

        for chunk in frame.chunks(7) {
            let results = decoder.feed(chunk);
            if decoder.state() != DecoderState::AwaitingMarker {
                assert!(results.is_empty());
            } else {
                assert_eq!(results.len(), 1);
                assert_eq!(results[0].as_ref().unwrap().payload, payload);
            }
        }
    }

    #[test]
    fn test_stream_decoder_state_transitions() {
        let mut decoder = FrameDecoder::new();
        assert_eq!(decoder.state(), DecoderState::AwaitingMarker);
        decoder.push(VESC_MARKER_SHORT);
        assert_eq!(decoder.state(), DecoderState::AwaitingLength);
        decoder.push(1);
        assert_eq!(decoder.state(), DecoderState::AwaitingPayload);
        decoder.push(4);
        assert_eq!(decoder.state(), DecoderState::AwaitingChecksum);
        decoder.push(0x40);
        decoder.push(0x84);
        assert_eq!(decoder.state(), DecoderState::AwaitingTerminator);
        let result = decoder.push(VESC_TERMINATOR).unwrap();
        assert_eq!(result.unwrap().payload, vec![4]);
        assert_eq!(decoder.state(), DecoderState::AwaitingMarker);
    }

    #[test]
    fn test_stream_decoder_recovers_after_error() {
        let mut bad = encode_get_values_request();
        bad[3] ^= 0x10;
        let good = encode_frame(&[9, 9]).unwrap();

        let mut stream = bad;
        stream.extend(&good);

        let mut decoder = FrameDecoder::new();
        let results = decoder.feed(&stream);
        assert_eq!(results.len(), 2);
        assert!(matches!(results[0], Err(FrameError::ChecksumMismatch { .. })));
        assert_eq!(results[1].as_ref().unwrap().payload, vec![9, 9]);
    }

    #[test]
    fn test_stream_decoder_keeps_frame_starting_at_bad_terminator() {
        // Terminator lost; the next frame's marker sits in its place
        let mut stream = encode_get_values_request();
        stream.pop();
        stream.extend(encode_frame(&[9, 9]).unwrap());

        let results = FrameDecoder::new().feed(&stream);
        assert_eq!(results.len(), 2);
        assert_eq!(results[0], Err(FrameError::Overflow));
        assert_eq!(results[1].as_ref().unwrap().payload, vec![9, 9]);
    }

    #[test]
    fn test_stream_decoder_multiple_frames_in_one_poll() {
        let mut stream = encode_frame(&[1]).unwrap();
        stream.extend(encode_frame(&[2, 2]).unwrap());
        stream.extend(encode_frame(&[3, 3, 3]).unwrap());

        let results = FrameDecoder::new().feed(&stream);
        let payloads: Vec<_> = results.into_iter().map(|r| r.unwrap().payload).collect();
        assert_eq!(payloads, vec![vec![1], vec![2, 2], vec![3, 3, 3]]);
    }

    #[test]
    fn test_parse_response_short_is_incomplete() {
        let frame = VescFrame { payload: vec![PacketId::GetValues.opcode(); TELEMETRY_MIN_PAYLOAD_SIZE - 1] };
        assert_eq!(parse_response(&frame), Err(FrameError::Incomplete));
    }

    #[test]
    fn test_parse_response_unknown_packet_id() {
        let mut payload = values_payload(&sample_snapshot());
        payload[0] = 0x2A;
        let frame = VescFrame { payload };
        assert_eq!(parse_response(&frame), Err(FrameError::UnknownPacketId(0x2A)));

        // Known opcode that is not a response we decode
        let mut payload = values_payload(&sample_snapshot());
        payload[0] = PacketId::SetCurrent.opcode();
        let frame = VescFrame { payload };
        assert_eq!(parse_response(&frame), Err(FrameError::UnknownPacketId(6)));
    }

    #[test]
    fn test_decode_telemetry_motor_current_example() {
        let mut body = vec![0u8; TELEMETRY_BODY_SIZE + 1];
        body[14..18].copy_from_slice(&500i32.to_be_bytes());

        let snapshot = decode_telemetry(PacketId::GetValues.opcode(), &body).unwrap();
        assert!((snapshot.current_motor - 5.00).abs() < 1e-6);
        assert_eq!(snapshot.rpm, 0);
    }

    #[test]
    fn test_decode_telemetry_all_fields() {
        let expected = sample_snapshot();
        let payload = values_payload(&expected);

        let snapshot = decode_telemetry(payload[0], &payload[1..]).unwrap();
        assert!((snapshot.current_motor - 5.0).abs() < 0.01);
        assert!((snapshot.current_in - 3.25).abs() < 0.01);
        assert!((snapshot.duty_now - 0.42).abs() < 0.001);
        assert_eq!(snapshot.rpm, 12_000);
        assert!((snapshot.v_in - 36.6).abs() < 0.1);
        assert!((snapshot.amp_hours - 1.2345).abs() < 0.0001);
        assert!((snapshot.amp_hours_charged - 0.0123).abs() < 0.0001);
        assert_eq!(snapshot.tachometer_abs, 987_654);
    }

    #[test]
    fn test_decode_telemetry_negative_fields() {
        let mut body = vec![0u8; TELEMETRY_BODY_SIZE];
        body[14..18].copy_from_slice(&(-1250i32).to_be_bytes());
        body[22..24].copy_from_slice(&(-300i16).to_be_bytes());
        body[24..28].copy_from_slice(&(-4000i32).to_be_bytes());

        let snapshot = decode_telemetry(4, &body).unwrap();
        assert!((snapshot.current_motor + 12.5).abs() < 1e-4);
        assert!((snapshot.duty_now + 0.3).abs() < 1e-4);
        assert_eq!(snapshot.rpm, -4000);
    }

    #[test]
    fn test_decode_telemetry_unsupported_packet() {
        let body = vec![0u8; TELEMETRY_BODY_SIZE];
        assert_eq!(decode_telemetry(5, &body), Err(FieldError::UnsupportedPacket(5)));
    }

    #[test]
    fn test_decode_telemetry_truncated() {
        let body = vec![0u8; 20];
        assert_eq!(
            decode_telemetry(4, &body),
            Err(FieldError::Truncated { needed: TELEMETRY_BODY_SIZE, got: 20 })
        );
    }

    #[test]
    fn test_decode_response_is_idempotent() {
        let frame = encode_frame(&values_payload(&sample_snapshot())).unwrap();

        let first = decode_response(&decode_frame(&frame).unwrap()).unwrap();
        let second = decode_response(&decode_frame(&frame).unwrap()).unwrap();
        assert_eq!(first, second);
    }

    #[test]
    fn test_decode_response_wraps_errors() {
        let frame = VescFrame { payload: vec![4; 10] };
        match decode_response(&frame) {
            Err(RemoteError::Frame(FrameError::Incomplete)) => {}
            other => panic!("Expected Incomplete, got: {:?}", other),
        }
    }

    #[test]
    fn test_rejection_counters() {
        let mut counters = RejectionCounters::default();
        counters.record_accepted();
        counters.record_frame_error(&FrameError::Overflow);
        counters.record_frame_error(&FrameError::ChecksumMismatch { received: 1, calculated: 2 });
        counters.record_frame_error(&FrameError::ChecksumMismatch { received: 3, calculated: 4 });
        counters.record_frame_error(&FrameError::Incomplete);
        counters.record_frame_error(&FrameError::UnknownPacketId(9));
        counters.record_field_error(&FieldError::UnsupportedPacket(9));

        assert_eq!(counters.accepted, 1);
        assert_eq!(counters.checksum_mismatch, 2);
        assert_eq!(counters.rejected(), 6);
    }
}
