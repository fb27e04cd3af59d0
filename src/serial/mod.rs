//! # Serial Communication Module
//!
//! Handles the UART link to the VESC motor controller.
//!
//! This module handles:
//! - Opening the serial port (8N1, configured baud rate)
//! - Writing framed motor commands
//! - Pacing GET_VALUES telemetry requests
//! - Polling and reassembling telemetry responses across reads

pub mod port_trait;

use std::time::{Duration, Instant};

use tokio_serial::SerialPortBuilderExt;
use tracing::{debug, info, warn};

use crate::config::SerialConfig;
use crate::error::{FrameError, RemoteError, Result};
use crate::vesc::decoder::{decode_telemetry, parse_response, DecoderState, FrameDecoder, RejectionCounters};
use crate::vesc::encoder::{encode_command_frame, encode_get_values_request, MotorCommand};
use crate::vesc::protocol::{TelemetrySnapshot, VESC_RX_BUFFER_SIZE};

use port_trait::{SerialPortIO, TokioSerialPort};

/// Upper bound on reads drained by one poll
const MAX_READS_PER_POLL: usize = 8;

/// Open a serial port with 8N1 settings and no flow control
///
/// # Errors
///
/// Returns `RemoteError::Serial` if the device cannot be opened
pub fn open_port(path: &str, baud_rate: u32) -> Result<tokio_serial::SerialStream> {
    let port = tokio_serial::new(path, baud_rate)
        .data_bits(tokio_serial::DataBits::Eight)
        .parity(tokio_serial::Parity::None)
        .stop_bits(tokio_serial::StopBits::One)
        .flow_control(tokio_serial::FlowControl::None)
        .open_native_async()
        .map_err(|e| RemoteError::Serial(format!("Failed to open {}: {}", path, e)))?;

    Ok(port)
}

/// VESC Serial Port Handler
///
/// Owns the frame decoder so a response split over several reads is
/// reassembled on later polls.
pub struct VescSerial {
    /// Serial port handle
    port: Box<dyn SerialPortIO>,
    /// Device path (e.g., /dev/ttyUSB0)
    device_path: String,
    decoder: FrameDecoder,
    counters: RejectionCounters,
    read_timeout: Duration,
    request_interval: Duration,
    last_request: Option<Instant>,
    /// When a partial response was first seen by `request_values`
    partial_since: Option<Instant>,
}

impl std::fmt::Debug for VescSerial {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("VescSerial")
            .field("device_path", &self.device_path)
            .field("decoder", &self.decoder.state())
            .field("counters", &self.counters)
            .finish_non_exhaustive()
    }
}

impl VescSerial {
    /// Open the motor controller port named in the configuration
    ///
    /// # Errors
    ///
    /// Returns `RemoteError::SerialPortNotFound` if the port cannot be opened
    ///
    /// # Examples
    ///
    /// ```no_run
    /// use emtb_remote::config::SerialConfig;
    /// use emtb_remote::serial::VescSerial;
    ///
    /// fn main() -> anyhow::Result<()> {
    ///     let serial = VescSerial::open(&SerialConfig::default())?;
    ///     println!("Connected to {}", serial.device_path());
    ///     Ok(())
    /// }
    /// ```
    pub fn open(config: &SerialConfig) -> Result<Self> {
        Self::open_with_paths(&[config.port.as_str()], config)
    }

    /// Open the first of several candidate device paths
    ///
    /// # Arguments
    ///
    /// * `paths` - Device paths to try in order
    /// * `config` - Baud rate and timing
    pub fn open_with_paths(paths: &[&str], config: &SerialConfig) -> Result<Self> {
        for path in paths {
            debug!("Trying to open serial port: {}", path);

            match open_port(path, config.baud_rate) {
                Ok(port) => {
                    info!("Opened VESC serial port at {} ({} baud)", path, config.baud_rate);
                    return Ok(Self::from_port(
                        Box::new(TokioSerialPort::new(port)),
                        path,
                        config,
                    ));
                }
                Err(e) => {
                    warn!("Failed to open {}: {}", path, e);
                    continue;
                }
            }
        }

        Err(RemoteError::SerialPortNotFound(paths.join(", ")))
    }

    /// Wrap an already opened port
    pub fn from_port(port: Box<dyn SerialPortIO>, device_path: &str, config: &SerialConfig) -> Self {
        Self {
            port,
            device_path: device_path.to_string(),
            decoder: FrameDecoder::new(),
            counters: RejectionCounters::default(),
            read_timeout: Duration::from_millis(config.timeout_ms),
            request_interval: Duration::from_millis(config.request_interval_ms),
            last_request: None,
            partial_since: None,
        }
    }

    /// Write a complete frame and flush
    pub async fn send_packet(&mut self, packet: &[u8]) -> Result<()> {
        self.port.write_all(packet).await
            .map_err(|e| RemoteError::Serial(format!("Failed to write packet: {}", e)))?;

        self.port.flush().await
            .map_err(|e| RemoteError::Serial(format!("Failed to flush serial port: {}", e)))?;

        Ok(())
    }

    /// Encode and send one motor command
    pub async fn send_command(&mut self, command: &MotorCommand) -> Result<()> {
        let packet = encode_command_frame(command);
        self.send_packet(&packet).await?;
        debug!("Sent {:?} ({} bytes)", command, packet.len());
        Ok(())
    }

    /// Request telemetry if the interval has passed and no response is mid-frame
    ///
    /// A response still incomplete one request interval after it was first
    /// seen is dropped and counted as incomplete, so stray marker bytes on
    /// the line cannot stop telemetry for good.
    ///
    /// # Returns
    ///
    /// * `Result<bool>` - Whether a request was written
    pub async fn request_values(&mut self, now: Instant) -> Result<bool> {
        if self.decoder.state() != DecoderState::AwaitingMarker {
            let since = *self.partial_since.get_or_insert(now);
            if now.saturating_duration_since(since) < self.request_interval {
                return Ok(false);
            }

            warn!("Dropping VESC response stuck in {:?}", self.decoder.state());
            self.decoder.reset();
            self.counters.record_frame_error(&FrameError::Incomplete);
        }
        self.partial_since = None;

        if let Some(last) = self.last_request {
            if now.saturating_duration_since(last) < self.request_interval {
                return Ok(false);
            }
        }

        self.send_packet(&encode_get_values_request()).await?;
        self.last_request = Some(now);
        Ok(true)
    }

    /// Drain pending bytes and decode any complete telemetry responses
    ///
    /// # Returns
    ///
    /// * `Result<Option<TelemetrySnapshot>>` - Newest snapshot decoded by this
    ///   poll, `None` if no complete valid response arrived
    ///
    /// # Errors
    ///
    /// Only transport errors are returned; malformed frames are counted and
    /// dropped.
    pub async fn poll_telemetry(&mut self) -> Result<Option<TelemetrySnapshot>> {
        let mut buf = [0u8; VESC_RX_BUFFER_SIZE];
        let mut latest = None;
        let mut wait = self.read_timeout;

        for _ in 0..MAX_READS_PER_POLL {
            let count = self.port.read_available(&mut buf, wait).await
                .map_err(|e| RemoteError::Serial(format!("Failed to read serial port: {}", e)))?;
            if count == 0 {
                break;
            }
            // Only the first read waits; later ones take what is already there
            wait = Duration::ZERO;

            for result in self.decoder.feed(&buf[..count]) {
                if let Some(snapshot) = self.accept(result) {
                    latest = Some(snapshot);
                }
            }
        }

        if self.decoder.state() == DecoderState::AwaitingMarker {
            self.partial_since = None;
        }

        Ok(latest)
    }

    fn accept(
        &mut self,
        result: std::result::Result<crate::vesc::protocol::VescFrame, FrameError>,
    ) -> Option<TelemetrySnapshot> {
        let frame = match result {
            Ok(frame) => frame,
            Err(e) => {
                debug!("Dropping VESC frame: {}", e);
                self.counters.record_frame_error(&e);
                return None;
            }
        };

        let (packet_id, body) = match parse_response(&frame) {
            Ok(parsed) => parsed,
            Err(e) => {
                debug!("Ignoring VESC response: {}", e);
                self.counters.record_frame_error(&e);
                return None;
            }
        };

        match decode_telemetry(packet_id.opcode(), body) {
            Ok(snapshot) => {
                self.counters.record_accepted();
                Some(snapshot)
            }
            Err(e) => {
                debug!("Rejecting telemetry body: {}", e);
                self.counters.record_field_error(&e);
                None
            }
        }
    }

    /// Accepted and rejected frame counts so far
    pub fn counters(&self) -> RejectionCounters {
        self.counters
    }

    /// Get the device path of the opened serial port
    pub fn device_path(&self) -> &str {
        &self.device_path
    }
}
