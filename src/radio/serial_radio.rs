//! # Serial Radio Bridge
//!
//! [`RadioLink`] over a radio modem attached by UART. Host and modem exchange
//! the same marker/length/CRC/terminator frames as the motor controller, each
//! payload starting with a tag byte:
//!
//! | Tag | Host to modem | Modem to host |
//! |-----|---------------|---------------|
//! | `0x01` | transmit this packet | packet received from the peer |
//! | `0x02` | set the next ack payload | ack payload received from the peer |
//! | `0x03` | | send status, one byte (nonzero = acknowledged) |

use std::collections::VecDeque;
use std::time::Duration;

use async_trait::async_trait;
use tracing::{debug, info, warn};

use super::RadioLink;
use crate::config::RadioConfig;
use crate::error::{RemoteError, Result};
use crate::serial::open_port;
use crate::serial::port_trait::{SerialPortIO, TokioSerialPort};
use crate::vesc::decoder::FrameDecoder;
use crate::vesc::encoder::encode_frame;
use crate::vesc::protocol::VESC_RX_BUFFER_SIZE;

/// Payload carrying a radio packet
pub const TAG_DATA: u8 = 0x01;

/// Payload carrying an acknowledgement payload
pub const TAG_ACK_PAYLOAD: u8 = 0x02;

/// Payload carrying the outcome of a transmit
pub const TAG_SEND_STATUS: u8 = 0x03;

/// How long a transmit waits for the modem's status
pub const DEFAULT_STATUS_TIMEOUT: Duration = Duration::from_millis(20);

/// Radio modem on a serial port
pub struct SerialRadio {
    port: Box<dyn SerialPortIO>,
    device_path: String,
    decoder: FrameDecoder,
    inbox: VecDeque<Vec<u8>>,
    status_timeout: Duration,
}

impl std::fmt::Debug for SerialRadio {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SerialRadio")
            .field("device_path", &self.device_path)
            .field("queued", &self.inbox.len())
            .finish_non_exhaustive()
    }
}

impl SerialRadio {
    /// Open the modem port named in the configuration
    ///
    /// # Errors
    ///
    /// Returns `RemoteError::Serial` if the port cannot be opened
    pub fn open(config: &RadioConfig) -> Result<Self> {
        let port = open_port(&config.port, config.baud_rate)?;
        info!("Opened radio modem at {} ({} baud)", config.port, config.baud_rate);
        Ok(Self::from_port(Box::new(TokioSerialPort::new(port)), &config.port))
    }

    /// Wrap an already opened port
    pub fn from_port(port: Box<dyn SerialPortIO>, device_path: &str) -> Self {
        Self {
            port,
            device_path: device_path.to_string(),
            decoder: FrameDecoder::new(),
            inbox: VecDeque::new(),
            status_timeout: DEFAULT_STATUS_TIMEOUT,
        }
    }

    /// Override how long a transmit waits for its status
    #[must_use]
    pub fn with_status_timeout(mut self, timeout: Duration) -> Self {
        self.status_timeout = timeout;
        self
    }

    /// Get the device path of the modem
    pub fn device_path(&self) -> &str {
        &self.device_path
    }

    async fn write_tagged(&mut self, tag: u8, payload: &[u8]) -> Result<()> {
        let mut body = Vec::with_capacity(payload.len() + 1);
        body.push(tag);
        body.extend_from_slice(payload);
        let frame = encode_frame(&body)?;

        self.port.write_all(&frame).await
            .map_err(|e| RemoteError::Radio(format!("Failed to write to modem: {}", e)))?;
        self.port.flush().await
            .map_err(|e| RemoteError::Radio(format!("Failed to flush modem port: {}", e)))?;
        Ok(())
    }

    /// Read once and sort complete frames.
    ///
    /// Returns the send status if one arrived, and whether any bytes were read.
    async fn read_frames(&mut self, wait: Duration) -> Result<(Option<bool>, bool)> {
        let mut buf = [0u8; VESC_RX_BUFFER_SIZE];
        let count = self.port.read_available(&mut buf, wait).await
            .map_err(|e| RemoteError::Radio(format!("Failed to read from modem: {}", e)))?;

        let mut status = None;
        for result in self.decoder.feed(&buf[..count]) {
            let frame = match result {
                Ok(frame) => frame,
                Err(e) => {
                    debug!("Dropping modem frame: {}", e);
                    continue;
                }
            };

            match frame.payload.split_first() {
                Some((&(TAG_DATA | TAG_ACK_PAYLOAD), data)) => self.inbox.push_back(data.to_vec()),
                Some((&TAG_SEND_STATUS, rest)) => {
                    status = Some(rest.first().is_some_and(|&ok| ok != 0));
                }
                Some((&tag, _)) => debug!("Ignoring modem frame with tag 0x{:02X}", tag),
                None => debug!("Ignoring empty modem frame"),
            }
        }

        Ok((status, count > 0))
    }
}

#[async_trait]
impl RadioLink for SerialRadio {
    async fn send(&mut self, payload: &[u8]) -> Result<bool> {
        self.write_tagged(TAG_DATA, payload).await?;

        let deadline = tokio::time::Instant::now() + self.status_timeout;
        loop {
            let remaining = deadline.saturating_duration_since(tokio::time::Instant::now());
            if remaining.is_zero() {
                break;
            }

            let (status, got_bytes) = self.read_frames(remaining).await?;
            if let Some(acknowledged) = status {
                return Ok(acknowledged);
            }
            if !got_bytes {
                break;
            }
        }

        warn!("No send status from radio modem within {} ms", self.status_timeout.as_millis());
        Ok(false)
    }

    async fn try_receive(&mut self) -> Result<Option<Vec<u8>>> {
        if self.inbox.is_empty() {
            self.read_frames(Duration::ZERO).await?;
        }
        Ok(self.inbox.pop_front())
    }

    async fn set_ack_payload(&mut self, payload: &[u8]) -> Result<()> {
        self.write_tagged(TAG_ACK_PAYLOAD, payload).await
    }
}
