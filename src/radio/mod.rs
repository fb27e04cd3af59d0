//! # Radio Module
//!
//! Wireless link between the hand-held transmitter and the board receiver.
//!
//! The transmitter sends the 5-byte remote intent; the receiver answers every
//! packet with an auto-acknowledgement that carries the latest telemetry.
//! Channel, power amplifier and link CRC settings belong to the radio itself
//! and are not configured here.

pub mod ack;
pub mod serial_radio;

use async_trait::async_trait;

use crate::error::Result;

pub use serial_radio::SerialRadio;

/// A packet radio with acknowledgement payloads
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait RadioLink: Send {
    /// Transmit one packet
    ///
    /// Returns whether the peer acknowledged it.
    async fn send(&mut self, payload: &[u8]) -> Result<bool>;

    /// Next pending inbound packet or acknowledgement payload, if any
    async fn try_receive(&mut self) -> Result<Option<Vec<u8>>>;

    /// Payload returned with the next acknowledgement this side sends
    async fn set_ack_payload(&mut self, payload: &[u8]) -> Result<()>;
}
