//! # Remote Intent
//!
//! The transmitter's requested state, carried verbatim over the radio link as
//! a fixed 5-byte structure:
//!
//! | Byte | Field | Type | Unit |
//! |------|-------|------|------|
//! | 0 | throttle | i8 | -127 (full brake) .. 127 (full throttle) |
//! | 1 | cruise | bool | 0 = off, anything else = on |
//! | 2 | deadband | u8 | throttle counts |
//! | 3 | amp_fwd | u8 | 0.5 A |
//! | 4 | amp_break | u8 | 0.1 A |

use serde::{Deserialize, Serialize};

/// Size of the wireless intent payload
pub const REMOTE_INTENT_SIZE: usize = 5;

/// Full-scale throttle magnitude
pub const THROTTLE_FULL_SCALE: f32 = 127.0;

/// Forward current limit resolution in amperes per count
pub const AMP_FWD_UNIT: f32 = 0.5;

/// Brake current limit resolution in amperes per count
pub const AMP_BREAK_UNIT: f32 = 0.1;

/// Deadband used before the transmitter has been heard from
///
/// No i8 throttle can leave it, so no current is requested.
pub const STARTUP_DEADBAND: u8 = u8::MAX;

/// Throttle, cruise and limits requested by the transmitter
///
/// # Examples
///
/// ```
/// use emtb_remote::link::intent::RemoteIntent;
///
/// let intent = RemoteIntent { throttle: 64, cruise: false, deadband: 8, amp_fwd: 40, amp_break: 100 };
/// let bytes = intent.to_bytes();
/// assert_eq!(RemoteIntent::from_bytes(&bytes), Some(intent));
/// assert_eq!(intent.forward_limit_amps(), 20.0);
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct RemoteIntent {
    /// Signed throttle, 0 = centered, negative = brake
    pub throttle: i8,

    /// Cruise button held
    pub cruise: bool,

    /// Throttle magnitude treated as no input
    pub deadband: u8,

    /// Forward current limit in 0.5 A counts
    pub amp_fwd: u8,

    /// Brake current limit in 0.1 A counts
    pub amp_break: u8,
}

impl Default for RemoteIntent {
    /// Receiver startup state: centered, no cruise, no current allowed.
    fn default() -> Self {
        Self {
            throttle: 0,
            cruise: false,
            deadband: STARTUP_DEADBAND,
            amp_fwd: 0,
            amp_break: 0,
        }
    }
}

impl RemoteIntent {
    /// Same limits with throttle centered and cruise released.
    #[must_use]
    pub fn neutral(&self) -> Self {
        Self {
            throttle: 0,
            cruise: false,
            ..*self
        }
    }

    /// Whether throttle and cruise are both at rest.
    pub fn is_neutral(&self) -> bool {
        self.throttle == 0 && !self.cruise
    }

    /// Forward current limit in amperes.
    pub fn forward_limit_amps(&self) -> f32 {
        self.amp_fwd as f32 * AMP_FWD_UNIT
    }

    /// Brake current limit in amperes.
    pub fn brake_limit_amps(&self) -> f32 {
        self.amp_break as f32 * AMP_BREAK_UNIT
    }

    /// Wire layout sent by the transmitter.
    pub fn to_bytes(&self) -> [u8; REMOTE_INTENT_SIZE] {
        [
            self.throttle as u8,
            self.cruise as u8,
            self.deadband,
            self.amp_fwd,
            self.amp_break,
        ]
    }

    /// Parses the wire layout.
    ///
    /// Returns `None` unless exactly 5 bytes are given.
    pub fn from_bytes(bytes: &[u8]) -> Option<Self> {
        let bytes: [u8; REMOTE_INTENT_SIZE] = bytes.try_into().ok()?;

        Some(Self {
            throttle: bytes[0] as i8,
            cruise: bytes[1] != 0,
            deadband: bytes[2],
            amp_fwd: bytes[3],
            amp_break: bytes[4],
        })
    }
}
