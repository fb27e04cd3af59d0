//! Analog input conditioning for the transmitter.

use super::peripherals::ANALOG_MAX;

/// Throttle samples averaged to suppress spikes
pub const AVERAGE_WINDOW: usize = 10;

/// Analog reading of a centered throttle
pub const ANALOG_MID: i32 = 512;

/// Moving average of the throttle potentiometer, mapped to -127..=127
///
/// # Examples
///
/// ```
/// use emtb_remote::transmitter::sampling::ThrottleFilter;
///
/// let mut filter = ThrottleFilter::new();
/// assert_eq!(filter.push(512), 0);
/// assert_eq!(filter.push(1023), 63);
/// ```
#[derive(Debug, Clone)]
pub struct ThrottleFilter {
    samples: [u16; AVERAGE_WINDOW],
    index: usize,
    filled: usize,
    sum: u32,
}

impl Default for ThrottleFilter {
    fn default() -> Self {
        Self::new()
    }
}

impl ThrottleFilter {
    #[must_use]
    pub fn new() -> Self {
        Self {
            samples: [0; AVERAGE_WINDOW],
            index: 0,
            filled: 0,
            sum: 0,
        }
    }

    /// Add a raw 10-bit sample and return the averaged throttle.
    ///
    /// Until the window fills the average covers the samples seen so far.
    pub fn push(&mut self, raw: u16) -> i8 {
        let raw = raw.min(ANALOG_MAX);

        self.sum -= self.samples[self.index] as u32;
        self.samples[self.index] = raw;
        self.sum += raw as u32;
        self.index = (self.index + 1) % AVERAGE_WINDOW;
        self.filled = (self.filled + 1).min(AVERAGE_WINDOW);

        let average = (self.sum / self.filled as u32) as i32;
        map_throttle(average)
    }
}

/// Map an averaged analog reading onto the signed throttle range.
pub fn map_throttle(average: i32) -> i8 {
    let span = ANALOG_MAX as i32 - ANALOG_MID;
    ((average - ANALOG_MID) * 127 / span).clamp(-127, 127) as i8
}

/// Scale a limit potentiometer between 0 and `max`.
///
/// `((raw >> 3) * max) >> 7`, so full scale gives slightly under `max`.
pub fn scale_amp_pot(raw: u16, max: u8) -> u8 {
    let coarse = (raw.min(ANALOG_MAX) >> 3) as u32;
    ((coarse * max as u32) >> 7) as u8
}
