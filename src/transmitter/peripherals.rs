//! # Transmitter Peripherals
//!
//! Hardware seams of the hand-held transmitter: analog inputs and buttons,
//! settings storage, and the display.

use std::fmt;
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};
use tracing::info;

use crate::error::{RemoteError, Result};

/// Full-scale reading of a 10-bit analog channel
pub const ANALOG_MAX: u16 = 1023;

/// Potentiometers and buttons
#[cfg_attr(test, mockall::automock)]
pub trait AnalogInput: Send {
    /// Throttle potentiometer, 0..=1023
    fn throttle(&mut self) -> u16;

    /// Forward current limit potentiometer, 0..=1023
    fn amp_fwd_pot(&mut self) -> u16;

    /// Brake current limit potentiometer, 0..=1023
    fn amp_break_pot(&mut self) -> u16;

    /// Debounced cruise button
    fn cruise_button(&mut self) -> bool;

    /// Settings button
    fn settings_button(&mut self) -> bool;
}

/// User settings kept across power cycles
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Settings {
    /// Throttle counts sent as deadband
    pub deadband: u8,
    /// Forward limit at full pot, 0.5 A counts
    pub amp_fwd_max: u8,
    /// Brake limit at full pot, 0.1 A counts
    pub amp_break_max: u8,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            deadband: 10,
            amp_fwd_max: 80,
            amp_break_max: 200,
        }
    }
}

/// Non-volatile settings store
#[cfg_attr(test, mockall::automock)]
pub trait PersistentSettings: Send {
    /// Stored settings, `None` if nothing was ever saved
    fn load(&mut self) -> Result<Option<Settings>>;

    /// Persist settings
    fn store(&mut self, settings: &Settings) -> Result<()>;
}

/// Settings kept in a small TOML file
#[derive(Debug, Clone)]
pub struct SettingsFile {
    path: PathBuf,
}

impl SettingsFile {
    pub fn new<P: AsRef<Path>>(path: P) -> Self {
        Self { path: path.as_ref().to_path_buf() }
    }
}

impl PersistentSettings for SettingsFile {
    fn load(&mut self) -> Result<Option<Settings>> {
        if !self.path.exists() {
            return Ok(None);
        }
        let contents = fs::read_to_string(&self.path)?;
        Ok(Some(toml::from_str(&contents)?))
    }

    fn store(&mut self, settings: &Settings) -> Result<()> {
        let contents = toml::to_string(settings)
            .map_err(|e| RemoteError::Io(std::io::Error::new(std::io::ErrorKind::InvalidData, e)))?;
        fs::write(&self.path, contents)?;
        info!("Saved settings to {}", self.path.display());
        Ok(())
    }
}

/// Item highlighted in the settings menu
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SettingsItem {
    Save,
    Deadband,
    AmpFwd,
    AmpBreak,
}

impl SettingsItem {
    /// Next item down the menu, stopping at the last.
    pub fn next(self) -> Self {
        match self {
            Self::Save => Self::Deadband,
            Self::Deadband => Self::AmpFwd,
            Self::AmpFwd | Self::AmpBreak => Self::AmpBreak,
        }
    }

    /// Previous item, stopping at the first.
    pub fn previous(self) -> Self {
        match self {
            Self::Save | Self::Deadband => Self::Save,
            Self::AmpFwd => Self::Deadband,
            Self::AmpBreak => Self::AmpFwd,
        }
    }
}

/// Values shown while riding
#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub struct RideView {
    pub speed_kmh: f32,
    pub motor_amps: f32,
    pub battery_amps: f32,
    pub battery_volts: f32,
    pub duty: f32,
    pub ride_time: Duration,
    pub distance_km: f32,
    /// Last transmit was acknowledged
    pub link_ok: bool,
}

/// What the display should show
#[derive(Debug, Clone, PartialEq)]
pub enum Screen {
    /// Settings button held at boot
    SettingsHold,
    /// Before the send gate opens
    Starting,
    Ride(RideView),
    Settings {
        /// Values being edited
        current: Settings,
        /// Values last persisted; differing entries are unsaved
        stored: Settings,
        selected: SettingsItem,
    },
}

impl fmt::Display for Screen {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Screen::SettingsHold => write!(f, "Settings..."),
            Screen::Starting => write!(f, "START"),
            Screen::Ride(view) => {
                let seconds = view.ride_time.as_secs();
                write!(
                    f,
                    "{:.0} km/h | Mot {:.0} A | Bat {:.0} A {:.1} V | Time {}:{:02} | {:.2} km | Duty {:.0}%{}",
                    view.speed_kmh,
                    view.motor_amps,
                    view.battery_amps,
                    view.battery_volts,
                    seconds / 60,
                    seconds % 60,
                    view.distance_km,
                    view.duty * 100.0,
                    if view.link_ok { "" } else { " | NO LINK" }
                )
            }
            Screen::Settings { current, stored, selected } => {
                let mark = |item: SettingsItem| if item == *selected { ">" } else { " " };
                let dirty = |changed: bool| if changed { "*" } else { "" };
                write!(
                    f,
                    "SETTINGS {}Save {}Deadband {}{} {}FWD {:.1} A{} {}Break {:.1} A{}",
                    mark(SettingsItem::Save),
                    mark(SettingsItem::Deadband),
                    current.deadband,
                    dirty(current.deadband != stored.deadband),
                    mark(SettingsItem::AmpFwd),
                    current.amp_fwd_max as f32 * 0.5,
                    dirty(current.amp_fwd_max != stored.amp_fwd_max),
                    mark(SettingsItem::AmpBreak),
                    current.amp_break_max as f32 * 0.1,
                    dirty(current.amp_break_max != stored.amp_break_max),
                )
            }
        }
    }
}

/// Transmitter display
#[cfg_attr(test, mockall::automock)]
pub trait Display: Send {
    fn render(&mut self, screen: &Screen) -> Result<()>;
}
