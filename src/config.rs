//! # Configuration Module
//!
//! Handles loading and validating configuration from TOML files.
//!
//! Every section and field is optional; omitted values take the defaults
//! below, which are also what [`Config::default`] returns.

use serde::Deserialize;
use serde::de::Error;
use std::fs;
use std::path::Path;

use crate::error::{RemoteError, Result};

/// Main configuration structure
#[derive(Debug, Deserialize, Clone, Default)]
pub struct Config {
    #[serde(default)]
    pub serial: SerialConfig,
    #[serde(default)]
    pub radio: RadioConfig,
    #[serde(default)]
    pub link: LinkConfig,
    #[serde(default)]
    pub control: ControlConfig,
    #[serde(default)]
    pub telemetry: TelemetryConfig,
    #[serde(default)]
    pub ride: RideConfig,
    #[serde(default)]
    pub logging: LoggingConfig,
}

/// Motor controller serial port configuration
#[derive(Debug, Deserialize, Clone)]
pub struct SerialConfig {
    #[serde(default = "default_serial_port")]
    pub port: String,

    #[serde(default = "default_baud_rate")]
    pub baud_rate: u32,

    /// Upper bound on a single read poll
    #[serde(default = "default_timeout_ms")]
    pub timeout_ms: u64,

    /// Minimum spacing of GET_VALUES requests
    #[serde(default = "default_request_interval_ms")]
    pub request_interval_ms: u64,
}

/// Radio modem serial port configuration
#[derive(Debug, Deserialize, Clone)]
pub struct RadioConfig {
    #[serde(default = "default_radio_port")]
    pub port: String,

    #[serde(default = "default_baud_rate")]
    pub baud_rate: u32,
}

/// Radio link supervision
#[derive(Debug, Deserialize, Clone)]
pub struct LinkConfig {
    #[serde(default = "default_link_timeout_ms")]
    pub timeout_ms: u64,
}

/// Control loop, interlock and output limits
#[derive(Debug, Deserialize, Clone)]
pub struct ControlConfig {
    #[serde(default = "default_tick_rate_hz")]
    pub tick_rate_hz: u32,

    #[serde(default = "default_wait_for_send_ms")]
    pub wait_for_send_ms: u64,

    #[serde(default = "default_center_band")]
    pub center_band: u8,

    #[serde(default = "default_cruise_min_duty")]
    pub cruise_min_duty: f32,

    #[serde(default = "default_max_duty")]
    pub max_duty: f32,

    #[serde(default = "default_max_current_amps")]
    pub max_current_amps: f32,

    #[serde(default = "default_max_brake_amps")]
    pub max_brake_amps: f32,
}

/// Telemetry configuration
#[derive(Debug, Deserialize, Clone)]
pub struct TelemetryConfig {
    #[serde(default = "default_telemetry_enabled")]
    pub enabled: bool,

    #[serde(default = "default_log_dir")]
    pub log_dir: String,

    #[serde(default = "default_max_records_per_file")]
    pub max_records_per_file: usize,

    #[serde(default = "default_max_files_to_keep")]
    pub max_files_to_keep: usize,

    #[serde(default = "default_log_interval_ms")]
    pub log_interval_ms: u64,

    #[serde(default = "default_log_format")]
    pub format: String,
}

/// Drivetrain geometry for speed and distance
#[derive(Debug, Deserialize, Clone)]
pub struct RideConfig {
    #[serde(default = "default_wheel_diameter_mm")]
    pub wheel_diameter_mm: f32,

    /// Wheel pulley teeth over motor pulley teeth
    #[serde(default = "default_gear_ratio")]
    pub gear_ratio: f32,

    #[serde(default = "default_motor_poles")]
    pub motor_poles: u32,

    /// Empirical correction applied to tachometer distance
    #[serde(default = "default_distance_correction")]
    pub distance_correction: f32,
}

/// Process log output
#[derive(Debug, Deserialize, Clone, Default)]
pub struct LoggingConfig {
    /// Directory for a daily rolling log file, stdout only when unset
    #[serde(default)]
    pub file_dir: Option<String>,
}

// Default value functions
fn default_serial_port() -> String { "/dev/ttyUSB0".to_string() }
fn default_baud_rate() -> u32 { 115200 }
fn default_timeout_ms() -> u64 { 5 }
fn default_request_interval_ms() -> u64 { 100 }

fn default_radio_port() -> String { "/dev/ttyACM0".to_string() }

fn default_link_timeout_ms() -> u64 { 100 }

fn default_tick_rate_hz() -> u32 { 100 }
fn default_wait_for_send_ms() -> u64 { 2000 }
fn default_center_band() -> u8 { 10 }
fn default_cruise_min_duty() -> f32 { 0.05 }
fn default_max_duty() -> f32 { 0.95 }
fn default_max_current_amps() -> f32 { 127.5 }
fn default_max_brake_amps() -> f32 { 25.5 }

fn default_telemetry_enabled() -> bool { true }
fn default_log_dir() -> String { "./logs".to_string() }
fn default_max_records_per_file() -> usize { 10000 }
fn default_max_files_to_keep() -> usize { 10 }
fn default_log_interval_ms() -> u64 { 500 }
fn default_log_format() -> String { "jsonl".to_string() }

fn default_wheel_diameter_mm() -> f32 { 200.0 }
fn default_gear_ratio() -> f32 { 3.0 }
fn default_motor_poles() -> u32 { 14 }
fn default_distance_correction() -> f32 { 0.8 }

/// Baud rates accepted for both serial ports
const ALLOWED_BAUD_RATES: &[u32] = &[9600, 19200, 38400, 57600, 115200, 230400, 460800];

/// Control loop rates accepted
const ALLOWED_TICK_RATES: &[u32] = &[50, 100, 200, 500];

impl Default for SerialConfig {
    fn default() -> Self {
        Self {
            port: default_serial_port(),
            baud_rate: default_baud_rate(),
            timeout_ms: default_timeout_ms(),
            request_interval_ms: default_request_interval_ms(),
        }
    }
}

impl Default for RadioConfig {
    fn default() -> Self {
        Self {
            port: default_radio_port(),
            baud_rate: default_baud_rate(),
        }
    }
}

impl Default for LinkConfig {
    fn default() -> Self {
        Self { timeout_ms: default_link_timeout_ms() }
    }
}

impl Default for ControlConfig {
    fn default() -> Self {
        Self {
            tick_rate_hz: default_tick_rate_hz(),
            wait_for_send_ms: default_wait_for_send_ms(),
            center_band: default_center_band(),
            cruise_min_duty: default_cruise_min_duty(),
            max_duty: default_max_duty(),
            max_current_amps: default_max_current_amps(),
            max_brake_amps: default_max_brake_amps(),
        }
    }
}

impl Default for TelemetryConfig {
    fn default() -> Self {
        Self {
            enabled: default_telemetry_enabled(),
            log_dir: default_log_dir(),
            max_records_per_file: default_max_records_per_file(),
            max_files_to_keep: default_max_files_to_keep(),
            log_interval_ms: default_log_interval_ms(),
            format: default_log_format(),
        }
    }
}

impl Default for RideConfig {
    fn default() -> Self {
        Self {
            wheel_diameter_mm: default_wheel_diameter_mm(),
            gear_ratio: default_gear_ratio(),
            motor_poles: default_motor_poles(),
            distance_correction: default_distance_correction(),
        }
    }
}

fn invalid(message: impl std::fmt::Display) -> RemoteError {
    RemoteError::Config(toml::de::Error::custom(message))
}

impl Config {
    /// Load configuration from a TOML file
    ///
    /// # Arguments
    ///
    /// * `path` - Path to the configuration file
    ///
    /// # Returns
    ///
    /// * `Result<Config>` - Loaded and validated configuration
    ///
    /// # Errors
    ///
    /// Returns error if:
    /// - File cannot be read
    /// - TOML parsing fails
    /// - Validation fails
    ///
    /// # Examples
    ///
    /// ```no_run
    /// use emtb_remote::config::Config;
    ///
    /// let config = Config::load("config/default.toml")?;
    /// # Ok::<(), Box<dyn std::error::Error>>(())
    /// ```
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self> {
        let contents = fs::read_to_string(path)?;
        let config: Config = toml::from_str(&contents)?;
        config.validate()?;
        Ok(config)
    }

    /// Validate configuration values
    ///
    /// # Errors
    ///
    /// Returns error if any configuration value is out of valid range
    pub fn validate(&self) -> Result<()> {
        // Serial ports
        if self.serial.port.is_empty() {
            return Err(invalid("serial port cannot be empty"));
        }

        if self.radio.port.is_empty() {
            return Err(invalid("radio port cannot be empty"));
        }

        for (name, baud) in [("serial", self.serial.baud_rate), ("radio", self.radio.baud_rate)] {
            if !ALLOWED_BAUD_RATES.contains(&baud) {
                return Err(invalid(format!(
                    "{} baud_rate must be one of: {:?}",
                    name, ALLOWED_BAUD_RATES
                )));
            }
        }

        if self.serial.timeout_ms == 0 || self.serial.timeout_ms > 1000 {
            return Err(invalid("serial timeout_ms must be between 1 and 1000"));
        }

        if self.serial.request_interval_ms == 0 || self.serial.request_interval_ms > 10000 {
            return Err(invalid("request_interval_ms must be between 1 and 10000"));
        }

        // Link
        if self.link.timeout_ms == 0 || self.link.timeout_ms > 10000 {
            return Err(invalid("link timeout_ms must be between 1 and 10000"));
        }

        // Control
        if !ALLOWED_TICK_RATES.contains(&self.control.tick_rate_hz) {
            return Err(invalid("tick_rate_hz must be one of: 50, 100, 200, 500"));
        }

        if self.control.wait_for_send_ms > 60000 {
            return Err(invalid("wait_for_send_ms must be at most 60000"));
        }

        if !(0.0..=0.5).contains(&self.control.cruise_min_duty) {
            return Err(invalid("cruise_min_duty must be between 0.0 and 0.5"));
        }

        if !(self.control.cruise_min_duty..=1.0).contains(&self.control.max_duty) {
            return Err(invalid("max_duty must be between cruise_min_duty and 1.0"));
        }

        for (name, value) in [
            ("max_current_amps", self.control.max_current_amps),
            ("max_brake_amps", self.control.max_brake_amps),
        ] {
            if !value.is_finite() || value < 0.0 {
                return Err(invalid(format!("{} must be a non-negative number", name)));
            }
        }

        // Telemetry
        if self.telemetry.enabled && self.telemetry.log_dir.is_empty() {
            return Err(invalid("telemetry log_dir cannot be empty when enabled"));
        }

        if self.telemetry.log_interval_ms == 0 || self.telemetry.log_interval_ms > 60000 {
            return Err(invalid("log_interval_ms must be between 1 and 60000"));
        }

        if self.telemetry.max_records_per_file == 0 {
            return Err(invalid("max_records_per_file must be greater than 0"));
        }

        if self.telemetry.max_files_to_keep == 0 {
            return Err(invalid("max_files_to_keep must be greater than 0"));
        }

        if self.telemetry.format != "jsonl" {
            return Err(invalid("log format must be 'jsonl' (only supported format)"));
        }

        // Ride geometry
        if self.ride.wheel_diameter_mm <= 0.0 || self.ride.gear_ratio <= 0.0 {
            return Err(invalid("wheel_diameter_mm and gear_ratio must be positive"));
        }

        if self.ride.motor_poles < 2 || self.ride.motor_poles % 2 != 0 {
            return Err(invalid("motor_poles must be an even number of at least 2"));
        }

        if self.ride.distance_correction <= 0.0 || self.ride.distance_correction > 2.0 {
            return Err(invalid("distance_correction must be in (0.0, 2.0]"));
        }

        Ok(())
    }
}
