//! # Transmitter Module
//!
//! The hand-held side of the remote: samples the throttle and limit
//! potentiometers, sends the remote intent over the radio and shows the
//! telemetry returned in the acknowledgements.
//!
//! ## Modes
//!
//! ```text
//! boot --(settings held > 4 s)--> Settings --(save)--> AwaitingStorage --> Normal
//!   \                                                                       ^
//!    +---------------------------(released)---------------------------------+
//! ```
//!
//! Nothing is transmitted during the first 5 s after boot.

pub mod peripherals;
pub mod ride;
pub mod sampling;

use std::time::{Duration, Instant};

use tracing::{debug, info, warn};

use crate::error::Result;
use crate::link::intent::RemoteIntent;
use crate::radio::ack::decode_ack;
use crate::radio::RadioLink;
use crate::vesc::protocol::TelemetrySnapshot;

use peripherals::{AnalogInput, Display, PersistentSettings, RideView, Screen, Settings, SettingsItem};
use ride::{RideMetrics, RideTimer};
use sampling::{scale_amp_pot, ThrottleFilter};

/// Time after boot before the first transmission
pub const WAIT_BEFORE_SEND: Duration = Duration::from_millis(5000);

/// Settings button hold at boot that opens the settings menu
pub const SETTINGS_HOLD: Duration = Duration::from_millis(4000);

/// Settings button hold while riding that resets the ride timer
pub const RIDE_TIME_RESET_HOLD: Duration = Duration::from_millis(2000);

/// Minimum spacing of ride screen refreshes
pub const DISPLAY_REFRESH: Duration = Duration::from_millis(500);

/// Raw throttle above which the settings menu steps up
pub const MENU_STICK_HIGH: u16 = 712;

/// Raw throttle below which the settings menu steps down
pub const MENU_STICK_LOW: u16 = 312;

/// Raw throttle band that re-arms the menu stick
pub const MENU_STICK_REARM: std::ops::RangeInclusive<u16> = 413..=611;

/// Transmitter operating mode
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Mode {
    /// Sampling and, once the send gate opens, transmitting
    Normal,
    /// Editing settings with the throttle stick and cruise button
    Settings,
    /// Settings saved; persisted on the next tick
    AwaitingStorage,
}

/// Hand-held transmitter
pub struct Transmitter {
    input: Box<dyn AnalogInput>,
    storage: Box<dyn PersistentSettings>,
    display: Box<dyn Display>,
    radio: Box<dyn RadioLink>,
    mode: Mode,
    booted_at: Instant,
    boot_checked: bool,
    send_enabled: bool,
    settings: Settings,
    stored: Settings,
    selected: SettingsItem,
    stick_armed: bool,
    filter: ThrottleFilter,
    telemetry: Option<TelemetrySnapshot>,
    link_ok: bool,
    metrics: RideMetrics,
    timer: RideTimer,
    settings_held_since: Option<Instant>,
    last_render: Option<Instant>,
}

impl std::fmt::Debug for Transmitter {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Transmitter")
            .field("mode", &self.mode)
            .field("send_enabled", &self.send_enabled)
            .field("settings", &self.settings)
            .finish_non_exhaustive()
    }
}

impl Transmitter {
    /// Boot the transmitter, loading stored settings.
    ///
    /// # Errors
    ///
    /// Returns the storage error if stored settings cannot be read
    pub fn new(
        input: Box<dyn AnalogInput>,
        mut storage: Box<dyn PersistentSettings>,
        display: Box<dyn Display>,
        radio: Box<dyn RadioLink>,
        metrics: RideMetrics,
        now: Instant,
    ) -> Result<Self> {
        let settings = storage.load()?.unwrap_or_else(|| {
            info!("No stored settings, using defaults");
            Settings::default()
        });

        Ok(Self {
            input,
            storage,
            display,
            radio,
            mode: Mode::Normal,
            booted_at: now,
            boot_checked: false,
            send_enabled: false,
            settings,
            stored: settings,
            selected: SettingsItem::Save,
            stick_armed: true,
            filter: ThrottleFilter::new(),
            telemetry: None,
            link_ok: false,
            metrics,
            timer: RideTimer::new(now),
            settings_held_since: None,
            last_render: None,
        })
    }

    /// Run one transmitter cycle.
    ///
    /// # Returns
    ///
    /// * `Result<Option<RemoteIntent>>` - The intent transmitted this cycle, if any
    pub async fn tick(&mut self, now: Instant) -> Result<Option<RemoteIntent>> {
        match self.mode {
            Mode::Normal => self.normal(now).await,
            Mode::Settings => {
                self.settings_menu()?;
                Ok(None)
            }
            Mode::AwaitingStorage => {
                self.storage.store(&self.settings)?;
                self.stored = self.settings;
                self.mode = Mode::Normal;
                self.last_render = None;
                info!("Settings stored: {:?}", self.settings);
                Ok(None)
            }
        }
    }

    async fn normal(&mut self, now: Instant) -> Result<Option<RemoteIntent>> {
        if !self.boot_checked {
            if self.input.settings_button() {
                if now.saturating_duration_since(self.booted_at) > SETTINGS_HOLD {
                    info!("Entering settings menu");
                    self.mode = Mode::Settings;
                    self.render_settings()?;
                } else {
                    self.display.render(&Screen::SettingsHold)?;
                }
                return Ok(None);
            }
            self.boot_checked = true;
            self.display.render(&Screen::Starting)?;
        }

        let intent = self.sample();

        let sent = if self.send_enabled {
            self.transmit(&intent).await?;
            Some(intent)
        } else {
            if now.saturating_duration_since(self.booted_at) > WAIT_BEFORE_SEND {
                info!("Send gate open");
                self.send_enabled = true;
            }
            None
        };

        self.update_ride_timer(now);
        self.render_ride_if_due(now)?;
        Ok(sent)
    }

    fn sample(&mut self) -> RemoteIntent {
        let throttle = self.filter.push(self.input.throttle());
        let amp_fwd = scale_amp_pot(self.input.amp_fwd_pot(), self.settings.amp_fwd_max);
        let amp_break = scale_amp_pot(self.input.amp_break_pot(), self.settings.amp_break_max);

        RemoteIntent {
            throttle,
            cruise: self.input.cruise_button(),
            deadband: self.settings.deadband,
            amp_fwd,
            amp_break,
        }
    }

    async fn transmit(&mut self, intent: &RemoteIntent) -> Result<()> {
        let acknowledged = self.radio.send(&intent.to_bytes()).await?;
        if acknowledged != self.link_ok {
            if acknowledged {
                info!("Receiver acknowledging");
            } else {
                warn!("Receiver not acknowledging");
            }
        }
        self.link_ok = acknowledged;

        while let Some(payload) = self.radio.try_receive().await? {
            match decode_ack(&payload) {
                Some(snapshot) => self.telemetry = Some(snapshot),
                None => debug!("Ignoring ack payload of {} bytes", payload.len()),
            }
        }
        Ok(())
    }

    fn update_ride_timer(&mut self, now: Instant) {
        if !self.input.settings_button() {
            self.settings_held_since = None;
            return;
        }

        let since = *self.settings_held_since.get_or_insert(now);
        if now.saturating_duration_since(since) >= RIDE_TIME_RESET_HOLD {
            info!("Ride time reset");
            self.timer.reset(now);
            self.settings_held_since = None;
        }
    }

    fn render_ride_if_due(&mut self, now: Instant) -> Result<()> {
        let due = self
            .last_render
            .map_or(true, |last| now.saturating_duration_since(last) >= DISPLAY_REFRESH);
        if !due {
            return Ok(());
        }
        self.last_render = Some(now);
        self.display.render(&Screen::Ride(self.ride_view(now)))
    }

    /// Values for the ride screen.
    pub fn ride_view(&self, now: Instant) -> RideView {
        let snapshot = self.telemetry.unwrap_or_default();
        RideView {
            speed_kmh: self.metrics.speed_kmh(snapshot.rpm),
            motor_amps: snapshot.current_motor,
            battery_amps: snapshot.current_in,
            battery_volts: snapshot.v_in,
            duty: snapshot.duty_now,
            ride_time: self.timer.elapsed(now),
            distance_km: self.metrics.distance_km(snapshot.tachometer_abs),
            link_ok: self.link_ok,
        }
    }

    /// One step of the settings menu.
    ///
    /// Stick up or down moves the selection; with cruise held it changes the
    /// selected value instead. Each deflection acts once until the stick
    /// returns near center. Raising `Save` stores the settings.
    fn settings_menu(&mut self) -> Result<()> {
        let stick = self.input.throttle();
        let modify = self.input.cruise_button();

        if self.stick_armed && (stick > MENU_STICK_HIGH || stick < MENU_STICK_LOW) {
            let up = stick > MENU_STICK_HIGH;
            self.stick_armed = false;

            if modify {
                self.change_setting(up);
            } else if up {
                self.selected = self.selected.next();
            } else {
                self.selected = self.selected.previous();
            }
        } else if MENU_STICK_REARM.contains(&stick) {
            self.stick_armed = true;
        }

        if self.mode == Mode::Settings {
            self.render_settings()?;
        }
        Ok(())
    }

    fn change_setting(&mut self, up: bool) {
        let step = |value: u8| if up { value.saturating_add(1) } else { value.saturating_sub(1) };

        match self.selected {
            SettingsItem::Save => {
                if up {
                    info!("Saving settings");
                    self.mode = Mode::AwaitingStorage;
                }
            }
            SettingsItem::Deadband => self.settings.deadband = step(self.settings.deadband),
            SettingsItem::AmpFwd => self.settings.amp_fwd_max = step(self.settings.amp_fwd_max),
            SettingsItem::AmpBreak => self.settings.amp_break_max = step(self.settings.amp_break_max),
        }
    }

    fn render_settings(&mut self) -> Result<()> {
        self.display.render(&Screen::Settings {
            current: self.settings,
            stored: self.stored,
            selected: self.selected,
        })
    }

    /// Current menu state.
    pub fn mode(&self) -> Mode {
        self.mode
    }

    /// Settings in effect, including unsaved edits.
    pub fn settings(&self) -> Settings {
        self.settings
    }

    /// Whether the boot send gate has opened.
    pub fn send_enabled(&self) -> bool {
        self.send_enabled
    }

    /// Telemetry from the latest acknowledgement.
    pub fn telemetry(&self) -> Option<&TelemetrySnapshot> {
        self.telemetry.as_ref()
    }
}
