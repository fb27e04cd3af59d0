//! # Receiver Bridge
//!
//! One control tick of the board-side receiver. The steps run in a fixed
//! order every tick:
//!
//! 1. Poll the motor controller and decode any telemetry response
//! 2. Publish the latest snapshot as the radio acknowledgement payload
//! 3. Drain every pending radio packet into the link supervisor
//! 4. Supervise the link (neutral once stale)
//! 5. Arbitrate the output
//! 6. Encode and write each command
//! 7. Request the next telemetry
//! 8. Log a telemetry record if one is due

use std::time::{Duration, Instant};

use tracing::{debug, info, warn};

use crate::config::Config;
use crate::control::arbiter::{neutral_commands, OutputArbiter, OutputMode};
use crate::error::{RemoteError, Result};
use crate::link::intent::RemoteIntent;
use crate::link::supervisor::LinkSupervisor;
use crate::radio::ack::encode_ack;
use crate::radio::RadioLink;
use crate::serial::VescSerial;
use crate::telemetry::{TelemetryLogger, TelemetryRecord};
use crate::vesc::encoder::MotorCommand;
use crate::vesc::protocol::TelemetrySnapshot;

/// Upper bound on radio packets drained per tick
const MAX_RADIO_PACKETS_PER_TICK: usize = 32;

/// What one tick decided
#[derive(Debug, Clone, PartialEq)]
pub struct TickReport {
    /// Supervised intent the arbiter acted on
    pub intent: RemoteIntent,
    /// Whether the link was fresh
    pub link_fresh: bool,
    /// Arbiter mode after the tick
    pub mode: OutputMode,
    /// Commands written to the controller
    pub commands: Vec<MotorCommand>,
}

/// Board-side receiver: radio in, motor controller out
pub struct ReceiverBridge {
    serial: VescSerial,
    radio: Box<dyn RadioLink>,
    supervisor: LinkSupervisor,
    arbiter: OutputArbiter,
    telemetry: Option<TelemetrySnapshot>,
    logger: Option<TelemetryLogger>,
    log_interval: Duration,
    last_log: Option<Instant>,
    radio_errors: u64,
    radio_failing: bool,
}

impl std::fmt::Debug for ReceiverBridge {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ReceiverBridge")
            .field("serial", &self.serial)
            .field("supervisor", &self.supervisor)
            .field("arbiter", &self.arbiter)
            .finish_non_exhaustive()
    }
}

impl ReceiverBridge {
    /// Assemble a receiver from opened transports.
    ///
    /// The telemetry logger is only used when given.
    pub fn new(
        config: &Config,
        serial: VescSerial,
        radio: Box<dyn RadioLink>,
        logger: Option<TelemetryLogger>,
    ) -> Self {
        Self {
            serial,
            radio,
            supervisor: LinkSupervisor::new(Duration::from_millis(config.link.timeout_ms)),
            arbiter: OutputArbiter::from_config(&config.control),
            telemetry: None,
            logger,
            log_interval: Duration::from_millis(config.telemetry.log_interval_ms),
            last_log: None,
            radio_errors: 0,
            radio_failing: false,
        }
    }

    /// Run one control tick.
    ///
    /// Supervision, arbitration and the command writes run on every tick,
    /// whatever state the transports are in. Radio failures count as "no
    /// message this tick" so the link goes stale and neutral is sent.
    ///
    /// # Errors
    ///
    /// Returns the first serial error, after the rest of the tick has run.
    /// Decoding problems never fail a tick.
    pub async fn tick(&mut self, now: Instant) -> Result<TickReport> {
        let mut first_error = None;

        match self.serial.poll_telemetry().await {
            Ok(Some(snapshot)) => self.telemetry = Some(snapshot),
            Ok(None) => {}
            Err(e) => first_error = Some(e),
        }

        self.service_radio(now).await;

        let intent = self.supervisor.tick(now);
        let link_fresh = self.supervisor.is_fresh();
        let commands = self.arbiter.tick(now, &intent, link_fresh, self.telemetry.as_ref());

        // A failed write must not keep the rest of the tick's commands off the wire
        for command in &commands {
            if let Err(e) = self.serial.send_command(command).await {
                first_error = first_error.or(Some(e));
            }
        }

        if let Err(e) = self.serial.request_values(now).await {
            first_error = first_error.or(Some(e));
        }

        let mode = self.arbiter.mode();
        self.log_if_due(now, intent, mode, link_fresh);

        match first_error {
            Some(e) => Err(e),
            None => Ok(TickReport { intent, link_fresh, mode, commands }),
        }
    }

    /// Publish the ack payload and drain pending radio messages.
    async fn service_radio(&mut self, now: Instant) {
        let snapshot = self.telemetry.unwrap_or_default();
        if let Err(e) = self.radio.set_ack_payload(&encode_ack(&snapshot)).await {
            self.radio_failed(e);
            return;
        }

        for _ in 0..MAX_RADIO_PACKETS_PER_TICK {
            match self.radio.try_receive().await {
                Ok(Some(payload)) => {
                    self.supervisor.on_receive_bytes(&payload, now);
                }
                Ok(None) => break,
                Err(e) => {
                    self.radio_failed(e);
                    return;
                }
            }
        }

        if self.radio_failing {
            info!("Radio modem recovered after {} errors", self.radio_errors);
            self.radio_failing = false;
        }
    }

    fn radio_failed(&mut self, error: RemoteError) {
        self.radio_errors += 1;
        if self.radio_failing {
            debug!("Radio modem still failing: {}", error);
        } else {
            warn!("Radio modem error, treating as no message: {}", error);
            self.radio_failing = true;
        }
    }

    /// Send zero current in both directions.
    pub async fn stop(&mut self) -> Result<()> {
        for command in neutral_commands() {
            self.serial.send_command(&command).await?;
        }
        Ok(())
    }

    fn log_if_due(&mut self, now: Instant, intent: RemoteIntent, mode: OutputMode, link_fresh: bool) {
        let Some(logger) = self.logger.as_mut() else {
            return;
        };

        let due = self
            .last_log
            .map_or(true, |last| now.saturating_duration_since(last) >= self.log_interval);
        if !due {
            return;
        }
        self.last_log = Some(now);

        let record = TelemetryRecord::now(intent, self.telemetry, mode, link_fresh, self.serial.counters());
        if let Err(e) = logger.log(&record) {
            warn!("Disabling telemetry log after write failure: {}", e);
            self.logger = None;
        } else {
            debug!("Logged telemetry record");
        }
    }

    /// Latest decoded telemetry.
    pub fn telemetry(&self) -> Option<&TelemetrySnapshot> {
        self.telemetry.as_ref()
    }

    /// Link supervisor state and counters.
    pub fn supervisor(&self) -> &LinkSupervisor {
        &self.supervisor
    }

    /// Motor controller transport.
    pub fn serial(&self) -> &VescSerial {
        &self.serial
    }

    /// Radio modem errors seen so far.
    pub fn radio_errors(&self) -> u64 {
        self.radio_errors
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::radio::ack::decode_ack;
    use crate::radio::MockRadioLink;
    use crate::serial::port_trait::mocks::MockSerialPort;
    use crate::vesc::decoder::fixtures::{sample_snapshot, values_payload};
    use crate::vesc::encoder::{encode_command_frame, encode_frame, encode_get_values_request};
    use mockall::Sequence;
    use std::collections::VecDeque;
    use std::sync::{Arc, Mutex};

    fn ms(value: u64) -> Duration {
        Duration::from_millis(value)
    }

    fn riding(throttle: i8) -> RemoteIntent {
        RemoteIntent {
            throttle,
            cruise: false,
            deadband: 5,
            amp_fwd: 80,
            amp_break: 200,
        }
    }

    fn fast_config() -> Config {
        let mut config = Config::default();
        config.control.wait_for_send_ms = 10;
        config
    }

    /// Radio mock fed from a shared inbox; records every ack payload.
    fn scripted_radio(
        inbox: Arc<Mutex<VecDeque<Vec<u8>>>>,
        acks: Arc<Mutex<Vec<Vec<u8>>>>,
    ) -> MockRadioLink {
        let mut radio = MockRadioLink::new();
        radio
            .expect_set_ack_payload()
            .returning(move |payload| {
                acks.lock().unwrap().push(payload.to_vec());
                Ok(())
            });
        radio
            .expect_try_receive()
            .returning(move || Ok(inbox.lock().unwrap().pop_front()));
        radio.expect_send().never();
        radio
    }

    /// Radio mock that accepts `healthy_ticks` ack updates, then fails every call.
    fn modem_failing_after(inbox: Arc<Mutex<VecDeque<Vec<u8>>>>, healthy_ticks: usize) -> MockRadioLink {
        let mut radio = MockRadioLink::new();
        let mut calls = 0;
        radio.expect_set_ack_payload().returning(move |_| {
            calls += 1;
            if calls > healthy_ticks {
                Err(RemoteError::Radio("modem gone".to_string()))
            } else {
                Ok(())
            }
        });
        radio
            .expect_try_receive()
            .returning(move || Ok(inbox.lock().unwrap().pop_front()));
        radio
    }

    struct Harness {
        bridge: ReceiverBridge,
        serial: MockSerialPort,
        inbox: Arc<Mutex<VecDeque<Vec<u8>>>>,
        acks: Arc<Mutex<Vec<Vec<u8>>>>,
    }

    impl Harness {
        fn new(config: &Config) -> Self {
            Self::with_radio(config, scripted_radio)
        }

        fn with_radio(
            config: &Config,
            radio: impl FnOnce(Arc<Mutex<VecDeque<Vec<u8>>>>, Arc<Mutex<Vec<Vec<u8>>>>) -> MockRadioLink,
        ) -> Self {
            let serial = MockSerialPort::new();
            let inbox = Arc::new(Mutex::new(VecDeque::new()));
            let acks = Arc::new(Mutex::new(Vec::new()));
            let bridge = ReceiverBridge::new(
                config,
                VescSerial::from_port(Box::new(serial.clone()), "/dev/mock", &config.serial),
                Box::new(radio(inbox.clone(), acks.clone())),
                None,
            );
            Self { bridge, serial, inbox, acks }
        }

        /// Ticks at `t0` and `t0 + 11 ms` with a centered stick, opening the
        /// 10 ms interlock of `fast_config`.
        async fn release(&mut self, t0: Instant) {
            self.send(riding(0));
            self.bridge.tick(t0).await.unwrap();
            self.send(riding(0));
            self.bridge.tick(t0 + ms(11)).await.unwrap();
        }

        fn send(&self, intent: RemoteIntent) {
            self.inbox.lock().unwrap().push_back(intent.to_bytes().to_vec());
        }

        fn commands_written(&self) -> Vec<Vec<u8>> {
            let request = encode_get_values_request();
            self.serial
                .get_written_data()
                .into_iter()
                .filter(|frame| *frame != request)
                .collect()
        }
    }

    #[tokio::test]
    async fn test_silent_until_interlock_and_link() {
        let mut harness = Harness::new(&Config::default());
        let t0 = Instant::now();

        let report = harness.bridge.tick(t0).await.unwrap();
        assert!(report.commands.is_empty());
        assert!(!report.link_fresh);
        assert_eq!(report.mode, OutputMode::Idle);
        assert_eq!(report.intent, RemoteIntent::default());
        assert!(harness.commands_written().is_empty());
    }

    #[tokio::test]
    async fn test_forward_throttle_reaches_controller() {
        let mut harness = Harness::new(&fast_config());
        let t0 = Instant::now();

        harness.send(riding(0));
        harness.bridge.tick(t0).await.unwrap();
        harness.send(riding(0));
        harness.bridge.tick(t0 + ms(11)).await.unwrap();

        harness.send(riding(127));
        let report = harness.bridge.tick(t0 + ms(20)).await.unwrap();
        assert_eq!(report.commands, vec![MotorCommand::SetCurrent(40.0)]);

        let written = harness.commands_written();
        assert_eq!(written.last(), Some(&encode_command_frame(&MotorCommand::SetCurrent(40.0))));
    }

    #[tokio::test]
    async fn test_last_radio_packet_wins() {
        let mut harness = Harness::new(&fast_config());
        let t0 = Instant::now();
        harness.send(riding(0));
        harness.bridge.tick(t0).await.unwrap();
        harness.send(riding(0));
        harness.bridge.tick(t0 + ms(11)).await.unwrap();

        harness.send(riding(127));
        harness.inbox.lock().unwrap().push_back(vec![1, 2, 3]);
        harness.send(riding(-127));
        let report = harness.bridge.tick(t0 + ms(20)).await.unwrap();

        assert_eq!(report.intent.throttle, -127);
        assert!(matches!(report.commands.as_slice(), [MotorCommand::SetCurrentBrake(_)]));
        assert_eq!(harness.bridge.supervisor().dropped(), 1);
    }

    #[tokio::test]
    async fn test_link_loss_forces_neutral_pair() {
        let mut harness = Harness::new(&fast_config());
        let t0 = Instant::now();
        harness.send(riding(0));
        harness.bridge.tick(t0).await.unwrap();
        harness.send(riding(0));
        harness.bridge.tick(t0 + ms(11)).await.unwrap();
        harness.send(riding(100));
        harness.bridge.tick(t0 + ms(20)).await.unwrap();

        // Transmitter goes silent
        let report = harness.bridge.tick(t0 + ms(150)).await.unwrap();
        assert!(!report.link_fresh);
        assert_eq!(report.mode, OutputMode::Neutral);
        assert_eq!(report.intent.throttle, 0);
        assert_eq!(report.commands, neutral_commands());
    }

    #[tokio::test]
    async fn test_radio_failure_still_forces_neutral() {
        let mut harness = Harness::with_radio(&fast_config(), |inbox, _acks| modem_failing_after(inbox, 3));
        let t0 = Instant::now();
        harness.release(t0).await;

        harness.send(riding(127));
        let report = harness.bridge.tick(t0 + ms(20)).await.unwrap();
        assert_eq!(report.commands, vec![MotorCommand::SetCurrent(40.0)]);

        // Modem errors on every call from here on
        let mut reports = Vec::new();
        for step in 1..=50 {
            reports.push(harness.bridge.tick(t0 + ms(20 + step * 10)).await.unwrap());
        }

        // Fresh until the 100 ms timeout, neutral after it
        assert!(reports[9].link_fresh);
        assert_eq!(reports[9].commands, vec![MotorCommand::SetCurrent(40.0)]);
        for report in &reports[10..] {
            assert!(!report.link_fresh);
            assert_eq!(report.mode, OutputMode::Neutral);
            assert_eq!(report.commands, neutral_commands());
        }

        let written = harness.commands_written();
        assert_eq!(
            written.last(),
            Some(&encode_command_frame(&MotorCommand::SetCurrentBrake(0.0)))
        );
        assert_eq!(harness.bridge.radio_errors(), 50);
    }

    #[tokio::test]
    async fn test_receive_error_keeps_messages_drained_before_it() {
        let mut radio = MockRadioLink::new();
        radio.expect_set_ack_payload().returning(|_| Ok(()));
        let mut queue: VecDeque<Result<Option<Vec<u8>>>> = VecDeque::from(vec![
            Ok(Some(riding(0).to_bytes().to_vec())),
            Err(RemoteError::Radio("framing".to_string())),
        ]);
        radio
            .expect_try_receive()
            .returning(move || queue.pop_front().unwrap_or(Ok(None)));

        let mut harness = Harness::with_radio(&Config::default(), |_, _| radio);
        let report = harness.bridge.tick(Instant::now()).await.unwrap();

        assert!(report.link_fresh);
        assert_eq!(harness.bridge.supervisor().messages(), 1);
        assert_eq!(harness.bridge.radio_errors(), 1);
    }

    #[tokio::test]
    async fn test_transmitter_booting_deflected_gets_no_output() {
        let mut harness = Harness::new(&Config::default());
        let t0 = Instant::now();

        // Receiver powered for 3 s with no transmitter
        for step in 0..=30 {
            let report = harness.bridge.tick(t0 + ms(step * 100)).await.unwrap();
            assert!(report.commands.is_empty());
        }

        harness.send(riding(127));
        let report = harness.bridge.tick(t0 + ms(3100)).await.unwrap();
        assert!(report.link_fresh);
        assert_eq!(report.mode, OutputMode::Idle);
        assert!(report.commands.is_empty());
        assert!(harness.commands_written().is_empty());
    }

    #[tokio::test]
    async fn test_failed_neutral_write_is_retried_next_tick() {
        let mut harness = Harness::new(&fast_config());
        let t0 = Instant::now();
        harness.release(t0).await;
        harness.send(riding(100));
        harness.bridge.tick(t0 + ms(20)).await.unwrap();

        // Link goes stale and the first half of the neutral pair fails
        harness.serial.fail_next_write(std::io::ErrorKind::BrokenPipe);
        let result = harness.bridge.tick(t0 + ms(150)).await;
        assert!(matches!(result, Err(RemoteError::Serial(_))));

        let written = harness.commands_written();
        assert_eq!(
            written.last(),
            Some(&encode_command_frame(&MotorCommand::SetCurrentBrake(0.0)))
        );

        let report = harness.bridge.tick(t0 + ms(160)).await.unwrap();
        assert_eq!(report.commands, neutral_commands());
        let written = harness.commands_written();
        assert_eq!(
            &written[written.len() - 2..],
            &[
                encode_command_frame(&MotorCommand::SetCurrent(0.0)),
                encode_command_frame(&MotorCommand::SetCurrentBrake(0.0)),
            ]
        );
    }

    #[tokio::test]
    async fn test_telemetry_published_as_ack_and_used_for_cruise() {
        let mut harness = Harness::new(&fast_config());
        let t0 = Instant::now();
        harness
            .serial
            .push_read(&encode_frame(&values_payload(&sample_snapshot())).unwrap());

        harness.send(riding(0));
        harness.bridge.tick(t0).await.unwrap();
        harness.send(riding(0));
        harness.bridge.tick(t0 + ms(11)).await.unwrap();

        let acks = harness.acks.lock().unwrap().clone();
        let published = decode_ack(acks.first().unwrap()).unwrap();
        assert_eq!(published.rpm, sample_snapshot().rpm);

        harness.send(RemoteIntent { cruise: true, ..riding(0) });
        let report = harness.bridge.tick(t0 + ms(20)).await.unwrap();
        match report.commands.as_slice() {
            [MotorCommand::SetDuty(duty)] => assert!((duty - 0.42).abs() < 1e-6),
            other => panic!("Expected SetDuty, got: {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_ack_before_telemetry_is_zeroed() {
        let mut harness = Harness::new(&Config::default());
        harness.bridge.tick(Instant::now()).await.unwrap();

        let acks = harness.acks.lock().unwrap().clone();
        assert_eq!(decode_ack(&acks[0]), Some(TelemetrySnapshot::default()));
    }

    #[tokio::test]
    async fn test_requests_telemetry_at_interval() {
        let mut harness = Harness::new(&Config::default());
        let t0 = Instant::now();

        for step in 0..10 {
            harness.bridge.tick(t0 + ms(step * 10)).await.unwrap();
        }
        harness.bridge.tick(t0 + ms(100)).await.unwrap();

        let requests = harness
            .serial
            .get_written_data()
            .into_iter()
            .filter(|frame| *frame == encode_get_values_request())
            .count();
        assert_eq!(requests, 2);
    }

    #[tokio::test]
    async fn test_tick_order_ack_before_receive() {
        let config = Config::default();
        let serial = MockSerialPort::new();
        let mut radio = MockRadioLink::new();
        let mut seq = Sequence::new();
        radio
            .expect_set_ack_payload()
            .times(1)
            .in_sequence(&mut seq)
            .returning(|_| Ok(()));
        radio
            .expect_try_receive()
            .times(1)
            .in_sequence(&mut seq)
            .returning(|| Ok(None));

        let mut bridge = ReceiverBridge::new(
            &config,
            VescSerial::from_port(Box::new(serial), "/dev/mock", &config.serial),
            Box::new(radio),
            None,
        );
        bridge.tick(Instant::now()).await.unwrap();
    }

    #[tokio::test]
    async fn test_stop_sends_neutral_pair() {
        let mut harness = Harness::new(&Config::default());
        harness.bridge.stop().await.unwrap();

        assert_eq!(
            harness.serial.get_written_data(),
            vec![
                encode_command_frame(&MotorCommand::SetCurrent(0.0)),
                encode_command_frame(&MotorCommand::SetCurrentBrake(0.0)),
            ]
        );
    }

    #[tokio::test]
    async fn test_logs_records_at_interval() {
        let dir = tempfile::TempDir::new().unwrap();
        let mut config = Config::default();
        config.telemetry.log_dir = dir.path().to_string_lossy().into_owned();
        config.telemetry.log_interval_ms = 500;

        let serial = MockSerialPort::new();
        let logger = TelemetryLogger::new(&config.telemetry).unwrap();
        let mut bridge = ReceiverBridge::new(
            &config,
            VescSerial::from_port(Box::new(serial), "/dev/mock", &config.serial),
            Box::new(scripted_radio(Default::default(), Default::default())),
            Some(logger),
        );

        let t0 = Instant::now();
        for step in 0..10 {
            bridge.tick(t0 + ms(step * 100)).await.unwrap();
        }

        let path = std::fs::read_dir(dir.path()).unwrap().next().unwrap().unwrap().path();
        let lines = std::fs::read_to_string(path).unwrap().lines().count();
        assert_eq!(lines, 2);
    }
}
