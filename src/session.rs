//! Single-writer session state machine.
//!
//! The controller is the only component that mutates sampling state, the
//! recorded time series, and the relay status counters. Listeners hand it
//! events over a channel; exporters and the display sink only ever see
//! immutable views or copies.

use crate::command::{CommandClient, CommandError};
use crate::listener::IngestEvent;
use crate::protocol::{ChannelReadings, CommandRequest, RelayStatus, SensorFrame};
use chrono::{DateTime, Utc};

/// Seconds of data shown by the rolling display window.
const DISPLAY_WINDOW_SECS: f64 = 60.0;

/// Sampling lifecycle. `Idle` only before the first successful start.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SamplingState {
    Idle,
    Sampling,
    Stopped,
}

/// Operator-facing producer link indicator.
///
/// `Connected` flips on the first successfully parsed frame after startup,
/// independent of sampling state: a producer can be connected but idle.
/// `Sampling` supersedes `Connected` while a session is active — frames
/// arriving mid-session keep the indicator at `Sampling`, and the link state
/// they prove is reported as `Connected` (or `Waiting`, if no frame was ever
/// seen) when the session stops.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionHealth {
    /// No frame has been seen yet.
    Waiting,
    /// At least one frame has been parsed.
    Connected,
    /// A session is actively recording.
    Sampling,
}

/// InfluxDB relay health, driven only by status events.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct InfluxStatusCounter {
    pub connected: bool,
    pub last_write_time: Option<DateTime<Utc>>,
    /// Increments only on `OK`, never on `ERROR`.
    pub records_sent: u64,
}

impl InfluxStatusCounter {
    fn new() -> Self {
        Self {
            connected: false,
            last_write_time: None,
            records_sent: 0,
        }
    }
}

/// Push-style notifications consumed by the (external) presentation layer.
///
/// The sink never mutates session state; it may only come back through
/// `start`/`stop`/snapshot requests on the controller.
pub trait DisplaySink: Send {
    fn on_frame_appended(&mut self, frame: &SensorFrame);
    fn on_connection_health(&mut self, health: ConnectionHealth);
    fn on_influx_status(&mut self, status: &InfluxStatusCounter);
}

/// Immutable copy of session data taken for export.
///
/// Taken by the controller's owning thread, so a concurrently arriving frame
/// is either entirely before or entirely after the copy.
#[derive(Debug, Clone)]
pub struct ExportSnapshot {
    pub sample_name: String,
    pub sample_type: String,
    pub frames: Vec<SensorFrame>,
    pub taken_at: DateTime<Utc>,
}

impl ExportSnapshot {
    pub fn is_empty(&self) -> bool {
        self.frames.is_empty()
    }

    pub fn len(&self) -> usize {
        self.frames.len()
    }
}

/// The session state machine.
pub struct SessionController {
    state: SamplingState,
    series: Vec<SensorFrame>,
    sample_counter: u64,
    latest: Option<ChannelReadings>,
    seen_frame: bool,
    health: ConnectionHealth,
    influx: InfluxStatusCounter,
    sink: Option<Box<dyn DisplaySink>>,
}

impl SessionController {
    pub fn new() -> Self {
        Self {
            state: SamplingState::Idle,
            series: Vec::new(),
            sample_counter: 0,
            latest: None,
            seen_frame: false,
            health: ConnectionHealth::Waiting,
            influx: InfluxStatusCounter::new(),
            sink: None,
        }
    }

    pub fn with_sink(sink: Box<dyn DisplaySink>) -> Self {
        let mut controller = Self::new();
        controller.sink = Some(sink);
        controller
    }

    /// Ask the producer to start sampling.
    ///
    /// Only a successful transport send transitions the state machine; a
    /// refused or timed-out connection leaves everything untouched and is
    /// returned to the caller. On success the previous series is cleared,
    /// the sample counter and relay counter reset, and a fresh session
    /// begins.
    pub fn start(&mut self, commands: &CommandClient) -> Result<(), CommandError> {
        commands.send(CommandRequest::StartSampling)?;

        self.series.clear();
        self.sample_counter = 0;
        self.influx.records_sent = 0;
        self.state = SamplingState::Sampling;
        self.set_health(ConnectionHealth::Sampling);
        tracing::info!("session started");
        Ok(())
    }

    /// Ask the producer to stop sampling. Same transport rules as `start`:
    /// failure leaves the state unchanged.
    pub fn stop(&mut self, commands: &CommandClient) -> Result<(), CommandError> {
        commands.send(CommandRequest::StopSampling)?;

        self.state = SamplingState::Stopped;
        let health = if self.seen_frame {
            ConnectionHealth::Connected
        } else {
            ConnectionHealth::Waiting
        };
        self.set_health(health);
        tracing::info!("session stopped with {} samples", self.series.len());
        Ok(())
    }

    /// Apply one event from the listeners.
    pub fn handle_event(&mut self, event: IngestEvent) {
        match event {
            IngestEvent::Frame(readings) => self.handle_frame(readings),
            IngestEvent::Relay(status) => self.handle_relay(status),
        }
    }

    fn handle_frame(&mut self, readings: ChannelReadings) {
        self.latest = Some(readings);
        self.seen_frame = true;

        if self.state == SamplingState::Sampling {
            self.sample_counter += 1;
            let frame = SensorFrame::new(self.sample_counter, readings);
            self.series.push(frame);
            if let Some(sink) = self.sink.as_mut() {
                sink.on_frame_appended(&frame);
            }
        } else {
            // Frames outside an active session are accepted for the link
            // indicator but never recorded: data arrival does not imply the
            // operator-initiated session is on.
            self.set_health(ConnectionHealth::Connected);
        }
    }

    fn handle_relay(&mut self, status: RelayStatus) {
        match status {
            RelayStatus::Ok => {
                self.influx.connected = true;
                self.influx.last_write_time = Some(Utc::now());
                self.influx.records_sent += 1;
            }
            RelayStatus::Error => {
                self.influx.connected = false;
            }
        }
        let snapshot = self.influx;
        if let Some(sink) = self.sink.as_mut() {
            sink.on_influx_status(&snapshot);
        }
    }

    fn set_health(&mut self, health: ConnectionHealth) {
        if self.health != health {
            self.health = health;
            if let Some(sink) = self.sink.as_mut() {
                sink.on_connection_health(health);
            }
        }
    }

    pub fn state(&self) -> SamplingState {
        self.state
    }

    pub fn health(&self) -> ConnectionHealth {
        self.health
    }

    pub fn influx_status(&self) -> &InfluxStatusCounter {
        &self.influx
    }

    /// Most recent readings seen, recorded or not.
    pub fn latest(&self) -> Option<&ChannelReadings> {
        self.latest.as_ref()
    }

    /// The full recorded series for this session.
    pub fn series(&self) -> &[SensorFrame] {
        &self.series
    }

    pub fn sample_count(&self) -> usize {
        self.series.len()
    }

    /// The last 60 seconds of the series, as a borrowed view.
    ///
    /// This is derived on read from the canonical series; there is no second
    /// owned copy that could drift.
    pub fn display_window(&self) -> &[SensorFrame] {
        let Some(last) = self.series.last() else {
            return &self.series;
        };
        let cutoff = last.time_offset() - DISPLAY_WINDOW_SECS;
        let start = self
            .series
            .partition_point(|frame| frame.time_offset() <= cutoff);
        &self.series[start..]
    }

    /// Take an immutable export snapshot of the current series.
    pub fn snapshot(&self, sample_name: &str, sample_type: &str) -> ExportSnapshot {
        ExportSnapshot {
            sample_name: sample_name.to_string(),
            sample_type: sample_type.to_string(),
            frames: self.series.clone(),
            taken_at: Utc::now(),
        }
    }
}

impl Default for SessionController {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::protocol::parse_sensor_line;
    use std::net::TcpListener;
    use std::sync::{Arc, Mutex};
    use std::time::Duration;

    /// Command client backed by a detached local acceptor, so sends succeed.
    fn working_command_channel() -> CommandClient {
        let server = TcpListener::bind("127.0.0.1:0").unwrap();
        let addr = server.local_addr().unwrap();
        std::thread::spawn(move || {
            // Accept and discard command connections for the process lifetime.
            while server.accept().is_ok() {}
        });
        CommandClient::new(addr)
    }

    /// Command client pointed at a port that refuses connections.
    fn dead_command_channel() -> CommandClient {
        let addr = {
            let server = TcpListener::bind("127.0.0.1:0").unwrap();
            server.local_addr().unwrap()
        };
        CommandClient::new(addr).with_connect_timeout(Duration::from_millis(300))
    }

    fn frame_event(line: &str) -> IngestEvent {
        IngestEvent::Frame(parse_sensor_line(line).unwrap())
    }

    #[derive(Default)]
    struct Recorded {
        appended: Vec<u64>,
        health: Vec<ConnectionHealth>,
        influx: Vec<InfluxStatusCounter>,
    }

    #[derive(Clone, Default)]
    struct RecordingSink(Arc<Mutex<Recorded>>);

    impl DisplaySink for RecordingSink {
        fn on_frame_appended(&mut self, frame: &SensorFrame) {
            self.0.lock().unwrap().appended.push(frame.sample_index);
        }
        fn on_connection_health(&mut self, health: ConnectionHealth) {
            self.0.lock().unwrap().health.push(health);
        }
        fn on_influx_status(&mut self, status: &InfluxStatusCounter) {
            self.0.lock().unwrap().influx.push(*status);
        }
    }

    #[test]
    fn test_status_sequence_counts_only_ok() {
        let mut controller = SessionController::new();
        controller.handle_event(IngestEvent::Relay(RelayStatus::Ok));
        controller.handle_event(IngestEvent::Relay(RelayStatus::Error));
        assert!(!controller.influx_status().connected);
        controller.handle_event(IngestEvent::Relay(RelayStatus::Ok));

        let status = controller.influx_status();
        assert_eq!(status.records_sent, 2);
        assert!(status.connected);
        assert!(status.last_write_time.is_some());
    }

    #[test]
    fn test_frames_before_start_are_not_recorded() {
        let mut controller = SessionController::new();
        controller.handle_event(frame_event("SENSOR:1,2,3,4,5,6,7"));

        assert_eq!(controller.state(), SamplingState::Idle);
        assert_eq!(controller.health(), ConnectionHealth::Connected);
        assert!(controller.latest().is_some());
        assert!(controller.snapshot("pre", "test").is_empty());
    }

    #[test]
    fn test_start_clears_previous_series() {
        let commands = working_command_channel();
        let mut controller = SessionController::new();

        controller.start(&commands).unwrap();
        controller.handle_event(frame_event("SENSOR:1,2,3,4,5,6,7"));
        controller.handle_event(frame_event("SENSOR:1,2,3,4,5,6,7"));
        assert_eq!(controller.sample_count(), 2);

        controller.stop(&commands).unwrap();
        assert_eq!(controller.state(), SamplingState::Stopped);
        // Frames while stopped are not appended.
        controller.handle_event(frame_event("SENSOR:9,9,9,9,9,9,9"));
        assert_eq!(controller.sample_count(), 2);

        controller.start(&commands).unwrap();
        assert_eq!(controller.sample_count(), 0);
        controller.handle_event(frame_event("SENSOR:1,2,3,4,5,6,7"));

        // Fresh session: indices restart at 1.
        assert_eq!(controller.series()[0].sample_index, 1);
        assert!((controller.series()[0].time_offset() - 0.1).abs() < 1e-12);
    }

    #[test]
    fn test_start_resets_relay_counter() {
        let commands = working_command_channel();
        let mut controller = SessionController::new();

        controller.handle_event(IngestEvent::Relay(RelayStatus::Ok));
        assert_eq!(controller.influx_status().records_sent, 1);

        controller.start(&commands).unwrap();
        assert_eq!(controller.influx_status().records_sent, 0);
    }

    #[test]
    fn test_command_failure_leaves_state_unchanged() {
        let commands = dead_command_channel();
        let mut controller = SessionController::new();

        assert!(controller.start(&commands).is_err());
        assert_eq!(controller.state(), SamplingState::Idle);

        let working = working_command_channel();
        controller.start(&working).unwrap();
        assert_eq!(controller.state(), SamplingState::Sampling);

        assert!(controller.stop(&commands).is_err());
        assert_eq!(controller.state(), SamplingState::Sampling);
    }

    #[test]
    fn test_sink_notifications() {
        let recorded = Arc::new(Mutex::new(Recorded::default()));
        let commands = working_command_channel();
        let mut controller =
            SessionController::with_sink(Box::new(RecordingSink(recorded.clone())));

        controller.start(&commands).unwrap();
        controller.handle_event(frame_event("SENSOR:1,2,3,4,5,6,7"));
        controller.handle_event(IngestEvent::Relay(RelayStatus::Ok));
        controller.stop(&commands).unwrap();

        let seen = recorded.lock().unwrap();
        assert_eq!(seen.appended, vec![1]);
        assert_eq!(
            seen.health,
            vec![ConnectionHealth::Sampling, ConnectionHealth::Connected]
        );
        assert_eq!(seen.influx.len(), 1);
        assert_eq!(seen.influx[0].records_sent, 1);
    }

    #[test]
    fn test_sampling_health_supersedes_connected() {
        let commands = working_command_channel();
        let mut controller = SessionController::new();

        controller.start(&commands).unwrap();
        assert_eq!(controller.health(), ConnectionHealth::Sampling);

        // Mid-session frames do not demote the indicator.
        controller.handle_event(frame_event("SENSOR:1,2,3,4,5,6,7"));
        assert_eq!(controller.health(), ConnectionHealth::Sampling);

        // The link they proved surfaces once the session ends.
        controller.stop(&commands).unwrap();
        assert_eq!(controller.health(), ConnectionHealth::Connected);
    }

    #[test]
    fn test_display_window_is_a_trailing_view() {
        let commands = working_command_channel();
        let mut controller = SessionController::new();
        controller.start(&commands).unwrap();

        // 70 seconds of data at 10 Hz.
        for _ in 0..700 {
            controller.handle_event(frame_event("SENSOR:1,2,3,4,5,6,7"));
        }

        let window = controller.display_window();
        assert_eq!(window.len(), 600);
        assert_eq!(window.last().unwrap().sample_index, 700);
        assert_eq!(window.first().unwrap().sample_index, 101);
    }
}
