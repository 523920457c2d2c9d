//! Wire protocol for the producer link.
//!
//! The producer speaks a line-oriented ASCII protocol over loopback TCP:
//! measurement lines on the data port, relay status tokens on the status
//! port, and bare command literals on the command port.

use serde::{Deserialize, Serialize};

/// Prefix of a measurement line.
pub const SENSOR_PREFIX: &str = "SENSOR:";

/// Status token emitted after a successful InfluxDB relay write.
pub const STATUS_OK: &str = "INFLUX:OK";

/// Status token emitted after a failed InfluxDB relay write.
pub const STATUS_ERROR: &str = "INFLUX:ERROR";

/// Number of gas channels in a frame.
pub const CHANNEL_COUNT: usize = 7;

/// Channel names in canonical order.
///
/// This order is fixed: MiCS module channels first, Grove module channels
/// second. It is NOT the wire order (see [`ChannelReadings::from_wire`]).
pub const CHANNEL_NAMES: [&str; CHANNEL_COUNT] = [
    "CO (MCS)",
    "Ethanol (MCS)",
    "VOC (MCS)",
    "NO2 (GM)",
    "Ethanol (GM)",
    "VOC (GM)",
    "CO (GM)",
];

/// Interval between consecutive samples, in seconds.
pub const SAMPLE_INTERVAL_SECS: f64 = 0.1;

/// One validated 7-channel measurement in canonical order (ppm).
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct ChannelReadings {
    pub co_mcs: f64,
    pub ethanol_mcs: f64,
    pub voc_mcs: f64,
    pub no2_gm: f64,
    pub ethanol_gm: f64,
    pub voc_gm: f64,
    pub co_gm: f64,
}

impl ChannelReadings {
    /// Remap wire order into canonical order.
    ///
    /// The producer transmits the Grove module fields first and the MiCS
    /// module fields second: `(no2_gm, ethanol_gm, voc_gm, co_gm, co_mcs,
    /// ethanol_mcs, voc_mcs)`. Getting this permutation wrong mislabels
    /// channels without any visible failure, so it lives in exactly one
    /// place.
    pub fn from_wire(fields: [f64; CHANNEL_COUNT]) -> Self {
        Self {
            co_mcs: fields[4],
            ethanol_mcs: fields[5],
            voc_mcs: fields[6],
            no2_gm: fields[0],
            ethanol_gm: fields[1],
            voc_gm: fields[2],
            co_gm: fields[3],
        }
    }

    /// Values in canonical order, parallel to [`CHANNEL_NAMES`].
    pub fn values(&self) -> [f64; CHANNEL_COUNT] {
        [
            self.co_mcs,
            self.ethanol_mcs,
            self.voc_mcs,
            self.no2_gm,
            self.ethanol_gm,
            self.voc_gm,
            self.co_gm,
        ]
    }
}

/// One recorded measurement at a discrete sample index.
///
/// Immutable once appended to a session's time series.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct SensorFrame {
    /// 1-based position within the session.
    pub sample_index: u64,
    /// Channel values in canonical order.
    pub channels: ChannelReadings,
}

impl SensorFrame {
    pub fn new(sample_index: u64, channels: ChannelReadings) -> Self {
        Self {
            sample_index,
            channels,
        }
    }

    /// Seconds since session start, derived from the sample index.
    pub fn time_offset(&self) -> f64 {
        self.sample_index as f64 * SAMPLE_INTERVAL_SECS
    }
}

/// Outcome of the producer's relay write, reported on the status port.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum RelayStatus {
    Ok,
    Error,
}

/// Directive sent to the producer on the command port.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CommandRequest {
    StartSampling,
    StopSampling,
}

impl CommandRequest {
    /// Literal wire form of the directive.
    pub fn as_wire(&self) -> &'static str {
        match self {
            CommandRequest::StartSampling => "START_SAMPLING",
            CommandRequest::StopSampling => "STOP_SAMPLING",
        }
    }
}

/// Why a measurement line was rejected.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FrameParseError {
    /// Line does not begin with `SENSOR:`.
    MissingPrefix,
    /// Fewer than seven comma-separated fields after the prefix.
    TooFewFields(usize),
    /// A field failed numeric conversion.
    InvalidNumber { index: usize, value: String },
}

impl std::fmt::Display for FrameParseError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            FrameParseError::MissingPrefix => write!(f, "line does not start with {SENSOR_PREFIX}"),
            FrameParseError::TooFewFields(n) => {
                write!(f, "expected at least {CHANNEL_COUNT} fields, got {n}")
            }
            FrameParseError::InvalidNumber { index, value } => {
                write!(f, "field {index} is not a number: {value:?}")
            }
        }
    }
}

impl std::error::Error for FrameParseError {}

/// Parse one measurement line into canonical channel readings.
///
/// Trailing fields beyond the seven gas values (hardware state/level flags)
/// are accepted and ignored. This never panics; malformed lines come back as
/// a [`FrameParseError`] for the caller to log and discard.
pub fn parse_sensor_line(line: &str) -> Result<ChannelReadings, FrameParseError> {
    let payload = line
        .strip_prefix(SENSOR_PREFIX)
        .ok_or(FrameParseError::MissingPrefix)?;

    let mut fields = [0.0f64; CHANNEL_COUNT];
    let mut count = 0usize;
    for (index, raw) in payload.split(',').enumerate() {
        if index >= CHANNEL_COUNT {
            break;
        }
        let trimmed = raw.trim();
        fields[index] = trimmed
            .parse::<f64>()
            .map_err(|_| FrameParseError::InvalidNumber {
                index,
                value: trimmed.to_string(),
            })?;
        count = index + 1;
    }

    if count < CHANNEL_COUNT {
        return Err(FrameParseError::TooFewFields(count));
    }

    Ok(ChannelReadings::from_wire(fields))
}

/// Parse one status line into a relay status event.
///
/// Anything other than the two exact tokens is ignored (`None`).
pub fn parse_status_line(line: &str) -> Option<RelayStatus> {
    match line.trim() {
        STATUS_OK => Some(RelayStatus::Ok),
        STATUS_ERROR => Some(RelayStatus::Error),
        _ => None,
    }
}
