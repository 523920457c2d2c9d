//! E-Nose Acquisition Core - telemetry ingestion and session control for a
//! gas-sensor array rig.
//!
//! The producer process drives the acquisition hardware and relays readings
//! to InfluxDB. This crate receives the producer's live measurement stream
//! and relay status events on two always-on loopback listeners, folds them
//! through a single-writer session state machine, commands the producer over
//! a fire-and-forget socket, and exports recorded sessions.
//!
//! # Architecture
//!
//! ```text
//! ┌──────────────────────────────────────────────────────────────┐
//! │                   E-Nose Acquisition Core                    │
//! ├──────────────────────────────────────────────────────────────┤
//! │  ┌──────────────┐    ┌──────────────┐   ┌───────────────┐    │
//! │  │ Data listener│───▶│              │──▶│  Display sink │    │
//! │  └──────────────┘    │   Session    │   └───────────────┘    │
//! │  ┌──────────────┐    │  controller  │   ┌───────────────┐    │
//! │  │Status listen.│───▶│              │──▶│   Exporters   │    │
//! │  └──────────────┘    └──────┬───────┘   │ CSV/JSON/EI   │    │
//! │                             │           └───────────────┘    │
//! │                             ▼                                │
//! │                      ┌──────────────┐                        │
//! │                      │Command socket│──▶ producer            │
//! │                      └──────────────┘                        │
//! └──────────────────────────────────────────────────────────────┘
//! ```
//!
//! Both listeners run as background threads and hand events to the
//! controller over one bounded channel; only the controller ever mutates
//! session state. Exports work on immutable snapshots.
//!
//! # Example
//!
//! ```no_run
//! use crossbeam_channel::bounded;
//! use enose_acquisition::{IngestListener, ListenerKind, SessionController};
//!
//! let (tx, rx) = bounded(10_000);
//! let mut data = IngestListener::bind(
//!     "127.0.0.1:8085".parse().unwrap(),
//!     ListenerKind::Data,
//!     tx,
//! ).expect("data port taken");
//! data.start().expect("listener already running");
//!
//! let mut controller = SessionController::new();
//! for event in rx.iter() {
//!     controller.handle_event(event);
//! }
//! ```

pub mod command;
pub mod config;
pub mod edge_impulse;
pub mod export;
pub mod listener;
pub mod protocol;
pub mod session;

// Re-export key types at crate root for convenience
pub use command::{CommandClient, CommandError};
pub use config::{Config, ConfigError};
pub use edge_impulse::{BlockingEdgeImpulseClient, EdgeImpulseClient, EdgeImpulseConfig, EdgeImpulseError};
pub use export::ExportError;
pub use listener::{IngestEvent, IngestListener, ListenerError, ListenerKind};
pub use protocol::{
    ChannelReadings, CommandRequest, FrameParseError, RelayStatus, SensorFrame, CHANNEL_COUNT,
    CHANNEL_NAMES,
};
pub use session::{
    ConnectionHealth, DisplaySink, ExportSnapshot, InfluxStatusCounter, SamplingState,
    SessionController,
};

/// Library version.
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
