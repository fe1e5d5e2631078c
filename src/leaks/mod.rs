//! Memory leak detection
//!
//! Per-process sample windows feed a trend fit and a spectral pass; the
//! confidence score drives a per-process state machine with hysteresis.
//! Closed detections land in a bounded history log.

pub mod alert;
pub mod confidence;
pub mod engine;
pub mod history;
pub mod ipc;
pub mod projection;
pub mod registry;
pub mod series;

pub use alert::{AlertDispatcher, AlertGate, AlertSink, ChannelNotifier, LogNotifier};
pub use confidence::{Assessment, ConfidenceScorer, PatternClass};
pub use engine::{EngineStats, LeakEngine, ProcessReading};
pub use history::{Episode, HistoryLog, Resolution};
pub use projection::TimeEstimate;
pub use registry::{Severity, Suspect, SuspectRegistry, SuspectState};
pub use series::{ProcessSeries, Sample};
