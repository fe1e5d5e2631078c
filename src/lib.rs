//! RuVector Leakwatch
//!
//! Memory leak detection for long-running processes. Samples per-process
//! memory, separates sustained growth from cyclical allocation, and keeps a
//! ranked list of suspects with an auditable history of resolved incidents.
//!
//! ## Features
//!
//! - **Trend analysis**: least-squares growth rate over a sliding time window
//! - **Spectral analysis**: dominant allocation cycle reported as metadata
//! - **Confidence scoring**: weighted fit, growth and duration signals
//! - **Hysteresis**: one alert per detection, no flapping near the threshold
//! - **Projection**: time until current leaks exhaust free memory
//! - **History**: bounded log of closed leak episodes, persisted as JSON

pub mod algorithms;
pub mod core;
pub mod leaks;
pub mod monitor;

// Re-exports
pub use crate::core::config::{EngineConfig, ScoringWeights};
pub use crate::core::error::{EngineError, EngineResult};
pub use leaks::{
    AlertSink, EngineStats, Episode, LeakEngine, LogNotifier, PatternClass, ProcessReading, Resolution, Severity,
    Suspect, SuspectState, TimeEstimate,
};
pub use monitor::{LeakMonitor, MemorySampler, SampleSet, SysinfoSampler};
