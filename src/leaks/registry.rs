//! Suspect registry
//!
//! Keyed store of per-process detection state. Each process id owns a slot
//! with its own lock, so updates to one process never wait on another and
//! updates to the same process are serialized. Readers only touch the
//! slot's published snapshot, which is replaced at the end of each cycle.
//!
//! State machine:
//!
//! ```text
//!            confidence >= threshold && growth >= min
//!   Tracking ---------------------------------------> Suspect
//!      ^   <---------------------------------------     |
//!      |        confidence < threshold - margin         | dismiss
//!      | cooldown elapsed                               v
//!      +------------------------------------------- Dismissed
//!
//!   any state --(process exited)--> Resolved (removed)
//! ```

use chrono::{DateTime, Utc};
use dashmap::DashMap;
use parking_lot::{Mutex, RwLock};
use serde::{Deserialize, Serialize};
use std::cmp::Ordering;
use std::sync::Arc;
use std::time::{Duration, Instant};

use crate::core::config::EngineConfig;
use crate::core::error::{EngineError, EngineResult};
use crate::leaks::alert::AlertGate;
use crate::leaks::confidence::{self, Assessment, PatternClass};
use crate::leaks::history::{Episode, Resolution, WallClock};
use crate::leaks::series::{self, ProcessSeries, Rejection};

/// Detection state of a process
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SuspectState {
    /// Observed, below the alert threshold
    Tracking,
    /// Confidence crossed the threshold
    Suspect,
    /// Operator dismissed the suspect
    Dismissed,
    /// Process exited; only seen in the final snapshot
    Resolved,
}

impl std::fmt::Display for SuspectState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            SuspectState::Tracking => "tracking",
            SuspectState::Suspect => "suspect",
            SuspectState::Dismissed => "dismissed",
            SuspectState::Resolved => "resolved",
        };
        f.write_str(s)
    }
}

/// Leak severity ladder
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Severity {
    Low,
    Medium,
    High,
    Critical,
}

impl Severity {
    /// Only confirmed suspects rate above `Low`.
    pub fn classify(state: SuspectState, rate_mb_per_hour: f64, growth_percent: f64) -> Self {
        if state != SuspectState::Suspect {
            return Severity::Low;
        }
        if rate_mb_per_hour > 100.0 || growth_percent > 500.0 {
            Severity::Critical
        } else if rate_mb_per_hour > 50.0 || growth_percent > 200.0 {
            Severity::High
        } else {
            Severity::Medium
        }
    }
}

/// Point-in-time view of one tracked process.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Suspect {
    pub process_id: u64,
    pub process_name: String,
    pub growth_rate_mb_per_hour: f64,
    pub current_mb: f64,
    pub duration_observed: Duration,
    pub confidence: f64,
    pub periodicity_hours: Option<f64>,
    pub state: SuspectState,
    pub fit_quality: f64,
    pub sample_count: usize,
    pub peak_mb: f64,
    /// Memory at the start of the leak (fitted), or the first sample while tracking
    pub baseline_mb: f64,
    pub pattern: PatternClass,
    pub severity: Severity,
    pub detected_at: Option<DateTime<Utc>>,
}

impl Suspect {
    pub fn growth_percent(&self) -> f64 {
        if self.baseline_mb > 0.0 {
            (self.current_mb - self.baseline_mb) / self.baseline_mb * 100.0
        } else {
            0.0
        }
    }

    pub fn recommendation(&self) -> String {
        match self.severity {
            Severity::Critical => format!(
                "CRITICAL: {} is growing at {:.0} MB/hour. Restart immediately!",
                self.process_name, self.growth_rate_mb_per_hour
            ),
            Severity::High => format!(
                "HIGH: {} has grown {:.0}%. Consider restarting soon.",
                self.process_name,
                self.growth_percent()
            ),
            Severity::Medium => format!(
                "MEDIUM: {} shows gradual memory growth. Monitor closely.",
                self.process_name
            ),
            Severity::Low => String::from("No action needed"),
        }
    }
}

/// Order used by `list`: growth rate desc, confidence desc, name asc.
pub fn rank(a: &Suspect, b: &Suspect) -> Ordering {
    b.growth_rate_mb_per_hour
        .partial_cmp(&a.growth_rate_mb_per_hour)
        .unwrap_or(Ordering::Equal)
        .then_with(|| b.confidence.partial_cmp(&a.confidence).unwrap_or(Ordering::Equal))
        .then_with(|| a.process_name.cmp(&b.process_name))
}

/// Next state from the current one and a fresh assessment.
///
/// `now` and `dismissed_at` are sample-time instants.
pub fn next_state(
    state: SuspectState,
    assessment: &Assessment,
    config: &EngineConfig,
    now: Instant,
    dismissed_at: Option<Instant>,
) -> SuspectState {
    match state {
        SuspectState::Tracking => {
            let confident = assessment.confidence >= config.confidence_alert_threshold;
            let material = assessment.absolute_growth_mb() >= config.min_absolute_growth_mb;
            if confident && material {
                SuspectState::Suspect
            } else {
                SuspectState::Tracking
            }
        }
        SuspectState::Suspect => {
            if assessment.confidence < config.release_threshold() {
                SuspectState::Tracking
            } else {
                SuspectState::Suspect
            }
        }
        SuspectState::Dismissed => {
            let expired = match (config.dismiss_cooldown(), dismissed_at) {
                (Some(cooldown), Some(at)) => now.saturating_duration_since(at) >= cooldown,
                _ => false,
            };
            if expired {
                SuspectState::Tracking
            } else {
                SuspectState::Dismissed
            }
        }
        SuspectState::Resolved => SuspectState::Resolved,
    }
}

/// Detection bookkeeping of one process.
#[derive(Debug)]
struct TrackedProcess {
    series: ProcessSeries,
    state: SuspectState,
    gate: AlertGate,
    assessment: Option<Assessment>,
    detected_at: Option<Instant>,
    baseline_mb: Option<f64>,
    detection_confidence: f64,
    peak_rate: f64,
    dismissed_at: Option<Instant>,
    closed: bool,
}

impl TrackedProcess {
    fn new(pid: u64, name: &str, window: Duration) -> Self {
        Self {
            series: ProcessSeries::new(pid, name, window),
            state: SuspectState::Tracking,
            gate: AlertGate::default(),
            assessment: None,
            detected_at: None,
            baseline_mb: None,
            detection_confidence: 0.0,
            peak_rate: 0.0,
            dismissed_at: None,
            closed: false,
        }
    }

    /// Latest sample time, or `fallback` when it is later.
    fn event_time(&self, fallback: Instant) -> Instant {
        match self.series.latest() {
            Some(s) if s.timestamp > fallback => s.timestamp,
            _ => fallback,
        }
    }

    fn current_mb(&self) -> f64 {
        self.series.latest().map(|s| s.memory_mb).unwrap_or(0.0)
    }

    /// Close the open episode, if any.
    fn close_episode(&mut self, resolution: Resolution, at: Instant, clock: &WallClock) -> Option<Episode> {
        let detected_at = self.detected_at.take()?;
        let baseline = self.baseline_mb.take().unwrap_or(0.0);
        let episode = Episode {
            process_id: self.series.pid(),
            process_name: self.series.name().to_string(),
            detected_at: clock.to_wall(detected_at),
            resolved_at: clock.to_wall(at.max(detected_at)),
            resolution,
            total_leaked_mb: (self.current_mb() - baseline).max(0.0),
            peak_growth_rate_mb_per_hour: self.peak_rate,
            confidence_at_detection: self.detection_confidence,
        };
        self.peak_rate = 0.0;
        self.detection_confidence = 0.0;
        Some(episode)
    }

    fn snapshot(&self, clock: &WallClock) -> Suspect {
        let series = self.series.snapshot();
        let assessment = self.assessment.as_ref();
        let rate = assessment.map(|a| a.slope_mb_per_hour()).unwrap_or(0.0);
        let baseline_mb = self
            .baseline_mb
            .or_else(|| series.first().map(|s| s.memory_mb))
            .unwrap_or(0.0);
        let current_mb = series.current_mb();
        let growth_percent = if baseline_mb > 0.0 {
            (current_mb - baseline_mb) / baseline_mb * 100.0
        } else {
            0.0
        };

        Suspect {
            process_id: series.pid,
            process_name: series.name.clone(),
            growth_rate_mb_per_hour: rate,
            current_mb,
            duration_observed: series.duration(),
            confidence: assessment.map(|a| a.confidence).unwrap_or(0.0),
            periodicity_hours: assessment.and_then(|a| a.periodicity_hours()),
            state: self.state,
            fit_quality: assessment.map(|a| a.fit_quality()).unwrap_or(0.0),
            sample_count: series.len(),
            peak_mb: series.peak_mb,
            baseline_mb,
            pattern: assessment.map(|a| a.pattern).unwrap_or(PatternClass::Unknown),
            severity: Severity::classify(self.state, rate, growth_percent),
            detected_at: self.detected_at.map(|at| clock.to_wall(at)),
        }
    }
}

struct Slot {
    state: Mutex<TrackedProcess>,
    published: RwLock<Suspect>,
}

/// What one observation changed.
#[derive(Debug, Default)]
pub struct Observation {
    /// Why the sample was dropped, if it was
    pub rejected: Option<Rejection>,
    /// `(from, to)` when the state changed
    pub transition: Option<(SuspectState, SuspectState)>,
    /// Snapshot to alert with, at most one per observation
    pub alert: Option<Suspect>,
}

/// Per-state counts.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct StateCounts {
    pub tracking: usize,
    pub suspect: usize,
    pub dismissed: usize,
}

/// Keyed store of detection state machines.
pub struct SuspectRegistry {
    entries: DashMap<u64, Arc<Slot>>,
    clock: WallClock,
}

impl Default for SuspectRegistry {
    fn default() -> Self {
        Self::new(WallClock::new())
    }
}

impl SuspectRegistry {
    pub fn new(clock: WallClock) -> Self {
        Self {
            entries: DashMap::new(),
            clock,
        }
    }

    pub fn clock(&self) -> &WallClock {
        &self.clock
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    fn slot(&self, pid: u64, name: &str, window: Duration) -> Arc<Slot> {
        if let Some(slot) = self.entries.get(&pid) {
            return Arc::clone(slot.value());
        }
        let slot = self.entries.entry(pid).or_insert_with(|| {
            let tracked = TrackedProcess::new(pid, name, window);
            let published = tracked.snapshot(&self.clock);
            Arc::new(Slot {
                state: Mutex::new(tracked),
                published: RwLock::new(published),
            })
        });
        Arc::clone(slot.value())
    }

    /// Record one sample and advance the process's state machine.
    ///
    /// Episodes closed by the sample go to `on_episode` while the process's
    /// slot is still locked, so they reach it in the order they happened.
    pub fn observe(
        &self,
        pid: u64,
        name: &str,
        memory_mb: f64,
        timestamp: Instant,
        config: &EngineConfig,
        on_episode: &mut dyn FnMut(Episode),
    ) -> Observation {
        let mut outcome = Observation::default();
        // Never create an entry for a sample that cannot be kept
        if let Err(rejection) = series::check_memory(memory_mb) {
            tracing::debug!(pid, ?rejection, memory_mb, "Sample rejected");
            outcome.rejected = Some(rejection);
            return outcome;
        }

        let slot = self.slot(pid, name, config.window());
        let mut tracked = slot.state.lock();

        if tracked.closed {
            // Terminated while this sample was in flight
            return outcome;
        }

        if tracked.series.name() != name {
            tracing::info!(pid, old = tracked.series.name(), new = name, "PID reused, starting a new series");
            let at = tracked.event_time(timestamp);
            if let Some(episode) = tracked.close_episode(Resolution::ProcessExited, at, &self.clock) {
                on_episode(episode);
            }
            *tracked = TrackedProcess::new(pid, name, config.window());
        }

        tracked.series.set_window(config.window());
        if let Err(rejection) = tracked.series.record(memory_mb, timestamp) {
            tracing::debug!(pid, ?rejection, memory_mb, "Sample rejected");
            outcome.rejected = Some(rejection);
            return outcome;
        }

        let snapshot = tracked.series.snapshot();
        let assessment = confidence::assess(&snapshot, config);
        let from = tracked.state;
        let to = next_state(from, &assessment, config, timestamp, tracked.dismissed_at);

        match (from, to) {
            (SuspectState::Tracking, SuspectState::Suspect) => {
                let baseline = assessment
                    .trend
                    .map(|t| t.value_at(0.0).max(0.0))
                    .unwrap_or_else(|| snapshot.first().map(|s| s.memory_mb).unwrap_or(0.0));
                tracked.detected_at = Some(timestamp);
                tracked.baseline_mb = Some(baseline);
                tracked.detection_confidence = assessment.confidence;
                tracked.peak_rate = assessment.slope_mb_per_hour();
                tracing::info!(
                    pid,
                    name,
                    rate_mb_per_hour = assessment.slope_mb_per_hour(),
                    confidence = assessment.confidence,
                    "Process flagged as leak suspect"
                );
            }
            (SuspectState::Suspect, SuspectState::Tracking) => {
                tracing::info!(pid, name, confidence = assessment.confidence, "Suspect growth stopped");
                if let Some(episode) = tracked.close_episode(Resolution::AutoRemediated, timestamp, &self.clock) {
                    on_episode(episode);
                }
                tracked.gate.on_released();
            }
            (SuspectState::Dismissed, SuspectState::Tracking) => {
                tracing::debug!(pid, name, "Dismissal cooldown elapsed");
                tracked.dismissed_at = None;
                tracked.gate.on_released();
            }
            _ => {}
        }

        if to == SuspectState::Suspect {
            tracked.peak_rate = tracked.peak_rate.max(assessment.slope_mb_per_hour());
        }

        tracked.state = to;
        tracked.assessment = Some(assessment);
        if from != to {
            outcome.transition = Some((from, to));
        }

        let published = tracked.snapshot(&self.clock);
        if from == SuspectState::Tracking && to == SuspectState::Suspect && tracked.gate.on_flagged() {
            outcome.alert = Some(published.clone());
        }
        *slot.published.write() = published;

        outcome
    }

    /// The process is gone: drop its entry and close any open episode.
    /// Returns whether the pid had an entry.
    pub fn terminate(&self, pid: u64, on_episode: &mut dyn FnMut(Episode)) -> bool {
        let Some((_, slot)) = self.entries.remove(&pid) else {
            return false;
        };
        let mut tracked = slot.state.lock();
        tracked.closed = true;

        if tracked.state == SuspectState::Suspect {
            let at = tracked.event_time(Instant::now());
            if let Some(episode) = tracked.close_episode(Resolution::ProcessExited, at, &self.clock) {
                on_episode(episode);
            }
        }
        tracked.state = SuspectState::Resolved;
        *slot.published.write() = tracked.snapshot(&self.clock);

        tracing::debug!(pid, name = tracked.series.name(), "Process resolved");
        true
    }

    /// Operator dismissal. Dismissing a dismissed entry is a no-op.
    pub fn dismiss(&self, pid: u64, on_episode: &mut dyn FnMut(Episode)) -> EngineResult<()> {
        let slot = self
            .entries
            .get(&pid)
            .map(|s| Arc::clone(s.value()))
            .ok_or(EngineError::NotFound { pid })?;
        let mut tracked = slot.state.lock();

        // Terminated between the lookup and the lock
        if tracked.closed {
            return Err(EngineError::NotFound { pid });
        }
        if tracked.state == SuspectState::Dismissed {
            return Ok(());
        }

        let at = tracked.event_time(Instant::now());
        if let Some(episode) = tracked.close_episode(Resolution::Dismissed, at, &self.clock) {
            on_episode(episode);
        }
        tracked.state = SuspectState::Dismissed;
        tracked.dismissed_at = Some(at);
        *slot.published.write() = tracked.snapshot(&self.clock);

        tracing::info!(pid, name = tracked.series.name(), "Suspect dismissed");
        Ok(())
    }

    /// Published snapshot of one process, whatever its state.
    pub fn get(&self, pid: u64) -> Option<Suspect> {
        let slot = self.entries.get(&pid).map(|s| Arc::clone(s.value()))?;
        let suspect = slot.published.read().clone();
        Some(suspect)
    }

    fn published(&self) -> Vec<Suspect> {
        let slots: Vec<Arc<Slot>> = self.entries.iter().map(|e| Arc::clone(e.value())).collect();
        slots.iter().map(|slot| slot.published.read().clone()).collect()
    }

    /// Confirmed suspects plus tracked processes with a measurable upward
    /// trend, ranked.
    pub fn list(&self) -> Vec<Suspect> {
        let mut suspects: Vec<Suspect> = self
            .published()
            .into_iter()
            .filter(|s| match s.state {
                SuspectState::Suspect => true,
                SuspectState::Tracking => s.pattern != PatternClass::Unknown && s.growth_rate_mb_per_hour > 0.0,
                SuspectState::Dismissed | SuspectState::Resolved => false,
            })
            .collect();
        suspects.sort_by(rank);
        suspects
    }

    /// Growth rates of processes currently in `Suspect`.
    pub fn suspect_rates(&self) -> Vec<f64> {
        self.published()
            .into_iter()
            .filter(|s| s.state == SuspectState::Suspect)
            .map(|s| s.growth_rate_mb_per_hour)
            .collect()
    }

    pub fn pids(&self) -> Vec<u64> {
        self.entries.iter().map(|e| *e.key()).collect()
    }

    pub fn counts(&self) -> StateCounts {
        let mut counts = StateCounts::default();
        for s in self.published() {
            match s.state {
                SuspectState::Tracking => counts.tracking += 1,
                SuspectState::Suspect => counts.suspect += 1,
                SuspectState::Dismissed => counts.dismissed += 1,
                SuspectState::Resolved => {}
            }
        }
        counts
    }
}
