//! Leak detection engine
//!
//! Entry point for samplers (`record_sample`, `process_terminated`), operators
//! (`dismiss`, `reconfigure`) and readers (`list_suspects`, `get_history`,
//! `estimate_time_to_pressure`). All methods take `&self`; share the engine
//! behind an `Arc`.

use parking_lot::RwLock;
use serde::Serialize;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Instant;

use crate::core::config::EngineConfig;
use crate::core::error::EngineResult;
use crate::leaks::alert::{AlertDispatcher, AlertSink};
use crate::leaks::history::{Episode, HistoryLog, WallClock};
use crate::leaks::projection::{self, TimeEstimate};
use crate::leaks::registry::{Suspect, SuspectRegistry};

/// Batches smaller than this are processed on the calling thread
const PARALLEL_BATCH_MIN: usize = 64;

/// One reading from the process sampler.
#[derive(Debug, Clone, PartialEq)]
pub struct ProcessReading {
    pub pid: u64,
    pub name: String,
    pub memory_mb: f64,
    pub timestamp: Instant,
}

/// Engine counters
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct EngineStats {
    pub tracked_processes: usize,
    pub tracking: usize,
    pub suspects: usize,
    pub dismissed: usize,
    pub samples_accepted: u64,
    pub samples_rejected: u64,
    pub alerts_emitted: u64,
    pub alert_delivery_failures: u64,
    pub episodes_recorded: u64,
}

/// Memory leak detection engine
pub struct LeakEngine {
    config: RwLock<Arc<EngineConfig>>,
    registry: SuspectRegistry,
    history: RwLock<HistoryLog>,
    alerts: AlertDispatcher,
    samples_accepted: AtomicU64,
    samples_rejected: AtomicU64,
    alerts_emitted: AtomicU64,
    episodes_recorded: AtomicU64,
}

impl LeakEngine {
    pub fn new(config: EngineConfig) -> EngineResult<Self> {
        Self::with_history(config, Vec::new())
    }

    /// Start with previously recorded episodes (oldest first).
    pub fn with_history(config: EngineConfig, episodes: Vec<Episode>) -> EngineResult<Self> {
        config.validate()?;
        let history = HistoryLog::with_episodes(config.history_capacity, episodes);
        Ok(Self {
            config: RwLock::new(Arc::new(config)),
            registry: SuspectRegistry::new(WallClock::new()),
            history: RwLock::new(history),
            alerts: AlertDispatcher::new(),
            samples_accepted: AtomicU64::new(0),
            samples_rejected: AtomicU64::new(0),
            alerts_emitted: AtomicU64::new(0),
            episodes_recorded: AtomicU64::new(0),
        })
    }

    /// Current configuration snapshot.
    pub fn config(&self) -> Arc<EngineConfig> {
        Arc::clone(&self.config.read())
    }

    /// Replace the configuration. In-flight cycles finish with the old one.
    pub fn reconfigure(&self, config: EngineConfig) -> EngineResult<()> {
        config.validate()?;
        self.history.write().set_capacity(config.history_capacity);
        *self.config.write() = Arc::new(config);
        tracing::info!("Leak engine reconfigured");
        Ok(())
    }

    /// Register an alert receiver. Several receivers may be registered.
    pub fn on_alert<S>(&self, sink: S)
    where
        S: AlertSink + 'static,
    {
        self.alerts.register(Arc::new(sink));
    }

    // ── Inbound ────────────────────────────────────────────────────

    /// Record one sample. Invalid samples are dropped silently.
    pub fn record_sample(&self, pid: u64, name: &str, memory_mb: f64, timestamp: Instant) {
        let config = self.config();
        self.record_with(&config, pid, name, memory_mb, timestamp);
    }

    /// Record a whole tick's readings under one config snapshot.
    ///
    /// Readings are partitioned by pid across worker threads; each pid's
    /// readings stay on one worker in their original order.
    pub fn record_batch(&self, readings: Vec<ProcessReading>) {
        let config = self.config();
        let workers = num_cpus::get().clamp(1, 8);

        if readings.len() < PARALLEL_BATCH_MIN || workers == 1 {
            for r in &readings {
                self.record_with(&config, r.pid, &r.name, r.memory_mb, r.timestamp);
            }
            return;
        }

        let mut buckets: Vec<Vec<ProcessReading>> = vec![Vec::new(); workers];
        for reading in readings {
            let idx = (reading.pid % workers as u64) as usize;
            buckets[idx].push(reading);
        }

        std::thread::scope(|scope| {
            for bucket in &buckets {
                let config = &config;
                scope.spawn(move || {
                    for r in bucket {
                        self.record_with(config, r.pid, &r.name, r.memory_mb, r.timestamp);
                    }
                });
            }
        });
    }

    fn record_with(&self, config: &EngineConfig, pid: u64, name: &str, memory_mb: f64, timestamp: Instant) {
        let observation = self
            .registry
            .observe(pid, name, memory_mb, timestamp, config, &mut |e| self.append_episode(e));

        if observation.rejected.is_some() {
            self.samples_rejected.fetch_add(1, Ordering::Relaxed);
        } else {
            self.samples_accepted.fetch_add(1, Ordering::Relaxed);
        }

        if let Some(suspect) = observation.alert {
            self.alerts_emitted.fetch_add(1, Ordering::Relaxed);
            self.alerts.dispatch(&suspect);
        }
    }

    /// Called with the process's slot locked, so a pid's episodes land in
    /// history in the order they closed.
    fn append_episode(&self, episode: Episode) {
        tracing::info!(
            pid = episode.process_id,
            name = %episode.process_name,
            leaked_mb = episode.total_leaked_mb,
            "Leak episode closed: {}",
            episode.resolution
        );
        self.history.write().append(episode);
        self.episodes_recorded.fetch_add(1, Ordering::Relaxed);
    }

    /// The sampler no longer sees this process.
    pub fn process_terminated(&self, pid: u64) {
        self.registry.terminate(pid, &mut |e| self.append_episode(e));
    }

    /// Operator dismissal; repeated calls are no-ops.
    pub fn dismiss(&self, pid: u64) -> EngineResult<()> {
        self.registry.dismiss(pid, &mut |e| self.append_episode(e))
    }

    // ── Outbound ───────────────────────────────────────────────────

    /// Ranked suspects: growth rate desc, confidence desc, name asc.
    pub fn list_suspects(&self) -> Vec<Suspect> {
        self.registry.list()
    }

    /// Current view of one process, including dismissed ones.
    pub fn suspect(&self, pid: u64) -> Option<Suspect> {
        self.registry.get(pid)
    }

    /// Most recent episodes first.
    pub fn get_history(&self, limit: usize) -> Vec<Episode> {
        self.history.read().recent(limit)
    }

    /// Every retained episode, oldest first.
    pub fn history_snapshot(&self) -> Vec<Episode> {
        self.history.read().all()
    }

    pub fn estimate_time_to_pressure(&self, free_headroom_mb: f64) -> TimeEstimate {
        projection::estimate_time_to_pressure(&self.registry.suspect_rates(), free_headroom_mb)
    }

    /// Pids with live entries.
    pub fn tracked_pids(&self) -> Vec<u64> {
        self.registry.pids()
    }

    pub fn stats(&self) -> EngineStats {
        let counts = self.registry.counts();
        EngineStats {
            tracked_processes: self.registry.len(),
            tracking: counts.tracking,
            suspects: counts.suspect,
            dismissed: counts.dismissed,
            samples_accepted: self.samples_accepted.load(Ordering::Relaxed),
            samples_rejected: self.samples_rejected.load(Ordering::Relaxed),
            alerts_emitted: self.alerts_emitted.load(Ordering::Relaxed),
            alert_delivery_failures: self.alerts.failed(),
            episodes_recorded: self.episodes_recorded.load(Ordering::Relaxed),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::error::EngineError;
    use crate::leaks::history::Resolution;
    use crate::leaks::registry::SuspectState;
    use std::sync::atomic::AtomicUsize;
    use std::time::Duration;

    fn linear_readings(pid: u64, name: &str, rate: f64, hours: u64, base: Instant) -> Vec<ProcessReading> {
        (0..=hours * 6)
            .map(|i| ProcessReading {
                pid,
                name: name.to_string(),
                memory_mb: 100.0 + rate * i as f64 / 6.0,
                timestamp: base + Duration::from_secs(i * 600),
            })
            .collect()
    }

    #[test]
    fn test_new_rejects_invalid_config() {
        let config = EngineConfig {
            window_secs: 0,
            ..Default::default()
        };
        assert!(matches!(LeakEngine::new(config), Err(EngineError::InvalidConfig(_))));
    }

    #[test]
    fn test_reconfigure_validates() {
        let engine = LeakEngine::new(EngineConfig::default()).unwrap();
        let bad = EngineConfig {
            confidence_alert_threshold: -0.1,
            ..Default::default()
        };
        assert!(engine.reconfigure(bad).is_err());
        assert_eq!(engine.config().confidence_alert_threshold, 0.7);

        let good = EngineConfig {
            confidence_alert_threshold: 0.8,
            ..Default::default()
        };
        engine.reconfigure(good).unwrap();
        assert_eq!(engine.config().confidence_alert_threshold, 0.8);
    }

    #[test]
    fn test_rejected_samples_counted() {
        let engine = LeakEngine::new(EngineConfig::default()).unwrap();
        let now = Instant::now();
        engine.record_sample(1, "p", 100.0, now + Duration::from_secs(60));
        engine.record_sample(1, "p", -3.0, now + Duration::from_secs(120));
        engine.record_sample(1, "p", 101.0, now);

        let stats = engine.stats();
        assert_eq!(stats.samples_accepted, 1);
        assert_eq!(stats.samples_rejected, 2);
        assert_eq!(engine.suspect(1).unwrap().sample_count, 1);
    }

    #[test]
    fn test_invalid_samples_for_unknown_pids_leave_no_trace() {
        let engine = LeakEngine::new(EngineConfig::default()).unwrap();
        let now = Instant::now();
        for pid in 100..110 {
            engine.record_sample(pid, "ghost", f64::NAN, now);
        }
        engine.record_sample(200, "ghost", -1.0, now);

        let stats = engine.stats();
        assert_eq!(stats.samples_rejected, 11);
        assert_eq!(stats.tracked_processes, 0);
        assert_eq!(stats.tracking, 0);
        assert!(engine.tracked_pids().is_empty());
        assert!(engine.suspect(100).is_none());
        assert!(engine.dismiss(100).is_err());
    }

    #[test]
    fn test_episodes_follow_process_order() {
        let engine = LeakEngine::new(EngineConfig::default()).unwrap();
        let base = Instant::now();
        for r in linear_readings(5, "first", 30.0, 12, base) {
            engine.record_sample(r.pid, &r.name, r.memory_mb, r.timestamp);
        }
        // Same pid, new process: closes the first episode
        let later = base + Duration::from_secs(13 * 3600);
        for r in linear_readings(5, "second", 30.0, 12, later) {
            engine.record_sample(r.pid, &r.name, r.memory_mb, r.timestamp);
        }
        engine.process_terminated(5);

        let names: Vec<String> = engine.history_snapshot().into_iter().map(|e| e.process_name).collect();
        assert_eq!(names, vec!["first".to_string(), "second".to_string()]);
        assert_eq!(engine.stats().episodes_recorded, 2);
    }

    #[test]
    fn test_alert_callback_and_history() {
        let engine = LeakEngine::new(EngineConfig::default()).unwrap();
        let alerts = Arc::new(AtomicUsize::new(0));
        let counter = Arc::clone(&alerts);
        engine.on_alert(move |s: &Suspect| -> EngineResult<()> {
            assert_eq!(s.state, SuspectState::Suspect);
            counter.fetch_add(1, Ordering::SeqCst);
            Ok(())
        });

        let base = Instant::now();
        for r in linear_readings(5, "leaky", 30.0, 12, base) {
            engine.record_sample(r.pid, &r.name, r.memory_mb, r.timestamp);
        }
        assert_eq!(alerts.load(Ordering::SeqCst), 1);

        engine.dismiss(5).unwrap();
        engine.dismiss(5).unwrap();
        let history = engine.get_history(10);
        assert_eq!(history.len(), 1);
        assert_eq!(history[0].resolution, Resolution::Dismissed);

        let stats = engine.stats();
        assert_eq!(stats.alerts_emitted, 1);
        assert_eq!(stats.dismissed, 1);
        assert_eq!(stats.episodes_recorded, 1);
    }

    #[test]
    fn test_failing_notifier_does_not_block_detection() {
        let engine = LeakEngine::new(EngineConfig::default()).unwrap();
        engine.on_alert(|_: &Suspect| -> EngineResult<()> { Err(EngineError::Notify("offline".into())) });

        let base = Instant::now();
        for r in linear_readings(5, "leaky", 30.0, 12, base) {
            engine.record_sample(r.pid, &r.name, r.memory_mb, r.timestamp);
        }
        assert_eq!(engine.suspect(5).unwrap().state, SuspectState::Suspect);
        assert_eq!(engine.stats().alert_delivery_failures, 1);
    }

    #[test]
    fn test_record_batch_matches_sequential() {
        let base = Instant::now();
        let mut readings = Vec::new();
        // Interleave ticks across 40 processes so the batch goes parallel
        for i in 0..=72u64 {
            for pid in 0..40u64 {
                readings.push(ProcessReading {
                    pid,
                    name: format!("p{}", pid),
                    memory_mb: 100.0 + pid as f64 * (i as f64 / 6.0),
                    timestamp: base + Duration::from_secs(i * 600),
                });
            }
        }

        let parallel = LeakEngine::new(EngineConfig::default()).unwrap();
        parallel.record_batch(readings.clone());

        let sequential = LeakEngine::new(EngineConfig::default()).unwrap();
        for r in &readings {
            sequential.record_sample(r.pid, &r.name, r.memory_mb, r.timestamp);
        }

        let a: Vec<(u64, SuspectState)> = parallel.list_suspects().iter().map(|s| (s.process_id, s.state)).collect();
        let b: Vec<(u64, SuspectState)> = sequential.list_suspects().iter().map(|s| (s.process_id, s.state)).collect();
        assert_eq!(a, b);
        assert_eq!(parallel.stats().samples_accepted, readings.len() as u64);
        assert_eq!(parallel.stats().samples_rejected, 0);
    }

    #[test]
    fn test_with_history_seeds_log() {
        let engine = LeakEngine::new(EngineConfig::default()).unwrap();
        let base = Instant::now();
        for r in linear_readings(5, "leaky", 30.0, 12, base) {
            engine.record_sample(r.pid, &r.name, r.memory_mb, r.timestamp);
        }
        engine.process_terminated(5);

        let saved = engine.history_snapshot();
        let restored = LeakEngine::with_history(EngineConfig::default(), saved.clone()).unwrap();
        assert_eq!(restored.get_history(5), saved);
    }
}
