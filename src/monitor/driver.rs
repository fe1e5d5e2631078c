//! Sampling loop
//!
//! Polls a `MemorySampler` on the configured interval and feeds the engine.
//! Processes that leave the sampler's live set between two ticks are
//! reported as terminated; dropping out of the readings alone is not an exit.

use parking_lot::Mutex;
use std::collections::HashSet;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;
use tokio::time::{Instant, MissedTickBehavior};

use crate::leaks::engine::LeakEngine;
use crate::monitor::sampler::{MemorySampler, SampleSet};

/// Drives a sampler into a `LeakEngine`.
pub struct LeakMonitor<S> {
    engine: Arc<LeakEngine>,
    sampler: Arc<Mutex<S>>,
    available_mb: Mutex<Option<f64>>,
}

impl<S> LeakMonitor<S>
where
    S: MemorySampler + 'static,
{
    pub fn new(engine: Arc<LeakEngine>, sampler: S) -> Self {
        Self {
            engine,
            sampler: Arc::new(Mutex::new(sampler)),
            available_mb: Mutex::new(None),
        }
    }

    pub fn engine(&self) -> &Arc<LeakEngine> {
        &self.engine
    }

    /// Available system memory from the sampler, if it reports one.
    pub async fn available_memory_mb(&self) -> Option<f64> {
        let sampler = Arc::clone(&self.sampler);
        tokio::task::spawn_blocking(move || sampler.lock().available_memory_mb())
            .await
            .ok()
            .flatten()
    }

    /// Available system memory as read during the last tick.
    pub fn last_available_memory_mb(&self) -> Option<f64> {
        *self.available_mb.lock()
    }

    /// One sampling cycle. Returns the pids alive this tick.
    pub async fn tick(&self, previous: &HashSet<u64>) -> HashSet<u64> {
        let sampler = Arc::clone(&self.sampler);
        let sampled = tokio::task::spawn_blocking(move || {
            let mut sampler = sampler.lock();
            let set = sampler.sample();
            (set, sampler.available_memory_mb())
        })
        .await;
        let (SampleSet { readings, alive }, available_mb) = match sampled {
            Ok(sampled) => sampled,
            Err(e) => {
                tracing::error!("Sampler task failed: {}", e);
                return previous.clone();
            }
        };
        *self.available_mb.lock() = available_mb;

        tracing::debug!(
            processes = readings.len(),
            alive = alive.len(),
            "Sampled process memory"
        );

        let engine = Arc::clone(&self.engine);
        if let Err(e) = tokio::task::spawn_blocking(move || engine.record_batch(readings)).await {
            tracing::error!("Recording samples failed: {}", e);
        }

        for pid in previous.difference(&alive) {
            self.engine.process_terminated(*pid);
        }
        alive
    }

    /// Sample until `shutdown` resolves. Returns the number of ticks.
    pub async fn run<F>(&self, shutdown: F) -> u64
    where
        F: Future<Output = ()>,
    {
        self.run_with(shutdown, |_, _| {}).await
    }

    /// Like `run`, calling `on_tick(tick, engine)` after every cycle.
    pub async fn run_with<F, T>(&self, shutdown: F, mut on_tick: T) -> u64
    where
        F: Future<Output = ()>,
        T: FnMut(u64, &LeakEngine),
    {
        let mut period = self.engine.config().sample_interval();
        let mut interval = tokio::time::interval(period);
        interval.set_missed_tick_behavior(MissedTickBehavior::Delay);
        tokio::pin!(shutdown);

        tracing::info!(interval_secs = period.as_secs(), "Leak monitor started");

        let mut seen = HashSet::new();
        let mut ticks = 0u64;
        loop {
            tokio::select! {
                _ = &mut shutdown => break,
                _ = interval.tick() => {}
            }

            seen = self.tick(&seen).await;
            ticks += 1;
            on_tick(ticks, self.engine.as_ref());

            let configured = self.engine.config().sample_interval();
            if configured != period {
                period = configured;
                interval = rescheduled(period);
                tracing::info!(interval_secs = period.as_secs(), "Sampling interval changed");
            }
        }

        tracing::info!(ticks, "Leak monitor stopped");
        ticks
    }
}

fn rescheduled(period: Duration) -> tokio::time::Interval {
    let mut interval = tokio::time::interval_at(Instant::now() + period, period);
    interval.set_missed_tick_behavior(MissedTickBehavior::Delay);
    interval
}
