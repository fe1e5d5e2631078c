//! Per-process sample history
//!
//! A `ProcessSeries` keeps the samples of one process that fall inside the
//! retention window, measured back from the newest timestamp. Analyzers only
//! ever see an owned `SeriesSnapshot`.

use std::collections::VecDeque;
use std::time::{Duration, Instant};

/// One memory reading.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Sample {
    pub timestamp: Instant,
    pub memory_mb: f64,
}

/// Why a sample was not recorded.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Rejection {
    /// Negative, NaN or infinite memory value
    InvalidMemory,
    /// Timestamp earlier than the newest recorded sample
    OutOfOrder,
}

/// Time-windowed sample buffer for one (pid, name) pair.
#[derive(Debug, Clone)]
pub struct ProcessSeries {
    pid: u64,
    name: String,
    window: Duration,
    samples: VecDeque<Sample>,
    peak_mb: f64,
}

/// Memory readings must be finite and non-negative.
pub fn check_memory(memory_mb: f64) -> Result<(), Rejection> {
    if !memory_mb.is_finite() || memory_mb < 0.0 {
        return Err(Rejection::InvalidMemory);
    }
    Ok(())
}

impl ProcessSeries {
    pub fn new(pid: u64, name: impl Into<String>, window: Duration) -> Self {
        Self {
            pid,
            name: name.into(),
            window,
            samples: VecDeque::new(),
            peak_mb: 0.0,
        }
    }

    pub fn pid(&self) -> u64 {
        self.pid
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn len(&self) -> usize {
        self.samples.len()
    }

    pub fn is_empty(&self) -> bool {
        self.samples.is_empty()
    }

    pub fn latest(&self) -> Option<&Sample> {
        self.samples.back()
    }

    /// Append a sample and evict everything older than the window.
    pub fn record(&mut self, memory_mb: f64, timestamp: Instant) -> Result<(), Rejection> {
        check_memory(memory_mb)?;
        if let Some(last) = self.samples.back() {
            if timestamp < last.timestamp {
                return Err(Rejection::OutOfOrder);
            }
        }

        self.samples.push_back(Sample { timestamp, memory_mb });
        if memory_mb > self.peak_mb {
            self.peak_mb = memory_mb;
        }
        self.evict();
        Ok(())
    }

    /// Change the retention window; takes effect immediately.
    pub fn set_window(&mut self, window: Duration) {
        if window != self.window {
            self.window = window;
            self.evict();
        }
    }

    fn evict(&mut self) {
        let Some(newest) = self.samples.back().map(|s| s.timestamp) else {
            return;
        };
        // An instant before the platform epoch cannot be formed; keep everything.
        let Some(cutoff) = newest.checked_sub(self.window) else {
            return;
        };

        let before = self.samples.len();
        while self.samples.front().is_some_and(|s| s.timestamp < cutoff) {
            self.samples.pop_front();
        }
        let evicted = before - self.samples.len();
        if evicted > 0 {
            tracing::trace!(pid = self.pid, evicted, "evicted samples outside window");
            self.peak_mb = self
                .samples
                .iter()
                .map(|s| s.memory_mb)
                .fold(0.0, f64::max);
        }
    }

    /// Owned, ordered copy of the current window.
    pub fn snapshot(&self) -> SeriesSnapshot {
        SeriesSnapshot {
            pid: self.pid,
            name: self.name.clone(),
            samples: self.samples.iter().copied().collect(),
            peak_mb: self.peak_mb,
        }
    }
}

/// Immutable view handed to the analyzers.
#[derive(Debug, Clone)]
pub struct SeriesSnapshot {
    pub pid: u64,
    pub name: String,
    pub samples: Vec<Sample>,
    pub peak_mb: f64,
}

impl SeriesSnapshot {
    pub fn len(&self) -> usize {
        self.samples.len()
    }

    pub fn is_empty(&self) -> bool {
        self.samples.is_empty()
    }

    pub fn first(&self) -> Option<&Sample> {
        self.samples.first()
    }

    pub fn last(&self) -> Option<&Sample> {
        self.samples.last()
    }

    pub fn current_mb(&self) -> f64 {
        self.last().map(|s| s.memory_mb).unwrap_or(0.0)
    }

    /// Time between the oldest and newest sample.
    pub fn duration(&self) -> Duration {
        match (self.first(), self.last()) {
            (Some(first), Some(last)) => last.timestamp.duration_since(first.timestamp),
            _ => Duration::ZERO,
        }
    }

    /// `(hours since first sample, memory_mb)` pairs.
    pub fn points_hours(&self) -> Vec<(f64, f64)> {
        let Some(origin) = self.first().map(|s| s.timestamp) else {
            return Vec::new();
        };
        self.samples
            .iter()
            .map(|s| {
                let hours = s.timestamp.duration_since(origin).as_secs_f64() / 3600.0;
                (hours, s.memory_mb)
            })
            .collect()
    }
}
