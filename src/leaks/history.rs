//! Leak episode history
//!
//! An episode spans one detection: from the moment a process was flagged
//! until it exited, was dismissed, or stopped growing. Episodes are
//! immutable once written. The log is bounded; the oldest entries drop off.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::VecDeque;
use std::path::{Path, PathBuf};
use std::time::Instant;

use crate::core::config::config_dir;
use crate::core::error::EngineResult;

/// How an episode ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Resolution {
    ProcessExited,
    Dismissed,
    /// Growth stopped on its own
    AutoRemediated,
}

impl std::fmt::Display for Resolution {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            Resolution::ProcessExited => "process exited",
            Resolution::Dismissed => "dismissed",
            Resolution::AutoRemediated => "growth stopped",
        };
        f.write_str(s)
    }
}

/// One completed detection.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Episode {
    pub process_id: u64,
    pub process_name: String,
    pub detected_at: DateTime<Utc>,
    pub resolved_at: DateTime<Utc>,
    pub resolution: Resolution,
    /// Growth from the detection baseline to the last sample (MB)
    pub total_leaked_mb: f64,
    /// Highest growth rate seen while flagged (MB/hour)
    pub peak_growth_rate_mb_per_hour: f64,
    pub confidence_at_detection: f64,
}

impl Episode {
    pub fn duration(&self) -> chrono::Duration {
        self.resolved_at - self.detected_at
    }
}

/// Bounded, append-only episode log.
#[derive(Debug, Clone)]
pub struct HistoryLog {
    episodes: VecDeque<Episode>,
    capacity: usize,
}

impl HistoryLog {
    pub fn new(capacity: usize) -> Self {
        Self {
            episodes: VecDeque::new(),
            capacity: capacity.max(1),
        }
    }

    /// Seed from previously persisted episodes (oldest first).
    pub fn with_episodes(capacity: usize, episodes: Vec<Episode>) -> Self {
        let mut log = Self::new(capacity);
        for episode in episodes {
            log.append(episode);
        }
        log
    }

    pub fn append(&mut self, episode: Episode) {
        self.episodes.push_back(episode);
        while self.episodes.len() > self.capacity {
            self.episodes.pop_front();
        }
    }

    pub fn set_capacity(&mut self, capacity: usize) {
        self.capacity = capacity.max(1);
        while self.episodes.len() > self.capacity {
            self.episodes.pop_front();
        }
    }

    pub fn len(&self) -> usize {
        self.episodes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.episodes.is_empty()
    }

    /// Most recent first.
    pub fn recent(&self, limit: usize) -> Vec<Episode> {
        self.episodes.iter().rev().take(limit).cloned().collect()
    }

    /// Oldest first, for persistence.
    pub fn all(&self) -> Vec<Episode> {
        self.episodes.iter().cloned().collect()
    }
}

/// Maps monotonic sample instants onto wall-clock time.
#[derive(Debug, Clone, Copy)]
pub struct WallClock {
    anchor: Instant,
    anchor_wall: DateTime<Utc>,
}

impl Default for WallClock {
    fn default() -> Self {
        Self::new()
    }
}

impl WallClock {
    pub fn new() -> Self {
        Self {
            anchor: Instant::now(),
            anchor_wall: Utc::now(),
        }
    }

    pub fn to_wall(&self, instant: Instant) -> DateTime<Utc> {
        let delta = |d: std::time::Duration| chrono::Duration::from_std(d).unwrap_or_else(|_| chrono::Duration::zero());
        if instant >= self.anchor {
            self.anchor_wall + delta(instant - self.anchor)
        } else {
            self.anchor_wall - delta(self.anchor - instant)
        }
    }
}

// ── Persistence ────────────────────────────────────────────────────

/// `<config_dir>/ruvector/leak_history.json`
pub fn default_path() -> PathBuf {
    config_dir().join("leak_history.json")
}

/// Load persisted episodes; a missing file is an empty history.
pub fn load_json(path: &Path) -> EngineResult<Vec<Episode>> {
    match std::fs::read_to_string(path) {
        Ok(content) => Ok(serde_json::from_str(&content)?),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(Vec::new()),
        Err(e) => Err(e.into()),
    }
}

pub fn save_json(path: &Path, episodes: &[Episode]) -> EngineResult<()> {
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent)?;
    }
    let json_str = serde_json::to_string_pretty(episodes)?;
    std::fs::write(path, json_str)?;
    Ok(())
}
