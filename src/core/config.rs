//! Configuration for the leak detection engine

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

use super::error::{EngineError, EngineResult};

/// Relative weights of the confidence signals.
///
/// Normalised by their sum when scoring, so `(5, 3, 2)` behaves like
/// `(0.5, 0.3, 0.2)`.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct ScoringWeights {
    /// Weight of the regression fit (R²)
    pub fit: f64,
    /// Weight of the saturated growth rate
    pub growth: f64,
    /// Weight of the saturated observation duration
    pub duration: f64,
}

impl Default for ScoringWeights {
    fn default() -> Self {
        Self {
            fit: 0.5,
            growth: 0.3,
            duration: 0.2,
        }
    }
}

impl ScoringWeights {
    pub fn total(&self) -> f64 {
        self.fit + self.growth + self.duration
    }
}

/// Main engine configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
    /// Driver tick (seconds)
    pub sample_interval_secs: u64,

    /// Retention window of each process series (seconds)
    pub window_secs: u64,

    /// Confidence needed to flag a suspect (0-1)
    pub confidence_alert_threshold: f64,

    /// Gap below the threshold a suspect must fall through before it is
    /// returned to tracking
    pub hysteresis_margin: f64,

    /// Minimum growth over the observed window before flagging (MB)
    pub min_absolute_growth_mb: f64,

    /// Samples required before a trend is computed
    pub min_samples_for_trend: usize,

    /// Samples required before spectral analysis runs
    pub min_samples_for_fft: usize,

    /// Upper bound on the resampled DFT grid
    pub max_fft_points: usize,

    /// Dominant bin must exceed this multiple of the median magnitude
    pub noise_floor_multiple: f64,

    /// Periodic components smaller than this amplitude are ignored (MB).
    /// Zero leaves the noise-floor test as the only gate.
    pub min_periodic_amplitude_mb: f64,

    /// Growth rate at which the growth signal saturates (MB/hour)
    pub reference_growth_mb_per_hour: f64,

    /// Observation time at which the duration signal saturates (seconds)
    pub sufficient_observation_secs: u64,

    /// Suppress re-detection of a dismissed process for this long (seconds).
    /// `None` keeps it dismissed until the process exits; TOML cannot
    /// express `None`, an absent key means the default.
    pub dismiss_cooldown_secs: Option<u64>,

    /// Maximum number of episodes kept in memory
    pub history_capacity: usize,

    /// Confidence signal weights
    pub weights: ScoringWeights,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            sample_interval_secs: 60,
            window_secs: 24 * 3600,
            confidence_alert_threshold: 0.7,
            hysteresis_margin: 0.1,
            min_absolute_growth_mb: 50.0,
            min_samples_for_trend: 8,
            min_samples_for_fft: 32,
            max_fft_points: 512,
            noise_floor_multiple: 3.0,
            min_periodic_amplitude_mb: 0.0,
            reference_growth_mb_per_hour: 10.0,
            sufficient_observation_secs: 6 * 3600,
            dismiss_cooldown_secs: Some(3600),
            history_capacity: 500,
            weights: ScoringWeights::default(),
        }
    }
}

impl EngineConfig {
    pub fn sample_interval(&self) -> Duration {
        Duration::from_secs(self.sample_interval_secs)
    }

    pub fn window(&self) -> Duration {
        Duration::from_secs(self.window_secs)
    }

    pub fn sufficient_observation(&self) -> Duration {
        Duration::from_secs(self.sufficient_observation_secs)
    }

    pub fn dismiss_cooldown(&self) -> Option<Duration> {
        self.dismiss_cooldown_secs.map(Duration::from_secs)
    }

    /// Confidence below which a suspect falls back to tracking.
    pub fn release_threshold(&self) -> f64 {
        self.confidence_alert_threshold - self.hysteresis_margin
    }

    /// Reject values the engine cannot work with.
    pub fn validate(&self) -> EngineResult<()> {
        let fail = |msg: String| -> EngineResult<()> { Err(EngineError::InvalidConfig(msg)) };

        if self.sample_interval_secs == 0 {
            return fail("sample_interval_secs must be positive".into());
        }
        if self.window_secs == 0 {
            return fail("window_secs must be positive".into());
        }
        if !(0.0..=1.0).contains(&self.confidence_alert_threshold) {
            return fail(format!(
                "confidence_alert_threshold {} is outside [0, 1]",
                self.confidence_alert_threshold
            ));
        }
        if !(self.hysteresis_margin >= 0.0 && self.hysteresis_margin < self.confidence_alert_threshold) {
            return fail(format!(
                "hysteresis_margin {} must be in [0, threshold)",
                self.hysteresis_margin
            ));
        }
        if !(self.min_absolute_growth_mb >= 0.0) {
            return fail("min_absolute_growth_mb must be non-negative".into());
        }
        if self.min_samples_for_trend < 2 {
            return fail("min_samples_for_trend must be at least 2".into());
        }
        if self.min_samples_for_fft < 4 || self.max_fft_points < self.min_samples_for_fft {
            return fail(format!(
                "need 4 <= min_samples_for_fft ({}) <= max_fft_points ({})",
                self.min_samples_for_fft, self.max_fft_points
            ));
        }
        if !(self.noise_floor_multiple > 0.0) {
            return fail("noise_floor_multiple must be positive".into());
        }
        if !(self.min_periodic_amplitude_mb >= 0.0) {
            return fail("min_periodic_amplitude_mb must be non-negative".into());
        }
        if !(self.reference_growth_mb_per_hour > 0.0) {
            return fail("reference_growth_mb_per_hour must be positive".into());
        }
        if self.sufficient_observation_secs == 0 {
            return fail("sufficient_observation_secs must be positive".into());
        }
        let w = self.weights;
        if w.fit < 0.0 || w.growth < 0.0 || w.duration < 0.0 || !(w.total() > 0.0) {
            return fail("weights must be non-negative with a positive sum".into());
        }
        if self.history_capacity == 0 {
            return fail("history_capacity must be positive".into());
        }
        Ok(())
    }

    /// Load config from TOML file
    pub fn load(path: &Path) -> EngineResult<Self> {
        let content = std::fs::read_to_string(path)?;
        let config: Self = toml::from_str(&content)?;
        config.validate()?;
        Ok(config)
    }

    /// Load config, falling back to defaults when the file is missing or bad
    pub fn load_or_default(path: &Path) -> Self {
        if !path.exists() {
            tracing::info!("No config file at {}, using defaults", path.display());
            return Self::default();
        }
        match Self::load(path) {
            Ok(config) => config,
            Err(e) => {
                tracing::warn!("Failed to load config {}: {}, using defaults", path.display(), e);
                Self::default()
            }
        }
    }

    /// Save config to TOML file
    pub fn save(&self, path: &Path) -> EngineResult<()> {
        let content = toml::to_string_pretty(self)?;
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        std::fs::write(path, content)?;
        Ok(())
    }

    /// `<config_dir>/ruvector/leakwatch.toml`
    pub fn default_path() -> PathBuf {
        config_dir().join("leakwatch.toml")
    }
}

/// Return the application config directory.
///
/// Falls back to the current directory when the platform has none.
pub fn config_dir() -> PathBuf {
    dirs::config_dir()
        .map(|p| p.join("ruvector"))
        .unwrap_or_else(|| PathBuf::from("."))
}
