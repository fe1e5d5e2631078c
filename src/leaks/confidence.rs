//! Confidence scoring
//!
//! Combines three normalised signals into one leak confidence in [0, 1]:
//!
//! - **fit**: R² of the trend line
//! - **growth**: `slope / reference_rate`, saturating at 1 (negative slopes score 0)
//! - **duration**: `observed / sufficient_observation`, saturating at 1
//!
//! Periodicity is reported next to the score but never feeds into it: a
//! leak can ride on top of a cache-refresh cycle.

use serde::{Deserialize, Serialize};
use std::time::Duration;

use crate::algorithms::spectral::{SpectralAnalyzer, SpectralResult, SpectralSettings};
use crate::algorithms::trend::{self, TrendResult};
use crate::core::config::{EngineConfig, ScoringWeights};
use crate::leaks::series::SeriesSnapshot;

/// Projected growth below this is treated as flat (MB)
const FLAT_GROWTH_MB: f64 = 1.0;

/// Fit below this is too noisy to call a direction
const DIRECTIONAL_FIT: f64 = 0.3;

/// Coarse shape of a process's memory signal
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PatternClass {
    /// Not enough samples yet
    Unknown,
    Stable,
    Growing,
    Shrinking,
    /// Cyclical with no net direction
    Periodic,
    /// Net growth with a cycle on top
    GrowingPeriodic,
}

/// Saturating signal weights and references.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ConfidenceScorer {
    weights: ScoringWeights,
    reference_growth_mb_per_hour: f64,
    sufficient_observation: Duration,
}

impl From<&EngineConfig> for ConfidenceScorer {
    fn from(config: &EngineConfig) -> Self {
        Self {
            weights: config.weights,
            reference_growth_mb_per_hour: config.reference_growth_mb_per_hour,
            sufficient_observation: config.sufficient_observation(),
        }
    }
}

impl Default for ConfidenceScorer {
    fn default() -> Self {
        Self::from(&EngineConfig::default())
    }
}

impl ConfidenceScorer {
    pub fn growth_signal(&self, slope_mb_per_hour: f64) -> f64 {
        if self.reference_growth_mb_per_hour <= 0.0 {
            return 0.0;
        }
        (slope_mb_per_hour / self.reference_growth_mb_per_hour).clamp(0.0, 1.0)
    }

    pub fn duration_signal(&self, observed: Duration) -> f64 {
        let sufficient = self.sufficient_observation.as_secs_f64();
        if sufficient <= 0.0 {
            return 1.0;
        }
        (observed.as_secs_f64() / sufficient).clamp(0.0, 1.0)
    }

    /// Composite confidence; insufficient data scores 0.
    pub fn score(&self, trend: Option<&TrendResult>) -> f64 {
        let Some(trend) = trend else {
            return 0.0;
        };
        let total = self.weights.total();
        if !(total > 0.0) {
            return 0.0;
        }

        let fit = trend.fit_quality.clamp(0.0, 1.0);
        let growth = self.growth_signal(trend.slope_mb_per_hour);
        let duration = self.duration_signal(trend.duration_observed);

        let weighted = self.weights.fit * fit
            + self.weights.growth * growth
            + self.weights.duration * duration;

        (weighted / total).clamp(0.0, 1.0)
    }
}

/// Everything the registry needs from one analysis pass.
#[derive(Debug, Clone, PartialEq)]
pub struct Assessment {
    pub trend: Option<TrendResult>,
    pub spectral: SpectralResult,
    pub confidence: f64,
    pub pattern: PatternClass,
}

impl Assessment {
    pub fn slope_mb_per_hour(&self) -> f64 {
        self.trend.map(|t| t.slope_mb_per_hour).unwrap_or(0.0)
    }

    pub fn fit_quality(&self) -> f64 {
        self.trend.map(|t| t.fit_quality).unwrap_or(0.0)
    }

    /// `slope × duration_observed`, the growth the fit attributes to the window.
    pub fn absolute_growth_mb(&self) -> f64 {
        self.trend.map(|t| t.projected_growth_mb()).unwrap_or(0.0)
    }

    pub fn periodicity_hours(&self) -> Option<f64> {
        self.spectral.dominant_period_hours
    }
}

/// Run trend, spectral and scoring over one snapshot with one config.
pub fn assess(snapshot: &SeriesSnapshot, config: &EngineConfig) -> Assessment {
    let trend = trend::estimate(snapshot, config.min_samples_for_trend);
    let spectral = SpectralAnalyzer::new(SpectralSettings::from(config)).analyze(snapshot, trend.as_ref());
    let confidence = ConfidenceScorer::from(config).score(trend.as_ref());
    let pattern = classify(trend.as_ref(), &spectral);

    Assessment {
        trend,
        spectral,
        confidence,
        pattern,
    }
}

/// Classify the shape of the signal from its trend and spectrum.
pub fn classify(trend: Option<&TrendResult>, spectral: &SpectralResult) -> PatternClass {
    let Some(trend) = trend else {
        return PatternClass::Unknown;
    };

    let growth = trend.projected_growth_mb();
    let directional = trend.fit_quality >= DIRECTIONAL_FIT && growth.abs() >= FLAT_GROWTH_MB;

    match (directional, growth > 0.0, spectral.is_periodic()) {
        (true, true, true) => PatternClass::GrowingPeriodic,
        (true, true, false) => PatternClass::Growing,
        (true, false, _) => PatternClass::Shrinking,
        (false, _, true) => PatternClass::Periodic,
        (false, _, false) => PatternClass::Stable,
    }
}
