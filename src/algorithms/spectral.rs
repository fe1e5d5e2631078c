//! Spectral analysis of detrended memory signals
//!
//! Separates cyclical allocation behaviour (cache refreshes, batch jobs,
//! GC cycles) from the long-term trend:
//!
//! 1. subtract the fitted line from the raw samples
//! 2. resample the residual onto an evenly spaced grid, so sampling jitter
//!    does not smear the spectrum
//! 3. run a DFT and pick the strongest non-DC bin
//! 4. report its period only if it stands clear of the median bin
//!
//! The grid is capped at `max_points`, which bounds the cost of one pass.

use std::f64::consts::PI;

use crate::algorithms::trend::{linear_regression, TrendResult};
use crate::core::config::EngineConfig;
use crate::leaks::series::SeriesSnapshot;

/// Peaks at or below this are floating-point residue of an exact fit.
const NUMERIC_FLOOR_MB: f64 = 1e-6;

/// Outcome of a spectral pass.
#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub struct SpectralResult {
    /// Period of the dominant component; `None` when nothing periodic
    /// stands out of the noise
    pub dominant_period_hours: Option<f64>,
    /// Amplitude of the strongest non-DC bin (MB)
    pub dominant_magnitude: f64,
    /// Median bin amplitude (MB)
    pub noise_floor: f64,
}

impl SpectralResult {
    pub fn is_periodic(&self) -> bool {
        self.dominant_period_hours.is_some()
    }
}

/// Tunables for the analyzer, usually taken from the engine config.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct SpectralSettings {
    pub min_samples: usize,
    pub max_points: usize,
    pub noise_floor_multiple: f64,
    pub min_amplitude_mb: f64,
}

impl Default for SpectralSettings {
    fn default() -> Self {
        Self::from(&EngineConfig::default())
    }
}

impl From<&EngineConfig> for SpectralSettings {
    fn from(config: &EngineConfig) -> Self {
        Self {
            min_samples: config.min_samples_for_fft,
            max_points: config.max_fft_points,
            noise_floor_multiple: config.noise_floor_multiple,
            min_amplitude_mb: config.min_periodic_amplitude_mb,
        }
    }
}

/// Spectral analyzer for periodic allocation patterns
#[derive(Debug, Clone, Default)]
pub struct SpectralAnalyzer {
    settings: SpectralSettings,
}

impl SpectralAnalyzer {
    pub fn new(settings: SpectralSettings) -> Self {
        Self { settings }
    }

    pub fn settings(&self) -> &SpectralSettings {
        &self.settings
    }

    /// Analyze a snapshot. `trend` is reused for detrending when the caller
    /// already fitted one.
    pub fn analyze(&self, snapshot: &SeriesSnapshot, trend: Option<&TrendResult>) -> SpectralResult {
        if snapshot.len() < self.settings.min_samples.max(4) {
            return SpectralResult::default();
        }

        let points = snapshot.points_hours();
        let (slope, intercept) = match trend {
            Some(t) => (t.slope_mb_per_hour, t.intercept_mb),
            None => match linear_regression(&points) {
                Some((slope, intercept, _)) => (slope, intercept),
                None => return SpectralResult::default(),
            },
        };

        let residual: Vec<(f64, f64)> = points
            .iter()
            .map(|(x, y)| (*x, y - (intercept + slope * x)))
            .collect();

        let n = snapshot.len().min(self.settings.max_points);
        let Some((grid, step_hours)) = resample(&residual, n) else {
            return SpectralResult::default();
        };

        let amplitudes = amplitude_spectrum(&grid);
        self.pick_dominant(&amplitudes, step_hours * grid.len() as f64)
    }

    /// `amplitudes[k - 1]` is bin k; `span_hours` is the DFT record length.
    fn pick_dominant(&self, amplitudes: &[f64], span_hours: f64) -> SpectralResult {
        let Some((idx, &peak)) = amplitudes
            .iter()
            .enumerate()
            .max_by(|a, b| a.1.partial_cmp(b.1).unwrap_or(std::cmp::Ordering::Equal))
        else {
            return SpectralResult::default();
        };

        let noise_floor = median(amplitudes);
        let bin = idx + 1;

        let clears_floor = peak > self.settings.noise_floor_multiple * noise_floor;
        let large_enough = peak > NUMERIC_FLOOR_MB && peak >= self.settings.min_amplitude_mb;

        let dominant_period_hours = if clears_floor && large_enough {
            Some(span_hours / bin as f64)
        } else {
            None
        };

        tracing::trace!(
            bin,
            peak,
            noise_floor,
            periodic = dominant_period_hours.is_some(),
            "spectral pass"
        );

        SpectralResult {
            dominant_period_hours,
            dominant_magnitude: peak,
            noise_floor,
        }
    }
}

/// Linear interpolation of `points` onto `n` evenly spaced instants between
/// the first and last x. Returns the grid and its step (hours).
fn resample(points: &[(f64, f64)], n: usize) -> Option<(Vec<f64>, f64)> {
    let (first, last) = (points.first()?, points.last()?);
    let span = last.0 - first.0;
    if n < 2 || span <= 0.0 {
        return None;
    }

    let step = span / (n - 1) as f64;
    let mut grid = Vec::with_capacity(n);
    let mut i = 0;

    for j in 0..n {
        let t = if j == n - 1 { last.0 } else { first.0 + step * j as f64 };
        while i + 1 < points.len() && points[i + 1].0 <= t {
            i += 1;
        }
        let value = match points.get(i + 1) {
            Some(&(x1, y1)) => {
                let (x0, y0) = points[i];
                let dx = x1 - x0;
                if dx <= 0.0 {
                    y1
                } else {
                    y0 + (y1 - y0) * (t - x0) / dx
                }
            }
            None => points[i].1,
        };
        grid.push(value);
    }

    Some((grid, step))
}

/// One-sided amplitude spectrum for bins `1..=n/2` (DC excluded).
///
/// A sinusoid of amplitude A landing on a bin shows up as A.
fn amplitude_spectrum(signal: &[f64]) -> Vec<f64> {
    let n = signal.len();
    if n < 2 {
        return Vec::new();
    }

    let twiddle: Vec<(f64, f64)> = (0..n)
        .map(|m| {
            let angle = 2.0 * PI * m as f64 / n as f64;
            (angle.cos(), angle.sin())
        })
        .collect();

    (1..=n / 2)
        .map(|k| {
            let mut real = 0.0;
            let mut imag = 0.0;
            for (j, &x) in signal.iter().enumerate() {
                let (c, s) = twiddle[(j * k) % n];
                real += x * c;
                imag -= x * s;
            }
            let magnitude = (real * real + imag * imag).sqrt();
            // The Nyquist bin of an even-length signal has no mirror image
            let scale = if n % 2 == 0 && k == n / 2 { 1.0 } else { 2.0 };
            scale * magnitude / n as f64
        })
        .collect()
}

fn median(values: &[f64]) -> f64 {
    if values.is_empty() {
        return 0.0;
    }
    let mut sorted = values.to_vec();
    sorted.sort_by(|a, b| a.partial_cmp(b).unwrap_or(std::cmp::Ordering::Equal));
    let mid = sorted.len() / 2;
    if sorted.len() % 2 == 0 {
        (sorted[mid - 1] + sorted[mid]) / 2.0
    } else {
        sorted[mid]
    }
}
