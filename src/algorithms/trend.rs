//! Linear trend estimation
//!
//! Ordinary least squares of memory (MB) against elapsed time (hours) over
//! the whole window, with R² as the goodness of fit. No outlier rejection:
//! a single spike is diluted by the rest of the window.

use std::time::Duration;

use crate::leaks::series::SeriesSnapshot;

/// Outcome of a trend fit.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct TrendResult {
    pub slope_mb_per_hour: f64,
    pub intercept_mb: f64,
    /// R² in [0, 1]
    pub fit_quality: f64,
    pub duration_observed: Duration,
}

impl TrendResult {
    /// Growth implied by the fitted line over the observed duration.
    pub fn projected_growth_mb(&self) -> f64 {
        self.slope_mb_per_hour * self.duration_observed.as_secs_f64() / 3600.0
    }

    /// Fitted value at `hours` after the first sample.
    pub fn value_at(&self, hours: f64) -> f64 {
        self.intercept_mb + self.slope_mb_per_hour * hours
    }
}

/// Trend for a snapshot, or `None` while there are too few samples or the
/// samples share a single timestamp.
pub fn estimate(snapshot: &SeriesSnapshot, min_samples: usize) -> Option<TrendResult> {
    if snapshot.len() < min_samples.max(2) {
        return None;
    }

    let points = snapshot.points_hours();
    let (slope, intercept, r_squared) = linear_regression(&points)?;

    Some(TrendResult {
        slope_mb_per_hour: slope,
        intercept_mb: intercept,
        fit_quality: r_squared,
        duration_observed: snapshot.duration(),
    })
}

/// Least-squares fit returning `(slope, intercept, r_squared)`.
///
/// Centred sums keep the fit stable when memory values are large and
/// nearly constant. A flat series has no variance to explain and gets
/// R² = 0.
pub fn linear_regression(points: &[(f64, f64)]) -> Option<(f64, f64, f64)> {
    let n = points.len();
    if n < 2 {
        return None;
    }
    let n_f = n as f64;

    let mean_x = points.iter().map(|(x, _)| x).sum::<f64>() / n_f;
    let mean_y = points.iter().map(|(_, y)| y).sum::<f64>() / n_f;

    let mut sxx = 0.0;
    let mut sxy = 0.0;
    let mut syy = 0.0;
    for (x, y) in points {
        let dx = x - mean_x;
        let dy = y - mean_y;
        sxx += dx * dx;
        sxy += dx * dy;
        syy += dy * dy;
    }

    if sxx < 1e-12 {
        return None;
    }

    let slope = sxy / sxx;
    let intercept = mean_y - slope * mean_x;

    let ss_res: f64 = points
        .iter()
        .map(|(x, y)| (y - (intercept + slope * x)).powi(2))
        .sum();

    let r_squared = if syy < 1e-12 {
        0.0
    } else {
        (1.0 - ss_res / syy).clamp(0.0, 1.0)
    };

    Some((slope, intercept, r_squared))
}
