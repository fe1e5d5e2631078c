//! Numerical analysis of memory series
//!
//! - Trend: least-squares growth rate and fit quality
//! - Spectral: dominant allocation cycle after detrending

pub mod spectral;
pub mod trend;

pub use spectral::{SpectralAnalyzer, SpectralResult};
pub use trend::TrendResult;
