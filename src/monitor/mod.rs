//! Process sampling and the monitoring loop

pub mod driver;
pub mod sampler;

pub use driver::LeakMonitor;
pub use sampler::{MemorySampler, SampleSet, SamplerConfig, SysinfoSampler};
