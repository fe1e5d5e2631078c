//! Per-process memory sampling

use std::collections::HashSet;
use std::time::Instant;
use sysinfo::{ProcessesToUpdate, System};

pub use crate::leaks::engine::ProcessReading;

const BYTES_PER_MB: f64 = 1024.0 * 1024.0;

/// Output of one sampling pass.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct SampleSet {
    /// Readings for the processes worth tracking
    pub readings: Vec<ProcessReading>,
    /// Every live pid, including processes filtered out of `readings`
    pub alive: HashSet<u64>,
}

impl From<Vec<ProcessReading>> for SampleSet {
    /// Every reported process is alive, nothing else is.
    fn from(readings: Vec<ProcessReading>) -> Self {
        let alive = readings.iter().map(|r| r.pid).collect();
        Self { readings, alive }
    }
}

/// Source of per-process memory readings.
pub trait MemorySampler: Send {
    /// Readings plus the full set of live pids, taken from one refresh.
    fn sample(&mut self) -> SampleSet;

    /// Memory still available to the system (MB), when the source knows it.
    fn available_memory_mb(&mut self) -> Option<f64> {
        None
    }
}

/// Sampler settings
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct SamplerConfig {
    /// Processes below this resident size are skipped
    pub min_process_mb: f64,
}

impl Default for SamplerConfig {
    fn default() -> Self {
        Self { min_process_mb: 10.0 }
    }
}

/// Resident memory of every process via `sysinfo`.
pub struct SysinfoSampler {
    system: System,
    config: SamplerConfig,
}

impl SysinfoSampler {
    pub fn new(config: SamplerConfig) -> Self {
        Self {
            system: System::new(),
            config,
        }
    }
}

impl Default for SysinfoSampler {
    fn default() -> Self {
        Self::new(SamplerConfig::default())
    }
}

impl MemorySampler for SysinfoSampler {
    fn sample(&mut self) -> SampleSet {
        self.system.refresh_processes(ProcessesToUpdate::All, true);
        let timestamp = Instant::now();

        let mut set = SampleSet::default();
        for (pid, process) in self.system.processes() {
            // Linux lists threads as tasks of their parent
            if process.thread_kind().is_some() {
                continue;
            }
            let pid = pid.as_u32() as u64;
            set.alive.insert(pid);

            let memory_mb = process.memory() as f64 / BYTES_PER_MB;
            if memory_mb < self.config.min_process_mb {
                continue;
            }
            set.readings.push(ProcessReading {
                pid,
                name: process.name().to_string_lossy().to_string(),
                memory_mb,
                timestamp,
            });
        }
        set
    }

    fn available_memory_mb(&mut self) -> Option<f64> {
        self.system.refresh_memory();
        Some(self.system.available_memory() as f64 / BYTES_PER_MB)
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use std::collections::VecDeque;

    /// Replays canned ticks, then reports nothing.
    pub(crate) struct ScriptedSampler {
        ticks: VecDeque<SampleSet>,
        available_mb: Option<f64>,
    }

    impl ScriptedSampler {
        pub(crate) fn new(ticks: Vec<Vec<ProcessReading>>) -> Self {
            Self::from_sets(ticks.into_iter().map(SampleSet::from).collect())
        }

        pub(crate) fn from_sets(ticks: Vec<SampleSet>) -> Self {
            Self {
                ticks: ticks.into(),
                available_mb: None,
            }
        }

        pub(crate) fn with_available(mut self, mb: f64) -> Self {
            self.available_mb = Some(mb);
            self
        }
    }

    impl MemorySampler for ScriptedSampler {
        fn sample(&mut self) -> SampleSet {
            self.ticks.pop_front().unwrap_or_default()
        }

        fn available_memory_mb(&mut self) -> Option<f64> {
            self.available_mb
        }
    }

    #[test]
    fn test_sysinfo_sampler_respects_floor() {
        let mut sampler = SysinfoSampler::new(SamplerConfig { min_process_mb: 1.0 });
        let set = sampler.sample();
        assert!(set.readings.iter().all(|r| r.memory_mb >= 1.0));
        assert!(set.readings.iter().all(|r| r.memory_mb.is_finite()));
        assert!(set.readings.iter().all(|r| set.alive.contains(&r.pid)));
    }

    #[test]
    fn test_filtered_processes_still_alive() {
        let mut sampler = SysinfoSampler::new(SamplerConfig {
            min_process_mb: f64::INFINITY,
        });
        let set = sampler.sample();
        assert!(set.readings.is_empty());
        assert!(set.alive.contains(&(std::process::id() as u64)));
    }

    #[test]
    fn test_available_memory_reported() {
        let mut sampler = SysinfoSampler::default();
        let available = sampler.available_memory_mb().unwrap();
        assert!(available >= 0.0);
    }

    #[test]
    fn test_scripted_sampler_drains() {
        let reading = ProcessReading {
            pid: 1,
            name: "a".into(),
            memory_mb: 10.0,
            timestamp: Instant::now(),
        };
        let mut sampler = ScriptedSampler::new(vec![vec![reading.clone()]]).with_available(512.0);
        let set = sampler.sample();
        assert_eq!(set.readings, vec![reading]);
        assert_eq!(set.alive, HashSet::from([1]));
        assert_eq!(sampler.sample(), SampleSet::default());
        assert_eq!(sampler.available_memory_mb(), Some(512.0));
    }
}
