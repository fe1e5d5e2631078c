//! Alert gate and notifier fan-out
//!
//! The gate fires once when an entry enters `Suspect` and stays silent until
//! the entry has dropped back to `Tracking`. Delivery is best effort: a
//! failing sink is logged and never touches detection state.

use parking_lot::RwLock;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use crate::core::error::{EngineError, EngineResult};
use crate::leaks::registry::Suspect;

/// Per-entry one-shot latch.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AlertGate {
    armed: bool,
}

impl Default for AlertGate {
    fn default() -> Self {
        Self { armed: true }
    }
}

impl AlertGate {
    pub fn is_armed(&self) -> bool {
        self.armed
    }

    /// Called on `Tracking → Suspect`. Returns whether to alert.
    pub fn on_flagged(&mut self) -> bool {
        std::mem::replace(&mut self.armed, false)
    }

    /// Called on `Suspect → Tracking`.
    pub fn on_released(&mut self) {
        self.armed = true;
    }
}

/// Receiver of alert events (toast, email, log, channel...).
pub trait AlertSink: Send + Sync {
    fn notify(&self, suspect: &Suspect) -> EngineResult<()>;
}

impl<F> AlertSink for F
where
    F: Fn(&Suspect) -> EngineResult<()> + Send + Sync,
{
    fn notify(&self, suspect: &Suspect) -> EngineResult<()> {
        self(suspect)
    }
}

/// Logs alerts through `tracing`.
#[derive(Debug, Default, Clone, Copy)]
pub struct LogNotifier;

impl AlertSink for LogNotifier {
    fn notify(&self, suspect: &Suspect) -> EngineResult<()> {
        tracing::warn!(
            pid = suspect.process_id,
            name = %suspect.process_name,
            rate_mb_per_hour = suspect.growth_rate_mb_per_hour,
            confidence = suspect.confidence,
            "Memory leak suspected: {}",
            suspect.recommendation()
        );
        Ok(())
    }
}

/// Forwards alerts into a tokio broadcast channel.
pub struct ChannelNotifier {
    tx: tokio::sync::broadcast::Sender<Suspect>,
}

impl ChannelNotifier {
    pub fn new(tx: tokio::sync::broadcast::Sender<Suspect>) -> Self {
        Self { tx }
    }
}

impl AlertSink for ChannelNotifier {
    fn notify(&self, suspect: &Suspect) -> EngineResult<()> {
        self.tx
            .send(suspect.clone())
            .map(|_| ())
            .map_err(|_| EngineError::Notify("no alert subscribers".into()))
    }
}

/// Registered sinks plus delivery counters.
#[derive(Default)]
pub struct AlertDispatcher {
    sinks: RwLock<Vec<Arc<dyn AlertSink>>>,
    delivered: AtomicU64,
    failed: AtomicU64,
}

impl AlertDispatcher {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(&self, sink: Arc<dyn AlertSink>) {
        self.sinks.write().push(sink);
    }

    pub fn sink_count(&self) -> usize {
        self.sinks.read().len()
    }

    /// Deliver to every sink; failures are logged and counted.
    pub fn dispatch(&self, suspect: &Suspect) {
        // Clone the list so a sink may register another sink without deadlocking
        let sinks: Vec<Arc<dyn AlertSink>> = self.sinks.read().clone();
        for sink in sinks {
            match sink.notify(suspect) {
                Ok(()) => {
                    self.delivered.fetch_add(1, Ordering::Relaxed);
                }
                Err(e) => {
                    self.failed.fetch_add(1, Ordering::Relaxed);
                    tracing::warn!(pid = suspect.process_id, "Alert delivery failed: {}", e);
                }
            }
        }
    }

    pub fn delivered(&self) -> u64 {
        self.delivered.load(Ordering::Relaxed)
    }

    pub fn failed(&self) -> u64 {
        self.failed.load(Ordering::Relaxed)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::leaks::registry::tests::sample_suspect;
    use std::sync::atomic::AtomicUsize;

    #[test]
    fn test_gate_fires_once() {
        let mut gate = AlertGate::default();
        assert!(gate.on_flagged());
        assert!(!gate.on_flagged());
        gate.on_released();
        assert!(gate.is_armed());
        assert!(gate.on_flagged());
    }

    #[test]
    fn test_dispatch_to_all_sinks() {
        let dispatcher = AlertDispatcher::new();
        let hits = Arc::new(AtomicUsize::new(0));

        for _ in 0..2 {
            let hits = Arc::clone(&hits);
            dispatcher.register(Arc::new(move |_: &Suspect| -> EngineResult<()> {
                hits.fetch_add(1, Ordering::SeqCst);
                Ok(())
            }));
        }

        dispatcher.dispatch(&sample_suspect(1));
        assert_eq!(hits.load(Ordering::SeqCst), 2);
        assert_eq!(dispatcher.delivered(), 2);
    }

    #[test]
    fn test_failing_sink_is_swallowed() {
        let dispatcher = AlertDispatcher::new();
        let hits = Arc::new(AtomicUsize::new(0));

        dispatcher.register(Arc::new(|_: &Suspect| -> EngineResult<()> {
            Err(EngineError::Notify("smtp down".into()))
        }));
        let counter = Arc::clone(&hits);
        dispatcher.register(Arc::new(move |_: &Suspect| -> EngineResult<()> {
            counter.fetch_add(1, Ordering::SeqCst);
            Ok(())
        }));

        dispatcher.dispatch(&sample_suspect(1));
        assert_eq!(hits.load(Ordering::SeqCst), 1);
        assert_eq!(dispatcher.failed(), 1);
        assert_eq!(dispatcher.delivered(), 1);
    }

    #[test]
    fn test_channel_notifier() {
        let (tx, mut rx) = tokio::sync::broadcast::channel(4);
        let notifier = ChannelNotifier::new(tx);
        notifier.notify(&sample_suspect(9)).unwrap();
        assert_eq!(rx.try_recv().unwrap().process_id, 9);

        drop(rx);
        assert!(notifier.notify(&sample_suspect(9)).is_err());
    }
}
