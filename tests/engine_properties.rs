//! End-to-end behaviour of the leak engine on synthetic memory series.

use std::f64::consts::PI;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant};

use ruvector_leakwatch::leaks::series::ProcessSeries;
use ruvector_leakwatch::{
    EngineConfig, EngineError, EngineResult, LeakEngine, PatternClass, Resolution, ScoringWeights, Suspect,
    SuspectState, TimeEstimate,
};

const TEN_MINUTES: u64 = 600;

/// Feed `f(hours)` every ten minutes for `hours` hours.
fn feed<F>(engine: &LeakEngine, pid: u64, name: &str, hours: u64, base: Instant, f: F)
where
    F: Fn(f64) -> f64,
{
    for i in 0..=hours * 6 {
        let h = i as f64 / 6.0;
        engine.record_sample(pid, name, f(h), base + Duration::from_secs(i * TEN_MINUTES));
    }
}

fn alert_counter(engine: &LeakEngine) -> Arc<AtomicUsize> {
    let hits = Arc::new(AtomicUsize::new(0));
    let counter = Arc::clone(&hits);
    engine.on_alert(move |_: &Suspect| -> EngineResult<()> {
        counter.fetch_add(1, Ordering::SeqCst);
        Ok(())
    });
    hits
}

#[test]
fn test_monotonic_growth_is_flagged() {
    let engine = LeakEngine::new(EngineConfig::default()).unwrap();
    let alerts = alert_counter(&engine);
    let base = Instant::now();

    let mut flagged_at = None;
    for i in 0..=24 * 6u64 {
        let h = i as f64 / 6.0;
        engine.record_sample(7, "leaky", 100.0 + 5.0 * h, base + Duration::from_secs(i * TEN_MINUTES));
        if flagged_at.is_none() && engine.suspect(7).unwrap().state == SuspectState::Suspect {
            flagged_at = Some(h);
        }
    }

    let suspect = engine.suspect(7).unwrap();
    assert_eq!(suspect.state, SuspectState::Suspect);
    assert!((suspect.growth_rate_mb_per_hour - 5.0).abs() <= 0.25);
    assert!(suspect.confidence >= 0.7);
    assert_eq!(suspect.pattern, PatternClass::Growing);

    // 5 MB/h needs ten hours to clear the 50 MB absolute growth floor
    let flagged_at = flagged_at.unwrap();
    assert!((9.9..=10.5).contains(&flagged_at), "flagged at {}h", flagged_at);
    assert_eq!(alerts.load(Ordering::SeqCst), 1);

    let listed = engine.list_suspects();
    assert_eq!(listed.len(), 1);
    assert_eq!(listed[0].process_id, 7);
}

#[test]
fn test_periodic_process_stays_tracking() {
    let engine = LeakEngine::new(EngineConfig::default()).unwrap();
    let alerts = alert_counter(&engine);

    feed(&engine, 8, "cache", 48, Instant::now(), |h| 500.0 + 50.0 * (2.0 * PI * h / 2.0).sin());

    let suspect = engine.suspect(8).unwrap();
    assert_eq!(suspect.state, SuspectState::Tracking);
    assert!(suspect.growth_rate_mb_per_hour.abs() < 0.5, "slope {}", suspect.growth_rate_mb_per_hour);
    let period = suspect.periodicity_hours.unwrap();
    assert!((period - 2.0).abs() < 0.1, "period {}", period);
    assert_eq!(alerts.load(Ordering::SeqCst), 0);
}

#[test]
fn test_leak_on_top_of_cycle_is_flagged_with_period() {
    let engine = LeakEngine::new(EngineConfig::default()).unwrap();

    feed(&engine, 9, "worker", 24, Instant::now(), |h| {
        200.0 + 30.0 * h + 20.0 * (2.0 * PI * h / 3.0).sin()
    });

    let suspect = engine.suspect(9).unwrap();
    assert_eq!(suspect.state, SuspectState::Suspect);
    assert!((suspect.growth_rate_mb_per_hour - 30.0).abs() < 1.5);
    let period = suspect.periodicity_hours.unwrap();
    assert!((period - 3.0).abs() < 0.2, "period {}", period);
}

/// Growth-only confidence over a two-sample window: each sample's
/// confidence is the last ten-minute rate divided by 10 MB/h.
fn rate_driven_config() -> EngineConfig {
    EngineConfig {
        window_secs: TEN_MINUTES,
        min_samples_for_trend: 2,
        min_absolute_growth_mb: 0.0,
        reference_growth_mb_per_hour: 10.0,
        weights: ScoringWeights {
            fit: 0.0,
            growth: 1.0,
            duration: 0.0,
        },
        ..Default::default()
    }
}

#[test]
fn test_hysteresis_alerts_once() {
    let engine = LeakEngine::new(rate_driven_config()).unwrap();
    let alerts = alert_counter(&engine);
    let base = Instant::now();
    let mut mb = 100.0;
    let mut tick = 0u64;
    engine.record_sample(9, "swing", mb, base);

    let mut step = |rate: f64| {
        tick += 1;
        mb += rate / 6.0;
        engine.record_sample(9, "swing", mb, base + Duration::from_secs(tick * TEN_MINUTES));
        let suspect = engine.suspect(9).unwrap();
        (suspect.state, suspect.confidence)
    };

    // Threshold 0.7, release below 0.6: swing 0.05 either side
    for i in 0..20 {
        let rate = if i % 2 == 0 { 7.5 } else { 6.5 };
        let (state, confidence) = step(rate);
        assert_eq!(state, SuspectState::Suspect, "dropped out at {}", confidence);
    }
    assert_eq!(alerts.load(Ordering::SeqCst), 1);
    assert!(engine.get_history(10).is_empty());

    let (state, _) = step(5.0);
    assert_eq!(state, SuspectState::Tracking);
    let history = engine.get_history(10);
    assert_eq!(history.len(), 1);
    assert_eq!(history[0].resolution, Resolution::AutoRemediated);

    // Inside the band from below: not enough to flag again
    let (state, _) = step(6.5);
    assert_eq!(state, SuspectState::Tracking);

    let (state, _) = step(7.5);
    assert_eq!(state, SuspectState::Suspect);
    assert_eq!(alerts.load(Ordering::SeqCst), 2);
    assert_eq!(engine.stats().alerts_emitted, 2);
}

#[test]
fn test_dismiss_is_idempotent() {
    let engine = LeakEngine::new(EngineConfig::default()).unwrap();
    feed(&engine, 11, "leaky", 12, Instant::now(), |h| 100.0 + 20.0 * h);
    assert_eq!(engine.suspect(11).unwrap().state, SuspectState::Suspect);

    assert!(engine.dismiss(11).is_ok());
    assert!(engine.dismiss(11).is_ok());
    assert_eq!(engine.suspect(11).unwrap().state, SuspectState::Dismissed);
    assert!(engine.list_suspects().is_empty());

    let history = engine.get_history(10);
    assert_eq!(history.len(), 1);
    assert_eq!(history[0].resolution, Resolution::Dismissed);

    assert!(matches!(engine.dismiss(404), Err(EngineError::NotFound { pid: 404 })));
}

#[test]
fn test_dismissed_process_stays_quiet_during_cooldown() {
    let engine = LeakEngine::new(EngineConfig::default()).unwrap();
    let alerts = alert_counter(&engine);
    let base = Instant::now();

    feed(&engine, 12, "leaky", 12, base, |h| 100.0 + 20.0 * h);
    engine.dismiss(12).unwrap();

    // Thirty more minutes of growth, inside the one hour cooldown
    for i in 73..=75u64 {
        let h = i as f64 / 6.0;
        engine.record_sample(12, "leaky", 100.0 + 20.0 * h, base + Duration::from_secs(i * TEN_MINUTES));
    }
    assert_eq!(engine.suspect(12).unwrap().state, SuspectState::Dismissed);
    assert_eq!(alerts.load(Ordering::SeqCst), 1);

    // Past the cooldown the leak is picked up again
    for i in 76..=84u64 {
        let h = i as f64 / 6.0;
        engine.record_sample(12, "leaky", 100.0 + 20.0 * h, base + Duration::from_secs(i * TEN_MINUTES));
    }
    assert_eq!(engine.suspect(12).unwrap().state, SuspectState::Suspect);
    assert_eq!(alerts.load(Ordering::SeqCst), 2);
}

#[test]
fn test_eviction_invariant() {
    let window = Duration::from_secs(3600);
    let mut series = ProcessSeries::new(1, "p", window);
    let base = Instant::now();

    // Ten windows' worth at one-minute spacing
    for i in 0..=600u64 {
        let ts = base + Duration::from_secs(i * 60);
        series.record(100.0 + i as f64, ts).unwrap();

        let snapshot = series.snapshot();
        let latest = snapshot.last().unwrap().timestamp;
        let oldest = snapshot.first().unwrap().timestamp;
        assert!(oldest + window >= latest);
    }

    let snapshot = series.snapshot();
    assert_eq!(snapshot.len(), 61);
    assert_eq!(snapshot.duration(), window);
}

#[test]
fn test_projection_from_two_suspects() {
    let engine = LeakEngine::new(EngineConfig::default()).unwrap();
    let base = Instant::now();
    feed(&engine, 21, "slow", 12, base, |h| 100.0 + 10.0 * h);
    feed(&engine, 22, "fast", 12, base, |h| 100.0 + 20.0 * h);

    let suspects = engine.list_suspects();
    assert_eq!(suspects.len(), 2);
    assert_eq!(suspects[0].process_name, "fast");

    let hours = engine.estimate_time_to_pressure(300.0).hours().unwrap();
    assert!((hours - 10.0).abs() < 1e-6, "hours {}", hours);
}

#[test]
fn test_projection_without_suspects_is_unbounded() {
    let engine = LeakEngine::new(EngineConfig::default()).unwrap();
    feed(&engine, 23, "flat", 12, Instant::now(), |_| 300.0);
    assert_eq!(engine.estimate_time_to_pressure(300.0), TimeEstimate::Unbounded);
}

#[test]
fn test_terminated_suspect_is_resolved() {
    let engine = LeakEngine::new(EngineConfig::default()).unwrap();
    feed(&engine, 31, "leaky", 12, Instant::now(), |h| 100.0 + 20.0 * h);
    assert_eq!(engine.list_suspects().len(), 1);

    engine.process_terminated(31);

    assert!(engine.list_suspects().is_empty());
    assert!(engine.suspect(31).is_none());
    let history = engine.get_history(10);
    assert_eq!(history.len(), 1);
    assert_eq!(history[0].resolution, Resolution::ProcessExited);
    assert_eq!(history[0].process_id, 31);
    assert!(history[0].total_leaked_mb > 150.0);

    // Late calls are harmless
    engine.process_terminated(31);
    assert_eq!(engine.get_history(10).len(), 1);
}

#[test]
fn test_invalid_samples_are_ignored() {
    let engine = LeakEngine::new(EngineConfig::default()).unwrap();
    let base = Instant::now();
    feed(&engine, 41, "leaky", 12, base, |h| 100.0 + 20.0 * h);
    let before = engine.suspect(41).unwrap();

    engine.record_sample(41, "leaky", -1.0, base + Duration::from_secs(13 * 3600));
    engine.record_sample(41, "leaky", f64::NAN, base + Duration::from_secs(13 * 3600));
    engine.record_sample(41, "leaky", 500.0, base);

    let after = engine.suspect(41).unwrap();
    assert_eq!(after.sample_count, before.sample_count);
    assert_eq!(after.state, SuspectState::Suspect);
    assert_eq!(engine.stats().samples_rejected, 3);
}

#[test]
fn test_concurrent_producers_and_readers() {
    let engine = Arc::new(LeakEngine::new(EngineConfig::default()).unwrap());
    let base = Instant::now();

    thread::scope(|scope| {
        for pid in 0..8u64 {
            let engine = Arc::clone(&engine);
            scope.spawn(move || {
                let rate = if pid % 2 == 0 { 20.0 } else { 0.0 };
                feed(&engine, pid, &format!("proc-{}", pid), 12, base, |h| 100.0 + rate * h);
            });
        }
        let reader = Arc::clone(&engine);
        scope.spawn(move || {
            for _ in 0..200 {
                for s in reader.list_suspects() {
                    assert!((0.0..=1.0).contains(&s.confidence));
                }
                let _ = reader.estimate_time_to_pressure(1024.0);
            }
        });
    });

    let suspects = engine.list_suspects();
    assert_eq!(suspects.len(), 4);
    assert!(suspects.iter().all(|s| s.process_id % 2 == 0));
    assert_eq!(engine.stats().samples_accepted, 8 * 73);
}
