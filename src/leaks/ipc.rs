//! Leak detection IPC handlers
//!
//! JSON request/response bridge for dashboard and control-center front ends.
//! Responses use camelCase keys.

use serde_json::{json, Value};

use crate::core::error::EngineError;
use crate::leaks::engine::LeakEngine;
use crate::leaks::history::Episode;
use crate::leaks::registry::Suspect;

const DEFAULT_HISTORY_LIMIT: usize = 20;

/// Route a leak-related IPC message. Returns `None` for unknown types.
pub fn handle_ipc(engine: &LeakEngine, msg_type: &str, payload: &Value) -> Option<String> {
    match msg_type {
        "get_leak_suspects" => Some(get_leak_suspects(engine)),
        "get_leak_history" => Some(get_leak_history(engine, payload)),
        "dismiss_leak" => Some(dismiss_leak(engine, payload)),
        "get_leak_projection" => Some(get_leak_projection(engine, payload)),
        "get_leak_stats" => Some(get_leak_stats(engine)),
        _ => None,
    }
}

// ── IPC handlers ───────────────────────────────────────────────────

fn get_leak_suspects(engine: &LeakEngine) -> String {
    let suspects: Vec<Value> = engine.list_suspects().iter().map(suspect_json).collect();
    json!({ "suspects": suspects }).to_string()
}

fn get_leak_history(engine: &LeakEngine, payload: &Value) -> String {
    let limit = payload
        .get("limit")
        .and_then(|v| v.as_u64())
        .map(|l| l as usize)
        .unwrap_or(DEFAULT_HISTORY_LIMIT);
    let history: Vec<Value> = engine.get_history(limit).iter().map(episode_json).collect();
    json!({ "history": history }).to_string()
}

fn dismiss_leak(engine: &LeakEngine, payload: &Value) -> String {
    let pid = match payload.get("pid").and_then(|v| v.as_u64()) {
        Some(p) => p,
        None => {
            return json!({ "success": false, "error": "No PID specified" }).to_string();
        }
    };

    match engine.dismiss(pid) {
        Ok(()) => json!({ "success": true, "pid": pid }).to_string(),
        Err(e @ EngineError::NotFound { .. }) => {
            json!({ "success": false, "pid": pid, "error": e.to_string() }).to_string()
        }
        Err(e) => {
            tracing::error!(pid, "Dismiss failed: {}", e);
            json!({ "success": false, "pid": pid, "error": e.to_string() }).to_string()
        }
    }
}

fn get_leak_projection(engine: &LeakEngine, payload: &Value) -> String {
    let headroom = match payload.get("free_headroom_mb").and_then(|v| v.as_f64()) {
        Some(h) => h,
        None => {
            return json!({ "success": false, "error": "No free_headroom_mb specified" }).to_string();
        }
    };

    let estimate = engine.estimate_time_to_pressure(headroom);
    json!({
        "success": true,
        "freeHeadroomMb": round1(headroom),
        "unbounded": estimate.is_unbounded(),
        "hours": estimate.hours().map(round2),
        "display": estimate.to_string(),
    })
    .to_string()
}

fn get_leak_stats(engine: &LeakEngine) -> String {
    let stats = engine.stats();
    json!({
        "trackedProcesses": stats.tracked_processes,
        "tracking": stats.tracking,
        "suspects": stats.suspects,
        "dismissed": stats.dismissed,
        "samplesAccepted": stats.samples_accepted,
        "samplesRejected": stats.samples_rejected,
        "alertsEmitted": stats.alerts_emitted,
        "alertDeliveryFailures": stats.alert_delivery_failures,
        "episodesRecorded": stats.episodes_recorded,
    })
    .to_string()
}

// ── Serialization ──────────────────────────────────────────────────

fn suspect_json(s: &Suspect) -> Value {
    json!({
        "pid": s.process_id,
        "name": s.process_name,
        "currentMb": round1(s.current_mb),
        "peakMb": round1(s.peak_mb),
        "growthRate": round1(s.growth_rate_mb_per_hour),
        "growthPercent": round1(s.growth_percent()),
        "durationMin": s.duration_observed.as_secs() / 60,
        "confidence": round2(s.confidence),
        "fitQuality": round2(s.fit_quality),
        "samples": s.sample_count,
        "periodicity": s.periodicity_hours.map(round2),
        "pattern": s.pattern,
        "state": s.state,
        "severity": s.severity,
        "recommendation": s.recommendation(),
        "detectedAt": s.detected_at.map(|t| t.to_rfc3339()),
    })
}

fn episode_json(e: &Episode) -> Value {
    json!({
        "pid": e.process_id,
        "name": e.process_name,
        "detectedAt": e.detected_at.to_rfc3339(),
        "resolvedAt": e.resolved_at.to_rfc3339(),
        "durationMin": e.duration().num_minutes(),
        "resolution": e.resolution,
        "totalLeakedMb": round1(e.total_leaked_mb),
        "peakGrowthRate": round1(e.peak_growth_rate_mb_per_hour),
        "confidence": round2(e.confidence_at_detection),
    })
}

fn round1(v: f64) -> f64 {
    (v * 10.0).round() / 10.0
}

fn round2(v: f64) -> f64 {
    (v * 100.0).round() / 100.0
}
