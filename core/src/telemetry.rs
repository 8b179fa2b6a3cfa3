//! SPDX-License-Identifier: GPL-3.0-or-later
//!
//! Structured observability: per-camera counters plus `tracing` span helpers.
//! Generalizes the teacher's heavier `TelemetryRun` (a crossbeam-channel
//! backed background thread writing JSON-lines to disk) into span-based
//! instrumentation a caller's own subscriber can route anywhere (stdout,
//! OpenTelemetry, a file appender) without this crate owning the sink.

use std::sync::atomic::{AtomicU64, Ordering};

use tracing::Span;

/// Lock-free per-camera counters. Snapshots are point-in-time reads, not
/// transactional across fields.
#[derive(Debug, Default)]
pub struct CameraCounters {
    pub frames_delivered: AtomicU64,
    pub frames_dropped_inflight: AtomicU64,
    pub frames_dropped_no_detectors: AtomicU64,
    pub passes_run: AtomicU64,
    pub events_emitted: AtomicU64,
    pub notifications_sent: AtomicU64,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct CameraCountersSnapshot {
    pub frames_delivered: u64,
    pub frames_dropped_inflight: u64,
    pub frames_dropped_no_detectors: u64,
    pub passes_run: u64,
    pub events_emitted: u64,
    pub notifications_sent: u64,
}

impl CameraCounters {
    pub fn new() -> Self {
        CameraCounters::default()
    }

    pub fn snapshot(&self) -> CameraCountersSnapshot {
        CameraCountersSnapshot {
            frames_delivered: self.frames_delivered.load(Ordering::Relaxed),
            frames_dropped_inflight: self.frames_dropped_inflight.load(Ordering::Relaxed),
            frames_dropped_no_detectors: self.frames_dropped_no_detectors.load(Ordering::Relaxed),
            passes_run: self.passes_run.load(Ordering::Relaxed),
            events_emitted: self.events_emitted.load(Ordering::Relaxed),
            notifications_sent: self.notifications_sent.load(Ordering::Relaxed),
        }
    }
}

/// Span covering one controller's lifetime, entered once at construction.
pub fn camera_span(camera_id: &str) -> Span {
    tracing::info_span!("camera", camera_id = %camera_id)
}

/// Span covering a single executor pass, entered for its duration.
pub fn pass_span(camera_id: &str, frame_seq: u64) -> Span {
    tracing::debug_span!("pass", camera_id = %camera_id, frame_seq)
}

/// Installs a global `tracing` subscriber driven by `RUST_LOG` (defaulting to
/// `info` when unset). Intended for binaries (the CLI); library code never
/// installs a subscriber itself.
pub fn init_tracing() {
    use tracing_subscriber::EnvFilter;

    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    let _ = tracing_subscriber::fmt().with_env_filter(filter).try_init();
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn snapshot_reflects_recorded_counts() {
        let counters = CameraCounters::new();
        counters.frames_delivered.fetch_add(3, Ordering::Relaxed);
        counters.events_emitted.fetch_add(1, Ordering::Relaxed);
        let snap = counters.snapshot();
        assert_eq!(snap.frames_delivered, 3);
        assert_eq!(snap.events_emitted, 1);
        assert_eq!(snap.passes_run, 0);
    }
}
