//! SPDX-License-Identifier: GPL-3.0-or-later
//!
//! Minimal process entry point: loads a configuration document, wires up a
//! supervisor with in-memory store/notifier/overlay stand-ins (callers
//! integrating this crate supply their own), starts every configured
//! camera, and runs until interrupted.

use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};

use anyhow::{Context, Result};
use async_trait::async_trait;
use sentryline_core::config::ConfigDocument;
use sentryline_core::detection::{Detection, Event, FaceDetection};
use sentryline_core::error::PipelineError;
use sentryline_core::fanout::Fanout;
use sentryline_core::interfaces::{EventStore, LiveOverlayProvider, Notifier};
use sentryline_core::logic::registry::DetectorRegistry;
use sentryline_core::supervisor::Supervisor;
use sentryline_core::telemetry::init_tracing;
use tracing::info;

/// Logs every event to stdout instead of persisting it anywhere durable.
/// Real deployments supply their own [`EventStore`] (database, object store).
struct StdoutEventStore {
    events: Mutex<Vec<Event>>,
}

impl StdoutEventStore {
    fn new() -> Self {
        StdoutEventStore {
            events: Mutex::new(Vec::new()),
        }
    }
}

#[async_trait]
impl EventStore for StdoutEventStore {
    async fn save_event(&self, event: Event) -> Result<(), PipelineError> {
        info!(
            camera_id = event.camera_id(),
            event_id = %event.id,
            threat_level = ?event.threat_level,
            "event recorded"
        );
        self.events.lock().unwrap().push(event);
        Ok(())
    }

    async fn mark_notification_sent(
        &self,
        camera_id: &str,
        event_id: uuid::Uuid,
    ) -> Result<(), PipelineError> {
        let mut events = self.events.lock().unwrap();
        if let Some(event) = events.iter_mut().find(|e| e.id == event_id) {
            event.notification_sent = true;
        } else {
            return Err(PipelineError::StoreWriteFailed {
                camera_id: camera_id.to_string(),
                source: anyhow::anyhow!("event {event_id} not found"),
            });
        }
        Ok(())
    }

    async fn list_events(
        &self,
        camera_id: Option<&str>,
        since_ms: Option<u64>,
        limit: usize,
    ) -> Result<Vec<Event>, PipelineError> {
        let events = self.events.lock().unwrap();
        let filtered = events
            .iter()
            .filter(|e| camera_id.is_none_or(|id| e.camera_id() == id))
            .filter(|e| since_ms.is_none_or(|since| e.result.timestamp_ms >= since))
            .rev()
            .take(limit)
            .cloned()
            .collect();
        Ok(filtered)
    }
}

/// Logs a one-line notification instead of dispatching to a push/email/SMS
/// transport. Real deployments supply their own [`Notifier`].
struct LoggingNotifier;

#[async_trait]
impl Notifier for LoggingNotifier {
    async fn notify(&self, event: &Event) -> Result<(), PipelineError> {
        info!(
            camera_id = event.camera_id(),
            event_id = %event.id,
            "would notify subscribers of this event"
        );
        Ok(())
    }
}

/// Tracks only the last delivered frame sequence per camera; drops detection
/// output on the floor. Real deployments supply a live-view transport.
struct NullOverlay {
    last_seq: Mutex<HashMap<String, AtomicU64>>,
}

impl NullOverlay {
    fn new() -> Self {
        NullOverlay {
            last_seq: Mutex::new(HashMap::new()),
        }
    }
}

#[async_trait]
impl LiveOverlayProvider for NullOverlay {
    async fn update_detections(
        &self,
        _camera_id: &str,
        _detections: &[Detection],
        _faces: &[FaceDetection],
    ) -> Result<(), PipelineError> {
        Ok(())
    }

    async fn set_annotated_frame(&self, camera_id: &str, _image_bytes: &[u8]) -> Result<(), PipelineError> {
        self.last_seq
            .lock()
            .unwrap()
            .entry(camera_id.to_string())
            .or_insert_with(|| AtomicU64::new(0));
        Ok(())
    }

    async fn current_frame_seq(&self, camera_id: &str) -> Option<u64> {
        self.last_seq
            .lock()
            .unwrap()
            .get(camera_id)
            .map(|seq| seq.load(Ordering::Relaxed))
    }
}

fn config_path() -> PathBuf {
    std::env::args()
        .nth(1)
        .map(PathBuf::from)
        .unwrap_or_else(|| PathBuf::from("sentryline.toml"))
}

#[tokio::main]
async fn main() -> Result<()> {
    init_tracing();

    let path = config_path();
    let raw = std::fs::read_to_string(&path)
        .with_context(|| format!("reading config file {}", path.display()))?;
    let config = ConfigDocument::from_toml_str(&raw)
        .map_err(|e| anyhow::anyhow!(e))
        .with_context(|| format!("parsing config file {}", path.display()))?;

    let registry = Arc::new(DetectorRegistry::new());
    let fanout = Arc::new(Fanout::new(Arc::new(StdoutEventStore::new()), Arc::new(LoggingNotifier)));
    fanout.add_overlay(Arc::new(NullOverlay::new())).await;

    let camera_ids: Vec<String> = config.cameras.keys().cloned().collect();
    let supervisor = Arc::new(Supervisor::new(registry, fanout, config));

    for camera_id in &camera_ids {
        supervisor.start(camera_id).await;
        info!(camera_id, "camera started");
    }

    info!(count = camera_ids.len(), "all configured cameras started, awaiting frames");

    tokio::signal::ctrl_c().await.context("waiting for shutdown signal")?;
    info!("shutdown requested, stopping all cameras");
    supervisor.stop_all().await;

    Ok(())
}
