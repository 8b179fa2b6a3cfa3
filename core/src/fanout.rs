//! SPDX-License-Identifier: GPL-3.0-or-later
//!
//! Broadcasts one pass's outcome to every downstream consumer: live-view
//! overlay sinks, the event store, and the notifier. Generalizes the
//! teacher's single-destination stage output into an independently-failing
//! multicast — one slow or broken sink never blocks another (§4.5).

use std::sync::atomic::Ordering;
use std::sync::Arc;

use tokio::sync::RwLock;
use tracing::warn;

use crate::detection::{Detection, DetectionResult, Event, FaceDetection};
use crate::frame::Frame;
use crate::interfaces::{EventStore, LiveOverlayProvider, Notifier};
use crate::telemetry::CameraCounters;

/// Owns the downstream fan-out for every camera this process serves. A
/// single instance is shared across all [`crate::logic::controller::PipelineController`]s.
pub struct Fanout {
    overlays: RwLock<Vec<Arc<dyn LiveOverlayProvider>>>,
    store: Arc<dyn EventStore>,
    notifier: Arc<dyn Notifier>,
}

impl Fanout {
    pub fn new(store: Arc<dyn EventStore>, notifier: Arc<dyn Notifier>) -> Self {
        Fanout {
            overlays: RwLock::new(Vec::new()),
            store,
            notifier,
        }
    }

    pub async fn add_overlay(&self, overlay: Arc<dyn LiveOverlayProvider>) {
        self.overlays.write().await.push(overlay);
    }

    /// Delegates to the underlying event store; exposed so the
    /// [`crate::supervisor::Supervisor`] admin surface doesn't need its own
    /// handle to the store.
    pub async fn list_events(
        &self,
        camera_id: Option<&str>,
        since_ms: Option<u64>,
        limit: usize,
    ) -> Result<Vec<Event>, crate::error::PipelineError> {
        self.store.list_events(camera_id, since_ms, limit).await
    }

    /// Whether any overlay sink is registered; the controller uses this to
    /// decide if it's worth asking detectors for an annotated frame at all.
    pub async fn has_overlay_subscribers(&self) -> bool {
        !self.overlays.read().await.is_empty()
    }

    /// Pushes a raw, undetected frame straight to the live-view sinks (the
    /// strategy-gated "nothing to do" path). No event is ever produced here.
    pub async fn forward_raw(&self, camera_id: &str, frame: &Frame) {
        let overlays = self.overlays.read().await;
        if overlays.is_empty() {
            return;
        }
        for overlay in overlays.iter() {
            let overlay = Arc::clone(overlay);
            let camera_id = camera_id.to_string();
            let bytes = frame.image_bytes.clone();
            let frame_seq = frame.frame_seq;
            tokio::spawn(async move {
                if !is_fresh(overlay.as_ref(), &camera_id, frame_seq).await {
                    return;
                }
                if let Err(err) = overlay.set_annotated_frame(&camera_id, &bytes).await {
                    warn!(camera_id = %camera_id, error = %err, "live overlay raw-frame push failed");
                }
            });
        }
    }

    /// Broadcasts one completed pass: every overlay sink gets the detections
    /// (and annotated bytes, if any); if the result warrants an event (I6) it
    /// is persisted and a notification dispatched.
    pub async fn dispatch(
        &self,
        camera_id: &str,
        alerts_enabled: bool,
        result: DetectionResult,
        counters: &Arc<CameraCounters>,
    ) {
        self.update_overlays(camera_id, &result).await;

        if !result.warrants_event(alerts_enabled) {
            return;
        }

        counters.events_emitted.fetch_add(1, Ordering::Relaxed);
        let stored_frame_path = format!("{camera_id}/{}.jpg", result.frame_seq);
        let event = Event::new(result, stored_frame_path);

        let store = Arc::clone(&self.store);
        let notifier = Arc::clone(&self.notifier);
        let counters = Arc::clone(counters);
        tokio::spawn(async move {
            persist_and_notify(store, notifier, event, counters).await;
        });
    }

    async fn update_overlays(&self, camera_id: &str, result: &DetectionResult) {
        let overlays = self.overlays.read().await;
        for overlay in overlays.iter() {
            let overlay = Arc::clone(overlay);
            let camera_id = camera_id.to_string();
            let detections = result.detections.clone();
            let faces = result.faces.clone();
            let annotated = result.annotated_image.clone();
            let frame_seq = result.frame_seq;
            tokio::spawn(async move {
                push_to_overlay(overlay, camera_id, frame_seq, detections, faces, annotated).await;
            });
        }
    }
}

async fn is_fresh(overlay: &dyn LiveOverlayProvider, camera_id: &str, frame_seq: u64) -> bool {
    match overlay.current_frame_seq(camera_id).await {
        Some(last) => frame_seq > last,
        None => true,
    }
}

async fn push_to_overlay(
    overlay: Arc<dyn LiveOverlayProvider>,
    camera_id: String,
    frame_seq: u64,
    detections: Vec<Detection>,
    faces: Vec<FaceDetection>,
    annotated: Option<Vec<u8>>,
) {
    if !is_fresh(overlay.as_ref(), &camera_id, frame_seq).await {
        return;
    }
    if let Err(err) = overlay.update_detections(&camera_id, &detections, &faces).await {
        warn!(camera_id = %camera_id, error = %err, "live overlay detection push failed");
    }
    if let Some(bytes) = annotated {
        if let Err(err) = overlay.set_annotated_frame(&camera_id, &bytes).await {
            warn!(camera_id = %camera_id, error = %err, "live overlay annotated-frame push failed");
        }
    }
}

/// Persists an event, retrying the write once, then dispatches a
/// notification (§7: `StoreWriteFailed`/`NotifierFailed` are both logged and
/// absorbed here, never escalated to the controller).
async fn persist_and_notify(
    store: Arc<dyn EventStore>,
    notifier: Arc<dyn Notifier>,
    event: Event,
    counters: Arc<CameraCounters>,
) {
    let camera_id = event.camera_id().to_string();
    let event_id = event.id;

    let mut last_err = None;
    let mut saved = false;
    for attempt in 0..2 {
        match store.save_event(event.clone()).await {
            Ok(()) => {
                saved = true;
                break;
            }
            Err(err) => {
                warn!(camera_id = %camera_id, attempt, error = %err, "event persistence failed");
                last_err = Some(err);
            }
        }
    }
    if !saved {
        if let Some(err) = last_err {
            warn!(camera_id = %camera_id, error = %err, "event dropped after persistence retries exhausted");
        }
        return;
    }

    if let Err(err) = notifier.notify(&event).await {
        warn!(camera_id = %camera_id, error = %err, "notifier dispatch failed, event stays unsent");
        return;
    }

    if let Err(err) = store.mark_notification_sent(&camera_id, event_id).await {
        warn!(camera_id = %camera_id, error = %err, "failed to mark notification sent");
        return;
    }
    counters.notifications_sent.fetch_add(1, Ordering::Relaxed);
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::AtomicU32;
    use std::sync::Mutex;
    use std::time::Duration;

    use async_trait::async_trait;

    use super::*;
    use crate::detection::{BoundingBox, ThreatLevel};
    use crate::error::PipelineError;

    struct RecordingStore {
        saved: Mutex<Vec<Event>>,
        marked_sent: Mutex<Vec<uuid::Uuid>>,
    }

    impl RecordingStore {
        fn new() -> Self {
            RecordingStore {
                saved: Mutex::new(Vec::new()),
                marked_sent: Mutex::new(Vec::new()),
            }
        }
    }

    #[async_trait]
    impl EventStore for RecordingStore {
        async fn save_event(&self, event: Event) -> Result<(), PipelineError> {
            self.saved.lock().unwrap().push(event);
            Ok(())
        }
        async fn mark_notification_sent(&self, _camera_id: &str, event_id: uuid::Uuid) -> Result<(), PipelineError> {
            self.marked_sent.lock().unwrap().push(event_id);
            Ok(())
        }
        async fn list_events(&self, _camera_id: Option<&str>, _since_ms: Option<u64>, _limit: usize) -> Result<Vec<Event>, PipelineError> {
            Ok(self.saved.lock().unwrap().clone())
        }
    }

    struct RecordingNotifier {
        calls: AtomicU32,
    }

    #[async_trait]
    impl Notifier for RecordingNotifier {
        async fn notify(&self, _event: &Event) -> Result<(), PipelineError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            Ok(())
        }
    }

    struct FailingNotifier;

    #[async_trait]
    impl Notifier for FailingNotifier {
        async fn notify(&self, _event: &Event) -> Result<(), PipelineError> {
            Err(PipelineError::NotifierFailed {
                camera_id: "cam-1".to_string(),
                source: anyhow::anyhow!("transport down"),
            })
        }
    }

    struct RecordingOverlay {
        detections_calls: AtomicU32,
        frame_calls: AtomicU32,
        last_seq: std::sync::atomic::AtomicU64,
    }

    impl RecordingOverlay {
        fn new() -> Self {
            RecordingOverlay {
                detections_calls: AtomicU32::new(0),
                frame_calls: AtomicU32::new(0),
                last_seq: std::sync::atomic::AtomicU64::new(0),
            }
        }
    }

    #[async_trait]
    impl LiveOverlayProvider for RecordingOverlay {
        async fn update_detections(&self, _camera_id: &str, _detections: &[Detection], _faces: &[FaceDetection]) -> Result<(), PipelineError> {
            self.detections_calls.fetch_add(1, Ordering::SeqCst);
            Ok(())
        }
        async fn set_annotated_frame(&self, _camera_id: &str, _image_bytes: &[u8]) -> Result<(), PipelineError> {
            self.frame_calls.fetch_add(1, Ordering::SeqCst);
            Ok(())
        }
        async fn current_frame_seq(&self, _camera_id: &str) -> Option<u64> {
            let seq = self.last_seq.load(Ordering::SeqCst);
            if seq == 0 {
                None
            } else {
                Some(seq)
            }
        }
    }

    fn result_with_detection(threat: ThreatLevel) -> DetectionResult {
        let mut r = DetectionResult::empty("cam-1", 1, 1_000);
        r.detections.push(Detection {
            class_name: "person".to_string(),
            confidence: 0.8,
            bbox: BoundingBox { x1: 0.0, y1: 0.0, x2: 1.0, y2: 1.0 },
            track_id: None,
            metadata: Default::default(),
        });
        r.threat_level = threat;
        r
    }

    #[tokio::test]
    async fn empty_result_never_emits_an_event() {
        let store = Arc::new(RecordingStore::new());
        let notifier = Arc::new(RecordingNotifier { calls: AtomicU32::new(0) });
        let fanout = Fanout::new(store.clone(), notifier.clone());
        let counters = Arc::new(CameraCounters::new());
        fanout
            .dispatch("cam-1", true, DetectionResult::empty("cam-1", 1, 0), &counters)
            .await;
        assert_eq!(counters.events_emitted.load(Ordering::Relaxed), 0);
    }

    #[tokio::test]
    async fn non_empty_result_persists_and_notifies() {
        let store = Arc::new(RecordingStore::new());
        let notifier = Arc::new(RecordingNotifier { calls: AtomicU32::new(0) });
        let fanout = Fanout::new(store.clone(), notifier.clone());
        let counters = Arc::new(CameraCounters::new());
        fanout
            .dispatch("cam-1", true, result_with_detection(ThreatLevel::None), &counters)
            .await;
        assert_eq!(counters.events_emitted.load(Ordering::Relaxed), 1);
        tokio::time::sleep(Duration::from_millis(50)).await;
        assert_eq!(store.saved.lock().unwrap().len(), 1);
        assert_eq!(notifier.calls.load(Ordering::SeqCst), 1);
        assert_eq!(store.marked_sent.lock().unwrap().len(), 1);
    }

    #[tokio::test]
    async fn disabled_alerts_suppress_events_even_with_detections() {
        let store = Arc::new(RecordingStore::new());
        let notifier = Arc::new(RecordingNotifier { calls: AtomicU32::new(0) });
        let fanout = Fanout::new(store.clone(), notifier.clone());
        let counters = Arc::new(CameraCounters::new());
        fanout
            .dispatch("cam-1", false, result_with_detection(ThreatLevel::None), &counters)
            .await;
        assert_eq!(counters.events_emitted.load(Ordering::Relaxed), 0);
    }

    #[tokio::test]
    async fn notifier_failure_leaves_event_unsent_but_persisted() {
        let store = Arc::new(RecordingStore::new());
        let notifier = Arc::new(FailingNotifier);
        let fanout = Fanout::new(store.clone(), notifier);
        let counters = Arc::new(CameraCounters::new());
        fanout
            .dispatch("cam-1", true, result_with_detection(ThreatLevel::None), &counters)
            .await;
        tokio::time::sleep(Duration::from_millis(50)).await;
        assert_eq!(store.saved.lock().unwrap().len(), 1);
        assert_eq!(store.marked_sent.lock().unwrap().len(), 0);
    }

    #[tokio::test]
    async fn persisted_event_round_trips_through_list_events() {
        let store = Arc::new(RecordingStore::new());
        let notifier = Arc::new(RecordingNotifier { calls: AtomicU32::new(0) });
        let fanout = Fanout::new(store.clone(), notifier);
        let counters = Arc::new(CameraCounters::new());
        let original = result_with_detection(ThreatLevel::High);

        fanout.dispatch("cam-1", true, original.clone(), &counters).await;
        tokio::time::sleep(Duration::from_millis(50)).await;

        let events = fanout
            .list_events(Some("cam-1"), None, 10)
            .await
            .expect("list_events should succeed against the in-memory double");
        assert_eq!(events.len(), 1);
        let read_back = &events[0];

        assert_eq!(read_back.result.detections, original.detections);
        assert_eq!(read_back.result.faces, original.faces);
        assert_eq!(read_back.threat_level, original.threat_level);
        assert_eq!(read_back.result.threat_level, original.threat_level);
        assert_eq!(read_back.stored_frame_path, format!("cam-1/{}.jpg", original.frame_seq));
    }

    #[tokio::test]
    async fn overlay_receives_detections_on_dispatch() {
        let store = Arc::new(RecordingStore::new());
        let notifier = Arc::new(RecordingNotifier { calls: AtomicU32::new(0) });
        let fanout = Fanout::new(store, notifier);
        let overlay = Arc::new(RecordingOverlay::new());
        fanout.add_overlay(overlay.clone()).await;
        assert!(fanout.has_overlay_subscribers().await);
        let counters = Arc::new(CameraCounters::new());
        fanout
            .dispatch("cam-1", true, result_with_detection(ThreatLevel::None), &counters)
            .await;
        tokio::time::sleep(Duration::from_millis(50)).await;
        assert_eq!(overlay.detections_calls.load(Ordering::SeqCst), 1);
    }
}
