//! SPDX-License-Identifier: GPL-3.0-or-later
//!
//! One [`PipelineController`] per active camera: owns the frame loop, the
//! strategy instance, the effective configuration snapshot, and the
//! single-slot in-flight guard (I5). Generalizes the teacher's single global
//! `PipelineController` (one FSM pair driving one camera's frames) into a
//! per-camera instance the [`crate::supervisor::Supervisor`] multiplies.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use tokio::sync::{Mutex, RwLock};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn, Instrument};

use crate::config::{PipelineConfig, StrategyMode};
use crate::detection::DetectionResult;
use crate::fanout::Fanout;
use crate::frame::{Frame, SequenceGuard};
use crate::logic::registry::DetectorRegistry;
use crate::logic::strategy::{build_strategy, Strategy};
use crate::logic::executor::Executor;
use crate::telemetry::CameraCounters;

/// `Idle -> Gating -> Running -> Broadcasting -> Idle`, with a terminal
/// `Stopped` reached on shutdown (§4.4). Modelled as a plain enum rather than
/// a trait-object FSM registry (unlike the teacher's dual activity/health
/// FSM) since this machine is single-dimensional and linear per frame — see
/// DESIGN.md.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ControllerState {
    Idle,
    Gating,
    Running,
    Broadcasting,
    Stopped,
}

impl ControllerState {
    fn as_str(&self) -> &'static str {
        match self {
            ControllerState::Idle => "idle",
            ControllerState::Gating => "gating",
            ControllerState::Running => "running",
            ControllerState::Broadcasting => "broadcasting",
            ControllerState::Stopped => "stopped",
        }
    }
}

/// One per active camera. Cheap to clone (an `Arc` wrapper is expected at the
/// call site — see [`PipelineController::spawn`]); internal mutable state is
/// behind async-aware locks so the [`crate::supervisor::Supervisor`]'s admin
/// surface (config reload, stop) and the frame-delivery path can both hold a
/// handle concurrently.
pub struct PipelineController {
    camera_id: String,
    config: RwLock<Arc<PipelineConfig>>,
    strategy: Mutex<Box<dyn Strategy>>,
    last_result: Mutex<Option<DetectionResult>>,
    sequence: Mutex<SequenceGuard>,
    state: Mutex<ControllerState>,
    in_flight: AtomicBool,
    registry: Arc<DetectorRegistry>,
    fanout: Arc<Fanout>,
    counters: Arc<CameraCounters>,
    cancel: CancellationToken,
}

impl PipelineController {
    pub fn new(
        camera_id: impl Into<String>,
        config: Arc<PipelineConfig>,
        registry: Arc<DetectorRegistry>,
        fanout: Arc<Fanout>,
    ) -> Arc<Self> {
        let strategy = build_strategy(&config);
        Arc::new(PipelineController {
            camera_id: camera_id.into(),
            config: RwLock::new(config),
            strategy: Mutex::new(strategy),
            last_result: Mutex::new(None),
            sequence: Mutex::new(SequenceGuard::new()),
            state: Mutex::new(ControllerState::Idle),
            in_flight: AtomicBool::new(false),
            registry,
            fanout,
            counters: Arc::new(CameraCounters::new()),
            cancel: CancellationToken::new(),
        })
    }

    pub fn camera_id(&self) -> &str {
        &self.camera_id
    }

    pub fn counters(&self) -> &Arc<CameraCounters> {
        &self.counters
    }

    pub async fn state(&self) -> ControllerState {
        *self.state.lock().await
    }

    pub async fn is_running(&self) -> bool {
        !matches!(*self.state.lock().await, ControllerState::Stopped)
    }

    /// Atomically swaps the effective configuration. The frame already
    /// in-flight (if any) keeps running under the config snapshot it started
    /// with; only the *next* delivered frame observes the new value (§4.4).
    pub async fn reload_config(&self, config: Arc<PipelineConfig>) {
        *self.config.write().await = config;
        info!(camera_id = %self.camera_id, "configuration reloaded");
    }

    /// Cancels any in-flight detector invocations and transitions to the
    /// terminal `Stopped` state. Never leaves the in-flight guard held (§5).
    pub async fn stop(&self) {
        self.cancel.cancel();
        self.set_state(ControllerState::Stopped).await;
        self.in_flight.store(false, Ordering::Release);
        info!(camera_id = %self.camera_id, "controller stopped");
    }

    async fn effective_config(&self) -> Arc<PipelineConfig> {
        self.config.read().await.clone()
    }

    async fn set_state(&self, new: ControllerState) {
        let mut guard = self.state.lock().await;
        if *guard != new {
            debug!(camera_id = %self.camera_id, from = guard.as_str(), to = new.as_str(), "controller state transition");
        }
        *guard = new;
    }

    /// The upstream push interface (§6): delivers one decoded frame. Out-of-
    /// order frames (by `frame_seq`, per camera) are dropped (I1). Frames are
    /// also dropped, uncounted as an error, whenever a pass is already
    /// in-flight (I5) — this is the designated backpressure mechanism (§5).
    pub async fn on_frame(self: &Arc<Self>, frame: Frame) {
        if *self.state.lock().await == ControllerState::Stopped {
            return;
        }

        {
            let mut seq = self.sequence.lock().await;
            if !seq.accept(frame.frame_seq) {
                debug!(camera_id = %self.camera_id, frame_seq = frame.frame_seq, "dropping out-of-order frame");
                return;
            }
        }
        self.counters.frames_delivered.fetch_add(1, Ordering::Relaxed);

        let config = self.effective_config().await;

        if config.mode == StrategyMode::Disabled {
            self.forward_raw(&frame).await;
            return;
        }

        self.set_state(ControllerState::Gating).await;
        let should_detect = {
            let mut strategy = self.strategy.lock().await;
            let last = self.last_result.lock().await;
            strategy.should_detect(&frame, last.as_ref())
        };
        if !should_detect {
            self.set_state(ControllerState::Idle).await;
            self.forward_raw(&frame).await;
            return;
        }

        let entries = self.registry.get_healthy_by_names(&config.detectors).await;
        if entries.is_empty() {
            warn!(camera_id = %self.camera_id, "no healthy detectors configured, forwarding raw frame");
            self.counters.frames_dropped_no_detectors.fetch_add(1, Ordering::Relaxed);
            self.set_state(ControllerState::Idle).await;
            self.forward_raw(&frame).await;
            return;
        }

        if self
            .in_flight
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .is_err()
        {
            debug!(camera_id = %self.camera_id, frame_seq = frame.frame_seq, "dropping frame: pass already in flight");
            self.counters.frames_dropped_inflight.fetch_add(1, Ordering::Relaxed);
            self.set_state(ControllerState::Idle).await;
            return;
        }

        let annotate = self.fanout.has_overlay_subscribers().await;
        let cancel = self.cancel.child_token();
        let controller = Arc::clone(self);
        let camera_span = crate::telemetry::camera_span(&self.camera_id);

        tokio::spawn(
            async move {
                controller.run_pass(frame, entries, config, annotate, cancel).await;
            }
            .instrument(camera_span),
        );
    }

    async fn run_pass(
        self: Arc<Self>,
        frame: Frame,
        entries: Vec<crate::logic::registry::RegistryEntry>,
        config: Arc<PipelineConfig>,
        annotate: bool,
        cancel: CancellationToken,
    ) {
        self.set_state(ControllerState::Running).await;

        let _span = crate::telemetry::pass_span(&self.camera_id, frame.frame_seq).entered();
        let result = Executor::run(&frame, &entries, config.execution_mode, annotate, &cancel).await;
        self.counters.passes_run.fetch_add(1, Ordering::Relaxed);

        {
            let mut strategy = self.strategy.lock().await;
            strategy.on_detection_complete(&result);
        }
        *self.last_result.lock().await = Some(result.clone());

        // Release the guard before broadcasting: a slow fan-out must never
        // hold up the next frame's gating decision.
        self.in_flight.store(false, Ordering::Release);

        self.set_state(ControllerState::Broadcasting).await;
        self.fanout
            .dispatch(&self.camera_id, config.alerts_enabled, result, &self.counters)
            .await;
        self.set_state(ControllerState::Idle).await;
    }

    async fn forward_raw(&self, frame: &Frame) {
        self.fanout.forward_raw(&self.camera_id, frame).await;
    }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::AtomicU32;
    use std::time::Duration;

    use async_trait::async_trait;

    use super::*;
    use crate::config::ExecutionMode;
    use crate::detection::{BoundingBox, Detection, Event};
    use crate::error::PipelineError;
    use crate::interfaces::{EventStore, LiveOverlayProvider, Notifier};
    use crate::logic::registry::{Detector, DetectorKind, RegistryEntry};

    struct AlwaysPersonDetector;

    #[async_trait]
    impl Detector for AlwaysPersonDetector {
        fn name(&self) -> &str {
            "yolo"
        }
        fn kind(&self) -> DetectorKind {
            DetectorKind::Yolo
        }
        fn is_healthy(&self) -> bool {
            true
        }
        async fn detect(&self, frame: &Frame) -> anyhow::Result<DetectionResult> {
            let mut r = DetectionResult::empty(&frame.camera_id, frame.frame_seq, frame.captured_at_ms);
            r.detections.push(Detection {
                class_name: "person".to_string(),
                confidence: 0.9,
                bbox: BoundingBox { x1: 0.0, y1: 0.0, x2: 1.0, y2: 1.0 },
                track_id: None,
                metadata: Default::default(),
            });
            Ok(r)
        }
    }

    struct NullStore {
        saved: std::sync::Mutex<Vec<Event>>,
    }

    #[async_trait]
    impl EventStore for NullStore {
        async fn save_event(&self, event: Event) -> Result<(), PipelineError> {
            self.saved.lock().unwrap().push(event);
            Ok(())
        }
        async fn mark_notification_sent(&self, _camera_id: &str, _event_id: uuid::Uuid) -> Result<(), PipelineError> {
            Ok(())
        }
        async fn list_events(&self, _camera_id: Option<&str>, _since_ms: Option<u64>, _limit: usize) -> Result<Vec<Event>, PipelineError> {
            Ok(self.saved.lock().unwrap().clone())
        }
    }

    struct CountingNotifier {
        calls: AtomicU32,
    }

    #[async_trait]
    impl Notifier for CountingNotifier {
        async fn notify(&self, _event: &Event) -> Result<(), PipelineError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            Ok(())
        }
    }

    struct NullOverlay;

    #[async_trait]
    impl LiveOverlayProvider for NullOverlay {
        async fn update_detections(&self, _camera_id: &str, _detections: &[Detection], _faces: &[crate::detection::FaceDetection]) -> Result<(), PipelineError> {
            Ok(())
        }
        async fn set_annotated_frame(&self, _camera_id: &str, _image_bytes: &[u8]) -> Result<(), PipelineError> {
            Ok(())
        }
        async fn current_frame_seq(&self, _camera_id: &str) -> Option<u64> {
            None
        }
    }

    fn config(mode: StrategyMode) -> Arc<PipelineConfig> {
        Arc::new(PipelineConfig {
            mode,
            execution_mode: ExecutionMode::Sequential,
            detectors: vec!["yolo".to_string()],
            schedule_interval: Duration::from_secs(5),
            motion_sensitivity: 0.1,
            motion_cooldown: Duration::from_secs(1),
            alerts_enabled: true,
        })
    }

    async fn registry_with_yolo() -> Arc<DetectorRegistry> {
        let registry = Arc::new(DetectorRegistry::new());
        registry
            .register(RegistryEntry {
                detector: Arc::new(AlwaysPersonDetector),
                conditional: None,
                track_aware: None,
            })
            .await
            .unwrap();
        registry
    }

    #[tokio::test]
    async fn disabled_mode_forwards_raw_without_detecting() {
        let registry = registry_with_yolo().await;
        let fanout = Arc::new(Fanout::new(
            Arc::new(NullStore { saved: Default::default() }),
            Arc::new(CountingNotifier { calls: AtomicU32::new(0) }),
        ));
        let controller = PipelineController::new("cam-1", config(StrategyMode::Disabled), registry, fanout);
        controller.on_frame(Frame::new("cam-1", 1, 0, 2, 2, vec![0u8; 4])).await;
        assert_eq!(controller.state().await, ControllerState::Idle);
        assert_eq!(controller.counters().frames_delivered.load(Ordering::Relaxed), 1);
    }

    #[tokio::test]
    async fn continuous_mode_runs_a_pass_and_emits_one_event() {
        let registry = registry_with_yolo().await;
        let store = Arc::new(NullStore { saved: Default::default() });
        let fanout = Arc::new(Fanout::new(store, Arc::new(CountingNotifier { calls: AtomicU32::new(0) })));
        fanout.add_overlay(Arc::new(NullOverlay)).await;
        let controller = PipelineController::new("cam-1", config(StrategyMode::Continuous), registry, fanout);
        controller.on_frame(Frame::new("cam-1", 1, 0, 2, 2, vec![0u8; 4])).await;
        // run_pass is spawned; give it a tick to complete.
        tokio::time::sleep(Duration::from_millis(50)).await;
        assert_eq!(controller.counters().passes_run.load(Ordering::Relaxed), 1);
        assert_eq!(controller.counters().events_emitted.load(Ordering::Relaxed), 1);
    }

    #[tokio::test]
    async fn stop_transitions_to_stopped_and_drops_later_frames() {
        let registry = registry_with_yolo().await;
        let fanout = Arc::new(Fanout::new(
            Arc::new(NullStore { saved: Default::default() }),
            Arc::new(CountingNotifier { calls: AtomicU32::new(0) }),
        ));
        let controller = PipelineController::new("cam-1", config(StrategyMode::Continuous), registry, fanout);
        controller.stop().await;
        assert_eq!(controller.state().await, ControllerState::Stopped);
        controller.on_frame(Frame::new("cam-1", 1, 0, 2, 2, vec![0u8; 4])).await;
        assert_eq!(controller.counters().frames_delivered.load(Ordering::Relaxed), 0);
    }

    #[tokio::test]
    async fn out_of_order_frames_are_dropped() {
        let registry = registry_with_yolo().await;
        let fanout = Arc::new(Fanout::new(
            Arc::new(NullStore { saved: Default::default() }),
            Arc::new(CountingNotifier { calls: AtomicU32::new(0) }),
        ));
        let controller = PipelineController::new("cam-1", config(StrategyMode::Disabled), registry, fanout);
        controller.on_frame(Frame::new("cam-1", 5, 0, 2, 2, vec![0u8; 4])).await;
        controller.on_frame(Frame::new("cam-1", 3, 0, 2, 2, vec![0u8; 4])).await;
        assert_eq!(controller.counters().frames_delivered.load(Ordering::Relaxed), 1);
    }
}
