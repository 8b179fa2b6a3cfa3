//! SPDX-License-Identifier: GPL-3.0-or-later
//!
//! Process-wide admin surface: owns one [`PipelineController`] per active
//! camera, keyed by camera id, and the shared [`DetectorRegistry`]/[`Fanout`]
//! every controller is built from. There is no teacher counterpart to this
//! component — the teacher runs one pipeline per process; multiplying it
//! across cameras in a single process is this crate's own addition (see
//! DESIGN.md).

use std::collections::HashMap;
use std::sync::Arc;

use tokio::sync::RwLock;

use crate::config::{ConfigDocument, PipelineConfig};
use crate::detection::Event;
use crate::error::PipelineError;
use crate::fanout::Fanout;
use crate::logic::controller::PipelineController;
use crate::logic::registry::DetectorRegistry;

/// Owns the camera -> controller directory and the configuration document
/// controllers are built from.
pub struct Supervisor {
    registry: Arc<DetectorRegistry>,
    fanout: Arc<Fanout>,
    config: RwLock<ConfigDocument>,
    controllers: RwLock<HashMap<String, Arc<PipelineController>>>,
}

impl Supervisor {
    pub fn new(registry: Arc<DetectorRegistry>, fanout: Arc<Fanout>, config: ConfigDocument) -> Self {
        Supervisor {
            registry,
            fanout,
            config: RwLock::new(config),
            controllers: RwLock::new(HashMap::new()),
        }
    }

    pub fn registry(&self) -> &Arc<DetectorRegistry> {
        &self.registry
    }

    pub fn fanout(&self) -> &Arc<Fanout> {
        &self.fanout
    }

    /// Starts a controller for `camera_id`, or returns the existing one if
    /// already running. The effective config is read once at start; later
    /// config-document updates only reach a running controller via
    /// [`Self::reload_config`].
    pub async fn start(&self, camera_id: &str) -> Arc<PipelineController> {
        if let Some(existing) = self.controllers.read().await.get(camera_id) {
            return Arc::clone(existing);
        }

        let mut guard = self.controllers.write().await;
        if let Some(existing) = guard.get(camera_id) {
            return Arc::clone(existing);
        }

        let effective = self.config.read().await.effective_for(camera_id);
        let controller = PipelineController::new(
            camera_id,
            Arc::new(effective),
            Arc::clone(&self.registry),
            Arc::clone(&self.fanout),
        );
        guard.insert(camera_id.to_string(), Arc::clone(&controller));
        controller
    }

    /// Stops and removes a camera's controller, if running. A no-op if the
    /// camera was never started.
    pub async fn stop(&self, camera_id: &str) {
        let controller = self.controllers.write().await.remove(camera_id);
        if let Some(controller) = controller {
            controller.stop().await;
        }
    }

    pub async fn is_running(&self, camera_id: &str) -> bool {
        match self.controllers.read().await.get(camera_id) {
            Some(controller) => controller.is_running().await,
            None => false,
        }
    }

    pub async fn active_cameras(&self) -> Vec<String> {
        self.controllers.read().await.keys().cloned().collect()
    }

    pub async fn controller(&self, camera_id: &str) -> Option<Arc<PipelineController>> {
        self.controllers.read().await.get(camera_id).cloned()
    }

    /// Replaces the whole configuration document and pushes the new
    /// effective configuration to every controller currently running.
    pub async fn reload_config(&self, new_config: ConfigDocument) {
        let controllers: Vec<(String, Arc<PipelineController>)> = self
            .controllers
            .read()
            .await
            .iter()
            .map(|(id, c)| (id.clone(), Arc::clone(c)))
            .collect();

        for (camera_id, controller) in &controllers {
            let effective = new_config.effective_for(camera_id);
            controller.reload_config(Arc::new(effective)).await;
        }

        *self.config.write().await = new_config;
    }

    /// Current effective config for `camera_id`, whether or not a controller
    /// is running for it.
    pub async fn effective_config(&self, camera_id: &str) -> PipelineConfig {
        self.config.read().await.effective_for(camera_id)
    }

    /// Reads back persisted events for a camera (or all cameras, if `None`)
    /// through the shared event store behind the fan-out.
    pub async fn list_events_for(
        &self,
        camera_id: Option<&str>,
        since_ms: Option<u64>,
        limit: usize,
    ) -> Result<Vec<Event>, PipelineError> {
        self.fanout.list_events(camera_id, since_ms, limit).await
    }

    /// Stops every running controller, e.g. on process shutdown.
    pub async fn stop_all(&self) {
        let mut guard = self.controllers.write().await;
        for (_, controller) in guard.drain() {
            controller.stop().await;
        }
    }
}
