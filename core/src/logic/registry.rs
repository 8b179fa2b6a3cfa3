//! SPDX-License-Identifier: GPL-3.0-or-later
//!
//! The detector registry: a name-indexed, concurrently-readable directory of
//! detector instances. Generalizes the teacher's `PipelineStage` trait (a
//! single `name`/`kind`/`handle` per stage) into a heterogeneous set of
//! detectors that may additionally be `Conditional` and/or `TrackAware`.

use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use tokio::sync::RwLock;

use crate::detection::DetectionResult;
use crate::error::PipelineError;
use crate::frame::Frame;

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum DetectorKind {
    Yolo,
    Face,
    Plate,
    Custom(String),
}

impl fmt::Display for DetectorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            DetectorKind::Yolo => write!(f, "yolo"),
            DetectorKind::Face => write!(f, "face"),
            DetectorKind::Plate => write!(f, "plate"),
            DetectorKind::Custom(name) => write!(f, "{name}"),
        }
    }
}

/// The base capability every registry entry provides.
#[async_trait]
pub trait Detector: Send + Sync {
    fn name(&self) -> &str;
    fn kind(&self) -> DetectorKind;
    fn is_healthy(&self) -> bool;
    fn supports_annotation(&self) -> bool {
        false
    }
    /// Per-call timeout applied by the executor around every invocation.
    fn timeout(&self) -> Duration {
        Duration::from_secs(5)
    }

    async fn detect(&self, frame: &Frame) -> anyhow::Result<DetectionResult>;

    async fn detect_annotated(&self, frame: &Frame) -> anyhow::Result<DetectionResult> {
        self.detect(frame).await
    }

    async fn close(&self) -> anyhow::Result<()> {
        Ok(())
    }

    /// Enables capability-check access to the optional `Conditional`/`TrackAware`
    /// traits without a runtime `dyn Any` probe on every pass; detectors that
    /// implement either override the matching accessor.
    fn as_conditional(self: Arc<Self>) -> Option<Arc<dyn Conditional>>
    where
        Self: Sized,
    {
        None
    }

    fn as_track_aware(self: Arc<Self>) -> Option<Arc<dyn TrackAware>>
    where
        Self: Sized,
    {
        None
    }
}

/// A detector whose invocation depends on classes already present in the
/// accumulated result of earlier detectors in the same pass (I4).
pub trait Conditional: Detector {
    fn trigger_classes(&self) -> &[&str];

    fn should_run(&self, prior: &DetectionResult) -> bool {
        prior
            .detections
            .iter()
            .any(|d| self.trigger_classes().contains(&d.class_name.as_str()))
    }
}

/// A detector that can accept person bounding boxes and track ids hinted
/// from an earlier detector in the same pass (the yolo-then-face hand-off).
#[async_trait]
pub trait TrackAware: Detector {
    async fn detect_with_tracking(
        &self,
        frame: &Frame,
        person_bboxes: &[[f32; 4]],
        track_ids: &[u64],
    ) -> anyhow::Result<DetectionResult>;
}

/// A registered detector plus the capability handles resolved once at
/// registration time.
#[derive(Clone)]
pub struct RegistryEntry {
    pub detector: Arc<dyn Detector>,
    pub conditional: Option<Arc<dyn Conditional>>,
    pub track_aware: Option<Arc<dyn TrackAware>>,
}

/// Concurrent name -> detector map. Many-reader / single-writer discipline:
/// reads use a shared lock, registration/removal an exclusive one.
#[derive(Default)]
pub struct DetectorRegistry {
    entries: RwLock<HashMap<String, RegistryEntry>>,
}

impl DetectorRegistry {
    pub fn new() -> Self {
        DetectorRegistry::default()
    }

    pub async fn register(&self, entry: RegistryEntry) -> Result<(), PipelineError> {
        let name = entry.detector.name().to_string();
        if name.is_empty() {
            return Err(PipelineError::InvalidName);
        }
        let mut guard = self.entries.write().await;
        if guard.contains_key(&name) {
            return Err(PipelineError::AlreadyRegistered { name });
        }
        guard.insert(name, entry);
        Ok(())
    }

    pub async fn unregister(&self, name: &str) -> Result<(), PipelineError> {
        let mut guard = self.entries.write().await;
        guard
            .remove(name)
            .map(|_| ())
            .ok_or_else(|| PipelineError::NotFound {
                name: name.to_string(),
            })
    }

    pub async fn get(&self, name: &str) -> Option<RegistryEntry> {
        self.entries.read().await.get(name).cloned()
    }

    pub async fn names(&self) -> Vec<String> {
        self.entries.read().await.keys().cloned().collect()
    }

    pub async fn get_all(&self) -> Vec<RegistryEntry> {
        self.entries.read().await.values().cloned().collect()
    }

    pub async fn get_healthy(&self) -> Vec<RegistryEntry> {
        self.entries
            .read()
            .await
            .values()
            .filter(|e| e.detector.is_healthy())
            .cloned()
            .collect()
    }

    /// Resolves `names` in the given order, dropping unknown names silently
    /// and preserving caller order otherwise.
    pub async fn get_by_names(&self, names: &[String]) -> Vec<RegistryEntry> {
        let guard = self.entries.read().await;
        names.iter().filter_map(|n| guard.get(n).cloned()).collect()
    }

    /// As [`Self::get_by_names`], additionally filtering out unhealthy
    /// detectors.
    pub async fn get_healthy_by_names(&self, names: &[String]) -> Vec<RegistryEntry> {
        let guard = self.entries.read().await;
        names
            .iter()
            .filter_map(|n| guard.get(n))
            .filter(|e| e.detector.is_healthy())
            .cloned()
            .collect()
    }

    /// Closes every registered detector, returning the first error
    /// encountered (if any) after attempting to close all of them.
    pub async fn close(&self) -> anyhow::Result<()> {
        let guard = self.entries.read().await;
        let mut first_err = None;
        for entry in guard.values() {
            if let Err(e) = entry.detector.close().await {
                if first_err.is_none() {
                    first_err = Some(e);
                }
            }
        }
        match first_err {
            Some(e) => Err(e),
            None => Ok(()),
        }
    }
}
