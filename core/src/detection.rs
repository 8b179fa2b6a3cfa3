//! SPDX-License-Identifier: GPL-3.0-or-later

use std::collections::HashMap;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// A single labelled region produced by a general-purpose detector (e.g. YOLO).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Detection {
    pub class_name: String,
    pub confidence: f32,
    pub bbox: BoundingBox,
    pub track_id: Option<u64>,
    #[serde(default)]
    pub metadata: HashMap<String, String>,
}

/// Pixel-space bounding box, top-left/bottom-right.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct BoundingBox {
    pub x1: f32,
    pub y1: f32,
    pub x2: f32,
    pub y2: f32,
}

/// A face detection, always associated with a recognition pass even when no
/// identity match was found (`identity` is then `None`).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FaceDetection {
    pub bbox: BoundingBox,
    pub confidence: f32,
    pub similarity: f32,
    pub identity: Option<String>,
    pub age: Option<u8>,
    pub gender: Option<String>,
    pub associated_track_id: Option<u64>,
}

/// Coarse, caller-supplied severity grade attached to a [`DetectionResult`].
/// The pipeline treats this as opaque input; it only compares it against
/// `ThreatLevel::None` when deciding whether to emit an event (invariant I6).
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Default, Serialize, Deserialize)]
pub enum ThreatLevel {
    #[default]
    None,
    Low,
    Elevated,
    High,
    Critical,
}

/// The merged output of one executor pass over one frame. Immutable after
/// construction — callers that need a mutated copy build a new one.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DetectionResult {
    pub camera_id: String,
    pub frame_seq: u64,
    pub timestamp_ms: u64,
    pub detections: Vec<Detection>,
    pub faces: Vec<FaceDetection>,
    #[serde(with = "serde_bytes::option")]
    pub annotated_image: Option<Vec<u8>>,
    pub inference_ms: u64,
    pub threat_level: ThreatLevel,
}

impl DetectionResult {
    pub fn empty(camera_id: impl Into<String>, frame_seq: u64, timestamp_ms: u64) -> Self {
        DetectionResult {
            camera_id: camera_id.into(),
            frame_seq,
            timestamp_ms,
            detections: Vec::new(),
            faces: Vec::new(),
            annotated_image: None,
            inference_ms: 0,
            threat_level: ThreatLevel::None,
        }
    }

    pub fn is_empty(&self) -> bool {
        self.detections.is_empty() && self.faces.is_empty()
    }

    pub fn inference_duration(&self) -> Duration {
        Duration::from_millis(self.inference_ms)
    }

    /// Invariant I6: whether this result, combined with the camera's
    /// `alerts_enabled` flag, warrants an [`Event`].
    pub fn warrants_event(&self, alerts_enabled: bool) -> bool {
        alerts_enabled && (!self.is_empty() || self.threat_level > ThreatLevel::None)
    }
}

/// A persisted record of a frame worth remembering. Never mutated after
/// `notification_sent` is set true.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Event {
    pub id: Uuid,
    pub result: DetectionResult,
    pub stored_frame_path: String,
    pub threat_level: ThreatLevel,
    pub notification_sent: bool,
}

impl Event {
    pub fn new(result: DetectionResult, stored_frame_path: impl Into<String>) -> Self {
        let threat_level = result.threat_level;
        Event {
            id: Uuid::new_v4(),
            result,
            stored_frame_path: stored_frame_path.into(),
            threat_level,
            notification_sent: false,
        }
    }

    pub fn camera_id(&self) -> &str {
        &self.result.camera_id
    }
}
