//! SPDX-License-Identifier: GPL-3.0-or-later
//!
//! External collaborator interfaces. This crate ships no concrete store,
//! notifier, overlay transport, or network client — only the typed traits the
//! [`crate::fanout::Fanout`] and [`crate::logic::registry::DetectorRegistry`]
//! call through. Callers wire in their own HTTP/database/transport code.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::detection::{Detection, Event, FaceDetection};
use crate::error::PipelineError;

/// Persists events and tracks their notification status. Out of scope:
/// the relational schema/engine behind an implementation.
#[async_trait]
pub trait EventStore: Send + Sync {
    async fn save_event(&self, event: Event) -> Result<(), PipelineError>;
    async fn mark_notification_sent(
        &self,
        camera_id: &str,
        event_id: uuid::Uuid,
    ) -> Result<(), PipelineError>;
    async fn list_events(
        &self,
        camera_id: Option<&str>,
        since_ms: Option<u64>,
        limit: usize,
    ) -> Result<Vec<Event>, PipelineError>;
}

/// Dispatches a notification for a persisted event. Out of scope: the actual
/// push/Telegram/email transport.
#[async_trait]
pub trait Notifier: Send + Sync {
    async fn notify(&self, event: &Event) -> Result<(), PipelineError>;
}

/// A live-view sink (MJPEG, WebSocket hub, WebCodecs bridge, ...). A
/// composite implementation may fan this out to several concrete transports;
/// the fan-out logic here tolerates any single sink failing.
#[async_trait]
pub trait LiveOverlayProvider: Send + Sync {
    async fn update_detections(
        &self,
        camera_id: &str,
        detections: &[Detection],
        faces: &[FaceDetection],
    ) -> Result<(), PipelineError>;

    async fn set_annotated_frame(
        &self,
        camera_id: &str,
        image_bytes: &[u8],
    ) -> Result<(), PipelineError>;

    async fn current_frame_seq(&self, camera_id: &str) -> Option<u64>;
}

/// One labelled box as reported by a remote detection service, before it is
/// adapted into this crate's [`Detection`] type.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RemoteDetection {
    pub class: String,
    pub confidence: f32,
    pub bbox: [f32; 4],
    pub class_id: Option<u32>,
    pub track_id: Option<u64>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct YoloResponse {
    pub detections: Vec<RemoteDetection>,
    pub inference_ms: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct YoloAnnotatedResponse {
    pub detections: Vec<RemoteDetection>,
    #[serde(with = "serde_bytes")]
    pub annotated_bytes: Vec<u8>,
    pub inference_ms: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RemoteFace {
    pub bbox: [f32; 4],
    pub confidence: f32,
    pub similarity: f32,
    pub identity: Option<String>,
    pub age: Option<u8>,
    pub gender: Option<String>,
    pub associated_track_id: Option<u64>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FaceResponse {
    pub recognitions: Vec<RemoteFace>,
    pub inference_ms: u64,
}

/// Typed remote client for the YOLO object-detection service.
#[async_trait]
pub trait YoloClient: Send + Sync {
    async fn detect(&self, image_bytes: &[u8], conf_threshold: f32) -> anyhow::Result<YoloResponse>;
    async fn detect_annotated(
        &self,
        image_bytes: &[u8],
        conf_threshold: f32,
    ) -> anyhow::Result<YoloAnnotatedResponse>;
}

/// Typed remote client for the face-recognition service.
#[async_trait]
pub trait FaceClient: Send + Sync {
    async fn recognize(&self, image_bytes: &[u8]) -> anyhow::Result<FaceResponse>;
    async fn recognize_with_tracking(
        &self,
        image_bytes: &[u8],
        person_bboxes: &[[f32; 4]],
        track_ids: &[u64],
    ) -> anyhow::Result<FaceResponse>;
    async fn recognize_annotated(
        &self,
        image_bytes: &[u8],
    ) -> anyhow::Result<(FaceResponse, Vec<u8>)>;
}

/// Classes that gate the (reserved) plate detector as a [`Conditional`](crate::logic::registry::Conditional)
/// detector (§6): it only runs when one of these already appears in the
/// accumulated result of earlier detectors in the same pass.
pub const PLATE_TRIGGER_CLASSES: &[&str] = &["car", "truck", "bus", "motorcycle"];

/// Typed remote client for the (reserved) plate-recognition service. Same
/// shape as [`YoloClient`]: placeholder, no concrete transport ships here.
#[async_trait]
pub trait PlateClient: Send + Sync {
    async fn detect(&self, image_bytes: &[u8]) -> anyhow::Result<YoloResponse>;
    async fn detect_annotated(&self, image_bytes: &[u8]) -> anyhow::Result<YoloAnnotatedResponse>;
}

impl From<&RemoteDetection> for Detection {
    fn from(r: &RemoteDetection) -> Self {
        Detection {
            class_name: r.class.clone(),
            confidence: r.confidence,
            bbox: crate::detection::BoundingBox {
                x1: r.bbox[0],
                y1: r.bbox[1],
                x2: r.bbox[2],
                y2: r.bbox[3],
            },
            track_id: r.track_id,
            metadata: r
                .class_id
                .map(|id| [("class_id".to_string(), id.to_string())].into_iter().collect())
                .unwrap_or_default(),
        }
    }
}

impl From<&RemoteFace> for FaceDetection {
    fn from(r: &RemoteFace) -> Self {
        FaceDetection {
            bbox: crate::detection::BoundingBox {
                x1: r.bbox[0],
                y1: r.bbox[1],
                x2: r.bbox[2],
                y2: r.bbox[3],
            },
            confidence: r.confidence,
            similarity: r.similarity,
            identity: r.identity.clone(),
            age: r.age,
            gender: r.gender.clone(),
            associated_track_id: r.associated_track_id,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    /// The real YOLO/face services speak JSON over HTTP (§6); a typed client
    /// implementation round-trips these response shapes through `serde_json`
    /// before adapting them into this crate's own `Detection`/`FaceDetection`.
    #[test]
    fn yolo_response_round_trips_through_json() {
        let response = YoloResponse {
            detections: vec![RemoteDetection {
                class: "person".to_string(),
                confidence: 0.93,
                bbox: [1.0, 2.0, 3.0, 4.0],
                class_id: Some(0),
                track_id: Some(7),
            }],
            inference_ms: 42,
        };
        let json = serde_json::to_string(&response).unwrap();
        let decoded: YoloResponse = serde_json::from_str(&json).unwrap();
        assert_eq!(decoded.inference_ms, 42);
        assert_eq!(decoded.detections[0].class, "person");

        let detection: Detection = (&decoded.detections[0]).into();
        assert_eq!(detection.class_name, "person");
        assert_eq!(detection.track_id, Some(7));
    }

    #[test]
    fn plate_trigger_classes_match_the_reserved_interface() {
        assert_eq!(PLATE_TRIGGER_CLASSES, &["car", "truck", "bus", "motorcycle"]);
    }
}
