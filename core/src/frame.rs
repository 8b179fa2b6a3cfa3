//! SPDX-License-Identifier: GPL-3.0-or-later
//!
//! Decoded-frame representation. Image bytes are `Arc`-backed so the executor
//! and fan-out can share one frame across several detectors/sinks without
//! copying, mirroring the reference-counted buffer the upstream capture
//! backend already hands off per-frame.

use std::sync::Arc;

use log::debug;
use serde::{Deserialize, Serialize};

/// One captured image, identified by `(camera_id, frame_seq)` (invariant I1:
/// `frame_seq` is strictly increasing per camera and never reused).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Frame {
    pub camera_id: String,
    pub frame_seq: u64,
    pub captured_at_ms: u64,
    pub width: u32,
    pub height: u32,
    #[serde(with = "arc_bytes")]
    pub image_bytes: Arc<[u8]>,
}

impl Frame {
    pub fn new(
        camera_id: impl Into<String>,
        frame_seq: u64,
        captured_at_ms: u64,
        width: u32,
        height: u32,
        image_bytes: impl Into<Arc<[u8]>>,
    ) -> Self {
        Frame {
            camera_id: camera_id.into(),
            frame_seq,
            captured_at_ms,
            width,
            height,
            image_bytes: image_bytes.into(),
        }
    }

    pub fn byte_len(&self) -> usize {
        self.image_bytes.len()
    }
}

/// Tracks the last frame sequence number observed for a camera so the
/// upstream push interface can silently drop out-of-order deliveries.
#[derive(Debug, Default)]
pub struct SequenceGuard {
    last_seen: Option<u64>,
}

impl SequenceGuard {
    pub fn new() -> Self {
        SequenceGuard::default()
    }

    /// Returns `true` if `seq` is strictly greater than the last accepted
    /// sequence number, and records it as the new high-water mark if so.
    pub fn accept(&mut self, seq: u64) -> bool {
        match self.last_seen {
            Some(last) if seq <= last => {
                debug!("dropping out-of-order frame_seq {seq} (last accepted {last})");
                false
            }
            _ => {
                self.last_seen = Some(seq);
                true
            }
        }
    }
}

mod arc_bytes {
    use std::sync::Arc;

    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(bytes: &Arc<[u8]>, ser: S) -> Result<S::Ok, S::Error> {
        serde_bytes::serialize(bytes.as_ref(), ser)
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(de: D) -> Result<Arc<[u8]>, D::Error> {
        let buf: Vec<u8> = serde_bytes::deserialize(de)?;
        Ok(Arc::from(buf))
    }
}
