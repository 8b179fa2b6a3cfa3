//! SPDX-License-Identifier: GPL-3.0-or-later
//!
//! Runs an ordered chain of detectors over one frame and merges their
//! partial results into a single [`DetectionResult`] (I3, I4). Generalizes
//! the teacher's single linear `Pipeline::run` dispatch — one stage at a
//! time, looked up by `StageType` — into a heterogeneous chain with
//! conditional gating and an optional parallel mode.

use futures::future::join_all;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use crate::config::ExecutionMode;
use crate::detection::DetectionResult;
use crate::error::PipelineError;
use crate::frame::Frame;
use crate::logic::registry::RegistryEntry;

/// Stateless: a pure function of (frame, detectors, mode, annotate flag).
pub struct Executor;

impl Executor {
    /// Runs `entries`, in the configured `mode`, over `frame`. Never returns
    /// `Err`: a single detector failure degrades the pass (§7), it never
    /// aborts it. `cancel` is checked between detectors in sequential mode and
    /// before launching the batch in parallel mode (§5 cancellation).
    ///
    /// Sequential mode races each call against its own configured timeout.
    /// Parallel mode races the whole batch against one shared
    /// `max(detector_timeouts)` ceiling (§4.3).
    pub async fn run(
        frame: &Frame,
        entries: &[RegistryEntry],
        mode: ExecutionMode,
        annotate: bool,
        cancel: &CancellationToken,
    ) -> DetectionResult {
        match mode {
            ExecutionMode::Sequential => Self::run_sequential(frame, entries, annotate, cancel).await,
            ExecutionMode::Parallel => Self::run_parallel(frame, entries, annotate, cancel).await,
        }
    }

    async fn run_sequential(
        frame: &Frame,
        entries: &[RegistryEntry],
        annotate: bool,
        cancel: &CancellationToken,
    ) -> DetectionResult {
        let mut acc = empty_result(frame);

        for entry in entries {
            if cancel.is_cancelled() {
                debug!(camera_id = %frame.camera_id, "pass cancelled, stopping sequential chain");
                break;
            }

            let name = entry.detector.name();
            if let Some(conditional) = &entry.conditional {
                if !conditional.should_run(&acc) {
                    debug!(detector = name, "conditional skip: trigger classes absent from R");
                    continue;
                }
            }

            match Self::invoke_sequential(entry, frame, &acc, annotate).await {
                Ok(sub) => merge(&mut acc, sub, Merge::Sum),
                Err(err) => warn!(detector = name, error = %err, "detector call failed, pass continues"),
            }
        }

        acc
    }

    /// One sequential invocation. When the detector is [`TrackAware`](crate::logic::registry::TrackAware)
    /// and earlier detectors in this pass already produced `person` boxes,
    /// hints them in via `detect_with_tracking` (§4.3 face/track hinting);
    /// otherwise falls back to the plain `detect`/`detect_annotated` call.
    async fn invoke_sequential(
        entry: &RegistryEntry,
        frame: &Frame,
        acc: &DetectionResult,
        annotate: bool,
    ) -> Result<DetectionResult, PipelineError> {
        let name = entry.detector.name().to_string();
        let timeout = entry.detector.timeout();

        if let Some(track_aware) = &entry.track_aware {
            let persons: Vec<&crate::detection::Detection> = acc
                .detections
                .iter()
                .filter(|d| d.class_name == "person")
                .collect();
            let bboxes: Vec<[f32; 4]> = persons
                .iter()
                .map(|d| [d.bbox.x1, d.bbox.y1, d.bbox.x2, d.bbox.y2])
                .collect();
            let track_ids: Vec<u64> = persons.iter().filter_map(|d| d.track_id).collect();
            let call = track_aware.detect_with_tracking(frame, &bboxes, &track_ids);
            return timed(&name, timeout, call).await;
        }

        let call = invoke_plain(entry, frame, annotate);
        timed(&name, timeout, call).await
    }

    async fn run_parallel(
        frame: &Frame,
        entries: &[RegistryEntry],
        annotate: bool,
        cancel: &CancellationToken,
    ) -> DetectionResult {
        let mut acc = empty_result(frame);
        if cancel.is_cancelled() {
            debug!(camera_id = %frame.camera_id, "pass cancelled before parallel launch");
            return acc;
        }
        if entries.is_empty() {
            return acc;
        }

        // Conditional detectors degrade to unconditional in parallel mode
        // (§4.3, §9): their dependency cannot be satisfied pre-hoc since
        // nothing has run yet when the whole batch is launched at once.
        // Track-aware hinting likewise does not apply for the same reason.
        //
        // The whole batch shares a single timeout, max(detector_timeouts)
        // (§4.3), rather than each call racing its own configured timeout —
        // a detector configured with a short timeout is not cut off early
        // just because it happens to be slower than usual; the shared
        // ceiling is set by the slowest detector in the batch.
        let batch_timeout = entries
            .iter()
            .map(|e| e.detector.timeout())
            .max()
            .unwrap_or_else(|| std::time::Duration::from_secs(5));

        let calls = entries.iter().map(|entry| {
            let name = entry.detector.name().to_string();
            let call = invoke_plain(entry, frame, annotate);
            async move { (name, call.await) }
        });

        match tokio::time::timeout(batch_timeout, join_all(calls)).await {
            Ok(outcomes) => {
                for (name, outcome) in outcomes {
                    match outcome {
                        Ok(sub) => merge(&mut acc, sub, Merge::Max),
                        Err(err) => warn!(detector = %name, error = %err, "detector call failed, pass continues"),
                    }
                }
            }
            Err(_) => {
                warn!(
                    camera_id = %frame.camera_id,
                    elapsed_ms = batch_timeout.as_millis() as u64,
                    "parallel batch exceeded the shared max(detector_timeouts) ceiling, all detectors treated as timed out"
                );
            }
        }

        acc
    }
}

fn empty_result(frame: &Frame) -> DetectionResult {
    DetectionResult::empty(&frame.camera_id, frame.frame_seq, frame.captured_at_ms)
}

fn invoke_plain<'a>(
    entry: &'a RegistryEntry,
    frame: &'a Frame,
    annotate: bool,
) -> impl std::future::Future<Output = anyhow::Result<DetectionResult>> + 'a {
    async move {
        if annotate && entry.detector.supports_annotation() {
            entry.detector.detect_annotated(frame).await
        } else {
            entry.detector.detect(frame).await
        }
    }
}

async fn timed(
    name: &str,
    timeout: std::time::Duration,
    call: impl std::future::Future<Output = anyhow::Result<DetectionResult>>,
) -> Result<DetectionResult, PipelineError> {
    match tokio::time::timeout(timeout, call).await {
        Ok(Ok(result)) => Ok(result),
        Ok(Err(source)) => Err(PipelineError::DetectorCallFailed {
            name: name.to_string(),
            source,
        }),
        Err(_) => Err(PipelineError::DetectorCallTimeout {
            name: name.to_string(),
            elapsed_ms: timeout.as_millis() as u64,
        }),
    }
}

enum Merge {
    Sum,
    Max,
}

/// Applies the §4.3 merge rules: union detections/faces, combine
/// `inference_ms` per `mode`, last annotated bytes win, threat level takes
/// the max observed so far.
fn merge(acc: &mut DetectionResult, sub: DetectionResult, mode: Merge) {
    acc.detections.extend(sub.detections);
    acc.faces.extend(sub.faces);
    acc.inference_ms = match mode {
        Merge::Sum => acc.inference_ms + sub.inference_ms,
        Merge::Max => acc.inference_ms.max(sub.inference_ms),
    };
    if sub.annotated_image.is_some() {
        acc.annotated_image = sub.annotated_image;
    }
    if sub.threat_level > acc.threat_level {
        acc.threat_level = sub.threat_level;
    }
}
