//! SPDX-License-Identifier: GPL-3.0-or-later
//!
//! Per-frame gating policies. One strategy instance is owned exclusively by
//! its controller; strategies may be stateful (last-run timestamp, a motion
//! reference frame) but are never shared across cameras.

use std::time::Duration;

use log::debug;

use crate::config::PipelineConfig;
use crate::detection::DetectionResult;
use crate::frame::Frame;

/// Decides, for each delivered frame, whether the executor should run.
pub trait Strategy: Send {
    fn name(&self) -> &'static str;
    fn should_detect(&mut self, frame: &Frame, last_result: Option<&DetectionResult>) -> bool;
    fn on_detection_complete(&mut self, result: &DetectionResult);
    fn reset(&mut self);
}

pub struct DisabledStrategy;

impl Strategy for DisabledStrategy {
    fn name(&self) -> &'static str {
        "disabled"
    }
    fn should_detect(&mut self, _frame: &Frame, _last_result: Option<&DetectionResult>) -> bool {
        false
    }
    fn on_detection_complete(&mut self, _result: &DetectionResult) {}
    fn reset(&mut self) {}
}

pub struct ContinuousStrategy;

impl Strategy for ContinuousStrategy {
    fn name(&self) -> &'static str {
        "continuous"
    }
    fn should_detect(&mut self, _frame: &Frame, _last_result: Option<&DetectionResult>) -> bool {
        true
    }
    fn on_detection_complete(&mut self, _result: &DetectionResult) {}
    fn reset(&mut self) {}
}

/// Detects frame-to-frame luminance change against a decaying reference
/// frame. Gated additionally by `motion_cooldown` so a sustained motion
/// event doesn't re-trigger every frame.
pub struct MotionTriggeredStrategy {
    sensitivity: f32,
    cooldown: Duration,
    last_completed_ms: Option<u64>,
    reference_luma: Option<f32>,
    last_evaluated: Option<(u64, bool)>,
}

impl MotionTriggeredStrategy {
    pub fn new(sensitivity: f32, cooldown: Duration) -> Self {
        MotionTriggeredStrategy {
            sensitivity,
            cooldown,
            last_completed_ms: None,
            reference_luma: None,
            last_evaluated: None,
        }
    }

    pub fn from_config(config: &PipelineConfig) -> Self {
        Self::new(config.motion_sensitivity, config.motion_cooldown)
    }

    fn mean_luma(bytes: &[u8]) -> f32 {
        if bytes.is_empty() {
            return 0.0;
        }
        bytes.iter().map(|&b| b as u64).sum::<u64>() as f32 / bytes.len() as f32
    }

    /// Whether motion is detected in `frame`, independent of cooldown. The
    /// decaying reference frame only advances once per distinct `frame_seq`
    /// so re-evaluating the same frame twice (no intervening completion) is
    /// idempotent.
    fn motion_present(&mut self, frame: &Frame) -> bool {
        if let Some((seq, moved)) = self.last_evaluated {
            if seq == frame.frame_seq {
                return moved;
            }
        }
        let luma = Self::mean_luma(&frame.image_bytes);
        let moved = match self.reference_luma {
            Some(reference) => ((luma - reference).abs() / 255.0) >= self.sensitivity,
            None => false,
        };
        if moved {
            debug!(
                "motion detected for frame_seq {} (luma delta against reference)",
                frame.frame_seq
            );
        }
        // Decaying blend toward the new frame, regardless of whether motion fired.
        self.reference_luma = Some(match self.reference_luma {
            Some(reference) => reference * 0.8 + luma * 0.2,
            None => luma,
        });
        self.last_evaluated = Some((frame.frame_seq, moved));
        moved
    }

    fn cooldown_elapsed(&self, now_ms: u64) -> bool {
        match self.last_completed_ms {
            Some(last) => now_ms.saturating_sub(last) >= self.cooldown.as_millis() as u64,
            None => true,
        }
    }
}

impl Strategy for MotionTriggeredStrategy {
    fn name(&self) -> &'static str {
        "motion_triggered"
    }

    fn should_detect(&mut self, frame: &Frame, _last_result: Option<&DetectionResult>) -> bool {
        let moved = self.motion_present(frame);
        moved && self.cooldown_elapsed(frame.captured_at_ms)
    }

    fn on_detection_complete(&mut self, result: &DetectionResult) {
        self.last_completed_ms = Some(result.timestamp_ms);
    }

    fn reset(&mut self) {
        self.last_completed_ms = None;
        self.reference_luma = None;
        self.last_evaluated = None;
    }
}

/// Fires whenever at least `interval` has elapsed since the last completed
/// pass, measured against the result's own timestamp rather than wall clock
/// so schedules stay reproducible under replay.
pub struct ScheduledStrategy {
    interval: Duration,
    last_completed_ms: Option<u64>,
}

impl ScheduledStrategy {
    pub fn new(interval: Duration) -> Self {
        ScheduledStrategy {
            interval,
            last_completed_ms: None,
        }
    }

    pub fn from_config(config: &PipelineConfig) -> Self {
        Self::new(config.schedule_interval)
    }
}

impl Strategy for ScheduledStrategy {
    fn name(&self) -> &'static str {
        "scheduled"
    }

    fn should_detect(&mut self, frame: &Frame, _last_result: Option<&DetectionResult>) -> bool {
        match self.last_completed_ms {
            Some(last) => {
                frame.captured_at_ms.saturating_sub(last) >= self.interval.as_millis() as u64
            }
            None => true,
        }
    }

    fn on_detection_complete(&mut self, result: &DetectionResult) {
        self.last_completed_ms = Some(result.timestamp_ms);
    }

    fn reset(&mut self) {
        self.last_completed_ms = None;
    }
}

/// Logical OR of motion-triggered and scheduled, sharing cooldown state
/// across both causes so neither re-triggers a pass that just ran for the
/// other reason.
pub struct HybridStrategy {
    motion: MotionTriggeredStrategy,
    scheduled: ScheduledStrategy,
}

impl HybridStrategy {
    pub fn new(motion: MotionTriggeredStrategy, scheduled: ScheduledStrategy) -> Self {
        HybridStrategy { motion, scheduled }
    }

    pub fn from_config(config: &PipelineConfig) -> Self {
        Self::new(
            MotionTriggeredStrategy::from_config(config),
            ScheduledStrategy::from_config(config),
        )
    }
}

impl Strategy for HybridStrategy {
    fn name(&self) -> &'static str {
        "hybrid"
    }

    fn should_detect(&mut self, frame: &Frame, last_result: Option<&DetectionResult>) -> bool {
        let motion_fires = self.motion.should_detect(frame, last_result);
        let scheduled_fires = self.scheduled.should_detect(frame, last_result);
        motion_fires || scheduled_fires
    }

    fn on_detection_complete(&mut self, result: &DetectionResult) {
        self.motion.on_detection_complete(result);
        self.scheduled.on_detection_complete(result);
    }

    fn reset(&mut self) {
        self.motion.reset();
        self.scheduled.reset();
    }
}

/// Builds the configured strategy for a given effective [`PipelineConfig`].
pub fn build_strategy(config: &PipelineConfig) -> Box<dyn Strategy> {
    use crate::config::StrategyMode;
    match config.mode {
        StrategyMode::Disabled => Box::new(DisabledStrategy),
        StrategyMode::Continuous => Box::new(ContinuousStrategy),
        StrategyMode::MotionTriggered => Box::new(MotionTriggeredStrategy::from_config(config)),
        StrategyMode::Scheduled => Box::new(ScheduledStrategy::from_config(config)),
        StrategyMode::Hybrid => Box::new(HybridStrategy::from_config(config)),
    }
}
