//! SPDX-License-Identifier: GPL-3.0-or-later

pub mod config;
pub mod detection;
pub mod error;
pub mod fanout;
pub mod frame;
pub mod interfaces;
pub mod logic;
pub mod supervisor;
pub mod telemetry;

pub use config::{CameraConfig, ExecutionMode, PipelineConfig, StrategyMode};
pub use detection::{Detection, DetectionResult, Event, FaceDetection, ThreatLevel};
pub use error::PipelineError;
pub use frame::Frame;
pub use supervisor::Supervisor;
