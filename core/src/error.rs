//! SPDX-License-Identifier: GPL-3.0-or-later
//!
//! Named error kinds for the detection pipeline. Pass-level code (the executor,
//! strategies) logs these as it encounters them; it never returns them as `Err`
//! from a pass, since a single detector failure must never abort a pass. Only
//! `PipelineError::Fatal` escapes a [`crate::logic::controller::PipelineController`]
//! to the [`crate::supervisor::Supervisor`].

use thiserror::Error;

#[derive(Debug, Error)]
pub enum PipelineError {
    #[error("detector '{name}' already registered")]
    AlreadyRegistered { name: String },

    #[error("detector name must not be empty")]
    InvalidName,

    #[error("detector '{name}' not found in registry")]
    NotFound { name: String },

    #[error("detector '{name}' unavailable")]
    DetectorUnavailable { name: String },

    #[error("detector '{name}' call failed: {source}")]
    DetectorCallFailed {
        name: String,
        #[source]
        source: anyhow::Error,
    },

    #[error("detector '{name}' timed out after {elapsed_ms}ms")]
    DetectorCallTimeout { name: String, elapsed_ms: u64 },

    #[error("camera '{camera_id}' has no healthy detectors configured")]
    NoHealthyDetectors { camera_id: String },

    #[error("strategy rejected frame for camera '{camera_id}': {reason}")]
    StrategyRejection { camera_id: String, reason: String },

    #[error("failed to persist event for camera '{camera_id}': {source}")]
    StoreWriteFailed {
        camera_id: String,
        #[source]
        source: anyhow::Error,
    },

    #[error("notifier dispatch failed for camera '{camera_id}': {source}")]
    NotifierFailed {
        camera_id: String,
        #[source]
        source: anyhow::Error,
    },

    #[error("fatal pipeline error for camera '{camera_id}': {source}")]
    Fatal {
        camera_id: String,
        #[source]
        source: anyhow::Error,
    },
}

impl PipelineError {
    /// Whether this error kind is the only one expected to escape a pass rather
    /// than be logged and absorbed into a partial result.
    pub fn is_fatal(&self) -> bool {
        matches!(self, PipelineError::Fatal { .. })
    }
}

pub type Result<T> = std::result::Result<T, PipelineError>;
