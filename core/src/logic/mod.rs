//! SPDX-License-Identifier: GPL-3.0-or-later

pub mod controller;
pub mod executor;
pub mod registry;
pub mod strategy;

pub use controller::{ControllerState, PipelineController};
pub use executor::Executor;
pub use registry::{Detector, DetectorKind, DetectorRegistry};
pub use strategy::Strategy;
