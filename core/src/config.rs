//! SPDX-License-Identifier: GPL-3.0-or-later
//!
//! Pipeline configuration: a global [`PipelineConfig`] overlaid per-camera by
//! [`CameraConfig`]. Loaded from TOML via `serde`, matching the teacher's own
//! `[[cameras]]`-style manifests (see `camera_hub`'s `CameraConfig`).

use std::collections::HashMap;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::PipelineError;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StrategyMode {
    Disabled,
    Continuous,
    MotionTriggered,
    Scheduled,
    Hybrid,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ExecutionMode {
    Sequential,
    Parallel,
}

/// The full set of recognised pipeline options. Any field left unset on a
/// [`CameraConfig`] inherits the matching field here.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PipelineConfig {
    pub mode: StrategyMode,
    pub execution_mode: ExecutionMode,
    pub detectors: Vec<String>,
    #[serde(with = "duration_literal")]
    pub schedule_interval: Duration,
    pub motion_sensitivity: f32,
    #[serde(with = "duration_literal")]
    pub motion_cooldown: Duration,
    pub alerts_enabled: bool,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        PipelineConfig {
            mode: StrategyMode::Disabled,
            execution_mode: ExecutionMode::Sequential,
            detectors: Vec::new(),
            schedule_interval: Duration::from_secs(30),
            motion_sensitivity: 0.1,
            motion_cooldown: Duration::from_secs(5),
            alerts_enabled: true,
        }
    }
}

/// A sparse per-camera override of [`PipelineConfig`]; `None` fields inherit
/// the global value.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct CameraConfig {
    pub mode: Option<StrategyMode>,
    pub execution_mode: Option<ExecutionMode>,
    pub detectors: Option<Vec<String>>,
    #[serde(default, with = "duration_literal::option")]
    pub schedule_interval: Option<Duration>,
    pub motion_sensitivity: Option<f32>,
    #[serde(default, with = "duration_literal::option")]
    pub motion_cooldown: Option<Duration>,
    pub alerts_enabled: Option<bool>,
}

impl CameraConfig {
    /// Merges this override onto a global baseline, producing the effective
    /// configuration a [`crate::logic::controller::PipelineController`] runs with.
    pub fn effective(&self, global: &PipelineConfig) -> PipelineConfig {
        PipelineConfig {
            mode: self.mode.unwrap_or(global.mode),
            execution_mode: self.execution_mode.unwrap_or(global.execution_mode),
            detectors: self.detectors.clone().unwrap_or_else(|| global.detectors.clone()),
            schedule_interval: self.schedule_interval.unwrap_or(global.schedule_interval),
            motion_sensitivity: self.motion_sensitivity.unwrap_or(global.motion_sensitivity),
            motion_cooldown: self.motion_cooldown.unwrap_or(global.motion_cooldown),
            alerts_enabled: self.alerts_enabled.unwrap_or(global.alerts_enabled),
        }
    }
}

/// Top-level document: a `[global]` table plus zero or more `[cameras.<id>]`
/// override tables.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ConfigDocument {
    pub global: PipelineConfig,
    #[serde(default)]
    pub cameras: HashMap<String, CameraConfig>,
}

impl ConfigDocument {
    pub fn from_toml_str(s: &str) -> Result<Self, PipelineError> {
        toml::from_str(s).map_err(|e| PipelineError::Fatal {
            camera_id: "<config>".to_string(),
            source: anyhow::Error::new(e),
        })
    }

    pub fn effective_for(&self, camera_id: &str) -> PipelineConfig {
        match self.cameras.get(camera_id) {
            Some(over) => over.effective(&self.global),
            None => self.global.clone(),
        }
    }
}

/// Parses and serializes the `5s` / `10s` / `1m` duration literals the spec
/// requires for `schedule_interval`/`motion_cooldown`, without pulling in a
/// separate duration-parsing crate.
mod duration_literal {
    use std::time::Duration;

    use serde::{Deserialize, Deserializer, Serializer};

    pub fn parse(literal: &str) -> Result<Duration, String> {
        let literal = literal.trim();
        let (digits, suffix) = literal.split_at(
            literal
                .find(|c: char| !c.is_ascii_digit())
                .unwrap_or(literal.len()),
        );
        let value: u64 = digits
            .parse()
            .map_err(|_| format!("invalid duration literal: '{literal}'"))?;
        let secs = match suffix {
            "s" | "" => value,
            "m" => value * 60,
            "h" => value * 3600,
            other => return Err(format!("unknown duration suffix '{other}' in '{literal}'")),
        };
        Ok(Duration::from_secs(secs))
    }

    pub fn format(d: &Duration) -> String {
        format!("{}s", d.as_secs())
    }

    pub fn serialize<S: Serializer>(d: &Duration, ser: S) -> Result<S::Ok, S::Error> {
        ser.serialize_str(&format(d))
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(de: D) -> Result<Duration, D::Error> {
        let s = String::deserialize(de)?;
        parse(&s).map_err(serde::de::Error::custom)
    }

    pub mod option {
        use std::time::Duration;

        use serde::{Deserialize, Deserializer, Serializer};

        pub fn serialize<S: Serializer>(
            d: &Option<Duration>,
            ser: S,
        ) -> Result<S::Ok, S::Error> {
            match d {
                Some(d) => ser.serialize_some(&super::format(d)),
                None => ser.serialize_none(),
            }
        }

        pub fn deserialize<'de, D: Deserializer<'de>>(
            de: D,
        ) -> Result<Option<Duration>, D::Error> {
            let raw: Option<String> = Option::deserialize(de)?;
            match raw {
                Some(s) => super::parse(&s).map(Some).map_err(serde::de::Error::custom),
                None => Ok(None),
            }
        }
    }
}
