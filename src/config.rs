use std::{fs, path::Path, path::PathBuf};

use anyhow::Context;
use serde::{Deserialize, Serialize};

use crate::error::ConfigError;

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct FaceLockConfig {
    /// Similarity needed to acquire a lock.
    pub lock_confidence_threshold: f32,
    /// Lower similarity bar used only to keep an acquired lock.
    pub tracking_tolerance: f32,
    /// Release after this long without an accepted detection.
    pub lock_timeout_seconds: f64,
    /// Center displacement in pixels that counts as a movement.
    pub movement_threshold: f32,
    pub blink_threshold: f32,
    pub smile_threshold: f32,
    /// Positional fallback radius as a multiple of `movement_threshold`.
    pub proximity_factor: f32,
    /// How much more similar a distant face must be to win over the face
    /// nearest the last known center.
    pub swap_margin: f32,
    pub history_dir: PathBuf,
    pub max_pending_lines: usize,
}

impl Default for FaceLockConfig {
    fn default() -> Self {
        Self {
            lock_confidence_threshold: 0.66,
            tracking_tolerance: 0.45,
            lock_timeout_seconds: 3.0,
            movement_threshold: 30.0,
            blink_threshold: 0.25,
            smile_threshold: 0.02,
            proximity_factor: 2.0,
            swap_margin: 0.10,
            history_dir: PathBuf::from("data/history"),
            max_pending_lines: 4096,
        }
    }
}

impl FaceLockConfig {
    /// Reads a JSON config; absent fields keep their defaults.
    pub fn load(path: &Path) -> anyhow::Result<Self> {
        let contents = fs::read_to_string(path)
            .with_context(|| format!("failed to read config from {}", path.display()))?;
        let config: Self = serde_json::from_str(&contents)
            .with_context(|| format!("failed to parse config {}", path.display()))?;
        config.validate()?;
        Ok(config)
    }

    pub fn proximity_radius(&self) -> f32 {
        self.movement_threshold * self.proximity_factor
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        unit_range("lock_confidence_threshold", self.lock_confidence_threshold)?;
        unit_range("tracking_tolerance", self.tracking_tolerance)?;
        positive("lock_timeout_seconds", self.lock_timeout_seconds)?;
        positive("movement_threshold", self.movement_threshold as f64)?;
        positive("blink_threshold", self.blink_threshold as f64)?;
        positive("smile_threshold", self.smile_threshold as f64)?;
        positive("proximity_factor", self.proximity_factor as f64)?;

        let margin = self.swap_margin as f64;
        finite("swap_margin", margin)?;
        if !(0.0..1.0).contains(&margin) {
            return Err(ConfigError::SwapMargin(margin));
        }
        if self.tracking_tolerance > self.lock_confidence_threshold {
            return Err(ConfigError::ToleranceAboveThreshold {
                tolerance: self.tracking_tolerance as f64,
                threshold: self.lock_confidence_threshold as f64,
            });
        }
        if self.max_pending_lines == 0 {
            return Err(ConfigError::NoPendingCapacity);
        }
        Ok(())
    }
}

fn finite(field: &'static str, value: f64) -> Result<(), ConfigError> {
    if value.is_finite() {
        Ok(())
    } else {
        Err(ConfigError::NotFinite { field, value })
    }
}

fn unit_range(field: &'static str, value: f32) -> Result<(), ConfigError> {
    let value = value as f64;
    finite(field, value)?;
    if value > 0.0 && value < 1.0 {
        Ok(())
    } else {
        Err(ConfigError::OutOfUnitRange { field, value })
    }
}

fn positive(field: &'static str, value: f64) -> Result<(), ConfigError> {
    finite(field, value)?;
    if value > 0.0 {
        Ok(())
    } else {
        Err(ConfigError::NotPositive { field, value })
    }
}
