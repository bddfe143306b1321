//! Pipeline configuration, loadable from TOML.

use std::fs;
use std::path::Path;

use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};
use crate::motion::MIN_NUM_FRAMES;

/// Configuration for the reconstruction pipeline.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct PipelineConfig {
    /// Tracks with fewer frames are dropped
    pub min_track_len: usize,
    /// Growth of the tracker box before cropping
    pub bbox_scale: f32,
    /// Side of the square crop fed to the predictor, in pixels
    pub crop_size: usize,
    /// Upper bound on frames per predictor call; the predictor's own window also applies
    pub batch_size: usize,
    /// Apply ImageNet mean/std normalization to crops
    pub normalize_crops: bool,
    /// One-euro smoothing; disabled when absent
    pub smooth: Option<SmoothConfig>,
    /// Keypoint refinement; disabled when absent
    pub refine: Option<RefineConfig>,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            min_track_len: MIN_NUM_FRAMES,
            bbox_scale: 1.1,
            crop_size: 224,
            batch_size: 450,
            normalize_crops: true,
            smooth: None,
            refine: None,
        }
    }
}

impl PipelineConfig {
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self> {
        let content = fs::read_to_string(path)?;
        let config: PipelineConfig = toml::from_str(&content)?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<()> {
        if !(self.bbox_scale.is_finite() && self.bbox_scale > 0.0) {
            return Err(invalid(format!("bbox_scale must be positive, got {}", self.bbox_scale)));
        }
        if self.crop_size == 0 {
            return Err(invalid("crop_size must be at least 1"));
        }
        if self.batch_size == 0 {
            return Err(invalid("batch_size must be at least 1"));
        }
        if let Some(smooth) = &self.smooth {
            smooth.validate()?;
        }
        if let Some(refine) = &self.refine {
            refine.validate()?;
        }
        Ok(())
    }
}

/// One-euro filter parameters, in frame units.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SmoothConfig {
    /// Decreasing the minimum cutoff frequency decreases slow speed jitter
    pub min_cutoff: f32,
    /// Increasing the speed coefficient decreases speed lag
    pub beta: f32,
    pub d_cutoff: f32,
    /// Also filter shape coefficients; off keeps the predicted betas as they are
    pub smooth_shape: bool,
}

impl Default for SmoothConfig {
    fn default() -> Self {
        Self {
            min_cutoff: 0.004,
            beta: 0.7,
            d_cutoff: 1.0,
            smooth_shape: false,
        }
    }
}

impl SmoothConfig {
    pub fn validate(&self) -> Result<()> {
        if !(self.min_cutoff.is_finite() && self.min_cutoff > 0.0) {
            return Err(invalid(format!("min_cutoff must be positive, got {}", self.min_cutoff)));
        }
        if !(self.beta.is_finite() && self.beta >= 0.0) {
            return Err(invalid(format!("beta must be non-negative, got {}", self.beta)));
        }
        if !(self.d_cutoff.is_finite() && self.d_cutoff > 0.0) {
            return Err(invalid(format!("d_cutoff must be positive, got {}", self.d_cutoff)));
        }
        Ok(())
    }
}

/// Keypoint refinement parameters.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RefineConfig {
    /// Gradient steps over the whole sequence
    pub iterations: usize,
    pub learning_rate: f32,
    /// Geman-McClure scale, in crop pixels
    pub sigma: f32,
    pub pose_prior_weight: f32,
    pub shape_prior_weight: f32,
    /// Penalty on pose change between consecutive frames
    pub smoothness_weight: f32,
    /// Keypoints at or below this confidence do not contribute
    pub confidence_threshold: f32,
    /// Finite-difference step for parameter gradients
    pub gradient_step: f32,
}

impl Default for RefineConfig {
    fn default() -> Self {
        Self {
            iterations: 20,
            learning_rate: 1e-2,
            sigma: 100.0,
            pose_prior_weight: 4.78,
            shape_prior_weight: 5.0,
            smoothness_weight: 1.0,
            confidence_threshold: 0.0,
            gradient_step: 1e-3,
        }
    }
}

impl RefineConfig {
    pub fn validate(&self) -> Result<()> {
        let non_negative = [
            ("pose_prior_weight", self.pose_prior_weight),
            ("shape_prior_weight", self.shape_prior_weight),
            ("smoothness_weight", self.smoothness_weight),
            ("confidence_threshold", self.confidence_threshold),
        ];
        for (name, value) in non_negative {
            if !(value.is_finite() && value >= 0.0) {
                return Err(invalid(format!("{name} must be non-negative, got {value}")));
            }
        }
        let positive = [
            ("learning_rate", self.learning_rate),
            ("sigma", self.sigma),
            ("gradient_step", self.gradient_step),
        ];
        for (name, value) in positive {
            if !(value.is_finite() && value > 0.0) {
                return Err(invalid(format!("{name} must be positive, got {value}")));
            }
        }
        Ok(())
    }
}

fn invalid(msg: impl Into<String>) -> Error {
    Error::InvalidConfig(msg.into())
}
