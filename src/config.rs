use crate::error::Result;

use serde_derive::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fs;
use std::path::Path;

/// Coarse-to-fine grid search parameters
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
#[serde(default)]
pub struct AlignerConfig {
    /// Half-width of the first search window, in feet
    pub initial_radius: f64,
    /// Samples per axis
    pub grid_size: usize,
    /// Radius is divided by this after each round
    pub shrink_factor: f64,
    /// Search stops once the radius drops to this value or below
    pub min_radius: f64,
}

impl Default for AlignerConfig {
    fn default() -> Self {
        Self {
            initial_radius: 50.0,
            grid_size: 11,
            shrink_factor: 5.0,
            min_radius: 1.0,
        }
    }
}

/// What to do when two adjacent cameras share no overlapping tracklet
#[derive(Serialize, Deserialize, Debug, Clone, Copy, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum BiasPolicy {
    /// Keep the predecessor's bias and report it
    Propagate,
    /// Abort the estimation
    Error,
}

#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
#[serde(default)]
pub struct TimeBiasConfig {
    pub samples: usize,
    pub policy: BiasPolicy,
    /// Seconds added per pixel of vertical drag
    pub nudge_gain: f64,
}

impl Default for TimeBiasConfig {
    fn default() -> Self {
        Self {
            samples: 5,
            policy: BiasPolicy::Propagate,
            nudge_gain: 0.0001,
        }
    }
}

#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
#[serde(default)]
pub struct DetectorConfig {
    /// Crop side relative to the larger side of the expected box
    pub expansion: f64,
    /// Side of the square crop handed to the detector, in pixels
    pub crop_size: usize,
}

impl Default for DetectorConfig {
    fn default() -> Self {
        Self {
            expansion: 1.2,
            crop_size: 112,
        }
    }
}

/// Length, width and height in feet
#[derive(Serialize, Deserialize, Debug, Clone, Copy, PartialEq)]
pub struct ClassDims {
    pub length: f64,
    pub width: f64,
    pub height: f64,
}

#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
#[serde(default)]
pub struct Config {
    pub aligner: AlignerConfig,
    pub time_bias: TimeBiasConfig,
    pub detector: DetectorConfig,
    /// Fitting starts once this many curve points were clicked
    pub curve_min_points: usize,
    /// Lateral coordinate separating eastbound (below) from westbound lanes
    pub direction_split_y: f64,
    pub default_class: String,
    pub class_dims: BTreeMap<String, ClassDims>,
    pub undo_depth: usize,
    pub progress_interval: usize,
    pub frame_width: f64,
    pub frame_height: f64,
    /// Keyboard nudge step for positions, in feet
    pub position_nudge: f64,
    /// Keyboard nudge step for dimensions, in feet
    pub dimension_nudge: f64,
    /// Feet of height change per pixel of vertical drag
    pub height_per_pixel: f64,
}

impl Default for Config {
    fn default() -> Self {
        let mut class_dims = BTreeMap::new();
        class_dims.insert(
            "midsize".to_string(),
            ClassDims {
                length: 16.0,
                width: 6.0,
                height: 5.0,
            },
        );

        Self {
            aligner: AlignerConfig::default(),
            time_bias: TimeBiasConfig::default(),
            detector: DetectorConfig::default(),
            curve_min_points: 4,
            direction_split_y: 60.0,
            default_class: "midsize".to_string(),
            class_dims,
            undo_depth: 1,
            progress_interval: 100,
            frame_width: 1920.0,
            frame_height: 1080.0,
            position_nudge: 0.25,
            dimension_nudge: 0.1,
            height_per_pixel: 0.02,
        }
    }
}

impl Config {
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self> {
        let contents = fs::read_to_string(path)?;
        Self::from_yaml(&contents)
    }

    pub fn from_yaml(contents: &str) -> Result<Self> {
        let config: Config = serde_yaml::from_str(contents)?;
        Ok(config)
    }

    /// Dimensions for `class`, falling back to the default class
    pub fn dims_for(&self, class: &str) -> ClassDims {
        self.class_dims
            .get(class)
            .or_else(|| self.class_dims.get(&self.default_class))
            .copied()
            .unwrap_or(ClassDims {
                length: 16.0,
                width: 6.0,
                height: 5.0,
            })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn partial_yaml_keeps_defaults() {
        let config = Config::from_yaml(
            "aligner:\n  initial_radius: 80.0\ntime_bias:\n  policy: error\n",
        )
        .unwrap();

        assert_eq!(config.aligner.initial_radius, 80.0);
        assert_eq!(config.aligner.grid_size, 11);
        assert_eq!(config.time_bias.policy, BiasPolicy::Error);
        assert_eq!(config.time_bias.samples, 5);
        assert_eq!(config.curve_min_points, 4);
    }

    #[test]
    fn unknown_class_falls_back_to_default() {
        let config = Config::default();
        let dims = config.dims_for("tractor");

        assert_eq!(dims, config.class_dims["midsize"]);
    }
}
