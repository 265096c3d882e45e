//! Configuration file model and run options.
//!
//! The JSON file keeps the dotted key names used by existing cellanneal
//! configurations. [`Config::derive`] turns the loaded file into the immutable
//! per-run [`DerivedConfig`] the engine reads.

use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::engine::{CostMode, CostParams, ScheduleKind, SelectionStrategy};
use crate::error::ConfigError;

/// Rendering parameters attached to every frame.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SimulationConfig {
    #[serde(rename = "background.color", default)]
    pub background_color: f32,
    #[serde(rename = "cell.color", default = "default_cell_color")]
    pub cell_color: f32,
    #[serde(default)]
    pub padding: usize,
    /// Images per frame; above 1 the input pattern takes a frame and a slice number.
    #[serde(default = "default_z_slices")]
    pub z_slices: usize,
}

fn default_cell_color() -> f32 {
    1.0
}

fn default_z_slices() -> usize {
    1
}

impl Default for SimulationConfig {
    fn default() -> Self {
        Self { background_color: 0.0, cell_color: 1.0, padding: 0, z_slices: 1 }
    }
}

/// Gaussian `mu`/`sigma` pair for one movable parameter.
#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub struct Modification {
    pub mu: f64,
    pub sigma: f64,
}

impl Modification {
    fn scaled(self, factor: f64) -> Self {
        Self { mu: self.mu * factor, sigma: self.sigma * factor }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PerturbationConfig {
    #[serde(rename = "modification.x.mu", default)]
    pub x_mu: f64,
    #[serde(rename = "modification.x.sigma")]
    pub x_sigma: f64,
    #[serde(rename = "modification.y.mu", default)]
    pub y_mu: f64,
    #[serde(rename = "modification.y.sigma")]
    pub y_sigma: f64,
    #[serde(rename = "modification.width.mu", default)]
    pub width_mu: f64,
    #[serde(rename = "modification.width.sigma")]
    pub width_sigma: f64,
    #[serde(rename = "modification.length.mu", default)]
    pub length_mu: f64,
    #[serde(rename = "modification.length.sigma")]
    pub length_sigma: f64,
    #[serde(rename = "modification.rotation.mu", default)]
    pub rotation_mu: f64,
    #[serde(rename = "modification.rotation.sigma")]
    pub rotation_sigma: f64,
    #[serde(rename = "prob.split", default = "default_split_probability")]
    pub split_probability: f64,
    #[serde(rename = "prob.merge", default = "default_merge_probability")]
    pub merge_probability: f64,
    #[serde(rename = "split.alpha.mu", default = "default_split_alpha_mu")]
    pub split_alpha_mu: f64,
    #[serde(rename = "split.alpha.sigma", default = "default_split_alpha_sigma")]
    pub split_alpha_sigma: f64,
}

fn default_split_probability() -> f64 { 0.01 }
fn default_merge_probability() -> f64 { 0.005 }
fn default_split_alpha_mu() -> f64 { 0.5 }
fn default_split_alpha_sigma() -> f64 { 0.05 }

/// The configuration file.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Config {
    #[serde(rename = "global.cellType")]
    pub cell_type: String,
    #[serde(rename = "global.pixelsPerMicron")]
    pub pixels_per_micron: f64,
    #[serde(rename = "global.framesPerSecond")]
    pub frames_per_second: f64,

    #[serde(rename = "bacilli.distanceCostDivisor", default = "default_one")]
    pub distance_cost_divisor: f64,
    #[serde(rename = "bacilli.minWidth", default = "default_min_size")]
    pub min_width: f64,
    #[serde(rename = "bacilli.maxWidth", default = "default_max_size")]
    pub max_width: f64,
    #[serde(rename = "bacilli.minLength", default = "default_min_size")]
    pub min_length: f64,
    #[serde(rename = "bacilli.maxLength", default = "default_max_size")]
    pub max_length: f64,
    #[serde(rename = "bacilli.minSplitLength", default = "default_min_split_length")]
    pub min_split_length: f64,

    pub iteration_per_cell: usize,
    #[serde(rename = "global_optimizer.window_size")]
    pub window_size: usize,

    #[serde(rename = "overlap.cost")]
    pub overlap_cost: f64,
    #[serde(rename = "cell.importance", default = "default_one")]
    pub cell_importance: f64,

    #[serde(rename = "residual.vmin", default = "default_residual_vmin")]
    pub residual_vmin: f32,
    #[serde(rename = "residual.vmax", default = "default_residual_vmax")]
    pub residual_vmax: f32,

    #[serde(default)]
    pub simulation: SimulationConfig,
    pub perturbation: PerturbationConfig,
}

fn default_one() -> f64 { 1.0 }
fn default_min_size() -> f64 { 1.0 }
fn default_max_size() -> f64 { f64::MAX }
fn default_min_split_length() -> f64 { 20.0 }
fn default_residual_vmin() -> f32 { -1.0 }
fn default_residual_vmax() -> f32 { 1.0 }

impl Config {
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        let text = std::fs::read_to_string(path)
            .map_err(|source| ConfigError::Read { path: path.to_path_buf(), source })?;
        Self::from_json(&text)
    }

    pub fn from_json(text: &str) -> Result<Self, ConfigError> {
        let config: Config = serde_json::from_str(text)?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        let invalid = |msg: String| Err(ConfigError::Invalid(msg));
        if !self.cell_type.eq_ignore_ascii_case("bacilli") {
            return invalid(format!("unsupported cell type \"{}\"", self.cell_type));
        }
        if !(self.pixels_per_micron > 0.0) {
            return invalid("global.pixelsPerMicron must be positive".into());
        }
        if !(self.frames_per_second > 0.0) {
            return invalid("global.framesPerSecond must be positive".into());
        }
        if !(self.distance_cost_divisor > 0.0) {
            return invalid("bacilli.distanceCostDivisor must be positive".into());
        }
        if self.simulation.z_slices == 0 {
            return invalid("simulation.z_slices must be at least 1".into());
        }
        if self.window_size == 0 {
            return invalid("global_optimizer.window_size must be at least 1".into());
        }
        if !(self.min_width > 0.0 && self.min_width <= self.max_width) {
            return invalid("bacilli width bounds must satisfy 0 < minWidth <= maxWidth".into());
        }
        if !(self.min_length > 0.0 && self.min_length <= self.max_length) {
            return invalid("bacilli length bounds must satisfy 0 < minLength <= maxLength".into());
        }
        if self.overlap_cost < 0.0 || self.cell_importance < 0.0 {
            return invalid("overlap.cost and cell.importance must be non-negative".into());
        }
        if self.residual_vmin >= self.residual_vmax {
            return invalid("residual.vmin must be below residual.vmax".into());
        }
        let p = &self.perturbation;
        let sigmas = [p.x_sigma, p.y_sigma, p.width_sigma, p.length_sigma, p.rotation_sigma, p.split_alpha_sigma];
        if sigmas.iter().any(|s| !(*s >= 0.0)) {
            return invalid("perturbation sigmas must be non-negative".into());
        }
        for (name, prob) in [("prob.split", p.split_probability), ("prob.merge", p.merge_probability)] {
            if !(0.0..=1.0).contains(&prob) {
                return invalid(format!("{} must be within [0, 1]", name));
            }
        }
        if p.split_probability + p.merge_probability > 1.0 {
            return invalid("prob.split + prob.merge must not exceed 1".into());
        }
        Ok(())
    }

    /// Freeze the configuration for one run. Perturbation mu/sigma are divided
    /// by `iteration_per_cell` so the expected drift per full pass does not
    /// depend on the iteration budget.
    pub fn derive(&self, cost_mode: CostMode) -> DerivedConfig {
        let p = &self.perturbation;
        let factor = if self.iteration_per_cell > 0 { 1.0 / self.iteration_per_cell as f64 } else { 1.0 };
        DerivedConfig {
            x: Modification { mu: p.x_mu, sigma: p.x_sigma }.scaled(factor),
            y: Modification { mu: p.y_mu, sigma: p.y_sigma }.scaled(factor),
            width: Modification { mu: p.width_mu, sigma: p.width_sigma }.scaled(factor),
            length: Modification { mu: p.length_mu, sigma: p.length_sigma }.scaled(factor),
            rotation: Modification { mu: p.rotation_mu, sigma: p.rotation_sigma }.scaled(factor),
            split_probability: p.split_probability,
            merge_probability: p.merge_probability,
            split_alpha: Modification { mu: p.split_alpha_mu, sigma: p.split_alpha_sigma },
            bounds: GeometryBounds {
                min_width: self.min_width,
                max_width: self.max_width,
                min_length: self.min_length,
                max_length: self.max_length,
            },
            min_split_length: self.min_split_length,
            iteration_per_cell: self.iteration_per_cell,
            window_size: self.window_size,
            cost: CostParams {
                mode: cost_mode,
                overlap_cost: self.overlap_cost,
                cell_importance: self.cell_importance,
            },
            distance_cost_divisor: self.distance_cost_divisor,
            pixels_per_micron: self.pixels_per_micron,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct GeometryBounds {
    pub min_width: f64,
    pub max_width: f64,
    pub min_length: f64,
    pub max_length: f64,
}

/// Immutable per-run view of the configuration.
#[derive(Debug, Clone, PartialEq)]
pub struct DerivedConfig {
    pub x: Modification,
    pub y: Modification,
    pub width: Modification,
    pub length: Modification,
    pub rotation: Modification,
    pub split_probability: f64,
    pub merge_probability: f64,
    pub split_alpha: Modification,
    pub bounds: GeometryBounds,
    pub min_split_length: f64,
    pub iteration_per_cell: usize,
    pub window_size: usize,
    pub cost: CostParams,
    pub distance_cost_divisor: f64,
    pub pixels_per_micron: f64,
}

/// How temperatures are (re)calibrated while the window slides.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize, clap::ValueEnum)]
#[serde(rename_all = "lowercase")]
pub enum AutoTempMethod {
    /// Only the initial calibration.
    #[default]
    None,
    /// Sampled recalibration every few frames.
    Frame,
    /// Rescale the last temperatures by the change in baseline cost.
    Factor,
    /// Closed form from the mean uphill delta of a short sample.
    Const,
    /// Proportional to the window's baseline cost.
    Cost,
}

/// Temperature calibration settings.
#[derive(Debug, Clone, PartialEq)]
pub struct TemperatureOptions {
    pub auto_temp: bool,
    pub start_temp: Option<f64>,
    pub end_temp: Option<f64>,
    pub method: AutoTempMethod,
    pub schedule: ScheduleKind,
    /// Target acceptance ratio of uphill moves at the start temperature.
    pub initial_acceptance: f64,
    /// Target acceptance ratio of uphill moves at the end temperature.
    pub final_acceptance: f64,
    /// Proposals sampled by a calibration pre-pass.
    pub calibration_samples: usize,
    /// Re-trigger period (frames) for [`AutoTempMethod::Frame`].
    pub frame_interval: usize,
}

impl Default for TemperatureOptions {
    fn default() -> Self {
        Self {
            auto_temp: true,
            start_temp: None,
            end_temp: None,
            method: AutoTempMethod::None,
            schedule: ScheduleKind::Geometric,
            initial_acceptance: 0.9,
            final_acceptance: 0.1,
            calibration_samples: 200,
            frame_interval: 3,
        }
    }
}

/// Options that come from the command line rather than the config file.
#[derive(Debug, Clone, PartialEq)]
pub struct RunOptions {
    pub workers: usize,
    pub jobs: usize,
    pub keep: usize,
    pub strategy: SelectionStrategy,
    pub seed: u64,
    pub parallel: bool,
    pub cost_mode: CostMode,
    pub temperature: TemperatureOptions,
    /// Emit a debug record every this many iterations.
    pub debug_stride: Option<usize>,
    /// Absolute frame number to resume from.
    pub continue_from: Option<usize>,
    pub lineage_file: Option<PathBuf>,
}

impl Default for RunOptions {
    fn default() -> Self {
        Self {
            workers: 1,
            jobs: 1,
            keep: 1,
            strategy: SelectionStrategy::BestWins,
            seed: 0,
            parallel: false,
            cost_mode: CostMode::Binary,
            temperature: TemperatureOptions::default(),
            debug_stride: None,
            continue_from: None,
            lineage_file: None,
        }
    }
}

impl RunOptions {
    pub fn validate(&self) -> Result<(), ConfigError> {
        let invalid = |msg: &str| Err(ConfigError::Invalid(msg.to_string()));
        if self.jobs == 0 {
            return invalid("jobs must be at least 1");
        }
        if self.workers == 0 {
            return invalid("workers must be at least 1");
        }
        if self.keep == 0 || self.keep > self.jobs {
            return invalid("keep must be between 1 and the number of jobs");
        }
        let t = &self.temperature;
        if t.auto_temp {
            if t.start_temp.is_some() || t.end_temp.is_some() {
                return invalid("start/end temperature must not be set when auto temperature is enabled");
            }
        } else {
            match (t.start_temp, t.end_temp) {
                (Some(start), Some(end)) if start > end && end > 0.0 => {}
                (Some(_), Some(_)) => return invalid("temperatures must satisfy start_temp > end_temp > 0"),
                _ => return invalid("start_temp and end_temp are required when auto temperature is disabled"),
            }
        }
        if !(0.0 < t.final_acceptance && t.final_acceptance < t.initial_acceptance && t.initial_acceptance < 1.0) {
            return invalid("acceptance targets must satisfy 0 < final < initial < 1");
        }
        if t.frame_interval == 0 {
            return invalid("auto temperature frame interval must be at least 1");
        }
        if self.debug_stride == Some(0) {
            return invalid("debug stride must be at least 1");
        }
        if self.continue_from.is_some() && self.lineage_file.is_none() {
            return invalid("continue_from requires a lineage file");
        }
        Ok(())
    }
}

#[cfg(test)]
pub(crate) const SAMPLE_JSON: &str = r#"{
    "global.cellType": "Bacilli",
    "global.pixelsPerMicron": 12.0,
    "global.framesPerSecond": 1.0,
    "bacilli.minWidth": 4.0,
    "bacilli.maxWidth": 20.0,
    "bacilli.minLength": 5.0,
    "bacilli.maxLength": 80.0,
    "iteration_per_cell": 50,
    "global_optimizer.window_size": 3,
    "overlap.cost": 0.5,
    "simulation": { "background.color": 0.1, "cell.color": 0.9, "padding": 2 },
    "perturbation": {
        "modification.x.sigma": 5.0,
        "modification.y.sigma": 5.0,
        "modification.width.sigma": 1.0,
        "modification.length.mu": 0.5,
        "modification.length.sigma": 2.0,
        "modification.rotation.sigma": 0.2
    }
}"#;

#[cfg(test)]
pub(crate) fn sample_config() -> Config {
    Config::from_json(SAMPLE_JSON).expect("sample config parses")
}
