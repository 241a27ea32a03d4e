//! Filter and simulation configuration.
//!
//! Both configurations can be written to and read from JSON, YAML or TOML files; the format is chosen from the
//! file extension.
//!
//! ## Example
//!
//! ```
//! use gridslam::config::{FilterConfig, SimulationConfig};
//!
//! let cfg = SimulationConfig {
//!     grid_size: 30,
//!     num_obstacles: 40,
//!     filter: FilterConfig {
//!         num_particles: 100,
//!         ..FilterConfig::default()
//!     },
//!     ..SimulationConfig::default()
//! };
//! assert!(cfg.validate().is_ok());
//! ```
use crate::noise::{DEFAULT_STEP_DISTANCE, DEFAULT_UNCERTAINTY, MotionNoise};
use crate::particle::ParticleAveragingStrategy;
use crate::resample::CumulativeSearch;
use crate::{Error, Result};

use serde::{Deserialize, Serialize};
use serde::de::DeserializeOwned;
use std::fs::File;
use std::io::{self, Read, Write};
use std::path::Path;

fn default_num_particles() -> usize {
    35
}
fn default_uncertainty() -> f64 {
    DEFAULT_UNCERTAINTY
}
fn default_step_distance() -> f64 {
    DEFAULT_STEP_DISTANCE
}
fn default_init_spread() -> f64 {
    2.0
}
fn default_max_init_attempts() -> usize {
    1000
}
fn default_seed() -> u64 {
    42
}

/// Particle filter parameters.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct FilterConfig {
    /// Population size, fixed for the lifetime of the filter.
    #[serde(default = "default_num_particles")]
    pub num_particles: usize,
    /// Uncertainty factor for both motion noise and range observation variance.
    #[serde(default = "default_uncertainty")]
    pub uncertainty: f64,
    /// Nominal distance of one motion step in grid units.
    #[serde(default = "default_step_distance")]
    pub step_distance: f64,
    /// Half-width of the window around a seed pose in which particles are initialized.
    #[serde(default = "default_init_spread")]
    pub init_spread: f64,
    /// Rejection-sampling attempts allowed per particle during initialization.
    #[serde(default = "default_max_init_attempts")]
    pub max_init_attempts: usize,
    /// Maximum number of landmarks per particle; defaults to the number of grid cells.
    #[serde(default)]
    pub landmark_capacity: Option<usize>,
    #[serde(default)]
    pub search: CumulativeSearch,
    #[serde(default)]
    pub averaging: ParticleAveragingStrategy,
}

impl Default for FilterConfig {
    fn default() -> Self {
        FilterConfig {
            num_particles: default_num_particles(),
            uncertainty: default_uncertainty(),
            step_distance: default_step_distance(),
            init_spread: default_init_spread(),
            max_init_attempts: default_max_init_attempts(),
            landmark_capacity: None,
            search: CumulativeSearch::default(),
            averaging: ParticleAveragingStrategy::default(),
        }
    }
}

impl FilterConfig {
    pub fn motion_noise(&self) -> MotionNoise {
        MotionNoise::new(self.step_distance, self.uncertainty)
    }
    /// Landmark store capacity for a grid of `grid_size` cells per side.
    pub fn landmark_capacity_for(&self, grid_size: usize) -> usize {
        self.landmark_capacity
            .unwrap_or_else(|| grid_size.saturating_mul(grid_size).max(1))
    }
    pub fn validate(&self) -> Result<()> {
        if self.num_particles == 0 {
            return Err(Error::InvalidConfig(
                "num_particles must be at least 1".to_string(),
            ));
        }
        if !(self.uncertainty.is_finite() && self.uncertainty >= 0.0) {
            return Err(Error::InvalidConfig(format!(
                "uncertainty must be finite and non-negative, got {}",
                self.uncertainty
            )));
        }
        if !(self.step_distance.is_finite() && self.step_distance >= 0.0) {
            return Err(Error::InvalidConfig(format!(
                "step_distance must be finite and non-negative, got {}",
                self.step_distance
            )));
        }
        if !(self.init_spread.is_finite() && self.init_spread >= 0.0) {
            return Err(Error::InvalidConfig(format!(
                "init_spread must be finite and non-negative, got {}",
                self.init_spread
            )));
        }
        if self.max_init_attempts == 0 {
            return Err(Error::InvalidConfig(
                "max_init_attempts must be at least 1".to_string(),
            ));
        }
        if self.landmark_capacity == Some(0) {
            return Err(Error::InvalidConfig(
                "landmark_capacity must be at least 1".to_string(),
            ));
        }
        Ok(())
    }
}

/// Headless simulation parameters.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct SimulationConfig {
    /// Cells per side of the square grid, including the border frame.
    pub grid_size: usize,
    /// Random obstacle cells added on top of the border.
    pub num_obstacles: usize,
    /// Number of motion commands to issue.
    pub steps: usize,
    /// Sense every `measure_every` steps; 0 disables sensing.
    pub measure_every: usize,
    #[serde(default = "default_seed")]
    pub seed: u64,
    /// Scripted `WASD` command string; random commands are issued when absent.
    #[serde(default)]
    pub commands: Option<String>,
    /// Initialize particles around the agent's start pose instead of uniformly.
    #[serde(default = "default_true")]
    pub seed_particles_at_start: bool,
    #[serde(default)]
    pub filter: FilterConfig,
}

fn default_true() -> bool {
    true
}

impl Default for SimulationConfig {
    fn default() -> Self {
        SimulationConfig {
            grid_size: 20,
            num_obstacles: 15,
            steps: 100,
            measure_every: 5,
            seed: default_seed(),
            commands: None,
            seed_particles_at_start: true,
            filter: FilterConfig::default(),
        }
    }
}

impl SimulationConfig {
    pub fn validate(&self) -> Result<()> {
        if self.grid_size < 3 {
            return Err(Error::InvalidConfig(format!(
                "grid_size must be at least 3 to leave a free interior, got {}",
                self.grid_size
            )));
        }
        let cells = self.grid_size * self.grid_size;
        if self.num_obstacles > cells {
            return Err(Error::InvalidConfig(format!(
                "num_obstacles ({}) exceeds the number of grid cells ({})",
                self.num_obstacles, cells
            )));
        }
        self.filter.validate()
    }

    /// Write the configuration to a JSON file (pretty-printed).
    pub fn to_json<P: AsRef<Path>>(&self, path: P) -> io::Result<()> {
        write_json(self, path)
    }
    /// Read the configuration from a JSON file.
    pub fn from_json<P: AsRef<Path>>(path: P) -> io::Result<Self> {
        read_json(path)
    }
    /// Write the configuration as YAML.
    pub fn to_yaml<P: AsRef<Path>>(&self, path: P) -> io::Result<()> {
        write_yaml(self, path)
    }
    /// Read the configuration from YAML.
    pub fn from_yaml<P: AsRef<Path>>(path: P) -> io::Result<Self> {
        read_yaml(path)
    }
    /// Write the configuration as TOML.
    pub fn to_toml<P: AsRef<Path>>(&self, path: P) -> io::Result<()> {
        write_toml(self, path)
    }
    /// Read the configuration from TOML.
    pub fn from_toml<P: AsRef<Path>>(path: P) -> io::Result<Self> {
        read_toml(path)
    }
    /// Generic write: choose format by file extension (.json/.yaml/.yml/.toml)
    pub fn to_file<P: AsRef<Path>>(&self, path: P) -> io::Result<()> {
        write_by_extension(self, path.as_ref())
    }
    /// Generic read: choose format by file extension (.json/.yaml/.yml/.toml)
    pub fn from_file<P: AsRef<Path>>(path: P) -> io::Result<Self> {
        read_by_extension(path.as_ref())
    }
}

impl FilterConfig {
    /// Generic write: choose format by file extension (.json/.yaml/.yml/.toml)
    pub fn to_file<P: AsRef<Path>>(&self, path: P) -> io::Result<()> {
        write_by_extension(self, path.as_ref())
    }
    /// Generic read: choose format by file extension (.json/.yaml/.yml/.toml)
    pub fn from_file<P: AsRef<Path>>(path: P) -> io::Result<Self> {
        read_by_extension(path.as_ref())
    }
}

fn write_json<T: Serialize, P: AsRef<Path>>(value: &T, path: P) -> io::Result<()> {
    let file = File::create(path)?;
    serde_json::to_writer_pretty(file, value).map_err(io::Error::other)
}

fn read_json<T: DeserializeOwned, P: AsRef<Path>>(path: P) -> io::Result<T> {
    let file = File::open(path)?;
    serde_json::from_reader(file).map_err(io::Error::other)
}

fn write_yaml<T: Serialize, P: AsRef<Path>>(value: &T, path: P) -> io::Result<()> {
    let mut file = File::create(path)?;
    let s = serde_yaml::to_string(value).map_err(io::Error::other)?;
    file.write_all(s.as_bytes())
}

fn read_yaml<T: DeserializeOwned, P: AsRef<Path>>(path: P) -> io::Result<T> {
    let file = File::open(path)?;
    serde_yaml::from_reader(file).map_err(io::Error::other)
}

fn write_toml<T: Serialize, P: AsRef<Path>>(value: &T, path: P) -> io::Result<()> {
    let mut file = File::create(path)?;
    let s = toml::to_string(value).map_err(io::Error::other)?;
    file.write_all(s.as_bytes())
}

fn read_toml<T: DeserializeOwned, P: AsRef<Path>>(path: P) -> io::Result<T> {
    let mut s = String::new();
    let mut file = File::open(path)?;
    file.read_to_string(&mut s)?;
    toml::from_str(&s).map_err(io::Error::other)
}

fn extension(path: &Path) -> Option<String> {
    path.extension()
        .and_then(|s| s.to_str())
        .map(|s| s.to_lowercase())
}

fn write_by_extension<T: Serialize>(value: &T, path: &Path) -> io::Result<()> {
    match extension(path).as_deref() {
        Some("json") => write_json(value, path),
        Some("yaml") | Some("yml") => write_yaml(value, path),
        Some("toml") => write_toml(value, path),
        _ => Err(io::Error::new(
            io::ErrorKind::InvalidInput,
            "unsupported file extension",
        )),
    }
}

fn read_by_extension<T: DeserializeOwned>(path: &Path) -> io::Result<T> {
    match extension(path).as_deref() {
        Some("json") => read_json(path),
        Some("yaml") | Some("yml") => read_yaml(path),
        Some("toml") => read_toml(path),
        _ => Err(io::Error::new(
            io::ErrorKind::InvalidInput,
            "unsupported file extension",
        )),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::NamedTempFile;

    fn sample_cfg() -> SimulationConfig {
        SimulationConfig {
            grid_size: 12,
            num_obstacles: 8,
            steps: 40,
            measure_every: 3,
            seed: 7,
            commands: Some("WWDDSSAA".to_string()),
            seed_particles_at_start: false,
            filter: FilterConfig {
                num_particles: 50,
                landmark_capacity: Some(64),
                search: CumulativeSearch::Binary,
                averaging: ParticleAveragingStrategy::HighestWeight,
                ..FilterConfig::default()
            },
        }
    }

    #[test]
    fn json_roundtrip() {
        let cfg = sample_cfg();
        let f = NamedTempFile::new().unwrap();
        let path = f.path().with_extension("json");
        cfg.to_json(&path).unwrap();
        let loaded = SimulationConfig::from_json(&path).unwrap();
        assert_eq!(cfg, loaded);
    }

    #[test]
    fn yaml_roundtrip() {
        let cfg = sample_cfg();
        let f = NamedTempFile::new().unwrap();
        let path = f.path().with_extension("yml");
        cfg.to_file(&path).unwrap();
        let loaded = SimulationConfig::from_yaml(&path).unwrap();
        assert_eq!(cfg, loaded);
    }

    #[test]
    fn toml_roundtrip() {
        let cfg = sample_cfg();
        let f = NamedTempFile::new().unwrap();
        let path = f.path().with_extension("toml");
        cfg.to_toml(&path).unwrap();
        let loaded = SimulationConfig::from_file(&path).unwrap();
        assert_eq!(cfg, loaded);
    }

    #[test]
    fn filter_config_roundtrip() {
        let cfg = sample_cfg().filter;
        let f = NamedTempFile::new().unwrap();
        let path = f.path().with_extension("json");
        cfg.to_file(&path).unwrap();
        assert_eq!(FilterConfig::from_file(&path).unwrap(), cfg);
    }

    #[test]
    fn missing_filter_fields_take_defaults() {
        let cfg: SimulationConfig = serde_json::from_str(
            r#"{"grid_size": 10, "num_obstacles": 3, "steps": 5, "measure_every": 1}"#,
        )
        .unwrap();
        assert_eq!(cfg.seed, 42);
        assert!(cfg.seed_particles_at_start);
        assert_eq!(cfg.filter, FilterConfig::default());
        assert_eq!(cfg.filter.num_particles, 35);
        assert_eq!(cfg.filter.uncertainty, 0.2);
    }

    #[test]
    fn unsupported_extension_error() {
        let cfg = sample_cfg();
        let f = NamedTempFile::new().unwrap();
        let path = f.path().with_extension("txt");
        let result = cfg.to_file(&path);
        assert_eq!(result.unwrap_err().kind(), io::ErrorKind::InvalidInput);
        let result = SimulationConfig::from_file(&path);
        assert_eq!(result.unwrap_err().kind(), io::ErrorKind::InvalidInput);
    }

    #[test]
    fn validate_rejects_bad_values() {
        assert!(SimulationConfig::default().validate().is_ok());
        let mut cfg = SimulationConfig::default();
        cfg.grid_size = 2;
        assert!(matches!(cfg.validate(), Err(Error::InvalidConfig(_))));

        let mut cfg = SimulationConfig::default();
        cfg.num_obstacles = 401;
        assert!(cfg.validate().is_err());

        let mut cfg = SimulationConfig::default();
        cfg.filter.num_particles = 0;
        assert!(cfg.validate().is_err());

        let mut filter = FilterConfig::default();
        filter.uncertainty = -0.1;
        assert!(filter.validate().is_err());
        filter.uncertainty = f64::NAN;
        assert!(filter.validate().is_err());

        let mut filter = FilterConfig::default();
        filter.max_init_attempts = 0;
        assert!(filter.validate().is_err());

        let mut filter = FilterConfig::default();
        filter.landmark_capacity = Some(0);
        assert!(filter.validate().is_err());
    }

    #[test]
    fn landmark_capacity_defaults_to_cell_count() {
        let filter = FilterConfig::default();
        assert_eq!(filter.landmark_capacity_for(20), 400);
        let filter = FilterConfig {
            landmark_capacity: Some(5),
            ..FilterConfig::default()
        };
        assert_eq!(filter.landmark_capacity_for(20), 5);
    }
}
