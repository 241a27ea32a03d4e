//! Particle filter orchestrator.
//!
//! Owns the particle population and sequences the three filter phases:
//!
//! 1. initialization by bounded rejection sampling against a [PositionOracle],
//! 2. motion updates that move every particle one noisy step,
//! 3. sensor updates that fuse each direction of a [MeasurementRecord] into every particle and resample after each
//!    direction.
//!
//! Every update runs over the whole population before returning.
use crate::config::FilterConfig;
use crate::fusion::FusionOutcome;
use crate::landmark::{LandmarkEstimate, LandmarkId};
use crate::measurements::MeasurementRecord;
use crate::noise::MotionNoise;
use crate::particle::Particle;
use crate::resample;
use crate::{Direction, Error, PositionOracle, Result};

use log::{debug, info, trace};
use nalgebra::{Matrix2, Vector2};
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use serde::{Deserialize, Serialize};
use std::fmt::{self, Debug};

/// Read-only view of one particle for rendering and logging.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct ParticleSnapshot {
    pub index: usize,
    pub x: f64,
    pub y: f64,
    pub weight: f64,
    pub landmarks: usize,
}

/// Population summary returned by [ParticleFilter::estimate].
///
/// `landmarks[i]` holds the map of particle `i` ordered by landmark identity.
#[derive(Clone, Debug, PartialEq)]
pub struct FilterEstimate {
    pub mean: Vector2<f64>,
    pub covariance: Matrix2<f64>,
    pub effective_sample_size: f64,
    pub particles: Vec<ParticleSnapshot>,
    pub landmarks: Vec<Vec<(LandmarkId, LandmarkEstimate)>>,
}

/// What happened while fusing a single direction of a measurement record.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct DirectionReport {
    pub direction: Option<Direction>,
    pub landmark: Option<LandmarkId>,
    pub registered: usize,
    pub updated: usize,
    pub rejected: usize,
    pub resampled: bool,
}

/// Summary of one [ParticleFilter::sensor_update] call; one entry per direction that carried evidence.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct SensorReport {
    pub directions: Vec<DirectionReport>,
}

impl SensorReport {
    pub fn resample_count(&self) -> usize {
        self.directions.iter().filter(|d| d.resampled).count()
    }
    pub fn is_empty(&self) -> bool {
        self.directions.is_empty()
    }
}

pub struct ParticleFilter {
    particles: Vec<Particle>,
    config: FilterConfig,
    grid_size: usize,
    noise: MotionNoise,
    rng: StdRng,
}

impl Debug for ParticleFilter {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let (mean, _) = self.config.averaging.estimate(&self.particles);
        let min_weight = self
            .particles
            .iter()
            .map(|p| p.weight)
            .fold(f64::INFINITY, f64::min);
        let max_weight = self.particles.iter().map(|p| p.weight).fold(0.0, f64::max);
        f.debug_struct("ParticleFilter")
            .field("num_particles", &self.particles.len())
            .field("grid_size", &self.grid_size)
            .field("effective_particles", &self.effective_sample_size())
            .field(
                "weight_range",
                &format_args!("[{:.4e}, {:.4e}]", min_weight, max_weight),
            )
            .field(
                "mean_position",
                &format_args!("({:.3}, {:.3})", mean.x, mean.y),
            )
            .finish()
    }
}

impl ParticleFilter {
    /// Create `config.num_particles` particles on the grid described by `oracle`.
    ///
    /// With a `seed_pose`, every particle is drawn uniformly from the square window `seed_pose ± init_spread`;
    /// otherwise it is drawn uniformly over the interior `[1, size - 2]`. Draws outside the grid or rejected by the
    /// oracle are retried up to `max_init_attempts` times per particle. `seed` fixes the random stream; `None` seeds
    /// from the operating system.
    pub fn initialize<O: PositionOracle + ?Sized>(
        oracle: &O,
        config: FilterConfig,
        seed_pose: Option<Vector2<f64>>,
        seed: Option<u64>,
    ) -> Result<Self> {
        config.validate()?;
        let grid_size = oracle.size();
        if seed_pose.is_none() && grid_size < 3 {
            return Err(Error::InvalidConfig(format!(
                "grid of size {} has no interior to initialize particles in",
                grid_size
            )));
        }
        if let Some(pose) = seed_pose {
            if !(pose.x.is_finite() && pose.y.is_finite()) {
                return Err(Error::InvalidConfig(format!(
                    "seed pose ({}, {}) is not finite",
                    pose.x, pose.y
                )));
            }
        }
        let mut rng = match seed {
            Some(seed) => StdRng::seed_from_u64(seed),
            None => StdRng::from_os_rng(),
        };
        let capacity = config.landmark_capacity_for(grid_size);
        let mut particles = Vec::with_capacity(config.num_particles);
        for index in 0..config.num_particles {
            let (x, y) = Self::draw_valid_position(oracle, &config, seed_pose, index, &mut rng)?;
            particles.push(Particle::new(x, y, capacity));
        }
        let noise = config.motion_noise();
        info!(
            "Initialized {} particles on a {}x{} grid ({}), step noise std {:.3}",
            particles.len(),
            grid_size,
            grid_size,
            match seed_pose {
                Some(pose) => format!(
                    "around ({:.2}, {:.2}) +/- {:.2}",
                    pose.x, pose.y, config.init_spread
                ),
                None => "uniform over interior".to_string(),
            },
            noise.std_dev()
        );
        Ok(ParticleFilter {
            particles,
            config,
            grid_size,
            noise,
            rng,
        })
    }

    /// Build a filter from an existing population, e.g. to replay a known scenario.
    pub fn from_particles(
        particles: Vec<Particle>,
        config: FilterConfig,
        grid_size: usize,
        seed: u64,
    ) -> Self {
        let noise = config.motion_noise();
        ParticleFilter {
            particles,
            config,
            grid_size,
            noise,
            rng: StdRng::seed_from_u64(seed),
        }
    }

    fn draw_valid_position<O: PositionOracle + ?Sized, R: Rng + ?Sized>(
        oracle: &O,
        config: &FilterConfig,
        seed_pose: Option<Vector2<f64>>,
        index: usize,
        rng: &mut R,
    ) -> Result<(f64, f64)> {
        let upper = oracle.size().saturating_sub(1) as f64;
        for _ in 0..config.max_init_attempts {
            let (x, y) = match seed_pose {
                Some(pose) => {
                    let spread = config.init_spread;
                    (
                        pose.x + rng.random_range(-1.0_f64..=1.0) * spread,
                        pose.y + rng.random_range(-1.0_f64..=1.0) * spread,
                    )
                }
                None => (
                    rng.random_range(1.0_f64..=upper - 1.0),
                    rng.random_range(1.0_f64..=upper - 1.0),
                ),
            };
            let in_bounds = (0.0..=upper).contains(&x) && (0.0..=upper).contains(&y);
            if in_bounds && oracle.is_valid_position(x, y) {
                return Ok((x, y));
            }
            trace!("Rejected initial position ({:.2}, {:.2}) for particle {}", x, y, index);
        }
        Err(Error::InitializationExhausted {
            particle: index,
            attempts: config.max_init_attempts,
        })
    }

    /// Move every particle one noisy step in `direction`.
    pub fn motion_update(&mut self, direction: Direction) {
        for particle in &mut self.particles {
            particle.apply_motion(direction, self.grid_size, &self.noise, &mut self.rng);
        }
        trace!("Motion update {}: {:?}", direction, self);
    }

    /// Parse a movement command and apply it. Unrecognized commands change nothing and return `None`.
    pub fn apply_command(&mut self, command: &str) -> Option<Direction> {
        match command.parse::<Direction>() {
            Ok(direction) => {
                self.motion_update(direction);
                Some(direction)
            }
            Err(e) => {
                debug!("Ignoring command: {}", e);
                None
            }
        }
    }

    /// Fuse every direction of `record` that carries an obstacle at positive range, resampling after each one.
    pub fn sensor_update(&mut self, record: &MeasurementRecord) -> SensorReport {
        let mut report = SensorReport::default();
        for observation in record.observations() {
            let mut entry = DirectionReport {
                direction: Some(observation.direction),
                landmark: observation.landmark,
                ..DirectionReport::default()
            };
            for particle in &mut self.particles {
                match particle.register_measurement(&observation, self.config.uncertainty) {
                    FusionOutcome::Registered => entry.registered += 1,
                    FusionOutcome::Updated { .. } => entry.updated += 1,
                    FusionOutcome::Rejected => entry.rejected += 1,
                    FusionOutcome::Skipped => {}
                }
            }
            entry.resampled =
                resample::resample(&mut self.particles, self.config.search, &mut self.rng).is_some();
            debug!(
                "Sensor update {} at {:.2}: {} registered, {} updated, {} rejected, resampled: {}",
                observation.direction,
                observation.distance,
                entry.registered,
                entry.updated,
                entry.rejected,
                entry.resampled
            );
            report.directions.push(entry);
        }
        report
    }

    /// Read-only view of the population, including each particle's landmark store.
    pub fn particles(&self) -> &[Particle] {
        &self.particles
    }
    pub fn len(&self) -> usize {
        self.particles.len()
    }
    pub fn is_empty(&self) -> bool {
        self.particles.is_empty()
    }
    pub fn config(&self) -> &FilterConfig {
        &self.config
    }
    pub fn effective_sample_size(&self) -> f64 {
        resample::effective_sample_size(&self.particles)
    }
    pub fn snapshot(&self) -> Vec<ParticleSnapshot> {
        self.particles
            .iter()
            .enumerate()
            .map(|(index, p)| ParticleSnapshot {
                index,
                x: p.x,
                y: p.y,
                weight: p.weight,
                landmarks: p.landmarks.len(),
            })
            .collect()
    }
    /// Current pose estimate under the configured averaging strategy together with a per-particle snapshot and a
    /// copy of every particle's landmark map.
    pub fn estimate(&self) -> FilterEstimate {
        let (mean, covariance) = self.config.averaging.estimate(&self.particles);
        FilterEstimate {
            mean,
            covariance,
            effective_sample_size: self.effective_sample_size(),
            particles: self.snapshot(),
            landmarks: self.particles.iter().map(|p| p.landmarks.sorted()).collect(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::particle::ParticleAveragingStrategy;
    use assert_approx_eq::assert_approx_eq;

    /// Open square grid where every in-bounds position is valid.
    struct OpenGrid(usize);
    impl PositionOracle for OpenGrid {
        fn size(&self) -> usize {
            self.0
        }
        fn is_valid_position(&self, x: f64, y: f64) -> bool {
            let upper = (self.0 - 1) as f64;
            (0.0..=upper).contains(&x.round()) && (0.0..=upper).contains(&y.round())
        }
    }

    /// Grid with no free cell at all.
    struct Blocked;
    impl PositionOracle for Blocked {
        fn size(&self) -> usize {
            10
        }
        fn is_valid_position(&self, _x: f64, _y: f64) -> bool {
            false
        }
    }

    fn config(n: usize) -> FilterConfig {
        FilterConfig {
            num_particles: n,
            ..FilterConfig::default()
        }
    }

    #[test]
    fn test_uniform_initialization_stays_in_interior() {
        let filter = ParticleFilter::initialize(&OpenGrid(20), config(200), None, Some(1)).unwrap();
        assert_eq!(filter.len(), 200);
        for p in filter.particles() {
            assert!((1.0..=18.0).contains(&p.x));
            assert!((1.0..=18.0).contains(&p.y));
            assert_eq!(p.weight, 1.0);
            assert!(p.landmarks.is_empty());
            assert_eq!(p.landmarks.capacity(), 400);
        }
    }

    #[test]
    fn test_seeded_initialization_stays_in_window() {
        let seed_pose = Vector2::new(1.0, 10.0);
        let filter =
            ParticleFilter::initialize(&OpenGrid(20), config(100), Some(seed_pose), Some(2))
                .unwrap();
        for p in filter.particles() {
            assert!(p.x >= 0.0 && p.x <= 3.0);
            assert!(p.y >= 8.0 && p.y <= 12.0);
        }
    }

    #[test]
    fn test_initialization_is_reproducible_with_seed() {
        let a = ParticleFilter::initialize(&OpenGrid(15), config(10), None, Some(9)).unwrap();
        let b = ParticleFilter::initialize(&OpenGrid(15), config(10), None, Some(9)).unwrap();
        assert_eq!(a.particles(), b.particles());
    }

    #[test]
    fn test_initialization_exhaustion_is_reported() {
        let cfg = FilterConfig {
            max_init_attempts: 25,
            ..config(3)
        };
        match ParticleFilter::initialize(&Blocked, cfg, None, Some(1)) {
            Err(Error::InitializationExhausted { particle, attempts }) => {
                assert_eq!(particle, 0);
                assert_eq!(attempts, 25);
            }
            other => panic!("expected exhaustion, got {:?}", other),
        }
    }

    #[test]
    fn test_initialization_rejects_tiny_grid_and_bad_config() {
        assert!(matches!(
            ParticleFilter::initialize(&OpenGrid(2), config(5), None, Some(1)),
            Err(Error::InvalidConfig(_))
        ));
        assert!(matches!(
            ParticleFilter::initialize(&OpenGrid(10), config(0), None, Some(1)),
            Err(Error::InvalidConfig(_))
        ));
    }

    #[test]
    fn test_motion_update_moves_every_particle() {
        let cfg = FilterConfig {
            uncertainty: 0.0,
            ..config(2)
        };
        let particles = vec![Particle::new(5.0, 5.0, 10), Particle::new(2.0, 7.0, 10)];
        let mut filter = ParticleFilter::from_particles(particles, cfg, 10, 1);
        filter.motion_update(Direction::Right);
        assert_eq!(filter.particles()[0].pose(), Vector2::new(6.0, 5.0));
        assert_eq!(filter.particles()[1].pose(), Vector2::new(3.0, 7.0));
    }

    #[test]
    fn test_unknown_command_is_noop() {
        let mut filter =
            ParticleFilter::initialize(&OpenGrid(10), config(5), None, Some(4)).unwrap();
        let before = filter.particles().to_vec();
        assert_eq!(filter.apply_command("jump"), None);
        assert_eq!(filter.apply_command(""), None);
        assert_eq!(filter.particles(), &before[..]);
        assert_eq!(filter.apply_command("w"), Some(Direction::Up));
        assert_ne!(filter.particles(), &before[..]);
    }

    #[test]
    fn test_sensor_update_registers_then_updates() {
        let particles = vec![
            Particle::new(5.0, 5.0, 100),
            Particle::new(5.0, 5.5, 100),
            Particle::new(4.0, 5.0, 100),
        ];
        let mut filter = ParticleFilter::from_particles(particles, config(3), 10, 3);
        let first = MeasurementRecord::new().with(Direction::Up, 3.0, Some(LandmarkId::new(5, 2)));
        let report = filter.sensor_update(&first);
        assert_eq!(report.directions.len(), 1);
        assert_eq!(report.directions[0].registered, 3);
        // All weights are reset to 1, so the population sum equals N and resampling is skipped
        assert!(!report.directions[0].resampled);
        assert!(filter.particles().iter().all(|p| p.weight == 1.0));

        let second = MeasurementRecord::new().with(Direction::Up, 3.1, Some(LandmarkId::new(5, 2)));
        let report = filter.sensor_update(&second);
        assert_eq!(report.directions[0].updated, 3);
        assert!(report.directions[0].resampled);
        assert_eq!(filter.len(), 3);
        assert!(filter.particles().iter().all(|p| p.weight == 1.0));
    }

    #[test]
    fn test_sensor_update_resamples_per_direction() {
        let particles = vec![Particle::new(5.0, 5.0, 100), Particle::new(6.0, 4.0, 100)];
        let mut filter = ParticleFilter::from_particles(particles, config(2), 10, 5);
        let record = MeasurementRecord::new()
            .with(Direction::Up, 2.0, Some(LandmarkId::new(5, 3)))
            .with(Direction::Left, 4.0, Some(LandmarkId::new(1, 5)));
        filter.sensor_update(&record);
        let again = MeasurementRecord::new()
            .with(Direction::Up, 2.5, Some(LandmarkId::new(5, 3)))
            .with(Direction::Left, 3.5, Some(LandmarkId::new(1, 5)));
        let report = filter.sensor_update(&again);
        let order: Vec<_> = report.directions.iter().map(|d| d.direction).collect();
        assert_eq!(order, vec![Some(Direction::Up), Some(Direction::Left)]);
        assert_eq!(report.resample_count(), 2);
    }

    #[test]
    fn test_sensor_update_ignores_empty_readings() {
        let mut filter =
            ParticleFilter::initialize(&OpenGrid(10), config(4), None, Some(6)).unwrap();
        let before = filter.particles().to_vec();
        let record = MeasurementRecord::new()
            .with(Direction::Up, 0.0, Some(LandmarkId::new(1, 1)))
            .with(Direction::Down, 2.0, None);
        let report = filter.sensor_update(&record);
        assert!(report.is_empty());
        assert_eq!(filter.particles(), &before[..]);
    }

    #[test]
    fn test_estimate_does_not_mutate() {
        let particles = vec![
            Particle::from((Vector2::new(2.0, 2.0), 1.0)),
            Particle::from((Vector2::new(4.0, 6.0), 3.0)),
        ];
        let cfg = FilterConfig {
            averaging: ParticleAveragingStrategy::WeightedAverage,
            ..config(2)
        };
        let filter = ParticleFilter::from_particles(particles, cfg, 10, 1);
        let estimate = filter.estimate();
        assert_approx_eq!(estimate.mean.x, 3.5, 1e-12);
        assert_approx_eq!(estimate.mean.y, 5.0, 1e-12);
        assert_approx_eq!(estimate.effective_sample_size, 16.0 / 10.0, 1e-12);
        assert_eq!(estimate.particles.len(), 2);
        assert_eq!(estimate.particles[1].weight, 3.0);
        assert_eq!(filter.estimate(), estimate);
    }

    #[test]
    fn test_estimate_exposes_landmark_maps() {
        let particles = vec![Particle::new(5.0, 5.0, 100), Particle::new(5.0, 5.5, 100)];
        let mut filter = ParticleFilter::from_particles(particles, config(2), 10, 4);
        assert!(filter.estimate().landmarks.iter().all(|m| m.is_empty()));

        let id = LandmarkId::new(5, 2);
        filter.sensor_update(&MeasurementRecord::new().with(Direction::Up, 3.0, Some(id)));
        let estimate = filter.estimate();
        assert_eq!(estimate.landmarks.len(), 2);
        assert_eq!(estimate.particles[0].landmarks, 1);
        let (first_id, first) = &estimate.landmarks[0][0];
        assert_eq!(*first_id, id);
        assert_approx_eq!(first.expected_position.y, 2.0, 1e-12);
        let (_, second) = &estimate.landmarks[1][0];
        assert_approx_eq!(second.expected_position.y, 2.5, 1e-12);
        assert_approx_eq!(second.variance.x, 0.6, 1e-12);
    }

    #[test]
    fn test_debug_output() {
        let filter = ParticleFilter::initialize(&OpenGrid(10), config(4), None, Some(6)).unwrap();
        let text = format!("{:?}", filter);
        assert!(text.contains("ParticleFilter"));
        assert!(text.contains("effective_particles"));
    }
}
