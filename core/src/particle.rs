//! Particle state, motion model and population averaging.
use crate::Direction;
use crate::fusion::{self, FusionOutcome};
use crate::landmark::LandmarkStore;
use crate::measurements::Observation;
use crate::noise::MotionNoise;

use nalgebra::{Matrix2, Vector2};
use rand::Rng;
use serde::{Deserialize, Serialize};
use std::fmt::{self, Display};

/// One weighted hypothesis of the agent pose together with its private landmark map.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct Particle {
    pub x: f64,
    pub y: f64,
    pub weight: f64,
    pub landmarks: LandmarkStore,
}
impl Display for Particle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Particle")
            .field("x", &format_args!("{:.3}", self.x))
            .field("y", &format_args!("{:.3}", self.y))
            .field("weight", &format_args!("{:.4e}", self.weight))
            .field("landmarks", &self.landmarks.len())
            .finish()
    }
}
impl Particle {
    /// Create a particle at `(x, y)` with unit weight and an empty landmark store.
    pub fn new(x: f64, y: f64, landmark_capacity: usize) -> Particle {
        Particle {
            x,
            y,
            weight: 1.0,
            landmarks: LandmarkStore::with_capacity(landmark_capacity),
        }
    }
    pub fn pose(&self) -> Vector2<f64> {
        Vector2::new(self.x, self.y)
    }
    /// Move one noisy step in `direction` and clamp the result into `[0, grid_size - 1]` on each axis.
    ///
    /// Particles are not collision checked; only the numeric grid bounds are enforced.
    pub fn apply_motion<R: Rng + ?Sized>(
        &mut self,
        direction: Direction,
        grid_size: usize,
        noise: &MotionNoise,
        rng: &mut R,
    ) {
        let delta = direction.unit_vector() + noise.sample(rng);
        let upper = grid_size.saturating_sub(1) as f64;
        self.x = (self.x + delta.x).clamp(0.0, upper);
        self.y = (self.y + delta.y).clamp(0.0, upper);
    }
    /// Where this particle expects an obstacle edge observed `distance` away in `direction`.
    pub fn expected_position(&self, direction: Direction, distance: f64) -> Vector2<f64> {
        self.pose() + direction.unit_vector() * distance
    }
    /// Fuse a single-direction observation into this particle's landmark map and weight.
    pub fn register_measurement(
        &mut self,
        observation: &Observation,
        uncertainty: f64,
    ) -> FusionOutcome {
        fusion::fuse(self, observation, uncertainty)
    }
    /// Overwrite this particle with a deep copy of `source`'s pose and landmarks, resetting the weight to 1.
    pub fn copy_from(&mut self, source: &Particle) {
        self.x = source.x;
        self.y = source.y;
        self.landmarks.clone_from(&source.landmarks);
        self.weight = 1.0;
    }
}
impl From<(Vector2<f64>, f64)> for Particle {
    fn from(tuple: (Vector2<f64>, f64)) -> Self {
        let (pose, weight) = tuple;
        Particle {
            x: pose.x,
            y: pose.y,
            weight,
            landmarks: LandmarkStore::default(),
        }
    }
}

/// How a single pose estimate is extracted from the particle population.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[cfg_attr(feature = "clap", derive(clap::ValueEnum))]
pub enum ParticleAveragingStrategy {
    #[default]
    WeightedAverage,
    UnweightedAverage,
    HighestWeight,
}

impl ParticleAveragingStrategy {
    /// Pose mean and 2x2 spread of the population according to the strategy.
    ///
    /// Weighted averaging normalizes by the total weight and falls back to the unweighted average when every
    /// weight is zero. An empty population yields zeros.
    pub fn estimate(&self, particles: &[Particle]) -> (Vector2<f64>, Matrix2<f64>) {
        match self {
            ParticleAveragingStrategy::WeightedAverage => Self::weighted_average_state(particles),
            ParticleAveragingStrategy::UnweightedAverage => {
                Self::unweighted_average_state(particles)
            }
            ParticleAveragingStrategy::HighestWeight => Self::highest_weight_state(particles),
        }
    }
    fn weighted_average_state(particles: &[Particle]) -> (Vector2<f64>, Matrix2<f64>) {
        let total: f64 = particles.iter().map(|p| p.weight).sum();
        if !(total > 0.0 && total.is_finite()) {
            return Self::unweighted_average_state(particles);
        }
        let mut mean = Vector2::<f64>::zeros();
        for particle in particles {
            mean += particle.pose() * (particle.weight / total);
        }
        let mut cov = Matrix2::<f64>::zeros();
        for particle in particles {
            let diff = particle.pose() - mean;
            cov += (particle.weight / total) * diff * diff.transpose();
        }
        (mean, cov)
    }
    fn unweighted_average_state(particles: &[Particle]) -> (Vector2<f64>, Matrix2<f64>) {
        if particles.is_empty() {
            return (Vector2::zeros(), Matrix2::zeros());
        }
        let n = particles.len() as f64;
        let mean = particles
            .iter()
            .fold(Vector2::<f64>::zeros(), |acc, p| acc + p.pose())
            / n;
        let mut cov = Matrix2::<f64>::zeros();
        for particle in particles {
            let diff = particle.pose() - mean;
            cov += (1.0 / n) * diff * diff.transpose();
        }
        (mean, cov)
    }
    fn highest_weight_state(particles: &[Particle]) -> (Vector2<f64>, Matrix2<f64>) {
        match particles
            .iter()
            .max_by(|a, b| a.weight.total_cmp(&b.weight))
        {
            Some(best) => (best.pose(), Matrix2::zeros()),
            None => (Vector2::zeros(), Matrix2::zeros()),
        }
    }
}
