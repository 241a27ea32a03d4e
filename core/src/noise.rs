//! Zero-mean Gaussian motion noise.
//!
//! Every unit step of a particle is perturbed by an independent Gaussian sample on each axis. The standard
//! deviation scales with the nominal step distance so that longer moves accumulate proportionally more noise.
use nalgebra::Vector2;
use rand::Rng;
use rand_distr::{Distribution, Normal};
use serde::{Deserialize, Serialize};

/// Default uncertainty factor; also used for the range measurement variance.
pub const DEFAULT_UNCERTAINTY: f64 = 0.2;
/// Default nominal step distance in grid units.
pub const DEFAULT_STEP_DISTANCE: f64 = 1.0;

/// Draw one `(x, y)` motion perturbation with standard deviation `uncertainty * movement_distance` per axis.
///
/// A zero (or invalid) standard deviation yields a zero perturbation.
pub fn generate_movement_noise<R: Rng + ?Sized>(
    rng: &mut R,
    movement_distance: f64,
    uncertainty: f64,
) -> Vector2<f64> {
    let std_dev = uncertainty * movement_distance;
    match Normal::new(0.0, std_dev) {
        Ok(normal) if std_dev > 0.0 => Vector2::new(normal.sample(rng), normal.sample(rng)),
        _ => Vector2::zeros(),
    }
}

/// Motion noise parameters carried by the filter.
#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize)]
pub struct MotionNoise {
    pub step_distance: f64,
    pub uncertainty: f64,
}

impl Default for MotionNoise {
    fn default() -> Self {
        MotionNoise {
            step_distance: DEFAULT_STEP_DISTANCE,
            uncertainty: DEFAULT_UNCERTAINTY,
        }
    }
}

impl MotionNoise {
    pub fn new(step_distance: f64, uncertainty: f64) -> Self {
        MotionNoise {
            step_distance,
            uncertainty,
        }
    }
    /// Per-axis standard deviation of a single step.
    pub fn std_dev(&self) -> f64 {
        self.uncertainty * self.step_distance
    }
    pub fn sample<R: Rng + ?Sized>(&self, rng: &mut R) -> Vector2<f64> {
        generate_movement_noise(rng, self.step_distance, self.uncertainty)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use assert_approx_eq::assert_approx_eq;
    use rand::SeedableRng;
    use rand::rngs::StdRng;

    #[test]
    fn test_default_parameters() {
        let noise = MotionNoise::default();
        assert_approx_eq!(noise.step_distance, 1.0, 1e-12);
        assert_approx_eq!(noise.uncertainty, 0.2, 1e-12);
        assert_approx_eq!(noise.std_dev(), 0.2, 1e-12);
    }

    #[test]
    fn test_zero_uncertainty_is_noise_free() {
        let mut rng = StdRng::seed_from_u64(7);
        let sample = generate_movement_noise(&mut rng, 1.0, 0.0);
        assert_eq!(sample, Vector2::zeros());
        let sample = generate_movement_noise(&mut rng, 0.0, 0.2);
        assert_eq!(sample, Vector2::zeros());
    }

    #[test]
    fn test_negative_uncertainty_is_noise_free() {
        let mut rng = StdRng::seed_from_u64(7);
        assert_eq!(generate_movement_noise(&mut rng, 1.0, -0.5), Vector2::zeros());
    }

    #[test]
    fn test_sample_statistics() {
        let mut rng = StdRng::seed_from_u64(42);
        let n = 20_000;
        let samples: Vec<Vector2<f64>> = (0..n)
            .map(|_| generate_movement_noise(&mut rng, 1.0, 0.2))
            .collect();
        let mean = samples.iter().fold(Vector2::zeros(), |acc, s| acc + s) / n as f64;
        let var_x = samples.iter().map(|s| (s.x - mean.x).powi(2)).sum::<f64>() / n as f64;
        let var_y = samples.iter().map(|s| (s.y - mean.y).powi(2)).sum::<f64>() / n as f64;
        let cov_xy = samples
            .iter()
            .map(|s| (s.x - mean.x) * (s.y - mean.y))
            .sum::<f64>()
            / n as f64;
        assert!(mean.x.abs() < 0.01);
        assert!(mean.y.abs() < 0.01);
        assert_approx_eq!(var_x.sqrt(), 0.2, 0.01);
        assert_approx_eq!(var_y.sqrt(), 0.2, 0.01);
        // Axes are drawn independently
        assert!(cov_xy.abs() < 0.002);
    }

    #[test]
    fn test_std_dev_scales_with_distance() {
        let mut rng = StdRng::seed_from_u64(3);
        let n = 10_000;
        let var = (0..n)
            .map(|_| generate_movement_noise(&mut rng, 3.0, 0.2).x.powi(2))
            .sum::<f64>()
            / n as f64;
        assert_approx_eq!(var.sqrt(), 0.6, 0.03);
    }
}
