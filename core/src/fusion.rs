//! Per-landmark Kalman-style measurement fusion.
//!
//! Each landmark estimate is refined by two independent one-dimensional Kalman filters, one per grid axis. This
//! avoids any matrix inversion while still shrinking the landmark uncertainty with every re-observation and
//! producing a Mahalanobis-style importance weight for the particle.
//!
//! For an observation in direction $\hat{u}$ at distance $d$, seen from particle pose $p$, the expected landmark
//! position is $z = p + \hat{u} d$ and the observation variance is $Q_{obs} = (d u, d u)$ where $u$ is the same
//! uncertainty factor used for motion noise. Given a stored estimate $(\hat{z}, Q)$, per axis:
//!
//! $$
//! Y = z - \hat{z}, \quad S = Q + Q_{obs}, \quad K = \frac{Q}{S}
//! $$
//!
//! $$
//! \hat{z}(+) = \hat{z} + K Y, \quad Q(+) = (1 - K) Q
//! $$
//!
//! and the particle weight becomes the density of $Y$ under $\mathcal{N}(0, \mathrm{diag}(S_x, S_y))$. The new
//! weight replaces the old one; evidence from successive directions does not compound.
use crate::landmark::LandmarkEstimate;
use crate::measurements::Observation;
use crate::particle::Particle;

use log::{debug, warn};
use nalgebra::Vector2;
use std::f64::consts::PI;

/// What a single fusion step did to a particle.
#[derive(Clone, Copy, Debug, PartialEq)]
pub enum FusionOutcome {
    /// The observation carried no evidence (non-positive distance or no obstacle).
    Skipped,
    /// A previously unseen landmark was stored and the weight reset to 1.
    Registered,
    /// The landmark store is full; the new landmark was not stored.
    Rejected,
    /// An existing landmark estimate was refined.
    Updated {
        innovation: Vector2<f64>,
        gain: Vector2<f64>,
        weight: f64,
    },
}

/// Per-axis variance of a range observation at `distance`.
pub fn observation_variance(distance: f64, uncertainty: f64) -> Vector2<f64> {
    Vector2::repeat(distance * uncertainty)
}

/// Per-axis Kalman gain `prior / innovation_variance`; axes with a non-positive or non-finite innovation variance
/// get zero gain.
pub fn kalman_gain(prior_variance: &Vector2<f64>, innovation_variance: &Vector2<f64>) -> Vector2<f64> {
    prior_variance.zip_map(innovation_variance, |q, s| {
        if s > 0.0 && s.is_finite() {
            let k = q / s;
            if k.is_finite() { k } else { 0.0 }
        } else {
            0.0
        }
    })
}

/// Density of `innovation` under a zero-mean Gaussian with diagonal covariance `innovation_variance`.
///
/// Returns 0 for any degenerate input instead of an error.
pub fn innovation_likelihood(innovation: &Vector2<f64>, innovation_variance: &Vector2<f64>) -> f64 {
    let (sx, sy) = (innovation_variance.x, innovation_variance.y);
    if !(sx > 0.0 && sy > 0.0 && sx.is_finite() && sy.is_finite()) {
        return 0.0;
    }
    let mahalanobis = innovation.x.powi(2) / sx + innovation.y.powi(2) / sy;
    let weight = (-0.5 * mahalanobis).exp() / (2.0 * PI * (sx * sy).sqrt());
    if weight.is_finite() && weight >= 0.0 {
        weight
    } else {
        0.0
    }
}

/// Fuse one observation into one particle.
///
/// The landmark identity is taken verbatim from the observation, so every particle files the same physical
/// obstacle under the same key even though each expects it at a different position.
pub fn fuse(particle: &mut Particle, observation: &Observation, uncertainty: f64) -> FusionOutcome {
    let Some(id) = observation.landmark else {
        return FusionOutcome::Skipped;
    };
    let distance = observation.distance;
    if !(distance > 0.0 && distance.is_finite()) {
        return FusionOutcome::Skipped;
    }
    let expected = particle.expected_position(observation.direction, distance);
    let measurement_variance = observation_variance(distance, uncertainty);

    if let Some(stored) = particle.landmarks.get_mut(&id) {
        let innovation = expected - stored.expected_position;
        let innovation_variance = stored.variance + measurement_variance;
        let gain = kalman_gain(&stored.variance, &innovation_variance);

        stored.expected_position += innovation.component_mul(&gain);
        stored.variance = (Vector2::repeat(1.0) - gain).component_mul(&stored.variance);
        stored.distance = distance;
        stored.direction = observation.direction;

        let weight = innovation_likelihood(&innovation, &innovation_variance);
        particle.weight = weight;
        debug!(
            "Updated landmark {} from ({:.2}, {:.2}): innovation ({:.3}, {:.3}), gain ({:.3}, {:.3}), weight {:.4e}",
            id, particle.x, particle.y, innovation.x, innovation.y, gain.x, gain.y, weight
        );
        return FusionOutcome::Updated {
            innovation,
            gain,
            weight,
        };
    }

    let estimate = LandmarkEstimate {
        expected_position: expected,
        variance: measurement_variance,
        distance,
        direction: observation.direction,
    };
    match particle.landmarks.insert(id, estimate) {
        Ok(()) => {
            particle.weight = 1.0;
            debug!(
                "Particle at ({:.2}, {:.2}) registered landmark {} {} at {:.2}, expected ({:.2}, {:.2})",
                particle.x, particle.y, id, observation.direction, distance, expected.x, expected.y
            );
            FusionOutcome::Registered
        }
        Err(_) => {
            warn!(
                "Landmark store full ({} entries); ignoring landmark {}",
                particle.landmarks.capacity(),
                id
            );
            FusionOutcome::Rejected
        }
    }
}
