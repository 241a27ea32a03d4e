//! Stochastic-universal (systematic) resampling.
//!
//! A single uniform draw `start ∈ [0, step)` with `step = total_weight / N` places `N` evenly spaced pickers
//! `start + i * step` over the cumulative weight line. Each picker selects the first particle whose cumulative
//! weight reaches it. Sharing one random offset across all draws keeps the selection variance well below that of
//! `N` independent roulette spins.
//!
//! Resampling overwrites particles in place: slot `i` stays slot `i`, only its contents change.
use crate::particle::Particle;

use log::trace;
use rand::Rng;
use serde::{Deserialize, Serialize};

/// How the cumulative weight array is searched for each picker. Both produce identical selections.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[cfg_attr(feature = "clap", derive(clap::ValueEnum))]
pub enum CumulativeSearch {
    /// Single ascending scan shared by all pickers, O(N).
    #[default]
    Linear,
    /// Binary search per picker, O(N log N).
    Binary,
}

pub fn total_weight(particles: &[Particle]) -> f64 {
    particles.iter().map(|p| p.weight).sum()
}

/// Resampling is skipped when there is no evidence at all (total weight 0) or the weights still sum to the
/// population size (never adjusted away from the default of 1).
pub fn needs_resampling(particles: &[Particle]) -> bool {
    let total = total_weight(particles);
    !(total == 0.0 || total == particles.len() as f64 || !total.is_finite())
}

/// Running sums of `weights` in their original order.
pub fn cumulative_weights(weights: &[f64]) -> Vec<f64> {
    weights
        .iter()
        .scan(0.0, |acc, &w| {
            *acc += w;
            Some(*acc)
        })
        .collect()
}

/// Evenly spaced picker positions `start + i * step` for `i in 0..n`.
pub fn pickers(start: f64, step: f64, n: usize) -> Vec<f64> {
    (0..n).map(|i| start + i as f64 * step).collect()
}

/// Source index chosen by every picker: the first index whose cumulative weight is `>=` the picker.
///
/// `start` must lie in `[0, total / N)`. Pickers that overshoot the last cumulative value through rounding select
/// the last particle.
pub fn systematic_indices(weights: &[f64], start: f64, search: CumulativeSearch) -> Vec<usize> {
    let n = weights.len();
    if n == 0 {
        return Vec::new();
    }
    let cumulative = cumulative_weights(weights);
    let step = cumulative[n - 1] / n as f64;
    let positions = pickers(start, step, n);
    let last = n - 1;
    match search {
        CumulativeSearch::Linear => {
            let mut indices = Vec::with_capacity(n);
            let mut i = 0;
            for &position in &positions {
                while i < last && cumulative[i] < position {
                    i += 1;
                }
                indices.push(i);
            }
            indices
        }
        CumulativeSearch::Binary => positions
            .iter()
            .map(|&position| cumulative.partition_point(|&c| c < position).min(last))
            .collect(),
    }
}

/// Overwrite each slot `i` with a deep copy of `sources[indices[i]]` and unit weight.
pub fn apply_selection(particles: &mut [Particle], indices: &[usize]) {
    let sources: Vec<Particle> = particles.to_vec();
    for (slot, &index) in particles.iter_mut().zip(indices.iter()) {
        slot.copy_from(&sources[index]);
    }
}

/// Resample `particles` in place with a random offset drawn from `rng`.
///
/// Returns the selected source indices, or `None` when resampling was skipped.
pub fn resample<R: Rng + ?Sized>(
    particles: &mut [Particle],
    search: CumulativeSearch,
    rng: &mut R,
) -> Option<Vec<usize>> {
    if !needs_resampling(particles) {
        return None;
    }
    let step = total_weight(particles) / particles.len() as f64;
    let start = rng.random::<f64>() * step;
    Some(resample_with_offset(particles, start, search))
}

/// Deterministic core of [resample] for a given offset `start ∈ [0, step)`. Always performs the selection.
pub fn resample_with_offset(
    particles: &mut [Particle],
    start: f64,
    search: CumulativeSearch,
) -> Vec<usize> {
    let weights: Vec<f64> = particles.iter().map(|p| p.weight).collect();
    let indices = systematic_indices(&weights, start, search);
    trace!("Resampled with offset {:.4}: {:?}", start, indices);
    apply_selection(particles, &indices);
    indices
}

/// Effective number of particles `(Σw)² / Σw²`, equal to `N` for uniform weights and 0 when all weights are 0.
pub fn effective_sample_size(particles: &[Particle]) -> f64 {
    let total = total_weight(particles);
    let sum_of_squares: f64 = particles.iter().map(|p| p.weight * p.weight).sum();
    if sum_of_squares > 0.0 {
        total * total / sum_of_squares
    } else {
        0.0
    }
}
