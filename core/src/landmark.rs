//! Landmark identities, estimates and the per-particle landmark store.
//!
//! A landmark is the grid cell at which the agent's range sensor hit an obstacle edge. Its identity is the integer
//! cell coordinate reported by the sensor, computed once in the agent's frame and reused verbatim by every
//! particle. Each particle keeps its own estimate of where that landmark is, as perceived through its own pose.
use crate::Direction;

use nalgebra::Vector2;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::collections::hash_map::Entry;
use std::fmt::{self, Display};

/// Grid-cell identity of an observed obstacle edge.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct LandmarkId {
    pub x: i64,
    pub y: i64,
}

impl LandmarkId {
    pub fn new(x: i64, y: i64) -> Self {
        LandmarkId { x, y }
    }
}

impl From<(i64, i64)> for LandmarkId {
    fn from(cell: (i64, i64)) -> Self {
        LandmarkId::new(cell.0, cell.1)
    }
}

impl Display for LandmarkId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "({}, {})", self.x, self.y)
    }
}

/// One particle's belief about one landmark.
#[derive(Clone, Debug, PartialEq)]
pub struct LandmarkEstimate {
    /// Estimated landmark position as perceived through the owning particle's pose.
    pub expected_position: Vector2<f64>,
    /// Per-axis variance `(qx, qy)`; the axes are treated as independent.
    pub variance: Vector2<f64>,
    /// Raw distance of the latest observation.
    pub distance: f64,
    /// Sensing direction of the latest observation.
    pub direction: Direction,
}

impl Display for LandmarkEstimate {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("LandmarkEstimate")
            .field(
                "expected_position",
                &format_args!(
                    "({:.3}, {:.3})",
                    self.expected_position.x, self.expected_position.y
                ),
            )
            .field(
                "variance",
                &format_args!("({:.4}, {:.4})", self.variance.x, self.variance.y),
            )
            .field("distance", &format_args!("{:.2}", self.distance))
            .field("direction", &self.direction)
            .finish()
    }
}

/// Capacity-bounded map from [LandmarkId] to [LandmarkEstimate], owned by exactly one particle.
///
/// `Clone` produces a fully independent copy of every estimate, which resampling relies on when several
/// destination slots select the same source particle.
#[derive(Clone, Debug, PartialEq)]
pub struct LandmarkStore {
    entries: HashMap<LandmarkId, LandmarkEstimate>,
    capacity: usize,
}

impl Default for LandmarkStore {
    fn default() -> Self {
        LandmarkStore::with_capacity(usize::MAX)
    }
}

impl LandmarkStore {
    /// Create an empty store holding at most `capacity` distinct landmarks.
    pub fn with_capacity(capacity: usize) -> Self {
        LandmarkStore {
            entries: HashMap::new(),
            capacity,
        }
    }
    pub fn capacity(&self) -> usize {
        self.capacity
    }
    pub fn len(&self) -> usize {
        self.entries.len()
    }
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
    pub fn is_full(&self) -> bool {
        self.entries.len() >= self.capacity
    }
    pub fn contains(&self, id: &LandmarkId) -> bool {
        self.entries.contains_key(id)
    }
    pub fn get(&self, id: &LandmarkId) -> Option<&LandmarkEstimate> {
        self.entries.get(id)
    }
    pub fn get_mut(&mut self, id: &LandmarkId) -> Option<&mut LandmarkEstimate> {
        self.entries.get_mut(id)
    }
    /// Insert or replace the estimate for `id`.
    ///
    /// Replacing an existing entry always succeeds. A new identity is rejected (and returned back to the caller)
    /// once the store is full.
    pub fn insert(
        &mut self,
        id: LandmarkId,
        estimate: LandmarkEstimate,
    ) -> Result<(), LandmarkEstimate> {
        let at_capacity = self.is_full();
        match self.entries.entry(id) {
            Entry::Occupied(mut slot) => {
                slot.insert(estimate);
                Ok(())
            }
            Entry::Vacant(_) if at_capacity => Err(estimate),
            Entry::Vacant(slot) => {
                slot.insert(estimate);
                Ok(())
            }
        }
    }
    pub fn iter(&self) -> impl Iterator<Item = (&LandmarkId, &LandmarkEstimate)> {
        self.entries.iter()
    }
    /// Entries ordered by identity, for stable diagnostic output.
    pub fn sorted(&self) -> Vec<(LandmarkId, LandmarkEstimate)> {
        let mut entries: Vec<(LandmarkId, LandmarkEstimate)> = self
            .iter()
            .map(|(id, estimate)| (*id, estimate.clone()))
            .collect();
        entries.sort_by_key(|(id, _)| *id);
        entries
    }
    pub fn clear(&mut self) {
        self.entries.clear();
    }
}
