//! Range measurement records.
//!
//! The agent senses the distance to the nearest obstacle edge along each of the four grid directions. A
//! [MeasurementRecord] bundles the four [DirectionalReading]s of one sensing event; each valid reading becomes one
//! [Observation] that is fused into every particle.
use crate::Direction;
use crate::landmark::LandmarkId;

use serde::{Deserialize, Serialize};
use std::fmt::{self, Display};

/// Distance to the first obstacle edge along one direction and the cell that was hit.
#[derive(Clone, Copy, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct DirectionalReading {
    pub distance: f64,
    pub obstacle: Option<LandmarkId>,
}

impl DirectionalReading {
    pub fn new(distance: f64, obstacle: Option<LandmarkId>) -> Self {
        DirectionalReading { distance, obstacle }
    }
    /// A reading carries evidence only with a positive, finite distance and an obstacle reference.
    pub fn is_valid(&self) -> bool {
        self.distance.is_finite() && self.distance > 0.0 && self.obstacle.is_some()
    }
}

/// A single-direction landmark observation as consumed by the fusion step.
#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize)]
pub struct Observation {
    pub direction: Direction,
    pub distance: f64,
    pub landmark: Option<LandmarkId>,
}

impl Observation {
    pub fn new(direction: Direction, distance: f64, landmark: Option<LandmarkId>) -> Self {
        Observation {
            direction,
            distance,
            landmark,
        }
    }
}

/// Readings for all four directions from one sensing event.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct MeasurementRecord {
    readings: [DirectionalReading; 4],
}

impl MeasurementRecord {
    pub fn new() -> Self {
        MeasurementRecord::default()
    }
    pub fn get(&self, direction: Direction) -> &DirectionalReading {
        &self.readings[direction.index()]
    }
    pub fn set(&mut self, direction: Direction, reading: DirectionalReading) {
        self.readings[direction.index()] = reading;
    }
    /// Builder-style variant of [MeasurementRecord::set].
    pub fn with(mut self, direction: Direction, distance: f64, obstacle: Option<LandmarkId>) -> Self {
        self.set(direction, DirectionalReading::new(distance, obstacle));
        self
    }
    /// All readings in processing order (Up, Down, Left, Right).
    pub fn iter(&self) -> impl Iterator<Item = (Direction, &DirectionalReading)> {
        Direction::ALL.into_iter().zip(self.readings.iter())
    }
    /// The observation for `direction`, if its reading is valid.
    pub fn observation(&self, direction: Direction) -> Option<Observation> {
        let reading = self.get(direction);
        if reading.is_valid() {
            Some(Observation::new(direction, reading.distance, reading.obstacle))
        } else {
            None
        }
    }
    /// Valid observations in processing order.
    pub fn observations(&self) -> Vec<Observation> {
        Direction::ALL
            .into_iter()
            .filter_map(|direction| self.observation(direction))
            .collect()
    }
}

impl Display for MeasurementRecord {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut first = true;
        for (direction, reading) in self.iter() {
            if let Some(obstacle) = reading.obstacle {
                if !first {
                    write!(f, ", ")?;
                }
                write!(f, "{}: {:.2} @ {}", direction, reading.distance, obstacle)?;
                first = false;
            }
        }
        if first {
            write!(f, "no obstacles")?;
        }
        Ok(())
    }
}
