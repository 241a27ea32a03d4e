//! Particle-filter landmark SLAM on a bounded 2D occupancy grid
//!
//! This crate provides the estimation engine for a mobile agent that moves through a square occupancy grid in
//! unit steps and senses the distance to the nearest obstacle edge along the four grid axes. The agent's pose and
//! the positions of the obstacle edges it observes (landmarks) are estimated jointly with a particle filter in the
//! spirit of FastSLAM: every particle carries its own pose hypothesis and its own private map of landmark
//! estimates, and each landmark estimate is refined with a small Kalman-style update whenever it is re-observed.
//!
//! The crate is primarily built off of three additional dependencies:
//! - [`nalgebra`](https://crates.io/crates/nalgebra): Provides the two-dimensional vector types used for poses,
//!   innovations, gains and per-axis variances.
//! - [`rand`](https://crates.io/crates/rand) and [`rand_distr`](https://crates.io/crates/rand_distr): Provide the
//!   random number generation for motion noise, particle initialization and resampling.
//!
//! All other functionality is auxiliary (configuration files, CSV export and a headless simulation of the grid and
//! the agent used to drive the filter end to end).
//!
//! ## Crate overview
//!
//! - [noise]: Zero-mean Gaussian motion noise.
//! - [landmark]: Landmark identities, per-landmark estimates and the per-particle landmark store.
//! - [particle]: A single pose-plus-map hypothesis and its motion model.
//! - [fusion]: The per-axis Kalman-style landmark update and importance weight.
//! - [resample]: Stochastic-universal (systematic) resampling of the particle population.
//! - [filter]: The particle filter orchestrator.
//! - [measurements]: Measurement records produced by the agent's range sensing.
//! - [config]: Filter and simulation configuration with JSON/YAML/TOML file support.
//! - [sim]: Occupancy grid, agent and a headless simulation loop.
//!
//! ## Coordinate conventions
//!
//! Poses are continuous `(x, y)` coordinates in grid units where integer values are cell centers. The `x` axis
//! increases to the right (column index) and the `y` axis increases downward (row index), so moving [Direction::Up]
//! decreases `y`. A grid of size $n$ spans the closed interval $[0, n-1]$ along each axis.
//!
//! ## Landmark update
//!
//! Each landmark estimate carries a diagonal variance $Q = (q_x, q_y)$. The two axes are treated as independent
//! one-dimensional Kalman filters. For an observation at distance $d$ with uncertainty factor $u$ the observation
//! variance is $Q_{obs} = (d u, d u)$ and per axis:
//!
//! $$
//! Y = z - \hat{z}, \quad S = Q + Q_{obs}, \quad K = Q / S, \quad \hat{z}(+) = \hat{z} + K Y, \quad Q(+) = (1 - K) Q
//! $$
//!
//! The importance weight of the particle is the Gaussian likelihood of the innovation under the diagonal
//! innovation covariance:
//!
//! $$
//! w = \frac{1}{2 \pi \sqrt{S_x S_y}} \exp\left(-\frac{1}{2}\left(\frac{Y_x^2}{S_x} + \frac{Y_y^2}{S_y}\right)\right)
//! $$
pub mod config;
pub mod error;
pub mod filter;
pub mod fusion;
pub mod landmark;
pub mod measurements;
pub mod noise;
pub mod particle;
pub mod resample;
pub mod sim;

pub use error::{Error, Result};

use nalgebra::Vector2;
use serde::{Deserialize, Serialize};
use std::fmt::{self, Display};
use std::str::FromStr;

/// Position-validity oracle for the grid the agent lives in.
///
/// The filter only needs two things from its environment: the numeric extent of the grid (used to clamp particles
/// after motion) and a bounds + occupancy check (used while placing particles at initialization).
pub trait PositionOracle {
    /// Number of cells along each axis of the square grid.
    fn size(&self) -> usize;
    /// Returns `true` if the continuous position `(x, y)` lies in a free cell inside the grid.
    fn is_valid_position(&self, x: f64, y: f64) -> bool;
}

/// One of the four axis-aligned motion and sensing directions.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum Direction {
    Up,
    Down,
    Left,
    Right,
}

impl Direction {
    /// All directions in the order measurement records are processed.
    pub const ALL: [Direction; 4] = [
        Direction::Up,
        Direction::Down,
        Direction::Left,
        Direction::Right,
    ];

    /// Unit step in grid coordinates (`y` grows downward).
    pub fn unit_vector(&self) -> Vector2<f64> {
        match self {
            Direction::Up => Vector2::new(0.0, -1.0),
            Direction::Down => Vector2::new(0.0, 1.0),
            Direction::Left => Vector2::new(-1.0, 0.0),
            Direction::Right => Vector2::new(1.0, 0.0),
        }
    }

    /// Position of the direction in [Direction::ALL].
    pub fn index(&self) -> usize {
        match self {
            Direction::Up => 0,
            Direction::Down => 1,
            Direction::Left => 2,
            Direction::Right => 3,
        }
    }

    /// Keyboard key for the direction in the `WASD` layout. Random command sequences are emitted in this form.
    pub fn key(&self) -> char {
        match self {
            Direction::Up => 'W',
            Direction::Down => 'S',
            Direction::Left => 'A',
            Direction::Right => 'D',
        }
    }
}

impl Display for Direction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Direction::Up => "Up",
            Direction::Down => "Down",
            Direction::Left => "Left",
            Direction::Right => "Right",
        };
        write!(f, "{}", name)
    }
}

/// Parses direction (arrow key) names and `WASD` keys, ignoring case.
impl FromStr for Direction {
    type Err = Error;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "up" | "w" => Ok(Direction::Up),
            "down" | "s" => Ok(Direction::Down),
            "left" | "a" => Ok(Direction::Left),
            "right" | "d" => Ok(Direction::Right),
            _ => Err(Error::UnknownDirection(s.to_string())),
        }
    }
}
