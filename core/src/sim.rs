//! Headless simulation of the grid world and the agent that drives the filter.
//!
//! The [OccupancyGrid] is a square grid with a solid border frame and randomly scattered obstacle cells. The
//! [Robot] moves in exact unit steps, refuses moves into occupied cells and measures the distance from its pose to
//! the nearest obstacle edge along each of the four axes. [Simulation] ties both to a [ParticleFilter] and records a
//! [StepRecord] per command, which can be exported to CSV.
use crate::config::SimulationConfig;
use crate::filter::{ParticleFilter, ParticleSnapshot};
use crate::landmark::LandmarkId;
use crate::measurements::MeasurementRecord;
use crate::{Direction, Error, PositionOracle, Result};

use log::{debug, info, trace, warn};
use nalgebra::Vector2;
use rand::rngs::StdRng;
use rand::seq::index;
use rand::{Rng, SeedableRng};
use serde::{Deserialize, Serialize};
use std::fmt::{self, Display};
use std::path::Path;

/// Square occupancy grid indexed `[y][x]`; `true` marks an obstacle cell.
#[derive(Clone, Debug, PartialEq)]
pub struct OccupancyGrid {
    size: usize,
    cells: Vec<bool>,
}

impl OccupancyGrid {
    /// Grid with only the border frame occupied.
    pub fn empty(size: usize) -> Self {
        let mut grid = OccupancyGrid {
            size,
            cells: vec![false; size * size],
        };
        for i in 0..size {
            grid.set_obstacle(i, 0);
            grid.set_obstacle(i, size - 1);
            grid.set_obstacle(0, i);
            grid.set_obstacle(size - 1, i);
        }
        grid
    }
    /// Grid with the border frame plus `num_obstacles` distinct cells drawn from the whole grid.
    ///
    /// Draws that land on the border add nothing, so the interior may hold fewer than `num_obstacles` obstacles.
    pub fn random<R: Rng + ?Sized>(size: usize, num_obstacles: usize, rng: &mut R) -> Self {
        let mut grid = Self::empty(size);
        let cells = size * size;
        for cell in index::sample(rng, cells, num_obstacles.min(cells)) {
            grid.set_obstacle(cell % size, cell / size);
        }
        grid
    }
    /// Parse rows of `#` (obstacle) and `.` (free). All rows must have the same length as the number of rows.
    pub fn from_rows(rows: &[&str]) -> Result<Self> {
        let size = rows.len();
        let mut cells = Vec::with_capacity(size * size);
        for (y, row) in rows.iter().enumerate() {
            if row.chars().count() != size {
                return Err(Error::InvalidConfig(format!(
                    "row {} has {} cells, expected {}",
                    y,
                    row.chars().count(),
                    size
                )));
            }
            for c in row.chars() {
                match c {
                    '#' => cells.push(true),
                    '.' => cells.push(false),
                    other => {
                        return Err(Error::InvalidConfig(format!(
                            "unexpected cell {:?} in row {}",
                            other, y
                        )));
                    }
                }
            }
        }
        Ok(OccupancyGrid { size, cells })
    }
    pub fn set_obstacle(&mut self, x: usize, y: usize) {
        if x < self.size && y < self.size {
            self.cells[y * self.size + x] = true;
        }
    }
    /// `true` for occupied cells and for any cell outside the grid.
    pub fn is_occupied(&self, x: i64, y: i64) -> bool {
        if x < 0 || y < 0 || x >= self.size as i64 || y >= self.size as i64 {
            return true;
        }
        self.cells[y as usize * self.size + x as usize]
    }
    pub fn obstacle_count(&self) -> usize {
        self.cells.iter().filter(|&&c| c).count()
    }
}

impl PositionOracle for OccupancyGrid {
    fn size(&self) -> usize {
        self.size
    }
    /// Rounds to the nearest cell and checks bounds and occupancy.
    fn is_valid_position(&self, x: f64, y: f64) -> bool {
        if !(x.is_finite() && y.is_finite()) {
            return false;
        }
        !self.is_occupied(x.round() as i64, y.round() as i64)
    }
}

impl Display for OccupancyGrid {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for row in self.cells.chunks(self.size.max(1)) {
            let line: String = row.iter().map(|&c| if c { '#' } else { '.' }).collect();
            writeln!(f, "{}", line)?;
        }
        Ok(())
    }
}

/// The simulated agent. Its pose is the ground truth the filter tries to recover.
#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize)]
pub struct Robot {
    pub x: f64,
    pub y: f64,
}

impl Robot {
    pub fn new(x: f64, y: f64) -> Self {
        Robot { x, y }
    }
    /// Place the agent uniformly at random in the grid interior on a free cell.
    pub fn spawn<R: Rng + ?Sized>(
        grid: &OccupancyGrid,
        max_attempts: usize,
        rng: &mut R,
    ) -> Result<Self> {
        let upper = grid.size().saturating_sub(2) as f64;
        if upper < 1.0 {
            return Err(Error::InvalidConfig(format!(
                "grid of size {} has no interior",
                grid.size()
            )));
        }
        for _ in 0..max_attempts {
            let x = rng.random_range(1.0..=upper);
            let y = rng.random_range(1.0..=upper);
            if grid.is_valid_position(x, y) {
                return Ok(Robot { x, y });
            }
        }
        Err(Error::AgentPlacementExhausted {
            attempts: max_attempts,
        })
    }
    pub fn pose(&self) -> Vector2<f64> {
        Vector2::new(self.x, self.y)
    }
    /// Move exactly one cell in `direction` if the destination is free. Returns whether the move happened.
    pub fn try_move(&mut self, direction: Direction, grid: &OccupancyGrid) -> bool {
        let target = self.pose() + direction.unit_vector();
        if grid.is_valid_position(target.x, target.y) {
            self.x = target.x;
            self.y = target.y;
            true
        } else {
            false
        }
    }
    /// Cast a ray from the agent's cell along each axis and report the distance to the near edge of the first
    /// obstacle cell. Directions where that distance is not positive carry no reading.
    pub fn measure(&self, grid: &OccupancyGrid) -> MeasurementRecord {
        let cell_x = self.x.round() as i64;
        let cell_y = self.y.round() as i64;
        let mut record = MeasurementRecord::new();
        for direction in Direction::ALL {
            let (dx, dy) = match direction {
                Direction::Up => (0, -1),
                Direction::Down => (0, 1),
                Direction::Left => (-1, 0),
                Direction::Right => (1, 0),
            };
            let (mut x, mut y) = (cell_x, cell_y);
            while x >= 0 && y >= 0 && x < grid.size() as i64 && y < grid.size() as i64 {
                if grid.is_occupied(x, y) {
                    let along = match direction {
                        Direction::Up => self.y - y as f64,
                        Direction::Down => y as f64 - self.y,
                        Direction::Left => self.x - x as f64,
                        Direction::Right => x as f64 - self.x,
                    };
                    let distance = along - 0.5;
                    if distance > 0.0 {
                        record = record.with(direction, distance, Some(LandmarkId::new(x, y)));
                    }
                    break;
                }
                x += dx;
                y += dy;
            }
        }
        record
    }
}

/// One row of simulation output.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct StepRecord {
    pub step: usize,
    pub command: String,
    pub moved: bool,
    pub robot_x: f64,
    pub robot_y: f64,
    pub estimate_x: f64,
    pub estimate_y: f64,
    pub position_error: f64,
    pub effective_sample_size: f64,
    pub measured: bool,
    pub observations: usize,
    pub resamples: usize,
}

impl StepRecord {
    pub fn from_csv<P: AsRef<Path>>(path: P) -> Result<Vec<Self>> {
        let mut rdr = csv::Reader::from_path(path)?;
        let mut records = Vec::new();
        for result in rdr.deserialize() {
            let record: Self = result?;
            records.push(record);
        }
        Ok(records)
    }
    pub fn to_csv<P: AsRef<Path>>(records: &[Self], path: P) -> Result<()> {
        let mut writer = csv::Writer::from_path(path)?;
        for record in records {
            writer.serialize(record)?;
        }
        writer.flush()?;
        Ok(())
    }
}

/// Output of [Simulation::run].
#[derive(Clone, Debug, PartialEq)]
pub struct SimulationResult {
    pub records: Vec<StepRecord>,
    pub final_particles: Vec<ParticleSnapshot>,
}

impl SimulationResult {
    pub fn mean_error(&self) -> f64 {
        if self.records.is_empty() {
            return 0.0;
        }
        self.records.iter().map(|r| r.position_error).sum::<f64>() / self.records.len() as f64
    }
    pub fn final_error(&self) -> Option<f64> {
        self.records.last().map(|r| r.position_error)
    }
    pub fn to_csv<P: AsRef<Path>>(&self, path: P) -> Result<()> {
        StepRecord::to_csv(&self.records, path)
    }
    /// Write the final particle snapshot, one row per particle.
    pub fn particles_to_csv<P: AsRef<Path>>(&self, path: P) -> Result<()> {
        let mut writer = csv::Writer::from_path(path)?;
        for particle in &self.final_particles {
            writer.serialize(particle)?;
        }
        writer.flush()?;
        Ok(())
    }
}

/// Grid, agent and filter driven together by a command sequence.
pub struct Simulation {
    config: SimulationConfig,
    grid: OccupancyGrid,
    robot: Robot,
    filter: ParticleFilter,
    rng: StdRng,
    step: usize,
}

impl Simulation {
    /// Build the world and the filter from `config`. All randomness derives from `config.seed`.
    pub fn new(config: SimulationConfig) -> Result<Self> {
        config.validate()?;
        let mut rng = StdRng::seed_from_u64(config.seed);
        let grid = OccupancyGrid::random(config.grid_size, config.num_obstacles, &mut rng);
        let robot = Robot::spawn(&grid, config.filter.max_init_attempts, &mut rng)?;
        Self::with_world(config, grid, robot)
    }
    /// Build a simulation on a known grid and start pose.
    pub fn with_world(config: SimulationConfig, grid: OccupancyGrid, robot: Robot) -> Result<Self> {
        config.validate()?;
        if grid.size() != config.grid_size {
            return Err(Error::InvalidConfig(format!(
                "grid size {} does not match configured size {}",
                grid.size(),
                config.grid_size
            )));
        }
        let seed_pose = config.seed_particles_at_start.then(|| robot.pose());
        let filter = ParticleFilter::initialize(
            &grid,
            config.filter.clone(),
            seed_pose,
            Some(config.seed.wrapping_add(1)),
        )?;
        info!(
            "Simulation on {}x{} grid with {} obstacle cells, agent at ({:.2}, {:.2})",
            grid.size(),
            grid.size(),
            grid.obstacle_count(),
            robot.x,
            robot.y
        );
        Ok(Simulation {
            rng: StdRng::seed_from_u64(config.seed.wrapping_add(2)),
            config,
            grid,
            robot,
            filter,
            step: 0,
        })
    }
    pub fn grid(&self) -> &OccupancyGrid {
        &self.grid
    }
    pub fn robot(&self) -> &Robot {
        &self.robot
    }
    pub fn filter(&self) -> &ParticleFilter {
        &self.filter
    }
    /// Apply one command. The filter only moves when the agent does; unknown commands change nothing.
    pub fn step(&mut self, command: &str) -> StepRecord {
        self.step += 1;
        let moved = match command.parse::<Direction>() {
            Ok(direction) => {
                let moved = self.robot.try_move(direction, &self.grid);
                if moved {
                    self.filter.motion_update(direction);
                } else {
                    debug!("Agent blocked moving {} at step {}", direction, self.step);
                }
                moved
            }
            Err(e) => {
                warn!("Skipping step {}: {}", self.step, e);
                false
            }
        };
        let measure_now = self.config.measure_every > 0 && self.step % self.config.measure_every == 0;
        let (observations, resamples) = if measure_now {
            let record = self.robot.measure(&self.grid);
            debug!("Step {} measurement: {}", self.step, record);
            let report = self.filter.sensor_update(&record);
            (report.directions.len(), report.resample_count())
        } else {
            (0, 0)
        };
        let estimate = self.filter.estimate();
        StepRecord {
            step: self.step,
            command: command.to_string(),
            moved,
            robot_x: self.robot.x,
            robot_y: self.robot.y,
            estimate_x: estimate.mean.x,
            estimate_y: estimate.mean.y,
            position_error: (estimate.mean - self.robot.pose()).norm(),
            effective_sample_size: estimate.effective_sample_size,
            measured: measure_now,
            observations,
            resamples,
        }
    }
    /// Commands to run: the scripted sequence (one per character, truncated to `steps`) or random directions.
    fn commands(&mut self) -> Vec<String> {
        match &self.config.commands {
            Some(script) => script
                .chars()
                .filter(|c| !c.is_whitespace())
                .take(self.config.steps)
                .map(|c| c.to_string())
                .collect(),
            None => (0..self.config.steps)
                .map(|_| Direction::ALL[self.rng.random_range(0..4)].key().to_string())
                .collect(),
        }
    }
    pub fn run(&mut self) -> SimulationResult {
        let commands = self.commands();
        let records: Vec<StepRecord> = commands.iter().map(|c| self.step(c)).collect();
        if let Some(last) = records.last() {
            info!(
                "Finished {} steps: final error {:.3} ({:?}), effective particles {:.1}",
                records.len(),
                last.position_error,
                self.filter.config().averaging,
                last.effective_sample_size
            );
        }
        if let Some(best) = self
            .filter
            .particles()
            .iter()
            .max_by(|a, b| a.weight.total_cmp(&b.weight))
        {
            trace!("Best particle: {}", best);
            for (id, estimate) in best.landmarks.sorted() {
                trace!("  landmark {}: {}", id, estimate);
            }
        }
        SimulationResult {
            records,
            final_particles: self.filter.snapshot(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::FilterConfig;
    use assert_approx_eq::assert_approx_eq;
    use tempfile::tempdir;

    fn room() -> OccupancyGrid {
        OccupancyGrid::from_rows(&[
            "#######", //
            "#.....#", //
            "#.....#", //
            "#..#..#", //
            "#.....#", //
            "#.....#", //
            "#######", //
        ])
        .unwrap()
    }

    #[test]
    fn test_empty_grid_has_border_only() {
        let grid = OccupancyGrid::empty(5);
        assert_eq!(grid.obstacle_count(), 16);
        assert!(grid.is_occupied(0, 2));
        assert!(grid.is_occupied(4, 4));
        assert!(!grid.is_occupied(2, 2));
        assert!(grid.is_occupied(-1, 2));
        assert!(grid.is_occupied(2, 5));
    }

    #[test]
    fn test_random_grid_is_reproducible() {
        let a = OccupancyGrid::random(12, 10, &mut StdRng::seed_from_u64(3));
        let b = OccupancyGrid::random(12, 10, &mut StdRng::seed_from_u64(3));
        assert_eq!(a, b);
        assert!(a.obstacle_count() >= 44);
        assert!(a.obstacle_count() <= 54);
    }

    #[test]
    fn test_from_rows_rejects_bad_input() {
        assert!(OccupancyGrid::from_rows(&["##", "#"]).is_err());
        assert!(OccupancyGrid::from_rows(&["#x", "##"]).is_err());
        let grid = room();
        assert_eq!(grid.to_string().lines().nth(3), Some("#..#..#"));
    }

    #[test]
    fn test_position_validity_rounds_to_cells() {
        let grid = room();
        assert!(grid.is_valid_position(1.0, 1.0));
        assert!(grid.is_valid_position(2.4, 2.6));
        assert!(!grid.is_valid_position(2.6, 3.0));
        assert!(!grid.is_valid_position(0.4, 3.0));
        assert!(!grid.is_valid_position(-3.0, 3.0));
        assert!(!grid.is_valid_position(f64::NAN, 3.0));
    }

    #[test]
    fn test_robot_moves_and_blocks() {
        let grid = room();
        let mut robot = Robot::new(2.0, 3.0);
        assert!(!robot.try_move(Direction::Right, &grid));
        assert_eq!(robot.pose(), Vector2::new(2.0, 3.0));
        assert!(robot.try_move(Direction::Up, &grid));
        assert_eq!(robot.pose(), Vector2::new(2.0, 2.0));
        assert!(robot.try_move(Direction::Right, &grid));
        assert_eq!(robot.pose(), Vector2::new(3.0, 2.0));
    }

    #[test]
    fn test_robot_measures_edges() {
        let grid = room();
        let robot = Robot::new(3.0, 5.0);
        let record = robot.measure(&grid);
        let up = record.get(Direction::Up);
        // Obstacle at (3, 3): edge is 2 - 0.5 cells away
        assert_approx_eq!(up.distance, 1.5, 1e-12);
        assert_eq!(up.obstacle, Some(LandmarkId::new(3, 3)));
        // Border directly below: distance 0.5
        let down = record.get(Direction::Down);
        assert_approx_eq!(down.distance, 0.5, 1e-12);
        assert_eq!(down.obstacle, Some(LandmarkId::new(3, 6)));
        assert_eq!(record.get(Direction::Left).obstacle, Some(LandmarkId::new(0, 5)));
        assert_approx_eq!(record.get(Direction::Left).distance, 2.5, 1e-12);
        assert_eq!(record.get(Direction::Right).obstacle, Some(LandmarkId::new(6, 5)));
    }

    #[test]
    fn test_measurement_uses_continuous_pose() {
        let grid = room();
        let robot = Robot::new(1.3, 1.0);
        let record = robot.measure(&grid);
        assert_approx_eq!(record.get(Direction::Left).distance, 0.8, 1e-12);
        assert_approx_eq!(record.get(Direction::Right).distance, 4.2, 1e-12);
    }

    #[test]
    fn test_spawn_lands_on_free_cell() {
        let grid = room();
        let mut rng = StdRng::seed_from_u64(4);
        for _ in 0..50 {
            let robot = Robot::spawn(&grid, 1000, &mut rng).unwrap();
            assert!(grid.is_valid_position(robot.x, robot.y));
        }
        let full = OccupancyGrid::from_rows(&["###", "###", "###"]).unwrap();
        assert!(matches!(
            Robot::spawn(&full, 10, &mut rng),
            Err(Error::AgentPlacementExhausted { attempts: 10 })
        ));
    }

    fn sim_config(commands: Option<&str>) -> SimulationConfig {
        SimulationConfig {
            grid_size: 7,
            num_obstacles: 0,
            steps: 12,
            measure_every: 2,
            seed: 10,
            commands: commands.map(str::to_string),
            seed_particles_at_start: true,
            filter: FilterConfig {
                num_particles: 20,
                ..FilterConfig::default()
            },
        }
    }

    #[test]
    fn test_scripted_run_follows_commands() {
        let mut sim =
            Simulation::with_world(sim_config(Some("WWD?SS")), room(), Robot::new(2.0, 3.0))
                .unwrap();
        let result = sim.run();
        assert_eq!(result.records.len(), 6);
        assert_eq!(result.records[3].command, "?");
        assert!(!result.records[3].moved);
        assert!(result.records[1].measured);
        assert!(!result.records[0].measured);
        assert_eq!(sim.robot().pose(), Vector2::new(3.0, 2.0));
        assert_eq!(result.final_particles.len(), 20);
        assert!(result.final_particles.iter().all(|p| p.weight >= 0.0));
    }

    #[test]
    fn test_random_run_is_reproducible() {
        let a = Simulation::new(sim_config(None)).unwrap().run();
        let b = Simulation::new(sim_config(None)).unwrap().run();
        assert_eq!(a, b);
        assert_eq!(a.records.len(), 12);
    }

    #[test]
    fn test_random_commands_are_wasd_keys() {
        let result = Simulation::new(sim_config(None)).unwrap().run();
        for record in &result.records {
            assert_eq!(record.command.len(), 1);
            assert!("WASD".contains(record.command.as_str()));
            assert!(record.command.parse::<Direction>().is_ok());
        }
    }

    #[test]
    fn test_world_size_mismatch_is_rejected() {
        let config = SimulationConfig {
            grid_size: 9,
            ..sim_config(None)
        };
        assert!(matches!(
            Simulation::with_world(config, room(), Robot::new(2.0, 2.0)),
            Err(Error::InvalidConfig(_))
        ));
    }

    #[test]
    fn test_csv_export_roundtrip() {
        let dir = tempdir().unwrap();
        let mut sim =
            Simulation::with_world(sim_config(Some("WDSA")), room(), Robot::new(2.0, 2.0))
                .unwrap();
        let result = sim.run();
        let path = dir.path().join("steps.csv");
        result.to_csv(&path).unwrap();
        let loaded = StepRecord::from_csv(&path).unwrap();
        assert_eq!(loaded.len(), 4);
        assert_eq!(loaded[0].command, "W");
        assert_eq!(loaded[2].step, 3);

        let particles = dir.path().join("particles.csv");
        result.particles_to_csv(&particles).unwrap();
        let mut rdr = csv::Reader::from_path(&particles).unwrap();
        let rows: Vec<ParticleSnapshot> = rdr.deserialize().map(|r| r.unwrap()).collect();
        assert_eq!(rows.len(), 20);
    }
}
