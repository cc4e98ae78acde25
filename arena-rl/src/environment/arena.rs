//! A small multi-agent pellet-eating arena.
//!
//! Agents are cells on a square grid. Each step they move one square per
//! tick; a cell that lands on a pellet eats it (+1 reward, +1 mass) and a
//! cell at least [`EAT_RATIO`] times heavier than another on the same square
//! eats it, gaining its mass as reward. Eaten cells are done for the rest of
//! the episode.

use rand::{rngs::StdRng, Rng, SeedableRng};
use serde::{Deserialize, Serialize};
use tracing::trace;

use super::features::{FeatureExtractor, GridFeatureExtractor};
use super::{Environment, Info, Observation, Space, StepResult};
use crate::{Error, Result};

pub const INITIAL_MASS: f32 = 10.0;
pub const EAT_RATIO: f32 = 1.25;

/// up, down, left, right
pub const NUM_ACTIONS: usize = 4;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ObservationKind {
    /// The whole arena state as a flat vector, own cell first.
    Ram,
    /// Nearest pellets and cells relative to the agent.
    Full,
    /// Single-channel egocentric image of everything in view.
    Screen,
    /// Multi-channel egocentric grid (pellets, own cell, other cells).
    Grid,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ArenaConfig {
    pub arena_size: usize,
    pub num_agents: usize,
    pub num_pellets: usize,
    pub pellet_regen: bool,
    pub ticks_per_step: usize,
    pub observation: ObservationKind,
    /// Arena units covered by an egocentric view.
    pub view_size: usize,
    /// Resolution of an egocentric view.
    pub grid_size: usize,
    pub observe_cells: bool,
    pub observe_others: bool,
    pub num_pellet_features: usize,
    pub num_other_features: usize,
    pub seed: u64,
}

impl Default for ArenaConfig {
    fn default() -> Self {
        Self {
            arena_size: 32,
            num_agents: 4,
            num_pellets: 64,
            pellet_regen: true,
            ticks_per_step: 1,
            observation: ObservationKind::Grid,
            view_size: 11,
            grid_size: 11,
            observe_cells: true,
            observe_others: true,
            num_pellet_features: 8,
            num_other_features: 3,
            seed: 42,
        }
    }
}

impl ArenaConfig {
    fn validate(&self) -> Result<()> {
        if self.arena_size == 0 || self.num_agents == 0 || self.ticks_per_step == 0 {
            return Err(Error::Config(format!(
                "arena needs a positive size, agent count and tick count, got {} / {} / {}",
                self.arena_size, self.num_agents, self.ticks_per_step
            )));
        }
        if self.grid_size == 0 {
            return Err(Error::Config("grid_size must be positive".into()));
        }
        Ok(())
    }
}

#[derive(Debug, Clone, Copy)]
struct Cell {
    x: i64,
    y: i64,
    mass: f32,
    alive: bool,
}

impl Cell {
    fn position(&self) -> (f32, f32) {
        (self.x as f32, self.y as f32)
    }
}

enum Extractor {
    Ram,
    Full(FeatureExtractor),
    Screen(GridFeatureExtractor),
    Grid(GridFeatureExtractor),
}

pub struct Arena {
    config: ArenaConfig,
    rng: StdRng,
    cells: Vec<Cell>,
    pellets: Vec<Option<(i64, i64)>>,
    extractor: Extractor,
}

impl Arena {
    pub fn new(config: ArenaConfig) -> Result<Self> {
        config.validate()?;
        let extractor = match config.observation {
            ObservationKind::Ram => Extractor::Ram,
            ObservationKind::Full => Extractor::Full(FeatureExtractor::new(
                config.num_pellet_features,
                config.num_other_features,
                config.arena_size,
            )),
            ObservationKind::Screen => Extractor::Screen(GridFeatureExtractor::new(
                config.view_size,
                config.grid_size,
                config.arena_size,
                1,
            )),
            ObservationKind::Grid => {
                let depth = 1 + config.observe_cells as usize + config.observe_others as usize;
                Extractor::Grid(GridFeatureExtractor::new(
                    config.view_size,
                    config.grid_size,
                    config.arena_size,
                    depth,
                ))
            }
        };
        let rng = StdRng::seed_from_u64(config.seed);
        let mut arena = Self {
            config,
            rng,
            cells: Vec::new(),
            pellets: Vec::new(),
            extractor,
        };
        arena.populate();
        Ok(arena)
    }

    fn random_square(&mut self) -> (i64, i64) {
        let size = self.config.arena_size as i64;
        (self.rng.gen_range(0..size), self.rng.gen_range(0..size))
    }

    fn populate(&mut self) {
        self.cells = (0..self.config.num_agents)
            .map(|_| {
                let (x, y) = self.random_square();
                Cell {
                    x,
                    y,
                    mass: INITIAL_MASS,
                    alive: true,
                }
            })
            .collect();
        self.pellets = (0..self.config.num_pellets)
            .map(|_| Some(self.random_square()))
            .collect();
    }

    fn observation_size(&self) -> usize {
        match &self.extractor {
            Extractor::Ram => 4 * (self.config.num_agents + 1) + 2 * self.config.num_pellets,
            Extractor::Full(f) => f.size(),
            Extractor::Screen(g) | Extractor::Grid(g) => g.size(),
        }
    }

    fn move_cell(&mut self, agent: usize, action: usize) {
        let last = self.config.arena_size as i64 - 1;
        let cell = &mut self.cells[agent];
        match action {
            0 => cell.y = (cell.y - 1).max(0),
            1 => cell.y = (cell.y + 1).min(last),
            2 => cell.x = (cell.x - 1).max(0),
            _ => cell.x = (cell.x + 1).min(last),
        }
    }

    fn eat_pellets(&mut self, agent: usize, rewards: &mut [f32]) {
        let position = (self.cells[agent].x, self.cells[agent].y);
        for slot in 0..self.pellets.len() {
            if self.pellets[slot] == Some(position) {
                rewards[agent] += 1.0;
                self.cells[agent].mass += 1.0;
                self.pellets[slot] = if self.config.pellet_regen {
                    Some(self.random_square())
                } else {
                    None
                };
            }
        }
    }

    fn resolve_collisions(&mut self, rewards: &mut [f32]) {
        for hunter in 0..self.cells.len() {
            for prey in 0..self.cells.len() {
                if hunter == prey || !self.cells[hunter].alive || !self.cells[prey].alive {
                    continue;
                }
                let (h, p) = (self.cells[hunter], self.cells[prey]);
                if (h.x, h.y) == (p.x, p.y) && h.mass >= EAT_RATIO * p.mass {
                    trace!(hunter, prey, "cell eaten");
                    rewards[hunter] += p.mass;
                    self.cells[hunter].mass += p.mass;
                    self.cells[prey].alive = false;
                }
            }
        }
    }

    fn observe(&self, agent: usize) -> Observation {
        let cell = self.cells[agent];
        if !cell.alive {
            return vec![0.0; self.observation_size()];
        }
        let loc = cell.position();
        let pellets = self.pellets.iter().flatten().map(|&(x, y)| (x as f32, y as f32, 1.0));
        let others = self
            .cells
            .iter()
            .enumerate()
            .filter(|(i, c)| *i != agent && c.alive)
            .map(|(_, c)| (c.x as f32, c.y as f32, c.mass / INITIAL_MASS));

        match &self.extractor {
            Extractor::Ram => self.ram(agent),
            Extractor::Full(extractor) => {
                let pellets: Vec<(f32, f32)> = pellets.map(|(x, y, _)| (x, y)).collect();
                let others: Vec<(f32, f32, f32)> = others.collect();
                extractor.extract((loc.0, loc.1, cell.mass / INITIAL_MASS), &pellets, &others)
            }
            Extractor::Screen(grid) => {
                let mut features = grid.empty();
                let own = std::iter::once((loc.0, loc.1, cell.mass / INITIAL_MASS));
                grid.add_entities(&mut features, 0, loc, pellets.chain(own).chain(others));
                grid.add_out_of_bounds(&mut features, 0, loc);
                features
            }
            Extractor::Grid(grid) => {
                let mut features = grid.empty();
                grid.add_entities(&mut features, 0, loc, pellets);
                grid.add_out_of_bounds(&mut features, 0, loc);
                let mut channel = 1;
                if self.config.observe_cells {
                    grid.add_entities(&mut features, channel, loc, [(loc.0, loc.1, cell.mass / INITIAL_MASS)]);
                    grid.add_out_of_bounds(&mut features, channel, loc);
                    channel += 1;
                }
                if self.config.observe_others {
                    grid.add_entities(&mut features, channel, loc, others);
                    grid.add_out_of_bounds(&mut features, channel, loc);
                }
                features
            }
        }
    }

    fn ram(&self, agent: usize) -> Observation {
        let scale = self.config.arena_size as f32;
        let encode = |c: &Cell| [c.x as f32 / scale, c.y as f32 / scale, c.mass / INITIAL_MASS, c.alive as u8 as f32];
        let mut ram = Vec::with_capacity(self.observation_size());
        ram.extend(encode(&self.cells[agent]));
        for cell in &self.cells {
            ram.extend(encode(cell));
        }
        for pellet in &self.pellets {
            match pellet {
                Some((x, y)) => ram.extend([*x as f32 / scale, *y as f32 / scale]),
                None => ram.extend([-1.0, -1.0]),
            }
        }
        ram
    }

    fn observe_all(&self) -> Vec<Observation> {
        (0..self.cells.len()).map(|agent| self.observe(agent)).collect()
    }
}

impl Environment for Arena {
    fn reset(&mut self) -> Result<Vec<Observation>> {
        self.populate();
        Ok(self.observe_all())
    }

    fn step(&mut self, actions: &[usize]) -> Result<StepResult> {
        if actions.len() != self.cells.len() {
            return Err(Error::ShapeMismatch {
                expected: self.cells.len(),
                actual: actions.len(),
            });
        }
        if let Some(&bad) = actions.iter().find(|&&a| a >= NUM_ACTIONS) {
            return Err(Error::Environment(format!("action {bad} out of range")));
        }

        let mut rewards = vec![0.0; self.cells.len()];
        for _ in 0..self.config.ticks_per_step {
            for (agent, &action) in actions.iter().enumerate() {
                if self.cells[agent].alive {
                    self.move_cell(agent, action);
                    self.eat_pellets(agent, &mut rewards);
                }
            }
            self.resolve_collisions(&mut rewards);
        }

        let mut info = Info::new();
        info.insert("pellets".into(), self.pellets.iter().flatten().count() as f64);
        info.insert(
            "total_mass".into(),
            self.cells.iter().filter(|c| c.alive).map(|c| c.mass as f64).sum(),
        );
        Ok(StepResult {
            observations: self.observe_all(),
            rewards,
            dones: self.cells.iter().map(|c| !c.alive).collect(),
            info,
        })
    }

    fn observation_space(&self) -> Space {
        let shape = match &self.extractor {
            Extractor::Screen(g) | Extractor::Grid(g) => g.shape().to_vec(),
            _ => vec![self.observation_size()],
        };
        Space::Box {
            shape,
            low: f32::NEG_INFINITY,
            high: f32::INFINITY,
        }
    }

    fn action_space(&self) -> Space {
        Space::Discrete { n: NUM_ACTIONS }
    }

    fn num_agents(&self) -> usize {
        self.config.num_agents
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn config(observation: ObservationKind) -> ArenaConfig {
        ArenaConfig {
            arena_size: 8,
            num_agents: 2,
            num_pellets: 4,
            observation,
            view_size: 5,
            grid_size: 5,
            num_pellet_features: 2,
            num_other_features: 1,
            ..Default::default()
        }
    }

    #[test]
    fn test_observation_sizes_match_space() {
        for kind in [
            ObservationKind::Ram,
            ObservationKind::Full,
            ObservationKind::Screen,
            ObservationKind::Grid,
        ] {
            let mut arena = Arena::new(config(kind)).unwrap();
            let size = arena.observation_space().size();
            let observations = arena.reset().unwrap();
            assert_eq!(observations.len(), 2);
            assert!(observations.iter().all(|o| o.len() == size), "{kind:?}");
            let result = arena.step(&[0, 3]).unwrap();
            assert!(result.observations.iter().all(|o| o.len() == size), "{kind:?}");
        }
    }

    #[test]
    fn test_grid_depth_follows_channels() {
        let mut cfg = config(ObservationKind::Grid);
        cfg.observe_others = false;
        let arena = Arena::new(cfg).unwrap();
        assert_eq!(
            arena.observation_space(),
            Space::Box {
                shape: vec![2, 5, 5],
                low: f32::NEG_INFINITY,
                high: f32::INFINITY
            }
        );
    }

    #[test]
    fn test_wrong_action_count() {
        let mut arena = Arena::new(config(ObservationKind::Ram)).unwrap();
        arena.reset().unwrap();
        assert!(matches!(
            arena.step(&[0]),
            Err(Error::ShapeMismatch { expected: 2, actual: 1 })
        ));
        assert!(matches!(arena.step(&[0, 9]), Err(Error::Environment(_))));
    }

    #[test]
    fn test_pellet_is_eaten() {
        let mut arena = Arena::new(config(ObservationKind::Ram)).unwrap();
        arena.reset().unwrap();
        arena.cells[0] = Cell { x: 3, y: 3, mass: INITIAL_MASS, alive: true };
        arena.cells[1] = Cell { x: 0, y: 0, mass: INITIAL_MASS, alive: true };
        arena.pellets = vec![Some((4, 3)), None, None, None];
        arena.config.pellet_regen = false;
        let result = arena.step(&[3, 2]).unwrap();
        assert_eq!(result.rewards[0], 1.0);
        assert_eq!(result.rewards[1], 0.0);
        assert_eq!(arena.pellets.iter().flatten().count(), 0);
        assert_eq!(result.info["pellets"], 0.0);
    }

    #[test]
    fn test_heavier_cell_eats_lighter_one() {
        let mut arena = Arena::new(config(ObservationKind::Full)).unwrap();
        arena.reset().unwrap();
        arena.pellets = vec![None; 4];
        arena.cells[0] = Cell { x: 2, y: 2, mass: 20.0, alive: true };
        arena.cells[1] = Cell { x: 4, y: 2, mass: 10.0, alive: true };
        let result = arena.step(&[3, 2]).unwrap();
        assert_eq!(result.dones, vec![false, true]);
        assert_eq!(result.rewards, vec![10.0, 0.0]);
        // eaten agents observe zeros and no longer move
        assert!(result.observations[1].iter().all(|&v| v == 0.0));
        let result = arena.step(&[0, 0]).unwrap();
        assert_eq!(result.dones, vec![false, true]);
    }

    #[test]
    fn test_equal_cells_do_not_eat() {
        let mut arena = Arena::new(config(ObservationKind::Full)).unwrap();
        arena.reset().unwrap();
        arena.pellets = vec![None; 4];
        arena.cells[0] = Cell { x: 2, y: 2, mass: 10.0, alive: true };
        arena.cells[1] = Cell { x: 4, y: 2, mass: 10.0, alive: true };
        let result = arena.step(&[3, 2]).unwrap();
        assert_eq!(result.dones, vec![false, false]);
    }

    #[test]
    fn test_invalid_config() {
        let cfg = ArenaConfig {
            num_agents: 0,
            ..Default::default()
        };
        assert!(matches!(Arena::new(cfg), Err(Error::Config(_))));
    }
}
