//! Training hyper-parameters with per-environment presets.
//!
//! Each algorithm has a plain serialisable struct and an `...Override`
//! twin whose fields are all optional. Command-line options are collected
//! into the override and merged over the chosen preset.

use std::{
    fs,
    path::{Path, PathBuf},
};

use arena_rl::{
    environment::{
        arena::{ArenaConfig, ObservationKind},
        EnvSpec,
    },
    Result,
};
use clap::ValueEnum;
use serde::{Deserialize, Serialize};

pub const FILE_NAME: &str = "hp.json";

/// Environments selectable from the command line.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, ValueEnum)]
#[serde(rename_all = "snake_case")]
pub enum EnvKind {
    Ram,
    Full,
    Screen,
    Grid,
    #[value(name = "cartpole")]
    #[serde(rename = "cartpole")]
    CartPole,
}

impl EnvKind {
    fn observation(self) -> Option<ObservationKind> {
        match self {
            EnvKind::Ram => Some(ObservationKind::Ram),
            EnvKind::Full => Some(ObservationKind::Full),
            EnvKind::Screen => Some(ObservationKind::Screen),
            EnvKind::Grid => Some(ObservationKind::Grid),
            EnvKind::CartPole => None,
        }
    }
}

/// Overwrite each field of `$target` for which `$source` holds `Some`.
macro_rules! merge {
    ($target:expr, $source:expr, $($field:ident),+ $(,)?) => {
        $(
            if let Some(value) = $source.$field.clone() {
                $target.$field = value;
            }
        )+
    };
}

fn save_json<T: Serialize>(value: &T, training_dir: &Path) -> Result<PathBuf> {
    let path = training_dir.join(FILE_NAME);
    fs::write(&path, serde_json::to_string_pretty(value)?)?;
    Ok(path)
}

fn restore_json<T: for<'de> Deserialize<'de>>(path: &Path) -> Result<T> {
    Ok(serde_json::from_str(&fs::read_to_string(path)?)?)
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct A2cHyperParameters {
    pub env: EnvKind,
    pub seed: u64,
    /// Workers in batched mode, producers in asynchronous mode.
    pub num_envs: usize,
    pub num_episodes: usize,
    pub episode_length: usize,
    pub learning_rate: f64,
    pub gamma: f32,
    pub entropy_weight: f64,
    pub value_weight: f64,
    pub grad_clip_norm: f32,
    pub hidden_sizes: Vec<usize>,
    /// Finished episodes that may wait for the trainer before producers block.
    pub handoff_capacity: usize,
    /// Arena settings; unused for cartpole.
    pub arena: ArenaConfig,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct A2cOverride {
    pub seed: Option<u64>,
    pub num_envs: Option<usize>,
    pub num_episodes: Option<usize>,
    pub episode_length: Option<usize>,
    pub learning_rate: Option<f64>,
    pub gamma: Option<f32>,
    pub entropy_weight: Option<f64>,
    pub hidden_sizes: Option<Vec<usize>>,
}

impl A2cHyperParameters {
    pub fn preset(env: EnvKind) -> Self {
        let base = Self {
            env,
            seed: 42,
            num_envs: 4,
            num_episodes: 128,
            episode_length: 1024,
            learning_rate: 0.001,
            gamma: 0.99,
            entropy_weight: 1e-4,
            value_weight: 0.5,
            grad_clip_norm: 1.0,
            hidden_sizes: vec![64, 64],
            handoff_capacity: 1,
            arena: ArenaConfig {
                ticks_per_step: 4,
                ..Default::default()
            },
        };
        match env {
            EnvKind::Grid => Self {
                gamma: 0.95,
                arena: ArenaConfig {
                    observation: ObservationKind::Grid,
                    grid_size: 16,
                    view_size: 16,
                    ..base.arena
                },
                ..base
            },
            EnvKind::Screen => Self {
                hidden_sizes: vec![128, 64],
                arena: ArenaConfig {
                    observation: ObservationKind::Screen,
                    grid_size: 32,
                    view_size: 32,
                    ..base.arena
                },
                ..base
            },
            EnvKind::Full => Self {
                episode_length: 500,
                arena: ArenaConfig {
                    observation: ObservationKind::Full,
                    ..base.arena
                },
                ..base
            },
            EnvKind::Ram => Self {
                episode_length: 500,
                hidden_sizes: vec![128, 128],
                arena: ArenaConfig {
                    observation: ObservationKind::Ram,
                    ..base.arena
                },
                ..base
            },
            EnvKind::CartPole => Self {
                num_envs: 8,
                learning_rate: 0.005,
                episode_length: 500,
                hidden_sizes: vec![32, 32],
                ..base
            },
        }
    }

    pub fn override_with(&mut self, source: &A2cOverride) {
        merge!(
            self,
            source,
            seed,
            num_envs,
            num_episodes,
            episode_length,
            learning_rate,
            gamma,
            entropy_weight,
            hidden_sizes,
        );
    }

    /// The environment this run trains on, seeded from the run seed.
    pub fn env_spec(&self) -> EnvSpec {
        env_spec(self.env, &self.arena, self.seed)
    }

    /// Write `<training_dir>/hp.json`.
    pub fn save(&self, training_dir: &Path) -> Result<PathBuf> {
        save_json(self, training_dir)
    }

    pub fn restore(path: &Path) -> Result<Self> {
        restore_json(path)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DqnHyperParameters {
    pub env: EnvKind,
    pub seed: u64,
    pub num_episodes: usize,
    pub episode_length: usize,
    pub gamma: f64,
    pub dropout: f64,
    pub hidden_sizes: Vec<usize>,
    pub double_dqn: bool,
    pub dueling_dqn: bool,
    pub batch_size: usize,
    pub replay_memory_capacity: usize,
    /// Environment steps between gradient updates.
    pub learn_freq: u64,
    /// Gradient updates between target network syncs.
    pub target_update_freq: u64,
    pub epsilon_base: f64,
    pub epsilon_end: f64,
    pub epsilon_decay: f64,
    pub learning_rate: f64,
    pub grad_clip_norm: f32,
    pub arena: ArenaConfig,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct DqnOverride {
    pub seed: Option<u64>,
    pub num_episodes: Option<usize>,
    pub episode_length: Option<usize>,
    pub learning_rate: Option<f64>,
    pub batch_size: Option<usize>,
    pub hidden_sizes: Option<Vec<usize>>,
}

impl DqnHyperParameters {
    pub fn preset(env: EnvKind) -> Self {
        let base = Self {
            env,
            seed: 42,
            num_episodes: 10_000,
            episode_length: 100,
            gamma: 0.99,
            dropout: 0.05,
            hidden_sizes: vec![16, 16],
            double_dqn: true,
            dueling_dqn: true,
            batch_size: 32,
            replay_memory_capacity: 500,
            learn_freq: 16,
            target_update_freq: 128,
            epsilon_base: 0.25,
            epsilon_end: 0.0,
            epsilon_decay: std::f64::consts::LN_2 / 500.0,
            learning_rate: 0.001,
            grad_clip_norm: 1.0,
            arena: ArenaConfig {
                arena_size: 10,
                num_agents: 1,
                num_pellets: 1,
                ticks_per_step: 4,
                num_pellet_features: 1,
                num_other_features: 0,
                ..Default::default()
            },
        };
        match env {
            EnvKind::Full => Self {
                arena: ArenaConfig {
                    observation: ObservationKind::Full,
                    ..base.arena
                },
                ..base
            },
            EnvKind::Ram => Self {
                arena: ArenaConfig {
                    observation: ObservationKind::Ram,
                    ..base.arena
                },
                ..base
            },
            EnvKind::Screen | EnvKind::Grid => Self {
                hidden_sizes: vec![64, 32],
                arena: ArenaConfig {
                    observation: if env == EnvKind::Screen {
                        ObservationKind::Screen
                    } else {
                        ObservationKind::Grid
                    },
                    grid_size: 9,
                    view_size: 9,
                    ..base.arena
                },
                ..base
            },
            EnvKind::CartPole => Self {
                num_episodes: 200,
                episode_length: 500,
                dropout: 0.0,
                hidden_sizes: vec![32, 32],
                replay_memory_capacity: 10_000,
                learn_freq: 1,
                target_update_freq: 100,
                epsilon_base: 1.0,
                epsilon_end: 0.05,
                ..base
            },
        }
    }

    pub fn override_with(&mut self, source: &DqnOverride) {
        merge!(
            self,
            source,
            seed,
            num_episodes,
            episode_length,
            learning_rate,
            batch_size,
            hidden_sizes,
        );
    }

    pub fn env_spec(&self) -> EnvSpec {
        env_spec(self.env, &self.arena, self.seed)
    }

    pub fn save(&self, training_dir: &Path) -> Result<PathBuf> {
        save_json(self, training_dir)
    }

    pub fn restore(path: &Path) -> Result<Self> {
        restore_json(path)
    }
}

fn env_spec(env: EnvKind, arena: &ArenaConfig, seed: u64) -> EnvSpec {
    match env.observation() {
        Some(observation) => EnvSpec::Arena(ArenaConfig {
            observation,
            seed,
            ..arena.clone()
        }),
        None => EnvSpec::CartPole { seed },
    }
}
