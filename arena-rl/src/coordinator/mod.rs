//! Concurrent rollout producers feeding a single consumer.
//!
//! Each producer is an OS thread that owns one environment and a private copy
//! of the policy, and loops over whole episodes. Finished episodes go into one
//! bounded handoff channel and the consumer takes them in completion order.
//! A full channel blocks the producers. Closing the coordinator drops the
//! cancellation sender, which every producer polls once per environment step.

use std::{sync::Arc, thread};

use crossbeam_channel::{Receiver, Sender};
use serde::{Deserialize, Serialize};
use tracing::{info, warn};

use crate::{
    data::rollout::Rollout,
    environment::EnvFactory,
    module::policy::PolicyLoader,
    rng::RngState,
    Error, Result,
};

use self::{producer::Producer, snapshot::PolicySnapshot};

mod producer;
pub mod snapshot;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CoordinatorConfig {
    pub producers: usize,
    pub episode_length: usize,
    #[serde(default = "default_handoff_capacity")]
    pub handoff_capacity: usize,
}

fn default_handoff_capacity() -> usize {
    1
}

impl CoordinatorConfig {
    pub fn new(producers: usize, episode_length: usize) -> Self {
        Self {
            producers,
            episode_length,
            handoff_capacity: default_handoff_capacity(),
        }
    }

    pub fn with_handoff_capacity(mut self, capacity: usize) -> Self {
        self.handoff_capacity = capacity;
        self
    }
}

/// An episode together with where it came from.
#[derive(Debug, Clone)]
pub struct CompletedRollout {
    pub producer: usize,
    /// Snapshot version the whole episode was played under.
    pub policy_version: u64,
    pub rollout: Rollout,
}

pub(crate) enum Event {
    Completed(CompletedRollout),
    Failed { producer: usize, reason: String },
}

pub struct AsyncCoordinator {
    handoff: Receiver<Event>,
    cancel: Option<Sender<()>>,
    producers: Vec<thread::JoinHandle<()>>,
    open: usize,
}

impl AsyncCoordinator {
    /// Start `config.producers` rollout loops.
    ///
    /// A snapshot must already be published; producers load it before their
    /// first episode. Each producer gets its own fork of `rng`.
    pub fn open<L: PolicyLoader>(
        config: &CoordinatorConfig,
        snapshot: PolicySnapshot,
        env_factory: Arc<EnvFactory>,
        loader: Arc<L>,
        rng: &mut RngState,
    ) -> Result<Self> {
        if config.producers == 0 || config.episode_length == 0 || config.handoff_capacity == 0 {
            return Err(Error::Config(format!(
                "producers, episode length and handoff capacity must be positive: {config:?}"
            )));
        }
        let version = snapshot.version()?;

        let (handoff_tx, handoff) = crossbeam_channel::bounded(config.handoff_capacity);
        let (cancel_tx, cancel) = crossbeam_channel::bounded(0);
        let mut coordinator = Self {
            handoff,
            cancel: Some(cancel_tx),
            producers: Vec::with_capacity(config.producers),
            open: 0,
        };

        for index in 0..config.producers {
            let producer = Producer {
                index,
                episode_length: config.episode_length,
                env_factory: env_factory.clone(),
                loader: loader.clone(),
                snapshot: snapshot.clone(),
                rng: rng.fork(),
                handoff: handoff_tx.clone(),
                cancel: cancel.clone(),
            };
            let spawned = thread::Builder::new()
                .name(format!("rollout-producer-{index}"))
                .spawn(move || producer.run());
            match spawned {
                Ok(handle) => {
                    coordinator.producers.push(handle);
                    coordinator.open += 1;
                }
                Err(e) => {
                    coordinator.close();
                    return Err(Error::Spawn {
                        index,
                        reason: e.to_string(),
                    });
                }
            }
        }

        info!(
            producers = config.producers,
            episode_length = config.episode_length,
            capacity = config.handoff_capacity,
            version,
            "rollout coordinator open"
        );
        Ok(coordinator)
    }

    /// Block until any producer finishes an episode.
    ///
    /// A producer failure is returned once, as [`Error::ProducerFailed`];
    /// later calls carry on with the remaining producers. Once none remain
    /// every call returns [`Error::AllProducersExited`].
    pub fn await_rollout(&mut self) -> Result<CompletedRollout> {
        if self.cancel.is_none() {
            return Err(Error::ChannelClosed);
        }
        if self.open == 0 {
            return Err(Error::AllProducersExited);
        }
        match self.handoff.recv() {
            Ok(Event::Completed(completed)) => Ok(completed),
            Ok(Event::Failed { producer, reason }) => {
                self.open -= 1;
                warn!(producer, remaining = self.open, "rollout producer exited");
                Err(Error::ProducerFailed { producer, reason })
            }
            // every sender is gone, so every producer has returned
            Err(_) => {
                self.open = 0;
                Err(Error::AllProducersExited)
            }
        }
    }

    /// Producers that have not been reported as failed.
    pub fn open_producers(&self) -> usize {
        self.open
    }

    /// Finished rollouts waiting in the handoff channel.
    pub fn pending(&self) -> usize {
        self.handoff.len()
    }

    /// Cancel every producer and wait for all of them to exit. Rollouts
    /// still in the channel are discarded. A second call does nothing.
    pub fn close(&mut self) {
        if self.cancel.take().is_none() {
            return;
        }
        let count = self.producers.len();
        for handle in self.producers.drain(..) {
            if handle.join().is_err() {
                warn!("rollout producer thread panicked during shutdown");
            }
        }
        while self.handoff.try_recv().is_ok() {}
        self.open = 0;
        info!(producers = count, "rollout coordinator closed");
    }
}

impl Drop for AsyncCoordinator {
    fn drop(&mut self) {
        self.close();
    }
}
