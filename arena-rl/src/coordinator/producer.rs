use std::{
    panic::{self, AssertUnwindSafe},
    sync::Arc,
};

use crossbeam_channel::{select, Receiver, Sender, TryRecvError};
use tracing::{debug, warn};

use super::{snapshot::PolicySnapshot, CompletedRollout, Event};
use crate::{
    data::rollout::collect_rollout,
    environment::EnvFactory,
    module::policy::PolicyLoader,
    rng::RngState,
    Result,
};

/// One rollout loop: reload the policy if a newer snapshot exists, play an
/// episode, hand it off, repeat.
pub(super) struct Producer<L: PolicyLoader> {
    pub index: usize,
    pub episode_length: usize,
    pub env_factory: Arc<EnvFactory>,
    pub loader: Arc<L>,
    pub snapshot: PolicySnapshot,
    pub rng: RngState,
    pub handoff: Sender<Event>,
    pub cancel: Receiver<()>,
}

impl<L: PolicyLoader> Producer<L> {
    /// Runs until cancelled or until the environment or policy fails. A
    /// failure, including a panic, is sent to the consumer as one
    /// [`Event::Failed`].
    pub fn run(self) {
        let index = self.index;
        let handoff = self.handoff.clone();
        let cancel = self.cancel.clone();

        let reason = match panic::catch_unwind(AssertUnwindSafe(|| self.produce())) {
            Ok(Ok(())) => {
                debug!(producer = index, "rollout producer cancelled");
                return;
            }
            Ok(Err(e)) => e.to_string(),
            Err(_) => "producer panicked".to_string(),
        };
        warn!(producer = index, %reason, "rollout producer failed");
        let failed = Event::Failed {
            producer: index,
            reason,
        };
        select! {
            send(handoff, failed) -> _ => {}
            recv(cancel) -> _ => {}
        }
    }

    fn produce(mut self) -> Result<()> {
        let mut env = (self.env_factory)(self.index)?;
        let mut current = None;

        loop {
            if is_cancelled(&self.cancel) {
                return Ok(());
            }

            let version = self.snapshot.version()?;
            let (policy_version, policy) = match current.take() {
                Some((loaded, policy)) if loaded == version => (loaded, policy),
                _ => {
                    let snapshot = self.snapshot.read()?;
                    debug!(producer = self.index, version = snapshot.version, "loading policy snapshot");
                    (snapshot.version, self.loader.load(&snapshot)?)
                }
            };

            let rollout = collect_rollout(&mut env, &policy, self.episode_length, &mut self.rng, || {
                is_cancelled(&self.cancel)
            })?;
            current = Some((policy_version, policy));
            let Some(rollout) = rollout else {
                return Ok(());
            };

            let completed = Event::Completed(CompletedRollout {
                producer: self.index,
                policy_version,
                rollout,
            });
            select! {
                send(self.handoff, completed) -> sent => {
                    if sent.is_err() {
                        return Ok(());
                    }
                }
                recv(self.cancel) -> _ => return Ok(()),
            }
        }
    }
}

fn is_cancelled(cancel: &Receiver<()>) -> bool {
    matches!(cancel.try_recv(), Err(TryRecvError::Disconnected))
}
