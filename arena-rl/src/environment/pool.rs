//! A fixed set of environment workers driven in lock step.
//!
//! Each worker owns one environment behind a [`WorkerLink`]. The pool
//! presents the workers as one batched environment: every call fans a command
//! out to all workers before collecting any reply, and replies come back in
//! worker order.

use std::{
    io::BufReader,
    path::PathBuf,
    process::{Child, ChildStdin, ChildStdout, Command as Process, Stdio},
    sync::Arc,
    thread::{self, JoinHandle},
};

use tracing::{debug, info, warn};

use super::{
    remote::{serve, ChannelTransport, Command, JsonLines, Reply, Transport},
    EnvFactory, EnvSpec, Environment, Observation, Space, StepResult,
};
use crate::{Error, Result};

/// Coordinator-side handle on one worker.
pub trait WorkerLink: Send {
    fn send(&mut self, command: Command) -> Result<()>;

    fn recv(&mut self) -> Result<Reply>;

    /// Release the channel and wait for the worker to exit. Calling it again
    /// is a no-op.
    fn join(&mut self) -> Result<()>;

    fn pid(&self) -> Option<u32> {
        None
    }
}

pub trait Launcher {
    fn launch(&self, index: usize) -> Result<Box<dyn WorkerLink>>;
}

/// One step result per worker, in worker order.
pub type BatchedStep = Vec<StepResult>;

/// Launches each worker as a child process speaking JSON lines over its
/// stdin and stdout. The worker index is appended as `--index <i>`.
#[derive(Debug, Clone)]
pub struct ProcessLauncher {
    pub program: PathBuf,
    pub args: Vec<String>,
}

impl ProcessLauncher {
    pub fn new(program: impl Into<PathBuf>, args: Vec<String>) -> Self {
        Self {
            program: program.into(),
            args,
        }
    }

    /// Re-run the current executable as `<exe> worker --spec <json>`.
    pub fn current_exe(spec: &EnvSpec) -> Result<Self> {
        let program = std::env::current_exe()?;
        let spec = serde_json::to_string(spec)?;
        Ok(Self::new(program, vec!["worker".into(), "--spec".into(), spec]))
    }
}

impl Launcher for ProcessLauncher {
    fn launch(&self, index: usize) -> Result<Box<dyn WorkerLink>> {
        let mut child = Process::new(&self.program)
            .args(&self.args)
            .arg("--index")
            .arg(index.to_string())
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::inherit())
            .spawn()
            .map_err(|e| Error::Spawn {
                index,
                reason: e.to_string(),
            })?;

        let (Some(stdin), Some(stdout)) = (child.stdin.take(), child.stdout.take()) else {
            let _ = child.kill();
            let _ = child.wait();
            return Err(Error::Spawn {
                index,
                reason: "child pipes unavailable".into(),
            });
        };
        debug!(index, pid = child.id(), "spawned worker process");
        Ok(Box::new(ProcessLink {
            child,
            transport: Some(JsonLines::new(BufReader::new(stdout), stdin)),
            joined: false,
        }))
    }
}

struct ProcessLink {
    child: Child,
    transport: Option<JsonLines<BufReader<ChildStdout>, ChildStdin>>,
    joined: bool,
}

impl WorkerLink for ProcessLink {
    fn send(&mut self, command: Command) -> Result<()> {
        let transport = self.transport.as_mut().ok_or(Error::ChannelClosed)?;
        Transport::<Command, Reply>::send(transport, command)
    }

    fn recv(&mut self) -> Result<Reply> {
        let transport = self.transport.as_mut().ok_or(Error::ChannelClosed)?;
        Transport::<Command, Reply>::recv(transport)?.ok_or(Error::ChannelClosed)
    }

    fn join(&mut self) -> Result<()> {
        if self.joined {
            return Ok(());
        }
        // closing stdin is the worker's end-of-channel
        self.transport = None;
        let status = self.child.wait()?;
        self.joined = true;
        debug!(pid = self.child.id(), %status, "worker process exited");
        Ok(())
    }

    fn pid(&self) -> Option<u32> {
        Some(self.child.id())
    }
}

impl Drop for ProcessLink {
    fn drop(&mut self) {
        if !self.joined {
            let _ = self.child.kill();
            let _ = self.child.wait();
        }
    }
}

/// Launches each worker as an OS thread. The environment is built inside
/// the thread, so it never crosses execution contexts.
#[derive(Clone)]
pub struct ThreadLauncher {
    factory: Arc<EnvFactory>,
}

impl ThreadLauncher {
    pub fn new<F>(factory: F) -> Self
    where
        F: Fn(usize) -> Result<Box<dyn Environment>> + Send + Sync + 'static,
    {
        Self {
            factory: Arc::new(factory),
        }
    }

    pub fn from_spec(spec: EnvSpec) -> Self {
        Self::new(move |index| spec.build(index))
    }
}

impl Launcher for ThreadLauncher {
    fn launch(&self, index: usize) -> Result<Box<dyn WorkerLink>> {
        let (coordinator, mut worker) = ChannelTransport::<Command, Reply>::pair();
        let (ready_tx, ready_rx) = crossbeam_channel::bounded(1);
        let factory = self.factory.clone();

        let handle = thread::Builder::new()
            .name(format!("env-worker-{index}"))
            .spawn(move || {
                let mut env = match factory(index) {
                    Ok(env) => env,
                    Err(e) => {
                        let _ = ready_tx.send(Err(e.to_string()));
                        return Ok(());
                    }
                };
                let _ = ready_tx.send(Ok(()));
                serve(&mut env, &mut worker)
            })
            .map_err(|e| Error::Spawn {
                index,
                reason: e.to_string(),
            })?;

        match ready_rx.recv() {
            Ok(Ok(())) => Ok(Box::new(ThreadLink {
                transport: Some(coordinator),
                handle: Some(handle),
            })),
            Ok(Err(reason)) => {
                let _ = handle.join();
                Err(Error::Spawn { index, reason })
            }
            Err(_) => {
                let _ = handle.join();
                Err(Error::Spawn {
                    index,
                    reason: "worker thread exited during start-up".into(),
                })
            }
        }
    }
}

struct ThreadLink {
    transport: Option<ChannelTransport<Command, Reply>>,
    handle: Option<JoinHandle<Result<()>>>,
}

impl WorkerLink for ThreadLink {
    fn send(&mut self, command: Command) -> Result<()> {
        let transport = self.transport.as_mut().ok_or(Error::ChannelClosed)?;
        Transport::<Command, Reply>::send(transport, command)
    }

    fn recv(&mut self) -> Result<Reply> {
        let transport = self.transport.as_mut().ok_or(Error::ChannelClosed)?;
        Transport::<Command, Reply>::recv(transport)?.ok_or(Error::ChannelClosed)
    }

    fn join(&mut self) -> Result<()> {
        self.transport = None;
        let Some(handle) = self.handle.take() else {
            return Ok(());
        };
        match handle.join() {
            Ok(Ok(())) => Ok(()),
            // the failure was already reported over the channel
            Ok(Err(e)) => {
                debug!(error = %e, "worker thread exited with an error");
                Ok(())
            }
            Err(_) => Err(Error::Environment("worker thread panicked".into())),
        }
    }
}

impl Drop for ThreadLink {
    fn drop(&mut self) {
        let _ = self.join();
    }
}

/// Lock-step batch of environment workers.
pub struct WorkerPool {
    workers: Vec<Box<dyn WorkerLink>>,
    closed: bool,
}

impl WorkerPool {
    /// Launch `count` workers. If any launch fails, the workers already
    /// running are closed and joined before the error is returned.
    pub fn open<L: Launcher + ?Sized>(launcher: &L, count: usize) -> Result<Self> {
        let mut workers = Vec::with_capacity(count);
        for index in 0..count {
            match launcher.launch(index) {
                Ok(worker) => workers.push(worker),
                Err(e) => {
                    warn!(index, error = %e, "worker launch failed, tearing down pool");
                    if let Err(e) = shutdown(&mut workers) {
                        warn!(error = %e, "error while closing partially opened pool");
                    }
                    return Err(match e {
                        Error::Spawn { .. } => e,
                        other => Error::Spawn {
                            index,
                            reason: other.to_string(),
                        },
                    });
                }
            }
        }
        info!(count, "worker pool open");
        Ok(Self {
            workers,
            closed: false,
        })
    }

    pub fn len(&self) -> usize {
        self.workers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.workers.is_empty()
    }

    pub fn worker_pids(&self) -> Vec<u32> {
        self.workers.iter().filter_map(|w| w.pid()).collect()
    }

    /// Step every worker with its own action batch.
    pub fn step(&mut self, actions: &[Vec<usize>]) -> Result<BatchedStep> {
        if actions.len() != self.workers.len() {
            return Err(Error::ShapeMismatch {
                expected: self.workers.len(),
                actual: actions.len(),
            });
        }
        let commands = actions.iter().map(|a| Command::Step(a.clone())).collect();
        self.round_trip(commands)?
            .into_iter()
            .map(|reply| match reply {
                Reply::Step(result) => Ok(result),
                other => Err(unexpected("step", &other)),
            })
            .collect()
    }

    /// Reset every worker; one observation batch per worker.
    pub fn reset(&mut self) -> Result<Vec<Vec<Observation>>> {
        let commands = vec![Command::Reset; self.workers.len()];
        self.round_trip(commands)?
            .into_iter()
            .map(|reply| match reply {
                Reply::Reset(observations) => Ok(observations),
                other => Err(unexpected("reset", &other)),
            })
            .collect()
    }

    /// Observation space of worker 0; workers are assumed homogeneous.
    pub fn observation_space(&mut self) -> Result<Space> {
        self.query(Command::QueryObservationSpace)
    }

    /// Action space of worker 0; workers are assumed homogeneous.
    pub fn action_space(&mut self) -> Result<Space> {
        self.query(Command::QueryActionSpace)
    }

    /// Send `Close` to every worker, then join every worker. A second call
    /// does nothing.
    pub fn close(&mut self) -> Result<()> {
        if self.closed {
            return Ok(());
        }
        self.closed = true;
        let result = shutdown(&mut self.workers);
        info!(count = self.workers.len(), "worker pool closed");
        result
    }

    fn query(&mut self, command: Command) -> Result<Space> {
        if self.closed {
            return Err(Error::ChannelClosed);
        }
        let worker = self.workers.first_mut().ok_or(Error::ChannelClosed)?;
        worker.send(command)?;
        match worker.recv()? {
            Reply::Space(space) => Ok(space),
            other => Err(unexpected("space query", &other)),
        }
    }

    fn round_trip(&mut self, commands: Vec<Command>) -> Result<Vec<Reply>> {
        if self.closed {
            return Err(Error::ChannelClosed);
        }
        for (worker, command) in self.workers.iter_mut().zip(commands) {
            worker.send(command)?;
        }
        let mut replies = Vec::with_capacity(self.workers.len());
        for (index, worker) in self.workers.iter_mut().enumerate() {
            match worker.recv()? {
                Reply::Failed(reason) => {
                    return Err(Error::Environment(format!("worker {index}: {reason}")))
                }
                reply => replies.push(reply),
            }
        }
        Ok(replies)
    }
}

impl Drop for WorkerPool {
    fn drop(&mut self) {
        if let Err(e) = self.close() {
            warn!(error = %e, "error while closing worker pool");
        }
    }
}

fn shutdown(workers: &mut [Box<dyn WorkerLink>]) -> Result<()> {
    for worker in workers.iter_mut() {
        match worker.send(Command::Close) {
            Err(e) if e.is_disconnect() => debug!("worker already gone before close"),
            Err(e) => warn!(error = %e, "failed to send close to worker"),
            Ok(()) => {}
        }
    }
    let mut result = Ok(());
    for worker in workers.iter_mut() {
        if let Err(e) = worker.join() {
            warn!(error = %e, "failed to join worker");
            if result.is_ok() {
                result = Err(e);
            }
        }
    }
    result
}

fn unexpected(request: &str, reply: &Reply) -> Error {
    Error::Protocol(format!("unexpected reply to {request}: {reply:?}"))
}
