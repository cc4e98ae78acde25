//! Worker side of the environment command protocol.
//!
//! A worker owns one environment and answers exactly one [`Reply`] per
//! [`Command`]; there is no pipelining. Two transports carry the messages:
//! newline-delimited JSON over a byte stream (a child process's stdin and
//! stdout) and a pair of bounded channels (a worker thread).

use std::io::{self, BufRead, Write};

use crossbeam_channel::{Receiver, Sender};
use serde::{de::DeserializeOwned, Deserialize, Serialize};
use tracing::{debug, warn};

use super::{Environment, Observation, Space, StepResult};
use crate::{Error, Result};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "command", content = "data", rename_all = "snake_case")]
pub enum Command {
    Step(Vec<usize>),
    Reset,
    Close,
    QueryObservationSpace,
    QueryActionSpace,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "reply", content = "data", rename_all = "snake_case")]
pub enum Reply {
    Step(StepResult),
    Reset(Vec<Observation>),
    Space(Space),
    /// The environment raised; the worker exits after sending this.
    Failed(String),
}

/// One end of a full-duplex message channel.
pub trait Transport<S, R> {
    fn send(&mut self, message: S) -> Result<()>;

    /// `Ok(None)` means the other end closed the channel.
    fn recv(&mut self) -> Result<Option<R>>;
}

/// Newline-delimited JSON over a byte stream.
pub struct JsonLines<R, W> {
    reader: R,
    writer: W,
    line: String,
}

impl<R: BufRead, W: Write> JsonLines<R, W> {
    pub fn new(reader: R, writer: W) -> Self {
        Self {
            reader,
            writer,
            line: String::new(),
        }
    }

    pub fn into_inner(self) -> (R, W) {
        (self.reader, self.writer)
    }
}

impl JsonLines<io::StdinLock<'static>, io::StdoutLock<'static>> {
    /// The transport a worker process speaks to its parent over.
    pub fn stdio() -> Self {
        Self::new(io::stdin().lock(), io::stdout().lock())
    }
}

impl<S, R, In, Out> Transport<S, R> for JsonLines<In, Out>
where
    S: Serialize,
    R: DeserializeOwned,
    In: BufRead,
    Out: Write,
{
    fn send(&mut self, message: S) -> Result<()> {
        serde_json::to_writer(&mut self.writer, &message)?;
        self.writer.write_all(b"\n")?;
        self.writer.flush()?;
        Ok(())
    }

    fn recv(&mut self) -> Result<Option<R>> {
        self.line.clear();
        if self.reader.read_line(&mut self.line)? == 0 {
            return Ok(None);
        }
        serde_json::from_str(self.line.trim_end())
            .map(Some)
            .map_err(|e| Error::Protocol(format!("malformed message {:?}: {e}", self.line.trim_end())))
    }
}

/// A pair of bounded channels, one per direction.
pub struct ChannelTransport<S, R> {
    tx: Sender<S>,
    rx: Receiver<R>,
}

impl<S, R> ChannelTransport<S, R> {
    pub fn new(tx: Sender<S>, rx: Receiver<R>) -> Self {
        Self { tx, rx }
    }

    /// Two connected ends with room for one message in each direction.
    pub fn pair() -> (ChannelTransport<S, R>, ChannelTransport<R, S>) {
        let (s_tx, s_rx) = crossbeam_channel::bounded(1);
        let (r_tx, r_rx) = crossbeam_channel::bounded(1);
        (ChannelTransport::new(s_tx, r_rx), ChannelTransport::new(r_tx, s_rx))
    }
}

impl<S, R> Transport<S, R> for ChannelTransport<S, R> {
    fn send(&mut self, message: S) -> Result<()> {
        self.tx.send(message).map_err(|_| Error::ChannelClosed)
    }

    fn recv(&mut self) -> Result<Option<R>> {
        Ok(self.rx.recv().ok())
    }
}

/// Run the worker command loop until `Close`, end of channel, or an error.
///
/// End of channel and a reply the coordinator can no longer receive are
/// clean shutdowns. An unparseable command is a [`Error::Protocol`] and ends
/// the worker; so does an environment failure, which is reported to the peer
/// first.
pub fn serve<E, T>(env: &mut E, transport: &mut T) -> Result<()>
where
    E: Environment + ?Sized,
    T: Transport<Reply, Command>,
{
    loop {
        let command = match transport.recv() {
            Ok(Some(command)) => command,
            Ok(None) => {
                debug!("command channel closed, worker exiting");
                return Ok(());
            }
            Err(e) => {
                warn!(error = %e, "worker received an invalid command");
                return Err(e);
            }
        };

        let reply = match command {
            Command::Step(actions) => env.step(&actions).map(Reply::Step),
            Command::Reset => env.reset().map(Reply::Reset),
            Command::Close => {
                debug!("close requested, worker exiting");
                return Ok(());
            }
            Command::QueryObservationSpace => Ok(Reply::Space(env.observation_space())),
            Command::QueryActionSpace => Ok(Reply::Space(env.action_space())),
        };

        match reply {
            Ok(reply) => match transport.send(reply) {
                Err(e) if e.is_disconnect() => {
                    debug!("coordinator went away, worker exiting");
                    return Ok(());
                }
                sent => sent?,
            },
            Err(e) => {
                let _ = transport.send(Reply::Failed(e.to_string()));
                return Err(e);
            }
        }
    }
}
