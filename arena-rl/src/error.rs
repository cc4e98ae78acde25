use std::io;

/// Errors raised by environments, workers, the rollout coordinator and the
/// snapshot store.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    /// A worker received something that is not a valid command, or the
    /// coordinator received a reply it did not ask for.
    #[error("protocol error: {0}")]
    Protocol(String),

    #[error("failed to spawn worker {index}: {reason}")]
    Spawn { index: usize, reason: String },

    /// One rollout producer stopped because its environment failed. The
    /// remaining producers keep running.
    #[error("rollout producer {producer} failed: {reason}")]
    ProducerFailed { producer: usize, reason: String },

    #[error("all rollout producers have exited")]
    AllProducersExited,

    /// The other end of a channel went away.
    #[error("channel closed")]
    ChannelClosed,

    #[error("environment error: {0}")]
    Environment(String),

    #[error("shape mismatch: expected {expected} entries, got {actual}")]
    ShapeMismatch { expected: usize, actual: usize },

    #[error("invalid policy snapshot: {0}")]
    Snapshot(String),

    #[error("recorder error: {0}")]
    Recorder(String),

    /// Tensor data could not be read back into host memory.
    #[error("tensor error: {0}")]
    Tensor(String),

    #[error("configuration error: {0}")]
    Config(String),

    #[error(transparent)]
    Io(#[from] io::Error),

    #[error(transparent)]
    Json(#[from] serde_json::Error),
}

impl Error {
    /// True for the errors that mean "the peer is gone" rather than "the
    /// peer misbehaved".
    pub fn is_disconnect(&self) -> bool {
        match self {
            Error::ChannelClosed => true,
            Error::Io(e) => matches!(
                e.kind(),
                io::ErrorKind::BrokenPipe
                    | io::ErrorKind::UnexpectedEof
                    | io::ErrorKind::ConnectionReset
            ),
            _ => false,
        }
    }
}

pub type Result<T> = std::result::Result<T, Error>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_disconnect_classification() {
        assert!(Error::ChannelClosed.is_disconnect());
        assert!(Error::Io(io::Error::from(io::ErrorKind::BrokenPipe)).is_disconnect());
        assert!(!Error::Protocol("bad".into()).is_disconnect());
        assert!(!Error::AllProducersExited.is_disconnect());
    }

    #[test]
    fn test_error_messages() {
        let err = Error::ProducerFailed {
            producer: 3,
            reason: "boom".into(),
        };
        assert_eq!(err.to_string(), "rollout producer 3 failed: boom");
        let err = Error::Spawn {
            index: 1,
            reason: "no such file".into(),
        };
        assert_eq!(err.to_string(), "failed to spawn worker 1: no such file");
    }
}
