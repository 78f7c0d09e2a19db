use crate::resources::Capacity;
use std::path::PathBuf;
use thiserror::Error;

/// Coarse classification of a [`SandboxError`], used by callers to decide
/// between fixing their input, retrying later, or failing the job.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    Config,
    ResourceExhausted,
    Mount,
    Teardown,
    Io,
}

#[derive(Error, Debug)]
pub enum SandboxError {
    /// Malformed or self-contradictory job descriptor. Raised before any
    /// side effect.
    #[error("invalid job views: {0}")]
    Config(String),

    /// The temp storage ceiling cannot accommodate the request right now.
    #[error(
        "cannot reserve {requested} of temp storage: only {remaining} left out of {ceiling}"
    )]
    ResourceExhausted {
        requested: Capacity,
        remaining: Capacity,
        ceiling: Capacity,
    },

    /// The platform refused to activate or deactivate a mount.
    #[error("failed to {op} {}: {source}", .target.display())]
    Mount {
        op: &'static str,
        target: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// One or more unwind steps failed. Everything else was still released.
    #[error("incomplete teardown: {}", .0.join("; "))]
    Teardown(Vec<String>),

    #[error("{context}: {source}")]
    Io {
        context: String,
        #[source]
        source: std::io::Error,
    },
}

impl SandboxError {
    pub fn config(msg: impl Into<String>) -> Self {
        SandboxError::Config(msg.into())
    }

    pub fn mount(
        op: &'static str,
        target: impl Into<PathBuf>,
        source: impl Into<std::io::Error>,
    ) -> Self {
        SandboxError::Mount {
            op,
            target: target.into(),
            source: source.into(),
        }
    }

    pub fn io(context: impl Into<String>, source: std::io::Error) -> Self {
        SandboxError::Io {
            context: context.into(),
            source,
        }
    }

    pub fn kind(&self) -> ErrorKind {
        match self {
            SandboxError::Config(_) => ErrorKind::Config,
            SandboxError::ResourceExhausted { .. } => {
                ErrorKind::ResourceExhausted
            }
            SandboxError::Mount { .. } => ErrorKind::Mount,
            SandboxError::Teardown(_) => ErrorKind::Teardown,
            SandboxError::Io { .. } => ErrorKind::Io,
        }
    }
}

impl From<nix::errno::Errno> for SandboxError {
    fn from(errno: nix::errno::Errno) -> Self {
        SandboxError::io("system call failed", errno.into())
    }
}
