//! Error classes and their process exit codes
use std::io;
use std::path::PathBuf;

use thiserror::Error;

pub type Result<T> = std::result::Result<T, HostInfoError>;

/// Every failure the service can hit, startup and per request.
#[derive(Debug, Error)]
pub enum HostInfoError {
    #[error("invalid arguments: {0}")]
    Argument(String),

    #[error("socket creation failed: {0}")]
    SocketCreate(#[source] io::Error),

    #[error("bind to port {port} failed: {source}")]
    Bind { port: u16, source: io::Error },

    #[error("listen failed: {0}")]
    Listen(#[source] io::Error),

    #[error("accept failed: {0}")]
    Accept(#[source] io::Error),

    #[error("{} open error: {source}", .path.display())]
    FileOpen { path: PathBuf, source: io::Error },

    #[error("{} read/close error: {source}", .path.display())]
    FileClose { path: PathBuf, source: io::Error },

    #[error("cannot allocate {0} bytes")]
    Allocation(usize),

    #[error("hostname lookup failed: {0}")]
    HostnameLookup(String),

    #[error("field {label:?} not found in {}", .path.display())]
    FieldNotFound { label: &'static str, path: PathBuf },

    #[error("expected {expected} counters, found {found}")]
    MalformedCounters { expected: usize, found: usize },

    #[error("cpu counters overflow when summed")]
    CounterOverflow,

    #[error("total tick delta is not positive")]
    DivisionUndefined,

    #[error("internal error: {0}")]
    Internal(String),
}

impl HostInfoError {
    /// Process exit code reported when this error terminates the server.
    pub fn exit_code(&self) -> i32 {
        match self {
            HostInfoError::Argument(_) => 1,
            HostInfoError::SocketCreate(_) => 2,
            HostInfoError::Bind { .. } => 3,
            HostInfoError::Listen(_) => 4,
            HostInfoError::Accept(_) => 5,
            HostInfoError::FileOpen { .. } => 6,
            HostInfoError::FileClose { .. } => 7,
            HostInfoError::Allocation(_) => 8,
            HostInfoError::HostnameLookup(_) => 9,
            HostInfoError::FieldNotFound { .. }
            | HostInfoError::MalformedCounters { .. }
            | HostInfoError::CounterOverflow
            | HostInfoError::DivisionUndefined
            | HostInfoError::Internal(_) => 10,
        }
    }
}
