//! Error taxonomy shared by the loader, the runtime, and the CLI.

use thiserror::Error;

pub type SkeinResult<T> = Result<T, SkeinError>;

/// Scenario-document problems. All of these are detected before any
/// node or service is contacted.
#[derive(Debug, Error)]
pub enum LoadError {
    #[error("malformed task: {0}")]
    MalformedTask(String),

    #[error("unknown action kind {0:?}")]
    UnknownActionKind(String),

    #[error("{kind}: missing parameter `{parameter}`")]
    MissingParameter {
        kind: &'static str,
        parameter: String,
    },

    #[error("{kind}: node index {index} out of range (node count is {count})")]
    NodeIndexOutOfRange {
        kind: &'static str,
        index: usize,
        count: usize,
    },

    #[error("duplicate store_channel_info key {0:?}")]
    DuplicateChannelInfoKey(String),

    #[error("unsupported scenario version {found} (expected {expected})")]
    UnsupportedVersion { found: u32, expected: u32 },

    #[error("scenario: {0}")]
    Invalid(String),
}

#[derive(Debug, Error)]
pub enum SkeinError {
    #[error(transparent)]
    Load(#[from] LoadError),

    #[error("configuration: {0}")]
    Configuration(String),

    #[error("node {node} unreachable: {reason}")]
    NodeUnreachable { node: usize, reason: String },

    #[error("chain query: {0}")]
    ChainQuery(String),

    #[error("service query: {0}")]
    ServiceQuery(String),

    #[error("invalid argument: {0}")]
    InvalidArgument(String),

    #[error(transparent)]
    Io(#[from] std::io::Error),
}

impl SkeinError {
    /// Transient conditions are retried by the polling combinator until its
    /// deadline; everything else aborts the probe immediately.
    pub fn is_transient(&self) -> bool {
        matches!(self, Self::ChainQuery(_) | Self::ServiceQuery(_))
    }
}
