use std::path::PathBuf;

use miette::Diagnostic;
use thiserror::Error;

/// Coarse classification of a [`BdsError`], used by callers that want to
/// branch on the failure category rather than the individual variant.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    /// Malformed container, missing metadata, duplicates, version mismatch.
    Structural,
    /// Caller broke a precondition (channel index, location, argument).
    ContractViolation,
    /// The filesystem refused an operation.
    Storage,
    /// A node that had to exist was absent.
    NotFound,
}

#[derive(Debug, Error, Diagnostic)]
pub enum BdsError {
    #[error("data structure error: {0}")]
    DataStructure(String),

    #[error("{0}")]
    MissingMetadata(String),

    #[error("missing mandatory format parameters: {0}")]
    MissingParameters(String),

    #[error("channels with duplicate counters: {0}")]
    DuplicateChannels(String),

    #[error("invalid value for format parameter {name}: {value}")]
    InvalidParameter { name: String, value: String },

    #[error("incompatible data structure version {found}, expected version {expected}")]
    IncompatibleVersion { found: String, expected: String },

    #[error("unknown version {version} of format {code}")]
    UnknownFormatVersion { code: String, version: String },

    #[error("standard node already exists: {0}")]
    DuplicateStandardNode(String),

    #[error("original file not found: {0}")]
    MissingOriginal(String),

    #[error("reference already registered for standard node {0}")]
    DuplicateReference(String),

    #[error("data structure is not open")]
    NotOpen,

    #[error("data structure is opened read-only")]
    ReadOnly,

    #[error("missing config file bds.json in current directory")]
    MissingConfig,

    #[error("failed to read config file at {0}")]
    ConfigRead(PathBuf),

    #[error("failed to parse JSON config: {0}")]
    ConfigParse(String),

    #[error("invalid import pattern: {0}")]
    InvalidPattern(String),

    #[error("channel {channel} is out of range 1..={count}")]
    ChannelOutOfRange { channel: u32, count: usize },

    #[error("{role} location {location} is outside of geometry {geometry}")]
    LocationOutOfGeometry {
        role: &'static str,
        location: String,
        geometry: String,
    },

    #[error("illegal argument: {0}")]
    IllegalArgument(String),

    #[error("storage is not mounted: {0}")]
    NotMounted(String),

    #[error("storage error: {0}")]
    Storage(String),

    #[error("node not found: {0}")]
    NodeNotFound(String),
}

impl BdsError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            BdsError::ChannelOutOfRange { .. }
            | BdsError::LocationOutOfGeometry { .. }
            | BdsError::IllegalArgument(_) => ErrorKind::ContractViolation,
            BdsError::NotMounted(_) | BdsError::Storage(_) => ErrorKind::Storage,
            BdsError::NodeNotFound(_) => ErrorKind::NotFound,
            _ => ErrorKind::Structural,
        }
    }

    /// Per-item failures a batch importer records and skips over.
    pub fn is_recoverable(&self) -> bool {
        matches!(
            self.kind(),
            ErrorKind::Structural | ErrorKind::ContractViolation
        )
    }
}
