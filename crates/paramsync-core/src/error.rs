//! Error types shared by the trainer and agent nodes

use std::path::PathBuf;

use thiserror::Error;

/// Failure of a pull or push call on the coordination transport.
///
/// A failed `push` has an unknown outcome: the server may or may not have
/// applied the gradient.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum TransportError {
    /// The call did not complete within the configured timeout
    #[error("{operation} timed out after {millis} ms")]
    Timeout {
        /// Operation name (`pull` or `push`)
        operation: &'static str,
        /// Timeout that elapsed
        millis: u64,
    },

    /// The connection to the parameter server failed
    #[error("connection error: {0}")]
    Connection(String),

    /// The peer sent bytes that could not be decoded
    #[error("protocol error: {0}")]
    Protocol(String),

    /// The server received the call and refused it
    #[error("rejected by parameter server: {0}")]
    Rejected(String),
}

impl TransportError {
    /// Whether the server definitely did not apply the call.
    ///
    /// Only rejections carry a known outcome; everything else may or may not
    /// have reached the server.
    #[must_use]
    pub fn is_rejection(&self) -> bool {
        matches!(self, Self::Rejected(_))
    }
}

/// Sampling asked for more transitions than the replay memory holds.
#[derive(Error, Debug, Clone, Copy, PartialEq, Eq)]
#[error("insufficient data: requested {requested} transitions, {available} available")]
pub struct InsufficientDataError {
    /// Requested minibatch size
    pub requested: usize,
    /// Transitions currently stored
    pub available: usize,
}

/// Durable checkpoint storage failed.
#[derive(Error, Debug)]
pub enum CheckpointIoError {
    /// Filesystem failure
    #[error("checkpoint io error at {path}: {source}")]
    Io {
        /// Path being read or written
        path: PathBuf,
        /// Underlying error
        #[source]
        source: std::io::Error,
    },

    /// Artifact or pointer could not be encoded or decoded
    #[error("checkpoint encoding error at {path}: {message}")]
    Encoding {
        /// Path being read or written
        path: PathBuf,
        /// Description of the failure
        message: String,
    },

    /// The artifact belongs to a different job
    #[error("checkpoint {path} belongs to job {found}, expected {expected}")]
    JobMismatch {
        /// Artifact path
        path: PathBuf,
        /// Job that was asked for
        expected: uuid::Uuid,
        /// Job recorded in the artifact
        found: uuid::Uuid,
    },
}

impl CheckpointIoError {
    /// Wrap an io error with the path it happened on
    pub fn io(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        Self::Io {
            path: path.into(),
            source,
        }
    }

    /// Wrap an encoding failure with the path it happened on
    pub fn encoding(path: impl Into<PathBuf>, message: impl ToString) -> Self {
        Self::Encoding {
            path: path.into(),
            message: message.to_string(),
        }
    }
}

/// The opaque compute function failed on its input.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum ComputeError {
    /// The observation did not have the shape the model expects
    #[error("malformed observation: expected {expected} features, got {actual}")]
    MalformedObservation {
        /// Expected feature count
        expected: usize,
        /// Received feature count
        actual: usize,
    },

    /// The weight blob could not be interpreted by the model
    #[error("malformed weights: {0}")]
    MalformedWeights(String),

    /// The computation produced non-finite values
    #[error("numerical failure: {0}")]
    Numerical(String),

    /// Any other backend failure
    #[error("compute backend error: {0}")]
    Backend(String),
}

/// The server could not merge a gradient into the current weights.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ApplyError {
    /// Gradient and weights describe different parameter counts
    #[error("gradient has {gradient} bytes but weights have {weights} bytes")]
    LengthMismatch {
        /// Weight blob length
        weights: usize,
        /// Gradient blob length
        gradient: usize,
    },

    /// Blob length is not a whole number of parameters
    #[error("blob of {len} bytes is not a multiple of {width}")]
    Misaligned {
        /// Blob length
        len: usize,
        /// Parameter width in bytes
        width: usize,
    },
}

/// Invalid node configuration.
#[derive(Error, Debug)]
pub enum ConfigError {
    /// A value is outside its allowed range
    #[error("invalid value for {field}: {reason}")]
    Invalid {
        /// Field name as the launcher spells it
        field: &'static str,
        /// What is wrong with it
        reason: String,
    },

    /// A required value is missing
    #[error("missing required value: {0}")]
    Missing(&'static str),

    /// The configuration file could not be read
    #[error("cannot read config file {path}: {source}")]
    Read {
        /// File path
        path: PathBuf,
        /// Underlying error
        #[source]
        source: std::io::Error,
    },

    /// The configuration file could not be parsed
    #[error("cannot parse config file {path}: {source}")]
    Parse {
        /// File path
        path: PathBuf,
        /// Underlying error
        #[source]
        source: toml::de::Error,
    },
}

impl ConfigError {
    pub(crate) fn invalid(field: &'static str, reason: impl ToString) -> Self {
        Self::Invalid {
            field,
            reason: reason.to_string(),
        }
    }
}

/// Umbrella error for paramsync operations
#[derive(Error, Debug)]
pub enum Error {
    /// Transport failure
    #[error(transparent)]
    Transport(#[from] TransportError),

    /// Not enough replay data
    #[error(transparent)]
    InsufficientData(#[from] InsufficientDataError),

    /// Checkpoint storage failure
    #[error(transparent)]
    CheckpointIo(#[from] CheckpointIoError),

    /// Compute function failure
    #[error(transparent)]
    Compute(#[from] ComputeError),

    /// Gradient application failure
    #[error(transparent)]
    Apply(#[from] ApplyError),

    /// Configuration failure
    #[error(transparent)]
    Config(#[from] ConfigError),

    /// Environment failure
    #[error("environment error: {0}")]
    Environment(String),

    /// IO error
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// Other errors
    #[error("{0}")]
    Other(#[from] anyhow::Error),
}

/// Result type alias for paramsync operations
pub type Result<T> = std::result::Result<T, Error>;
