//! Error types for the Typedcode proof engine

use thiserror::Error;

/// Core error type for hash-chain and verification operations.
#[derive(Error, Debug)]
pub enum Error {
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Archive error: {0}")]
    Archive(#[from] zip::result::ZipError),

    #[error("human attestation must be the first event in the chain")]
    AttestationMustBeFirst,

    #[error("PoSW computation exceeded its timeout")]
    PoswTimeout,

    #[error("PoSW verification failed for event {0}")]
    PoswVerifyFailed(u64),

    #[error("expected sequence {expected}, found {found}")]
    SequenceMismatch { expected: u64, found: u64 },

    #[error("timestamp went backwards: previous {previous}, current {current}")]
    TimestampViolation { previous: u64, current: u64 },

    #[error("previous-hash link broken at event {0}")]
    PreviousHashMismatch(u64),

    #[error("hash mismatch at event {index}: expected {expected}, computed {computed}")]
    HashMismatch {
        index: u64,
        expected: String,
        computed: String,
    },

    #[error("sampled segment ending at event {0} did not reproduce the expected checkpoint hash")]
    SegmentEndMismatch(u64),

    #[error("unsupported envelope version: {0}")]
    UnsupportedVersion(String),

    #[error("malformed envelope: {0}")]
    MalformedEnvelope(String),

    #[error("missing required field: {0}")]
    MissingField(String),

    #[error("unknown required field: {0}")]
    UnknownRequiredField(String),

    #[error("screenshot hash mismatch for {0}")]
    ScreenshotHashMismatch(String),

    #[error("screenshot missing from archive: {0}")]
    ScreenshotMissing(String),

    #[error("record_event queue is full")]
    QueueFull,

    #[error("the last tab in a bundle cannot be closed")]
    LastTabCannotClose,

    #[error("{0}")]
    Other(String),
}

/// Result alias for proof-engine operations.
pub type Result<T> = std::result::Result<T, Error>;
