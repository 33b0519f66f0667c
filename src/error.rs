//! Error types for splitload

use thiserror::Error;

/// Result type alias for splitload operations
pub type Result<T> = std::result::Result<T, Error>;

/// splitload error types
#[derive(Error, Debug)]
pub enum Error {
    /// IO errors (file not found, permission denied, etc.)
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// Candle errors (container parsing, metadata value conversion)
    #[error("Candle error: {0}")]
    Candle(#[from] candle_core::Error),

    /// A read returned fewer bytes than requested
    #[error("short read: wanted {wanted} bytes, got {got}")]
    IoShort {
        /// Number of bytes requested
        wanted: usize,
        /// Number of bytes actually available
        got: usize,
    },

    /// A seek targeted a position outside the source
    #[error("seek out of range: offset {offset} beyond size {size}")]
    IoRange {
        /// Requested absolute offset
        offset: u64,
        /// Total size of the source
        size: u64,
    },

    /// The tensor-name manifest could not be obtained or parsed
    #[error("tensor manifest unavailable for '{key}': {reason}")]
    ManifestUnavailable {
        /// Manifest path or promise key
        key: String,
        /// Why the manifest could not be used
        reason: String,
    },

    /// A tensor name that is not part of the expected set
    #[error("unknown tensor not expected in split files: {name}")]
    UnknownTensor {
        /// The offending tensor name
        name: String,
    },

    /// A tensor registered by a split has no entry in the weights map
    #[error("tensor '{name}' not found in weights map")]
    MissingWeight {
        /// The tensor name that has no weight record
        name: String,
    },

    /// A split's self-declared index disagrees with its assigned index
    #[error("invalid split file idx: {found} (file: {split}), expected {expected}")]
    SplitIndexMismatch {
        /// Index the split was assigned by the loader
        expected: u16,
        /// Index the split declares in its own metadata
        found: u16,
        /// Printable identity of the split
        split: String,
    },

    /// Splits must be loaded in strictly increasing index order
    #[error("invalid split file loading order: got idx {found} but expected {expected}")]
    SplitOrderViolation {
        /// Index that was expected next
        expected: usize,
        /// Index that was actually loaded
        found: u16,
    },

    /// After loading every split the tensor count does not match the manifest
    #[error("finished loading all splits but expected {expected} tensors, got {found}")]
    TensorCountMismatch {
        /// Number of tensors the manifest declares
        expected: usize,
        /// Number of tensors the splits actually carried
        found: usize,
    },

    /// A promise key was fulfilled more than once
    #[error("promise '{key}' already fulfilled or closed")]
    DuplicateFulfillment {
        /// The composite promise key
        key: String,
    },

    /// A released split was accessed again
    #[error("split {split} was already released")]
    UseAfterRelease {
        /// Index of the released split
        split: u16,
    },

    /// Model loading errors
    #[error("Model loading failed: {message}")]
    ModelLoading {
        /// Error message
        message: String,
    },
}

impl Error {
    /// Create a ModelLoading error
    pub fn model_loading(message: impl Into<String>) -> Self {
        Self::ModelLoading {
            message: message.into(),
        }
    }

    /// Create an UnknownTensor error
    pub fn unknown_tensor(name: impl Into<String>) -> Self {
        Self::UnknownTensor { name: name.into() }
    }

    /// Create a MissingWeight error
    pub fn missing_weight(name: impl Into<String>) -> Self {
        Self::MissingWeight { name: name.into() }
    }

    /// Create a ManifestUnavailable error
    pub fn manifest_unavailable(key: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::ManifestUnavailable {
            key: key.into(),
            reason: reason.into(),
        }
    }
}
