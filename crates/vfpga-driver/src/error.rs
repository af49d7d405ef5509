//! Error types for vFPGA invocation

use crate::descriptor::Oper;
use std::path::PathBuf;
use thiserror::Error;

/// Result type alias for vFPGA operations
pub type Result<T> = std::result::Result<T, VfpgaError>;

/// Errors that can occur while driving a vFPGA region
#[derive(Debug, Error)]
pub enum VfpgaError {
    /// Host buffer allocation failed
    #[error("Unable to allocate {pages} pages of {page_size} bytes: {reason}")]
    AllocationFailed {
        /// Requested page count
        pages: usize,
        /// Page size of the requested class
        page_size: usize,
        /// Reason for failure
        reason: String,
    },

    /// A byte range does not fit inside the host buffer
    #[error("Region [{offset:#x}, +{len:#x}) exceeds buffer of {size:#x} bytes")]
    OutOfBounds {
        /// Start of the range
        offset: usize,
        /// Length of the range
        len: usize,
        /// Buffer size
        size: usize,
    },

    /// Register offset is not 64-bit aligned
    #[error("Register offset {offset:#x} (base {base:#x}) is not 8-byte aligned")]
    Misaligned {
        /// Kernel base offset
        base: u64,
        /// Requested byte offset
        offset: u64,
    },

    /// Register offset falls outside the register bank
    #[error("Register offset {offset:#x} (base {base:#x}) is outside the register window")]
    RegisterOutOfRange {
        /// Kernel base offset
        base: u64,
        /// Requested byte offset
        offset: u64,
    },

    /// Operation is not allowed in the current state
    #[error("Invalid state: {state}")]
    InvalidState {
        /// Current state description
        state: String,
    },

    /// Kernel never reported done
    #[error("Kernel handshake timed out after {polls} polls ({elapsed_ms}ms)")]
    HandshakeTimeout {
        /// Status reads performed
        polls: u64,
        /// Time spent polling in milliseconds
        elapsed_ms: u64,
    },

    /// Completion counter never reached the expected value
    #[error("{oper} completion timed out after {polls} polls ({elapsed_ms}ms)")]
    CompletionTimeout {
        /// Operation kind that was awaited
        oper: Oper,
        /// Counter reads performed
        polls: u64,
        /// Time spent polling in milliseconds
        elapsed_ms: u64,
    },

    /// Device node missing
    #[error("Device not found: {path}")]
    DeviceNotFound {
        /// Path that was checked
        path: PathBuf,
    },

    /// Mapping a device window failed
    #[error("Failed to map device window: {reason}")]
    MapFailed {
        /// Reason for failure
        reason: String,
    },

    /// Configuration rejected
    #[error("Invalid configuration: {reason}")]
    Config {
        /// Reason for rejection
        reason: String,
    },

    /// I/O error (device open, result log)
    #[error("I/O error: {source}")]
    Io {
        /// Underlying I/O error
        #[from]
        source: std::io::Error,
    },
}

impl VfpgaError {
    /// Create an allocation failure error
    pub fn allocation_failed(pages: usize, page_size: usize, reason: impl Into<String>) -> Self {
        Self::AllocationFailed {
            pages,
            page_size,
            reason: reason.into(),
        }
    }

    /// Create an invalid state error
    pub fn invalid_state(state: impl Into<String>) -> Self {
        Self::InvalidState {
            state: state.into(),
        }
    }

    /// Create a device not found error
    pub fn device_not_found(path: impl Into<PathBuf>) -> Self {
        Self::DeviceNotFound { path: path.into() }
    }

    /// Create a map failure error
    pub fn map_failed(reason: impl Into<String>) -> Self {
        Self::MapFailed {
            reason: reason.into(),
        }
    }

    /// Create a configuration error
    pub fn config(reason: impl Into<String>) -> Self {
        Self::Config {
            reason: reason.into(),
        }
    }

    /// Whether this error is a bounded wait running out.
    ///
    /// Timeouts abort the current batch; everything else aborts the run.
    pub const fn is_timeout(&self) -> bool {
        matches!(
            self,
            Self::HandshakeTimeout { .. } | Self::CompletionTimeout { .. }
        )
    }
}
