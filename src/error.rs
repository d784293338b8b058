//! Crate-wide error type
//!
//! Every fallible operation in the crate funnels into [`Error`]. Module-local
//! error enums (TLV, FCP, tree-insert) are folded in via `#[from]` so callers
//! match on one type.

use thiserror::Error;

use crate::apdu::SwClass;
use crate::fcp::{EfStructure, FcpError};
use crate::fs::FsError;
use crate::transport::TransportError;

/// Errors surfaced by the navigation and access engine.
#[derive(Debug, Error)]
pub enum Error {
    /// The transport produced no usable response. Fatal to the current
    /// operation, not to the session.
    #[error("transport failure: {0}")]
    Transport(#[from] TransportError),

    /// The card answered with a non-success status word.
    #[error("card returned status word {sw:04X} ({class})")]
    StatusWord { sw: u16, class: SwClass },

    /// SELECT succeeded but the returned FCP could not be decoded. This is a
    /// data-integrity fault and is never silently ignored.
    #[error("malformed FCP: {0}")]
    MalformedFcp(#[from] FcpError),

    /// A path element could not be resolved. The cursor and selection stack
    /// are left at their pre-call state.
    #[error("path element not found: {element}")]
    PathNotFound { element: String },

    /// The requested operation is not valid for the file's decoded structure.
    #[error("operation not valid for {actual} file")]
    StructureMismatch { actual: EfStructure },

    /// Byte offset or record index beyond the decoded file bounds.
    #[error("offset or record index beyond file bounds")]
    OutOfRange,

    /// Record data does not match the file's fixed record length.
    #[error("record data is {got} bytes, file has {expected}-byte records")]
    RecordLength { expected: usize, got: usize },

    /// The card delivered fewer bytes than requested from a transparent
    /// read, without reporting an error status word.
    #[error("short read: wanted {expected} bytes, card delivered {got}")]
    ShortRead { expected: usize, got: usize },

    /// A record/byte operation was attempted while the cursor is a
    /// directory (MF/DF/ADF) or an EF whose FCP has not been decoded yet.
    #[error("no elementary file selected")]
    NoFileSelected,

    /// Tree-model violation while registering files (profile or discovery).
    #[error("file system: {0}")]
    Fs(#[from] FsError),

    /// An export script line could not be parsed during replay.
    #[error("bad script line {line}: {reason}")]
    Script { line: usize, reason: String },
}

impl Error {
    /// Build a [`Error::StatusWord`] from a raw status word.
    pub fn from_sw(sw: u16) -> Self {
        Error::StatusWord {
            sw,
            class: SwClass::of(sw),
        }
    }

    /// True for status-word errors of the file-not-found class.
    pub fn is_file_not_found(&self) -> bool {
        matches!(
            self,
            Error::StatusWord {
                class: SwClass::FileNotFound,
                ..
            }
        )
    }
}
