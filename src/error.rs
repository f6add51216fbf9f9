//! Error types.
//!
//! All fallible public APIs return `Result<T, CodecError>`.

use std::io;

use thiserror::Error;

/// Errors that can occur while encoding, decoding, or handling files.
#[derive(Debug, Error)]
pub enum CodecError {
    /// The file is not an AP container: bad magic, unsupported version,
    /// or a truncated header or record.
    #[error("invalid container: {0}")]
    InvalidContainer(String),

    /// The operation is deliberately not supported (e.g. seeking past
    /// frame 0).
    #[error("unsupported operation: {0}")]
    UnsupportedOperation(String),

    /// A caller-supplied value is out of range: wrong bitmap depth,
    /// mismatched dimensions, non-positive frame rate.
    #[error("invalid input: {0}")]
    InvalidInput(String),

    /// An underlying read or write failed.
    #[error("i/o failure: {0}")]
    Io(#[from] io::Error),

    /// A frame payload is internally inconsistent: an RLE stream overruns
    /// the macroblock, or the declared payload length disagrees with the
    /// bytes consumed. Treated as container corruption.
    #[error("corrupt payload: {0}")]
    CorruptPayload(String),
}
