// Crate-wide error taxonomy.
//
// Every failure here is terminal for the session that produced it: nothing
// in this crate retries internally. Retry policy (re-requesting missing
// network bytes, reopening a file) belongs to the producer feeding the
// session or to the caller of the whole patch operation.

use std::sync::Arc;
use std::time::Duration;

use thiserror::Error;

/// Errors surfaced by stream adapters, the decompressor, the patch engine,
/// and session orchestration.
///
/// The type is `Clone` so that a finalized session can replay the same
/// outcome on repeated `finalize` calls; I/O errors are held in an `Arc`
/// for that reason.
#[derive(Debug, Clone, Error)]
pub enum PatchError {
    /// An all-or-nothing read could not be fully satisfied.
    #[error("short read: {len} bytes at offset {offset}")]
    ShortRead { offset: u64, len: usize },

    /// An all-or-nothing write could not be fully satisfied.
    #[error("short write: {len} bytes at offset {offset}")]
    ShortWrite { offset: u64, len: usize },

    /// A destination write would exceed the region's capacity.
    #[error("write of {len} bytes at offset {offset} exceeds capacity {capacity}")]
    OutOfBounds { offset: u64, len: u64, capacity: u64 },

    /// The bounded queue produced no data within the read timeout.
    #[error("diff queue starved: no data within {0:?}")]
    Starved(Duration),

    /// The compressed region is empty or declares an invalid window size.
    #[error("malformed compressed stream header: {0}")]
    MalformedHeader(&'static str),

    /// The inflater made no progress despite available input and output.
    #[error("decompressor stalled with input and output available")]
    CodecStalled,

    /// The compressed stream ended before the requested output was produced.
    #[error("compressed stream ended before producing the requested output")]
    UnderRun,

    /// The diff container is structurally invalid.
    #[error("corrupt diff: {0}")]
    Corrupt(String),

    /// The diff names a compression codec this build does not support.
    #[error("unsupported codec: {0:?}")]
    Unsupported(String),

    /// The session already completed or failed; no more data is accepted.
    #[error("patch session is no longer running")]
    SessionClosed,

    /// I/O error from an underlying store.
    #[error("I/O error: {0}")]
    Io(#[source] Arc<std::io::Error>),
}

impl From<std::io::Error> for PatchError {
    fn from(e: std::io::Error) -> Self {
        Self::Io(Arc::new(e))
    }
}
