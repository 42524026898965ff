// Stream capability: the uniform read-at / write-at contract every byte
// source and sink in this crate implements.
//
// The contract is all-or-nothing: `read_at` either fills the whole output
// slice or fails, `write_at` either accepts the whole input slice or fails.
// Partial success is never reported, so consumers carry a single cursor and
// no retry arithmetic.

use std::fs::File;
use std::io::{Read, Seek, SeekFrom, Write};
use std::path::Path;
use std::sync::mpsc::{Receiver, RecvTimeoutError};
use std::time::Duration;

use log::{debug, trace};

use crate::error::PatchError;

// ---------------------------------------------------------------------------
// Capability traits
// ---------------------------------------------------------------------------

/// A readable byte source with a declared total size.
pub trait InputStream {
    /// Total declared size in bytes.
    fn len(&self) -> u64;

    /// Whether the source declares zero bytes.
    fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Fill `out` from `offset`, or fail. Never a partial read.
    fn read_at(&mut self, offset: u64, out: &mut [u8]) -> Result<(), PatchError>;
}

/// A writable byte sink with a declared capacity.
pub trait OutputStream {
    /// Upper bound on writable bytes; `u64::MAX` when unknown.
    fn capacity(&self) -> u64;

    /// Write all of `data` at `offset`, or fail. Never a partial write.
    fn write_at(&mut self, offset: u64, data: &[u8]) -> Result<(), PatchError>;
}

/// In-memory source.
impl InputStream for &[u8] {
    fn len(&self) -> u64 {
        <[u8]>::len(self) as u64
    }

    fn read_at(&mut self, offset: u64, out: &mut [u8]) -> Result<(), PatchError> {
        let short = PatchError::ShortRead {
            offset,
            len: out.len(),
        };
        let start = usize::try_from(offset).map_err(|_| short.clone())?;
        let end = start.checked_add(out.len()).ok_or(short.clone())?;
        if end > <[u8]>::len(self) {
            return Err(short);
        }
        out.copy_from_slice(&self[start..end]);
        Ok(())
    }
}

// ---------------------------------------------------------------------------
// File adapters
// ---------------------------------------------------------------------------

/// Random-access file source. The size is queried once at open; content is
/// read with an absolute seek per call.
pub struct FileInput {
    file: File,
    size: u64,
}

impl FileInput {
    /// Open `path` for reading.
    pub fn open(path: &Path) -> Result<Self, PatchError> {
        let file = File::open(path)?;
        let size = file.metadata()?.len();
        Ok(Self { file, size })
    }

    /// Wrap an already-open file, querying its size.
    pub fn from_file(mut file: File) -> Result<Self, PatchError> {
        let size = file.seek(SeekFrom::End(0))?;
        Ok(Self { file, size })
    }
}

impl InputStream for FileInput {
    fn len(&self) -> u64 {
        self.size
    }

    fn read_at(&mut self, offset: u64, out: &mut [u8]) -> Result<(), PatchError> {
        trace!("reading {} bytes from file at {offset}", out.len());
        self.file.seek(SeekFrom::Start(offset))?;
        self.file.read_exact(out).map_err(|e| {
            if e.kind() == std::io::ErrorKind::UnexpectedEof {
                PatchError::ShortRead {
                    offset,
                    len: out.len(),
                }
            } else {
                e.into()
            }
        })
    }
}

/// File sink with an unknown upper bound on size.
pub struct FileOutput {
    file: File,
}

impl FileOutput {
    /// Create (truncate) `path` for writing.
    pub fn create(path: &Path) -> Result<Self, PatchError> {
        Ok(Self {
            file: File::create(path)?,
        })
    }

    /// Wrap an already-open writable file.
    pub fn from_file(file: File) -> Self {
        Self { file }
    }

    /// Flush and return the underlying file.
    pub fn into_file(mut self) -> Result<File, PatchError> {
        self.file.flush()?;
        Ok(self.file)
    }
}

impl OutputStream for FileOutput {
    fn capacity(&self) -> u64 {
        u64::MAX
    }

    fn write_at(&mut self, offset: u64, data: &[u8]) -> Result<(), PatchError> {
        trace!("writing {} bytes to file at {offset}", data.len());
        self.file.seek(SeekFrom::Start(offset))?;
        self.file.write_all(data)?;
        Ok(())
    }
}

// ---------------------------------------------------------------------------
// Memory sink
// ---------------------------------------------------------------------------

/// Growable in-memory sink, mainly for tests and host-side tooling.
#[derive(Debug, Default)]
pub struct MemOutput {
    buf: Vec<u8>,
}

impl MemOutput {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn as_slice(&self) -> &[u8] {
        &self.buf
    }

    pub fn into_inner(self) -> Vec<u8> {
        self.buf
    }
}

impl OutputStream for MemOutput {
    fn capacity(&self) -> u64 {
        u64::MAX
    }

    fn write_at(&mut self, offset: u64, data: &[u8]) -> Result<(), PatchError> {
        let start = usize::try_from(offset).map_err(|_| PatchError::ShortWrite {
            offset,
            len: data.len(),
        })?;
        let end = start.checked_add(data.len()).ok_or(PatchError::ShortWrite {
            offset,
            len: data.len(),
        })?;
        if end > self.buf.len() {
            self.buf.resize(end, 0);
        }
        self.buf[start..end].copy_from_slice(data);
        Ok(())
    }
}

// ---------------------------------------------------------------------------
// Bounded-queue source
// ---------------------------------------------------------------------------

/// Blocking source fed by a producer through a bounded channel.
///
/// The queue has no random access: the consumer is guaranteed to read in
/// strictly increasing offset order, and the offset passed to `read_at` is
/// advisory only (debug-asserted, otherwise ignored). Each `read_at`
/// assembles the requested byte count from one or more dequeued chunks; a
/// receive attempt that yields zero new bytes within the timeout fails the
/// request with `Starved`. A disconnected producer fails it with
/// `ShortRead`.
pub struct QueueSource {
    rx: Receiver<Vec<u8>>,
    /// Carry-over from a chunk larger than the remaining request.
    pending: Vec<u8>,
    pending_pos: usize,
    declared_len: u64,
    /// Monotonic consumption cursor, used only to validate call order.
    offset: u64,
    timeout: Duration,
}

impl QueueSource {
    pub fn new(rx: Receiver<Vec<u8>>, declared_len: u64, timeout: Duration) -> Self {
        Self {
            rx,
            pending: Vec::new(),
            pending_pos: 0,
            declared_len,
            offset: 0,
            timeout,
        }
    }
}

impl InputStream for QueueSource {
    fn len(&self) -> u64 {
        self.declared_len
    }

    fn read_at(&mut self, offset: u64, out: &mut [u8]) -> Result<(), PatchError> {
        debug_assert_eq!(offset, self.offset, "queue reads must be sequential");
        trace!("assembling {} bytes from queue at {offset}", out.len());

        let mut filled = 0;
        while filled < out.len() {
            if self.pending_pos < self.pending.len() {
                let take = (self.pending.len() - self.pending_pos).min(out.len() - filled);
                out[filled..filled + take]
                    .copy_from_slice(&self.pending[self.pending_pos..self.pending_pos + take]);
                self.pending_pos += take;
                filled += take;
                continue;
            }

            match self.rx.recv_timeout(self.timeout) {
                Ok(chunk) => {
                    self.pending = chunk;
                    self.pending_pos = 0;
                }
                Err(RecvTimeoutError::Timeout) => {
                    debug!("queue read timed out after {:?}", self.timeout);
                    return Err(PatchError::Starved(self.timeout));
                }
                Err(RecvTimeoutError::Disconnected) => {
                    return Err(PatchError::ShortRead {
                        offset,
                        len: out.len(),
                    });
                }
            }
        }

        self.offset += out.len() as u64;
        Ok(())
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
