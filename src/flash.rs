// Image banks: the destination-side write/commit/boot-select primitive and
// the partition-shaped read side.
//
// A bank stages exactly one pending image at a time. Opening a new writer
// invalidates whatever was staged before (first-writer-wins); committing
// publishes the staged image; `select_next` marks the committed image as
// the one to run next. Until a commit lands, the previously selected image
// stays selected.
//
// Hardware-backed banks (raw flash partitions behind a bootloader) implement
// these traits out of tree; `MemBank` is the RAM-backed implementation used
// by tests and host-side tooling.

use std::sync::{Arc, Mutex};

use log::{debug, error};

use crate::error::PatchError;
use crate::stream::{InputStream, OutputStream};

// ---------------------------------------------------------------------------
// Traits
// ---------------------------------------------------------------------------

/// A fixed-size readable image region. Read-only and shareable; unrelated
/// readers may use the same region while a patch session runs.
pub trait Region {
    /// Region size in bytes.
    fn size(&self) -> u64;

    /// Fill `out` from `offset`. All-or-nothing.
    fn read(&self, offset: u64, out: &mut [u8]) -> Result<(), PatchError>;
}

/// An open destination-write handle. Dropping a writer without committing
/// discards the staged image.
pub trait ImageWriter: Send {
    /// Writable capacity in bytes.
    fn capacity(&self) -> u64;

    /// Write all of `data` at `offset`; writes beyond the capacity fail
    /// with `OutOfBounds`.
    fn write_at(&mut self, offset: u64, data: &[u8]) -> Result<(), PatchError>;

    /// Finish the staged image and publish it to the bank.
    fn commit(self) -> Result<(), PatchError>;
}

/// The destination image store.
pub trait ImageBank {
    type Writer: ImageWriter + 'static;

    /// Open a destination-write handle. `expected_size` is a hint; `None`
    /// means unknown. Opening invalidates any previously staged update.
    fn begin(&mut self, expected_size: Option<u64>) -> Result<Self::Writer, PatchError>;

    /// Mark the committed image as the one to run next. Only meaningful
    /// after a successful commit.
    fn select_next(&mut self) -> Result<(), PatchError>;
}

// ---------------------------------------------------------------------------
// Stream adapters
// ---------------------------------------------------------------------------

/// `InputStream` over a readable region.
pub struct BankInput<R: Region> {
    region: R,
}

impl<R: Region> BankInput<R> {
    pub fn new(region: R) -> Self {
        Self { region }
    }
}

impl<R: Region> InputStream for BankInput<R> {
    fn len(&self) -> u64 {
        self.region.size()
    }

    fn read_at(&mut self, offset: u64, out: &mut [u8]) -> Result<(), PatchError> {
        self.region.read(offset, out)
    }
}

/// `OutputStream` over an open destination-write handle.
pub struct BankOutput<W: ImageWriter> {
    writer: W,
}

impl<W: ImageWriter> BankOutput<W> {
    pub fn new(writer: W) -> Self {
        Self { writer }
    }

    /// Hand the write handle back, e.g. for committing.
    pub fn into_inner(self) -> W {
        self.writer
    }
}

impl<W: ImageWriter> OutputStream for BankOutput<W> {
    fn capacity(&self) -> u64 {
        self.writer.capacity()
    }

    fn write_at(&mut self, offset: u64, data: &[u8]) -> Result<(), PatchError> {
        self.writer.write_at(offset, data)
    }
}

// ---------------------------------------------------------------------------
// In-memory bank
// ---------------------------------------------------------------------------

/// RAM-backed image region.
#[derive(Debug, Clone)]
pub struct MemRegion {
    data: Arc<Vec<u8>>,
}

impl From<Vec<u8>> for MemRegion {
    fn from(data: Vec<u8>) -> Self {
        Self {
            data: Arc::new(data),
        }
    }
}

impl Region for MemRegion {
    fn size(&self) -> u64 {
        self.data.len() as u64
    }

    fn read(&self, offset: u64, out: &mut [u8]) -> Result<(), PatchError> {
        let short = PatchError::ShortRead {
            offset,
            len: out.len(),
        };
        let start = usize::try_from(offset).map_err(|_| short.clone())?;
        let end = start.checked_add(out.len()).ok_or(short.clone())?;
        if end > self.data.len() {
            return Err(short);
        }
        out.copy_from_slice(&self.data[start..end]);
        Ok(())
    }
}

#[derive(Debug, Default)]
struct BankState {
    committed: Option<Vec<u8>>,
    selected: bool,
    /// Bumped on every `begin`; a writer whose epoch is stale has been
    /// superseded and may no longer commit.
    epoch: u64,
}

/// RAM-backed image bank. Clones share the same underlying state, so a test
/// can keep one handle for inspection while a session owns another.
#[derive(Debug, Clone)]
pub struct MemBank {
    state: Arc<Mutex<BankState>>,
    capacity: u64,
}

impl MemBank {
    pub fn new(capacity: u64) -> Self {
        Self {
            state: Arc::new(Mutex::new(BankState::default())),
            capacity,
        }
    }

    /// The committed image, if any.
    pub fn committed_image(&self) -> Option<Vec<u8>> {
        self.state.lock().unwrap().committed.clone()
    }

    /// Whether the committed image has been selected to run next.
    pub fn is_selected(&self) -> bool {
        self.state.lock().unwrap().selected
    }
}

impl ImageBank for MemBank {
    type Writer = MemWriter;

    fn begin(&mut self, expected_size: Option<u64>) -> Result<Self::Writer, PatchError> {
        if let Some(size) = expected_size {
            if size > self.capacity {
                return Err(PatchError::OutOfBounds {
                    offset: 0,
                    len: size,
                    capacity: self.capacity,
                });
            }
        }
        let mut state = self.state.lock().unwrap();
        state.committed = None;
        state.selected = false;
        state.epoch += 1;
        debug!(
            "staged write opened (epoch {}, expected size {:?})",
            state.epoch, expected_size
        );
        Ok(MemWriter {
            state: Arc::clone(&self.state),
            buf: Vec::new(),
            capacity: self.capacity,
            epoch: state.epoch,
        })
    }

    fn select_next(&mut self) -> Result<(), PatchError> {
        let mut state = self.state.lock().unwrap();
        if state.committed.is_none() {
            error!("select_next with no committed image");
            return Err(PatchError::SessionClosed);
        }
        state.selected = true;
        Ok(())
    }
}

/// Staged write handle for `MemBank`.
#[derive(Debug)]
pub struct MemWriter {
    state: Arc<Mutex<BankState>>,
    buf: Vec<u8>,
    capacity: u64,
    epoch: u64,
}

impl ImageWriter for MemWriter {
    fn capacity(&self) -> u64 {
        self.capacity
    }

    fn write_at(&mut self, offset: u64, data: &[u8]) -> Result<(), PatchError> {
        let end = offset
            .checked_add(data.len() as u64)
            .ok_or(PatchError::OutOfBounds {
                offset,
                len: data.len() as u64,
                capacity: self.capacity,
            })?;
        if end > self.capacity {
            error!(
                "writing {} bytes at offset {offset} would exceed bank capacity {}",
                data.len(),
                self.capacity
            );
            return Err(PatchError::OutOfBounds {
                offset,
                len: data.len() as u64,
                capacity: self.capacity,
            });
        }
        let start = offset as usize;
        let end = end as usize;
        if end > self.buf.len() {
            self.buf.resize(end, 0xFF);
        }
        self.buf[start..end].copy_from_slice(data);
        Ok(())
    }

    fn commit(self) -> Result<(), PatchError> {
        let mut state = self.state.lock().unwrap();
        if state.epoch != self.epoch {
            // A later begin() superseded this writer.
            return Err(PatchError::SessionClosed);
        }
        state.committed = Some(self.buf);
        Ok(())
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
