// Streaming multi-node zlib decompressor.
//
// A compressed diff region is one or more independently zlib-compressed
// segments ("nodes") concatenated back to back, prefixed by a single byte
// declaring the inflate window exponent. `NodeDecompressor` presents that
// region as one continuous decompressed stream while touching only a
// window-sized working buffer, whatever the total payload size.
//
// Node boundaries are self-delimited by each zlib stream's end marker. When
// a stream ends with compressed bytes still pending, the inflater is re-armed
// for a fresh stream; the working buffer and the buffered-input cursor carry
// over untouched, so callers never observe the boundary.

use flate2::{Decompress, FlushDecompress, Status};

use log::{debug, trace};

use crate::error::PatchError;
use crate::stream::InputStream;

/// Codec identifiers this decompressor accepts, matched exactly. `pzlib`
/// payloads are plain zlib nodes produced in parallel; at decode time the
/// two are identical.
pub const SUPPORTED_CODECS: [&str; 2] = ["zlib", "pzlib"];

/// Whether `name` identifies a codec this build can decode.
pub fn codec_supported(name: &str) -> bool {
    SUPPORTED_CODECS.iter().any(|&c| c == name)
}

const MIN_WINDOW_BITS: u8 = 8;
const MAX_WINDOW_BITS: u8 = 15;

// ---------------------------------------------------------------------------
// NodeDecompressor
// ---------------------------------------------------------------------------

/// Pull-based decoder over a compressed region of an input stream.
///
/// Memory use is O(window size) regardless of the total compressed or
/// decompressed length. The total decompressed length is determined lazily
/// by the data itself; callers pull exactly the bytes they need and get
/// `UnderRun` if the region ends early.
#[derive(Debug)]
pub struct NodeDecompressor<'a, I: InputStream> {
    input: &'a mut I,
    /// Next compressed byte to pull from `input`.
    cursor: u64,
    /// One past the last compressed byte.
    end: u64,
    inflate: Decompress,
    window_bits: u8,
    /// Working buffer, exactly one window in size; allocated at open and
    /// never resized for the remainder of the session.
    buf: Box<[u8]>,
    /// Consumed / valid extents of `buf`.
    buf_pos: usize,
    buf_len: usize,
}

impl<'a, I: InputStream> NodeDecompressor<'a, I> {
    /// Open the compressed region `[begin, end)` of `input`.
    ///
    /// The first byte of the region declares the window exponent; the
    /// remainder is the node payload. Fails `MalformedHeader` on an empty
    /// region or an exponent outside `8..=15`.
    pub fn open(input: &'a mut I, begin: u64, end: u64) -> Result<Self, PatchError> {
        if end <= begin {
            return Err(PatchError::MalformedHeader("empty compressed region"));
        }
        let mut header = [0u8; 1];
        input.read_at(begin, &mut header)?;
        let window_bits = header[0];
        if !(MIN_WINDOW_BITS..=MAX_WINDOW_BITS).contains(&window_bits) {
            return Err(PatchError::MalformedHeader("window exponent out of range"));
        }
        debug!(
            "node decompressor open: window_bits={window_bits}, {} compressed bytes",
            end - begin - 1
        );

        // zlib-format inflaters reject an 8-bit window; 8-bit streams remain
        // decodable at the 9-bit setting. The working buffer keeps the
        // declared size.
        let codec_bits = window_bits.max(9);
        Ok(Self {
            input,
            cursor: begin + 1,
            end,
            inflate: Decompress::new_with_window_bits(true, codec_bits),
            window_bits,
            buf: vec![0u8; 1usize << window_bits].into_boxed_slice(),
            buf_pos: 0,
            buf_len: 0,
        })
    }

    /// Declared window exponent.
    pub fn window_bits(&self) -> u8 {
        self.window_bits
    }

    /// Working-buffer size in bytes.
    pub fn window_size(&self) -> usize {
        self.buf.len()
    }

    /// Fill `out` with the next `out.len()` decompressed bytes.
    ///
    /// All-or-nothing: on error the session is dead and must be dropped.
    pub fn read(&mut self, out: &mut [u8]) -> Result<(), PatchError> {
        let mut filled = 0usize;
        while filled < out.len() {
            // Refill the working buffer once the inflater has consumed it.
            if self.buf_pos == self.buf_len && self.cursor < self.end {
                let take = (self.end - self.cursor).min(self.buf.len() as u64) as usize;
                self.input.read_at(self.cursor, &mut self.buf[..take])?;
                self.cursor += take as u64;
                self.buf_pos = 0;
                self.buf_len = take;
            }

            let before_in = self.inflate.total_in();
            let before_out = self.inflate.total_out();
            let status = self
                .inflate
                .decompress(
                    &self.buf[self.buf_pos..self.buf_len],
                    &mut out[filled..],
                    FlushDecompress::None,
                )
                .map_err(|e| PatchError::Corrupt(format!("inflate: {e}")))?;
            let consumed = (self.inflate.total_in() - before_in) as usize;
            let produced = (self.inflate.total_out() - before_out) as usize;
            self.buf_pos += consumed;
            filled += produced;

            match status {
                Status::StreamEnd => {
                    if self.buf_pos < self.buf_len || self.cursor < self.end {
                        // Node boundary: re-arm the inflater for the next
                        // independent stream. Buffered input and the output
                        // cursor carry over untouched.
                        trace!("node boundary at compressed offset {}", self.cursor);
                        self.inflate.reset(true);
                    } else if filled < out.len() {
                        return Err(PatchError::UnderRun);
                    }
                }
                Status::Ok | Status::BufError => {
                    if consumed == 0 && produced == 0 {
                        if self.buf_pos < self.buf_len {
                            // Input and output both available, no movement.
                            return Err(PatchError::CodecStalled);
                        }
                        if self.cursor >= self.end {
                            // Compressed data ran out mid-node.
                            return Err(PatchError::UnderRun);
                        }
                        // Input buffer drained; loop refills it.
                    }
                }
            }
        }
        Ok(())
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
