// Built-in patch engine for the HDIFF13 compressed-diff container.
//
// Container layout:
//
//   "HDIFF13&" <codec-name> NUL
//   packed: new_size old_size cover_count
//           cover_size cover_zsize  ctrl_size ctrl_zsize
//           code_size  code_zsize   data_size data_zsize
//   cover section | ctrl section | code section | data section
//
// A section with a non-zero compressed size is stored as one window-bits
// byte followed by zlib nodes (see `inflate`); a zero compressed size means
// the section is stored raw. Covers map runs of the old image into the new
// one; the data section supplies the bytes between covers; the RLE ctrl/code
// sections carry a byte stream spanning the whole new image that is added
// (wrapping) onto everything.
//
// The engine consumes the diff stream at strictly increasing offsets: the
// three control sections are materialized up front and only the bulk data
// section is streamed, which is what lets a queue-fed diff source work.

pub mod rle;
pub mod varint;

use log::debug;

use crate::error::PatchError;
use crate::inflate::{NodeDecompressor, codec_supported};
use crate::stream::{InputStream, OutputStream};

use self::rle::RleDecoder;

/// Leading magic of every diff container.
pub const MAGIC: &[u8; 8] = b"HDIFF13&";

const MAX_CODEC_NAME: usize = 16;

// ---------------------------------------------------------------------------
// Engine trait
// ---------------------------------------------------------------------------

/// The patch-apply entry point the rest of the crate is written against.
///
/// An engine pulls old-image bytes and diff bytes on demand, pushes
/// new-image bytes on demand, and reports success or failure only — there
/// is no partial-progress callback.
pub trait PatchEngine {
    fn apply<O, N, D>(&self, old: &mut O, new: &mut N, diff: &mut D) -> Result<(), PatchError>
    where
        O: InputStream,
        N: OutputStream,
        D: InputStream;
}

// ---------------------------------------------------------------------------
// Container head
// ---------------------------------------------------------------------------

/// Stored extents of one section: uncompressed size and, when compressed,
/// the on-wire size (zero means stored raw).
#[derive(Debug, Clone, Copy, Default)]
pub struct SectionLen {
    pub size: u64,
    pub zsize: u64,
}

impl SectionLen {
    fn is_compressed(&self) -> bool {
        self.zsize > 0
    }

    /// Bytes the section occupies in the diff stream.
    fn stored(&self) -> u64 {
        if self.zsize > 0 { self.zsize } else { self.size }
    }
}

/// Decoded container head.
#[derive(Debug, Clone)]
pub struct DiffHead {
    pub codec: String,
    pub new_size: u64,
    pub old_size: u64,
    pub cover_count: u64,
    pub cover: SectionLen,
    pub ctrl: SectionLen,
    pub code: SectionLen,
    pub data: SectionLen,
    /// Offset of the first section byte.
    pub sections_start: u64,
}

impl DiffHead {
    /// Parse the magic, codec name, and packed head fields.
    pub fn read<D: InputStream>(diff: &mut D) -> Result<Self, PatchError> {
        let end = diff.len();
        if end < MAGIC.len() as u64 {
            return Err(PatchError::Corrupt("diff shorter than its magic".into()));
        }
        let mut magic = [0u8; 8];
        diff.read_at(0, &mut magic)?;
        if &magic != MAGIC {
            return Err(PatchError::Corrupt("bad diff magic".into()));
        }

        let mut pos = MAGIC.len() as u64;
        let mut name = Vec::new();
        loop {
            if name.len() > MAX_CODEC_NAME {
                return Err(PatchError::Corrupt("codec name too long".into()));
            }
            if pos >= end {
                return Err(PatchError::Corrupt("unterminated codec name".into()));
            }
            let mut b = [0u8; 1];
            diff.read_at(pos, &mut b)?;
            pos += 1;
            if b[0] == 0 {
                break;
            }
            name.push(b[0]);
        }
        let codec = String::from_utf8(name)
            .map_err(|_| PatchError::Corrupt("codec name is not UTF-8".into()))?;

        let new_size = next_packed(diff, &mut pos, end)?;
        let old_size = next_packed(diff, &mut pos, end)?;
        let cover_count = next_packed(diff, &mut pos, end)?;
        let cover = SectionLen {
            size: next_packed(diff, &mut pos, end)?,
            zsize: next_packed(diff, &mut pos, end)?,
        };
        let ctrl = SectionLen {
            size: next_packed(diff, &mut pos, end)?,
            zsize: next_packed(diff, &mut pos, end)?,
        };
        let code = SectionLen {
            size: next_packed(diff, &mut pos, end)?,
            zsize: next_packed(diff, &mut pos, end)?,
        };
        let data = SectionLen {
            size: next_packed(diff, &mut pos, end)?,
            zsize: next_packed(diff, &mut pos, end)?,
        };

        Ok(Self {
            codec,
            new_size,
            old_size,
            cover_count,
            cover,
            ctrl,
            code,
            data,
            sections_start: pos,
        })
    }

    /// Whether any section is stored compressed.
    pub fn any_compressed(&self) -> bool {
        self.cover.is_compressed()
            || self.ctrl.is_compressed()
            || self.code.is_compressed()
            || self.data.is_compressed()
    }
}

fn next_packed<D: InputStream>(diff: &mut D, pos: &mut u64, end: u64) -> Result<u64, PatchError> {
    varint::read_packed(diff, pos, end, 0).map(|(v, _)| v)
}

// ---------------------------------------------------------------------------
// Section reader
// ---------------------------------------------------------------------------

/// Sequential reader over one section: raw pass-through or one decompressor
/// session. Sessions are opened and closed per section, strictly in stream
/// order, and never reused.
enum Section<'a, D: InputStream> {
    Raw { diff: &'a mut D, pos: u64, end: u64 },
    Zlib(NodeDecompressor<'a, D>),
}

impl<'a, D: InputStream> Section<'a, D> {
    fn open(diff: &'a mut D, begin: u64, len: SectionLen) -> Result<Self, PatchError> {
        if len.is_compressed() {
            let end = begin
                .checked_add(len.zsize)
                .ok_or_else(|| PatchError::Corrupt("section extent overflow".into()))?;
            Ok(Self::Zlib(NodeDecompressor::open(diff, begin, end)?))
        } else {
            let end = begin
                .checked_add(len.size)
                .ok_or_else(|| PatchError::Corrupt("section extent overflow".into()))?;
            Ok(Self::Raw {
                diff,
                pos: begin,
                end,
            })
        }
    }

    fn read(&mut self, out: &mut [u8]) -> Result<(), PatchError> {
        match self {
            Self::Raw { diff, pos, end } => {
                let next = pos
                    .checked_add(out.len() as u64)
                    .filter(|&next| next <= *end)
                    .ok_or_else(|| PatchError::Corrupt("section overrun".into()))?;
                diff.read_at(*pos, out)?;
                *pos = next;
                Ok(())
            }
            Self::Zlib(dec) => dec.read(out),
        }
    }

    fn read_vec(&mut self, n: u64) -> Result<Vec<u8>, PatchError> {
        let n = usize::try_from(n)
            .map_err(|_| PatchError::Corrupt("section too large for this host".into()))?;
        let mut v = vec![0u8; n];
        self.read(&mut v)?;
        Ok(v)
    }
}

// ---------------------------------------------------------------------------
// Covers
// ---------------------------------------------------------------------------

/// One mapped run: `len` bytes of the old image at `old_pos` reproduced at
/// `new_pos` in the new image.
struct Cover {
    old_pos: u64,
    new_pos: u64,
    len: u64,
}

fn parse_covers(raw: &[u8], head: &DiffHead) -> Result<Vec<Cover>, PatchError> {
    let mut covers = Vec::with_capacity(head.cover_count.min(1 << 16) as usize);
    let mut pos = 0usize;
    let mut old_cursor = 0u64;
    let mut new_cursor = 0u64;

    for _ in 0..head.cover_count {
        let (old_inc, backwards) = varint::decode_packed(raw, &mut pos, 1)?;
        let old_pos = if backwards == 0 {
            old_cursor.checked_add(old_inc)
        } else {
            old_cursor.checked_sub(old_inc)
        }
        .ok_or_else(|| PatchError::Corrupt("cover old position out of range".into()))?;

        let (new_inc, _) = varint::decode_packed(raw, &mut pos, 0)?;
        let (len, _) = varint::decode_packed(raw, &mut pos, 0)?;
        let new_pos = new_cursor
            .checked_add(new_inc)
            .ok_or_else(|| PatchError::Corrupt("cover new position out of range".into()))?;

        if old_pos > head.old_size || len > head.old_size - old_pos {
            return Err(PatchError::Corrupt("cover exceeds the old image".into()));
        }
        if new_pos > head.new_size || len > head.new_size - new_pos {
            return Err(PatchError::Corrupt("cover exceeds the new image".into()));
        }

        old_cursor = old_pos + len;
        new_cursor = new_pos + len;
        covers.push(Cover {
            old_pos,
            new_pos,
            len,
        });
    }

    if pos != raw.len() {
        return Err(PatchError::Corrupt("trailing bytes in cover section".into()));
    }
    Ok(covers)
}

// ---------------------------------------------------------------------------
// HdiffEngine
// ---------------------------------------------------------------------------

/// Default engine implementation.
#[derive(Debug, Clone)]
pub struct HdiffEngine {
    /// Copy-loop chunk size; bounds the engine's transient buffer.
    pub chunk_size: usize,
}

impl Default for HdiffEngine {
    fn default() -> Self {
        Self { chunk_size: 4096 }
    }
}

impl HdiffEngine {
    pub fn with_chunk_size(chunk_size: usize) -> Self {
        Self { chunk_size }
    }
}

impl PatchEngine for HdiffEngine {
    fn apply<O, N, D>(&self, old: &mut O, new: &mut N, diff: &mut D) -> Result<(), PatchError>
    where
        O: InputStream,
        N: OutputStream,
        D: InputStream,
    {
        let head = DiffHead::read(diff)?;
        debug!(
            "applying diff: codec={:?} old={}B new={}B covers={}",
            head.codec, head.old_size, head.new_size, head.cover_count
        );

        if head.any_compressed() && !codec_supported(&head.codec) {
            return Err(PatchError::Unsupported(head.codec));
        }
        if old.len() != head.old_size {
            return Err(PatchError::Corrupt(format!(
                "old image is {} bytes, diff expects {}",
                old.len(),
                head.old_size
            )));
        }
        if head.new_size > new.capacity() {
            return Err(PatchError::OutOfBounds {
                offset: 0,
                len: head.new_size,
                capacity: new.capacity(),
            });
        }
        check_plausible(&head)?;

        // Sections are laid out back to back after the head.
        let cover_begin = head.sections_start;
        let ctrl_begin = add_extent(cover_begin, head.cover.stored())?;
        let code_begin = add_extent(ctrl_begin, head.ctrl.stored())?;
        let data_begin = add_extent(code_begin, head.code.stored())?;
        let data_end = add_extent(data_begin, head.data.stored())?;
        if data_end > diff.len() {
            return Err(PatchError::Corrupt("diff truncated".into()));
        }

        // Materialize the control surface (see module comment).
        let covers = {
            let raw = Section::open(diff, cover_begin, head.cover)?.read_vec(head.cover.size)?;
            parse_covers(&raw, &head)?
        };
        let ctrl = Section::open(diff, ctrl_begin, head.ctrl)?.read_vec(head.ctrl.size)?;
        let code = Section::open(diff, code_begin, head.code)?.read_vec(head.code.size)?;
        let mut rle = RleDecoder::new(ctrl, code);
        let mut data = Section::open(diff, data_begin, head.data)?;

        // Literal bytes must account exactly for the space between covers.
        let covered: u64 = covers.iter().map(|c| c.len).sum();
        if head.data.size != head.new_size - covered {
            return Err(PatchError::Corrupt(
                "literal section does not match the cover layout".into(),
            ));
        }

        let mut chunk = vec![0u8; self.chunk_size.max(1)];
        let mut new_pos = 0u64;
        for cover in &covers {
            copy_literals(
                &mut data,
                &mut rle,
                new,
                new_pos,
                cover.new_pos - new_pos,
                &mut chunk,
            )?;
            copy_old(old, new, &mut rle, cover, &mut chunk)?;
            new_pos = cover.new_pos + cover.len;
        }
        copy_literals(
            &mut data,
            &mut rle,
            new,
            new_pos,
            head.new_size - new_pos,
            &mut chunk,
        )?;

        if !rle.is_exhausted() {
            return Err(PatchError::Corrupt(
                "RLE stream longer than the new image".into(),
            ));
        }
        debug!("diff applied: {} bytes written", head.new_size);
        Ok(())
    }
}

fn add_extent(base: u64, len: u64) -> Result<u64, PatchError> {
    base.checked_add(len)
        .ok_or_else(|| PatchError::Corrupt("section extent overflow".into()))
}

/// Reject head fields whose decompressed sizes could not possibly be
/// produced by a well-formed diff, before allocating for them.
fn check_plausible(head: &DiffHead) -> Result<(), PatchError> {
    let max_packed = varint::MAX_PACKED_LEN as u64;
    let cover_max = head.cover_count.saturating_mul(3 * max_packed);
    let ctrl_max = head.new_size.saturating_mul(max_packed).saturating_add(1);
    let code_max = head.new_size.saturating_mul(2).saturating_add(1);
    if head.cover.size > cover_max || head.ctrl.size > ctrl_max || head.code.size > code_max {
        return Err(PatchError::Corrupt("implausible section size".into()));
    }
    // Deflate expands at most ~1032:1; a compressed section claiming more
    // than that cannot be honest.
    for section in [&head.cover, &head.ctrl, &head.code, &head.data] {
        if section.is_compressed()
            && section.size > section.zsize.saturating_mul(1032).saturating_add(64)
        {
            return Err(PatchError::Corrupt("implausible section size".into()));
        }
    }
    Ok(())
}

fn copy_literals<D, N>(
    data: &mut Section<'_, D>,
    rle: &mut RleDecoder,
    new: &mut N,
    start: u64,
    len: u64,
    chunk: &mut [u8],
) -> Result<(), PatchError>
where
    D: InputStream,
    N: OutputStream,
{
    let mut done = 0u64;
    while done < len {
        let take = (len - done).min(chunk.len() as u64) as usize;
        let buf = &mut chunk[..take];
        data.read(buf)?;
        rle.add_to(buf)?;
        new.write_at(start + done, buf)?;
        done += take as u64;
    }
    Ok(())
}

fn copy_old<O, N>(
    old: &mut O,
    new: &mut N,
    rle: &mut RleDecoder,
    cover: &Cover,
    chunk: &mut [u8],
) -> Result<(), PatchError>
where
    O: InputStream,
    N: OutputStream,
{
    let mut done = 0u64;
    while done < cover.len {
        let take = (cover.len - done).min(chunk.len() as u64) as usize;
        let buf = &mut chunk[..take];
        old.read_at(cover.old_pos + done, buf)?;
        rle.add_to(buf)?;
        new.write_at(cover.new_pos + done, buf)?;
        done += take as u64;
    }
    Ok(())
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
