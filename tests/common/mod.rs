// Test-side HDIFF container builder: the encode mirror of the crate's
// decoder. Not a production differ — covers are supplied by the caller, the
// literal/RLE split follows directly from them, and the output is only as
// clever as the tests need it to be.

#![allow(dead_code)]

use std::io::Write;

use flate2::write::ZlibEncoder;
use flate2::{Compress, Compression};

use oxipatch::hdiff::{MAGIC, varint};

/// How the data section is stored in the container.
#[derive(Clone, Copy)]
pub enum Codec {
    /// Stored raw.
    Raw,
    /// Compressed into `nodes` independent zlib streams, prefixed by the
    /// declared window exponent.
    Zlib { window_bits: u8, nodes: usize },
}

/// Build a container that patches `old` into `new`.
///
/// `covers` are `(old_pos, new_pos, len)` runs, sorted by `new_pos`,
/// non-overlapping in the new image. Bytes between covers are carried as
/// literals.
pub fn build_diff(old: &[u8], new: &[u8], covers: &[(u64, u64, u64)], codec: Codec) -> Vec<u8> {
    let mut literals = Vec::new();
    let mut deltas = vec![0u8; new.len()];
    let mut new_pos = 0usize;
    for &(old_pos, cover_new, len) in covers {
        let (old_pos, cover_new, len) = (old_pos as usize, cover_new as usize, len as usize);
        assert!(cover_new >= new_pos, "covers must be sorted and disjoint");
        assert!(old_pos + len <= old.len() && cover_new + len <= new.len());
        literals.extend_from_slice(&new[new_pos..cover_new]);
        for k in 0..len {
            deltas[cover_new + k] = new[cover_new + k].wrapping_sub(old[old_pos + k]);
        }
        new_pos = cover_new + len;
    }
    literals.extend_from_slice(&new[new_pos..]);

    let (ctrl, code) = encode_rle(&deltas);
    let cover_buf = encode_covers(covers);

    let (name, data_stored, data_zsize) = match codec {
        Codec::Raw => ("zlib", literals.clone(), 0u64),
        Codec::Zlib { window_bits, nodes } => {
            let stored = compress_nodes(&literals, window_bits, nodes);
            let name = if nodes > 1 { "pzlib" } else { "zlib" };
            let zsize = stored.len() as u64;
            (name, stored, zsize)
        }
    };

    let mut out = Vec::new();
    out.extend_from_slice(MAGIC);
    out.extend_from_slice(name.as_bytes());
    out.push(0);
    for v in [
        new.len() as u64,
        old.len() as u64,
        covers.len() as u64,
        cover_buf.len() as u64,
        0,
        ctrl.len() as u64,
        0,
        code.len() as u64,
        0,
        literals.len() as u64,
        data_zsize,
    ] {
        varint::encode_packed(&mut out, v, 0, 0);
    }
    out.extend_from_slice(&cover_buf);
    out.extend_from_slice(&ctrl);
    out.extend_from_slice(&code);
    out.extend_from_slice(&data_stored);
    out
}

fn flush_literals(ctrl: &mut Vec<u8>, code: &mut Vec<u8>, lit: &[u8]) {
    if !lit.is_empty() {
        varint::encode_packed(ctrl, lit.len() as u64 - 1, 3, 2);
        code.extend_from_slice(lit);
    }
}

/// Run-length encode the delta stream into ctrl/code sections.
fn encode_rle(deltas: &[u8]) -> (Vec<u8>, Vec<u8>) {
    let mut ctrl = Vec::new();
    let mut code = Vec::new();
    let mut i = 0usize;
    let mut lit_start = 0usize;
    while i < deltas.len() {
        let v = deltas[i];
        let mut run = 1usize;
        while i + run < deltas.len() && deltas[i + run] == v {
            run += 1;
        }
        let ty = match v {
            0x00 => Some(0u8),
            0xFF => Some(1),
            _ if run >= 3 => Some(2),
            _ => None,
        };
        if let Some(ty) = ty {
            flush_literals(&mut ctrl, &mut code, &deltas[lit_start..i]);
            varint::encode_packed(&mut ctrl, run as u64 - 1, ty, 2);
            if ty == 2 {
                code.push(v);
            }
            i += run;
            lit_start = i;
        } else {
            i += run;
        }
    }
    flush_literals(&mut ctrl, &mut code, &deltas[lit_start..]);
    (ctrl, code)
}

/// Incremental cover encoding with a sign tag on the old-position delta.
fn encode_covers(covers: &[(u64, u64, u64)]) -> Vec<u8> {
    let mut out = Vec::new();
    let mut old_cursor = 0u64;
    let mut new_cursor = 0u64;
    for &(old_pos, new_pos, len) in covers {
        if old_pos >= old_cursor {
            varint::encode_packed(&mut out, old_pos - old_cursor, 0, 1);
        } else {
            varint::encode_packed(&mut out, old_cursor - old_pos, 1, 1);
        }
        varint::encode_packed(&mut out, new_pos - new_cursor, 0, 0);
        varint::encode_packed(&mut out, len, 0, 0);
        old_cursor = old_pos + len;
        new_cursor = new_pos + len;
    }
    out
}

/// Window byte + the data split into independently compressed zlib nodes.
fn compress_nodes(data: &[u8], window_bits: u8, nodes: usize) -> Vec<u8> {
    let mut out = vec![window_bits];
    let nodes = nodes.max(1);
    let parts: Vec<&[u8]> = if data.is_empty() {
        vec![b""]
    } else {
        let part = data.len().div_ceil(nodes).max(1);
        data.chunks(part).collect()
    };
    for part in parts {
        let compress =
            Compress::new_with_window_bits(Compression::default(), true, window_bits.max(9));
        let mut enc = ZlibEncoder::new_with_compress(Vec::new(), compress);
        enc.write_all(part).unwrap();
        out.extend_from_slice(&enc.finish().unwrap());
    }
    out
}

/// Deterministic pseudo-random payload.
pub fn lcg_data(len: usize, seed: u64) -> Vec<u8> {
    let mut s = seed;
    let mut out = Vec::with_capacity(len);
    for _ in 0..len {
        s = s.wrapping_mul(6364136223846793005).wrapping_add(1);
        out.push((s >> 33) as u8);
    }
    out
}

/// A diff produced by the HDIFF toolchain on a unix system: the text files
/// carry trailing newlines, so "foo\n" patches into "foobar\n".
pub const FIXTURE_OLD: &[u8] = b"foo\n";
pub const FIXTURE_NEW: &[u8] = b"foobar\n";
pub const FIXTURE_DIFF: [u8; 32] = [
    0x48, 0x44, 0x49, 0x46, 0x46, 0x31, 0x33, 0x26, 0x7a, 0x6c, 0x69, 0x62, 0x00, 0x07, 0x04,
    0x00, 0x00, 0x00, 0x01, 0x00, 0x00, 0x00, 0x07, 0x00, 0x06, 0x66, 0x6f, 0x6f, 0x62, 0x61,
    0x72, 0x0a,
];
