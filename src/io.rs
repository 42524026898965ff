// File-level one-shot patch application.
//
// The synchronous variant of the caller surface: the whole compressed diff
// is already at hand (in memory or on disk), the old image and the patched
// output are plain files, and no queue or worker is involved. The new file
// is written beside the old one, never in place, so a failure mid-apply
// leaves the old image untouched.

use std::path::Path;

use log::debug;

use crate::error::PatchError;
use crate::hdiff::{HdiffEngine, PatchEngine};
use crate::stream::{FileInput, FileOutput, InputStream, OutputStream};

// ---------------------------------------------------------------------------
// Stats
// ---------------------------------------------------------------------------

/// Statistics returned by the one-shot apply functions.
#[derive(Debug, Clone)]
pub struct ApplyStats {
    /// Old image size in bytes.
    pub old_size: u64,
    /// Compressed diff size in bytes.
    pub diff_size: u64,
    /// Patched output size in bytes.
    pub new_size: u64,
    /// SHA-256 of the patched output (if the `file-io` feature is enabled).
    pub output_sha256: Option<[u8; 32]>,
}

// ---------------------------------------------------------------------------
// apply_file / apply_file_from_mem
// ---------------------------------------------------------------------------

/// Apply the diff at `diff_path` to `old_path`, writing the result to
/// `out_path`.
pub fn apply_file(
    old_path: &Path,
    diff_path: &Path,
    out_path: &Path,
) -> Result<ApplyStats, PatchError> {
    let mut diff = FileInput::open(diff_path)?;
    let diff_size = diff.len();
    apply_to_file(old_path, out_path, &mut diff, diff_size)
}

/// Apply an in-memory diff to `old_path`, writing the result to `out_path`.
pub fn apply_file_from_mem(
    old_path: &Path,
    out_path: &Path,
    diff: &[u8],
) -> Result<ApplyStats, PatchError> {
    let mut diff_stream: &[u8] = diff;
    apply_to_file(old_path, out_path, &mut diff_stream, diff.len() as u64)
}

/// Apply a diff across caller-provided streams with the default engine.
pub fn apply_streams<O, N, D>(old: &mut O, new: &mut N, diff: &mut D) -> Result<(), PatchError>
where
    O: InputStream,
    N: OutputStream,
    D: InputStream,
{
    HdiffEngine::default().apply(old, new, diff)
}

fn apply_to_file<D: InputStream>(
    old_path: &Path,
    out_path: &Path,
    diff: &mut D,
    diff_size: u64,
) -> Result<ApplyStats, PatchError> {
    let mut old = FileInput::open(old_path)?;
    let old_size = old.len();
    let mut out = FileOutput::create(out_path)?;

    debug!(
        "one-shot apply: {} ({old_size}B) + {diff_size}B diff -> {}",
        old_path.display(),
        out_path.display()
    );

    HdiffEngine::default().apply(&mut old, &mut out, diff)?;

    let file = out.into_file()?;
    let new_size = file.metadata()?.len();
    drop(file);

    let output_sha256 = output_digest(out_path)?;

    Ok(ApplyStats {
        old_size,
        diff_size,
        new_size,
        output_sha256,
    })
}

#[cfg(feature = "file-io")]
fn output_digest(path: &Path) -> Result<Option<[u8; 32]>, PatchError> {
    use sha2::{Digest, Sha256};
    use std::io::Read;

    let mut file = std::fs::File::open(path)?;
    let mut hasher = Sha256::new();
    let mut buf = vec![0u8; 64 * 1024];
    loop {
        let n = file.read(&mut buf)?;
        if n == 0 {
            break;
        }
        hasher.update(&buf[..n]);
    }
    Ok(Some(hasher.finalize().into()))
}

#[cfg(not(feature = "file-io"))]
fn output_digest(_path: &Path) -> Result<Option<[u8; 32]>, PatchError> {
    Ok(None)
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
