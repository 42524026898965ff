// Round-trips against the documented fixture: a diff produced by the HDIFF
// toolchain on a unix system, patching "foo\n" into "foobar\n". The same
// bytes are applied through every caller surface.

mod common;

use common::{FIXTURE_DIFF, FIXTURE_NEW, FIXTURE_OLD};
use oxipatch::flash::{MemBank, MemRegion};
use oxipatch::hdiff::{DiffHead, HdiffEngine, PatchEngine};
use oxipatch::io;
use oxipatch::ota::OtaSession;
use oxipatch::stream::MemOutput;
use tempfile::tempdir;

#[test]
fn fixture_head_parses() {
    let mut diff: &[u8] = &FIXTURE_DIFF;
    let head = DiffHead::read(&mut diff).unwrap();
    assert_eq!(head.codec, "zlib");
    assert_eq!(head.old_size, FIXTURE_OLD.len() as u64);
    assert_eq!(head.new_size, FIXTURE_NEW.len() as u64);
    assert_eq!(head.cover_count, 0);
    assert!(!head.any_compressed());
}

#[test]
fn fixture_applies_in_memory() {
    let mut old: &[u8] = FIXTURE_OLD;
    let mut diff: &[u8] = &FIXTURE_DIFF;
    let mut out = MemOutput::new();
    HdiffEngine::default()
        .apply(&mut old, &mut out, &mut diff)
        .unwrap();
    assert_eq!(out.as_slice(), FIXTURE_NEW);
}

#[test]
fn fixture_applies_from_mem_to_files() {
    let dir = tempdir().unwrap();
    let old_path = dir.path().join("old.txt");
    let out_path = dir.path().join("new.txt");
    std::fs::write(&old_path, FIXTURE_OLD).unwrap();

    let stats = io::apply_file_from_mem(&old_path, &out_path, &FIXTURE_DIFF).unwrap();
    assert_eq!(stats.old_size, FIXTURE_OLD.len() as u64);
    assert_eq!(stats.new_size, FIXTURE_NEW.len() as u64);
    assert_eq!(std::fs::read(&out_path).unwrap(), FIXTURE_NEW);
}

#[test]
fn fixture_applies_from_diff_file() {
    let dir = tempdir().unwrap();
    let old_path = dir.path().join("old.txt");
    let diff_path = dir.path().join("patch.hdiff");
    let out_path = dir.path().join("new.txt");
    std::fs::write(&old_path, FIXTURE_OLD).unwrap();
    std::fs::write(&diff_path, FIXTURE_DIFF).unwrap();

    let stats = io::apply_file(&old_path, &diff_path, &out_path).unwrap();
    assert_eq!(stats.diff_size, FIXTURE_DIFF.len() as u64);
    assert_eq!(std::fs::read(&out_path).unwrap(), FIXTURE_NEW);
}

#[test]
fn fixture_applies_through_live_session() {
    let bank = MemBank::new(64);
    let mut session = OtaSession::begin(
        MemRegion::from(FIXTURE_OLD.to_vec()),
        bank.clone(),
        FIXTURE_DIFF.len() as u64,
    )
    .unwrap();

    // Dribble the diff in one byte at a time, as a slow network would.
    for byte in FIXTURE_DIFF {
        session.write(&[byte]).unwrap();
    }
    session.finalize().unwrap();

    assert_eq!(bank.committed_image().unwrap(), FIXTURE_NEW);
    assert!(bank.is_selected());
}
