//! Oxipatch: bounded-memory application of HDIFF binary deltas.
//!
//! The crate provides:
//! - A uniform all-or-nothing stream contract over files, memory, flash
//!   banks, and a network-fed bounded queue (`stream`, `flash`)
//! - A streaming multi-node zlib decompressor with O(window) memory (`inflate`)
//! - A built-in HDIFF13 patch engine behind an exchangeable trait (`hdiff`)
//! - A live-ingest session orchestrator for OTA-style updates (`ota`)
//! - One-shot file helpers (`io`) and an optional CLI (`cli` feature)
//!
//! # Quick Start
//!
//! ```
//! use oxipatch::hdiff::{HdiffEngine, PatchEngine};
//! use oxipatch::stream::MemOutput;
//!
//! // A diff produced by the HDIFF toolchain: "foo\n" -> "foobar\n".
//! const DIFF: [u8; 32] = [
//!     0x48, 0x44, 0x49, 0x46, 0x46, 0x31, 0x33, 0x26, 0x7a, 0x6c, 0x69, 0x62,
//!     0x00, 0x07, 0x04, 0x00, 0x00, 0x00, 0x01, 0x00, 0x00, 0x00, 0x07, 0x00,
//!     0x06, 0x66, 0x6f, 0x6f, 0x62, 0x61, 0x72, 0x0a,
//! ];
//!
//! let mut old: &[u8] = b"foo\n";
//! let mut diff: &[u8] = &DIFF;
//! let mut out = MemOutput::new();
//! HdiffEngine::default().apply(&mut old, &mut out, &mut diff).unwrap();
//! assert_eq!(out.as_slice(), b"foobar\n");
//! ```

pub mod error;
pub mod flash;
pub mod hdiff;
pub mod inflate;
pub mod io;
pub mod ota;
pub mod stream;

#[cfg(feature = "cli")]
pub mod cli;

pub use error::PatchError;
