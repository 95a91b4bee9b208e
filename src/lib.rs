//! vcpatch: VCDIFF (RFC 3284) patch application in Rust.
//!
//! Decodes deltas produced by xdelta3, including its extensions: the
//! application header, per-window Adler-32 checksums, and LZMA secondary
//! compression.
//!
//! The crate provides:
//! - The VCDIFF format layer (`vcdiff`)
//! - Whole-file decoding and the `apply_diff` entry points (`compress`)
//! - An optional CLI (`cli` feature)
//!
//! # Quick Start
//!
//! ```
//! use std::io::Cursor;
//!
//! // One window: ADD "abc".
//! let delta = [
//!     0xD6, 0xC3, 0xC4, 0x00, 0x00, // magic, no header extensions
//!     0x00, 0x09, 0x03, 0x00,       // no source, enc len, target len, no compression
//!     0x03, 0x01, 0x00,             // data/inst/addr section lengths
//!     b'a', b'b', b'c', 0x04,       // data, then opcode 4 = ADD size 3
//! ];
//!
//! let mut target = Vec::new();
//! let app_header = vcpatch::apply_diff(&mut Cursor::new(b""), &delta[..], &mut target).unwrap();
//! assert_eq!(target, b"abc");
//! assert!(app_header.is_none());
//! ```

pub mod compress;
pub mod vcdiff;

#[cfg(feature = "cli")]
pub mod cli;

pub use compress::decoder::{
    ChecksumWarning, DecodeOptions, DeltaDecoder, PatchReport, apply_diff, apply_diff_to_vec,
    apply_diff_with_options, inspect,
};
pub use vcdiff::decoder::DecodeError;
