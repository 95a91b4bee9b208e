// Whole-file patch application.
//
// - `decoder`   - DeltaDecoder: streaming decode with progress tracking,
//                 plus the `apply_diff` entry points and header inspection
// - `secondary` - Per-section secondary decompression (passthrough, LZMA)

pub mod decoder;
pub mod secondary;

pub use decoder::{
    ChecksumWarning, DecodeOptions, DeltaDecoder, DeltaSummary, PatchReport, apply_diff,
    apply_diff_to_vec, apply_diff_with_options, inspect,
};
pub use secondary::{ChunkDecompressor, DecompressorSet, Passthrough};
