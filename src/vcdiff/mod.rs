// VCDIFF format implementation (RFC 3284).
//
// Decoding of the VCDIFF delta format, byte-for-byte compatible with
// xdelta3 output (including its application header and Adler-32 extensions).
//
// # Modules
//
// - `varint`        - Variable-length integer decoding (base-128, big-endian)
// - `address_cache` - NEAR/SAME address cache for COPY instruction addresses
// - `code_table`    - Default RFC 3284 code table (256 entries)
// - `header`        - File header and per-window header decoding
// - `decoder`       - Section reading and window reconstruction

pub mod address_cache;
pub mod code_table;
pub mod decoder;
pub mod header;
pub mod varint;

// Re-export key types for convenience.
pub use address_cache::AddressCache;
pub use code_table::{CodeTable, CodeTableEntry, Instruction, InstructionKind};
pub use decoder::{DecodeError, RawSections, SourceProvider, WindowSections, decode_window};
pub use header::{FileHeader, MAX_WINDOW_SIZE, VCDIFF_MAGIC, WindowHeader};
