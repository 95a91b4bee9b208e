// VCDIFF window decoder: section reading and instruction execution.
//
// Byte-for-byte compatible with xdelta3's decoder for non-VCD_TARGET
// windows.  Each window is reconstructed into a zero-initialised buffer of
// exactly the declared target length; COPY addresses at or above the source
// segment length index that buffer (window-local target addressing).

use std::io::{self, Read, Seek, SeekFrom};

use thiserror::Error;

use super::address_cache::{AddressCache, AddressCacheError};
use super::code_table::{CodeTable, InstructionKind};
use super::header::{WindowHeader, read_block};
use super::varint::{self, VarIntError};

// ---------------------------------------------------------------------------
// Decoder error
// ---------------------------------------------------------------------------

#[derive(Debug, Error)]
pub enum DecodeError {
    /// Malformed delta: bad magic, reserved bits, bad varint, bad program.
    #[error("invalid delta: {0}")]
    Format(String),

    /// Secondary compressor ID this build cannot decode.
    #[error("unsupported secondary compressor id {0}")]
    UnsupportedCodec(u8),

    /// A compressed section did not decompress to its declared size.
    #[error("decompressed section size mismatch: expected {expected} bytes, got {actual}")]
    DecompressedSizeMismatch { expected: u64, actual: u64 },

    /// Corrupt secondary-compressed payload.
    #[error("secondary decompression failed: {0}")]
    Decompression(String),

    /// Declared size above the configured cap.
    #[error("declared size {requested} exceeds limit of {limit} bytes")]
    SizeLimit { requested: u64, limit: u64 },

    /// Adler-32 mismatch (strict checksum mode only).
    #[error("window {window}: checksum mismatch: expected {expected:#010X}, got {actual:#010X}")]
    ChecksumMismatch {
        window: u64,
        expected: u32,
        actual: u32,
    },

    #[error("I/O error: {0}")]
    Io(#[from] io::Error),
}

impl From<VarIntError> for DecodeError {
    fn from(e: VarIntError) -> Self {
        Self::Format(e.to_string())
    }
}

impl From<AddressCacheError> for DecodeError {
    fn from(e: AddressCacheError) -> Self {
        Self::Format(e.to_string())
    }
}

// ---------------------------------------------------------------------------
// Source provider trait
// ---------------------------------------------------------------------------

/// Provides source data for COPY instructions that reference source bytes.
pub trait SourceProvider {
    /// Fill `buf` with source bytes starting at absolute offset `offset`.
    ///
    /// A source shorter than `offset + buf.len()` is a format error: the
    /// delta references bytes the source does not have.
    fn read_source(&mut self, offset: u64, buf: &mut [u8]) -> Result<(), DecodeError>;
}

impl<T: Read + Seek + ?Sized> SourceProvider for T {
    fn read_source(&mut self, offset: u64, buf: &mut [u8]) -> Result<(), DecodeError> {
        self.seek(SeekFrom::Start(offset))?;
        match self.read_exact(buf) {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == io::ErrorKind::UnexpectedEof => Err(DecodeError::Format(
                format!(
                    "source too short: COPY of {} bytes at offset {offset}",
                    buf.len()
                ),
            )),
            Err(e) => Err(e.into()),
        }
    }
}

// ---------------------------------------------------------------------------
// Window sections
// ---------------------------------------------------------------------------

/// Borrowed DATA/INST/ADDR section triplet for one window.
#[derive(Clone, Copy, Debug)]
pub struct WindowSections<'a> {
    pub data: &'a [u8],
    pub inst: &'a [u8],
    pub addr: &'a [u8],
}

/// Owned section payloads exactly as stored in the delta (possibly still
/// secondary-compressed).
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct RawSections {
    pub data: Vec<u8>,
    pub inst: Vec<u8>,
    pub addr: Vec<u8>,
}

impl RawSections {
    /// Read the three sections that follow `header`.
    pub fn read<R: Read>(r: &mut R, header: &WindowHeader) -> Result<Self, DecodeError> {
        Ok(Self {
            data: read_block(r, header.data_len, "adds/runs section")?,
            inst: read_block(r, header.inst_len, "instruction section")?,
            addr: read_block(r, header.addr_len, "address section")?,
        })
    }

    pub fn as_sections(&self) -> WindowSections<'_> {
        WindowSections {
            data: &self.data,
            inst: &self.inst,
            addr: &self.addr,
        }
    }
}

// ---------------------------------------------------------------------------
// Window decoder
// ---------------------------------------------------------------------------

/// Execute one window's instruction program.
///
/// The address cache is reset before the first instruction.  Returns the
/// reconstructed window, exactly `header.target_window_len` bytes.
pub fn decode_window<S: SourceProvider + ?Sized>(
    header: &WindowHeader,
    sections: WindowSections<'_>,
    table: &CodeTable,
    cache: &mut AddressCache,
    source: &mut S,
) -> Result<Vec<u8>, DecodeError> {
    let target_len = usize::try_from(header.target_window_len).map_err(|_| {
        DecodeError::SizeLimit {
            requested: header.target_window_len,
            limit: usize::MAX as u64,
        }
    })?;
    let (seg_len, seg_pos) = if header.has_source() {
        (header.source_segment_len, header.source_segment_pos)
    } else {
        (0, 0)
    };

    let WindowSections { data, inst, addr } = sections;
    let mut out = vec![0u8; target_len];
    let mut pos: usize = 0;
    let mut data_pos: usize = 0;
    let mut inst_pos: usize = 0;
    let mut addr_pos: usize = 0;

    cache.reset();

    while inst_pos < inst.len() {
        let opcode = inst[inst_pos];
        inst_pos += 1;

        for half in table.entry(opcode).instructions() {
            let size = match half.fixed_size() {
                Some(size) => u64::from(size),
                None => {
                    let (size, consumed) = varint::read_u64(&inst[inst_pos..])
                        .map_err(|e| DecodeError::Format(format!("instruction size: {e}")))?;
                    inst_pos += consumed;
                    size
                }
            };

            let end = (pos as u64)
                .checked_add(size)
                .filter(|&end| end <= target_len as u64)
                .ok_or_else(|| {
                    DecodeError::Format(format!(
                        "instruction of {size} bytes at offset {pos} overruns window of {target_len} bytes"
                    ))
                })? as usize;
            let len = end - pos;

            match half.kind {
                InstructionKind::Add => {
                    let bytes = data
                        .get(data_pos..data_pos + len)
                        .ok_or_else(|| DecodeError::Format("adds/runs section underflow (ADD)".into()))?;
                    out[pos..end].copy_from_slice(bytes);
                    data_pos += len;
                }
                InstructionKind::Run => {
                    let &byte = data
                        .get(data_pos)
                        .ok_or_else(|| DecodeError::Format("adds/runs section underflow (RUN)".into()))?;
                    data_pos += 1;
                    out[pos..end].fill(byte);
                }
                InstructionKind::Copy => {
                    let here = seg_len
                        .checked_add(pos as u64)
                        .ok_or_else(|| DecodeError::Format("COPY position overflows".into()))?;
                    let (address, consumed) = cache.decode(half.mode, &addr[addr_pos..], here)?;
                    addr_pos += consumed;

                    if address < seg_len {
                        // Source copy: must stay inside the segment.
                        if address.checked_add(size).is_none_or(|end| end > seg_len) {
                            return Err(DecodeError::Format(format!(
                                "COPY of {size} bytes at {address} crosses source segment end {seg_len}"
                            )));
                        }
                        let offset = seg_pos.checked_add(address).ok_or_else(|| {
                            DecodeError::Format("source offset overflows".into())
                        })?;
                        source.read_source(offset, &mut out[pos..end])?;
                    } else {
                        // Target copy: `from < pos` because the address is
                        // below `here`.
                        let from = (address - seg_len) as usize;
                        if from + len <= pos {
                            out.copy_within(from..from + len, pos);
                        } else {
                            // Overlapping: reads must see bytes written by
                            // this same instruction.
                            for i in 0..len {
                                out[pos + i] = out[from + i];
                            }
                        }
                    }
                }
            }
            pos = end;
        }
    }

    if pos != target_len {
        return Err(DecodeError::Format(format!(
            "window instructions produced {pos} bytes, header declares {target_len}"
        )));
    }

    Ok(out)
}

// ---------------------------------------------------------------------------
// Adler-32
// ---------------------------------------------------------------------------

/// Adler-32 of a reconstructed window, as stored under VCD_ADLER32.
pub fn adler32(data: &[u8]) -> u32 {
    #[cfg(feature = "adler32")]
    {
        let mut hasher = simd_adler32::Adler32::new();
        hasher.write(data);
        hasher.finish()
    }
    #[cfg(not(feature = "adler32"))]
    {
        const MOD_ADLER: u32 = 65521;
        // Largest block that cannot overflow `b` before reduction.
        const NMAX: usize = 5552;
        let mut a: u32 = 1;
        let mut b: u32 = 0;
        for chunk in data.chunks(NMAX) {
            for &byte in chunk {
                a += u32::from(byte);
                b += a;
            }
            a %= MOD_ADLER;
            b %= MOD_ADLER;
        }
        (b << 16) | a
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
