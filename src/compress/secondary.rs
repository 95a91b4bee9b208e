// Secondary decompression for VCDIFF DATA/INST/ADDR sections.
//
// The VCDIFF file header stores a secondary compressor ID; xdelta3 defines:
//   ID 1 = DJW (xdelta3-specific Huffman, not implemented here)
//   ID 2 = LZMA
//   ID 16 = FGK (xdelta3-specific, not implemented here)
//
// xdelta3 runs one LZMA (xz container) stream per section kind for the whole
// file: the stream header appears only in the first window's chunk, and
// every later chunk continues where the previous one was sync-flushed.  The
// decompression contexts therefore live as long as the decode session.

use crate::vcdiff::decoder::{DecodeError, RawSections};
use crate::vcdiff::header::{DeltaIndicator, VCD_DJW_ID, VCD_FGK_ID, VCD_LZMA_ID};
#[cfg(feature = "lzma-secondary")]
use crate::vcdiff::varint;

// ---------------------------------------------------------------------------
// ChunkDecompressor trait
// ---------------------------------------------------------------------------

/// A stateful decompressor for one kind of section.
///
/// `decompress_chunk` is called once per window, only when that section's
/// compression bit is set in the delta indicator.
pub trait ChunkDecompressor: Send {
    fn decompress_chunk(&mut self, chunk: &[u8]) -> Result<Vec<u8>, DecodeError>;
}

// ---------------------------------------------------------------------------
// Passthrough
// ---------------------------------------------------------------------------

/// Returns chunks unchanged.  Used when the file header names no secondary
/// compressor.
#[derive(Debug, Clone, Copy, Default)]
pub struct Passthrough;

impl ChunkDecompressor for Passthrough {
    fn decompress_chunk(&mut self, chunk: &[u8]) -> Result<Vec<u8>, DecodeError> {
        Ok(chunk.to_vec())
    }
}

// ---------------------------------------------------------------------------
// LZMA (xz) decompressor
// ---------------------------------------------------------------------------

/// LZMA secondary decompressor (ID 2), cross-compatible with xdelta3 C.
///
/// Chunk layout: varint decompressed size, then the next slice of a single
/// xz stream.
#[cfg(feature = "lzma-secondary")]
pub struct LzmaDecompressor {
    stream: xz2::stream::Stream,
    max_size: u64,
}

#[cfg(feature = "lzma-secondary")]
impl LzmaDecompressor {
    /// Output growth step once the declared size has been reached.
    const GROW: usize = 4096;

    /// Start a fresh xz stream.  Declared chunk sizes above `max_size` are
    /// rejected before any buffer is allocated.
    pub fn new(max_size: u64) -> Result<Self, DecodeError> {
        let stream = xz2::stream::Stream::new_stream_decoder(u64::MAX, 0)
            .map_err(|e| DecodeError::Decompression(format!("LZMA init failed: {e}")))?;
        Ok(Self { stream, max_size })
    }
}

#[cfg(feature = "lzma-secondary")]
impl std::fmt::Debug for LzmaDecompressor {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("LzmaDecompressor")
            .field("total_in", &self.stream.total_in())
            .field("total_out", &self.stream.total_out())
            .field("max_size", &self.max_size)
            .finish()
    }
}

#[cfg(feature = "lzma-secondary")]
impl ChunkDecompressor for LzmaDecompressor {
    fn decompress_chunk(&mut self, chunk: &[u8]) -> Result<Vec<u8>, DecodeError> {
        use xz2::stream::{Action, Status};

        let (expected, header_len) = varint::read_u64(chunk)
            .map_err(|e| DecodeError::Format(format!("LZMA chunk size: {e}")))?;
        if expected > self.max_size {
            return Err(DecodeError::SizeLimit {
                requested: expected,
                limit: self.max_size,
            });
        }
        let expected_len = usize::try_from(expected).map_err(|_| DecodeError::SizeLimit {
            requested: expected,
            limit: usize::MAX as u64,
        })?;

        let mut input = &chunk[header_len..];
        let mut output = Vec::with_capacity(expected_len);

        loop {
            if output.len() == output.capacity() {
                output.reserve(Self::GROW);
            }
            let in_before = self.stream.total_in();
            let out_before = self.stream.total_out();

            let status = self
                .stream
                .process_vec(input, &mut output, Action::Run)
                .map_err(|e| DecodeError::Decompression(format!("LZMA: {e}")))?;

            let consumed = (self.stream.total_in() - in_before) as usize;
            let produced = self.stream.total_out() - out_before;
            input = &input[consumed..];

            if output.len() > expected_len || matches!(status, Status::StreamEnd) {
                break;
            }
            // All input taken and the decoder stopped short of a full buffer:
            // nothing more until the next window's chunk.
            if input.is_empty() && output.len() < output.capacity() {
                break;
            }
            if consumed == 0 && produced == 0 {
                break;
            }
        }

        if output.len() != expected_len {
            return Err(DecodeError::DecompressedSizeMismatch {
                expected,
                actual: output.len() as u64,
            });
        }
        log::trace!(
            "LZMA chunk: {} -> {} bytes",
            chunk.len() - header_len,
            output.len()
        );
        Ok(output)
    }
}

// ---------------------------------------------------------------------------
// Decompressor set
// ---------------------------------------------------------------------------

/// Human-readable name of an xdelta3 secondary compressor ID.
pub fn secondary_name(id: u8) -> &'static str {
    match id {
        VCD_DJW_ID => "djw",
        VCD_LZMA_ID => "lzma",
        VCD_FGK_ID => "fgk",
        _ => "unknown",
    }
}

#[cfg_attr(not(feature = "lzma-secondary"), allow(unused_variables))]
fn decompressor_for_id(
    secondary_id: Option<u8>,
    max_size: u64,
) -> Result<Box<dyn ChunkDecompressor>, DecodeError> {
    match secondary_id {
        None => Ok(Box::new(Passthrough)),
        #[cfg(feature = "lzma-secondary")]
        Some(VCD_LZMA_ID) => Ok(Box::new(LzmaDecompressor::new(max_size)?)),
        Some(id) => Err(DecodeError::UnsupportedCodec(id)),
    }
}

/// One persistent decompression context per section kind.
pub struct DecompressorSet {
    adds_runs: Box<dyn ChunkDecompressor>,
    instructions: Box<dyn ChunkDecompressor>,
    addresses: Box<dyn ChunkDecompressor>,
}

impl DecompressorSet {
    /// Build the set for the compressor named in the file header.
    ///
    /// `None` yields passthrough contexts; an ID this build cannot decode is
    /// an `UnsupportedCodec` error.
    pub fn for_secondary_id(secondary_id: Option<u8>, max_size: u64) -> Result<Self, DecodeError> {
        Ok(Self {
            adds_runs: decompressor_for_id(secondary_id, max_size)?,
            instructions: decompressor_for_id(secondary_id, max_size)?,
            addresses: decompressor_for_id(secondary_id, max_size)?,
        })
    }

    /// Decompress the sections whose bit is set in `del_ind`; the others
    /// pass through untouched.
    pub fn decompress_sections(
        &mut self,
        del_ind: DeltaIndicator,
        raw: RawSections,
    ) -> Result<RawSections, DecodeError> {
        let RawSections { data, inst, addr } = raw;
        Ok(RawSections {
            data: apply(
                self.adds_runs.as_mut(),
                del_ind.contains(DeltaIndicator::DATACOMP),
                data,
            )?,
            inst: apply(
                self.instructions.as_mut(),
                del_ind.contains(DeltaIndicator::INSTCOMP),
                inst,
            )?,
            addr: apply(
                self.addresses.as_mut(),
                del_ind.contains(DeltaIndicator::ADDRCOMP),
                addr,
            )?,
        })
    }
}

impl std::fmt::Debug for DecompressorSet {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DecompressorSet").finish_non_exhaustive()
    }
}

fn apply(
    decompressor: &mut dyn ChunkDecompressor,
    compressed: bool,
    chunk: Vec<u8>,
) -> Result<Vec<u8>, DecodeError> {
    if compressed {
        decompressor.decompress_chunk(&chunk)
    } else {
        Ok(chunk)
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn passthrough_returns_input() {
        let mut p = Passthrough;
        assert_eq!(p.decompress_chunk(b"raw bytes").unwrap(), b"raw bytes");
    }

    #[test]
    fn no_secondary_id_passes_flagged_sections_through() {
        let mut set = DecompressorSet::for_secondary_id(None, 1 << 20).unwrap();
        let raw = RawSections {
            data: b"d".to_vec(),
            inst: b"i".to_vec(),
            addr: b"a".to_vec(),
        };
        let out = set.decompress_sections(DeltaIndicator::all(), raw.clone()).unwrap();
        assert_eq!(out, raw);
    }

    #[test]
    fn unknown_ids_are_unsupported() {
        for id in [VCD_DJW_ID, VCD_FGK_ID, 0, 3, 255] {
            match DecompressorSet::for_secondary_id(Some(id), 1 << 20) {
                Err(DecodeError::UnsupportedCodec(got)) => assert_eq!(got, id),
                other => panic!("id {id}: expected UnsupportedCodec, got {other:?}"),
            }
        }
    }

    #[cfg(not(feature = "lzma-secondary"))]
    #[test]
    fn lzma_without_feature_is_unsupported() {
        assert!(matches!(
            DecompressorSet::for_secondary_id(Some(VCD_LZMA_ID), 1 << 20),
            Err(DecodeError::UnsupportedCodec(VCD_LZMA_ID))
        ));
    }

    #[test]
    fn names() {
        assert_eq!(secondary_name(VCD_LZMA_ID), "lzma");
        assert_eq!(secondary_name(VCD_DJW_ID), "djw");
        assert_eq!(secondary_name(77), "unknown");
    }

    #[cfg(feature = "lzma-secondary")]
    mod lzma {
        use super::*;
        use xz2::stream::{Action, Check, Status, Stream};

        fn push_varint(out: &mut Vec<u8>, mut v: u64) {
            let mut groups = vec![(v & 0x7F) as u8];
            v >>= 7;
            while v > 0 {
                groups.push((v & 0x7F) as u8 | 0x80);
                v >>= 7;
            }
            groups.reverse();
            out.extend_from_slice(&groups);
        }

        /// Compress each part as one sync-flushed slice of a single xz stream
        /// and frame it as a chunk declaring `declared(part)` bytes.
        fn chunks(parts: &[&[u8]], declared: impl Fn(&[u8]) -> u64) -> Vec<Vec<u8>> {
            let mut enc = Stream::new_easy_encoder(6, Check::None).unwrap();
            parts
                .iter()
                .map(|part| {
                    let mut payload = Vec::with_capacity(part.len() + 256);
                    let mut rest: &[u8] = part;
                    loop {
                        if payload.len() == payload.capacity() {
                            payload.reserve(4096);
                        }
                        let before = enc.total_in();
                        let status = enc.process_vec(rest, &mut payload, Action::SyncFlush).unwrap();
                        rest = &rest[(enc.total_in() - before) as usize..];
                        if matches!(status, Status::StreamEnd) {
                            break;
                        }
                    }
                    let mut chunk = Vec::new();
                    push_varint(&mut chunk, declared(part));
                    chunk.extend_from_slice(&payload);
                    chunk
                })
                .collect()
        }

        #[test]
        fn single_chunk() {
            let text = b"the quick brown fox jumps over the lazy dog ".repeat(20);
            let c = chunks(&[&text], |p| p.len() as u64);
            let mut d = LzmaDecompressor::new(1 << 20).unwrap();
            assert_eq!(d.decompress_chunk(&c[0]).unwrap(), text);
        }

        #[test]
        fn stream_state_persists_across_chunks() {
            let a = b"first window payload, first window payload".to_vec();
            let b = b"second window continues the same stream".to_vec();
            let c = chunks(&[&a, &b], |p| p.len() as u64);
            let mut d = LzmaDecompressor::new(1 << 20).unwrap();
            assert_eq!(d.decompress_chunk(&c[0]).unwrap(), a);
            assert_eq!(d.decompress_chunk(&c[1]).unwrap(), b);

            // A fresh context cannot pick up mid-stream.
            let mut fresh = LzmaDecompressor::new(1 << 20).unwrap();
            assert!(fresh.decompress_chunk(&c[1]).is_err());
        }

        #[test]
        fn declared_size_mismatch() {
            let c = chunks(&[b"hello"], |_| 7);
            let mut d = LzmaDecompressor::new(1 << 20).unwrap();
            match d.decompress_chunk(&c[0]) {
                Err(DecodeError::DecompressedSizeMismatch { expected, actual }) => {
                    assert_eq!((expected, actual), (7, 5));
                }
                other => panic!("expected size mismatch, got {other:?}"),
            }
        }

        #[test]
        fn declared_size_over_limit() {
            let c = chunks(&[b"hello"], |_| 1 << 30);
            let mut d = LzmaDecompressor::new(1 << 20).unwrap();
            assert!(matches!(
                d.decompress_chunk(&c[0]),
                Err(DecodeError::SizeLimit { requested, limit })
                    if requested == 1 << 30 && limit == 1 << 20
            ));
        }

        #[test]
        fn corrupt_payload() {
            let mut d = LzmaDecompressor::new(1 << 20).unwrap();
            // Longer than the 12-byte xz stream header, so the bad magic is seen.
            let mut chunk = vec![5];
            chunk.extend_from_slice(&[0x5A; 24]);
            let err = d.decompress_chunk(&chunk).unwrap_err();
            assert!(matches!(err, DecodeError::Decompression(_)), "{err:?}");
        }

        #[test]
        fn set_decompresses_only_flagged_sections() {
            let data = b"adds and runs adds and runs".to_vec();
            let c = chunks(&[&data], |p| p.len() as u64);
            let mut set = DecompressorSet::for_secondary_id(Some(VCD_LZMA_ID), 1 << 20).unwrap();
            let raw = RawSections {
                data: c[0].clone(),
                inst: vec![4],
                addr: Vec::new(),
            };
            let out = set.decompress_sections(DeltaIndicator::DATACOMP, raw).unwrap();
            assert_eq!(out.data, data);
            assert_eq!(out.inst, vec![4]);
            assert!(out.addr.is_empty());
        }
    }
}
