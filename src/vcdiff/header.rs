// VCDIFF file header and per-window header decoding (RFC 3284, Section 4).
//
// Follows xdelta3's header layout, including its extensions: the
// application header (VCD_APPHEADER) in the file header and the Adler-32
// checksum (VCD_ADLER32) in the window header.

use std::io::{self, Read};

use bitflags::bitflags;

use super::decoder::DecodeError;
use super::varint;

// ---------------------------------------------------------------------------
// VCDIFF magic
// ---------------------------------------------------------------------------

pub const VCDIFF_MAGIC: [u8; 4] = [0xD6, 0xC3, 0xC4, 0x00];

// ---------------------------------------------------------------------------
// Indicator bytes
// ---------------------------------------------------------------------------

bitflags! {
    /// File header indicator (Hdr_Indicator).
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
    pub struct HeaderIndicator: u8 {
        /// A secondary compressor ID byte follows.
        const SECONDARY = 1 << 0;
        /// A custom code table follows (unsupported).
        const CODETABLE = 1 << 1;
        /// A length-prefixed application header follows (xdelta3 extension).
        const APPHEADER = 1 << 2;
    }
}

bitflags! {
    /// Window indicator (Win_Indicator).
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
    pub struct WindowIndicator: u8 {
        /// COPY may reference a segment of the source.
        const SOURCE = 1 << 0;
        /// COPY may reference a segment of earlier target (unsupported).
        const TARGET = 1 << 1;
        /// A 4-byte Adler-32 of the window output follows (xdelta3 extension).
        const ADLER32 = 1 << 2;
    }
}

bitflags! {
    /// Delta indicator (Delta_Indicator): which sections are compressed.
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
    pub struct DeltaIndicator: u8 {
        /// Adds/runs data section.
        const DATACOMP = 1 << 0;
        /// Instructions section.
        const INSTCOMP = 1 << 1;
        /// Addresses section.
        const ADDRCOMP = 1 << 2;
    }
}

// ---------------------------------------------------------------------------
// Secondary compressor IDs (xdelta3)
// ---------------------------------------------------------------------------

pub const VCD_DJW_ID: u8 = 1;
pub const VCD_LZMA_ID: u8 = 2;
pub const VCD_FGK_ID: u8 = 16;

// ---------------------------------------------------------------------------
// Hard limits
// ---------------------------------------------------------------------------

/// Default cap on a decoded window (128 MiB).  xdelta3 itself never writes
/// windows above 16 MiB.
pub const MAX_WINDOW_SIZE: u64 = 1 << 27;

/// Read exactly `len` bytes without trusting `len` for the allocation.
pub(crate) fn read_block<R: Read>(r: &mut R, len: u64, what: &str) -> Result<Vec<u8>, DecodeError> {
    let mut data = Vec::new();
    r.by_ref().take(len).read_to_end(&mut data)?;
    if (data.len() as u64) < len {
        return Err(DecodeError::Io(io::Error::new(
            io::ErrorKind::UnexpectedEof,
            format!("{what}: expected {len} bytes, found {}", data.len()),
        )));
    }
    Ok(data)
}

fn read_byte<R: Read>(r: &mut R) -> io::Result<u8> {
    let mut buf = [0u8; 1];
    r.read_exact(&mut buf)?;
    Ok(buf[0])
}

// ---------------------------------------------------------------------------
// File header
// ---------------------------------------------------------------------------

/// Parsed VCDIFF file header.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct FileHeader {
    /// Header indicator byte.
    pub hdr_ind: HeaderIndicator,
    /// Secondary compressor ID (if `SECONDARY` is set).
    pub secondary_id: Option<u8>,
    /// Application-defined header data (if `APPHEADER` is set).
    pub app_header: Option<Vec<u8>>,
}

impl FileHeader {
    /// Decode a VCDIFF file header.
    ///
    /// Matches xdelta3's decoder states DEC_VCHEAD through DEC_APPDAT.
    pub fn decode<R: Read>(r: &mut R) -> Result<Self, DecodeError> {
        let mut magic = [0u8; 4];
        r.read_exact(&mut magic)?;
        if magic != VCDIFF_MAGIC {
            return Err(DecodeError::Format(format!(
                "invalid VCDIFF magic: expected D6 C3 C4 00, got {:02X} {:02X} {:02X} {:02X}",
                magic[0], magic[1], magic[2], magic[3]
            )));
        }

        let raw = read_byte(r)?;
        let hdr_ind = HeaderIndicator::from_bits(raw).ok_or_else(|| {
            DecodeError::Format(format!("invalid header indicator bits: {raw:#04X}"))
        })?;

        let secondary_id = if hdr_ind.contains(HeaderIndicator::SECONDARY) {
            Some(read_byte(r)?)
        } else {
            None
        };

        if hdr_ind.contains(HeaderIndicator::CODETABLE) {
            return Err(DecodeError::Format(
                "custom code tables (VCD_CODETABLE) are not supported".into(),
            ));
        }

        let app_header = if hdr_ind.contains(HeaderIndicator::APPHEADER) {
            let len = varint::stream_read_u64(r)?;
            Some(read_block(r, len, "application header")?)
        } else {
            None
        };

        Ok(Self {
            hdr_ind,
            secondary_id,
            app_header,
        })
    }
}

// ---------------------------------------------------------------------------
// Per-window header
// ---------------------------------------------------------------------------

/// Parsed VCDIFF per-window header.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct WindowHeader {
    /// Window indicator byte.
    pub win_ind: WindowIndicator,

    // --- Source segment (if SOURCE) ---
    /// Length of the source segment COPY may reference.
    pub source_segment_len: u64,
    /// Offset of the source segment within the source stream.
    pub source_segment_pos: u64,

    // --- Delta encoding lengths ---
    /// Total length of the delta encoding (redundancy field).
    pub enc_len: u64,
    /// Length of the target window to reconstruct.
    pub target_window_len: u64,
    /// Which sections are secondary-compressed.
    pub del_ind: DeltaIndicator,

    // --- Section sizes (as stored, i.e. compressed when flagged) ---
    /// Length of the adds/runs data section.
    pub data_len: u64,
    /// Length of the instruction section.
    pub inst_len: u64,
    /// Length of the address section.
    pub addr_len: u64,

    // --- Optional checksum ---
    /// Adler-32 checksum of the target window (if ADLER32).
    pub adler32: Option<u32>,
}

impl WindowHeader {
    #[inline]
    pub fn has_source(&self) -> bool {
        self.win_ind.contains(WindowIndicator::SOURCE)
    }

    #[inline]
    pub fn has_checksum(&self) -> bool {
        self.win_ind.contains(WindowIndicator::ADLER32)
    }

    /// Total bytes of section payload following the header.
    #[inline]
    pub fn sections_len(&self) -> u64 {
        self.data_len
            .saturating_add(self.inst_len)
            .saturating_add(self.addr_len)
    }

    /// The `enc_len` implied by the other fields:
    ///   sizeof(target_window_len) + 1(del_ind) +
    ///   sizeof(data_len) + sizeof(inst_len) + sizeof(addr_len) +
    ///   data_len + inst_len + addr_len + [4 if adler32]
    pub fn compute_enc_len(&self) -> u64 {
        let mut len = varint::sizeof_u64(self.target_window_len) as u64;
        len += 1;
        len += varint::sizeof_u64(self.data_len) as u64;
        len += varint::sizeof_u64(self.inst_len) as u64;
        len += varint::sizeof_u64(self.addr_len) as u64;
        len = len.saturating_add(self.sections_len());
        if self.has_checksum() {
            len = len.saturating_add(4);
        }
        len
    }

    /// Decode a per-window header.
    ///
    /// Matches xdelta3 decoder states DEC_WININD through DEC_CKSUM.
    /// Returns `None` on clean EOF (no more windows).  A target length above
    /// `max_window_size` fails before anything is allocated for the window.
    pub fn decode<R: Read>(r: &mut R, max_window_size: u64) -> Result<Option<Self>, DecodeError> {
        let raw = match read_byte(r) {
            Ok(b) => b,
            Err(e) if e.kind() == io::ErrorKind::UnexpectedEof => return Ok(None),
            Err(e) => return Err(e.into()),
        };
        let win_ind = WindowIndicator::from_bits(raw).ok_or_else(|| {
            DecodeError::Format(format!("invalid window indicator bits: {raw:#04X}"))
        })?;
        if win_ind.contains(WindowIndicator::TARGET) {
            return Err(DecodeError::Format(
                "target-window copies (VCD_TARGET) are not supported".into(),
            ));
        }

        let (source_segment_len, source_segment_pos) = if win_ind.contains(WindowIndicator::SOURCE) {
            let len = varint::stream_read_u64(r)?;
            let pos = varint::stream_read_u64(r)?;
            (len, pos)
        } else {
            (0, 0)
        };

        let enc_len = varint::stream_read_u64(r)?;
        let target_window_len = varint::stream_read_u64(r)?;
        if target_window_len > max_window_size {
            return Err(DecodeError::SizeLimit {
                requested: target_window_len,
                limit: max_window_size,
            });
        }

        let raw = read_byte(r)?;
        let del_ind = DeltaIndicator::from_bits(raw).ok_or_else(|| {
            DecodeError::Format(format!("invalid delta indicator bits: {raw:#04X}"))
        })?;

        let data_len = varint::stream_read_u64(r)?;
        let inst_len = varint::stream_read_u64(r)?;
        let addr_len = varint::stream_read_u64(r)?;

        let adler32 = if win_ind.contains(WindowIndicator::ADLER32) {
            let mut cksum = [0u8; 4];
            r.read_exact(&mut cksum)?;
            Some(u32::from_be_bytes(cksum))
        } else {
            None
        };

        let hdr = WindowHeader {
            win_ind,
            source_segment_len,
            source_segment_pos,
            enc_len,
            target_window_len,
            del_ind,
            data_len,
            inst_len,
            addr_len,
            adler32,
        };

        let expected = hdr.compute_enc_len();
        if enc_len != expected {
            log::warn!("window delta encoding length is {enc_len}, layout implies {expected}");
        }

        Ok(Some(hdr))
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Cursor;

    fn file_header(bytes: &[u8]) -> Result<FileHeader, DecodeError> {
        FileHeader::decode(&mut Cursor::new(bytes))
    }

    fn window_header(bytes: &[u8]) -> Result<Option<WindowHeader>, DecodeError> {
        WindowHeader::decode(&mut Cursor::new(bytes), MAX_WINDOW_SIZE)
    }

    #[test]
    fn file_header_minimal() {
        let hdr = file_header(&[0xD6, 0xC3, 0xC4, 0x00, 0x00]).unwrap();
        assert!(hdr.hdr_ind.is_empty());
        assert!(hdr.secondary_id.is_none());
        assert!(hdr.app_header.is_none());
    }

    #[test]
    fn file_header_with_secondary_and_appheader() {
        let mut data = VCDIFF_MAGIC.to_vec();
        data.push(0x05); // SECONDARY | APPHEADER
        data.push(VCD_LZMA_ID);
        data.push(4);
        data.extend_from_slice(b"nsmb");
        let hdr = file_header(&data).unwrap();
        assert_eq!(hdr.secondary_id, Some(VCD_LZMA_ID));
        assert_eq!(hdr.app_header.as_deref(), Some(b"nsmb".as_slice()));
    }

    #[test]
    fn file_header_rejects_bad_magic() {
        let err = file_header(&[0xD6, 0xC3, 0xC4, 0x01, 0x00]).unwrap_err();
        assert!(matches!(err, DecodeError::Format(_)), "{err:?}");
    }

    #[test]
    fn file_header_rejects_code_table() {
        let mut data = VCDIFF_MAGIC.to_vec();
        data.push(0x02);
        let err = file_header(&data).unwrap_err();
        assert!(matches!(err, DecodeError::Format(_)), "{err:?}");
    }

    #[test]
    fn file_header_rejects_reserved_bits() {
        let mut data = VCDIFF_MAGIC.to_vec();
        data.push(0x80);
        assert!(matches!(file_header(&data), Err(DecodeError::Format(_))));
    }

    #[test]
    fn file_header_truncated_appheader() {
        let mut data = VCDIFF_MAGIC.to_vec();
        data.extend_from_slice(&[0x04, 0x10, b'x']);
        assert!(matches!(file_header(&data), Err(DecodeError::Io(_))));
    }

    #[test]
    fn window_header_with_source_and_checksum() {
        let data = [
            0x05, // SOURCE | ADLER32
            0x81, 0x00, // segment len 128
            0x10, // segment pos 16
            0x0F, // enc_len
            0x20, // target len 32
            0x00, // del_ind
            0x01, 0x02, 0x03, // section lengths
            0xAA, 0xBB, 0xCC, 0xDD,
        ];
        let wh = window_header(&data).unwrap().unwrap();
        assert!(wh.has_source());
        assert_eq!(wh.source_segment_len, 128);
        assert_eq!(wh.source_segment_pos, 16);
        assert_eq!(wh.target_window_len, 32);
        assert_eq!((wh.data_len, wh.inst_len, wh.addr_len), (1, 2, 3));
        assert_eq!(wh.adler32, Some(0xAABBCCDD));
        assert_eq!(wh.compute_enc_len(), wh.enc_len);
    }

    #[test]
    fn window_header_eof_returns_none() {
        assert!(window_header(&[]).unwrap().is_none());
    }

    #[test]
    fn window_header_rejects_target_window() {
        let err = window_header(&[0x02, 0x00, 0x00]).unwrap_err();
        assert!(matches!(err, DecodeError::Format(_)), "{err:?}");
    }

    #[test]
    fn window_header_enforces_size_limit() {
        // target len 0x8000001 = 128 MiB + 1
        let data = [0x00, 0x05, 0xC0, 0x80, 0x80, 0x01];
        match window_header(&data) {
            Err(DecodeError::SizeLimit { requested, limit }) => {
                assert_eq!(requested, MAX_WINDOW_SIZE + 1);
                assert_eq!(limit, MAX_WINDOW_SIZE);
            }
            other => panic!("expected size limit error, got {other:?}"),
        }
    }

    #[test]
    fn window_header_rejects_reserved_delta_bits() {
        let data = [0x00, 0x04, 0x00, 0x08, 0x00, 0x00, 0x00];
        assert!(matches!(window_header(&data), Err(DecodeError::Format(_))));
    }
}
