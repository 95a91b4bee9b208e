// Streaming delta decoder.
//
// DeltaDecoder drives a whole VCDIFF file:
//   - Parses the file header once and builds the secondary decompressors
//   - Decodes window by window, writing each to any `impl Write`
//   - Tracks progress and checksum warnings for the final PatchReport

use std::io::{self, Cursor, Read, Seek, Write};

use crate::compress::secondary::DecompressorSet;
use crate::vcdiff::address_cache::AddressCache;
use crate::vcdiff::code_table::CodeTable;
use crate::vcdiff::decoder::{self, DecodeError, RawSections, SourceProvider};
use crate::vcdiff::header::{FileHeader, MAX_WINDOW_SIZE, WindowHeader};

// ---------------------------------------------------------------------------
// Options
// ---------------------------------------------------------------------------

/// Knobs for a decode session.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DecodeOptions {
    /// Compute and compare Adler-32 when a window carries one.
    pub verify_checksum: bool,
    /// Turn a checksum mismatch into `DecodeError::ChecksumMismatch`
    /// instead of a warning.
    pub strict_checksum: bool,
    /// Largest target window (and declared decompressed section) accepted.
    pub max_window_size: u64,
}

impl Default for DecodeOptions {
    fn default() -> Self {
        Self {
            verify_checksum: true,
            strict_checksum: false,
            max_window_size: MAX_WINDOW_SIZE,
        }
    }
}

// ---------------------------------------------------------------------------
// Report
// ---------------------------------------------------------------------------

/// A window whose output did not match its stored Adler-32.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ChecksumWarning {
    /// Zero-based window index.
    pub window: u64,
    pub expected: u32,
    pub actual: u32,
}

/// Outcome of a completed decode.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PatchReport {
    /// Application header from the file header (xdelta3 stores file names here).
    pub app_header: Option<Vec<u8>>,
    pub windows: u64,
    pub bytes_written: u64,
    pub checksum_warnings: Vec<ChecksumWarning>,
}

impl PatchReport {
    /// `true` when every checksummed window matched.
    pub fn is_clean(&self) -> bool {
        self.checksum_warnings.is_empty()
    }
}

// ---------------------------------------------------------------------------
// DeltaDecoder
// ---------------------------------------------------------------------------

/// Streaming delta decoder with progress tracking.
///
/// Decodes VCDIFF delta streams one window at a time, writing output
/// to any `impl Write` destination. Only one decoded window is in memory
/// at a time.
pub struct DeltaDecoder<R: Read> {
    reader: R,
    options: DecodeOptions,
    header: FileHeader,
    table: CodeTable,
    cache: AddressCache,
    decompressors: DecompressorSet,
    bytes_decoded: u64,
    windows_decoded: u64,
    checksum_warnings: Vec<ChecksumWarning>,
}

impl<R: Read> DeltaDecoder<R> {
    /// Read the file header with default options.
    pub fn new(reader: R) -> Result<Self, DecodeError> {
        Self::with_options(reader, DecodeOptions::default())
    }

    /// Read the file header and prepare the session state.
    pub fn with_options(mut reader: R, options: DecodeOptions) -> Result<Self, DecodeError> {
        let header = FileHeader::decode(&mut reader)?;
        log::debug!(
            "file header: indicator {:?}, secondary {:?}, app header {} bytes",
            header.hdr_ind,
            header.secondary_id,
            header.app_header.as_ref().map_or(0, Vec::len)
        );

        let decompressors =
            DecompressorSet::for_secondary_id(header.secondary_id, options.max_window_size)?;
        let table = CodeTable::rfc3284();
        let cache = AddressCache::for_table(&table);

        Ok(Self {
            reader,
            options,
            header,
            table,
            cache,
            decompressors,
            bytes_decoded: 0,
            windows_decoded: 0,
            checksum_warnings: Vec::new(),
        })
    }

    /// The parsed file header.
    pub fn file_header(&self) -> &FileHeader {
        &self.header
    }

    /// Application header bytes, if present.
    pub fn app_header(&self) -> Option<&[u8]> {
        self.header.app_header.as_deref()
    }

    /// Decode all windows, writing output to `writer`.
    ///
    /// Returns the total number of bytes decoded.
    pub fn decode_to<S, W>(&mut self, source: &mut S, writer: &mut W) -> Result<u64, DecodeError>
    where
        S: SourceProvider + ?Sized,
        W: Write + ?Sized,
    {
        while self.decode_window_to(source, writer)?.is_some() {}
        Ok(self.bytes_decoded)
    }

    /// Decode the next window, writing its output to `writer`.
    ///
    /// Returns `Some(window_size)` if a window was decoded, or `None`
    /// if the delta ended cleanly at a window boundary.
    pub fn decode_window_to<S, W>(
        &mut self,
        source: &mut S,
        writer: &mut W,
    ) -> Result<Option<u64>, DecodeError>
    where
        S: SourceProvider + ?Sized,
        W: Write + ?Sized,
    {
        let index = self.windows_decoded;
        let Some(wh) = WindowHeader::decode(&mut self.reader, self.options.max_window_size)? else {
            return Ok(None);
        };
        log::debug!(
            "window {index}: target {} bytes, source segment {}@{}, delta indicator {:?}",
            wh.target_window_len,
            wh.source_segment_len,
            wh.source_segment_pos,
            wh.del_ind
        );

        let raw = RawSections::read(&mut self.reader, &wh)?;
        let sections = self.decompressors.decompress_sections(wh.del_ind, raw)?;
        log::trace!(
            "window {index}: sections data {} / inst {} / addr {} bytes",
            sections.data.len(),
            sections.inst.len(),
            sections.addr.len()
        );

        let window = decoder::decode_window(
            &wh,
            sections.as_sections(),
            &self.table,
            &mut self.cache,
            source,
        )?;

        if self.options.verify_checksum
            && let Some(expected) = wh.adler32
        {
            let actual = decoder::adler32(&window);
            if actual != expected {
                if self.options.strict_checksum {
                    return Err(DecodeError::ChecksumMismatch {
                        window: index,
                        expected,
                        actual,
                    });
                }
                log::warn!(
                    "window {index}: Adler-32 mismatch (expected {expected:#010X}, computed {actual:#010X}); continuing"
                );
                self.checksum_warnings.push(ChecksumWarning {
                    window: index,
                    expected,
                    actual,
                });
            }
        }

        writer.write_all(&window)?;

        let window_size = window.len() as u64;
        self.bytes_decoded += window_size;
        self.windows_decoded += 1;
        Ok(Some(window_size))
    }

    /// Total bytes decoded so far.
    pub fn bytes_decoded(&self) -> u64 {
        self.bytes_decoded
    }

    /// Number of windows decoded so far.
    pub fn windows_decoded(&self) -> u64 {
        self.windows_decoded
    }

    /// Checksum mismatches tolerated so far.
    pub fn checksum_warnings(&self) -> &[ChecksumWarning] {
        &self.checksum_warnings
    }

    /// Consume the decoder and summarise the session.
    pub fn finish(self) -> PatchReport {
        PatchReport {
            app_header: self.header.app_header,
            windows: self.windows_decoded,
            bytes_written: self.bytes_decoded,
            checksum_warnings: self.checksum_warnings,
        }
    }
}

// ---------------------------------------------------------------------------
// Entry points
// ---------------------------------------------------------------------------

/// Apply `delta` to `source`, writing the reconstructed target to `output`.
///
/// Returns the application header, if the delta carries one.  Checksum
/// mismatches are logged and otherwise ignored.
pub fn apply_diff<S, R, W>(
    source: &mut S,
    delta: R,
    output: &mut W,
) -> Result<Option<Vec<u8>>, DecodeError>
where
    S: Read + Seek + ?Sized,
    R: Read,
    W: Write + ?Sized,
{
    let report = apply_diff_with_options(source, delta, output, &DecodeOptions::default())?;
    Ok(report.app_header)
}

/// Like [`apply_diff`], with explicit options and the full report.
pub fn apply_diff_with_options<S, R, W>(
    source: &mut S,
    delta: R,
    output: &mut W,
    options: &DecodeOptions,
) -> Result<PatchReport, DecodeError>
where
    S: Read + Seek + ?Sized,
    R: Read,
    W: Write + ?Sized,
{
    let mut decoder = DeltaDecoder::with_options(delta, *options)?;
    decoder.decode_to(source, output)?;
    output.flush()?;
    let report = decoder.finish();
    log::debug!(
        "decoded {} bytes in {} windows ({} checksum warnings)",
        report.bytes_written,
        report.windows,
        report.checksum_warnings.len()
    );
    Ok(report)
}

/// Decode a VCDIFF delta from memory.
///
/// Returns `(target, app_header)`.
pub fn apply_diff_to_vec(
    source: &[u8],
    delta: &[u8],
) -> Result<(Vec<u8>, Option<Vec<u8>>), DecodeError> {
    let mut target = Vec::new();
    let app_header = apply_diff(&mut Cursor::new(source), delta, &mut target)?;
    Ok((target, app_header))
}

// ---------------------------------------------------------------------------
// Inspection
// ---------------------------------------------------------------------------

/// File header plus every window header of a delta.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct DeltaSummary {
    pub header: FileHeader,
    pub windows: Vec<WindowHeader>,
}

impl DeltaSummary {
    /// Sum of the declared target window lengths.
    pub fn target_len(&self) -> u64 {
        self.windows
            .iter()
            .fold(0u64, |acc, w| acc.saturating_add(w.target_window_len))
    }
}

/// Parse headers without executing any window.  Section payloads are
/// skipped, so oversized windows are listed rather than rejected.
pub fn inspect<R: Read>(mut delta: R) -> Result<DeltaSummary, DecodeError> {
    let header = FileHeader::decode(&mut delta)?;
    let mut windows = Vec::new();
    while let Some(wh) = WindowHeader::decode(&mut delta, u64::MAX)? {
        let len = wh.sections_len();
        let skipped = io::copy(&mut delta.by_ref().take(len), &mut io::sink())?;
        if skipped != len {
            return Err(DecodeError::Io(io::Error::new(
                io::ErrorKind::UnexpectedEof,
                format!(
                    "window {}: expected {len} section bytes, found {skipped}",
                    windows.len()
                ),
            )));
        }
        windows.push(wh);
    }
    Ok(DeltaSummary { header, windows })
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
