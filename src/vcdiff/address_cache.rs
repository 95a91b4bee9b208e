// VCDIFF address cache (RFC 3284, Section 5.3).
//
// Implements the NEAR and SAME address caches used to compactly encode
// COPY instruction addresses.  Decoding matches xdelta3's
// `xd3_decode_address` / `xd3_update_cache`.

use thiserror::Error;

use super::code_table::CodeTable;
use super::varint::{self, VarIntError};

// ---------------------------------------------------------------------------
// Address modes (RFC 3284 Section 5.3)
// ---------------------------------------------------------------------------

/// Absolute address.
pub const VCD_SELF: u8 = 0;
/// Address relative to "here" (current position in address space).
pub const VCD_HERE: u8 = 1;

// ---------------------------------------------------------------------------
// Address cache
// ---------------------------------------------------------------------------

/// NEAR/SAME address cache.
///
/// Default configuration (s_near=4, s_same=3) gives 9 address modes:
///   0      VCD_SELF  - absolute
///   1      VCD_HERE  - here - value
///   2..5   NEAR      - near\[mode-2\] + value
///   6..8   SAME      - same\[(mode-6)*256 + byte\]
#[derive(Clone, Debug)]
pub struct AddressCache {
    s_near: usize,
    s_same: usize,
    near: Vec<u64>,
    same: Vec<u64>,
    next_slot: usize,
}

impl AddressCache {
    /// Cache laid out for the given code table's modes.
    pub fn for_table(table: &CodeTable) -> Self {
        Self::with_sizes(table.s_near(), table.s_same())
    }

    /// Create with explicit cache sizes.
    pub fn with_sizes(s_near: usize, s_same: usize) -> Self {
        Self {
            s_near,
            s_same,
            near: vec![0; s_near],
            same: vec![0; s_same * 256],
            next_slot: 0,
        }
    }

    /// Reset cache state to initial (all zeros).
    /// Called at the start of each window.
    pub fn reset(&mut self) {
        self.near.fill(0);
        self.same.fill(0);
        self.next_slot = 0;
    }

    /// Total number of address modes (2 + s_near + s_same).
    #[inline]
    pub fn mode_count(&self) -> usize {
        2 + self.s_near + self.s_same
    }

    /// Number of NEAR cache slots.
    #[inline]
    pub fn s_near(&self) -> usize {
        self.s_near
    }

    /// Number of SAME cache groups.
    #[inline]
    pub fn s_same(&self) -> usize {
        self.s_same
    }

    /// The first SAME mode index (2 + s_near).
    #[inline]
    fn same_start(&self) -> usize {
        2 + self.s_near
    }

    /// Slot in the SAME array that `addr` maps to.
    #[inline]
    pub fn same_index(&self, addr: u64) -> usize {
        (addr % (self.s_same as u64 * 256)) as usize
    }

    /// Record a resolved address in both caches.
    #[inline]
    pub fn update(&mut self, addr: u64) {
        if self.s_near > 0 {
            self.near[self.next_slot] = addr;
            self.next_slot = (self.next_slot + 1) % self.s_near;
        }
        if self.s_same > 0 {
            let idx = self.same_index(addr);
            self.same[idx] = addr;
        }
    }

    /// Decode an address given the mode and the remaining address section.
    ///
    /// `here` is the current position in the address space (source segment
    /// length + bytes produced so far in this window).  Returns
    /// `(address, bytes_consumed)`; the cache is updated on success.
    pub fn decode(
        &mut self,
        mode: u8,
        addr_data: &[u8],
        here: u64,
    ) -> Result<(u64, usize), AddressCacheError> {
        let mode = mode as usize;
        if mode >= self.mode_count() {
            return Err(AddressCacheError::InvalidMode(mode));
        }
        let same_start = self.same_start();

        let (addr, consumed) = if mode < same_start {
            // SELF, HERE, or NEAR: read a varint.
            let (raw, consumed) = varint::read_u64(addr_data)?;
            let addr = match mode {
                0 => raw,
                1 => here
                    .checked_sub(raw)
                    .ok_or(AddressCacheError::InvalidAddr { addr: raw, here })?,
                _ => self.near[mode - 2]
                    .checked_add(raw)
                    .ok_or(AddressCacheError::Overflow)?,
            };
            (addr, consumed)
        } else {
            // SAME mode: read a single raw byte.
            let &byte = addr_data.first().ok_or(AddressCacheError::AddrUnderflow)?;
            let slot = mode - same_start;
            (self.same[slot * 256 + byte as usize], 1)
        };

        if addr >= here {
            return Err(AddressCacheError::InvalidAddr { addr, here });
        }

        self.update(addr);
        Ok((addr, consumed))
    }
}

impl Default for AddressCache {
    fn default() -> Self {
        Self::for_table(&CodeTable::rfc3284())
    }
}

// ---------------------------------------------------------------------------
// Error type
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum AddressCacheError {
    /// Not enough bytes in the address section.
    #[error("address section underflow")]
    AddrUnderflow,
    /// Malformed varint in the address section.
    #[error("address: {0}")]
    VarInt(#[from] VarIntError),
    /// Mode outside the code table's range.
    #[error("invalid address mode {0}")]
    InvalidMode(usize),
    /// Address is not behind the current position.
    #[error("COPY address {addr} is not below current position {here}")]
    InvalidAddr { addr: u64, here: u64 },
    /// NEAR base plus offset overflows.
    #[error("COPY address overflows")]
    Overflow,
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
