// VCDIFF default code table (RFC 3284, Section 5.6).
//
// Byte-for-byte compatible with xdelta3's `xd3_build_code_table` using the
// `__rfc3284_code_table_desc` descriptor.  The generated table has exactly
// 256 entries; NOOP halves are not stored, so every entry holds one or two
// real instructions.

/// Default NEAR cache size.
pub const DEFAULT_S_NEAR: usize = 4;
/// Default SAME cache size.
pub const DEFAULT_S_SAME: usize = 3;

/// Minimum match length for COPY instructions (RFC 3284).
pub const MIN_MATCH: u8 = 4;

/// Primitive instruction kinds.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum InstructionKind {
    /// Literal bytes from the adds/runs section.
    Add,
    /// One byte from the adds/runs section, repeated.
    Run,
    /// Bytes from the source segment or from earlier window output.
    Copy,
}

/// One half of a code table entry.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct Instruction {
    pub kind: InstructionKind,
    /// Size from the table; `0` means the size follows in the instruction
    /// section as a varint.
    pub size: u8,
    /// Addressing mode (COPY only, `0` otherwise).
    pub mode: u8,
}

impl Instruction {
    const fn add(size: u8) -> Self {
        Self {
            kind: InstructionKind::Add,
            size,
            mode: 0,
        }
    }

    const fn run(size: u8) -> Self {
        Self {
            kind: InstructionKind::Run,
            size,
            mode: 0,
        }
    }

    const fn copy(size: u8, mode: u8) -> Self {
        Self {
            kind: InstructionKind::Copy,
            size,
            mode,
        }
    }

    /// The table size, or `None` when it must be read from the stream.
    #[inline]
    pub fn fixed_size(&self) -> Option<u8> {
        (self.size != 0).then_some(self.size)
    }
}

/// A single entry in the 256-element code table.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct CodeTableEntry {
    pub first: Instruction,
    pub second: Option<Instruction>,
}

impl CodeTableEntry {
    const fn single(first: Instruction) -> Self {
        Self {
            first,
            second: None,
        }
    }

    const fn double(first: Instruction, second: Instruction) -> Self {
        Self {
            first,
            second: Some(second),
        }
    }

    /// The entry's instructions, in execution order.
    pub fn instructions(&self) -> impl Iterator<Item = Instruction> {
        std::iter::once(self.first).chain(self.second)
    }
}

/// The complete code table plus the cache geometry it was built for.
#[derive(Clone, Debug)]
pub struct CodeTable {
    entries: Box<[CodeTableEntry]>,
    s_near: usize,
    s_same: usize,
}

impl CodeTable {
    /// Build the default RFC 3284 code table.
    pub fn rfc3284() -> Self {
        const ADD_SIZES: u8 = 17;
        const CPY_SIZES: u8 = 15;
        const CPY_MODES: u8 = (2 + DEFAULT_S_NEAR + DEFAULT_S_SAME) as u8; // 9
        const NEAR_LIMIT: u8 = (2 + DEFAULT_S_NEAR) as u8; // 6
        const ADDCOPY_ADD_MAX: u8 = 4;
        const ADDCOPY_NEAR_CPY_MAX: u8 = 6;

        let mut tbl = Vec::with_capacity(256);

        // RUN, size from stream.
        tbl.push(CodeTableEntry::single(Instruction::run(0)));

        // ADD, size 0 (from stream) then 1..=17.
        for size in 0..=ADD_SIZES {
            tbl.push(CodeTableEntry::single(Instruction::add(size)));
        }

        // COPY per mode: size 0 (from stream) then MIN_MATCH..MIN_MATCH+15.
        for mode in 0..CPY_MODES {
            tbl.push(CodeTableEntry::single(Instruction::copy(0, mode)));
            for size in MIN_MATCH..MIN_MATCH + CPY_SIZES {
                tbl.push(CodeTableEntry::single(Instruction::copy(size, mode)));
            }
        }

        // ADD+COPY, SELF/HERE/NEAR modes: ADD 1..4, COPY 4..6.
        for mode in 0..NEAR_LIMIT {
            for add_size in 1..=ADDCOPY_ADD_MAX {
                for cpy_size in MIN_MATCH..=ADDCOPY_NEAR_CPY_MAX {
                    tbl.push(CodeTableEntry::double(
                        Instruction::add(add_size),
                        Instruction::copy(cpy_size, mode),
                    ));
                }
            }
        }

        // ADD+COPY, SAME modes: ADD 1..4, COPY 4.
        for mode in NEAR_LIMIT..CPY_MODES {
            for add_size in 1..=ADDCOPY_ADD_MAX {
                tbl.push(CodeTableEntry::double(
                    Instruction::add(add_size),
                    Instruction::copy(MIN_MATCH, mode),
                ));
            }
        }

        // COPY+ADD, every mode: COPY 4, ADD 1.
        for mode in 0..CPY_MODES {
            tbl.push(CodeTableEntry::double(
                Instruction::copy(MIN_MATCH, mode),
                Instruction::add(1),
            ));
        }

        debug_assert_eq!(tbl.len(), 256, "code table must have exactly 256 entries");

        Self {
            entries: tbl.into_boxed_slice(),
            s_near: DEFAULT_S_NEAR,
            s_same: DEFAULT_S_SAME,
        }
    }

    /// Look up the entry for an opcode.
    #[inline]
    pub fn entry(&self, opcode: u8) -> &CodeTableEntry {
        &self.entries[opcode as usize]
    }

    /// Number of entries (always 256).
    #[inline]
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// NEAR cache size this table's modes are laid out for.
    #[inline]
    pub fn s_near(&self) -> usize {
        self.s_near
    }

    /// SAME cache size this table's modes are laid out for.
    #[inline]
    pub fn s_same(&self) -> usize {
        self.s_same
    }
}

impl Default for CodeTable {
    fn default() -> Self {
        Self::rfc3284()
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use InstructionKind::{Add, Run};

    #[test]
    fn table_has_256_entries() {
        let t = CodeTable::rfc3284();
        assert_eq!(t.len(), 256);
        assert_eq!(t.s_near(), 4);
        assert_eq!(t.s_same(), 3);
    }

    #[test]
    fn index_0_is_run() {
        let t = CodeTable::rfc3284();
        let e = t.entry(0);
        assert_eq!(e.first.kind, Run);
        assert_eq!(e.first.fixed_size(), None);
        assert!(e.second.is_none());
    }

    #[test]
    fn indices_1_to_18_are_add_sizes_0_to_17() {
        let t = CodeTable::rfc3284();
        for (opcode, size) in (1..=18u8).zip(0..=17u8) {
            let e = t.entry(opcode);
            assert_eq!(e.first.kind, Add, "opcode {opcode}");
            assert_eq!(e.first.size, size, "opcode {opcode}");
            assert!(e.second.is_none(), "opcode {opcode}");
        }
    }

    #[test]
    fn copy_blocks_are_16_wide() {
        let t = CodeTable::rfc3284();
        for mode in 0..9u8 {
            let base = 19 + 16 * mode;
            assert_eq!(t.entry(base).first, Instruction::copy(0, mode));
            assert_eq!(t.entry(base + 1).first, Instruction::copy(4, mode));
            assert_eq!(t.entry(base + 15).first, Instruction::copy(18, mode));
        }
    }

    #[test]
    fn add_copy_doubles_start_at_163() {
        let t = CodeTable::rfc3284();
        let e = t.entry(163);
        assert_eq!(e.first, Instruction::add(1));
        assert_eq!(e.second, Some(Instruction::copy(4, 0)));

        // Mode 5 ends at 234 with ADD(4)+COPY(6).
        let e = t.entry(234);
        assert_eq!(e.first, Instruction::add(4));
        assert_eq!(e.second, Some(Instruction::copy(6, 5)));

        // SAME modes start at 235.
        let e = t.entry(236);
        assert_eq!(e.first, Instruction::add(2));
        assert_eq!(e.second, Some(Instruction::copy(4, 6)));
    }

    #[test]
    fn copy_add_doubles_fill_the_tail() {
        let t = CodeTable::rfc3284();
        for mode in 0..9u8 {
            let e = t.entry(247 + mode);
            assert_eq!(e.first, Instruction::copy(4, mode));
            assert_eq!(e.second, Some(Instruction::add(1)));
        }
    }

    #[test]
    fn doubles_never_read_sizes_from_stream() {
        let t = CodeTable::rfc3284();
        for opcode in 0..=255u8 {
            let e = t.entry(opcode);
            if e.second.is_some() {
                assert!(
                    e.instructions().all(|i| i.fixed_size().is_some()),
                    "double at {opcode} has a stream size"
                );
            }
        }
    }

    #[test]
    fn instructions_iterates_in_order() {
        let t = CodeTable::rfc3284();
        let kinds: Vec<_> = t.entry(247).instructions().map(|i| i.kind).collect();
        assert_eq!(kinds, vec![InstructionKind::Copy, Add]);
        assert_eq!(t.entry(5).instructions().count(), 1);
    }
}
