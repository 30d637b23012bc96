//! The per-instruction trace record and its fixed-width codec.
//!
//! One [`TraceRecord`] is emitted per dynamic instruction execution. Static
//! fields (addresses, opcode word, instruction length) are captured when the
//! code is translated; dynamic fields (memory fact, branch outcome) are
//! filled in during execution. On the wire every record occupies exactly
//! [`RECORD_BYTES`] bytes, little-endian, so consumers can index frames by
//! record number.

use serde::{Deserialize, Serialize};
use std::fmt;

/// Size of one encoded record on the wire.
pub const RECORD_BYTES: usize = 48;

// Wire tags for the exec-data union.
const EXEC_NONE: u8 = 0;
const EXEC_LOAD: u8 = 1;
const EXEC_STORE: u8 = 2;
const EXEC_SOURCES: u8 = 3;

// Flag bits.
const FLAG_TAKEN: u8 = 1 << 0;
const FLAG_EXCEPTION: u8 = 1 << 1;

/// Direction of a memory access.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum MemoryKind {
    Load,
    Store,
}

impl fmt::Display for MemoryKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Load => f.write_str("load"),
            Self::Store => f.write_str("store"),
        }
    }
}

/// The memory access performed by an instruction, if any.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct MemoryFact {
    /// Guest virtual address of the access.
    pub address: u64,
    /// Load or store.
    pub kind: MemoryKind,
    /// Access size in bytes.
    pub size: u8,
}

/// Execution-time data attached to a record.
///
/// `Sources` mirrors the arithmetic-source half of the record's data union.
/// No current callback produces it; the variant and its wire tag are kept so
/// the record width does not change when a producer appears.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ExecData {
    Memory(MemoryFact),
    Sources { src1: u64, src2: u64 },
}

/// One captured instruction execution.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct TraceRecord {
    /// Guest virtual address of the instruction.
    pub virtual_pc: u64,
    /// Physical address of the instruction. Defaults to `virtual_pc`;
    /// overwritten only when a translation is available at memory-access
    /// time.
    pub physical_pc: u64,
    /// Raw instruction encoding (fixed-width capture; variable-length
    /// encodings beyond four bytes are not reconstructed).
    pub opcode: u32,
    /// Decoded instruction length in bytes, captured at translation time.
    pub insn_len: u8,
    /// Memory fact or reserved arithmetic sources, at most one per record.
    pub exec: Option<ExecData>,
    /// Whether control transferred somewhere other than the fall-through
    /// address. Resolved only once the next instruction on the same vCPU is
    /// observed; the final record of a capped trace stays unresolved.
    pub branch_taken: bool,
    /// Next instruction's virtual address, valid only when `branch_taken`.
    pub branch_target: u64,
    /// Reserved. Never set by the current callbacks.
    pub exception: bool,
}

/// Decoding failed on a malformed record.
#[derive(Debug, thiserror::Error)]
pub enum RecordDecodeError {
    #[error("unknown exec-data tag {0}")]
    BadExecTag(u8),
    #[error("unknown flag bits {0:#04x}")]
    BadFlags(u8),
}

impl TraceRecord {
    /// Create a record from translation-time metadata. Dynamic fields start
    /// unset; `physical_pc` defaults to the virtual address.
    pub fn from_translation(vaddr: u64, opcode: u32, len: u8) -> Self {
        Self {
            virtual_pc: vaddr,
            physical_pc: vaddr,
            opcode,
            insn_len: len,
            ..Self::default()
        }
    }

    /// Serialize into the fixed wire layout.
    pub fn encode(&self) -> [u8; RECORD_BYTES] {
        let (data0, data1, tag, size) = match self.exec {
            None => (0, 0, EXEC_NONE, 0),
            Some(ExecData::Memory(m)) => {
                let tag = match m.kind {
                    MemoryKind::Load => EXEC_LOAD,
                    MemoryKind::Store => EXEC_STORE,
                };
                (m.address, 0, tag, m.size)
            }
            Some(ExecData::Sources { src1, src2 }) => (src1, src2, EXEC_SOURCES, 0),
        };

        let mut flags = 0u8;
        if self.branch_taken {
            flags |= FLAG_TAKEN;
        }
        if self.exception {
            flags |= FLAG_EXCEPTION;
        }

        let mut out = [0u8; RECORD_BYTES];
        out[0..8].copy_from_slice(&self.virtual_pc.to_le_bytes());
        out[8..16].copy_from_slice(&self.physical_pc.to_le_bytes());
        out[16..24].copy_from_slice(&data0.to_le_bytes());
        out[24..32].copy_from_slice(&data1.to_le_bytes());
        out[32..40].copy_from_slice(&self.branch_target.to_le_bytes());
        out[40..44].copy_from_slice(&self.opcode.to_le_bytes());
        out[44] = tag;
        out[45] = size;
        out[46] = self.insn_len;
        out[47] = flags;
        out
    }

    /// Deserialize one record from its wire layout.
    pub fn decode(bytes: &[u8; RECORD_BYTES]) -> Result<Self, RecordDecodeError> {
        let u64_at = |off: usize| u64::from_le_bytes(bytes[off..off + 8].try_into().unwrap());

        let data0 = u64_at(16);
        let data1 = u64_at(24);
        let exec = match bytes[44] {
            EXEC_NONE => None,
            EXEC_LOAD => Some(ExecData::Memory(MemoryFact {
                address: data0,
                kind: MemoryKind::Load,
                size: bytes[45],
            })),
            EXEC_STORE => Some(ExecData::Memory(MemoryFact {
                address: data0,
                kind: MemoryKind::Store,
                size: bytes[45],
            })),
            EXEC_SOURCES => Some(ExecData::Sources {
                src1: data0,
                src2: data1,
            }),
            tag => return Err(RecordDecodeError::BadExecTag(tag)),
        };

        let flags = bytes[47];
        if flags & !(FLAG_TAKEN | FLAG_EXCEPTION) != 0 {
            return Err(RecordDecodeError::BadFlags(flags));
        }

        Ok(Self {
            virtual_pc: u64_at(0),
            physical_pc: u64_at(8),
            opcode: u32::from_le_bytes(bytes[40..44].try_into().unwrap()),
            insn_len: bytes[46],
            exec,
            branch_taken: flags & FLAG_TAKEN != 0,
            branch_target: u64_at(32),
            exception: flags & FLAG_EXCEPTION != 0,
        })
    }

    /// The memory fact, if the instruction performed a memory access.
    pub fn memory_fact(&self) -> Option<MemoryFact> {
        match self.exec {
            Some(ExecData::Memory(m)) => Some(m),
            _ => None,
        }
    }
}

impl fmt::Display for TraceRecord {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{:#014x} op={:08x} len={}",
            self.virtual_pc, self.opcode, self.insn_len
        )?;
        if self.physical_pc != self.virtual_pc {
            write!(f, " pa={:#x}", self.physical_pc)?;
        }
        match self.exec {
            Some(ExecData::Memory(m)) => write!(f, " {} {:#x}/{}", m.kind, m.address, m.size)?,
            Some(ExecData::Sources { src1, src2 }) => {
                write!(f, " srcs={:#x},{:#x}", src1, src2)?
            }
            None => {}
        }
        if self.branch_taken {
            write!(f, " taken -> {:#x}", self.branch_target)?;
        }
        Ok(())
    }
}
