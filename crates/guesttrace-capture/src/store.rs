//! Static instruction prototypes, allocated once per translation.

use crate::runtime::{DecodedInsn, RecordId};
use std::sync::Mutex;

/// Translation-time snapshot of one instruction.
#[derive(Debug, Clone, Copy)]
pub struct StaticInsn {
    pub vaddr: u64,
    pub opcode: u32,
    pub len: u8,
}

/// Arena of static instruction prototypes.
///
/// One prototype is appended per instruction each time its code unit is
/// translated; retranslation after cache eviction simply appends fresh
/// prototypes, so stale handles stay valid for the session's lifetime.
/// Prototypes are never reconciled or freed before teardown.
pub struct RecordStore {
    protos: Mutex<Vec<StaticInsn>>,
}

impl RecordStore {
    pub fn new() -> Self {
        Self {
            protos: Mutex::new(Vec::new()),
        }
    }

    /// Allocate prototypes for a whole translated block under one lock.
    pub fn allocate_block(&self, insns: &[DecodedInsn]) -> Vec<RecordId> {
        let mut protos = self.protos.lock().unwrap();
        let base = protos.len() as u32;
        protos.extend(insns.iter().map(|i| StaticInsn {
            vaddr: i.vaddr,
            opcode: i.opcode,
            len: i.len,
        }));
        (base..base + insns.len() as u32).map(RecordId).collect()
    }

    /// Look up a prototype. `None` for a handle this store never issued.
    pub fn get(&self, id: RecordId) -> Option<StaticInsn> {
        self.protos.lock().unwrap().get(id.index()).copied()
    }

    /// Prototypes allocated so far.
    pub fn len(&self) -> usize {
        self.protos.lock().unwrap().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl Default for RecordStore {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn insn(vaddr: u64) -> DecodedInsn {
        DecodedInsn {
            vaddr,
            opcode: 0x13,
            len: 4,
        }
    }

    #[test]
    fn allocates_sequential_handles() {
        let store = RecordStore::new();
        let a = store.allocate_block(&[insn(0x1000), insn(0x1004)]);
        let b = store.allocate_block(&[insn(0x2000)]);
        assert_eq!(a.len(), 2);
        assert_eq!(b[0].index(), 2);
        assert_eq!(store.get(a[1]).unwrap().vaddr, 0x1004);
        assert_eq!(store.get(b[0]).unwrap().vaddr, 0x2000);
    }

    #[test]
    fn retranslation_gets_fresh_handles() {
        let store = RecordStore::new();
        let first = store.allocate_block(&[insn(0x1000)]);
        let second = store.allocate_block(&[insn(0x1000)]);
        assert_ne!(first[0], second[0]);
        assert_eq!(store.len(), 2);
    }

    #[test]
    fn unknown_handle_is_none() {
        let store = RecordStore::new();
        assert!(store.get(RecordId(7)).is_none());
    }
}
