//! The correlation protocol: attach execution-time facts to the right
//! record, resolve the previous record's branch outcome, commit.
//!
//! All functions take the caller's lane lock; the host's per-vCPU event
//! ordering (memory accesses before completion, for one instruction at a
//! time) is what makes "the current record" well defined.

use crate::buffer::{Admission, Resolution, TraceBuffer};
use crate::runtime::{MemoryAccess, RecordId};
use crate::store::StaticInsn;
use crate::vcpu::{PendingRecord, PrevRecord, VcpuLane};
use guesttrace_format::{ExecData, MemoryFact, MemoryKind, TraceRecord};

/// Get the dynamic record being assembled for `proto`, materializing it
/// from the prototype if this execution has produced no fact yet. A leftover
/// record for a different prototype (an execution whose completion never
/// arrived) is discarded and replaced.
fn current_record<'l>(
    lane: &'l mut VcpuLane,
    id: RecordId,
    proto: StaticInsn,
) -> &'l mut PendingRecord {
    let stale = lane.current.map(|p| p.proto != id).unwrap_or(true);
    if stale {
        lane.current = Some(PendingRecord {
            proto: id,
            record: TraceRecord::from_translation(proto.vaddr, proto.opcode, proto.len),
        });
    }
    lane.current.as_mut().unwrap()
}

/// Fill the record's memory fact. Only the first access observed for an
/// execution lands; the fields are write-once. The physical address, when
/// the host has a translation available, resolves `physical_pc` at the same
/// moment.
pub(crate) fn note_memory_access(
    lane: &mut VcpuLane,
    id: RecordId,
    proto: StaticInsn,
    access: MemoryAccess,
) {
    let pending = current_record(lane, id, proto);
    if pending.record.exec.is_some() {
        return;
    }
    pending.record.exec = Some(ExecData::Memory(MemoryFact {
        address: access.vaddr,
        kind: if access.is_store {
            MemoryKind::Store
        } else {
            MemoryKind::Load
        },
        size: access.size,
    }));
    if let Some(paddr) = access.paddr {
        pending.record.physical_pc = paddr;
    }
}

/// Commit the record for a completed instruction.
///
/// The previous record on this lane becomes resolvable now: control fell
/// through iff its own address plus its own decoded length equals the
/// completing instruction's address; anything else is a taken transfer to
/// that address. The patch and the commit happen under one buffer lock
/// acquisition. The very first instruction of a lane has no predecessor and
/// skips resolution; a rejected (over-budget) record resolves nothing.
pub(crate) fn complete_instruction(
    lane: &mut VcpuLane,
    id: RecordId,
    proto: StaticInsn,
    buffer: &TraceBuffer,
) {
    let pending = match lane.current.take() {
        Some(p) if p.proto == id => p,
        _ => PendingRecord {
            proto: id,
            record: TraceRecord::from_translation(proto.vaddr, proto.opcode, proto.len),
        },
    };
    let record = pending.record;

    let resolve = lane.prev.map(|prev| {
        let fall_through = prev.vaddr + prev.len as u64 == record.virtual_pc;
        Resolution {
            seq: prev.seq,
            taken: !fall_through,
            target: record.virtual_pc,
        }
    });

    match buffer.append(record, resolve) {
        Admission::Committed(seq) => {
            lane.prev = Some(PrevRecord {
                seq,
                vaddr: record.virtual_pc,
                len: record.insn_len,
            });
            lane.committed += 1;
        }
        Admission::BudgetExhausted => {}
    }
}
