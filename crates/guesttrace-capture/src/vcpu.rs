//! Per-vCPU execution state, grown lazily as vCPUs are first seen.

use crate::runtime::{RecordId, VcpuId};
use guesttrace_format::{TraceRecord, VcpuSummary};
use log::debug;
use std::sync::{Arc, Mutex, RwLock};
use std::time::Instant;

/// Bookkeeping for the most recent committed record of a lane.
#[derive(Debug, Clone, Copy)]
pub(crate) struct PrevRecord {
    /// Commit sequence number in the trace buffer.
    pub seq: u64,
    /// Its virtual address.
    pub vaddr: u64,
    /// Its decoded length, for the fall-through comparison.
    pub len: u8,
}

/// A dynamic record under assembly, tied to its prototype handle.
#[derive(Debug, Clone, Copy)]
pub(crate) struct PendingRecord {
    pub proto: RecordId,
    pub record: TraceRecord,
}

/// One vCPU's correlation state. The host serializes events within a vCPU,
/// so the lane mutex is uncontended in the common case; it exists for the
/// teardown path reading counters while the vCPU is still running.
pub(crate) struct VcpuLane {
    /// Record being assembled for the in-flight instruction, if any.
    pub current: Option<PendingRecord>,
    /// Most recent committed record, awaiting branch resolution.
    pub prev: Option<PrevRecord>,
    /// Records committed from this lane.
    pub committed: u64,
    /// First time this lane was touched.
    pub started: Instant,
}

impl VcpuLane {
    fn new() -> Self {
        Self {
            current: None,
            prev: None,
            committed: 0,
            started: Instant::now(),
        }
    }
}

/// Registry of per-vCPU lanes.
///
/// Lookups take the read lock; the first event from a previously unseen
/// vCPU grows the table under the write lock. The vCPU count need not be
/// known up front.
pub(crate) struct VcpuRegistry {
    lanes: RwLock<Vec<Arc<Mutex<VcpuLane>>>>,
}

impl VcpuRegistry {
    pub fn new() -> Self {
        Self {
            lanes: RwLock::new(Vec::new()),
        }
    }

    /// Fetch the lane for `vcpu`, creating it (and any gap below it) on
    /// first sighting.
    pub fn lane(&self, vcpu: VcpuId) -> Arc<Mutex<VcpuLane>> {
        let idx = vcpu as usize;
        {
            let lanes = self.lanes.read().unwrap();
            if let Some(lane) = lanes.get(idx) {
                return Arc::clone(lane);
            }
        }

        let mut lanes = self.lanes.write().unwrap();
        if lanes.len() <= idx {
            debug!("vcpu {} first seen, growing registry to {}", vcpu, idx + 1);
            lanes.resize_with(idx + 1, || Arc::new(Mutex::new(VcpuLane::new())));
        }
        Arc::clone(&lanes[idx])
    }

    /// Number of vCPUs observed so far.
    pub fn seen(&self) -> usize {
        self.lanes.read().unwrap().len()
    }

    /// Snapshot per-vCPU statistics for the exit summary.
    pub fn summaries(&self) -> Vec<VcpuSummary> {
        let lanes = self.lanes.read().unwrap();
        lanes
            .iter()
            .enumerate()
            .map(|(i, lane)| {
                let lane = lane.lock().unwrap();
                VcpuSummary {
                    vcpu: i as VcpuId,
                    instructions: lane.committed,
                    elapsed_secs: lane.started.elapsed().as_secs_f64(),
                }
            })
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn grows_on_demand() {
        let reg = VcpuRegistry::new();
        assert_eq!(reg.seen(), 0);
        let _ = reg.lane(2);
        assert_eq!(reg.seen(), 3);
        let _ = reg.lane(0);
        assert_eq!(reg.seen(), 3);
    }

    #[test]
    fn same_vcpu_same_lane() {
        let reg = VcpuRegistry::new();
        let a = reg.lane(1);
        a.lock().unwrap().committed = 7;
        let b = reg.lane(1);
        assert_eq!(b.lock().unwrap().committed, 7);
    }

    #[test]
    fn summaries_in_index_order() {
        let reg = VcpuRegistry::new();
        reg.lane(1).lock().unwrap().committed = 10;
        reg.lane(0).lock().unwrap().committed = 5;
        let s = reg.summaries();
        assert_eq!(s.len(), 2);
        assert_eq!((s[0].vcpu, s[0].instructions), (0, 5));
        assert_eq!((s[1].vcpu, s[1].instructions), (1, 10));
    }
}
