//! The bounded, shared buffer of committed records.
//!
//! One mutex guards append, branch resolution, threshold checks and drain.
//! Record order across vCPUs is not a correctness requirement, only append
//! atomicity; throughput is bottlenecked on compression and I/O, not on
//! this lock.

use guesttrace_format::{TraceRecord, RECORD_BYTES};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Mutex;

/// Outcome of offering a record to the buffer.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Admission {
    /// Committed with this session-wide sequence number.
    Committed(u64),
    /// The instruction budget is spent; the record was not admitted.
    BudgetExhausted,
}

/// A branch-outcome patch for an earlier record, applied with the same lock
/// acquisition as the commit of its successor.
#[derive(Debug, Clone, Copy)]
pub struct Resolution {
    /// Sequence number of the record to patch.
    pub seq: u64,
    /// Whether control left the fall-through path.
    pub taken: bool,
    /// Successor address; meaningful only when `taken`.
    pub target: u64,
}

/// The contiguous byte image handed to the flush pipeline.
pub struct DrainedImage {
    pub bytes: Vec<u8>,
    pub record_count: u32,
}

struct BufferInner {
    records: Vec<TraceRecord>,
    /// Records handed to the flush pipeline so far; also the sequence
    /// number of `records[0]` when non-empty.
    flushed: u64,
    /// Records committed over the whole session.
    committed: u64,
}

/// Growable, budget-bounded record buffer shared by all vCPUs.
pub struct TraceBuffer {
    inner: Mutex<BufferInner>,
    max_inst: u64,
    flush_threshold: usize,
    exhausted: AtomicBool,
}

impl TraceBuffer {
    pub fn new(max_inst: u64, flush_threshold: usize) -> Self {
        Self {
            inner: Mutex::new(BufferInner {
                records: Vec::new(),
                flushed: 0,
                committed: 0,
            }),
            max_inst,
            flush_threshold,
            exhausted: AtomicBool::new(max_inst == 0),
        }
    }

    /// Admission-check and commit `record`, applying `resolve` to its
    /// predecessor first under the same lock. The budget is tested before
    /// the record is admitted; once spent, nothing is committed or patched.
    ///
    /// A resolution whose target record was already flushed is dropped:
    /// that record left for disk unresolved, the same truncation artifact
    /// as the final record of a capped trace.
    pub fn append(&self, record: TraceRecord, resolve: Option<Resolution>) -> Admission {
        let mut inner = self.inner.lock().unwrap();

        if inner.committed >= self.max_inst {
            self.exhausted.store(true, Ordering::Release);
            return Admission::BudgetExhausted;
        }

        if let Some(r) = resolve {
            if r.seq >= inner.flushed {
                let idx = (r.seq - inner.flushed) as usize;
                let prev = &mut inner.records[idx];
                debug_assert!(!prev.branch_taken, "branch outcome resolved twice");
                prev.branch_taken = r.taken;
                if r.taken {
                    prev.branch_target = r.target;
                }
            }
        }

        let seq = inner.committed;
        inner.records.push(record);
        inner.committed += 1;
        if inner.committed >= self.max_inst {
            self.exhausted.store(true, Ordering::Release);
        }
        Admission::Committed(seq)
    }

    /// Lock-free fast path for the hook entry check: true once the budget
    /// has been spent.
    pub fn is_exhausted(&self) -> bool {
        self.exhausted.load(Ordering::Acquire)
    }

    /// True when buffered records reach the flush threshold or the budget
    /// is spent with records still buffered.
    pub fn should_flush(&self) -> bool {
        let inner = self.inner.lock().unwrap();
        !inner.records.is_empty()
            && (inner.records.len() >= self.flush_threshold || inner.committed >= self.max_inst)
    }

    /// Records committed so far across the session.
    pub fn committed(&self) -> u64 {
        self.inner.lock().unwrap().committed
    }

    /// Atomically take the byte image of everything buffered and reset.
    /// `None` when nothing is buffered.
    pub fn drain(&self) -> Option<DrainedImage> {
        let mut inner = self.inner.lock().unwrap();
        if inner.records.is_empty() {
            return None;
        }

        let record_count = inner.records.len() as u32;
        let mut bytes = Vec::with_capacity(inner.records.len() * RECORD_BYTES);
        for rec in &inner.records {
            bytes.extend_from_slice(&rec.encode());
        }
        inner.flushed += record_count as u64;
        inner.records.clear();

        Some(DrainedImage {
            bytes,
            record_count,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn rec(pc: u64) -> TraceRecord {
        TraceRecord::from_translation(pc, 0x13, 4)
    }

    #[test]
    fn append_assigns_sequence_numbers() {
        let buf = TraceBuffer::new(10, 100);
        assert_eq!(buf.append(rec(0x1000), None), Admission::Committed(0));
        assert_eq!(buf.append(rec(0x1004), None), Admission::Committed(1));
        assert_eq!(buf.committed(), 2);
    }

    #[test]
    fn budget_is_checked_before_admission() {
        let buf = TraceBuffer::new(2, 100);
        assert!(matches!(buf.append(rec(0x0), None), Admission::Committed(_)));
        assert!(!buf.is_exhausted());
        assert!(matches!(buf.append(rec(0x4), None), Admission::Committed(_)));
        assert!(buf.is_exhausted());
        assert_eq!(buf.append(rec(0x8), None), Admission::BudgetExhausted);
        assert_eq!(buf.committed(), 2);
    }

    #[test]
    fn resolution_patches_buffered_record() {
        let buf = TraceBuffer::new(10, 100);
        buf.append(rec(0x2000), None);
        buf.append(
            rec(0x3000),
            Some(Resolution {
                seq: 0,
                taken: true,
                target: 0x3000,
            }),
        );

        let image = buf.drain().unwrap();
        let first = TraceRecord::decode(image.bytes[..RECORD_BYTES].try_into().unwrap()).unwrap();
        assert!(first.branch_taken);
        assert_eq!(first.branch_target, 0x3000);
    }

    #[test]
    fn resolution_for_flushed_record_is_dropped() {
        let buf = TraceBuffer::new(10, 100);
        buf.append(rec(0x1000), None);
        let _ = buf.drain().unwrap();

        // Patch target is already gone; the successor still commits.
        let adm = buf.append(
            rec(0x1004),
            Some(Resolution {
                seq: 0,
                taken: false,
                target: 0,
            }),
        );
        assert_eq!(adm, Admission::Committed(1));
        assert_eq!(buf.drain().unwrap().record_count, 1);
    }

    #[test]
    fn drain_resets_and_is_idempotent() {
        let buf = TraceBuffer::new(10, 100);
        buf.append(rec(0x1000), None);
        let image = buf.drain().unwrap();
        assert_eq!(image.record_count, 1);
        assert_eq!(image.bytes.len(), RECORD_BYTES);
        assert!(buf.drain().is_none());
    }

    #[test]
    fn should_flush_at_threshold_and_exhaustion() {
        let buf = TraceBuffer::new(100, 3);
        assert!(!buf.should_flush());
        buf.append(rec(0x0), None);
        buf.append(rec(0x4), None);
        assert!(!buf.should_flush());
        buf.append(rec(0x8), None);
        assert!(buf.should_flush());

        let capped = TraceBuffer::new(1, 100);
        capped.append(rec(0x0), None);
        assert!(capped.should_flush());
        let _ = capped.drain();
        assert!(!capped.should_flush());
    }
}
