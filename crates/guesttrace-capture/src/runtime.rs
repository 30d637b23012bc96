//! The capability consumed from the host instrumentation runtime.
//!
//! The host owns callback registration and dispatch; this crate only
//! defines the typed surface it dispatches into. A host adapter registers
//! for three event kinds (code translated, memory accessed, instruction
//! completed) and forwards each to the matching [`InstrumentationHooks`]
//! method, carrying the [`RecordId`]s it received at translation time in
//! place of an opaque context pointer.
//!
//! # Ordering contract
//!
//! Within one vCPU, the host dispatches in strict program order for each
//! instruction: translation (possibly long before execution, and repeated
//! if the code unit is evicted and retranslated), then zero or more memory
//! accesses, then completion. Across vCPUs there is no ordering, and hooks
//! for different vCPUs run concurrently.

/// Index of a virtual CPU as reported by the host runtime.
pub type VcpuId = u32;

/// Typed handle to a static instruction prototype in the record store.
///
/// Captured by the host at translation time and passed back to the
/// execution-time hooks, replacing a raw userdata pointer across the
/// translation→memory→completion gap.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct RecordId(pub(crate) u32);

impl RecordId {
    /// The arena index behind this handle.
    pub fn index(self) -> usize {
        self.0 as usize
    }
}

/// Static metadata for one instruction, known at translation time.
#[derive(Debug, Clone, Copy)]
pub struct DecodedInsn {
    /// Guest virtual address.
    pub vaddr: u64,
    /// Raw instruction encoding (fixed-width capture).
    pub opcode: u32,
    /// Decoded instruction length in bytes.
    pub len: u8,
}

/// One memory access observed at execution time.
#[derive(Debug, Clone, Copy)]
pub struct MemoryAccess {
    /// Guest virtual address of the access.
    pub vaddr: u64,
    /// Store (true) or load (false).
    pub is_store: bool,
    /// Access size in bytes.
    pub size: u8,
    /// Physical address, when the host has a translation available.
    pub paddr: Option<u64>,
}

/// Hooks the host instrumentation runtime drives.
///
/// Implementations must tolerate concurrent invocation from different vCPU
/// threads. None of the methods may block in the guest's hot dispatch path
/// except for trace-buffer flushes.
pub trait InstrumentationHooks {
    /// A vCPU was brought online. May be called lazily, at the first event
    /// the host observes for that vCPU.
    fn on_vcpu_init(&self, vcpu: VcpuId);

    /// A contiguous unit of guest code was translated. Returns one handle
    /// per instruction, in order; the host stores them with the translation
    /// and passes them to the execution-time hooks below. Retranslation of
    /// the same code yields fresh, independent handles.
    fn on_block_translated(&self, insns: &[DecodedInsn]) -> Vec<RecordId>;

    /// The instruction behind `record` performed a memory access.
    /// Not called for instructions that touch no memory.
    fn on_memory_access(&self, vcpu: VcpuId, record: RecordId, access: MemoryAccess);

    /// The instruction behind `record` completed on `vcpu`.
    fn on_insn_retired(&self, vcpu: VcpuId, record: RecordId);
}
