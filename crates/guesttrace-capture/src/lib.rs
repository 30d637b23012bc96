//! Instruction-stream capture engine for an instrumented guest.
//!
//! The host instrumentation runtime drives this crate through the typed
//! hooks in [`runtime`]: once when a unit of guest code is translated, and
//! then per executed instruction, a memory-access hook when the
//! instruction touches memory and a completion hook when it retires. The
//! engine correlates those temporally separate observations into one record
//! per dynamic instruction execution and streams the records to a
//! compressed, bounded trace file.
//!
//! # Architecture
//!
//! ```text
//!          host runtime (per-vCPU threads)
//!   translate        memory access      retire
//!       │                  │               │
//!       ▼                  ▼               ▼
//! ┌───────────┐      ┌──────────────────────────┐
//! │ RecordStore│─────▶│ Correlator (per-vCPU lane)│
//! │ prototypes │ ids  │ enrich → resolve → commit │
//! └───────────┘      └────────────┬─────────────┘
//!                                 ▼
//!                        ┌────────────────┐
//!                        │  TraceBuffer   │ budget / threshold
//!                        └───────┬────────┘
//!                                ▼
//!                        ┌────────────────┐
//!                        │ FlushPipeline  │ zstd frames → sink
//!                        └────────────────┘
//! ```
//!
//! A record's branch outcome depends on the *next* instruction's address,
//! so resolution runs one record behind each vCPU's stream; the final
//! record of a capped trace is committed unresolved.
//!
//! - [`runtime`] — hook trait and translation/execution metadata types
//! - [`store`] — static instruction prototypes, typed record handles
//! - [`buffer`] — bounded, lock-guarded record buffer
//! - [`flush`] — compression context, sink, frame writer
//! - [`session`] — configuration, lifecycle state machine, hook dispatch

pub mod buffer;
pub(crate) mod correlate;
pub mod flush;
pub mod runtime;
pub mod session;
pub mod store;
pub(crate) mod vcpu;

pub use flush::{FlushError, InstallError};
pub use runtime::{DecodedInsn, InstrumentationHooks, MemoryAccess, RecordId, VcpuId};
pub use session::{Phase, SessionConfig, TraceSession};
