//! Wire format for guest instruction traces.
//!
//! A trace file is a fixed 8-byte file header followed by zero or more
//! **frames**. Each frame is one buffer flush from the capture engine: a
//! 12-byte header carrying the payload length, the number of records, and
//! the payload encoding (zstd, or raw when compression failed mid-capture),
//! followed by the payload itself. The payload decompresses to a contiguous
//! run of fixed-size [`TraceRecord`]s.
//!
//! ```text
//! ┌────────────┬──────────────┬─────────┬──────────────┬─────────┬───
//! │ FileHeader │ FrameHeader  │ payload │ FrameHeader  │ payload │ ...
//! │  (8 bytes) │  (12 bytes)  │         │  (12 bytes)  │         │
//! └────────────┴──────────────┴─────────┴──────────────┴─────────┴───
//! ```
//!
//! Because every frame is length-prefixed, the file is self-delimiting: a
//! consumer can walk frame to frame without any out-of-band bookkeeping,
//! even when raw fallback frames are interleaved with compressed ones.
//!
//! - [`record`] — the 48-byte record layout and its codec
//! - [`frame`] — file/frame headers and the [`frame::FrameReader`] decoder
//! - [`summary`] — end-of-capture statistics (per-vCPU lines, JSON export)

pub mod frame;
pub mod record;
pub mod summary;

pub use frame::{Frame, FrameEncoding, FrameHeader, FrameReader, ReadError};
pub use record::{ExecData, MemoryFact, MemoryKind, TraceRecord, RECORD_BYTES};
pub use summary::{SessionSummary, VcpuSummary};
