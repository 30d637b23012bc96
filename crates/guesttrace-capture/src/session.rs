//! Session lifecycle: configuration, install, capture, drain, close.

use crate::buffer::TraceBuffer;
use crate::correlate;
use crate::flush::{FlushPipeline, InstallError};
use crate::runtime::{DecodedInsn, InstrumentationHooks, MemoryAccess, RecordId, VcpuId};
use crate::store::RecordStore;
use crate::vcpu::VcpuRegistry;
use guesttrace_format::SessionSummary;
use log::{debug, error, info, warn};
use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, AtomicU8, Ordering};
use std::sync::Mutex;
use std::time::Instant;

/// Default output path when `tracefile=` is not given.
pub const DEFAULT_TRACEFILE: &str = "tracefile.zst";
/// Default instruction budget when `traceinst=` is not given or invalid.
pub const DEFAULT_MAX_INST: u64 = 500;
/// Buffered records that trigger a capacity flush.
pub const DEFAULT_FLUSH_THRESHOLD: usize = 4096;
/// zstd level used for frame payloads.
pub const DEFAULT_COMPRESSION_LEVEL: i32 = 3;

/// Capture configuration.
///
/// Built from the host's `key=value` option strings; anything unparseable
/// is logged and replaced by its default, so configuration problems never
/// abort an install.
#[derive(Debug, Clone)]
pub struct SessionConfig {
    /// Output path for the trace file.
    pub tracefile: PathBuf,
    /// Maximum records committed before capture self-terminates.
    pub max_inst: u64,
    /// Buffered-record count that triggers a mid-session flush.
    pub flush_threshold: usize,
    /// zstd compression level for frames.
    pub compression_level: i32,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            tracefile: PathBuf::from(DEFAULT_TRACEFILE),
            max_inst: DEFAULT_MAX_INST,
            flush_threshold: DEFAULT_FLUSH_THRESHOLD,
            compression_level: DEFAULT_COMPRESSION_LEVEL,
        }
    }
}

impl SessionConfig {
    /// Parse host-style option strings (`tracefile=out.zst`,
    /// `traceinst=100000`). Unknown keys and invalid values are logged and
    /// ignored.
    pub fn from_args<I, S>(args: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        let mut config = Self::default();
        for arg in args {
            let arg = arg.as_ref();
            match arg.split_once('=') {
                Some(("tracefile", value)) if !value.is_empty() => {
                    config.tracefile = PathBuf::from(value);
                }
                Some(("traceinst", value)) => match value.parse::<u64>() {
                    Ok(n) if n > 0 => config.max_inst = n,
                    _ => warn!(
                        "invalid traceinst value {:?}, using default {}",
                        value, DEFAULT_MAX_INST
                    ),
                },
                _ => warn!("unrecognized option {:?}", arg),
            }
        }
        config
    }
}

/// Where a session is in its life.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum Phase {
    /// No resources acquired. Never observable on a constructed session;
    /// a failed install leaves nothing behind.
    Uninitialized = 0,
    /// Sink open, compression context ready; hooks not yet active.
    Installed = 1,
    /// Hooks active, records flowing.
    Capturing = 2,
    /// Final flush in progress.
    Draining = 3,
    /// Terminal. Summary emitted, resources released.
    Closed = 4,
}

impl Phase {
    fn from_u8(v: u8) -> Phase {
        match v {
            1 => Phase::Installed,
            2 => Phase::Capturing,
            3 => Phase::Draining,
            4 => Phase::Closed,
            _ => Phase::Uninitialized,
        }
    }
}

/// One capture session: all state from install to close.
///
/// There is no process-global state; the host adapter owns the session,
/// shares it with its vCPU threads, and consumes it at teardown via
/// [`uninstall`](Self::uninstall).
pub struct TraceSession {
    config: SessionConfig,
    store: RecordStore,
    vcpus: VcpuRegistry,
    buffer: TraceBuffer,
    pipeline: Mutex<FlushPipeline>,
    phase: AtomicU8,
    budget_flush_done: AtomicBool,
    started: Instant,
}

impl TraceSession {
    /// Acquire output resources and enter `Installed`.
    ///
    /// The compression context is created before the sink, so a context
    /// failure leaves no output file behind. Either failure is fatal and
    /// non-retryable; no partial state is retained.
    pub fn install(config: SessionConfig) -> Result<Self, InstallError> {
        let pipeline = FlushPipeline::create(&config.tracefile, config.compression_level)?;
        info!(
            "trace session installed: sink {}, budget {} instructions",
            config.tracefile.display(),
            config.max_inst
        );
        Ok(Self {
            buffer: TraceBuffer::new(config.max_inst, config.flush_threshold),
            store: RecordStore::new(),
            vcpus: VcpuRegistry::new(),
            pipeline: Mutex::new(pipeline),
            phase: AtomicU8::new(Phase::Installed as u8),
            budget_flush_done: AtomicBool::new(false),
            started: Instant::now(),
            config,
        })
    }

    /// Transition `Installed` → `Capturing`. Hooks are no-ops before this.
    pub fn begin(&self) {
        let swapped = self.phase.compare_exchange(
            Phase::Installed as u8,
            Phase::Capturing as u8,
            Ordering::AcqRel,
            Ordering::Acquire,
        );
        match swapped {
            Ok(_) => info!("capture started"),
            Err(p) => warn!("begin() ignored in phase {:?}", Phase::from_u8(p)),
        }
    }

    /// Current lifecycle phase.
    pub fn phase(&self) -> Phase {
        Phase::from_u8(self.phase.load(Ordering::Acquire))
    }

    /// Records committed so far.
    pub fn instructions_traced(&self) -> u64 {
        self.buffer.committed()
    }

    /// Drain, close and summarize. Safe to call while hooks are still
    /// finishing on other vCPU threads; they observe `Draining` and become
    /// no-ops.
    pub fn uninstall(self) -> SessionSummary {
        let summary = self.drain_and_close();
        info!("{}", summary);
        summary
    }

    fn drain_and_close(&self) -> SessionSummary {
        self.phase
            .store(Phase::Draining as u8, Ordering::Release);

        self.flush_now();
        let mut pipeline = self.pipeline.lock().unwrap();
        pipeline.release();
        let frames_written = pipeline.frames_written();
        drop(pipeline);

        self.phase.store(Phase::Closed as u8, Ordering::Release);

        SessionSummary {
            tracefile: self.config.tracefile.display().to_string(),
            instructions_traced: self.buffer.committed(),
            budget: self.config.max_inst,
            frames_written,
            elapsed_secs: self.started.elapsed().as_secs_f64(),
            vcpus: self.vcpus.summaries(),
        }
    }

    fn flush_now(&self) {
        match self.pipeline.lock().unwrap().flush(&self.buffer) {
            Ok(_) => {}
            Err(e) => error!("trace flush failed, capture output disabled: {}", e),
        }
    }

    fn capturing(&self) -> bool {
        self.phase.load(Ordering::Acquire) == Phase::Capturing as u8
    }
}

impl InstrumentationHooks for TraceSession {
    fn on_vcpu_init(&self, vcpu: VcpuId) {
        if matches!(self.phase(), Phase::Installed | Phase::Capturing) {
            let _ = self.vcpus.lane(vcpu);
            debug!("vcpu {} online", vcpu);
        }
    }

    fn on_block_translated(&self, insns: &[DecodedInsn]) -> Vec<RecordId> {
        if !self.capturing() || self.buffer.is_exhausted() {
            return Vec::new();
        }
        self.store.allocate_block(insns)
    }

    fn on_memory_access(&self, vcpu: VcpuId, record: RecordId, access: MemoryAccess) {
        if !self.capturing() || self.buffer.is_exhausted() {
            return;
        }
        let Some(proto) = self.store.get(record) else {
            return;
        };
        let lane = self.vcpus.lane(vcpu);
        let mut lane = lane.lock().unwrap();
        correlate::note_memory_access(&mut lane, record, proto, access);
    }

    fn on_insn_retired(&self, vcpu: VcpuId, record: RecordId) {
        if !self.capturing() || self.buffer.is_exhausted() {
            return;
        }
        let Some(proto) = self.store.get(record) else {
            return;
        };

        {
            let lane = self.vcpus.lane(vcpu);
            let mut lane = lane.lock().unwrap();
            correlate::complete_instruction(&mut lane, record, proto, &self.buffer);
        }

        if self.buffer.is_exhausted() {
            if !self.budget_flush_done.swap(true, Ordering::AcqRel) {
                info!(
                    "instruction budget reached ({} instructions), flushing",
                    self.config.max_inst
                );
                self.flush_now();
            }
        } else if self.buffer.should_flush() {
            self.flush_now();
        }
    }
}

impl Drop for TraceSession {
    fn drop(&mut self) {
        if self.phase() != Phase::Closed {
            warn!("trace session dropped without uninstall, flushing remainder");
            let _ = self.drain_and_close();
        }
    }
}
