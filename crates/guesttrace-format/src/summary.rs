//! End-of-capture statistics.
//!
//! The capture engine emits one [`SessionSummary`] when a session closes:
//! total instructions, elapsed wall time, throughput, and one line per
//! virtual CPU. `Display` produces the human-readable exit report; serde
//! gives JSON export for tooling.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::io;
use std::path::Path;

/// Per-vCPU capture statistics.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct VcpuSummary {
    /// vCPU index.
    pub vcpu: u32,
    /// Instructions committed from this vCPU's stream.
    pub instructions: u64,
    /// Wall time from first sighting of this vCPU to session close.
    pub elapsed_secs: f64,
}

impl VcpuSummary {
    /// Instructions per second, zero when no time elapsed.
    pub fn ips(&self) -> f64 {
        if self.elapsed_secs > 0.0 {
            self.instructions as f64 / self.elapsed_secs
        } else {
            0.0
        }
    }
}

/// Whole-session capture statistics.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SessionSummary {
    /// Output path the trace was written to.
    pub tracefile: String,
    /// Total instructions committed, across all vCPUs.
    pub instructions_traced: u64,
    /// The configured instruction budget.
    pub budget: u64,
    /// Frames written to the sink.
    pub frames_written: u64,
    /// Wall time from install to close.
    pub elapsed_secs: f64,
    /// One entry per vCPU observed, in index order.
    pub vcpus: Vec<VcpuSummary>,
}

impl SessionSummary {
    /// Session-wide instructions per second, zero when no time elapsed.
    pub fn ips(&self) -> f64 {
        if self.elapsed_secs > 0.0 {
            self.instructions_traced as f64 / self.elapsed_secs
        } else {
            0.0
        }
    }

    /// Save as pretty-printed JSON.
    pub fn save(&self, path: &Path) -> io::Result<()> {
        let json = serde_json::to_string_pretty(self).map_err(io::Error::other)?;
        std::fs::write(path, json)
    }

    /// Load from a JSON file.
    pub fn load(path: &Path) -> io::Result<Self> {
        let json = std::fs::read_to_string(path)?;
        serde_json::from_str(&json).map_err(io::Error::other)
    }
}

impl fmt::Display for SessionSummary {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(
            f,
            "capture closed: {} instructions (budget {}), {} frames -> {}",
            self.instructions_traced, self.budget, self.frames_written, self.tracefile
        )?;
        writeln!(
            f,
            "elapsed {:.3} s, {:.0} instructions/s",
            self.elapsed_secs,
            self.ips()
        )?;
        for v in &self.vcpus {
            writeln!(
                f,
                "  vcpu {:>3}: {:>10} instructions, {:.3} s, {:.0}/s",
                v.vcpu,
                v.instructions,
                v.elapsed_secs,
                v.ips()
            )?;
        }
        Ok(())
    }
}
