//! Drain, compress and persist buffered records as self-delimiting frames.

use crate::buffer::TraceBuffer;
use guesttrace_format::frame::{file_header, FrameHeader};
use guesttrace_format::FrameEncoding;
use log::{debug, warn};
use std::fs::File;
use std::io::{self, BufWriter, Write};
use std::path::{Path, PathBuf};
use thiserror::Error;
use zstd::bulk::Compressor;

/// Opening the capture's output resources failed. Fatal at install time;
/// the session never starts and no partial state is retained.
#[derive(Debug, Error)]
pub enum InstallError {
    #[error("failed to create compression context: {0}")]
    Compressor(#[source] io::Error),

    #[error("failed to open trace sink {path}: {source}")]
    OpenSink {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    #[error("failed to write trace file header: {0}")]
    WriteHeader(#[source] io::Error),
}

/// A mid-session flush failed at the sink. The drained records are lost and
/// the sink is disabled; capture continues without persistence.
#[derive(Debug, Error)]
pub enum FlushError {
    #[error("failed to write trace frame: {0}")]
    Write(#[source] io::Error),
}

/// What a flush call did.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FlushOutcome {
    /// Nothing buffered, nothing written.
    Empty,
    /// The sink was disabled by an earlier write failure or teardown.
    SinkClosed,
    /// One frame went out.
    Frame {
        records: u32,
        payload_len: usize,
        encoding: FrameEncoding,
    },
}

/// Owns the compression context and the output sink. Serialized by the
/// session's pipeline lock; never touched from the hook fast path.
pub struct FlushPipeline {
    compressor: Compressor<'static>,
    sink: Option<BufWriter<File>>,
    frames_written: u64,
}

impl FlushPipeline {
    /// Acquire the compression context, then create the sink and write the
    /// file header. The context comes first: if it cannot be created, no
    /// output file is created at all.
    pub fn create(path: &Path, level: i32) -> Result<Self, InstallError> {
        let compressor = Compressor::new(level).map_err(InstallError::Compressor)?;

        let file = File::create(path).map_err(|source| InstallError::OpenSink {
            path: path.to_path_buf(),
            source,
        })?;
        let mut sink = BufWriter::new(file);
        sink.write_all(&file_header())
            .and_then(|_| sink.flush())
            .map_err(InstallError::WriteHeader)?;

        Ok(Self {
            compressor,
            sink: Some(sink),
            frames_written: 0,
        })
    }

    /// Drain the buffer and write one frame.
    ///
    /// Compression failure is recovered locally: the frame goes out raw
    /// rather than dropping data. A sink write failure disables the sink
    /// and surfaces as the one unrecoverable flush error.
    pub fn flush(&mut self, buffer: &TraceBuffer) -> Result<FlushOutcome, FlushError> {
        if self.sink.is_none() {
            return Ok(FlushOutcome::SinkClosed);
        }
        let Some(image) = buffer.drain() else {
            return Ok(FlushOutcome::Empty);
        };

        let (payload, encoding) = match self.compressor.compress(&image.bytes) {
            Ok(compressed) => (compressed, FrameEncoding::Zstd),
            Err(e) => {
                warn!(
                    "compression failed for {} records, writing raw frame: {}",
                    image.record_count, e
                );
                (image.bytes, FrameEncoding::Raw)
            }
        };

        let header = FrameHeader {
            payload_len: payload.len() as u32,
            record_count: image.record_count,
            encoding,
        };

        let sink = self.sink.as_mut().unwrap();
        let written = sink
            .write_all(&header.encode())
            .and_then(|_| sink.write_all(&payload))
            .and_then(|_| sink.flush());
        if let Err(source) = written {
            self.sink = None;
            return Err(FlushError::Write(source));
        }

        self.frames_written += 1;
        debug!(
            "frame {}: {} records, {} payload bytes ({:?})",
            self.frames_written - 1,
            image.record_count,
            payload.len(),
            encoding
        );
        Ok(FlushOutcome::Frame {
            records: image.record_count,
            payload_len: payload.len(),
            encoding,
        })
    }

    /// Flush and drop the sink. Further flushes are no-ops.
    pub fn release(&mut self) {
        if let Some(mut sink) = self.sink.take() {
            if let Err(e) = sink.flush() {
                warn!("failed to flush trace sink on release: {}", e);
            }
        }
    }

    /// Frames written since install.
    pub fn frames_written(&self) -> u64 {
        self.frames_written
    }
}
