//! File and frame headers, and the frame-by-frame trace reader.

use crate::record::{RecordDecodeError, TraceRecord, RECORD_BYTES};
use std::fs::File;
use std::io::{self, BufReader, Read};
use std::path::Path;
use thiserror::Error;

/// Magic bytes opening every trace file.
pub const FILE_MAGIC: [u8; 4] = *b"GTRC";
/// Current format version.
pub const FORMAT_VERSION: u16 = 1;
/// Size of the file header.
pub const FILE_HEADER_BYTES: usize = 8;
/// Size of each frame header.
pub const FRAME_HEADER_BYTES: usize = 12;

/// How a frame's payload is encoded.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FrameEncoding {
    /// Uncompressed records (compression-failure fallback).
    Raw,
    /// zstd-compressed records.
    Zstd,
}

impl FrameEncoding {
    pub fn to_u8(self) -> u8 {
        match self {
            Self::Raw => 0,
            Self::Zstd => 1,
        }
    }

    pub fn from_u8(v: u8) -> Option<Self> {
        match v {
            0 => Some(Self::Raw),
            1 => Some(Self::Zstd),
            _ => None,
        }
    }
}

/// Reading or decoding a trace file failed.
#[derive(Debug, Error)]
pub enum ReadError {
    #[error("i/o error: {0}")]
    Io(#[from] io::Error),

    #[error("not a guest trace file (bad magic {0:02x?})")]
    BadMagic([u8; 4]),

    #[error("unsupported format version {0}")]
    UnsupportedVersion(u16),

    #[error("record size mismatch: file says {found}, this build uses {expected}")]
    RecordSizeMismatch { found: u16, expected: usize },

    #[error("unknown frame encoding {0}")]
    BadEncoding(u8),

    #[error("truncated frame {index}: wanted {wanted} bytes, got {got}")]
    Truncated {
        index: usize,
        wanted: usize,
        got: usize,
    },

    #[error("failed to decompress frame {index}: {source}")]
    Decompress {
        index: usize,
        #[source]
        source: io::Error,
    },

    #[error("frame {index} decodes to {got} bytes, expected {expected} for {records} records")]
    PayloadSizeMismatch {
        index: usize,
        got: usize,
        expected: usize,
        records: u32,
    },

    #[error("malformed record in frame {index}: {source}")]
    Record {
        index: usize,
        #[source]
        source: RecordDecodeError,
    },
}

/// Build the 8-byte file header.
pub fn file_header() -> [u8; FILE_HEADER_BYTES] {
    let mut out = [0u8; FILE_HEADER_BYTES];
    out[0..4].copy_from_slice(&FILE_MAGIC);
    out[4..6].copy_from_slice(&FORMAT_VERSION.to_le_bytes());
    out[6..8].copy_from_slice(&(RECORD_BYTES as u16).to_le_bytes());
    out
}

/// The length-prefixed header written before each frame payload.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FrameHeader {
    /// Payload bytes following this header.
    pub payload_len: u32,
    /// Records the payload decodes to.
    pub record_count: u32,
    /// Payload encoding.
    pub encoding: FrameEncoding,
}

impl FrameHeader {
    pub fn encode(&self) -> [u8; FRAME_HEADER_BYTES] {
        let mut out = [0u8; FRAME_HEADER_BYTES];
        out[0..4].copy_from_slice(&self.payload_len.to_le_bytes());
        out[4..8].copy_from_slice(&self.record_count.to_le_bytes());
        out[8] = self.encoding.to_u8();
        out
    }

    pub fn decode(bytes: &[u8; FRAME_HEADER_BYTES]) -> Result<Self, ReadError> {
        let encoding =
            FrameEncoding::from_u8(bytes[8]).ok_or(ReadError::BadEncoding(bytes[8]))?;
        Ok(Self {
            payload_len: u32::from_le_bytes(bytes[0..4].try_into().unwrap()),
            record_count: u32::from_le_bytes(bytes[4..8].try_into().unwrap()),
            encoding,
        })
    }
}

/// One decoded frame.
#[derive(Debug, Clone)]
pub struct Frame {
    /// Zero-based position of this frame in the file.
    pub index: usize,
    /// How the payload was stored.
    pub encoding: FrameEncoding,
    /// The records the frame carried, in commit order.
    pub records: Vec<TraceRecord>,
}

/// Streaming reader over the frames of a trace file.
///
/// Validates the file header on construction, then yields one [`Frame`] per
/// call to [`next_frame`](Self::next_frame) until clean end of file.
pub struct FrameReader<R> {
    inner: R,
    next_index: usize,
}

impl FrameReader<BufReader<File>> {
    /// Open a trace file from disk.
    pub fn open(path: &Path) -> Result<Self, ReadError> {
        Self::new(BufReader::new(File::open(path)?))
    }
}

impl<R: Read> FrameReader<R> {
    /// Wrap a byte source, validating the file header.
    pub fn new(mut inner: R) -> Result<Self, ReadError> {
        let mut header = [0u8; FILE_HEADER_BYTES];
        inner.read_exact(&mut header)?;

        let magic: [u8; 4] = header[0..4].try_into().unwrap();
        if magic != FILE_MAGIC {
            return Err(ReadError::BadMagic(magic));
        }
        let version = u16::from_le_bytes(header[4..6].try_into().unwrap());
        if version != FORMAT_VERSION {
            return Err(ReadError::UnsupportedVersion(version));
        }
        let record_bytes = u16::from_le_bytes(header[6..8].try_into().unwrap());
        if record_bytes as usize != RECORD_BYTES {
            return Err(ReadError::RecordSizeMismatch {
                found: record_bytes,
                expected: RECORD_BYTES,
            });
        }

        Ok(Self {
            inner,
            next_index: 0,
        })
    }

    /// Read the next frame, or `None` at clean end of file.
    pub fn next_frame(&mut self) -> Result<Option<Frame>, ReadError> {
        let index = self.next_index;

        let mut header_bytes = [0u8; FRAME_HEADER_BYTES];
        let got = read_until_eof(&mut self.inner, &mut header_bytes)?;
        if got == 0 {
            return Ok(None);
        }
        if got < FRAME_HEADER_BYTES {
            return Err(ReadError::Truncated {
                index,
                wanted: FRAME_HEADER_BYTES,
                got,
            });
        }
        let header = FrameHeader::decode(&header_bytes)?;

        let mut payload = vec![0u8; header.payload_len as usize];
        let got = read_until_eof(&mut self.inner, &mut payload)?;
        if got < payload.len() {
            return Err(ReadError::Truncated {
                index,
                wanted: payload.len(),
                got,
            });
        }

        let expected = header.record_count as usize * RECORD_BYTES;
        let image = match header.encoding {
            FrameEncoding::Raw => payload,
            FrameEncoding::Zstd => zstd::bulk::decompress(&payload, expected)
                .map_err(|source| ReadError::Decompress { index, source })?,
        };
        if image.len() != expected {
            return Err(ReadError::PayloadSizeMismatch {
                index,
                got: image.len(),
                expected,
                records: header.record_count,
            });
        }

        let mut records = Vec::with_capacity(header.record_count as usize);
        for chunk in image.chunks_exact(RECORD_BYTES) {
            let bytes: &[u8; RECORD_BYTES] = chunk.try_into().unwrap();
            records.push(
                TraceRecord::decode(bytes).map_err(|source| ReadError::Record { index, source })?,
            );
        }

        self.next_index += 1;
        Ok(Some(Frame {
            index,
            encoding: header.encoding,
            records,
        }))
    }

    /// Collect every remaining frame.
    pub fn read_all(&mut self) -> Result<Vec<Frame>, ReadError> {
        let mut frames = Vec::new();
        while let Some(frame) = self.next_frame()? {
            frames.push(frame);
        }
        Ok(frames)
    }
}

/// Fill `buf` as far as the source allows; a short count means end of file.
fn read_until_eof<R: Read>(reader: &mut R, buf: &mut [u8]) -> io::Result<usize> {
    let mut filled = 0;
    while filled < buf.len() {
        match reader.read(&mut buf[filled..]) {
            Ok(0) => break,
            Ok(n) => filled += n,
            Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
            Err(e) => return Err(e),
        }
    }
    Ok(filled)
}
