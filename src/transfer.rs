//! Streamed file transfer: file bytes to a run of frames closed by a terminator,
//! optionally passed through zlib deflate at maximum compression.

use crate::error::{Result, SyncError};
use crate::frame::{read_frame, write_frame, Frame};
use crate::protocol::PAYLOAD_CAPACITY;
use flate2::{Compress, Compression, Decompress, FlushCompress, FlushDecompress, Status};
use serde::Deserialize;
use std::io::{ErrorKind, Read, Write};

// Input chunk pulled from the source per step
const READ_CHUNK: usize = 1024;

// Inflate output buffer
const INFLATE_BUF: usize = 16 * 1024;

/// Whether transfer payloads are deflated. Fixed per deployment; never negotiated.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize, clap::ValueEnum)]
#[serde(rename_all = "lowercase")]
pub enum TransferMode {
    #[default]
    Deflate,
    Raw,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct TransferStats {
    /// Bytes consumed from the source (file on send, wire on receive)
    pub bytes_read: u64,
    /// Bytes produced to the sink (wire on send, file on receive)
    pub bytes_written: u64,
    /// Content frames, terminator excluded
    pub frames: u64,
    /// Receiver only: the deflate stream reached its end before the terminator
    pub stream_complete: bool,
}

impl TransferStats {
    /// `bytes_written / bytes_read`; diagnostics only.
    pub fn ratio(&self) -> Option<f64> {
        if self.bytes_read == 0 {
            None
        } else {
            Some(self.bytes_written as f64 / self.bytes_read as f64)
        }
    }
}

fn read_chunk<R: Read>(source: &mut R, buf: &mut [u8]) -> Result<usize> {
    loop {
        match source.read(buf) {
            Ok(n) => return Ok(n),
            Err(e) if e.kind() == ErrorKind::Interrupted => continue,
            Err(e) => return Err(e.into()),
        }
    }
}

fn emit<W: Write>(stream: &mut W, bytes: &[u8], stats: &mut TransferStats) -> Result<()> {
    write_frame(stream, &Frame::chunk(bytes)?)?;
    stats.bytes_written += bytes.len() as u64;
    stats.frames += 1;
    Ok(())
}

/// Stream `source` as content frames followed by one terminator frame.
pub fn send_stream<R: Read, W: Write>(
    source: &mut R,
    stream: &mut W,
    mode: TransferMode,
) -> Result<TransferStats> {
    let stats = match mode {
        TransferMode::Raw => send_raw(source, stream)?,
        TransferMode::Deflate => send_deflate(source, stream)?,
    };
    write_frame(stream, &Frame::terminator())?;
    Ok(stats)
}

fn send_raw<R: Read, W: Write>(source: &mut R, stream: &mut W) -> Result<TransferStats> {
    let mut stats = TransferStats::default();
    let mut buf = [0u8; PAYLOAD_CAPACITY];
    loop {
        let n = read_chunk(source, &mut buf)?;
        if n == 0 {
            break;
        }
        stats.bytes_read += n as u64;
        emit(stream, &buf[..n], &mut stats)?;
    }
    Ok(stats)
}

fn send_deflate<R: Read, W: Write>(source: &mut R, stream: &mut W) -> Result<TransferStats> {
    let mut stats = TransferStats::default();
    let mut comp = Compress::new(Compression::best(), true);
    let mut input = [0u8; READ_CHUNK];
    let (mut in_pos, mut in_len) = (0usize, 0usize);
    let mut eof = false;
    let mut out = [0u8; PAYLOAD_CAPACITY];
    let mut out_len = 0usize;

    loop {
        if in_pos == in_len && !eof {
            in_len = read_chunk(source, &mut input)?;
            in_pos = 0;
            eof = in_len == 0;
            stats.bytes_read += in_len as u64;
        }
        let flush = if eof {
            FlushCompress::Finish
        } else {
            FlushCompress::None
        };

        let (before_in, before_out) = (comp.total_in(), comp.total_out());
        let status = comp
            .compress(&input[in_pos..in_len], &mut out[out_len..], flush)
            .map_err(|e| SyncError::CorruptStream(e.to_string()))?;
        in_pos += (comp.total_in() - before_in) as usize;
        out_len += (comp.total_out() - before_out) as usize;

        let finished = status == Status::StreamEnd;
        if out_len == out.len() || (finished && out_len > 0) {
            emit(stream, &out[..out_len], &mut stats)?;
            out_len = 0;
        }
        if finished {
            break;
        }
    }
    Ok(stats)
}

/// Receive content frames into `sink` until the terminator frame.
///
/// A close before the terminator is `TruncatedTransfer`; the caller must not
/// treat what reached `sink` as a complete file.
pub fn receive_stream<R: Read, W: Write>(
    stream: &mut R,
    sink: &mut W,
    mode: TransferMode,
) -> Result<TransferStats> {
    let mut stats = TransferStats::default();
    let mut inflater = match mode {
        TransferMode::Deflate => Some(Decompress::new(true)),
        TransferMode::Raw => None,
    };
    let mut out = vec![0u8; INFLATE_BUF];

    loop {
        let frame = match read_frame(stream) {
            Ok(Some(f)) => f,
            Ok(None) | Err(SyncError::ConnectionClosed) => return Err(SyncError::TruncatedTransfer),
            Err(e) => return Err(e),
        };
        if frame.is_terminator() {
            break;
        }
        stats.frames += 1;
        stats.bytes_read += frame.size() as u64;

        match inflater.as_mut() {
            None => {
                sink.write_all(frame.payload())?;
                stats.bytes_written += frame.size() as u64;
            }
            Some(d) => {
                if stats.stream_complete {
                    return Err(SyncError::CorruptStream(
                        "data after end of deflate stream".into(),
                    ));
                }
                stats.stream_complete = inflate_into(
                    d,
                    frame.payload(),
                    sink,
                    &mut out,
                    &mut stats.bytes_written,
                )?;
            }
        }
    }

    if inflater.is_none() {
        stats.stream_complete = true;
    }
    sink.flush()?;
    Ok(stats)
}

// Returns true once the deflate stream has ended
fn inflate_into<W: Write>(
    d: &mut Decompress,
    mut input: &[u8],
    sink: &mut W,
    out: &mut [u8],
    written: &mut u64,
) -> Result<bool> {
    loop {
        let (before_in, before_out) = (d.total_in(), d.total_out());
        let status = d
            .decompress(input, out, FlushDecompress::None)
            .map_err(|e| SyncError::CorruptStream(e.to_string()))?;
        let consumed = (d.total_in() - before_in) as usize;
        let produced = (d.total_out() - before_out) as usize;

        if produced > 0 {
            sink.write_all(&out[..produced])?;
            *written += produced as u64;
        }
        input = &input[consumed..];

        if status == Status::StreamEnd {
            if !input.is_empty() {
                return Err(SyncError::CorruptStream(
                    "trailing bytes after end of deflate stream".into(),
                ));
            }
            return Ok(true);
        }
        if consumed == 0 && produced == 0 {
            if input.is_empty() {
                return Ok(false);
            }
            return Err(SyncError::CorruptStream("inflate made no progress".into()));
        }
        if input.is_empty() && produced < out.len() {
            return Ok(false);
        }
    }
}
