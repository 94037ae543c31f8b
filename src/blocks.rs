//! Data-block framing.
//!
//! Every data block is a framing byte followed by `(length, bytes)`
//! chunks terminated by a zero length. The framing byte selects raw
//! chunks (0x01) or chunks that concatenate into one gzip stream (0x02).

use std::io::{self, Read, Write};

use flate2::read::MultiGzDecoder;
use flate2::write::GzEncoder;
use flate2::Compression;

use crate::constants::CHUNK_SIZE;
use crate::error::{ArchiveError, Result};
use crate::io::{ArchiveIo, TrackedReader};

/// Largest chunk length accepted on read. Writers emit much smaller
/// chunks; anything beyond this is a corrupt length field.
const MAX_CHUNK_LEN: i64 = 1 << 30;

/// Repacketises a byte stream into `(length, bytes)` chunks of at most
/// [`CHUNK_SIZE`] payload bytes each.
struct ChunkWriter<'a, W: Write> {
    inner: &'a mut W,
    dio: ArchiveIo,
    buf: Vec<u8>,
}

impl<'a, W: Write> ChunkWriter<'a, W> {
    fn new(inner: &'a mut W, dio: &ArchiveIo) -> Self {
        Self {
            inner,
            dio: *dio,
            buf: Vec::with_capacity(CHUNK_SIZE),
        }
    }

    fn emit_chunk(&mut self) -> io::Result<()> {
        let len = self.buf.len().min(CHUNK_SIZE);
        self.dio.write_int(self.inner, len as i64)?;
        self.inner.write_all(&self.buf[..len])?;
        self.buf.drain(..len);
        Ok(())
    }

    /// Flush remaining bytes and write the zero-length terminator.
    fn finish(mut self) -> io::Result<()> {
        while !self.buf.is_empty() {
            self.emit_chunk()?;
        }
        self.dio.write_int(self.inner, 0)
    }
}

impl<W: Write> Write for ChunkWriter<'_, W> {
    fn write(&mut self, data: &[u8]) -> io::Result<usize> {
        self.buf.extend_from_slice(data);
        while self.buf.len() >= CHUNK_SIZE {
            self.emit_chunk()?;
        }
        Ok(data.len())
    }

    fn flush(&mut self) -> io::Result<()> {
        self.inner.flush()
    }
}

/// Write one chunk sequence, gzip-compressing the payload when `level`
/// is non-zero, and terminate it with a zero-length chunk.
pub fn write_chunk_stream<W: Write, R: Read>(
    writer: &mut W,
    dio: &ArchiveIo,
    level: u32,
    payload: &mut R,
) -> io::Result<()> {
    let chunks = ChunkWriter::new(writer, dio);
    if level > 0 {
        let mut encoder = GzEncoder::new(chunks, Compression::new(level));
        io::copy(payload, &mut encoder)?;
        encoder.finish()?.finish()
    } else {
        let mut chunks = chunks;
        io::copy(payload, &mut chunks)?;
        chunks.finish()
    }
}

/// Read one chunk sequence up to its zero-length terminator and return
/// the payload, inflated when the frame is compressed.
pub fn read_chunk_stream<R: Read>(
    reader: &mut TrackedReader<R>,
    dio: &ArchiveIo,
    compressed: bool,
) -> Result<Vec<u8>> {
    let mut raw = Vec::new();
    loop {
        let pos = reader.position();
        let length = dio.read_int(reader)?;
        if length == 0 {
            break;
        }
        if !(0..MAX_CHUNK_LEN).contains(&length) {
            return Err(ArchiveError::Format {
                offset: pos,
                message: format!("invalid chunk length {length}"),
            });
        }
        let start = raw.len();
        raw.resize(start + length as usize, 0);
        let fill_pos = reader.position();
        reader.read_exact(&mut raw[start..]).map_err(|e| {
            if e.kind() == io::ErrorKind::UnexpectedEof {
                ArchiveError::Format {
                    offset: fill_pos,
                    message: "truncated data chunk".to_string(),
                }
            } else {
                ArchiveError::Io(e)
            }
        })?;
    }

    if !compressed {
        return Ok(raw);
    }
    let mut inflated = Vec::new();
    MultiGzDecoder::new(raw.as_slice())
        .read_to_end(&mut inflated)
        .map_err(|e| ArchiveError::Format {
            offset: reader.position(),
            message: format!("invalid compressed data block: {e}"),
        })?;
    Ok(inflated)
}
