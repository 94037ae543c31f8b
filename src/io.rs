use std::io::{self, Read, Seek, SeekFrom, Write};

use crate::error::{ArchiveError, Result};

/// Binary I/O primitives for the custom dump format.
///
/// - Integers: 1 byte sign (0=pos, 1=neg, 2=null) + int_size magnitude
///   bytes (little-endian).
/// - Strings: integer length + UTF-8 bytes; length -1 is a null string.
/// - Offsets: 1 data-state byte + offset_size bytes (little-endian),
///   no sign byte.
///
/// The two sizes are negotiated by the archive header, so one value of
/// this struct is built per open archive.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ArchiveIo {
    pub int_size: usize,
    pub offset_size: usize,
}

/// Largest string length the codec will allocate for. Anything bigger is
/// treated as a corrupt length field.
const MAX_STRING_LEN: i64 = 1 << 30;

/// Wraps a reader and counts consumed bytes so decode failures can report
/// the archive offset they happened at.
pub struct TrackedReader<R> {
    inner: R,
    pos: u64,
}

impl<R: Read> TrackedReader<R> {
    pub fn new(inner: R) -> Self {
        Self { inner, pos: 0 }
    }

    pub fn position(&self) -> u64 {
        self.pos
    }
}

impl<R: Read + Seek> TrackedReader<R> {
    pub fn seek_to(&mut self, pos: u64) -> io::Result<()> {
        self.inner.seek(SeekFrom::Start(pos))?;
        self.pos = pos;
        Ok(())
    }
}

impl<R: Read> Read for TrackedReader<R> {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        let n = self.inner.read(buf)?;
        self.pos += n as u64;
        Ok(n)
    }
}

pub(crate) fn format_error<T>(offset: u64, message: impl Into<String>) -> Result<T> {
    Err(ArchiveError::Format {
        offset,
        message: message.into(),
    })
}

/// read_exact with truncation reported as a format error at the position
/// the field started.
fn fill<R: Read>(reader: &mut TrackedReader<R>, buf: &mut [u8]) -> Result<()> {
    let start = reader.position();
    reader.read_exact(buf).map_err(|e| {
        if e.kind() == io::ErrorKind::UnexpectedEof {
            ArchiveError::Format {
                offset: start,
                message: "unexpected end of file".to_string(),
            }
        } else {
            ArchiveError::Io(e)
        }
    })
}

impl ArchiveIo {
    pub fn new(int_size: usize, offset_size: usize) -> Self {
        Self {
            int_size,
            offset_size,
        }
    }

    pub fn read_byte<R: Read>(reader: &mut TrackedReader<R>) -> Result<u8> {
        let mut buf = [0u8; 1];
        fill(reader, &mut buf)?;
        Ok(buf[0])
    }

    /// Read a fixed-width little-endian u32 (used for the TOC entry count).
    pub fn read_u32<R: Read>(reader: &mut TrackedReader<R>) -> Result<u32> {
        let mut buf = [0u8; 4];
        fill(reader, &mut buf)?;
        Ok(u32::from_le_bytes(buf))
    }

    /// Read `int_size` little-endian magnitude bytes.
    fn read_magnitude<R: Read>(&self, reader: &mut TrackedReader<R>) -> Result<u64> {
        let start = reader.position();
        let mut buf = [0u8; 8];
        fill(reader, &mut buf[..self.int_size])?;

        let mut value: u64 = 0;
        for (i, &b) in buf[..self.int_size].iter().enumerate() {
            value |= (b as u64) << (i * 8);
        }
        if value > i64::MAX as u64 {
            return format_error(start, format!("integer magnitude {value} overflows"));
        }
        Ok(value)
    }

    /// Read a signed integer encoded as `1 byte sign + int_size bytes`.
    pub fn read_int<R: Read>(&self, reader: &mut TrackedReader<R>) -> Result<i64> {
        let start = reader.position();
        match self.read_nullable_int(reader)? {
            Some(value) => Ok(value),
            None => format_error(start, "unexpected null integer"),
        }
    }

    /// Like [`read_int`](Self::read_int), but sign byte 2 is accepted as
    /// the null sentinel.
    pub fn read_nullable_int<R: Read>(
        &self,
        reader: &mut TrackedReader<R>,
    ) -> Result<Option<i64>> {
        let start = reader.position();
        let sign = Self::read_byte(reader)?;
        let magnitude = self.read_magnitude(reader)? as i64;
        match sign {
            0 => Ok(Some(magnitude)),
            1 => Ok(Some(-magnitude)),
            2 => Ok(None),
            other => format_error(start, format!("unrecognized sign byte {other}")),
        }
    }

    /// Read a length-prefixed string. Length -1 (or a null length) denotes
    /// a null string, 0 an empty one.
    pub fn read_string<R: Read>(
        &self,
        reader: &mut TrackedReader<R>,
    ) -> Result<Option<String>> {
        let start = reader.position();
        let length = match self.read_nullable_int(reader)? {
            None => return Ok(None),
            Some(-1) => return Ok(None),
            Some(l) => l,
        };
        if length == 0 {
            return Ok(Some(String::new()));
        }
        if !(0..MAX_STRING_LEN).contains(&length) {
            return format_error(start, format!("invalid string length {length}"));
        }
        let mut buf = vec![0u8; length as usize];
        fill(reader, &mut buf)?;
        Ok(Some(String::from_utf8_lossy(&buf).into_owned()))
    }

    /// Read the data-state byte plus the offset value.
    pub fn read_offset<R: Read>(&self, reader: &mut TrackedReader<R>) -> Result<(u8, u64)> {
        let state = Self::read_byte(reader)?;
        let mut buf = [0u8; 8];
        fill(reader, &mut buf[..self.offset_size])?;
        let mut offset: u64 = 0;
        for (i, &b) in buf[..self.offset_size].iter().enumerate() {
            offset |= (b as u64) << (i * 8);
        }
        Ok((state, offset))
    }

    pub fn write_byte<W: Write>(writer: &mut W, value: u8) -> io::Result<()> {
        writer.write_all(&[value])
    }

    pub fn write_u32<W: Write>(writer: &mut W, value: u32) -> io::Result<()> {
        writer.write_all(&value.to_le_bytes())
    }

    /// Write a signed integer as `1 byte sign + int_size bytes`.
    pub fn write_int<W: Write>(&self, writer: &mut W, value: i64) -> io::Result<()> {
        let (sign, magnitude) = if value < 0 {
            (1u8, value.unsigned_abs())
        } else {
            (0u8, value as u64)
        };
        if self.int_size < 8 && magnitude >= 1u64 << (self.int_size * 8) {
            return Err(io::Error::new(
                io::ErrorKind::InvalidInput,
                format!("integer {value} does not fit in {} bytes", self.int_size),
            ));
        }

        let mut buf = [0u8; 9];
        buf[0] = sign;
        let mut current = magnitude;
        for slot in buf[1..=self.int_size].iter_mut() {
            *slot = (current & 0xFF) as u8;
            current >>= 8;
        }
        writer.write_all(&buf[..1 + self.int_size])
    }

    /// Write a string with its length prefix; `None` becomes length -1.
    pub fn write_string<W: Write>(&self, writer: &mut W, value: Option<&str>) -> io::Result<()> {
        match value {
            None => self.write_int(writer, -1),
            Some(s) => {
                self.write_int(writer, s.len() as i64)?;
                writer.write_all(s.as_bytes())
            }
        }
    }

    /// Write the data-state byte plus the offset value.
    pub fn write_offset<W: Write>(
        &self,
        writer: &mut W,
        state: u8,
        offset: u64,
    ) -> io::Result<()> {
        if self.offset_size < 8 && offset >= 1u64 << (self.offset_size * 8) {
            return Err(io::Error::new(
                io::ErrorKind::InvalidInput,
                format!("offset {offset} does not fit in {} bytes", self.offset_size),
            ));
        }
        let mut buf = [0u8; 9];
        buf[0] = state;
        let mut current = offset;
        for slot in buf[1..=self.offset_size].iter_mut() {
            *slot = (current & 0xFF) as u8;
            current >>= 8;
        }
        writer.write_all(&buf[..1 + self.offset_size])
    }
}
