//! Out-of-core storage for data blocks.
//!
//! Each data-carrying entry owns one gzip-compressed file inside the
//! archive's temporary directory, regardless of whether the archive
//! itself is compressed. Files are append-only while the archive is
//! being built and read sequentially during save and iteration; the
//! directory is deleted when the archive is dropped.
//!
//! Table files hold `COPY` text rows, one per line, without the `\.`
//! end-of-data marker. Blob files hold `oid (u32 LE), length (u32 LE),
//! bytes` records.

use std::fs::{File, OpenOptions};
use std::io::{self, BufReader, Read, Write};
use std::path::PathBuf;

use flate2::read::MultiGzDecoder;
use flate2::write::GzEncoder;
use flate2::Compression;
use tempfile::TempDir;

use crate::converters::Value;
use crate::error::Result;

pub(crate) type StoreReader = BufReader<MultiGzDecoder<File>>;

pub(crate) struct DataStore {
    dir: TempDir,
}

impl DataStore {
    pub fn new() -> Result<Self> {
        Ok(Self {
            dir: TempDir::new()?,
        })
    }

    fn path(&self, dump_id: i32) -> PathBuf {
        self.dir.path().join(format!("{dump_id}.gz"))
    }

    pub fn has(&self, dump_id: i32) -> bool {
        self.path(dump_id).exists()
    }

    /// Open the entry's file for appending. Each appender session adds a
    /// new gzip member, which [`reader`](Self::reader) decodes as one
    /// continuous stream.
    pub fn appender(&self, dump_id: i32) -> Result<GzEncoder<File>> {
        let file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(self.path(dump_id))?;
        Ok(GzEncoder::new(file, Compression::default()))
    }

    pub fn reader(&self, dump_id: i32) -> Result<Option<StoreReader>> {
        let path = self.path(dump_id);
        if !path.exists() {
            return Ok(None);
        }
        let file = File::open(path)?;
        Ok(Some(BufReader::new(MultiGzDecoder::new(file))))
    }

    pub fn append_blob(&self, dump_id: i32, oid: u32, data: &[u8]) -> Result<()> {
        let mut encoder = self.appender(dump_id)?;
        write_blob_record(&mut encoder, oid, data)?;
        encoder.finish()?;
        Ok(())
    }

    pub fn blob_records(&self, dump_id: i32) -> Result<Option<BlobRecords>> {
        Ok(self.reader(dump_id)?.map(BlobRecords::new))
    }
}

pub(crate) fn write_blob_record<W: Write>(writer: &mut W, oid: u32, data: &[u8]) -> io::Result<()> {
    writer.write_all(&oid.to_le_bytes())?;
    writer.write_all(&(data.len() as u32).to_le_bytes())?;
    writer.write_all(data)
}

/// Sequential reader over the blob records of one store file.
pub(crate) struct BlobRecords {
    reader: StoreReader,
    done: bool,
}

impl BlobRecords {
    fn new(reader: StoreReader) -> Self {
        Self {
            reader,
            done: false,
        }
    }

    /// Read a u32, or `None` on a clean end of stream.
    fn read_u32_opt(&mut self) -> io::Result<Option<u32>> {
        let mut buf = [0u8; 4];
        let mut filled = 0;
        while filled < 4 {
            let n = self.reader.read(&mut buf[filled..])?;
            if n == 0 {
                break;
            }
            filled += n;
        }
        match filled {
            0 => Ok(None),
            4 => Ok(Some(u32::from_le_bytes(buf))),
            _ => Err(io::Error::new(
                io::ErrorKind::UnexpectedEof,
                "truncated blob record",
            )),
        }
    }
}

impl Iterator for BlobRecords {
    type Item = Result<(u32, Vec<u8>)>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.done {
            return None;
        }
        let oid = match self.read_u32_opt() {
            Ok(Some(oid)) => oid,
            Ok(None) => {
                self.done = true;
                return None;
            }
            Err(e) => {
                self.done = true;
                return Some(Err(e.into()));
            }
        };
        let mut read_body = || -> io::Result<Vec<u8>> {
            let mut len = [0u8; 4];
            self.reader.read_exact(&mut len)?;
            let mut data = vec![0u8; u32::from_le_bytes(len) as usize];
            self.reader.read_exact(&mut data)?;
            Ok(data)
        };
        match read_body() {
            Ok(data) => Some(Ok((oid, data))),
            Err(e) => {
                self.done = true;
                Some(Err(e.into()))
            }
        }
    }
}

/// Append-only writer for one table's data, returned by
/// [`Archive::table_data_writer`](crate::Archive::table_data_writer).
///
/// Rows are encoded to the PostgreSQL text `COPY` representation: fields
/// joined by tabs, `\N` for nulls, one row per line. Call
/// [`finish`](Self::finish) to flush; dropping the writer flushes on a
/// best-effort basis.
pub struct TableDataWriter {
    encoder: Option<GzEncoder<File>>,
}

impl TableDataWriter {
    pub(crate) fn new(encoder: GzEncoder<File>) -> Self {
        Self {
            encoder: Some(encoder),
        }
    }

    pub fn append(&mut self, values: &[Value]) -> Result<()> {
        if let Some(encoder) = self.encoder.as_mut() {
            let row = values
                .iter()
                .map(Value::encode)
                .collect::<Vec<_>>()
                .join("\t");
            encoder.write_all(row.as_bytes())?;
            encoder.write_all(b"\n")?;
        }
        Ok(())
    }

    pub fn finish(mut self) -> Result<()> {
        if let Some(encoder) = self.encoder.take() {
            encoder.finish()?;
        }
        Ok(())
    }
}

impl Drop for TableDataWriter {
    fn drop(&mut self) {
        if let Some(mut encoder) = self.encoder.take() {
            let _ = encoder.try_finish();
        }
    }
}
