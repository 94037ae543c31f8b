//! The archive model and its reader/writer.
//!
//! An [`Archive`] is the in-memory form of one custom-format dump: the
//! header fields, the table of contents, and a temporary-file store
//! holding the data block of every entry that has one. Reading parses
//! the whole header and TOC up front and extracts data blocks into the
//! store; writing performs the two-pass save described by the format
//! (offsets are only known after the blocks are written, so the TOC's
//! fixed-size offset cells are patched in place).

use std::cmp::Reverse;
use std::collections::{BinaryHeap, HashMap, HashSet};
use std::fmt;
use std::fs::File;
use std::io::{BufRead, BufReader, BufWriter, Read, Seek, SeekFrom, Write};
use std::path::Path;

use chrono::{DateTime, Datelike, Local, NaiveDate, NaiveDateTime, TimeZone, Timelike};
use regex::Regex;
use tempfile::NamedTempFile;

use crate::blocks;
use crate::constants::{self, Version};
use crate::converters::{Converter, DefaultConverter, Value};
use crate::entry::{DataState, Entry, EntryDef};
use crate::error::{ArchiveError, Result};
use crate::io::{format_error, ArchiveIo, TrackedReader};
use crate::store::{BlobRecords, DataStore, StoreReader, TableDataWriter};
use crate::toc;

const ENCODING_PATTERN: &str = r"client_encoding\s*=\s*'([^']*)'";
const STD_STRINGS_PATTERN: &str = r"standard_conforming_strings\s*=\s*'?(on|off)'?";
const SEARCH_PATH_PATTERN: &str = r"set_config\('search_path',\s*'([^']*)'";

/// One pg_dump custom-format archive.
///
/// Create an empty archive with [`new`](crate::new), or read one from
/// disk with [`load`](crate::load). Entries are added through
/// [`add_entry`](Self::add_entry) and their row data through
/// [`table_data_writer`](Self::table_data_writer); [`save`](Self::save)
/// writes the result.
pub struct Archive {
    /// gzip level for data blocks; 0 disables compression.
    pub compression: u32,
    /// Archive format version, negotiated from the target server version.
    pub version: Version,
    pub int_size: usize,
    pub offset_size: usize,
    /// Creation instant, second precision.
    pub timestamp: DateTime<Local>,
    pub dbname: String,
    pub server_version: String,
    pub dump_version: String,
    pub encoding: String,
    pub std_strings: bool,
    pub search_path: Option<String>,
    pub entries: Vec<Entry>,
    converter: Box<dyn Converter>,
    store: DataStore,
}

impl fmt::Debug for Archive {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Archive")
            .field("compression", &self.compression)
            .field("version", &self.version)
            .field("int_size", &self.int_size)
            .field("offset_size", &self.offset_size)
            .field("timestamp", &self.timestamp)
            .field("dbname", &self.dbname)
            .field("server_version", &self.server_version)
            .field("dump_version", &self.dump_version)
            .field("encoding", &self.encoding)
            .field("std_strings", &self.std_strings)
            .field("search_path", &self.search_path)
            .field("entries", &self.entries)
            .finish_non_exhaustive()
    }
}

impl fmt::Display for Archive {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "version={}.{}.{} compression={} entries={}",
            self.version.0,
            self.version.1,
            self.version.2,
            self.compression,
            self.entries.len()
        )
    }
}

impl Archive {
    /// Create an empty archive for the given database name, with the
    /// bookkeeping entries (ENCODING, STDSTRINGS, SEARCHPATH) every dump
    /// carries.
    pub fn new(dbname: &str) -> Result<Archive> {
        let now = Local::now();
        let version_info = format!(
            "{} (pg_custom {})",
            constants::APPEAR_AS,
            env!("CARGO_PKG_VERSION")
        );
        let mut archive = Archive {
            compression: 0,
            version: constants::DEFAULT_VERSION,
            int_size: constants::DEFAULT_INT_SIZE,
            offset_size: constants::DEFAULT_OFFSET_SIZE,
            timestamp: now.with_nanosecond(0).unwrap_or(now),
            dbname: dbname.to_string(),
            server_version: version_info.clone(),
            dump_version: version_info,
            encoding: constants::DEFAULT_ENCODING.to_string(),
            std_strings: true,
            search_path: Some(String::new()),
            entries: Vec::new(),
            converter: Box::new(DefaultConverter),
            store: DataStore::new()?,
        };
        archive.add_session_entries()?;
        Ok(archive)
    }

    fn add_session_entries(&mut self) -> Result<()> {
        let encoding = format!("SET client_encoding = '{}';\n", self.encoding);
        self.add_entry(
            constants::ENCODING,
            constants::ENCODING,
            EntryDef {
                defn: Some(encoding),
                ..EntryDef::default()
            },
        )?;
        self.add_entry(
            constants::STDSTRINGS,
            constants::STDSTRINGS,
            EntryDef {
                defn: Some("SET standard_conforming_strings = 'on';\n".to_string()),
                ..EntryDef::default()
            },
        )?;
        self.add_entry(
            constants::SEARCHPATH,
            constants::SEARCHPATH,
            EntryDef {
                defn: Some(
                    "SELECT pg_catalog.set_config('search_path', '', false);\n".to_string(),
                ),
                ..EntryDef::default()
            },
        )?;
        Ok(())
    }

    /// Change the client encoding, keeping the ENCODING entry in step.
    pub fn set_encoding(&mut self, encoding: &str) {
        self.encoding = encoding.to_string();
        let defn = format!("SET client_encoding = '{encoding}';\n");
        for entry in &mut self.entries {
            if entry.desc == constants::ENCODING {
                entry.defn = Some(defn.clone());
            }
        }
    }

    /// Set the gzip level for data blocks; values above 9 are capped.
    pub fn set_compression(&mut self, level: u32) {
        self.compression = level.min(9);
    }

    pub fn set_converter(&mut self, converter: Box<dyn Converter>) {
        self.converter = converter;
    }

    /// Target a PostgreSQL server version: picks the archive format
    /// version pg_dump would use for it. Unknown versions fall back to
    /// the library default.
    pub fn set_server_version(&mut self, server_version: &str) {
        self.version = constants::version_for_server(server_version);
        self.server_version = format!(
            "{} (pg_custom {})",
            server_version,
            env!("CARGO_PKG_VERSION")
        );
    }

    /// Read an archive from disk using the default converter.
    pub fn load(path: impl AsRef<Path>) -> Result<Archive> {
        Self::load_with(path, Box::new(DefaultConverter))
    }

    /// Read an archive from disk, converting rows with `converter`.
    pub fn load_with(path: impl AsRef<Path>, converter: Box<dyn Converter>) -> Result<Archive> {
        let file = File::open(path.as_ref())?;
        let mut reader = TrackedReader::new(BufReader::new(file));

        let mut magic = [0u8; 5];
        reader
            .read_exact(&mut magic)
            .map_err(|_| ArchiveError::NotAnArchive("file is too short".to_string()))?;
        if &magic != constants::MAGIC {
            return Err(ArchiveError::NotAnArchive(
                "file does not start with PGDMP".to_string(),
            ));
        }

        let vmaj = ArchiveIo::read_byte(&mut reader)?;
        let vmin = ArchiveIo::read_byte(&mut reader)?;
        let vrev = ArchiveIo::read_byte(&mut reader)?;
        let version = (vmaj, vmin, vrev);
        if version < constants::MIN_VERSION || version > constants::MAX_VERSION {
            return Err(ArchiveError::UnsupportedVersion(vmaj, vmin, vrev));
        }

        let sizes_pos = reader.position();
        let int_size = ArchiveIo::read_byte(&mut reader)? as usize;
        let offset_size = ArchiveIo::read_byte(&mut reader)? as usize;
        if !(1..=8).contains(&int_size) || !(1..=8).contains(&offset_size) {
            return format_error(
                sizes_pos,
                format!("invalid integer size {int_size} or offset size {offset_size}"),
            );
        }

        let format_pos = reader.position();
        let format = ArchiveIo::read_byte(&mut reader)?;
        if format != constants::FORMAT_CUSTOM {
            return format_error(
                format_pos,
                format!("format {format} is not custom (1)"),
            );
        }

        let dio = ArchiveIo::new(int_size, offset_size);

        let compression = if version >= constants::VERSION_COMPRESSION_ALG {
            let pos = reader.position();
            let algorithm = ArchiveIo::read_byte(&mut reader)?;
            let level = dio.read_int(&mut reader)?;
            match algorithm {
                constants::COMPRESSION_NONE => 0,
                constants::COMPRESSION_GZIP => normalize_level(pos, level)?,
                other => {
                    return format_error(
                        pos,
                        format!("unsupported compression algorithm {other}"),
                    )
                }
            }
        } else {
            let pos = reader.position();
            let level = dio.read_int(&mut reader)?;
            normalize_level(pos, level)?
        };

        let timestamp = read_timestamp(&mut reader, &dio, version)?;
        let dbname = dio.read_string(&mut reader)?.unwrap_or_default();
        let server_version = dio.read_string(&mut reader)?.unwrap_or_default();
        let dump_version = dio.read_string(&mut reader)?.unwrap_or_default();

        let entries = toc::read_toc(&mut reader, &dio, version)?;

        let mut seen = HashSet::with_capacity(entries.len());
        for entry in &entries {
            if !seen.insert(entry.dump_id) {
                return Err(ArchiveError::InvalidId(entry.dump_id));
            }
        }

        let mut archive = Archive {
            compression,
            version,
            int_size,
            offset_size,
            timestamp,
            dbname,
            server_version,
            dump_version,
            encoding: constants::DEFAULT_ENCODING.to_string(),
            std_strings: true,
            search_path: None,
            entries,
            converter,
            store: DataStore::new()?,
        };
        archive.apply_session_entries();
        archive.extract_data(&mut reader, &dio)?;
        Ok(archive)
    }

    /// Pull encoding, std_strings and search_path out of the bookkeeping
    /// TOC entries. Absent entries leave the defaults in place.
    fn apply_session_entries(&mut self) {
        let mut encoding = None;
        let mut std_strings = None;
        let mut search_path = None;
        for entry in &self.entries {
            let Some(defn) = entry.defn.as_deref() else {
                continue;
            };
            match entry.desc.as_str() {
                constants::ENCODING => {
                    encoding = capture(ENCODING_PATTERN, defn);
                }
                constants::STDSTRINGS => {
                    std_strings = capture(STD_STRINGS_PATTERN, defn).map(|v| v == "on");
                }
                constants::SEARCHPATH => {
                    search_path = capture(SEARCH_PATH_PATTERN, defn);
                }
                _ => {}
            }
        }
        if let Some(encoding) = encoding {
            self.encoding = encoding;
        }
        if let Some(std_strings) = std_strings {
            self.std_strings = std_strings;
        }
        if search_path.is_some() {
            self.search_path = search_path;
        }
    }

    /// Copy every data block out of the archive file into the store.
    /// Entries with recorded offsets are seeked to directly; entries
    /// saved without offsets are consumed sequentially in TOC order,
    /// which is the order their blocks were appended in.
    fn extract_data<R: Read + Seek>(
        &mut self,
        reader: &mut TrackedReader<R>,
        dio: &ArchiveIo,
    ) -> Result<()> {
        let pending: Vec<(i32, DataState, u64, bool)> = self
            .entries
            .iter()
            .filter(|e| e.data_state != DataState::NoData)
            .map(|e| {
                (
                    e.dump_id,
                    e.data_state,
                    e.offset,
                    e.desc == constants::BLOBS,
                )
            })
            .collect();

        for (dump_id, state, offset, is_blobs) in pending {
            if state == DataState::HasDataOffset {
                reader.seek_to(offset)?;
            }
            let framing_pos = reader.position();
            let framing = ArchiveIo::read_byte(reader)?;
            let compressed = match framing {
                constants::BLK_UNCOMPRESSED => false,
                constants::BLK_COMPRESSED => true,
                other => {
                    return format_error(framing_pos, format!("unknown block type {other}"))
                }
            };

            let mut encoder = self.store.appender(dump_id)?;
            if is_blobs {
                loop {
                    let oid_pos = reader.position();
                    let oid = dio.read_int(reader)?;
                    if oid == 0 {
                        break;
                    }
                    if !(1..=u32::MAX as i64).contains(&oid) {
                        return format_error(oid_pos, format!("invalid blob oid {oid}"));
                    }
                    let data = blocks::read_chunk_stream(reader, dio, compressed)?;
                    crate::store::write_blob_record(&mut encoder, oid as u32, &data)?;
                }
            } else {
                let payload = blocks::read_chunk_stream(reader, dio, compressed)?;
                let segments: Vec<&[u8]> = payload.split(|&b| b == b'\n').collect();
                for (i, segment) in segments.iter().enumerate() {
                    if i + 1 == segments.len() && segment.is_empty() {
                        break;
                    }
                    if segment.starts_with(b"\\.") {
                        break;
                    }
                    encoder.write_all(segment)?;
                    encoder.write_all(b"\n")?;
                }
            }
            encoder.finish()?;
        }
        Ok(())
    }

    /// Add a table-of-contents entry.
    ///
    /// The section is derived from the descriptor; a dump id is assigned
    /// when none is supplied. Fails with an invalid-id error for
    /// non-positive or duplicate ids, an unknown-descriptor error for
    /// descriptors outside the catalogue, and a missing-dependency error
    /// when a dependency does not resolve.
    pub fn add_entry(&mut self, desc: &str, tag: &str, def: EntryDef) -> Result<&Entry> {
        let section = constants::section_for(desc)
            .ok_or_else(|| ArchiveError::UnknownDescriptor(desc.to_string()))?;

        for dependency in &def.dependencies {
            if self.get_entry(*dependency).is_none() {
                return Err(ArchiveError::MissingDependency(*dependency));
            }
        }

        let dump_id = match def.dump_id {
            Some(id) if id <= 0 => return Err(ArchiveError::InvalidId(id)),
            Some(id) if self.get_entry(id).is_some() => {
                return Err(ArchiveError::InvalidId(id))
            }
            Some(id) => id,
            None => self.next_dump_id(),
        };

        self.entries.push(Entry {
            dump_id,
            had_dumper: false,
            table_oid: def.table_oid,
            oid: def.oid,
            tag: tag.to_string(),
            desc: desc.to_string(),
            section,
            defn: def.defn,
            drop_stmt: def.drop_stmt,
            copy_stmt: def.copy_stmt,
            namespace: def.namespace,
            tablespace: def.tablespace,
            tableam: def.tableam,
            relkind: def.relkind,
            owner: def.owner,
            dependencies: def.dependencies,
            data_state: DataState::NoData,
            offset: 0,
        });
        let index = self.entries.len() - 1;
        Ok(&self.entries[index])
    }

    fn next_dump_id(&self) -> i32 {
        self.entries.iter().map(|e| e.dump_id).max().unwrap_or(0) + 1
    }

    pub fn get_entry(&self, dump_id: i32) -> Option<&Entry> {
        self.entries.iter().find(|e| e.dump_id == dump_id)
    }

    /// Find an entry by descriptor, namespace and tag. The descriptor
    /// must be one from the catalogue.
    pub fn lookup_entry(&self, desc: &str, namespace: &str, tag: &str) -> Result<&Entry> {
        constants::section_for(desc)
            .ok_or_else(|| ArchiveError::UnknownDescriptor(desc.to_string()))?;
        self.entries
            .iter()
            .find(|e| e.desc == desc && e.namespace_str() == namespace && e.tag == tag)
            .ok_or_else(|| ArchiveError::EntityNotFound {
                namespace: namespace.to_string(),
                tag: tag.to_string(),
            })
    }

    /// Iterate the rows of a table's data, converted by the archive's
    /// converter. The iterator is forward-only; call again for a second
    /// pass.
    pub fn table_data(&self, namespace: &str, tag: &str) -> Result<TableRows<'_>> {
        let entry = self
            .entries
            .iter()
            .find(|e| {
                e.desc == constants::TABLE_DATA
                    && e.namespace_str() == namespace
                    && e.tag == tag
            })
            .ok_or_else(|| ArchiveError::EntityNotFound {
                namespace: namespace.to_string(),
                tag: tag.to_string(),
            })?;
        Ok(TableRows {
            reader: self.store.reader(entry.dump_id)?,
            converter: self.converter.as_ref(),
            done: false,
        })
    }

    /// Open a scoped writer for a table's rows. `table_id` names the
    /// TABLE entry; the TABLE DATA entry (and its COPY statement) is
    /// created on first use and appended to afterwards.
    pub fn table_data_writer(
        &mut self,
        table_id: i32,
        columns: &[&str],
    ) -> Result<TableDataWriter> {
        let table = self
            .get_entry(table_id)
            .ok_or(ArchiveError::InvalidId(table_id))?;
        let namespace = table.namespace.clone();
        let tag = table.tag.clone();

        let existing = self
            .entries
            .iter()
            .find(|e| {
                e.desc == constants::TABLE_DATA && e.namespace == namespace && e.tag == tag
            })
            .map(|e| e.dump_id);

        let data_id = match existing {
            Some(id) => id,
            None => {
                let target = match namespace.as_deref() {
                    Some(ns) if !ns.is_empty() => format!("{ns}.{tag}"),
                    _ => tag.clone(),
                };
                let copy_stmt =
                    format!("COPY {target} ({}) FROM stdin;\n", columns.join(", "));
                let id = self
                    .add_entry(
                        constants::TABLE_DATA,
                        &tag,
                        EntryDef {
                            namespace,
                            copy_stmt: Some(copy_stmt),
                            dependencies: vec![table_id],
                            ..EntryDef::default()
                        },
                    )?
                    .dump_id;
                id
            }
        };

        if let Some(entry) = self.entries.iter_mut().find(|e| e.dump_id == data_id) {
            entry.had_dumper = true;
            if entry.data_state == DataState::NoData {
                entry.data_state = DataState::HasData;
            }
        }
        Ok(TableDataWriter::new(self.store.appender(data_id)?))
    }

    /// Append one large object. The BLOBS entry is created on first use.
    pub fn add_blob(&mut self, oid: u32, data: &[u8]) -> Result<()> {
        let blobs_id = match self
            .entries
            .iter()
            .find(|e| e.desc == constants::BLOBS)
            .map(|e| e.dump_id)
        {
            Some(id) => id,
            None => {
                self.add_entry(constants::BLOBS, constants::BLOBS, EntryDef::default())?
                    .dump_id
            }
        };
        if let Some(entry) = self.entries.iter_mut().find(|e| e.dump_id == blobs_id) {
            entry.had_dumper = true;
            if entry.data_state == DataState::NoData {
                entry.data_state = DataState::HasData;
            }
        }
        self.store.append_blob(blobs_id, oid, data)
    }

    /// Iterate all large objects as `(oid, bytes)` pairs.
    pub fn blobs(&self) -> Blobs<'_> {
        let ids: Vec<i32> = self
            .entries
            .iter()
            .filter(|e| e.desc == constants::BLOBS)
            .map(|e| e.dump_id)
            .collect();
        Blobs {
            ids: ids.into_iter(),
            store: &self.store,
            current: None,
        }
    }

    /// Write the archive to `path`.
    ///
    /// Entries are first ordered so every dependency precedes its
    /// dependents, with restore-phase order (Pre-Data, Data, Post-Data,
    /// None) and insertion order breaking ties. The file is assembled in
    /// a sibling temporary file and atomically renamed into place, so a
    /// failed save leaves `path` untouched.
    pub fn save(&mut self, path: impl AsRef<Path>) -> Result<()> {
        let path = path.as_ref();
        let order = self.topological_order()?;
        self.reorder_entries(order);

        let parent = match path.parent() {
            Some(p) if !p.as_os_str().is_empty() => p,
            _ => Path::new("."),
        };
        let mut tmp = NamedTempFile::new_in(parent)?;
        self.write_archive(tmp.as_file_mut())?;
        tmp.persist(path).map_err(|e| ArchiveError::Io(e.error))?;
        Ok(())
    }

    fn write_archive(&mut self, file: &mut File) -> Result<()> {
        let dio = ArchiveIo::new(self.int_size, self.offset_size);

        // The `\.` end-of-data marker is not stored, so data ownership is
        // simply "the store has a file for this id".
        let has_data: Vec<bool> = self
            .entries
            .iter()
            .map(|e| self.store.has(e.dump_id))
            .collect();
        for (entry, has) in self.entries.iter_mut().zip(&has_data) {
            if entry.desc == constants::TABLE_DATA || entry.desc == constants::BLOBS {
                entry.had_dumper = *has;
            }
        }
        let states: Vec<DataState> = has_data
            .iter()
            .map(|&d| if d { DataState::HasData } else { DataState::NoData })
            .collect();

        let mut writer = BufWriter::new(file);
        writer.write_all(constants::MAGIC)?;
        ArchiveIo::write_byte(&mut writer, self.version.0)?;
        ArchiveIo::write_byte(&mut writer, self.version.1)?;
        ArchiveIo::write_byte(&mut writer, self.version.2)?;
        ArchiveIo::write_byte(&mut writer, self.int_size as u8)?;
        ArchiveIo::write_byte(&mut writer, self.offset_size as u8)?;
        ArchiveIo::write_byte(&mut writer, constants::FORMAT_CUSTOM)?;

        if self.version >= constants::VERSION_COMPRESSION_ALG {
            let algorithm = if self.compression > 0 {
                constants::COMPRESSION_GZIP
            } else {
                constants::COMPRESSION_NONE
            };
            ArchiveIo::write_byte(&mut writer, algorithm)?;
        }
        dio.write_int(&mut writer, self.compression as i64)?;

        self.write_timestamp(&mut writer, &dio)?;
        dio.write_string(&mut writer, Some(&self.dbname))?;
        dio.write_string(&mut writer, Some(&self.server_version))?;
        dio.write_string(&mut writer, Some(&self.dump_version))?;

        let offset_cells =
            toc::write_toc(&mut writer, &dio, self.version, &self.entries, &states)?;

        let mut patches: Vec<(usize, u64)> = Vec::new();
        for (index, entry) in self.entries.iter().enumerate() {
            if !has_data[index] {
                continue;
            }
            let offset = writer.stream_position()?;
            let framing = if self.compression > 0 {
                constants::BLK_COMPRESSED
            } else {
                constants::BLK_UNCOMPRESSED
            };
            ArchiveIo::write_byte(&mut writer, framing)?;

            if entry.desc == constants::BLOBS {
                if let Some(records) = self.store.blob_records(entry.dump_id)? {
                    for record in records {
                        let (oid, data) = record?;
                        dio.write_int(&mut writer, oid as i64)?;
                        blocks::write_chunk_stream(
                            &mut writer,
                            &dio,
                            self.compression,
                            &mut data.as_slice(),
                        )?;
                    }
                }
                dio.write_int(&mut writer, 0)?;
            } else if let Some(reader) = self.store.reader(entry.dump_id)? {
                let mut payload = reader.chain(&b"\\.\n"[..]);
                blocks::write_chunk_stream(&mut writer, &dio, self.compression, &mut payload)?;
            }
            patches.push((index, offset));
        }

        for &(index, offset) in &patches {
            writer.seek(SeekFrom::Start(offset_cells[index]))?;
            dio.write_offset(&mut writer, constants::K_OFFSET_POS_SET, offset)?;
        }
        writer.flush()?;
        drop(writer);

        for (index, entry) in self.entries.iter_mut().enumerate() {
            if has_data[index] {
                entry.data_state = DataState::HasData;
            } else {
                entry.data_state = DataState::NoData;
                entry.offset = 0;
            }
        }
        for &(index, offset) in &patches {
            self.entries[index].data_state = DataState::HasDataOffset;
            self.entries[index].offset = offset;
        }
        Ok(())
    }

    fn write_timestamp<W: Write>(&self, writer: &mut W, dio: &ArchiveIo) -> Result<()> {
        let t = &self.timestamp;
        dio.write_int(writer, t.second() as i64)?;
        dio.write_int(writer, t.minute() as i64)?;
        dio.write_int(writer, t.hour() as i64)?;
        dio.write_int(writer, t.day() as i64)?;
        dio.write_int(writer, t.month0() as i64)?;
        let year = if self.version >= constants::VERSION_COMPRESSION_ALG {
            t.year() as i64
        } else {
            t.year() as i64 - 1900
        };
        dio.write_int(writer, year)?;
        dio.write_int(writer, 0)?; // DST flag, ignored on read
        Ok(())
    }

    /// Order entry indexes so dependencies come first, restore phases
    /// stay in order, and insertion order breaks remaining ties.
    fn topological_order(&self) -> Result<Vec<usize>> {
        let count = self.entries.len();
        let index_of: HashMap<i32, usize> = self
            .entries
            .iter()
            .enumerate()
            .map(|(i, e)| (e.dump_id, i))
            .collect();

        let mut indegree = vec![0usize; count];
        let mut dependents: Vec<Vec<usize>> = vec![Vec::new(); count];
        for (i, entry) in self.entries.iter().enumerate() {
            for dependency in &entry.dependencies {
                // Dumps pruned by pg_dump options can reference ids that
                // are not in the TOC; those impose no ordering.
                if let Some(&j) = index_of.get(dependency) {
                    indegree[i] += 1;
                    dependents[j].push(i);
                }
            }
        }

        let mut ready = BinaryHeap::new();
        for (i, entry) in self.entries.iter().enumerate() {
            if indegree[i] == 0 {
                ready.push(Reverse((entry.section.restore_rank(), i)));
            }
        }

        let mut order = Vec::with_capacity(count);
        while let Some(Reverse((_, i))) = ready.pop() {
            order.push(i);
            for &dependent in &dependents[i] {
                indegree[dependent] -= 1;
                if indegree[dependent] == 0 {
                    ready.push(Reverse((
                        self.entries[dependent].section.restore_rank(),
                        dependent,
                    )));
                }
            }
        }

        if order.len() != count {
            let in_order: HashSet<usize> = order.iter().copied().collect();
            let stuck = self
                .entries
                .iter()
                .enumerate()
                .find(|(i, _)| !in_order.contains(i))
                .map(|(_, e)| e.dump_id)
                .unwrap_or(0);
            return Err(ArchiveError::CyclicDependencies(stuck));
        }
        Ok(order)
    }

    fn reorder_entries(&mut self, order: Vec<usize>) {
        let mut rank = vec![0usize; order.len()];
        for (position, &index) in order.iter().enumerate() {
            rank[index] = position;
        }
        let mut paired: Vec<(usize, Entry)> =
            rank.into_iter().zip(self.entries.drain(..)).collect();
        paired.sort_by_key(|(position, _)| *position);
        self.entries = paired.into_iter().map(|(_, entry)| entry).collect();
    }
}

fn capture(pattern: &str, text: &str) -> Option<String> {
    let re = Regex::new(pattern).ok()?;
    re.captures(text).map(|c| c[1].to_string())
}

fn normalize_level(pos: u64, level: i64) -> Result<u32> {
    match level {
        -1 => Ok(constants::DEFAULT_COMPRESSION_LEVEL),
        0..=9 => Ok(level as u32),
        _ => format_error(pos, format!("invalid compression level {level}")),
    }
}

fn read_timestamp<R: Read>(
    reader: &mut TrackedReader<R>,
    dio: &ArchiveIo,
    version: Version,
) -> Result<DateTime<Local>> {
    let pos = reader.position();
    let second = dio.read_int(reader)?;
    let minute = dio.read_int(reader)?;
    let hour = dio.read_int(reader)?;
    let day = dio.read_int(reader)?;
    let month0 = dio.read_int(reader)?;
    let mut year = dio.read_int(reader)?;
    let _is_dst = dio.read_int(reader)?;
    if version < constants::VERSION_COMPRESSION_ALG {
        year += 1900;
    }

    let naive = NaiveDate::from_ymd_opt(year as i32, month0 as u32 + 1, day as u32)
        .and_then(|d| d.and_hms_opt(hour as u32, minute as u32, second as u32));
    match naive {
        Some(naive) => Ok(local_datetime(naive)),
        None => format_error(pos, "invalid creation timestamp"),
    }
}

/// Interpret wall-clock fields in the local timezone, falling back to
/// UTC for instants the local timezone skips.
fn local_datetime(naive: NaiveDateTime) -> DateTime<Local> {
    match naive.and_local_timezone(Local) {
        chrono::LocalResult::Single(dt) => dt,
        chrono::LocalResult::Ambiguous(dt, _) => dt,
        chrono::LocalResult::None => Local.from_utc_datetime(&naive),
    }
}

/// Lazy, forward-only iterator over one table's converted rows.
pub struct TableRows<'a> {
    reader: Option<StoreReader>,
    converter: &'a dyn Converter,
    done: bool,
}

impl fmt::Debug for TableRows<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TableRows")
            .field("done", &self.done)
            .finish_non_exhaustive()
    }
}

impl Iterator for TableRows<'_> {
    type Item = Result<Vec<Value>>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.done {
            return None;
        }
        let reader = match self.reader.as_mut() {
            Some(reader) => reader,
            None => {
                self.done = true;
                return None;
            }
        };
        let mut line = String::new();
        match reader.read_line(&mut line) {
            Ok(0) => {
                self.done = true;
                return None;
            }
            Ok(_) => {}
            Err(e) => {
                self.done = true;
                return Some(Err(e.into()));
            }
        }
        if line.ends_with('\n') {
            line.pop();
        }
        if line.starts_with("\\.") {
            self.done = true;
            return None;
        }
        let fields: Vec<&str> = line.split('\t').collect();
        Some(self.converter.convert(&fields))
    }
}

/// Lazy iterator over every large object in the archive.
pub struct Blobs<'a> {
    ids: std::vec::IntoIter<i32>,
    store: &'a DataStore,
    current: Option<BlobRecords>,
}

impl Iterator for Blobs<'_> {
    type Item = Result<(u32, Vec<u8>)>;

    fn next(&mut self) -> Option<Self::Item> {
        loop {
            if let Some(records) = self.current.as_mut() {
                if let Some(item) = records.next() {
                    return Some(item);
                }
                self.current = None;
            }
            let id = self.ids.next()?;
            match self.store.blob_records(id) {
                Ok(records) => self.current = records,
                Err(e) => return Some(Err(e)),
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::constants::{COMMENT, EXTENSION, SCHEMA, TABLE};
    use crate::entry::Section;

    #[test]
    fn add_entry_assigns_monotonic_ids() {
        let mut archive = Archive::new("test").unwrap();
        let start = archive.entries.len() as i32;
        let first = archive
            .add_entry(SCHEMA, "one", EntryDef::default())
            .unwrap()
            .dump_id;
        let second = archive
            .add_entry(SCHEMA, "two", EntryDef::default())
            .unwrap()
            .dump_id;
        assert_eq!(first, start + 1);
        assert_eq!(second, start + 2);
    }

    #[test]
    fn add_entry_derives_section_from_descriptor() {
        let mut archive = Archive::new("test").unwrap();
        let entry = archive
            .add_entry(TABLE, "accounts", EntryDef::default())
            .unwrap();
        assert_eq!(entry.section, Section::PreData);
        let entry = archive
            .add_entry(COMMENT, "TABLE accounts", EntryDef::default())
            .unwrap();
        assert_eq!(entry.section, Section::None);
    }

    #[test]
    fn add_entry_rejects_bad_ids() {
        let mut archive = Archive::new("test").unwrap();
        assert!(matches!(
            archive.add_entry(
                SCHEMA,
                "broken",
                EntryDef {
                    dump_id: Some(0),
                    ..EntryDef::default()
                }
            ),
            Err(ArchiveError::InvalidId(0))
        ));
        assert!(matches!(
            archive.add_entry(
                SCHEMA,
                "duplicate",
                EntryDef {
                    dump_id: Some(1),
                    ..EntryDef::default()
                }
            ),
            Err(ArchiveError::InvalidId(1))
        ));
    }

    #[test]
    fn add_entry_rejects_unknown_descriptor() {
        let mut archive = Archive::new("test").unwrap();
        assert!(matches!(
            archive.add_entry("WIDGET", "w", EntryDef::default()),
            Err(ArchiveError::UnknownDescriptor(_))
        ));
    }

    #[test]
    fn add_entry_validates_dependencies() {
        let mut archive = Archive::new("test").unwrap();
        assert!(matches!(
            archive.add_entry(
                TABLE,
                "orphan",
                EntryDef {
                    dependencies: vec![1024],
                    ..EntryDef::default()
                }
            ),
            Err(ArchiveError::MissingDependency(1024))
        ));
    }

    #[test]
    fn topological_order_puts_dependencies_first() {
        let mut archive = Archive::new("test").unwrap();
        let schema = archive
            .add_entry(SCHEMA, "app", EntryDef::default())
            .unwrap()
            .dump_id;
        let extension = archive
            .add_entry(EXTENSION, "uuid-ossp", EntryDef::default())
            .unwrap()
            .dump_id;
        let table = archive
            .add_entry(
                TABLE,
                "users",
                EntryDef {
                    namespace: Some("app".to_string()),
                    dependencies: vec![schema, extension],
                    ..EntryDef::default()
                },
            )
            .unwrap()
            .dump_id;

        let order = archive.topological_order().unwrap();
        archive.reorder_entries(order);
        let position = |id: i32| {
            archive
                .entries
                .iter()
                .position(|e| e.dump_id == id)
                .unwrap()
        };
        assert!(position(schema) < position(table));
        assert!(position(extension) < position(table));
    }

    #[test]
    fn cyclic_dependencies_fail_the_sort() {
        let mut archive = Archive::new("test").unwrap();
        let a = archive
            .add_entry(SCHEMA, "a", EntryDef::default())
            .unwrap()
            .dump_id;
        let b = archive
            .add_entry(
                SCHEMA,
                "b",
                EntryDef {
                    dependencies: vec![a],
                    ..EntryDef::default()
                },
            )
            .unwrap()
            .dump_id;
        if let Some(entry) = archive.entries.iter_mut().find(|e| e.dump_id == a) {
            entry.dependencies = vec![b];
        }
        assert!(matches!(
            archive.topological_order(),
            Err(ArchiveError::CyclicDependencies(_))
        ));
    }

    #[test]
    fn lookup_entry_validates_descriptor() {
        let archive = Archive::new("test").unwrap();
        assert!(matches!(
            archive.lookup_entry("WIDGET", "public", "x"),
            Err(ArchiveError::UnknownDescriptor(_))
        ));
        assert!(matches!(
            archive.lookup_entry(TABLE, "public", "x"),
            Err(ArchiveError::EntityNotFound { .. })
        ));
    }

    #[test]
    fn new_archive_carries_session_entries() {
        let archive = Archive::new("test").unwrap();
        assert_eq!(archive.entries.len(), 3);
        assert_eq!(archive.encoding, "UTF8");
        assert!(archive
            .entries
            .iter()
            .any(|e| e.desc == constants::ENCODING));
    }

    #[test]
    fn set_server_version_consults_the_map() {
        let mut archive = Archive::new("test").unwrap();
        archive.set_server_version("11.4");
        assert_eq!(archive.version, (1, 13, 0));
        archive.set_server_version("16.1");
        assert_eq!(archive.version, (1, 15, 0));
        archive.set_server_version("not a version");
        assert_eq!(archive.version, constants::DEFAULT_VERSION);
    }
}
