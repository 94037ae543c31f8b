//! Table-of-contents codec.
//!
//! The entry field set grew over the supported format range: `tableam`
//! was added in 1.14 and `relkind` in 1.16, so both paths dispatch on the
//! archive version read from the header.

use std::io::{Read, Seek, Write};

use crate::constants::{self, Version};
use crate::entry::{DataState, Entry, Section};
use crate::error::Result;
use crate::io::{format_error, ArchiveIo, TrackedReader};

/// Read the entry count and every entry that follows it.
pub fn read_toc<R: Read>(
    reader: &mut TrackedReader<R>,
    dio: &ArchiveIo,
    version: Version,
) -> Result<Vec<Entry>> {
    let count = ArchiveIo::read_u32(reader)? as usize;
    let mut entries = Vec::with_capacity(count.min(1024));
    for _ in 0..count {
        entries.push(read_entry(reader, dio, version)?);
    }
    Ok(entries)
}

fn read_entry<R: Read>(
    reader: &mut TrackedReader<R>,
    dio: &ArchiveIo,
    version: Version,
) -> Result<Entry> {
    let start = reader.position();
    let dump_id = dio.read_int(reader)?;
    if dump_id <= 0 || dump_id > i32::MAX as i64 {
        return format_error(start, format!("invalid dump id {dump_id}"));
    }
    let had_dumper = dio.read_int(reader)? != 0;
    let table_oid = dio.read_string(reader)?;
    let oid = dio.read_string(reader)?;
    let tag = dio.read_string(reader)?.unwrap_or_default();
    let desc = dio.read_string(reader)?.unwrap_or_default();

    let section_pos = reader.position();
    let section_raw = dio.read_int(reader)?;
    let disk_section = match Section::from_disk(section_raw) {
        Some(s) => s,
        None => return format_error(section_pos, format!("invalid section {section_raw}")),
    };

    let defn = dio.read_string(reader)?;
    let drop_stmt = dio.read_string(reader)?;
    let copy_stmt = dio.read_string(reader)?;
    let namespace = dio.read_string(reader)?;
    let tablespace = dio.read_string(reader)?;

    let tableam = if version >= constants::VERSION_TABLEAM {
        dio.read_string(reader)?
    } else {
        None
    };

    let relkind = if version >= constants::VERSION_RELKIND {
        let pos = reader.position();
        let code = dio.read_int(reader)?;
        match code {
            0 => None,
            1..=0x10FFFF => char::from_u32(code as u32),
            _ => return format_error(pos, format!("invalid relkind {code}")),
        }
    } else {
        None
    };

    let owner = dio.read_string(reader)?;

    // Legacy "with oids" field; always "false" since PostgreSQL 12.
    let _with_oids = dio.read_string(reader)?;

    let mut dependencies = Vec::new();
    loop {
        let pos = reader.position();
        match dio.read_string(reader)? {
            None => break,
            Some(s) if s.is_empty() => break,
            Some(s) => match s.parse::<i32>() {
                Ok(dep_id) => dependencies.push(dep_id),
                Err(_) => {
                    return format_error(pos, format!("invalid dependency id {s:?}"))
                }
            },
        }
    }

    let state_pos = reader.position();
    let (state_byte, offset) = dio.read_offset(reader)?;
    let data_state = match DataState::from_disk(state_byte) {
        Some(s) => s,
        None => return format_error(state_pos, format!("invalid data state {state_byte}")),
    };

    // The stored section is only a cross-check; the descriptor is the
    // canonical source. Descriptors we do not know keep the stored value.
    let section = constants::section_for(&desc).unwrap_or(disk_section);

    Ok(Entry {
        dump_id: dump_id as i32,
        had_dumper,
        table_oid,
        oid,
        tag,
        desc,
        section,
        defn,
        drop_stmt,
        copy_stmt,
        namespace,
        tablespace,
        tableam,
        relkind,
        owner,
        dependencies,
        data_state,
        offset,
    })
}

/// Write the entry count and all entries with zeroed offsets, returning
/// the file position of each entry's data-state/offset cell so the save
/// pass can patch them in place once block positions are known.
pub fn write_toc<W: Write + Seek>(
    writer: &mut W,
    dio: &ArchiveIo,
    version: Version,
    entries: &[Entry],
    states: &[DataState],
) -> Result<Vec<u64>> {
    ArchiveIo::write_u32(writer, entries.len() as u32)?;
    let mut offset_cells = Vec::with_capacity(entries.len());
    for (entry, state) in entries.iter().zip(states) {
        offset_cells.push(write_entry(writer, dio, version, entry, *state)?);
    }
    Ok(offset_cells)
}

fn write_entry<W: Write + Seek>(
    writer: &mut W,
    dio: &ArchiveIo,
    version: Version,
    entry: &Entry,
    state: DataState,
) -> Result<u64> {
    dio.write_int(writer, entry.dump_id as i64)?;
    dio.write_int(writer, entry.had_dumper as i64)?;
    dio.write_string(writer, Some(entry.table_oid.as_deref().unwrap_or("0")))?;
    dio.write_string(writer, Some(entry.oid.as_deref().unwrap_or("0")))?;
    dio.write_string(writer, Some(&entry.tag))?;
    dio.write_string(writer, Some(&entry.desc))?;
    dio.write_int(writer, entry.section.to_disk())?;
    dio.write_string(writer, entry.defn.as_deref())?;
    dio.write_string(writer, entry.drop_stmt.as_deref())?;
    dio.write_string(writer, entry.copy_stmt.as_deref())?;
    dio.write_string(writer, entry.namespace.as_deref())?;
    dio.write_string(writer, entry.tablespace.as_deref())?;
    if version >= constants::VERSION_TABLEAM {
        dio.write_string(writer, entry.tableam.as_deref())?;
    }
    if version >= constants::VERSION_RELKIND {
        dio.write_int(writer, entry.relkind.map_or(0, |c| c as i64))?;
    }
    dio.write_string(writer, entry.owner.as_deref())?;
    dio.write_string(writer, Some("false"))?;
    for dependency in &entry.dependencies {
        dio.write_string(writer, Some(&dependency.to_string()))?;
    }
    dio.write_int(writer, -1)?;

    let cell = writer.stream_position()?;
    dio.write_offset(writer, state.to_disk(), 0)?;
    Ok(cell)
}
