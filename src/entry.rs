use std::fmt;

use crate::constants;

/// Restore phase of a table-of-contents entry.
///
/// The on-disk encoding is None=1, PreData=2, Data=3, PostData=4; the
/// phase ordering used when saving is PreData, Data, PostData, None.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Section {
    None,
    PreData,
    Data,
    PostData,
}

impl Section {
    pub fn from_disk(value: i64) -> Option<Self> {
        match value {
            1 => Some(Section::None),
            2 => Some(Section::PreData),
            3 => Some(Section::Data),
            4 => Some(Section::PostData),
            _ => None,
        }
    }

    pub fn to_disk(self) -> i64 {
        match self {
            Section::None => 1,
            Section::PreData => 2,
            Section::Data => 3,
            Section::PostData => 4,
        }
    }

    /// Ordering used as the secondary sort key at save time.
    pub(crate) fn restore_rank(self) -> u8 {
        match self {
            Section::PreData => 0,
            Section::Data => 1,
            Section::PostData => 2,
            Section::None => 3,
        }
    }
}

impl fmt::Display for Section {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Section::None => write!(f, "None"),
            Section::PreData => write!(f, "Pre-Data"),
            Section::Data => write!(f, "Data"),
            Section::PostData => write!(f, "Post-Data"),
        }
    }
}

/// Whether an entry carries a data block, and whether its offset is known.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DataState {
    NoData,
    HasData,
    HasDataOffset,
}

impl DataState {
    pub fn from_disk(value: u8) -> Option<Self> {
        match value {
            constants::K_OFFSET_POS_NOT_SET => Some(DataState::HasData),
            constants::K_OFFSET_POS_SET => Some(DataState::HasDataOffset),
            constants::K_OFFSET_NO_DATA => Some(DataState::NoData),
            _ => None,
        }
    }

    pub fn to_disk(self) -> u8 {
        match self {
            DataState::HasData => constants::K_OFFSET_POS_NOT_SET,
            DataState::HasDataOffset => constants::K_OFFSET_POS_SET,
            DataState::NoData => constants::K_OFFSET_NO_DATA,
        }
    }
}

/// One table-of-contents record: a database object, its DDL, and the
/// location of its data block when it has one.
#[derive(Debug, Clone, PartialEq)]
pub struct Entry {
    pub dump_id: i32,
    pub had_dumper: bool,
    pub table_oid: Option<String>,
    pub oid: Option<String>,
    pub tag: String,
    pub desc: String,
    pub section: Section,
    pub defn: Option<String>,
    pub drop_stmt: Option<String>,
    pub copy_stmt: Option<String>,
    pub namespace: Option<String>,
    pub tablespace: Option<String>,
    /// Table access method, recorded by archives of format 1.14 and later.
    pub tableam: Option<String>,
    /// Relation kind character, recorded by archives of format 1.16 and later.
    pub relkind: Option<char>,
    pub owner: Option<String>,
    pub dependencies: Vec<i32>,
    pub data_state: DataState,
    pub offset: u64,
}

impl Entry {
    pub(crate) fn namespace_str(&self) -> &str {
        self.namespace.as_deref().unwrap_or_default()
    }
}

/// Optional fields for [`Archive::add_entry`](crate::Archive::add_entry).
/// Fill in what applies and default the rest:
///
/// ```no_run
/// # use pg_custom::{constants, EntryDef};
/// # let mut archive = pg_custom::new("example").unwrap();
/// archive.add_entry(
///     constants::SCHEMA,
///     "test",
///     EntryDef {
///         owner: Some("postgres".into()),
///         defn: Some("CREATE SCHEMA test;".into()),
///         ..EntryDef::default()
///     },
/// ).unwrap();
/// ```
#[derive(Debug, Clone, Default)]
pub struct EntryDef {
    pub namespace: Option<String>,
    pub owner: Option<String>,
    pub defn: Option<String>,
    pub drop_stmt: Option<String>,
    pub copy_stmt: Option<String>,
    pub dependencies: Vec<i32>,
    pub dump_id: Option<i32>,
    pub table_oid: Option<String>,
    pub oid: Option<String>,
    pub tablespace: Option<String>,
    pub tableam: Option<String>,
    pub relkind: Option<char>,
}
