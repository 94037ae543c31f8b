//! Fixed values of the pg_dump custom archive format: the file magic,
//! the supported format version range, object-type descriptors and their
//! restore sections, and the PostgreSQL server to archive version map.

use crate::entry::Section;

/// Archive format version, aligned with `pg_backup_archiver.h`.
pub type Version = (u8, u8, u8);

/// The five magic bytes every custom-format archive starts with.
pub const MAGIC: &[u8; 5] = b"PGDMP";

/// Format byte for custom (`-Fc`) archives. Directory and tar formats use
/// other values and are not handled here.
pub const FORMAT_CUSTOM: u8 = 1;

/// PostgreSQL 9.0 - separate BLOB entries.
pub const MIN_VERSION: Version = (1, 12, 0);
/// PostgreSQL 17 - BLOB METADATA entries and relkind.
pub const MAX_VERSION: Version = (1, 16, 0);
/// Version written when the caller does not target a specific server.
pub const DEFAULT_VERSION: Version = (1, 14, 0);

/// Archive version that introduced `tableam`.
pub const VERSION_TABLEAM: Version = (1, 14, 0);
/// Archive version that moved the compression algorithm into the header.
pub const VERSION_COMPRESSION_ALG: Version = (1, 15, 0);
/// Archive version that introduced `relkind` and BLOB METADATA.
pub const VERSION_RELKIND: Version = (1, 16, 0);

/// Server version string to impersonate by default.
pub const APPEAR_AS: &str = "14.0";

pub const DEFAULT_INT_SIZE: usize = 4;
pub const DEFAULT_OFFSET_SIZE: usize = 8;

/// Data-state byte: the entry has data but its offset was never recorded.
pub const K_OFFSET_POS_NOT_SET: u8 = 1;
/// Data-state byte: the entry has data at the stored offset.
pub const K_OFFSET_POS_SET: u8 = 2;
/// Data-state byte: the entry has no data block.
pub const K_OFFSET_NO_DATA: u8 = 3;

/// Framing byte for a block of raw `(length, bytes)` chunks.
pub const BLK_UNCOMPRESSED: u8 = 0x01;
/// Framing byte for a block whose concatenated chunks form a gzip stream.
pub const BLK_COMPRESSED: u8 = 0x02;

pub const COMPRESSION_NONE: u8 = 0;
pub const COMPRESSION_GZIP: u8 = 1;

/// Zlib's default level, substituted when an archive stores level -1.
pub const DEFAULT_COMPRESSION_LEVEL: u32 = 6;

/// Maximum payload bytes per `(length, bytes)` chunk on the write path.
pub const CHUNK_SIZE: usize = 4096;

pub const DEFAULT_ENCODING: &str = "UTF8";

// Object-type descriptors found in archive tables of contents.

pub const ACCESS_METHOD: &str = "ACCESS METHOD";
pub const ACL: &str = "ACL";
pub const AGGREGATE: &str = "AGGREGATE";
pub const BLOB: &str = "BLOB";
pub const BLOBS: &str = "BLOBS";
pub const BLOB_METADATA: &str = "BLOB METADATA";
pub const CAST: &str = "CAST";
pub const CHECK_CONSTRAINT: &str = "CHECK CONSTRAINT";
pub const COLLATION: &str = "COLLATION";
pub const COMMENT: &str = "COMMENT";
pub const CONSTRAINT: &str = "CONSTRAINT";
pub const CONVERSION: &str = "CONVERSION";
pub const DATABASE: &str = "DATABASE";
pub const DATABASE_PROPERTIES: &str = "DATABASE PROPERTIES";
pub const DEFAULT: &str = "DEFAULT";
pub const DEFAULT_ACL: &str = "DEFAULT ACL";
pub const DOMAIN: &str = "DOMAIN";
pub const ENCODING: &str = "ENCODING";
pub const EVENT_TRIGGER: &str = "EVENT TRIGGER";
pub const EXTENSION: &str = "EXTENSION";
pub const FK_CONSTRAINT: &str = "FK CONSTRAINT";
pub const FOREIGN_DATA_WRAPPER: &str = "FOREIGN DATA WRAPPER";
pub const FOREIGN_TABLE: &str = "FOREIGN TABLE";
pub const FUNCTION: &str = "FUNCTION";
pub const INDEX: &str = "INDEX";
pub const INDEX_ATTACH: &str = "INDEX ATTACH";
pub const MATERIALIZED_VIEW: &str = "MATERIALIZED VIEW";
pub const MATERIALIZED_VIEW_DATA: &str = "MATERIALIZED VIEW DATA";
pub const OPERATOR: &str = "OPERATOR";
pub const OPERATOR_CLASS: &str = "OPERATOR CLASS";
pub const OPERATOR_FAMILY: &str = "OPERATOR FAMILY";
pub const POLICY: &str = "POLICY";
pub const PROCEDURE: &str = "PROCEDURE";
pub const PROCEDURAL_LANGUAGE: &str = "PROCEDURAL LANGUAGE";
pub const PUBLICATION: &str = "PUBLICATION";
pub const PUBLICATION_TABLE: &str = "PUBLICATION TABLE";
pub const PUBLICATION_TABLES_IN_SCHEMA: &str = "PUBLICATION TABLES IN SCHEMA";
pub const ROW_SECURITY: &str = "ROW SECURITY";
pub const RULE: &str = "RULE";
pub const SCHEMA: &str = "SCHEMA";
pub const SEARCHPATH: &str = "SEARCHPATH";
pub const SECURITY_LABEL: &str = "SECURITY LABEL";
pub const SEQUENCE: &str = "SEQUENCE";
pub const SEQUENCE_OWNED_BY: &str = "SEQUENCE OWNED BY";
pub const SEQUENCE_SET: &str = "SEQUENCE SET";
pub const SERVER: &str = "SERVER";
pub const SHELL_TYPE: &str = "SHELL TYPE";
pub const STATISTICS: &str = "STATISTICS";
pub const STDSTRINGS: &str = "STDSTRINGS";
pub const SUBSCRIPTION: &str = "SUBSCRIPTION";
pub const TABLE: &str = "TABLE";
pub const TABLE_ATTACH: &str = "TABLE ATTACH";
pub const TABLE_DATA: &str = "TABLE DATA";
pub const TEXT_SEARCH_CONFIGURATION: &str = "TEXT SEARCH CONFIGURATION";
pub const TEXT_SEARCH_DICTIONARY: &str = "TEXT SEARCH DICTIONARY";
pub const TEXT_SEARCH_PARSER: &str = "TEXT SEARCH PARSER";
pub const TEXT_SEARCH_TEMPLATE: &str = "TEXT SEARCH TEMPLATE";
pub const TRANSFORM: &str = "TRANSFORM";
pub const TRIGGER: &str = "TRIGGER";
pub const TYPE: &str = "TYPE";
pub const USER_MAPPING: &str = "USER MAPPING";
pub const VIEW: &str = "VIEW";

/// Restore section for a descriptor, or `None` when the descriptor is not
/// one this library knows how to classify.
pub fn section_for(desc: &str) -> Option<Section> {
    Some(match desc {
        ACCESS_METHOD | AGGREGATE | CAST | COLLATION | CONVERSION | DATABASE
        | DATABASE_PROPERTIES | DEFAULT | DOMAIN | ENCODING | EXTENSION
        | FOREIGN_DATA_WRAPPER | FOREIGN_TABLE | FUNCTION | MATERIALIZED_VIEW
        | OPERATOR | OPERATOR_CLASS | OPERATOR_FAMILY | PROCEDURE
        | PROCEDURAL_LANGUAGE | SCHEMA | SEARCHPATH | SEQUENCE
        | SEQUENCE_OWNED_BY | SERVER | SHELL_TYPE | STDSTRINGS | TABLE
        | TABLE_ATTACH | TEXT_SEARCH_CONFIGURATION | TEXT_SEARCH_DICTIONARY
        | TEXT_SEARCH_PARSER | TEXT_SEARCH_TEMPLATE | TRANSFORM | TYPE
        | USER_MAPPING | VIEW => Section::PreData,

        BLOB | BLOBS | BLOB_METADATA | SEQUENCE_SET | TABLE_DATA => {
            Section::Data
        }

        CHECK_CONSTRAINT | CONSTRAINT | EVENT_TRIGGER | FK_CONSTRAINT | INDEX
        | INDEX_ATTACH | MATERIALIZED_VIEW_DATA | POLICY | PUBLICATION
        | PUBLICATION_TABLE | PUBLICATION_TABLES_IN_SCHEMA | ROW_SECURITY
        | RULE | STATISTICS | SUBSCRIPTION | TRIGGER => Section::PostData,

        ACL | COMMENT | DEFAULT_ACL | SECURITY_LABEL => Section::None,

        _ => return None,
    })
}

/// Map a PostgreSQL server version string ("12.4", "9.6.11", ...) to the
/// archive format version pg_dump would produce for it. Versions outside
/// the known ranges fall back to [`DEFAULT_VERSION`].
pub fn version_for_server(server_version: &str) -> Version {
    let major = server_version
        .split(|c: char| !c.is_ascii_digit())
        .next()
        .and_then(|v| v.parse::<u32>().ok());

    match major {
        Some(9) | Some(10) => (1, 12, 0),
        Some(11) => (1, 13, 0),
        Some(12..=15) => (1, 14, 0),
        Some(16) => (1, 15, 0),
        Some(17) | Some(18) => (1, 16, 0),
        _ => DEFAULT_VERSION,
    }
}
