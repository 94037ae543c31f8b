//! Read and write PostgreSQL backup archives in the custom container
//! format produced by `pg_dump -Fc`.
//!
//! An archive is a single binary file holding a header, a table of
//! contents describing every database object, and optional data blocks
//! with each table's rows and each large object's bytes. This crate
//! parses and emits that byte stream for format versions 1.12 through
//! 1.16 (PostgreSQL 9.0 through 17) and gives direct access to the raw
//! table data without restoring into a database.
//!
//! ```no_run
//! fn main() -> pg_custom::Result<()> {
//!     let archive = pg_custom::load("dump.custom")?;
//!     println!("backup of {}", archive.dbname);
//!     for row in archive.table_data("public", "pgbench_accounts")? {
//!         println!("{:?}", row?);
//!     }
//!     Ok(())
//! }
//! ```

pub mod archive;
pub mod blocks;
pub mod constants;
pub mod converters;
pub mod entry;
pub mod error;
pub mod io;
pub mod store;
pub mod toc;

use std::path::Path;

pub use archive::{Archive, Blobs, TableRows};
pub use converters::{
    CidrNetwork, Converter, DefaultConverter, NoOpConverter, SmartConverter, Value,
};
pub use entry::{DataState, Entry, EntryDef, Section};
pub use error::{ArchiveError, Result};
pub use store::TableDataWriter;

/// Load an archive from disk using the default converter.
pub fn load(path: impl AsRef<Path>) -> Result<Archive> {
    Archive::load(path)
}

/// Load an archive from disk with a caller-supplied row converter.
pub fn load_with(path: impl AsRef<Path>, converter: Box<dyn Converter>) -> Result<Archive> {
    Archive::load_with(path, converter)
}

/// Create an empty archive for the given database name.
pub fn new(dbname: &str) -> Result<Archive> {
    Archive::new(dbname)
}
