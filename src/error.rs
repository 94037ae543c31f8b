use thiserror::Error;

#[derive(Error, Debug)]
pub enum ArchiveError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("not a pg_dump custom archive: {0}")]
    NotAnArchive(String),

    #[error("unsupported archive version {0}.{1}.{2}")]
    UnsupportedVersion(u8, u8, u8),

    #[error("malformed archive at byte {offset}: {message}")]
    Format { offset: u64, message: String },

    #[error("invalid dump id: {0}")]
    InvalidId(i32),

    #[error("dependency dump id {0} not found")]
    MissingDependency(i32),

    #[error("dependency cycle involving dump id {0}")]
    CyclicDependencies(i32),

    #[error("unknown descriptor: {0}")]
    UnknownDescriptor(String),

    #[error("{namespace}.{tag} not found in the table of contents")]
    EntityNotFound { namespace: String, tag: String },

    #[error("converter error: {0}")]
    Converter(String),
}

pub type Result<T> = std::result::Result<T, ArchiveError>;
