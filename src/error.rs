//! Error types for s3zip

use std::io;
use std::path::{Path, PathBuf};

use thiserror::Error;

/// Result type for s3zip operations
pub type Result<T> = std::result::Result<T, S3ZipError>;

/// Error types that can occur while archiving databases.
///
/// Every variant is fatal to the whole run: nothing is retried and the
/// partially written archive is removed before the process exits. Each
/// variant renders as one diagnostic line naming the operation and the
/// offending path or code.
#[derive(Debug, Error)]
pub enum S3ZipError {
    /// An input path was the empty string
    #[error("No empty paths allowed")]
    EmptyPath,
    /// An input path started with `/`
    #[error("{}: No absolute paths allowed", .0.display())]
    AbsolutePath(PathBuf),
    /// An input path was longer than a ZIP name field can hold
    #[error("{}: Path too long", .0.display())]
    PathTooLong(PathBuf),
    /// An input was not a regular file
    #[error("{}: Not a regular file", .0.display())]
    NotRegularFile(PathBuf),
    /// Two inputs named the same filesystem object
    #[error("{}: Duplicate input", .0.display())]
    DuplicateInput(PathBuf),
    /// The archive path named one of the input files
    #[error("{}: Conflicts with an input file", .0.display())]
    OutputConflict(PathBuf),
    /// More inputs than a central directory can count
    #[error("Definitely too many inputs")]
    TooManyInputs,
    /// A database reported a page size outside 1..=65536
    #[error("{}: Unsupported page size {page_size}", .path.display())]
    UnsupportedPageSize { path: PathBuf, page_size: i64 },
    /// A streamed page blob did not match the reported page size
    #[error("{}: Inconsistent page size", .0.display())]
    InconsistentPageSize(PathBuf),
    /// The page stream delivered fewer or more pages than reported
    #[error("{}: Inconsistent page count", .0.display())]
    InconsistentPageCount(PathBuf),
    /// The page source failed; `op` names the SQLite operation
    #[error("sqlite {op}: {source}")]
    PageSource {
        op: &'static str,
        source: rusqlite::Error,
    },
    /// The deflate engine returned a non-OK, non-stream-end status
    #[error("deflate: {0}")]
    Compression(String),
    /// A filesystem operation failed; `op` names the syscall
    #[error("{}: {op}: {source}", .path.display())]
    Io {
        path: PathBuf,
        op: &'static str,
        source: io::Error,
    },
}

impl S3ZipError {
    /// Wrap an I/O error with the operation name and the path it hit.
    pub fn io(path: &Path, op: &'static str, source: io::Error) -> Self {
        S3ZipError::Io {
            path: path.to_path_buf(),
            op,
            source,
        }
    }

    /// Wrap a page-source error with the SQLite operation name.
    pub fn sqlite(op: &'static str, source: rusqlite::Error) -> Self {
        S3ZipError::PageSource { op, source }
    }
}
