//! # s3zip: Consistent-Snapshot ZIP Archiver for SQLite
//!
//! `s3zip` compresses live SQLite databases into a single standard ZIP
//! archive. All inputs are locked simultaneously with one read transaction,
//! so the archive is a consistent multi-database backup even while other
//! processes keep writing. Each member's uncompressed content is the
//! database's logical page image - WAL content folded in - streamed one
//! page at a time through raw DEFLATE, so memory use stays constant no
//! matter how large the databases are.
//!
//! ## Features
//!
//! - **Consistent**: one `BEGIN IMMEDIATE` snapshot across every input
//! - **Streaming**: one page in flight, fixed scratch buffer, no temp files
//! - **Standard output**: plain ZIP with ZIP64 extensions exactly when
//!   sizes, offsets, or the member count require them
//! - **Safe failure**: any error removes the partial archive
//!
//! ## Quick Start
//!
//! ```no_run
//! use std::path::{Path, PathBuf};
//!
//! s3zip::create_archive(Path::new("backup.zip"), &[PathBuf::from("app.db")])?;
//! # Ok::<(), s3zip::S3ZipError>(())
//! ```

pub mod archiver;
pub mod cli;
pub mod deflate;
pub mod error;
pub mod input;
pub mod page_source;
pub mod records;
pub mod writer;

pub use archiver::{archive_with_source, create_archive};
pub use cli::Cli;
pub use deflate::{DeflateEngine, Flate2Engine, Flush};
pub use error::{Result, S3ZipError};
pub use input::{validate_inputs, InputFile};
pub use page_source::{DbMeta, PageSource, SqlitePageSource};
pub use writer::{ArchiveWriter, MemberSpec};
