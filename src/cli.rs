//! Command-line interface definition for s3zip.

use std::path::PathBuf;

use clap::Parser;

/// Command-line arguments for the s3zip utility.
#[derive(Parser, Debug)]
#[command(name = "s3zip")]
#[command(version)]
#[command(about = "Archive live SQLite databases into a ZIP file under one consistent read lock")]
#[command(after_help = "Examples:\n  \
  s3zip backup.zip app.db                archive one database\n  \
  s3zip backup.zip users.db events.db    archive both under the same snapshot")]
pub struct Cli {
    /// Output ZIP archive path.
    ///
    /// Created from scratch; on any failure the partial file is removed.
    #[arg(value_name = "ARCHIVE")]
    pub archive: PathBuf,

    /// Input database files.
    ///
    /// Relative paths only; each becomes one archive member named by the
    /// path exactly as given.
    #[arg(value_name = "DATABASE", required = true)]
    pub databases: Vec<PathBuf>,
}
