//! Input validation
//!
//! Inputs are named on the command line as relative paths. Each one must be
//! a distinct regular file, and none may turn out to be the archive the run
//! is about to write. Identity is device+inode, so the same file reached
//! through two different names is still a duplicate.

use std::fs;
use std::os::unix::ffi::OsStrExt;
use std::os::unix::fs::MetadataExt;
use std::path::{Path, PathBuf};

use crate::error::{Result, S3ZipError};

/// One validated input database.
#[derive(Debug, Clone)]
pub struct InputFile {
    /// Relative path, stored verbatim as the archive member name
    pub path: PathBuf,
    /// Device number of the backing filesystem object
    pub dev: u64,
    /// Inode number of the backing filesystem object
    pub ino: u64,
    /// File mode, kept for the central directory's external attributes
    pub mode: u16,
}

/// Validate the command-line inputs and capture their filesystem identity.
///
/// Checks, in order: input count, empty path, absolute path, over-long
/// path, stat, regular file, duplicate identity.
pub fn validate_inputs(paths: &[PathBuf]) -> Result<Vec<InputFile>> {
    if paths.len() > 0x7FFF_FFFF {
        return Err(S3ZipError::TooManyInputs);
    }
    let mut inputs: Vec<InputFile> = Vec::with_capacity(paths.len());
    for path in paths {
        let bytes = path.as_os_str().as_bytes();
        if bytes.is_empty() {
            return Err(S3ZipError::EmptyPath);
        }
        if bytes[0] == b'/' {
            return Err(S3ZipError::AbsolutePath(path.clone()));
        }
        if bytes.len() > 0xFFFF {
            return Err(S3ZipError::PathTooLong(path.clone()));
        }
        let meta = fs::metadata(path).map_err(|e| S3ZipError::io(path, "stat", e))?;
        if !meta.file_type().is_file() {
            return Err(S3ZipError::NotRegularFile(path.clone()));
        }
        let (dev, ino) = (meta.dev(), meta.ino());
        if inputs.iter().any(|seen| seen.dev == dev && seen.ino == ino) {
            return Err(S3ZipError::DuplicateInput(path.clone()));
        }
        inputs.push(InputFile {
            path: path.clone(),
            dev,
            ino,
            mode: meta.mode() as u16,
        });
    }
    Ok(inputs)
}

/// Refuse to archive over one of the inputs.
///
/// A missing archive path is fine; a pre-existing file is a conflict iff
/// its device+inode matches an input.
pub fn check_output_conflict(archive: &Path, inputs: &[InputFile]) -> Result<()> {
    if let Ok(meta) = fs::metadata(archive) {
        let (dev, ino) = (meta.dev(), meta.ino());
        if inputs.iter().any(|input| input.dev == dev && input.ino == ino) {
            return Err(S3ZipError::OutputConflict(archive.to_path_buf()));
        }
    }
    Ok(())
}
