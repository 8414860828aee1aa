//! Run orchestration
//!
//! One run is strictly linear: validate inputs, open the page source and
//! attach everything, open the archive, lock all inputs at once, collect
//! metadata, compress each input in command-line order, release the lock,
//! then write the central directory and trailer. Every error path unwinds
//! through the writer's drop, which removes the partially written archive.

use std::path::{Path, PathBuf};

use log::debug;

use crate::deflate::Flate2Engine;
use crate::error::{Result, S3ZipError};
use crate::input::{check_output_conflict, validate_inputs, InputFile};
use crate::page_source::{PageSource, SqlitePageSource};
use crate::records::dos_date_time;
use crate::writer::{ArchiveWriter, MemberSpec};

/// Archive the given databases into `archive`, one member per database,
/// under a single consistent snapshot.
pub fn create_archive(archive: &Path, databases: &[PathBuf]) -> Result<()> {
    let inputs = validate_inputs(databases)?;
    let mut source = SqlitePageSource::open()?;
    archive_with_source(&mut source, archive, &inputs)
}

/// The pipeline behind [`create_archive`], generic over the page source so
/// tests can drive it with synthetic databases.
pub fn archive_with_source<S: PageSource>(
    source: &mut S,
    archive: &Path,
    inputs: &[InputFile],
) -> Result<()> {
    source.attach(inputs)?;
    check_output_conflict(archive, inputs)?;
    let mut writer = ArchiveWriter::create(archive)?;
    source.begin_snapshot()?;

    let mut specs = Vec::with_capacity(inputs.len());
    for (ix, input) in inputs.iter().enumerate() {
        let meta = source.metadata(ix)?;
        if !(1..=0x10000).contains(&meta.page_size) {
            return Err(S3ZipError::UnsupportedPageSize {
                path: input.path.clone(),
                page_size: meta.page_size,
            });
        }
        let (dos_date, dos_time) = dos_date_time(meta.mtime);
        specs.push(MemberSpec {
            path: input.path.clone(),
            mode: input.mode,
            dos_date,
            dos_time,
            page_size: meta.page_size as u64,
            page_count: meta.page_count as u64,
        });
    }

    let mut engine = Flate2Engine::new();
    for (ix, spec) in specs.into_iter().enumerate() {
        let mut member = writer.begin_member(spec)?;
        source.stream_pages(ix, &mut |page| {
            writer.write_page(&mut member, &mut engine, page)
        })?;
        writer.finish_member(member, &mut engine)?;
    }

    source.end_snapshot();
    writer.write_central_directory()?;
    writer.finish()?;
    debug!("archive {} finalised", archive.display());
    Ok(())
}
