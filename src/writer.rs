//! Two-pass streaming ZIP writer
//!
//! Member payload is compressed at unknown final size, so each member is
//! written in two passes: reserve exactly enough space for the local header
//! (its size depends only on the path length and the ZIP64 decision, both
//! known in advance from the worst-case bound), stream compressed pages past
//! the reservation, then seek back and write the whole header at once.
//! Returning to patch just the CRC and sizes would be too fiddly.
//!
//! Requires a seekable output; piped output is unsupported.

use std::fs::{self, File};
use std::io::{Seek, SeekFrom, Write};
use std::os::unix::ffi::OsStrExt;
use std::path::{Path, PathBuf};

use crc32fast::Hasher as Crc32;
use log::debug;

use crate::deflate::{DeflateEngine, Flush};
use crate::error::{Result, S3ZipError};
use crate::records::{
    central_zip64_extra, CentralEntry, Eocd, Eocd64, Eocd64Locator, LocalEntry, LocalZip64,
    CREATOR_UNIX, LOCAL_ENTRY_SIZE, LOCAL_ZIP64_SIZE, U32_SENTINEL, VERSION_CLASSIC,
    VERSION_ZIP64,
};

/// Everything the writer needs to know about a member before its first
/// page arrives.
#[derive(Debug, Clone)]
pub struct MemberSpec {
    /// Archive member name, stored verbatim
    pub path: PathBuf,
    /// Input file mode for the external attributes
    pub mode: u16,
    pub dos_date: u16,
    pub dos_time: u16,
    pub page_size: u64,
    pub page_count: u64,
}

/// Upper bound on the compressed size of a member, assuming every page
/// degenerates to raw stored blocks (5 bytes of overhead per 65535-byte
/// block). Known before compression, so the ZIP64 decision is too.
pub fn worst_case_compressed_size(page_size: u64, page_count: u64) -> u64 {
    page_count * (page_size + (page_size + 0xFFFE) / 0xFFFF * 5)
}

/// ZIP64 framing decision for a member: `(needs_local, needs_central)`.
///
/// The local extra is needed iff either size can overflow 32 bits; the
/// central record additionally overflows when the member starts past 4 GiB.
pub fn member_framing(page_size: u64, page_count: u64, local_offset: u64) -> (bool, bool) {
    let size = page_size * page_count;
    let worst = worst_case_compressed_size(page_size, page_count);
    let needs_l64 = size > U32_SENTINEL || worst > U32_SENTINEL;
    let needs_c64 = needs_l64 || local_offset > U32_SENTINEL;
    (needs_l64, needs_c64)
}

/// Split a member's final numbers into central-header slots and the ZIP64
/// extra field. Greater-or-equal comparisons: the all-ones value is
/// reserved as the overflow sentinel, so it can never appear as a literal.
/// Present extra values keep the fixed order (size, compressed, offset).
pub fn central_fields(
    needs_c64: bool,
    size: u64,
    compressed_size: u64,
    local_offset: u64,
) -> (u32, u32, u32, Vec<u8>) {
    if !needs_c64 {
        return (
            size as u32,
            compressed_size as u32,
            local_offset as u32,
            Vec::new(),
        );
    }
    let mut values = Vec::new();
    let size32 = if size >= U32_SENTINEL {
        values.push(size);
        U32_SENTINEL as u32
    } else {
        size as u32
    };
    let compressed32 = if compressed_size >= U32_SENTINEL {
        values.push(compressed_size);
        U32_SENTINEL as u32
    } else {
        compressed_size as u32
    };
    let offset32 = if local_offset >= U32_SENTINEL {
        values.push(local_offset);
        U32_SENTINEL as u32
    } else {
        local_offset as u32
    };
    (size32, compressed32, offset32, central_zip64_extra(&values))
}

/// One member mid-stream: accumulated CRC, sizes, and the framing decision
/// made at `begin_member` time.
pub struct MemberState {
    spec: MemberSpec,
    local_offset: u64,
    needs_l64: bool,
    needs_c64: bool,
    version: u16,
    size: u64,
    crc: Crc32,
    compressed_size: u64,
    pages_seen: u64,
    drain: Vec<u8>,
}

/// Streaming ZIP writer producing one deflated member per input database.
pub struct ArchiveWriter {
    path: PathBuf,
    file: File,
    offset: u64,
    entries: Vec<Vec<u8>>,
    cd_offset: u64,
    cd_size: u64,
    total_size: u64,
    finished: bool,
}

fn io_err(path: &Path, op: &'static str, e: std::io::Error) -> S3ZipError {
    S3ZipError::io(path, op, e)
}

impl ArchiveWriter {
    /// Create the output file. From this point until [`finish`] succeeds,
    /// dropping the writer removes the file.
    ///
    /// [`finish`]: ArchiveWriter::finish
    pub fn create(path: &Path) -> Result<Self> {
        let file = File::create(path).map_err(|e| io_err(path, "open", e))?;
        Ok(ArchiveWriter {
            path: path.to_path_buf(),
            file,
            offset: 0,
            entries: Vec::new(),
            cd_offset: 0,
            cd_size: 0,
            total_size: 0,
            finished: false,
        })
    }

    fn seek(&mut self, pos: u64) -> Result<()> {
        self.file
            .seek(SeekFrom::Start(pos))
            .map(|_| ())
            .map_err(|e| io_err(&self.path, "seek", e))
    }

    /// Open member `k`: record its local-header offset, decide its framing
    /// from the worst-case bound, and reserve header space by seeking past
    /// it.
    pub fn begin_member(&mut self, spec: MemberSpec) -> Result<MemberState> {
        let size = spec.page_size * spec.page_count;
        let (needs_l64, needs_c64) =
            member_framing(spec.page_size, spec.page_count, self.offset);
        let version = if needs_c64 {
            VERSION_ZIP64
        } else {
            VERSION_CLASSIC
        };
        let local_offset = self.offset;
        let path_len = spec.path.as_os_str().as_bytes().len() as u64;
        let mut reserved = LOCAL_ENTRY_SIZE as u64 + path_len;
        if needs_l64 {
            reserved += LOCAL_ZIP64_SIZE as u64;
        }
        self.offset = local_offset + reserved;
        self.seek(self.offset)?;
        Ok(MemberState {
            spec,
            local_offset,
            needs_l64,
            needs_c64,
            version,
            size,
            crc: Crc32::new(),
            compressed_size: 0,
            pages_seen: 0,
            drain: Vec::new(),
        })
    }

    /// Append one page to the open member: length check, CRC, deflate,
    /// write whatever the engine drained.
    pub fn write_page(
        &mut self,
        member: &mut MemberState,
        engine: &mut dyn DeflateEngine,
        page: &[u8],
    ) -> Result<()> {
        if page.len() as u64 != member.spec.page_size {
            return Err(S3ZipError::InconsistentPageSize(member.spec.path.clone()));
        }
        member.pages_seen += 1;
        if member.pages_seen > member.spec.page_count {
            return Err(S3ZipError::InconsistentPageCount(member.spec.path.clone()));
        }
        member.crc.update(page);
        let flush = if member.pages_seen == member.spec.page_count {
            Flush::Finish
        } else {
            Flush::Block
        };
        member.drain.clear();
        engine.feed(page, flush, &mut member.drain)?;
        if !member.drain.is_empty() {
            self.file
                .write_all(&member.drain)
                .map_err(|e| io_err(&self.path, "write", e))?;
            member.compressed_size += member.drain.len() as u64;
            self.offset += member.drain.len() as u64;
        }
        Ok(())
    }

    /// Close the open member: verify the page count, reset the engine,
    /// seek back to fill the local header, and prepare the central record.
    pub fn finish_member(
        &mut self,
        mut member: MemberState,
        engine: &mut dyn DeflateEngine,
    ) -> Result<()> {
        if member.pages_seen < member.spec.page_count {
            return Err(S3ZipError::InconsistentPageCount(member.spec.path.clone()));
        }
        if member.pages_seen == 0 {
            // a pageless member still carries the 2-byte end-of-stream
            // marker so it decodes standalone
            member.drain.clear();
            engine.feed(&[], Flush::Finish, &mut member.drain)?;
            self.file
                .write_all(&member.drain)
                .map_err(|e| io_err(&self.path, "write", e))?;
            member.compressed_size += member.drain.len() as u64;
            self.offset += member.drain.len() as u64;
        }
        engine.reset()?;

        let path_bytes = member.spec.path.as_os_str().as_bytes();
        let crc = member.crc.finalize();

        // second pass: the real local header over the reservation
        let (compressed32, size32, extra_len) = if member.needs_l64 {
            (
                U32_SENTINEL as u32,
                U32_SENTINEL as u32,
                LOCAL_ZIP64_SIZE as u16,
            )
        } else {
            (member.compressed_size as u32, member.size as u32, 0)
        };
        let local = LocalEntry {
            needed_version: member.version,
            mod_time: member.spec.dos_time,
            mod_date: member.spec.dos_date,
            crc,
            compressed_size: compressed32,
            size: size32,
            path_len: path_bytes.len() as u16,
            extra_len,
        };
        self.seek(member.local_offset)?;
        self.file
            .write_all(&local.to_bytes())
            .map_err(|e| io_err(&self.path, "write", e))?;
        self.file
            .write_all(path_bytes)
            .map_err(|e| io_err(&self.path, "write", e))?;
        if member.needs_l64 {
            let ext = LocalZip64 {
                size: member.size,
                compressed_size: member.compressed_size,
            };
            self.file
                .write_all(&ext.to_bytes())
                .map_err(|e| io_err(&self.path, "write", e))?;
        }

        // central record, kept in memory until all members are done
        let (size32, compressed32, offset32, extra) = central_fields(
            member.needs_c64,
            member.size,
            member.compressed_size,
            member.local_offset,
        );
        let central = CentralEntry {
            creator_version: member.version.max(VERSION_ZIP64) | CREATOR_UNIX,
            needed_version: member.version,
            mod_time: member.spec.dos_time,
            mod_date: member.spec.dos_date,
            crc,
            compressed_size: compressed32,
            size: size32,
            path_len: path_bytes.len() as u16,
            extra_len: extra.len() as u16,
            external_attribs: (member.spec.mode as u32) << 16,
            local_offset: offset32,
        };
        let mut record = central.to_bytes();
        record.extend_from_slice(path_bytes);
        record.extend_from_slice(&extra);

        let archived = self.offset - member.local_offset + record.len() as u64;
        eprintln!(
            "{:.6}  {}",
            archived as f64 / member.size as f64,
            member.spec.path.display()
        );
        debug!(
            "member {} done: {} -> {} bytes{}",
            member.spec.path.display(),
            member.size,
            member.compressed_size,
            if member.needs_c64 { " (zip64)" } else { "" }
        );

        self.total_size += member.size;
        self.entries.push(record);
        Ok(())
    }

    /// Write the prepared central records, in member order.
    pub fn write_central_directory(&mut self) -> Result<()> {
        self.cd_offset = self.offset;
        self.seek(self.offset)?;
        for record in &self.entries {
            self.file
                .write_all(record)
                .map_err(|e| io_err(&self.path, "write", e))?;
            self.offset += record.len() as u64;
        }
        self.cd_size = self.offset - self.cd_offset;
        Ok(())
    }

    /// Write the trailer, flush, report the overall ratio, and retain the
    /// output file.
    pub fn finish(mut self) -> Result<()> {
        let entry_cnt = self.entries.len() as u64;
        let eocd64_offset = self.cd_offset + self.cd_size;
        let mut trailer = Vec::new();

        if entry_cnt > 0xFFFF || self.cd_size >= U32_SENTINEL || self.cd_offset >= U32_SENTINEL {
            trailer.extend_from_slice(
                &Eocd64 {
                    entry_cnt,
                    cd_size: self.cd_size,
                    cd_offset: self.cd_offset,
                }
                .to_bytes(),
            );
            trailer.extend_from_slice(&Eocd64Locator { eocd64_offset }.to_bytes());
        }
        trailer.extend_from_slice(
            &Eocd {
                entry_cnt: entry_cnt.min(0xFFFF) as u16,
                cd_size: self.cd_size.min(U32_SENTINEL) as u32,
                cd_offset: self.cd_offset.min(U32_SENTINEL) as u32,
            }
            .to_bytes(),
        );

        self.file
            .write_all(&trailer)
            .map_err(|e| io_err(&self.path, "write", e))?;
        self.offset += trailer.len() as u64;
        self.file
            .flush()
            .map_err(|e| io_err(&self.path, "flush", e))?;

        eprintln!("========");
        eprintln!(
            "{:.6}  (total)",
            self.offset as f64 / self.total_size as f64
        );

        self.finished = true;
        Ok(())
    }
}

impl Drop for ArchiveWriter {
    fn drop(&mut self) {
        // a writer that never reached finish() leaves no partial archive
        if !self.finished {
            let _ = fs::remove_file(&self.path);
        }
    }
}
