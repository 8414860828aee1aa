//! Consistent multi-database page source
//!
//! The archive's members are logical page images, not file copies. One
//! SQLite connection with an in-memory main database attaches every input
//! read-only, then a single `BEGIN IMMEDIATE` locks them all as close
//! together in time as possible. Page reads inside that transaction see the
//! committed state at lock time no matter what concurrent writers do.

use std::fs;
use std::os::unix::ffi::OsStrExt;
use std::path::{Path, PathBuf};
use std::time::{Duration, SystemTime};

use log::debug;
use rusqlite::types::ValueRef;
use rusqlite::Connection;

use crate::error::{Result, S3ZipError};
use crate::input::InputFile;

/// Per-database facts captured under the snapshot.
#[derive(Debug, Clone)]
pub struct DbMeta {
    /// `pragma page_size`, unvalidated
    pub page_size: i64,
    /// `pragma page_count`
    pub page_count: i64,
    /// Modification time observed after the lock was acquired; for a
    /// write-ahead-log database the newer of the main file and the log
    pub mtime: SystemTime,
}

/// A consistent snapshot over N attached databases.
///
/// Call order: `attach` once, `begin_snapshot`, then `metadata` and
/// `stream_pages` per input, then `end_snapshot`. Tests substitute
/// synthetic sources; production uses [`SqlitePageSource`].
pub trait PageSource {
    /// Bind every input as a read-only backing store.
    fn attach(&mut self, inputs: &[InputFile]) -> Result<()>;

    /// Acquire the simultaneous read lock across all attached inputs.
    fn begin_snapshot(&mut self) -> Result<()>;

    /// Page size, page count, and post-lock mtime for one input.
    fn metadata(&mut self, ix: usize) -> Result<DbMeta>;

    /// Emit every page of one input, in ascending page-number order.
    fn stream_pages(
        &mut self,
        ix: usize,
        emit: &mut dyn FnMut(&[u8]) -> Result<()>,
    ) -> Result<()>;

    /// Release the lock. Best-effort: failures are not reported.
    fn end_snapshot(&mut self);
}

/// Why the explicit main schema? Consider what would happen if one of the
/// inputs contained a table named "pragma_page_size".
const METAINFO_SQL: &str = "select page_size, page_count, journal_mode
    from main.pragma_page_size(?1),
        main.pragma_page_count(?1),
        main.pragma_journal_mode(?1)";

const PAGES_SQL: &str = "select data from main.sqlite_dbpage(?1)
    order by pgno";

/// An underscore followed by six of these digits makes an identifier that
/// collides with no keyword, and the scrambled alphabet keeps the names
/// opaque.
const NAME_ALPHABET: &[u8; 36] = b"1qa2zws3xed4crf5vtg6byh7nuj8mik9ol0p";

const HEX_UPPER: &[u8; 16] = b"0123456789ABCDEF";

/// Synthetic attach name for the input at `ix`.
pub fn attach_name(ix: usize) -> String {
    let mut name = [b'_'; 7];
    let mut n = ix;
    for digit in name[1..].iter_mut().rev() {
        *digit = NAME_ALPHABET[n % 36];
        n /= 36;
    }
    name.iter().map(|&b| char::from(b)).collect()
}

/// Render a path as a read-only `file:` URI.
///
/// Bytes that are `%`, `#`, `?`, at most `' '`, or at least `0x7F` are
/// percent-encoded with uppercase hex; a leading `/` becomes `file:///`.
pub fn db_uri(path: &Path) -> String {
    let bytes = path.as_os_str().as_bytes();
    let mut uri = String::with_capacity(3 * bytes.len() + 16);
    uri.push_str("file:");
    if bytes.first() == Some(&b'/') {
        uri.push_str("//");
    }
    for &c in bytes {
        if c == b'%' || c == b'#' || c == b'?' || c <= b' ' || c >= 0x7F {
            uri.push('%');
            uri.push(char::from(HEX_UPPER[(c >> 4) as usize]));
            uri.push(char::from(HEX_UPPER[(c & 0xF) as usize]));
        } else {
            uri.push(char::from(c));
        }
    }
    uri.push_str("?mode=ro");
    uri
}

struct AttachedDb {
    name: String,
    path: PathBuf,
}

/// [`PageSource`] backed by SQLite, reading pages through the
/// `sqlite_dbpage` virtual table so WAL content is folded in.
pub struct SqlitePageSource {
    conn: Connection,
    attached: Vec<AttachedDb>,
    snapshot: bool,
}

impl SqlitePageSource {
    /// Open the in-memory workspace. The busy timeout is effectively
    /// infinite so concurrent writers cannot abort the snapshot.
    pub fn open() -> Result<Self> {
        let conn = Connection::open_in_memory().map_err(|e| S3ZipError::sqlite("open", e))?;
        conn.busy_timeout(Duration::from_millis(999_999_999))
            .map_err(|e| S3ZipError::sqlite("busy_timeout", e))?;
        Ok(SqlitePageSource {
            conn,
            attached: Vec::new(),
            snapshot: false,
        })
    }
}

impl PageSource for SqlitePageSource {
    fn attach(&mut self, inputs: &[InputFile]) -> Result<()> {
        for (ix, input) in inputs.iter().enumerate() {
            let name = attach_name(ix);
            // only the identifier is interpolated; the URI is bound
            let sql = format!("attach database ?1 as {name}");
            self.conn
                .execute(&sql, [db_uri(&input.path)])
                .map_err(|e| S3ZipError::sqlite("attach", e))?;
            self.attached.push(AttachedDb {
                name,
                path: input.path.clone(),
            });
        }
        debug!("attached {} databases read-only", self.attached.len());
        Ok(())
    }

    fn begin_snapshot(&mut self) -> Result<()> {
        self.conn
            .execute_batch("begin immediate")
            .map_err(|e| S3ZipError::sqlite("begin", e))?;
        self.snapshot = true;
        debug!("snapshot lock acquired");
        Ok(())
    }

    fn metadata(&mut self, ix: usize) -> Result<DbMeta> {
        let db = &self.attached[ix];
        let mut stmt = self
            .conn
            .prepare_cached(METAINFO_SQL)
            .map_err(|e| S3ZipError::sqlite("prepare metainfo", e))?;
        let (page_size, page_count, journal_mode) = stmt
            .query_row([db.name.as_str()], |row| {
                Ok((
                    row.get::<_, i64>(0)?,
                    row.get::<_, i64>(1)?,
                    row.get::<_, String>(2)?,
                ))
            })
            .map_err(|e| S3ZipError::sqlite("metainfo", e))?;

        // stat-ing again because the first time was before we had a lock
        let meta = fs::metadata(&db.path).map_err(|e| S3ZipError::io(&db.path, "stat", e))?;
        let mut mtime = meta
            .modified()
            .map_err(|e| S3ZipError::io(&db.path, "stat", e))?;

        // a WAL side file newer than the main file carries the real
        // last-write time
        if journal_mode == "wal" {
            let mut wal = db.path.clone().into_os_string();
            wal.push("-wal");
            if let Ok(wal_meta) = fs::metadata(&wal) {
                if let Ok(wal_mtime) = wal_meta.modified() {
                    if wal_mtime > mtime {
                        mtime = wal_mtime;
                    }
                }
            }
        }

        Ok(DbMeta {
            page_size,
            page_count,
            mtime,
        })
    }

    fn stream_pages(
        &mut self,
        ix: usize,
        emit: &mut dyn FnMut(&[u8]) -> Result<()>,
    ) -> Result<()> {
        let db = &self.attached[ix];
        let mut stmt = self
            .conn
            .prepare_cached(PAGES_SQL)
            .map_err(|e| S3ZipError::sqlite("prepare pages", e))?;
        let mut rows = stmt
            .query([db.name.as_str()])
            .map_err(|e| S3ZipError::sqlite("pages", e))?;
        while let Some(row) = rows.next().map_err(|e| S3ZipError::sqlite("step pages", e))? {
            let value = row.get_ref(0).map_err(|e| S3ZipError::sqlite("pages", e))?;
            let page = match value {
                ValueRef::Blob(b) => b,
                other => {
                    return Err(S3ZipError::sqlite(
                        "pages",
                        rusqlite::Error::InvalidColumnType(0, "data".into(), other.data_type()),
                    ))
                }
            };
            emit(page)?;
        }
        Ok(())
    }

    fn end_snapshot(&mut self) {
        if self.snapshot {
            let _ = self.conn.execute_batch("rollback");
            self.snapshot = false;
            debug!("snapshot released");
        }
    }
}

impl Drop for SqlitePageSource {
    fn drop(&mut self) {
        self.end_snapshot();
    }
}
