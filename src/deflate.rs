//! Incremental raw-DEFLATE engine
//!
//! One engine lives for the whole run and is reset between archive members,
//! never re-initialised. The core feeds it one database page at a time; the
//! engine consumes the whole page before the next arrives, draining output
//! through a fixed scratch buffer into the caller's buffer.

use flate2::{Compress, Compression, FlushCompress, Status};

use crate::error::{Result, S3ZipError};

/// Scratch buffer size: the worst-case expansion of one 65536-byte page as
/// raw stored blocks, plus end-of-stream slack.
pub const SCRATCH_LEN: usize = 0x1000B;

/// Flush hint for one page.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Flush {
    /// Not the last page of the member
    Block,
    /// Last page of the member: close the raw stream so the member is
    /// standalone-decodable
    Finish,
}

/// Incremental DEFLATE at a member granularity.
///
/// Implementations produce raw (unwrapped) DEFLATE. Tests substitute their
/// own engines; production uses [`Flate2Engine`].
pub trait DeflateEngine {
    /// Compress one page, appending all output produced so far to `out`.
    /// With [`Flush::Finish`] the stream is completed and every pending
    /// byte is emitted.
    fn feed(&mut self, page: &[u8], flush: Flush, out: &mut Vec<u8>) -> Result<()>;

    /// Prepare the engine for the next member.
    fn reset(&mut self) -> Result<()>;
}

/// [`DeflateEngine`] backed by `flate2`'s z_stream-level API: raw stream,
/// best compression, default strategy.
pub struct Flate2Engine {
    raw: Compress,
    scratch: Box<[u8]>,
}

impl Flate2Engine {
    pub fn new() -> Self {
        Flate2Engine {
            raw: Compress::new(Compression::best(), false),
            scratch: vec![0u8; SCRATCH_LEN].into_boxed_slice(),
        }
    }
}

impl Default for Flate2Engine {
    fn default() -> Self {
        Self::new()
    }
}

impl DeflateEngine for Flate2Engine {
    fn feed(&mut self, page: &[u8], flush: Flush, out: &mut Vec<u8>) -> Result<()> {
        let mode = match flush {
            Flush::Block => FlushCompress::None,
            Flush::Finish => FlushCompress::Finish,
        };
        let mut consumed = 0usize;
        loop {
            let before_in = self.raw.total_in();
            let before_out = self.raw.total_out();
            let status = self
                .raw
                .compress(&page[consumed..], &mut self.scratch, mode)
                .map_err(|e| S3ZipError::Compression(e.to_string()))?;
            consumed += (self.raw.total_in() - before_in) as usize;
            let produced = (self.raw.total_out() - before_out) as usize;
            out.extend_from_slice(&self.scratch[..produced]);
            match status {
                Status::StreamEnd => break,
                Status::Ok => {
                    if mode != FlushCompress::Finish && consumed == page.len() {
                        break;
                    }
                }
                Status::BufError => {
                    // scratch space is always offered, so a stall with the
                    // page consumed means the stream is wedged
                    if produced == 0 && consumed == page.len() {
                        return Err(S3ZipError::Compression(
                            "unexpected buffer stall".to_string(),
                        ));
                    }
                }
            }
        }
        Ok(())
    }

    fn reset(&mut self) -> Result<()> {
        self.raw.reset();
        Ok(())
    }
}
