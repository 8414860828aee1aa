//! ZIP on-disk record layouts
//!
//! Byte layouts follow the PKZIP APPNOTE. Every multi-byte integer in a ZIP
//! record is little-endian regardless of platform, so all serialisation goes
//! through the three encoders below.
//!
//! ```text
//! [Local File Header 1][Member Data 1]
//! [Local File Header 2][Member Data 2]
//! ...
//! [Central Directory Header 1][Central Directory Header 2]...
//! [ZIP64 End of Central Directory Record]  (only when required)
//! [ZIP64 End of Central Directory Locator] (only when required)
//! [End of Central Directory Record]
//! ```

use std::time::SystemTime;

use chrono::{DateTime, Datelike, Local, Timelike};

/// Local file header signature: "PK\x03\x04"
pub const LOCAL_ENTRY_SIG: [u8; 4] = [b'P', b'K', 3, 4];
/// Central directory header signature: "PK\x01\x02"
pub const CENTRAL_ENTRY_SIG: [u8; 4] = [b'P', b'K', 1, 2];
/// ZIP64 end of central directory signature: "PK\x06\x06"
pub const EOCD64_SIG: [u8; 4] = [b'P', b'K', 6, 6];
/// ZIP64 end of central directory locator signature: "PK\x06\x07"
pub const EOCD64_LOCATOR_SIG: [u8; 4] = [b'P', b'K', 6, 7];
/// End of central directory signature: "PK\x05\x06"
pub const EOCD_SIG: [u8; 4] = [b'P', b'K', 5, 6];

/// Version 2.0: deflate compression
pub const VERSION_CLASSIC: u16 = 20;
/// Version 4.5: ZIP64 extensions
pub const VERSION_ZIP64: u16 = 45;
/// Creator OS tag for Unix, in the high byte of version-made-by
pub const CREATOR_UNIX: u16 = 3 << 8;
/// General-purpose flag bits 1-2: maximum compression was used
pub const FLAG_MAX_COMPRESSION: u16 = 0x0002;
/// Compression method 8: DEFLATE
pub const METHOD_DEFLATE: u16 = 8;
/// The all-ones value a 32-bit size or offset slot holds when the real
/// value lives in a ZIP64 extra field
pub const U32_SENTINEL: u64 = 0xFFFF_FFFF;

/// Fixed size of the local file header
pub const LOCAL_ENTRY_SIZE: usize = 30;
/// Fixed size of the local ZIP64 extra field (both sizes, always)
pub const LOCAL_ZIP64_SIZE: usize = 20;
/// Fixed size of the central directory header
pub const CENTRAL_ENTRY_SIZE: usize = 46;
/// Fixed size of the end of central directory record
pub const EOCD_SIZE: usize = 22;
/// Fixed size of the ZIP64 end of central directory record
pub const EOCD64_SIZE: usize = 56;
/// Fixed size of the ZIP64 end of central directory locator
pub const EOCD64_LOCATOR_SIZE: usize = 20;

/// Append a 16-bit little-endian integer; wider values are truncated.
pub fn put16(buf: &mut Vec<u8>, v: u64) {
    buf.extend_from_slice(&(v as u16).to_le_bytes());
}

/// Append a 32-bit little-endian integer; wider values are truncated.
pub fn put32(buf: &mut Vec<u8>, v: u64) {
    buf.extend_from_slice(&(v as u32).to_le_bytes());
}

/// Append a 64-bit little-endian integer.
pub fn put64(buf: &mut Vec<u8>, v: u64) {
    buf.extend_from_slice(&v.to_le_bytes());
}

/// Local file header. Flags, method, and comment-free layout are fixed for
/// this tool; the variable name and extra fields follow as separate writes.
pub struct LocalEntry {
    pub needed_version: u16,
    pub mod_time: u16,
    pub mod_date: u16,
    pub crc: u32,
    /// `0xFFFFFFFF` when the real value is in the local ZIP64 extra
    pub compressed_size: u32,
    /// `0xFFFFFFFF` when the real value is in the local ZIP64 extra
    pub size: u32,
    pub path_len: u16,
    pub extra_len: u16,
}

impl LocalEntry {
    pub fn to_bytes(&self) -> Vec<u8> {
        let mut buf = Vec::with_capacity(LOCAL_ENTRY_SIZE);
        buf.extend_from_slice(&LOCAL_ENTRY_SIG);
        put16(&mut buf, self.needed_version as u64);
        put16(&mut buf, FLAG_MAX_COMPRESSION as u64);
        put16(&mut buf, METHOD_DEFLATE as u64);
        put16(&mut buf, self.mod_time as u64);
        put16(&mut buf, self.mod_date as u64);
        put32(&mut buf, self.crc as u64);
        put32(&mut buf, self.compressed_size as u64);
        put32(&mut buf, self.size as u64);
        put16(&mut buf, self.path_len as u64);
        put16(&mut buf, self.extra_len as u64);
        buf
    }
}

/// Local ZIP64 extra field. Always carries both sizes and nothing more.
pub struct LocalZip64 {
    pub size: u64,
    pub compressed_size: u64,
}

impl LocalZip64 {
    pub fn to_bytes(&self) -> Vec<u8> {
        let mut buf = Vec::with_capacity(LOCAL_ZIP64_SIZE);
        put16(&mut buf, 0x0001);
        put16(&mut buf, 16);
        put64(&mut buf, self.size);
        put64(&mut buf, self.compressed_size);
        buf
    }
}

/// Central directory header. Disk number, internal attributes, and comment
/// length are fixed at zero: the archive is always single-part.
pub struct CentralEntry {
    pub creator_version: u16,
    pub needed_version: u16,
    pub mod_time: u16,
    pub mod_date: u16,
    pub crc: u32,
    pub compressed_size: u32,
    pub size: u32,
    pub path_len: u16,
    pub extra_len: u16,
    /// High 16 bits carry the input's file mode
    pub external_attribs: u32,
    /// `0xFFFFFFFF` when the real value is in the central ZIP64 extra
    pub local_offset: u32,
}

impl CentralEntry {
    pub fn to_bytes(&self) -> Vec<u8> {
        let mut buf = Vec::with_capacity(CENTRAL_ENTRY_SIZE);
        buf.extend_from_slice(&CENTRAL_ENTRY_SIG);
        put16(&mut buf, self.creator_version as u64);
        put16(&mut buf, self.needed_version as u64);
        put16(&mut buf, FLAG_MAX_COMPRESSION as u64);
        put16(&mut buf, METHOD_DEFLATE as u64);
        put16(&mut buf, self.mod_time as u64);
        put16(&mut buf, self.mod_date as u64);
        put32(&mut buf, self.crc as u64);
        put32(&mut buf, self.compressed_size as u64);
        put32(&mut buf, self.size as u64);
        put16(&mut buf, self.path_len as u64);
        put16(&mut buf, self.extra_len as u64);
        put16(&mut buf, 0); // comment len
        put16(&mut buf, 0); // first disk number
        put16(&mut buf, 0); // internal attributes
        put32(&mut buf, self.external_attribs as u64);
        put32(&mut buf, self.local_offset as u64);
        buf
    }
}

/// Central ZIP64 extra field: up to three 64-bit values in the fixed order
/// (uncompressed size, compressed size, local offset). A value is included
/// iff the corresponding 32-bit slot in the central header holds the
/// `0xFFFFFFFF` sentinel. No disk-start field: single-part archives only.
pub fn central_zip64_extra(values: &[u64]) -> Vec<u8> {
    debug_assert!(values.len() <= 3);
    let mut buf = Vec::with_capacity(4 + 8 * values.len());
    put16(&mut buf, 0x0001);
    put16(&mut buf, 8 * values.len() as u64);
    for &v in values {
        put64(&mut buf, v);
    }
    buf
}

/// End of central directory record.
pub struct Eocd {
    /// `0xFFFF` when the real count is in the EOCD64
    pub entry_cnt: u16,
    /// `0xFFFFFFFF` when the real size is in the EOCD64
    pub cd_size: u32,
    /// `0xFFFFFFFF` when the real offset is in the EOCD64
    pub cd_offset: u32,
}

impl Eocd {
    pub fn to_bytes(&self) -> Vec<u8> {
        let mut buf = Vec::with_capacity(EOCD_SIZE);
        buf.extend_from_slice(&EOCD_SIG);
        put16(&mut buf, 0); // this disk
        put16(&mut buf, 0); // central directory disk
        put16(&mut buf, self.entry_cnt as u64);
        put16(&mut buf, self.entry_cnt as u64);
        put32(&mut buf, self.cd_size as u64);
        put32(&mut buf, self.cd_offset as u64);
        put16(&mut buf, 0); // comment len
        buf
    }
}

/// ZIP64 end of central directory record.
pub struct Eocd64 {
    pub entry_cnt: u64,
    pub cd_size: u64,
    pub cd_offset: u64,
}

impl Eocd64 {
    pub fn to_bytes(&self) -> Vec<u8> {
        let mut buf = Vec::with_capacity(EOCD64_SIZE);
        buf.extend_from_slice(&EOCD64_SIG);
        // record size excludes the signature and this field
        put64(&mut buf, (EOCD64_SIZE - 12) as u64);
        put16(&mut buf, (VERSION_ZIP64 | CREATOR_UNIX) as u64);
        put16(&mut buf, VERSION_ZIP64 as u64);
        put32(&mut buf, 0); // this disk
        put32(&mut buf, 0); // central directory disk
        put64(&mut buf, self.entry_cnt);
        put64(&mut buf, self.entry_cnt);
        put64(&mut buf, self.cd_size);
        put64(&mut buf, self.cd_offset);
        buf
    }
}

/// ZIP64 end of central directory locator.
pub struct Eocd64Locator {
    pub eocd64_offset: u64,
}

impl Eocd64Locator {
    pub fn to_bytes(&self) -> Vec<u8> {
        let mut buf = Vec::with_capacity(EOCD64_LOCATOR_SIZE);
        buf.extend_from_slice(&EOCD64_LOCATOR_SIG);
        put32(&mut buf, 0); // disk holding the EOCD64
        put64(&mut buf, self.eocd64_offset);
        put32(&mut buf, 1); // total disk count
        buf
    }
}

/// Pack a modification time into DOS (date, time) words from broken-down
/// local time.
///
/// Date: bits 9-15 year offset from 1980, 5-8 month (1-12), 0-4 day (1-31).
/// Time: bits 11-15 hour, 5-10 minute, 0-4 second / 2.
pub fn dos_date_time(mtime: SystemTime) -> (u16, u16) {
    let local: DateTime<Local> = mtime.into();
    let date = ((local.year() - 1980) << 9
        | (local.month() as i32) << 5 & 0x1E0
        | local.day() as i32 & 0x1F) as u16;
    let time = ((local.hour() << 11) | (local.minute() << 5 & 0x7E0) | (local.second() >> 1 & 0x1F))
        as u16;
    (date, time)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    #[test]
    fn encoders_are_little_endian_and_truncating() {
        let mut buf = Vec::new();
        put16(&mut buf, 0x0102);
        put32(&mut buf, 0x03040506);
        put64(&mut buf, 0x0708090A0B0C0D0E);
        assert_eq!(
            buf,
            [0x02, 0x01, 0x06, 0x05, 0x04, 0x03, 0x0E, 0x0D, 0x0C, 0x0B, 0x0A, 0x09, 0x08, 0x07]
        );

        let mut buf = Vec::new();
        put16(&mut buf, 0xABCD_1234);
        assert_eq!(buf, [0x34, 0x12]);
        let mut buf = Vec::new();
        put32(&mut buf, 0x55_0000_0001);
        assert_eq!(buf, [0x01, 0x00, 0x00, 0x00]);
    }

    #[test]
    fn record_sizes_match_layout() {
        let local = LocalEntry {
            needed_version: VERSION_CLASSIC,
            mod_time: 0,
            mod_date: 0,
            crc: 0,
            compressed_size: 0,
            size: 0,
            path_len: 0,
            extra_len: 0,
        };
        assert_eq!(local.to_bytes().len(), LOCAL_ENTRY_SIZE);

        let lz = LocalZip64 {
            size: 1,
            compressed_size: 2,
        };
        assert_eq!(lz.to_bytes().len(), LOCAL_ZIP64_SIZE);

        let central = CentralEntry {
            creator_version: VERSION_ZIP64 | CREATOR_UNIX,
            needed_version: VERSION_CLASSIC,
            mod_time: 0,
            mod_date: 0,
            crc: 0,
            compressed_size: 0,
            size: 0,
            path_len: 0,
            extra_len: 0,
            external_attribs: 0,
            local_offset: 0,
        };
        assert_eq!(central.to_bytes().len(), CENTRAL_ENTRY_SIZE);

        let eocd = Eocd {
            entry_cnt: 1,
            cd_size: 2,
            cd_offset: 3,
        };
        assert_eq!(eocd.to_bytes().len(), EOCD_SIZE);

        let eocd64 = Eocd64 {
            entry_cnt: 1,
            cd_size: 2,
            cd_offset: 3,
        };
        let bytes = eocd64.to_bytes();
        assert_eq!(bytes.len(), EOCD64_SIZE);
        // size field counts everything after itself
        assert_eq!(u64::from_le_bytes(bytes[4..12].try_into().unwrap()), 44);

        let loc = Eocd64Locator { eocd64_offset: 7 };
        let bytes = loc.to_bytes();
        assert_eq!(bytes.len(), EOCD64_LOCATOR_SIZE);
        // single-part archives still report one disk
        assert_eq!(u32::from_le_bytes(bytes[16..20].try_into().unwrap()), 1);
    }

    #[test]
    fn central_zip64_extra_layout() {
        assert_eq!(central_zip64_extra(&[]), [0x01, 0x00, 0x00, 0x00]);

        let two = central_zip64_extra(&[0x1_0000_0000, 0x2_0000_0000]);
        assert_eq!(two.len(), 4 + 16);
        assert_eq!(u16::from_le_bytes(two[2..4].try_into().unwrap()), 16);
        assert_eq!(
            u64::from_le_bytes(two[4..12].try_into().unwrap()),
            0x1_0000_0000
        );
        assert_eq!(
            u64::from_le_bytes(two[12..20].try_into().unwrap()),
            0x2_0000_0000
        );
    }

    #[test]
    fn dos_date_time_packs_fields() {
        use chrono::{DateTime, Datelike, Local, Timelike};

        let when = SystemTime::UNIX_EPOCH + Duration::from_secs(1_700_000_000);
        let local: DateTime<Local> = when.into();
        let (date, time) = dos_date_time(when);

        assert_eq!((date >> 9) as i32, local.year() - 1980);
        assert_eq!((date >> 5 & 0xF) as u32, local.month());
        assert_eq!((date & 0x1F) as u32, local.day());
        assert_eq!((time >> 11) as u32, local.hour());
        assert_eq!((time >> 5 & 0x3F) as u32, local.minute());
        assert_eq!((time & 0x1F) as u32, local.second() / 2);
    }
}
