use std::io::{self, Read, Write};

use anyhow::Result;

use crate::error::IntegrityError;

pub const INDEX_BYTES: usize = 8;
pub const COUNT_BYTES: usize = 4;
pub const RECORD_BYTES: usize = INDEX_BYTES + COUNT_BYTES;
pub const HEADER_LEN: usize = 16;
//                                          "0123456789ABCDEF"
pub const MAGIC: &[u8; HEADER_LEN] = b"tile-count ver 2";
pub const MAX_COUNT: u64 = u32::MAX as u64;

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct Record {
    pub key: u64,
    pub weight: u32,
}

// Big-endian so that comparing raw bytes compares keys numerically.
pub fn encode_record(key: u64, weight: u32) -> [u8; RECORD_BYTES] {
    let mut buf = [0u8; RECORD_BYTES];
    buf[..INDEX_BYTES].copy_from_slice(&key.to_be_bytes());
    buf[INDEX_BYTES..].copy_from_slice(&weight.to_be_bytes());
    buf
}

pub fn decode_key(bytes: &[u8]) -> u64 {
    let mut key = [0u8; INDEX_BYTES];
    key.copy_from_slice(&bytes[..INDEX_BYTES]);
    u64::from_be_bytes(key)
}

pub fn decode_weight(bytes: &[u8]) -> u32 {
    let mut weight = [0u8; COUNT_BYTES];
    weight.copy_from_slice(&bytes[INDEX_BYTES..RECORD_BYTES]);
    u32::from_be_bytes(weight)
}

pub fn decode_record(bytes: &[u8]) -> Record {
    Record {
        key: decode_key(bytes),
        weight: decode_weight(bytes),
    }
}

pub fn write_record<W: Write>(out: &mut W, key: u64, weight: u32) -> io::Result<()> {
    out.write_all(&encode_record(key, weight))
}

pub fn read_record<R: Read>(input: &mut R) -> io::Result<Option<Record>> {
    let mut buf = [0u8; RECORD_BYTES];
    let mut filled = 0;
    while filled < RECORD_BYTES {
        let n = input.read(&mut buf[filled..])?;
        if n == 0 {
            break;
        }
        filled += n;
    }
    match filled {
        0 => Ok(None),
        RECORD_BYTES => Ok(Some(decode_record(&buf))),
        _ => Err(io::Error::new(
            io::ErrorKind::UnexpectedEof,
            format!("truncated record: {filled} of {RECORD_BYTES} bytes"),
        )),
    }
}

pub fn write_header<W: Write>(out: &mut W) -> io::Result<()> {
    out.write_all(MAGIC)
}

pub fn verify_header(bytes: &[u8]) -> Result<(), IntegrityError> {
    verify_magic(bytes, MAGIC)
}

pub(crate) fn verify_magic(bytes: &[u8], magic: &[u8; HEADER_LEN]) -> Result<(), IntegrityError> {
    if bytes.len() < HEADER_LEN {
        return Err(IntegrityError::ShortFile {
            len: bytes.len() as u64,
        });
    }
    if &bytes[..HEADER_LEN] != magic {
        return Err(IntegrityError::BadHeader {
            expected: String::from_utf8_lossy(magic).into_owned(),
            found: String::from_utf8_lossy(&bytes[..HEADER_LEN]).into_owned(),
        });
    }
    Ok(())
}

/// Splits a total into `MAX_COUNT`-sized pieces followed by the remainder.
///
/// The split depends only on the total, which keeps merged output identical
/// however the inputs were partitioned. A zero total yields nothing.
pub fn split_weight(total: u64) -> impl Iterator<Item = u32> {
    let full = total / MAX_COUNT;
    let rest = total % MAX_COUNT;
    std::iter::repeat_n(MAX_COUNT as u32, full as usize)
        .chain((rest > 0).then_some(rest as u32))
}

pub trait RecordSink {
    fn push(&mut self, key: u64, weight: u32) -> Result<()>;

    fn push_total(&mut self, key: u64, total: u64) -> Result<()> {
        for weight in split_weight(total) {
            self.push(key, weight)?;
        }
        Ok(())
    }
}

impl RecordSink for Vec<Record> {
    fn push(&mut self, key: u64, weight: u32) -> Result<()> {
        Vec::push(self, Record { key, weight });
        Ok(())
    }
}
