use thiserror::Error;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum IntegrityError {
    #[error("not a tile-count file: expected header {expected:?}, found {found:?}")]
    BadHeader { expected: String, found: String },

    #[error("not a tile-count file: {len} bytes is shorter than the header")]
    ShortFile { len: u64 },

    #[error("record data of {len} bytes is not a multiple of {record_bytes}-byte records")]
    RaggedBody { len: u64, record_bytes: usize },

    #[error("file out of order: key {found:016x} follows {previous:016x}")]
    OutOfOrder { previous: u64, found: u64 },

    #[error("tile {zoom}/{x}/{y} is too big: {bytes} bytes (limit {limit})")]
    TileTooLarge {
        zoom: u8,
        x: u32,
        y: u32,
        bytes: usize,
        limit: usize,
    },
}
