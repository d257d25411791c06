pub mod codec;
pub mod file;
pub mod legacy;

pub use self::codec::*;
pub use self::file::*;
pub use self::legacy::{import_legacy, is_legacy_file, LEGACY_MAGIC, LEGACY_RECORD_BYTES};
