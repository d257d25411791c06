pub mod cli;
pub mod error;
pub mod format;
pub mod index;
pub mod ingest;
pub mod mbtiles;
pub mod merge;
pub mod output;
pub mod pipeline;
pub mod pyramid;
pub mod record;
pub mod sketch;
pub mod sort;
pub mod util;
