pub mod reader;
pub mod types;
pub mod writer;

pub use self::reader::{
    apply_read_pragmas, ensure_mbtiles_path, max_zoom_level, open_readonly_mbtiles,
    read_density_scales, read_metadata, read_tiles_at_zoom,
};
pub use self::types::{parse_tile_spec, PyramidMetadata, TileCoord};
pub use self::writer::{MbtilesWriter, MemoryTileSink, TileSink};
