use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use rusqlite::{params, Connection};
use tracing::{debug, info};

use crate::mbtiles::reader::ensure_mbtiles_path;
use crate::mbtiles::types::{PyramidMetadata, TileCoord};

// Destination for encoded tiles. Implementations need not be thread safe;
// the pyramid builder serialises every call.
pub trait TileSink {
    fn write_tile(&mut self, coord: TileCoord, data: &[u8]) -> Result<()>;
}

pub struct MbtilesWriter {
    conn: Connection,
    path: PathBuf,
    tiles: u64,
}

impl MbtilesWriter {
    pub fn create(path: &Path, force: bool) -> Result<Self> {
        ensure_mbtiles_path(path)?;
        if path.exists() {
            if !force {
                anyhow::bail!("{} already exists; use --force to replace it", path.display());
            }
            std::fs::remove_file(path)
                .with_context(|| format!("failed to remove {}", path.display()))?;
        }
        let conn = Connection::open(path)
            .with_context(|| format!("failed to create mbtiles: {}", path.display()))?;
        conn.execute_batch(
            "
            PRAGMA synchronous = OFF;
            PRAGMA temp_store = MEMORY;
            BEGIN;
            CREATE TABLE metadata (name TEXT, value TEXT);
            CREATE UNIQUE INDEX name ON metadata (name);
            CREATE TABLE tiles (
                zoom_level INTEGER,
                tile_column INTEGER,
                tile_row INTEGER,
                tile_data BLOB
            );
            CREATE UNIQUE INDEX tile_index ON tiles (zoom_level, tile_column, tile_row);
            ",
        )
        .context("failed to create output schema")?;
        debug!(path = %path.display(), "created mbtiles");
        Ok(Self {
            conn,
            path: path.to_path_buf(),
            tiles: 0,
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn tiles(&self) -> u64 {
        self.tiles
    }

    pub fn finish(self, metadata: &PyramidMetadata) -> Result<()> {
        {
            let mut stmt = self
                .conn
                .prepare("INSERT INTO metadata (name, value) VALUES (?1, ?2)")
                .context("prepare metadata")?;
            for (name, value) in metadata.entries()? {
                stmt.execute(params![name, value])
                    .with_context(|| format!("insert metadata {name}"))?;
            }
        }
        self.conn.execute_batch("COMMIT;").context("commit output")?;
        info!(path = %self.path.display(), tiles = self.tiles, "wrote mbtiles");
        Ok(())
    }
}

impl TileSink for MbtilesWriter {
    fn write_tile(&mut self, coord: TileCoord, data: &[u8]) -> Result<()> {
        let mut stmt = self
            .conn
            .prepare_cached(
                "INSERT INTO tiles (zoom_level, tile_column, tile_row, tile_data) VALUES (?1, ?2, ?3, ?4)",
            )
            .context("prepare tile insert")?;
        stmt.execute(params![coord.zoom, coord.x, coord.tms_row(), data])
            .with_context(|| format!("insert tile {}/{}/{}", coord.zoom, coord.x, coord.y))?;
        self.tiles += 1;
        Ok(())
    }
}

#[derive(Debug, Default)]
pub struct MemoryTileSink {
    pub tiles: BTreeMap<TileCoord, Vec<u8>>,
}

impl MemoryTileSink {
    pub fn new() -> Self {
        Self::default()
    }
}

impl TileSink for MemoryTileSink {
    fn write_tile(&mut self, coord: TileCoord, data: &[u8]) -> Result<()> {
        if self.tiles.insert(coord, data.to_vec()).is_some() {
            anyhow::bail!("tile {}/{}/{} written twice", coord.zoom, coord.x, coord.y);
        }
        Ok(())
    }
}
