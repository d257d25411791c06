use std::collections::BTreeMap;
use std::path::Path;

use anyhow::{Context, Result};
use rusqlite::{Connection, OpenFlags};

use crate::mbtiles::types::TileCoord;
use crate::pyramid::DensityScales;

pub fn ensure_mbtiles_path(path: &Path) -> Result<()> {
    let ext = path.extension().and_then(|ext| ext.to_str()).unwrap_or("");
    if ext.eq_ignore_ascii_case("mbtiles") {
        Ok(())
    } else {
        anyhow::bail!("only .mbtiles paths are supported: {}", path.display());
    }
}

pub fn open_readonly_mbtiles(path: &Path) -> Result<Connection> {
    ensure_mbtiles_path(path)?;
    let conn = Connection::open_with_flags(path, OpenFlags::SQLITE_OPEN_READ_ONLY)
        .with_context(|| format!("failed to open mbtiles: {}", path.display()))?;
    apply_read_pragmas(&conn)?;
    Ok(conn)
}

pub fn apply_read_pragmas(conn: &Connection) -> Result<()> {
    conn.execute_batch(
        "
        PRAGMA query_only = ON;
        PRAGMA temp_store = MEMORY;
        PRAGMA synchronous = OFF;
        PRAGMA cache_size = -200000;
        ",
    )
    .context("failed to apply read pragmas")?;
    Ok(())
}

pub fn read_metadata(conn: &Connection) -> Result<BTreeMap<String, String>> {
    let mut stmt = conn
        .prepare("SELECT name, value FROM metadata")
        .context("prepare metadata")?;
    let mut rows = stmt.query([]).context("query metadata")?;
    let mut metadata = BTreeMap::new();
    while let Some(row) = rows.next().context("read metadata row")? {
        let name: String = row.get(0)?;
        let value: String = row.get(1)?;
        metadata.insert(name, value);
    }
    Ok(metadata)
}

pub fn read_density_scales(metadata: &BTreeMap<String, String>) -> Result<DensityScales> {
    let value = metadata
        .get("density_scales")
        .context("metadata has no density_scales entry; not a density pyramid")?;
    serde_json::from_str(value).context("invalid density_scales metadata")
}

pub fn max_zoom_level(conn: &Connection) -> Result<Option<u8>> {
    let zoom: Option<i64> = conn
        .query_row("SELECT MAX(zoom_level) FROM tiles", [], |row| row.get(0))
        .context("query max zoom")?;
    zoom.map(|z| u8::try_from(z).with_context(|| format!("invalid zoom level {z}")))
        .transpose()
}

pub fn read_tiles_at_zoom<F>(conn: &Connection, zoom: u8, mut on_tile: F) -> Result<u64>
where
    F: FnMut(TileCoord, Vec<u8>) -> Result<()>,
{
    let mut stmt = conn
        .prepare(
            "SELECT tile_column, tile_row, tile_data FROM tiles WHERE zoom_level = ?1 ORDER BY tile_column, tile_row",
        )
        .context("prepare tiles")?;
    let mut rows = stmt.query([zoom]).context("query tiles")?;
    let mut count = 0u64;
    while let Some(row) = rows.next().context("read tile row")? {
        let column: u32 = row.get(0)?;
        let tms_row: u32 = row.get(1)?;
        let data: Vec<u8> = row.get(2)?;
        on_tile(TileCoord::from_tms(zoom, column, tms_row), data)?;
        count += 1;
    }
    Ok(count)
}
