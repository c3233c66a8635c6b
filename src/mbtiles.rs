use std::collections::BTreeMap;
use std::path::Path;

use anyhow::{Context, Result};
use indicatif::{ProgressBar, ProgressStyle};
use rusqlite::{Connection, OpenFlags, OptionalExtension, params};
use tracing::{debug, info};

use crate::coord::TileCoordinate;

fn ensure_mbtiles_path(path: &Path) -> Result<()> {
    let ext = path.extension().and_then(|ext| ext.to_str()).unwrap_or("");
    if ext.eq_ignore_ascii_case("mbtiles") {
        Ok(())
    } else {
        anyhow::bail!("expected a .mbtiles path: {}", path.display());
    }
}

fn open_readonly_mbtiles(path: &Path) -> Result<Connection> {
    Connection::open_with_flags(path, OpenFlags::SQLITE_OPEN_READ_ONLY)
        .with_context(|| format!("failed to open mbtiles: {}", path.display()))
}

fn apply_read_pragmas(conn: &Connection) -> Result<()> {
    conn.execute_batch(
        "
        PRAGMA query_only = ON;
        PRAGMA temp_store = MEMORY;
        ",
    )
    .context("failed to apply read pragmas")?;
    Ok(())
}

fn make_progress_bar(total: u64) -> ProgressBar {
    let bar = ProgressBar::new(total);
    let style = ProgressStyle::with_template("[{elapsed_precise}] {bar:40.cyan/blue} {pos}/{len} {msg}")
        .unwrap_or_else(|_| ProgressStyle::default_bar())
        .progress_chars("=>-");
    bar.set_style(style);
    bar
}

/// MBTiles stores rows bottom-up.
fn tms_row(coord: &TileCoordinate) -> i64 {
    let side = 1i64 << u32::from(coord.z);
    side - 1 - i64::from(coord.y)
}

/// Writes tiles into a new MBTiles file and returns how many rows were stored.
/// Empty buffers are skipped.
pub fn write_tiles(
    path: &Path,
    name: &str,
    tiles: &[(TileCoordinate, Vec<u8>)],
    show_progress: bool,
) -> Result<u64> {
    ensure_mbtiles_path(path)?;
    if path.exists() {
        anyhow::bail!("output already exists: {}", path.display());
    }
    let mut conn = Connection::open(path)
        .with_context(|| format!("failed to create mbtiles: {}", path.display()))?;
    conn.execute_batch(
        "
        CREATE TABLE metadata (name TEXT, value TEXT);
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

    let min_zoom = tiles.iter().map(|(coord, _)| coord.z).min().unwrap_or(0);
    let max_zoom = tiles.iter().map(|(coord, _)| coord.z).max().unwrap_or(0);
    let progress = show_progress.then(|| make_progress_bar(tiles.len() as u64));

    let tx = conn.transaction().context("begin output transaction")?;
    let metadata = [
        ("name", name.to_string()),
        ("format", "pbf".to_string()),
        ("type", "overlay".to_string()),
        ("version", "2".to_string()),
        ("minzoom", min_zoom.to_string()),
        ("maxzoom", max_zoom.to_string()),
    ];
    for (key, value) in &metadata {
        tx.execute(
            "INSERT INTO metadata (name, value) VALUES (?1, ?2)",
            params![key, value],
        )
        .context("insert metadata")?;
    }

    let mut written = 0u64;
    for (coord, data) in tiles {
        if let Some(bar) = &progress {
            bar.inc(1);
        }
        if data.is_empty() {
            debug!(tile = %coord, "skipping empty tile");
            continue;
        }
        tx.execute(
            "INSERT OR REPLACE INTO tiles (zoom_level, tile_column, tile_row, tile_data) VALUES (?1, ?2, ?3, ?4)",
            params![i64::from(coord.z), i64::from(coord.x), tms_row(coord), data],
        )
        .with_context(|| format!("insert tile {coord}"))?;
        written += 1;
    }
    tx.commit().context("commit output")?;
    if let Some(bar) = progress {
        bar.finish_and_clear();
    }
    info!(path = %path.display(), written, "wrote mbtiles");
    Ok(written)
}

pub fn read_tile(path: &Path, coord: &TileCoordinate) -> Result<Option<Vec<u8>>> {
    ensure_mbtiles_path(path)?;
    let conn = open_readonly_mbtiles(path)?;
    apply_read_pragmas(&conn)?;
    conn.query_row(
        "SELECT tile_data FROM tiles WHERE zoom_level = ?1 AND tile_column = ?2 AND tile_row = ?3",
        params![i64::from(coord.z), i64::from(coord.x), tms_row(coord)],
        |row| row.get(0),
    )
    .optional()
    .with_context(|| format!("read tile {coord}"))
}

pub fn read_metadata(path: &Path) -> Result<BTreeMap<String, String>> {
    ensure_mbtiles_path(path)?;
    let conn = open_readonly_mbtiles(path)?;
    apply_read_pragmas(&conn)?;
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
