use tracing::{debug, warn};

use crate::coord::TileCoordinate;
use crate::encoder::{EncodeOptions, Encoder};
use crate::error::Result;
use crate::map::Map;

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum WaferFailurePolicy {
    #[default]
    EmptyBuffer,
    Propagate,
}

/// Encodes `grid_size`² tiles starting at `origin`. Buffers are row-major:
/// index `row * grid_size + col` holds tile `(origin.x + col, origin.y + row)`.
pub fn create_mvt_wafer_merc(
    map: &Map,
    origin: &TileCoordinate,
    grid_size: u32,
    options: &EncodeOptions,
    policy: WaferFailurePolicy,
) -> Result<Vec<Vec<u8>>> {
    let encoder = Encoder::new(map, options)?;
    let mut buffers = Vec::with_capacity((grid_size as usize).pow(2));
    for row in 0..grid_size {
        for col in 0..grid_size {
            let cell = encode_cell(&encoder, origin, col, row);
            match (cell, policy) {
                (Ok(buffer), _) => buffers.push(buffer),
                (Err(err), WaferFailurePolicy::Propagate) => return Err(err),
                (Err(err), WaferFailurePolicy::EmptyBuffer) => {
                    warn!(origin = %origin, col, row, "wafer cell failed: {err}");
                    buffers.push(Vec::new());
                }
            }
        }
    }
    debug!(origin = %origin, grid_size, "encoded wafer");
    Ok(buffers)
}

fn encode_cell(encoder: &Encoder<'_>, origin: &TileCoordinate, col: u32, row: u32) -> Result<Vec<u8>> {
    let coord = TileCoordinate::new(
        origin.z,
        origin.x.saturating_add(col),
        origin.y.saturating_add(row),
    )?;
    encoder.encode_tile(&coord)
}
