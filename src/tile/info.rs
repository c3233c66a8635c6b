use serde::Serialize;

use super::VectorTile;
use super::layer::Layer;
use crate::error::Result;

#[derive(Debug, Clone)]
pub struct TileInfo {
    tile: VectorTile,
}

#[derive(Debug, Clone, Serialize)]
pub struct LayerSummary {
    pub name: String,
    pub extent: u32,
    pub version: u32,
    pub features: usize,
    pub raster_features: usize,
}

impl TileInfo {
    pub fn parse(data: &[u8]) -> Result<TileInfo> {
        Ok(TileInfo {
            tile: VectorTile::from_bytes(data)?,
        })
    }

    pub fn layers_size(&self) -> usize {
        self.tile.layers.len()
    }

    pub fn layers(&self, index: usize) -> Option<&Layer> {
        self.tile.layers.get(index)
    }

    pub fn iter(&self) -> impl Iterator<Item = &Layer> {
        self.tile.layers.iter()
    }

    pub fn summary(&self) -> Vec<LayerSummary> {
        self.tile
            .layers
            .iter()
            .map(|layer| LayerSummary {
                name: layer.name.clone(),
                extent: layer.extent,
                version: layer.version,
                features: layer.features.len(),
                raster_features: layer.features.iter().filter(|f| f.has_raster()).count(),
            })
            .collect()
    }

    pub fn into_tile(self) -> VectorTile {
        self.tile
    }
}
