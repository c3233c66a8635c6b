use std::collections::HashMap;

use tracing::{debug, warn};

use crate::compression::{decode_tile_payload, decompress};
use crate::coord::{BBox, TileCoordinate};
use crate::error::{Result, TileError};
use crate::tile::{DEFAULT_EXTENT, Feature, Layer, VectorTile, encode_layers};

#[derive(Debug, Default)]
pub struct MergeReport {
    pub layers_merged: usize,
    pub features_added: usize,
    /// Layers rejected because their extent differs from the already merged layer.
    pub conflicts: Vec<TileError>,
}

#[derive(Debug, Clone)]
pub struct MergedTile {
    coordinate: TileCoordinate,
    layers: Vec<Layer>,
    index: HashMap<String, usize>,
    painted: bool,
    empty: bool,
}

impl MergedTile {
    pub fn new(coordinate: TileCoordinate) -> Self {
        MergedTile {
            coordinate,
            layers: Vec::new(),
            index: HashMap::new(),
            painted: false,
            empty: true,
        }
    }

    pub fn coordinate(&self) -> TileCoordinate {
        self.coordinate
    }

    pub fn extent(&self) -> BBox {
        self.coordinate.extent()
    }

    pub fn is_painted(&self) -> bool {
        self.painted
    }

    pub fn is_empty(&self) -> bool {
        self.empty
    }

    pub fn layers(&self) -> &[Layer] {
        &self.layers
    }

    pub fn layer(&self, name: &str) -> Option<&Layer> {
        self.index.get(name).map(|idx| &self.layers[*idx])
    }

    pub fn layer_names(&self) -> impl Iterator<Item = &str> {
        self.layers.iter().map(Layer::name)
    }

    /// Merges a raw buffer. Decoding happens before any mutation, so a buffer
    /// that fails to decompress or parse leaves the tile untouched.
    pub fn merge_buffer(&mut self, raw: &[u8], expect_compressed: bool) -> Result<MergeReport> {
        let decoded;
        let payload = if expect_compressed {
            decoded = decompress(raw)?;
            decoded.as_slice()
        } else {
            raw
        };
        let incoming = VectorTile::from_bytes(payload)?;
        Ok(self.merge_tile(incoming))
    }

    pub fn merge_tile(&mut self, incoming: VectorTile) -> MergeReport {
        let mut report = MergeReport::default();
        for layer in incoming.layers {
            if let Some(existing) = self.layer(&layer.name) {
                if existing.extent != layer.extent {
                    let conflict = TileError::LayerExtentConflict {
                        name: layer.name.clone(),
                        existing: existing.extent,
                        incoming: layer.extent,
                    };
                    warn!(tile = %self.coordinate, "{conflict}");
                    report.conflicts.push(conflict);
                    continue;
                }
            }
            report.layers_merged += 1;
            report.features_added += layer.features.len();
            self.append_layer(layer);
        }
        debug!(
            tile = %self.coordinate,
            layers = report.layers_merged,
            features = report.features_added,
            "merged buffer"
        );
        report
    }

    fn append_layer(&mut self, layer: Layer) {
        if !layer.features.is_empty() {
            self.painted = true;
            self.empty = false;
        }
        match self.index.get(&layer.name) {
            Some(idx) => self.layers[*idx].features.extend(layer.features),
            None => {
                self.index.insert(layer.name.clone(), self.layers.len());
                self.layers.push(layer);
            }
        }
    }

    pub fn add_image_layer(&mut self, name: &str, data: Vec<u8>) {
        let extent = self.layer(name).map_or(DEFAULT_EXTENT, |layer| layer.extent);
        let mut layer = Layer::new(name, extent);
        layer.features.push(Feature::raster_feature(data));
        self.append_layer(layer);
    }

    pub fn to_bytes(&self) -> Result<Vec<u8>> {
        encode_layers(&self.layers)
    }

    pub fn to_vector_tile(&self) -> VectorTile {
        VectorTile {
            layers: self.layers.clone(),
        }
    }
}

/// Merges `data`, decompressing it first when it carries a zlib or gzip header.
pub fn merge_compressed_buffer(tile: &mut MergedTile, data: &[u8]) -> Result<MergeReport> {
    let payload = decode_tile_payload(data)?;
    tile.merge_buffer(&payload, false)
}
