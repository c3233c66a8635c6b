use std::collections::BTreeMap;

use image::DynamicImage;
use tracing::debug;

use crate::clip::{TileGrid, encode_geometry};
use crate::compression::compress;
use crate::coord::{BBox, TileCoordinate, scale_denominator, tile_side};
use crate::error::Result;
use crate::map::{Datasource, Map, MapLayer, Rule, SourceFeature};
use crate::raster::{RasterFormat, resample_to_tile};
use crate::style::FilterContext;
use crate::tile::{Feature, Layer, Value, encode_layers};

pub const DEFAULT_TILE_SIZE: u32 = 256;
pub const DEFAULT_PATH_MULTIPLIER: u32 = 16;
pub const DEFAULT_IMAGE_FORMAT: &str = "png";

#[derive(Debug, Clone)]
pub struct EncodeOptions {
    pub style_level_filter: bool,
    pub scale_denom: Option<f64>,
    /// Buffer in layer extent units; falls back to the map's buffer size.
    pub buffer_size: Option<i32>,
    pub tile_size: u32,
    pub path_multiplier: u32,
    pub image_format: Option<String>,
    pub compress: bool,
    pub variables: BTreeMap<String, Value>,
}

impl Default for EncodeOptions {
    fn default() -> Self {
        EncodeOptions {
            style_level_filter: true,
            scale_denom: None,
            buffer_size: None,
            tile_size: DEFAULT_TILE_SIZE,
            path_multiplier: DEFAULT_PATH_MULTIPLIER,
            image_format: None,
            compress: false,
            variables: BTreeMap::new(),
        }
    }
}

struct PreparedLayer<'a> {
    layer: &'a MapLayer,
    rules: Vec<&'a Rule>,
}

/// Map context resolved once and reused for any number of tiles.
pub struct Encoder<'a> {
    map: &'a Map,
    options: &'a EncodeOptions,
    format: RasterFormat,
    buffer_size: i32,
    layers: Vec<PreparedLayer<'a>>,
}

impl<'a> Encoder<'a> {
    pub fn new(map: &'a Map, options: &'a EncodeOptions) -> Result<Self> {
        let format = options
            .image_format
            .as_deref()
            .unwrap_or(DEFAULT_IMAGE_FORMAT)
            .parse::<RasterFormat>()?;
        let layers = map
            .layers
            .iter()
            .map(|layer| PreparedLayer {
                layer,
                rules: map.layer_rules(layer),
            })
            .collect();
        Ok(Encoder {
            map,
            options,
            format,
            buffer_size: options.buffer_size.unwrap_or(map.buffer_size),
            layers,
        })
    }

    pub fn map(&self) -> &Map {
        self.map
    }

    pub fn extent(&self) -> u32 {
        self.options.tile_size.max(1) * self.options.path_multiplier.max(1)
    }

    pub fn scale_denominator(&self, coord: &TileCoordinate) -> f64 {
        match self.options.scale_denom {
            Some(denom) if denom > 0.0 => denom,
            _ => scale_denominator(coord.z, self.options.tile_size),
        }
    }

    pub fn render_layers(&self, coord: &TileCoordinate) -> Result<Vec<Layer>> {
        let tile_bbox = coord.extent();
        let meters_per_unit = tile_side(coord.z) / f64::from(self.extent());
        let clip_bbox = tile_bbox.buffered(f64::from(self.buffer_size) * meters_per_unit);
        let scale_denom = self.scale_denominator(coord);
        let ctx = FilterContext::new(f64::from(coord.z), &self.options.variables);
        let grid = TileGrid::new(tile_bbox, self.extent());

        let mut layers = Vec::new();
        for prepared in &self.layers {
            let layer = prepared.layer;
            if !layer.is_visible(scale_denom) {
                debug!(layer = %layer.name, scale_denom, "layer outside scale range");
                continue;
            }
            let active: Vec<&Rule> = prepared
                .rules
                .iter()
                .copied()
                .filter(|rule| rule.is_active(scale_denom))
                .collect();
            let mut out = Layer::new(&layer.name, self.extent());
            match &layer.datasource {
                Datasource::Vector(features) => {
                    for feature in features {
                        if let Some(encoded) =
                            self.encode_feature(feature, &active, &ctx, &clip_bbox, &grid)
                        {
                            out.features.push(encoded);
                        }
                    }
                }
                Datasource::Raster { image, extent } => {
                    let styled = active.iter().any(|rule| rule.has_raster_symbolizer());
                    if styled || !self.options.style_level_filter {
                        if let Some(data) = self.encode_raster(image, extent, &tile_bbox)? {
                            out.features.push(Feature::raster_feature(data));
                        }
                    }
                }
            }
            if out.is_empty() {
                debug!(layer = %layer.name, tile = %coord, "no features, layer dropped");
                continue;
            }
            layers.push(out);
        }
        Ok(layers)
    }

    fn encode_feature(
        &self,
        feature: &SourceFeature,
        active: &[&Rule],
        ctx: &FilterContext<'_>,
        clip_bbox: &BBox,
        grid: &TileGrid,
    ) -> Option<Feature> {
        let bbox = feature.bbox();
        if bbox.is_empty() || !bbox.intersects(clip_bbox) {
            return None;
        }
        if self.options.style_level_filter && !active.iter().any(|rule| rule.matches(feature, ctx)) {
            return None;
        }
        let geometry = encode_geometry(&feature.geometry, clip_bbox, grid)?;
        Some(Feature::new(feature.id, feature.properties.clone(), geometry))
    }

    fn encode_raster(
        &self,
        image: &DynamicImage,
        extent: &BBox,
        tile_bbox: &BBox,
    ) -> Result<Option<Vec<u8>>> {
        let Some(resampled) = resample_to_tile(image, extent, tile_bbox, self.options.tile_size)
        else {
            return Ok(None);
        };
        let data = self.format.encode(&DynamicImage::ImageRgba8(resampled))?;
        Ok(Some(data))
    }

    pub fn encode_tile(&self, coord: &TileCoordinate) -> Result<Vec<u8>> {
        let layers = self.render_layers(coord)?;
        let buffer = encode_layers(&layers)?;
        if self.options.compress {
            compress(&buffer)
        } else {
            Ok(buffer)
        }
    }
}

pub fn create_mvt_merc(map: &Map, coord: &TileCoordinate, options: &EncodeOptions) -> Result<Vec<u8>> {
    Encoder::new(map, options)?.encode_tile(coord)
}
