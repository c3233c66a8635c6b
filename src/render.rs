use std::collections::BTreeMap;

use geo_types::{Coord, LineString, MultiLineString, MultiPoint, MultiPolygon, Point, Polygon};
use image::{DynamicImage, ImageBuffer, Rgba, RgbaImage, imageops};
use imageproc::drawing::{
    Blend, draw_filled_circle_mut, draw_line_segment_mut, draw_polygon_mut,
};
use tracing::{debug, warn};

use crate::clip::{clip_line, clip_ring};
use crate::coord::{AffineParams, BBox, TileCoordinate, overzoom_transform, scale_denominator};
use crate::error::{Result, TileError};
use crate::map::{Color, Map, Rule, Style, Symbolizer};
use crate::merc_tile::MergedTile;
use crate::style::FilterContext;
use crate::tile::{GeomType, Layer, Properties, Value};

#[derive(Debug, Clone)]
pub struct RenderOptions {
    /// Symbol scaling; non-positive values fall back to 1.
    pub scale_factor: f64,
    pub scale_denominator: Option<f64>,
    /// Buffer in pixels around the image; falls back to the map's buffer size.
    pub buffer_size: Option<i32>,
    pub variables: BTreeMap<String, Value>,
}

impl Default for RenderOptions {
    fn default() -> Self {
        RenderOptions {
            scale_factor: 1.0,
            scale_denominator: None,
            buffer_size: None,
            variables: BTreeMap::new(),
        }
    }
}

#[derive(Debug, Clone, Copy)]
pub struct RenderParams {
    pub scale_factor: f64,
    pub scale_denominator: f64,
    pub zoom: f64,
}

#[derive(Debug, Clone)]
pub struct RenderFeature<'a> {
    pub id: Option<u64>,
    pub properties: &'a Properties,
    pub geom_type: GeomType,
    pub geometry: geo_types::Geometry<f64>,
    pub rules: Vec<usize>,
}

pub trait Rasterizer {
    fn rasterize(
        &self,
        features: &[RenderFeature<'_>],
        rules: &[&Rule],
        target: &mut RgbaImage,
        params: &RenderParams,
    ) -> Result<()>;

    fn decode_raster(&self, data: &[u8]) -> Result<DynamicImage> {
        Ok(image::load_from_memory(data)?)
    }
}

#[derive(Debug, Default)]
pub struct RenderReport {
    pub layers_rendered: usize,
    pub features_rendered: usize,
    /// Non-fatal problems such as tile layers without a matching map layer.
    pub warnings: Vec<TileError>,
}

struct PixelTransform {
    affine: AffineParams,
    width: f64,
    height: f64,
    clip: BBox,
}

impl PixelTransform {
    fn new(affine: AffineParams, target: &RgbaImage, buffer: i32) -> Self {
        let width = f64::from(target.width());
        let height = f64::from(target.height());
        let buffer = f64::from(buffer.max(0));
        PixelTransform {
            affine,
            width,
            height,
            clip: BBox::new(-buffer, -buffer, width + buffer, height + buffer),
        }
    }

    fn coord(&self, c: Coord<f64>, extent: f64) -> Coord<f64> {
        let (x, y) = self.affine.apply(c.x / extent, c.y / extent);
        Coord {
            x: x * self.width,
            y: y * self.height,
        }
    }

    fn path(&self, line: &LineString<f64>, extent: f64) -> Vec<Coord<f64>> {
        line.coords().map(|c| self.coord(*c, extent)).collect()
    }

    fn polygon(&self, polygon: &Polygon<f64>, extent: f64) -> Option<Polygon<f64>> {
        let exterior = clip_ring(&self.path(polygon.exterior(), extent), &self.clip);
        if exterior.len() < 3 {
            return None;
        }
        let interiors = polygon
            .interiors()
            .iter()
            .map(|ring| LineString(clip_ring(&self.path(ring, extent), &self.clip)))
            .filter(|ring| ring.0.len() >= 3)
            .collect();
        Some(Polygon::new(LineString(exterior), interiors))
    }

    fn geometry(&self, geometry: &geo_types::Geometry<f64>, extent: f64) -> Option<geo_types::Geometry<f64>> {
        use geo_types::Geometry as G;
        let points = |coords: &mut dyn Iterator<Item = Coord<f64>>| -> Vec<Point<f64>> {
            coords
                .map(|c| self.coord(c, extent))
                .filter(|c| self.clip.contains(c.x, c.y))
                .map(Point)
                .collect()
        };
        let lines = |lines: &[LineString<f64>]| -> Vec<LineString<f64>> {
            lines
                .iter()
                .flat_map(|line| clip_line(&self.path(line, extent), &self.clip))
                .map(LineString)
                .collect()
        };
        let mapped = match geometry {
            G::Point(point) => {
                G::MultiPoint(MultiPoint(points(&mut std::iter::once(point.0))))
            }
            G::MultiPoint(multi) => G::MultiPoint(MultiPoint(points(&mut multi.iter().map(|p| p.0)))),
            G::LineString(line) => G::MultiLineString(MultiLineString(lines(std::slice::from_ref(line)))),
            G::MultiLineString(multi) => G::MultiLineString(MultiLineString(lines(&multi.0))),
            G::Polygon(polygon) => {
                G::MultiPolygon(MultiPolygon(self.polygon(polygon, extent).into_iter().collect()))
            }
            G::MultiPolygon(multi) => G::MultiPolygon(MultiPolygon(
                multi.iter().filter_map(|p| self.polygon(p, extent)).collect(),
            )),
            _ => return None,
        };
        let empty = match &mapped {
            G::MultiPoint(multi) => multi.0.is_empty(),
            G::MultiLineString(multi) => multi.0.is_empty(),
            G::MultiPolygon(multi) => multi.0.is_empty(),
            _ => true,
        };
        (!empty).then_some(mapped)
    }
}

/// Renders `tile` into `image` using the layers and styles of `map`.
/// With `overzoom`, the tile is drawn as if it were the descendant tile.
pub fn render_mvt_merc(
    tile: &MergedTile,
    map: &Map,
    image: &mut RgbaImage,
    rasterizer: &dyn Rasterizer,
    overzoom: Option<TileCoordinate>,
    options: &RenderOptions,
) -> Result<RenderReport> {
    let base = tile.coordinate();
    let (target, affine) = match overzoom {
        Some(target) => (target, overzoom_transform(&base, &target)?),
        None => (base, AffineParams::identity()),
    };
    let scale_factor = if options.scale_factor > 0.0 {
        options.scale_factor
    } else {
        1.0
    };
    let scale_denom = match options.scale_denominator {
        Some(denom) if denom > 0.0 => denom,
        _ => scale_denominator(target.z, image.width()),
    } * scale_factor;
    let params = RenderParams {
        scale_factor,
        scale_denominator: scale_denom,
        zoom: f64::from(target.z),
    };
    let transform = PixelTransform::new(affine, image, options.buffer_size.unwrap_or(map.buffer_size));
    let ctx = FilterContext::new(params.zoom, &options.variables);

    let mut report = RenderReport::default();
    for tile_layer in tile.layers() {
        if map.find_layer(tile_layer.name()).is_none() {
            let warning = TileError::StyleLayerMismatch(tile_layer.name().to_string());
            warn!(tile = %base, "{warning}");
            report.warnings.push(warning);
        }
    }

    for map_layer in &map.layers {
        if !map_layer.is_visible(scale_denom) {
            continue;
        }
        let Some(tile_layer) = tile.layer(&map_layer.name) else {
            continue;
        };
        let rules: Vec<&Rule> = map
            .layer_rules(map_layer)
            .into_iter()
            .filter(|rule| rule.is_active(scale_denom))
            .collect();
        let drawn = draw_layer(tile_layer, &rules, image, rasterizer, &transform, &ctx, &params)?;
        report.layers_rendered += 1;
        report.features_rendered += drawn;
    }
    debug!(
        tile = %base,
        target = %target,
        layers = report.layers_rendered,
        features = report.features_rendered,
        "rendered tile"
    );
    Ok(report)
}

fn draw_layer(
    layer: &Layer,
    rules: &[&Rule],
    image: &mut RgbaImage,
    rasterizer: &dyn Rasterizer,
    transform: &PixelTransform,
    ctx: &FilterContext<'_>,
    params: &RenderParams,
) -> Result<usize> {
    let extent = f64::from(layer.extent);
    let raster_opacity = rules.iter().find_map(|rule| rule.raster_opacity());
    let mut features = Vec::new();
    let mut rasters = 0;
    for feature in &layer.features {
        if let Some(data) = feature.raster() {
            let Some(opacity) = raster_opacity else {
                continue;
            };
            let source = rasterizer.decode_raster(data)?;
            composite_raster(image, &source, transform, opacity);
            rasters += 1;
            continue;
        }
        let matched: Vec<usize> = rules
            .iter()
            .enumerate()
            .filter(|(_, rule)| rule.matches(feature, ctx))
            .map(|(idx, _)| idx)
            .collect();
        if matched.is_empty() {
            continue;
        }
        let Some(local) = feature.to_geo()? else {
            continue;
        };
        let Some(geometry) = transform.geometry(&local, extent) else {
            continue;
        };
        features.push(RenderFeature {
            id: feature.id(),
            properties: &feature.properties,
            geom_type: feature.geom_type(),
            geometry,
            rules: matched,
        });
    }
    if !features.is_empty() {
        rasterizer.rasterize(&features, rules, image, params)?;
    }
    Ok(features.len() + rasters)
}

fn composite_raster(image: &mut RgbaImage, source: &DynamicImage, transform: &PixelTransform, opacity: f32) {
    let source = source.to_rgba8();
    let (src_w, src_h) = (f64::from(source.width()), f64::from(source.height()));
    let opacity = opacity.clamp(0.0, 1.0);
    let layer: RgbaImage = ImageBuffer::from_fn(image.width(), image.height(), |px, py| {
        let u = (f64::from(px) + 0.5) / transform.width;
        let v = (f64::from(py) + 0.5) / transform.height;
        let (bu, bv) = transform.affine.invert(u, v);
        let (sx, sy) = (bu * src_w, bv * src_h);
        if sx < 0.0 || sy < 0.0 || sx >= src_w || sy >= src_h {
            return Rgba([0, 0, 0, 0]);
        }
        let mut pixel = *source.get_pixel(sx as u32, sy as u32);
        pixel[3] = (f32::from(pixel[3]) * opacity).round() as u8;
        pixel
    });
    imageops::overlay(image, &layer, 0, 0);
}

const PREVIEW_LAYER: &str = "preview";

fn preview_map() -> Map {
    let mut map = Map::default();
    let lines = Rule::new(vec![Symbolizer::line(Color::BLACK, 1.0)]).with_filter(&serde_json::json!(
        ["any", ["==", "$type", "LineString"], ["==", "$type", "Polygon"]]
    ));
    let markers = Rule::new(vec![Symbolizer::markers(Color([0, 0, 255, 255]), 3.0)])
        .with_filter(&serde_json::json!(["==", "$type", "Point"]));
    map.insert_style(PREVIEW_LAYER, Style::new(vec![lines, markers]));
    map.add_layer(
        crate::map::MapLayer::new(PREVIEW_LAYER, crate::map::Datasource::Vector(Vec::new()))
            .with_style(PREVIEW_LAYER),
    );
    map
}

/// Renders every tile layer with the styles of the first layer of `map`.
pub fn preview_mvt_merc_custom(
    tile: &MergedTile,
    map: &Map,
    image: &mut RgbaImage,
    rasterizer: &dyn Rasterizer,
) -> Result<RenderReport> {
    let first = map
        .layers
        .first()
        .ok_or_else(|| TileError::style("the input style has no layers"))?;
    let rules = map.layer_rules(first);
    let variables = BTreeMap::new();
    let ctx = FilterContext::new(f64::from(tile.coordinate().z), &variables);
    let params = RenderParams {
        scale_factor: 1.0,
        scale_denominator: 0.0,
        zoom: ctx.zoom,
    };
    let transform = PixelTransform::new(AffineParams::identity(), image, map.buffer_size);
    let mut report = RenderReport::default();
    for layer in tile.layers() {
        report.features_rendered +=
            draw_layer(layer, &rules, image, rasterizer, &transform, &ctx, &params)?;
        report.layers_rendered += 1;
    }
    Ok(report)
}

pub fn preview_mvt_merc(tile: &MergedTile, image: &mut RgbaImage, rasterizer: &dyn Rasterizer) -> Result<RenderReport> {
    preview_mvt_merc_custom(tile, &preview_map(), image, rasterizer)
}

#[derive(Debug, Default, Clone, Copy)]
pub struct SimpleRasterizer;

impl SimpleRasterizer {
    fn draw(&self, canvas: &mut Blend<RgbaImage>, feature: &RenderFeature<'_>, symbolizer: &Symbolizer, scale: f64) {
        use geo_types::Geometry as G;
        match symbolizer {
            Symbolizer::Line {
                stroke,
                stroke_width,
                stroke_opacity,
            } => {
                let color = Rgba(stroke.with_opacity(*stroke_opacity).0);
                let width = (f64::from(*stroke_width) * scale).round().max(1.0) as i32;
                let mut draw_path = |coords: &[Coord<f64>]| {
                    for pair in coords.windows(2) {
                        draw_wide_segment(canvas, pair[0], pair[1], width, color);
                    }
                };
                match &feature.geometry {
                    G::MultiLineString(lines) => lines.iter().for_each(|line| draw_path(&line.0)),
                    G::MultiPolygon(polygons) => {
                        for polygon in polygons.iter() {
                            draw_path(&closed(&polygon.exterior().0));
                            for ring in polygon.interiors() {
                                draw_path(&closed(&ring.0));
                            }
                        }
                    }
                    _ => {}
                }
            }
            Symbolizer::Polygon { fill, fill_opacity } => {
                let color = Rgba(fill.with_opacity(*fill_opacity).0);
                if let G::MultiPolygon(polygons) = &feature.geometry {
                    for polygon in polygons.iter() {
                        let ring = pixel_ring(&polygon.exterior().0);
                        if ring.len() >= 3 {
                            draw_polygon_mut(canvas, &ring, color);
                        }
                    }
                }
            }
            Symbolizer::Markers { fill, radius } => {
                let radius = (f64::from(*radius) * scale).round().max(1.0) as i32;
                if let G::MultiPoint(points) = &feature.geometry {
                    for point in points.iter() {
                        let center = (point.x().round() as i32, point.y().round() as i32);
                        draw_filled_circle_mut(canvas, center, radius, Rgba(fill.0));
                    }
                }
            }
            Symbolizer::Raster { .. } => {}
        }
    }
}

impl Rasterizer for SimpleRasterizer {
    fn rasterize(
        &self,
        features: &[RenderFeature<'_>],
        rules: &[&Rule],
        target: &mut RgbaImage,
        params: &RenderParams,
    ) -> Result<()> {
        let mut canvas = Blend(std::mem::take(target));
        // Rule order is paint order.
        for (idx, rule) in rules.iter().enumerate() {
            for feature in features.iter().filter(|f| f.rules.contains(&idx)) {
                for symbolizer in &rule.symbolizers {
                    self.draw(&mut canvas, feature, symbolizer, params.scale_factor);
                }
            }
        }
        *target = canvas.0;
        Ok(())
    }
}

fn closed(ring: &[Coord<f64>]) -> Vec<Coord<f64>> {
    let mut out = ring.to_vec();
    if let (Some(first), Some(last)) = (ring.first(), ring.last()) {
        if first != last {
            out.push(*first);
        }
    }
    out
}

/// Integer ring without repeated vertices; the polygon fill rejects a
/// closing point equal to the first.
fn pixel_ring(ring: &[Coord<f64>]) -> Vec<imageproc::point::Point<i32>> {
    let mut out: Vec<imageproc::point::Point<i32>> = Vec::with_capacity(ring.len());
    for c in ring {
        let point = imageproc::point::Point::new(c.x.round() as i32, c.y.round() as i32);
        if out.last() != Some(&point) {
            out.push(point);
        }
    }
    while out.len() > 1 && out.first() == out.last() {
        out.pop();
    }
    out
}

fn draw_wide_segment(canvas: &mut Blend<RgbaImage>, a: Coord<f64>, b: Coord<f64>, width: i32, color: Rgba<u8>) {
    let (dx, dy) = (b.x - a.x, b.y - a.y);
    let length = dx.hypot(dy);
    let (nx, ny) = if length > 0.0 {
        (-dy / length, dx / length)
    } else {
        (0.0, 0.0)
    };
    let half = width / 2;
    for step in -half..=(width - 1 - half) {
        let offset = f64::from(step);
        let start = ((a.x + nx * offset) as f32, (a.y + ny * offset) as f32);
        let end = ((b.x + nx * offset) as f32, (b.y + ny * offset) as f32);
        draw_line_segment_mut(canvas, start, end, color);
    }
}
