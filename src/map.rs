use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};

use geo_types::{Coord, LineString, MultiLineString, MultiPoint, MultiPolygon, Point, Polygon};
use image::DynamicImage;
use serde::Deserialize;
use serde_json::Value as Json;
use tracing::debug;

use crate::coord::{BBox, lonlat_to_mercator};
use crate::error::{Result, TileError};
use crate::style::{Filter, FilterContext, FilterSubject};
use crate::tile::{GeomType, Properties, Value};

pub const DEFAULT_MAP_SIZE: u32 = 256;
const MERCATOR_SRS: &str = "EPSG:3857";

/// RGBA color parsed from `#rgb`, `#rrggbb` or `#rrggbbaa`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(try_from = "String")]
pub struct Color(pub [u8; 4]);

impl Color {
    pub const BLACK: Color = Color([0, 0, 0, 255]);
    pub const GREY: Color = Color([128, 128, 128, 255]);

    pub fn parse(text: &str) -> Option<Color> {
        let hex = text.strip_prefix('#')?;
        let channel = |idx: usize| u8::from_str_radix(hex.get(idx..idx + 2)?, 16).ok();
        match hex.len() {
            3 => {
                let mut rgba = [255u8; 4];
                for (idx, ch) in hex.chars().enumerate() {
                    let nibble = ch.to_digit(16)? as u8;
                    rgba[idx] = nibble * 17;
                }
                Some(Color(rgba))
            }
            6 => Some(Color([channel(0)?, channel(2)?, channel(4)?, 255])),
            8 => Some(Color([channel(0)?, channel(2)?, channel(4)?, channel(6)?])),
            _ => None,
        }
    }

    pub fn with_opacity(self, opacity: f32) -> Color {
        let [r, g, b, a] = self.0;
        let alpha = (f32::from(a) * opacity.clamp(0.0, 1.0)).round() as u8;
        Color([r, g, b, alpha])
    }
}

impl TryFrom<String> for Color {
    type Error = String;

    fn try_from(value: String) -> std::result::Result<Self, Self::Error> {
        Color::parse(&value).ok_or_else(|| format!("invalid color '{value}'"))
    }
}

fn default_stroke() -> Color {
    Color::BLACK
}

fn default_fill() -> Color {
    Color::GREY
}

fn one() -> f32 {
    1.0
}

fn default_marker_radius() -> f32 {
    3.0
}

fn unbounded() -> f64 {
    f64::INFINITY
}

fn default_map_size() -> u32 {
    DEFAULT_MAP_SIZE
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum Symbolizer {
    Line {
        #[serde(default = "default_stroke")]
        stroke: Color,
        #[serde(default = "one")]
        stroke_width: f32,
        #[serde(default = "one")]
        stroke_opacity: f32,
    },
    Polygon {
        #[serde(default = "default_fill")]
        fill: Color,
        #[serde(default = "one")]
        fill_opacity: f32,
    },
    Markers {
        #[serde(default = "default_stroke")]
        fill: Color,
        #[serde(default = "default_marker_radius")]
        radius: f32,
    },
    Raster {
        #[serde(default = "one")]
        opacity: f32,
    },
}

impl Symbolizer {
    pub fn line(stroke: Color, stroke_width: f32) -> Self {
        Symbolizer::Line {
            stroke,
            stroke_width,
            stroke_opacity: 1.0,
        }
    }

    pub fn polygon(fill: Color) -> Self {
        Symbolizer::Polygon {
            fill,
            fill_opacity: 1.0,
        }
    }

    pub fn markers(fill: Color, radius: f32) -> Self {
        Symbolizer::Markers { fill, radius }
    }

    pub fn raster() -> Self {
        Symbolizer::Raster { opacity: 1.0 }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct Rule {
    #[serde(default)]
    pub filter: Option<Filter>,
    #[serde(default)]
    pub min_scale_denominator: f64,
    #[serde(default = "unbounded")]
    pub max_scale_denominator: f64,
    #[serde(default)]
    pub symbolizers: Vec<Symbolizer>,
}

impl Default for Rule {
    fn default() -> Self {
        Rule {
            filter: None,
            min_scale_denominator: 0.0,
            max_scale_denominator: f64::INFINITY,
            symbolizers: Vec::new(),
        }
    }
}

impl Rule {
    pub fn new(symbolizers: Vec<Symbolizer>) -> Self {
        Rule {
            symbolizers,
            ..Rule::default()
        }
    }

    pub fn with_filter(mut self, filter: &Json) -> Self {
        self.filter = Some(Filter::parse(filter));
        self
    }

    pub fn with_scale_range(mut self, min: f64, max: f64) -> Self {
        self.min_scale_denominator = min;
        self.max_scale_denominator = max;
        self
    }

    pub fn is_active(&self, scale_denominator: f64) -> bool {
        self.min_scale_denominator <= scale_denominator
            && scale_denominator < self.max_scale_denominator
    }

    /// A rule without a filter matches every feature.
    pub fn matches<S: FilterSubject + ?Sized>(&self, subject: &S, ctx: &FilterContext<'_>) -> bool {
        self.filter
            .as_ref()
            .is_none_or(|filter| filter.matches(subject, ctx))
    }

    pub fn has_raster_symbolizer(&self) -> bool {
        self.symbolizers
            .iter()
            .any(|symbolizer| matches!(symbolizer, Symbolizer::Raster { .. }))
    }

    pub fn raster_opacity(&self) -> Option<f32> {
        self.symbolizers.iter().find_map(|symbolizer| match symbolizer {
            Symbolizer::Raster { opacity } => Some(*opacity),
            _ => None,
        })
    }
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct Style {
    #[serde(default)]
    pub rules: Vec<Rule>,
}

impl Style {
    pub fn new(rules: Vec<Rule>) -> Self {
        Style { rules }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct SourceFeature {
    pub id: Option<u64>,
    pub properties: Properties,
    pub geometry: geo_types::Geometry<f64>,
}

impl SourceFeature {
    pub fn new(id: Option<u64>, geometry: geo_types::Geometry<f64>) -> Self {
        SourceFeature {
            id,
            properties: Properties::new(),
            geometry,
        }
    }

    pub fn with_property(mut self, key: &str, value: impl Into<Value>) -> Self {
        self.properties.insert(key.to_string(), value.into());
        self
    }

    pub fn geom_type(&self) -> GeomType {
        use geo_types::Geometry;
        match &self.geometry {
            Geometry::Point(_) | Geometry::MultiPoint(_) => GeomType::Point,
            Geometry::LineString(_) | Geometry::MultiLineString(_) | Geometry::Line(_) => {
                GeomType::LineString
            }
            Geometry::Polygon(_)
            | Geometry::MultiPolygon(_)
            | Geometry::Rect(_)
            | Geometry::Triangle(_) => GeomType::Polygon,
            Geometry::GeometryCollection(_) => GeomType::Unknown,
        }
    }

    pub fn bbox(&self) -> BBox {
        let mut bbox = BBox::empty();
        visit_coords(&self.geometry, &mut |coord| bbox.expand_to(coord.x, coord.y));
        bbox
    }
}

fn visit_coords(geometry: &geo_types::Geometry<f64>, visit: &mut impl FnMut(Coord<f64>)) {
    use geo_types::Geometry;
    match geometry {
        Geometry::Point(point) => visit(point.0),
        Geometry::MultiPoint(points) => points.iter().for_each(|point| visit(point.0)),
        Geometry::Line(line) => {
            visit(line.start);
            visit(line.end);
        }
        Geometry::LineString(line) => line.coords().for_each(|c| visit(*c)),
        Geometry::MultiLineString(lines) => lines
            .iter()
            .flat_map(|line| line.coords())
            .for_each(|c| visit(*c)),
        Geometry::Polygon(polygon) => polygon.exterior().coords().for_each(|c| visit(*c)),
        Geometry::MultiPolygon(polygons) => polygons
            .iter()
            .flat_map(|polygon| polygon.exterior().coords())
            .for_each(|c| visit(*c)),
        Geometry::Rect(rect) => {
            visit(rect.min());
            visit(rect.max());
        }
        Geometry::Triangle(triangle) => triangle.to_array().into_iter().for_each(&mut *visit),
        Geometry::GeometryCollection(collection) => {
            for inner in collection.iter() {
                visit_coords(inner, visit);
            }
        }
    }
}

#[derive(Debug, Clone)]
pub enum Datasource {
    Vector(Vec<SourceFeature>),
    /// A georeferenced image covering `extent` in mercator meters.
    Raster { image: DynamicImage, extent: BBox },
}

#[derive(Debug, Clone)]
pub struct MapLayer {
    pub name: String,
    pub styles: Vec<String>,
    pub min_scale_denominator: f64,
    pub max_scale_denominator: f64,
    pub datasource: Datasource,
}

impl MapLayer {
    pub fn new(name: &str, datasource: Datasource) -> Self {
        MapLayer {
            name: name.to_string(),
            styles: Vec::new(),
            min_scale_denominator: 0.0,
            max_scale_denominator: f64::INFINITY,
            datasource,
        }
    }

    pub fn with_style(mut self, style: &str) -> Self {
        self.styles.push(style.to_string());
        self
    }

    pub fn with_scale_range(mut self, min: f64, max: f64) -> Self {
        self.min_scale_denominator = min;
        self.max_scale_denominator = max;
        self
    }

    pub fn is_visible(&self, scale_denominator: f64) -> bool {
        self.min_scale_denominator <= scale_denominator
            && scale_denominator < self.max_scale_denominator
    }
}

#[derive(Debug, Clone)]
pub struct Map {
    pub width: u32,
    pub height: u32,
    /// Padding around the tile: layer extent units when encoding, image pixels when rendering.
    pub buffer_size: i32,
    pub layers: Vec<MapLayer>,
    pub styles: BTreeMap<String, Style>,
}

impl Default for Map {
    fn default() -> Self {
        Map::new(DEFAULT_MAP_SIZE, DEFAULT_MAP_SIZE)
    }
}

impl Map {
    pub fn new(width: u32, height: u32) -> Self {
        Map {
            width,
            height,
            buffer_size: 0,
            layers: Vec::new(),
            styles: BTreeMap::new(),
        }
    }

    pub fn add_layer(&mut self, layer: MapLayer) {
        self.layers.push(layer);
    }

    pub fn insert_style(&mut self, name: &str, style: Style) {
        self.styles.insert(name.to_string(), style);
    }

    pub fn find_layer(&self, name: &str) -> Option<&MapLayer> {
        self.layers.iter().find(|layer| layer.name == name)
    }

    pub fn layer_rules<'a>(&'a self, layer: &MapLayer) -> Vec<&'a Rule> {
        let mut rules = Vec::new();
        for name in &layer.styles {
            match self.styles.get(name) {
                Some(style) => rules.extend(style.rules.iter()),
                None => debug!(layer = %layer.name, style = %name, "style not found"),
            }
        }
        rules
    }

    /// Reads a JSON map definition; relative datasource paths resolve against
    /// the file's directory.
    pub fn load(path: &Path) -> Result<Map> {
        let contents = fs::read_to_string(path)?;
        let base = path.parent().unwrap_or_else(|| Path::new("."));
        Map::from_json_with_base(&contents, base)
    }

    pub fn from_json(json: &str) -> Result<Map> {
        Map::from_json_with_base(json, Path::new("."))
    }

    pub fn from_json_with_base(json: &str, base: &Path) -> Result<Map> {
        let document: MapDocument = serde_json::from_str(json)
            .map_err(|err| TileError::style(format!("parse map json: {err}")))?;
        let lonlat = document.srs.as_deref() != Some(MERCATOR_SRS);
        let mut map = Map::new(document.width, document.height);
        map.buffer_size = document.buffer_size;
        map.styles = document.styles;
        for layer in document.layers {
            let datasource = match layer.datasource {
                DatasourceDocument::Geojson { data, path } => {
                    let data = match (data, path) {
                        (Some(data), _) => data,
                        (None, Some(path)) => {
                            let contents = fs::read_to_string(base.join(&path))?;
                            serde_json::from_str(&contents).map_err(|err| {
                                TileError::style(format!("parse {}: {err}", path.display()))
                            })?
                        }
                        (None, None) => {
                            return Err(TileError::style(format!(
                                "layer '{}' has neither inline data nor a path",
                                layer.name
                            )));
                        }
                    };
                    Datasource::Vector(parse_feature_collection(&data, lonlat)?)
                }
                DatasourceDocument::Raster { path, extent } => {
                    let image = image::open(base.join(&path))?;
                    let [min_x, min_y, max_x, max_y] = extent;
                    let extent = if lonlat {
                        let (min_x, min_y) = lonlat_to_mercator(min_x, min_y);
                        let (max_x, max_y) = lonlat_to_mercator(max_x, max_y);
                        BBox::new(min_x, min_y, max_x, max_y)
                    } else {
                        BBox::new(min_x, min_y, max_x, max_y)
                    };
                    Datasource::Raster { image, extent }
                }
            };
            map.add_layer(MapLayer {
                name: layer.name,
                styles: layer.styles,
                min_scale_denominator: layer.min_scale_denominator,
                max_scale_denominator: layer.max_scale_denominator,
                datasource,
            });
        }
        Ok(map)
    }
}

#[derive(Debug, Deserialize)]
struct MapDocument {
    #[serde(default = "default_map_size")]
    width: u32,
    #[serde(default = "default_map_size")]
    height: u32,
    #[serde(default)]
    buffer_size: i32,
    #[serde(default)]
    srs: Option<String>,
    #[serde(default)]
    styles: BTreeMap<String, Style>,
    #[serde(default)]
    layers: Vec<LayerDocument>,
}

#[derive(Debug, Deserialize)]
struct LayerDocument {
    name: String,
    #[serde(default)]
    styles: Vec<String>,
    #[serde(default)]
    min_scale_denominator: f64,
    #[serde(default = "unbounded")]
    max_scale_denominator: f64,
    datasource: DatasourceDocument,
}

#[derive(Debug, Deserialize)]
#[serde(tag = "type", rename_all = "lowercase")]
enum DatasourceDocument {
    Geojson {
        #[serde(default)]
        data: Option<Json>,
        #[serde(default)]
        path: Option<PathBuf>,
    },
    Raster {
        path: PathBuf,
        extent: [f64; 4],
    },
}

/// Accepts a FeatureCollection, a single Feature or a bare array of Features.
fn parse_feature_collection(value: &Json, lonlat: bool) -> Result<Vec<SourceFeature>> {
    let features = match value.get("type").and_then(Json::as_str) {
        Some("FeatureCollection") => value
            .get("features")
            .and_then(Json::as_array)
            .ok_or_else(|| TileError::style("FeatureCollection without features"))?
            .as_slice(),
        Some("Feature") => std::slice::from_ref(value),
        _ => value
            .as_array()
            .ok_or_else(|| TileError::style("expected GeoJSON features"))?
            .as_slice(),
    };
    features
        .iter()
        .map(|feature| parse_feature(feature, lonlat))
        .collect()
}

fn parse_feature(value: &Json, lonlat: bool) -> Result<SourceFeature> {
    let geometry = value
        .get("geometry")
        .ok_or_else(|| TileError::style("feature must have a geometry"))?;
    let mut properties = Properties::new();
    if let Some(props) = value.get("properties").and_then(Json::as_object) {
        for (key, value) in props {
            if let Some(value) = Value::from_json(value) {
                properties.insert(key.clone(), value);
            }
        }
    }
    Ok(SourceFeature {
        id: value.get("id").and_then(Json::as_u64),
        properties,
        geometry: parse_geometry(geometry, lonlat)?,
    })
}

fn parse_geometry(value: &Json, lonlat: bool) -> Result<geo_types::Geometry<f64>> {
    let kind = value
        .get("type")
        .and_then(Json::as_str)
        .ok_or_else(|| TileError::style("geometry must have a type"))?;
    if kind == "GeometryCollection" {
        let members = value
            .get("geometries")
            .and_then(Json::as_array)
            .ok_or_else(|| TileError::style("GeometryCollection without geometries"))?
            .iter()
            .map(|member| parse_geometry(member, lonlat))
            .collect::<Result<Vec<_>>>()?;
        return Ok(geo_types::Geometry::GeometryCollection(
            geo_types::GeometryCollection(members),
        ));
    }
    let coords = value
        .get("coordinates")
        .ok_or_else(|| TileError::style("geometry must have coordinates"))?;
    let position = |value: &Json| parse_position(value, lonlat);
    let line = |value: &Json| -> Result<LineString<f64>> {
        Ok(LineString(
            as_array(value)?.iter().map(position).collect::<Result<_>>()?,
        ))
    };
    let polygon = |value: &Json| -> Result<Polygon<f64>> {
        let mut rings = as_array(value)?.iter().map(line).collect::<Result<Vec<_>>>()?;
        if rings.is_empty() {
            return Err(TileError::style("polygon without rings"));
        }
        let exterior = rings.remove(0);
        Ok(Polygon::new(exterior, rings))
    };
    let geometry = match kind {
        "Point" => geo_types::Geometry::Point(Point(position(coords)?)),
        "MultiPoint" => geo_types::Geometry::MultiPoint(MultiPoint(
            as_array(coords)?
                .iter()
                .map(|item| position(item).map(Point))
                .collect::<Result<_>>()?,
        )),
        "LineString" => geo_types::Geometry::LineString(line(coords)?),
        "MultiLineString" => geo_types::Geometry::MultiLineString(MultiLineString(
            as_array(coords)?.iter().map(line).collect::<Result<_>>()?,
        )),
        "Polygon" => geo_types::Geometry::Polygon(polygon(coords)?),
        "MultiPolygon" => geo_types::Geometry::MultiPolygon(MultiPolygon(
            as_array(coords)?.iter().map(polygon).collect::<Result<_>>()?,
        )),
        other => return Err(TileError::style(format!("unknown geometry type '{other}'"))),
    };
    Ok(geometry)
}

fn as_array(value: &Json) -> Result<&Vec<Json>> {
    value
        .as_array()
        .ok_or_else(|| TileError::style("coordinates must be arrays"))
}

fn parse_position(value: &Json, lonlat: bool) -> Result<Coord<f64>> {
    let pair = as_array(value)?;
    let (Some(x), Some(y)) = (
        pair.first().and_then(Json::as_f64),
        pair.get(1).and_then(Json::as_f64),
    ) else {
        return Err(TileError::style("positions need two numbers"));
    };
    let (x, y) = if lonlat { lonlat_to_mercator(x, y) } else { (x, y) };
    Ok(Coord { x, y })
}
