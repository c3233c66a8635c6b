use std::cell::RefCell;

use image::{DynamicImage, Rgba, RgbaImage};
use mvt::{GeomEncoder, GeomType, Tile};
use vt_render::map::{Color, Datasource, Map, MapLayer, Rule, Style, Symbolizer};
use vt_render::merc_tile::MergedTile;
use vt_render::raster::encode_image;
use vt_render::tile::{Feature, Layer, Value, encode_layers};
use vt_render::render::{
    RenderFeature, RenderOptions, RenderParams, Rasterizer, SimpleRasterizer, preview_mvt_merc,
    preview_mvt_merc_custom, render_mvt_merc,
};
use vt_render::{TileCoordinate, TileError};

const RED: Rgba<u8> = Rgba([255, 0, 0, 255]);

fn create_land_tile() -> Vec<u8> {
    let mut tile = Tile::new(4096);
    let layer = tile.create_layer("land");
    let geom = GeomEncoder::new(GeomType::Polygon)
        .point(0.0, 0.0)
        .expect("point")
        .point(4096.0, 0.0)
        .expect("point")
        .point(4096.0, 4096.0)
        .expect("point")
        .point(0.0, 4096.0)
        .expect("point")
        .complete()
        .expect("ring")
        .encode()
        .expect("encode");
    tile.add_layer(layer.into_feature(geom).into_layer()).expect("add land");

    let layer = tile.create_layer("ghost");
    let geom = GeomEncoder::new(GeomType::Point)
        .point(5.0, 5.0)
        .expect("point")
        .encode()
        .expect("encode");
    tile.add_layer(layer.into_feature(geom).into_layer()).expect("add ghost");
    tile.to_bytes().expect("tile bytes")
}

fn create_poi_tile() -> Vec<u8> {
    let mut tile = Tile::new(4096);
    let layer = tile.create_layer("pois");
    let geom = GeomEncoder::new(GeomType::Point)
        .point(1024.0, 1024.0)
        .expect("point")
        .encode()
        .expect("encode");
    let mut feature = layer.into_feature(geom);
    feature.add_tag_string("kind", "cafe");
    let layer = feature.into_layer();
    let geom = GeomEncoder::new(GeomType::Point)
        .point(3072.0, 3072.0)
        .expect("point")
        .encode()
        .expect("encode");
    let mut feature = layer.into_feature(geom);
    feature.add_tag_string("kind", "bank");
    tile.add_layer(feature.into_layer()).expect("add pois");
    tile.to_bytes().expect("tile bytes")
}

fn create_road_tile() -> Vec<u8> {
    let mut tile = Tile::new(4096);
    let layer = tile.create_layer("roads");
    let geom = GeomEncoder::new(GeomType::Linestring)
        .point(0.0, 2048.0)
        .expect("point")
        .point(4096.0, 2048.0)
        .expect("point")
        .encode()
        .expect("encode");
    tile.add_layer(layer.into_feature(geom).into_layer()).expect("add roads");
    tile.to_bytes().expect("tile bytes")
}

fn merged(coord: TileCoordinate, data: &[u8]) -> MergedTile {
    let mut tile = MergedTile::new(coord);
    tile.merge_buffer(data, false).expect("merge");
    tile
}

fn coord(z: u8, x: u32, y: u32) -> TileCoordinate {
    TileCoordinate::new(z, x, y).expect("coord")
}

fn styled_map(layer: &str, rule: Rule) -> Map {
    let mut map = Map::default();
    map.insert_style(layer, Style::new(vec![rule]));
    map.add_layer(MapLayer::new(layer, Datasource::Vector(Vec::new())).with_style(layer));
    map
}

fn land_map() -> Map {
    styled_map("land", Rule::new(vec![Symbolizer::polygon(Color([255, 0, 0, 255]))]))
}

#[test]
fn overzoom_draws_the_descendant_tile() {
    let base = coord(14, 2788, 6533);
    let tile = merged(base, &create_land_tile());
    let mut image = RgbaImage::new(256, 256);
    let target = coord(24, 2_855_279, 6_690_105);
    let report = render_mvt_merc(
        &tile,
        &land_map(),
        &mut image,
        &SimpleRasterizer,
        Some(target),
        &RenderOptions::default(),
    )
    .expect("render");
    assert_eq!(report.layers_rendered, 1);
    assert_eq!(image.get_pixel(128, 128), &RED);
    assert_eq!(image.get_pixel(10, 10), &RED);
}

#[test]
fn overzoom_outside_the_base_is_rejected() {
    let base = coord(14, 2788, 6533);
    let tile = merged(base, &create_land_tile());
    let mut image = RgbaImage::new(64, 64);
    for target in [coord(15, 0, 0), coord(13, 1394, 3266)] {
        let err = render_mvt_merc(
            &tile,
            &land_map(),
            &mut image,
            &SimpleRasterizer,
            Some(target),
            &RenderOptions::default(),
        )
        .expect_err("must fail");
        assert!(matches!(err, TileError::InvalidOverzoom { .. }));
    }
    assert!(image.pixels().all(|pixel| pixel[3] == 0));
}

#[test]
fn unstyled_tile_layers_are_reported() {
    let tile = merged(coord(2, 1, 1), &create_land_tile());
    let before = tile.to_bytes().expect("bytes");
    let mut image = RgbaImage::new(64, 64);
    let report = render_mvt_merc(
        &tile,
        &land_map(),
        &mut image,
        &SimpleRasterizer,
        None,
        &RenderOptions::default(),
    )
    .expect("render");
    assert_eq!(report.warnings.len(), 1);
    assert!(matches!(&report.warnings[0], TileError::StyleLayerMismatch(name) if name == "ghost"));
    assert_eq!(image.get_pixel(32, 32), &RED);
    assert_eq!(tile.to_bytes().expect("bytes"), before);
}

#[test]
fn filters_select_drawn_features() {
    let tile = merged(coord(3, 2, 2), &create_poi_tile());
    let rule = Rule::new(vec![Symbolizer::markers(Color([0, 0, 255, 255]), 3.0)])
        .with_filter(&serde_json::json!(["==", "kind", "cafe"]));
    let map = styled_map("pois", rule);
    let mut image = RgbaImage::new(256, 256);
    let report = render_mvt_merc(
        &tile,
        &map,
        &mut image,
        &SimpleRasterizer,
        None,
        &RenderOptions::default(),
    )
    .expect("render");
    assert_eq!(report.features_rendered, 1);
    assert_eq!(image.get_pixel(64, 64), &Rgba([0, 0, 255, 255]));
    assert_eq!(image.get_pixel(192, 192)[3], 0);
}

#[test]
fn variables_feed_var_expressions() {
    let tile = merged(coord(3, 2, 2), &create_land_tile());
    let rule = Rule::new(vec![Symbolizer::polygon(Color([255, 0, 0, 255]))])
        .with_filter(&serde_json::json!(["==", ["var", "theme"], "dark"]));
    let map = styled_map("land", rule);
    let render = |theme: Option<&str>| {
        let mut options = RenderOptions::default();
        if let Some(theme) = theme {
            options.variables.insert("theme".to_string(), Value::from(theme));
        }
        let mut image = RgbaImage::new(64, 64);
        let report = render_mvt_merc(&tile, &map, &mut image, &SimpleRasterizer, None, &options).expect("render");
        (report.features_rendered, image)
    };

    let (drawn, image) = render(Some("dark"));
    assert_eq!(drawn, 1);
    assert_eq!(image.get_pixel(32, 32), &RED);

    for theme in [None, Some("light")] {
        let (drawn, image) = render(theme);
        assert_eq!(drawn, 0);
        assert!(image.pixels().all(|pixel| pixel[3] == 0));
    }
}

// A horizontal road two pixels above a 256px image.
fn create_offscreen_road_tile() -> Vec<u8> {
    let mut encoder = vt_render::tile::GeomEncoder::new(vt_render::tile::GeomType::LineString);
    encoder.add_line(&[(0, -32), (4096, -32)]);
    let mut layer = Layer::new("roads", 4096);
    layer.features.push(Feature::new(None, Default::default(), encoder.encode()));
    encode_layers(&[layer]).expect("encode")
}

#[test]
fn buffer_size_option_overrides_the_map() {
    let tile = merged(coord(3, 2, 2), &create_offscreen_road_tile());
    let map = styled_map("roads", Rule::new(vec![Symbolizer::line(Color::BLACK, 8.0)]));
    assert_eq!(map.buffer_size, 0);
    let render = |buffer_size: Option<i32>| {
        let options = RenderOptions {
            buffer_size,
            ..RenderOptions::default()
        };
        let mut image = RgbaImage::new(256, 256);
        render_mvt_merc(&tile, &map, &mut image, &SimpleRasterizer, None, &options).expect("render");
        image
    };

    let clipped = render(None);
    assert!(clipped.pixels().all(|pixel| pixel[3] == 0));

    let buffered = render(Some(8));
    assert_eq!(buffered.get_pixel(128, 0), &Rgba([0, 0, 0, 255]));
    assert_eq!(buffered.get_pixel(128, 1), &Rgba([0, 0, 0, 255]));
    assert_eq!(buffered.get_pixel(128, 10)[3], 0);
}

#[test]
fn rules_outside_the_scale_range_draw_nothing() {
    let tile = merged(coord(3, 2, 2), &create_land_tile());
    let rule = Rule::new(vec![Symbolizer::polygon(Color([255, 0, 0, 255]))]).with_scale_range(0.0, 1_000.0);
    let map = styled_map("land", rule);
    let mut image = RgbaImage::new(64, 64);
    let report = render_mvt_merc(
        &tile,
        &map,
        &mut image,
        &SimpleRasterizer,
        None,
        &RenderOptions::default(),
    )
    .expect("render");
    assert_eq!(report.features_rendered, 0);
    assert!(image.pixels().all(|pixel| pixel[3] == 0));
}

#[test]
fn non_positive_scale_factor_renders_like_one() {
    let tile = merged(coord(3, 2, 2), &create_poi_tile());
    let map = styled_map("pois", Rule::new(vec![Symbolizer::markers(Color::BLACK, 4.0)]));
    let render = |scale_factor: f64| {
        let mut image = RgbaImage::new(128, 128);
        let options = RenderOptions {
            scale_factor,
            ..RenderOptions::default()
        };
        render_mvt_merc(&tile, &map, &mut image, &SimpleRasterizer, None, &options).expect("render");
        image
    };
    assert_eq!(render(0.0), render(1.0));
    assert_eq!(render(-2.0), render(1.0));
    assert_ne!(render(3.0), render(1.0));
}

#[test]
fn raster_layers_need_a_raster_symbolizer() {
    let green = RgbaImage::from_pixel(8, 8, Rgba([0, 255, 0, 255]));
    let png = encode_image(&DynamicImage::ImageRgba8(green), "png").expect("png");
    let mut tile = MergedTile::new(coord(4, 3, 3));
    tile.add_image_layer("imagery", png);

    let map = styled_map("imagery", Rule::new(vec![Symbolizer::raster()]));
    let mut image = RgbaImage::new(32, 32);
    render_mvt_merc(&tile, &map, &mut image, &SimpleRasterizer, None, &RenderOptions::default())
        .expect("render");
    assert_eq!(image.get_pixel(16, 16), &Rgba([0, 255, 0, 255]));

    let map = styled_map("imagery", Rule::new(vec![Symbolizer::line(Color::BLACK, 1.0)]));
    let mut image = RgbaImage::new(32, 32);
    render_mvt_merc(&tile, &map, &mut image, &SimpleRasterizer, None, &RenderOptions::default())
        .expect("render");
    assert!(image.pixels().all(|pixel| pixel[3] == 0));
}

#[derive(Default)]
struct RecordingRasterizer {
    calls: RefCell<Vec<(usize, f64, Vec<Vec<usize>>)>>,
}

impl Rasterizer for RecordingRasterizer {
    fn rasterize(
        &self,
        features: &[RenderFeature<'_>],
        rules: &[&Rule],
        _target: &mut RgbaImage,
        params: &RenderParams,
    ) -> vt_render::Result<()> {
        let matched = features.iter().map(|feature| feature.rules.clone()).collect();
        self.calls
            .borrow_mut()
            .push((rules.len(), params.scale_denominator, matched));
        Ok(())
    }
}

#[test]
fn rasterizer_receives_matched_rules_and_scale() {
    let tile = merged(coord(3, 2, 2), &create_poi_tile());
    let mut map = Map::default();
    let everything = Rule::new(vec![Symbolizer::markers(Color::BLACK, 1.0)]);
    let cafes = Rule::new(vec![Symbolizer::markers(Color::GREY, 2.0)])
        .with_filter(&serde_json::json!(["==", "kind", "cafe"]));
    map.insert_style("pois", Style::new(vec![everything, cafes]));
    map.add_layer(MapLayer::new("pois", Datasource::Vector(Vec::new())).with_style("pois"));

    let rasterizer = RecordingRasterizer::default();
    let mut image = RgbaImage::new(256, 256);
    let options = RenderOptions {
        scale_factor: 2.0,
        scale_denominator: Some(5_000.0),
        ..RenderOptions::default()
    };
    render_mvt_merc(&tile, &map, &mut image, &rasterizer, None, &options).expect("render");
    let calls = rasterizer.calls.borrow();
    assert_eq!(calls.len(), 1);
    let (rules, scale_denominator, matched) = &calls[0];
    assert_eq!(*rules, 2);
    assert_eq!(*scale_denominator, 10_000.0);
    assert_eq!(matched, &vec![vec![0, 1], vec![0]]);
}

#[test]
fn preview_outlines_every_layer() {
    let tile = merged(coord(3, 2, 2), &create_road_tile());
    let mut image = RgbaImage::new(256, 256);
    let report = preview_mvt_merc(&tile, &mut image, &SimpleRasterizer).expect("preview");
    assert_eq!(report.layers_rendered, 1);
    assert_eq!(report.features_rendered, 1);
    assert_eq!(image.get_pixel(100, 128), &Rgba([0, 0, 0, 255]));
    assert_eq!(image.get_pixel(100, 20)[3], 0);
}

#[test]
fn custom_preview_needs_a_styled_layer() {
    let tile = merged(coord(3, 2, 2), &create_road_tile());
    let mut image = RgbaImage::new(16, 16);
    let err = preview_mvt_merc_custom(&tile, &Map::default(), &mut image, &SimpleRasterizer)
        .expect_err("must fail");
    assert!(matches!(err, TileError::Style(_)));
}
