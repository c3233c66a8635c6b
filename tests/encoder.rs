use geo_types::{LineString, Point, Polygon};
use image::{DynamicImage, Rgba, RgbaImage};
use mvt_reader::Reader;
use vt_render::compression::{decompress_mvt, is_compressed};
use vt_render::encoder::{EncodeOptions, Encoder, create_mvt_merc};
use vt_render::map::{Color, Datasource, Map, MapLayer, Rule, SourceFeature, Style, Symbolizer};
use vt_render::tile::TileInfo;
use vt_render::TileCoordinate;

// Tile 12/2048/2047 spans [0, SIDE] in both mercator axes.
const SIDE: f64 = 9_783.939_620_502_56;

fn tile() -> TileCoordinate {
    TileCoordinate::new(12, 2048, 2047).expect("coord")
}

fn square(min: f64, max: f64) -> geo_types::Geometry<f64> {
    Polygon::new(
        LineString::from(vec![(min, min), (max, min), (max, max), (min, max), (min, min)]),
        vec![],
    )
    .into()
}

fn two_layer_map() -> Map {
    let mut map = Map::default();
    let l1 = Rule::new(vec![Symbolizer::markers(Color::BLACK, 2.0)])
        .with_filter(&serde_json::json!(["==", "kind", "cafe"]))
        .with_scale_range(100_000.0, 300_000.0);
    let l2 = Rule::new(vec![Symbolizer::polygon(Color::GREY)]).with_scale_range(300_000.0, 500_000.0);
    map.insert_style("l1", Style::new(vec![l1]));
    map.insert_style("l2", Style::new(vec![l2]));
    map.add_layer(
        MapLayer::new(
            "L1",
            Datasource::Vector(vec![
                SourceFeature::new(Some(1), Point::new(1_000.0, 2_000.0).into()).with_property("kind", "cafe"),
                SourceFeature::new(Some(2), Point::new(3_000.0, 4_000.0).into()).with_property("kind", "bank"),
            ]),
        )
        .with_style("l1"),
    );
    map.add_layer(
        MapLayer::new(
            "L2",
            Datasource::Vector(vec![SourceFeature::new(Some(3), square(1_000.0, 5_000.0))]),
        )
        .with_style("l2"),
    );
    map
}

fn layer_counts(buffer: &[u8]) -> Vec<(String, usize)> {
    let reader = Reader::new(buffer.to_vec()).expect("decode");
    reader
        .get_layer_metadata()
        .expect("layers")
        .into_iter()
        .map(|layer| {
            let count = reader.get_features(layer.layer_index).expect("features").len();
            (layer.name, count)
        })
        .collect()
}

#[test]
fn style_level_filter_drops_inactive_layers_and_features() {
    let map = two_layer_map();
    let unfiltered = EncodeOptions {
        style_level_filter: false,
        scale_denom: Some(200_000.0),
        ..EncodeOptions::default()
    };
    let filtered = EncodeOptions {
        style_level_filter: true,
        ..unfiltered.clone()
    };

    let all = create_mvt_merc(&map, &tile(), &unfiltered).expect("encode");
    assert_eq!(
        layer_counts(&all),
        vec![("L1".to_string(), 2), ("L2".to_string(), 1)]
    );
    let styled = create_mvt_merc(&map, &tile(), &filtered).expect("encode");
    assert_eq!(layer_counts(&styled), vec![("L1".to_string(), 1)]);

    for _ in 0..3 {
        assert_eq!(create_mvt_merc(&map, &tile(), &unfiltered).expect("encode"), all);
        assert_eq!(create_mvt_merc(&map, &tile(), &filtered).expect("encode"), styled);
    }
}

#[test]
fn scale_denominator_selects_active_rules() {
    let map = two_layer_map();
    let options = EncodeOptions {
        scale_denom: Some(400_000.0),
        ..EncodeOptions::default()
    };
    let buffer = create_mvt_merc(&map, &tile(), &options).expect("encode");
    assert_eq!(layer_counts(&buffer), vec![("L2".to_string(), 1)]);

    // z12 at 256px resolves to roughly 1:136k, inside L1's range.
    let derived = create_mvt_merc(&map, &tile(), &EncodeOptions::default()).expect("encode");
    assert_eq!(layer_counts(&derived), vec![("L1".to_string(), 1)]);
}

#[test]
fn features_keep_ids_and_properties() {
    let map = two_layer_map();
    let options = EncodeOptions {
        scale_denom: Some(200_000.0),
        ..EncodeOptions::default()
    };
    let buffer = create_mvt_merc(&map, &tile(), &options).expect("encode");
    let info = TileInfo::parse(&buffer).expect("parse");
    let layer = info.layers(0).expect("layer");
    assert_eq!(layer.extent, 4096);
    let feature = layer.features(0).expect("feature");
    assert_eq!(feature.id(), Some(1));
    assert_eq!(feature.get("kind").and_then(|v| v.as_str()), Some("cafe"));
    let geo_types::Geometry::Point(point) = feature.to_geo().expect("decode").expect("geometry") else {
        panic!("expected a point");
    };
    let expected_x = (1_000.0 / SIDE * 4096.0_f64).round();
    let expected_y = ((SIDE - 2_000.0) / SIDE * 4096.0_f64).round();
    assert_eq!((point.x(), point.y()), (expected_x, expected_y));
}

#[test]
fn buffer_size_comes_from_map_unless_overridden() {
    let mut map = Map::default();
    map.buffer_size = 64;
    let meters_per_unit = SIDE / 4096.0;
    let near = Point::new(SIDE + 40.0 * meters_per_unit, SIDE / 2.0);
    let far = Point::new(SIDE + 200.0 * meters_per_unit, SIDE / 2.0);
    map.add_layer(MapLayer::new(
        "edge",
        Datasource::Vector(vec![
            SourceFeature::new(Some(1), near.into()),
            SourceFeature::new(Some(2), far.into()),
        ]),
    ));
    let buffered = EncodeOptions {
        style_level_filter: false,
        ..EncodeOptions::default()
    };
    let buffer = create_mvt_merc(&map, &tile(), &buffered).expect("encode");
    assert_eq!(layer_counts(&buffer), vec![("edge".to_string(), 1)]);
    let info = TileInfo::parse(&buffer).expect("parse");
    let feature = info.layers(0).expect("layer").features(0).expect("feature");
    assert_eq!(feature.id(), Some(1));
    let geo_types::Geometry::Point(point) = feature.to_geo().expect("decode").expect("geometry") else {
        panic!("expected a point");
    };
    assert_eq!((point.x(), point.y()), (4136.0, 2048.0));

    let unbuffered = EncodeOptions {
        buffer_size: Some(0),
        ..buffered
    };
    let buffer = create_mvt_merc(&map, &tile(), &unbuffered).expect("encode");
    assert!(buffer.is_empty());
}

#[test]
fn huge_buffers_clamp_coordinates_far_from_the_tile() {
    let mut map = Map::default();
    map.add_layer(MapLayer::new(
        "equator",
        Datasource::Vector(vec![SourceFeature::new(
            None,
            LineString::from(vec![(-2.0e7, 0.0), (2.0e7, 0.0)]).into(),
        )]),
    ));
    let options = EncodeOptions {
        style_level_filter: false,
        buffer_size: Some(i32::MAX),
        ..EncodeOptions::default()
    };
    let coord = TileCoordinate::new(20, 524_288, 524_287).expect("coord");
    let buffer = create_mvt_merc(&map, &coord, &options).expect("encode");
    let info = TileInfo::parse(&buffer).expect("parse");
    let feature = info.layers(0).expect("layer").features(0).expect("feature");
    let geo_types::Geometry::LineString(line) = feature.to_geo().expect("decode").expect("geometry") else {
        panic!("expected a line");
    };
    let limit = f64::from(1_i32 << 30) - 1.0;
    let coords: Vec<(f64, f64)> = line.coords().map(|c| (c.x, c.y)).collect();
    assert_eq!(coords, vec![(-limit, 4096.0), (limit, 4096.0)]);
}

#[test]
fn polygons_are_clipped_to_the_buffered_tile() {
    let mut map = Map::default();
    map.add_layer(MapLayer::new(
        "land",
        Datasource::Vector(vec![SourceFeature::new(None, square(-50_000.0, 50_000.0))]),
    ));
    let options = EncodeOptions {
        style_level_filter: false,
        ..EncodeOptions::default()
    };
    let buffer = create_mvt_merc(&map, &tile(), &options).expect("encode");
    let info = TileInfo::parse(&buffer).expect("parse");
    let feature = info.layers(0).expect("layer").features(0).expect("feature");
    let geo_types::Geometry::Polygon(polygon) = feature.to_geo().expect("decode").expect("geometry") else {
        panic!("expected a polygon");
    };
    for coord in polygon.exterior().coords() {
        assert!((0.0..=4096.0).contains(&coord.x), "x out of tile: {coord:?}");
        assert!((0.0..=4096.0).contains(&coord.y), "y out of tile: {coord:?}");
    }
}

#[test]
fn raster_layers_embed_an_encoded_image() {
    let mut map = Map::default();
    let image = RgbaImage::from_pixel(16, 16, Rgba([200, 10, 10, 255]));
    map.insert_style("imagery", Style::new(vec![Rule::new(vec![Symbolizer::raster()])]));
    map.add_layer(
        MapLayer::new(
            "imagery",
            Datasource::Raster {
                image: DynamicImage::ImageRgba8(image),
                extent: tile().extent(),
            },
        )
        .with_style("imagery"),
    );
    let buffer = create_mvt_merc(&map, &tile(), &EncodeOptions::default()).expect("encode");
    let info = TileInfo::parse(&buffer).expect("parse");
    assert_eq!(info.summary()[0].raster_features, 1);
    let feature = info.layers(0).expect("layer").features(0).expect("feature");
    let decoded = feature.raster_image().expect("image");
    assert_eq!((decoded.width(), decoded.height()), (256, 256));
    assert_eq!(decoded.to_rgba8().get_pixel(128, 128), &Rgba([200, 10, 10, 255]));
}

#[test]
fn unstyled_raster_needs_the_filter_off() {
    let mut map = Map::default();
    let image = RgbaImage::from_pixel(4, 4, Rgba([0, 0, 255, 255]));
    map.add_layer(MapLayer::new(
        "imagery",
        Datasource::Raster {
            image: DynamicImage::ImageRgba8(image),
            extent: tile().extent(),
        },
    ));
    let styled = create_mvt_merc(&map, &tile(), &EncodeOptions::default()).expect("encode");
    assert!(styled.is_empty());
    let options = EncodeOptions {
        style_level_filter: false,
        image_format: Some("jpeg:quality=70".to_string()),
        ..EncodeOptions::default()
    };
    let buffer = create_mvt_merc(&map, &tile(), &options).expect("encode");
    let info = TileInfo::parse(&buffer).expect("parse");
    let data = info.layers(0).expect("layer").features(0).expect("feature").raster().expect("raster");
    assert_eq!(&data[..2], &[0xff, 0xd8]);
}

#[test]
fn compress_option_wraps_the_buffer() {
    let map = two_layer_map();
    let plain = EncodeOptions {
        scale_denom: Some(200_000.0),
        ..EncodeOptions::default()
    };
    let compressed = EncodeOptions {
        compress: true,
        ..plain.clone()
    };
    let raw = create_mvt_merc(&map, &tile(), &plain).expect("encode");
    let packed = create_mvt_merc(&map, &tile(), &compressed).expect("encode");
    assert!(is_compressed(&packed));
    assert_eq!(decompress_mvt(&packed).expect("decompress"), raw);
}

#[test]
fn one_encoder_serves_many_tiles() {
    let map = two_layer_map();
    let options = EncodeOptions {
        style_level_filter: false,
        ..EncodeOptions::default()
    };
    let encoder = Encoder::new(&map, &options).expect("encoder");
    let here = encoder.encode_tile(&tile()).expect("encode");
    let elsewhere = encoder
        .encode_tile(&TileCoordinate::new(12, 100, 100).expect("coord"))
        .expect("encode");
    assert!(!here.is_empty());
    assert!(elsewhere.is_empty());
}
