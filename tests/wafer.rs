use vt_render::encoder::{EncodeOptions, create_mvt_merc};
use vt_render::map::Map;
use vt_render::tile::TileInfo;
use vt_render::wafer::{WaferFailurePolicy, create_mvt_wafer_merc};
use vt_render::{TileCoordinate, TileError};

fn equator_square_map() -> Map {
    let json = r#"{
        "layers": [{"name": "box", "datasource": {"type": "geojson", "data": {
            "type": "FeatureCollection",
            "features": [{"type": "Feature", "id": 1, "properties": {"name": "square"},
                "geometry": {"type": "Polygon", "coordinates": [[
                    [-10, -10], [10, -10], [10, 10], [-10, 10], [-10, -10]
                ]]}}]
        }}}]
    }"#;
    Map::from_json(json).expect("map")
}

fn unfiltered() -> EncodeOptions {
    EncodeOptions {
        style_level_filter: false,
        ..EncodeOptions::default()
    }
}

#[test]
fn full_zoom_three_grid_is_row_major() {
    let map = equator_square_map();
    let origin = TileCoordinate::new(3, 0, 0).expect("coord");
    let wafer = create_mvt_wafer_merc(&map, &origin, 8, &unfiltered(), WaferFailurePolicy::default())
        .expect("wafer");
    assert_eq!(wafer.len(), 64);

    let info = TileInfo::parse(&wafer[27]).expect("parse");
    assert_eq!(info.layers_size(), 1);
    let layer = info.layers(0).expect("layer");
    assert_eq!(layer.name(), "box");
    assert_eq!(layer.features_size(), 1);

    let painted: Vec<usize> = wafer
        .iter()
        .enumerate()
        .filter(|(_, buffer)| !buffer.is_empty())
        .map(|(idx, _)| idx)
        .collect();
    assert_eq!(painted, vec![27, 28, 35, 36]);
}

#[test]
fn cells_match_single_tile_encoding() {
    let map = equator_square_map();
    let origin = TileCoordinate::new(3, 3, 3).expect("coord");
    let options = unfiltered();
    let wafer = create_mvt_wafer_merc(&map, &origin, 2, &options, WaferFailurePolicy::Propagate)
        .expect("wafer");
    for (idx, buffer) in wafer.iter().enumerate() {
        let idx = idx as u32;
        let coord = TileCoordinate::new(3, 3 + idx % 2, 3 + idx / 2).expect("coord");
        assert_eq!(buffer, &create_mvt_merc(&map, &coord, &options).expect("encode"));
    }
}

#[test]
fn out_of_world_cells_follow_the_policy() {
    let map = equator_square_map();
    let origin = TileCoordinate::new(3, 6, 3).expect("coord");
    let wafer = create_mvt_wafer_merc(&map, &origin, 3, &unfiltered(), WaferFailurePolicy::EmptyBuffer)
        .expect("wafer");
    assert_eq!(wafer.len(), 9);
    assert!(wafer[2].is_empty());

    let err = create_mvt_wafer_merc(&map, &origin, 3, &unfiltered(), WaferFailurePolicy::Propagate)
        .expect_err("must fail");
    assert!(matches!(err, TileError::InvalidCoordinate { z: 3, x: 8, y: 3 }));
}

#[test]
fn empty_grid_yields_no_buffers() {
    let map = equator_square_map();
    let origin = TileCoordinate::new(3, 0, 0).expect("coord");
    let wafer = create_mvt_wafer_merc(&map, &origin, 0, &unfiltered(), WaferFailurePolicy::default())
        .expect("wafer");
    assert!(wafer.is_empty());
}
