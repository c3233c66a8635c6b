use std::fmt;

use serde::Serialize;

use crate::error::{Result, TileError};

/// Half the side of the spherical web-mercator world square, in meters.
pub const EARTH_BOUND: f64 = 20_037_508.342_789_244;

/// Standardized rendering pixel size (0.28 mm) used for scale denominators.
const OGC_PIXEL_SIZE: f64 = 0.00028;

pub const MAX_ZOOM: u8 = 32;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
pub struct TileCoordinate {
    pub z: u8,
    pub x: u32,
    pub y: u32,
}

impl TileCoordinate {
    pub fn new(z: u8, x: u32, y: u32) -> Result<Self> {
        let coord = TileCoordinate { z, x, y };
        if z > MAX_ZOOM || u64::from(x) >= tiles_per_side(z) || u64::from(y) >= tiles_per_side(z) {
            return Err(TileError::InvalidCoordinate { z, x, y });
        }
        Ok(coord)
    }

    pub fn extent(&self) -> BBox {
        let side = tile_side(self.z);
        let min_x = -EARTH_BOUND + f64::from(self.x) * side;
        let max_y = EARTH_BOUND - f64::from(self.y) * side;
        BBox {
            min_x,
            min_y: max_y - side,
            max_x: min_x + side,
            max_y,
        }
    }

    pub fn is_descendant_of(&self, base: &TileCoordinate) -> bool {
        if self.z < base.z {
            return false;
        }
        let dz = u32::from(self.z - base.z);
        (u64::from(self.x) >> dz) == u64::from(base.x)
            && (u64::from(self.y) >> dz) == u64::from(base.y)
    }
}

impl fmt::Display for TileCoordinate {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}/{}", self.z, self.x, self.y)
    }
}

fn tiles_per_side(z: u8) -> u64 {
    1u64 << u32::from(z.min(MAX_ZOOM))
}

pub fn tile_side(z: u8) -> f64 {
    2.0 * EARTH_BOUND / tiles_per_side(z) as f64
}

/// Scale denominator of a tile rendered at `tile_size` pixels.
pub fn scale_denominator(z: u8, tile_size: u32) -> f64 {
    tile_side(z) / f64::from(tile_size.max(1)) / OGC_PIXEL_SIZE
}

pub fn scale_denominator_for_resolution(meters_per_pixel: f64) -> f64 {
    meters_per_pixel / OGC_PIXEL_SIZE
}

pub const MAX_LATITUDE: f64 = 85.051_128_779_806_59;

pub fn lonlat_to_mercator(lon: f64, lat: f64) -> (f64, f64) {
    let lat = lat.clamp(-MAX_LATITUDE, MAX_LATITUDE);
    let x = lon * EARTH_BOUND / 180.0;
    let y = ((90.0 + lat) * std::f64::consts::PI / 360.0).tan().ln() * EARTH_BOUND
        / std::f64::consts::PI;
    (x, y)
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct BBox {
    pub min_x: f64,
    pub min_y: f64,
    pub max_x: f64,
    pub max_y: f64,
}

impl BBox {
    pub fn new(min_x: f64, min_y: f64, max_x: f64, max_y: f64) -> Self {
        BBox {
            min_x,
            min_y,
            max_x,
            max_y,
        }
    }

    pub fn width(&self) -> f64 {
        self.max_x - self.min_x
    }

    pub fn height(&self) -> f64 {
        self.max_y - self.min_y
    }

    pub fn buffered(&self, amount: f64) -> BBox {
        BBox {
            min_x: self.min_x - amount,
            min_y: self.min_y - amount,
            max_x: self.max_x + amount,
            max_y: self.max_y + amount,
        }
    }

    pub fn intersects(&self, other: &BBox) -> bool {
        self.min_x <= other.max_x
            && other.min_x <= self.max_x
            && self.min_y <= other.max_y
            && other.min_y <= self.max_y
    }

    /// Overlapping area, `None` when the boxes only touch or are disjoint.
    pub fn intersection(&self, other: &BBox) -> Option<BBox> {
        let bbox = BBox {
            min_x: self.min_x.max(other.min_x),
            min_y: self.min_y.max(other.min_y),
            max_x: self.max_x.min(other.max_x),
            max_y: self.max_y.min(other.max_y),
        };
        (bbox.min_x < bbox.max_x && bbox.min_y < bbox.max_y).then_some(bbox)
    }

    pub fn contains(&self, x: f64, y: f64) -> bool {
        x >= self.min_x && x <= self.max_x && y >= self.min_y && y <= self.max_y
    }

    pub fn expand_to(&mut self, x: f64, y: f64) {
        self.min_x = self.min_x.min(x);
        self.min_y = self.min_y.min(y);
        self.max_x = self.max_x.max(x);
        self.max_y = self.max_y.max(y);
    }

    pub fn empty() -> BBox {
        BBox {
            min_x: f64::INFINITY,
            min_y: f64::INFINITY,
            max_x: f64::NEG_INFINITY,
            max_y: f64::NEG_INFINITY,
        }
    }

    pub fn is_empty(&self) -> bool {
        self.min_x > self.max_x || self.min_y > self.max_y
    }
}

/// Maps coordinates normalized to a base tile (0..1) into coordinates
/// normalized to a descendant tile.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct AffineParams {
    pub scale: f64,
    pub offset_x: f64,
    pub offset_y: f64,
}

impl AffineParams {
    pub fn identity() -> Self {
        AffineParams {
            scale: 1.0,
            offset_x: 0.0,
            offset_y: 0.0,
        }
    }

    pub fn apply(&self, x: f64, y: f64) -> (f64, f64) {
        (x * self.scale - self.offset_x, y * self.scale - self.offset_y)
    }

    pub fn invert(&self, x: f64, y: f64) -> (f64, f64) {
        ((x + self.offset_x) / self.scale, (y + self.offset_y) / self.scale)
    }
}

pub fn overzoom_transform(base: &TileCoordinate, target: &TileCoordinate) -> Result<AffineParams> {
    if !target.is_descendant_of(base) {
        return Err(TileError::InvalidOverzoom {
            base: *base,
            target: *target,
        });
    }
    let dz = u32::from(target.z - base.z);
    let factor = (1u64 << dz) as f64;
    Ok(AffineParams {
        scale: factor,
        offset_x: f64::from(target.x) - f64::from(base.x) * factor,
        offset_y: f64::from(target.y) - f64::from(base.y) * factor,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn approx(a: f64, b: f64) -> bool {
        (a - b).abs() < 1e-6
    }

    #[test]
    fn world_tile_covers_the_whole_bound() {
        let bbox = TileCoordinate::new(0, 0, 0).expect("coord").extent();
        assert!(approx(bbox.min_x, -EARTH_BOUND));
        assert!(approx(bbox.max_x, EARTH_BOUND));
        assert!(approx(bbox.min_y, -EARTH_BOUND));
        assert!(approx(bbox.max_y, EARTH_BOUND));
    }

    #[test]
    fn tile_rows_count_from_the_top() {
        let bbox = TileCoordinate::new(1, 1, 1).expect("coord").extent();
        assert!(approx(bbox.min_x, 0.0));
        assert!(approx(bbox.max_x, EARTH_BOUND));
        assert!(approx(bbox.min_y, -EARTH_BOUND));
        assert!(approx(bbox.max_y, 0.0));
        assert!(approx(tile_side(1), EARTH_BOUND));
    }

    #[test]
    fn rejects_out_of_range_coordinates() {
        assert!(TileCoordinate::new(3, 8, 0).is_err());
        assert!(TileCoordinate::new(3, 0, 8).is_err());
        assert!(TileCoordinate::new(3, 7, 7).is_ok());
    }

    #[test]
    fn projects_lonlat_corners() {
        let (x, y) = lonlat_to_mercator(180.0, MAX_LATITUDE);
        assert!((x - EARTH_BOUND).abs() < 1e-6);
        assert!((y - EARTH_BOUND).abs() < 1e-3);
        let (x, y) = lonlat_to_mercator(0.0, 0.0);
        assert!(approx(x, 0.0) && approx(y, 0.0));
    }

    #[test]
    fn scale_denominator_at_zoom_zero() {
        let denom = scale_denominator(0, 256);
        assert!((denom - 559_082_264.028_717_8).abs() < 1e-3);
        assert!(approx(scale_denominator(1, 256) * 2.0, denom));
    }

    #[test]
    fn overzoom_same_tile_is_identity() {
        let base = TileCoordinate::new(5, 28, 12).expect("coord");
        let params = overzoom_transform(&base, &base).expect("params");
        assert_eq!(params, AffineParams::identity());
    }

    #[test]
    fn overzoom_maps_descendant_quadrant() {
        let base = TileCoordinate::new(1, 1, 0).expect("coord");
        let target = TileCoordinate::new(2, 3, 1).expect("coord");
        let params = overzoom_transform(&base, &target).expect("params");
        assert!(approx(params.scale, 2.0));
        let (x, y) = params.apply(0.5, 0.5);
        assert!(approx(x, 0.0));
        assert!(approx(y, 0.0));
        let (x, y) = params.apply(1.0, 1.0);
        assert!(approx(x, 1.0));
        assert!(approx(y, 1.0));
        let (bx, by) = params.invert(1.0, 1.0);
        assert!(approx(bx, 1.0));
        assert!(approx(by, 1.0));
    }

    #[test]
    fn overzoom_rejects_lower_zoom_and_foreign_tiles() {
        let base = TileCoordinate::new(5, 28, 12).expect("coord");
        let coarser = TileCoordinate::new(4, 14, 6).expect("coord");
        assert!(matches!(
            overzoom_transform(&base, &coarser),
            Err(TileError::InvalidOverzoom { .. })
        ));
        let outside = TileCoordinate::new(6, 58, 24).expect("coord");
        assert!(overzoom_transform(&base, &outside).is_err());
        let inside = TileCoordinate::new(6, 57, 25).expect("coord");
        assert!(overzoom_transform(&base, &inside).is_ok());
    }

    #[test]
    fn large_overzoom_stays_within_parent() {
        let base = TileCoordinate::new(14, 2788, 6533).expect("coord");
        let target = TileCoordinate::new(24, 2_855_279, 6_690_105).expect("coord");
        let params = overzoom_transform(&base, &target).expect("params");
        assert!(approx(params.scale, 1024.0));
        assert!(params.offset_x >= 0.0 && params.offset_x < 1024.0);
        assert!(params.offset_y >= 0.0 && params.offset_y < 1024.0);
    }
}
