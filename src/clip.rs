use geo_types::{Coord, LineString, Polygon};

use crate::coord::BBox;
use crate::tile::{GeomEncoder, GeomType, Geometry, ring_area};

// Keeps the delta between any two projected points inside i32.
const GRID_LIMIT: f64 = 1_073_741_823.0;

#[derive(Debug, Clone, Copy)]
pub struct TileGrid {
    bbox: BBox,
    extent: u32,
}

impl TileGrid {
    pub fn new(bbox: BBox, extent: u32) -> Self {
        TileGrid { bbox, extent }
    }

    pub fn extent(&self) -> u32 {
        self.extent
    }

    pub fn project(&self, coord: Coord<f64>) -> (i32, i32) {
        let extent = f64::from(self.extent);
        let x = (coord.x - self.bbox.min_x) / self.bbox.width() * extent;
        let y = (self.bbox.max_y - coord.y) / self.bbox.height() * extent;
        let snap = |value: f64| value.round().clamp(-GRID_LIMIT, GRID_LIMIT) as i32;
        (snap(x), snap(y))
    }

    fn project_path(&self, coords: &[Coord<f64>]) -> Vec<(i32, i32)> {
        let mut out: Vec<(i32, i32)> = Vec::with_capacity(coords.len());
        for coord in coords {
            let point = self.project(*coord);
            if out.last() != Some(&point) {
                out.push(point);
            }
        }
        out
    }
}

/// Clips `geometry` to `clip` and encodes it on `grid`. Returns `None` when
/// nothing survives clipping and quantization.
pub fn encode_geometry(
    geometry: &geo_types::Geometry<f64>,
    clip: &BBox,
    grid: &TileGrid,
) -> Option<Geometry> {
    use geo_types::Geometry as G;
    let encoder = match geometry {
        G::Point(point) => encode_points(std::slice::from_ref(&point.0), clip, grid),
        G::MultiPoint(points) => {
            let coords: Vec<Coord<f64>> = points.iter().map(|point| point.0).collect();
            encode_points(&coords, clip, grid)
        }
        G::Line(line) => encode_lines(&[LineString(vec![line.start, line.end])], clip, grid),
        G::LineString(line) => encode_lines(std::slice::from_ref(line), clip, grid),
        G::MultiLineString(lines) => encode_lines(&lines.0, clip, grid),
        G::Polygon(polygon) => encode_polygons(std::slice::from_ref(polygon), clip, grid),
        G::MultiPolygon(polygons) => encode_polygons(&polygons.0, clip, grid),
        G::Rect(rect) => encode_polygons(&[rect.to_polygon()], clip, grid),
        G::Triangle(triangle) => encode_polygons(&[triangle.to_polygon()], clip, grid),
        G::GeometryCollection(_) => return None,
    };
    if encoder.is_empty() {
        None
    } else {
        Some(encoder.encode())
    }
}

fn encode_points(coords: &[Coord<f64>], clip: &BBox, grid: &TileGrid) -> GeomEncoder {
    let points: Vec<(i32, i32)> = coords
        .iter()
        .filter(|coord| clip.contains(coord.x, coord.y))
        .map(|coord| grid.project(*coord))
        .collect();
    let mut encoder = GeomEncoder::new(GeomType::Point);
    encoder.add_points(&points);
    encoder
}

fn encode_lines(lines: &[LineString<f64>], clip: &BBox, grid: &TileGrid) -> GeomEncoder {
    let mut encoder = GeomEncoder::new(GeomType::LineString);
    for line in lines {
        for part in clip_line(&line.0, clip) {
            let path = grid.project_path(&part);
            if path.len() >= 2 {
                encoder.add_line(&path);
            }
        }
    }
    encoder
}

fn encode_polygons(polygons: &[Polygon<f64>], clip: &BBox, grid: &TileGrid) -> GeomEncoder {
    let mut encoder = GeomEncoder::new(GeomType::Polygon);
    for polygon in polygons {
        let Some(exterior) = quantize_ring(polygon.exterior(), clip, grid, true) else {
            continue;
        };
        encoder.add_ring(&exterior);
        for interior in polygon.interiors() {
            if let Some(ring) = quantize_ring(interior, clip, grid, false) {
                encoder.add_ring(&ring);
            }
        }
    }
    encoder
}

/// Clips and quantizes a ring, returning it open (without the closing point)
/// and wound positive for exteriors, negative for interiors.
fn quantize_ring(
    ring: &LineString<f64>,
    clip: &BBox,
    grid: &TileGrid,
    exterior: bool,
) -> Option<Vec<(i32, i32)>> {
    let clipped = clip_ring(&ring.0, clip);
    let mut path = grid.project_path(&clipped);
    while path.len() > 1 && path.first() == path.last() {
        path.pop();
    }
    if path.len() < 3 {
        return None;
    }
    let area = ring_area(&path);
    if area == 0.0 {
        return None;
    }
    if (area > 0.0) != exterior {
        path.reverse();
    }
    Some(path)
}

/// Liang–Barsky segment clipping.
fn clip_segment(a: Coord<f64>, b: Coord<f64>, bbox: &BBox) -> Option<(Coord<f64>, Coord<f64>)> {
    let dx = b.x - a.x;
    let dy = b.y - a.y;
    let mut t0 = 0.0f64;
    let mut t1 = 1.0f64;
    for (p, q) in [
        (-dx, a.x - bbox.min_x),
        (dx, bbox.max_x - a.x),
        (-dy, a.y - bbox.min_y),
        (dy, bbox.max_y - a.y),
    ] {
        if p == 0.0 {
            if q < 0.0 {
                return None;
            }
            continue;
        }
        let r = q / p;
        if p < 0.0 {
            if r > t1 {
                return None;
            }
            t0 = t0.max(r);
        } else {
            if r < t0 {
                return None;
            }
            t1 = t1.min(r);
        }
    }
    let at = |t: f64| Coord {
        x: a.x + t * dx,
        y: a.y + t * dy,
    };
    let start = if t0 == 0.0 { a } else { at(t0) };
    let end = if t1 == 1.0 { b } else { at(t1) };
    Some((start, end))
}

pub fn clip_line(coords: &[Coord<f64>], bbox: &BBox) -> Vec<Vec<Coord<f64>>> {
    let mut parts = Vec::new();
    let mut current: Vec<Coord<f64>> = Vec::new();
    for pair in coords.windows(2) {
        match clip_segment(pair[0], pair[1], bbox) {
            Some((start, end)) => {
                if current.last() != Some(&start) {
                    if current.len() >= 2 {
                        parts.push(std::mem::take(&mut current));
                    }
                    current.clear();
                    current.push(start);
                }
                current.push(end);
                if end != pair[1] {
                    parts.push(std::mem::take(&mut current));
                }
            }
            None => {
                if current.len() >= 2 {
                    parts.push(std::mem::take(&mut current));
                }
                current.clear();
            }
        }
    }
    if current.len() >= 2 {
        parts.push(current);
    }
    parts
}

#[derive(Clone, Copy)]
enum Edge {
    Left,
    Right,
    Bottom,
    Top,
}

impl Edge {
    fn inside(self, c: Coord<f64>, bbox: &BBox) -> bool {
        match self {
            Edge::Left => c.x >= bbox.min_x,
            Edge::Right => c.x <= bbox.max_x,
            Edge::Bottom => c.y >= bbox.min_y,
            Edge::Top => c.y <= bbox.max_y,
        }
    }

    fn intersect(self, a: Coord<f64>, b: Coord<f64>, bbox: &BBox) -> Coord<f64> {
        match self {
            Edge::Left | Edge::Right => {
                let x = if matches!(self, Edge::Left) {
                    bbox.min_x
                } else {
                    bbox.max_x
                };
                let t = (x - a.x) / (b.x - a.x);
                Coord {
                    x,
                    y: a.y + t * (b.y - a.y),
                }
            }
            Edge::Bottom | Edge::Top => {
                let y = if matches!(self, Edge::Bottom) {
                    bbox.min_y
                } else {
                    bbox.max_y
                };
                let t = (y - a.y) / (b.y - a.y);
                Coord {
                    x: a.x + t * (b.x - a.x),
                    y,
                }
            }
        }
    }
}

/// Sutherland–Hodgman ring clipping against the four box edges.
pub fn clip_ring(coords: &[Coord<f64>], bbox: &BBox) -> Vec<Coord<f64>> {
    let mut output: Vec<Coord<f64>> = coords.to_vec();
    if output.len() > 1 && output.first() == output.last() {
        output.pop();
    }
    for edge in [Edge::Left, Edge::Right, Edge::Bottom, Edge::Top] {
        if output.is_empty() {
            break;
        }
        let input = std::mem::take(&mut output);
        let mut prev = input[input.len() - 1];
        for current in input {
            let current_in = edge.inside(current, bbox);
            let prev_in = edge.inside(prev, bbox);
            if current_in {
                if !prev_in {
                    output.push(edge.intersect(prev, current, bbox));
                }
                output.push(current);
            } else if prev_in {
                output.push(edge.intersect(prev, current, bbox));
            }
            prev = current;
        }
    }
    output
}
