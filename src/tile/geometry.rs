use geo_types::{Coord, LineString, MultiLineString, MultiPoint, MultiPolygon, Point, Polygon};
use serde::Serialize;

use super::pbf::{zigzag_decode, zigzag_encode};
use crate::error::{Result, TileError};

const CMD_MOVE_TO: u32 = 1;
const CMD_LINE_TO: u32 = 2;
const CMD_CLOSE_PATH: u32 = 7;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum GeomType {
    Unknown,
    Point,
    LineString,
    Polygon,
}

impl GeomType {
    pub fn from_wire(value: u64) -> GeomType {
        match value {
            1 => GeomType::Point,
            2 => GeomType::LineString,
            3 => GeomType::Polygon,
            _ => GeomType::Unknown,
        }
    }

    pub fn as_wire(self) -> u64 {
        match self {
            GeomType::Unknown => 0,
            GeomType::Point => 1,
            GeomType::LineString => 2,
            GeomType::Polygon => 3,
        }
    }

    pub fn filter_name(self) -> &'static str {
        match self {
            GeomType::Point => "Point",
            GeomType::LineString => "LineString",
            GeomType::Polygon => "Polygon",
            GeomType::Unknown => "Unknown",
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum Geometry {
    Vector {
        geom_type: GeomType,
        commands: Vec<u32>,
    },
    Raster(Vec<u8>),
}

fn command(id: u32, count: usize) -> u32 {
    (id & 0x7) | ((count as u32) << 3)
}

#[derive(Debug)]
pub struct GeomEncoder {
    geom_type: GeomType,
    commands: Vec<u32>,
    cursor: (i32, i32),
}

impl GeomEncoder {
    pub fn new(geom_type: GeomType) -> Self {
        GeomEncoder {
            geom_type,
            commands: Vec::new(),
            cursor: (0, 0),
        }
    }

    fn push_point(&mut self, (x, y): (i32, i32)) {
        self.commands.push(zigzag_encode(x.wrapping_sub(self.cursor.0)));
        self.commands.push(zigzag_encode(y.wrapping_sub(self.cursor.1)));
        self.cursor = (x, y);
    }

    pub fn add_points(&mut self, points: &[(i32, i32)]) {
        if points.is_empty() {
            return;
        }
        self.commands.push(command(CMD_MOVE_TO, points.len()));
        for point in points {
            self.push_point(*point);
        }
    }

    pub fn add_line(&mut self, line: &[(i32, i32)]) {
        if line.len() < 2 {
            return;
        }
        self.commands.push(command(CMD_MOVE_TO, 1));
        self.push_point(line[0]);
        self.commands.push(command(CMD_LINE_TO, line.len() - 1));
        for point in &line[1..] {
            self.push_point(*point);
        }
    }

    /// Adds a ring given without its closing point.
    pub fn add_ring(&mut self, ring: &[(i32, i32)]) {
        if ring.len() < 3 {
            return;
        }
        self.add_line(ring);
        self.commands.push(command(CMD_CLOSE_PATH, 1));
    }

    pub fn is_empty(&self) -> bool {
        self.commands.is_empty()
    }

    pub fn encode(self) -> Geometry {
        Geometry::Vector {
            geom_type: self.geom_type,
            commands: self.commands,
        }
    }
}

/// Decodes a command stream into parts; every MoveTo starts a new part and
/// ClosePath repeats the first point of the part.
pub fn decode_parts(commands: &[u32]) -> Result<Vec<Vec<(i32, i32)>>> {
    let mut parts: Vec<Vec<(i32, i32)>> = Vec::new();
    let mut x = 0i32;
    let mut y = 0i32;
    let mut idx = 0;
    while idx < commands.len() {
        let header = commands[idx];
        idx += 1;
        let id = header & 0x7;
        let count = (header >> 3) as usize;
        match id {
            CMD_MOVE_TO | CMD_LINE_TO => {
                if commands.len() - idx < count * 2 {
                    return Err(TileError::malformed("geometry command exceeds parameters"));
                }
                for _ in 0..count {
                    x = x.wrapping_add(zigzag_decode(commands[idx]));
                    y = y.wrapping_add(zigzag_decode(commands[idx + 1]));
                    idx += 2;
                    if id == CMD_MOVE_TO {
                        parts.push(vec![(x, y)]);
                    } else {
                        let part = parts
                            .last_mut()
                            .ok_or_else(|| TileError::malformed("LineTo before MoveTo"))?;
                        part.push((x, y));
                    }
                }
            }
            CMD_CLOSE_PATH => {
                let part = parts
                    .last_mut()
                    .ok_or_else(|| TileError::malformed("ClosePath before MoveTo"))?;
                let first = part[0];
                part.push(first);
            }
            other => {
                return Err(TileError::malformed(format!("unknown geometry command {other}")));
            }
        }
    }
    Ok(parts)
}

/// Signed area using the surveyor's formula; positive for exterior rings in
/// tile space (y grows downwards).
pub fn ring_area(ring: &[(i32, i32)]) -> f64 {
    if ring.len() < 3 {
        return 0.0;
    }
    let mut sum = 0.0;
    for idx in 0..ring.len() {
        let (x1, y1) = ring[idx];
        let (x2, y2) = ring[(idx + 1) % ring.len()];
        sum += f64::from(x1) * f64::from(y2) - f64::from(x2) * f64::from(y1);
    }
    sum / 2.0
}

fn to_coords(part: &[(i32, i32)]) -> Vec<Coord<f64>> {
    part.iter()
        .map(|(x, y)| Coord {
            x: f64::from(*x),
            y: f64::from(*y),
        })
        .collect()
}

pub fn to_geo(geom_type: GeomType, commands: &[u32]) -> Result<Option<geo_types::Geometry<f64>>> {
    let parts = decode_parts(commands)?;
    if parts.is_empty() {
        return Ok(None);
    }
    let geometry = match geom_type {
        GeomType::Unknown => return Ok(None),
        GeomType::Point => {
            let mut points: Vec<Point<f64>> = parts
                .iter()
                .flatten()
                .map(|(x, y)| Point::new(f64::from(*x), f64::from(*y)))
                .collect();
            if points.len() == 1 {
                geo_types::Geometry::Point(points.remove(0))
            } else {
                geo_types::Geometry::MultiPoint(MultiPoint(points))
            }
        }
        GeomType::LineString => {
            let mut lines: Vec<LineString<f64>> = parts
                .iter()
                .filter(|part| part.len() >= 2)
                .map(|part| LineString(to_coords(part)))
                .collect();
            match lines.len() {
                0 => return Ok(None),
                1 => geo_types::Geometry::LineString(lines.remove(0)),
                _ => geo_types::Geometry::MultiLineString(MultiLineString(lines)),
            }
        }
        GeomType::Polygon => {
            let mut polygons: Vec<(LineString<f64>, Vec<LineString<f64>>)> = Vec::new();
            for part in &parts {
                let area = ring_area(part);
                if area > 0.0 {
                    polygons.push((LineString(to_coords(part)), Vec::new()));
                } else if area < 0.0 {
                    match polygons.last_mut() {
                        Some((_, holes)) => holes.push(LineString(to_coords(part))),
                        None => {
                            return Err(TileError::malformed("polygon starts with an interior ring"));
                        }
                    }
                }
            }
            let mut polygons: Vec<Polygon<f64>> = polygons
                .into_iter()
                .map(|(exterior, holes)| Polygon::new(exterior, holes))
                .collect();
            match polygons.len() {
                0 => return Ok(None),
                1 => geo_types::Geometry::Polygon(polygons.remove(0)),
                _ => geo_types::Geometry::MultiPolygon(MultiPolygon(polygons)),
            }
        }
    };
    Ok(Some(geometry))
}
