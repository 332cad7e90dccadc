//! Geometry recognition: turning WKT text, GeoJSON objects, and lat/lon/
//! radius field hints into indexable geo point and geo shape WKT strings.
//!
//! Only the three geometry primitives are supported - `Point`, `LineString`
//! and `Polygon` - matching the search store's geo field mappings. Multipart
//! geometries are rejected; callers who need them should split them across
//! multiple fields.

use std::collections::BTreeMap;
use std::str::FromStr;

use geo::algorithm::centroid::Centroid;
use geo_types::{Coord, Geometry, LineString, Point, Polygon};
use wkt::Wkt;

use crate::core::error::GeoError;
use crate::model::options::GeoFieldHint;
use crate::model::value::Value;

/// Earth's mean radius in metres, used for the spherical geodesy formulas
/// below. This is an approximation of the WGS84 ellipsoid good enough for
/// the uncertainty-radius circles we build around occurrence records; it is
/// not a substitute for a full geodetic projection library.
const EARTH_RADIUS_M: f64 = 6_371_000.0;

/// Number of quad segments used to approximate a circle as a polygon. This
/// produces 64 distinct vertices plus one repeated closing vertex.
const CIRCLE_QUAD_SEGMENTS: u32 = 16;

/// The WKT pair stored for a recognized geo field: a point (the shape's
/// centroid) and the shape itself.
#[derive(Debug, Clone, PartialEq)]
pub struct GeoMatch {
    /// WKT for the shape's centroid, indexed as a `geo_point` field
    pub point_wkt: String,
    /// WKT for the full shape, indexed as a `geo_shape` field
    pub shape_wkt: String,
}

enum Shape {
    Point(Point<f64>),
    LineString(LineString<f64>),
    Polygon(Polygon<f64>),
}

impl Shape {
    fn to_wkt_geometry(&self) -> Geometry<f64> {
        match self {
            Shape::Point(p) => Geometry::Point(*p),
            Shape::LineString(l) => Geometry::LineString(l.clone()),
            Shape::Polygon(p) => Geometry::Polygon(p.clone()),
        }
    }

    fn centroid(&self) -> Option<Point<f64>> {
        match self {
            Shape::Point(p) => Some(*p),
            Shape::LineString(l) => l.centroid(),
            Shape::Polygon(p) => p.centroid(),
        }
    }

    fn coords(&self) -> Vec<Coord<f64>> {
        match self {
            Shape::Point(p) => vec![p.0],
            Shape::LineString(l) => l.0.clone(),
            Shape::Polygon(p) => {
                let mut coords = p.exterior().0.clone();
                for interior in p.interiors() {
                    coords.extend(interior.0.iter().copied());
                }
                coords
            }
        }
    }
}

fn shape_to_wkt(shape: &Shape) -> String {
    use wkt::ToWkt;
    shape.to_wkt_geometry().wkt_string()
}

fn point_to_wkt(p: Point<f64>) -> String {
    use wkt::ToWkt;
    Geometry::Point(p).wkt_string()
}

/// Checks that a shape is non-empty and every coordinate is a valid
/// longitude/latitude pair (`-180..=180`, `-90..=90`). Does not check
/// winding order; see [`is_winding_valid`] for that.
pub fn is_shape_valid(shape: &Shape) -> bool {
    let coords = shape.coords();
    if coords.is_empty() {
        return false;
    }
    coords
        .iter()
        .all(|c| (-180.0..=180.0).contains(&c.x) && (-90.0..=90.0).contains(&c.y))
}

/// Checks that a polygon's exterior ring is right-wound (clockwise in
/// longitude/latitude space) and every interior ring is left-wound, as
/// RFC 7946 requires.
pub fn is_winding_valid(polygon: &Polygon<f64>) -> bool {
    if !ring_is_clockwise(polygon.exterior()) {
        return false;
    }
    polygon.interiors().iter().all(|ring| !ring_is_clockwise(ring))
}

fn ring_is_clockwise(ring: &LineString<f64>) -> bool {
    let coords = &ring.0;
    if coords.len() < 2 {
        return false;
    }
    let sum: f64 = coords
        .windows(2)
        .map(|w| (w[1].x - w[0].x) * (w[1].y + w[0].y))
        .sum();
    sum < 0.0
}

/// Build a WKT polygon approximating a circle of `radius_in_metres` around
/// `(latitude, longitude)`, using an azimuthal-equidistant-style spherical
/// projection. The resulting ring has 65 vertices (64 distinct points plus
/// the repeated closing vertex) and is right-wound.
pub fn create_polygon_circle(
    latitude: f64,
    longitude: f64,
    radius_in_metres: f64,
) -> Result<Polygon<f64>, GeoError> {
    if radius_in_metres <= 0.0 {
        return Err(GeoError::InvalidCoordinate(
            "radius must be greater than zero".to_string(),
        ));
    }

    let lat0 = latitude.to_radians();
    let lon0 = longitude.to_radians();
    let angular_distance = radius_in_metres / EARTH_RADIUS_M;
    let segment_count = CIRCLE_QUAD_SEGMENTS * 4;

    let mut coords = Vec::with_capacity(segment_count as usize + 1);
    for i in 0..=segment_count {
        let bearing = (i as f64) * (std::f64::consts::TAU / segment_count as f64);
        let (lat, lon) = destination_point(lat0, lon0, angular_distance, bearing);
        coords.push(Coord {
            x: lon.to_degrees(),
            y: lat.to_degrees(),
        });
    }

    let polygon = Polygon::new(LineString::from(coords), vec![]);
    let shape = Shape::Polygon(polygon.clone());
    if !is_shape_valid(&shape) || !is_winding_valid(&polygon) {
        return Err(GeoError::InvalidShape(
            "generated circle failed validation".to_string(),
        ));
    }

    Ok(polygon)
}

/// Spherical direct geodesic problem: given a start point, an angular
/// distance (`distance / earth radius`, in radians) and a bearing measured
/// clockwise from north, find the destination point.
fn destination_point(lat1: f64, lon1: f64, angular_distance: f64, bearing: f64) -> (f64, f64) {
    let lat2 = (lat1.sin() * angular_distance.cos()
        + lat1.cos() * angular_distance.sin() * bearing.cos())
    .asin();
    let lon2 = lon1
        + (bearing.sin() * angular_distance.sin() * lat1.cos())
            .atan2(angular_distance.cos() - lat1.sin() * lat2.sin());
    (lat2, lon2)
}

/// Check each hint against `data`; for every hint whose lat/lon (and, if
/// valid, radius) fields are present and valid, returns a [`GeoMatch`] keyed
/// by the hint's latitude field name.
pub fn match_hints(data: &Value, hints: &[GeoFieldHint]) -> BTreeMap<String, GeoMatch> {
    let mut matches = BTreeMap::new();
    let map = match data.as_map() {
        Some(m) => m,
        None => return matches,
    };

    for hint in hints {
        let lon = match field_as_f64(map, &hint.lon_field) {
            Some(v) => v,
            None => continue,
        };
        let lat = match field_as_f64(map, &hint.lat_field) {
            Some(v) => v,
            None => continue,
        };

        let point = Point::new(lon, lat);
        let point_shape = Shape::Point(point);
        if !is_shape_valid(&point_shape) {
            continue;
        }

        let mut shape = point_shape;
        if let Some(radius_field) = &hint.radius_field {
            if let Some(radius) = field_as_f64(map, radius_field) {
                if radius > 0.0 {
                    if let Ok(circle) = create_polygon_circle(lat, lon, radius) {
                        if is_shape_valid(&Shape::Polygon(circle.clone())) {
                            shape = Shape::Polygon(circle);
                        }
                    }
                }
            }
        }

        matches.insert(
            hint.lat_field.clone(),
            GeoMatch {
                point_wkt: point_to_wkt(point),
                shape_wkt: shape_to_wkt(&shape),
            },
        );
    }

    matches
}

fn field_as_f64(map: &std::collections::BTreeMap<String, Value>, field: &str) -> Option<f64> {
    map.get(field)?.as_str()?.trim().parse::<f64>().ok()
}

/// Try to recognize `candidate` as WKT text describing a Point, LineString
/// or Polygon. Returns `None` if it isn't WKT, isn't one of those three
/// shapes, or fails shape validation.
pub fn match_wkt(candidate: &str) -> Option<GeoMatch> {
    let parsed = Wkt::<f64>::from_str(candidate).ok()?;
    let shape = shape_from_wkt(parsed)?;
    if !is_shape_valid(&shape) {
        return None;
    }
    Some(GeoMatch {
        point_wkt: shape.centroid().map(point_to_wkt)?,
        shape_wkt: shape_to_wkt(&shape),
    })
}

fn shape_from_wkt(wkt: Wkt<f64>) -> Option<Shape> {
    match wkt {
        Wkt::Point(p) => {
            let coord = p.0?;
            Some(Shape::Point(Point::new(coord.x, coord.y)))
        }
        Wkt::LineString(l) => {
            let coords: Vec<Coord<f64>> = l.0.into_iter().map(|c| Coord { x: c.x, y: c.y }).collect();
            Some(Shape::LineString(LineString::from(coords)))
        }
        Wkt::Polygon(p) => {
            let mut rings = p.0.into_iter().map(|ring| {
                let coords: Vec<Coord<f64>> =
                    ring.0.into_iter().map(|c| Coord { x: c.x, y: c.y }).collect();
                LineString::from(coords)
            });
            let exterior = rings.next()?;
            let interiors: Vec<LineString<f64>> = rings.collect();
            Some(Shape::Polygon(Polygon::new(exterior, interiors)))
        }
        _ => None,
    }
}

/// Try to recognize `candidate` as a GeoJSON Point, LineString or Polygon
/// object, expressed in our normalized [`Value`] tree (so numeric
/// coordinates appear as normalized strings). Returns `None` if it doesn't
/// look like GeoJSON, uses a multipart/unsupported geometry type, fails
/// shape validation, or (for polygons) fails RFC 7946 winding validation.
pub fn match_geojson(candidate: &Value) -> Option<GeoMatch> {
    let map = candidate.as_map()?;
    let geom_type = map.get("type")?.as_str()?;
    let coordinates = map.get("coordinates")?;

    let shape = match geom_type {
        "Point" => {
            let c = parse_position(coordinates)?;
            Shape::Point(Point::new(c.x, c.y))
        }
        "LineString" => {
            let coords = parse_position_list(coordinates)?;
            Shape::LineString(LineString::from(coords))
        }
        "Polygon" => {
            let rings = coordinates.as_list()?;
            let mut line_strings = Vec::with_capacity(rings.len());
            for ring in rings {
                line_strings.push(LineString::from(parse_position_list(ring)?));
            }
            if line_strings.is_empty() {
                return None;
            }
            let exterior = line_strings.remove(0);
            Shape::Polygon(Polygon::new(exterior, line_strings))
        }
        _ => return None,
    };

    if !is_shape_valid(&shape) {
        return None;
    }
    if let Shape::Polygon(polygon) = &shape {
        if !is_winding_valid(polygon) {
            return None;
        }
    }

    Some(GeoMatch {
        point_wkt: shape.centroid().map(point_to_wkt)?,
        shape_wkt: shape_to_wkt(&shape),
    })
}

fn parse_position(value: &Value) -> Option<Coord<f64>> {
    let arr = value.as_list()?;
    let x = arr.first()?.as_str()?.parse::<f64>().ok()?;
    let y = arr.get(1)?.as_str()?.parse::<f64>().ok()?;
    Some(Coord { x, y })
}

fn parse_position_list(value: &Value) -> Option<Vec<Coord<f64>>> {
    let arr = value.as_list()?;
    arr.iter().map(parse_position).collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn match_wkt_point_recognized() {
        let m = match_wkt("POINT (30 10)").unwrap();
        assert!(m.point_wkt.to_uppercase().contains("POINT"));
        assert!(m.shape_wkt.to_uppercase().contains("POINT"));
    }

    #[test]
    fn match_wkt_rejects_out_of_range_coords() {
        assert!(match_wkt("POINT (300 10)").is_none());
    }

    #[test]
    fn match_wkt_rejects_garbage() {
        assert!(match_wkt("not wkt at all").is_none());
    }

    fn v(raw: serde_json::Value) -> Value {
        Value::normalize(&raw).unwrap()
    }

    #[test]
    fn match_geojson_point() {
        let obj = v(json!({"type": "Point", "coordinates": [30.0, 10.0]}));
        let m = match_geojson(&obj).unwrap();
        assert!(m.shape_wkt.to_uppercase().contains("POINT"));
    }

    #[test]
    fn match_geojson_rejects_unsupported_type() {
        let obj = v(json!({"type": "MultiPoint", "coordinates": [[30.0, 10.0]]}));
        assert!(match_geojson(&obj).is_none());
    }

    #[test]
    fn match_geojson_polygon_requires_ccw_exterior() {
        // clockwise exterior ring - invalid per RFC 7946
        let obj = v(json!({
            "type": "Polygon",
            "coordinates": [[[0.0, 0.0], [0.0, 10.0], [10.0, 10.0], [10.0, 0.0], [0.0, 0.0]]],
        }));
        assert!(match_geojson(&obj).is_none());
    }

    #[test]
    fn match_geojson_polygon_accepts_ccw_exterior() {
        let obj = v(json!({
            "type": "Polygon",
            "coordinates": [[[0.0, 0.0], [10.0, 0.0], [10.0, 10.0], [0.0, 10.0], [0.0, 0.0]]],
        }));
        assert!(match_geojson(&obj).is_some());
    }

    #[test]
    fn create_polygon_circle_has_65_vertices_and_is_right_wound() {
        let polygon = create_polygon_circle(10.0, 20.0, 1000.0).unwrap();
        assert_eq!(polygon.exterior().0.len(), 65);
        assert!(is_winding_valid(&polygon));
    }

    #[test]
    fn create_polygon_circle_rejects_non_positive_radius() {
        assert!(create_polygon_circle(10.0, 20.0, 0.0).is_err());
        assert!(create_polygon_circle(10.0, 20.0, -5.0).is_err());
    }

    #[test]
    fn match_hints_finds_lat_lon_pair() {
        let data = Value::normalize(&json!({"lat": "10.0", "lon": "20.0"})).unwrap();
        let hints = vec![GeoFieldHint::new("lat", "lon", None)];
        let matches = match_hints(&data, &hints);
        assert_eq!(matches.len(), 1);
        assert!(matches.contains_key("lat"));
    }

    #[test]
    fn match_hints_builds_circle_when_radius_present() {
        let data = Value::normalize(&json!({
            "latitude": "10.0",
            "longitude": "20.0",
            "radius": "500",
        }))
        .unwrap();
        let hints = vec![GeoFieldHint::new(
            "latitude",
            "longitude",
            Some("radius".to_string()),
        )];
        let matches = match_hints(&data, &hints);
        let m = matches.get("latitude").unwrap();
        assert!(m.shape_wkt.to_uppercase().contains("POLYGON"));
    }

    #[test]
    fn match_hints_ignores_non_positive_radius() {
        let data = Value::normalize(&json!({
            "latitude": "10.0",
            "longitude": "20.0",
            "radius": "-5",
        }))
        .unwrap();
        let hints = vec![GeoFieldHint::new(
            "latitude",
            "longitude",
            Some("radius".to_string()),
        )];
        let matches = match_hints(&data, &hints);
        let m = matches.get("latitude").unwrap();
        assert!(m.shape_wkt.to_uppercase().contains("POINT"));
    }
}
