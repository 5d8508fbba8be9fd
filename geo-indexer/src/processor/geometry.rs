//! Geometry repair for polygon datasets.
//!
//! Two operations, applied per batch of features when a job asks for them:
//!
//! - **Reduction**: a number of rounds of polygon simplification, each
//!   followed by ring repair so every ring stays closed and keeps enough
//!   vertices for geo-shape indexing. Failure is fatal.
//! - **Unkinking**: self-intersecting polygons are split into simple parts,
//!   and the parts of features sharing an id are merged back into one
//!   `MultiPolygon`. Failure is not fatal; the batch passes through as-is.

use std::collections::HashMap;

use geo::algorithm::line_intersection::{line_intersection, LineIntersection};
use geo::{Contains, Coord, Line, LineString, Point, Polygon, Simplify};
use geo_indexer_shared::{JobDescriptor, RawFeature};
use serde_json::{json, Value};
use tracing::{debug, warn};

use crate::errors::IngestError;

/// Rings shorter than this are densified.
pub const MIN_RING_POINTS: usize = 8;

/// Default simplification tolerance, in degrees.
pub const DEFAULT_SIMPLIFY_TOLERANCE: f64 = 0.0001;

/// Upper bound on ring splits for one polygon.
const MAX_SPLITS: usize = 10_000;

type Ring = Vec<[f64; 2]>;

/// One round of polygon reduction over a GeoJSON geometry.
pub trait PolygonReducer: Send + Sync {
    fn reduce(&self, geometry: &Value) -> Result<Value, IngestError>;
}

/// Ramer-Douglas-Peucker simplification.
#[derive(Debug, Clone, Copy)]
pub struct SimplifyReducer {
    epsilon: f64,
}

impl SimplifyReducer {
    pub fn new(epsilon: f64) -> Self {
        Self { epsilon }
    }
}

impl Default for SimplifyReducer {
    fn default() -> Self {
        Self::new(DEFAULT_SIMPLIFY_TOLERANCE)
    }
}

impl PolygonReducer for SimplifyReducer {
    fn reduce(&self, geometry: &Value) -> Result<Value, IngestError> {
        let polygons = polygons_from_geometry(geometry)?
            .into_iter()
            .map(|polygon| polygon.simplify(&self.epsilon))
            .collect::<Vec<_>>();

        Ok(match geometry_type(geometry) {
            Some("Polygon") => json!({
                "type": "Polygon",
                "coordinates": polygon_coordinates(&polygons[0]),
            }),
            _ => multi_polygon_geometry(&polygons),
        })
    }
}

/// The geometry stage configured for one job.
pub struct GeometryRepair {
    rounds: u32,
    reducer: Box<dyn PolygonReducer>,
    unkink: bool,
    id_property: Option<String>,
}

impl GeometryRepair {
    /// Build the stage for a job, or `None` when the job asks for no repair.
    pub fn for_job(job: &JobDescriptor) -> Option<Self> {
        if !job.wants_geometry_repair() {
            return None;
        }
        let epsilon = job.simplify_tolerance.unwrap_or(DEFAULT_SIMPLIFY_TOLERANCE);
        Some(Self {
            rounds: job.geometry_reduce.unwrap_or(0),
            reducer: Box::new(SimplifyReducer::new(epsilon)),
            unkink: job.unkink_polygons,
            id_property: job.id_property.clone(),
        })
    }

    /// Replace the reducer.
    pub fn with_reducer(mut self, reducer: Box<dyn PolygonReducer>) -> Self {
        self.reducer = reducer;
        self
    }

    pub fn apply(&self, features: Vec<RawFeature>) -> Result<Vec<RawFeature>, IngestError> {
        let mut features = features;
        for round in 0..self.rounds {
            features = self.reduce_round(features)?;
            debug!(round = round + 1, rounds = self.rounds, "Completed reduction round");
        }

        if self.unkink {
            features = match unkink_features(&features, self.id_property.as_deref()) {
                Ok(merged) => merged,
                Err(e) => {
                    warn!(error = %e, "Failed to resolve self-intersections, keeping input");
                    features
                }
            };
        }
        Ok(features)
    }

    fn reduce_round(&self, features: Vec<RawFeature>) -> Result<Vec<RawFeature>, IngestError> {
        features
            .into_iter()
            .map(|mut feature| {
                if is_polygonal(&feature) {
                    if let Some(geometry) = feature.geometry() {
                        let reduced = self.reducer.reduce(geometry)?;
                        feature.set_geometry(repair_geometry(&reduced));
                    }
                }
                Ok(feature)
            })
            .collect()
    }
}

fn geometry_type(geometry: &Value) -> Option<&str> {
    geometry.get("type").and_then(Value::as_str)
}

fn is_polygonal(feature: &RawFeature) -> bool {
    matches!(feature.geometry_type(), Some("Polygon") | Some("MultiPolygon"))
}

/// Apply ring repair to the coordinates of a geometry object.
pub fn repair_geometry(geometry: &Value) -> Value {
    let mut repaired = geometry.clone();
    if let (Some(coordinates), Value::Object(map)) =
        (geometry.get("coordinates"), &mut repaired)
    {
        map.insert("coordinates".to_string(), repair_rings(coordinates));
    }
    repaired
}

/// Repair every ring found in a nested coordinate array.
///
/// A ring is a non-empty array whose elements are all numeric pairs. Each
/// ring loses consecutive duplicate points, is densified with midpoints
/// while it has fewer than [`MIN_RING_POINTS`] points, and is closed.
/// Anything that is not an array is returned unchanged.
pub fn repair_rings(value: &Value) -> Value {
    match as_ring(value) {
        Some(ring) => ring_value(&repair_ring(&ring)),
        None => match value {
            Value::Array(items) => Value::Array(items.iter().map(repair_rings).collect()),
            other => other.clone(),
        },
    }
}

fn as_ring(value: &Value) -> Option<Ring> {
    let items = value.as_array()?;
    if items.is_empty() {
        return None;
    }
    items
        .iter()
        .map(|item| match item.as_array().map(Vec::as_slice) {
            Some([x, y]) => Some([x.as_f64()?, y.as_f64()?]),
            _ => None,
        })
        .collect()
}

fn ring_value(ring: &[[f64; 2]]) -> Value {
    Value::Array(ring.iter().map(|[x, y]| json!([x, y])).collect())
}

/// Midpoint passes repeat, closing edge included, until the ring reaches
/// [`MIN_RING_POINTS`], where a single pass can leave a short ring degenerate.
fn repair_ring(input: &[[f64; 2]]) -> Ring {
    let mut ring = input.to_vec();
    ring.dedup();
    if ring.len() > 1 && ring.first() == ring.last() {
        ring.pop();
    }
    if ring.len() < 2 {
        return input.to_vec();
    }

    while ring.len() + 1 < MIN_RING_POINTS {
        ring = densify(&ring);
    }
    ring.push(ring[0]);
    ring
}

/// Insert a midpoint on every edge of an open ring, closing edge included.
fn densify(ring: &[[f64; 2]]) -> Ring {
    let mut out = Vec::with_capacity(ring.len() * 2);
    for (i, a) in ring.iter().enumerate() {
        let b = ring[(i + 1) % ring.len()];
        out.push(*a);
        out.push([(a[0] + b[0]) / 2.0, (a[1] + b[1]) / 2.0]);
    }
    out
}

/// Split self-intersecting polygons and merge parts sharing an id.
///
/// Polygonal features are grouped by the value of `id_property` in
/// first-seen order; each group becomes one `MultiPolygon` feature carrying
/// the first member's attributes. Other features pass through in place.
pub fn unkink_features(
    features: &[RawFeature],
    id_property: Option<&str>,
) -> Result<Vec<RawFeature>, IngestError> {
    enum Slot {
        Group(usize),
        Other(RawFeature),
    }

    let mut slots = Vec::with_capacity(features.len());
    let mut groups: Vec<(RawFeature, Vec<Polygon<f64>>)> = Vec::new();
    let mut by_id: HashMap<String, usize> = HashMap::new();

    for feature in features {
        let Some(geometry) = feature.geometry().filter(|_| is_polygonal(feature)) else {
            slots.push(Slot::Other(feature.clone()));
            continue;
        };

        let mut parts = Vec::new();
        for polygon in polygons_from_geometry(geometry)? {
            parts.extend(split_polygon(&polygon)?);
        }

        let id = id_property
            .and_then(|name| feature.attribute(name))
            .filter(|v| !v.is_null())
            .map(|v| v.as_str().map(str::to_string).unwrap_or_else(|| v.to_string()));

        match id.as_ref().and_then(|id| by_id.get(id)) {
            Some(&index) => groups[index].1.extend(parts),
            None => {
                if let Some(id) = id {
                    by_id.insert(id, groups.len());
                }
                slots.push(Slot::Group(groups.len()));
                groups.push((feature.clone(), parts));
            }
        }
    }

    let mut groups: Vec<Option<(RawFeature, Vec<Polygon<f64>>)>> =
        groups.into_iter().map(Some).collect();
    Ok(slots
        .into_iter()
        .filter_map(|slot| match slot {
            Slot::Other(feature) => Some(feature),
            Slot::Group(index) => groups[index].take().map(|(mut feature, parts)| {
                feature.set_geometry(multi_polygon_geometry(&parts));
                feature
            }),
        })
        .collect())
}

/// Split a polygon into simple polygons, assigning each hole to the part
/// containing it.
fn split_polygon(polygon: &Polygon<f64>) -> Result<Vec<Polygon<f64>>, IngestError> {
    let exteriors = split_ring(polygon.exterior())?;
    let mut holes: Vec<Vec<LineString<f64>>> = vec![Vec::new(); exteriors.len()];

    for interior in polygon.interiors() {
        for hole in split_ring(interior)? {
            let Some(first) = hole.0.first().copied() else {
                continue;
            };
            let owner = exteriors
                .iter()
                .position(|exterior| {
                    Polygon::new(exterior.clone(), vec![]).contains(&Point::from(first))
                })
                .unwrap_or(0);
            if let Some(slot) = holes.get_mut(owner) {
                slot.push(hole);
            }
        }
    }

    Ok(exteriors
        .into_iter()
        .zip(holes)
        .map(|(exterior, interiors)| Polygon::new(exterior, interiors))
        .collect())
}

/// Split a closed ring at proper self-crossings until every piece is simple.
fn split_ring(ring: &LineString<f64>) -> Result<Vec<LineString<f64>>, IngestError> {
    let mut pending = vec![ring.0.clone()];
    let mut simple = Vec::new();
    let mut splits = 0;

    while let Some(points) = pending.pop() {
        match find_crossing(&points) {
            None => simple.push(LineString::from(points)),
            Some((i, j, crossing)) => {
                splits += 1;
                if splits > MAX_SPLITS {
                    return Err(IngestError::geometry(format!(
                        "ring still self-intersecting after {} splits",
                        MAX_SPLITS
                    )));
                }

                let mut outer = points[..=i].to_vec();
                outer.push(crossing);
                outer.extend_from_slice(&points[j + 1..]);

                let mut inner = vec![crossing];
                inner.extend_from_slice(&points[i + 1..=j]);
                inner.push(crossing);

                pending.extend([outer, inner].into_iter().filter(|r| r.len() >= 4));
            }
        }
    }
    Ok(simple)
}

/// The first pair of non-adjacent edges that cross in their interiors.
fn find_crossing(points: &[Coord<f64>]) -> Option<(usize, usize, Coord<f64>)> {
    let edges = points.len().checked_sub(1)?;
    for i in 0..edges {
        let a = Line::new(points[i], points[i + 1]);
        for j in (i + 2)..edges {
            // first and last edges meet at the closing point
            if i == 0 && j == edges - 1 {
                continue;
            }
            let b = Line::new(points[j], points[j + 1]);
            if let Some(LineIntersection::SinglePoint {
                intersection,
                is_proper: true,
            }) = line_intersection(a, b)
            {
                return Some((i, j, intersection));
            }
        }
    }
    None
}

fn polygons_from_geometry(geometry: &Value) -> Result<Vec<Polygon<f64>>, IngestError> {
    let coordinates = geometry
        .get("coordinates")
        .ok_or_else(|| IngestError::geometry("geometry has no coordinates"))?;
    match geometry_type(geometry) {
        Some("Polygon") => Ok(vec![parse_polygon(coordinates)?]),
        Some("MultiPolygon") => coordinates
            .as_array()
            .ok_or_else(|| IngestError::geometry("MultiPolygon coordinates are not an array"))?
            .iter()
            .map(parse_polygon)
            .collect(),
        other => Err(IngestError::geometry(format!(
            "expected a polygon geometry, found {:?}",
            other
        ))),
    }
}

fn parse_polygon(value: &Value) -> Result<Polygon<f64>, IngestError> {
    let mut rings = value
        .as_array()
        .ok_or_else(|| IngestError::geometry("polygon coordinates are not an array"))?
        .iter()
        .map(parse_line_string);
    let exterior = rings
        .next()
        .ok_or_else(|| IngestError::geometry("polygon has no exterior ring"))??;
    let interiors = rings.collect::<Result<Vec<_>, _>>()?;
    Ok(Polygon::new(exterior, interiors))
}

fn parse_line_string(value: &Value) -> Result<LineString<f64>, IngestError> {
    value
        .as_array()
        .ok_or_else(|| IngestError::geometry("ring is not an array"))?
        .iter()
        .map(|position| {
            let x = position.get(0).and_then(Value::as_f64);
            let y = position.get(1).and_then(Value::as_f64);
            match (x, y) {
                (Some(x), Some(y)) if x.is_finite() && y.is_finite() => Ok(Coord { x, y }),
                _ => Err(IngestError::geometry(format!("invalid position {}", position))),
            }
        })
        .collect::<Result<Vec<_>, _>>()
        .map(LineString::from)
}

fn line_string_coordinates(ring: &LineString<f64>) -> Value {
    Value::Array(ring.coords().map(|c| json!([c.x, c.y])).collect())
}

fn polygon_coordinates(polygon: &Polygon<f64>) -> Value {
    let mut rings = vec![line_string_coordinates(polygon.exterior())];
    rings.extend(polygon.interiors().iter().map(line_string_coordinates));
    Value::Array(rings)
}

fn multi_polygon_geometry(polygons: &[Polygon<f64>]) -> Value {
    json!({
        "type": "MultiPolygon",
        "coordinates": polygons.iter().map(polygon_coordinates).collect::<Vec<_>>(),
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn ring_of(value: &Value) -> Ring {
        as_ring(value).unwrap()
    }

    fn polygon_feature(id: &str, coordinates: Value) -> RawFeature {
        RawFeature::new(json!({
            "type": "Feature",
            "properties": {"code": id},
            "geometry": {"type": "Polygon", "coordinates": coordinates}
        }))
    }

    #[test]
    fn test_short_rings_are_closed_and_never_shrink() {
        let inputs = vec![
            json!([[0, 0], [1, 0], [1, 1]]),
            json!([[0, 0], [1, 0], [1, 0], [1, 1], [0, 0]]),
            json!([[0, 0], [0, 0]]),
            json!([[5, 5]]),
            json!([[0, 0], [4, 0], [4, 4], [0, 4], [0, 1], [0, 0], [0, 0]]),
        ];

        for input in inputs {
            let before = ring_of(&input);
            let after = ring_of(&repair_rings(&input));
            assert_eq!(after.first(), after.last(), "ring {:?} not closed", input);
            assert!(after.len() >= before.len(), "ring {:?} shrank", input);
        }
    }

    #[test]
    fn test_triangle_is_densified_to_minimum() {
        let repaired = ring_of(&repair_rings(&json!([[0, 0], [2, 0], [2, 2], [0, 0]])));
        assert!(repaired.len() >= MIN_RING_POINTS);
        assert!(repaired.contains(&[1.0, 0.0]));
        assert!(repaired.windows(2).all(|w| w[0] != w[1]));
    }

    #[test]
    fn test_long_rings_only_lose_duplicates() {
        let input = json!([
            [0, 0], [1, 0], [2, 0], [2, 0], [3, 0], [3, 1], [3, 2], [2, 2], [1, 2], [0, 2], [0, 0]
        ]);
        let repaired = ring_of(&repair_rings(&input));
        assert_eq!(repaired.len(), 10);
        assert_eq!(repaired.first(), repaired.last());
    }

    #[test]
    fn test_repair_recurses_through_multipolygon_nesting() {
        let geometry = json!({
            "type": "MultiPolygon",
            "coordinates": [[[[0, 0], [1, 0], [1, 1]]], [[[5, 5], [6, 5], [6, 6], [5, 5]]]]
        });
        let repaired = repair_geometry(&geometry);
        for polygon in repaired["coordinates"].as_array().unwrap() {
            let ring = ring_of(&polygon[0]);
            assert!(ring.len() >= MIN_RING_POINTS);
            assert_eq!(ring.first(), ring.last());
        }
    }

    #[test]
    fn test_non_ring_values_are_untouched() {
        assert_eq!(repair_rings(&json!([])), json!([]));
        assert_eq!(repair_rings(&json!("x")), json!("x"));
        assert_eq!(repair_rings(&json!([[1, 2, 3]])), json!([[1, 2, 3]]));
    }

    #[test]
    fn test_bowtie_is_split_into_two_parts() {
        // Crosses itself at (1, 1).
        let bowtie = json!([[[0, 0], [2, 2], [2, 0], [0, 2], [0, 0]]]);
        let features = vec![polygon_feature("E1", bowtie)];

        let out = unkink_features(&features, Some("code")).unwrap();
        assert_eq!(out.len(), 1);
        assert_eq!(out[0].geometry_type(), Some("MultiPolygon"));
        let parts = out[0].geometry().unwrap()["coordinates"].as_array().unwrap().len();
        assert_eq!(parts, 2);
    }

    #[test]
    fn test_parts_with_same_id_are_merged_in_first_seen_order() {
        let square = |x: i64| json!([[[x, 0], [x + 1, 0], [x + 1, 1], [x, 1], [x, 0]]]);
        let features = vec![
            polygon_feature("A", square(0)),
            polygon_feature("B", square(10)),
            RawFeature::new(json!({"properties": {"code": "P"}, "geometry": {"type": "Point", "coordinates": [1, 1]}})),
            polygon_feature("A", square(20)),
        ];

        let out = unkink_features(&features, Some("code")).unwrap();
        let codes: Vec<_> = out.iter().map(|f| f.attribute("code").cloned().unwrap()).collect();
        assert_eq!(codes, vec![json!("A"), json!("B"), json!("P")]);
        assert_eq!(out[0].geometry().unwrap()["coordinates"].as_array().unwrap().len(), 2);
        assert_eq!(out[2].geometry_type(), Some("Point"));
    }

    #[test]
    fn test_unkink_failure_falls_back_to_input() {
        let job = JobDescriptor {
            unkink_polygons: true,
            id_property: Some("code".to_string()),
            ..JobDescriptor::new("district", geo_indexer_shared::SourceKind::GeoJson, "x")
        };
        let stage = GeometryRepair::for_job(&job).unwrap();
        let broken = RawFeature::new(json!({
            "properties": {"code": "A"},
            "geometry": {"type": "Polygon", "coordinates": [[["a", "b"]]]}
        }));

        let out = stage.apply(vec![broken.clone()]).unwrap();
        assert_eq!(out, vec![broken]);
    }

    #[test]
    fn test_reduction_failure_is_fatal() {
        let job = JobDescriptor {
            geometry_reduce: Some(2),
            ..JobDescriptor::new("district", geo_indexer_shared::SourceKind::GeoJson, "x")
        };
        let stage = GeometryRepair::for_job(&job).unwrap();
        let broken = RawFeature::new(json!({
            "geometry": {"type": "Polygon", "coordinates": [[[0, 0], [null, 1]]]}
        }));

        assert!(matches!(stage.apply(vec![broken]), Err(IngestError::GeometryError(_))));
    }

    #[test]
    fn test_reduction_rounds_keep_rings_indexable() {
        let job = JobDescriptor {
            geometry_reduce: Some(3),
            simplify_tolerance: Some(0.5),
            ..JobDescriptor::new("ward", geo_indexer_shared::SourceKind::GeoJson, "x")
        };
        let stage = GeometryRepair::for_job(&job).unwrap();
        let feature = polygon_feature(
            "W",
            json!([[[0.0, 0.0], [1.0, 0.01], [2.0, 0.0], [2.0, 2.0], [1.0, 2.01], [0.0, 2.0], [0.0, 0.0]]]),
        );

        let out = stage.apply(vec![feature]).unwrap();
        let ring = ring_of(&out[0].geometry().unwrap()["coordinates"][0]);
        assert!(ring.len() >= MIN_RING_POINTS);
        assert_eq!(ring.first(), ring.last());
    }

    #[test]
    fn test_no_stage_without_repair_options() {
        let job = JobDescriptor::new("postcode", geo_indexer_shared::SourceKind::Csv, "x");
        assert!(GeometryRepair::for_job(&job).is_none());
    }
}
