use bevy::math::DVec2;
use serde::Deserialize;
use serde_json::{Map, Value};
use std::collections::HashMap;
use std::sync::Arc;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum FeatureParseError {
	#[error("malformed feature collection: {0}")]
	Json(#[from] serde_json::Error),
	#[error("expected a 'FeatureCollection', found '{0}'")]
	NotAFeatureCollection(String),
	#[error("feature {feature} has a malformed polygon: {reason}")]
	InvalidPolygon { feature: u32, reason: String },
}

/// Axis-aligned bounds of a polygon.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct PolygonBounds {
	pub min: DVec2,
	pub max: DVec2,
}

impl PolygonBounds {
	pub fn size(&self) -> DVec2 {
		self.max - self.min
	}
}

/// A simple polygon given by its exterior ring.
#[derive(Debug, Clone, PartialEq)]
pub struct Polygon {
	exterior: Vec<DVec2>,
	bounds: PolygonBounds,
}

impl Polygon {
	/// Returns `None` for rings with fewer than three vertices or non-finite coordinates.
	pub fn new(exterior: Vec<DVec2>) -> Option<Self> {
		if exterior.len() < 3 || exterior.iter().any(|p| !p.is_finite()) {
			return None;
		}
		let min = exterior.iter().copied().fold(DVec2::INFINITY, DVec2::min);
		let max = exterior.iter().copied().fold(DVec2::NEG_INFINITY, DVec2::max);
		Some(Self { exterior, bounds: PolygonBounds { min, max } })
	}

	pub fn exterior(&self) -> &[DVec2] {
		&self.exterior
	}

	pub fn bounds(&self) -> PolygonBounds {
		self.bounds
	}
}

/// One parsed vector feature.
#[derive(Debug, Clone)]
pub struct SpatialFeature {
	/// Position of the feature in its collection.
	pub id: u32,
	/// Classifier taken from the integer `type` property, zero when absent.
	pub kind: i32,
	/// Missing for geometry kinds other than polygons.
	pub geometry: Option<Arc<Polygon>>,
	pub properties: HashMap<String, String>,
}

#[derive(Deserialize)]
struct RawCollection {
	#[serde(rename = "type")]
	kind: String,
	#[serde(default)]
	features: Vec<RawFeature>,
}

#[derive(Deserialize)]
struct RawFeature {
	#[serde(default)]
	geometry: Option<RawGeometry>,
	#[serde(default)]
	properties: Option<Map<String, Value>>,
}

#[derive(Deserialize)]
struct RawGeometry {
	#[serde(rename = "type")]
	kind: String,
	#[serde(default)]
	coordinates: Value,
}

fn parse_polygon(feature: u32, coordinates: Value) -> Result<Option<Polygon>, FeatureParseError> {
	let invalid = |reason: String| FeatureParseError::InvalidPolygon { feature, reason };

	let rings: Vec<Vec<Vec<f64>>> = serde_json::from_value(coordinates).map_err(|e| invalid(e.to_string()))?;
	// holes are ignored, only the exterior ring bounds the feature
	let Some(exterior) = rings.into_iter().next() else {
		return Err(invalid("no rings".to_string()));
	};

	let mut points = Vec::with_capacity(exterior.len());
	for position in exterior {
		match position.as_slice() {
			[x, y, ..] => points.push(DVec2::new(*x, *y)),
			_ => return Err(invalid(format!("position with {} coordinates", position.len()))),
		}
	}

	let polygon = Polygon::new(points);
	if polygon.is_none() {
		log::warn!("Feature {} has a degenerate polygon, ignoring its geometry", feature);
	}
	Ok(polygon)
}

fn property_string(value: &Value) -> Option<String> {
	match value {
		Value::String(s) => Some(s.clone()),
		Value::Number(n) => Some(n.to_string()),
		Value::Bool(b) => Some(if *b { "true" } else { "false" }.to_string()),
		_ => None,
	}
}

fn feature_kind(properties: &Map<String, Value>) -> i32 {
	match properties.get("type") {
		Some(Value::Number(n)) => n
			.as_i64()
			.or_else(|| n.as_f64().map(|f| f.trunc() as i64))
			.and_then(|k| i32::try_from(k).ok())
			.unwrap_or(0),
		Some(Value::String(s)) => s.trim().parse().unwrap_or(0),
		_ => 0,
	}
}

/// Parses a GeoJSON `FeatureCollection` of polygons.
pub fn try_parse_feature_collection(data: &str) -> Result<Vec<SpatialFeature>, FeatureParseError> {
	let collection: RawCollection = serde_json::from_str(data)?;
	if collection.kind != "FeatureCollection" {
		return Err(FeatureParseError::NotAFeatureCollection(collection.kind));
	}

	let mut features = Vec::with_capacity(collection.features.len());
	for (id, raw) in (0u32..).zip(collection.features) {
		let geometry = match raw.geometry {
			Some(geometry) if geometry.kind == "Polygon" => {
				parse_polygon(id, geometry.coordinates)?.map(Arc::new)
			}
			Some(geometry) => {
				log::debug!("Feature {} has unsupported geometry '{}'", id, geometry.kind);
				None
			}
			None => None,
		};

		let raw_properties = raw.properties.unwrap_or_default();
		let properties = raw_properties
			.iter()
			.filter_map(|(key, value)| property_string(value).map(|value| (key.clone(), value)))
			.collect();

		features.push(SpatialFeature { id, kind: feature_kind(&raw_properties), geometry, properties });
	}

	Ok(features)
}

/// Like [`try_parse_feature_collection`], but logs failures and yields no features.
pub fn parse_feature_collection(data: &str) -> Vec<SpatialFeature> {
	match try_parse_feature_collection(data) {
		Ok(features) => features,
		Err(e) => {
			log::error!("Failed to parse GeoJSON: {}", e);
			Vec::new()
		}
	}
}
