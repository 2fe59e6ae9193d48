pub mod containment;
pub mod engine;
pub mod feature;
pub mod heightfield;
pub mod spawner;

pub use containment::{EvenOddContainment, RegionContainment};
pub use engine::{CancellationToken, GeoFeaturePlacementEngine};
pub use feature::{
	parse_feature_collection, try_parse_feature_collection, FeatureParseError, Polygon, PolygonBounds,
	SpatialFeature,
};
pub use heightfield::{ElevationQuery, FlatHeightfield, GeoProjection, Heightfield, IdentityProjection, NormalQuery};
pub use spawner::ClusterFoliageSpawner;

use bevy::prelude::*;
use sampler::{DEFAULT_REJECTION_THRESHOLD, EARTH_RADIUS_METRES};

/// Configuration for scattering foliage inside vector features
#[derive(Resource, Debug, Clone, PartialEq)]
pub struct ClusterConfig {
	/// Features are in degrees of longitude and latitude and densities are metres
	pub geographic: bool,
	pub planet_radius: f64,
	pub rejection_threshold: u32,
	/// Threads computing features; zero lets rayon decide
	pub worker_threads: usize,
}

impl Default for ClusterConfig {
	fn default() -> Self {
		Self {
			geographic: false,
			planet_radius: EARTH_RADIUS_METRES,
			rejection_threshold: DEFAULT_REJECTION_THRESHOLD,
			worker_threads: 0,
		}
	}
}

impl ClusterConfig {
	pub fn with_geographic(mut self, geographic: bool) -> Self {
		self.geographic = geographic;
		self
	}

	pub fn with_planet_radius(mut self, planet_radius: f64) -> Self {
		self.planet_radius = planet_radius;
		self
	}

	pub fn with_rejection_threshold(mut self, rejection_threshold: u32) -> Self {
		self.rejection_threshold = rejection_threshold;
		self
	}

	pub fn with_worker_threads(mut self, worker_threads: usize) -> Self {
		self.worker_threads = worker_threads;
		self
	}
}
