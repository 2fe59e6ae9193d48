use super::containment::{EvenOddContainment, RegionContainment};
use super::feature::SpatialFeature;
use super::heightfield::{FlatHeightfield, GeoProjection, Heightfield, IdentityProjection};
use super::ClusterConfig;
use crate::foliage_type::{slope_angle, FoliageTypeSpec};
use crate::placement::{PlacementTransform, Placements};
use crate::seed::sample_rng;
use bevy::math::{DVec2, DVec3};
use bevy::prelude::*;
use sampler::{haversine_delta_degrees, GeographicSettings, PoissonDiscSampler};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Instant;

/// Samples evaluated between cancellation checks.
const CANCEL_CHECK_INTERVAL: usize = 64;

/// Shared flag telling a feature worker to stop. Cancelled work produces no result.
#[derive(Debug, Clone, Default)]
pub struct CancellationToken(Arc<AtomicBool>);

impl CancellationToken {
	pub fn new() -> Self {
		Self::default()
	}

	pub fn cancel(&self) {
		self.0.store(true, Ordering::Release);
	}

	pub fn is_cancelled(&self) -> bool {
		self.0.load(Ordering::Acquire)
	}
}

/// Scatters foliage inside polygon features.
#[derive(Clone)]
pub struct GeoFeaturePlacementEngine {
	/// Planet radius when features are in degrees of longitude and latitude.
	geographic: Option<f64>,
	rejection_threshold: u32,
	containment: Arc<dyn RegionContainment>,
	heightfield: Arc<dyn Heightfield>,
	projection: Arc<dyn GeoProjection>,
}

impl Default for GeoFeaturePlacementEngine {
	fn default() -> Self {
		Self::new(&ClusterConfig::default())
	}
}

impl GeoFeaturePlacementEngine {
	pub fn new(config: &ClusterConfig) -> Self {
		Self {
			geographic: config.geographic.then_some(config.planet_radius),
			rejection_threshold: config.rejection_threshold,
			containment: Arc::new(EvenOddContainment),
			heightfield: Arc::new(FlatHeightfield::default()),
			projection: Arc::new(IdentityProjection),
		}
	}

	pub fn with_containment(mut self, containment: impl RegionContainment + 'static) -> Self {
		self.containment = Arc::new(containment);
		self
	}

	pub fn with_heightfield(mut self, heightfield: impl Heightfield + 'static) -> Self {
		self.heightfield = Arc::new(heightfield);
		self
	}

	pub fn with_projection(mut self, projection: impl GeoProjection + 'static) -> Self {
		self.projection = Arc::new(projection);
		self
	}

	pub fn is_geographic(&self) -> bool {
		self.geographic.is_some()
	}

	/// Places every type of `types` inside `feature`.
	///
	/// Returns `None` when the feature has no geometry or `token` is cancelled part way.
	pub fn compute_feature(
		&self,
		feature: &SpatialFeature,
		types: &[Arc<FoliageTypeSpec>],
		token: &CancellationToken,
	) -> Option<Placements> {
		let start = Instant::now();
		let polygon = feature.geometry.as_ref()?;
		let bounds = polygon.bounds();
		let key = IVec2::new(feature.id as i32, feature.kind);
		let mut placements = Placements::new();

		for spec in types {
			if token.is_cancelled() {
				return None;
			}
			if let Err(e) = spec.validate() {
				log::error!("Skipping foliage type in feature {}: {}", feature.id, e);
				continue;
			}

			let points = self.candidates(spec, bounds.min, bounds.size(), key);
			let mut transforms = Vec::new();

			for (index, point) in points.into_iter().enumerate() {
				if index % CANCEL_CHECK_INTERVAL == 0 && token.is_cancelled() {
					return None;
				}
				let point = point + bounds.min;
				if !self.containment.contains(polygon, point) {
					continue;
				}
				if let Some(transform) = self.evaluate(spec, point, key, index as u64) {
					transforms.push(transform);
				}
			}

			if !transforms.is_empty() {
				placements.insert(spec.id(), transforms);
			}
		}

		log::debug!(
			"Computed {} instances for feature {} in {:?}",
			placements.total_instances(),
			feature.id,
			start.elapsed()
		);
		Some(placements)
	}

	/// Blue-noise candidates over `size`, relative to `origin`. The type's density is the spacing
	/// between candidates: in feature units for planar features, in metres for geographic ones.
	fn candidates(&self, spec: &FoliageTypeSpec, origin: DVec2, size: DVec2, key: IVec2) -> Vec<DVec2> {
		let spacing = f64::from(spec.density);
		let sampler = match self.geographic {
			Some(planet_radius) => {
				let delta = haversine_delta_degrees(origin, spacing, planet_radius);
				PoissonDiscSampler::new(delta.max_element(), size).with_geographic(
					GeographicSettings::new(origin, spacing).with_planet_radius(planet_radius),
				)
			}
			None => PoissonDiscSampler::new(spacing, size),
		}
		.with_rejection_threshold(self.rejection_threshold);

		sampler.sample_with_rng(&mut sample_rng(spec.seed, key, u64::MAX))
	}

	fn evaluate(&self, spec: &FoliageTypeSpec, point: DVec2, key: IVec2, index: u64) -> Option<PlacementTransform> {
		let elevation = self.heightfield.elevation(point)?;
		let normal = self.heightfield.normal(point)?;

		let mut rng = sample_rng(spec.seed, key, index);
		let translation = self.projection.geographic_to_engine(DVec3::new(point.x, point.y, elevation))
			+ spec.local_offset.sample(&mut rng);
		let up = self.projection.up_vector(translation);

		if !spec.accepts_slope(slope_angle(normal, up)) {
			return None;
		}

		let rotation = spec.sample_rotation(normal, Quat::from_rotation_arc(Vec3::Z, up), &mut rng);
		let scale = spec.scale.sample(&mut rng);
		Some(PlacementTransform::new(translation, rotation, scale)).filter(PlacementTransform::is_valid)
	}
}
