use bevy::math::{DVec2, DVec3};
use bevy::prelude::*;

/// Surface elevation at a planar (or geographic) position; `None` where there is no surface.
pub trait ElevationQuery: Send + Sync {
	fn elevation(&self, position: DVec2) -> Option<f64>;
}

/// Surface normal at a planar (or geographic) position, in engine space.
pub trait NormalQuery: Send + Sync {
	fn normal(&self, position: DVec2) -> Option<Vec3>;
}

/// A surface that can answer both queries.
pub trait Heightfield: ElevationQuery + NormalQuery {}

impl<T: ElevationQuery + NormalQuery> Heightfield for T {}

/// A level surface at a fixed elevation.
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct FlatHeightfield {
	pub elevation: f64,
}

impl FlatHeightfield {
	pub fn new(elevation: f64) -> Self {
		Self { elevation }
	}
}

impl ElevationQuery for FlatHeightfield {
	fn elevation(&self, _position: DVec2) -> Option<f64> {
		Some(self.elevation)
	}
}

impl NormalQuery for FlatHeightfield {
	fn normal(&self, _position: DVec2) -> Option<Vec3> {
		Some(Vec3::Z)
	}
}

/// Maps feature coordinates into engine space.
pub trait GeoProjection: Send + Sync {
	/// `geographic` is (x or longitude, y or latitude, elevation).
	fn geographic_to_engine(&self, geographic: DVec3) -> Vec3;

	fn up_vector(&self, engine: Vec3) -> Vec3;
}

/// Feature coordinates are engine coordinates; up is +Z.
#[derive(Debug, Clone, Copy, Default)]
pub struct IdentityProjection;

impl GeoProjection for IdentityProjection {
	fn geographic_to_engine(&self, geographic: DVec3) -> Vec3 {
		geographic.as_vec3()
	}

	fn up_vector(&self, _engine: Vec3) -> Vec3 {
		Vec3::Z
	}
}

#[cfg(test)]
mod tests {
	use super::*;

	#[test]
	fn test_flat_heightfield() {
		let ground = FlatHeightfield::new(42.0);
		assert_eq!(ground.elevation(DVec2::new(-3.0, 8.0)), Some(42.0));
		assert_eq!(ground.normal(DVec2::ZERO), Some(Vec3::Z));
	}

	#[test]
	fn test_identity_projection() {
		let projection = IdentityProjection;
		assert_eq!(projection.geographic_to_engine(DVec3::new(1.0, 2.0, 3.0)), Vec3::new(1.0, 2.0, 3.0));
		assert_eq!(projection.up_vector(Vec3::new(100.0, 0.0, 0.0)), Vec3::Z);
	}
}
