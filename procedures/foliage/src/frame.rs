use bevy::prelude::*;

/// Describes the local orientation and surface of the world the foliage is scattered over.
pub trait WorldFrame: Send + Sync {
	/// Rotation taking tile-local east/north/up axes into world space at `world`.
	fn east_north_up(&self, world: Vec3) -> Quat;

	/// `world` moved along the local up axis so it sits `height` above the surface.
	fn snap_to_height(&self, world: Vec3, height: f32) -> Vec3;
}

/// A flat world: +X east, +Y north, +Z up, surface at zero.
#[derive(Debug, Clone, Copy, Default)]
pub struct FlatFrame;

impl WorldFrame for FlatFrame {
	fn east_north_up(&self, _world: Vec3) -> Quat {
		Quat::IDENTITY
	}

	fn snap_to_height(&self, world: Vec3, height: f32) -> Vec3 {
		Vec3::new(world.x, world.y, height)
	}
}
