use bevy::prelude::*;

/// Vertical half-extent of a tile's local bounds.
pub const TILE_HALF_HEIGHT: f32 = 300_000.0;

/// Axis-aligned box in tile-local space.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct TileBounds {
	pub min: Vec3,
	pub max: Vec3,
}

impl TileBounds {
	pub fn for_diameter(diameter: f32) -> Self {
		let half = diameter / 2.0;
		Self {
			min: Vec3::new(-half, -half, -TILE_HALF_HEIGHT),
			max: Vec3::new(half, half, TILE_HALF_HEIGHT),
		}
	}

	pub fn contains_xy(&self, local: Vec3) -> bool {
		local.x >= self.min.x && local.x <= self.max.x && local.y >= self.min.y && local.y <= self.max.y
	}
}

/// One square of the camera-centred scattering grid.
#[derive(Debug, Clone, PartialEq)]
pub struct TileDescriptor {
	/// Offset in tiles from the origin tile.
	pub coord: IVec2,
	pub diameter: f32,
	/// World transform captured at the start of the tile's last cycle.
	pub transform: Transform,
	pub bounds: TileBounds,
}

impl TileDescriptor {
	pub fn new(coord: IVec2, diameter: f32) -> Self {
		Self {
			coord,
			diameter,
			transform: Transform::IDENTITY,
			bounds: TileBounds::for_diameter(diameter),
		}
	}

	pub fn with_transform(mut self, transform: Transform) -> Self {
		self.transform = transform;
		self
	}

	pub fn is_origin(&self) -> bool {
		self.coord == IVec2::ZERO
	}

	/// Up vector of the tile in world space.
	pub fn up(&self) -> Vec3 {
		self.transform.rotation * Vec3::Z
	}

	pub fn world_to_local(&self, world: Vec3) -> Vec3 {
		let t = &self.transform;
		(t.rotation.inverse() * (world - t.translation)) / t.scale
	}

	/// Whether `world` lies over this tile.
	pub fn contains(&self, world: Vec3) -> bool {
		self.bounds.contains_xy(self.world_to_local(world))
	}
}

/// Tile coordinates spanning `-count..=count` on both axes, closest to the origin first.
pub fn tile_layout(count: IVec2) -> Vec<IVec2> {
	let count = count.abs();
	let mut coords: Vec<IVec2> = (-count.x..=count.x)
		.flat_map(|x| (-count.y..=count.y).map(move |y| IVec2::new(x, y)))
		.collect();

	coords.sort_by_key(|c| (c.length_squared(), c.x, c.y));
	coords
}
