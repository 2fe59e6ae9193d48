use bevy::math::{BVec3, EulerRot};
use bevy::prelude::*;
use rand::Rng;
use std::collections::{HashMap, HashSet};
use std::fmt;
use std::sync::Arc;
use thiserror::Error;
use uuid::Uuid;

/// Stable identity of a foliage type.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct FoliageTypeId(pub Uuid);

impl FoliageTypeId {
	pub fn new() -> Self {
		Self(Uuid::new_v4())
	}
}

impl Default for FoliageTypeId {
	fn default() -> Self {
		Self::new()
	}
}

impl fmt::Display for FoliageTypeId {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		write!(f, "{}", self.0)
	}
}

/// Opaque reference to the mesh an instance store renders.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct MeshRef(pub String);

impl From<&str> for MeshRef {
	fn from(name: &str) -> Self {
		Self(name.to_string())
	}
}

#[derive(Debug, Error, Clone, PartialEq)]
pub enum FoliageTypeError {
	#[error("foliage type {0} has no mesh")]
	MissingMesh(FoliageTypeId),
	#[error("foliage type {id} has invalid density {density}")]
	InvalidDensity { id: FoliageTypeId, density: f32 },
	#[error("foliage type {id} has cull distance start {start} beyond end {end}")]
	InvalidCullDistance { id: FoliageTypeId, start: f32, end: f32 },
}

/// Inclusive RGB interval; alpha is ignored.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ColorRange {
	pub min: LinearRgba,
	pub max: LinearRgba,
}

impl ColorRange {
	pub fn new(min: LinearRgba, max: LinearRgba) -> Self {
		Self { min, max }
	}

	pub fn contains_rgb(&self, color: LinearRgba) -> bool {
		color.red >= self.min.red
			&& color.green >= self.min.green
			&& color.blue >= self.min.blue
			&& color.red <= self.max.red
			&& color.green <= self.max.green
			&& color.blue <= self.max.blue
	}
}

impl Default for ColorRange {
	fn default() -> Self {
		Self { min: LinearRgba::BLACK, max: LinearRgba::WHITE }
	}
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct VectorRange {
	pub min: Vec3,
	pub max: Vec3,
}

impl VectorRange {
	pub fn new(min: Vec3, max: Vec3) -> Self {
		Self { min, max }
	}

	pub fn splat(value: Vec3) -> Self {
		Self { min: value, max: value }
	}

	/// Each axis drawn independently.
	pub fn sample_per_axis<R: Rng + ?Sized>(&self, rng: &mut R) -> Vec3 {
		if self.min == self.max {
			return self.min;
		}
		let t = Vec3::new(rng.gen::<f32>(), rng.gen::<f32>(), rng.gen::<f32>());
		self.min + (self.max - self.min) * t
	}

	/// One draw shared by every axis.
	pub fn sample_uniform<R: Rng + ?Sized>(&self, rng: &mut R) -> Vec3 {
		if self.min == self.max {
			return self.min;
		}
		self.min.lerp(self.max, rng.gen::<f32>())
	}
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub enum LocalOffset {
	Fixed(Vec3),
	Random(VectorRange),
}

impl LocalOffset {
	pub fn sample<R: Rng + ?Sized>(&self, rng: &mut R) -> Vec3 {
		match self {
			LocalOffset::Fixed(offset) => *offset,
			LocalOffset::Random(range) => range.sample_per_axis(rng),
		}
	}
}

impl Default for LocalOffset {
	fn default() -> Self {
		LocalOffset::Fixed(Vec3::ZERO)
	}
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ScaleRange {
	pub range: VectorRange,
	/// Scale all axes by the same factor.
	pub uniform: bool,
}

impl ScaleRange {
	pub fn uniform(min: f32, max: f32) -> Self {
		Self { range: VectorRange::new(Vec3::splat(min), Vec3::splat(max)), uniform: true }
	}

	pub fn per_axis(min: Vec3, max: Vec3) -> Self {
		Self { range: VectorRange::new(min, max), uniform: false }
	}

	pub fn sample<R: Rng + ?Sized>(&self, rng: &mut R) -> Vec3 {
		if self.uniform {
			self.range.sample_uniform(rng)
		} else {
			self.range.sample_per_axis(rng)
		}
	}
}

impl Default for ScaleRange {
	fn default() -> Self {
		Self::uniform(1.0, 1.0)
	}
}

/// Random rotation in degrees: x is roll, y is pitch, z is yaw.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct RandomRotation {
	pub range_degrees: Vec3,
	pub axes: BVec3,
}

impl RandomRotation {
	pub fn yaw(degrees: f32) -> Self {
		Self { range_degrees: Vec3::new(0.0, 0.0, degrees), axes: BVec3::new(false, false, true) }
	}

	pub fn new(range_degrees: Vec3, axes: BVec3) -> Self {
		Self { range_degrees, axes }
	}

	pub fn sample<R: Rng + ?Sized>(&self, rng: &mut R) -> Quat {
		let mut axis = |enabled: bool, range: f32| {
			if enabled {
				(rng.gen::<f32>() * range).to_radians()
			} else {
				0.0
			}
		};
		let roll = axis(self.axes.x, self.range_degrees.x);
		let pitch = axis(self.axes.y, self.range_degrees.y);
		let yaw = axis(self.axes.z, self.range_degrees.z);

		Quat::from_euler(EulerRot::ZYX, yaw, pitch, roll)
	}
}

/// Distance band over which instances fade out; zero end disables culling.
#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub struct CullDistance {
	pub start: f32,
	pub end: f32,
}

/// Configuration for one kind of scatterable object.
#[derive(Debug, Clone)]
pub struct FoliageTypeSpec {
	pub mesh: Option<MeshRef>,
	/// Above 1.0, samples per pixel side; below 1.0, the reciprocal of the pixel spacing. The
	/// cluster pipeline reads it as the spacing between points in world units.
	pub density: f32,
	pub spawn_constraint: ColorRange,
	pub local_offset: LocalOffset,
	pub scale: ScaleRange,
	pub align_to_surface_normal: bool,
	pub random_rotation: Option<RandomRotation>,
	/// Maximum angle in degrees between the surface normal and up.
	pub slope_angle_threshold: f32,
	pub collision_enabled: bool,
	pub cull_distance: CullDistance,
	pub only_spawn_in_nearest_tile: bool,
	pub seed: u64,
	/// Assigned at construction; clones keep it.
	id: FoliageTypeId,
}

impl Default for FoliageTypeSpec {
	fn default() -> Self {
		Self {
			mesh: None,
			density: 1.0,
			spawn_constraint: ColorRange::default(),
			local_offset: LocalOffset::default(),
			scale: ScaleRange::default(),
			align_to_surface_normal: false,
			random_rotation: None,
			slope_angle_threshold: 90.0,
			collision_enabled: false,
			cull_distance: CullDistance::default(),
			only_spawn_in_nearest_tile: false,
			seed: 0,
			id: FoliageTypeId::new(),
		}
	}
}

impl FoliageTypeSpec {
	pub fn new(mesh: impl Into<MeshRef>) -> Self {
		Self { mesh: Some(mesh.into()), ..Default::default() }
	}

	pub fn id(&self) -> FoliageTypeId {
		self.id
	}

	pub fn with_id(mut self, id: FoliageTypeId) -> Self {
		self.id = id;
		self
	}

	pub fn with_mesh(mut self, mesh: impl Into<MeshRef>) -> Self {
		self.mesh = Some(mesh.into());
		self
	}

	pub fn with_density(mut self, density: f32) -> Self {
		self.density = density;
		self
	}

	pub fn with_spawn_constraint(mut self, spawn_constraint: ColorRange) -> Self {
		self.spawn_constraint = spawn_constraint;
		self
	}

	pub fn with_local_offset(mut self, local_offset: LocalOffset) -> Self {
		self.local_offset = local_offset;
		self
	}

	pub fn with_scale(mut self, scale: ScaleRange) -> Self {
		self.scale = scale;
		self
	}

	pub fn with_align_to_surface_normal(mut self, align: bool) -> Self {
		self.align_to_surface_normal = align;
		self
	}

	pub fn with_random_rotation(mut self, random_rotation: RandomRotation) -> Self {
		self.random_rotation = Some(random_rotation);
		self
	}

	pub fn with_slope_angle_threshold(mut self, degrees: f32) -> Self {
		self.slope_angle_threshold = degrees;
		self
	}

	pub fn with_collision_enabled(mut self, collision_enabled: bool) -> Self {
		self.collision_enabled = collision_enabled;
		self
	}

	pub fn with_cull_distance(mut self, start: f32, end: f32) -> Self {
		self.cull_distance = CullDistance { start, end };
		self
	}

	pub fn with_only_spawn_in_nearest_tile(mut self, only: bool) -> Self {
		self.only_spawn_in_nearest_tile = only;
		self
	}

	pub fn with_seed(mut self, seed: u64) -> Self {
		self.seed = seed;
		self
	}

	pub fn validate(&self) -> Result<(), FoliageTypeError> {
		if self.mesh.is_none() {
			return Err(FoliageTypeError::MissingMesh(self.id()));
		}
		if !(self.density.is_finite() && self.density > 0.0) {
			return Err(FoliageTypeError::InvalidDensity { id: self.id(), density: self.density });
		}
		if self.cull_distance.start > self.cull_distance.end {
			return Err(FoliageTypeError::InvalidCullDistance {
				id: self.id(),
				start: self.cull_distance.start,
				end: self.cull_distance.end,
			});
		}
		Ok(())
	}

	pub fn is_valid(&self) -> bool {
		self.validate().is_ok()
	}

	/// Whether a slope of `angle_degrees` is within this type's threshold.
	pub fn accepts_slope(&self, angle_degrees: f32) -> bool {
		angle_degrees <= self.slope_angle_threshold
	}

	/// Instance rotation for a sample whose surface has `normal`, on a frame whose rotation is
	/// `frame_rotation`.
	pub fn sample_rotation<R: Rng + ?Sized>(&self, normal: Vec3, frame_rotation: Quat, rng: &mut R) -> Quat {
		let base = if self.align_to_surface_normal && normal != Vec3::ZERO {
			Quat::from_rotation_arc(Vec3::Z, normal)
		} else {
			frame_rotation
		};

		match &self.random_rotation {
			Some(random) => random.sample(rng) * base,
			None => base,
		}
	}
}

/// Angle in degrees between a surface normal and the up vector; a zero normal reads as vertical.
pub fn slope_angle(normal: Vec3, up: Vec3) -> f32 {
	if normal == Vec3::ZERO {
		return 90.0;
	}
	normal.dot(up).clamp(-1.0, 1.0).acos().to_degrees()
}

/// Ordered foliage type slots as supplied by the host; empty slots are skipped.
pub type FoliageTypeList = Vec<Option<Arc<FoliageTypeSpec>>>;

/// Maps a feature's type classifier onto the foliage types planted inside it.
#[derive(Debug, Clone, Default)]
pub struct FoliageCollection {
	types: HashMap<i32, Vec<Arc<FoliageTypeSpec>>>,
}

impl FoliageCollection {
	pub fn new() -> Self {
		Self::default()
	}

	pub fn with_types(mut self, kind: i32, types: Vec<Arc<FoliageTypeSpec>>) -> Self {
		self.insert(kind, types);
		self
	}

	pub fn insert(&mut self, kind: i32, types: Vec<Arc<FoliageTypeSpec>>) {
		self.types.insert(kind, types);
	}

	pub fn types_for(&self, kind: i32) -> Option<&[Arc<FoliageTypeSpec>]> {
		self.types.get(&kind).map(Vec::as_slice)
	}

	/// Every type in the collection once, ordered by classifier then slot.
	pub fn unique_types(&self) -> Vec<Arc<FoliageTypeSpec>> {
		let mut kinds: Vec<_> = self.types.keys().copied().collect();
		kinds.sort_unstable();

		let mut seen = HashSet::new();
		let mut unique = Vec::new();
		for kind in kinds {
			for foliage_type in &self.types[&kind] {
				if seen.insert(foliage_type.id()) {
					unique.push(foliage_type.clone());
				}
			}
		}
		unique
	}
}
