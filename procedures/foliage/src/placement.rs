pub mod raster;

pub use raster::{PlacementPath, PlacementSettings, TilePlacementEngine, DEFAULT_PARALLEL_WIDTH_LIMIT};

use crate::foliage_type::FoliageTypeId;
use bevy::prelude::*;

/// World transform of a single placed instance.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct PlacementTransform {
	pub translation: Vec3,
	pub rotation: Quat,
	pub scale: Vec3,
}

impl PlacementTransform {
	pub fn new(translation: Vec3, rotation: Quat, scale: Vec3) -> Self {
		Self { translation, rotation, scale }
	}

	pub fn from_translation(translation: Vec3) -> Self {
		Self { translation, rotation: Quat::IDENTITY, scale: Vec3::ONE }
	}

	/// Only transforms with finite components are forwarded to instance stores.
	pub fn is_valid(&self) -> bool {
		self.translation.is_finite() && self.rotation.is_finite() && self.scale.is_finite()
	}
}

impl From<PlacementTransform> for Transform {
	fn from(placement: PlacementTransform) -> Self {
		Transform {
			translation: placement.translation,
			rotation: placement.rotation,
			scale: placement.scale,
		}
	}
}

/// Accepted transforms per foliage type, in the order the types were supplied.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Placements {
	entries: Vec<(FoliageTypeId, Vec<PlacementTransform>)>,
}

impl Placements {
	pub fn new() -> Self {
		Self::default()
	}

	/// Appends `transforms` to the batch for `id`.
	pub fn insert(&mut self, id: FoliageTypeId, transforms: Vec<PlacementTransform>) {
		match self.entries.iter_mut().find(|(existing, _)| *existing == id) {
			Some((_, batch)) => batch.extend(transforms),
			None => self.entries.push((id, transforms)),
		}
	}

	pub fn get(&self, id: FoliageTypeId) -> Option<&[PlacementTransform]> {
		self.entries.iter().find(|(existing, _)| *existing == id).map(|(_, batch)| batch.as_slice())
	}

	pub fn iter(&self) -> impl Iterator<Item = (FoliageTypeId, &[PlacementTransform])> {
		self.entries.iter().map(|(id, batch)| (*id, batch.as_slice()))
	}

	/// Number of foliage types with a batch.
	pub fn type_count(&self) -> usize {
		self.entries.len()
	}

	pub fn total_instances(&self) -> usize {
		self.entries.iter().map(|(_, batch)| batch.len()).sum()
	}

	pub fn is_empty(&self) -> bool {
		self.entries.is_empty()
	}
}

impl IntoIterator for Placements {
	type Item = (FoliageTypeId, Vec<PlacementTransform>);
	type IntoIter = std::vec::IntoIter<Self::Item>;

	fn into_iter(self) -> Self::IntoIter {
		self.entries.into_iter()
	}
}
