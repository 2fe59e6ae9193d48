pub mod batch;
pub mod memory;

pub use batch::{chunk_transforms, FoliageTask, InstanceBatchWriter, INSTANCES_PER_CHUNK};
pub use memory::{MemoryInstanceStore, MemoryStoreFactory, MemoryStoreState, StoreOp};

use crate::foliage_type::{FoliageTypeId, FoliageTypeSpec};
use crate::placement::PlacementTransform;
use bevy::prelude::*;
use std::collections::HashMap;

/// Batched instance storage for one foliage type on one tile.
pub trait InstanceStore: Send + Sync {
	fn clear(&mut self);

	fn add_instances(&mut self, transforms: &[PlacementTransform]);

	/// Rebuilds the acceleration structure after a batch of additions.
	fn rebuild_spatial_index(&mut self);

	fn instance_count(&self) -> usize;

	fn set_collision_enabled(&mut self, _enabled: bool) {}
}

/// Creates instance stores for (tile, foliage type) pairs.
pub trait InstanceStoreFactory: Send + Sync {
	/// Returns `None` when no store can be created for the type, e.g. its mesh is unavailable.
	fn create_store(&mut self, tile: IVec2, foliage_type: &FoliageTypeSpec) -> Option<Box<dyn InstanceStore>>;
}

struct PoolEntry {
	store: Box<dyn InstanceStore>,
	collision_enabled: bool,
}

/// The instance stores of a single tile, keyed by foliage type.
#[derive(Default)]
pub struct InstancePool {
	stores: HashMap<FoliageTypeId, PoolEntry>,
}

impl InstancePool {
	pub fn new() -> Self {
		Self::default()
	}

	/// Creates a store for every valid type; failures are logged and leave the type without storage.
	pub fn build<'a>(
		tile: IVec2,
		types: impl IntoIterator<Item = &'a FoliageTypeSpec>,
		factory: &mut dyn InstanceStoreFactory,
	) -> Self {
		let mut pool = Self::new();
		for foliage_type in types {
			if let Err(e) = foliage_type.validate() {
				log::error!("Not creating instance storage on tile {}: {}", tile, e);
				continue;
			}
			match factory.create_store(tile, foliage_type) {
				Some(store) => pool.insert(foliage_type, store),
				None => log::error!(
					"Failed to create instance storage for foliage type {} on tile {}",
					foliage_type.id(),
					tile
				),
			}
		}
		pool
	}

	pub fn insert(&mut self, foliage_type: &FoliageTypeSpec, store: Box<dyn InstanceStore>) {
		self.stores.insert(
			foliage_type.id(),
			PoolEntry { store, collision_enabled: foliage_type.collision_enabled },
		);
	}

	pub fn contains(&self, id: FoliageTypeId) -> bool {
		self.stores.contains_key(&id)
	}

	pub fn get(&self, id: FoliageTypeId) -> Option<&dyn InstanceStore> {
		self.stores.get(&id).map(|entry| entry.store.as_ref())
	}

	pub fn get_mut(&mut self, id: FoliageTypeId) -> Option<&mut (dyn InstanceStore + 'static)> {
		self.stores.get_mut(&id).map(|entry| entry.store.as_mut())
	}

	pub fn len(&self) -> usize {
		self.stores.len()
	}

	pub fn is_empty(&self) -> bool {
		self.stores.is_empty()
	}

	pub fn total_instance_count(&self) -> usize {
		self.stores.values().map(|entry| entry.store.instance_count()).sum()
	}

	/// Enables collision on stores whose type wants it when `active`, disables it everywhere else.
	pub fn set_collision(&mut self, active: bool) {
		for entry in self.stores.values_mut() {
			entry.store.set_collision_enabled(active && entry.collision_enabled);
		}
	}
}

impl std::fmt::Debug for InstancePool {
	fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
		f.debug_struct("InstancePool")
			.field("stores", &self.stores.len())
			.field("instances", &self.total_instance_count())
			.finish()
	}
}
