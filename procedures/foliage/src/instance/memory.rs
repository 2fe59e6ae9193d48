use super::{InstanceStore, InstanceStoreFactory};
use crate::foliage_type::{FoliageTypeId, FoliageTypeSpec};
use crate::placement::PlacementTransform;
use bevy::prelude::*;
use std::collections::{HashMap, HashSet};
use std::sync::{Arc, RwLock, RwLockReadGuard, RwLockWriteGuard};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StoreOp {
	Clear,
	Add(usize),
	RebuildSpatialIndex,
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct MemoryStoreState {
	pub instances: Vec<PlacementTransform>,
	/// Every mutation in the order it was applied.
	pub ops: Vec<StoreOp>,
	/// Instance count covered by the last spatial index rebuild.
	pub indexed: usize,
	pub collision_enabled: bool,
}

type SharedState = Arc<RwLock<MemoryStoreState>>;

fn read(state: &SharedState) -> RwLockReadGuard<'_, MemoryStoreState> {
	state.read().unwrap_or_else(|poisoned| poisoned.into_inner())
}

fn write(state: &SharedState) -> RwLockWriteGuard<'_, MemoryStoreState> {
	state.write().unwrap_or_else(|poisoned| poisoned.into_inner())
}

/// Instance store backed by a plain vector, observable through a shared handle.
#[derive(Debug, Clone, Default)]
pub struct MemoryInstanceStore {
	state: SharedState,
}

impl MemoryInstanceStore {
	pub fn new() -> Self {
		Self::default()
	}

	pub fn snapshot(&self) -> MemoryStoreState {
		read(&self.state).clone()
	}
}

impl InstanceStore for MemoryInstanceStore {
	fn clear(&mut self) {
		let mut state = write(&self.state);
		state.instances.clear();
		state.ops.push(StoreOp::Clear);
	}

	fn add_instances(&mut self, transforms: &[PlacementTransform]) {
		let mut state = write(&self.state);
		state.instances.extend_from_slice(transforms);
		state.ops.push(StoreOp::Add(transforms.len()));
	}

	fn rebuild_spatial_index(&mut self) {
		let mut state = write(&self.state);
		state.indexed = state.instances.len();
		state.ops.push(StoreOp::RebuildSpatialIndex);
	}

	fn instance_count(&self) -> usize {
		read(&self.state).instances.len()
	}

	fn set_collision_enabled(&mut self, enabled: bool) {
		write(&self.state).collision_enabled = enabled;
	}
}

/// Hands out [`MemoryInstanceStore`]s and keeps a handle to each so their state can be inspected.
#[derive(Debug, Clone, Default)]
pub struct MemoryStoreFactory {
	stores: Arc<RwLock<HashMap<(IVec2, FoliageTypeId), MemoryInstanceStore>>>,
	refused: HashSet<FoliageTypeId>,
}

impl MemoryStoreFactory {
	pub fn new() -> Self {
		Self::default()
	}

	/// Refuses to create stores for `id`, as a host would for a type whose mesh failed to load.
	pub fn refusing(mut self, id: FoliageTypeId) -> Self {
		self.refused.insert(id);
		self
	}

	pub fn store(&self, tile: IVec2, id: FoliageTypeId) -> Option<MemoryInstanceStore> {
		let stores = self.stores.read().unwrap_or_else(|poisoned| poisoned.into_inner());
		stores.get(&(tile, id)).cloned()
	}

	pub fn state(&self, tile: IVec2, id: FoliageTypeId) -> Option<MemoryStoreState> {
		self.store(tile, id).map(|store| store.snapshot())
	}

	/// Number of (tile, type) stores currently registered.
	pub fn len(&self) -> usize {
		self.stores.read().unwrap_or_else(|poisoned| poisoned.into_inner()).len()
	}

	pub fn is_empty(&self) -> bool {
		self.len() == 0
	}
}

impl InstanceStoreFactory for MemoryStoreFactory {
	fn create_store(&mut self, tile: IVec2, foliage_type: &FoliageTypeSpec) -> Option<Box<dyn InstanceStore>> {
		let id = foliage_type.id();
		if self.refused.contains(&id) {
			return None;
		}

		let store = MemoryInstanceStore::new();
		self.stores
			.write()
			.unwrap_or_else(|poisoned| poisoned.into_inner())
			.insert((tile, id), store.clone());
		Some(Box::new(store))
	}
}
