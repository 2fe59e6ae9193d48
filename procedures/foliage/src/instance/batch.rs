use super::{InstancePool, InstanceStore};
use crate::foliage_type::FoliageTypeId;
use crate::placement::{PlacementTransform, Placements};
use crate::queue::TaskQueue;
use bevy::prelude::*;

/// Largest number of instances added to a store in one operation.
pub const INSTANCES_PER_CHUNK: usize = 25_000;

/// A unit of main-thread work against a tile's instance stores.
#[derive(Debug, Clone, PartialEq)]
pub enum FoliageTask {
	Clear { tile: IVec2, foliage_type: FoliageTypeId },
	Add { tile: IVec2, foliage_type: FoliageTypeId, transforms: Vec<PlacementTransform> },
	RebuildSpatialIndex { tile: IVec2, foliage_type: FoliageTypeId },
	/// Every store operation of the tile's cycle has run.
	MarkReady { tile: IVec2, cycle: u64 },
}

impl FoliageTask {
	pub fn tile(&self) -> IVec2 {
		match self {
			FoliageTask::Clear { tile, .. }
			| FoliageTask::Add { tile, .. }
			| FoliageTask::RebuildSpatialIndex { tile, .. }
			| FoliageTask::MarkReady { tile, .. } => *tile,
		}
	}

	/// Runs a store operation against `pool`. Returns false when the target store is gone.
	/// `MarkReady` carries no store work and always succeeds.
	pub fn apply(self, pool: &mut InstancePool) -> bool {
		match self {
			FoliageTask::Clear { foliage_type, .. } => with_store(pool, foliage_type, |store| store.clear()),
			FoliageTask::Add { foliage_type, transforms, .. } => {
				with_store(pool, foliage_type, |store| store.add_instances(&transforms))
			}
			FoliageTask::RebuildSpatialIndex { foliage_type, .. } => {
				with_store(pool, foliage_type, |store| store.rebuild_spatial_index())
			}
			FoliageTask::MarkReady { .. } => true,
		}
	}
}

fn with_store(pool: &mut InstancePool, id: FoliageTypeId, op: impl FnOnce(&mut dyn InstanceStore)) -> bool {
	match pool.get_mut(id) {
		Some(store) => {
			op(store);
			true
		}
		None => false,
	}
}

/// Splits `transforms` into consecutive chunks of at most `chunk_size`, preserving order.
pub fn chunk_transforms(
	mut transforms: Vec<PlacementTransform>,
	chunk_size: usize,
) -> Vec<Vec<PlacementTransform>> {
	let chunk_size = chunk_size.max(1);
	if transforms.len() <= chunk_size {
		return vec![transforms];
	}

	let mut chunks = Vec::with_capacity(transforms.len().div_ceil(chunk_size));
	while transforms.len() > chunk_size {
		let rest = transforms.split_off(chunk_size);
		chunks.push(std::mem::replace(&mut transforms, rest));
	}
	chunks.push(transforms);
	chunks
}

/// Turns a tile's placements into queued store operations.
#[derive(Debug, Clone, Copy)]
pub struct InstanceBatchWriter {
	chunk_size: usize,
}

impl Default for InstanceBatchWriter {
	fn default() -> Self {
		Self { chunk_size: INSTANCES_PER_CHUNK }
	}
}

impl InstanceBatchWriter {
	pub fn new(chunk_size: usize) -> Self {
		Self { chunk_size: chunk_size.max(1) }
	}

	pub fn chunk_size(&self) -> usize {
		self.chunk_size
	}

	/// Queues clear, chunked add and one rebuild per type, then the tile's `MarkReady`.
	///
	/// Types without a store on the tile are logged and skipped. Returns the number of types
	/// written.
	pub fn apply(
		&self,
		tile: IVec2,
		cycle: u64,
		placements: Placements,
		pool: &InstancePool,
		queue: &mut TaskQueue<FoliageTask>,
	) -> usize {
		let mut written = 0;

		for (foliage_type, transforms) in placements {
			if transforms.is_empty() {
				continue;
			}
			if !pool.contains(foliage_type) {
				log::error!(
					"No instance storage for foliage type {} on tile {}, dropping {} instances",
					foliage_type,
					tile,
					transforms.len()
				);
				continue;
			}

			queue.push(FoliageTask::Clear { tile, foliage_type });
			for chunk in chunk_transforms(transforms, self.chunk_size) {
				queue.push(FoliageTask::Add { tile, foliage_type, transforms: chunk });
			}
			queue.push(FoliageTask::RebuildSpatialIndex { tile, foliage_type });
			written += 1;
		}

		queue.push(FoliageTask::MarkReady { tile, cycle });
		written
	}
}
