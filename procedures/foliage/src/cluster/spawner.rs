use super::engine::{CancellationToken, GeoFeaturePlacementEngine};
use super::feature::{parse_feature_collection, Polygon, SpatialFeature};
use super::ClusterConfig;
use crate::foliage_type::{FoliageCollection, FoliageTypeId};
use crate::instance::{chunk_transforms, InstanceBatchWriter, InstancePool, InstanceStoreFactory};
use crate::placement::Placements;
use crate::scheduler::SpawnerError;
use bevy::prelude::*;
use crossbeam_channel::{Receiver, Sender};
use rayon::{ThreadPool, ThreadPoolBuilder};
use std::collections::HashMap;
use std::sync::Arc;
use std::time::{Duration, Instant};

/// A finished feature, tagged with what it was computed from. `slot` is the feature's position
/// in the load, since hosts may hand over features that share an id.
struct FeatureResult {
	slot: usize,
	feature: u32,
	generation: u64,
	geometry: Arc<Polygon>,
	placements: Placements,
}

/// Scatters foliage inside vector features, one worker job per feature.
///
/// All features share a single set of instance stores. Loading new features replaces the stores;
/// results from an earlier load are dropped when they arrive.
#[derive(Resource)]
pub struct ClusterFoliageSpawner {
	collection: FoliageCollection,
	features: Vec<SpatialFeature>,
	engine: Arc<GeoFeaturePlacementEngine>,
	writer: InstanceBatchWriter,
	pool: InstancePool,
	factory: Box<dyn InstanceStoreFactory>,
	workers: ThreadPool,
	sender: Sender<FeatureResult>,
	receiver: Receiver<FeatureResult>,
	/// Cancellation tokens of dispatched jobs, by feature slot.
	running: HashMap<usize, CancellationToken>,
	/// Incremented on every load.
	generation: u64,
}

impl ClusterFoliageSpawner {
	pub fn new(
		config: ClusterConfig,
		collection: FoliageCollection,
		factory: Box<dyn InstanceStoreFactory>,
	) -> Result<Self, SpawnerError> {
		let workers = ThreadPoolBuilder::new()
			.num_threads(config.worker_threads)
			.thread_name(|index| format!("cluster-foliage-{}", index))
			.build()?;
		let (sender, receiver) = crossbeam_channel::unbounded();

		Ok(Self {
			collection,
			features: Vec::new(),
			engine: Arc::new(GeoFeaturePlacementEngine::new(&config)),
			writer: InstanceBatchWriter::default(),
			pool: InstancePool::new(),
			factory,
			workers,
			sender,
			receiver,
			running: HashMap::new(),
			generation: 0,
		})
	}

	pub fn with_engine(mut self, engine: GeoFeaturePlacementEngine) -> Self {
		self.engine = Arc::new(engine);
		self
	}

	pub fn with_batch_writer(mut self, writer: InstanceBatchWriter) -> Self {
		self.writer = writer;
		self
	}

	pub fn collection(&self) -> &FoliageCollection {
		&self.collection
	}

	/// Takes effect on the next load.
	pub fn set_collection(&mut self, collection: FoliageCollection) {
		self.collection = collection;
	}

	/// Parses `data` as GeoJSON and starts scattering its features. See [`Self::load_features`].
	pub fn load_geojson(&mut self, data: &str, force: bool) -> usize {
		if !self.may_reload(force) {
			return 0;
		}
		let features = parse_feature_collection(data);
		self.replace_features(features)
	}

	/// Replaces the features and the instance stores, then dispatches a job per feature that has
	/// geometry and foliage types. Returns the number of jobs started.
	///
	/// Refused while earlier jobs are running unless `force` is set, which cancels them.
	pub fn load_features(&mut self, features: Vec<SpatialFeature>, force: bool) -> usize {
		if !self.may_reload(force) {
			return 0;
		}
		self.replace_features(features)
	}

	fn may_reload(&mut self, force: bool) -> bool {
		if !self.any_workers_running() {
			return true;
		}
		if !force {
			log::warn!("Foliage still building for {} features, not loading new features", self.running.len());
			return false;
		}
		self.cancel_all();
		true
	}

	fn replace_features(&mut self, features: Vec<SpatialFeature>) -> usize {
		self.generation += 1;

		let types = self.collection.unique_types();
		self.pool = InstancePool::build(IVec2::ZERO, types.iter().map(|t| t.as_ref()), self.factory.as_mut());
		self.pool.set_collision(true);
		self.features = features;

		let mut dispatched = 0;
		for (slot, feature) in self.features.iter().enumerate() {
			let Some(geometry) = feature.geometry.clone() else {
				continue;
			};
			let Some(types) = self.collection.types_for(feature.kind).filter(|types| !types.is_empty()) else {
				continue;
			};

			let token = CancellationToken::new();
			self.running.insert(slot, token.clone());

			let engine = Arc::clone(&self.engine);
			let types = types.to_vec();
			let feature = feature.clone();
			let generation = self.generation;
			let sender = self.sender.clone();

			self.workers.spawn(move || {
				let Some(placements) = engine.compute_feature(&feature, &types, &token) else {
					return;
				};
				if token.is_cancelled() {
					return;
				}
				let _ = sender.send(FeatureResult { slot, feature: feature.id, generation, geometry, placements });
			});
			dispatched += 1;
		}

		log::info!(
			"Loaded {} features with {} foliage types, {} building (generation {})",
			self.features.len(),
			types.len(),
			dispatched,
			self.generation
		);
		dispatched
	}

	/// Applies every finished feature. Returns the number applied.
	pub fn poll(&mut self) -> usize {
		let mut applied = 0;
		while let Ok(result) = self.receiver.try_recv() {
			if self.apply_result(result) {
				applied += 1;
			}
		}
		applied
	}

	fn apply_result(&mut self, result: FeatureResult) -> bool {
		if result.generation != self.generation {
			log::debug!("Dropping feature {} from generation {}", result.feature, result.generation);
			return false;
		}
		self.running.remove(&result.slot);

		let Some(feature) = self.features.get(result.slot) else {
			log::debug!("Dropping result for unknown feature {}", result.feature);
			return false;
		};
		if !feature.geometry.as_ref().is_some_and(|geometry| Arc::ptr_eq(geometry, &result.geometry)) {
			log::debug!("Geometry of feature {} changed, dropping result", result.feature);
			return false;
		}

		for (foliage_type, transforms) in result.placements {
			let Some(store) = self.pool.get_mut(foliage_type) else {
				log::error!(
					"No instance storage for foliage type {}, dropping {} instances of feature {}",
					foliage_type,
					transforms.len(),
					result.feature
				);
				continue;
			};
			for chunk in chunk_transforms(transforms, self.writer.chunk_size()) {
				store.add_instances(&chunk);
			}
			store.rebuild_spatial_index();
		}
		true
	}

	/// Blocks until every job of the current load has been applied or `timeout` elapses.
	/// Returns false on timeout.
	pub fn wait_for_workers(&mut self, timeout: Duration) -> bool {
		let deadline = Instant::now() + timeout;
		while self.any_workers_running() {
			let remaining = deadline.saturating_duration_since(Instant::now());
			match self.receiver.recv_timeout(remaining) {
				Ok(result) => {
					self.apply_result(result);
				}
				Err(_) => return false,
			}
		}
		true
	}

	/// True until every dispatched feature has been applied.
	pub fn any_workers_running(&self) -> bool {
		!self.running.is_empty()
	}

	pub fn running_workers(&self) -> usize {
		self.running.len()
	}

	/// Cancels every running job; none of them will deliver a result.
	pub fn cancel_all(&mut self) {
		if self.running.is_empty() {
			return;
		}
		log::debug!("Cancelling {} feature jobs", self.running.len());
		for (_, token) in self.running.drain() {
			token.cancel();
		}
	}

	pub fn features(&self) -> &[SpatialFeature] {
		&self.features
	}

	pub fn feature(&self, id: u32) -> Option<&SpatialFeature> {
		self.features.iter().find(|feature| feature.id == id)
	}

	pub fn generation(&self) -> u64 {
		self.generation
	}

	pub fn instance_count(&self, foliage_type: FoliageTypeId) -> Option<usize> {
		self.pool.get(foliage_type).map(|store| store.instance_count())
	}

	pub fn total_instance_count(&self) -> usize {
		self.pool.total_instance_count()
	}
}

impl Drop for ClusterFoliageSpawner {
	fn drop(&mut self) {
		self.cancel_all();
	}
}

#[cfg(test)]
mod tests {
	use super::*;
	use crate::cluster::heightfield::{ElevationQuery, NormalQuery};
	use crate::foliage_type::FoliageTypeSpec;
	use crate::instance::{MemoryStoreFactory, StoreOp};
	use bevy::math::DVec2;
	use std::sync::{PoisonError, RwLock};

	const WAIT: Duration = Duration::from_secs(10);

	fn square(id: u32, kind: i32, side: f64) -> SpatialFeature {
		let polygon = Polygon::new(vec![
			DVec2::ZERO,
			DVec2::new(side, 0.0),
			DVec2::new(side, side),
			DVec2::new(0.0, side),
		]);
		SpatialFeature { id, kind, geometry: polygon.map(Arc::new), properties: HashMap::new() }
	}

	fn spawner(collection: FoliageCollection) -> (ClusterFoliageSpawner, MemoryStoreFactory) {
		let factory = MemoryStoreFactory::new();
		match ClusterFoliageSpawner::new(ClusterConfig::default(), collection, Box::new(factory.clone())) {
			Ok(spawner) => (spawner, factory),
			Err(e) => panic!("failed to build spawner: {}", e),
		}
	}

	fn expected(features: &[SpatialFeature], types: &[Arc<FoliageTypeSpec>]) -> usize {
		let engine = GeoFeaturePlacementEngine::default();
		features
			.iter()
			.filter_map(|feature| engine.compute_feature(feature, types, &CancellationToken::new()))
			.map(|placements| placements.total_instances())
			.sum()
	}

	/// Flat ground that blocks while the gate is held for writing.
	struct Gated {
		gate: Arc<RwLock<()>>,
	}

	impl ElevationQuery for Gated {
		fn elevation(&self, _position: DVec2) -> Option<f64> {
			let _open = self.gate.read().unwrap_or_else(PoisonError::into_inner);
			Some(0.0)
		}
	}

	impl NormalQuery for Gated {
		fn normal(&self, _position: DVec2) -> Option<Vec3> {
			Some(Vec3::Z)
		}
	}

	#[test]
	fn test_features_are_applied() {
		let grass = Arc::new(FoliageTypeSpec::new("grass").with_density(10.0).with_collision_enabled(true));
		let (mut spawner, factory) = spawner(FoliageCollection::new().with_types(1, vec![grass.clone()]));

		let features = vec![square(0, 1, 100.0), square(1, 1, 60.0)];
		assert_eq!(spawner.load_features(features.clone(), false), 2);
		assert!(spawner.wait_for_workers(WAIT));
		assert!(!spawner.any_workers_running());

		let total = expected(&features, &[grass.clone()]);
		assert!(total > 0);
		assert_eq!(spawner.instance_count(grass.id()), Some(total));
		assert_eq!(spawner.total_instance_count(), total);

		let state = factory.state(IVec2::ZERO, grass.id()).unwrap_or_default();
		assert!(state.collision_enabled);
		assert!(!state.ops.contains(&StoreOp::Clear));
		assert_eq!(state.ops.iter().filter(|op| **op == StoreOp::RebuildSpatialIndex).count(), 2);
		assert_eq!(state.indexed, total);
	}

	#[test]
	fn test_only_features_with_geometry_and_types_are_dispatched() {
		let grass = Arc::new(FoliageTypeSpec::new("grass").with_density(10.0));
		let (mut spawner, _) = spawner(FoliageCollection::new().with_types(1, vec![grass]).with_types(2, vec![]));

		let no_geometry = SpatialFeature { id: 2, kind: 1, geometry: None, properties: HashMap::new() };
		let features = vec![square(0, 1, 50.0), square(1, 5, 50.0), no_geometry, square(3, 2, 50.0)];
		assert_eq!(spawner.load_features(features, false), 1);
		assert_eq!(spawner.features().len(), 4);
		assert!(spawner.feature(3).is_some());
		assert!(spawner.wait_for_workers(WAIT));
	}

	#[test]
	fn test_large_batches_are_chunked() {
		let grass = Arc::new(FoliageTypeSpec::new("grass").with_density(4.0));
		let (spawner, factory) = spawner(FoliageCollection::new().with_types(0, vec![grass.clone()]));
		let mut spawner = spawner.with_batch_writer(InstanceBatchWriter::new(100));

		let field = vec![square(0, 0, 200.0)];
		let total = expected(&field, &[grass.clone()]);
		assert!(total > 200);

		spawner.load_features(field, false);
		assert!(spawner.wait_for_workers(WAIT));

		let state = factory.state(IVec2::ZERO, grass.id()).unwrap_or_default();
		let adds: Vec<usize> = state
			.ops
			.iter()
			.filter_map(|op| match op {
				StoreOp::Add(n) => Some(*n),
				_ => None,
			})
			.collect();
		assert_eq!(adds.len(), total.div_ceil(100));
		assert!(adds.iter().all(|n| *n <= 100));
		assert_eq!(state.ops.last(), Some(&StoreOp::RebuildSpatialIndex));
		assert_eq!(state.instances.len(), total);
	}

	#[test]
	fn test_reload_guard() {
		let grass = Arc::new(FoliageTypeSpec::new("grass").with_density(10.0));
		let gate = Arc::new(RwLock::new(()));
		let closed = gate.write().unwrap_or_else(PoisonError::into_inner);

		let (spawner, _) = spawner(FoliageCollection::new().with_types(1, vec![grass.clone()]));
		let mut spawner =
			spawner.with_engine(GeoFeaturePlacementEngine::default().with_heightfield(Gated { gate: gate.clone() }));

		assert_eq!(spawner.load_features(vec![square(0, 1, 100.0)], false), 1);
		assert!(spawner.any_workers_running());
		assert_eq!(spawner.poll(), 0);

		let reloaded = vec![square(0, 1, 80.0), square(1, 1, 40.0)];
		assert_eq!(spawner.load_features(reloaded.clone(), false), 0);
		assert_eq!(spawner.features().len(), 1);
		assert_eq!(spawner.generation(), 1);

		assert_eq!(spawner.load_features(reloaded.clone(), true), 2);
		assert_eq!(spawner.generation(), 2);
		drop(closed);

		assert!(spawner.wait_for_workers(WAIT));
		assert_eq!(spawner.total_instance_count(), expected(&reloaded, &[grass]));
	}

	#[test]
	fn test_load_geojson() {
		let grass = Arc::new(FoliageTypeSpec::new("grass").with_density(10.0));
		let (mut spawner, _) = spawner(FoliageCollection::new().with_types(4, vec![grass.clone()]));

		let data = r#"{
			"type": "FeatureCollection",
			"features": [{
				"type": "Feature",
				"geometry": { "type": "Polygon", "coordinates": [[[0, 0], [100, 0], [100, 100], [0, 100], [0, 0]]] },
				"properties": { "type": 4 }
			}]
		}"#;
		assert_eq!(spawner.load_geojson(data, false), 1);
		assert!(spawner.wait_for_workers(WAIT));
		assert!(spawner.instance_count(grass.id()).is_some_and(|n| n > 0));

		assert_eq!(spawner.load_geojson("not geojson", false), 0);
		assert!(spawner.features().is_empty());
		assert_eq!(spawner.instance_count(grass.id()), Some(0));
	}

	#[test]
	fn test_features_sharing_an_id_are_all_applied() {
		let grass = Arc::new(FoliageTypeSpec::new("grass").with_density(10.0));
		let (mut spawner, _) = spawner(FoliageCollection::new().with_types(1, vec![grass.clone()]));

		let near = square(7, 1, 100.0);
		let mut far = square(7, 1, 100.0);
		far.geometry = Polygon::new(vec![
			DVec2::new(500.0, 500.0),
			DVec2::new(600.0, 500.0),
			DVec2::new(600.0, 600.0),
			DVec2::new(500.0, 600.0),
		])
		.map(Arc::new);

		let single = expected(std::slice::from_ref(&near), &[grass.clone()]);
		let both = expected(&[near.clone(), far.clone()], &[grass.clone()]);
		assert!(single > 0);
		assert!(both > single);

		assert_eq!(spawner.load_features(vec![near, far], false), 2);
		assert_eq!(spawner.running_workers(), 2);
		assert!(spawner.wait_for_workers(WAIT));
		assert_eq!(spawner.instance_count(grass.id()), Some(both));
	}
}
