pub mod capture;
pub mod state;

pub use capture::{CaptureError, CaptureRequest, SceneCapture};
pub use state::TileState;

use crate::foliage_type::{FoliageTypeId, FoliageTypeList};
use crate::frame::{FlatFrame, WorldFrame};
use crate::instance::{FoliageTask, InstanceBatchWriter, InstancePool, InstanceStoreFactory};
use crate::placement::{PlacementSettings, Placements, TilePlacementEngine};
use crate::queue::TaskQueue;
use crate::tile::{tile_layout, TileDescriptor};
use bevy::prelude::*;
use crossbeam_channel::{Receiver, Sender};
use rayon::{ThreadPool, ThreadPoolBuilder};
use std::collections::HashMap;
use std::sync::Arc;
use std::time::{Duration, Instant};
use thiserror::Error;

#[derive(Debug, Error)]
pub enum SpawnerError {
	#[error("failed to build foliage worker pool: {0}")]
	WorkerPool(#[from] rayon::ThreadPoolBuildError),
}

/// Configuration for the tiled foliage spawner
#[derive(Resource, Debug, Clone)]
pub struct SpawnerConfig {
	/// World-space width of one tile
	pub tile_diameter: f32,
	/// Side length of each tile's captured buffers in pixels
	pub tile_pixel_size: usize,
	/// Tiles extend `-tile_count..=tile_count` around the origin tile on each axis
	pub tile_count: IVec2,
	/// Fraction of the tiled extent the camera travels before a refresh
	pub refresh_factor: f32,
	/// Seconds between refresh decisions
	pub update_frequency: f32,
	/// Camera speed in units per second above which refreshes are deferred
	pub velocity_threshold: f32,
	pub capture_tasks_per_tick: usize,
	pub foliage_tasks_per_tick: usize,
	/// All tiles share one set of capture buffers, so only one tile captures at a time
	pub shared_render_targets: bool,
	/// Height above the surface the refresh origin is snapped to
	pub distance_above_surface: f32,
	/// Seconds a tile may stay on a worker before it is reset
	pub compute_timeout: f32,
	pub disable_updates: bool,
	/// Worker threads for capture and compute; zero lets rayon decide
	pub worker_threads: usize,
	pub placement: PlacementSettings,
}

impl Default for SpawnerConfig {
	fn default() -> Self {
		Self {
			tile_diameter: 2000.0,
			tile_pixel_size: 256,
			tile_count: IVec2::ONE,
			refresh_factor: 0.95,
			update_frequency: 0.2,
			velocity_threshold: 100.0,
			capture_tasks_per_tick: 1,
			foliage_tasks_per_tick: 4,
			shared_render_targets: true,
			distance_above_surface: 2000.0,
			compute_timeout: 30.0,
			disable_updates: false,
			worker_threads: 0,
			placement: PlacementSettings::default(),
		}
	}
}

impl SpawnerConfig {
	pub fn with_tile_diameter(mut self, tile_diameter: f32) -> Self {
		self.tile_diameter = tile_diameter;
		self
	}

	pub fn with_tile_pixel_size(mut self, tile_pixel_size: usize) -> Self {
		self.tile_pixel_size = tile_pixel_size;
		self
	}

	pub fn with_tile_count(mut self, tile_count: IVec2) -> Self {
		self.tile_count = tile_count;
		self
	}

	pub fn with_refresh_factor(mut self, refresh_factor: f32) -> Self {
		self.refresh_factor = refresh_factor;
		self
	}

	pub fn with_update_frequency(mut self, update_frequency: f32) -> Self {
		self.update_frequency = update_frequency;
		self
	}

	pub fn with_velocity_threshold(mut self, velocity_threshold: f32) -> Self {
		self.velocity_threshold = velocity_threshold;
		self
	}

	pub fn with_task_budgets(mut self, capture_tasks_per_tick: usize, foliage_tasks_per_tick: usize) -> Self {
		self.capture_tasks_per_tick = capture_tasks_per_tick;
		self.foliage_tasks_per_tick = foliage_tasks_per_tick;
		self
	}

	pub fn with_shared_render_targets(mut self, shared: bool) -> Self {
		self.shared_render_targets = shared;
		self
	}

	pub fn with_distance_above_surface(mut self, distance: f32) -> Self {
		self.distance_above_surface = distance;
		self
	}

	pub fn with_compute_timeout(mut self, seconds: f32) -> Self {
		self.compute_timeout = seconds;
		self
	}

	pub fn with_disable_updates(mut self, disable_updates: bool) -> Self {
		self.disable_updates = disable_updates;
		self
	}

	pub fn with_worker_threads(mut self, worker_threads: usize) -> Self {
		self.worker_threads = worker_threads;
		self
	}

	pub fn with_placement(mut self, placement: PlacementSettings) -> Self {
		self.placement = placement;
		self
	}

	/// Camera displacement that triggers a refresh.
	pub fn refresh_distance(&self) -> f32 {
		self.tile_diameter * self.tile_count.as_vec2().length() * self.refresh_factor
	}

	/// Captures started per tick; shared capture buffers allow only one.
	pub fn capture_budget(&self) -> usize {
		if self.shared_render_targets {
			1
		} else {
			self.capture_tasks_per_tick
		}
	}
}

/// Identifies the cycle a worker result belongs to.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
struct Ticket {
	tile: IVec2,
	cycle: u64,
	generation: u64,
}

enum WorkerEvent {
	Captured { ticket: Ticket },
	Computed { ticket: Ticket, placements: Placements },
	Failed { ticket: Ticket, error: CaptureError },
}

impl WorkerEvent {
	fn ticket(&self) -> Ticket {
		match self {
			WorkerEvent::Captured { ticket }
			| WorkerEvent::Computed { ticket, .. }
			| WorkerEvent::Failed { ticket, .. } => *ticket,
		}
	}
}

struct TileSlot {
	descriptor: TileDescriptor,
	state: TileState,
	/// Incremented each time a capture starts or an in-flight cycle is abandoned.
	cycle: u64,
	/// Seconds spent on a worker in the current cycle.
	in_flight_for: f32,
	pool: InstancePool,
}

/// Keeps a camera-centred grid of foliage tiles up to date.
///
/// Everything here runs on the main thread inside [`FoliageSpawner::tick`]; captures and placement
/// computation run on a worker pool and report back through a channel drained at the start of
/// each tick.
#[derive(Resource)]
pub struct FoliageSpawner {
	config: SpawnerConfig,
	types: FoliageTypeList,
	tiles: HashMap<IVec2, TileSlot>,
	/// Tile coordinates, closest to the origin tile first.
	tile_order: Vec<IVec2>,
	capture_queue: TaskQueue<IVec2>,
	foliage_queue: TaskQueue<FoliageTask>,
	capture: Arc<dyn SceneCapture>,
	factory: Box<dyn InstanceStoreFactory>,
	frame: Box<dyn WorldFrame>,
	engine: TilePlacementEngine,
	writer: InstanceBatchWriter,
	workers: ThreadPool,
	sender: Sender<WorkerEvent>,
	receiver: Receiver<WorkerEvent>,
	/// Incremented whenever the foliage types change.
	generation: u64,
	force_update: bool,
	update_time: f32,
	refresh_origin: Vec3,
	last_update_position: Option<Vec3>,
	last_camera_position: Option<Vec3>,
	camera_speed: f32,
	nearest_tile: Option<IVec2>,
}

impl FoliageSpawner {
	pub fn new(
		config: SpawnerConfig,
		capture: Arc<dyn SceneCapture>,
		factory: Box<dyn InstanceStoreFactory>,
	) -> Result<Self, SpawnerError> {
		let workers = ThreadPoolBuilder::new()
			.num_threads(config.worker_threads)
			.thread_name(|index| format!("foliage-worker-{}", index))
			.build()?;
		let (sender, receiver) = crossbeam_channel::unbounded();

		let tile_order = tile_layout(config.tile_count);
		let tiles = tile_order
			.iter()
			.map(|coord| {
				let slot = TileSlot {
					descriptor: TileDescriptor::new(*coord, config.tile_diameter),
					state: TileState::Idle,
					cycle: 0,
					in_flight_for: 0.0,
					pool: InstancePool::new(),
				};
				(*coord, slot)
			})
			.collect();

		log::info!(
			"Foliage spawner with {} tiles of diameter {} at {}px",
			tile_order.len(),
			config.tile_diameter,
			config.tile_pixel_size
		);

		Ok(Self {
			engine: TilePlacementEngine::new(config.placement),
			config,
			types: Vec::new(),
			tiles,
			tile_order,
			capture_queue: TaskQueue::new(),
			foliage_queue: TaskQueue::new(),
			capture,
			factory,
			frame: Box::new(FlatFrame),
			writer: InstanceBatchWriter::default(),
			workers,
			sender,
			receiver,
			generation: 0,
			force_update: false,
			update_time: 0.0,
			refresh_origin: Vec3::ZERO,
			last_update_position: None,
			last_camera_position: None,
			camera_speed: 0.0,
			nearest_tile: None,
		})
	}

	pub fn with_frame(mut self, frame: impl WorldFrame + 'static) -> Self {
		self.frame = Box::new(frame);
		self
	}

	pub fn with_batch_writer(mut self, writer: InstanceBatchWriter) -> Self {
		self.writer = writer;
		self
	}

	pub fn with_foliage_types(mut self, types: FoliageTypeList) -> Self {
		self.set_foliage_types(types);
		self
	}

	pub fn config(&self) -> &SpawnerConfig {
		&self.config
	}

	pub fn foliage_types(&self) -> &FoliageTypeList {
		&self.types
	}

	/// Replaces the foliage types and rebuilds every tile's instance stores.
	pub fn set_foliage_types(&mut self, types: FoliageTypeList) {
		self.types = types;
		self.reconfigure();
	}

	/// Abandons queued work, recreates instance storage and forces a refresh.
	///
	/// Work already on a worker runs to completion; its result is dropped when it arrives.
	pub fn reconfigure(&mut self) {
		self.generation += 1;
		let abandoned = self.capture_queue.clear() + self.foliage_queue.clear();

		for coord in &self.tile_order {
			let Some(slot) = self.tiles.get_mut(coord) else {
				continue;
			};
			slot.pool = InstancePool::build(
				*coord,
				self.types.iter().flatten().map(|t| t.as_ref()),
				self.factory.as_mut(),
			);
			if matches!(slot.state, TileState::CaptureQueued | TileState::Applying) {
				slot.state = TileState::Idle;
			}
		}

		// stores are fresh, collision has to be assigned again
		self.nearest_tile = None;
		self.force_update = true;

		log::info!(
			"Reconfigured foliage spawner with {} types (generation {}, {} queued tasks abandoned)",
			self.types.len(),
			self.generation,
			abandoned
		);
	}

	/// Requests a refresh at the next update regardless of camera movement.
	pub fn refresh(&mut self) {
		self.force_update = true;
	}

	/// Advances the spawner by `delta_seconds` with the camera at `camera`.
	pub fn tick(&mut self, delta_seconds: f32, camera: Option<Vec3>) {
		self.drain_worker_events();
		self.expire_stalled_tiles(delta_seconds);

		self.update_time += delta_seconds;
		if self.update_time > self.config.update_frequency
			&& !self.config.disable_updates
			&& self.is_ready_to_update()
		{
			let elapsed = self.update_time;
			self.update_time = 0.0;
			if let Some(camera) = camera {
				self.update(camera, elapsed);
			}
		}

		self.drain_capture_queue();
		self.drain_foliage_queue();
	}

	fn update(&mut self, camera: Vec3, elapsed: f32) {
		self.camera_speed = match self.last_camera_position {
			Some(last) if elapsed > 0.0 => camera.distance(last) / elapsed,
			_ => 0.0,
		};
		self.last_camera_position = Some(camera);

		let snapped = self.frame.snap_to_height(camera, self.config.distance_above_surface);
		self.update_nearest_tile(snapped);

		let should_refresh = match self.last_update_position {
			None => true,
			Some(last) => {
				self.force_update
					|| (snapped.distance(last) > self.config.refresh_distance()
						&& self.camera_speed < self.config.velocity_threshold)
			}
		};

		if should_refresh {
			self.begin_refresh(snapped);
		}
	}

	fn begin_refresh(&mut self, origin: Vec3) {
		log::debug!("Refreshing foliage from {:?} to {}", self.last_update_position, origin);

		self.refresh_origin = origin;
		self.last_update_position = Some(origin);
		self.force_update = false;
		self.capture_queue.clear();
		self.foliage_queue.clear();

		for coord in &self.tile_order {
			let Some(slot) = self.tiles.get_mut(coord) else {
				continue;
			};
			match slot.state {
				TileState::Idle | TileState::CaptureQueued => {
					slot.state = TileState::CaptureQueued;
					self.capture_queue.push(*coord);
				}
				state => log::debug!("Tile {} is {:?}, not queued for capture", coord, state),
			}
		}
	}

	fn update_nearest_tile(&mut self, position: Vec3) {
		let nearest = self
			.tile_order
			.iter()
			.copied()
			.find(|coord| self.tiles.get(coord).is_some_and(|slot| slot.descriptor.contains(position)));

		if nearest == self.nearest_tile {
			return;
		}

		log::debug!("Nearest foliage tile changed from {:?} to {:?}", self.nearest_tile, nearest);
		for (coord, slot) in self.tiles.iter_mut() {
			slot.pool.set_collision(Some(*coord) == nearest);
		}
		self.nearest_tile = nearest;
	}

	fn drain_capture_queue(&mut self) {
		let budget = self.config.capture_budget();
		let mut started = 0;

		while started < budget {
			if self.config.shared_render_targets && !self.is_ready_to_update() {
				break;
			}
			let Some(coord) = self.capture_queue.pop() else {
				break;
			};
			if self.start_capture(coord) {
				started += 1;
			}
		}
	}

	fn start_capture(&mut self, coord: IVec2) -> bool {
		let Some(slot) = self.tiles.get_mut(&coord) else {
			return false;
		};
		if slot.state != TileState::CaptureQueued {
			log::debug!("Skipping capture of tile {} in state {:?}", coord, slot.state);
			return false;
		}

		let rotation = self.frame.east_north_up(self.refresh_origin);
		let d = self.config.tile_diameter;
		let translation =
			self.refresh_origin + rotation * Vec3::new(d * coord.x as f32, d * coord.y as f32, 0.0);
		slot.descriptor.transform = Transform { translation, rotation, scale: Vec3::ONE };

		slot.cycle += 1;
		slot.state = TileState::Capturing;
		slot.in_flight_for = 0.0;

		let ticket = Ticket { tile: coord, cycle: slot.cycle, generation: self.generation };
		let request = CaptureRequest {
			tile: coord,
			transform: slot.descriptor.transform,
			diameter: d,
			resolution: self.config.tile_pixel_size,
		};
		let descriptor = slot.descriptor.clone();
		let types = self.types.clone();
		let capture = Arc::clone(&self.capture);
		let engine = self.engine.clone();
		let sender = self.sender.clone();

		self.workers.spawn(move || {
			let grid = match capture.capture(&request) {
				Ok(grid) => grid,
				Err(error) => {
					let _ = sender.send(WorkerEvent::Failed { ticket, error });
					return;
				}
			};
			// a closed channel means the spawner is gone
			if sender.send(WorkerEvent::Captured { ticket }).is_err() {
				return;
			}
			let placements = engine.compute(&grid, &descriptor, &types);
			let _ = sender.send(WorkerEvent::Computed { ticket, placements });
		});

		log::trace!("Started capture of tile {} (cycle {})", coord, ticket.cycle);
		true
	}

	fn drain_worker_events(&mut self) {
		while let Ok(event) = self.receiver.try_recv() {
			self.handle_worker_event(event);
		}
	}

	fn handle_worker_event(&mut self, event: WorkerEvent) {
		let ticket = event.ticket();
		let Some(slot) = self.tiles.get_mut(&ticket.tile) else {
			return;
		};
		if slot.cycle != ticket.cycle || !slot.state.is_on_worker() {
			log::debug!("Dropping stale result for tile {} (cycle {})", ticket.tile, ticket.cycle);
			return;
		}
		if ticket.generation != self.generation {
			log::debug!("Dropping result for tile {} from generation {}", ticket.tile, ticket.generation);
			slot.state = TileState::Idle;
			slot.in_flight_for = 0.0;
			return;
		}

		match event {
			WorkerEvent::Captured { .. } => {
				slot.state = TileState::ComputeQueued;
			}
			WorkerEvent::Computed { placements, .. } => {
				slot.state = TileState::Applying;
				slot.in_flight_for = 0.0;
				self.writer.apply(ticket.tile, ticket.cycle, placements, &slot.pool, &mut self.foliage_queue);
			}
			WorkerEvent::Failed { error, .. } => {
				log::error!("Foliage capture failed: {}", error);
				slot.state = TileState::Idle;
				slot.in_flight_for = 0.0;
			}
		}
	}

	fn expire_stalled_tiles(&mut self, delta_seconds: f32) {
		for (coord, slot) in self.tiles.iter_mut() {
			if !slot.state.is_on_worker() {
				continue;
			}
			slot.in_flight_for += delta_seconds;
			if slot.in_flight_for > self.config.compute_timeout {
				log::warn!(
					"Tile {} spent {:.1}s in {:?}, abandoning cycle {}",
					coord,
					slot.in_flight_for,
					slot.state,
					slot.cycle
				);
				slot.state = TileState::Idle;
				slot.cycle += 1;
				slot.in_flight_for = 0.0;
			}
		}
	}

	fn drain_foliage_queue(&mut self) {
		for task in self.foliage_queue.drain_up_to(self.config.foliage_tasks_per_tick) {
			let tile = task.tile();
			let Some(slot) = self.tiles.get_mut(&tile) else {
				continue;
			};

			match task {
				FoliageTask::MarkReady { cycle, .. } => {
					if slot.cycle == cycle && slot.state == TileState::Applying {
						slot.state = TileState::Idle;
						log::trace!("Tile {} finished cycle {}", tile, cycle);
					}
				}
				task => {
					if !task.apply(&mut slot.pool) {
						log::warn!("Instance storage on tile {} disappeared while applying", tile);
					}
				}
			}
		}
	}

	/// Blocks until no tile has work on a worker or `timeout` elapses, handling results as they
	/// arrive. Returns false on timeout.
	pub fn wait_for_workers(&mut self, timeout: Duration) -> bool {
		let deadline = Instant::now() + timeout;
		while self.tiles.values().any(|slot| slot.state.is_on_worker()) {
			let remaining = deadline.saturating_duration_since(Instant::now());
			match self.receiver.recv_timeout(remaining) {
				Ok(event) => self.handle_worker_event(event),
				Err(_) => return false,
			}
		}
		true
	}

	/// True when every type is set and valid, no tile has a cycle in flight and every tile has
	/// storage for every type. Tiles waiting in the capture queue do not block readiness.
	pub fn is_ready_to_update(&self) -> bool {
		if self.types.is_empty() {
			return false;
		}
		let mut ids = Vec::with_capacity(self.types.len());
		for foliage_type in &self.types {
			match foliage_type {
				Some(foliage_type) if foliage_type.is_valid() => ids.push(foliage_type.id()),
				_ => return false,
			}
		}

		self.tiles
			.values()
			.all(|slot| !slot.state.is_busy() && ids.iter().all(|id| slot.pool.contains(*id)))
	}

	/// Tiles with a cycle queued or in flight, closest first.
	pub fn building_tiles(&self) -> Vec<IVec2> {
		self.tile_order
			.iter()
			.copied()
			.filter(|coord| self.tiles.get(coord).is_some_and(|slot| slot.state != TileState::Idle))
			.collect()
	}

	pub fn total_instance_count(&self) -> usize {
		self.tiles.values().map(|slot| slot.pool.total_instance_count()).sum()
	}

	pub fn instance_count(&self, tile: IVec2, foliage_type: FoliageTypeId) -> Option<usize> {
		self.tiles.get(&tile)?.pool.get(foliage_type).map(|store| store.instance_count())
	}

	pub fn tile_state(&self, tile: IVec2) -> Option<TileState> {
		self.tiles.get(&tile).map(|slot| slot.state)
	}

	pub fn tile_cycle(&self, tile: IVec2) -> Option<u64> {
		self.tiles.get(&tile).map(|slot| slot.cycle)
	}

	pub fn tile(&self, tile: IVec2) -> Option<&TileDescriptor> {
		self.tiles.get(&tile).map(|slot| &slot.descriptor)
	}

	pub fn tile_coords(&self) -> &[IVec2] {
		&self.tile_order
	}

	pub fn nearest_tile(&self) -> Option<IVec2> {
		self.nearest_tile
	}

	pub fn last_update_position(&self) -> Option<Vec3> {
		self.last_update_position
	}

	pub fn pending_captures(&self) -> usize {
		self.capture_queue.len()
	}

	pub fn pending_foliage_tasks(&self) -> usize {
		self.foliage_queue.len()
	}
}

#[cfg(test)]
mod tests {
	use super::*;
	use crate::attribute::AttributeGrid;
	use crate::foliage_type::FoliageTypeSpec;
	use crate::instance::MemoryStoreFactory;
	use std::sync::atomic::{AtomicUsize, Ordering};

	const WAIT: Duration = Duration::from_secs(10);

	struct CountingCapture {
		captures: AtomicUsize,
	}

	impl SceneCapture for CountingCapture {
		fn capture(&self, request: &CaptureRequest) -> Result<AttributeGrid, CaptureError> {
			self.captures.fetch_add(1, Ordering::SeqCst);
			Ok(AttributeGrid::filled(request.resolution, request.resolution, LinearRgba::WHITE, Vec3::Z, 0.0)?)
		}
	}

	fn spawner(config: SpawnerConfig) -> (FoliageSpawner, Arc<CountingCapture>, MemoryStoreFactory, Arc<FoliageTypeSpec>) {
		let capture = Arc::new(CountingCapture { captures: AtomicUsize::new(0) });
		let factory = MemoryStoreFactory::new();
		let grass = Arc::new(FoliageTypeSpec::new("grass"));
		let spawner = match FoliageSpawner::new(config, capture.clone(), Box::new(factory.clone())) {
			Ok(spawner) => spawner.with_foliage_types(vec![Some(grass.clone())]),
			Err(e) => panic!("{}", e),
		};
		(spawner, capture, factory, grass)
	}

	fn small_config() -> SpawnerConfig {
		SpawnerConfig::default()
			.with_tile_count(IVec2::ZERO)
			.with_tile_pixel_size(4)
			.with_tile_diameter(100.0)
			.with_worker_threads(2)
	}

	#[test]
	fn test_refresh_distance() {
		let config = SpawnerConfig::default().with_tile_count(IVec2::new(3, 4)).with_tile_diameter(10.0);
		assert!((config.refresh_distance() - 10.0 * 5.0 * 0.95).abs() < 1e-4);
		assert_eq!(config.capture_budget(), 1);
		assert_eq!(config.clone().with_shared_render_targets(false).with_task_budgets(3, 8).capture_budget(), 3);
	}

	#[test]
	fn test_not_ready_without_types_or_storage() {
		let capture = Arc::new(CountingCapture { captures: AtomicUsize::new(0) });
		let grass = FoliageTypeSpec::new("grass");
		let factory = MemoryStoreFactory::new().refusing(grass.id());

		let mut spawner = match FoliageSpawner::new(small_config(), capture, Box::new(factory)) {
			Ok(spawner) => spawner,
			Err(e) => panic!("{}", e),
		};
		assert!(!spawner.is_ready_to_update());

		spawner.set_foliage_types(vec![Some(Arc::new(grass))]);
		assert!(!spawner.is_ready_to_update());

		spawner.set_foliage_types(vec![None]);
		assert!(!spawner.is_ready_to_update());
	}

	#[test]
	fn test_single_tile_cycle() {
		let (mut spawner, capture, factory, grass) = spawner(small_config());
		assert!(spawner.is_ready_to_update());

		spawner.tick(0.5, Some(Vec3::new(10.0, 20.0, 0.0)));
		assert_eq!(spawner.tile_state(IVec2::ZERO), Some(TileState::Capturing));
		assert_eq!(spawner.building_tiles(), vec![IVec2::ZERO]);
		assert!(!spawner.is_ready_to_update());

		assert!(spawner.wait_for_workers(WAIT));
		assert_eq!(spawner.tile_state(IVec2::ZERO), Some(TileState::Applying));

		// clear, add, rebuild, ready all fit in one tick's budget
		spawner.tick(0.0, None);
		assert_eq!(spawner.tile_state(IVec2::ZERO), Some(TileState::Idle));
		assert_eq!(spawner.instance_count(IVec2::ZERO, grass.id()), Some(16));
		assert_eq!(spawner.total_instance_count(), 16);
		assert_eq!(capture.captures.load(Ordering::SeqCst), 1);

		// the tile was centred on the snapped camera
		let tile = spawner.tile(IVec2::ZERO).map(|t| t.transform.translation);
		assert_eq!(tile, Some(Vec3::new(10.0, 20.0, 2000.0)));
		let state = factory.state(IVec2::ZERO, grass.id()).unwrap_or_default();
		assert!(state.instances.iter().all(|t| t.translation.z == 2000.0));
	}

	#[test]
	fn test_small_movements_do_not_refresh() {
		let (mut spawner, capture, _, _) = spawner(small_config());
		spawner.tick(0.5, Some(Vec3::ZERO));
		assert!(spawner.wait_for_workers(WAIT));
		spawner.tick(0.0, None);
		assert!(spawner.is_ready_to_update());

		// refresh distance is zero tiles wide here, so use a tiled config for movement checks
		let (mut tiled, tiled_capture, _, _) = spawner_with_extent();
		tiled.tick(0.5, Some(Vec3::ZERO));
		settle(&mut tiled);
		let captures = tiled_capture.captures.load(Ordering::SeqCst);
		assert_eq!(captures, 9);

		// well inside the refresh distance
		tiled.tick(0.5, Some(Vec3::new(50.0, 0.0, 0.0)));
		settle(&mut tiled);
		assert_eq!(tiled_capture.captures.load(Ordering::SeqCst), captures);

		// beyond the refresh distance but moving too fast
		tiled.tick(0.21, Some(Vec3::new(500.0, 0.0, 0.0)));
		assert!(tiled.building_tiles().is_empty());

		// beyond it and slow
		tiled.tick(100.0, Some(Vec3::new(501.0, 0.0, 0.0)));
		assert!(!tiled.building_tiles().is_empty());
		settle(&mut tiled);
		assert_eq!(tiled_capture.captures.load(Ordering::SeqCst), captures + 9);
		assert_eq!(capture.captures.load(Ordering::SeqCst), 1);
	}

	fn spawner_with_extent() -> (FoliageSpawner, Arc<CountingCapture>, MemoryStoreFactory, Arc<FoliageTypeSpec>) {
		spawner(small_config().with_tile_count(IVec2::ONE).with_task_budgets(1, 64))
	}

	/// Ticks until every tile is idle.
	fn settle(spawner: &mut FoliageSpawner) {
		for _ in 0..1000 {
			assert!(spawner.wait_for_workers(WAIT));
			spawner.tick(0.0, None);
			if spawner.building_tiles().is_empty() {
				return;
			}
		}
		panic!("spawner did not settle: {:?}", spawner.building_tiles());
	}

	#[test]
	fn test_tiles_are_captured_closest_first() {
		let (mut spawner, _, _, _) = spawner_with_extent();
		spawner.tick(0.5, Some(Vec3::ZERO));
		assert_eq!(spawner.tile_state(IVec2::ZERO), Some(TileState::Capturing));
		assert_eq!(spawner.pending_captures(), 8);
		for coord in spawner.tile_coords().iter().skip(1) {
			assert_eq!(spawner.tile_state(*coord), Some(TileState::CaptureQueued));
		}
	}

	#[test]
	fn test_shared_targets_capture_one_tile_at_a_time() {
		let (mut spawner, _, _, _) = spawner_with_extent();
		spawner.tick(0.5, Some(Vec3::ZERO));

		for _ in 0..200 {
			let in_flight = spawner
				.tile_coords()
				.iter()
				.filter(|coord| spawner.tile_state(**coord).is_some_and(TileState::is_busy))
				.count();
			assert!(in_flight <= 1);
			if spawner.building_tiles().is_empty() {
				break;
			}
			assert!(spawner.wait_for_workers(WAIT));
			spawner.tick(0.0, None);
		}
		assert!(spawner.building_tiles().is_empty());
		assert_eq!(spawner.total_instance_count(), 9 * 16);
	}

	#[test]
	fn test_queued_captures_do_not_block_readiness() {
		let (mut spawner, _, _, _) = spawner_with_extent();
		spawner.tick(0.5, Some(Vec3::ZERO));

		let mut observed = 0;
		for _ in 0..200 {
			let states: Vec<TileState> =
				spawner.tile_coords().iter().filter_map(|coord| spawner.tile_state(*coord)).collect();
			if states.iter().all(|state| !state.is_busy()) && states.contains(&TileState::CaptureQueued) {
				assert!(spawner.is_ready_to_update());
				observed += 1;
			}
			if spawner.building_tiles().is_empty() {
				break;
			}
			assert!(spawner.wait_for_workers(WAIT));
			spawner.tick(0.0, None);
		}
		assert!(observed > 0);
	}

	#[test]
	fn test_rapid_force_refresh_never_recaptures_a_busy_tile() {
		let config = small_config()
			.with_tile_count(IVec2::ONE)
			.with_shared_render_targets(false)
			.with_task_budgets(9, 2)
			.with_update_frequency(0.0);
		let (mut spawner, capture, _, _) = spawner(config);

		let mut observed: HashMap<IVec2, (u64, TileState)> = HashMap::new();
		for step in 0..60 {
			spawner.refresh();
			spawner.tick(0.01, Some(Vec3::new(step as f32, 0.0, 0.0)));

			for coord in spawner.tile_coords() {
				let cycle = spawner.tile_cycle(*coord).unwrap_or_default();
				let state = spawner.tile_state(*coord).unwrap_or_default();
				if let Some((previous_cycle, previous_state)) = observed.insert(*coord, (cycle, state)) {
					assert!(cycle <= previous_cycle + 1);
					if previous_state.is_busy() {
						assert_eq!(cycle, previous_cycle, "tile {} recaptured while busy", coord);
					}
				}
			}
		}

		settle(&mut spawner);
		let cycles: u64 = spawner.tile_coords().iter().map(|c| spawner.tile_cycle(*c).unwrap_or_default()).sum();
		assert_eq!(capture.captures.load(Ordering::SeqCst) as u64, cycles);
	}

	#[test]
	fn test_reconfigure_drops_in_flight_results() {
		let (mut spawner, _, factory, grass) = spawner(small_config());
		spawner.tick(0.5, Some(Vec3::ZERO));
		assert_eq!(spawner.tile_state(IVec2::ZERO), Some(TileState::Capturing));

		let fern = Arc::new(FoliageTypeSpec::new("fern"));
		spawner.set_foliage_types(vec![Some(fern.clone())]);

		// the stale result returns the tile to idle without applying anything
		assert!(spawner.wait_for_workers(WAIT));
		assert_eq!(spawner.tile_state(IVec2::ZERO), Some(TileState::Idle));
		assert_eq!(spawner.pending_foliage_tasks(), 0);
		assert_eq!(factory.state(IVec2::ZERO, grass.id()).map(|s| s.instances.len()), Some(0));

		// the forced refresh then fills the new type
		spawner.tick(0.5, Some(Vec3::ZERO));
		settle(&mut spawner);
		assert_eq!(spawner.instance_count(IVec2::ZERO, fern.id()), Some(16));
		assert_eq!(spawner.instance_count(IVec2::ZERO, grass.id()), None);
	}

	#[test]
	fn test_failed_capture_returns_tile_to_idle() {
		let failing = |request: &CaptureRequest| -> Result<AttributeGrid, CaptureError> {
			Err(CaptureError::Failed { tile: request.tile, reason: "device lost".to_string() })
		};
		let grass = Arc::new(FoliageTypeSpec::new("grass"));
		let mut spawner = match FoliageSpawner::new(small_config(), Arc::new(failing), Box::new(MemoryStoreFactory::new())) {
			Ok(spawner) => spawner.with_foliage_types(vec![Some(grass)]),
			Err(e) => panic!("{}", e),
		};

		spawner.tick(0.5, Some(Vec3::ZERO));
		assert!(spawner.wait_for_workers(WAIT));
		assert_eq!(spawner.tile_state(IVec2::ZERO), Some(TileState::Idle));
		assert_eq!(spawner.total_instance_count(), 0);
	}

	#[test]
	fn test_stalled_tile_times_out() {
		let blocked = Arc::new(std::sync::Barrier::new(2));
		let gate = blocked.clone();
		let slow = move |request: &CaptureRequest| -> Result<AttributeGrid, CaptureError> {
			gate.wait();
			Ok(AttributeGrid::filled(request.resolution, request.resolution, LinearRgba::WHITE, Vec3::Z, 0.0)?)
		};
		let grass = Arc::new(FoliageTypeSpec::new("grass"));
		let config = small_config().with_compute_timeout(1.0);
		let mut spawner = match FoliageSpawner::new(config, Arc::new(slow), Box::new(MemoryStoreFactory::new())) {
			Ok(spawner) => spawner.with_foliage_types(vec![Some(grass.clone())]),
			Err(e) => panic!("{}", e),
		};

		spawner.tick(0.5, Some(Vec3::ZERO));
		assert_eq!(spawner.tile_state(IVec2::ZERO), Some(TileState::Capturing));
		spawner.tick(2.0, None);
		assert_eq!(spawner.tile_state(IVec2::ZERO), Some(TileState::Idle));
		assert_eq!(spawner.tile_cycle(IVec2::ZERO), Some(2));

		// release the worker; its late result is ignored
		blocked.wait();
		std::thread::sleep(Duration::from_millis(100));
		spawner.tick(0.0, None);
		assert_eq!(spawner.tile_state(IVec2::ZERO), Some(TileState::Idle));
		assert_eq!(spawner.instance_count(IVec2::ZERO, grass.id()), Some(0));
	}

	#[test]
	fn test_disabled_updates_never_refresh() {
		let (mut spawner, capture, _, _) = spawner(small_config().with_disable_updates(true));
		for _ in 0..5 {
			spawner.tick(1.0, Some(Vec3::ZERO));
		}
		assert_eq!(capture.captures.load(Ordering::SeqCst), 0);
		assert!(spawner.last_update_position().is_none());
	}

	#[test]
	fn test_nearest_tile_gets_collision() {
		let rock = Arc::new(FoliageTypeSpec::new("rock").with_collision_enabled(true));
		let capture = Arc::new(CountingCapture { captures: AtomicUsize::new(0) });
		let factory = MemoryStoreFactory::new();
		let config = small_config().with_tile_count(IVec2::ONE).with_task_budgets(1, 64);
		let mut spawner = match FoliageSpawner::new(config, capture, Box::new(factory.clone())) {
			Ok(spawner) => spawner.with_foliage_types(vec![Some(rock.clone())]),
			Err(e) => panic!("{}", e),
		};

		spawner.tick(0.5, Some(Vec3::ZERO));
		settle(&mut spawner);
		spawner.tick(0.5, Some(Vec3::new(5.0, 0.0, 0.0)));
		assert_eq!(spawner.nearest_tile(), Some(IVec2::ZERO));

		// step over the eastern neighbour without triggering a refresh
		spawner.tick(0.5, Some(Vec3::new(120.0, 0.0, 0.0)));
		assert_eq!(spawner.nearest_tile(), Some(IVec2::new(1, 0)));

		let collision = |coord: IVec2| factory.state(coord, rock.id()).map(|s| s.collision_enabled);
		assert_eq!(collision(IVec2::new(1, 0)), Some(true));
		assert_eq!(collision(IVec2::ZERO), Some(false));
		assert_eq!(collision(IVec2::new(-1, 0)), Some(false));
	}
}
