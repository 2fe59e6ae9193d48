use bevy::prelude::*;
use foliage::foliage_type::{FoliageTypeList, RandomRotation};
use foliage::{
	ClusterFoliageSpawner, ColorRange, FoliageCollection, FoliagePlugin, FoliageSpawner, FoliageTypeSpec,
	FoliageViewpoint, ScaleRange,
};
use std::f32::consts::TAU;
use std::sync::Arc;

mod terrain;

pub use terrain::NoiseTerrain;

/// How long the headless run lasts and how the viewpoint moves.
#[derive(Resource, Debug, Clone)]
pub struct ScatterRun {
	pub seconds: f32,
	/// Viewpoint speed in world units per second.
	pub speed: f32,
	/// Radius of the circle the viewpoint flies around.
	pub orbit_radius: f32,
}

impl Default for ScatterRun {
	fn default() -> Self {
		Self { seconds: 20.0, speed: 80.0, orbit_radius: 3000.0 }
	}
}

pub struct ScatterPlugin {
	pub run: ScatterRun,
}

impl Plugin for ScatterPlugin {
	fn build(&self, app: &mut App) {
		app.add_plugins(FoliagePlugin)
			.insert_resource(self.run.clone())
			.add_systems(Startup, spawn_viewpoint)
			.add_systems(Update, (fly_viewpoint, report_stats, exit_when_done));
	}
}

fn spawn_viewpoint(mut commands: Commands, run: Res<ScatterRun>) {
	let start = Vec3::new(run.orbit_radius, 0.0, 0.0);
	log::info!("Spawning foliage viewpoint at {}", start);
	commands.spawn((FoliageViewpoint, Transform::from_translation(start)));
}

fn fly_viewpoint(time: Res<Time>, run: Res<ScatterRun>, mut query: Query<&mut Transform, With<FoliageViewpoint>>) {
	let Ok(mut transform) = query.single_mut() else {
		return;
	};

	let angle = (time.elapsed_secs() * run.speed / run.orbit_radius) % TAU;
	transform.translation = Vec3::new(angle.cos(), angle.sin(), 0.0) * run.orbit_radius;
}

fn report_stats(
	time: Res<Time>,
	mut since_report: Local<f32>,
	spawner: Option<Res<FoliageSpawner>>,
	cluster: Option<Res<ClusterFoliageSpawner>>,
) {
	*since_report += time.delta_secs();
	if *since_report < 1.0 {
		return;
	}
	*since_report = 0.0;

	if let Some(spawner) = spawner {
		log::info!(
			"Tiles: {} instances, building {:?}, nearest {:?}",
			spawner.total_instance_count(),
			spawner.building_tiles(),
			spawner.nearest_tile()
		);
	}
	if let Some(cluster) = cluster {
		log::info!(
			"Features: {} instances over {} features, {} building",
			cluster.total_instance_count(),
			cluster.features().len(),
			cluster.running_workers()
		);
	}
}

fn exit_when_done(time: Res<Time>, run: Res<ScatterRun>, mut exit: MessageWriter<AppExit>) {
	if time.elapsed_secs() >= run.seconds {
		exit.write(AppExit::Success);
	}
}

fn green_ground() -> ColorRange {
	ColorRange::new(LinearRgba::rgb(0.0, 0.3, 0.0), LinearRgba::rgb(0.2, 1.0, 0.2))
}

/// Ground cover for the tiled spawner.
pub fn tile_foliage_types(seed: u64) -> FoliageTypeList {
	let grass = FoliageTypeSpec::new("grass")
		.with_spawn_constraint(green_ground())
		.with_scale(ScaleRange::uniform(0.8, 1.2))
		.with_random_rotation(RandomRotation::yaw(360.0))
		.with_align_to_surface_normal(true)
		.with_slope_angle_threshold(35.0)
		.with_cull_distance(0.0, 800.0)
		.with_seed(seed);
	let flowers = FoliageTypeSpec::new("flowers")
		.with_density(2.0)
		.with_spawn_constraint(green_ground())
		.with_random_rotation(RandomRotation::yaw(360.0))
		.with_slope_angle_threshold(20.0)
		.with_only_spawn_in_nearest_tile(true)
		.with_seed(seed.wrapping_add(1));
	let rocks = FoliageTypeSpec::new("rock")
		.with_density(0.125)
		.with_scale(ScaleRange::uniform(0.5, 2.0))
		.with_collision_enabled(true)
		.with_seed(seed.wrapping_add(2));

	vec![Some(Arc::new(grass)), Some(Arc::new(flowers)), Some(Arc::new(rocks))]
}

/// Woodland (classifier 1) and meadow (classifier 2) planting for the feature spawner.
pub fn feature_collection(seed: u64) -> FoliageCollection {
	let tree = Arc::new(
		FoliageTypeSpec::new("tree")
			.with_density(12.0)
			.with_scale(ScaleRange::uniform(0.7, 1.4))
			.with_random_rotation(RandomRotation::yaw(360.0))
			.with_slope_angle_threshold(25.0)
			.with_collision_enabled(true)
			.with_seed(seed.wrapping_add(10)),
	);
	let shrub = Arc::new(
		FoliageTypeSpec::new("shrub")
			.with_density(5.0)
			.with_align_to_surface_normal(true)
			.with_seed(seed.wrapping_add(11)),
	);
	let wildflowers = Arc::new(
		FoliageTypeSpec::new("wildflowers")
			.with_density(2.0)
			.with_random_rotation(RandomRotation::yaw(360.0))
			.with_seed(seed.wrapping_add(12)),
	);

	FoliageCollection::new().with_types(1, vec![tree, shrub.clone()]).with_types(2, vec![shrub, wildflowers])
}

/// A ring of hexagonal woodlands and meadows around the origin, as GeoJSON.
pub fn feature_geojson(count: usize, ring_radius: f64, feature_radius: f64) -> String {
	let features: Vec<serde_json::Value> = (0..count)
		.map(|i| {
			let angle = i as f64 / count.max(1) as f64 * std::f64::consts::TAU;
			let centre = (ring_radius * angle.cos(), ring_radius * angle.sin());
			let mut ring: Vec<[f64; 2]> = (0..6)
				.map(|corner| {
					let a = corner as f64 / 6.0 * std::f64::consts::TAU;
					[centre.0 + feature_radius * a.cos(), centre.1 + feature_radius * a.sin()]
				})
				.collect();
			ring.push(ring[0]);

			serde_json::json!({
				"type": "Feature",
				"geometry": { "type": "Polygon", "coordinates": [ring] },
				"properties": {
					"type": 1 + (i % 2),
					"name": format!("patch-{}", i),
				},
			})
		})
		.collect();

	serde_json::json!({ "type": "FeatureCollection", "features": features }).to_string()
}
