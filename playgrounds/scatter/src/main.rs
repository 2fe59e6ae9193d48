use bevy::app::ScheduleRunnerPlugin;
use bevy::log::LogPlugin;
use bevy::prelude::*;
use bevy::transform::TransformPlugin;
use foliage::{
	ClusterConfig, ClusterFoliageSpawner, FoliageSpawner, GeoFeaturePlacementEngine, MemoryStoreFactory,
	SpawnerConfig,
};
use scatter_playground::{
	feature_collection, feature_geojson, tile_foliage_types, NoiseTerrain, ScatterPlugin, ScatterRun,
};
use std::sync::Arc;
use std::time::Duration;

fn main() -> anyhow::Result<()> {
	// Parse seed and tile count from command line or use defaults
	let seed = std::env::args().nth(1).and_then(|s| s.parse::<u32>().ok()).unwrap_or(12345);
	let tile_count = std::env::args().nth(2).and_then(|s| s.parse::<i32>().ok()).unwrap_or(1);

	println!("Starting foliage scatter with seed {} and {} tiles around the origin", seed, tile_count);

	let terrain = NoiseTerrain::new(seed);

	let config = SpawnerConfig::default()
		.with_tile_diameter(1000.0)
		.with_tile_pixel_size(128)
		.with_tile_count(IVec2::splat(tile_count));
	let spawner = FoliageSpawner::new(config, Arc::new(terrain.clone()), Box::new(MemoryStoreFactory::new()))?
		.with_foliage_types(tile_foliage_types(u64::from(seed)));

	let cluster_config = ClusterConfig::default();
	let engine = GeoFeaturePlacementEngine::new(&cluster_config).with_heightfield(terrain);
	let mut cluster = ClusterFoliageSpawner::new(
		cluster_config,
		feature_collection(u64::from(seed)),
		Box::new(MemoryStoreFactory::new()),
	)?
	.with_engine(engine);
	cluster.load_geojson(&feature_geojson(6, 2500.0, 300.0), false);

	let exit = App::new()
		.add_plugins(MinimalPlugins.set(ScheduleRunnerPlugin::run_loop(Duration::from_secs_f64(1.0 / 60.0))))
		.add_plugins(LogPlugin::default())
		.add_plugins(TransformPlugin)
		.add_plugins(ScatterPlugin { run: ScatterRun::default() })
		.insert_resource(spawner)
		.insert_resource(cluster)
		.run();

	if let AppExit::Error(code) = exit {
		anyhow::bail!("scatter playground exited with code {}", code);
	}
	Ok(())
}
