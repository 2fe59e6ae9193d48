use crate::cluster::ClusterFoliageSpawner;
use crate::scheduler::FoliageSpawner;
use bevy::prelude::*;

/// Marks the entity whose position drives tile refreshes, usually the camera.
#[derive(Component, Debug, Clone, Copy, Default)]
pub struct FoliageViewpoint;

/// Ticks a [`FoliageSpawner`] and polls a [`ClusterFoliageSpawner`] when either resource exists.
#[derive(Debug, Clone, Copy, Default)]
pub struct FoliagePlugin;

impl Plugin for FoliagePlugin {
	fn build(&self, app: &mut App) {
		app.add_systems(
			Update,
			(
				tick_foliage_spawner.run_if(resource_exists::<FoliageSpawner>),
				poll_cluster_spawner.run_if(resource_exists::<ClusterFoliageSpawner>),
			),
		);
	}
}

pub fn tick_foliage_spawner(
	time: Res<Time>,
	viewpoints: Query<&GlobalTransform, With<FoliageViewpoint>>,
	mut spawner: ResMut<FoliageSpawner>,
) {
	let camera = viewpoints.single().ok().map(GlobalTransform::translation);
	spawner.tick(time.delta_secs(), camera);
}

pub fn poll_cluster_spawner(mut spawner: ResMut<ClusterFoliageSpawner>) {
	let applied = spawner.poll();
	if applied > 0 {
		log::debug!("Applied {} foliage features, {} still building", applied, spawner.running_workers());
	}
}
