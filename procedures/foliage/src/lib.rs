pub mod attribute;
pub mod cluster;
pub mod foliage_type;
pub mod frame;
pub mod instance;
pub mod placement;
pub mod plugin;
pub mod queue;
pub mod scheduler;
pub mod seed;
pub mod tile;

pub use attribute::{decode_normal, encode_normal, AttributeGrid, AttributeGridError};
pub use cluster::{
	ClusterConfig, ClusterFoliageSpawner, FlatHeightfield, GeoFeaturePlacementEngine, SpatialFeature,
};
pub use foliage_type::{
	ColorRange, FoliageCollection, FoliageTypeError, FoliageTypeId, FoliageTypeList, FoliageTypeSpec,
	LocalOffset, MeshRef, RandomRotation, ScaleRange, VectorRange,
};
pub use frame::{FlatFrame, WorldFrame};
pub use instance::{
	InstanceBatchWriter, InstancePool, InstanceStore, InstanceStoreFactory, MemoryInstanceStore,
	MemoryStoreFactory,
};
pub use placement::{PlacementSettings, PlacementTransform, Placements, TilePlacementEngine};
pub use plugin::{FoliagePlugin, FoliageViewpoint};
pub use queue::TaskQueue;
pub use scheduler::{
	CaptureError, CaptureRequest, FoliageSpawner, SceneCapture, SpawnerConfig, SpawnerError, TileState,
};
pub use tile::{TileBounds, TileDescriptor};

pub use sampler;
