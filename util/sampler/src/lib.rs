pub mod geo;
pub mod grid;
pub mod poisson;

pub use geo::{haversine_delta_degrees, haversine_distance, EARTH_RADIUS_METRES};
pub use grid::{sample_bilinear, sample_color, sample_float, Bilerp};
pub use poisson::{
	GeographicSettings, PoissonDiscSampler, SamplingError, DEFAULT_REJECTION_THRESHOLD,
	MAX_GRID_CELLS,
};
