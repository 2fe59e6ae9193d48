//! Bridson's Poisson-disc sampling over a rectangular region.
//!
//! See <https://www.cs.ubc.ca/~rbridson/docs/bridson-siggraph07-poissondisk.pdf>.

use crate::geo::{haversine_delta_degrees, haversine_distance, EARTH_RADIUS_METRES};
use bevy::math::DVec2;
use rand::Rng;
use std::f64::consts::{SQRT_2, TAU};
use thiserror::Error;

/// Upper bound on the number of cells in the acceleration grid.
pub const MAX_GRID_CELLS: u64 = 67_108_864;

/// Candidates tried around an active point before it is retired.
pub const DEFAULT_REJECTION_THRESHOLD: u32 = 30;

/// Ends an acceleration grid bucket.
const EMPTY_CELL: u32 = u32::MAX;

#[derive(Debug, Clone, PartialEq, Error)]
pub enum SamplingError {
	#[error("sampling radius must be positive and finite, got {0}")]
	InvalidRadius(f64),
	#[error("sampling region must be positive and finite, got {0}")]
	InvalidRegion(DVec2),
	#[error("grid size ({x} x {y}) exceeds the maximum of 67108864 cells")]
	GridTooLarge { x: u64, y: u64 },
}

/// Switches the minimum-separation test to great circle distance.
///
/// Points are (longitude, latitude) offsets in degrees from `origin`; `radius` is the minimum
/// separation in metres.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct GeographicSettings {
	pub origin: DVec2,
	pub radius: f64,
	pub planet_radius: f64,
}

impl GeographicSettings {
	pub fn new(origin: DVec2, radius: f64) -> Self {
		Self { origin, radius, planet_radius: EARTH_RADIUS_METRES }
	}

	pub fn with_planet_radius(mut self, planet_radius: f64) -> Self {
		self.planet_radius = planet_radius;
		self
	}
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct PoissonDiscSampler {
	/// Minimum distance between points.
	pub radius: f64,
	/// Extent of the sampled region; points fall within `[0, region.x) x [0, region.y)`.
	pub region: DVec2,
	pub rejection_threshold: u32,
	pub geographic: Option<GeographicSettings>,
}

/// Uniform grid of chained buckets. A cell may hold several points when the separation test is
/// not the planar one the cell size is derived from.
struct AccelerationGrid {
	cell_size: f64,
	size_x: usize,
	size_y: usize,
	/// Cells searched on each side of the candidate's column.
	reach_x: usize,
	heads: Vec<u32>,
	next: Vec<u32>,
}

impl AccelerationGrid {
	fn new(radius: f64, region: DVec2) -> Result<Self, SamplingError> {
		let cell_size = radius / SQRT_2;
		let size_x = (region.x / cell_size).ceil().max(1.0);
		let size_y = (region.y / cell_size).ceil().max(1.0);

		// compare in floating point first, the product of two huge counts overflows u64
		if size_x * size_y > MAX_GRID_CELLS as f64 {
			return Err(SamplingError::GridTooLarge { x: size_x as u64, y: size_y as u64 });
		}

		let (size_x, size_y) = (size_x as usize, size_y as usize);
		Ok(Self {
			cell_size,
			size_x,
			size_y,
			reach_x: 2,
			heads: vec![EMPTY_CELL; size_x * size_y],
			next: Vec::new(),
		})
	}

	/// Widens the column search so a horizontal span of `span` still lands inside it.
	fn with_horizontal_span(mut self, span: f64) -> Self {
		let reach = (span / self.cell_size).ceil();
		if reach.is_finite() {
			self.reach_x = self.reach_x.max((reach as usize).min(self.size_x));
		} else {
			self.reach_x = self.size_x;
		}
		self
	}

	fn cell_of(&self, point: DVec2) -> (usize, usize) {
		let x = ((point.x / self.cell_size) as usize).min(self.size_x - 1);
		let y = ((point.y / self.cell_size) as usize).min(self.size_y - 1);
		(x, y)
	}

	/// Points must be inserted with consecutive indices starting at zero.
	fn insert(&mut self, point: DVec2, index: u32) {
		let (x, y) = self.cell_of(point);
		let cell = y * self.size_x + x;
		self.next.push(self.heads[cell]);
		self.heads[cell] = index;
	}

	fn bucket(&self, cell: usize) -> impl Iterator<Item = u32> + '_ {
		let head = Some(self.heads[cell]).filter(|index| *index != EMPTY_CELL);
		std::iter::successors(head, move |index| {
			Some(self.next[*index as usize]).filter(|next| *next != EMPTY_CELL)
		})
	}

	/// Indices of the points stored in the block of cells around `point`.
	fn neighbours(&self, point: DVec2) -> impl Iterator<Item = u32> + '_ {
		let (cx, cy) = self.cell_of(point);
		let start_x = cx.saturating_sub(self.reach_x);
		let end_x = (cx + self.reach_x).min(self.size_x - 1);
		let (start_y, end_y) = (cy.saturating_sub(2), (cy + 2).min(self.size_y - 1));

		(start_y..=end_y)
			.flat_map(move |y| (start_x..=end_x).flat_map(move |x| self.bucket(y * self.size_x + x)))
	}
}

/// Highest absolute latitude a meridian search is sized for; closer to the poles every column
/// is searched.
const MAX_SEARCH_LATITUDE: f64 = 89.9;

impl PoissonDiscSampler {
	pub fn new(radius: f64, region: DVec2) -> Self {
		Self { radius, region, rejection_threshold: DEFAULT_REJECTION_THRESHOLD, geographic: None }
	}

	pub fn with_rejection_threshold(mut self, rejection_threshold: u32) -> Self {
		self.rejection_threshold = rejection_threshold;
		self
	}

	pub fn with_geographic(mut self, geographic: GeographicSettings) -> Self {
		self.geographic = Some(geographic);
		self
	}

	/// Samples with the thread-local generator.
	pub fn sample(&self) -> Vec<DVec2> {
		self.sample_with_rng(&mut rand::thread_rng())
	}

	/// Samples the region, logging and returning no points when the request is rejected.
	///
	/// An empty result means "no points produced", never "sampled at zero density".
	pub fn sample_with_rng<R: Rng + ?Sized>(&self, rng: &mut R) -> Vec<DVec2> {
		match self.try_sample_with_rng(rng) {
			Ok(points) => points,
			Err(e) => {
				log::error!("Poisson disc sampling aborted: {}", e);
				Vec::new()
			}
		}
	}

	pub fn try_sample_with_rng<R: Rng + ?Sized>(
		&self,
		rng: &mut R,
	) -> Result<Vec<DVec2>, SamplingError> {
		if !(self.radius.is_finite() && self.radius > 0.0) {
			return Err(SamplingError::InvalidRadius(self.radius));
		}
		if !(self.region.is_finite() && self.region.x > 0.0 && self.region.y > 0.0) {
			return Err(SamplingError::InvalidRegion(self.region));
		}

		let mut grid = AccelerationGrid::new(self.radius, self.region)?;
		if let Some(geo) = &self.geographic {
			grid = grid.with_horizontal_span(self.widest_longitude_span(geo));
		}

		let mut points: Vec<DVec2> = Vec::new();
		// the seed only drives the walk, it is not an output point
		let mut active: Vec<DVec2> = vec![self.region / 2.0];

		while !active.is_empty() {
			let active_index = rng.gen_range(0..active.len());
			let origin = active[active_index];

			let mut accepted = false;
			for _ in 0..self.rejection_threshold {
				let angle = rng.gen::<f64>() * TAU;
				let length = rng.gen_range(self.radius..=self.radius * 2.0);
				let candidate = origin + DVec2::new(angle.sin(), angle.cos()) * length;

				if self.is_valid_candidate(candidate, &grid, &points) {
					grid.insert(candidate, points.len() as u32);
					points.push(candidate);
					active.push(candidate);
					accepted = true;
					break;
				}
			}

			if !accepted {
				active.swap_remove(active_index);
			}
		}

		Ok(points)
	}

	/// Longitude delta covering `geo.radius` metres at the region's most poleward latitude.
	fn widest_longitude_span(&self, geo: &GeographicSettings) -> f64 {
		let south = geo.origin.y;
		let north = geo.origin.y + self.region.y;
		let latitude = if south.abs() > north.abs() { south } else { north };
		if latitude.abs() >= MAX_SEARCH_LATITUDE {
			return f64::INFINITY;
		}
		haversine_delta_degrees(DVec2::new(geo.origin.x, latitude), geo.radius, geo.planet_radius).x
	}

	fn is_valid_candidate(&self, candidate: DVec2, grid: &AccelerationGrid, points: &[DVec2]) -> bool {
		if !(candidate.x >= 0.0
			&& candidate.x < self.region.x
			&& candidate.y >= 0.0
			&& candidate.y < self.region.y)
		{
			return false;
		}

		let radius_squared = self.radius * self.radius;
		let mut neighbours = grid.neighbours(candidate);

		match &self.geographic {
			Some(geo) => neighbours.all(|index| {
				let other = points[index as usize];
				haversine_distance(candidate + geo.origin, other + geo.origin, geo.planet_radius)
					>= geo.radius
			}),
			None => neighbours.all(|index| {
				candidate.distance_squared(points[index as usize]) >= radius_squared
			}),
		}
	}
}

#[cfg(test)]
mod tests {
	use super::*;
	use rand::SeedableRng;
	use rand_chacha::ChaCha8Rng;

	fn min_pairwise_distance(points: &[DVec2]) -> f64 {
		let mut min = f64::MAX;
		for (i, a) in points.iter().enumerate() {
			for b in &points[i + 1..] {
				min = min.min(a.distance(*b));
			}
		}
		min
	}

	#[test]
	fn test_minimum_separation() {
		let mut rng = ChaCha8Rng::seed_from_u64(7);
		let sampler = PoissonDiscSampler::new(2.5, DVec2::new(60.0, 40.0));
		let points = sampler.sample_with_rng(&mut rng);

		assert!(points.len() > 50, "expected a dense set, got {}", points.len());
		assert!(min_pairwise_distance(&points) >= 2.5 - 1e-9);
	}

	#[test]
	fn test_points_lie_within_region() {
		let mut rng = ChaCha8Rng::seed_from_u64(11);
		let region = DVec2::new(17.0, 33.0);
		let points = PoissonDiscSampler::new(1.0, region).sample_with_rng(&mut rng);

		assert!(!points.is_empty());
		for p in &points {
			assert!(p.x >= 0.0 && p.x < region.x, "{:?}", p);
			assert!(p.y >= 0.0 && p.y < region.y, "{:?}", p);
		}
	}

	#[test]
	fn test_set_is_maximal_enough_to_cover_the_region() {
		// blue noise leaves no large gaps
		let mut rng = ChaCha8Rng::seed_from_u64(3);
		let radius = 1.0;
		let region = DVec2::new(20.0, 20.0);
		let points = PoissonDiscSampler::new(radius, region).sample_with_rng(&mut rng);

		for y in 1..20 {
			for x in 1..20 {
				let probe = DVec2::new(x as f64, y as f64);
				let nearest = points.iter().map(|p| p.distance(probe)).fold(f64::MAX, f64::min);
				assert!(nearest < 3.0 * radius, "gap at {:?} ({})", probe, nearest);
			}
		}
	}

	#[test]
	fn test_oversized_grid_returns_empty() {
		// (1e6 / (0.1 / sqrt 2))^2 is far beyond the cap
		let sampler = PoissonDiscSampler::new(0.1, DVec2::new(1e6, 1e6));
		let mut rng = ChaCha8Rng::seed_from_u64(1);

		assert!(matches!(
			sampler.try_sample_with_rng(&mut rng),
			Err(SamplingError::GridTooLarge { .. })
		));
		assert!(sampler.sample_with_rng(&mut rng).is_empty());
	}

	#[test]
	fn test_degenerate_inputs_return_empty() {
		let mut rng = ChaCha8Rng::seed_from_u64(1);
		assert!(PoissonDiscSampler::new(0.0, DVec2::splat(10.0)).sample_with_rng(&mut rng).is_empty());
		assert!(PoissonDiscSampler::new(1.0, DVec2::new(10.0, 0.0))
			.sample_with_rng(&mut rng)
			.is_empty());
	}

	#[test]
	fn test_geographic_mode_respects_metric_radius() {
		let mut rng = ChaCha8Rng::seed_from_u64(5);
		let origin = DVec2::new(5.0, 52.0);
		let metres = 50.0;
		// the longitude delta is the wider of the two, so the grid neighbourhood covers every
		// pair that is closer than the metric radius
		let degrees = haversine_delta_degrees(origin, metres, EARTH_RADIUS_METRES);
		let sampler = PoissonDiscSampler::new(degrees.x, DVec2::splat(degrees.x * 20.0))
			.with_geographic(GeographicSettings::new(origin, metres));

		let points = sampler.sample_with_rng(&mut rng);
		assert!(points.len() > 10);

		for (i, a) in points.iter().enumerate() {
			for b in &points[i + 1..] {
				let d = haversine_distance(*a + origin, *b + origin, EARTH_RADIUS_METRES);
				assert!(d >= metres - 1e-6, "{} < {}", d, metres);
			}
		}
	}

	#[test]
	fn test_geographic_mode_keeps_points_apart_near_the_pole() {
		// at 70 degrees a metre of latitude spans far fewer degrees than a metre of longitude, so
		// several accepted points share a cell
		let origin = DVec2::new(20.0, 70.0);
		let metres = 50.0;
		let degrees = haversine_delta_degrees(origin, metres, EARTH_RADIUS_METRES);
		let radius = degrees.max_element();
		let sampler = PoissonDiscSampler::new(radius, DVec2::splat(radius * 15.0))
			.with_geographic(GeographicSettings::new(origin, metres));

		for seed in 0..5 {
			let points = sampler.sample_with_rng(&mut ChaCha8Rng::seed_from_u64(seed));
			assert!(points.len() > 10);

			for (i, a) in points.iter().enumerate() {
				for b in &points[i + 1..] {
					let d = haversine_distance(*a + origin, *b + origin, EARTH_RADIUS_METRES);
					assert!(d >= metres - 1e-6, "seed {}: {} < {}", seed, d, metres);
				}
			}
		}
	}
}
