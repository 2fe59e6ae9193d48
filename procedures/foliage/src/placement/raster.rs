use super::{PlacementTransform, Placements};
use crate::attribute::{decode_normal, AttributeGrid};
use crate::foliage_type::{slope_angle, FoliageTypeSpec};
use crate::seed::sample_rng;
use crate::tile::TileDescriptor;
use bevy::prelude::*;
use rayon::prelude::*;
use sampler::{sample_color, sample_float};
use std::sync::Arc;
use std::time::Instant;

/// Widest grid the per-pixel parallel path is used for.
pub const DEFAULT_PARALLEL_WIDTH_LIMIT: usize = 512;

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct PlacementSettings {
	pub parallel_width_limit: usize,
	/// Multiplier applied to captured RGB before the spawn constraint is tested.
	pub color_gain: f32,
}

impl Default for PlacementSettings {
	fn default() -> Self {
		Self { parallel_width_limit: DEFAULT_PARALLEL_WIDTH_LIMIT, color_gain: 1.0 }
	}
}

impl PlacementSettings {
	pub fn with_parallel_width_limit(mut self, limit: usize) -> Self {
		self.parallel_width_limit = limit;
		self
	}

	pub fn with_color_gain(mut self, color_gain: f32) -> Self {
		self.color_gain = color_gain;
		self
	}
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PlacementPath {
	/// One candidate per pixel, evaluated data-parallel.
	Parallel,
	/// Row-major walk honouring super- and sub-sampling densities.
	Serial,
}

/// Surface attributes at one candidate position, in pixel coordinates.
struct SurfaceSample {
	x: f32,
	y: f32,
	color: LinearRgba,
	normal: Vec3,
	depth: f32,
}

/// Per-tile constants shared by every candidate.
struct TileFrame<'a> {
	tile: &'a TileDescriptor,
	up: Vec3,
	half_diameter: f32,
	width: f32,
	height: f32,
}

impl<'a> TileFrame<'a> {
	fn new(tile: &'a TileDescriptor, grid: &AttributeGrid) -> Self {
		Self {
			tile,
			up: tile.up(),
			half_diameter: tile.diameter / 2.0,
			width: grid.width() as f32,
			height: grid.height() as f32,
		}
	}

	fn relative_position(&self, sample: &SurfaceSample) -> Vec3 {
		let h = self.half_diameter;
		let across = |t: f32| -h + 2.0 * h * t;
		Vec3::new(across(sample.x / self.width), across(sample.y / self.height), -sample.depth)
	}
}

/// Converts a tile's captured attribute grid into instance transforms.
#[derive(Debug, Clone, Default)]
pub struct TilePlacementEngine {
	settings: PlacementSettings,
}

impl TilePlacementEngine {
	pub fn new(settings: PlacementSettings) -> Self {
		Self { settings }
	}

	pub fn settings(&self) -> &PlacementSettings {
		&self.settings
	}

	/// The parallel path is only taken when every type asks for exactly one candidate per pixel
	/// and the grid is narrow enough.
	pub fn select_path(&self, width: usize, types: &[Option<Arc<FoliageTypeSpec>>]) -> PlacementPath {
		let unit_density = types.iter().flatten().all(|spec| spec.density == 1.0);
		if width <= self.settings.parallel_width_limit && unit_density {
			PlacementPath::Parallel
		} else {
			PlacementPath::Serial
		}
	}

	pub fn compute(
		&self,
		grid: &AttributeGrid,
		tile: &TileDescriptor,
		types: &[Option<Arc<FoliageTypeSpec>>],
	) -> Placements {
		let path = self.select_path(grid.width(), types);
		self.compute_on_path(path, grid, tile, types)
	}

	/// Runs a specific path regardless of the heuristic.
	pub fn compute_on_path(
		&self,
		path: PlacementPath,
		grid: &AttributeGrid,
		tile: &TileDescriptor,
		types: &[Option<Arc<FoliageTypeSpec>>],
	) -> Placements {
		let start = Instant::now();
		let active = active_types(types);
		let frame = TileFrame::new(tile, grid);

		let placements = match path {
			PlacementPath::Parallel => self.compute_parallel(grid, &frame, &active),
			PlacementPath::Serial => self.compute_serial(grid, &frame, &active),
		};

		log::debug!(
			"Computed {} instances of {} types for tile {} ({:?} path) in {:?}",
			placements.total_instances(),
			placements.type_count(),
			tile.coord,
			path,
			start.elapsed()
		);

		placements
	}

	fn compute_parallel(
		&self,
		grid: &AttributeGrid,
		frame: &TileFrame,
		types: &[Arc<FoliageTypeSpec>],
	) -> Placements {
		let width = grid.width();
		let mut placements = Placements::new();

		for spec in types {
			if spec.only_spawn_in_nearest_tile && !frame.tile.is_origin() {
				continue;
			}

			let slots: Vec<Option<PlacementTransform>> = (0..grid.len())
				.into_par_iter()
				.map(|index| {
					let sample = SurfaceSample {
						x: (index % width) as f32,
						y: (index / width) as f32,
						color: grid.color()[index],
						normal: decode_normal(grid.normal()[index]),
						depth: grid.depth()[index],
					};
					self.evaluate(spec, frame, &sample, index as u64)
				})
				.collect();

			let transforms: Vec<_> =
				slots.into_iter().flatten().filter(PlacementTransform::is_valid).collect();

			if !transforms.is_empty() {
				placements.insert(spec.id(), transforms);
			}
		}

		placements
	}

	fn compute_serial(
		&self,
		grid: &AttributeGrid,
		frame: &TileFrame,
		types: &[Arc<FoliageTypeSpec>],
	) -> Placements {
		let (width, height) = (grid.width(), grid.height());
		let mut batches: Vec<Vec<PlacementTransform>> = vec![Vec::new(); types.len()];

		for y in 0..height {
			for x in 0..width {
				let i = grid.index(x, y);

				for (spec, batch) in types.iter().zip(batches.iter_mut()) {
					if spec.only_spawn_in_nearest_tile && !frame.tile.is_origin() {
						continue;
					}

					if spec.density > 1.0 {
						let n = spec.density.round() as usize;
						for ox in 0..n {
							for oy in 0..n {
								let u = x as f32 + ox as f32 / n as f32;
								let v = y as f32 + oy as f32 / n as f32;
								if u.ceil() as usize >= width || v.ceil() as usize >= height {
									continue;
								}

								let sample = SurfaceSample {
									x: u,
									y: v,
									color: sample_color(grid.color(), u, v, width, height),
									normal: decode_normal(sample_color(grid.normal(), u, v, width, height)),
									depth: sample_float(grid.depth(), u, v, width, height),
								};
								let index = (i * n * n + ox * n + oy) as u64;
								batch.extend(self.evaluate(spec, frame, &sample, index));
							}
						}
					} else {
						let step = ((1.0 / spec.density).round() as usize).max(1);
						if x % step != 0 || y % step != 0 {
							continue;
						}

						let sample = SurfaceSample {
							x: x as f32,
							y: y as f32,
							color: grid.color()[i],
							normal: decode_normal(grid.normal()[i]),
							depth: grid.depth()[i],
						};
						batch.extend(self.evaluate(spec, frame, &sample, i as u64));
					}
				}
			}
		}

		let mut placements = Placements::new();
		for (spec, batch) in types.iter().zip(batches) {
			if !batch.is_empty() {
				placements.insert(spec.id(), batch);
			}
		}
		placements
	}

	fn evaluate(
		&self,
		spec: &FoliageTypeSpec,
		frame: &TileFrame,
		sample: &SurfaceSample,
		index: u64,
	) -> Option<PlacementTransform> {
		let gain = self.settings.color_gain;
		let color = LinearRgba::new(
			sample.color.red * gain,
			sample.color.green * gain,
			sample.color.blue * gain,
			sample.color.alpha,
		);
		if !spec.spawn_constraint.contains_rgb(color) {
			return None;
		}
		if !spec.accepts_slope(slope_angle(sample.normal, frame.up)) {
			return None;
		}

		let mut rng = sample_rng(spec.seed, frame.tile.coord, index);
		let offset = spec.local_offset.sample(&mut rng);
		let translation = frame.tile.transform.transform_point(frame.relative_position(sample) + offset);
		let rotation = spec.sample_rotation(sample.normal, frame.tile.transform.rotation, &mut rng);
		let scale = spec.scale.sample(&mut rng);

		Some(PlacementTransform::new(translation, rotation, scale)).filter(PlacementTransform::is_valid)
	}
}

/// Set, valid types; invalid ones are logged and skipped for this cycle.
fn active_types(types: &[Option<Arc<FoliageTypeSpec>>]) -> Vec<Arc<FoliageTypeSpec>> {
	types
		.iter()
		.flatten()
		.filter(|spec| match spec.validate() {
			Ok(()) => true,
			Err(e) => {
				log::error!("Skipping foliage type: {}", e);
				false
			}
		})
		.cloned()
		.collect()
}
