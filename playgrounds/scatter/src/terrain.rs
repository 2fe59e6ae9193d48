use bevy::math::DVec2;
use bevy::prelude::*;
use foliage::cluster::{ElevationQuery, NormalQuery};
use foliage::{AttributeGrid, CaptureError, CaptureRequest, SceneCapture};
use noise::{NoiseFn, Perlin};

/// Rolling Perlin hills with a separate moisture field deciding where ground is green.
#[derive(Debug, Clone)]
pub struct NoiseTerrain {
	height: Perlin,
	moisture: Perlin,
	/// Height of the tallest hills in world units.
	pub height_scale: f32,
	/// Noise cycles per world unit of the lowest octave.
	pub frequency: f64,
}

impl NoiseTerrain {
	pub fn new(seed: u32) -> Self {
		Self {
			height: Perlin::new(seed),
			moisture: Perlin::new(seed.wrapping_add(1)),
			height_scale: 60.0,
			frequency: 0.002,
		}
	}

	pub fn with_height_scale(mut self, height_scale: f32) -> Self {
		self.height_scale = height_scale;
		self
	}

	pub fn height_at(&self, x: f32, y: f32) -> f32 {
		let mut height = 0.0;
		let mut amplitude = 1.0;
		let mut frequency = self.frequency;

		for _ in 0..4 {
			let sample = self.height.get([x as f64 * frequency, y as f64 * frequency]) as f32;
			height += sample * amplitude;
			amplitude *= 0.5;
			frequency *= 2.0;
		}

		height * self.height_scale
	}

	pub fn normal_at(&self, x: f32, y: f32) -> Vec3 {
		let step = 1.0;
		let dx = self.height_at(x + step, y) - self.height_at(x - step, y);
		let dy = self.height_at(x, y + step) - self.height_at(x, y - step);
		Vec3::new(-dx, -dy, 2.0 * step).normalize_or_zero()
	}

	/// Between -1 and 1; positive is lush.
	pub fn moisture_at(&self, x: f32, y: f32) -> f32 {
		self.moisture.get([x as f64 * self.frequency * 3.0, y as f64 * self.frequency * 3.0]) as f32
	}

	fn ground_color(&self, x: f32, y: f32) -> LinearRgba {
		let moisture = self.moisture_at(x, y);
		if moisture > 0.0 {
			LinearRgba::rgb(0.1, 0.3 + 0.5 * moisture, 0.1)
		} else {
			LinearRgba::rgb(0.4, 0.3, 0.1)
		}
	}
}

/// Captures a tile by evaluating the terrain under every pixel.
impl SceneCapture for NoiseTerrain {
	fn capture(&self, request: &CaptureRequest) -> Result<AttributeGrid, CaptureError> {
		let resolution = request.resolution;
		let half = request.diameter / 2.0;
		let camera = request.transform.translation;
		let mut grid = AttributeGrid::filled(resolution, resolution, LinearRgba::BLACK, Vec3::Z, 0.0)?;

		for y in 0..resolution {
			for x in 0..resolution {
				let local = Vec3::new(
					-half + request.diameter * x as f32 / resolution as f32,
					-half + request.diameter * y as f32 / resolution as f32,
					0.0,
				);
				let world = camera + request.transform.rotation * local;
				let surface = self.height_at(world.x, world.y);

				let index = grid.index(x, y);
				grid.color_mut()[index] = self.ground_color(world.x, world.y);
				grid.normal_mut()[index] = foliage::encode_normal(self.normal_at(world.x, world.y));
				grid.depth_mut()[index] = camera.z - surface;
			}
		}

		Ok(grid)
	}
}

impl ElevationQuery for NoiseTerrain {
	fn elevation(&self, position: DVec2) -> Option<f64> {
		Some(f64::from(self.height_at(position.x as f32, position.y as f32)))
	}
}

impl NormalQuery for NoiseTerrain {
	fn normal(&self, position: DVec2) -> Option<Vec3> {
		Some(self.normal_at(position.x as f32, position.y as f32))
	}
}

#[cfg(test)]
mod tests {
	use super::*;
	use foliage::decode_normal;

	#[test]
	fn test_capture_matches_terrain() -> Result<(), CaptureError> {
		let terrain = NoiseTerrain::new(7);
		let request = CaptureRequest {
			tile: IVec2::new(1, 0),
			transform: Transform::from_xyz(500.0, 0.0, 2000.0),
			diameter: 100.0,
			resolution: 8,
		};
		let grid = terrain.capture(&request)?;
		assert_eq!(grid.len(), 64);

		// first pixel sits on the tile's south-west corner
		let surface = terrain.height_at(450.0, -50.0);
		assert!((grid.depth()[0] - (2000.0 - surface)).abs() < 1e-3);
		assert!(decode_normal(grid.normal()[0]).abs_diff_eq(terrain.normal_at(450.0, -50.0), 1e-5));
		Ok(())
	}

	#[test]
	fn test_normals_point_up() {
		let terrain = NoiseTerrain::new(3);
		for i in 0..20 {
			let normal = terrain.normal_at(i as f32 * 37.0, i as f32 * -11.0);
			assert!(normal.z > 0.0);
			assert!((normal.length() - 1.0).abs() < 1e-4);
		}
		assert_eq!(NoiseTerrain::new(3).with_height_scale(0.0).normal_at(10.0, 10.0), Vec3::Z);
	}
}
