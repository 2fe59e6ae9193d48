use bevy::color::LinearRgba;
use bevy::math::Vec3;

/// Values that can be blended for bilinear sampling.
pub trait Bilerp: Copy {
	fn bilerp_mix(self, other: Self, t: f32) -> Self;
}

impl Bilerp for f32 {
	fn bilerp_mix(self, other: Self, t: f32) -> Self {
		self + (other - self) * t
	}
}

impl Bilerp for Vec3 {
	fn bilerp_mix(self, other: Self, t: f32) -> Self {
		self + (other - self) * t
	}
}

impl Bilerp for LinearRgba {
	fn bilerp_mix(self, other: Self, t: f32) -> Self {
		LinearRgba::new(
			self.red.bilerp_mix(other.red, t),
			self.green.bilerp_mix(other.green, t),
			self.blue.bilerp_mix(other.blue, t),
			self.alpha.bilerp_mix(other.alpha, t),
		)
	}
}

/// Bilinearly samples a dense row-major grid at a fractional coordinate.
///
/// The four neighbouring cells are found through the floor and ceil of `u` and `v`, the
/// fractional parts are the blend weights. At integer coordinates floor and ceil coincide so the
/// cell value is returned exactly.
///
/// Callers keep `u` within `[0, width - 1]` and `v` within `[0, height - 1]`; the neighbour
/// indices are clamped to the grid so a stray coordinate on the far edge does not read out of
/// bounds.
pub fn sample_bilinear<T: Bilerp>(data: &[T], u: f32, v: f32, width: usize, height: usize) -> T {
	debug_assert_eq!(data.len(), width * height);

	let max_x = width.saturating_sub(1);
	let max_y = height.saturating_sub(1);

	let ox = (u.floor().max(0.0) as usize).min(max_x);
	let oy = (v.floor().max(0.0) as usize).min(max_y);
	let nx = (u.ceil().max(0.0) as usize).min(max_x);
	let ny = (v.ceil().max(0.0) as usize).min(max_y);

	let fx = u - u.floor();
	let fy = v - v.floor();

	let top = data[oy * width + ox].bilerp_mix(data[oy * width + nx], fx);
	let bottom = data[ny * width + ox].bilerp_mix(data[ny * width + nx], fx);

	top.bilerp_mix(bottom, fy)
}

pub fn sample_color(data: &[LinearRgba], u: f32, v: f32, width: usize, height: usize) -> LinearRgba {
	sample_bilinear(data, u, v, width, height)
}

pub fn sample_float(data: &[f32], u: f32, v: f32, width: usize, height: usize) -> f32 {
	sample_bilinear(data, u, v, width, height)
}

#[cfg(test)]
mod tests {
	use super::*;

	fn gradient(width: usize, height: usize) -> Vec<f32> {
		(0..width * height).map(|i| ((i % width) * 10 + (i / width) * 100) as f32).collect()
	}

	#[test]
	fn test_integer_coordinates_return_cell_exactly() {
		let (w, h) = (5, 4);
		let data: Vec<LinearRgba> = (0..w * h)
			.map(|i| LinearRgba::new(i as f32 * 0.1, (i * i) as f32 * 0.37, 1.0 / (i as f32 + 3.0), 1.0))
			.collect();

		for y in 0..h {
			for x in 0..w {
				let sampled = sample_color(&data, x as f32, y as f32, w, h);
				assert_eq!(sampled, data[y * w + x]);
			}
		}
	}

	#[test]
	fn test_midpoints_average_neighbours() {
		let (w, h) = (3, 3);
		let data = gradient(w, h);

		// halfway between (0, 0) = 0 and (1, 0) = 10
		assert!((sample_float(&data, 0.5, 0.0, w, h) - 5.0).abs() < 1e-5);
		// halfway between (1, 1) = 110 and (1, 2) = 210
		assert!((sample_float(&data, 1.0, 1.5, w, h) - 160.0).abs() < 1e-4);
		// centre of the four cells 0, 10, 100, 110
		assert!((sample_float(&data, 0.5, 0.5, w, h) - 55.0).abs() < 1e-4);
	}

	#[test]
	fn test_far_edge_is_clamped() {
		let (w, h) = (2, 2);
		let data = gradient(w, h);
		assert_eq!(sample_float(&data, 1.0, 1.0, w, h), 110.0);
	}
}
