use bevy::prelude::*;
use thiserror::Error;

#[derive(Debug, Error, Clone, PartialEq)]
pub enum AttributeGridError {
	#[error("{name} buffer has {actual} texels, expected {expected}")]
	SizeMismatch { name: &'static str, actual: usize, expected: usize },
	#[error("attribute grid must not be empty ({width} x {height})")]
	Empty { width: usize, height: usize },
}

/// Per-pixel surface attributes captured from directly above a tile.
///
/// All buffers are row-major, `width * height` long. Normals are encoded as colors whose RGB is
/// the world-space normal.
#[derive(Debug, Clone, PartialEq)]
pub struct AttributeGrid {
	width: usize,
	height: usize,
	color: Vec<LinearRgba>,
	normal: Vec<LinearRgba>,
	depth: Vec<f32>,
}

impl AttributeGrid {
	pub fn new(
		width: usize,
		height: usize,
		color: Vec<LinearRgba>,
		normal: Vec<LinearRgba>,
		depth: Vec<f32>,
	) -> Result<Self, AttributeGridError> {
		if width == 0 || height == 0 {
			return Err(AttributeGridError::Empty { width, height });
		}

		let expected = width * height;
		for (name, actual) in [("color", color.len()), ("normal", normal.len()), ("depth", depth.len())] {
			if actual != expected {
				return Err(AttributeGridError::SizeMismatch { name, actual, expected });
			}
		}

		Ok(Self { width, height, color, normal, depth })
	}

	/// A grid with the same attributes in every pixel.
	pub fn filled(
		width: usize,
		height: usize,
		color: LinearRgba,
		normal: Vec3,
		depth: f32,
	) -> Result<Self, AttributeGridError> {
		let n = width * height;
		Self::new(width, height, vec![color; n], vec![encode_normal(normal); n], vec![depth; n])
	}

	pub fn width(&self) -> usize {
		self.width
	}

	pub fn height(&self) -> usize {
		self.height
	}

	pub fn len(&self) -> usize {
		self.width * self.height
	}

	pub fn is_empty(&self) -> bool {
		self.len() == 0
	}

	pub fn index(&self, x: usize, y: usize) -> usize {
		y * self.width + x
	}

	pub fn color(&self) -> &[LinearRgba] {
		&self.color
	}

	pub fn normal(&self) -> &[LinearRgba] {
		&self.normal
	}

	pub fn depth(&self) -> &[f32] {
		&self.depth
	}

	pub fn color_mut(&mut self) -> &mut [LinearRgba] {
		&mut self.color
	}

	pub fn normal_mut(&mut self) -> &mut [LinearRgba] {
		&mut self.normal
	}

	pub fn depth_mut(&mut self) -> &mut [f32] {
		&mut self.depth
	}
}

pub fn encode_normal(normal: Vec3) -> LinearRgba {
	LinearRgba::new(normal.x, normal.y, normal.z, 1.0)
}

/// Unit normal from an encoded color, or zero when the encoding is degenerate.
pub fn decode_normal(encoded: LinearRgba) -> Vec3 {
	Vec3::new(encoded.red, encoded.green, encoded.blue).normalize_or_zero()
}
