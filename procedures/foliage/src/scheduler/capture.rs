use crate::attribute::{AttributeGrid, AttributeGridError};
use bevy::prelude::*;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum CaptureError {
	#[error("capture of tile {tile} failed: {reason}")]
	Failed { tile: IVec2, reason: String },
	#[error("captured attributes are malformed: {0}")]
	Grid(#[from] AttributeGridError),
}

/// What a capture device needs to render one tile from above.
#[derive(Debug, Clone, PartialEq)]
pub struct CaptureRequest {
	pub tile: IVec2,
	/// World transform of the tile centre; the capture looks down its -Z axis.
	pub transform: Transform,
	/// Width of the orthographic view in world units.
	pub diameter: f32,
	/// Side length of the captured buffers in pixels.
	pub resolution: usize,
}

/// Renders a tile's surface attributes. Called from worker threads.
pub trait SceneCapture: Send + Sync {
	fn capture(&self, request: &CaptureRequest) -> Result<AttributeGrid, CaptureError>;
}

impl<F> SceneCapture for F
where
	F: Fn(&CaptureRequest) -> Result<AttributeGrid, CaptureError> + Send + Sync,
{
	fn capture(&self, request: &CaptureRequest) -> Result<AttributeGrid, CaptureError> {
		self(request)
	}
}
