/// Where a tile is in its capture, compute and apply cycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum TileState {
	#[default]
	Idle,
	/// Waiting in the capture queue.
	CaptureQueued,
	/// Capture dispatched to a worker.
	Capturing,
	/// Captured, placements being computed on a worker.
	ComputeQueued,
	/// Store operations queued on the main thread.
	Applying,
}

impl TileState {
	/// A cycle is in flight; the tile may not start another.
	pub fn is_busy(self) -> bool {
		matches!(self, TileState::Capturing | TileState::ComputeQueued | TileState::Applying)
	}

	/// Work for this tile is running off the main thread.
	pub fn is_on_worker(self) -> bool {
		matches!(self, TileState::Capturing | TileState::ComputeQueued)
	}
}
