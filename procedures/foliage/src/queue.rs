use std::collections::VecDeque;

/// FIFO work queue drained a bounded number of items per tick.
#[derive(Debug, Clone)]
pub struct TaskQueue<T> {
	tasks: VecDeque<T>,
}

impl<T> Default for TaskQueue<T> {
	fn default() -> Self {
		Self { tasks: VecDeque::new() }
	}
}

impl<T> TaskQueue<T> {
	pub fn new() -> Self {
		Self::default()
	}

	pub fn push(&mut self, task: T) {
		self.tasks.push_back(task);
	}

	pub fn pop(&mut self) -> Option<T> {
		self.tasks.pop_front()
	}

	/// Removes at most `budget` tasks from the front of the queue.
	pub fn drain_up_to(&mut self, budget: usize) -> Vec<T> {
		let n = budget.min(self.tasks.len());
		self.tasks.drain(..n).collect()
	}

	/// Drops every queued task, returning how many were abandoned.
	pub fn clear(&mut self) -> usize {
		let n = self.tasks.len();
		self.tasks.clear();
		n
	}

	pub fn len(&self) -> usize {
		self.tasks.len()
	}

	pub fn is_empty(&self) -> bool {
		self.tasks.is_empty()
	}

	pub fn iter(&self) -> impl Iterator<Item = &T> {
		self.tasks.iter()
	}
}

impl<T> Extend<T> for TaskQueue<T> {
	fn extend<I: IntoIterator<Item = T>>(&mut self, iter: I) {
		self.tasks.extend(iter);
	}
}
