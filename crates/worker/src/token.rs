use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

use tokio_util::sync::CancellationToken;

/// Root cancellation scope shared by every background task of one component.
///
/// Cancelling the scope cancels all task tokens handed out by it. Each token
/// carries a generation so restarted tasks can be told apart in logs.
#[derive(Debug, Clone, Default)]
pub struct ShutdownScope {
	root: CancellationToken,
	generations: Arc<AtomicU64>,
}

impl ShutdownScope {
	/// Creates a scope with no tokens derived yet.
	pub fn new() -> Self {
		Self::default()
	}

	/// Derives a cancellable token for one task instance.
	pub fn task_token(&self) -> TaskToken {
		let generation = self.generations.fetch_add(1, Ordering::AcqRel).wrapping_add(1);
		TaskToken {
			generation,
			cancel: self.root.child_token(),
		}
	}

	/// Cancels every token derived from this scope.
	pub fn shutdown(&self) {
		self.root.cancel();
	}

	/// Whether [`Self::shutdown`] has been called.
	pub fn is_shut_down(&self) -> bool {
		self.root.is_cancelled()
	}
}

/// Generation-tagged cancellation token for a single task.
#[derive(Debug, Clone)]
pub struct TaskToken {
	generation: u64,
	cancel: CancellationToken,
}

impl TaskToken {
	/// Token not attached to any scope; only cancelled explicitly.
	pub fn detached() -> Self {
		Self {
			generation: 0,
			cancel: CancellationToken::new(),
		}
	}

	/// Monotonic id of the task instance this token belongs to.
	pub const fn generation(&self) -> u64 {
		self.generation
	}

	/// Whether the token or its scope has been cancelled.
	pub fn is_cancelled(&self) -> bool {
		self.cancel.is_cancelled()
	}

	/// Cancels this token only; the scope and its other tokens are unaffected.
	pub fn cancel(&self) {
		self.cancel.cancel();
	}

	/// Resolves once cancellation is requested on this token or its scope.
	pub async fn cancelled(&self) {
		self.cancel.cancelled().await;
	}
}
