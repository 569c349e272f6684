//! Deferred teardown queue.
//!
//! Retired artifacts are handed to a dedicated thread so their teardown never
//! runs on a request thread or while a writer lock is held.

use std::panic::{AssertUnwindSafe, catch_unwind};
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

use tokio::sync::{mpsc, oneshot};

use crate::{TaskClass, spawn_named_thread};

type DisposalJob = Box<dyn FnOnce() + Send + 'static>;

enum Message {
	Dispose { label: String, job: DisposalJob },
	Barrier(oneshot::Sender<()>),
}

#[derive(Debug, Default)]
struct Counters {
	queued: AtomicU64,
	completed: AtomicU64,
	failed: AtomicU64,
}

/// Cloneable sender side of the disposal thread.
///
/// The thread exits once every clone of the queue has been dropped and the
/// backlog is drained.
#[derive(Debug, Clone)]
pub struct DisposalQueue {
	tx: mpsc::UnboundedSender<Message>,
	counters: Arc<Counters>,
}

impl std::fmt::Debug for Message {
	fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
		match self {
			Message::Dispose { label, .. } => f.debug_struct("Dispose").field("label", label).finish_non_exhaustive(),
			Message::Barrier(_) => f.write_str("Barrier"),
		}
	}
}

impl DisposalQueue {
	/// Starts the disposal thread.
	pub fn start(thread_name: impl Into<String>) -> std::io::Result<Self> {
		let (tx, mut rx) = mpsc::unbounded_channel::<Message>();
		let counters = Arc::new(Counters::default());
		let thread_counters = counters.clone();

		spawn_named_thread(TaskClass::Disposal, thread_name, move || {
			while let Some(message) = rx.blocking_recv() {
				match message {
					Message::Dispose { label, job } => {
						if catch_unwind(AssertUnwindSafe(job)).is_err() {
							thread_counters.failed.fetch_add(1, Ordering::Relaxed);
							tracing::warn!(artifact = %label, "disposal.teardown_panicked");
						} else {
							tracing::trace!(artifact = %label, "disposal.teardown_done");
						}
						thread_counters.completed.fetch_add(1, Ordering::AcqRel);
					}
					Message::Barrier(done) => {
						let _ = done.send(());
					}
				}
			}
			tracing::debug!("disposal.thread_exit");
		})?;

		Ok(Self { tx, counters })
	}

	/// Schedules `job` for execution on the disposal thread.
	///
	/// If the thread is gone the job is dropped without running and counted
	/// as failed.
	pub fn dispose(&self, label: impl Into<String>, job: impl FnOnce() + Send + 'static) {
		let label = label.into();
		self.counters.queued.fetch_add(1, Ordering::AcqRel);
		if let Err(mpsc::error::SendError(message)) = self.tx.send(Message::Dispose { label, job: Box::new(job) }) {
			self.counters.failed.fetch_add(1, Ordering::Relaxed);
			self.counters.completed.fetch_add(1, Ordering::AcqRel);
			tracing::warn!(?message, "disposal.queue_closed");
		}
	}

	/// Jobs queued but not yet finished.
	pub fn pending(&self) -> u64 {
		self.counters
			.queued
			.load(Ordering::Acquire)
			.saturating_sub(self.counters.completed.load(Ordering::Acquire))
	}

	/// Teardowns that ran to completion.
	pub fn completed(&self) -> u64 {
		self.counters.completed.load(Ordering::Acquire)
	}

	/// Teardowns that panicked or could not be delivered.
	pub fn failed(&self) -> u64 {
		self.counters.failed.load(Ordering::Relaxed)
	}

	/// Waits until every job queued before this call has finished.
	///
	/// Returns `false` if the disposal thread is gone.
	pub async fn flush(&self) -> bool {
		let (done, wait) = oneshot::channel();
		if self.tx.send(Message::Barrier(done)).is_err() {
			return false;
		}
		wait.await.is_ok()
	}

	/// Blocking variant of [`Self::flush`]. Must not be called from async context.
	pub fn flush_blocking(&self) -> bool {
		let (done, wait) = oneshot::channel();
		if self.tx.send(Message::Barrier(done)).is_err() {
			return false;
		}
		wait.blocking_recv().is_ok()
	}
}

#[cfg(test)]
mod tests {
	use std::sync::Mutex;
	use std::sync::atomic::AtomicUsize;

	use super::*;

	#[test]
	fn jobs_run_off_thread_in_order() {
		let queue = DisposalQueue::start("disposal-test").expect("thread spawns");
		let seen = Arc::new(Mutex::new(Vec::new()));
		let caller = std::thread::current().id();

		for i in 0..3 {
			let seen = seen.clone();
			queue.dispose(format!("job-{i}"), move || {
				assert_ne!(std::thread::current().id(), caller);
				seen.lock().unwrap().push(i);
			});
		}

		assert!(queue.flush_blocking());
		assert_eq!(*seen.lock().unwrap(), vec![0, 1, 2]);
		assert_eq!(queue.completed(), 3);
		assert_eq!(queue.pending(), 0);
	}

	#[test]
	fn panicking_teardown_is_contained() {
		let queue = DisposalQueue::start("disposal-panic").expect("thread spawns");
		let after = Arc::new(AtomicUsize::new(0));

		queue.dispose("bad", || panic!("teardown failed"));
		let counter = after.clone();
		queue.dispose("good", move || {
			counter.fetch_add(1, Ordering::SeqCst);
		});

		assert!(queue.flush_blocking());
		assert_eq!(queue.failed(), 1);
		assert_eq!(after.load(Ordering::SeqCst), 1);
	}
}
