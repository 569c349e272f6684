//! Fixed-period background tasks with skip-if-busy semantics.
//!
//! A tick that fires while the previous run is still in progress is dropped,
//! never queued. The same [`BusyGate`] can be shared with callers that trigger
//! the body manually so those runs are excluded from overlapping as well.

use std::future::Future;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;

use crate::registry::{TaskRecord, TaskRegistry};
use crate::token::TaskToken;
use crate::{TaskClass, join_error_panic_message, spawn};

/// Mutual-exclusion flag that rejects, rather than waits for, a second entrant.
#[derive(Debug, Clone, Default)]
pub struct BusyGate {
	busy: Arc<AtomicBool>,
}

impl BusyGate {
	/// Creates an open gate.
	pub fn new() -> Self {
		Self::default()
	}

	/// Enters the gate, or returns `None` when a run is already in progress.
	pub fn try_enter(&self) -> Option<BusyGuard> {
		self.busy
			.compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
			.ok()
			.map(|_| BusyGuard { busy: self.busy.clone() })
	}

	/// Whether a guard is currently held.
	pub fn is_busy(&self) -> bool {
		self.busy.load(Ordering::Acquire)
	}
}

/// Held for the duration of one run; leaving the scope reopens the gate.
#[derive(Debug)]
pub struct BusyGuard {
	busy: Arc<AtomicBool>,
}

impl Drop for BusyGuard {
	fn drop(&mut self) {
		self.busy.store(false, Ordering::Release);
	}
}

/// Schedule description for one periodic task.
#[derive(Debug, Clone)]
pub struct PeriodicSpec {
	pub name: String,
	pub class: TaskClass,
	pub period: Duration,
	/// Delay before the first tick. Defaults to one period.
	pub initial_delay: Option<Duration>,
}

impl PeriodicSpec {
	/// Describes a task that first runs one `period` after it is spawned.
	pub fn new(name: impl Into<String>, class: TaskClass, period: Duration) -> Self {
		Self {
			name: name.into(),
			class,
			period,
			initial_delay: None,
		}
	}

	#[must_use]
	pub fn initial_delay(mut self, delay: Duration) -> Self {
		self.initial_delay = Some(delay);
		self
	}
}

/// Handle to a running periodic task. Dropping it cancels the task.
#[derive(Debug)]
pub struct PeriodicTask {
	name: String,
	token: TaskToken,
	gate: BusyGate,
	join: Option<JoinHandle<()>>,
}

impl PeriodicTask {
	/// Registry name of the task.
	pub fn name(&self) -> &str {
		&self.name
	}

	/// Generation of the token the task was spawned with.
	pub fn generation(&self) -> u64 {
		self.token.generation()
	}

	/// The gate guarding the task body.
	pub fn gate(&self) -> &BusyGate {
		&self.gate
	}

	/// Whether the scheduling loop is still alive.
	pub fn is_running(&self) -> bool {
		self.join.as_ref().is_some_and(|join| !join.is_finished())
	}

	/// Requests cancellation and waits for the loop to exit.
	///
	/// A run already in progress completes first.
	pub async fn stop(mut self) {
		self.token.cancel();
		if let Some(join) = self.join.take() {
			let _ = join.await;
		}
	}
}

impl Drop for PeriodicTask {
	fn drop(&mut self) {
		self.token.cancel();
	}
}

/// Spawns `body` on a fixed schedule until `token` is cancelled.
///
/// Each run executes as its own task so a panicking body is logged and
/// recorded in `registry` without killing the schedule.
pub fn spawn_periodic<F, Fut>(spec: PeriodicSpec, token: TaskToken, gate: BusyGate, registry: TaskRegistry, mut body: F) -> PeriodicTask
where
	F: FnMut() -> Fut + Send + 'static,
	Fut: Future<Output = ()> + Send + 'static,
{
	let PeriodicSpec {
		name,
		class,
		period,
		initial_delay,
	} = spec;

	registry.upsert(TaskRecord::new(name.clone(), class, token.generation()));

	let loop_token = token.clone();
	let loop_gate = gate.clone();
	let loop_name = name.clone();
	let join = spawn(class, async move {
		let start = tokio::time::Instant::now() + initial_delay.unwrap_or(period);
		let mut ticks = tokio::time::interval_at(start, period);
		ticks.set_missed_tick_behavior(MissedTickBehavior::Skip);

		loop {
			tokio::select! {
				biased;
				_ = loop_token.cancelled() => break,
				_ = ticks.tick() => {}
			}

			let Some(guard) = loop_gate.try_enter() else {
				tracing::debug!(task = %loop_name, "periodic.tick_skipped");
				registry.update(&loop_name, |record| record.skipped += 1);
				continue;
			};

			let outcome = spawn(class, body()).await;
			drop(guard);

			match outcome {
				Ok(()) => registry.update(&loop_name, |record| record.runs += 1),
				Err(err) => {
					let message = join_error_panic_message(err).unwrap_or_else(|| "cancelled".to_string());
					tracing::error!(task = %loop_name, error = %message, "periodic.run_failed");
					registry.update(&loop_name, |record| {
						record.runs += 1;
						record.last_failure = Some(message);
					});
				}
			}
		}

		tracing::debug!(task = %loop_name, "periodic.stopped");
	});

	PeriodicTask {
		name,
		token,
		gate,
		join: Some(join),
	}
}

#[cfg(test)]
mod tests {
	use std::sync::atomic::AtomicUsize;

	use super::*;

	#[test]
	fn gate_rejects_second_entrant() {
		let gate = BusyGate::new();
		let first = gate.try_enter().expect("gate starts open");
		assert!(gate.is_busy());
		assert!(gate.try_enter().is_none());
		drop(first);
		assert!(!gate.is_busy());
		assert!(gate.try_enter().is_some());
	}

	#[tokio::test(start_paused = true)]
	async fn runs_on_schedule_until_stopped() {
		let runs = Arc::new(AtomicUsize::new(0));
		let registry = TaskRegistry::new();
		let counter = runs.clone();
		let task = spawn_periodic(
			PeriodicSpec::new("tick", TaskClass::Maintenance, Duration::from_millis(100)),
			TaskToken::detached(),
			BusyGate::new(),
			registry.clone(),
			move || {
				let counter = counter.clone();
				async move {
					counter.fetch_add(1, Ordering::SeqCst);
				}
			},
		);

		tokio::time::sleep(Duration::from_millis(350)).await;
		task.stop().await;

		assert_eq!(runs.load(Ordering::SeqCst), 3);
		assert_eq!(registry.get("tick").map(|r| r.runs), Some(3));
	}

	#[tokio::test(start_paused = true)]
	async fn tick_is_skipped_while_gate_is_held() {
		let runs = Arc::new(AtomicUsize::new(0));
		let registry = TaskRegistry::new();
		let gate = BusyGate::new();
		let counter = runs.clone();
		let task = spawn_periodic(
			PeriodicSpec::new("busy", TaskClass::Maintenance, Duration::from_millis(100)),
			TaskToken::detached(),
			gate.clone(),
			registry.clone(),
			move || {
				let counter = counter.clone();
				async move {
					counter.fetch_add(1, Ordering::SeqCst);
				}
			},
		);

		let held = gate.try_enter().expect("gate starts open");
		tokio::time::sleep(Duration::from_millis(250)).await;
		drop(held);
		tokio::time::sleep(Duration::from_millis(100)).await;
		task.stop().await;

		assert_eq!(runs.load(Ordering::SeqCst), 1);
		let record = registry.get("busy").expect("registered");
		assert_eq!(record.skipped, 2);
		assert_eq!(record.runs, 1);
	}

	#[tokio::test(start_paused = true)]
	async fn panicking_body_is_recorded_and_schedule_continues() {
		let registry = TaskRegistry::new();
		let calls = Arc::new(AtomicUsize::new(0));
		let counter = calls.clone();
		let task = spawn_periodic(
			PeriodicSpec::new("flaky", TaskClass::Maintenance, Duration::from_millis(100)),
			TaskToken::detached(),
			BusyGate::new(),
			registry.clone(),
			move || {
				let n = counter.fetch_add(1, Ordering::SeqCst);
				async move {
					if n == 0 {
						panic!("first run fails");
					}
				}
			},
		);

		tokio::time::sleep(Duration::from_millis(250)).await;
		task.stop().await;

		let record = registry.get("flaky").expect("registered");
		assert_eq!(record.runs, 2);
		assert_eq!(record.last_failure.as_deref(), Some("first run fails"));
	}
}
