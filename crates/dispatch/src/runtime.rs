//! Background wiring for a [`ServiceCache`]: warm start, the integrity
//! reconciler, and the gateway event listener.

use std::sync::Arc;

use portcullis_worker::{PeriodicTask, ShutdownScope, TaskClass, TaskRecord, TaskRegistry, spawn, spawn_blocking};
use tokio::sync::broadcast;
use tokio::sync::broadcast::error::RecvError;
use tokio::task::JoinHandle;

use crate::cache::ServiceCache;
use crate::events::GatewayEvent;
use crate::reconcile::Reconciler;

/// Name under which the event listener is registered.
pub const EVENT_TASK: &str = "gateway-events";

/// Owns the background tasks of one dispatch core instance.
#[derive(Debug)]
pub struct DispatchRuntime {
	cache: Arc<ServiceCache>,
	reconciler: Arc<Reconciler>,
	scope: ShutdownScope,
	registry: TaskRegistry,
	integrity: Option<PeriodicTask>,
	listeners: Vec<JoinHandle<()>>,
}

impl DispatchRuntime {
	/// Warm-starts the cache (when configured) and schedules the reconciler.
	///
	/// A failed warm start is logged; the reconciler fills the cache later.
	pub async fn start(cache: Arc<ServiceCache>) -> Self {
		if cache.config().warm_start {
			let warm = cache.clone();
			match spawn_blocking(TaskClass::IoBlocking, move || warm.warm_start()).await {
				Ok(Ok(count)) => tracing::info!(services = count, "dispatch.warm_start_done"),
				Ok(Err(err)) => tracing::warn!(error = %err, "dispatch.warm_start_failed"),
				Err(err) => tracing::error!(error = %err, "dispatch.warm_start_panicked"),
			}
		}

		let scope = ShutdownScope::new();
		let registry = TaskRegistry::new();
		let reconciler = Arc::new(Reconciler::new(cache.clone()));
		let integrity = reconciler.spawn(scope.task_token(), registry.clone());
		tracing::info!(
			period_ms = cache.config().integrity_check_interval_ms,
			generation = integrity.generation(),
			"dispatch.started"
		);

		Self {
			cache,
			reconciler,
			scope,
			registry,
			integrity: Some(integrity),
			listeners: Vec::new(),
		}
	}

	pub fn cache(&self) -> &Arc<ServiceCache> {
		&self.cache
	}

	/// Handle for running a reconciliation cycle on demand.
	pub fn reconciler(&self) -> &Arc<Reconciler> {
		&self.reconciler
	}

	/// Consumes gateway events until shutdown or until the sender side closes.
	///
	/// A lagged receiver missed events of unknown kind, so it falls back to a
	/// full recompile.
	pub fn listen(&mut self, mut events: broadcast::Receiver<GatewayEvent>) {
		let token = self.scope.task_token();
		let cache = self.cache.clone();
		let registry = self.registry.clone();
		registry.upsert(TaskRecord::new(EVENT_TASK, TaskClass::Maintenance, token.generation()));

		let handle = spawn(TaskClass::Maintenance, async move {
			loop {
				let event = tokio::select! {
					biased;
					_ = token.cancelled() => break,
					received = events.recv() => match received {
						Ok(event) => event,
						Err(RecvError::Lagged(missed)) => {
							tracing::warn!(missed, "dispatch.events_lagged");
							GatewayEvent::ModuleLoaded { module: String::new() }
						}
						Err(RecvError::Closed) => break,
					},
				};

				let target = cache.clone();
				match spawn_blocking(TaskClass::IoBlocking, move || target.handle_event(&event)).await {
					Ok(_) => registry.update(EVENT_TASK, |record| record.runs += 1),
					Err(err) => {
						tracing::error!(error = %err, "dispatch.event_handler_failed");
						registry.update(EVENT_TASK, |record| {
							record.runs += 1;
							record.last_failure = Some(err.to_string());
						});
					}
				}
			}
			tracing::debug!("dispatch.events_stopped");
		});
		self.listeners.push(handle);
	}

	/// Status of every background task, sorted by name.
	pub fn tasks(&self) -> Vec<TaskRecord> {
		self.registry.snapshots()
	}

	/// Cancels every task and waits for them to exit. A running cycle completes first.
	pub async fn shutdown(mut self) {
		self.scope.shutdown();
		if let Some(integrity) = self.integrity.take() {
			integrity.stop().await;
		}
		for listener in self.listeners.drain(..) {
			let _ = listener.await;
		}
		tracing::info!("dispatch.stopped");
	}
}

impl Drop for DispatchRuntime {
	fn drop(&mut self) {
		self.scope.shutdown();
	}
}
