//! Integrity reconciler.
//!
//! Periodically diffs the cache's version map against the store's and repairs
//! drift. Store I/O and compilation happen before the cache's writer lock is
//! taken; the prepared batch is then applied under a single acquisition.

use std::sync::Arc;

use portcullis_worker::{BusyGate, PeriodicSpec, PeriodicTask, TaskClass, TaskRegistry, TaskToken, spawn_blocking, spawn_periodic};

use crate::cache::{BatchOp, Expect, ServiceCache};
use crate::error::StoreError;
use crate::events::ReloadReason;
use crate::service::ServiceId;
use crate::store::VersionMap;

/// Name under which the periodic task is registered.
pub const INTEGRITY_TASK: &str = "integrity-check";

/// An id whose stored version differs from the cached one.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Drift {
	pub id: ServiceId,
	/// `None` when the id is not cached.
	pub cached: Option<u64>,
	pub stored: u64,
}

/// Differences between a cache snapshot and the store, sorted by id.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ReconcilePlan {
	/// Cached ids absent from the store, with their cached version.
	pub removals: Vec<(ServiceId, u64)>,
	pub upserts: Vec<Drift>,
}

impl ReconcilePlan {
	pub fn is_empty(&self) -> bool {
		self.removals.is_empty() && self.upserts.is_empty()
	}
}

/// Computes the repairs needed to align `cached` with `stored`.
pub fn plan(cached: &VersionMap, stored: &VersionMap) -> ReconcilePlan {
	let mut removals: Vec<_> = cached
		.iter()
		.filter(|(id, _)| !stored.contains_key(id))
		.map(|(id, version)| (*id, *version))
		.collect();
	removals.sort_unstable();

	let mut upserts: Vec<_> = stored
		.iter()
		.filter_map(|(id, stored)| {
			let cached = cached.get(id).copied();
			(cached != Some(*stored)).then_some(Drift {
				id: *id,
				cached,
				stored: *stored,
			})
		})
		.collect();
	upserts.sort_unstable_by_key(|drift| drift.id);

	ReconcilePlan { removals, upserts }
}

/// What one reconciliation cycle changed.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ReconcileReport {
	pub removed: usize,
	pub added: usize,
	pub updated: usize,
	/// Ids skipped because their stored version is known not to load.
	pub skipped: usize,
	/// Records the store could not return intact.
	pub failed: usize,
	/// Repairs dropped because the cache moved while the cycle ran.
	pub stale: usize,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CycleOutcome {
	/// Cache and store agree; no entry was installed or removed.
	Idle,
	Applied(ReconcileReport),
	/// The store query failed; the cache was left untouched.
	SourceUnavailable(StoreError),
	/// Another cycle was already running.
	Busy,
}

/// Drives reconciliation cycles for one cache.
#[derive(Debug)]
pub struct Reconciler {
	cache: Arc<ServiceCache>,
	gate: BusyGate,
}

impl Reconciler {
	pub fn new(cache: Arc<ServiceCache>) -> Self {
		Self {
			cache,
			gate: BusyGate::new(),
		}
	}

	/// Gate held for the duration of a cycle; a second entrant gets [`CycleOutcome::Busy`].
	pub fn gate(&self) -> &BusyGate {
		&self.gate
	}

	/// Runs one cycle on the calling thread. Performs blocking store I/O.
	pub fn run_once(&self) -> CycleOutcome {
		let Some(_running) = self.gate.try_enter() else {
			tracing::debug!("reconcile.busy");
			return CycleOutcome::Busy;
		};

		let cached = self.cache.snapshot_versions();
		let store = self.cache.store();
		let stored = match store.find_version_map() {
			Ok(stored) => stored,
			Err(err) => {
				tracing::warn!(error = %err, "reconcile.source_unavailable");
				return CycleOutcome::SourceUnavailable(err);
			}
		};

		let forgotten = self.cache.forget_departed(&stored);
		if forgotten > 0 {
			tracing::debug!(forgotten, "reconcile.forgot_departed");
		}

		let plan = plan(&cached, &stored);
		if plan.is_empty() {
			tracing::trace!(services = cached.len(), "reconcile.idle");
			return CycleOutcome::Idle;
		}

		let mut report = ReconcileReport::default();
		let mut ops = Vec::with_capacity(plan.removals.len() + plan.upserts.len());
		ops.extend(plan.removals.iter().map(|(id, version)| BatchOp::Remove {
			id: *id,
			expect: Expect::Version(*version),
		}));

		for drift in &plan.upserts {
			if self.cache.known_bad_version(drift.id) == Some(drift.stored) {
				report.skipped += 1;
				continue;
			}
			let definition = match store.find_by_id(drift.id) {
				Ok(Some(definition)) => definition,
				Ok(None) => {
					tracing::debug!(service_id = %drift.id, "reconcile.vanished");
					continue;
				}
				Err(err @ StoreError::Corrupt { .. }) => {
					tracing::warn!(service_id = %drift.id, version = drift.stored, error = %err, "reconcile.load_failed");
					self.cache.mark_throwing(drift.id, drift.stored);
					report.failed += 1;
					continue;
				}
				Err(err) => {
					tracing::warn!(service_id = %drift.id, error = %err, "reconcile.source_unavailable");
					return CycleOutcome::SourceUnavailable(err);
				}
			};
			if self.cache.known_bad_version(drift.id) == Some(definition.version) {
				report.skipped += 1;
				continue;
			}
			ops.push(BatchOp::Install {
				prepared: self.cache.prepare(definition),
				expect: drift.cached.map_or(Expect::Absent, Expect::Version),
			});
		}

		if ops.is_empty() {
			tracing::debug!(skipped = report.skipped, failed = report.failed, "reconcile.nothing_to_apply");
			return CycleOutcome::Idle;
		}

		let outcome = self.cache.apply_batch(ops, Some(ReloadReason::Reconciled));
		report.removed = outcome.removed;
		report.added = outcome.added;
		report.updated = outcome.updated;
		report.stale = outcome.stale;

		tracing::info!(
			removed = report.removed,
			added = report.added,
			updated = report.updated,
			skipped = report.skipped,
			failed = report.failed,
			stale = report.stale,
			"reconcile.applied"
		);
		CycleOutcome::Applied(report)
	}

	/// Schedules [`Self::run_once`] on the configured integrity period.
	///
	/// Each cycle runs on the blocking pool.
	pub fn spawn(self: &Arc<Self>, token: TaskToken, registry: TaskRegistry) -> PeriodicTask {
		let period = self.cache.config().integrity_check_interval();
		let reconciler = Arc::clone(self);
		spawn_periodic(
			PeriodicSpec::new(INTEGRITY_TASK, TaskClass::Maintenance, period),
			token,
			BusyGate::new(),
			registry,
			move || {
				let reconciler = reconciler.clone();
				async move {
					match spawn_blocking(TaskClass::IoBlocking, move || reconciler.run_once()).await {
						Ok(outcome) => tracing::trace!(outcome = ?outcome, "reconcile.cycle_done"),
						Err(err) if err.is_panic() => std::panic::resume_unwind(err.into_panic()),
						Err(_) => tracing::debug!("reconcile.cycle_cancelled"),
					}
				}
			},
		)
	}
}

#[cfg(test)]
mod tests;
