use std::sync::Arc;

use rustc_hash::FxHashMap;

use crate::engine::ResolutionEngine;
use crate::error::CompileError;
use crate::events::{ChangeKind, ServiceChange};
use crate::policy::PolicySlot;
use crate::service::{ServiceDefinition, ServiceId, ServiceStatus};
use crate::stats::ServiceStatistics;
use crate::store::VersionMap;

/// One cached service.
#[derive(Debug)]
pub(crate) struct CacheEntry {
	pub(crate) definition: Arc<ServiceDefinition>,
	/// Absent while the service is disabled.
	pub(crate) policy: Option<Arc<PolicySlot>>,
	pub(crate) status: ServiceStatus,
}

/// A definition compiled outside the writer lock, ready to install.
#[derive(Debug)]
pub(crate) struct Prepared {
	pub(crate) definition: Arc<ServiceDefinition>,
	pub(crate) status: ServiceStatus,
	pub(crate) policy: Option<Arc<PolicySlot>>,
	pub(crate) failure: Option<CompileError>,
}

/// Precondition on the cached version for a batched install or removal.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum Expect {
	Any,
	Absent,
	Version(u64),
}

impl Expect {
	pub(crate) fn holds(self, current: Option<u64>) -> bool {
		match self {
			Self::Any => true,
			Self::Absent => current.is_none(),
			Self::Version(version) => current == Some(version),
		}
	}
}

/// Side effects of a mutation, released after the writer lock is dropped.
#[derive(Debug, Default)]
pub(crate) struct Mutation {
	pub(crate) changes: Vec<ServiceChange>,
	pub(crate) retired: Vec<CacheEntry>,
	/// Compiled for an install whose precondition no longer held.
	pub(crate) orphans: Vec<Arc<PolicySlot>>,
}

/// Everything guarded by the cache's single reader/writer lock.
///
/// `entries` and the derived `candidates` / `catch_all` fields MUST change
/// together; every mutation path ends with [`CacheState::refresh_derived`].
#[derive(Debug, Default)]
pub(crate) struct CacheState {
	pub(crate) entries: FxHashMap<ServiceId, CacheEntry>,
	pub(crate) statistics: FxHashMap<ServiceId, Arc<ServiceStatistics>>,
	/// Last version that compiled only to the unlicensed stand-in.
	pub(crate) unlicensed: FxHashMap<ServiceId, u64>,
	/// Last version that failed to load or compile for a structural reason.
	pub(crate) throwing: FxHashMap<ServiceId, u64>,
	/// Resolvable definitions sorted by id.
	pub(crate) candidates: Vec<Arc<ServiceDefinition>>,
	pub(crate) catch_all: bool,
}

impl CacheState {
	pub(crate) fn version(&self, id: ServiceId) -> Option<u64> {
		self.entries.get(&id).map(|entry| entry.definition.version)
	}

	/// Installs `prepared` and notifies every resolver.
	pub(crate) fn install(&mut self, prepared: Prepared, engine: &ResolutionEngine, mutation: &mut Mutation) {
		let Prepared {
			definition,
			status,
			policy,
			failure,
		} = prepared;
		let id = definition.id;
		let previous = self.entries.remove(&id);

		for resolver in engine.resolvers() {
			let notified = if previous.is_some() {
				resolver.service_updated(&definition)
			} else {
				resolver.service_created(&definition)
			};
			if let Err(err) = notified {
				tracing::warn!(service_id = %id, resolver = resolver.name(), error = %err, "cache.resolver_notify_failed");
			}
		}

		match &failure {
			Some(CompileError::Licensing { .. }) => {
				self.unlicensed.insert(id, definition.version);
				self.throwing.remove(&id);
			}
			Some(CompileError::Structural { .. }) => {
				self.throwing.insert(id, definition.version);
				self.unlicensed.remove(&id);
			}
			None => {
				self.unlicensed.remove(&id);
				self.throwing.remove(&id);
			}
		}

		match &previous {
			None => mutation.changes.push(ServiceChange { id, kind: ChangeKind::Created }),
			Some(old) => {
				mutation.changes.push(ServiceChange { id, kind: ChangeKind::Updated });
				match (old.status.is_resolvable(), status.is_resolvable()) {
					(false, true) => mutation.changes.push(ServiceChange { id, kind: ChangeKind::Enabled }),
					(true, false) => mutation.changes.push(ServiceChange { id, kind: ChangeKind::Disabled }),
					_ => {}
				}
			}
		}

		tracing::debug!(
			service_id = %id,
			version = definition.version,
			status = ?status,
			replaced = previous.as_ref().map(|old| old.definition.version),
			"cache.installed"
		);

		self.entries.insert(id, CacheEntry { definition, policy, status });
		mutation.retired.extend(previous);
	}

	/// Evicts `id`, returning whether it was cached.
	pub(crate) fn evict(&mut self, id: ServiceId, engine: &ResolutionEngine, mutation: &mut Mutation) -> bool {
		self.statistics.remove(&id);
		self.unlicensed.remove(&id);
		self.throwing.remove(&id);

		let Some(entry) = self.entries.remove(&id) else {
			return false;
		};
		for resolver in engine.resolvers() {
			resolver.service_deleted(id);
		}
		tracing::debug!(service_id = %id, version = entry.definition.version, "cache.evicted");
		mutation.changes.push(ServiceChange { id, kind: ChangeKind::Deleted });
		mutation.retired.push(entry);
		true
	}

	/// Whether a bad-version record names an id that is neither cached nor stored.
	pub(crate) fn has_departed(&self, stored: &VersionMap) -> bool {
		self.throwing
			.keys()
			.chain(self.unlicensed.keys())
			.any(|id| !self.entries.contains_key(id) && !stored.contains_key(id))
	}

	/// Drops bad-version records of ids that are neither cached nor stored.
	pub(crate) fn forget_departed(&mut self, stored: &VersionMap) -> usize {
		let before = self.throwing.len() + self.unlicensed.len();
		let entries = &self.entries;
		let known = |id: &ServiceId, _: &mut u64| entries.contains_key(id) || stored.contains_key(id);
		self.throwing.retain(known);
		self.unlicensed.retain(known);
		before - (self.throwing.len() + self.unlicensed.len())
	}

	/// Recomputes the candidate snapshot and the catch-all flag.
	pub(crate) fn refresh_derived(&mut self, catch_all_route: &str) {
		let mut candidates: Vec<_> = self
			.entries
			.values()
			.filter(|entry| entry.status.is_resolvable())
			.map(|entry| entry.definition.clone())
			.collect();
		candidates.sort_by_key(|definition| definition.id);

		self.catch_all = candidates
			.iter()
			.any(|definition| definition.routing_uri.as_deref().map(str::trim) == Some(catch_all_route));
		self.candidates = candidates;
	}

	pub(crate) fn install_guarded(&mut self, prepared: Prepared, expect: Expect, engine: &ResolutionEngine, mutation: &mut Mutation) -> bool {
		let current = self.version(prepared.definition.id);
		if !expect.holds(current) {
			tracing::debug!(
				service_id = %prepared.definition.id,
				expected = ?expect,
				current = ?current,
				"cache.install_stale"
			);
			mutation.orphans.extend(prepared.policy);
			return false;
		}
		self.install(prepared, engine, mutation);
		true
	}
}
