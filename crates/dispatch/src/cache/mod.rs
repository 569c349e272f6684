//! Service cache.
//!
//! Owns the `id -> entry` map, the compiled policies lent out through
//! [`PolicyHandle`]s, and the derived catch-all flag, all behind one
//! reader/writer lock. Decoration and compilation run before the writer lock
//! is taken; store I/O never runs under it; retired policies are dropped after
//! it is released so their teardown lands on the disposal queue.

use std::sync::Arc;

use parking_lot::{RwLock, RwLockUpgradableReadGuard};
use portcullis_worker::DisposalQueue;
use rustc_hash::FxHashMap;
use tokio::sync::broadcast;

use crate::config::DispatchConfig;
use crate::diagnostics::{CacheDiagnostics, ServiceReport};
use crate::engine::{ResolutionEngine, ResolutionListener, Resolved};
use crate::error::{CompileError, Result, StoreError};
use crate::events::{CacheEvent, EventBus, GatewayEvent, ReloadReason};
use crate::policy::{PolicyCompiler, PolicyHandle, PolicySlot};
use crate::request::InboundRequest;
use crate::resolve::{Resolution, ServiceResolver, URI_RESOLVER, default_chain};
use crate::service::{DisableReason, ServiceDefinition, ServiceId, ServiceStatus};
use crate::stats::{ServiceStatistics, StatisticsSnapshot};
use crate::store::{ServiceDecorator, ServiceStore, VersionMap};

mod state;

pub(crate) use state::{Expect, Prepared};
use state::{CacheState, Mutation};

/// One step of a batched cache update.
#[derive(Debug)]
pub(crate) enum BatchOp {
	Remove { id: ServiceId, expect: Expect },
	Install { prepared: Prepared, expect: Expect },
}

/// Counts of what a batch actually changed.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct BatchOutcome {
	pub removed: usize,
	pub added: usize,
	pub updated: usize,
	/// Operations dropped because the cached version moved since planning.
	pub stale: usize,
}

impl BatchOutcome {
	pub fn is_empty(&self) -> bool {
		self.removed + self.added + self.updated == 0
	}
}

/// Builder for [`ServiceCache`].
pub struct ServiceCacheBuilder {
	compiler: Arc<dyn PolicyCompiler>,
	store: Arc<dyn ServiceStore>,
	config: DispatchConfig,
	decorators: Vec<Box<dyn ServiceDecorator>>,
	resolvers: Option<Vec<Box<dyn ServiceResolver>>>,
}

impl ServiceCacheBuilder {
	#[must_use]
	pub fn config(mut self, config: DispatchConfig) -> Self {
		self.config = config;
		self
	}

	/// Appends a decorator; decorators run in insertion order.
	#[must_use]
	pub fn decorator(mut self, decorator: impl ServiceDecorator) -> Self {
		self.decorators.push(Box::new(decorator));
		self
	}

	/// Replaces the standard resolver chain.
	#[must_use]
	pub fn resolvers(mut self, resolvers: Vec<Box<dyn ServiceResolver>>) -> Self {
		self.resolvers = Some(resolvers);
		self
	}

	/// Starts the disposal thread and assembles the cache.
	pub fn build(self) -> Result<ServiceCache> {
		let reaper = DisposalQueue::start(self.config.disposal_thread.clone())?;
		let resolvers = self.resolvers.unwrap_or_else(|| default_chain(&self.config.catch_all_route));
		Ok(ServiceCache {
			state: RwLock::new(CacheState::default()),
			engine: ResolutionEngine::new(resolvers),
			compiler: self.compiler,
			store: self.store,
			decorators: self.decorators,
			events: EventBus::new(self.config.event_buffer),
			reaper,
			config: self.config,
		})
	}
}

/// The authoritative in-memory set of deployed services.
pub struct ServiceCache {
	state: RwLock<CacheState>,
	engine: ResolutionEngine,
	compiler: Arc<dyn PolicyCompiler>,
	store: Arc<dyn ServiceStore>,
	decorators: Vec<Box<dyn ServiceDecorator>>,
	events: EventBus,
	reaper: DisposalQueue,
	config: DispatchConfig,
}

impl std::fmt::Debug for ServiceCache {
	fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
		f.debug_struct("ServiceCache")
			.field("len", &self.len())
			.field("engine", &self.engine)
			.field("config", &self.config)
			.finish_non_exhaustive()
	}
}

impl ServiceCache {
	pub fn builder(compiler: Arc<dyn PolicyCompiler>, store: Arc<dyn ServiceStore>) -> ServiceCacheBuilder {
		ServiceCacheBuilder {
			compiler,
			store,
			config: DispatchConfig::default(),
			decorators: Vec::new(),
			resolvers: None,
		}
	}

	pub fn config(&self) -> &DispatchConfig {
		&self.config
	}

	pub(crate) fn store(&self) -> &dyn ServiceStore {
		self.store.as_ref()
	}

	/// Queue that tears down retired policies.
	pub fn disposal(&self) -> &DisposalQueue {
		&self.reaper
	}

	pub fn subscribe(&self) -> broadcast::Receiver<CacheEvent> {
		self.events.subscribe()
	}

	/// Inserts or replaces the entry for `definition.id`.
	///
	/// Returns the status the service ended up in. Compile failures never
	/// propagate: structural ones leave the service cached but disabled,
	/// licensing ones install the fail-fast stand-in.
	pub fn put(&self, definition: ServiceDefinition) -> ServiceStatus {
		let prepared = self.prepare(definition);
		let status = prepared.status;
		let mut mutation = Mutation::default();
		{
			let mut state = self.state.write();
			state.install(prepared, &self.engine, &mut mutation);
			state.refresh_derived(&self.config.catch_all_route);
		}
		self.finish(mutation, None);
		status
	}

	/// Evicts `id`. Returns whether it was cached.
	pub fn remove(&self, id: ServiceId) -> bool {
		let mut mutation = Mutation::default();
		let removed = {
			let mut state = self.state.write();
			let removed = state.evict(id, &self.engine, &mut mutation);
			state.refresh_derived(&self.config.catch_all_route);
			removed
		};
		self.finish(mutation, None);
		removed
	}

	pub fn lookup(&self, id: ServiceId) -> Option<Arc<ServiceDefinition>> {
		self.state.read().entries.get(&id).map(|entry| entry.definition.clone())
	}

	pub fn status(&self, id: ServiceId) -> Option<ServiceStatus> {
		self.state.read().entries.get(&id).map(|entry| entry.status)
	}

	/// Borrows the current compiled policy of `id`.
	///
	/// `None` when the service is absent or disabled.
	pub fn policy(&self, id: ServiceId) -> Option<PolicyHandle> {
		self.state.read().entries.get(&id)?.policy.as_ref().map(PolicyHandle::borrow)
	}

	pub fn resolve(&self, request: &InboundRequest) -> Option<Arc<ServiceDefinition>> {
		self.resolve_detailed(request, None).into_service()
	}

	/// Resolves, giving `listener` a chance to veto before message content is inspected.
	pub fn resolve_with(&self, request: &InboundRequest, listener: &dyn ResolutionListener) -> Option<Arc<ServiceDefinition>> {
		self.resolve_detailed(request, Some(listener)).into_service()
	}

	/// Resolves against one consistent snapshot and reports why a miss happened.
	///
	/// A listener runs with the cache lock released, so it may call back into
	/// the cache.
	pub fn resolve_detailed(&self, request: &InboundRequest, listener: Option<&dyn ResolutionListener>) -> Resolved {
		let candidates = {
			let state = self.state.read();
			if listener.is_none() {
				return self.engine.resolve(&state.candidates, request, None);
			}
			state.candidates.clone()
		};
		self.engine.resolve(&candidates, request, listener)
	}

	/// Runs the resolver chain against `{id}` alone.
	pub fn resolve_for(&self, id: ServiceId, request: &InboundRequest) -> Option<Arc<ServiceDefinition>> {
		let state = self.state.read();
		let candidates: Vec<_> = state
			.entries
			.get(&id)
			.filter(|entry| entry.status.is_resolvable())
			.map(|entry| entry.definition.clone())
			.into_iter()
			.collect();
		self.engine.resolve(&candidates, request, None).into_service()
	}

	/// Resolves and borrows the matching policy under the same read lock.
	pub fn resolve_policy(&self, request: &InboundRequest) -> Option<(Arc<ServiceDefinition>, PolicyHandle)> {
		let state = self.state.read();
		let service = self.engine.resolve(&state.candidates, request, None).into_service()?;
		let handle = state.entries.get(&service.id)?.policy.as_ref().map(PolicyHandle::borrow)?;
		Some((service, handle))
	}

	/// Cached `id -> version` map for diffing against the store.
	pub fn snapshot_versions(&self) -> VersionMap {
		self.state
			.read()
			.entries
			.iter()
			.map(|(id, entry)| (*id, entry.definition.version))
			.collect()
	}

	pub fn len(&self) -> usize {
		self.state.read().entries.len()
	}

	pub fn is_empty(&self) -> bool {
		self.len() == 0
	}

	/// Whether any resolvable service routes on the catch-all key.
	pub fn has_catch_all(&self) -> bool {
		self.state.read().catch_all
	}

	pub fn ambiguous_resolutions(&self) -> u64 {
		self.engine.ambiguous_resolutions()
	}

	/// Statistics record of a cached service, created on first use.
	pub fn statistics(&self, id: ServiceId) -> Option<Arc<ServiceStatistics>> {
		let state = self.state.upgradable_read();
		if let Some(stats) = state.statistics.get(&id) {
			return Some(stats.clone());
		}
		if !state.entries.contains_key(&id) {
			return None;
		}
		let mut state = RwLockUpgradableReadGuard::upgrade(state);
		Some(state.statistics.entry(id).or_default().clone())
	}

	pub fn all_statistics(&self) -> Vec<StatisticsSnapshot> {
		let state = self.state.read();
		let mut snapshots: Vec<_> = state.statistics.iter().map(|(id, stats)| stats.snapshot(*id)).collect();
		snapshots.sort_by_key(|snapshot| snapshot.id);
		snapshots
	}

	/// Which cached services the URI resolver alone would pick for `uri`,
	/// including disabled ones.
	pub fn services_for_uri(&self, uri: &str) -> Vec<ServiceId> {
		let Some(resolver) = self.engine.resolver(URI_RESOLVER) else {
			return Vec::new();
		};
		let state = self.state.read();
		let mut all: Vec<_> = state.entries.values().map(|entry| entry.definition.clone()).collect();
		all.sort_by_key(|definition| definition.id);
		match resolver.resolve(&all, &InboundRequest::to_path(uri)) {
			Resolution::Narrowed(services) => services.iter().map(|service| service.id).collect(),
			Resolution::NotApplicable | Resolution::NoMatch => Vec::new(),
		}
	}

	/// Last version of `id` known to fail, from either bad-version index.
	pub fn known_bad_version(&self, id: ServiceId) -> Option<u64> {
		let state = self.state.read();
		state.throwing.get(&id).or_else(|| state.unlicensed.get(&id)).copied()
	}

	/// Records that `version` of `id` could not be loaded from the store.
	pub(crate) fn mark_throwing(&self, id: ServiceId, version: u64) {
		self.state.write().throwing.insert(id, version);
	}

	/// Forgets bad versions of ids absent from both the cache and `stored`.
	///
	/// Takes the writer lock only when there is something to forget.
	pub(crate) fn forget_departed(&self, stored: &VersionMap) -> usize {
		let state = self.state.upgradable_read();
		if !state.has_departed(stored) {
			return 0;
		}
		RwLockUpgradableReadGuard::upgrade(state).forget_departed(stored)
	}

	pub fn diagnostics(&self) -> CacheDiagnostics {
		let state = self.state.read();
		let mut services: Vec<_> = state
			.entries
			.values()
			.map(|entry| ServiceReport {
				id: entry.definition.id,
				version: entry.definition.version,
				name: entry.definition.name.clone(),
				routing_uri: entry.definition.routing_uri.clone(),
				status: entry.status,
			})
			.collect();
		services.sort_by_key(|report| report.id);

		let sorted = |map: &FxHashMap<ServiceId, u64>| {
			let mut pairs: Vec<_> = map.iter().map(|(id, version)| (*id, *version)).collect();
			pairs.sort_unstable();
			pairs
		};

		CacheDiagnostics {
			size: state.entries.len(),
			catch_all: state.catch_all,
			ambiguous_resolutions: self.engine.ambiguous_resolutions(),
			pending_disposals: self.reaper.pending(),
			unlicensed: sorted(&state.unlicensed),
			throwing: sorted(&state.throwing),
			services,
		}
	}

	/// Populates the cache from [`ServiceStore::find_all`].
	///
	/// Services already cached are left alone. Returns how many were installed.
	pub fn warm_start(&self) -> Result<usize, StoreError> {
		let definitions = self.store.find_all()?;
		let ops = definitions
			.into_iter()
			.map(|definition| BatchOp::Install {
				prepared: self.prepare(definition),
				expect: Expect::Absent,
			})
			.collect();
		let outcome = self.apply_batch(ops, None);
		tracing::info!(installed = outcome.added, skipped = outcome.stale, "cache.warm_start");
		Ok(outcome.added)
	}

	/// Recompiles the services affected by a gateway event.
	///
	/// Returns how many entries were reinstalled.
	pub fn handle_event(&self, event: &GatewayEvent) -> usize {
		let (targets, reason) = {
			let state = self.state.read();
			match event {
				GatewayEvent::LicenseChanged => (
					state
						.unlicensed
						.keys()
						.filter_map(|id| state.entries.get(id))
						.map(|entry| entry.definition.clone())
						.collect::<Vec<_>>(),
					ReloadReason::LicenseChanged,
				),
				GatewayEvent::ModuleLoaded { .. } | GatewayEvent::ModuleUnloaded { .. } => (
					state.entries.values().map(|entry| entry.definition.clone()).collect(),
					ReloadReason::ModulesChanged,
				),
			}
		};

		let ops = targets
			.into_iter()
			.map(|definition| {
				let expect = Expect::Version(definition.version);
				BatchOp::Install {
					prepared: self.compile(definition),
					expect,
				}
			})
			.collect();
		let outcome = self.apply_batch(ops, Some(reason));
		tracing::info!(event = ?event, recompiled = outcome.updated, stale = outcome.stale, "cache.reset");
		outcome.updated
	}

	/// Decorates and compiles `definition` without touching the lock.
	pub(crate) fn prepare(&self, definition: ServiceDefinition) -> Prepared {
		let mut current = definition;
		for decorator in &self.decorators {
			match decorator.decorate(current.clone()) {
				Ok(next) => current = next,
				Err(err) => {
					tracing::warn!(service_id = %current.id, decorator = decorator.name(), error = %err, "cache.decorate_failed");
					return Prepared {
						definition: Arc::new(current),
						status: ServiceStatus::Disabled(DisableReason::InvalidPolicy),
						policy: None,
						failure: Some(err),
					};
				}
			}
		}
		self.compile(Arc::new(current))
	}

	fn compile(&self, definition: Arc<ServiceDefinition>) -> Prepared {
		if !definition.enabled {
			return Prepared {
				definition,
				status: ServiceStatus::Disabled(DisableReason::Administrative),
				policy: None,
				failure: None,
			};
		}

		match self.compiler.compile(&definition) {
			Ok(policy) => Prepared {
				policy: Some(PolicySlot::new(definition.id, definition.version, policy, self.reaper.clone())),
				definition,
				status: ServiceStatus::Enabled,
				failure: None,
			},
			Err(err @ CompileError::Licensing { .. }) => {
				tracing::warn!(service_id = %definition.id, version = definition.version, error = %err, "cache.policy_unlicensed");
				Prepared {
					policy: Some(PolicySlot::unlicensed(definition.id, definition.version, &err, self.reaper.clone())),
					definition,
					status: ServiceStatus::Unlicensed,
					failure: Some(err),
				}
			}
			Err(err @ CompileError::Structural { .. }) => {
				tracing::warn!(service_id = %definition.id, version = definition.version, error = %err, "cache.policy_invalid");
				Prepared {
					definition,
					status: ServiceStatus::Disabled(DisableReason::InvalidPolicy),
					policy: None,
					failure: Some(err),
				}
			}
		}
	}

	/// Applies `ops` under one writer-lock acquisition.
	pub(crate) fn apply_batch(&self, ops: Vec<BatchOp>, reload: Option<ReloadReason>) -> BatchOutcome {
		let mut outcome = BatchOutcome::default();
		let mut mutation = Mutation::default();
		{
			let mut state = self.state.write();
			for op in ops {
				match op {
					BatchOp::Remove { id, expect } => {
						if expect.holds(state.version(id)) && state.evict(id, &self.engine, &mut mutation) {
							outcome.removed += 1;
						} else {
							outcome.stale += 1;
						}
					}
					BatchOp::Install { prepared, expect } => {
						let existed = state.version(prepared.definition.id).is_some();
						if !state.install_guarded(prepared, expect, &self.engine, &mut mutation) {
							outcome.stale += 1;
						} else if existed {
							outcome.updated += 1;
						} else {
							outcome.added += 1;
						}
					}
				}
			}
			state.refresh_derived(&self.config.catch_all_route);
		}
		self.finish(mutation, reload);
		outcome
	}

	fn finish(&self, mutation: Mutation, reload: Option<ReloadReason>) {
		let Mutation { changes, retired, orphans } = mutation;
		drop(retired);
		drop(orphans);
		if !changes.is_empty() {
			self.events.publish(CacheEvent::ServicesChanged(changes));
		}
		if let Some(reason) = reload {
			self.events.publish(CacheEvent::Reloaded { reason });
		}
	}
}
