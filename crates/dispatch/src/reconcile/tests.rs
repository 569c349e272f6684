use std::collections::HashSet;
use std::time::Duration;

use parking_lot::Mutex;

use super::*;
use crate::config::DispatchConfig;
use crate::error::{CompileError, InvocationError};
use crate::events::CacheEvent;
use crate::policy::{CompiledPolicy, PolicyCompiler};
use crate::request::InboundRequest;
use crate::service::{ServiceDefinition, ServiceStatus};
use crate::store::{MemoryStore, ServiceStore};

struct AllowAll;

impl CompiledPolicy for AllowAll {
	fn invoke(&self, _request: &InboundRequest) -> Result<(), InvocationError> {
		Ok(())
	}
}

/// Compiles everything except the policy text `broken`.
struct Compiler;

impl PolicyCompiler for Compiler {
	fn compile(&self, definition: &ServiceDefinition) -> Result<Box<dyn CompiledPolicy>, CompileError> {
		if definition.policy == "broken" {
			return Err(CompileError::Structural {
				service: definition.id,
				reason: "bad tree".to_string(),
			});
		}
		Ok(Box::new(AllowAll))
	}
}

/// Store wrapper that reports some records as corrupt and counts lookups.
#[derive(Default)]
struct FlakyStore {
	inner: MemoryStore,
	corrupt: Mutex<HashSet<ServiceId>>,
	lookups: Mutex<Vec<ServiceId>>,
}

impl ServiceStore for FlakyStore {
	fn find_all(&self) -> Result<Vec<ServiceDefinition>, StoreError> {
		self.inner.find_all()
	}

	fn find_by_id(&self, id: ServiceId) -> Result<Option<ServiceDefinition>, StoreError> {
		self.lookups.lock().push(id);
		if self.corrupt.lock().contains(&id) {
			return Err(StoreError::Corrupt {
				service: id,
				reason: "truncated policy xml".to_string(),
			});
		}
		self.inner.find_by_id(id)
	}

	fn find_version_map(&self) -> Result<VersionMap, StoreError> {
		self.inner.find_version_map()
	}
}

fn setup(config: DispatchConfig) -> (Arc<ServiceCache>, Arc<FlakyStore>, Reconciler) {
	let store = Arc::new(FlakyStore::default());
	let cache = Arc::new(ServiceCache::builder(Arc::new(Compiler), store.clone()).config(config).build().unwrap());
	let reconciler = Reconciler::new(cache.clone());
	(cache, store, reconciler)
}

fn applied(outcome: CycleOutcome) -> ReconcileReport {
	match outcome {
		CycleOutcome::Applied(report) => report,
		other => panic!("expected an applied cycle, got {other:?}"),
	}
}

#[test]
fn plan_finds_additions_updates_and_deletions() {
	let cached: VersionMap = [(ServiceId(1), 1), (ServiceId(2), 4), (ServiceId(5), 1)].into_iter().collect();
	let stored: VersionMap = [(ServiceId(1), 1), (ServiceId(2), 5), (ServiceId(9), 1)].into_iter().collect();

	let plan = plan(&cached, &stored);
	assert_eq!(plan.removals, vec![(ServiceId(5), 1)]);
	assert_eq!(
		plan.upserts,
		vec![
			Drift {
				id: ServiceId(2),
				cached: Some(4),
				stored: 5
			},
			Drift {
				id: ServiceId(9),
				cached: None,
				stored: 1
			},
		]
	);
	assert!(super::plan(&stored, &stored).is_empty());
}

#[test]
fn deletes_and_adds_in_one_cycle() {
	let (cache, store, reconciler) = setup(DispatchConfig::default());
	cache.put(ServiceDefinition::new(5, 1, "old").routed("/old"));
	store.inner.upsert(ServiceDefinition::new(9, 1, "new").routed("/new"));

	let mut events = cache.subscribe();
	let report = applied(reconciler.run_once());
	assert_eq!((report.removed, report.added, report.updated), (1, 1, 0));

	assert!(cache.lookup(ServiceId(5)).is_none());
	assert_eq!(cache.lookup(ServiceId(9)).map(|s| s.name.clone()).as_deref(), Some("new"));
	assert_eq!(cache.resolve(&InboundRequest::to_path("/new")).map(|s| s.id), Some(ServiceId(9)));

	let mut seen = Vec::new();
	while let Ok(event) = events.try_recv() {
		seen.push(event);
	}
	assert_eq!(
		seen.last(),
		Some(&CacheEvent::Reloaded {
			reason: ReloadReason::Reconciled
		})
	);
}

#[test]
fn second_cycle_without_store_changes_is_idle() {
	let (cache, store, reconciler) = setup(DispatchConfig::default());
	store.inner.upsert(ServiceDefinition::new(1, 1, "a").routed("/a"));
	store.inner.upsert(ServiceDefinition::new(2, 3, "b").routed("/b").with_policy("broken"));

	applied(reconciler.run_once());
	let versions = cache.snapshot_versions();
	let mut events = cache.subscribe();

	assert_eq!(reconciler.run_once(), CycleOutcome::Idle);
	assert_eq!(cache.snapshot_versions(), versions);
	assert!(events.try_recv().is_err());
}

#[test]
fn redeploy_in_store_updates_cache() {
	let (cache, store, reconciler) = setup(DispatchConfig::default());
	store.inner.upsert(ServiceDefinition::new(1, 1, "a").routed("/foo"));
	applied(reconciler.run_once());

	store.inner.upsert(ServiceDefinition::new(1, 2, "a").routed("/bar"));
	let report = applied(reconciler.run_once());
	assert_eq!(report.updated, 1);
	assert!(cache.resolve(&InboundRequest::to_path("/foo")).is_none());
	assert_eq!(cache.resolve(&InboundRequest::to_path("/bar")).map(|s| s.version), Some(2));
}

#[test]
fn unavailable_store_abandons_the_cycle() {
	let (cache, store, reconciler) = setup(DispatchConfig::default());
	cache.put(ServiceDefinition::new(5, 1, "cached").routed("/c"));
	store.inner.set_unavailable(Some("connection refused"));

	assert!(matches!(reconciler.run_once(), CycleOutcome::SourceUnavailable(StoreError::Unavailable(_))));
	assert_eq!(cache.lookup(ServiceId(5)).map(|s| s.version), Some(1));

	store.inner.set_unavailable(None);
	assert_eq!(applied(reconciler.run_once()).removed, 1);
}

#[test]
fn corrupt_record_is_not_refetched_until_its_version_changes() {
	let (cache, store, reconciler) = setup(DispatchConfig::default());
	store.inner.upsert(ServiceDefinition::new(3, 1, "corrupt").routed("/c"));
	store.corrupt.lock().insert(ServiceId(3));

	assert_eq!(reconciler.run_once(), CycleOutcome::Idle);
	assert_eq!(cache.known_bad_version(ServiceId(3)), Some(1));
	assert_eq!(store.lookups.lock().len(), 1);

	assert_eq!(reconciler.run_once(), CycleOutcome::Idle);
	assert_eq!(store.lookups.lock().len(), 1);

	store.corrupt.lock().clear();
	store.inner.upsert(ServiceDefinition::new(3, 2, "corrupt").routed("/c"));
	assert_eq!(applied(reconciler.run_once()).added, 1);
	assert_eq!(cache.status(ServiceId(3)), Some(ServiceStatus::Enabled));
	assert_eq!(cache.known_bad_version(ServiceId(3)), None);
}

#[test]
fn bad_versions_of_deleted_records_are_forgotten() {
	let (cache, store, reconciler) = setup(DispatchConfig::default());
	for id in 100..110 {
		store.inner.upsert(ServiceDefinition::new(id, 1, format!("corrupt-{id}")));
		store.corrupt.lock().insert(ServiceId(id));
	}
	store.inner.upsert(ServiceDefinition::new(7, 2, "broken").with_policy("broken"));

	assert_eq!(applied(reconciler.run_once()).failed, 10);
	assert_eq!(cache.diagnostics().throwing.len(), 11);

	for id in 100..110 {
		store.inner.delete(ServiceId(id));
	}
	assert_eq!(reconciler.run_once(), CycleOutcome::Idle);
	assert_eq!(reconciler.run_once(), CycleOutcome::Idle);

	let diagnostics = cache.diagnostics();
	assert_eq!(diagnostics.size, 1);
	assert_eq!(diagnostics.throwing, vec![(ServiceId(7), 2)]);
	assert_eq!(cache.known_bad_version(ServiceId(100)), None);
}

#[test]
fn overlapping_cycle_is_rejected() {
	let (_cache, _store, reconciler) = setup(DispatchConfig::default());
	let _held = reconciler.gate().try_enter().unwrap();
	assert_eq!(reconciler.run_once(), CycleOutcome::Busy);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn periodic_task_repairs_drift() {
	let config = DispatchConfig {
		integrity_check_interval_ms: 10,
		..DispatchConfig::default()
	};
	let (cache, store, reconciler) = setup(config);
	let registry = TaskRegistry::new();
	let task = Arc::new(reconciler).spawn(TaskToken::detached(), registry.clone());

	let mut events = cache.subscribe();
	store.inner.upsert(ServiceDefinition::new(9, 1, "late").routed("/late"));

	let reloaded = tokio::time::timeout(Duration::from_secs(5), async {
		loop {
			if let Ok(CacheEvent::Reloaded { .. }) = events.recv().await {
				break;
			}
		}
	})
	.await;
	assert!(reloaded.is_ok(), "reconciler never ran");
	assert!(cache.lookup(ServiceId(9)).is_some());

	task.stop().await;
	assert!(registry.get(INTEGRITY_TASK).is_some_and(|record| record.runs >= 1));
}
