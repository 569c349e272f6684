//! Persistent-store boundary and the definition decorator pipeline.

use std::collections::HashMap;

use parking_lot::RwLock;

use crate::error::{CompileError, StoreError};
use crate::service::{ServiceDefinition, ServiceId};

/// Authoritative `id -> version` map reported by the store or snapshotted from the cache.
pub type VersionMap = HashMap<ServiceId, u64>;

/// Read-side contract of the persistent service store.
///
/// Only called by warm start and the reconciler, never on the request path.
pub trait ServiceStore: Send + Sync + 'static {
	fn find_all(&self) -> Result<Vec<ServiceDefinition>, StoreError>;

	fn find_by_id(&self, id: ServiceId) -> Result<Option<ServiceDefinition>, StoreError>;

	fn find_version_map(&self) -> Result<VersionMap, StoreError>;
}

/// Transforms a definition before it is compiled and cached.
pub trait ServiceDecorator: Send + Sync + 'static {
	fn name(&self) -> &str;

	fn decorate(&self, definition: ServiceDefinition) -> Result<ServiceDefinition, CompileError>;
}

/// In-process [`ServiceStore`] for embedding and tests.
#[derive(Debug, Default)]
pub struct MemoryStore {
	services: RwLock<HashMap<ServiceId, ServiceDefinition>>,
	unavailable: RwLock<Option<String>>,
}

impl MemoryStore {
	pub fn new() -> Self {
		Self::default()
	}

	pub fn with_services(services: impl IntoIterator<Item = ServiceDefinition>) -> Self {
		let store = Self::new();
		for service in services {
			store.upsert(service);
		}
		store
	}

	pub fn upsert(&self, service: ServiceDefinition) {
		self.services.write().insert(service.id, service);
	}

	pub fn delete(&self, id: ServiceId) -> Option<ServiceDefinition> {
		self.services.write().remove(&id)
	}

	/// Makes every query fail with [`StoreError::Unavailable`] until cleared with `None`.
	pub fn set_unavailable(&self, reason: Option<&str>) {
		*self.unavailable.write() = reason.map(str::to_string);
	}

	fn check(&self) -> Result<(), StoreError> {
		match self.unavailable.read().as_deref() {
			Some(reason) => Err(StoreError::Unavailable(reason.to_string())),
			None => Ok(()),
		}
	}
}

impl ServiceStore for MemoryStore {
	fn find_all(&self) -> Result<Vec<ServiceDefinition>, StoreError> {
		self.check()?;
		let mut services: Vec<_> = self.services.read().values().cloned().collect();
		services.sort_by_key(|s| s.id);
		Ok(services)
	}

	fn find_by_id(&self, id: ServiceId) -> Result<Option<ServiceDefinition>, StoreError> {
		self.check()?;
		Ok(self.services.read().get(&id).cloned())
	}

	fn find_version_map(&self) -> Result<VersionMap, StoreError> {
		self.check()?;
		Ok(self.services.read().iter().map(|(id, s)| (*id, s.version)).collect())
	}
}
