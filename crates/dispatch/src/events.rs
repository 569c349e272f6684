//! Inbound gateway events and outbound cache notifications.

use serde::Serialize;
use tokio::sync::broadcast;

use crate::service::ServiceId;

/// Events from the surrounding gateway that trigger targeted recompiles.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum GatewayEvent {
	/// The installed license changed; unlicensed services are retried.
	LicenseChanged,
	/// An extension module was registered; every service is recompiled.
	ModuleLoaded { module: String },
	/// An extension module was removed; every service is recompiled.
	ModuleUnloaded { module: String },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ChangeKind {
	Created,
	Updated,
	Deleted,
	/// The service became resolvable.
	Enabled,
	/// The service stopped being resolvable but is still cached.
	Disabled,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
pub struct ServiceChange {
	pub id: ServiceId,
	pub kind: ChangeKind,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ReloadReason {
	Reconciled,
	LicenseChanged,
	ModulesChanged,
}

/// Published after the cache's writer lock is released.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CacheEvent {
	ServicesChanged(Vec<ServiceChange>),
	/// A bulk pass finished; observers should rebuild derived indexes.
	Reloaded { reason: ReloadReason },
}

/// Broadcast channel for [`CacheEvent`]s. Publishing with no subscribers is a no-op.
#[derive(Debug, Clone)]
pub struct EventBus {
	tx: broadcast::Sender<CacheEvent>,
}

impl EventBus {
	pub fn new(capacity: usize) -> Self {
		let (tx, _) = broadcast::channel(capacity.max(1));
		Self { tx }
	}

	pub fn publish(&self, event: CacheEvent) {
		if let Ok(receivers) = self.tx.send(event) {
			tracing::trace!(receivers, "cache.event_published");
		}
	}

	pub fn subscribe(&self) -> broadcast::Receiver<CacheEvent> {
		self.tx.subscribe()
	}
}
