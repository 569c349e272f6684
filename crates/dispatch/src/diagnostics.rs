//! Health and diagnostic snapshots of the service cache.

use serde::Serialize;

use crate::service::{ServiceId, ServiceStatus};

/// Point-in-time view of the cache for health reporting.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct CacheDiagnostics {
	pub size: usize,
	pub catch_all: bool,
	pub ambiguous_resolutions: u64,
	pub pending_disposals: u64,
	/// Services waiting for a license, with the version that failed.
	pub unlicensed: Vec<(ServiceId, u64)>,
	/// Services whose current version is known not to compile or load.
	pub throwing: Vec<(ServiceId, u64)>,
	pub services: Vec<ServiceReport>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ServiceReport {
	pub id: ServiceId,
	pub version: u64,
	pub name: String,
	pub routing_uri: Option<String>,
	pub status: ServiceStatus,
}
