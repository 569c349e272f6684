use std::sync::atomic::{AtomicU64, Ordering};

use serde::Serialize;

use crate::service::ServiceId;

/// Cumulative per-service request counters.
#[derive(Debug, Default)]
pub struct ServiceStatistics {
	attempted: AtomicU64,
	authorized: AtomicU64,
	completed: AtomicU64,
}

impl ServiceStatistics {
	pub fn record_attempt(&self) {
		self.attempted.fetch_add(1, Ordering::Relaxed);
	}

	pub fn record_authorized(&self) {
		self.authorized.fetch_add(1, Ordering::Relaxed);
	}

	pub fn record_completed(&self) {
		self.completed.fetch_add(1, Ordering::Relaxed);
	}

	pub fn snapshot(&self, id: ServiceId) -> StatisticsSnapshot {
		StatisticsSnapshot {
			id,
			attempted: self.attempted.load(Ordering::Relaxed),
			authorized: self.authorized.load(Ordering::Relaxed),
			completed: self.completed.load(Ordering::Relaxed),
		}
	}
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct StatisticsSnapshot {
	pub id: ServiceId,
	pub attempted: u64,
	pub authorized: u64,
	pub completed: u64,
}
