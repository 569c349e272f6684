use std::collections::HashMap;
use std::sync::{Arc, RwLock};

use crate::TaskClass;

/// Status snapshot for one registered background task.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TaskRecord {
	pub name: String,
	pub class: TaskClass,
	pub generation: u64,
	/// Completed runs of the task body.
	pub runs: u64,
	/// Ticks dropped because the previous run was still in progress.
	pub skipped: u64,
	pub last_failure: Option<String>,
}

impl TaskRecord {
	/// Creates a record with no runs yet.
	pub fn new(name: impl Into<String>, class: TaskClass, generation: u64) -> Self {
		Self {
			name: name.into(),
			class,
			generation,
			runs: 0,
			skipped: 0,
			last_failure: None,
		}
	}
}

/// In-memory task registry for health reporting.
#[derive(Debug, Default, Clone)]
pub struct TaskRegistry {
	inner: Arc<RwLock<HashMap<String, TaskRecord>>>,
}

impl TaskRegistry {
	/// Creates an empty registry.
	pub fn new() -> Self {
		Self::default()
	}

	/// Upserts one record.
	pub fn upsert(&self, record: TaskRecord) {
		if let Ok(mut guard) = self.inner.write() {
			guard.insert(record.name.clone(), record);
		}
	}

	/// Applies `f` to the named record, if registered.
	pub fn update(&self, name: &str, f: impl FnOnce(&mut TaskRecord)) {
		if let Ok(mut guard) = self.inner.write()
			&& let Some(record) = guard.get_mut(name)
		{
			f(record);
		}
	}

	/// Removes the named record, if registered.
	pub fn remove(&self, name: &str) {
		if let Ok(mut guard) = self.inner.write() {
			guard.remove(name);
		}
	}

	/// Returns a snapshot of the named record.
	pub fn get(&self, name: &str) -> Option<TaskRecord> {
		self.inner.read().ok()?.get(name).cloned()
	}

	/// Returns snapshots sorted by name.
	pub fn snapshots(&self) -> Vec<TaskRecord> {
		let Ok(guard) = self.inner.read() else {
			return Vec::new();
		};
		let mut records: Vec<_> = guard.values().cloned().collect();
		records.sort_by(|a, b| a.name.cmp(&b.name));
		records
	}
}
