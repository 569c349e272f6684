use std::sync::Arc;

use parking_lot::RwLock;
use rustc_hash::FxHashMap;

use super::Resolution;
use crate::error::ResolverError;
use crate::service::{ServiceDefinition, ServiceId};

/// Index of per-service declared keys (SOAP actions, payload namespaces).
///
/// Narrowing prefers services that declare the request's key and falls back
/// to services that declare no key at all.
#[derive(Debug, Default)]
pub(super) struct DeclaredKeys {
	keys: RwLock<FxHashMap<ServiceId, Vec<String>>>,
}

impl DeclaredKeys {
	pub(super) fn insert(
		&self,
		resolver: &'static str,
		service: &ServiceDefinition,
		declared: &[String],
		normalize: fn(&str) -> &str,
	) -> Result<(), ResolverError> {
		let mut keys = Vec::with_capacity(declared.len());
		for raw in declared {
			let key = normalize(raw);
			if key.is_empty() {
				return Err(ResolverError::InvalidKey {
					resolver,
					service: service.id,
					key: raw.clone(),
					reason: "declared key is empty",
				});
			}
			keys.push(key.to_string());
		}
		keys.sort_unstable();
		keys.dedup();
		self.keys.write().insert(service.id, keys);
		Ok(())
	}

	pub(super) fn remove(&self, id: ServiceId) {
		self.keys.write().remove(&id);
	}

	pub(super) fn narrow(&self, candidates: &[Arc<ServiceDefinition>], key: &str) -> Resolution {
		let index = self.keys.read();
		let mut declaring = Vec::new();
		let mut agnostic = Vec::new();

		for service in candidates {
			match index.get(&service.id) {
				Some(keys) if keys.is_empty() => agnostic.push(service.clone()),
				Some(keys) if keys.binary_search_by(|k| k.as_str().cmp(key)).is_ok() => declaring.push(service.clone()),
				_ => {}
			}
		}

		if declaring.is_empty() { Resolution::from_survivors(agnostic) } else { Resolution::Narrowed(declaring) }
	}
}
