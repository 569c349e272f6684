use std::sync::Arc;

use parking_lot::RwLock;
use rustc_hash::FxHashMap;

use super::{Resolution, ServiceResolver};
use crate::error::ResolverError;
use crate::request::InboundRequest;
use crate::service::{ServiceDefinition, ServiceId};

pub(crate) const NAME: &str = "uri";

/// Parsed routing key of one service.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RouteKey {
	/// Matches one path exactly.
	Exact(String),
	/// `/foo/*`; stores `/foo/` and matches every path below it.
	Prefix(String),
	/// The configured catch-all sentinel.
	CatchAll,
	/// No routing key; the service accepts any path that nothing more specific claims.
	Unrouted,
}

impl RouteKey {
	pub fn parse(routing_uri: Option<&str>, catch_all_route: &str) -> Result<Self, &'static str> {
		let Some(uri) = routing_uri.map(str::trim).filter(|uri| !uri.is_empty()) else {
			return Ok(Self::Unrouted);
		};
		if uri == catch_all_route {
			return Ok(Self::CatchAll);
		}
		if !uri.starts_with('/') {
			return Err("routing key must start with '/'");
		}
		match uri.strip_suffix('*') {
			Some(prefix) if prefix.ends_with('/') && !prefix.contains('*') => Ok(Self::Prefix(prefix.to_string())),
			Some(_) => Err("wildcard is only allowed as a trailing '/*'"),
			None if uri.contains('*') => Err("wildcard is only allowed as a trailing '/*'"),
			None => Ok(Self::Exact(uri.to_string())),
		}
	}
}

/// Narrows by request path.
///
/// Tiers, first non-empty wins: exact key, longest matching prefix, services
/// without a routing key, catch-all.
#[derive(Debug)]
pub struct UriResolver {
	catch_all_route: String,
	keys: RwLock<FxHashMap<ServiceId, RouteKey>>,
}

impl UriResolver {
	pub fn new(catch_all_route: impl Into<String>) -> Self {
		Self {
			catch_all_route: catch_all_route.into(),
			keys: RwLock::new(FxHashMap::default()),
		}
	}

	pub fn route_key(&self, id: ServiceId) -> Option<RouteKey> {
		self.keys.read().get(&id).cloned()
	}
}

impl ServiceResolver for UriResolver {
	fn name(&self) -> &'static str {
		NAME
	}

	fn resolve(&self, candidates: &[Arc<ServiceDefinition>], request: &InboundRequest) -> Resolution {
		let Some(path) = request.path.as_deref() else {
			return Resolution::NotApplicable;
		};

		let keys = self.keys.read();
		let mut exact = Vec::new();
		let mut prefixed: Vec<(usize, &Arc<ServiceDefinition>)> = Vec::new();
		let mut unrouted = Vec::new();
		let mut catch_all = Vec::new();

		for service in candidates {
			match keys.get(&service.id) {
				Some(RouteKey::Exact(key)) if key == path => exact.push(service.clone()),
				Some(RouteKey::Prefix(prefix)) if path.starts_with(prefix.as_str()) => prefixed.push((prefix.len(), service)),
				Some(RouteKey::Unrouted) => unrouted.push(service.clone()),
				Some(RouteKey::CatchAll) => catch_all.push(service.clone()),
				_ => {}
			}
		}

		if !exact.is_empty() {
			return Resolution::Narrowed(exact);
		}
		if let Some(longest) = prefixed.iter().map(|(len, _)| *len).max() {
			return Resolution::Narrowed(prefixed.into_iter().filter(|(len, _)| *len == longest).map(|(_, s)| s.clone()).collect());
		}
		if !unrouted.is_empty() {
			return Resolution::Narrowed(unrouted);
		}
		Resolution::from_survivors(catch_all)
	}

	fn service_created(&self, service: &ServiceDefinition) -> Result<(), ResolverError> {
		let key = RouteKey::parse(service.routing_uri.as_deref(), &self.catch_all_route).map_err(|reason| ResolverError::InvalidKey {
			resolver: NAME,
			service: service.id,
			key: service.routing_uri.clone().unwrap_or_default(),
			reason,
		})?;
		self.keys.write().insert(service.id, key);
		Ok(())
	}

	fn service_deleted(&self, id: ServiceId) {
		self.keys.write().remove(&id);
	}
}
