//! Resolution engine: runs the resolver chain over a candidate snapshot.

use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

use crate::request::InboundRequest;
use crate::resolve::{OperationCheck, Resolution, ServiceResolver, check_operation};
use crate::service::{ServiceDefinition, ServiceId};

/// Observer consulted before message content is inspected.
pub trait ResolutionListener {
	/// Called once with the surviving candidates. Returning `false` vetoes the resolution.
	fn before_content_resolution(&self, candidates: &[Arc<ServiceDefinition>]) -> bool;
}

impl<F> ResolutionListener for F
where
	F: Fn(&[Arc<ServiceDefinition>]) -> bool,
{
	fn before_content_resolution(&self, candidates: &[Arc<ServiceDefinition>]) -> bool {
		self(candidates)
	}
}

/// Detailed outcome of one resolution.
///
/// Everything except [`Resolved::Found`] looks the same to request
/// processing; the variants exist for diagnostics.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Resolved {
	Found(Arc<ServiceDefinition>),
	/// No resolvable services are cached.
	NoServices,
	/// The named resolver left no candidates.
	NoMatch { resolver: &'static str },
	/// More than one candidate survived the whole chain.
	Ambiguous { candidates: Vec<ServiceId> },
	/// A [`ResolutionListener`] rejected the request.
	Vetoed,
	NotSoap { service: ServiceId },
	OperationMismatch { service: ServiceId, operation: Option<String> },
}

impl Resolved {
	pub fn into_service(self) -> Option<Arc<ServiceDefinition>> {
		match self {
			Self::Found(service) => Some(service),
			_ => None,
		}
	}
}

/// Ordered resolver chain plus the anomaly counter for ambiguous results.
pub struct ResolutionEngine {
	resolvers: Vec<Box<dyn ServiceResolver>>,
	ambiguous: AtomicU64,
}

impl std::fmt::Debug for ResolutionEngine {
	fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
		f.debug_struct("ResolutionEngine")
			.field("resolvers", &self.resolvers.iter().map(|r| r.name()).collect::<Vec<_>>())
			.field("ambiguous", &self.ambiguous_resolutions())
			.finish()
	}
}

impl ResolutionEngine {
	pub fn new(resolvers: Vec<Box<dyn ServiceResolver>>) -> Self {
		Self {
			resolvers,
			ambiguous: AtomicU64::new(0),
		}
	}

	pub fn resolvers(&self) -> impl Iterator<Item = &dyn ServiceResolver> {
		self.resolvers.iter().map(|r| r.as_ref())
	}

	pub fn resolver(&self, name: &str) -> Option<&dyn ServiceResolver> {
		self.resolvers().find(|r| r.name() == name)
	}

	/// Ambiguous resolutions observed since construction.
	pub fn ambiguous_resolutions(&self) -> u64 {
		self.ambiguous.load(Ordering::Relaxed)
	}

	/// Narrows `candidates` to exactly one service, or explains why not.
	pub fn resolve(&self, candidates: &[Arc<ServiceDefinition>], request: &InboundRequest, listener: Option<&dyn ResolutionListener>) -> Resolved {
		if candidates.is_empty() {
			return Resolved::NoServices;
		}

		let mut survivors: Vec<Arc<ServiceDefinition>> = candidates.to_vec();
		let mut listener = listener;

		for resolver in self.resolvers() {
			if resolver.uses_message_content()
				&& let Some(pending) = listener.take()
				&& !pending.before_content_resolution(&survivors)
			{
				tracing::debug!(resolver = resolver.name(), "resolve.vetoed");
				return Resolved::Vetoed;
			}

			match resolver.resolve(&survivors, request) {
				Resolution::NotApplicable => {
					tracing::trace!(resolver = resolver.name(), "resolve.not_applicable");
				}
				Resolution::NoMatch => {
					tracing::trace!(resolver = resolver.name(), "resolve.no_match");
					return Resolved::NoMatch { resolver: resolver.name() };
				}
				Resolution::Narrowed(narrowed) if narrowed.is_empty() => {
					return Resolved::NoMatch { resolver: resolver.name() };
				}
				Resolution::Narrowed(narrowed) => {
					tracing::trace!(resolver = resolver.name(), remaining = narrowed.len(), "resolve.narrowed");
					survivors = narrowed;
					if survivors.len() == 1 {
						break;
					}
				}
			}
		}

		if survivors.len() > 1 {
			self.ambiguous.fetch_add(1, Ordering::Relaxed);
			let ids: Vec<ServiceId> = survivors.iter().map(|s| s.id).collect();
			tracing::warn!(candidates = ?ids, path = ?request.path, "resolve.ambiguous");
			return Resolved::Ambiguous { candidates: ids };
		}

		let Some(service) = survivors.pop() else {
			return Resolved::NoServices;
		};

		if let Some(pending) = listener
			&& !pending.before_content_resolution(std::slice::from_ref(&service))
		{
			tracing::debug!(service_id = %service.id, "resolve.vetoed");
			return Resolved::Vetoed;
		}

		match check_operation(&service, request) {
			OperationCheck::Passed => Resolved::Found(service),
			OperationCheck::NotSoap => {
				tracing::debug!(service_id = %service.id, "resolve.not_soap");
				Resolved::NotSoap { service: service.id }
			}
			OperationCheck::OperationMismatch => {
				tracing::debug!(service_id = %service.id, operation = ?request.operation, "resolve.operation_mismatch");
				Resolved::OperationMismatch {
					service: service.id,
					operation: request.operation.clone(),
				}
			}
		}
	}
}
