//! Single-axis resolvers that narrow a candidate set for one request.
//!
//! Each resolver keeps a private index of the keys it resolves on. The cache
//! keeps those indexes current by calling the `service_*` hooks while it holds
//! its writer lock, so a resolver never sees an index that disagrees with the
//! candidate snapshot it is handed.

use std::sync::Arc;

use crate::error::ResolverError;
use crate::request::InboundRequest;
use crate::service::{ServiceDefinition, ServiceId};

mod declared;
mod hint;
mod operation;
mod soap_action;
mod uri;
mod urn;

pub use hint::ServiceHintResolver;
pub use operation::{OperationCheck, check_operation};
pub use soap_action::SoapActionResolver;
pub use uri::{RouteKey, UriResolver};
pub(crate) use uri::NAME as URI_RESOLVER;
pub use urn::UrnResolver;

/// Outcome of one resolver over a candidate set.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Resolution {
	/// The candidates that survive this resolver. Never empty.
	Narrowed(Vec<Arc<ServiceDefinition>>),
	/// The request carries nothing this resolver can key on.
	NotApplicable,
	/// No candidate matches; resolution stops here.
	NoMatch,
}

impl Resolution {
	/// Builds a result from surviving candidates, mapping an empty set to [`Resolution::NoMatch`].
	pub fn from_survivors(survivors: Vec<Arc<ServiceDefinition>>) -> Self {
		if survivors.is_empty() { Self::NoMatch } else { Self::Narrowed(survivors) }
	}
}

/// One axis of the resolution chain.
pub trait ServiceResolver: Send + Sync + 'static {
	/// Short name used in logs and diagnostics.
	fn name(&self) -> &'static str;

	/// Whether this resolver needs the parsed message body.
	fn uses_message_content(&self) -> bool {
		false
	}

	fn resolve(&self, candidates: &[Arc<ServiceDefinition>], request: &InboundRequest) -> Resolution;

	fn service_created(&self, _service: &ServiceDefinition) -> Result<(), ResolverError> {
		Ok(())
	}

	fn service_updated(&self, service: &ServiceDefinition) -> Result<(), ResolverError> {
		self.service_deleted(service.id);
		self.service_created(service)
	}

	fn service_deleted(&self, _id: ServiceId) {}
}

/// The standard chain, most specific axis first.
pub fn default_chain(catch_all_route: &str) -> Vec<Box<dyn ServiceResolver>> {
	vec![
		Box::new(ServiceHintResolver),
		Box::new(UriResolver::new(catch_all_route)),
		Box::new(SoapActionResolver::default()),
		Box::new(UrnResolver::default()),
	]
}

#[cfg(test)]
mod tests;
