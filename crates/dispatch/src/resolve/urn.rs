use std::sync::Arc;

use super::declared::DeclaredKeys;
use super::{Resolution, ServiceResolver};
use crate::error::ResolverError;
use crate::request::InboundRequest;
use crate::service::{ServiceDefinition, ServiceId};

const NAME: &str = "urn";

/// Narrows by the namespace URI of the first payload element.
#[derive(Debug, Default)]
pub struct UrnResolver {
	index: DeclaredKeys,
}

impl ServiceResolver for UrnResolver {
	fn name(&self) -> &'static str {
		NAME
	}

	fn uses_message_content(&self) -> bool {
		true
	}

	fn resolve(&self, candidates: &[Arc<ServiceDefinition>], request: &InboundRequest) -> Resolution {
		match request.payload_namespace.as_deref().map(str::trim) {
			Some(namespace) if !namespace.is_empty() => self.index.narrow(candidates, namespace),
			_ => Resolution::NotApplicable,
		}
	}

	fn service_created(&self, service: &ServiceDefinition) -> Result<(), ResolverError> {
		self.index.insert(NAME, service, &service.namespaces, str::trim)
	}

	fn service_deleted(&self, id: ServiceId) {
		self.index.remove(id);
	}
}
