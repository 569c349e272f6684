use std::sync::Arc;

use super::declared::DeclaredKeys;
use super::{Resolution, ServiceResolver};
use crate::error::ResolverError;
use crate::request::InboundRequest;
use crate::service::{ServiceDefinition, ServiceId};

const NAME: &str = "soap-action";

/// Narrows by the `SOAPAction` header against each service's declared actions.
#[derive(Debug, Default)]
pub struct SoapActionResolver {
	index: DeclaredKeys,
}

/// Strips surrounding whitespace and one pair of double quotes.
fn normalize(action: &str) -> &str {
	let action = action.trim();
	action.strip_prefix('"').and_then(|a| a.strip_suffix('"')).unwrap_or(action).trim()
}

impl ServiceResolver for SoapActionResolver {
	fn name(&self) -> &'static str {
		NAME
	}

	fn resolve(&self, candidates: &[Arc<ServiceDefinition>], request: &InboundRequest) -> Resolution {
		match request.soap_action.as_deref().map(normalize) {
			Some(action) if !action.is_empty() => self.index.narrow(candidates, action),
			_ => Resolution::NotApplicable,
		}
	}

	fn service_created(&self, service: &ServiceDefinition) -> Result<(), ResolverError> {
		self.index.insert(NAME, service, &service.soap_actions, normalize)
	}

	fn service_deleted(&self, id: ServiceId) {
		self.index.remove(id);
	}
}
