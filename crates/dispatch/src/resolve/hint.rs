use std::sync::Arc;

use super::{Resolution, ServiceResolver};
use crate::request::InboundRequest;
use crate::service::ServiceDefinition;

/// Honors an explicit service id carried by the request's original URL.
#[derive(Debug, Default, Clone, Copy)]
pub struct ServiceHintResolver;

impl ServiceResolver for ServiceHintResolver {
	fn name(&self) -> &'static str {
		"service-hint"
	}

	fn resolve(&self, candidates: &[Arc<ServiceDefinition>], request: &InboundRequest) -> Resolution {
		let Some(hint) = request.service_hint else {
			return Resolution::NotApplicable;
		};
		Resolution::from_survivors(candidates.iter().filter(|service| service.id == hint).cloned().collect())
	}
}
