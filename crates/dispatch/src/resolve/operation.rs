use crate::request::InboundRequest;
use crate::service::ServiceDefinition;

/// Result of the strict SOAP operation check on a resolved service.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OperationCheck {
	Passed,
	/// The service is strict SOAP but the request is not a SOAP message.
	NotSoap,
	/// The request's operation is not declared by the service.
	OperationMismatch,
}

/// Applies the strict post-resolution check for SOAP services.
///
/// Non-SOAP services and services marked lax always pass. A strict service
/// with no declared operations accepts any SOAP request.
pub fn check_operation(service: &ServiceDefinition, request: &InboundRequest) -> OperationCheck {
	if !service.soap || service.lax_resolution {
		return OperationCheck::Passed;
	}
	if !request.is_soap {
		return OperationCheck::NotSoap;
	}
	if service.operations.is_empty() {
		return OperationCheck::Passed;
	}
	match request.operation.as_deref() {
		Some(op) if service.operations.iter().any(|declared| declared == op) => OperationCheck::Passed,
		_ => OperationCheck::OperationMismatch,
	}
}
