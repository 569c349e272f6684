use crate::service::ServiceId;

/// The parts of an inbound message that select a resolution key.
///
/// Every field is optional; a resolver whose axis is absent from the request
/// does not apply to it.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct InboundRequest {
	/// Request path, without scheme, authority or query.
	pub path: Option<String>,
	/// Raw `SOAPAction` header value, quotes included if the client sent them.
	pub soap_action: Option<String>,
	/// Namespace URI of the first payload element.
	pub payload_namespace: Option<String>,
	/// Operation name taken from the payload.
	pub operation: Option<String>,
	/// Explicit service selection carried by the original URL.
	pub service_hint: Option<ServiceId>,
	/// Whether the message parsed as a SOAP envelope.
	pub is_soap: bool,
}

impl InboundRequest {
	/// A plain request routed by path only.
	pub fn to_path(path: impl Into<String>) -> Self {
		Self {
			path: Some(strip_query(path.into())),
			..Self::default()
		}
	}

	#[must_use]
	pub fn soap(mut self, action: Option<&str>, namespace: Option<&str>, operation: Option<&str>) -> Self {
		self.is_soap = true;
		self.soap_action = action.map(str::to_string);
		self.payload_namespace = namespace.map(str::to_string);
		self.operation = operation.map(str::to_string);
		self
	}

	#[must_use]
	pub fn hinted(mut self, service: ServiceId) -> Self {
		self.service_hint = Some(service);
		self
	}
}

fn strip_query(mut path: String) -> String {
	if let Some(idx) = path.find(['?', '#']) {
		path.truncate(idx);
	}
	path
}
