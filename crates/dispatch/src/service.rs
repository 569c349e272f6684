//! Deployed service definitions and their cache status.

use serde::{Deserialize, Serialize};

/// Stable identifier of a deployed service.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ServiceId(pub u64);

impl std::fmt::Display for ServiceId {
	fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
		write!(f, "#{}", self.0)
	}
}

impl From<u64> for ServiceId {
	fn from(id: u64) -> Self {
		Self(id)
	}
}

/// A deployed service as owned by the persistent store.
///
/// The cache holds immutable `Arc` copies; redeploying replaces the whole
/// definition and bumps `version`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ServiceDefinition {
	pub id: ServiceId,
	pub version: u64,
	pub name: String,
	/// Routing key: an exact path, a `/prefix/*` pattern, or the catch-all sentinel.
	#[serde(default)]
	pub routing_uri: Option<String>,
	#[serde(default = "default_enabled")]
	pub enabled: bool,
	/// Declarative policy text, opaque to the dispatch core.
	#[serde(default)]
	pub policy: String,
	#[serde(default)]
	pub required_features: Vec<String>,
	#[serde(default)]
	pub soap: bool,
	/// Skip the strict SOAP operation check for this service.
	#[serde(default)]
	pub lax_resolution: bool,
	#[serde(default)]
	pub soap_actions: Vec<String>,
	/// Payload namespaces (URNs) the service accepts.
	#[serde(default)]
	pub namespaces: Vec<String>,
	/// Operation names declared by the service contract.
	#[serde(default)]
	pub operations: Vec<String>,
}

fn default_enabled() -> bool {
	true
}

impl ServiceDefinition {
	/// Creates an enabled, non-SOAP definition with an empty policy.
	pub fn new(id: u64, version: u64, name: impl Into<String>) -> Self {
		Self {
			id: ServiceId(id),
			version,
			name: name.into(),
			routing_uri: None,
			enabled: true,
			policy: String::new(),
			required_features: Vec::new(),
			soap: false,
			lax_resolution: false,
			soap_actions: Vec::new(),
			namespaces: Vec::new(),
			operations: Vec::new(),
		}
	}

	#[must_use]
	pub fn routed(mut self, uri: impl Into<String>) -> Self {
		self.routing_uri = Some(uri.into());
		self
	}

	#[must_use]
	pub fn with_policy(mut self, policy: impl Into<String>) -> Self {
		self.policy = policy.into();
		self
	}

	#[must_use]
	pub fn requiring(mut self, feature: impl Into<String>) -> Self {
		self.required_features.push(feature.into());
		self
	}

	#[must_use]
	pub fn disabled(mut self) -> Self {
		self.enabled = false;
		self
	}

	/// Marks the service as SOAP with the given actions, namespaces and operations.
	#[must_use]
	pub fn soap_contract<A, N, O>(mut self, actions: A, namespaces: N, operations: O) -> Self
	where
		A: IntoIterator,
		A::Item: Into<String>,
		N: IntoIterator,
		N::Item: Into<String>,
		O: IntoIterator,
		O::Item: Into<String>,
	{
		self.soap = true;
		self.soap_actions = actions.into_iter().map(Into::into).collect();
		self.namespaces = namespaces.into_iter().map(Into::into).collect();
		self.operations = operations.into_iter().map(Into::into).collect();
		self
	}

	#[must_use]
	pub fn lax(mut self) -> Self {
		self.lax_resolution = true;
		self
	}

	/// Returns a copy at `version`, as a redeploy would produce.
	#[must_use]
	pub fn redeployed(&self, version: u64) -> Self {
		Self { version, ..self.clone() }
	}

	/// Human-readable label used in logs.
	pub fn display_name(&self) -> String {
		format!("{} [{}]", self.name, self.id)
	}
}

/// Why a cached service is excluded from resolution.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum DisableReason {
	/// The definition itself is marked disabled.
	Administrative,
	/// The policy failed to compile for a structural reason.
	InvalidPolicy,
}

/// Runtime status of one cached service.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case", tag = "state", content = "reason")]
pub enum ServiceStatus {
	Enabled,
	/// Resolvable, but every invocation fails with a licensing error.
	Unlicensed,
	Disabled(DisableReason),
}

impl ServiceStatus {
	/// Whether resolution may return a service in this status.
	pub const fn is_resolvable(self) -> bool {
		matches!(self, Self::Enabled | Self::Unlicensed)
	}
}
