//! Error families of the dispatch core.
//!
//! Only [`InvocationError`] reaches request-processing code. The others are
//! absorbed by the cache and surface through logs and diagnostics.

use std::path::PathBuf;

use crate::service::ServiceId;

/// Failure to turn a service's declarative policy into an executable artifact.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum CompileError {
	/// The policy tree is unreadable or uses an unsupported construct.
	#[error("policy for service {service} cannot be compiled: {reason}")]
	Structural { service: ServiceId, reason: String },
	/// A feature the policy depends on is not licensed.
	#[error("feature `{feature}` required by service {service} is not licensed")]
	Licensing { service: ServiceId, feature: String },
}

/// Failure reported by one invocation of a compiled policy.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum InvocationError {
	/// The policy was replaced by a fail-fast stand-in because a feature is unlicensed.
	#[error("assertion not available: {0}")]
	Unlicensed(String),
	/// The policy ran and rejected the message.
	#[error("policy evaluation failed: {0}")]
	Failed(String),
}

/// Failure talking to the persistent service store.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum StoreError {
	#[error("service store unavailable: {0}")]
	Unavailable(String),
	#[error("corrupt record for service {service}: {reason}")]
	Corrupt { service: ServiceId, reason: String },
}

/// A resolver could not index a service's resolution key.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ResolverError {
	#[error("service {service} has invalid {resolver} key `{key}`: {reason}")]
	InvalidKey {
		resolver: &'static str,
		service: ServiceId,
		key: String,
		reason: &'static str,
	},
}

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
	#[error("failed to read config {}: {source}", path.display())]
	Read {
		path: PathBuf,
		#[source]
		source: std::io::Error,
	},
	#[error("invalid config: {0}")]
	Parse(#[from] toml::de::Error),
}

/// Errors from constructing or starting the dispatch core.
#[derive(Debug, thiserror::Error)]
pub enum Error {
	#[error("failed to start background thread: {0}")]
	Spawn(#[from] std::io::Error),
	#[error(transparent)]
	Config(#[from] ConfigError),
	#[error(transparent)]
	Store(#[from] StoreError),
}

pub type Result<T, E = Error> = std::result::Result<T, E>;
