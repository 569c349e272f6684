//! TOML manifest acting as the persistent service store, and the small
//! assertion-chain compiler the daemon uses for policies.
//!
//! A manifest looks like:
//!
//! ```toml
//! licensed_features = ["xml-signature"]
//! modules = ["xslt"]
//!
//! [[service]]
//! id = 1
//! version = 3
//! name = "quotes"
//! routing_uri = "/quotes"
//! policy = "audit, xslt.transform, allow"
//! required_features = ["xml-signature"]
//! ```

use std::collections::HashSet;
use std::path::{Path, PathBuf};

use parking_lot::RwLock;
use portcullis_dispatch::{
	CompileError, CompiledPolicy, InboundRequest, InvocationError, PolicyCompiler, ServiceDefinition, ServiceId, ServiceStore, StoreError, VersionMap,
};
use serde::Deserialize;

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct Manifest {
	#[serde(default)]
	pub licensed_features: Vec<String>,
	#[serde(default)]
	pub modules: Vec<String>,
	#[serde(default, rename = "service")]
	pub services: Vec<ServiceDefinition>,
}

#[derive(Debug, thiserror::Error)]
pub enum ManifestError {
	#[error("failed to read manifest {}: {source}", path.display())]
	Read {
		path: PathBuf,
		#[source]
		source: std::io::Error,
	},
	#[error("invalid manifest {}: {source}", path.display())]
	Parse {
		path: PathBuf,
		#[source]
		source: toml::de::Error,
	},
}

impl Manifest {
	pub fn read(path: &Path) -> Result<Self, ManifestError> {
		let text = std::fs::read_to_string(path).map_err(|source| ManifestError::Read {
			path: path.to_path_buf(),
			source,
		})?;
		toml::from_str(&text).map_err(|source| ManifestError::Parse {
			path: path.to_path_buf(),
			source,
		})
	}
}

/// [`ServiceStore`] that re-reads the manifest on every query, so edits are
/// picked up by the next reconciliation cycle.
#[derive(Debug, Clone)]
pub struct ManifestStore {
	path: PathBuf,
}

impl ManifestStore {
	pub fn new(path: impl Into<PathBuf>) -> Self {
		Self { path: path.into() }
	}

	pub fn load(&self) -> Result<Manifest, StoreError> {
		Manifest::read(&self.path).map_err(|err| StoreError::Unavailable(err.to_string()))
	}
}

impl ServiceStore for ManifestStore {
	/// Fails on the first id declared more than once, like [`Self::find_by_id`].
	fn find_all(&self) -> Result<Vec<ServiceDefinition>, StoreError> {
		let mut services = self.load()?.services;
		services.sort_by_key(|service| service.id);
		if let Some(pair) = services.windows(2).find(|pair| pair[0].id == pair[1].id) {
			let id = pair[0].id;
			return Err(duplicate(id, services.iter().filter(|service| service.id == id).count()));
		}
		Ok(services)
	}

	/// An id declared more than once is reported as corrupt.
	fn find_by_id(&self, id: ServiceId) -> Result<Option<ServiceDefinition>, StoreError> {
		let mut matches: Vec<_> = self.load()?.services.into_iter().filter(|service| service.id == id).collect();
		if matches.len() > 1 {
			return Err(duplicate(id, matches.len()));
		}
		Ok(matches.pop())
	}

	fn find_version_map(&self) -> Result<VersionMap, StoreError> {
		Ok(self.load()?.services.iter().map(|service| (service.id, service.version)).collect())
	}
}

fn duplicate(service: ServiceId, count: usize) -> StoreError {
	StoreError::Corrupt {
		service,
		reason: format!("declared {count} times"),
	}
}

#[derive(Debug, Clone, PartialEq, Eq)]
enum Assertion {
	Allow,
	Deny,
	Audit,
	RequireSoap,
	/// Assertion provided by an extension module, written `module.name`.
	Module { module: String, name: String },
}

fn parse_policy(policy: &str) -> Result<Vec<Assertion>, String> {
	policy
		.split(',')
		.map(str::trim)
		.filter(|step| !step.is_empty())
		.map(|step| match step {
			"allow" => Ok(Assertion::Allow),
			"deny" => Ok(Assertion::Deny),
			"audit" => Ok(Assertion::Audit),
			"require-soap" => Ok(Assertion::RequireSoap),
			other => match other.split_once('.') {
				Some((module, name)) if !module.is_empty() && !name.is_empty() => Ok(Assertion::Module {
					module: module.to_string(),
					name: name.to_string(),
				}),
				_ => Err(format!("unknown assertion `{other}`")),
			},
		})
		.collect()
}

/// Executes a parsed assertion chain in order; the first failing step wins.
#[derive(Debug)]
struct AssertionChain {
	service: String,
	steps: Vec<Assertion>,
}

impl CompiledPolicy for AssertionChain {
	fn invoke(&self, request: &InboundRequest) -> Result<(), InvocationError> {
		for step in &self.steps {
			match step {
				Assertion::Allow => return Ok(()),
				Assertion::Deny => return Err(InvocationError::Failed(format!("{} denies the request", self.service))),
				Assertion::Audit => tracing::info!(service = %self.service, path = ?request.path, "policy.audit"),
				Assertion::RequireSoap if !request.is_soap => return Err(InvocationError::Failed("message is not SOAP".to_string())),
				Assertion::RequireSoap => {}
				Assertion::Module { module, name } => tracing::trace!(service = %self.service, module, assertion = name, "policy.module_step"),
			}
		}
		Ok(())
	}

	fn close(&self) {
		tracing::debug!(service = %self.service, steps = self.steps.len(), "policy.closed");
	}
}

/// Compiles assertion chains against the current license and module set.
#[derive(Debug, Default)]
pub struct ManifestCompiler {
	licensed: RwLock<HashSet<String>>,
	modules: RwLock<HashSet<String>>,
}

impl ManifestCompiler {
	pub fn new(licensed: impl IntoIterator<Item = String>, modules: impl IntoIterator<Item = String>) -> Self {
		Self {
			licensed: RwLock::new(licensed.into_iter().collect()),
			modules: RwLock::new(modules.into_iter().collect()),
		}
	}

	/// Replaces the licensed feature set.
	pub fn set_licensed(&self, features: impl IntoIterator<Item = String>) {
		*self.licensed.write() = features.into_iter().collect();
	}

	/// Returns `false` if the module was already loaded.
	pub fn load_module(&self, module: &str) -> bool {
		self.modules.write().insert(module.to_string())
	}

	/// Returns `false` if the module was not loaded.
	pub fn unload_module(&self, module: &str) -> bool {
		self.modules.write().remove(module)
	}
}

impl PolicyCompiler for ManifestCompiler {
	fn compile(&self, definition: &ServiceDefinition) -> Result<Box<dyn CompiledPolicy>, CompileError> {
		let structural = |reason: String| CompileError::Structural {
			service: definition.id,
			reason,
		};

		let steps = parse_policy(&definition.policy).map_err(structural)?;
		{
			let modules = self.modules.read();
			if let Some((module, name)) = steps.iter().find_map(|step| match step {
				Assertion::Module { module, name } if !modules.contains(module) => Some((module, name)),
				_ => None,
			}) {
				return Err(structural(format!("assertion `{module}.{name}` needs module `{module}`")));
			}
		}

		let licensed = self.licensed.read();
		if let Some(feature) = definition.required_features.iter().find(|feature| !licensed.contains(*feature)) {
			return Err(CompileError::Licensing {
				service: definition.id,
				feature: feature.clone(),
			});
		}

		Ok(Box::new(AssertionChain {
			service: definition.name.clone(),
			steps,
		}))
	}
}
