//! Shared fixtures for dispatch integration tests.

#![allow(dead_code)]

use std::collections::HashSet;
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};

use parking_lot::Mutex;
use portcullis_dispatch::{
	CompileError, CompiledPolicy, DispatchConfig, InboundRequest, InvocationError, MemoryStore, PolicyCompiler, ServiceCache, ServiceDefinition,
};

/// Compiles every policy, failing with a licensing error for any required
/// feature not yet granted. Policy text `broken` is a structural failure.
#[derive(Default)]
pub struct GatedCompiler {
	licensed: Mutex<HashSet<String>>,
	pub teardowns: Arc<AtomicUsize>,
}

impl GatedCompiler {
	pub fn grant(&self, feature: &str) {
		self.licensed.lock().insert(feature.to_string());
	}

	pub fn teardowns(&self) -> usize {
		self.teardowns.load(Ordering::SeqCst)
	}
}

struct Passthrough {
	teardowns: Arc<AtomicUsize>,
}

impl CompiledPolicy for Passthrough {
	fn invoke(&self, _request: &InboundRequest) -> Result<(), InvocationError> {
		Ok(())
	}

	fn close(&self) {
		self.teardowns.fetch_add(1, Ordering::SeqCst);
	}
}

impl PolicyCompiler for GatedCompiler {
	fn compile(&self, definition: &ServiceDefinition) -> Result<Box<dyn CompiledPolicy>, CompileError> {
		if definition.policy == "broken" {
			return Err(CompileError::Structural {
				service: definition.id,
				reason: "unsupported assertion".to_string(),
			});
		}
		let licensed = self.licensed.lock();
		if let Some(missing) = definition.required_features.iter().find(|feature| !licensed.contains(*feature)) {
			return Err(CompileError::Licensing {
				service: definition.id,
				feature: missing.clone(),
			});
		}
		Ok(Box::new(Passthrough {
			teardowns: self.teardowns.clone(),
		}))
	}
}

pub struct Harness {
	pub cache: Arc<ServiceCache>,
	pub compiler: Arc<GatedCompiler>,
	pub store: Arc<MemoryStore>,
}

pub fn harness() -> Harness {
	harness_with(DispatchConfig::default())
}

pub fn harness_with(config: DispatchConfig) -> Harness {
	let compiler = Arc::new(GatedCompiler::default());
	let store = Arc::new(MemoryStore::new());
	let cache = ServiceCache::builder(compiler.clone(), store.clone())
		.config(config)
		.build()
		.expect("cache builds");
	Harness {
		cache: Arc::new(cache),
		compiler,
		store,
	}
}

pub fn to(path: &str) -> InboundRequest {
	InboundRequest::to_path(path)
}
