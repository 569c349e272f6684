//! Compiled policies and the reference-counted handles that lend them out.
//!
//! The cache owns one [`PolicySlot`] per compiled version behind an `Arc`;
//! every [`PolicyHandle`] is another strong reference. A replaced slot stays
//! invocable until its last handle is released, and its teardown is then
//! queued on the [`DisposalQueue`] instead of running on the releasing thread.

use std::sync::Arc;

use portcullis_worker::DisposalQueue;

use crate::error::{CompileError, InvocationError};
use crate::request::InboundRequest;
use crate::service::{ServiceDefinition, ServiceId};

/// Executable form of a service policy.
pub trait CompiledPolicy: Send + Sync + 'static {
	/// Runs the policy against one message.
	fn invoke(&self, request: &InboundRequest) -> Result<(), InvocationError>;

	/// Releases resources held by the artifact. Called once, on the disposal thread.
	fn close(&self) {}
}

/// Turns declarative policy text into a [`CompiledPolicy`].
pub trait PolicyCompiler: Send + Sync + 'static {
	fn compile(&self, definition: &ServiceDefinition) -> Result<Box<dyn CompiledPolicy>, CompileError>;
}

/// Fail-fast stand-in installed when a required feature is unlicensed.
#[derive(Debug, Clone)]
pub struct UnlicensedPolicy {
	cause: String,
}

impl UnlicensedPolicy {
	pub fn new(cause: &CompileError) -> Self {
		let cause = match cause {
			CompileError::Licensing { feature, .. } => feature.clone(),
			other => other.to_string(),
		};
		Self { cause }
	}

	pub fn cause(&self) -> &str {
		&self.cause
	}
}

impl CompiledPolicy for UnlicensedPolicy {
	fn invoke(&self, _request: &InboundRequest) -> Result<(), InvocationError> {
		Err(InvocationError::Unlicensed(self.cause.clone()))
	}
}

/// One compiled version of a service policy.
///
/// Dropping the last `Arc` hands the artifact to the disposal queue.
pub(crate) struct PolicySlot {
	service: ServiceId,
	version: u64,
	stand_in: bool,
	policy: Option<Box<dyn CompiledPolicy>>,
	reaper: DisposalQueue,
}

impl PolicySlot {
	pub(crate) fn new(service: ServiceId, version: u64, policy: Box<dyn CompiledPolicy>, reaper: DisposalQueue) -> Arc<Self> {
		Arc::new(Self {
			service,
			version,
			stand_in: false,
			policy: Some(policy),
			reaper,
		})
	}

	pub(crate) fn unlicensed(service: ServiceId, version: u64, cause: &CompileError, reaper: DisposalQueue) -> Arc<Self> {
		Arc::new(Self {
			service,
			version,
			stand_in: true,
			policy: Some(Box::new(UnlicensedPolicy::new(cause))),
			reaper,
		})
	}
}

impl std::fmt::Debug for PolicySlot {
	fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
		f.debug_struct("PolicySlot")
			.field("service", &self.service)
			.field("version", &self.version)
			.field("stand_in", &self.stand_in)
			.finish_non_exhaustive()
	}
}

impl Drop for PolicySlot {
	fn drop(&mut self) {
		let Some(policy) = self.policy.take() else {
			return;
		};
		tracing::debug!(service_id = %self.service, version = self.version, "policy.retired");
		self.reaper.dispose(format!("policy {} v{}", self.service, self.version), move || {
			policy.close();
			drop(policy);
		});
	}
}

/// A borrowed reference to one compiled policy version.
///
/// Stays invocable across cache replacements. Releasing is RAII: drop the
/// handle or call [`PolicyHandle::release`].
#[derive(Debug, Clone)]
pub struct PolicyHandle {
	slot: Arc<PolicySlot>,
}

impl PolicyHandle {
	pub(crate) fn borrow(slot: &Arc<PolicySlot>) -> Self {
		Self { slot: Arc::clone(slot) }
	}

	pub fn service_id(&self) -> ServiceId {
		self.slot.service
	}

	/// Version of the definition this policy was compiled from.
	pub fn version(&self) -> u64 {
		self.slot.version
	}

	/// Whether this is the unlicensed stand-in.
	pub fn is_stand_in(&self) -> bool {
		self.slot.stand_in
	}

	pub fn invoke(&self, request: &InboundRequest) -> Result<(), InvocationError> {
		match &self.slot.policy {
			Some(policy) => policy.invoke(request),
			None => Err(InvocationError::Failed("policy already torn down".to_string())),
		}
	}

	/// Live references to this version: the cache's own (while current) plus
	/// every outstanding handle.
	pub fn references(&self) -> usize {
		Arc::strong_count(&self.slot)
	}

	/// Returns the borrow.
	pub fn release(self) {}
}
