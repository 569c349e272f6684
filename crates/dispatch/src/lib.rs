//! Dispatch core of the gateway.
//!
//! Holds the deployed services, resolves each inbound request to exactly one
//! of them, and lends out the precompiled policy that processes it.
//!
//! - [`ServiceCache`]: authoritative map of services and compiled policies.
//! - [`ResolutionEngine`] and the resolvers in [`resolve`]: request to service.
//! - [`PolicyHandle`]: reference-counted borrow of a compiled policy.
//! - [`Reconciler`]: periodic repair of drift against the [`ServiceStore`].
//! - [`DispatchRuntime`]: background wiring for all of the above.

pub mod cache;
pub mod config;
pub mod diagnostics;
pub mod engine;
pub mod error;
pub mod events;
pub mod policy;
pub mod reconcile;
pub mod request;
pub mod resolve;
pub mod runtime;
pub mod service;
pub mod stats;
pub mod store;

pub use cache::{BatchOutcome, ServiceCache, ServiceCacheBuilder};
pub use config::DispatchConfig;
pub use diagnostics::{CacheDiagnostics, ServiceReport};
pub use engine::{ResolutionEngine, ResolutionListener, Resolved};
pub use error::{CompileError, ConfigError, Error, InvocationError, ResolverError, Result, StoreError};
pub use events::{CacheEvent, ChangeKind, EventBus, GatewayEvent, ReloadReason, ServiceChange};
pub use policy::{CompiledPolicy, PolicyCompiler, PolicyHandle, UnlicensedPolicy};
pub use reconcile::{CycleOutcome, ReconcilePlan, ReconcileReport, Reconciler};
pub use request::InboundRequest;
pub use resolve::{Resolution, ServiceResolver};
pub use runtime::DispatchRuntime;
pub use service::{DisableReason, ServiceDefinition, ServiceId, ServiceStatus};
pub use stats::{ServiceStatistics, StatisticsSnapshot};
pub use store::{MemoryStore, ServiceDecorator, ServiceStore, VersionMap};
