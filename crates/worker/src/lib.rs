//! Background task primitives shared by the gateway dispatch core.
//!
//! - [`spawn`], [`spawn_blocking`], [`spawn_named_thread`]: classified spawn helpers.
//! - [`ShutdownScope`] / [`TaskToken`]: cancellation for long-lived tasks.
//! - [`spawn_periodic`]: fixed-period schedules that skip ticks while busy.
//! - [`DisposalQueue`]: deferred teardown off request and lock-holding threads.
//! - [`TaskRegistry`]: status snapshots for health reporting.

mod class;
mod disposal;
mod periodic;
mod registry;
mod spawn;
mod token;

pub use class::TaskClass;
pub use disposal::DisposalQueue;
pub use periodic::{BusyGate, BusyGuard, PeriodicSpec, PeriodicTask, spawn_periodic};
pub use registry::{TaskRecord, TaskRegistry};
pub use spawn::{join_error_panic_message, spawn, spawn_blocking, spawn_named_thread};
pub use token::{ShutdownScope, TaskToken};
