/// Execution classes used for gateway task scheduling and log correlation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum TaskClass {
	/// Work on the request path. Must never wait on store I/O.
	Request,
	/// Periodic maintenance such as cache reconciliation.
	Maintenance,
	/// Blocking calls into the persistent store.
	IoBlocking,
	/// Teardown of retired compiled artifacts.
	Disposal,
}

impl TaskClass {
	/// Stable label used in log fields.
	pub const fn as_str(self) -> &'static str {
		match self {
			Self::Request => "request",
			Self::Maintenance => "maintenance",
			Self::IoBlocking => "io_blocking",
			Self::Disposal => "disposal",
		}
	}
}

impl std::fmt::Display for TaskClass {
	fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
		f.write_str(self.as_str())
	}
}
