//! Line commands accepted on stdin by the daemon.

use std::str::FromStr;

use portcullis_dispatch::{InboundRequest, ServiceId};

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Command {
	/// `resolve <path> [soap-action]`: report which service a request maps to.
	Resolve(InboundRequest),
	/// `invoke <path> [soap-action]`: resolve, then run the borrowed policy.
	Invoke(InboundRequest),
	/// `service <id>`: definition, status and statistics of one service.
	Service(ServiceId),
	/// `license`: re-read licensed features from the manifest.
	License,
	ModuleLoad(String),
	ModuleUnload(String),
	/// `reconcile`: run one integrity cycle now.
	Reconcile,
	Status,
	Quit,
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum CommandError {
	#[error("empty command")]
	Empty,
	#[error("unknown command `{0}`")]
	Unknown(String),
	#[error("`{command}` expects {expected}")]
	Usage { command: &'static str, expected: &'static str },
	#[error("`{0}` is not a service id")]
	BadId(String),
}

impl FromStr for Command {
	type Err = CommandError;

	fn from_str(line: &str) -> Result<Self, Self::Err> {
		let mut words = line.split_whitespace();
		let Some(verb) = words.next() else {
			return Err(CommandError::Empty);
		};
		let args: Vec<&str> = words.collect();

		match (verb, args.as_slice()) {
			("resolve", [path, rest @ ..]) if rest.len() <= 1 => Ok(Self::Resolve(request(path, rest.first().copied()))),
			("resolve", _) => Err(usage("resolve", "<path> [soap-action]")),
			("invoke", [path, rest @ ..]) if rest.len() <= 1 => Ok(Self::Invoke(request(path, rest.first().copied()))),
			("invoke", _) => Err(usage("invoke", "<path> [soap-action]")),
			("service", [id]) => id.parse().map(|id| Self::Service(ServiceId(id))).map_err(|_| CommandError::BadId(id.to_string())),
			("service", _) => Err(usage("service", "<id>")),
			("module-load", [name]) => Ok(Self::ModuleLoad(name.to_string())),
			("module-load", _) => Err(usage("module-load", "<module>")),
			("module-unload", [name]) => Ok(Self::ModuleUnload(name.to_string())),
			("module-unload", _) => Err(usage("module-unload", "<module>")),
			("license", []) => Ok(Self::License),
			("reconcile", []) => Ok(Self::Reconcile),
			("status", []) => Ok(Self::Status),
			("quit" | "exit", []) => Ok(Self::Quit),
			("license", _) => Err(usage("license", "no arguments")),
			("reconcile", _) => Err(usage("reconcile", "no arguments")),
			("status", _) => Err(usage("status", "no arguments")),
			("quit" | "exit", _) => Err(usage("quit", "no arguments")),
			(other, _) => Err(CommandError::Unknown(other.to_string())),
		}
	}
}

fn usage(command: &'static str, expected: &'static str) -> CommandError {
	CommandError::Usage { command, expected }
}

/// A SOAP action on the command line marks the request as SOAP.
fn request(path: &str, soap_action: Option<&str>) -> InboundRequest {
	let request = InboundRequest::to_path(path);
	match soap_action {
		Some(action) => request.soap(Some(action), None, None),
		None => request,
	}
}

#[cfg(test)]
mod tests {
	use pretty_assertions::assert_eq;

	use super::*;

	#[test]
	fn parses_resolution_commands() {
		assert_eq!("resolve /quotes".parse::<Command>(), Ok(Command::Resolve(InboundRequest::to_path("/quotes"))));
		assert_eq!(
			"invoke /quotes?x=1 \"urn:getQuote\"".parse::<Command>(),
			Ok(Command::Invoke(InboundRequest::to_path("/quotes").soap(Some("\"urn:getQuote\""), None, None)))
		);
		assert_eq!("service 17".parse::<Command>(), Ok(Command::Service(ServiceId(17))));
	}

	#[test]
	fn parses_event_commands() {
		assert_eq!("  license ".parse::<Command>(), Ok(Command::License));
		assert_eq!("module-load xslt".parse::<Command>(), Ok(Command::ModuleLoad("xslt".to_string())));
		assert_eq!("module-unload xslt".parse::<Command>(), Ok(Command::ModuleUnload("xslt".to_string())));
		assert_eq!("exit".parse::<Command>(), Ok(Command::Quit));
	}

	#[test]
	fn rejects_malformed_lines() {
		assert_eq!("teleport".parse::<Command>(), Err(CommandError::Unknown("teleport".to_string())));
		assert_eq!("resolve".parse::<Command>(), Err(usage("resolve", "<path> [soap-action]")));
		assert_eq!("resolve /a b c".parse::<Command>(), Err(usage("resolve", "<path> [soap-action]")));
		assert_eq!("service abc".parse::<Command>(), Err(CommandError::BadId("abc".to_string())));
		assert_eq!("status now".parse::<Command>(), Err(usage("status", "no arguments")));
		assert_eq!("   ".parse::<Command>(), Err(CommandError::Empty));
	}
}
