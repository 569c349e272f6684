//! Portcullis dispatch daemon.
//!
//! Loads services from a TOML manifest, keeps them reconciled in the
//! dispatch cache, and answers line commands on stdin:
//! - `resolve` / `invoke` a request path
//! - `license`, `module-load`, `module-unload` gateway events
//! - `status`, `service`, `reconcile` for inspection

mod command;
mod manifest;

use std::path::{Path, PathBuf};
use std::sync::Arc;

use anyhow::Context;
use clap::Parser;
use command::Command;
use manifest::{ManifestCompiler, ManifestStore};
use portcullis_dispatch::{DispatchConfig, DispatchRuntime, GatewayEvent, InboundRequest, Resolved, ServiceCache, ServiceId};
use serde_json::json;
use tokio::io::{AsyncBufRead, AsyncBufReadExt, BufReader};
use tokio::sync::broadcast;
use tracing::info;

/// Daemon command line arguments.
#[derive(Parser, Debug)]
#[command(name = "portcullis-dispatchd")]
#[command(about = "Resolve gateway requests against a manifest of deployed services")]
struct Args {
	/// Service manifest (TOML)
	#[arg(short, long, value_name = "PATH")]
	manifest: PathBuf,

	/// Dispatch configuration (TOML)
	#[arg(short, long, value_name = "PATH")]
	config: Option<PathBuf>,

	/// Verbose logging
	#[arg(short, long)]
	verbose: bool,
}

/// Everything a command needs to act on.
struct Daemon {
	runtime: DispatchRuntime,
	compiler: Arc<ManifestCompiler>,
	store: Arc<ManifestStore>,
	gateway: broadcast::Sender<GatewayEvent>,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
	let args = Args::parse();

	let subscriber = tracing_subscriber::fmt()
		.with_writer(std::io::stderr)
		.with_max_level(if args.verbose {
			tracing::Level::DEBUG
		} else {
			tracing::Level::INFO
		})
		.finish();
	tracing::subscriber::set_global_default(subscriber)?;

	let config = match &args.config {
		Some(path) => DispatchConfig::load(path)?,
		None => DispatchConfig::default(),
	};
	info!(manifest = %args.manifest.display(), "Starting portcullis-dispatchd");

	let daemon = Daemon::start(&args.manifest, config).await?;
	daemon.serve(BufReader::new(tokio::io::stdin())).await?;
	daemon.runtime.shutdown().await;
	Ok(())
}

impl Daemon {
	/// Loads the manifest, builds the cache and starts its background tasks.
	async fn start(manifest: &Path, config: DispatchConfig) -> anyhow::Result<Self> {
		let store = Arc::new(ManifestStore::new(manifest));
		let initial = store.load().with_context(|| format!("loading {}", manifest.display()))?;
		let compiler = Arc::new(ManifestCompiler::new(initial.licensed_features, initial.modules));

		let cache = ServiceCache::builder(compiler.clone(), store.clone())
			.config(config.clone())
			.build()
			.context("building service cache")?;
		let mut runtime = DispatchRuntime::start(Arc::new(cache)).await;

		let (gateway, events) = broadcast::channel(config.event_buffer);
		runtime.listen(events);

		Ok(Self {
			runtime,
			compiler,
			store,
			gateway,
		})
	}

	/// Executes commands until `quit` or end of input.
	///
	/// A failing command is reported and the loop continues; only input errors end it.
	async fn serve<R: AsyncBufRead + Unpin>(&self, input: R) -> std::io::Result<()> {
		let mut lines = input.lines();
		while let Some(line) = lines.next_line().await? {
			if line.trim().is_empty() {
				continue;
			}
			match line.parse::<Command>() {
				Ok(Command::Quit) => break,
				Ok(command) => {
					if let Err(err) = self.execute(command).await {
						tracing::warn!(error = %err, "dispatchd.command_failed");
						println!("error: {err:#}");
					}
				}
				Err(err) => println!("error: {err}"),
			}
		}
		Ok(())
	}

	async fn execute(&self, command: Command) -> anyhow::Result<()> {
		let cache = self.runtime.cache();
		match command {
			Command::Resolve(request) => match cache.resolve_detailed(&request, None) {
				Resolved::Found(service) => println!("{} v{}", service.display_name(), service.version),
				miss => println!("no service: {miss:?}"),
			},
			Command::Invoke(request) => self.invoke(&request),
			Command::Service(id) => self.describe(id)?,
			Command::License => {
				let manifest = self.store.load()?;
				self.compiler.set_licensed(manifest.licensed_features);
				self.publish(GatewayEvent::LicenseChanged);
			}
			Command::ModuleLoad(module) => {
				if self.compiler.load_module(&module) {
					self.publish(GatewayEvent::ModuleLoaded { module });
				} else {
					println!("module `{module}` already loaded");
				}
			}
			Command::ModuleUnload(module) => {
				if self.compiler.unload_module(&module) {
					self.publish(GatewayEvent::ModuleUnloaded { module });
				} else {
					println!("module `{module}` not loaded");
				}
			}
			Command::Reconcile => {
				let reconciler = self.runtime.reconciler().clone();
				let outcome = tokio::task::spawn_blocking(move || reconciler.run_once()).await?;
				println!("{outcome:?}");
			}
			Command::Status => {
				println!("{}", serde_json::to_string_pretty(&cache.diagnostics())?);
				for task in self.runtime.tasks() {
					println!("task {} runs={} skipped={} last_failure={:?}", task.name, task.runs, task.skipped, task.last_failure);
				}
			}
			Command::Quit => {}
		}
		Ok(())
	}

	/// Resolves and runs the borrowed policy, counting the attempt against the service.
	fn invoke(&self, request: &InboundRequest) {
		let cache = self.runtime.cache();
		let Some((service, policy)) = cache.resolve_policy(request) else {
			println!("no service");
			return;
		};
		let stats = cache.statistics(service.id);
		if let Some(stats) = &stats {
			stats.record_attempt();
		}
		match policy.invoke(request) {
			Ok(()) => {
				if let Some(stats) = &stats {
					stats.record_authorized();
					stats.record_completed();
				}
				println!("{} v{}: ok", service.display_name(), policy.version());
			}
			Err(err) => println!("{} v{}: {err}", service.display_name(), policy.version()),
		}
	}

	fn describe(&self, id: ServiceId) -> anyhow::Result<()> {
		let cache = self.runtime.cache();
		let Some(definition) = cache.lookup(id) else {
			println!("service {id} is not cached");
			return Ok(());
		};
		let report = json!({
			"definition": &*definition,
			"status": cache.status(id),
			"statistics": cache.statistics(id).map(|stats| stats.snapshot(id)),
			"known_bad_version": cache.known_bad_version(id),
		});
		println!("{}", serde_json::to_string_pretty(&report)?);
		Ok(())
	}

	fn publish(&self, event: GatewayEvent) {
		if let Err(err) = self.gateway.send(event) {
			tracing::warn!(error = %err, "dispatchd.event_dropped");
		}
	}
}
