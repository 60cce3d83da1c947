//! Stratum node binary.
//!
//! Boots an in-process cluster from a configuration file and drives module refreshes and
//! tenant lifecycle transitions through it.

mod cli;
mod demo;
#[cfg(test)]
mod tests;

use clap::Parser;
use cli::{Cli, Command};
use stratum_modules::TenantId;
use stratum_runtime::RuntimeConfig;
use tracing::{error, info};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
	let cli = Cli::parse();

	let subscriber = tracing_subscriber::fmt()
		.with_max_level(if cli.verbose { tracing::Level::DEBUG } else { tracing::Level::INFO })
		.finish();
	tracing::subscriber::set_global_default(subscriber)?;

	let config = match &cli.config {
		Some(path) => RuntimeConfig::load(path)?,
		None => RuntimeConfig::default(),
	};
	info!(node = %config.node_id(), "starting stratum");

	let outcome = match cli.command {
		Command::Refresh { nodes, tenant, process, dir } => demo::refresh(&config, nodes, TenantId(tenant), process, &dir).await,
		Command::Lifecycle { nodes, tenant } => demo::lifecycle(&config, nodes, TenantId(tenant)).await,
	};
	if let Err(error) = &outcome {
		error!(%error, "command failed");
	}
	outcome
}
