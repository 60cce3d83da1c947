use std::path::PathBuf;

use clap::{Parser, Subcommand};

#[derive(Parser, Debug)]
#[command(name = "stratum", version)]
#[command(about = "Drive module refreshes and tenant lifecycles on an in-process cluster")]
pub struct Cli {
	/// TOML configuration file
	#[arg(short, long, value_name = "PATH", global = true)]
	pub config: Option<PathBuf>,

	/// Verbose logging
	#[arg(short, long, global = true)]
	pub verbose: bool,

	#[command(subcommand)]
	pub command: Command,
}

#[derive(Subcommand, Debug, PartialEq, Eq)]
pub enum Command {
	/// Push the files of a directory into one scope and replay it on every node
	Refresh {
		/// Number of nodes in the cluster
		#[arg(long, default_value_t = 3)]
		nodes: u64,

		/// Tenant owning the scope
		#[arg(long, default_value_t = 1)]
		tenant: i64,

		/// Process scope to refresh; the tenant scope when omitted
		#[arg(long)]
		process: Option<i64>,

		/// Directory whose files become the scope's resources
		dir: PathBuf,
	},

	/// Pause then resume a tenant across the cluster
	Lifecycle {
		#[arg(long, default_value_t = 3)]
		nodes: u64,

		#[arg(long, default_value_t = 1)]
		tenant: i64,
	},
}
