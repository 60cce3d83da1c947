use std::path::PathBuf;

use clap::Parser;
use pretty_assertions::assert_eq;
use stratum_modules::TenantId;
use stratum_runtime::RuntimeConfig;

use crate::cli::{Cli, Command};
use crate::demo::{DemoCluster, read_resources};

#[test]
fn refresh_arguments_parse() {
	let cli = Cli::parse_from(["stratum", "-v", "refresh", "--nodes", "2", "--process", "7", "out"]);
	assert!(cli.verbose);
	assert_eq!(
		cli.command,
		Command::Refresh {
			nodes: 2,
			tenant: 1,
			process: Some(7),
			dir: PathBuf::from("out"),
		}
	);
}

#[test]
fn lifecycle_defaults() {
	let cli = Cli::parse_from(["stratum", "lifecycle", "--config", "node.toml"]);
	assert_eq!(cli.config, Some(PathBuf::from("node.toml")));
	assert_eq!(cli.command, Command::Lifecycle { nodes: 3, tenant: 1 });
}

#[test]
fn resources_are_named_by_relative_path() {
	let dir = tempfile::tempdir().unwrap();
	std::fs::create_dir(dir.path().join("lib")).unwrap();
	std::fs::write(dir.path().join("lib").join("app.jar"), b"PK").unwrap();
	std::fs::write(dir.path().join("process.properties"), b"a=b").unwrap();

	let stream = read_resources(dir.path()).unwrap();

	let names: Vec<&str> = stream.iter().map(|e| e.name.as_str()).collect();
	assert_eq!(names, vec!["lib/app.jar", "process.properties"]);
}

#[tokio::test]
async fn demo_cluster_boots_every_node() {
	let cluster = DemoCluster::boot(&RuntimeConfig::default(), 2, TenantId(5)).await.unwrap();
	let ids: Vec<u64> = cluster.nodes().iter().map(|n| n.id().0).collect();
	assert_eq!(ids, vec![1, 2]);

	cluster.origin().tenant(TenantId(5)).unwrap().pause().await.unwrap();
	assert_eq!(cluster.persistence().status_of(TenantId(5)).map(|s| s.as_str()), Some("PAUSED"));
	cluster.shutdown().await.unwrap();
}

#[tokio::test]
async fn empty_cluster_is_rejected() {
	assert!(DemoCluster::boot(&RuntimeConfig::default(), 0, TenantId(1)).await.is_err());
}
