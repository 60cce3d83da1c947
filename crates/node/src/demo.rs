//! In-process cluster used by the CLI commands.

use std::path::Path;
use std::sync::Arc;

use anyhow::{Context, bail};
use stratum_cluster::{ClusterTaskHandler, LocalCluster, NodeId};
use stratum_modules::{ResourceStream, ScopeContext, ScopeId, TenantId};
use stratum_runtime::{Node, RuntimeConfig, Transaction};
use stratum_tenant::memory::{MemoryPersistence, MemoryScheduler, MemorySessions};
use stratum_tenant::{TenantCollaborators, TenantRecord, TenantStatus};
use tracing::info;

pub struct DemoCluster {
	_cluster: Arc<LocalCluster>,
	nodes: Vec<Arc<Node>>,
	persistence: Arc<MemoryPersistence>,
}

impl DemoCluster {
	/// Boots `size` nodes numbered from the configured node id, all hosting `tenant`.
	pub async fn boot(config: &RuntimeConfig, size: u64, tenant: TenantId) -> anyhow::Result<Self> {
		if size == 0 {
			bail!("a cluster needs at least one node");
		}
		let cluster = LocalCluster::new();
		let persistence = Arc::new(MemoryPersistence::new().with_tenant(TenantRecord::new(tenant, format!("tenant-{tenant}"), TenantStatus::Activated)));
		let collaborators = TenantCollaborators {
			persistence: persistence.clone(),
			scheduler: Arc::new(MemoryScheduler::new()),
			sessions: Arc::new(MemorySessions::new()),
		};

		let first = config.node_id().0;
		let mut nodes = Vec::new();
		for id in first..first + size {
			let node = Arc::new(Node::new(config, Arc::new(cluster.broadcaster(NodeId(id))))?);
			let handler: Arc<dyn ClusterTaskHandler> = node.clone();
			cluster.join(NodeId(id), &handler);
			node.add_tenant(tenant, collaborators.clone(), |builder| builder).await?;
			node.start().await?;
			nodes.push(node);
		}
		info!(nodes = size, tenant = tenant.0, "cluster booted");
		Ok(Self {
			_cluster: cluster,
			nodes,
			persistence,
		})
	}

	pub fn origin(&self) -> &Arc<Node> {
		&self.nodes[0]
	}

	pub fn nodes(&self) -> &[Arc<Node>] {
		&self.nodes
	}

	pub fn persistence(&self) -> &MemoryPersistence {
		&self.persistence
	}

	pub async fn shutdown(&self) -> anyhow::Result<()> {
		for node in &self.nodes {
			node.stop().await?;
		}
		Ok(())
	}
}

/// Reads every file under `dir` into a stream named by relative, `/`-separated paths.
pub fn read_resources(dir: &Path) -> anyhow::Result<ResourceStream> {
	let mut files = Vec::new();
	collect_files(dir, dir, &mut files)?;
	files.sort();

	let mut stream = ResourceStream::new();
	for (name, path) in files {
		let bytes = std::fs::read(&path).with_context(|| format!("reading {}", path.display()))?;
		stream.push(name, bytes);
	}
	Ok(stream)
}

fn collect_files(root: &Path, dir: &Path, out: &mut Vec<(String, std::path::PathBuf)>) -> anyhow::Result<()> {
	let entries = std::fs::read_dir(dir).with_context(|| format!("listing {}", dir.display()))?;
	for entry in entries {
		let path = entry?.path();
		if path.is_dir() {
			collect_files(root, &path, out)?;
			continue;
		}
		let relative = path.strip_prefix(root).unwrap_or(&path);
		let name = relative.components().map(|c| c.as_os_str().to_string_lossy()).collect::<Vec<_>>().join("/");
		out.push((name, path));
	}
	Ok(())
}

/// Refreshes one scope from `dir` on the origin node and reports every node's view.
pub async fn refresh(config: &RuntimeConfig, nodes: u64, tenant: TenantId, process: Option<i64>, dir: &Path) -> anyhow::Result<()> {
	let stream = read_resources(dir)?;
	let cluster = DemoCluster::boot(config, nodes, tenant).await?;
	let scope = process.map_or(ScopeId::tenant(tenant), ScopeId::process);
	let ctx = ScopeContext::for_tenant(tenant);

	let tx = Transaction::begin();
	cluster.origin().refresh().refresh(&tx, scope, &ctx, stream)?;
	tx.commit().await?;

	for node in cluster.nodes() {
		let module = node.registry().get(scope).context("scope missing after refresh")?;
		let current = module.current();
		let names: Vec<&str> = current.resource_names().collect();
		println!(
			"{} {scope} generation={} resources={} bundles={} [{}]",
			node.id(),
			module.generation(),
			current.len(),
			current.bundles().len(),
			names.join(", ")
		);
	}
	cluster.shutdown().await
}

/// Pauses then resumes `tenant` from the origin node, printing the status after each step.
pub async fn lifecycle(config: &RuntimeConfig, nodes: u64, tenant: TenantId) -> anyhow::Result<()> {
	let cluster = DemoCluster::boot(config, nodes, tenant).await?;
	let runtime = cluster.origin().tenant(tenant)?;

	runtime.pause().await?;
	println!("paused: {}", cluster.persistence().status_of(tenant).map_or("?", TenantStatus::as_str));
	runtime.resume().await?;
	println!("resumed: {}", cluster.persistence().status_of(tenant).map_or("?", TenantStatus::as_str));

	cluster.shutdown().await
}
