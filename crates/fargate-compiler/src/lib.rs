//! Compiles cluster specifications into resource graphs.
//!
//! [`compile`] handles one cluster, [`compile_all`] every cluster of a
//! [`PluginConfig`]. Each cluster gets its own port allocator and naming
//! scope; results are combined by checked union.

pub mod cluster;
pub mod emit;
pub mod listeners;
pub mod load_balancer;
pub mod network;
pub mod ports;
pub mod service;

use rand::Rng;
use tracing::info;

use fargate_core::{ClusterSpec, CompileResult, PluginConfig, ResourceGraph};

pub use cluster::{CompiledCluster, compile_cluster_with_rng};

/// Compile one cluster for `stage`.
///
/// Ports that are not pinned are drawn from the thread RNG and therefore
/// differ between calls.
pub fn compile(spec: &ClusterSpec, stage: &str) -> CompileResult<CompiledCluster> {
    compile_cluster_with_rng(spec, stage, &mut rand::thread_rng())
}

/// Compile every cluster and union the graphs.
pub fn compile_all(config: &PluginConfig, stage: &str) -> CompileResult<ResourceGraph> {
    compile_all_with_rng(config, stage, &mut rand::thread_rng())
}

pub fn compile_all_with_rng<R: Rng>(
    config: &PluginConfig,
    stage: &str,
    rng: &mut R,
) -> CompileResult<ResourceGraph> {
    let mut graph = ResourceGraph::new();
    for spec in &config.clusters {
        let compiled = compile_cluster_with_rng(spec, stage, &mut *rng)?;
        graph.extend(compiled.graph)?;
    }
    info!(
        clusters = config.clusters.len(),
        resources = graph.len(),
        outputs = graph.outputs.len(),
        "compilation complete"
    );
    Ok(graph)
}
