use std::path::Path;

use anyhow::Context;
use serde_json::Value;
use tracing::info;

use fargate_compiler::emit;
use fargate_core::PluginConfig;

pub fn compile(
    config: &str,
    stage: &str,
    base: Option<&str>,
    output: Option<&str>,
    compact: bool,
) -> anyhow::Result<()> {
    let template = build_template(Path::new(config), stage, base.map(Path::new))?;
    let rendered = emit::to_json_string(&template, !compact)?;

    match output {
        Some(path) => {
            std::fs::write(path, rendered + "\n")
                .with_context(|| format!("failed to write {path}"))?;
            eprintln!("✓ Wrote {path}");
        }
        None => println!("{rendered}"),
    }
    Ok(())
}

pub fn ids(config: &str, stage: &str) -> anyhow::Result<()> {
    let config = PluginConfig::from_file(Path::new(config))?;
    for spec in &config.clusters {
        let compiled = fargate_compiler::compile(spec, stage)
            .with_context(|| format!("cluster {}", spec.cluster_name))?;
        println!("{}:", compiled.cluster_name);
        for id in compiled.logical_ids() {
            println!("  {id}");
        }
        for id in compiled.output_ids() {
            println!("  {id} (output)");
        }
    }
    Ok(())
}

/// Load the config, compile every cluster, and render against `base`.
pub fn build_template(config_path: &Path, stage: &str, base: Option<&Path>) -> anyhow::Result<Value> {
    let config = PluginConfig::from_file(config_path)?;
    info!(config = %config_path.display(), stage, clusters = config.clusters.len(), "loaded config");
    let graph = fargate_compiler::compile_all(&config, stage)?;

    let base = match base {
        Some(path) => {
            let content = std::fs::read_to_string(path)
                .with_context(|| format!("failed to read {}", path.display()))?;
            Some(
                serde_json::from_str(&content)
                    .with_context(|| format!("{} is not valid JSON", path.display()))?,
            )
        }
        None => None,
    };

    Ok(emit::render(&graph, base)?)
}
