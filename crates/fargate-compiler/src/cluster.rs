//! Resource graph assembly for one cluster.
//!
//! Order of insertion follows the reference edges, so every `Ref` in the
//! emitted graph points at a declaration that appears before it:
//!
//! 1. cluster, network, shared execution role
//! 2. per service: log group, task definition, target groups
//! 3. load balancer security groups, load balancer, listeners, rules
//! 4. per service: scalable service, autoscaling triple
//!
//! Services and listener routing are planned before anything is emitted.
//! The execution role is decided once for the whole cluster from that plan.

use rand::Rng;
use serde_json::json;
use tracing::{debug, info};

use fargate_core::template::tag_list;
use fargate_core::{ClusterSpec, CompileResult, Namer, Resource, ResourceGraph, ResourceKind};

use crate::listeners::FrontEndPlan;
use crate::ports::PortAllocator;
use crate::service::{self, ExecutionRole, ServiceContext, ServicePlan};
use crate::{load_balancer, network};

/// Output of compiling one cluster.
#[derive(Debug, Clone, PartialEq)]
pub struct CompiledCluster {
    pub cluster_name: String,
    pub graph: ResourceGraph,
}

impl CompiledCluster {
    /// Identifiers this cluster owns, so a host can merge without
    /// clobbering its own resources.
    pub fn logical_ids(&self) -> Vec<&str> {
        self.graph.logical_ids().collect()
    }

    pub fn output_ids(&self) -> Vec<&str> {
        self.graph.output_ids().collect()
    }
}

/// Compile one cluster for `stage`, drawing random ports from `rng`.
pub fn compile_cluster_with_rng<R: Rng>(
    spec: &ClusterSpec,
    stage: &str,
    rng: &mut R,
) -> CompileResult<CompiledCluster> {
    let namer = Namer::for_cluster(&spec.cluster_name, spec.name_prefix.as_deref(), stage);
    let network = network::resolve(&spec.vpc, &namer);

    let mut allocator = PortAllocator::for_cluster(spec);
    let plans = spec
        .services
        .iter()
        .enumerate()
        .map(|(index, svc)| ServicePlan::new(index, spec, svc, &namer, &mut allocator, &mut *rng))
        .collect::<CompileResult<Vec<_>>>()?;

    let load_balancer_id = (!spec.disable_elb).then(|| namer.name(ResourceKind::LoadBalancer, &[]));
    let front_end = match load_balancer_id {
        Some(_) => FrontEndPlan::aggregate(&namer, &spec.cluster_name, &plans)?,
        None => FrontEndPlan::default(),
    };

    let execution_role = match spec.execution_role_arn.as_deref() {
        Some(arn) if !arn.is_empty() => ExecutionRole::External(arn.to_string()),
        _ => ExecutionRole::Shared(namer.name(ResourceKind::ExecutionRole, &[])),
    };
    debug!(cluster = %spec.cluster_name, role = ?execution_role, "execution role");

    let cluster_id = namer.name(ResourceKind::Cluster, &[]);
    let mut graph = ResourceGraph::new();

    let mut cluster = json!({ "ClusterName": cluster_id });
    if let Some(tags) = tag_list(&spec.tags) {
        cluster["Tags"] = tags;
    }
    graph.insert(
        cluster_id.as_str(),
        Resource::new("AWS::ECS::Cluster", cluster).delete_on_removal(),
    )?;
    graph.extend(network.generate(&spec.tags)?)?;
    if let ExecutionRole::Shared(role_id) = &execution_role {
        graph.insert(role_id.as_str(), service::execution_role())?;
    }

    let ctx = ServiceContext {
        cluster: spec,
        cluster_namer: &namer,
        cluster_id: &cluster_id,
        stage,
        network: &network,
        execution_role: &execution_role,
        load_balancer_id: load_balancer_id.as_deref(),
    };

    for plan in &plans {
        graph.extend(service::generate_definitions(plan, &ctx)?)?;
    }

    if let Some(lb_id) = &load_balancer_id {
        graph.extend(load_balancer::generate(spec, &namer, lb_id, &network, &plans)?)?;
        graph.extend(front_end.generate(lb_id)?)?;
    }

    for plan in &plans {
        let rule_ids = front_end.rule_ids_for(plan.index);
        graph.extend(service::generate_service(plan, &ctx, &rule_ids)?)?;
    }

    graph.verify_references()?;

    info!(
        cluster = %spec.cluster_name,
        stage,
        services = plans.len(),
        listeners = front_end.listeners.len(),
        rules = front_end.rules.len(),
        resources = graph.len(),
        outputs = graph.outputs.len(),
        "compiled cluster"
    );

    Ok(CompiledCluster {
        cluster_name: spec.cluster_name.clone(),
        graph,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use fargate_core::CompileError;
    use rand::SeedableRng;
    use rand::rngs::StdRng;
    use serde_json::Value;

    fn cluster(value: Value) -> ClusterSpec {
        serde_json::from_value(value).unwrap()
    }

    fn compile(spec: &ClusterSpec) -> CompileResult<CompiledCluster> {
        compile_cluster_with_rng(spec, "dev", &mut StdRng::seed_from_u64(21))
    }

    fn web_cluster() -> ClusterSpec {
        cluster(json!({
            "clusterName": "shop",
            "vpc": { "cidr": "10.0.0.0/16", "subnets": ["10.0.0.0/24", "10.0.1.0/24"] },
            "services": [{
                "name": "web", "cpu": 256, "memory": 512, "port": 80, "image": "nginx",
                "protocols": [{ "protocol": "HTTP" }],
            }],
        }))
    }

    #[test]
    fn references_point_backwards() {
        let compiled = compile(&web_cluster()).unwrap();
        let ids: Vec<&str> = compiled.logical_ids();
        for (position, id) in ids.iter().enumerate() {
            let resource = compiled.graph.get(id).unwrap();
            for target in resource.references() {
                let target_position = ids.iter().position(|i| *i == target).unwrap();
                assert!(target_position < position, "{id} refers forward to {target}");
            }
        }
    }

    #[test]
    fn cluster_name_is_stage_qualified() {
        let dev = compile(&web_cluster()).unwrap();
        let prod = compile_cluster_with_rng(&web_cluster(), "prod", &mut StdRng::seed_from_u64(3)).unwrap();

        let dev_cluster = dev.graph.get("ShopClusterDev").unwrap();
        assert_eq!(dev_cluster.properties["ClusterName"], "ShopClusterDev");
        assert_eq!(dev_cluster.deletion_policy.as_deref(), Some("Delete"));
        assert_eq!(
            prod.graph.get("ShopClusterProd").unwrap().properties["ClusterName"],
            "ShopClusterProd"
        );
    }

    #[test]
    fn shared_role_generated_once() {
        let mut spec = web_cluster();
        let mut second = spec.services[0].clone();
        second.name = "admin".to_string();
        second.port = Some(81);
        spec.services.push(second);

        let compiled = compile(&spec).unwrap();
        let roles: Vec<&str> = compiled
            .graph
            .of_kind("AWS::IAM::Role")
            .map(|(id, _)| id)
            .collect();
        assert_eq!(roles, vec!["ShopExecutionRoleDev"]);
        for (_, task) in compiled.graph.of_kind("AWS::ECS::TaskDefinition") {
            assert_eq!(task.properties["ExecutionRoleArn"], json!({ "Ref": "ShopExecutionRoleDev" }));
        }
    }

    #[test]
    fn external_role_suppresses_shared_role() {
        let mut spec = web_cluster();
        spec.execution_role_arn = Some("arn:aws:iam::1:role/exec".to_string());
        let compiled = compile(&spec).unwrap();
        assert_eq!(compiled.graph.count_kind("AWS::IAM::Role"), 0);
    }

    #[test]
    fn cluster_disabled_load_balancing_drops_front_end() {
        let mut spec = web_cluster();
        spec.disable_elb = true;
        let compiled = compile(&spec).unwrap();
        assert_eq!(compiled.graph.count_kind("AWS::ElasticLoadBalancingV2::LoadBalancer"), 0);
        assert_eq!(compiled.graph.count_kind("AWS::ElasticLoadBalancingV2::Listener"), 0);
        assert_eq!(compiled.graph.count_kind("AWS::ElasticLoadBalancingV2::TargetGroup"), 0);
        assert!(compiled.graph.outputs.is_empty());
        let service = compiled.graph.get("ShopWebServiceDev").unwrap();
        assert!(service.properties.get("LoadBalancers").is_none());
        assert!(service.depends_on.is_empty());
    }

    #[test]
    fn service_depends_on_its_rules() {
        let compiled = compile(&web_cluster()).unwrap();
        let service = compiled.graph.get("ShopWebServiceDev").unwrap();
        assert_eq!(service.depends_on, vec!["ShopWebALBListenerRuleDev0"]);
    }

    #[test]
    fn service_errors_abort_the_cluster() {
        let mut spec = web_cluster();
        spec.services[0].image = None;
        assert!(matches!(compile(&spec), Err(CompileError::MissingImage { .. })));
    }
}
