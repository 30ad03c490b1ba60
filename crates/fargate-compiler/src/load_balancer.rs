//! The cluster's application load balancer and its security groups.

use serde_json::{Value, json};
use tracing::debug;

use fargate_core::naming::MAX_PHYSICAL_NAME_LEN;
use fargate_core::template::{reference, tag_list};
use fargate_core::{ClusterSpec, CompileResult, Namer, Resource, ResourceGraph, ResourceKind};

use crate::network::NetworkHandle;
use crate::service::ServicePlan;

/// Load balancer declarations for a cluster whose load balancing is on.
///
/// On a synthesized network every load-balanced service gets a front-end
/// security group open to 0.0.0.0/0 plus an ingress rule letting that
/// group reach the shared container group. On an existing network the
/// load balancer joins the caller's security groups.
pub fn generate(
    cluster: &ClusterSpec,
    namer: &Namer,
    load_balancer_id: &str,
    network: &NetworkHandle,
    plans: &[ServicePlan<'_>],
) -> CompileResult<ResourceGraph> {
    let mut graph = ResourceGraph::new();
    let tags = tag_list(&cluster.tags);

    let security_groups: Vec<Value> = match network.container_security_group() {
        Some(container_group) => {
            let mut groups = Vec::new();
            for plan in plans.iter().filter(|p| p.load_balanced) {
                let group_id = plan.id(ResourceKind::LoadBalancerSecurityGroup, &[]);
                let ingress_id = plan.id(ResourceKind::LoadBalancerIngress, &[]);

                let mut group = json!({
                    "GroupDescription": format!("Access to the load balancer for {}", plan.name()),
                    "VpcId": network.vpc_ref(),
                    "SecurityGroupIngress": [{ "CidrIp": "0.0.0.0/0", "IpProtocol": -1 }],
                });
                if let Some(tags) = &tags {
                    group["Tags"] = tags.clone();
                }
                graph.insert(
                    group_id.as_str(),
                    Resource::new("AWS::EC2::SecurityGroup", group).delete_on_removal(),
                )?;
                graph.insert(
                    ingress_id,
                    Resource::new(
                        "AWS::EC2::SecurityGroupIngress",
                        json!({
                            "Description": format!("Ingress from the load balancer for {}", plan.name()),
                            "GroupId": reference(container_group),
                            "IpProtocol": -1,
                            "SourceSecurityGroupId": reference(&group_id),
                        }),
                    )
                    .delete_on_removal(),
                )?;
                groups.push(reference(&group_id));
            }
            groups
        }
        None => network.security_group_refs(),
    };

    let scheme = if cluster.public { "internet-facing" } else { "internal" };
    debug!(
        load_balancer = load_balancer_id,
        scheme,
        security_groups = security_groups.len(),
        "load balancer"
    );

    let mut properties = json!({
        "Name": namer.bounded_name(ResourceKind::LoadBalancer, &[], MAX_PHYSICAL_NAME_LEN),
        "Scheme": scheme,
        "LoadBalancerAttributes": [{
            "Key": "idle_timeout.timeout_seconds",
            "Value": cluster.idle_timeout().to_string(),
        }],
        "Subnets": network.subnet_refs(),
        "SecurityGroups": security_groups,
    });
    if let Some(tags) = tags {
        properties["Tags"] = tags;
    }
    graph.insert(
        load_balancer_id,
        Resource::new("AWS::ElasticLoadBalancingV2::LoadBalancer", properties).delete_on_removal(),
    )?;

    Ok(graph)
}
