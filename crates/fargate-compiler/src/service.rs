//! Per-service planning and generation.
//!
//! Compilation of a service happens in two steps. [`ServicePlan::new`]
//! validates the service and fixes its ports; it produces no resources.
//! Generation then runs in two passes around the front end:
//! [`generate_definitions`] emits what listeners point at (log group,
//! task definition, target groups) and [`generate_service`] emits what
//! depends on routing (the scalable service and its autoscaling triple).

use rand::Rng;
use serde_json::{Value, json};
use tracing::debug;

use fargate_core::config::{DEFAULT_HEALTH_CHECK_PATH, DEFAULT_HEALTH_CHECK_PROTOCOL, MAX_RULE_PRIORITY};
use fargate_core::naming::MAX_PHYSICAL_NAME_LEN;
use fargate_core::template::{get_att, join, reference};
use fargate_core::{
    ClusterSpec, CompileError, CompileResult, Namer, Protocol, Resource, ResourceGraph,
    ResourceKind, ServiceSpec, normalize_identifier,
};

use crate::listeners::route_count;
use crate::network::NetworkHandle;
use crate::ports::{PortAllocator, ResolvedPort};

/// Where task definitions get their execution role from.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ExecutionRole {
    /// ARN supplied by the caller; nothing is generated.
    External(String),
    /// One role generated for the whole cluster under this logical id.
    Shared(String),
}

impl ExecutionRole {
    pub fn value(&self) -> Value {
        match self {
            ExecutionRole::External(arn) => Value::String(arn.clone()),
            ExecutionRole::Shared(id) => reference(id),
        }
    }
}

/// Cluster-level values every service of the cluster generates against.
pub struct ServiceContext<'a> {
    pub cluster: &'a ClusterSpec,
    pub cluster_namer: &'a Namer,
    pub cluster_id: &'a str,
    pub stage: &'a str,
    pub network: &'a NetworkHandle,
    pub execution_role: &'a ExecutionRole,
    pub load_balancer_id: Option<&'a str>,
}

/// A validated service with its ports fixed.
#[derive(Debug, Clone)]
pub struct ServicePlan<'a> {
    /// Position of the service in the cluster's service list.
    pub index: usize,
    pub spec: &'a ServiceSpec,
    /// Normalized service name, e.g. `WebApp` for `"Web App!"`.
    pub base_name: String,
    pub namer: Namer,
    /// One per protocol; empty when the service is not load balanced.
    pub ports: Vec<ResolvedPort>,
    pub load_balanced: bool,
}

impl<'a> ServicePlan<'a> {
    pub fn new<R: Rng>(
        index: usize,
        cluster: &ClusterSpec,
        spec: &'a ServiceSpec,
        cluster_namer: &Namer,
        allocator: &mut PortAllocator,
        rng: &mut R,
    ) -> CompileResult<Self> {
        let base_name = normalize_identifier(&spec.name);
        if base_name.is_empty() {
            return Err(CompileError::EmptyServiceName {
                cluster: cluster.cluster_name.clone(),
                name: spec.name.clone(),
            });
        }

        if spec
            .protocols
            .iter()
            .any(|p| p.protocol == Protocol::Https && p.certificate_arns.is_empty())
        {
            return Err(CompileError::HttpsWithoutCertificate {
                cluster: cluster.cluster_name.clone(),
                service: spec.name.clone(),
            });
        }

        if let Some(scale) = &spec.auto_scale {
            if scale.min_capacity() > scale.max_capacity() {
                return Err(CompileError::InvalidAutoScaleBounds {
                    cluster: cluster.cluster_name.clone(),
                    service: spec.name.clone(),
                    min: scale.min_capacity(),
                    max: scale.max_capacity(),
                });
            }
        }

        let load_balanced = !cluster.disable_elb && !spec.disable_elb;
        if load_balanced {
            let routes = route_count(spec);
            let last = u64::from(spec.priority()) + routes as u64 - 1;
            if spec.priority() < 1 || last > u64::from(MAX_RULE_PRIORITY) {
                return Err(CompileError::InvalidPriority {
                    cluster: cluster.cluster_name.clone(),
                    service: spec.name.clone(),
                    priority: spec.priority(),
                    rules: routes,
                });
            }
        }
        let ports = if load_balanced {
            allocator.allocate(spec, rng)
        } else {
            debug!(service = %spec.name, "load balancing disabled, no ports allocated");
            Vec::new()
        };

        if let Some(scale) = &spec.auto_scale {
            if scale.metric.needs_target_group() && ports.is_empty() {
                return Err(CompileError::RequestCountWithoutLoadBalancer {
                    cluster: cluster.cluster_name.clone(),
                    service: spec.name.clone(),
                });
            }
        }

        Ok(Self {
            index,
            spec,
            namer: cluster_namer.child(&base_name),
            base_name,
            ports,
            load_balanced,
        })
    }

    pub fn name(&self) -> &str {
        &self.spec.name
    }

    /// Disambiguators that tell a service's protocols apart: the protocol
    /// name, plus the position for every protocol after the first so two
    /// protocols of the same kind never share an identifier.
    pub fn protocol_tag(&self, port: &ResolvedPort) -> Vec<String> {
        let mut tag = vec![port.protocol.as_str().to_string()];
        if port.protocol_index > 0 {
            tag.push(port.protocol_index.to_string());
        }
        tag
    }

    pub fn id(&self, kind: ResourceKind, extra: &[String]) -> String {
        let parts: Vec<&str> = extra.iter().map(String::as_str).collect();
        self.namer.name(kind, &parts)
    }

    pub fn target_group_id(&self, port: &ResolvedPort) -> String {
        self.id(ResourceKind::TargetGroup, &self.protocol_tag(port))
    }

    pub fn service_id(&self) -> String {
        self.id(ResourceKind::Service, &[])
    }

    pub fn task_definition_id(&self) -> String {
        self.id(ResourceKind::TaskDefinition, &[])
    }

    pub fn log_group_id(&self) -> String {
        self.id(ResourceKind::LogGroup, &[])
    }

    fn protocol_spec(&self, port: &ResolvedPort) -> &fargate_core::ProtocolSpec {
        &self.spec.protocols[port.protocol_index]
    }
}

/// Log group name. Stable across compilations so log history survives
/// redeploys.
pub fn log_group_name(ctx: &ServiceContext<'_>, plan: &ServicePlan<'_>) -> String {
    format!(
        "/ecs/{}/{}-{}",
        ctx.cluster_namer.prefix(),
        plan.base_name,
        ctx.stage
    )
}

/// Log group, task definition and target groups for one service.
pub fn generate_definitions(plan: &ServicePlan<'_>, ctx: &ServiceContext<'_>) -> CompileResult<ResourceGraph> {
    let mut graph = ResourceGraph::new();
    let spec = plan.spec;

    let mut log_group = json!({ "LogGroupName": log_group_name(ctx, plan) });
    if let Some(days) = spec.log_retention_days {
        log_group["RetentionInDays"] = json!(days);
    }
    graph.insert(plan.log_group_id(), Resource::new("AWS::Logs::LogGroup", log_group))?;

    let image = spec
        .image_reference(ctx.cluster.image_repository.as_deref())
        .ok_or_else(|| CompileError::MissingImage {
            cluster: ctx.cluster.cluster_name.clone(),
            service: spec.name.clone(),
        })?;

    let mut container_ports: Vec<u16> = plan.ports.iter().map(|p| p.port).collect();
    if container_ports.is_empty() {
        container_ports.extend(spec.port);
    }
    container_ports.dedup();

    let mut container = json!({
        "Name": spec.name,
        "Cpu": spec.cpu,
        "Memory": spec.memory,
        "Image": image,
        "Environment": spec
            .environment
            .iter()
            .map(|(name, value)| json!({ "Name": name, "Value": value }))
            .collect::<Vec<_>>(),
        "PortMappings": container_ports
            .iter()
            .map(|port| json!({ "ContainerPort": port }))
            .collect::<Vec<_>>(),
        "LogConfiguration": {
            "LogDriver": "awslogs",
            "Options": {
                "awslogs-group": reference(&plan.log_group_id()),
                "awslogs-region": { "Ref": "AWS::Region" },
                "awslogs-stream-prefix": plan.base_name,
            }
        },
    });
    if let Some(entry_point) = &spec.entry_point {
        container["EntryPoint"] = json!(entry_point);
    }

    graph.insert(
        plan.task_definition_id(),
        Resource::new(
            "AWS::ECS::TaskDefinition",
            json!({
                "Family": spec.name,
                "Cpu": spec.cpu,
                "Memory": spec.memory,
                "NetworkMode": "awsvpc",
                "RequiresCompatibilities": ["FARGATE"],
                "ExecutionRoleArn": ctx.execution_role.value(),
                "TaskRoleArn": match &spec.task_role_arn {
                    Some(arn) => json!(arn),
                    None => json!({ "Ref": "AWS::NoValue" }),
                },
                "ContainerDefinitions": [container],
            }),
        ),
    )?;

    for port in &plan.ports {
        let proto = plan.protocol_spec(port);
        let health_path = proto
            .health_check_uri
            .as_deref()
            .or(spec.health_check_uri.as_deref())
            .unwrap_or(DEFAULT_HEALTH_CHECK_PATH);
        let health_protocol = proto
            .health_check_protocol
            .as_deref()
            .or(spec.health_check_protocol.as_deref())
            .unwrap_or(DEFAULT_HEALTH_CHECK_PROTOCOL);
        let tag = plan.protocol_tag(port);
        let tag: Vec<&str> = tag.iter().map(String::as_str).collect();

        graph.insert(
            plan.target_group_id(port),
            Resource::new(
                "AWS::ElasticLoadBalancingV2::TargetGroup",
                json!({
                    "HealthCheckIntervalSeconds": spec.health_check_interval(),
                    "HealthCheckPath": health_path,
                    "HealthCheckProtocol": health_protocol,
                    "HealthCheckTimeoutSeconds": 5,
                    "HealthyThresholdCount": 2,
                    "TargetType": "ip",
                    "Name": plan.namer.bounded_name(ResourceKind::TargetGroup, &tag, MAX_PHYSICAL_NAME_LEN),
                    "Port": port.port,
                    "Protocol": port.protocol.as_str(),
                    "UnhealthyThresholdCount": 2,
                    "VpcId": ctx.network.vpc_ref(),
                }),
            ),
        )?;
    }

    Ok(graph)
}

/// The scalable service plus its optional autoscaling triple.
///
/// `rule_ids` are the listener rules routing to this service; the service
/// depends on all of them so it is never activated before its routing.
pub fn generate_service(
    plan: &ServicePlan<'_>,
    ctx: &ServiceContext<'_>,
    rule_ids: &[String],
) -> CompileResult<ResourceGraph> {
    let mut graph = ResourceGraph::new();
    let spec = plan.spec;
    let service_id = plan.service_id();

    let mut properties = json!({
        "ServiceName": spec.name,
        "Cluster": reference(ctx.cluster_id),
        "LaunchType": "FARGATE",
        "DeploymentConfiguration": {
            "MaximumPercent": 200,
            "MinimumHealthyPercent": 75,
        },
        "DesiredCount": spec.desired_count(),
        "NetworkConfiguration": {
            "AwsvpcConfiguration": {
                "AssignPublicIp": ctx.network.assign_public_ip(ctx.cluster.public),
                "SecurityGroups": ctx.network.security_group_refs(),
                "Subnets": ctx.network.subnet_refs(),
            }
        },
        "TaskDefinition": reference(&plan.task_definition_id()),
    });
    if !plan.ports.is_empty() {
        properties["LoadBalancers"] = plan
            .ports
            .iter()
            .map(|port| {
                json!({
                    "ContainerName": spec.name,
                    "ContainerPort": port.port,
                    "TargetGroupArn": reference(&plan.target_group_id(port)),
                })
            })
            .collect();
    }

    graph.insert(
        service_id.as_str(),
        Resource::new("AWS::ECS::Service", properties).depends_on(rule_ids.iter().cloned()),
    )?;

    if let Some(scale) = &spec.auto_scale {
        let role_id = plan.id(ResourceKind::AutoScalingRole, &[]);
        let target_id = plan.id(ResourceKind::AutoScalingTarget, &[]);
        let policy_id = plan.id(ResourceKind::AutoScalingPolicy, &[]);

        graph.insert(role_id.as_str(), autoscaling_role())?;
        graph.insert(
            target_id.as_str(),
            Resource::new(
                "AWS::ApplicationAutoScaling::ScalableTarget",
                json!({
                    "MinCapacity": scale.min_capacity(),
                    "MaxCapacity": scale.max_capacity(),
                    "ResourceId": join(
                        "/",
                        vec![
                            json!("service"),
                            reference(ctx.cluster_id),
                            get_att(&service_id, "Name"),
                        ],
                    ),
                    "RoleARN": get_att(&role_id, "Arn"),
                    "ScalableDimension": "ecs:service:DesiredCount",
                    "ServiceNamespace": "ecs",
                }),
            )
            .depends_on([service_id.as_str()]),
        )?;

        let mut metric = json!({ "PredefinedMetricType": scale.metric.as_str() });
        if scale.metric.needs_target_group() {
            // Plan validation guarantees a target group exists.
            if let (Some(lb_id), Some(port)) = (ctx.load_balancer_id, plan.ports.first()) {
                metric["ResourceLabel"] = join(
                    "/",
                    vec![
                        get_att(lb_id, "LoadBalancerFullName"),
                        get_att(&plan.target_group_id(port), "TargetGroupFullName"),
                    ],
                );
            }
        }

        graph.insert(
            policy_id.as_str(),
            Resource::new(
                "AWS::ApplicationAutoScaling::ScalingPolicy",
                json!({
                    "PolicyName": policy_id,
                    "PolicyType": "TargetTrackingScaling",
                    "ScalingTargetId": reference(&target_id),
                    "TargetTrackingScalingPolicyConfiguration": {
                        "PredefinedMetricSpecification": metric,
                        "ScaleInCooldown": scale.scale_in_cooldown(),
                        "ScaleOutCooldown": scale.scale_out_cooldown(),
                        "TargetValue": scale.target_value,
                    },
                }),
            ),
        )?;
        debug!(
            service = %spec.name,
            min = scale.min_capacity(),
            max = scale.max_capacity(),
            metric = %scale.metric,
            "autoscaling configured"
        );
    }

    Ok(graph)
}

fn autoscaling_role() -> Resource {
    Resource::new(
        "AWS::IAM::Role",
        json!({
            "AssumeRolePolicyDocument": {
                "Statement": [{
                    "Effect": "Allow",
                    "Principal": { "Service": ["application-autoscaling.amazonaws.com"] },
                    "Action": ["sts:AssumeRole"],
                }]
            },
            "Path": "/",
            "Policies": [{
                "PolicyName": "ServiceAutoScalingPolicy",
                "PolicyDocument": {
                    "Statement": [{
                        "Effect": "Allow",
                        "Action": [
                            "application-autoscaling:*",
                            "cloudwatch:DescribeAlarms",
                            "cloudwatch:PutMetricAlarm",
                            "cloudwatch:DeleteAlarms",
                            "ecs:DescribeServices",
                            "ecs:UpdateService",
                        ],
                        "Resource": "*",
                    }]
                }
            }],
        }),
    )
}

/// The execution role shared by every task definition of a cluster.
pub fn execution_role() -> Resource {
    Resource::new(
        "AWS::IAM::Role",
        json!({
            "AssumeRolePolicyDocument": {
                "Statement": [{
                    "Effect": "Allow",
                    "Principal": { "Service": ["ecs-tasks.amazonaws.com"] },
                    "Action": ["sts:AssumeRole"],
                }]
            },
            "Path": "/",
            "Policies": [{
                "PolicyName": "AmazonECSTaskExecutionRolePolicy",
                "PolicyDocument": {
                    "Statement": [{
                        "Effect": "Allow",
                        "Action": [
                            "ecr:GetAuthorizationToken",
                            "ecr:BatchCheckLayerAvailability",
                            "ecr:GetDownloadUrlForLayer",
                            "ecr:BatchGetImage",
                            "logs:CreateLogStream",
                            "logs:PutLogEvents",
                        ],
                        "Resource": "*",
                    }]
                }
            }],
        }),
    )
}
