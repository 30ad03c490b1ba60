//! Network resolution: synthesize a private network or bind to an
//! existing one.
//!
//! Everything downstream works against [`NetworkHandle`]'s read methods
//! (`vpc_ref`, `subnet_refs`, `security_group_refs`,
//! `container_security_group`, `assign_public_ip`) and never matches on
//! the variant.
//! CIDR strings are passed through untouched; the platform validates
//! them at apply time.

use indexmap::IndexMap;
use serde_json::{Value, json};
use tracing::debug;

use fargate_core::template::{reference, tag_list};
use fargate_core::{CompileResult, Namer, NetworkSpec, Resource, ResourceGraph, ResourceKind};

/// Network handle for one cluster.
#[derive(Debug, Clone, PartialEq)]
pub enum NetworkHandle {
    Synthesized(SynthesizedNetwork),
    Existing(ExistingNetwork),
}

/// A network created by this compilation.
#[derive(Debug, Clone, PartialEq)]
pub struct SynthesizedNetwork {
    pub cidr: String,
    pub subnet_cidrs: Vec<String>,
    pub vpc_id: String,
    pub gateway_id: String,
    pub attachment_id: String,
    pub route_table_id: String,
    pub route_id: String,
    pub subnet_ids: Vec<String>,
    pub association_ids: Vec<String>,
    /// Shared security group every task of the cluster joins.
    pub container_security_group_id: String,
    pub self_ingress_id: String,
}

/// Opaque identifiers of a network that already exists.
#[derive(Debug, Clone, PartialEq)]
pub struct ExistingNetwork {
    pub vpc_id: String,
    pub security_group_ids: Vec<String>,
    pub subnet_ids: Vec<String>,
}

/// Decide between an existing network and a synthesized one.
///
/// The existing network is used only when the VPC id, the security group
/// ids and the subnet ids are all non-empty.
pub fn resolve(spec: &NetworkSpec, namer: &Namer) -> NetworkHandle {
    let vpc_id = spec.vpc_id.as_deref().unwrap_or_default();
    if !vpc_id.is_empty() && !spec.security_group_ids.is_empty() && !spec.subnet_ids.is_empty() {
        debug!(vpc = vpc_id, subnets = spec.subnet_ids.len(), "binding to existing network");
        return NetworkHandle::Existing(ExistingNetwork {
            vpc_id: vpc_id.to_string(),
            security_group_ids: spec.security_group_ids.clone(),
            subnet_ids: spec.subnet_ids.clone(),
        });
    }

    debug!(cidr = %spec.cidr, subnets = spec.subnets.len(), "synthesizing network");
    let indexed = |kind: ResourceKind| -> Vec<String> {
        (0..spec.subnets.len())
            .map(|i| namer.name(kind, &[&i.to_string()]))
            .collect()
    };
    NetworkHandle::Synthesized(SynthesizedNetwork {
        cidr: spec.cidr.clone(),
        subnet_cidrs: spec.subnets.clone(),
        vpc_id: namer.name(ResourceKind::Vpc, &[]),
        gateway_id: namer.name(ResourceKind::InternetGateway, &[]),
        attachment_id: namer.name(ResourceKind::GatewayAttachment, &[]),
        route_table_id: namer.name(ResourceKind::RouteTable, &[]),
        route_id: namer.name(ResourceKind::Route, &[]),
        subnet_ids: indexed(ResourceKind::Subnet),
        association_ids: indexed(ResourceKind::RouteTableAssociation),
        container_security_group_id: namer.name(ResourceKind::ContainerSecurityGroup, &[]),
        self_ingress_id: namer.name(ResourceKind::SecurityGroupIngressSelf, &[]),
    })
}

impl NetworkHandle {
    /// Value to place wherever a VPC id is expected.
    pub fn vpc_ref(&self) -> Value {
        match self {
            NetworkHandle::Synthesized(net) => reference(&net.vpc_id),
            NetworkHandle::Existing(net) => Value::String(net.vpc_id.clone()),
        }
    }

    pub fn subnet_refs(&self) -> Vec<Value> {
        match self {
            NetworkHandle::Synthesized(net) => net.subnet_ids.iter().map(|id| reference(id)).collect(),
            NetworkHandle::Existing(net) => net.subnet_ids.iter().cloned().map(Value::String).collect(),
        }
    }

    /// Security groups that tasks are placed in.
    pub fn security_group_refs(&self) -> Vec<Value> {
        match self {
            NetworkHandle::Synthesized(net) => vec![reference(&net.container_security_group_id)],
            NetworkHandle::Existing(net) => {
                net.security_group_ids.iter().cloned().map(Value::String).collect()
            }
        }
    }

    /// Logical id of the generated shared container security group, if this
    /// compilation owns one. Front-end security groups are wired into it.
    pub fn container_security_group(&self) -> Option<&str> {
        match self {
            NetworkHandle::Synthesized(net) => Some(net.container_security_group_id.as_str()),
            NetworkHandle::Existing(_) => None,
        }
    }

    /// Task `AssignPublicIp` setting.
    ///
    /// Synthesized subnets route only through the internet gateway, so
    /// tasks there always get a public address or they cannot pull images.
    /// On an existing network the cluster's `public` flag decides.
    pub fn assign_public_ip(&self, public: bool) -> &'static str {
        match self {
            NetworkHandle::Synthesized(_) => "ENABLED",
            NetworkHandle::Existing(_) if public => "ENABLED",
            NetworkHandle::Existing(_) => "DISABLED",
        }
    }

    /// Declarations this network contributes: nothing for an existing
    /// network, the full network plus the cluster container security group
    /// for a synthesized one.
    pub fn generate(&self, tags: &IndexMap<String, String>) -> CompileResult<ResourceGraph> {
        let mut graph = ResourceGraph::new();
        let NetworkHandle::Synthesized(net) = self else {
            return Ok(graph);
        };

        let tags = tag_list(tags);
        let mut vpc = json!({
            "EnableDnsSupport": true,
            "EnableDnsHostnames": true,
            "CidrBlock": net.cidr,
        });
        if let Some(tags) = &tags {
            vpc["Tags"] = tags.clone();
        }
        graph.insert(net.vpc_id.as_str(), Resource::new("AWS::EC2::VPC", vpc))?;
        graph.insert(net.gateway_id.as_str(), Resource::bare("AWS::EC2::InternetGateway"))?;
        graph.insert(
            net.attachment_id.as_str(),
            Resource::new(
                "AWS::EC2::VPCGatewayAttachment",
                json!({
                    "VpcId": reference(&net.vpc_id),
                    "InternetGatewayId": reference(&net.gateway_id),
                }),
            ),
        )?;
        graph.insert(
            net.route_table_id.as_str(),
            Resource::new(
                "AWS::EC2::RouteTable",
                json!({ "VpcId": reference(&net.vpc_id) }),
            ),
        )?;
        graph.insert(
            net.route_id.as_str(),
            Resource::new(
                "AWS::EC2::Route",
                json!({
                    "RouteTableId": reference(&net.route_table_id),
                    "DestinationCidrBlock": "0.0.0.0/0",
                    "GatewayId": reference(&net.gateway_id),
                }),
            )
            .depends_on([net.attachment_id.as_str()]),
        )?;

        for (index, cidr) in net.subnet_cidrs.iter().enumerate() {
            let subnet_id = &net.subnet_ids[index];
            graph.insert(
                subnet_id.as_str(),
                Resource::new(
                    "AWS::EC2::Subnet",
                    json!({
                        "AvailabilityZone": {
                            "Fn::Select": [index, { "Fn::GetAZs": { "Ref": "AWS::Region" } }]
                        },
                        "VpcId": reference(&net.vpc_id),
                        "CidrBlock": cidr,
                        "MapPublicIpOnLaunch": true,
                    }),
                ),
            )?;
            graph.insert(
                net.association_ids[index].as_str(),
                Resource::new(
                    "AWS::EC2::SubnetRouteTableAssociation",
                    json!({
                        "SubnetId": reference(subnet_id),
                        "RouteTableId": reference(&net.route_table_id),
                    }),
                ),
            )?;
        }

        let mut group = json!({
            "GroupDescription": "Access to the Fargate containers",
            "VpcId": reference(&net.vpc_id),
        });
        if let Some(tags) = tags {
            group["Tags"] = tags;
        }
        graph.insert(
            net.container_security_group_id.as_str(),
            Resource::new("AWS::EC2::SecurityGroup", group).delete_on_removal(),
        )?;
        graph.insert(
            net.self_ingress_id.as_str(),
            Resource::new(
                "AWS::EC2::SecurityGroupIngress",
                json!({
                    "Description": "Ingress from other containers in the same security group",
                    "GroupId": reference(&net.container_security_group_id),
                    "IpProtocol": -1,
                    "SourceSecurityGroupId": reference(&net.container_security_group_id),
                }),
            )
            .delete_on_removal(),
        )?;

        Ok(graph)
    }
}
