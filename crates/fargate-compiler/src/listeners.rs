//! Listener and rule aggregation.
//!
//! Every (service, protocol) pair with a resolved port binds to the
//! listener on that port. Bindings are grouped by port in first-seen
//! order; the first binding creates the listener and its default action,
//! later bindings must agree on the protocol and add their certificates. Each binding then expands
//! into one listener rule per path routing entry.

use std::collections::HashMap;

use indexmap::IndexMap;
use serde_json::{Value, json};
use tracing::{debug, warn};

use fargate_core::template::{get_att, join, reference};
use fargate_core::{
    AuthorizerSpec, CompileError, CompileResult, Export, Namer, Output, PathRouting, Protocol,
    Resource, ResourceGraph, ResourceKind, ServiceSpec,
};

use crate::service::ServicePlan;

/// Matches any path.
pub const WILDCARD_PATH: &str = "*";

/// One path pattern with an optional request method filter.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RouteMatch {
    /// Position in the service's routing list.
    pub index: usize,
    pub priority: u32,
    pub path: String,
    pub method: Option<String>,
}

/// Expand a service's path routing into ordered route matches.
///
/// A single pattern becomes one match at the service priority. A list
/// becomes one match per entry with priority `base + i`. No routing (or
/// an empty list) matches every path. Methods `*` and `ANY` mean no filter.
pub fn expand_routes(service: &ServiceSpec) -> Vec<RouteMatch> {
    let base = service.priority();
    match &service.path {
        Some(PathRouting::Single(path)) => vec![RouteMatch {
            index: 0,
            priority: base,
            path: path.clone(),
            method: None,
        }],
        Some(PathRouting::Rules(rules)) if !rules.is_empty() => rules
            .iter()
            .enumerate()
            .map(|(index, rule)| RouteMatch {
                index,
                priority: base.saturating_add(index as u32),
                path: rule.path.clone(),
                method: rule.method.as_deref().and_then(method_filter),
            })
            .collect(),
        _ => vec![RouteMatch {
            index: 0,
            priority: base,
            path: WILDCARD_PATH.to_string(),
            method: None,
        }],
    }
}

/// Number of rules [`expand_routes`] yields for `service`.
pub fn route_count(service: &ServiceSpec) -> usize {
    match &service.path {
        Some(PathRouting::Rules(rules)) if !rules.is_empty() => rules.len(),
        _ => 1,
    }
}

fn method_filter(method: &str) -> Option<String> {
    let method = method.trim();
    if method.is_empty() || method == "*" || method.eq_ignore_ascii_case("ANY") {
        None
    } else {
        Some(method.to_ascii_uppercase())
    }
}

/// A front-end listener shared by every binding on its port.
#[derive(Debug, Clone, PartialEq)]
pub struct Listener {
    pub id: String,
    pub port: u16,
    pub protocol: Protocol,
    pub certificate_arns: Vec<String>,
    /// Target group of the first binding on this port.
    pub default_target_group: String,
}

/// A (service, protocol) pair attached to a listener.
#[derive(Debug, Clone, PartialEq)]
pub struct Binding {
    pub service_index: usize,
    pub service_name: String,
    pub listener_id: String,
    pub endpoint_id: String,
    pub port: u16,
    pub protocol: Protocol,
}

/// One routing rule on a listener.
#[derive(Debug, Clone, PartialEq)]
pub struct ListenerRule {
    pub id: String,
    pub service_index: usize,
    pub listener_id: String,
    pub target_group: String,
    pub route: RouteMatch,
    pub authorizer: Option<AuthorizerSpec>,
}

/// Listeners, bindings and rules of one cluster.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct FrontEndPlan {
    pub listeners: Vec<Listener>,
    pub bindings: Vec<Binding>,
    pub rules: Vec<ListenerRule>,
}

impl FrontEndPlan {
    /// Group every load-balanced service's ports into listeners.
    ///
    /// Fails with [`CompileError::ProtocolCollision`] when two bindings on
    /// the same port declare different protocols. A shared listener carries
    /// the union of its bindings' certificates. Rule priority collisions
    /// on one listener are logged and left to the platform.
    pub fn aggregate(cluster_namer: &Namer, cluster_name: &str, plans: &[ServicePlan<'_>]) -> CompileResult<Self> {
        let mut plan = FrontEndPlan::default();
        let mut by_port: IndexMap<u16, usize> = IndexMap::new();
        let mut priorities: HashMap<(u16, u32), String> = HashMap::new();

        for service in plans {
            let mut rule_counter = 0usize;
            for port in &service.ports {
                let protocol_spec = &service.spec.protocols[port.protocol_index];
                let target_group = service.target_group_id(port);

                let listener_index = match by_port.get(&port.port) {
                    Some(&index) => {
                        let existing = &mut plan.listeners[index];
                        if existing.protocol != port.protocol {
                            return Err(CompileError::ProtocolCollision {
                                cluster: cluster_name.to_string(),
                                service: service.name().to_string(),
                                port: port.port,
                                existing: existing.protocol,
                                requested: port.protocol,
                            });
                        }
                        for arn in &protocol_spec.certificate_arns {
                            if !existing.certificate_arns.contains(arn) {
                                debug!(
                                    listener = %existing.id,
                                    certificate = %arn,
                                    service = %service.name(),
                                    "adding certificate to shared listener"
                                );
                                existing.certificate_arns.push(arn.clone());
                            }
                        }
                        index
                    }
                    None => {
                        let listener = Listener {
                            id: cluster_namer.name(ResourceKind::Listener, &[&port.port.to_string()]),
                            port: port.port,
                            protocol: port.protocol,
                            certificate_arns: protocol_spec.certificate_arns.clone(),
                            default_target_group: target_group.clone(),
                        };
                        debug!(listener = %listener.id, port = port.port, protocol = %port.protocol, "new listener");
                        plan.listeners.push(listener);
                        by_port.insert(port.port, plan.listeners.len() - 1);
                        plan.listeners.len() - 1
                    }
                };
                let listener_id = plan.listeners[listener_index].id.clone();

                let tag = service.protocol_tag(port);
                plan.bindings.push(Binding {
                    service_index: service.index,
                    service_name: service.name().to_string(),
                    listener_id: listener_id.clone(),
                    endpoint_id: service.id(ResourceKind::Endpoint, &tag),
                    port: port.port,
                    protocol: port.protocol,
                });

                for route in expand_routes(service.spec) {
                    if let Some(owner) = priorities.insert((port.port, route.priority), service.name().to_string()) {
                        warn!(
                            cluster = cluster_name,
                            port = port.port,
                            priority = route.priority,
                            first = %owner,
                            second = %service.name(),
                            "listener rule priority used more than once"
                        );
                    }
                    let id = service.id(ResourceKind::ListenerRule, &[rule_counter.to_string()]);
                    rule_counter += 1;
                    plan.rules.push(ListenerRule {
                        id,
                        service_index: service.index,
                        listener_id: listener_id.clone(),
                        target_group: target_group.clone(),
                        route,
                        authorizer: protocol_spec.authorizer.clone(),
                    });
                }
            }
        }

        Ok(plan)
    }

    /// Rule identifiers routing to the service at `service_index`.
    pub fn rule_ids_for(&self, service_index: usize) -> Vec<String> {
        self.rules
            .iter()
            .filter(|rule| rule.service_index == service_index)
            .map(|rule| rule.id.clone())
            .collect()
    }

    /// Listener, rule and endpoint declarations against `load_balancer_id`.
    pub fn generate(&self, load_balancer_id: &str) -> CompileResult<ResourceGraph> {
        let mut graph = ResourceGraph::new();

        for listener in &self.listeners {
            let mut properties = json!({
                "DefaultActions": [{
                    "TargetGroupArn": reference(&listener.default_target_group),
                    "Type": "forward",
                }],
                "LoadBalancerArn": reference(load_balancer_id),
                "Port": listener.port,
                "Protocol": listener.protocol.as_str(),
            });
            if !listener.certificate_arns.is_empty() {
                properties["Certificates"] = listener
                    .certificate_arns
                    .iter()
                    .map(|arn| json!({ "CertificateArn": arn }))
                    .collect();
            }
            graph.insert(
                listener.id.as_str(),
                Resource::new("AWS::ElasticLoadBalancingV2::Listener", properties)
                    .depends_on([load_balancer_id])
                    .delete_on_removal(),
            )?;
        }

        for rule in &self.rules {
            graph.insert(
                rule.id.as_str(),
                Resource::new(
                    "AWS::ElasticLoadBalancingV2::ListenerRule",
                    json!({
                        "Actions": rule_actions(rule),
                        "Conditions": rule_conditions(&rule.route),
                        "ListenerArn": reference(&rule.listener_id),
                        "Priority": rule.route.priority,
                    }),
                ),
            )?;
        }

        for binding in &self.bindings {
            graph.insert_output(
                binding.endpoint_id.as_str(),
                Output {
                    description: format!("{} {} endpoint", binding.service_name, binding.protocol),
                    value: join(
                        "",
                        vec![
                            json!(format!("{}://", binding.protocol.scheme())),
                            get_att(load_balancer_id, "DNSName"),
                            json!(format!(":{}", binding.port)),
                        ],
                    ),
                    export: Export {
                        name: join(
                            "-",
                            vec![json!({ "Ref": "AWS::StackName" }), json!(binding.endpoint_id)],
                        ),
                    },
                },
            )?;
        }

        Ok(graph)
    }
}

fn rule_actions(rule: &ListenerRule) -> Value {
    match &rule.authorizer {
        Some(auth) => json!([
            {
                "Type": "authenticate-cognito",
                "Order": 1,
                "AuthenticateCognitoConfig": {
                    "UserPoolArn": auth.pool_arn,
                    "UserPoolClientId": auth.client_id,
                    "UserPoolDomain": auth.pool_domain,
                },
            },
            {
                "Type": "forward",
                "Order": 2,
                "TargetGroupArn": reference(&rule.target_group),
            },
        ]),
        None => json!([{
            "Type": "forward",
            "TargetGroupArn": reference(&rule.target_group),
        }]),
    }
}

fn rule_conditions(route: &RouteMatch) -> Value {
    let mut conditions = vec![json!({ "Field": "path-pattern", "Values": [route.path] })];
    if let Some(method) = &route.method {
        conditions.push(json!({
            "Field": "http-request-method",
            "HttpRequestMethodConfig": { "Values": [method] },
        }));
    }
    Value::Array(conditions)
}
