//! Logical identifier derivation.
//!
//! Every generated object is keyed by `prefix + kind + Stage + D1 + D2 ...`
//! where the stage and each disambiguator are normalized to CamelCase
//! alphanumerics. The same inputs always yield the same identifier, and
//! service names that differ only in casing or punctuation collapse to
//! the same base.
//!
//! Bounded names are truncated, not hashed, so they stay readable. They
//! only fill physical `Name` properties and never key the graph, so two
//! long names sharing their first `max` characters compile to the same
//! physical name without error. The platform rejects the second one at
//! deploy time.

use std::fmt;

/// Platform limit for load balancer and target group physical names.
pub const MAX_PHYSICAL_NAME_LEN: usize = 32;

/// Resource kind component of a logical identifier.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ResourceKind {
    Cluster,
    ContainerSecurityGroup,
    SecurityGroupIngressSelf,
    LoadBalancer,
    LoadBalancerSecurityGroup,
    LoadBalancerIngress,
    Listener,
    ListenerRule,
    Vpc,
    Subnet,
    InternetGateway,
    GatewayAttachment,
    RouteTable,
    Route,
    RouteTableAssociation,
    Service,
    TaskDefinition,
    TargetGroup,
    LogGroup,
    ExecutionRole,
    AutoScalingRole,
    AutoScalingTarget,
    AutoScalingPolicy,
    Endpoint,
}

impl ResourceKind {
    pub fn suffix(&self) -> &'static str {
        match self {
            ResourceKind::Cluster => "Cluster",
            ResourceKind::ContainerSecurityGroup => "ContainerSecGroup",
            ResourceKind::SecurityGroupIngressSelf => "SecGroupIngressSelf",
            ResourceKind::LoadBalancer => "ALB",
            ResourceKind::LoadBalancerSecurityGroup => "ALBSecGroup",
            ResourceKind::LoadBalancerIngress => "ALBSecGroupIngress",
            ResourceKind::Listener => "ALBListener",
            ResourceKind::ListenerRule => "ALBListenerRule",
            ResourceKind::Vpc => "VPC",
            ResourceKind::Subnet => "Subnet",
            ResourceKind::InternetGateway => "InternetGateway",
            ResourceKind::GatewayAttachment => "GatewayAttachment",
            ResourceKind::RouteTable => "PublicRouteTable",
            ResourceKind::Route => "PublicRoute",
            ResourceKind::RouteTableAssociation => "SubnetRouteTableAssociation",
            ResourceKind::Service => "Service",
            ResourceKind::TaskDefinition => "TDef",
            ResourceKind::TargetGroup => "TGroup",
            ResourceKind::LogGroup => "LogGroup",
            ResourceKind::ExecutionRole => "ExecutionRole",
            ResourceKind::AutoScalingRole => "ASRole",
            ResourceKind::AutoScalingTarget => "ASTarget",
            ResourceKind::AutoScalingPolicy => "ASPolicy",
            ResourceKind::Endpoint => "Endpoint",
        }
    }
}

impl fmt::Display for ResourceKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.suffix())
    }
}

/// Normalize free text into a CamelCase alphanumeric identifier.
///
/// Lowercases, splits on every run of non-alphanumeric characters, drops
/// empty pieces, capitalizes each piece and concatenates:
/// `"Web App!"` becomes `"WebApp"`, `"web_app"` becomes `"WebApp"`.
pub fn normalize_identifier(raw: &str) -> String {
    raw.to_ascii_lowercase()
        .split(|c: char| !c.is_ascii_alphanumeric())
        .filter(|piece| !piece.is_empty())
        .map(capitalize)
        .collect()
}

fn capitalize(piece: &str) -> String {
    let mut chars = piece.chars();
    match chars.next() {
        Some(first) => first.to_ascii_uppercase().to_string() + chars.as_str(),
        None => String::new(),
    }
}

/// Derives identifiers for one naming scope (a cluster, or a service
/// inside a cluster).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Namer {
    prefix: Option<String>,
    stage: String,
}

impl Namer {
    pub fn new(prefix: Option<&str>, stage: &str) -> Self {
        Self::from_parts(
            prefix.map(normalize_identifier).unwrap_or_default(),
            normalize_identifier(stage),
        )
    }

    /// Cluster scope: optional user prefix followed by the cluster name.
    pub fn for_cluster(cluster_name: &str, name_prefix: Option<&str>, stage: &str) -> Self {
        let prefix = format!(
            "{}{}",
            name_prefix.map(normalize_identifier).unwrap_or_default(),
            normalize_identifier(cluster_name)
        );
        Self::from_parts(prefix, normalize_identifier(stage))
    }

    /// Nested scope whose prefix extends this one with `base`.
    pub fn child(&self, base: &str) -> Self {
        let prefix = format!("{}{}", self.prefix(), normalize_identifier(base));
        Self::from_parts(prefix, self.stage.clone())
    }

    fn from_parts(prefix: String, stage: String) -> Self {
        Self {
            prefix: (!prefix.is_empty()).then_some(prefix),
            stage,
        }
    }

    pub fn prefix(&self) -> &str {
        self.prefix.as_deref().unwrap_or_default()
    }

    pub fn stage(&self) -> &str {
        &self.stage
    }

    pub fn name(&self, kind: ResourceKind, disambiguators: &[&str]) -> String {
        let mut name = String::with_capacity(64);
        name.push_str(self.prefix());
        name.push_str(kind.suffix());
        name.push_str(&self.stage);
        for d in disambiguators {
            name.push_str(&normalize_identifier(d));
        }
        name
    }

    /// Same as [`Namer::name`], truncated to at most `max` characters.
    pub fn bounded_name(&self, kind: ResourceKind, disambiguators: &[&str], max: usize) -> String {
        let mut name = self.name(kind, disambiguators);
        name.truncate(max);
        name
    }
}
