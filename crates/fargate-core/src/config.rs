//! Cluster configuration types and `fargate.toml` / `fargate.json` loading.
//!
//! Field names follow the camelCase option keys users already write in
//! their deployment documents (`clusterName`, `disableELB`, `autoScale`).
//! Optional fields stay optional here; defaults are applied through the
//! accessor methods so the parsed document is never mutated.

use std::fmt;
use std::path::{Path, PathBuf};

use indexmap::IndexMap;
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Default desired task count for a service.
pub const DEFAULT_DESIRED_COUNT: u32 = 1;
/// Default listener rule priority for a service.
pub const DEFAULT_PRIORITY: u32 = 1;
/// Highest priority a listener rule may carry.
pub const MAX_RULE_PRIORITY: u32 = 50_000;
/// Default target group health check interval, in seconds.
pub const DEFAULT_HEALTH_CHECK_INTERVAL: u32 = 6;
/// Default target group health check path.
pub const DEFAULT_HEALTH_CHECK_PATH: &str = "/";
/// Default target group health check protocol.
pub const DEFAULT_HEALTH_CHECK_PROTOCOL: &str = "HTTP";
/// Default load balancer idle timeout, in seconds.
pub const DEFAULT_IDLE_TIMEOUT: u32 = 30;
/// Default autoscaling cooldown, in seconds.
pub const DEFAULT_COOLDOWN: u32 = 30;
/// Default autoscaling capacity bound.
pub const DEFAULT_CAPACITY: u32 = 1;
/// Default image tag when only a repository is given.
pub const DEFAULT_IMAGE_TAG: &str = "latest";

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to read {}: {source}", path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("invalid TOML: {0}")]
    Toml(#[from] toml::de::Error),
    #[error("invalid JSON: {0}")]
    Json(#[from] serde_json::Error),
}

/// Top-level document: every cluster compiled for one stage.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PluginConfig {
    #[serde(default)]
    pub clusters: Vec<ClusterSpec>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ClusterSpec {
    pub cluster_name: String,
    /// Prepended to every generated identifier of this cluster.
    #[serde(default)]
    pub name_prefix: Option<String>,
    #[serde(default)]
    pub vpc: NetworkSpec,
    /// Internet-facing load balancer. On an existing network, also public
    /// task IPs; tasks in a synthesized network always get one.
    #[serde(default)]
    pub public: bool,
    #[serde(default, rename = "disableELB")]
    pub disable_elb: bool,
    /// Externally managed execution role; a shared one is generated when absent.
    #[serde(default)]
    pub execution_role_arn: Option<String>,
    /// Repository used by services that don't name their own.
    #[serde(default)]
    pub image_repository: Option<String>,
    /// Load balancer idle timeout in seconds.
    #[serde(default)]
    pub timeout: Option<u32>,
    #[serde(default)]
    pub tags: IndexMap<String, String>,
    #[serde(default)]
    pub services: Vec<ServiceSpec>,
}

impl ClusterSpec {
    pub fn idle_timeout(&self) -> u32 {
        self.timeout.unwrap_or(DEFAULT_IDLE_TIMEOUT)
    }
}

/// Network reference: an inline address plan, or identifiers of a
/// network that already exists.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NetworkSpec {
    #[serde(default)]
    pub cidr: String,
    #[serde(default)]
    pub subnets: Vec<String>,
    #[serde(default)]
    pub vpc_id: Option<String>,
    #[serde(default)]
    pub security_group_ids: Vec<String>,
    #[serde(default)]
    pub subnet_ids: Vec<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ServiceSpec {
    pub name: String,
    pub cpu: u32,
    pub memory: u32,
    /// Container port. Pins the first protocol's port; random otherwise.
    #[serde(default)]
    pub port: Option<u16>,
    #[serde(default)]
    pub entry_point: Option<Vec<String>>,
    #[serde(default)]
    pub environment: IndexMap<String, String>,
    #[serde(default)]
    pub protocols: Vec<ProtocolSpec>,
    /// Full image reference; wins over `image_repository`/`image_tag`.
    #[serde(default)]
    pub image: Option<String>,
    #[serde(default)]
    pub image_repository: Option<String>,
    #[serde(default)]
    pub image_tag: Option<String>,
    #[serde(default)]
    pub priority: Option<u32>,
    #[serde(default)]
    pub path: Option<PathRouting>,
    #[serde(default)]
    pub desired_count: Option<u32>,
    #[serde(default, rename = "disableELB")]
    pub disable_elb: bool,
    #[serde(default)]
    pub auto_scale: Option<AutoScaleSpec>,
    #[serde(default)]
    pub task_role_arn: Option<String>,
    #[serde(default)]
    pub health_check_uri: Option<String>,
    #[serde(default)]
    pub health_check_protocol: Option<String>,
    #[serde(default)]
    pub health_check_interval: Option<u32>,
    #[serde(default)]
    pub log_retention_days: Option<u32>,
}

impl ServiceSpec {
    pub fn desired_count(&self) -> u32 {
        self.desired_count.unwrap_or(DEFAULT_DESIRED_COUNT)
    }

    pub fn priority(&self) -> u32 {
        self.priority.unwrap_or(DEFAULT_PRIORITY)
    }

    pub fn health_check_interval(&self) -> u32 {
        self.health_check_interval
            .unwrap_or(DEFAULT_HEALTH_CHECK_INTERVAL)
    }

    /// Resolve the container image, falling back to the cluster repository.
    ///
    /// Returns `None` when neither the service nor the cluster names one.
    pub fn image_reference(&self, cluster_repository: Option<&str>) -> Option<String> {
        if let Some(image) = &self.image {
            return Some(image.clone());
        }
        let repository = self
            .image_repository
            .as_deref()
            .or(cluster_repository)?;
        let tag = self.image_tag.as_deref().unwrap_or(DEFAULT_IMAGE_TAG);
        Some(format!("{repository}:{}-{tag}", self.name))
    }
}

/// Front-end protocol. Closed set.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum Protocol {
    Http,
    Https,
}

impl Protocol {
    pub fn as_str(&self) -> &'static str {
        match self {
            Protocol::Http => "HTTP",
            Protocol::Https => "HTTPS",
        }
    }

    /// URL scheme used for exported endpoints.
    pub fn scheme(&self) -> &'static str {
        match self {
            Protocol::Http => "http",
            Protocol::Https => "https",
        }
    }
}

impl fmt::Display for Protocol {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ProtocolSpec {
    pub protocol: Protocol,
    /// Required (non-empty) for HTTPS.
    #[serde(default)]
    pub certificate_arns: Vec<String>,
    /// Cognito authentication in front of the service. HTTPS only.
    #[serde(default)]
    pub authorizer: Option<AuthorizerSpec>,
    #[serde(default)]
    pub health_check_uri: Option<String>,
    #[serde(default)]
    pub health_check_protocol: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AuthorizerSpec {
    pub pool_arn: String,
    pub client_id: String,
    pub pool_domain: String,
}

/// Path routing: one pattern, or an ordered list of pattern/method pairs.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum PathRouting {
    Single(String),
    Rules(Vec<PathRule>),
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PathRule {
    pub path: String,
    #[serde(default)]
    pub method: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AutoScaleSpec {
    #[serde(default)]
    pub min: Option<u32>,
    #[serde(default)]
    pub max: Option<u32>,
    pub metric: ScalingMetric,
    /// Shared cooldown; `cooldown_in`/`cooldown_out` take precedence.
    #[serde(default)]
    pub cooldown: Option<u32>,
    #[serde(default)]
    pub cooldown_in: Option<u32>,
    #[serde(default)]
    pub cooldown_out: Option<u32>,
    pub target_value: f64,
}

impl AutoScaleSpec {
    pub fn min_capacity(&self) -> u32 {
        self.min.unwrap_or(DEFAULT_CAPACITY)
    }

    pub fn max_capacity(&self) -> u32 {
        self.max.unwrap_or(DEFAULT_CAPACITY)
    }

    pub fn scale_in_cooldown(&self) -> u32 {
        self.cooldown_in
            .or(self.cooldown)
            .unwrap_or(DEFAULT_COOLDOWN)
    }

    pub fn scale_out_cooldown(&self) -> u32 {
        self.cooldown_out
            .or(self.cooldown)
            .unwrap_or(DEFAULT_COOLDOWN)
    }
}

/// Predefined target-tracking metrics.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ScalingMetric {
    #[serde(rename = "ALBRequestCountPerTarget")]
    AlbRequestCountPerTarget,
    AppStreamAverageCapacityUtilization,
    ComprehendInferenceUtilization,
    DynamoDBReadCapacityUtilization,
    DynamoDBWriteCapacityUtilization,
    #[serde(rename = "EC2SpotFleetRequestAverageCPUUtilization")]
    Ec2SpotFleetRequestAverageCpuUtilization,
    #[serde(rename = "EC2SpotFleetRequestAverageNetworkIn")]
    Ec2SpotFleetRequestAverageNetworkIn,
    #[serde(rename = "EC2SpotFleetRequestAverageNetworkOut")]
    Ec2SpotFleetRequestAverageNetworkOut,
    #[serde(rename = "ECSServiceAverageCPUUtilization")]
    EcsServiceAverageCpuUtilization,
    #[serde(rename = "ECSServiceAverageMemoryUtilization")]
    EcsServiceAverageMemoryUtilization,
    LambdaProvisionedConcurrencyUtilization,
    #[serde(rename = "RDSReaderAverageCPUUtilization")]
    RdsReaderAverageCpuUtilization,
    #[serde(rename = "RDSReaderAverageDatabaseConnections")]
    RdsReaderAverageDatabaseConnections,
    SageMakerVariantInvocationsPerInstance,
}

impl ScalingMetric {
    pub fn as_str(&self) -> &'static str {
        match self {
            ScalingMetric::AlbRequestCountPerTarget => "ALBRequestCountPerTarget",
            ScalingMetric::AppStreamAverageCapacityUtilization => {
                "AppStreamAverageCapacityUtilization"
            }
            ScalingMetric::ComprehendInferenceUtilization => "ComprehendInferenceUtilization",
            ScalingMetric::DynamoDBReadCapacityUtilization => "DynamoDBReadCapacityUtilization",
            ScalingMetric::DynamoDBWriteCapacityUtilization => "DynamoDBWriteCapacityUtilization",
            ScalingMetric::Ec2SpotFleetRequestAverageCpuUtilization => {
                "EC2SpotFleetRequestAverageCPUUtilization"
            }
            ScalingMetric::Ec2SpotFleetRequestAverageNetworkIn => {
                "EC2SpotFleetRequestAverageNetworkIn"
            }
            ScalingMetric::Ec2SpotFleetRequestAverageNetworkOut => {
                "EC2SpotFleetRequestAverageNetworkOut"
            }
            ScalingMetric::EcsServiceAverageCpuUtilization => "ECSServiceAverageCPUUtilization",
            ScalingMetric::EcsServiceAverageMemoryUtilization => {
                "ECSServiceAverageMemoryUtilization"
            }
            ScalingMetric::LambdaProvisionedConcurrencyUtilization => {
                "LambdaProvisionedConcurrencyUtilization"
            }
            ScalingMetric::RdsReaderAverageCpuUtilization => "RDSReaderAverageCPUUtilization",
            ScalingMetric::RdsReaderAverageDatabaseConnections => {
                "RDSReaderAverageDatabaseConnections"
            }
            ScalingMetric::SageMakerVariantInvocationsPerInstance => {
                "SageMakerVariantInvocationsPerInstance"
            }
        }
    }

    /// Whether the metric is scoped to one load balancer target group.
    pub fn needs_target_group(&self) -> bool {
        matches!(self, ScalingMetric::AlbRequestCountPerTarget)
    }
}

impl fmt::Display for ScalingMetric {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl PluginConfig {
    /// Load a config file. `.json` files are read as JSON, anything else as TOML.
    pub fn from_file(path: &Path) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path).map_err(|source| ConfigError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        match path.extension().and_then(|e| e.to_str()) {
            Some("json") => Self::from_json_str(&content),
            _ => Self::from_toml_str(&content),
        }
    }

    pub fn from_toml_str(content: &str) -> Result<Self, ConfigError> {
        Ok(toml::from_str(content)?)
    }

    pub fn from_json_str(content: &str) -> Result<Self, ConfigError> {
        Ok(serde_json::from_str(content)?)
    }
}
