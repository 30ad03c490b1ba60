pub mod config;
pub mod error;
pub mod naming;
pub mod template;

pub use config::{
    AuthorizerSpec, AutoScaleSpec, ClusterSpec, ConfigError, NetworkSpec, PathRouting, PathRule,
    PluginConfig, Protocol, ProtocolSpec, ScalingMetric, ServiceSpec,
};
pub use error::{CompileError, CompileResult};
pub use naming::{Namer, ResourceKind, normalize_identifier};
pub use template::{Export, Output, Resource, ResourceGraph};
