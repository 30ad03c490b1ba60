//! Errors raised while compiling a cluster into a resource graph.

use thiserror::Error;

use crate::config::Protocol;

/// Result type alias for compilation.
pub type CompileResult<T> = Result<T, CompileError>;

/// Compilation failures. All are fatal for the cluster being compiled:
/// there is nothing transient to retry, only input to fix.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum CompileError {
    #[error("service {service} on cluster {cluster}: certificate ARN required for HTTPS")]
    HttpsWithoutCertificate { cluster: String, service: String },

    #[error(
        "service {service} on cluster {cluster}, protocol {requested} is colliding with \
         protocol {existing} of a different service on port {port}"
    )]
    ProtocolCollision {
        cluster: String,
        service: String,
        port: u16,
        existing: Protocol,
        requested: Protocol,
    },

    #[error("service name {name:?} on cluster {cluster} has no alphanumeric characters")]
    EmptyServiceName { cluster: String, name: String },

    #[error("service {service} on cluster {cluster}: autoscaling min {min} exceeds max {max}")]
    InvalidAutoScaleBounds {
        cluster: String,
        service: String,
        min: u32,
        max: u32,
    },

    #[error(
        "service {service} on cluster {cluster}: metric ALBRequestCountPerTarget \
         requires a load balanced service"
    )]
    RequestCountWithoutLoadBalancer { cluster: String, service: String },

    #[error(
        "service {service} on cluster {cluster}: priority {priority} with {rules} rule(s) \
         leaves the listener rule range 1..=50000"
    )]
    InvalidPriority {
        cluster: String,
        service: String,
        priority: u32,
        rules: usize,
    },

    #[error("service {service} on cluster {cluster}: no image, imageRepository, or cluster imageRepository")]
    MissingImage { cluster: String, service: String },

    #[error("logical id {0} is generated more than once")]
    DuplicateLogicalId(String),

    #[error("{from} references {target}, which is not declared in the graph")]
    DanglingReference { from: String, target: String },

    #[error("host template is malformed: {0}")]
    MalformedTemplate(String),
}
