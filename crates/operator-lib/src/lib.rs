//! Control-loop core of the VerticaDB operator
//!
//! This crate provides:
//! - The pod fact model gathered from the cluster and from inside each pod
//! - Install, revive and restart decision engines
//! - Collaborator traits for the Kubernetes API, pod exec and admintools
//! - Health checks and observability

pub mod atconf;
pub mod dispatcher;
pub mod error;
pub mod events;
pub mod exec;
pub mod health;
pub mod httpconf;
pub mod initializer;
pub mod install;
pub mod names;
pub mod observability;
pub mod paths;
pub mod platform;
pub mod pod_setup;
pub mod podfacts;
pub mod reconciler;
pub mod restart;
pub mod revive;
pub mod reviveplanner;
pub mod vdb;
pub mod verdict;
pub mod version;

#[cfg(test)]
pub(crate) mod testutil;

pub use error::{PlatformError, ReconcileError, Result};
pub use health::{
    ComponentHealth, ComponentStatus, HealthRegistry, HealthResponse, ReadinessResponse,
};
pub use install::InstallReconciler;
pub use names::NamespacedName;
pub use observability::{OperatorMetrics, StructuredLogger};
pub use podfacts::{PodFact, PodFacts};
pub use reconciler::{ReconcileActor, ReconcileContext};
pub use restart::RestartReconciler;
pub use revive::ReviveReconciler;
pub use vdb::VerticaDB;
pub use verdict::Verdict;
