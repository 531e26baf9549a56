//! Admin commands run against the database cluster
//!
//! Every command is issued from an initiator pod. The options carry only
//! what the command needs; how it is run (admintools, a REST API) is up
//! to the implementation.

use crate::error::Result;
use crate::names::NamespacedName;
use crate::vdb::VerticaDB;
use crate::verdict::Verdict;
use async_trait::async_trait;
use std::collections::{BTreeMap, HashMap};

/// Node state reported for a vnode that is up
pub const STATE_UP: &str = "UP";

/// Pod that runs the admin command
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Initiator {
    pub pod: NamespacedName,
    pub ip: String,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct VnodeHost {
    pub vnode: String,
    pub ip: String,
}

#[derive(Debug, Clone, Default)]
pub struct FetchNodeStateOpts {
    pub initiator: Initiator,
    pub hosts: Vec<VnodeHost>,
}

#[derive(Debug, Clone, Default)]
pub struct RestartNodeOpts {
    pub initiator: Initiator,
    pub hosts: Vec<VnodeHost>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReIpHost {
    pub vnode: String,
    /// Node name admintools assigned at install time
    pub compat21_node_name: String,
    pub ip: String,
}

#[derive(Debug, Clone, Default)]
pub struct ReIpOpts {
    pub initiator: Initiator,
    pub hosts: Vec<ReIpHost>,
}

#[derive(Debug, Clone, Default)]
pub struct StartDbOpts {
    pub initiator: Initiator,
    pub hosts: Vec<String>,
}

#[derive(Debug, Clone, Default)]
pub struct ReviveDbOpts {
    pub initiator: NamespacedName,
    pub hosts: Vec<String>,
    pub db_name: String,
    pub communal_path: Option<String>,
    /// Path in the pod of the communal storage auth parameters
    pub communal_storage_params: Option<String>,
    pub config_params: BTreeMap<String, String>,
    pub ignore_cluster_lease: bool,
}

#[derive(Debug, Clone, Default)]
pub struct DescribeDbOpts {
    pub initiator: NamespacedName,
    pub db_name: String,
    pub communal_path: String,
    pub communal_storage_params: String,
    pub config_params: BTreeMap<String, String>,
}

#[async_trait]
pub trait Dispatcher: Send + Sync {
    /// Cluster view of node states keyed by vnode name
    async fn fetch_node_state(
        &self,
        vdb: &VerticaDB,
        opts: &FetchNodeStateOpts,
    ) -> Result<(HashMap<String, String>, Verdict)>;

    async fn restart_node(&self, vdb: &VerticaDB, opts: &RestartNodeOpts) -> Result<Verdict>;

    async fn re_ip(&self, vdb: &VerticaDB, opts: &ReIpOpts) -> Result<Verdict>;

    async fn start_db(&self, vdb: &VerticaDB, opts: &StartDbOpts) -> Result<Verdict>;

    async fn revive_db(&self, vdb: &VerticaDB, opts: &ReviveDbOpts) -> Result<Verdict>;

    /// Describe the database in communal storage without reviving it.
    /// Returns the raw description for the revive planner.
    async fn describe_db(
        &self,
        vdb: &VerticaDB,
        opts: &DescribeDbOpts,
    ) -> Result<(String, Verdict)>;
}
