//! The VerticaDB custom resource
//!
//! The spec is the declared state of the cluster. The status holds the
//! per-subcluster counters the operator persisted in earlier passes; those
//! counters seed the pod facts for pods that can't be probed right now.

use crate::names::VERSION_ANNOTATION;
use crate::paths::INSTALLER_INDICATOR_FILE;
use crate::version::VersionInfo;
use kube::{CustomResource, ResourceExt};
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};
use std::fmt;

/// Condition type recording whether automatic restart is enabled
pub const AUTO_RESTART_VERTICA_CONDITION: &str = "AutoRestartVertica";

/// VerticaDB is the schema for the verticadbs API
#[derive(CustomResource, Serialize, Deserialize, Clone, Debug, Default, JsonSchema)]
#[kube(
    group = "vertica.com",
    version = "v1beta1",
    kind = "VerticaDB",
    plural = "verticadbs",
    shortname = "vdb",
    namespaced,
    status = "VerticaDBStatus",
    printcolumn = r#"{"name":"Subclusters", "type":"integer", "jsonPath":".status.subclusterCount"}"#,
    printcolumn = r#"{"name":"Age", "type":"date", "jsonPath":".metadata.creationTimestamp"}"#
)]
#[serde(rename_all = "camelCase")]
pub struct VerticaDBSpec {
    /// Vertica server image
    #[serde(default)]
    pub image: String,

    /// Name of the database
    #[serde(default = "default_db_name")]
    pub db_name: String,

    /// How the database gets initialized
    #[serde(default)]
    pub init_policy: InitPolicy,

    /// When false the operator never restarts Vertica processes
    #[serde(default = "default_true")]
    pub auto_restart_vertica: bool,

    #[serde(default)]
    pub k_safety: KSafety,

    #[serde(default)]
    pub subclusters: Vec<Subcluster>,

    /// Order in which pods are handed to revive. Pods not mentioned are
    /// appended in subcluster and pod index order.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub revive_order: Vec<SubclusterPodCount>,

    /// Ignore the cluster lease held by another instance when reviving
    #[serde(default)]
    pub ignore_cluster_lease: bool,

    #[serde(default)]
    pub communal: CommunalStorage,

    #[serde(default)]
    pub local: LocalStorage,

    #[serde(default = "default_shard_count")]
    pub shard_count: i32,

    #[serde(default)]
    pub http_server_mode: HttpServerMode,

    /// Secret with the tls.crt, tls.key and ca.crt used by the https server
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub http_server_secret: String,
}

fn default_db_name() -> String {
    "vertdb".to_string()
}

fn default_true() -> bool {
    true
}

fn default_shard_count() -> i32 {
    6
}

#[derive(Serialize, Deserialize, Clone, Copy, Debug, Default, PartialEq, Eq, JsonSchema)]
pub enum InitPolicy {
    /// Create a new database
    #[default]
    Create,
    /// Revive a database from communal storage
    Revive,
    /// Only schedule the pods. Install and database creation happen outside
    /// of the operator.
    ScheduleOnly,
}

#[derive(Serialize, Deserialize, Clone, Copy, Debug, Default, PartialEq, Eq, JsonSchema)]
pub enum KSafety {
    #[serde(rename = "0")]
    Zero,
    #[default]
    #[serde(rename = "1")]
    One,
}

#[derive(Serialize, Deserialize, Clone, Copy, Debug, Default, PartialEq, Eq, JsonSchema)]
pub enum HttpServerMode {
    Enabled,
    #[default]
    Disabled,
    Auto,
}

#[derive(Serialize, Deserialize, Clone, Debug, Default, PartialEq, Eq, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct Subcluster {
    pub name: String,
    #[serde(default)]
    pub size: i32,
    #[serde(default = "default_true")]
    pub is_primary: bool,
}

impl Subcluster {
    /// Subcluster name in a form usable in Kubernetes object names
    pub fn k8s_name(&self) -> String {
        self.name.replace('_', "-").to_lowercase()
    }
}

#[derive(Serialize, Deserialize, Clone, Debug, Default, PartialEq, Eq, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct SubclusterPodCount {
    pub subcluster_index: i32,
    /// Zero or less means every remaining pod of the subcluster
    #[serde(default)]
    pub pod_count: i32,
}

#[derive(Serialize, Deserialize, Clone, Debug, Default, PartialEq, Eq, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct CommunalStorage {
    /// Communal path. A non-empty path makes this an Eon mode database.
    #[serde(default)]
    pub path: String,
    #[serde(default)]
    pub endpoint: String,
    #[serde(default)]
    pub region: String,
    #[serde(default)]
    pub include_uid_in_path: bool,
}

#[derive(Serialize, Deserialize, Clone, Debug, PartialEq, Eq, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct LocalStorage {
    #[serde(default = "default_data_path")]
    pub data_path: String,
    #[serde(default = "default_depot_path")]
    pub depot_path: String,
    /// Defaults to the data path when empty
    #[serde(default)]
    pub catalog_path: String,
}

fn default_data_path() -> String {
    "/data".to_string()
}

fn default_depot_path() -> String {
    "/depot".to_string()
}

impl Default for LocalStorage {
    fn default() -> Self {
        Self {
            data_path: default_data_path(),
            depot_path: default_depot_path(),
            catalog_path: String::new(),
        }
    }
}

impl LocalStorage {
    pub fn get_catalog_path(&self) -> &str {
        if self.catalog_path.is_empty() {
            &self.data_path
        } else {
            &self.catalog_path
        }
    }
}

#[derive(Serialize, Deserialize, Clone, Debug, Default, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct VerticaDBStatus {
    #[serde(default)]
    pub subcluster_count: i32,
    #[serde(default)]
    pub subclusters: Vec<SubclusterStatus>,
    #[serde(default)]
    pub conditions: Vec<VerticaDBCondition>,
}

#[derive(Serialize, Deserialize, Clone, Debug, Default, PartialEq, Eq, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct SubclusterStatus {
    pub name: String,
    #[serde(default)]
    pub oid: String,
    /// Number of pods, counted from index 0, that have an installation
    #[serde(default)]
    pub install_count: i32,
    /// Number of pods, counted from index 0, that were added to the database
    #[serde(default)]
    pub added_to_db_count: i32,
    #[serde(default)]
    pub up_node_count: i32,
    #[serde(default)]
    pub detail: Vec<VerticaDBPodStatus>,
}

#[derive(Serialize, Deserialize, Clone, Debug, Default, PartialEq, Eq, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct VerticaDBPodStatus {
    #[serde(default)]
    pub installed: bool,
    #[serde(default)]
    pub added_to_db: bool,
    #[serde(default)]
    pub vnode_name: String,
    #[serde(default)]
    pub up_node: bool,
    #[serde(default)]
    pub read_only: bool,
}

#[derive(Serialize, Deserialize, Clone, Copy, Debug, PartialEq, Eq, JsonSchema)]
pub enum ConditionStatus {
    True,
    False,
    Unknown,
}

impl fmt::Display for ConditionStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ConditionStatus::True => write!(f, "True"),
            ConditionStatus::False => write!(f, "False"),
            ConditionStatus::Unknown => write!(f, "Unknown"),
        }
    }
}

#[derive(Serialize, Deserialize, Clone, Debug, PartialEq, Eq, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct VerticaDBCondition {
    #[serde(rename = "type")]
    pub type_: String,
    pub status: ConditionStatus,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_transition_time: Option<String>,
}

impl VerticaDBCondition {
    pub fn new(type_: impl Into<String>, status: ConditionStatus) -> Self {
        Self {
            type_: type_.into(),
            status,
            last_transition_time: None,
        }
    }
}

impl VerticaDB {
    /// Status counters for the named subcluster, if any were persisted
    pub fn find_subcluster_status(&self, sc_name: &str) -> Option<&SubclusterStatus> {
        self.status
            .as_ref()?
            .subclusters
            .iter()
            .find(|s| s.name == sc_name)
    }

    pub fn find_condition(&self, type_: &str) -> Option<&VerticaDBCondition> {
        self.status
            .as_ref()?
            .conditions
            .iter()
            .find(|c| c.type_ == type_)
    }

    /// Set a condition in the status, returning true if anything changed
    pub fn set_condition(&mut self, mut cond: VerticaDBCondition) -> bool {
        let status = self.status.get_or_insert_with(Default::default);
        match status.conditions.iter_mut().find(|c| c.type_ == cond.type_) {
            Some(existing) if existing.status == cond.status => false,
            Some(existing) => {
                cond.last_transition_time = Some(chrono::Utc::now().to_rfc3339());
                *existing = cond;
                true
            }
            None => {
                cond.last_transition_time = Some(chrono::Utc::now().to_rfc3339());
                status.conditions.push(cond);
                true
            }
        }
    }

    /// An Eon mode database keeps its data in communal storage
    pub fn is_eon(&self) -> bool {
        !self.spec.communal.path.is_empty()
    }

    /// Version of the server, taken from the version annotation
    pub fn version_info(&self) -> Option<VersionInfo> {
        self.annotations()
            .get(VERSION_ANNOTATION)
            .and_then(|v| VersionInfo::parse(v))
    }

    pub fn instance_uid(&self) -> String {
        ResourceExt::uid(self).unwrap_or_default()
    }

    /// Path of the install indicator. The UID tells this instance of the
    /// VerticaDB apart from an earlier one that left state on the same PV.
    pub fn installer_indicator_file_name(&self) -> String {
        format!("{}{}", INSTALLER_INDICATOR_FILE, self.instance_uid())
    }

    pub fn communal_path(&self) -> String {
        let path = self.spec.communal.path.trim_end_matches('/');
        if self.spec.communal.include_uid_in_path {
            format!("{}/{}", path, self.instance_uid())
        } else {
            path.to_string()
        }
    }

    pub fn is_http_server_enabled(&self) -> bool {
        matches!(
            self.spec.http_server_mode,
            HttpServerMode::Enabled | HttpServerMode::Auto
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testutil::make_vdb;

    #[test]
    fn test_spec_defaults_from_json() {
        let spec: VerticaDBSpec = serde_json::from_value(serde_json::json!({
            "subclusters": [{"name": "sc1", "size": 3}],
            "kSafety": "0",
            "initPolicy": "Revive"
        }))
        .unwrap();

        assert_eq!(spec.db_name, "vertdb");
        assert!(spec.auto_restart_vertica);
        assert_eq!(spec.k_safety, KSafety::Zero);
        assert_eq!(spec.init_policy, InitPolicy::Revive);
        assert!(spec.subclusters[0].is_primary);
        assert_eq!(spec.local.get_catalog_path(), "/data");
    }

    #[test]
    fn test_set_condition_only_changes_on_transition() {
        let mut vdb = make_vdb();
        let cond = VerticaDBCondition::new(AUTO_RESTART_VERTICA_CONDITION, ConditionStatus::True);

        assert!(vdb.set_condition(cond.clone()));
        assert!(!vdb.set_condition(cond));
        assert!(vdb.set_condition(VerticaDBCondition::new(
            AUTO_RESTART_VERTICA_CONDITION,
            ConditionStatus::False
        )));
        assert_eq!(
            vdb.find_condition(AUTO_RESTART_VERTICA_CONDITION)
                .map(|c| c.status),
            Some(ConditionStatus::False)
        );
    }

    #[test]
    fn test_communal_path_with_uid() {
        let mut vdb = make_vdb();
        vdb.spec.communal.path = "s3://bucket/db/".to_string();
        vdb.spec.communal.include_uid_in_path = true;

        assert!(vdb.is_eon());
        assert_eq!(vdb.communal_path(), "s3://bucket/db/abcdef-1234");
        assert_eq!(
            vdb.installer_indicator_file_name(),
            "/opt/vertica/config/share/vertica-k8s-installed-abcdef-1234"
        );
    }
}
