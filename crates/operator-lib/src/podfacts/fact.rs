use crate::names::NamespacedName;
use crate::paths::{AGENT_CERT_FILE, AGENT_KEY_FILE, VERTICA_API_KEYS_FILE};
use serde::{Deserialize, Deserializer, Serialize};
use std::collections::HashMap;

/// Observed state of one pod at the time the facts were collected.
///
/// Fields whose precondition wasn't met keep their default value, e.g. every
/// probe derived field stays false/empty when the pod isn't running.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct PodFact {
    pub name: NamespacedName,
    /// Index of the pod within its subcluster, 0 is the first pod
    pub pod_index: i32,
    pub dns_name: String,
    pub pod_ip: String,
    pub subcluster_name: String,
    pub subcluster_oid: String,
    pub is_primary: bool,
    /// Image the server container is running
    pub image: String,

    /// Pod exists in the API server
    pub exists: bool,
    pub is_pod_running: bool,
    /// The statefulset has enough replicas to own this pod, even if the pod
    /// hasn't been created yet
    pub managed_by_parent: bool,
    /// Pod index is beyond the declared subcluster size
    pub pending_delete: bool,
    /// Pod belongs to the temporary subcluster used during online upgrade
    pub is_transient: bool,
    pub sts_revision_pending: bool,
    /// Pod carries the annotations that seed the DC tables at startup
    pub has_dc_table_annotations: bool,
    pub catalog_path: String,

    pub is_installed: bool,
    /// admintools.conf left behind by an earlier instance of the VerticaDB
    pub has_stale_admintools_conf: bool,
    /// Node name assigned by admintools at install, e.g. `node0001`
    pub compat21_node_name: String,

    pub db_exists: bool,
    pub vnode_name: String,
    pub shard_subscriptions: i32,

    /// True when the vertica process is running. This is the same test the
    /// liveness probe makes, not a query against the database.
    pub up_node: bool,
    pub read_only: bool,
    pub startup_in_progress: bool,

    pub eula_accepted: bool,
    pub dir_exists: HashMap<String, bool>,
    pub file_exists: HashMap<String, bool>,
    pub local_data_size: i64,
    pub local_data_avail: i64,
    pub max_depot_size: i64,
    pub depot_disk_percent_size: String,
    pub agent_running: bool,
    pub image_has_agent_keys: bool,
    pub is_http_server_running: bool,
}

impl PodFact {
    pub fn has_file(&self, path: &str) -> bool {
        self.file_exists.get(path).copied().unwrap_or(false)
    }

    pub fn has_dir(&self, path: &str) -> bool {
        self.dir_exists.get(path).copied().unwrap_or(false)
    }

    /// The image ships agent keys that haven't been copied to the config dir yet
    pub fn need_agent_keys_copy(&self) -> bool {
        self.image_has_agent_keys
            && (!self.has_file(AGENT_KEY_FILE)
                || !self.has_file(AGENT_CERT_FILE)
                || !self.has_file(VERTICA_API_KEYS_FILE))
    }
}

/// Output of the probe script run in each pod. Every key the script prints
/// has a field here and the other way around.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct GatherState {
    pub install_indicator_exists: bool,
    pub eula_accepted: bool,
    #[serde(deserialize_with = "null_as_default")]
    pub dir_exists: HashMap<String, bool>,
    #[serde(deserialize_with = "null_as_default")]
    pub file_exists: HashMap<String, bool>,
    pub db_exists: bool,
    #[serde(rename = "verticaPIDRunning")]
    pub vertica_pid_running: bool,
    pub startup_complete: bool,
    #[serde(deserialize_with = "null_as_default")]
    pub compat21_node_name: String,
    #[serde(deserialize_with = "null_as_default")]
    pub vnode_name: String,
    pub local_data_size: i64,
    pub local_data_avail: i64,
    pub agent_running: bool,
    pub image_has_agent_keys: bool,
    #[serde(rename = "isHTTPServerRunning")]
    pub is_http_server_running: bool,
}

/// An empty value in the script output (`vnodeName: `) parses as null
fn null_as_default<'de, D, T>(deserializer: D) -> Result<T, D::Error>
where
    D: Deserializer<'de>,
    T: Default + Deserialize<'de>,
{
    Ok(Option::<T>::deserialize(deserializer)?.unwrap_or_default())
}
