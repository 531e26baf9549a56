//! Naming of the Kubernetes objects derived from a VerticaDB

use crate::vdb::{Subcluster, VerticaDB};
use kube::ResourceExt;
use serde::{Deserialize, Serialize};
use std::fmt;

/// Name of the container that runs the Vertica server
pub const SERVER_CONTAINER: &str = "server";

/// Label holding the statefulset revision a pod was created from
pub const CONTROLLER_REVISION_HASH_LABEL: &str = "controller-revision-hash";
pub const SUBCLUSTER_NAME_LABEL: &str = "vertica.com/subcluster-name";
pub const SUBCLUSTER_TYPE_LABEL: &str = "vertica.com/subcluster-type";
pub const SUBCLUSTER_TRANSIENT_LABEL: &str = "vertica.com/subcluster-transient";
pub const VDB_INSTANCE_LABEL: &str = "app.kubernetes.io/instance";

/// Only present once the pod has the annotations the DC tables are seeded from
pub const KUBERNETES_VERSION_ANNOTATION: &str = "vertica.com/kubernetes-version";
pub const VERSION_ANNOTATION: &str = "vertica.com/version";

pub const CATALOG_PATH_ENV: &str = "CATALOG_PATH";
pub const VERTICA_HTTP_PORT: u16 = 8443;

/// Namespace qualified name of a Kubernetes object
#[derive(Debug, Clone, Default, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct NamespacedName {
    pub namespace: String,
    pub name: String,
}

impl NamespacedName {
    pub fn new(namespace: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            namespace: namespace.into(),
            name: name.into(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.name.is_empty()
    }
}

impl fmt::Display for NamespacedName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.namespace, self.name)
    }
}

/// Name of the VerticaDB object itself
pub fn gen_vdb_name(vdb: &VerticaDB) -> NamespacedName {
    NamespacedName::new(vdb.namespace().unwrap_or_default(), vdb.name_any())
}

/// Name of the statefulset that manages a subcluster's pods
pub fn gen_sts_name(vdb: &VerticaDB, sc: &Subcluster) -> NamespacedName {
    NamespacedName::new(
        vdb.namespace().unwrap_or_default(),
        format!("{}-{}", vdb.name_any(), sc.k8s_name()),
    )
}

/// Name of the pod at `pod_index` within a subcluster
pub fn gen_pod_name(vdb: &VerticaDB, sc: &Subcluster, pod_index: i32) -> NamespacedName {
    let sts = gen_sts_name(vdb, sc);
    NamespacedName::new(sts.namespace, format!("{}-{}", sts.name, pod_index))
}

/// Name of a secret in the VerticaDB's namespace
pub fn gen_namespaced_name(vdb: &VerticaDB, name: &str) -> NamespacedName {
    NamespacedName::new(vdb.namespace().unwrap_or_default(), name)
}
