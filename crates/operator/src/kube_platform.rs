//! `PlatformApi` backed by the Kubernetes API server

use async_trait::async_trait;
use k8s_openapi::api::apps::v1::StatefulSet;
use k8s_openapi::api::core::v1::{Pod, Secret};
use kube::api::{Api, DeleteParams, ListParams, Patch, PatchParams, PostParams};
use kube::{Client, ResourceExt};
use operator_lib::names::VDB_INSTANCE_LABEL;
use operator_lib::platform::PlatformApi;
use operator_lib::vdb::{VerticaDB, VerticaDBCondition};
use operator_lib::{NamespacedName, PlatformError};
use serde_json::json;
use std::collections::BTreeMap;
use tracing::debug;

#[derive(Clone)]
pub struct KubePlatform {
    client: Client,
}

impl KubePlatform {
    pub fn new(client: Client) -> Self {
        Self { client }
    }

    fn pods(&self, ns: &str) -> Api<Pod> {
        Api::namespaced(self.client.clone(), ns)
    }

    fn vdbs(&self, ns: &str) -> Api<VerticaDB> {
        Api::namespaced(self.client.clone(), ns)
    }
}

/// Map a client error, keeping conflicts and misses distinguishable
fn map_err(kind: &'static str, name: &str, err: kube::Error) -> PlatformError {
    match err {
        kube::Error::Api(resp) if resp.code == 404 => PlatformError::NotFound {
            kind,
            name: name.to_string(),
        },
        kube::Error::Api(resp) if resp.code == 409 => {
            PlatformError::Conflict(format!("{kind} {name}: {}", resp.message))
        }
        other => PlatformError::Api(other.to_string()),
    }
}

#[async_trait]
impl PlatformApi for KubePlatform {
    async fn get_pod(&self, name: &NamespacedName) -> Result<Option<Pod>, PlatformError> {
        self.pods(&name.namespace)
            .get_opt(&name.name)
            .await
            .map_err(|e| map_err("Pod", &name.to_string(), e))
    }

    async fn get_statefulset(
        &self,
        name: &NamespacedName,
    ) -> Result<Option<StatefulSet>, PlatformError> {
        Api::<StatefulSet>::namespaced(self.client.clone(), &name.namespace)
            .get_opt(&name.name)
            .await
            .map_err(|e| map_err("StatefulSet", &name.to_string(), e))
    }

    async fn list_statefulsets(&self, vdb: &VerticaDB) -> Result<Vec<StatefulSet>, PlatformError> {
        let ns = vdb.namespace().unwrap_or_default();
        let lp = ListParams::default().labels(&format!("{}={}", VDB_INSTANCE_LABEL, vdb.name_any()));
        let list = Api::<StatefulSet>::namespaced(self.client.clone(), &ns)
            .list(&lp)
            .await
            .map_err(|e| map_err("StatefulSet", &ns, e))?;
        Ok(list.items)
    }

    async fn delete_pod(&self, name: &NamespacedName) -> Result<(), PlatformError> {
        debug!(pod = %name, "Deleting pod");
        self.pods(&name.namespace)
            .delete(&name.name, &DeleteParams::default())
            .await
            .map_err(|e| map_err("Pod", &name.to_string(), e))?;
        Ok(())
    }

    async fn get_vdb(&self, name: &NamespacedName) -> Result<Option<VerticaDB>, PlatformError> {
        self.vdbs(&name.namespace)
            .get_opt(&name.name)
            .await
            .map_err(|e| map_err("VerticaDB", &name.to_string(), e))
    }

    async fn update_vdb(&self, vdb: &VerticaDB) -> Result<VerticaDB, PlatformError> {
        let ns = vdb.namespace().unwrap_or_default();
        let name = vdb.name_any();
        self.vdbs(&ns)
            .replace(&name, &PostParams::default(), vdb)
            .await
            .map_err(|e| map_err("VerticaDB", &format!("{ns}/{name}"), e))
    }

    async fn update_condition(
        &self,
        vdb: &VerticaDB,
        condition: &VerticaDBCondition,
    ) -> Result<(), PlatformError> {
        let ns = vdb.namespace().unwrap_or_default();
        let name = vdb.name_any();
        let conditions = vdb
            .status
            .as_ref()
            .map(|s| s.conditions.clone())
            .unwrap_or_else(|| vec![condition.clone()]);
        let patch = json!({ "status": { "conditions": conditions } });
        self.vdbs(&ns)
            .patch_status(&name, &PatchParams::default(), &Patch::Merge(&patch))
            .await
            .map_err(|e| map_err("VerticaDB", &format!("{ns}/{name}"), e))?;
        Ok(())
    }

    async fn get_secret_data(
        &self,
        name: &NamespacedName,
    ) -> Result<BTreeMap<String, Vec<u8>>, PlatformError> {
        let secret = Api::<Secret>::namespaced(self.client.clone(), &name.namespace)
            .get(&name.name)
            .await
            .map_err(|e| map_err("Secret", &name.to_string(), e))?;
        Ok(secret
            .data
            .unwrap_or_default()
            .into_iter()
            .map(|(k, v)| (k, v.0))
            .collect())
    }
}
