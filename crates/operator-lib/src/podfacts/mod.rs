//! Point-in-time facts about every pod of a VerticaDB
//!
//! A collection walks each subcluster, fetches the managing statefulset and
//! builds one [`PodFact`] per pod index. Running pods are probed once with a
//! batched script, and up nodes get a few extra queries. The snapshot is
//! then reused until something invalidates it.

mod checkers;
mod fact;
mod gather;


pub use checkers::{
    check_for_simple_gather_state_mapping, check_if_node_is_doing_startup, check_is_db_created,
    check_is_installed, parse_node_state_and_read_only,
};
pub use fact::{GatherState, PodFact};
pub use gather::gen_gather_script;

use crate::error::Result;
use crate::exec::PodRunner;
use crate::names::{
    gen_pod_name, gen_sts_name, NamespacedName, CATALOG_PATH_ENV, CONTROLLER_REVISION_HASH_LABEL,
    KUBERNETES_VERSION_ANNOTATION, SUBCLUSTER_NAME_LABEL, SUBCLUSTER_TRANSIENT_LABEL,
    SUBCLUSTER_TYPE_LABEL,
};
use crate::platform::{server_container, PlatformApi};
use crate::vdb::{Subcluster, VerticaDB};
use k8s_openapi::api::apps::v1::StatefulSet;
use k8s_openapi::api::core::v1::Pod;
use kube::ResourceExt;
use std::collections::BTreeMap;
use std::sync::Arc;
use tracing::{debug, info};

/// Caller supplied step run after every other one
pub type OverrideFn = Box<dyn Fn(&VerticaDB, &mut PodFact, &GatherState) + Send + Sync>;

type PodPredicate = fn(&PodFact) -> bool;

fn up_writable_not_pending_delete(v: &PodFact) -> bool {
    v.up_node && !v.read_only && !v.pending_delete
}

fn up_writable(v: &PodFact) -> bool {
    v.up_node && !v.read_only
}

fn up(v: &PodFact) -> bool {
    v.up_node
}

fn installed_and_running(v: &PodFact) -> bool {
    v.is_installed && v.is_pod_running
}

/// Preference order when picking a pod to run admintools from
const ADMINTOOLS_ANY_TIERS: [PodPredicate; 4] = [
    up_writable_not_pending_delete,
    up_writable,
    up,
    installed_and_running,
];

pub struct PodFacts {
    platform: Arc<dyn PlatformApi>,
    runner: Arc<dyn PodRunner>,
    detail: BTreeMap<NamespacedName, PodFact>,
    generation: u64,
    collected_generation: Option<u64>,
    override_fn: Option<OverrideFn>,
}

impl PodFacts {
    pub fn new(platform: Arc<dyn PlatformApi>, runner: Arc<dyn PodRunner>) -> Self {
        Self {
            platform,
            runner,
            detail: BTreeMap::new(),
            generation: 0,
            collected_generation: None,
            override_fn: None,
        }
    }

    pub fn with_override(mut self, f: OverrideFn) -> Self {
        self.override_fn = Some(f);
        self
    }

    /// Facts that are already current, for exercising the query helpers
    #[cfg(test)]
    pub(crate) fn with_facts(
        platform: Arc<dyn PlatformApi>,
        runner: Arc<dyn PodRunner>,
        facts: Vec<PodFact>,
    ) -> Self {
        let mut pfacts = Self::new(platform, runner);
        pfacts.detail = facts.into_iter().map(|pf| (pf.name.clone(), pf)).collect();
        pfacts.collected_generation = Some(pfacts.generation);
        pfacts
    }

    pub fn generation(&self) -> u64 {
        self.generation
    }

    pub fn is_current(&self) -> bool {
        self.collected_generation == Some(self.generation)
    }

    /// Mark the snapshot stale. The next collect gathers everything again.
    pub fn invalidate(&mut self) {
        self.generation += 1;
    }

    pub fn get(&self, name: &NamespacedName) -> Option<&PodFact> {
        self.detail.get(name)
    }

    pub fn iter(&self) -> impl Iterator<Item = &PodFact> {
        self.detail.values()
    }

    pub fn len(&self) -> usize {
        self.detail.len()
    }

    pub fn is_empty(&self) -> bool {
        self.detail.is_empty()
    }

    /// Gather facts for every pod unless the snapshot is already current
    pub async fn collect(&mut self, vdb: &VerticaDB) -> Result<()> {
        if self.is_current() {
            return Ok(());
        }
        self.detail.clear();

        let subclusters = self.find_subclusters(vdb).await?;
        for sc in &subclusters {
            self.collect_subcluster(vdb, sc).await?;
        }
        self.collected_generation = Some(self.generation);
        info!(
            generation = self.generation,
            pods = self.detail.len(),
            subclusters = subclusters.len(),
            "Collected pod facts"
        );
        Ok(())
    }

    /// Declared subclusters plus any statefulset still labelled for this
    /// database whose subcluster was removed from the spec. Facts for those
    /// are kept until the statefulset is gone.
    async fn find_subclusters(&self, vdb: &VerticaDB) -> Result<Vec<Subcluster>> {
        let mut subclusters = vdb.spec.subclusters.clone();
        for sts in self.platform.list_statefulsets(vdb).await? {
            let Some(sc_name) = sts.labels().get(SUBCLUSTER_NAME_LABEL) else {
                continue;
            };
            if subclusters.iter().any(|sc| &sc.name == sc_name) {
                continue;
            }
            debug!(subcluster = %sc_name, "Found statefulset for a removed subcluster");
            subclusters.push(Subcluster {
                name: sc_name.clone(),
                size: 0,
                is_primary: sts
                    .labels()
                    .get(SUBCLUSTER_TYPE_LABEL)
                    .map(|t| t == "primary")
                    .unwrap_or(false),
            });
        }
        Ok(subclusters)
    }

    async fn collect_subcluster(&mut self, vdb: &VerticaDB, sc: &Subcluster) -> Result<()> {
        let sts_name = gen_sts_name(vdb, sc);
        // A missing statefulset still leaves the declared pods to report on
        let sts = self.platform.get_statefulset(&sts_name).await?;
        let replicas = sts
            .as_ref()
            .and_then(|s| s.spec.as_ref())
            .and_then(|s| s.replicas);
        let max_size = sc.size.max(replicas.unwrap_or(0));

        for i in 0..max_size {
            let pf = self.collect_pod_by_sts_index(vdb, sc, sts.as_ref(), replicas, i).await?;
            self.detail.insert(pf.name.clone(), pf);
        }
        Ok(())
    }

    async fn collect_pod_by_sts_index(
        &self,
        vdb: &VerticaDB,
        sc: &Subcluster,
        sts: Option<&StatefulSet>,
        replicas: Option<i32>,
        pod_index: i32,
    ) -> Result<PodFact> {
        let mut pf = PodFact {
            name: gen_pod_name(vdb, sc, pod_index),
            subcluster_name: sc.name.clone(),
            is_primary: sc.is_primary,
            pod_index,
            // A pod can be owned by the statefulset before it exists
            managed_by_parent: replicas.map(|r| pod_index < r).unwrap_or(false),
            ..Default::default()
        };

        if let Some(pod) = self.platform.get_pod(&pf.name).await? {
            populate_from_pod(vdb, sc, sts, &pod, &mut pf);
        }

        let runner = self.runner.as_ref();
        let gs = gather::run_gather(runner, vdb, &pf).await?;
        checkers::check_is_installed(vdb, &mut pf, &gs);
        checkers::check_is_db_created(vdb, &mut pf, &gs);
        checkers::check_for_simple_gather_state_mapping(vdb, &mut pf, &gs);
        checkers::check_node_status(runner, vdb, &mut pf).await?;
        checkers::check_if_node_is_doing_startup(vdb, &mut pf, &gs);
        checkers::check_shard_subscriptions(runner, &mut pf, &gs).await?;
        checkers::query_depot_details(runner, &mut pf, &gs).await?;
        if let Some(f) = &self.override_fn {
            f(vdb, &mut pf, &gs);
        }
        Ok(pf)
    }

    pub fn does_db_exist(&self) -> bool {
        self.iter().any(|v| v.db_exists)
    }

    /// An up pod to run vsql in, optionally restricted to one subcluster
    pub fn find_pod_to_run_vsql(&self, allow_read_only: bool, sc_name: &str) -> Option<PodFact> {
        self.iter()
            .find(|v| {
                (sc_name.is_empty() || v.subcluster_name == sc_name)
                    && v.up_node
                    && (allow_read_only || !v.read_only)
            })
            .cloned()
    }

    /// A pod to run admintools from, preferring up and writable nodes
    pub fn find_pod_to_run_admintools_any(&self) -> Option<PodFact> {
        ADMINTOOLS_ANY_TIERS
            .iter()
            .find_map(|pred| self.find_first_pod_sorted(*pred))
    }

    /// A pod to run an admintools command that needs the local vertica
    /// process to be down
    pub fn find_pod_to_run_admintools_offline(&self) -> Option<PodFact> {
        self.find_first_pod_sorted(|v| v.is_installed && v.is_pod_running && !v.up_node)
    }

    pub fn find_running_pod(&self) -> Option<PodFact> {
        self.iter().find(|v| v.is_pod_running).cloned()
    }

    /// Pods whose vertica process should be (re)started. Read-only nodes
    /// lost quorum and can optionally be restarted to regain write access.
    pub fn find_restartable_pods(
        &self,
        restart_read_only: bool,
        restart_transient: bool,
    ) -> Vec<PodFact> {
        self.filter_pods(|v| {
            if !restart_transient && v.is_transient {
                return false;
            }
            (!v.up_node || (restart_read_only && v.read_only))
                && v.db_exists
                && v.is_pod_running
                && v.has_dc_table_annotations
        })
    }

    pub fn find_installed_pods(&self) -> Vec<PodFact> {
        self.filter_pods(installed_and_running)
    }

    /// Pods that may need their IP refreshed in the catalog
    pub fn find_reip_pods(&self, only_pods_without_db: bool) -> Vec<PodFact> {
        self.filter_pods(|v| {
            v.exists
                && v.is_pod_running
                && v.is_installed
                && !(only_pods_without_db && v.db_exists)
        })
    }

    pub fn find_pods_low_on_disk_space(&self, avail_threshold: i64) -> Vec<PodFact> {
        self.filter_pods(|v| v.is_pod_running && v.local_data_avail <= avail_threshold)
    }

    pub fn are_all_pods_running_and_zero_installed(&self) -> bool {
        self.iter().all(|v| {
            !(((!v.exists || !v.is_pod_running) && v.managed_by_parent) || v.is_installed)
        })
    }

    pub fn count_running_and_installed(&self) -> usize {
        self.count_pods(installed_and_running)
    }

    /// Installed pods that can't be restarted yet. Pods the statefulset
    /// doesn't own yet are left out, and a pod without the DC table
    /// annotations has to be rescheduled before vertica starts in it.
    pub fn count_installed_and_not_restartable(&self) -> usize {
        self.count_pods(|v| {
            v.is_installed && v.managed_by_parent && (!v.is_pod_running || !v.has_dc_table_annotations)
        })
    }

    pub fn count_up_primary_nodes(&self) -> usize {
        self.count_pods(|v| v.up_node && v.is_primary)
    }

    /// Up and writable pods still on an image other than `new_image`
    pub fn count_not_read_only_with_old_image(&self, new_image: &str) -> usize {
        self.count_pods(|v| v.is_pod_running && v.up_node && !v.read_only && v.image != new_image)
    }

    pub fn up_node_count(&self) -> usize {
        self.count_pods(up)
    }

    pub fn up_node_and_not_read_only_count(&self) -> usize {
        self.count_pods(up_writable)
    }

    pub fn any_installed_pods_not_running(&self) -> Option<NamespacedName> {
        self.iter()
            .find(|v| !v.is_pod_running && v.is_installed)
            .map(|v| v.name.clone())
    }

    pub fn any_uninstalled_transient_pods_not_running(&self) -> Option<NamespacedName> {
        self.iter()
            .find(|v| v.is_transient && !v.is_pod_running && !v.is_installed)
            .map(|v| v.name.clone())
    }

    fn filter_pods(&self, f: impl Fn(&PodFact) -> bool) -> Vec<PodFact> {
        self.iter().filter(|v| f(v)).cloned().collect()
    }

    fn count_pods(&self, f: impl Fn(&PodFact) -> bool) -> usize {
        self.iter().filter(|v| f(v)).count()
    }

    /// First matching pod ordered by DNS name
    fn find_first_pod_sorted(&self, f: impl Fn(&PodFact) -> bool) -> Option<PodFact> {
        self.iter()
            .filter(|v| f(v))
            .min_by(|a, b| a.dns_name.cmp(&b.dns_name))
            .cloned()
    }
}

/// Pod IPs of the given pods, in order
pub fn host_list(pods: &[PodFact]) -> Vec<String> {
    pods.iter().map(|p| p.pod_ip.clone()).collect()
}

/// Comma separated pod names for log and event messages
pub fn pod_names(pods: &[PodFact]) -> String {
    pods.iter()
        .map(|p| p.name.name.as_str())
        .collect::<Vec<_>>()
        .join(", ")
}

fn populate_from_pod(
    vdb: &VerticaDB,
    sc: &Subcluster,
    sts: Option<&StatefulSet>,
    pod: &Pod,
    pf: &mut PodFact,
) {
    pf.exists = true;
    pf.is_pod_running = pod
        .status
        .as_ref()
        .and_then(|s| s.phase.as_deref())
        == Some("Running");
    if let Some(spec) = &pod.spec {
        pf.dns_name = format!(
            "{}.{}",
            spec.hostname.as_deref().unwrap_or_default(),
            spec.subdomain.as_deref().unwrap_or_default()
        );
    }
    pf.pod_ip = pod
        .status
        .as_ref()
        .and_then(|s| s.pod_ip.clone())
        .unwrap_or_default();
    pf.is_transient = pod
        .labels()
        .get(SUBCLUSTER_TRANSIENT_LABEL)
        .and_then(|v| v.parse().ok())
        .unwrap_or(false);
    pf.pending_delete = pf.pod_index >= sc.size;
    // The DC table annotations are always added together, one is enough
    pf.has_dc_table_annotations = pod
        .annotations()
        .contains_key(KUBERNETES_VERSION_ANNOTATION);

    let container = server_container(pod);
    pf.image = container
        .and_then(|c| c.image.clone())
        .unwrap_or_default();
    pf.catalog_path = container
        .and_then(|c| c.env.as_ref())
        .and_then(|env| env.iter().find(|e| e.name == CATALOG_PATH_ENV))
        .and_then(|e| e.value.clone())
        .unwrap_or_else(|| vdb.spec.local.get_catalog_path().to_string());

    // Without the label we can't tell, so assume nothing is pending
    pf.sts_revision_pending = match pod.labels().get(CONTROLLER_REVISION_HASH_LABEL) {
        Some(pod_revision) => {
            let update_revision = sts
                .and_then(|s| s.status.as_ref())
                .and_then(|s| s.update_revision.as_deref())
                .unwrap_or_default();
            update_revision != pod_revision.as_str()
        }
        None => false,
    };
}
