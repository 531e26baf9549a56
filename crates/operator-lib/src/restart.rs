//! Restart engine
//!
//! When no node is up and writable the whole database has to be started
//! from an offline initiator. Otherwise only the down (and optionally the
//! read-only) nodes are restarted individually. Pods whose liveness probe
//! is about to reschedule them, and pods still starting up, are left for
//! the probes to sort out.

use crate::dispatcher::{
    FetchNodeStateOpts, Initiator, ReIpHost, ReIpOpts, RestartNodeOpts, StartDbOpts, VnodeHost,
    STATE_UP,
};
use crate::error::{PlatformError, Result};
use crate::events::{EventReason, EventType};
use crate::names::{gen_pod_name, NamespacedName, SERVER_CONTAINER};
use crate::platform::server_liveness_probe;
use crate::pod_setup;
use crate::podfacts::{host_list, pod_names, PodFact, PodFacts};
use crate::reconciler::{ReconcileActor, ReconcileContext};
use crate::vdb::{
    ConditionStatus, InitPolicy, KSafety, VerticaDB, VerticaDBCondition,
    AUTO_RESTART_VERTICA_CONDITION,
};
use crate::verdict::{liveness_probe_wait, Verdict};
use async_trait::async_trait;
use std::time::Instant;
use tracing::{debug, info};

const KILL_MARKER: &str = "Killing process";

pub struct RestartReconciler {
    ctx: ReconcileContext,
    /// Also restart nodes that lost quorum and went read-only
    restart_read_only: bool,
    /// Pod admin commands are run from, picked once per pass
    initiator: Option<Initiator>,
}

impl RestartReconciler {
    pub fn new(ctx: ReconcileContext, restart_read_only: bool) -> Self {
        Self {
            ctx,
            restart_read_only,
            initiator: None,
        }
    }

    async fn update_auto_restart_condition(
        &self,
        vdb: &mut VerticaDB,
        status: ConditionStatus,
    ) -> Result<()> {
        let cond = VerticaDBCondition::new(AUTO_RESTART_VERTICA_CONDITION, status);
        if vdb.set_condition(cond.clone()) {
            self.ctx.platform.update_condition(vdb, &cond).await?;
        }
        Ok(())
    }

    async fn reconcile_cluster(&mut self, vdb: &VerticaDB, pfacts: &mut PodFacts) -> Result<Verdict> {
        info!("Restart of entire cluster is needed");
        if pfacts.are_all_pods_running_and_zero_installed() {
            info!("All pods are running and none of them have an installation, nothing to restart");
            return Ok(Verdict::Done);
        }
        if pfacts.count_running_and_installed() == 0 {
            info!("Waiting for pods to come online that may need a Vertica restart");
            return Ok(Verdict::Requeue);
        }
        if vdb.spec.k_safety == KSafety::Zero && pfacts.count_installed_and_not_restartable() > 0 {
            info!("Waiting for all installed pods to be running before attempting a cluster restart");
            return Ok(Verdict::Requeue);
        }
        if !self.set_initiator(pfacts.find_pod_to_run_admintools_offline()) {
            info!("No pod found to run admintools from, requeue");
            return Ok(Verdict::Requeue);
        }

        let down_pods = pfacts.find_restartable_pods(self.restart_read_only, true);

        let verdict = self.kill_read_only_processes(&down_pods).await?;
        if verdict.is_aborted() {
            return Ok(verdict);
        }

        let (_, removed) = self.filter_non_active_startup_probe(&down_pods).await?;
        if removed > 0 {
            info!(
                pod_count = removed,
                "Some pods have active liveness probes, waiting for them to be rescheduled before a restart"
            );
            return self.liveness_probe_wait(vdb).await;
        }
        let (_, removed) = filter_slow_startup(&down_pods);
        if removed > 0 {
            info!(
                pod_count = removed,
                "Some pods are slow starting up, waiting for them to finish or abort before a cluster restart"
            );
            return self.liveness_probe_wait(vdb).await;
        }

        pod_setup::accept_eula_if_missing(pfacts, self.ctx.runner.as_ref()).await?;

        let verdict = self.reip_nodes(vdb, &pfacts.find_reip_pods(false)).await?;
        if verdict.is_aborted() {
            return Ok(verdict);
        }

        if !pfacts.does_db_exist() {
            return Ok(Verdict::Done);
        }

        let verdict = self.restart_cluster(vdb, &down_pods).await?;
        if verdict.is_aborted() {
            return Ok(verdict);
        }
        pfacts.invalidate();
        Ok(Verdict::Done)
    }

    async fn reconcile_nodes(&mut self, vdb: &VerticaDB, pfacts: &mut PodFacts) -> Result<Verdict> {
        info!("Restart of individual nodes is needed");
        let down_pods = pfacts.find_restartable_pods(self.restart_read_only, false);
        pod_setup::accept_eula_if_missing(pfacts, self.ctx.runner.as_ref()).await?;

        if !down_pods.is_empty() {
            if !self.set_initiator(pfacts.find_pod_to_run_admintools_any()) {
                info!("No pod found to run admintools from, requeue");
                return Ok(Verdict::Requeue);
            }
            let verdict = self.restart_pods(vdb, pfacts, down_pods).await?;
            if verdict.is_aborted() {
                return Ok(verdict);
            }
        }

        if vdb.spec.init_policy == InitPolicy::ScheduleOnly {
            return Ok(self.requeue_if_pods_not_running(pfacts));
        }

        let reip_pods = pfacts.find_reip_pods(true);
        if !reip_pods.is_empty() {
            if !self.set_initiator(pfacts.find_pod_to_run_admintools_any()) {
                info!("No pod found to run admintools from, requeue");
                return Ok(Verdict::Requeue);
            }
            let verdict = self.reip_nodes(vdb, &reip_pods).await?;
            if verdict.is_aborted() {
                return Ok(verdict);
            }
        }

        Ok(self.requeue_if_pods_not_running(pfacts))
    }

    async fn restart_pods(
        &mut self,
        vdb: &VerticaDB,
        pfacts: &mut PodFacts,
        pods: Vec<PodFact>,
    ) -> Result<Verdict> {
        let requested = pods.len();
        let (down_pods, verdict) = self.remove_pods_with_cluster_up_state(vdb, pods).await?;
        if verdict.is_aborted() {
            return Ok(verdict);
        }
        if down_pods.is_empty() {
            info!("Pods are down but the cluster state doesn't show that yet, requeue");
            return self.liveness_probe_wait(vdb).await;
        }

        let verdict = self.kill_read_only_processes(&down_pods).await?;
        if verdict.is_aborted() {
            return Ok(verdict);
        }

        let (down_pods, removed) = self.filter_non_active_startup_probe(&down_pods).await?;
        if down_pods.is_empty() {
            info!(
                pod_count = removed,
                "Some pods have active liveness probes, waiting for them to be rescheduled before a restart"
            );
            return self.liveness_probe_wait(vdb).await;
        }

        let (down_pods, _) = filter_slow_startup(&down_pods);
        if down_pods.is_empty() {
            info!("Some pods are still starting up, waiting for them to finish or abort before restarting again");
            return self.liveness_probe_wait(vdb).await;
        }

        let verdict = self.exec_restart_pods(vdb, &down_pods).await?;
        if verdict.is_aborted() {
            return Ok(verdict);
        }
        pfacts.invalidate();

        // Some pods were held back, come back for them once the probes act
        if requested > down_pods.len() {
            return self.liveness_probe_wait(vdb).await;
        }
        Ok(Verdict::Done)
    }

    /// Drop pods whose vnode the cluster still reports as up. The pod
    /// facts can see a process die before the cluster does.
    async fn remove_pods_with_cluster_up_state(
        &self,
        vdb: &VerticaDB,
        pods: Vec<PodFact>,
    ) -> Result<(Vec<PodFact>, Verdict)> {
        let opts = FetchNodeStateOpts {
            initiator: self.initiator(),
            hosts: vnode_hosts(&pods),
        };
        let (cluster_state, verdict) = self.ctx.dispatcher.fetch_node_state(vdb, &opts).await?;
        if verdict.is_aborted() {
            return Ok((Vec::new(), verdict));
        }
        let down = pods
            .into_iter()
            .filter(|p| cluster_state.get(&p.vnode_name).map(String::as_str) != Some(STATE_UP))
            .collect();
        Ok((down, Verdict::Done))
    }

    async fn exec_restart_pods(&self, vdb: &VerticaDB, down_pods: &[PodFact]) -> Result<Verdict> {
        let opts = RestartNodeOpts {
            initiator: self.initiator(),
            hosts: vnode_hosts(down_pods),
        };
        self.ctx.events.event(
            vdb,
            EventType::Normal,
            EventReason::NodeRestartStarted,
            &format!(
                "Starting database restart node of the following pods: {}",
                pod_names(down_pods)
            ),
        );
        let start = Instant::now();
        let res = self.ctx.dispatcher.restart_node(vdb, &opts).await;
        let elapsed = start.elapsed();
        let failed = res.as_ref().map(Verdict::is_aborted).unwrap_or(true);
        self.ctx.metrics.observe_nodes_restart(vdb, elapsed, failed);
        let verdict = res?;
        if verdict.is_aborted() {
            return Ok(verdict);
        }
        self.ctx.events.event(
            vdb,
            EventType::Normal,
            EventReason::NodeRestartSucceeded,
            &format!(
                "Successfully restarted database nodes and it took {}s",
                elapsed.as_secs()
            ),
        );
        Ok(Verdict::Done)
    }

    async fn restart_cluster(&self, vdb: &VerticaDB, down_pods: &[PodFact]) -> Result<Verdict> {
        let opts = StartDbOpts {
            initiator: self.initiator(),
            hosts: host_list(down_pods),
        };
        self.ctx.events.event(
            vdb,
            EventType::Normal,
            EventReason::ClusterRestartStarted,
            "Starting restart of the cluster",
        );
        let start = Instant::now();
        let res = self.ctx.dispatcher.start_db(vdb, &opts).await;
        let elapsed = start.elapsed();
        let failed = res.as_ref().map(Verdict::is_aborted).unwrap_or(true);
        self.ctx.metrics.observe_cluster_restart(vdb, elapsed, failed);
        let verdict = res?;
        if verdict.is_aborted() {
            return Ok(verdict);
        }
        self.ctx.events.event(
            vdb,
            EventType::Normal,
            EventReason::ClusterRestartSucceeded,
            &format!(
                "Successfully restarted the cluster and it took {}s",
                elapsed.as_secs()
            ),
        );
        Ok(Verdict::Done)
    }

    /// Refresh the IPs of the given pods in the catalog
    async fn reip_nodes(&self, vdb: &VerticaDB, pods: &[PodFact]) -> Result<Verdict> {
        if pods.is_empty() {
            info!("No pods qualify for re-ip, requeue");
            return Ok(Verdict::Requeue);
        }
        if let Some(pf) = pods.iter().find(|p| !p.is_pod_running) {
            info!(pod = %pf.name, "Not all pods are running, requeue");
            return Ok(Verdict::Requeue);
        }
        let opts = ReIpOpts {
            initiator: self.initiator(),
            hosts: pods
                .iter()
                .map(|p| ReIpHost {
                    vnode: p.vnode_name.clone(),
                    compat21_node_name: p.compat21_node_name.clone(),
                    ip: p.pod_ip.clone(),
                })
                .collect(),
        };
        self.ctx.dispatcher.re_ip(vdb, &opts).await
    }

    /// SIGKILL vertica in every read-only pod. Requeues if anything was
    /// killed so the next pass sees the node down.
    async fn kill_read_only_processes(&self, pods: &[PodFact]) -> Result<Verdict> {
        let script = format!(
            "for pid in $(pgrep ^vertica$); do echo \"{KILL_MARKER} $pid\"; kill -n SIGKILL $pid; done"
        );
        let mut killed = false;
        for pf in pods.iter().filter(|p| p.read_only) {
            let out = self
                .ctx
                .runner
                .exec_in_pod(&pf.name, SERVER_CONTAINER, &["bash", "-c", script.as_str()])
                .await?;
            if out.stdout.contains(KILL_MARKER) {
                info!(pod = %pf.name, "Killed read-only vertica process");
                killed = true;
            }
        }
        Ok(Verdict::requeue_if(killed))
    }

    /// Keep only the pods whose startup probe is still active. Once it
    /// has finished, the liveness probe will restart the pod for us.
    async fn filter_non_active_startup_probe(
        &self,
        pods: &[PodFact],
    ) -> Result<(Vec<PodFact>, usize)> {
        let mut kept = Vec::with_capacity(pods.len());
        for pf in pods {
            if self.is_startup_probe_active(&pf.name).await? {
                kept.push(pf.clone());
            } else {
                info!(pod = %pf.name, "Not restarting pod because its startup probe is no longer active");
            }
        }
        let removed = pods.len() - kept.len();
        Ok((kept, removed))
    }

    async fn is_startup_probe_active(&self, name: &NamespacedName) -> Result<bool> {
        let pod = self
            .ctx
            .platform
            .get_pod(name)
            .await?
            .ok_or_else(|| PlatformError::NotFound {
                kind: "Pod",
                name: name.to_string(),
            })?;
        if server_liveness_probe(&pod).is_none() {
            debug!(pod = %name, "Pod has no liveness probe, okay to restart");
            return Ok(true);
        }
        let started = pod
            .status
            .as_ref()
            .and_then(|s| s.container_statuses.as_ref())
            .and_then(|statuses| statuses.iter().find(|c| c.name == SERVER_CONTAINER))
            .map(|c| c.started.unwrap_or(false));
        debug!(pod = %name, started = ?started, "Server container status");
        Ok(!started.unwrap_or(false))
    }

    /// Requeue after a slice of the liveness probe window, read from the
    /// first pod of the first subcluster
    async fn liveness_probe_wait(&self, vdb: &VerticaDB) -> Result<Verdict> {
        let Some(sc) = vdb.spec.subclusters.first() else {
            return Ok(Verdict::Requeue);
        };
        let name = gen_pod_name(vdb, sc, 0);
        let pod = match self.ctx.platform.get_pod(&name).await {
            Ok(Some(pod)) => pod,
            Ok(None) => {
                info!(pod = %name, "Could not read sample pod for the liveness probe, default to backoff");
                return Ok(Verdict::Requeue);
            }
            Err(e) if e.is_not_found() => return Ok(Verdict::Requeue),
            Err(e) => return Err(e.into()),
        };
        Ok(match server_liveness_probe(&pod) {
            Some(probe) => Verdict::RequeueAfter(liveness_probe_wait(
                probe.period_seconds,
                probe.failure_threshold,
            )),
            None => Verdict::Requeue,
        })
    }

    fn set_initiator(&mut self, candidate: Option<PodFact>) -> bool {
        if self.initiator.is_some() {
            return true;
        }
        match candidate {
            Some(pf) => {
                self.initiator = Some(Initiator {
                    pod: pf.name,
                    ip: pf.pod_ip,
                });
                true
            }
            None => false,
        }
    }

    fn initiator(&self) -> Initiator {
        self.initiator.clone().unwrap_or_default()
    }

    fn requeue_if_pods_not_running(&self, pfacts: &PodFacts) -> Verdict {
        let not_running = pfacts.count_installed_and_not_restartable();
        if not_running > 0 {
            info!(pod_count = not_running, "Some installed pods are not yet running, requeue");
        }
        Verdict::requeue_if(not_running > 0)
    }
}

fn vnode_hosts(pods: &[PodFact]) -> Vec<VnodeHost> {
    pods.iter()
        .map(|p| VnodeHost {
            vnode: p.vnode_name.clone(),
            ip: p.pod_ip.clone(),
        })
        .collect()
}

/// Drop pods that are in the middle of starting up
fn filter_slow_startup(pods: &[PodFact]) -> (Vec<PodFact>, usize) {
    let kept: Vec<PodFact> = pods
        .iter()
        .filter(|p| !p.startup_in_progress)
        .cloned()
        .collect();
    let removed = pods.len() - kept.len();
    (kept, removed)
}

#[async_trait]
impl ReconcileActor for RestartReconciler {
    fn name(&self) -> &'static str {
        "restart"
    }

    async fn reconcile(&mut self, vdb: &mut VerticaDB, pfacts: &mut PodFacts) -> Result<Verdict> {
        self.initiator = None;
        if !vdb.spec.auto_restart_vertica {
            self.update_auto_restart_condition(vdb, ConditionStatus::False)
                .await?;
            return Ok(Verdict::Done);
        }
        self.update_auto_restart_condition(vdb, ConditionStatus::True)
            .await?;

        pfacts.collect(vdb).await?;

        if pfacts.up_node_and_not_read_only_count() == 0
            && vdb.spec.init_policy != InitPolicy::ScheduleOnly
        {
            return self.reconcile_cluster(vdb, pfacts).await;
        }
        self.reconcile_nodes(vdb, pfacts).await
    }
}

#[cfg(test)]
mod tests;
