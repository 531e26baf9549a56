//! Revive engine
//!
//! Brings back a database that exists only in communal storage. The pods
//! are handed to the revive in the requested revive order, after the
//! description of the database has been checked against the VerticaDB.

use crate::dispatcher::{DescribeDbOpts, ReviveDbOpts};
use crate::error::Result;
use crate::events::{EventReason, EventType};
use crate::initializer::{check_and_run_init, gen_config_params, DatabaseInitializer};
use crate::names::{gen_pod_name, gen_vdb_name, NamespacedName};
use crate::paths::AUTH_PARMS_FILE;
use crate::platform::{retry_on_conflict, Backoff};
use crate::podfacts::{PodFact, PodFacts};
use crate::reconciler::{ReconcileActor, ReconcileContext};
use crate::reviveplanner::{AtPlanner, RevivePlanner};
use crate::vdb::{InitPolicy, VerticaDB};
use crate::verdict::Verdict;
use async_trait::async_trait;
use std::time::Instant;
use tracing::info;

pub struct ReviveReconciler {
    ctx: ReconcileContext,
    planner: Box<dyn RevivePlanner>,
}

impl ReviveReconciler {
    pub fn new(ctx: ReconcileContext) -> Self {
        Self::with_planner(ctx, Box::new(AtPlanner::new()))
    }

    pub fn with_planner(ctx: ReconcileContext, planner: Box<dyn RevivePlanner>) -> Self {
        Self { ctx, planner }
    }

    fn log_bad_revive_order(&self, vdb: &VerticaDB, reason: &str) {
        self.ctx.events.event(
            vdb,
            EventType::Warning,
            EventReason::ReviveOrderBad,
            &format!("revive_db failed because the reviveOrder specified is bad: {reason}"),
        );
    }

    /// Delete pods whose statefulset has a newer revision, so they come
    /// back with the current pod template before the revive
    async fn delete_revision_pending_pods(&self, pods: &[PodFact]) -> Result<Verdict> {
        let mut deleted = 0;
        for pf in pods.iter().filter(|p| p.sts_revision_pending) {
            info!(pod = %pf.name, "Deleting pod that has a pending statefulset revision");
            self.ctx.platform.delete_pod(&pf.name).await?;
            deleted += 1;
        }
        if deleted > 0 {
            info!(deleted, "Requeue to wait for deleted pods to be rescheduled");
        }
        Ok(Verdict::requeue_if(deleted > 0))
    }

    fn gen_describe_opts(&self, vdb: &VerticaDB, initiator: &NamespacedName) -> DescribeDbOpts {
        DescribeDbOpts {
            initiator: initiator.clone(),
            db_name: vdb.spec.db_name.clone(),
            communal_path: vdb.communal_path(),
            communal_storage_params: AUTH_PARMS_FILE.to_string(),
            config_params: gen_config_params(vdb),
        }
    }

    pub fn gen_revive_opts(
        &self,
        vdb: &VerticaDB,
        initiator: &NamespacedName,
        hosts: Vec<String>,
    ) -> ReviveDbOpts {
        let mut opts = ReviveDbOpts {
            initiator: initiator.clone(),
            hosts,
            db_name: vdb.spec.db_name.clone(),
            ignore_cluster_lease: vdb.spec.ignore_cluster_lease,
            ..Default::default()
        };
        if vdb.is_eon() {
            opts.communal_path = Some(vdb.communal_path());
            opts.communal_storage_params = Some(AUTH_PARMS_FILE.to_string());
            opts.config_params = gen_config_params(vdb);
        }
        opts
    }

    /// Check the description against the VerticaDB and write back whatever
    /// has to change. Requeues when the VerticaDB was updated so the next
    /// pass works from the new version.
    async fn run_revive_planner(&mut self, vdb: &VerticaDB, op: &str) -> Result<Verdict> {
        self.planner.parse(op)?;
        if let Err(msg) = self.planner.is_compatible() {
            self.ctx
                .events
                .event(vdb, EventType::Warning, EventReason::ReviveDBFailed, &msg);
            return Ok(Verdict::Requeue);
        }

        let name = &gen_vdb_name(vdb);
        let platform = self.ctx.platform.as_ref();
        let planner = self.planner.as_ref();
        let changed = retry_on_conflict(Backoff::default(), move || async move {
            let Some(mut latest) = platform.get_vdb(name).await? else {
                info!(vdb = %name, "VerticaDB not found, it must have been deleted");
                return Ok(false);
            };
            if !planner.apply_changes(&mut latest)? {
                return Ok(false);
            }
            info!(vdb = %name, "Updating VerticaDB from the revive planner");
            platform.update_vdb(&latest).await?;
            Ok(true)
        })
        .await?;
        Ok(Verdict::requeue_if(changed))
    }
}

#[async_trait]
impl DatabaseInitializer for ReviveReconciler {
    /// Pods named by the revive order come first, then the rest of each
    /// subcluster in index order
    fn get_pod_list(&self, vdb: &VerticaDB, pfacts: &PodFacts) -> Option<Vec<PodFact>> {
        let subclusters = &vdb.spec.subclusters;
        let mut pods_left: Vec<i32> = subclusters.iter().map(|sc| sc.size).collect();
        let mut pods = Vec::new();

        let mut add_pods = |sc_index: usize, count: i32, pods_left: &mut Vec<i32>| -> bool {
            let sc = &subclusters[sc_index];
            for _ in 0..count {
                let pod_index = sc.size - pods_left[sc_index];
                let name = gen_pod_name(vdb, sc, pod_index);
                let Some(pf) = pfacts.get(&name) else {
                    self.log_bad_revive_order(vdb, &format!("pod '{}' not found", name.name));
                    return false;
                };
                pods.push(pf.clone());
                pods_left[sc_index] -= 1;
            }
            true
        };

        for entry in &vdb.spec.revive_order {
            let sc_index = match usize::try_from(entry.subcluster_index) {
                Ok(i) if i < subclusters.len() => i,
                _ => {
                    self.log_bad_revive_order(
                        vdb,
                        &format!(
                            "subcluster index '{}' out of bounds",
                            entry.subcluster_index
                        ),
                    );
                    return None;
                }
            };
            let left = pods_left[sc_index];
            let count = if entry.pod_count <= 0 || entry.pod_count > left {
                left
            } else {
                entry.pod_count
            };
            if !add_pods(sc_index, count, &mut pods_left) {
                return None;
            }
        }

        for sc_index in 0..subclusters.len() {
            let left = pods_left[sc_index];
            if !add_pods(sc_index, left, &mut pods_left) {
                return None;
            }
        }
        Some(pods)
    }

    fn find_pod_to_run_init(&self, pfacts: &PodFacts) -> Option<PodFact> {
        pfacts.find_pod_to_run_admintools_offline()
    }

    async fn pre_cmd_setup(
        &mut self,
        vdb: &VerticaDB,
        initiator: &NamespacedName,
        pods: &[PodFact],
    ) -> Result<Verdict> {
        let verdict = self.delete_revision_pending_pods(pods).await?;
        if verdict.is_aborted() {
            return Ok(verdict);
        }

        let opts = self.gen_describe_opts(vdb, initiator);
        let (op, verdict) = self.ctx.dispatcher.describe_db(vdb, &opts).await?;
        if verdict.is_aborted() {
            return Ok(verdict);
        }
        self.run_revive_planner(vdb, &op).await
    }

    async fn exec_cmd(
        &mut self,
        vdb: &VerticaDB,
        initiator: &NamespacedName,
        hosts: Vec<String>,
    ) -> Result<Verdict> {
        let opts = self.gen_revive_opts(vdb, initiator, hosts);
        self.ctx.events.event(
            vdb,
            EventType::Normal,
            EventReason::ReviveDBStart,
            "Starting revive database",
        );
        let start = Instant::now();
        let verdict = self.ctx.dispatcher.revive_db(vdb, &opts).await?;
        if verdict.is_aborted() {
            return Ok(verdict);
        }
        self.ctx.events.event(
            vdb,
            EventType::Normal,
            EventReason::ReviveDBSucceeded,
            &format!(
                "Successfully revived database. It took {:?}",
                start.elapsed()
            ),
        );
        Ok(Verdict::Done)
    }

    async fn post_cmd_cleanup(&mut self, _vdb: &VerticaDB) -> Result<Verdict> {
        Ok(Verdict::Done)
    }
}

#[async_trait]
impl ReconcileActor for ReviveReconciler {
    fn name(&self) -> &'static str {
        "revive"
    }

    async fn reconcile(&mut self, vdb: &mut VerticaDB, pfacts: &mut PodFacts) -> Result<Verdict> {
        if vdb.spec.init_policy != InitPolicy::Revive {
            return Ok(Verdict::Done);
        }
        let runner = self.ctx.runner.clone();
        check_and_run_init(self, runner.as_ref(), vdb, pfacts).await
    }
}
