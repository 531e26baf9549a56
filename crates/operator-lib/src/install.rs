//! Install engine
//!
//! Pods are installed strictly in index order within each subcluster: a
//! pod is only added to admintools.conf once every pod before it is
//! installed. Installing means merging the pod's IP into the shared
//! config, pushing that config out and writing the pod's install indicator.

use crate::atconf;
use crate::error::{ReconcileError, Result};
use crate::events::{EventReason, EventType};
use crate::httpconf;
use crate::names::{gen_namespaced_name, gen_pod_name, SERVER_CONTAINER};
use crate::paths::{ADMIN_TOOLS_CONF, HTTP_TLS_CONF_FILE};
use crate::pod_setup;
use crate::podfacts::{host_list, pod_names, PodFact, PodFacts};
use crate::reconciler::{ReconcileActor, ReconcileContext};
use crate::vdb::{InitPolicy, VerticaDB};
use crate::verdict::Verdict;
use crate::version::HTTP_SERVER_MIN_VERSION;
use async_trait::async_trait;
use tracing::info;

pub struct InstallReconciler {
    ctx: ReconcileContext,
}

impl InstallReconciler {
    pub fn new(ctx: ReconcileContext) -> Self {
        Self { ctx }
    }

    async fn analyze_facts(&self, vdb: &VerticaDB, pfacts: &mut PodFacts) -> Result<Verdict> {
        if let Some(pod) = pfacts.any_installed_pods_not_running() {
            info!(pod = %pod, "At least one installed pod isn't running, aborting the install");
            return Ok(Verdict::Requeue);
        }
        if let Some(pod) = pfacts.any_uninstalled_transient_pods_not_running() {
            info!(pod = %pod, "At least one transient pod isn't running and isn't installed");
            return Ok(Verdict::Requeue);
        }

        let runner = self.ctx.runner.as_ref();
        pod_setup::accept_eula_if_missing(pfacts, runner).await?;
        pod_setup::create_config_dirs_if_necessary(pfacts, runner, self.do_http_install(vdb, false))
            .await?;
        self.add_hosts_to_at_conf(vdb, pfacts).await?;
        self.generate_http_certs(vdb, pfacts).await?;
        Ok(Verdict::Done)
    }

    async fn add_hosts_to_at_conf(&self, vdb: &VerticaDB, pfacts: &mut PodFacts) -> Result<()> {
        let targets = self.get_install_targets(vdb, pfacts).await?;
        if targets.is_empty() {
            return Ok(());
        }
        info!(pods = %pod_names(&targets), "Installing pods");

        let mut pods = pfacts.find_installed_pods();
        let base_pod = pods.first().map(|p| p.name.clone());
        let runner = self.ctx.runner.as_ref();
        let contents =
            atconf::add_hosts(runner, vdb, base_pod.as_ref(), &host_list(&targets)).await?;

        pods.extend(targets.iter().cloned());
        atconf::distribute(runner, &pods, &contents).await?;
        pfacts.invalidate();

        atconf::create_install_indicators(runner, vdb, &targets).await
    }

    /// Pods to install this round. The scan of a subcluster stops at the
    /// first pod that can't be installed yet so that indices stay in order.
    pub async fn get_install_targets(
        &self,
        vdb: &VerticaDB,
        pfacts: &PodFacts,
    ) -> Result<Vec<PodFact>> {
        let mut targets = Vec::new();
        for sc in &vdb.spec.subclusters {
            let start = vdb
                .find_subcluster_status(&sc.name)
                .map(|s| s.install_count)
                .unwrap_or(0);
            for i in start..sc.size {
                let Some(pf) = pfacts.get(&gen_pod_name(vdb, sc, i)) else {
                    break;
                };
                if pf.is_installed || pf.db_exists {
                    continue;
                }
                if !pf.is_pod_running {
                    break;
                }
                if pf.has_stale_admintools_conf {
                    self.remove_old_config(vdb, pf).await?;
                }
                targets.push(pf.clone());
            }
        }
        Ok(targets)
    }

    /// Move aside a config left behind by an earlier database with the
    /// same pod names
    async fn remove_old_config(&self, vdb: &VerticaDB, pf: &PodFact) -> Result<()> {
        let backup = format!("{ADMIN_TOOLS_CONF}.uid.{}", vdb.instance_uid());
        self.ctx
            .runner
            .exec_in_pod(
                &pf.name,
                SERVER_CONTAINER,
                &["mv", ADMIN_TOOLS_CONF, backup.as_str()],
            )
            .await
            .map_err(|e| {
                ReconcileError::exec(&pf.name, format!("failed to remove old admintools.conf: {e}"))
            })?;
        Ok(())
    }

    async fn generate_http_certs(&self, vdb: &VerticaDB, pfacts: &PodFacts) -> Result<()> {
        if !self.do_http_install(vdb, true) {
            return Ok(());
        }
        let secret = gen_namespaced_name(vdb, &vdb.spec.http_server_secret);
        for pf in pfacts
            .iter()
            .filter(|v| v.is_pod_running && !v.has_file(HTTP_TLS_CONF_FILE))
        {
            let contents = httpconf::gen_conf(self.ctx.platform.as_ref(), &secret).await?;
            self.ctx
                .runner
                .copy_to_pod(
                    &pf.name,
                    SERVER_CONTAINER,
                    contents.as_bytes(),
                    HTTP_TLS_CONF_FILE,
                    &[],
                )
                .await
                .map_err(|e| {
                    ReconcileError::exec(
                        &pf.name,
                        format!("failed to copy {HTTP_TLS_CONF_FILE}: {e}"),
                    )
                })?;
        }
        Ok(())
    }

    /// True when the operator should set up the http server's certs.
    /// Servers too old for it get a warning event when `log_event` is set.
    fn do_http_install(&self, vdb: &VerticaDB, log_event: bool) -> bool {
        if !vdb.is_http_server_enabled() {
            return false;
        }
        let supported = vdb
            .version_info()
            .map(|v| !v.is_older(HTTP_SERVER_MIN_VERSION))
            .unwrap_or(false);
        if !supported && log_event {
            self.ctx.events.event(
                vdb,
                EventType::Warning,
                EventReason::HTTPServerNotSetup,
                &format!(
                    "Skipping http server cert setup because the Vertica version doesn't have \
                     support for it. A Vertica version of '{HTTP_SERVER_MIN_VERSION}' or newer is needed"
                ),
            );
        }
        supported
    }
}

#[async_trait]
impl ReconcileActor for InstallReconciler {
    fn name(&self) -> &'static str {
        "install"
    }

    async fn reconcile(&mut self, vdb: &mut VerticaDB, pfacts: &mut PodFacts) -> Result<Verdict> {
        if vdb.spec.init_policy == InitPolicy::ScheduleOnly {
            return Ok(Verdict::Done);
        }
        pfacts.collect(vdb).await?;
        self.analyze_facts(vdb, pfacts).await
    }
}
