//! Shared flow for reconcilers that bring a database into existence
//!
//! The database-specific parts (which pods, what command) come from a
//! [`DatabaseInitializer`]; [`check_and_run_init`] decides when to run them.

use crate::error::{ReconcileError, Result};
use crate::exec::PodRunner;
use crate::names::{NamespacedName, SERVER_CONTAINER};
use crate::paths::AUTH_PARMS_FILE;
use crate::podfacts::{host_list, PodFact, PodFacts};
use crate::vdb::VerticaDB;
use crate::verdict::Verdict;
use async_trait::async_trait;
use std::collections::BTreeMap;
use tracing::info;

#[async_trait]
pub trait DatabaseInitializer: Send {
    /// Pods that take part in the command, in the order they're passed to
    /// it. `None` if the VerticaDB doesn't allow building the list.
    fn get_pod_list(&self, vdb: &VerticaDB, pfacts: &PodFacts) -> Option<Vec<PodFact>>;

    fn find_pod_to_run_init(&self, pfacts: &PodFacts) -> Option<PodFact>;

    async fn pre_cmd_setup(
        &mut self,
        vdb: &VerticaDB,
        initiator: &NamespacedName,
        pods: &[PodFact],
    ) -> Result<Verdict>;

    async fn exec_cmd(
        &mut self,
        vdb: &VerticaDB,
        initiator: &NamespacedName,
        hosts: Vec<String>,
    ) -> Result<Verdict>;

    async fn post_cmd_cleanup(&mut self, vdb: &VerticaDB) -> Result<Verdict>;
}

/// Run the initializer unless the database already exists
pub async fn check_and_run_init(
    init: &mut dyn DatabaseInitializer,
    runner: &dyn PodRunner,
    vdb: &VerticaDB,
    pfacts: &mut PodFacts,
) -> Result<Verdict> {
    pfacts.collect(vdb).await?;
    if pfacts.does_db_exist() {
        return Ok(Verdict::Done);
    }

    let Some(pods) = init.get_pod_list(vdb, pfacts) else {
        return Ok(Verdict::Requeue);
    };
    if let Some(pf) = pods.iter().find(|p| !p.is_pod_running) {
        info!(pod = %pf.name, "Not all pods are running, requeue");
        return Ok(Verdict::Requeue);
    }
    let Some(initiator) = init.find_pod_to_run_init(pfacts) else {
        info!("No pod found to run the init command from, requeue");
        return Ok(Verdict::Requeue);
    };

    if vdb.is_eon() {
        construct_auth_parms(runner, vdb, &initiator.name).await?;
    }

    let verdict = init.pre_cmd_setup(vdb, &initiator.name, &pods).await?;
    if verdict.is_aborted() {
        return Ok(verdict);
    }
    let verdict = init.exec_cmd(vdb, &initiator.name, host_list(&pods)).await?;
    if verdict.is_aborted() {
        return Ok(verdict);
    }
    pfacts.invalidate();

    init.post_cmd_cleanup(vdb).await
}

/// Communal storage settings passed to the server as configuration
/// parameters
pub fn gen_config_params(vdb: &VerticaDB) -> BTreeMap<String, String> {
    let mut params = BTreeMap::new();
    let endpoint = &vdb.spec.communal.endpoint;
    if !endpoint.is_empty() {
        let (https, host) = match endpoint.split_once("://") {
            Some((scheme, host)) => (scheme.eq_ignore_ascii_case("https"), host),
            None => (true, endpoint.as_str()),
        };
        params.insert("AWSEndpoint".to_string(), host.trim_end_matches('/').to_string());
        params.insert(
            "AWSEnableHttps".to_string(),
            if https { "1" } else { "0" }.to_string(),
        );
    }
    if !vdb.spec.communal.region.is_empty() {
        params.insert("AWSRegion".to_string(), vdb.spec.communal.region.clone());
    }
    params
}

/// Contents of the auth parms file read by the server when it first
/// touches communal storage
pub fn gen_auth_parms(vdb: &VerticaDB) -> String {
    let mut out = String::new();
    for (k, v) in gen_config_params(vdb) {
        out.push_str(&format!("{} = {}\n", k.to_lowercase(), v));
    }
    out
}

/// Write the auth parms file into the initiator pod
pub async fn construct_auth_parms(
    runner: &dyn PodRunner,
    vdb: &VerticaDB,
    initiator: &NamespacedName,
) -> Result<()> {
    let contents = gen_auth_parms(vdb);
    runner
        .copy_to_pod(
            initiator,
            SERVER_CONTAINER,
            contents.as_bytes(),
            AUTH_PARMS_FILE,
            &[],
        )
        .await
        .map_err(|e| ReconcileError::exec(initiator, format!("failed to write auth parms: {e}")))?;
    Ok(())
}
