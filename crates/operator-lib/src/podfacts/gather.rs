//! The probe script run once per pod per collection
//!
//! One exec per pod is far cheaper than one per fact, so every file test,
//! process check and disk query is batched into a single script. The
//! output is YAML and lands directly in [`GatherState`].

use super::fact::{GatherState, PodFact};
use crate::error::{ReconcileError, Result};
use crate::exec::PodRunner;
use crate::names::{SERVER_CONTAINER, VERTICA_HTTP_PORT};
use crate::paths::{
    DBADMIN_AGENT_PATH, EULA_ACCEPTANCE_FILE, POD_FACT_GATHER_SCRIPT, PROBED_DIRS, PROBED_FILES,
};
use crate::vdb::VerticaDB;
use tracing::debug;

/// Render the probe script for one pod
pub fn gen_gather_script(vdb: &VerticaDB, pf: &PodFact) -> String {
    let indicator = vdb.installer_indicator_file_name();
    let db_name = &vdb.spec.db_name;
    let catalog_dir = format!(
        "{}/{}/v_{}_node????_catalog",
        pf.catalog_path,
        db_name,
        db_name.to_lowercase()
    );

    let mut lines = vec![
        "set -o errexit".to_string(),
        "echo -n 'installIndicatorExists: '".to_string(),
        format!("test -f {indicator} && echo true || echo false"),
        "echo -n 'eulaAccepted: '".to_string(),
        format!("test -f {EULA_ACCEPTANCE_FILE} && echo true || echo false"),
        "echo    'dirExists:'".to_string(),
    ];
    for dir in PROBED_DIRS {
        lines.push(format!("echo -n '  {dir}: '"));
        lines.push(format!("test -d {dir} && echo true || echo false"));
    }
    lines.push("echo    'fileExists:'".to_string());
    for file in PROBED_FILES {
        lines.push(format!("echo -n '  {file}: '"));
        lines.push(format!("test -f {file} && echo true || echo false"));
    }
    lines.push("echo -n 'dbExists: '".to_string());
    lines.push(format!(
        "ls --almost-all --hide-control-chars -1 {catalog_dir} 2> /dev/null | grep --quiet . && echo true || echo false"
    ));
    lines.push("echo -n 'compat21NodeName: '".to_string());
    lines.push(format!(
        "test -f {indicator} && echo -n '\"' && echo -n $(cat {indicator}) && echo '\"' || echo '\"\"'"
    ));
    lines.push("echo -n 'vnodeName: '".to_string());
    lines.push(format!(
        "cd {catalog_dir} 2> /dev/null && basename $(pwd) | rev | cut -c9- | rev || echo \"\""
    ));
    lines.push("echo -n 'verticaPIDRunning: '".to_string());
    lines.push("[[ $(pgrep ^vertica) ]] && echo true || echo false".to_string());
    lines.push("echo -n 'startupComplete: '".to_string());
    lines.push(format!(
        "grep --quiet -e 'Startup Complete' -e 'Database Halted' {}/{}/*_catalog/startup.log 2> /dev/null && echo true || echo false",
        pf.catalog_path, db_name
    ));
    lines.push("echo -n 'localDataSize: '".to_string());
    lines.push(format!(
        "df --block-size=1 --output=size {} | tail -1",
        pf.catalog_path
    ));
    lines.push("echo -n 'localDataAvail: '".to_string());
    lines.push(format!(
        "df --block-size=1 --output=avail {} | tail -1",
        pf.catalog_path
    ));
    lines.push("echo -n 'agentRunning: '".to_string());
    lines.push(
        "/opt/vertica/sbin/vertica_agent status | grep --quiet \"running\" && echo true || echo false".to_string(),
    );
    lines.push("echo -n 'imageHasAgentKeys: '".to_string());
    lines.push(format!(
        "ls --almost-all --hide-control-chars -1 {DBADMIN_AGENT_PATH} 2> /dev/null | grep --quiet . && echo true || echo false"
    ));
    lines.push("echo -n 'isHTTPServerRunning: '".to_string());
    lines.push(format!(
        "ss -tulpn 2> /dev/null | grep LISTEN | grep --quiet \":{VERTICA_HTTP_PORT}\" && echo true || echo false"
    ));
    lines.push(String::new());
    lines.join("\n")
}

pub fn parse_gather_output(stdout: &str) -> Result<GatherState> {
    Ok(serde_yaml::from_str(stdout)?)
}

/// Copy the probe script into a running pod, run it and parse what it
/// printed. Pods that aren't running get an empty state.
pub async fn run_gather(
    runner: &dyn PodRunner,
    vdb: &VerticaDB,
    pf: &PodFact,
) -> Result<GatherState> {
    if !pf.is_pod_running {
        return Ok(GatherState::default());
    }
    let script = gen_gather_script(vdb, pf);
    let out = runner
        .copy_to_pod(
            &pf.name,
            SERVER_CONTAINER,
            script.as_bytes(),
            POD_FACT_GATHER_SCRIPT,
            &["bash", POD_FACT_GATHER_SCRIPT],
        )
        .await
        .map_err(|e| {
            ReconcileError::exec(&pf.name, format!("failed to copy and execute the gather script: {e}"))
        })?;
    debug!(pod = %pf.name, bytes = out.stdout.len(), "Gathered pod state");
    parse_gather_output(&out.stdout)
}
