//! Small one-shot preparations made inside running pods before they're
//! installed or restarted

use crate::error::{ReconcileError, Result};
use crate::exec::PodRunner;
use crate::names::SERVER_CONTAINER;
use crate::paths::{
    CONFIG_LOGROTATE_PATH, CONFIG_SHARE_PATH, CREATE_CONFIG_DIRS_SCRIPT, EULA_ACCEPTANCE_SCRIPT,
    HTTP_TLS_CONF_DIR, LOGROTATE_AT_FILE, PYTHON3,
};
use crate::podfacts::{PodFact, PodFacts};
use std::fmt::Write;
use tracing::info;

const EULA_ACCEPTANCE_PY: &str = "import vertica.shared.logging
import vertica.tools.eula_checker
vertica.shared.logging.setup_admintool_logging()
vertica.tools.eula_checker.EulaChecker().write_acceptance()
";

/// Accept the EULA in every running pod that hasn't accepted it yet
pub async fn accept_eula_if_missing(pfacts: &PodFacts, runner: &dyn PodRunner) -> Result<()> {
    for pf in pfacts.iter().filter(|v| v.is_pod_running && !v.eula_accepted) {
        runner
            .copy_to_pod(
                &pf.name,
                SERVER_CONTAINER,
                EULA_ACCEPTANCE_PY.as_bytes(),
                EULA_ACCEPTANCE_SCRIPT,
                &[PYTHON3, EULA_ACCEPTANCE_SCRIPT],
            )
            .await
            .map_err(|e| ReconcileError::exec(&pf.name, format!("failed to accept the EULA: {e}")))?;
        info!(pod = %pf.name, "Accepted EULA");
    }
    Ok(())
}

/// Script that creates whatever config directories the pod is missing.
/// Empty when there's nothing to do.
pub fn gen_create_config_dirs_script(pf: &PodFact, do_http_install: bool) -> String {
    let mut cmds = Vec::new();
    // The logrotate dir comes from the PV mount and may be owned by root
    if pf.has_dir(CONFIG_LOGROTATE_PATH) && !pf.has_file(LOGROTATE_AT_FILE) {
        cmds.push(format!(
            "sudo chown -R dbadmin:verticadba {CONFIG_LOGROTATE_PATH}"
        ));
    }
    if !pf.has_dir(CONFIG_SHARE_PATH) {
        cmds.push(format!("mkdir {CONFIG_SHARE_PATH}"));
    }
    if !do_http_install && !pf.has_dir(HTTP_TLS_CONF_DIR) {
        cmds.push(format!("mkdir -p {HTTP_TLS_CONF_DIR}"));
    }
    if cmds.is_empty() {
        return String::new();
    }

    let mut script = String::from("set -o errexit\n");
    for cmd in cmds {
        let _ = writeln!(script, "{cmd}");
    }
    script
}

/// Run the config dirs script in each running pod that needs it
pub async fn create_config_dirs_if_necessary(
    pfacts: &PodFacts,
    runner: &dyn PodRunner,
    do_http_install: bool,
) -> Result<()> {
    for pf in pfacts.iter().filter(|v| v.is_pod_running) {
        let script = gen_create_config_dirs_script(pf, do_http_install);
        if script.is_empty() {
            continue;
        }
        runner
            .copy_to_pod(
                &pf.name,
                SERVER_CONTAINER,
                script.as_bytes(),
                CREATE_CONFIG_DIRS_SCRIPT,
                &["bash", CREATE_CONFIG_DIRS_SCRIPT],
            )
            .await
            .map_err(|e| {
                ReconcileError::exec(
                    &pf.name,
                    format!("failed to copy and execute the config dirs script: {e}"),
                )
            })?;
    }
    Ok(())
}
