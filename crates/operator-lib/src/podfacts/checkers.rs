//! Steps that derive a [`PodFact`] from the probe output
//!
//! They run in a fixed order, each one reading what earlier steps set.
//! The pure steps only look at the VerticaDB and the probe output; the
//! async ones run a query in the pod and treat a failed query as the
//! server being down.

use super::fact::{GatherState, PodFact};
use crate::error::{ReconcileError, Result};
use crate::exec::PodRunner;
use crate::names::SERVER_CONTAINER;
use crate::paths::ADMIN_TOOLS_CONF;
use crate::vdb::{InitPolicy, VerticaDB};
use crate::version::NODES_HAVE_READ_ONLY_STATE_VERSION;
use tracing::debug;

/// Installed state, seeded from the persisted install count and refined
/// from the pod when it's running
pub fn check_is_installed(vdb: &VerticaDB, pf: &mut PodFact, gs: &GatherState) {
    pf.is_installed = vdb
        .find_subcluster_status(&pf.subcluster_name)
        .map(|scs| scs.install_count > pf.pod_index)
        .unwrap_or(false);
    if !pf.is_pod_running {
        return;
    }

    // The operator didn't do the install under ScheduleOnly, so there is no
    // indicator and the compat21 name can't be trusted.
    if vdb.spec.init_policy == InitPolicy::ScheduleOnly {
        if !pf.is_installed {
            pf.is_installed = gs.file_exists.get(ADMIN_TOOLS_CONF).copied().unwrap_or(false);
        }
        pf.compat21_node_name.clear();
        return;
    }

    pf.is_installed = gs.install_indicator_exists;
    if pf.is_installed {
        pf.compat21_node_name = gs.compat21_node_name.clone();
    } else {
        pf.has_stale_admintools_conf =
            gs.file_exists.get(ADMIN_TOOLS_CONF).copied().unwrap_or(false);
    }
}

/// Database membership, seeded from the persisted added-to-db count
pub fn check_is_db_created(vdb: &VerticaDB, pf: &mut PodFact, gs: &GatherState) {
    pf.db_exists = false;
    if let Some(scs) = vdb.find_subcluster_status(&pf.subcluster_name) {
        pf.db_exists = scs.added_to_db_count > pf.pod_index;
        if let Some(detail) = usize::try_from(pf.pod_index)
            .ok()
            .and_then(|i| scs.detail.get(i))
        {
            pf.vnode_name = detail.vnode_name.clone();
        }
    }
    if !pf.is_pod_running {
        return;
    }
    pf.db_exists = gs.db_exists;
    pf.vnode_name = gs.vnode_name.clone();
}

pub fn check_for_simple_gather_state_mapping(_vdb: &VerticaDB, pf: &mut PodFact, gs: &GatherState) {
    if !pf.is_pod_running {
        return;
    }
    pf.eula_accepted = gs.eula_accepted;
    pf.dir_exists = gs.dir_exists.clone();
    pf.file_exists = gs.file_exists.clone();
    pf.local_data_size = gs.local_data_size;
    pf.local_data_avail = gs.local_data_avail;
    pf.agent_running = gs.agent_running;
    pf.image_has_agent_keys = gs.image_has_agent_keys;
    pf.is_http_server_running = gs.is_http_server_running;
    pf.up_node = pf.db_exists && gs.vertica_pid_running;
}

/// A node with a running process that isn't up yet is still starting
pub fn check_if_node_is_doing_startup(_vdb: &VerticaDB, pf: &mut PodFact, gs: &GatherState) {
    pf.startup_in_progress = false;
    if !pf.db_exists || !pf.is_pod_running || pf.up_node || !gs.vertica_pid_running {
        return;
    }
    pf.startup_in_progress = !gs.startup_complete;
}

/// Query for the subcluster oid and read-only state of the node the
/// session lands on
pub fn gen_node_status_query(vdb: &VerticaDB) -> String {
    let mut cols = if vdb.is_eon() {
        "subcluster_oid".to_string()
    } else {
        "''".to_string()
    };
    // Read-only is only a node state from 11.0.2 on
    if vdb
        .version_info()
        .map(|v| v.is_equal_or_newer(NODES_HAVE_READ_ONLY_STATE_VERSION))
        .unwrap_or(false)
    {
        cols.push_str(", is_readonly");
    }
    if vdb.is_eon() {
        format!(
            "select {cols} from nodes as n, subclusters as s \
             where s.node_oid = n.node_id and n.node_name in (select node_name from current_session)"
        )
    } else {
        format!(
            "select {cols} from nodes as n \
             where n.node_name in (select node_name from current_session)"
        )
    }
}

pub async fn check_node_status(
    runner: &dyn PodRunner,
    vdb: &VerticaDB,
    pf: &mut PodFact,
) -> Result<()> {
    if !pf.up_node {
        return Ok(());
    }
    let sql = gen_node_status_query(vdb);
    let out = match runner
        .exec_vsql(&pf.name, SERVER_CONTAINER, &["-tAc", sql.as_str()])
        .await
    {
        Ok(out) => out,
        Err(e) => {
            debug!(pod = %pf.name, error = %e, "Node status query failed, treating server as down");
            return Ok(());
        }
    };
    let (read_only, oid) = parse_node_state_and_read_only(&out.stdout)?;
    pf.read_only = read_only;
    pf.subcluster_oid = oid;
    Ok(())
}

/// Parse `oid|ro` from the first line of the node status query. The
/// read-only column is missing on servers that don't have that state.
pub fn parse_node_state_and_read_only(stdout: &str) -> Result<(bool, String)> {
    if stdout.is_empty() {
        return Ok((false, String::new()));
    }
    let first = stdout.lines().next().unwrap_or_default();
    let cols: Vec<&str> = first.split('|').collect();
    const MAX_EXPECTED_COLS: usize = 2;
    if cols.len() > MAX_EXPECTED_COLS {
        return Err(ReconcileError::UnexpectedColumns {
            query: "node status",
            expected: MAX_EXPECTED_COLS,
            got: cols.len(),
        });
    }
    let read_only = cols.get(1).map(|c| *c == "t").unwrap_or(false);
    Ok((read_only, cols[0].to_string()))
}

pub async fn check_shard_subscriptions(
    runner: &dyn PodRunner,
    pf: &mut PodFact,
    gs: &GatherState,
) -> Result<()> {
    if !pf.is_pod_running || !pf.db_exists || !gs.vertica_pid_running {
        return Ok(());
    }
    let sql = format!(
        "select count(*) from v_catalog.node_subscriptions where node_name = '{}' and shard_name != 'replica'",
        pf.vnode_name
    );
    match runner
        .exec_vsql(&pf.name, SERVER_CONTAINER, &["-tAc", sql.as_str()])
        .await
    {
        Ok(out) => {
            if let Some(subs) = parse_shard_subscriptions(&out.stdout)? {
                pf.shard_subscriptions = subs;
            }
            Ok(())
        }
        Err(e) => {
            debug!(pod = %pf.name, error = %e, "Shard subscription query failed, skipping");
            Ok(())
        }
    }
}

pub fn parse_shard_subscriptions(stdout: &str) -> Result<Option<i32>> {
    let Some(first) = stdout.lines().next() else {
        return Ok(None);
    };
    first
        .trim()
        .parse()
        .map(Some)
        .map_err(|source| ReconcileError::InvalidNumber {
            what: "shard subscriptions",
            value: first.to_string(),
            source,
        })
}

pub async fn query_depot_details(
    runner: &dyn PodRunner,
    pf: &mut PodFact,
    gs: &GatherState,
) -> Result<()> {
    if !pf.is_pod_running || !pf.up_node || !gs.vertica_pid_running {
        return Ok(());
    }
    let sql = format!(
        "select max_size, disk_percent from storage_locations \
         where location_usage = 'DEPOT' and node_name = '{}'",
        pf.vnode_name
    );
    match runner
        .exec_vsql(&pf.name, SERVER_CONTAINER, &["-tAc", sql.as_str()])
        .await
    {
        Ok(out) => set_depot_details(pf, &out.stdout),
        Err(e) => {
            debug!(pod = %pf.name, error = %e, "Depot query failed, skipping");
            Ok(())
        }
    }
}

pub fn set_depot_details(pf: &mut PodFact, stdout: &str) -> Result<()> {
    let Some(first) = stdout.lines().next() else {
        return Ok(());
    };
    let cols: Vec<&str> = first.split('|').collect();
    const EXPECTED_COLS: usize = 2;
    if cols.len() != EXPECTED_COLS {
        return Err(ReconcileError::UnexpectedColumns {
            query: "storage_locations",
            expected: EXPECTED_COLS,
            got: cols.len(),
        });
    }
    pf.max_depot_size = cols[0]
        .trim()
        .parse()
        .map_err(|source| ReconcileError::InvalidNumber {
            what: "depot max size",
            value: cols[0].to_string(),
            source,
        })?;
    pf.depot_disk_percent_size = cols[1].to_string();
    Ok(())
}
