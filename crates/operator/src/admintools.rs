//! `Dispatcher` that drives the cluster with admintools
//!
//! Every command runs in the server container of the initiator pod.

use async_trait::async_trait;
use operator_lib::atconf::AdmintoolsConf;
use operator_lib::dispatcher::{
    DescribeDbOpts, Dispatcher, FetchNodeStateOpts, ReIpHost, ReIpOpts, RestartNodeOpts,
    ReviveDbOpts, StartDbOpts,
};
use operator_lib::error::{ReconcileError, Result};
use operator_lib::events::{EventReason, EventRecorder, EventType};
use operator_lib::exec::{ExecOutput, PodRunner};
use operator_lib::names::SERVER_CONTAINER;
use operator_lib::paths::{ADMINTOOLS, ADMIN_TOOLS_CONF, REIP_MAP_FILE};
use operator_lib::vdb::VerticaDB;
use operator_lib::{NamespacedName, Verdict};
use std::collections::HashMap;
use std::sync::Arc;
use tracing::{debug, info};

/// Output fragments of a failed revive that the user can fix, with the
/// message sent to them
const REVIVE_FAILURES: &[(&str, &str)] = &[
    (
        "cluster lease",
        "revive_db failed because the cluster lease has not expired. Another \
         instance of the database may still be running against communal storage",
    ),
    (
        "Could not copy file",
        "revive_db failed because the database was not found in communal storage",
    ),
    (
        "Permission Denied",
        "revive_db failed because of a permission problem accessing communal storage",
    ),
    (
        "does not exist",
        "revive_db failed because the communal path does not exist",
    ),
];

pub struct AdmintoolsDispatcher {
    runner: Arc<dyn PodRunner>,
    events: Arc<dyn EventRecorder>,
}

impl AdmintoolsDispatcher {
    pub fn new(runner: Arc<dyn PodRunner>, events: Arc<dyn EventRecorder>) -> Self {
        Self { runner, events }
    }

    async fn admintools(
        &self,
        command: &'static str,
        pod: &NamespacedName,
        args: Vec<String>,
    ) -> Result<ExecOutput> {
        let mut cmd = vec![ADMINTOOLS, "-t", command];
        cmd.extend(args.iter().map(String::as_str));
        info!(pod = %pod, command, "Running admintools");
        self.runner
            .exec_in_pod(pod, SERVER_CONTAINER, &cmd)
            .await
            .map_err(|e| ReconcileError::AdminCommand {
                command,
                message: e.to_string(),
            })
    }

    /// Lines of `old new` for the hosts whose IP changed since the
    /// admintools.conf on the initiator was written
    async fn gen_reip_map(&self, pod: &NamespacedName, hosts: &[ReIpHost]) -> Result<String> {
        let out = self
            .runner
            .exec_in_pod(pod, SERVER_CONTAINER, &["cat", ADMIN_TOOLS_CONF])
            .await?;
        let conf = AdmintoolsConf::parse(&out.stdout)?;
        Ok(build_reip_map(&conf, hosts))
    }
}

/// Node state per vnode from `list_allnodes`
pub fn parse_node_states(stdout: &str) -> HashMap<String, String> {
    stdout
        .lines()
        .filter_map(|line| {
            let cols: Vec<&str> = line.split('|').map(str::trim).collect();
            match cols.as_slice() {
                [node, _host, state, ..] if node.starts_with("v_") => {
                    Some((node.to_string(), state.to_string()))
                }
                _ => None,
            }
        })
        .collect()
}

pub fn build_reip_map(conf: &AdmintoolsConf, hosts: &[ReIpHost]) -> String {
    let mut map = String::new();
    for h in hosts {
        let Some(old_ip) = conf
            .get("Nodes", &h.compat21_node_name)
            .and_then(|v| v.split(',').next())
        else {
            debug!(node = %h.compat21_node_name, "Node not in admintools.conf, skipping re-ip");
            continue;
        };
        if old_ip != h.ip {
            map.push_str(&format!("{} {}\n", old_ip, h.ip));
        }
    }
    map
}

fn revive_failure_message(output: &str) -> Option<&'static str> {
    REVIVE_FAILURES
        .iter()
        .find(|(pattern, _)| output.contains(pattern))
        .map(|(_, msg)| *msg)
}

fn join<'a>(items: impl Iterator<Item = &'a str>) -> String {
    items.collect::<Vec<_>>().join(",")
}

#[async_trait]
impl Dispatcher for AdmintoolsDispatcher {
    async fn fetch_node_state(
        &self,
        _vdb: &VerticaDB,
        opts: &FetchNodeStateOpts,
    ) -> Result<(HashMap<String, String>, Verdict)> {
        let out = self
            .admintools("list_allnodes", &opts.initiator.pod, Vec::new())
            .await?;
        let mut states = parse_node_states(&out.stdout);
        states.retain(|vnode, _| opts.hosts.iter().any(|h| &h.vnode == vnode));
        Ok((states, Verdict::Done))
    }

    async fn restart_node(&self, vdb: &VerticaDB, opts: &RestartNodeOpts) -> Result<Verdict> {
        let args = vec![
            format!("--database={}", vdb.spec.db_name),
            format!("--hosts={}", join(opts.hosts.iter().map(|h| h.vnode.as_str()))),
            format!("--new-host-ips={}", join(opts.hosts.iter().map(|h| h.ip.as_str()))),
            "--noprompt".to_string(),
        ];
        self.admintools("restart_node", &opts.initiator.pod, args)
            .await?;
        Ok(Verdict::Done)
    }

    async fn re_ip(&self, _vdb: &VerticaDB, opts: &ReIpOpts) -> Result<Verdict> {
        let map = self.gen_reip_map(&opts.initiator.pod, &opts.hosts).await?;
        if map.is_empty() {
            debug!("No IP changes to apply");
            return Ok(Verdict::Done);
        }
        self.runner
            .copy_to_pod(
                &opts.initiator.pod,
                SERVER_CONTAINER,
                map.as_bytes(),
                REIP_MAP_FILE,
                &[],
            )
            .await?;
        let args = vec![format!("--file={REIP_MAP_FILE}"), "--noprompt".to_string()];
        self.admintools("re_ip", &opts.initiator.pod, args).await?;
        Ok(Verdict::Done)
    }

    async fn start_db(&self, vdb: &VerticaDB, opts: &StartDbOpts) -> Result<Verdict> {
        let args = vec![
            format!("--database={}", vdb.spec.db_name),
            format!("--hosts={}", opts.hosts.join(",")),
            "--noprompt".to_string(),
        ];
        self.admintools("start_db", &opts.initiator.pod, args).await?;
        Ok(Verdict::Done)
    }

    async fn revive_db(&self, vdb: &VerticaDB, opts: &ReviveDbOpts) -> Result<Verdict> {
        let mut args = vec![
            format!("--hosts={}", opts.hosts.join(",")),
            format!("--database={}", opts.db_name),
        ];
        if let Some(path) = &opts.communal_path {
            args.push(format!("--communal-storage-location={path}"));
        }
        if let Some(params) = &opts.communal_storage_params {
            args.push(format!("--communal-storage-params={params}"));
        }
        if opts.ignore_cluster_lease {
            args.push("--ignore-cluster-lease".to_string());
        }
        args.push("--force".to_string());

        match self.admintools("revive_db", &opts.initiator, args).await {
            Ok(_) => Ok(Verdict::Done),
            Err(ReconcileError::AdminCommand { message, .. }) => {
                match revive_failure_message(&message) {
                    Some(msg) => {
                        self.events
                            .event(vdb, EventType::Warning, EventReason::ReviveDBFailed, msg);
                        Ok(Verdict::Requeue)
                    }
                    None => Err(ReconcileError::AdminCommand {
                        command: "revive_db",
                        message,
                    }),
                }
            }
            Err(e) => Err(e),
        }
    }

    async fn describe_db(
        &self,
        _vdb: &VerticaDB,
        opts: &DescribeDbOpts,
    ) -> Result<(String, Verdict)> {
        let args = vec![
            format!("--database={}", opts.db_name),
            format!("--communal-storage-location={}", opts.communal_path),
            format!("--communal-storage-params={}", opts.communal_storage_params),
            "--display-only".to_string(),
        ];
        let out = self.admintools("revive_db", &opts.initiator, args).await?;
        Ok((out.stdout, Verdict::Done))
    }
}
