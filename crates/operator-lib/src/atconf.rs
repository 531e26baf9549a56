//! admintools.conf handling for the install engine
//!
//! New hosts are merged into the config taken from an already installed
//! pod, then the result is pushed to every pod that should share it. Each
//! new host gets a `nodeNNNN = <ip>,<catalog>,<data>` entry; the node name
//! later becomes the pod's install indicator.

use crate::error::{ReconcileError, Result};
use crate::exec::PodRunner;
use crate::names::{NamespacedName, SERVER_CONTAINER};
use crate::paths::ADMIN_TOOLS_CONF;
use crate::podfacts::PodFact;
use crate::vdb::VerticaDB;
use std::fmt::Write;
use tracing::{debug, info};

const CLUSTER_SECTION: &str = "Cluster";
const NODES_SECTION: &str = "Nodes";
const HOSTS_KEY: &str = "hosts";

/// Settings admintools expects when there is no config yet
const DEFAULT_CONFIGURATION: &[(&str, &str)] = &[
    ("format", "3"),
    ("install_opts", ""),
    ("default_base", "/home/dbadmin"),
    ("controlmode", "pt2pt"),
    ("controlsubnet", "default"),
    ("spreadlog", "False"),
    ("last_port", "5433"),
    ("tmp_dir", "/tmp"),
    ("atdebug", "False"),
    ("atgui_default_license", "False"),
    ("unreachable_host_caching", "True"),
    ("aws_metadata_conn_timeout", "2"),
    ("rebalance_shards_timeout", "36000"),
    ("database_state_change_poll_timeout", "21600"),
    ("wait_for_shutdown_timeout", "3600"),
    ("pexpect_verbose_logging", "False"),
    ("sync_catalog_retries", "2000"),
    ("admintools_config_version", "110"),
    ("thread_timeout", "1200"),
    ("ipv6", "False"),
];

#[derive(Debug, Clone, Default, PartialEq)]
struct Section {
    name: String,
    entries: Vec<(String, String)>,
}

impl Section {
    fn get(&self, key: &str) -> Option<&str> {
        self.entries
            .iter()
            .find(|(k, _)| k == key)
            .map(|(_, v)| v.as_str())
    }

    fn set(&mut self, key: &str, value: String) {
        match self.entries.iter_mut().find(|(k, _)| k == key) {
            Some(entry) => entry.1 = value,
            None => self.entries.push((key.to_string(), value)),
        }
    }
}

/// In-memory admintools.conf that keeps section and key order
#[derive(Debug, Clone, Default, PartialEq)]
pub struct AdmintoolsConf {
    sections: Vec<Section>,
}

impl AdmintoolsConf {
    pub fn parse(text: &str) -> Result<Self> {
        let mut conf = Self::default();
        for (lineno, raw) in text.lines().enumerate() {
            let line = raw.trim();
            if line.is_empty() || line.starts_with('#') || line.starts_with(';') {
                continue;
            }
            if let Some(name) = line.strip_prefix('[').and_then(|l| l.strip_suffix(']')) {
                conf.sections.push(Section {
                    name: name.trim().to_string(),
                    ..Default::default()
                });
                continue;
            }
            let (Some(section), Some((key, value))) = (conf.sections.last_mut(), line.split_once('='))
            else {
                return Err(ReconcileError::Parse {
                    what: "admintools.conf",
                    message: format!("unexpected line {}: {raw}", lineno + 1),
                });
            };
            section
                .entries
                .push((key.trim().to_string(), value.trim().to_string()));
        }
        Ok(conf)
    }

    /// Config for a brand new cluster with no hosts
    pub fn new_cluster() -> Self {
        let configuration = Section {
            name: "Configuration".to_string(),
            entries: DEFAULT_CONFIGURATION
                .iter()
                .map(|(k, v)| (k.to_string(), v.to_string()))
                .collect(),
        };
        let mut cluster = Section {
            name: CLUSTER_SECTION.to_string(),
            ..Default::default()
        };
        cluster.set(HOSTS_KEY, String::new());
        Self {
            sections: vec![
                configuration,
                cluster,
                Section {
                    name: NODES_SECTION.to_string(),
                    ..Default::default()
                },
            ],
        }
    }

    pub fn get(&self, section: &str, key: &str) -> Option<&str> {
        self.section(section).and_then(|s| s.get(key))
    }

    pub fn hosts(&self) -> Vec<String> {
        self.get(CLUSTER_SECTION, HOSTS_KEY)
            .map(|h| {
                h.split(',')
                    .map(str::trim)
                    .filter(|h| !h.is_empty())
                    .map(String::from)
                    .collect()
            })
            .unwrap_or_default()
    }

    /// Node name whose entry starts with `ip`
    pub fn node_for_ip(&self, ip: &str) -> Option<&str> {
        self.section(NODES_SECTION)?
            .entries
            .iter()
            .find(|(k, v)| is_node_key(k) && v.split(',').next() == Some(ip))
            .map(|(k, _)| k.as_str())
    }

    /// Add each IP to the host list and give it a node entry. IPs that
    /// are already known are left alone.
    pub fn add_hosts(&mut self, vdb: &VerticaDB, ips: &[String]) {
        let mut hosts = self.hosts();
        let mut next_node = self.max_node_number() + 1;
        let catalog = vdb.spec.local.get_catalog_path().to_string();
        let data = vdb.spec.local.data_path.clone();

        for ip in ips {
            if !hosts.contains(ip) {
                hosts.push(ip.clone());
            }
            if self.node_for_ip(ip).is_some() {
                continue;
            }
            let key = format!("node{next_node:04}");
            next_node += 1;
            self.section_mut(NODES_SECTION)
                .set(&key, format!("{ip},{catalog},{data}"));
        }
        self.section_mut(CLUSTER_SECTION)
            .set(HOSTS_KEY, hosts.join(","));
    }

    pub fn render(&self) -> String {
        let mut out = String::new();
        for (i, section) in self.sections.iter().enumerate() {
            if i > 0 {
                out.push('\n');
            }
            let _ = writeln!(out, "[{}]", section.name);
            for (k, v) in &section.entries {
                let _ = writeln!(out, "{k} = {v}");
            }
        }
        out
    }

    fn section(&self, name: &str) -> Option<&Section> {
        self.sections.iter().find(|s| s.name == name)
    }

    fn section_mut(&mut self, name: &str) -> &mut Section {
        let idx = match self.sections.iter().position(|s| s.name == name) {
            Some(idx) => idx,
            None => {
                self.sections.push(Section {
                    name: name.to_string(),
                    ..Default::default()
                });
                self.sections.len() - 1
            }
        };
        &mut self.sections[idx]
    }

    fn max_node_number(&self) -> u32 {
        self.section(NODES_SECTION)
            .map(|s| {
                s.entries
                    .iter()
                    .filter_map(|(k, _)| k.strip_prefix("node").and_then(|n| n.parse().ok()))
                    .max()
                    .unwrap_or(0)
            })
            .unwrap_or(0)
    }
}

fn is_node_key(key: &str) -> bool {
    key.len() == 8
        && key
            .strip_prefix("node")
            .map(|n| n.bytes().all(|b| b.is_ascii_digit()))
            .unwrap_or(false)
}

/// Merge `ips` into the config of `base_pod`, or into a fresh config when
/// nothing is installed yet, and return the rendered file
pub async fn add_hosts(
    runner: &dyn PodRunner,
    vdb: &VerticaDB,
    base_pod: Option<&NamespacedName>,
    ips: &[String],
) -> Result<String> {
    let mut conf = match base_pod {
        Some(pod) => {
            let out = runner
                .exec_in_pod(pod, SERVER_CONTAINER, &["cat", ADMIN_TOOLS_CONF])
                .await?;
            AdmintoolsConf::parse(&out.stdout)?
        }
        None => AdmintoolsConf::new_cluster(),
    };
    conf.add_hosts(vdb, ips);
    debug!(hosts = ?conf.hosts(), "Merged hosts into admintools.conf");
    Ok(conf.render())
}

/// Copy the config to every given pod
pub async fn distribute(runner: &dyn PodRunner, pods: &[PodFact], contents: &str) -> Result<()> {
    for pf in pods {
        runner
            .copy_to_pod(
                &pf.name,
                SERVER_CONTAINER,
                contents.as_bytes(),
                ADMIN_TOOLS_CONF,
                &[],
            )
            .await
            .map_err(|e| {
                ReconcileError::exec(&pf.name, format!("failed to copy admintools.conf: {e}"))
            })?;
    }
    info!(pods = pods.len(), "Distributed admintools.conf");
    Ok(())
}

/// Command that writes the pod's node name from admintools.conf into the
/// install indicator
pub fn gen_create_install_indicator_cmd(vdb: &VerticaDB, pf: &PodFact) -> Vec<String> {
    vec![
        "bash".to_string(),
        "-c".to_string(),
        format!(
            "grep -E '^node[0-9]{{4}} = {},' {} | head -1 | cut -d' ' -f1 | tee {}",
            pf.pod_ip.replace('.', "\\."),
            ADMIN_TOOLS_CONF,
            vdb.installer_indicator_file_name()
        ),
    ]
}

pub async fn create_install_indicators(
    runner: &dyn PodRunner,
    vdb: &VerticaDB,
    pods: &[PodFact],
) -> Result<()> {
    for pf in pods {
        info!(pod = %pf.name, "Creating install indicator");
        let cmd = gen_create_install_indicator_cmd(vdb, pf);
        let args: Vec<&str> = cmd.iter().map(String::as_str).collect();
        runner
            .exec_in_pod(&pf.name, SERVER_CONTAINER, &args)
            .await
            .map_err(|e| {
                ReconcileError::exec(
                    &pf.name,
                    format!("failed to create install indicator with '{}': {e}", cmd[2]),
                )
            })?;
    }
    Ok(())
}
