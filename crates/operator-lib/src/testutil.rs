//! Fakes and fixtures shared by the unit tests

use crate::dispatcher::{
    DescribeDbOpts, Dispatcher, FetchNodeStateOpts, ReIpOpts, RestartNodeOpts, ReviveDbOpts,
    StartDbOpts,
};
use crate::error::{PlatformError, ReconcileError, Result};
use crate::events::{EventReason, EventRecorder, EventType};
use crate::exec::{ExecOutput, PodRunner};
use crate::names::{
    gen_pod_name, gen_sts_name, NamespacedName, KUBERNETES_VERSION_ANNOTATION, SERVER_CONTAINER,
    SUBCLUSTER_NAME_LABEL, VERSION_ANNOTATION,
};
use crate::observability::OperatorMetrics;
use crate::paths::POD_FACT_GATHER_SCRIPT;
use crate::platform::PlatformApi;
use crate::podfacts::{GatherState, PodFact, PodFacts};
use crate::reconciler::ReconcileContext;
use crate::vdb::{
    Subcluster, SubclusterStatus, VerticaDB, VerticaDBCondition, VerticaDBSpec, VerticaDBStatus,
};
use crate::verdict::Verdict;
use async_trait::async_trait;
use k8s_openapi::api::apps::v1::{StatefulSet, StatefulSetSpec, StatefulSetStatus};
use k8s_openapi::api::core::v1::{Container, Pod, PodSpec, PodStatus};
use k8s_openapi::apimachinery::pkg::apis::meta::v1::ObjectMeta;
use std::collections::{BTreeMap, HashMap};
use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};
use std::sync::{Arc, Mutex};

pub const TEST_UID: &str = "abcdef-1234";

/// VerticaDB `default/vertdb` with one primary subcluster `sc1` of 3 pods
pub fn make_vdb() -> VerticaDB {
    let mut vdb = VerticaDB::new(
        "vertdb",
        VerticaDBSpec {
            db_name: "vertdb".to_string(),
            auto_restart_vertica: true,
            shard_count: 6,
            subclusters: vec![Subcluster {
                name: "sc1".to_string(),
                size: 3,
                is_primary: true,
            }],
            ..Default::default()
        },
    );
    vdb.metadata.namespace = Some("default".to_string());
    vdb.metadata.uid = Some(TEST_UID.to_string());
    vdb
}

pub fn set_version(vdb: &mut VerticaDB, version: &str) {
    vdb.metadata
        .annotations
        .get_or_insert_with(BTreeMap::new)
        .insert(VERSION_ANNOTATION.to_string(), version.to_string());
}

/// Add persisted install and added-to-db counts for a subcluster
pub fn with_status(mut vdb: VerticaDB, sc_name: &str, install_count: i32, added: i32) -> VerticaDB {
    vdb.status
        .get_or_insert_with(VerticaDBStatus::default)
        .subclusters
        .push(SubclusterStatus {
            name: sc_name.to_string(),
            install_count,
            added_to_db_count: added,
            ..Default::default()
        });
    vdb
}

/// A running, installed-nothing fact for pod `pod_index` of subcluster `sc_index`
pub fn make_fact(vdb: &VerticaDB, sc_index: usize, pod_index: i32) -> PodFact {
    let sc = &vdb.spec.subclusters[sc_index];
    let name = gen_pod_name(vdb, sc, pod_index);
    PodFact {
        dns_name: format!("{}.vertdb", name.name),
        pod_ip: format!("10.0.{}.{}", sc_index, pod_index + 1),
        name,
        pod_index,
        subcluster_name: sc.name.clone(),
        is_primary: sc.is_primary,
        exists: true,
        is_pod_running: true,
        managed_by_parent: true,
        has_dc_table_annotations: true,
        catalog_path: "/data".to_string(),
        ..Default::default()
    }
}

/// A fact for a pod that is installed and part of the database, with its
/// vertica process up
pub fn make_up_fact(vdb: &VerticaDB, sc_index: usize, pod_index: i32) -> PodFact {
    PodFact {
        is_installed: true,
        db_exists: true,
        up_node: true,
        eula_accepted: true,
        vnode_name: format!("v_vertdb_node{:04}", pod_index + 1),
        compat21_node_name: format!("node{:04}", pod_index + 1),
        ..make_fact(vdb, sc_index, pod_index)
    }
}

pub fn make_pod(name: &NamespacedName, ip: &str, running: bool) -> Pod {
    Pod {
        metadata: ObjectMeta {
            name: Some(name.name.clone()),
            namespace: Some(name.namespace.clone()),
            annotations: Some(BTreeMap::from([(
                KUBERNETES_VERSION_ANNOTATION.to_string(),
                "v1.28.2".to_string(),
            )])),
            ..Default::default()
        },
        spec: Some(PodSpec {
            hostname: Some(name.name.clone()),
            subdomain: Some("vertdb".to_string()),
            containers: vec![Container {
                name: SERVER_CONTAINER.to_string(),
                image: Some("vertica/vertica-k8s:12.0.0".to_string()),
                ..Default::default()
            }],
            ..Default::default()
        }),
        status: Some(PodStatus {
            phase: Some(if running { "Running" } else { "Pending" }.to_string()),
            pod_ip: Some(ip.to_string()),
            ..Default::default()
        }),
    }
}

pub fn make_sts(vdb: &VerticaDB, sc: &Subcluster, replicas: i32) -> StatefulSet {
    let name = gen_sts_name(vdb, sc);
    StatefulSet {
        metadata: ObjectMeta {
            name: Some(name.name),
            namespace: Some(name.namespace),
            labels: Some(BTreeMap::from([(
                SUBCLUSTER_NAME_LABEL.to_string(),
                sc.name.clone(),
            )])),
            ..Default::default()
        },
        spec: Some(StatefulSetSpec {
            replicas: Some(replicas),
            ..Default::default()
        }),
        status: Some(StatefulSetStatus {
            update_revision: Some("rev-1".to_string()),
            ..Default::default()
        }),
    }
}

/// What the probe script prints for the given state
pub fn gather_output(gs: &GatherState) -> String {
    serde_yaml::to_string(gs).unwrap()
}

#[derive(Default)]
pub struct FakePlatform {
    pub pods: Mutex<HashMap<NamespacedName, Pod>>,
    pub statefulsets: Mutex<HashMap<NamespacedName, StatefulSet>>,
    pub vdb: Mutex<Option<VerticaDB>>,
    /// Number of upcoming vdb updates that fail with a conflict
    pub conflicts: AtomicU32,
    pub updates: AtomicU32,
    pub get_pod_calls: AtomicU32,
    pub deleted: Mutex<Vec<NamespacedName>>,
    pub conditions: Mutex<Vec<VerticaDBCondition>>,
    pub secrets: Mutex<HashMap<NamespacedName, BTreeMap<String, Vec<u8>>>>,
}

impl FakePlatform {
    pub fn add_pod(&self, pod: Pod) {
        let name = NamespacedName::new(
            pod.metadata.namespace.clone().unwrap_or_default(),
            pod.metadata.name.clone().unwrap_or_default(),
        );
        self.pods.lock().unwrap().insert(name, pod);
    }

    pub fn add_sts(&self, sts: StatefulSet) {
        let name = NamespacedName::new(
            sts.metadata.namespace.clone().unwrap_or_default(),
            sts.metadata.name.clone().unwrap_or_default(),
        );
        self.statefulsets.lock().unwrap().insert(name, sts);
    }

    pub fn deleted(&self) -> Vec<NamespacedName> {
        self.deleted.lock().unwrap().clone()
    }
}

#[async_trait]
impl PlatformApi for FakePlatform {
    async fn get_pod(&self, name: &NamespacedName) -> Result<Option<Pod>, PlatformError> {
        self.get_pod_calls.fetch_add(1, Ordering::SeqCst);
        Ok(self.pods.lock().unwrap().get(name).cloned())
    }

    async fn get_statefulset(
        &self,
        name: &NamespacedName,
    ) -> Result<Option<StatefulSet>, PlatformError> {
        Ok(self.statefulsets.lock().unwrap().get(name).cloned())
    }

    async fn list_statefulsets(&self, _vdb: &VerticaDB) -> Result<Vec<StatefulSet>, PlatformError> {
        Ok(self.statefulsets.lock().unwrap().values().cloned().collect())
    }

    async fn delete_pod(&self, name: &NamespacedName) -> Result<(), PlatformError> {
        self.pods.lock().unwrap().remove(name);
        self.deleted.lock().unwrap().push(name.clone());
        Ok(())
    }

    async fn get_vdb(&self, _name: &NamespacedName) -> Result<Option<VerticaDB>, PlatformError> {
        Ok(self.vdb.lock().unwrap().clone())
    }

    async fn update_vdb(&self, vdb: &VerticaDB) -> Result<VerticaDB, PlatformError> {
        let remaining = self.conflicts.load(Ordering::SeqCst);
        if remaining > 0 {
            self.conflicts.store(remaining - 1, Ordering::SeqCst);
            return Err(PlatformError::Conflict("default/vertdb".to_string()));
        }
        self.updates.fetch_add(1, Ordering::SeqCst);
        *self.vdb.lock().unwrap() = Some(vdb.clone());
        Ok(vdb.clone())
    }

    async fn update_condition(
        &self,
        _vdb: &VerticaDB,
        condition: &VerticaDBCondition,
    ) -> Result<(), PlatformError> {
        self.conditions.lock().unwrap().push(condition.clone());
        Ok(())
    }

    async fn get_secret_data(
        &self,
        name: &NamespacedName,
    ) -> Result<BTreeMap<String, Vec<u8>>, PlatformError> {
        self.secrets
            .lock()
            .unwrap()
            .get(name)
            .cloned()
            .ok_or_else(|| PlatformError::NotFound {
                kind: "Secret",
                name: name.to_string(),
            })
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum RunnerCall {
    Exec {
        pod: NamespacedName,
        command: Vec<String>,
    },
    Copy {
        pod: NamespacedName,
        remote_path: String,
        payload: String,
        command: Vec<String>,
    },
    Vsql {
        pod: NamespacedName,
        args: Vec<String>,
    },
}

#[derive(Default)]
pub struct FakeRunner {
    pub calls: Mutex<Vec<RunnerCall>>,
    /// Probe script output per pod. Pods without an entry report nothing.
    pub gather: Mutex<HashMap<NamespacedName, GatherState>>,
    pub exec_stdout: Mutex<HashMap<NamespacedName, String>>,
    /// vsql output keyed by a fragment of the query, in any pod
    pub vsql_stdout: Mutex<Vec<(String, String)>>,
    pub fail_vsql: AtomicBool,
}

impl FakeRunner {
    pub fn set_gather(&self, pod: &NamespacedName, gs: GatherState) {
        self.gather.lock().unwrap().insert(pod.clone(), gs);
    }

    pub fn set_exec_stdout(&self, pod: &NamespacedName, stdout: &str) {
        self.exec_stdout
            .lock()
            .unwrap()
            .insert(pod.clone(), stdout.to_string());
    }

    pub fn set_vsql(&self, query_fragment: &str, stdout: &str) {
        self.vsql_stdout
            .lock()
            .unwrap()
            .push((query_fragment.to_string(), stdout.to_string()));
    }

    pub fn calls(&self) -> Vec<RunnerCall> {
        self.calls.lock().unwrap().clone()
    }

    pub fn call_count(&self) -> usize {
        self.calls.lock().unwrap().len()
    }

    /// Files copied into pods, as (pod, remote path, payload)
    pub fn copies(&self) -> Vec<(NamespacedName, String, String)> {
        self.calls()
            .into_iter()
            .filter_map(|c| match c {
                RunnerCall::Copy {
                    pod,
                    remote_path,
                    payload,
                    ..
                } => Some((pod, remote_path, payload)),
                _ => None,
            })
            .collect()
    }

    /// Commands run with exec, as (pod, joined command line)
    pub fn execs(&self) -> Vec<(NamespacedName, String)> {
        self.calls()
            .into_iter()
            .filter_map(|c| match c {
                RunnerCall::Exec { pod, command } => Some((pod, command.join(" "))),
                _ => None,
            })
            .collect()
    }
}

fn to_strings(args: &[&str]) -> Vec<String> {
    args.iter().map(|s| s.to_string()).collect()
}

#[async_trait]
impl PodRunner for FakeRunner {
    async fn exec_in_pod(
        &self,
        pod: &NamespacedName,
        _container: &str,
        command: &[&str],
    ) -> Result<ExecOutput> {
        self.calls.lock().unwrap().push(RunnerCall::Exec {
            pod: pod.clone(),
            command: to_strings(command),
        });
        let stdout = self
            .exec_stdout
            .lock()
            .unwrap()
            .get(pod)
            .cloned()
            .unwrap_or_default();
        Ok(ExecOutput::stdout(stdout))
    }

    async fn copy_to_pod(
        &self,
        pod: &NamespacedName,
        _container: &str,
        payload: &[u8],
        remote_path: &str,
        run_command: &[&str],
    ) -> Result<ExecOutput> {
        self.calls.lock().unwrap().push(RunnerCall::Copy {
            pod: pod.clone(),
            remote_path: remote_path.to_string(),
            payload: String::from_utf8_lossy(payload).into_owned(),
            command: to_strings(run_command),
        });
        if remote_path == POD_FACT_GATHER_SCRIPT {
            let gs = self
                .gather
                .lock()
                .unwrap()
                .get(pod)
                .cloned()
                .unwrap_or_default();
            return Ok(ExecOutput::stdout(gather_output(&gs)));
        }
        Ok(ExecOutput::default())
    }

    async fn exec_vsql(
        &self,
        pod: &NamespacedName,
        _container: &str,
        args: &[&str],
    ) -> Result<ExecOutput> {
        self.calls.lock().unwrap().push(RunnerCall::Vsql {
            pod: pod.clone(),
            args: to_strings(args),
        });
        if self.fail_vsql.load(Ordering::SeqCst) {
            return Err(ReconcileError::exec(pod, "vsql: could not connect to server"));
        }
        let query = args.join(" ");
        let stdout = self
            .vsql_stdout
            .lock()
            .unwrap()
            .iter()
            .find(|(fragment, _)| query.contains(fragment.as_str()))
            .map(|(_, out)| out.clone())
            .unwrap_or_default();
        Ok(ExecOutput::stdout(stdout))
    }
}

#[derive(Default)]
pub struct FakeDispatcher {
    pub calls: Mutex<Vec<&'static str>>,
    pub node_state: Mutex<HashMap<String, String>>,
    pub describe_output: Mutex<String>,
    pub restart_opts: Mutex<Vec<RestartNodeOpts>>,
    pub reip_opts: Mutex<Vec<ReIpOpts>>,
    pub start_opts: Mutex<Vec<StartDbOpts>>,
    pub revive_opts: Mutex<Vec<ReviveDbOpts>>,
}

impl FakeDispatcher {
    pub fn calls(&self) -> Vec<&'static str> {
        self.calls.lock().unwrap().clone()
    }
}

#[async_trait]
impl Dispatcher for FakeDispatcher {
    async fn fetch_node_state(
        &self,
        _vdb: &VerticaDB,
        _opts: &FetchNodeStateOpts,
    ) -> Result<(HashMap<String, String>, Verdict)> {
        self.calls.lock().unwrap().push("fetch_node_state");
        Ok((self.node_state.lock().unwrap().clone(), Verdict::Done))
    }

    async fn restart_node(&self, _vdb: &VerticaDB, opts: &RestartNodeOpts) -> Result<Verdict> {
        self.calls.lock().unwrap().push("restart_node");
        self.restart_opts.lock().unwrap().push(opts.clone());
        Ok(Verdict::Done)
    }

    async fn re_ip(&self, _vdb: &VerticaDB, opts: &ReIpOpts) -> Result<Verdict> {
        self.calls.lock().unwrap().push("re_ip");
        self.reip_opts.lock().unwrap().push(opts.clone());
        Ok(Verdict::Done)
    }

    async fn start_db(&self, _vdb: &VerticaDB, opts: &StartDbOpts) -> Result<Verdict> {
        self.calls.lock().unwrap().push("start_db");
        self.start_opts.lock().unwrap().push(opts.clone());
        Ok(Verdict::Done)
    }

    async fn revive_db(&self, _vdb: &VerticaDB, opts: &ReviveDbOpts) -> Result<Verdict> {
        self.calls.lock().unwrap().push("revive_db");
        self.revive_opts.lock().unwrap().push(opts.clone());
        Ok(Verdict::Done)
    }

    async fn describe_db(
        &self,
        _vdb: &VerticaDB,
        _opts: &DescribeDbOpts,
    ) -> Result<(String, Verdict)> {
        self.calls.lock().unwrap().push("describe_db");
        Ok((self.describe_output.lock().unwrap().clone(), Verdict::Done))
    }
}

#[derive(Default)]
pub struct FakeEvents {
    pub events: Mutex<Vec<(EventType, EventReason, String)>>,
}

impl FakeEvents {
    pub fn reasons(&self) -> Vec<EventReason> {
        self.events.lock().unwrap().iter().map(|e| e.1).collect()
    }
}

impl EventRecorder for FakeEvents {
    fn event(&self, _vdb: &VerticaDB, event_type: EventType, reason: EventReason, message: &str) {
        self.events
            .lock()
            .unwrap()
            .push((event_type, reason, message.to_string()));
    }
}

/// All fakes wired into one context
#[derive(Default)]
pub struct Fakes {
    pub platform: Arc<FakePlatform>,
    pub runner: Arc<FakeRunner>,
    pub dispatcher: Arc<FakeDispatcher>,
    pub events: Arc<FakeEvents>,
}

impl Fakes {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn context(&self) -> ReconcileContext {
        ReconcileContext {
            platform: self.platform.clone(),
            runner: self.runner.clone(),
            dispatcher: self.dispatcher.clone(),
            events: self.events.clone(),
            metrics: OperatorMetrics::new(),
        }
    }

    /// Pod facts that are already current and hold exactly `facts`
    pub fn pod_facts(&self, facts: Vec<PodFact>) -> PodFacts {
        PodFacts::with_facts(self.platform.clone(), self.runner.clone(), facts)
    }
}
