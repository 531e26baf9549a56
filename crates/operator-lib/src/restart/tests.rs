use super::*;
use crate::testutil::{make_fact, make_pod, make_up_fact, make_vdb, Fakes};
use k8s_openapi::api::core::v1::{ContainerStatus, Pod, Probe};
use std::collections::HashMap;
use std::time::Duration;

/// Running pod with a liveness probe of period 10s and threshold 20
fn probed_pod(pf: &PodFact, started: Option<bool>) -> Pod {
    let mut pod = make_pod(&pf.name, &pf.pod_ip, true);
    if let Some(spec) = pod.spec.as_mut() {
        spec.containers[0].liveness_probe = Some(Probe {
            period_seconds: Some(10),
            failure_threshold: Some(20),
            ..Default::default()
        });
    }
    if let Some(status) = pod.status.as_mut() {
        status.container_statuses = Some(vec![ContainerStatus {
            name: SERVER_CONTAINER.to_string(),
            started,
            ..Default::default()
        }]);
    }
    pod
}

fn down(vdb: &VerticaDB, i: i32) -> PodFact {
    PodFact {
        up_node: false,
        ..make_up_fact(vdb, 0, i)
    }
}

/// Register a plain pod for every fact so probe lookups succeed
fn add_pods(fakes: &Fakes, facts: &[PodFact]) {
    for pf in facts {
        fakes.platform.add_pod(make_pod(&pf.name, &pf.pod_ip, pf.is_pod_running));
    }
}

fn renamed_vdb(name: &str) -> VerticaDB {
    let mut vdb = make_vdb();
    vdb.metadata.name = Some(name.to_string());
    vdb
}

#[tokio::test]
async fn test_auto_restart_disabled() {
    let fakes = Fakes::new();
    let mut vdb = make_vdb();
    vdb.spec.auto_restart_vertica = false;
    let mut pfacts = fakes.pod_facts(vec![down(&vdb, 0)]);

    let mut r = RestartReconciler::new(fakes.context(), false);
    assert_eq!(r.reconcile(&mut vdb, &mut pfacts).await.unwrap(), Verdict::Done);

    let conds = fakes.platform.conditions.lock().unwrap().clone();
    assert_eq!(conds.len(), 1);
    assert_eq!(conds[0].type_, AUTO_RESTART_VERTICA_CONDITION);
    assert_eq!(conds[0].status, ConditionStatus::False);
    assert!(fakes.dispatcher.calls().is_empty());
    assert_eq!(fakes.runner.call_count(), 0);
}

#[tokio::test]
async fn test_condition_written_once() {
    let fakes = Fakes::new();
    let mut vdb = make_vdb();
    let facts = vec![make_up_fact(&vdb, 0, 0)];
    let mut r = RestartReconciler::new(fakes.context(), false);

    let mut pfacts = fakes.pod_facts(facts.clone());
    r.reconcile(&mut vdb, &mut pfacts).await.unwrap();
    let mut pfacts = fakes.pod_facts(facts);
    r.reconcile(&mut vdb, &mut pfacts).await.unwrap();

    let conds = fakes.platform.conditions.lock().unwrap().clone();
    assert_eq!(conds.len(), 1);
    assert_eq!(conds[0].status, ConditionStatus::True);
}

#[tokio::test]
async fn test_nothing_installed_is_done() {
    let fakes = Fakes::new();
    let mut vdb = make_vdb();
    let mut pfacts = fakes.pod_facts((0..3).map(|i| make_fact(&vdb, 0, i)).collect());
    let mut r = RestartReconciler::new(fakes.context(), false);
    assert_eq!(r.reconcile(&mut vdb, &mut pfacts).await.unwrap(), Verdict::Done);
    assert!(fakes.dispatcher.calls().is_empty());
}

#[tokio::test]
async fn test_cluster_restart_waits_for_pods_to_run() {
    let fakes = Fakes::new();
    let mut vdb = make_vdb();
    let facts: Vec<_> = (0..3)
        .map(|i| PodFact {
            is_pod_running: false,
            ..down(&vdb, i)
        })
        .collect();
    let mut pfacts = fakes.pod_facts(facts);
    let mut r = RestartReconciler::new(fakes.context(), false);
    assert_eq!(r.reconcile(&mut vdb, &mut pfacts).await.unwrap(), Verdict::Requeue);
    assert!(fakes.dispatcher.calls().is_empty());
}

#[tokio::test]
async fn test_ksafety_zero_cluster_restart_waits() {
    let fakes = Fakes::new();
    let mut vdb = make_vdb();
    vdb.spec.k_safety = KSafety::Zero;
    let mut not_running = down(&vdb, 1);
    not_running.is_pod_running = false;
    let mut pfacts = fakes.pod_facts(vec![down(&vdb, 0), not_running, down(&vdb, 2)]);

    let mut r = RestartReconciler::new(fakes.context(), false);
    assert_eq!(r.reconcile(&mut vdb, &mut pfacts).await.unwrap(), Verdict::Requeue);
    assert!(fakes.dispatcher.calls().is_empty());
    assert_eq!(fakes.runner.call_count(), 0);
}

#[tokio::test]
async fn test_cluster_restart() {
    let fakes = Fakes::new();
    let mut vdb = renamed_vdb("restart-cluster");
    let facts: Vec<_> = (0..3).map(|i| down(&vdb, i)).collect();
    add_pods(&fakes, &facts);
    let mut pfacts = fakes.pod_facts(facts.clone());
    let generation = pfacts.generation();
    let ctx = fakes.context();
    let attempts = ctx.metrics.cluster_restart_attempts(&vdb);

    let mut r = RestartReconciler::new(ctx.clone(), false);
    assert_eq!(r.reconcile(&mut vdb, &mut pfacts).await.unwrap(), Verdict::Done);

    assert_eq!(fakes.dispatcher.calls(), vec!["re_ip", "start_db"]);
    let reip = fakes.dispatcher.reip_opts.lock().unwrap()[0].clone();
    assert_eq!(reip.initiator.pod, facts[0].name);
    assert_eq!(reip.hosts.len(), 3);
    assert_eq!(reip.hosts[1].compat21_node_name, "node0002");
    assert_eq!(reip.hosts[1].vnode, "v_vertdb_node0002");

    let start = fakes.dispatcher.start_opts.lock().unwrap()[0].clone();
    assert_eq!(start.initiator.ip, "10.0.0.1");
    assert_eq!(start.hosts, vec!["10.0.0.1", "10.0.0.2", "10.0.0.3"]);

    assert_eq!(
        fakes.events.reasons(),
        vec![EventReason::ClusterRestartStarted, EventReason::ClusterRestartSucceeded]
    );
    assert_eq!(ctx.metrics.cluster_restart_attempts(&vdb), attempts + 1);
    assert!(pfacts.generation() > generation);
}

#[tokio::test]
async fn test_cluster_restart_waits_on_finished_startup_probe() {
    let fakes = Fakes::new();
    let mut vdb = make_vdb();
    let facts: Vec<_> = (0..2).map(|i| down(&vdb, i)).collect();
    fakes.platform.add_pod(probed_pod(&facts[0], Some(true)));
    fakes.platform.add_pod(probed_pod(&facts[1], Some(false)));
    let mut pfacts = fakes.pod_facts(facts);

    let mut r = RestartReconciler::new(fakes.context(), false);
    assert_eq!(
        r.reconcile(&mut vdb, &mut pfacts).await.unwrap(),
        Verdict::RequeueAfter(Duration::from_secs(50))
    );
    assert!(fakes.dispatcher.calls().is_empty());
}

#[tokio::test]
async fn test_cluster_restart_waits_on_slow_startup() {
    let fakes = Fakes::new();
    let mut vdb = make_vdb();
    let mut starting = down(&vdb, 1);
    starting.startup_in_progress = true;
    let facts = vec![down(&vdb, 0), starting];
    add_pods(&fakes, &facts);
    let mut pfacts = fakes.pod_facts(facts);

    let mut r = RestartReconciler::new(fakes.context(), false);
    // Sample pod has no liveness probe, so fall back to the default backoff
    assert_eq!(r.reconcile(&mut vdb, &mut pfacts).await.unwrap(), Verdict::Requeue);
    assert!(fakes.dispatcher.calls().is_empty());
}

#[tokio::test]
async fn test_cluster_without_db_only_reips() {
    let fakes = Fakes::new();
    let mut vdb = make_vdb();
    let facts: Vec<_> = (0..2)
        .map(|i| PodFact {
            is_installed: true,
            ..make_fact(&vdb, 0, i)
        })
        .collect();
    let mut pfacts = fakes.pod_facts(facts);

    let mut r = RestartReconciler::new(fakes.context(), false);
    assert_eq!(r.reconcile(&mut vdb, &mut pfacts).await.unwrap(), Verdict::Done);
    assert_eq!(fakes.dispatcher.calls(), vec!["re_ip"]);
}

#[tokio::test]
async fn test_restart_down_node() {
    let fakes = Fakes::new();
    let mut vdb = renamed_vdb("restart-node");
    let facts = vec![make_up_fact(&vdb, 0, 0), down(&vdb, 1), make_up_fact(&vdb, 0, 2)];
    add_pods(&fakes, &facts);
    let mut pfacts = fakes.pod_facts(facts.clone());
    let ctx = fakes.context();
    let attempts = ctx.metrics.nodes_restart_attempts(&vdb);

    let mut r = RestartReconciler::new(ctx.clone(), false);
    assert_eq!(r.reconcile(&mut vdb, &mut pfacts).await.unwrap(), Verdict::Done);

    assert_eq!(fakes.dispatcher.calls(), vec!["fetch_node_state", "restart_node"]);
    let opts = fakes.dispatcher.restart_opts.lock().unwrap()[0].clone();
    assert_eq!(opts.initiator.pod, facts[0].name);
    assert_eq!(
        opts.hosts,
        vec![VnodeHost {
            vnode: "v_vertdb_node0002".to_string(),
            ip: "10.0.0.2".to_string(),
        }]
    );
    let events = fakes.events.events.lock().unwrap().clone();
    assert_eq!(events[0].1, EventReason::NodeRestartStarted);
    assert_eq!(
        events[0].2,
        "Starting database restart node of the following pods: restart-node-sc1-1"
    );
    assert_eq!(events[1].1, EventReason::NodeRestartSucceeded);
    assert_eq!(ctx.metrics.nodes_restart_attempts(&vdb), attempts + 1);
}

#[tokio::test]
async fn test_node_reported_up_by_cluster_waits() {
    let fakes = Fakes::new();
    let mut vdb = make_vdb();
    let facts = vec![make_up_fact(&vdb, 0, 0), down(&vdb, 1)];
    fakes.platform.add_pod(probed_pod(&facts[0], Some(true)));
    *fakes.dispatcher.node_state.lock().unwrap() = HashMap::from([(
        "v_vertdb_node0002".to_string(),
        STATE_UP.to_string(),
    )]);
    let mut pfacts = fakes.pod_facts(facts);

    let mut r = RestartReconciler::new(fakes.context(), false);
    assert_eq!(
        r.reconcile(&mut vdb, &mut pfacts).await.unwrap(),
        Verdict::RequeueAfter(Duration::from_secs(50))
    );
    assert_eq!(fakes.dispatcher.calls(), vec!["fetch_node_state"]);
}

#[tokio::test]
async fn test_read_only_kill_requeues() {
    let fakes = Fakes::new();
    let mut vdb = make_vdb();
    let mut ro = make_up_fact(&vdb, 0, 1);
    ro.read_only = true;
    let facts = vec![make_up_fact(&vdb, 0, 0), ro.clone()];
    add_pods(&fakes, &facts);
    fakes
        .runner
        .set_exec_stdout(&ro.name, "Killing process 1234\n");
    let mut pfacts = fakes.pod_facts(facts);

    let mut r = RestartReconciler::new(fakes.context(), true);
    assert_eq!(r.reconcile(&mut vdb, &mut pfacts).await.unwrap(), Verdict::Requeue);

    let execs = fakes.runner.execs();
    assert_eq!(execs.len(), 1);
    assert_eq!(execs[0].0, ro.name);
    assert!(execs[0].1.contains("pgrep ^vertica$"));
    assert_eq!(fakes.dispatcher.calls(), vec!["fetch_node_state"]);
}

#[tokio::test]
async fn test_read_only_kill_requeues_if_any_pod_killed() {
    let fakes = Fakes::new();
    let mut vdb = make_vdb();
    let ro: Vec<_> = (1..3)
        .map(|i| PodFact {
            read_only: true,
            ..make_up_fact(&vdb, 0, i)
        })
        .collect();
    let mut facts = vec![make_up_fact(&vdb, 0, 0)];
    facts.extend(ro.iter().cloned());
    add_pods(&fakes, &facts);
    // Only the second pod still had a vertica process to kill
    fakes
        .runner
        .set_exec_stdout(&ro[1].name, "Killing process 4321\n");
    let mut pfacts = fakes.pod_facts(facts);

    let mut r = RestartReconciler::new(fakes.context(), true);
    assert_eq!(r.reconcile(&mut vdb, &mut pfacts).await.unwrap(), Verdict::Requeue);

    let killed: Vec<_> = fakes.runner.execs().into_iter().map(|(pod, _)| pod).collect();
    assert_eq!(killed, vec![ro[0].name.clone(), ro[1].name.clone()]);
}

#[tokio::test]
async fn test_read_only_left_alone_without_flag() {
    let fakes = Fakes::new();
    let mut vdb = make_vdb();
    let mut ro = make_up_fact(&vdb, 0, 1);
    ro.read_only = true;
    let mut pfacts = fakes.pod_facts(vec![make_up_fact(&vdb, 0, 0), ro]);

    let mut r = RestartReconciler::new(fakes.context(), false);
    assert_eq!(r.reconcile(&mut vdb, &mut pfacts).await.unwrap(), Verdict::Done);
    assert!(fakes.dispatcher.calls().is_empty());
}

#[tokio::test]
async fn test_partial_restart_waits_for_held_back_pods() {
    let fakes = Fakes::new();
    let mut vdb = make_vdb();
    let mut starting = down(&vdb, 2);
    starting.startup_in_progress = true;
    let facts = vec![make_up_fact(&vdb, 0, 0), down(&vdb, 1), starting];
    fakes.platform.add_pod(probed_pod(&facts[0], Some(true)));
    fakes.platform.add_pod(probed_pod(&facts[1], None));
    fakes.platform.add_pod(probed_pod(&facts[2], Some(false)));
    let mut pfacts = fakes.pod_facts(facts);

    let mut r = RestartReconciler::new(fakes.context(), false);
    assert_eq!(
        r.reconcile(&mut vdb, &mut pfacts).await.unwrap(),
        Verdict::RequeueAfter(Duration::from_secs(50))
    );
    let opts = fakes.dispatcher.restart_opts.lock().unwrap()[0].clone();
    assert_eq!(opts.hosts.len(), 1);
    assert_eq!(opts.hosts[0].ip, "10.0.0.2");
}

#[tokio::test]
async fn test_reip_pods_without_db() {
    let fakes = Fakes::new();
    let mut vdb = make_vdb();
    let fresh = PodFact {
        is_installed: true,
        compat21_node_name: "node0003".to_string(),
        ..make_fact(&vdb, 0, 2)
    };
    let mut pfacts = fakes.pod_facts(vec![make_up_fact(&vdb, 0, 0), fresh]);

    let mut r = RestartReconciler::new(fakes.context(), false);
    assert_eq!(r.reconcile(&mut vdb, &mut pfacts).await.unwrap(), Verdict::Done);
    assert_eq!(fakes.dispatcher.calls(), vec!["re_ip"]);
    let opts = fakes.dispatcher.reip_opts.lock().unwrap()[0].clone();
    assert_eq!(opts.hosts[0].compat21_node_name, "node0003");

    // ScheduleOnly never re-ips
    let fakes = Fakes::new();
    vdb.spec.init_policy = InitPolicy::ScheduleOnly;
    let fresh = PodFact {
        is_installed: true,
        ..make_fact(&vdb, 0, 2)
    };
    let mut pfacts = fakes.pod_facts(vec![make_up_fact(&vdb, 0, 0), fresh]);
    let mut r = RestartReconciler::new(fakes.context(), false);
    assert_eq!(r.reconcile(&mut vdb, &mut pfacts).await.unwrap(), Verdict::Done);
    assert!(fakes.dispatcher.calls().is_empty());
}

#[tokio::test]
async fn test_requeue_while_installed_pod_not_running() {
    let fakes = Fakes::new();
    let mut vdb = make_vdb();
    let mut gone = make_up_fact(&vdb, 0, 1);
    gone.up_node = false;
    gone.is_pod_running = false;
    let mut pfacts = fakes.pod_facts(vec![make_up_fact(&vdb, 0, 0), gone]);

    let mut r = RestartReconciler::new(fakes.context(), false);
    assert_eq!(r.reconcile(&mut vdb, &mut pfacts).await.unwrap(), Verdict::Requeue);
    assert!(fakes.dispatcher.calls().is_empty());
}

#[test]
fn test_filter_slow_startup() {
    let vdb = make_vdb();
    let mut starting = down(&vdb, 1);
    starting.startup_in_progress = true;
    let (kept, removed) = filter_slow_startup(&[down(&vdb, 0), starting]);
    assert_eq!(kept.len(), 1);
    assert_eq!(removed, 1);
}
