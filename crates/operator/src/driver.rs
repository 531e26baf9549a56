//! Reconcile loop for one VerticaDB
//!
//! Each round runs install, revive and restart in that order against a
//! fresh snapshot of the VerticaDB. A step that doesn't finish with
//! `Done` ends the round, and its verdict decides when the next one runs.

use operator_lib::{
    HealthRegistry, InstallReconciler, NamespacedName, ReconcileActor, ReconcileContext,
    ReconcileError, RestartReconciler, ReviveReconciler, StructuredLogger, Verdict,
};
use std::future::Future;
use std::time::{Duration, Instant};
use tracing::{info, warn};

/// How one round ended, as seen by the loop
#[derive(Debug)]
pub enum RoundOutcome {
    Finished(Result<Verdict, ReconcileError>),
    TimedOut,
}

impl RoundOutcome {
    pub fn label(&self) -> &'static str {
        match self {
            RoundOutcome::Finished(Ok(v)) => v.as_str(),
            RoundOutcome::Finished(Err(_)) => "error",
            RoundOutcome::TimedOut => "timeout",
        }
    }
}

/// Delay before the next round. A clean round still resyncs on the
/// interval since the loop doesn't watch for changes.
pub fn next_delay(outcome: &RoundOutcome, interval: Duration) -> Duration {
    match outcome {
        RoundOutcome::Finished(Ok(Verdict::RequeueAfter(after))) => *after,
        _ => interval,
    }
}

pub struct Driver {
    ctx: ReconcileContext,
    health: HealthRegistry,
    logger: StructuredLogger,
    vdb_name: NamespacedName,
    restart_read_only: bool,
    requeue_interval: Duration,
    pass_timeout: Duration,
}

impl Driver {
    pub fn new(
        ctx: ReconcileContext,
        health: HealthRegistry,
        logger: StructuredLogger,
        vdb_name: NamespacedName,
        restart_read_only: bool,
    ) -> Self {
        Self {
            ctx,
            health,
            logger,
            vdb_name,
            restart_read_only,
            requeue_interval: Duration::from_secs(10),
            pass_timeout: Duration::from_secs(1800),
        }
    }

    pub fn with_timing(mut self, requeue_interval: Duration, pass_timeout: Duration) -> Self {
        self.requeue_interval = requeue_interval;
        self.pass_timeout = pass_timeout;
        self
    }

    fn actors(&self) -> Vec<Box<dyn ReconcileActor>> {
        vec![
            Box::new(InstallReconciler::new(self.ctx.clone())),
            Box::new(ReviveReconciler::new(self.ctx.clone())),
            Box::new(RestartReconciler::new(
                self.ctx.clone(),
                self.restart_read_only,
            )),
        ]
    }

    /// Run every step once, stopping at the first one that doesn't finish
    pub async fn run_round(&self) -> Result<Verdict, ReconcileError> {
        let Some(mut vdb) = self.ctx.platform.get_vdb(&self.vdb_name).await? else {
            info!(vdb = %self.vdb_name, "VerticaDB not found, nothing to reconcile");
            return Ok(Verdict::Done);
        };
        let mut pfacts = self.ctx.pod_facts();

        for mut actor in self.actors() {
            let outcome = actor.reconcile(&mut vdb, &mut pfacts).await;
            let label = match &outcome {
                Ok(v) => v.as_str(),
                Err(_) => "error",
            };
            self.ctx.metrics.inc_reconcile_pass(actor.name(), label);
            self.health.record_outcome(actor.name(), &outcome).await;

            match outcome {
                Ok(Verdict::Done) => {}
                Ok(verdict) => {
                    info!(reconciler = actor.name(), verdict = ?verdict, "Round stopped early");
                    return Ok(verdict);
                }
                Err(e) => {
                    warn!(reconciler = actor.name(), error = %e, "Reconcile step failed");
                    return Err(e);
                }
            }
        }
        Ok(Verdict::Done)
    }

    /// Loop until `shutdown` resolves. An in-flight round is dropped when
    /// it does.
    pub async fn run<F>(self, shutdown: F)
    where
        F: Future<Output = ()>,
    {
        tokio::pin!(shutdown);
        loop {
            let started = Instant::now();
            let outcome = tokio::select! {
                _ = &mut shutdown => {
                    self.logger.log_shutdown("shutdown signal received");
                    return;
                }
                res = tokio::time::timeout(self.pass_timeout, self.run_round()) => match res {
                    Ok(r) => RoundOutcome::Finished(r),
                    Err(_) => RoundOutcome::TimedOut,
                },
            };

            if let RoundOutcome::TimedOut = outcome {
                warn!(
                    vdb = %self.vdb_name,
                    timeout_secs = self.pass_timeout.as_secs(),
                    "Reconcile round hit its deadline"
                );
            }
            self.logger
                .log_round(&self.vdb_name.to_string(), outcome.label(), started.elapsed());
            self.health.set_ready(true).await;

            let delay = next_delay(&outcome, self.requeue_interval);
            tokio::select! {
                _ = &mut shutdown => {
                    self.logger.log_shutdown("shutdown signal received");
                    return;
                }
                _ = tokio::time::sleep(delay) => {}
            }
        }
    }
}
