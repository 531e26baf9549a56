//! The seam every reconciler plugs into

use crate::dispatcher::Dispatcher;
use crate::error::Result;
use crate::events::EventRecorder;
use crate::exec::PodRunner;
use crate::observability::OperatorMetrics;
use crate::platform::PlatformApi;
use crate::podfacts::PodFacts;
use crate::vdb::VerticaDB;
use crate::verdict::Verdict;
use async_trait::async_trait;
use std::sync::Arc;

/// Collaborators shared by the reconcilers of one VerticaDB
#[derive(Clone)]
pub struct ReconcileContext {
    pub platform: Arc<dyn PlatformApi>,
    pub runner: Arc<dyn PodRunner>,
    pub dispatcher: Arc<dyn Dispatcher>,
    pub events: Arc<dyn EventRecorder>,
    pub metrics: OperatorMetrics,
}

impl ReconcileContext {
    /// A fresh, uncollected set of pod facts
    pub fn pod_facts(&self) -> PodFacts {
        PodFacts::new(self.platform.clone(), self.runner.clone())
    }
}

/// One step of a reconcile pass.
///
/// The pod facts are shared with the other steps of the pass. A step that
/// changes the cluster must invalidate them.
#[async_trait]
pub trait ReconcileActor: Send {
    fn name(&self) -> &'static str;

    async fn reconcile(&mut self, vdb: &mut VerticaDB, pfacts: &mut PodFacts) -> Result<Verdict>;
}
