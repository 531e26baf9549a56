//! Access to the Kubernetes API
//!
//! The reconcilers only see the API through [`PlatformApi`], which keeps
//! them testable without a cluster. Lookups that can legitimately miss
//! return `Ok(None)` rather than a not-found error.

use crate::error::{PlatformError, ReconcileError, Result};
use crate::names::{NamespacedName, SERVER_CONTAINER};
use crate::vdb::{VerticaDB, VerticaDBCondition};
use async_trait::async_trait;
use k8s_openapi::api::apps::v1::StatefulSet;
use k8s_openapi::api::core::v1::{Container, Pod, Probe};
use std::collections::BTreeMap;
use std::future::Future;
use std::time::Duration;
use tracing::debug;

#[async_trait]
pub trait PlatformApi: Send + Sync {
    async fn get_pod(&self, name: &NamespacedName) -> Result<Option<Pod>, PlatformError>;

    async fn get_statefulset(
        &self,
        name: &NamespacedName,
    ) -> Result<Option<StatefulSet>, PlatformError>;

    /// Statefulsets labelled as belonging to the VerticaDB
    async fn list_statefulsets(&self, vdb: &VerticaDB) -> Result<Vec<StatefulSet>, PlatformError>;

    async fn delete_pod(&self, name: &NamespacedName) -> Result<(), PlatformError>;

    async fn get_vdb(&self, name: &NamespacedName) -> Result<Option<VerticaDB>, PlatformError>;

    /// Replace the VerticaDB. Fails with [`PlatformError::Conflict`] when the
    /// resource version is stale.
    async fn update_vdb(&self, vdb: &VerticaDB) -> Result<VerticaDB, PlatformError>;

    async fn update_condition(
        &self,
        vdb: &VerticaDB,
        condition: &VerticaDBCondition,
    ) -> Result<(), PlatformError>;

    async fn get_secret_data(
        &self,
        name: &NamespacedName,
    ) -> Result<BTreeMap<String, Vec<u8>>, PlatformError>;
}

/// Bounded exponential backoff for optimistic concurrency retries
#[derive(Debug, Clone, Copy)]
pub struct Backoff {
    pub steps: u32,
    pub initial: Duration,
    pub factor: u32,
}

impl Default for Backoff {
    /// Same shape as client-go's DefaultBackoff
    fn default() -> Self {
        Self {
            steps: 4,
            initial: Duration::from_millis(10),
            factor: 5,
        }
    }
}

/// Run `attempt` until it succeeds, fails with something other than a
/// conflict, or the backoff runs out of steps. The last error is returned
/// once the steps are exhausted.
pub async fn retry_on_conflict<T, F, Fut>(backoff: Backoff, mut attempt: F) -> Result<T>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T>>,
{
    let mut delay = backoff.initial;
    let mut tries = 0;
    loop {
        tries += 1;
        match attempt().await {
            Err(ReconcileError::Platform(PlatformError::Conflict(what)))
                if tries < backoff.steps =>
            {
                debug!(
                    attempt = tries,
                    resource = %what,
                    delay_ms = delay.as_millis() as u64,
                    "Conflict on update, retrying"
                );
                tokio::time::sleep(delay).await;
                delay *= backoff.factor;
            }
            other => return other,
        }
    }
}

/// The container running the Vertica server. Falls back to the first
/// container for pods built before the container was named.
pub fn server_container(pod: &Pod) -> Option<&Container> {
    let containers = &pod.spec.as_ref()?.containers;
    containers
        .iter()
        .find(|c| c.name == SERVER_CONTAINER)
        .or_else(|| containers.first())
}

pub fn server_liveness_probe(pod: &Pod) -> Option<&Probe> {
    server_container(pod)?.liveness_probe.as_ref()
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU32, Ordering};
    use std::sync::Arc;

    fn quick_backoff() -> Backoff {
        Backoff {
            steps: 3,
            initial: Duration::from_millis(1),
            factor: 2,
        }
    }

    #[tokio::test]
    async fn test_retry_on_conflict_succeeds_after_conflicts() {
        let calls = Arc::new(AtomicU32::new(0));
        let c = calls.clone();
        let result = retry_on_conflict(quick_backoff(), || {
            let c = c.clone();
            async move {
                if c.fetch_add(1, Ordering::SeqCst) < 2 {
                    Err(PlatformError::Conflict("vdb".into()).into())
                } else {
                    Ok(42)
                }
            }
        })
        .await;

        assert_eq!(tokio_test::assert_ok!(result), 42);
        assert_eq!(calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn test_retry_on_conflict_gives_up() {
        let calls = Arc::new(AtomicU32::new(0));
        let c = calls.clone();
        let result: Result<()> = retry_on_conflict(quick_backoff(), || {
            let c = c.clone();
            async move {
                c.fetch_add(1, Ordering::SeqCst);
                Err(PlatformError::Conflict("vdb".into()).into())
            }
        })
        .await;

        assert!(matches!(
            result,
            Err(ReconcileError::Platform(PlatformError::Conflict(_)))
        ));
        assert_eq!(calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn test_retry_on_conflict_does_not_retry_other_errors() {
        let calls = Arc::new(AtomicU32::new(0));
        let c = calls.clone();
        let result: Result<()> = retry_on_conflict(quick_backoff(), || {
            let c = c.clone();
            async move {
                c.fetch_add(1, Ordering::SeqCst);
                Err(PlatformError::Api("boom".into()).into())
            }
        })
        .await;

        tokio_test::assert_err!(result);
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }
}
