//! Event recorder that publishes Kubernetes events and mirrors them to the log

use kube::runtime::events::{Event, EventType as KubeEventType, Recorder, Reporter};
use kube::{Client, Resource};
use operator_lib::events::{EventReason, EventRecorder, EventType};
use operator_lib::vdb::VerticaDB;
use operator_lib::StructuredLogger;
use tracing::warn;

pub struct KubeEventRecorder {
    client: Client,
    reporter: Reporter,
    logger: StructuredLogger,
}

impl KubeEventRecorder {
    pub fn new(client: Client, controller: &str, logger: StructuredLogger) -> Self {
        Self {
            client,
            reporter: Reporter {
                controller: controller.to_string(),
                instance: std::env::var("POD_NAME").ok(),
            },
            logger,
        }
    }
}

impl EventRecorder for KubeEventRecorder {
    /// Publishing happens on a spawned task so the pass never waits on it
    fn event(&self, vdb: &VerticaDB, event_type: EventType, reason: EventReason, message: &str) {
        self.logger.event(vdb, event_type, reason, message);

        let recorder = Recorder::new(
            self.client.clone(),
            self.reporter.clone(),
            vdb.object_ref(&()),
        );
        let event = Event {
            type_: match event_type {
                EventType::Normal => KubeEventType::Normal,
                EventType::Warning => KubeEventType::Warning,
            },
            reason: reason.to_string(),
            note: Some(message.to_string()),
            action: reason.to_string(),
            secondary: None,
        };
        tokio::spawn(async move {
            if let Err(e) = recorder.publish(event).await {
                warn!(error = %e, "Failed to publish event");
            }
        });
    }
}
