//! Queue registry: one slot per named queue, live or unavailable.
//!
//! Built once at start-up and shared (behind an `Arc`) by the dispatcher,
//! the workers, the lifecycle monitor and the shutdown coordinator.

use crate::broker::{Broker, BrokerConnector};
use crate::policy::{QueueConfig, QueueName};
use futures::future::join_all;
use std::collections::BTreeMap;
use std::sync::Arc;
use tracing::{info, warn};

/// State of one queue after start-up.
#[derive(Clone)]
pub enum QueueSlot {
    Live(Arc<dyn Broker>),
    Unavailable { reason: String },
}

impl QueueSlot {
    pub fn is_live(&self) -> bool {
        matches!(self, QueueSlot::Live(_))
    }
}

/// Mapping from every queue name to its slot.
pub struct QueueRegistry {
    slots: BTreeMap<QueueName, QueueSlot>,
}

impl QueueRegistry {
    /// Attempt every queue against the connector.
    ///
    /// Attempts run concurrently and independently; a failed queue is marked
    /// unavailable without affecting the others.
    pub async fn connect(connector: &dyn BrokerConnector) -> Self {
        let attempts = QueueName::all().map(|queue| async move {
            let result = connector.connect(queue, QueueConfig::for_queue(queue)).await;
            (queue, result)
        });

        let mut slots = BTreeMap::new();
        for (queue, result) in join_all(attempts).await {
            let slot = match result {
                Ok(broker) => {
                    info!(queue = %queue, "Queue connected");
                    QueueSlot::Live(broker)
                }
                Err(e) => {
                    warn!(queue = %queue, error = %e, "Queue unavailable, dispatches will be mocked");
                    QueueSlot::Unavailable {
                        reason: e.to_string(),
                    }
                }
            };
            slots.insert(queue, slot);
        }

        Self { slots }
    }

    pub fn builder() -> QueueRegistryBuilder {
        QueueRegistryBuilder::default()
    }

    pub fn slot(&self, queue: QueueName) -> Option<&QueueSlot> {
        self.slots.get(&queue)
    }

    /// Live handle for a queue, if it is available.
    pub fn handle(&self, queue: QueueName) -> Option<&Arc<dyn Broker>> {
        match self.slots.get(&queue) {
            Some(QueueSlot::Live(broker)) => Some(broker),
            _ => None,
        }
    }

    pub fn is_available(&self, queue: QueueName) -> bool {
        self.handle(queue).is_some()
    }

    /// All live queues, in name order.
    pub fn live(&self) -> impl Iterator<Item = (QueueName, &Arc<dyn Broker>)> {
        self.slots.iter().filter_map(|(queue, slot)| match slot {
            QueueSlot::Live(broker) => Some((*queue, broker)),
            QueueSlot::Unavailable { .. } => None,
        })
    }

    /// Queues marked unavailable, with the reason.
    pub fn unavailable(&self) -> impl Iterator<Item = (QueueName, &str)> {
        self.slots.iter().filter_map(|(queue, slot)| match slot {
            QueueSlot::Unavailable { reason } => Some((*queue, reason.as_str())),
            QueueSlot::Live(_) => None,
        })
    }

    /// Policy of a queue. Identical to the compiled-in table.
    pub fn config(&self, queue: QueueName) -> QueueConfig {
        QueueConfig::for_queue(queue)
    }
}

/// Builds a registry slot by slot. Queues not set are unavailable.
#[derive(Default)]
pub struct QueueRegistryBuilder {
    slots: BTreeMap<QueueName, QueueSlot>,
}

impl QueueRegistryBuilder {
    pub fn live(mut self, queue: QueueName, broker: Arc<dyn Broker>) -> Self {
        self.slots.insert(queue, QueueSlot::Live(broker));
        self
    }

    pub fn unavailable(mut self, queue: QueueName, reason: impl Into<String>) -> Self {
        self.slots.insert(
            queue,
            QueueSlot::Unavailable {
                reason: reason.into(),
            },
        );
        self
    }

    pub fn build(mut self) -> QueueRegistry {
        for queue in QueueName::all() {
            self.slots
                .entry(queue)
                .or_insert_with(|| QueueSlot::Unavailable {
                    reason: "not configured".to_string(),
                });
        }
        QueueRegistry { slots: self.slots }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::broker::{MemoryBroker, MockBrokerConnector};
    use crate::error::QueueError;

    #[tokio::test]
    async fn test_connect_marks_failed_queue_unavailable() {
        let mut connector = MockBrokerConnector::new();
        connector.expect_connect().times(4).returning(|queue, config| {
            if queue == QueueName::DataAnalytics {
                Err(QueueError::Connection("connection refused".to_string()))
            } else {
                Ok(Arc::new(MemoryBroker::new(queue, config)) as Arc<dyn Broker>)
            }
        });

        let registry = QueueRegistry::connect(&connector).await;

        assert!(!registry.is_available(QueueName::DataAnalytics));
        assert!(registry.is_available(QueueName::ResumeProcessing));
        assert!(registry.is_available(QueueName::EmailNotifications));
        assert!(registry.is_available(QueueName::ReportGeneration));
        assert_eq!(registry.live().count(), 3);

        let unavailable: Vec<_> = registry.unavailable().collect();
        assert_eq!(unavailable.len(), 1);
        assert_eq!(unavailable[0].0, QueueName::DataAnalytics);
        assert!(unavailable[0].1.contains("connection refused"));
    }

    #[tokio::test]
    async fn test_connect_all_unavailable() {
        let mut connector = MockBrokerConnector::new();
        connector
            .expect_connect()
            .returning(|_, _| Err(QueueError::Connection("down".to_string())));

        let registry = QueueRegistry::connect(&connector).await;
        assert_eq!(registry.live().count(), 0);
        assert_eq!(registry.unavailable().count(), 4);
    }

    #[test]
    fn test_builder_defaults_to_unavailable() {
        let registry = QueueRegistry::builder()
            .live(
                QueueName::EmailNotifications,
                Arc::new(MemoryBroker::for_queue(QueueName::EmailNotifications)),
            )
            .build();

        assert!(registry.is_available(QueueName::EmailNotifications));
        assert!(!registry.is_available(QueueName::ResumeProcessing));
        assert!(matches!(
            registry.slot(QueueName::ResumeProcessing),
            Some(QueueSlot::Unavailable { .. })
        ));
        assert_eq!(registry.config(QueueName::DataAnalytics).max_attempts, 2);
    }
}
