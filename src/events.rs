//! Event publishing
//!
//! Components publish an [`Event`] after a change has been committed. Push
//! transports (notifications, websockets) subscribe to a [`BroadcastPublisher`];
//! nothing in the core waits on a subscriber.

use chrono::{DateTime, Utc};
use serde::Serialize;
use tokio::sync::broadcast;
use tracing::{debug, info};

use crate::core_types::{BeneficiaryId, RemitterId, TransactionId, UserId};
use crate::dmt::KycStatus;
use crate::money::Money;
use crate::transaction::{TransactionStatus, TransactionType};

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "event", rename_all = "snake_case")]
pub enum Event {
    TransactionStatusChanged {
        transaction_id: TransactionId,
        user_id: UserId,
        transaction_type: TransactionType,
        from: TransactionStatus,
        to: TransactionStatus,
        at: DateTime<Utc>,
    },
    BalanceChanged {
        user_id: UserId,
        balance: Money,
        reference: String,
        at: DateTime<Utc>,
    },
    RemitterUpdated {
        remitter_id: RemitterId,
        user_id: UserId,
        kyc_status: KycStatus,
        at: DateTime<Utc>,
    },
    BeneficiaryUpdated {
        beneficiary_id: BeneficiaryId,
        remitter_id: RemitterId,
        is_verified: bool,
        is_active: bool,
        at: DateTime<Utc>,
    },
}

impl Event {
    pub fn name(&self) -> &'static str {
        match self {
            Event::TransactionStatusChanged { .. } => "transaction_status_changed",
            Event::BalanceChanged { .. } => "balance_changed",
            Event::RemitterUpdated { .. } => "remitter_updated",
            Event::BeneficiaryUpdated { .. } => "beneficiary_updated",
        }
    }
}

pub trait EventPublisher: Send + Sync {
    fn publish(&self, event: &Event);
}

/// Fan-out over a tokio broadcast channel
pub struct BroadcastPublisher {
    tx: broadcast::Sender<Event>,
}

impl BroadcastPublisher {
    pub fn new(capacity: usize) -> Self {
        let (tx, _) = broadcast::channel(capacity.max(1));
        Self { tx }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<Event> {
        self.tx.subscribe()
    }
}

impl Default for BroadcastPublisher {
    fn default() -> Self {
        Self::new(1024)
    }
}

impl EventPublisher for BroadcastPublisher {
    fn publish(&self, event: &Event) {
        // Err only means there are no subscribers right now
        if self.tx.send(event.clone()).is_err() {
            debug!(event = event.name(), "No event subscribers");
        }
    }
}

/// Writes every event to the structured log
#[derive(Debug, Default, Clone, Copy)]
pub struct TracingPublisher;

impl EventPublisher for TracingPublisher {
    fn publish(&self, event: &Event) {
        match serde_json::to_string(event) {
            Ok(payload) => info!(event = event.name(), %payload, "Event published"),
            Err(e) => info!(event = event.name(), error = %e, "Event published (unserializable)"),
        }
    }
}

/// Publishes to every inner publisher in order
#[derive(Default)]
pub struct FanoutPublisher {
    publishers: Vec<std::sync::Arc<dyn EventPublisher>>,
}

impl FanoutPublisher {
    pub fn new(publishers: Vec<std::sync::Arc<dyn EventPublisher>>) -> Self {
        Self { publishers }
    }
}

impl EventPublisher for FanoutPublisher {
    fn publish(&self, event: &Event) {
        for publisher in &self.publishers {
            publisher.publish(event);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    fn balance_event() -> Event {
        Event::BalanceChanged {
            user_id: 7,
            balance: Money::from_rupees(10),
            reference: "ref-1".into(),
            at: Utc::now(),
        }
    }

    #[tokio::test]
    async fn test_broadcast_delivers_to_subscriber() {
        let publisher = BroadcastPublisher::new(8);
        let mut rx = publisher.subscribe();
        publisher.publish(&balance_event());

        let received = rx.recv().await.unwrap();
        assert_eq!(received.name(), "balance_changed");
    }

    #[test]
    fn test_broadcast_without_subscribers_does_not_panic() {
        let publisher = BroadcastPublisher::new(8);
        publisher.publish(&balance_event());
    }

    #[test]
    fn test_event_serializes_with_tag() {
        let json = serde_json::to_value(balance_event()).unwrap();
        assert_eq!(json["event"], "balance_changed");
        assert_eq!(json["balance"], "10.00");
    }

    #[tokio::test]
    async fn test_fanout_reaches_all() {
        let a = Arc::new(BroadcastPublisher::new(4));
        let b = Arc::new(BroadcastPublisher::new(4));
        let mut rx_a = a.subscribe();
        let mut rx_b = b.subscribe();
        let fanout = FanoutPublisher::new(vec![a.clone(), b.clone(), Arc::new(TracingPublisher)]);

        fanout.publish(&balance_event());
        assert!(rx_a.recv().await.is_ok());
        assert!(rx_b.recv().await.is_ok());
    }
}
