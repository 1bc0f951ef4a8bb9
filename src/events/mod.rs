use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use tokio::sync::mpsc;
use tracing::{debug, info};
use uuid::Uuid;

/// Events emitted by the services. Consumed by [`process_events`], which is the
/// integration point for anything that wants to observe the order lifecycle.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum Event {
    CheckoutInitiated {
        tracking_id: String,
        merchant_reference: String,
        customer_id: Uuid,
        amount: Decimal,
    },
    OrderCreated(Uuid),
    PaymentCompleted {
        order_id: Uuid,
        tracking_id: String,
        amount: Decimal,
    },
    PaymentFailed {
        order_id: Option<Uuid>,
        tracking_id: String,
        reason: String,
    },
    StockDeducted {
        product_id: Uuid,
        quantity: i32,
        remaining: i32,
    },
    CallbackReceived {
        tracking_id: Option<String>,
        notification_type: Option<String>,
    },
    SweepCompleted {
        total_checked: usize,
        fixed: usize,
        errors: usize,
    },
}

/// Cloneable sending half of the event channel.
#[derive(Debug, Clone)]
pub struct EventSender {
    sender: mpsc::Sender<Event>,
}

impl EventSender {
    pub fn new(sender: mpsc::Sender<Event>) -> Self {
        Self { sender }
    }

    /// Sends an event asynchronously.
    pub async fn send(&self, event: Event) -> Result<(), String> {
        self.sender
            .send(event)
            .await
            .map_err(|e| format!("Failed to send event: {}", e))
    }
}

/// Drains the event channel, logging each event. Runs until every sender is
/// dropped.
pub async fn process_events(mut receiver: mpsc::Receiver<Event>) {
    info!("Event processor started");
    while let Some(event) = receiver.recv().await {
        match &event {
            Event::PaymentCompleted {
                order_id,
                tracking_id,
                amount,
            } => {
                info!(order_id = %order_id, tracking_id = %tracking_id, amount = %amount, "Payment completed");
            }
            Event::PaymentFailed {
                order_id,
                tracking_id,
                reason,
            } => {
                info!(?order_id, tracking_id = %tracking_id, reason = %reason, "Payment failed");
            }
            Event::OrderCreated(order_id) => {
                info!(order_id = %order_id, "Order created");
            }
            other => {
                debug!(event = ?other, "Event");
            }
        }
    }
    info!("Event processor stopped");
}
