use std::sync::Arc;

use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::error::{AppError, Result};
use crate::models::Notification;

use super::{Messenger, NotificationReceiver};

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct DeliveryStats {
    pub delivered: usize,
    pub failed: usize,
}

/// Single consumer of the notification queue.
pub struct DeliveryWorker {
    receiver: NotificationReceiver,
    messenger: Arc<dyn Messenger>,
}

impl DeliveryWorker {
    pub fn new(receiver: NotificationReceiver, messenger: Arc<dyn Messenger>) -> Self {
        Self {
            receiver,
            messenger,
        }
    }

    /// Deliver notifications until cancelled or until every producer is gone
    /// and the queue is drained. A failed delivery is logged and dropped.
    pub async fn run(mut self, cancel: CancellationToken) -> DeliveryStats {
        info!("Delivery worker started");
        let mut stats = DeliveryStats::default();

        loop {
            let notification = tokio::select! {
                biased;
                _ = cancel.cancelled() => break,
                next = self.receiver.recv() => match next {
                    Some(notification) => notification,
                    None => break,
                },
            };

            match self.deliver(&notification).await {
                Ok(()) => {
                    stats.delivered += 1;
                    debug!("Notified subscriber {}", notification.subscriber_id);
                }
                Err(e) => {
                    stats.failed += 1;
                    warn!(
                        "Failed to notify subscriber {}: {}",
                        notification.subscriber_id, e
                    );
                }
            }
        }

        info!(
            "Delivery worker stopped ({} delivered, {} failed)",
            stats.delivered, stats.failed
        );
        stats
    }

    async fn deliver(&self, notification: &Notification) -> Result<()> {
        let address = self
            .messenger
            .resolve(notification.subscriber_id)
            .await?
            .ok_or_else(|| {
                AppError::Messaging(format!(
                    "no delivery address for subscriber {}",
                    notification.subscriber_id
                ))
            })?;

        self.messenger.send(&address, &notification.body).await
    }
}
