use tokio::sync::mpsc;

use crate::models::Notification;

/// Unbounded FIFO between fan-out and the delivery worker.
pub fn notification_queue() -> (NotificationQueue, NotificationReceiver) {
    let (tx, rx) = mpsc::unbounded_channel();
    (NotificationQueue { tx }, NotificationReceiver { rx })
}

/// Producer half. Cheap to clone; enqueueing never waits.
#[derive(Debug, Clone)]
pub struct NotificationQueue {
    tx: mpsc::UnboundedSender<Notification>,
}

impl NotificationQueue {
    /// Returns `false` if the consumer is gone and the notification was dropped.
    pub fn enqueue(&self, notification: Notification) -> bool {
        match self.tx.send(notification) {
            Ok(()) => true,
            Err(mpsc::error::SendError(notification)) => {
                tracing::warn!(
                    "Delivery worker stopped, dropping notification for {}",
                    notification.subscriber_id
                );
                false
            }
        }
    }
}

/// Consumer half, owned by the delivery worker.
#[derive(Debug)]
pub struct NotificationReceiver {
    rx: mpsc::UnboundedReceiver<Notification>,
}

impl NotificationReceiver {
    /// Next notification, or `None` once every producer is dropped and the queue is drained.
    pub async fn recv(&mut self) -> Option<Notification> {
        self.rx.recv().await
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn note(subscriber_id: u64) -> Notification {
        Notification {
            subscriber_id,
            body: format!("body {subscriber_id}"),
        }
    }

    #[tokio::test]
    async fn delivers_in_fifo_order_from_many_producers() {
        let (queue, mut receiver) = notification_queue();
        let other = queue.clone();

        assert!(queue.enqueue(note(1)));
        assert!(other.enqueue(note(2)));
        assert!(queue.enqueue(note(3)));
        drop(queue);
        drop(other);

        let mut seen = Vec::new();
        while let Some(n) = receiver.recv().await {
            seen.push(n.subscriber_id);
        }
        assert_eq!(seen, vec![1, 2, 3]);
    }

    #[tokio::test]
    async fn enqueue_after_consumer_drop_reports_failure() {
        let (queue, receiver) = notification_queue();
        drop(receiver);
        assert!(!queue.enqueue(note(1)));
    }
}
