mod messenger;
mod queue;
mod worker;

pub use messenger::Messenger;
pub use queue::{notification_queue, NotificationQueue, NotificationReceiver};
pub use worker::{DeliveryStats, DeliveryWorker};
