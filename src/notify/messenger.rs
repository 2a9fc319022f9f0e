use async_trait::async_trait;

use crate::error::Result;
use crate::models::{DeliveryAddress, SubscriberId};

/// Chat platform used to reach subscribers.
#[async_trait]
pub trait Messenger: Send + Sync {
    /// Delivery address for `subscriber`, or `None` if the platform can't reach them.
    async fn resolve(&self, subscriber: SubscriberId) -> Result<Option<DeliveryAddress>>;

    async fn send(&self, address: &DeliveryAddress, text: &str) -> Result<()>;
}
