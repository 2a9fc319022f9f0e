use super::SubscriberId;

/// Platform-specific address a notification is delivered to (e.g. a DM channel id).
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct DeliveryAddress(pub String);

impl std::fmt::Display for DeliveryAddress {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Notification {
    pub subscriber_id: SubscriberId,
    pub body: String,
}
