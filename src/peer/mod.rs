//! Peer notifications over publish/subscribe.
//!
//! After a push this instance publishes a notice; peers that receive it pull
//! right away instead of waiting for their own next flush.

mod bridge;
mod bus;
mod memory;
mod redis;

pub use bridge::{NotificationBridge, PushNotice};
pub use bus::{MessageKind, PubSub, PubSubError, PubSubMessage, Subscription};
pub use memory::MemoryBus;
pub use self::redis::RedisBus;

/// Transport chosen at startup.
#[derive(Clone)]
pub enum AnyBus {
    Memory(MemoryBus),
    Redis(RedisBus),
}

impl AnyBus {
    /// Redis when a URL is given, otherwise an in-process bus.
    pub fn from_url(url: Option<&str>) -> Result<Self, PubSubError> {
        match url {
            Some(url) => Ok(AnyBus::Redis(RedisBus::new(url)?)),
            None => Ok(AnyBus::Memory(MemoryBus::new())),
        }
    }
}

impl PubSub for AnyBus {
    async fn publish(&self, channel: &str, payload: &str) -> Result<(), PubSubError> {
        match self {
            AnyBus::Memory(bus) => bus.publish(channel, payload).await,
            AnyBus::Redis(bus) => bus.publish(channel, payload).await,
        }
    }

    async fn subscribe(&self, channel: &str) -> Result<Subscription, PubSubError> {
        match self {
            AnyBus::Memory(bus) => bus.subscribe(channel).await,
            AnyBus::Redis(bus) => bus.subscribe(channel).await,
        }
    }
}
