pub mod broker;
pub mod cloudevents;
pub mod processed;

pub use broker::{EventBroker, InMemoryEventBroker, KafkaEventBroker, OutboundMessage};
pub use cloudevents::CloudEvent;
pub use processed::ConsumerGuard;
