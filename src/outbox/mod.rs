pub mod publisher;
pub mod writer;

pub use publisher::{OutboxPublisher, OutboxPublisherConfig};
pub use writer::OutboxWriter;
