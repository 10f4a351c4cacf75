//! Broker backends implementing the collaborator traits.

pub mod memory;
#[cfg(feature = "rdkafka")]
pub mod rdkafka;

pub use memory::{CommitRecord, MemoryBroker, MemoryBrokerStats};
#[cfg(feature = "rdkafka")]
pub use self::rdkafka::RdKafkaConnector;
