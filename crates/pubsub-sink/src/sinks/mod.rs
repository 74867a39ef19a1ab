//! Sink connector implementations.
//!
//! This module contains the Pub/Sub sink task driven by the connector
//! runtime.

pub mod pubsub;

pub use pubsub::{PubSubSinkTask, SinkConfig, TransportFactory};
