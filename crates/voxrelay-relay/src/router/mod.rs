//! Envelope routing.

mod broker;

pub use broker::{Broker, BrokerStats, DeliveryFailure, DeliveryReport, FailureKind, Route};
