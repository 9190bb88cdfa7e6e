//! Event unifier: rule-driven Kafka stream transformation.

pub mod api;
pub mod auth;
pub mod broker;
pub mod config;
pub mod error;
pub mod model;
pub mod store;
pub mod transform;
pub mod worker;
