//! Storage, configuration and services of the warehouse engine.
//!
//! [`WarehouseEngine`] is the entry point. It runs the pure rules of
//! `stockflow-warehouse` against an [`EngineStore`](store::EngineStore)
//! (in-memory or Postgres) and publishes committed facts on an event bus.

pub mod config;
pub mod engine;
pub mod publisher;
pub mod services;
pub mod store;

pub use config::{ConfigError, EngineConfig};
pub use engine::WarehouseEngine;
pub use publisher::EventPublisher;
