//! Engine events and their distribution.
//!
//! State changes are committed to storage first; the resulting facts are then
//! wrapped in an [`EventEnvelope`] and published on an [`EventBus`] for
//! downstream consumers (read models, reconciliation, notifications).

pub mod bus;
pub mod envelope;
pub mod event;
pub mod in_memory_bus;

pub use bus::{EventBus, Subscription};
pub use envelope::EventEnvelope;
pub use event::Event;
pub use in_memory_bus::{InMemoryBusError, InMemoryEventBus, NoopEventBus};
