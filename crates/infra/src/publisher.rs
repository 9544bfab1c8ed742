//! Post-commit publication of engine events.
//!
//! Publication runs only after the store has committed, and it is best effort:
//! a failing bus is logged and never undoes the stock change.

use std::sync::Arc;

use serde_json::Value as JsonValue;
use tracing::warn;

use stockflow_events::{EventBus, EventEnvelope, NoopEventBus};
use stockflow_warehouse::WarehouseEvent;

/// Object-safe view of an `EventBus` carrying JSON envelopes.
pub trait EnvelopeSink: Send + Sync {
    fn publish_envelope(&self, envelope: EventEnvelope<JsonValue>) -> Result<(), String>;
}

impl<B> EnvelopeSink for B
where
    B: EventBus<EventEnvelope<JsonValue>>,
{
    fn publish_envelope(&self, envelope: EventEnvelope<JsonValue>) -> Result<(), String> {
        self.publish(envelope).map_err(|e| format!("{e:?}"))
    }
}

#[derive(Clone)]
pub struct EventPublisher {
    sink: Arc<dyn EnvelopeSink>,
}

impl core::fmt::Debug for EventPublisher {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.debug_struct("EventPublisher").finish_non_exhaustive()
    }
}

impl Default for EventPublisher {
    fn default() -> Self {
        Self::new(NoopEventBus)
    }
}

impl EventPublisher {
    pub fn new<B>(bus: B) -> Self
    where
        B: EventBus<EventEnvelope<JsonValue>> + 'static,
    {
        Self {
            sink: Arc::new(bus),
        }
    }

    pub fn publish(&self, event: WarehouseEvent) {
        let envelope = match EventEnvelope::from_typed(
            event.aggregate_type(),
            event.aggregate_id(),
            event.sequence_number(),
            &event,
        ) {
            Ok(envelope) => envelope,
            Err(err) => {
                warn!(error = %err, "failed to encode engine event");
                return;
            }
        };

        let event_type = envelope.event_type().to_string();
        if let Err(err) = self.sink.publish_envelope(envelope) {
            warn!(event_type = %event_type, error = %err, "event publication failed");
        }
    }
}
