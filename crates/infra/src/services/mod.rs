//! Engine services.
//!
//! Each service owns one area of behavior and talks to storage only through the
//! store traits. Events go out through the [`EventPublisher`](crate::publisher::EventPublisher)
//! after the store has committed.

pub mod allocator;
pub mod ledger;
pub mod registry;
pub mod saga_port;
pub mod selector;
pub mod transfer_workflow;

pub use allocator::OrderAllocator;
pub use ledger::StockLedger;
pub use registry::WarehouseRegistry;
pub use saga_port::SagaPort;
pub use selector::WarehouseSelector;
pub use transfer_workflow::TransferWorkflow;

/// Page size bounds applied to list requests.
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub struct PageLimits {
    pub default_size: u32,
    pub max_size: u32,
}

impl PageLimits {
    pub fn new(default_size: u32, max_size: u32) -> Self {
        Self {
            default_size,
            max_size,
        }
    }
}

impl Default for PageLimits {
    fn default() -> Self {
        Self::new(20, 100)
    }
}
