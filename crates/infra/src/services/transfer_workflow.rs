//! Transfer workflow: drives the `StockTransfer` state machine against the store.
//!
//! Source stock is locked when the transfer is created. Completion consumes the
//! lock and credits the destination; cancellation releases it. Each transition
//! and its ledger batch commit as one unit, so a failed adjustment leaves the
//! transfer in its previous state.

use std::sync::Arc;

use chrono::{Duration, Utc};
use tracing::{info, instrument};

use stockflow_core::{
    Aggregate, AggregateRoot, EngineError, EngineResult, ExpectedVersion, Page, Paged,
    SequenceGenerator, SkuId, TransferId, UserId, WarehouseId,
};
use stockflow_warehouse::{
    CreateTransfer, StockTransfer, TransferCommand, TransferFilter, WarehouseEvent,
};

use crate::publisher::EventPublisher;
use crate::services::PageLimits;
use crate::services::ledger::StockLedger;
use crate::store::{StockStore, TransferStore, WarehouseStore};

#[derive(Debug)]
pub struct TransferWorkflow<S, G> {
    store: Arc<S>,
    ledger: StockLedger<S>,
    generator: G,
    publisher: EventPublisher,
    prefix: String,
    limits: PageLimits,
}

impl<S, G> TransferWorkflow<S, G>
where
    S: StockStore + WarehouseStore + TransferStore,
    G: SequenceGenerator,
{
    pub fn new(
        store: Arc<S>,
        ledger: StockLedger<S>,
        generator: G,
        publisher: EventPublisher,
        prefix: impl Into<String>,
        limits: PageLimits,
    ) -> Self {
        Self {
            store,
            ledger,
            generator,
            publisher,
            prefix: prefix.into(),
            limits,
        }
    }

    /// Create a `Pending` transfer and lock `quantity` units at the source.
    #[instrument(skip(self), fields(from = %from, to = %to, sku_id = %sku_id), err)]
    pub fn create(
        &self,
        from: WarehouseId,
        to: WarehouseId,
        sku_id: SkuId,
        quantity: i64,
        created_by: Option<UserId>,
    ) -> EngineResult<StockTransfer> {
        self.ledger.require_warehouse(from)?;
        self.ledger.require_warehouse(to)?;

        let id = TransferId::new();
        let transfer_no = format!("{}{}", self.prefix, self.generator.next_id()?);
        let command = TransferCommand::Create(CreateTransfer {
            transfer_id: id,
            transfer_no,
            from_warehouse_id: from,
            to_warehouse_id: to,
            sku_id,
            quantity,
            created_by,
            occurred_at: Utc::now(),
        });

        self.run(StockTransfer::empty(id), command)
    }

    pub fn approve(&self, id: TransferId) -> EngineResult<StockTransfer> {
        self.transition(id, TransferCommand::Approve { occurred_at: Utc::now() })
    }

    pub fn ship(&self, id: TransferId) -> EngineResult<StockTransfer> {
        self.transition(id, TransferCommand::Ship { occurred_at: Utc::now() })
    }

    pub fn receive(&self, id: TransferId) -> EngineResult<StockTransfer> {
        self.transition(id, TransferCommand::Receive { occurred_at: Utc::now() })
    }

    /// Move the locked quantity from source to destination in one atomic step.
    pub fn complete(&self, id: TransferId) -> EngineResult<StockTransfer> {
        self.transition(id, TransferCommand::Complete { occurred_at: Utc::now() })
    }

    /// Cancel a non-terminal transfer and release its source lock.
    pub fn cancel(&self, id: TransferId, reason: Option<String>) -> EngineResult<StockTransfer> {
        self.transition(
            id,
            TransferCommand::Cancel {
                reason,
                occurred_at: Utc::now(),
            },
        )
    }

    pub fn get(&self, id: TransferId) -> EngineResult<StockTransfer> {
        self.store
            .get_transfer(id)?
            .ok_or_else(|| EngineError::not_found("transfer", id))
    }

    pub fn get_by_no(&self, transfer_no: &str) -> EngineResult<StockTransfer> {
        self.store
            .get_transfer_by_no(transfer_no)?
            .ok_or_else(|| EngineError::not_found("transfer", transfer_no))
    }

    pub fn list(&self, filter: &TransferFilter, page: Page) -> EngineResult<Paged<StockTransfer>> {
        let page = page.normalized(self.limits.default_size, self.limits.max_size);
        Ok(self.store.list_transfers(filter, page)?)
    }

    /// Non-terminal transfers not updated for at least `older_than`.
    pub fn stale_transfers(&self, older_than: Duration, page: Page) -> EngineResult<Paged<StockTransfer>> {
        if older_than < Duration::zero() {
            return Err(EngineError::invalid("staleness window cannot be negative"));
        }
        let filter = TransferFilter {
            updated_before: Some(Utc::now() - older_than),
            open_only: true,
            ..TransferFilter::default()
        };
        self.list(&filter, page)
    }

    #[instrument(skip(self, command), fields(transfer_id = %id), err)]
    fn transition(&self, id: TransferId, command: TransferCommand) -> EngineResult<StockTransfer> {
        let current = self.get(id)?;
        self.run(current, command)
    }

    fn run(&self, current: StockTransfer, command: TransferCommand) -> EngineResult<StockTransfer> {
        let events = current.handle(&command)?;
        let [event] = events.as_slice() else {
            return Err(EngineError::internal(format!(
                "transfer command produced {} events",
                events.len()
            )));
        };

        let batch = current.ledger_effect(event);
        let mut next = current.clone();
        next.apply(event);

        let now = Utc::now();
        let records = if current.is_created() {
            self.store.transition_transfer(
                &next,
                ExpectedVersion::Exact(current.version()),
                batch.as_ref(),
                now,
            )?
        } else {
            let batch = batch
                .as_ref()
                .ok_or_else(|| EngineError::internal("transfer creation has no ledger effect"))?;
            self.store.insert_transfer(&next, batch, now)?
        };

        let from = current.is_created().then_some(current.status);
        info!(
            transfer_id = %next.id,
            transfer_no = %next.transfer_no,
            from = ?from,
            to = %next.status,
            quantity = next.quantity,
            "transfer transitioned"
        );
        if let Some(batch) = &batch {
            self.ledger.committed(batch, &records);
        }
        self.publisher.publish(WarehouseEvent::transitioned(from, &next));
        Ok(next)
    }
}
