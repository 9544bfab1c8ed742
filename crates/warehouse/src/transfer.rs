use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use stockflow_core::{
    Aggregate, AggregateRoot, EngineError, Entity, SkuId, TransferId, UserId, WarehouseId,
};
use stockflow_events::Event;

use crate::stock::{
    AdjustmentBatch, AdjustmentReason, IdempotencyKey, StockAdjustment, TRANSFER_KEY_PREFIX,
    validate_quantity,
};

/// Transfer lifecycle.
///
/// `Pending -> Approved -> Shipped -> Received -> Completed`, with `Cancelled`
/// reachable from any non-terminal state. Source stock is locked from creation
/// until completion or cancellation.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum TransferStatus {
    Pending,
    Approved,
    Shipped,
    Received,
    Completed,
    Cancelled,
}

impl TransferStatus {
    pub fn is_terminal(&self) -> bool {
        matches!(self, TransferStatus::Completed | TransferStatus::Cancelled)
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            TransferStatus::Pending => "PENDING",
            TransferStatus::Approved => "APPROVED",
            TransferStatus::Shipped => "SHIPPED",
            TransferStatus::Received => "RECEIVED",
            TransferStatus::Completed => "COMPLETED",
            TransferStatus::Cancelled => "CANCELLED",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        Some(match s {
            "PENDING" => TransferStatus::Pending,
            "APPROVED" => TransferStatus::Approved,
            "SHIPPED" => TransferStatus::Shipped,
            "RECEIVED" => TransferStatus::Received,
            "COMPLETED" => TransferStatus::Completed,
            "CANCELLED" => TransferStatus::Cancelled,
            _ => return None,
        })
    }
}

impl core::fmt::Display for TransferStatus {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Aggregate root: StockTransfer.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StockTransfer {
    pub id: TransferId,
    pub transfer_no: String,
    pub from_warehouse_id: WarehouseId,
    pub to_warehouse_id: WarehouseId,
    pub sku_id: SkuId,
    pub quantity: i64,
    pub status: TransferStatus,
    pub created_by: Option<UserId>,
    pub cancel_reason: Option<String>,
    pub created_at: DateTime<Utc>,
    pub approved_at: Option<DateTime<Utc>>,
    pub shipped_at: Option<DateTime<Utc>>,
    pub received_at: Option<DateTime<Utc>>,
    pub completed_at: Option<DateTime<Utc>>,
    pub cancelled_at: Option<DateTime<Utc>>,
    pub updated_at: DateTime<Utc>,
    pub version: u64,
    #[serde(skip)]
    created: bool,
}

impl StockTransfer {
    /// Create an empty, not-yet-created aggregate instance.
    pub fn empty(id: TransferId) -> Self {
        let epoch = DateTime::<Utc>::UNIX_EPOCH;
        Self {
            id,
            transfer_no: String::new(),
            from_warehouse_id: WarehouseId::from_u128(0),
            to_warehouse_id: WarehouseId::from_u128(0),
            sku_id: SkuId::from_u128(0),
            quantity: 0,
            status: TransferStatus::Pending,
            created_by: None,
            cancel_reason: None,
            created_at: epoch,
            approved_at: None,
            shipped_at: None,
            received_at: None,
            completed_at: None,
            cancelled_at: None,
            updated_at: epoch,
            version: 0,
            created: false,
        }
    }

    /// Mark a transfer loaded from storage as existing.
    pub fn restored(mut self) -> Self {
        self.created = true;
        self
    }

    pub fn is_created(&self) -> bool {
        self.created
    }

    /// Ledger batch that must commit together with `event`, if any.
    ///
    /// Keys are derived from the transfer id so a replayed transition can never
    /// apply its stock movement twice.
    pub fn ledger_effect(&self, event: &TransferEvent) -> Option<AdjustmentBatch> {
        let (phase, reason, lines) = match event {
            TransferEvent::Created(e) => (
                "lock",
                AdjustmentReason::TransferLock,
                vec![StockAdjustment::lock(e.from_warehouse_id, e.sku_id, e.quantity)],
            ),
            TransferEvent::Completed { .. } => (
                "complete",
                AdjustmentReason::TransferComplete,
                vec![
                    StockAdjustment::consume_locked(self.from_warehouse_id, self.sku_id, self.quantity),
                    StockAdjustment::credit(self.to_warehouse_id, self.sku_id, self.quantity),
                ],
            ),
            TransferEvent::Cancelled { .. } => (
                "release",
                AdjustmentReason::TransferRelease,
                vec![StockAdjustment::unlock(self.from_warehouse_id, self.sku_id, self.quantity)],
            ),
            TransferEvent::Approved { .. }
            | TransferEvent::Shipped { .. }
            | TransferEvent::Received { .. } => return None,
        };

        let key = IdempotencyKey::new(format!("{TRANSFER_KEY_PREFIX}{}:{phase}", self.id)).ok()?;
        Some(AdjustmentBatch::new(reason, lines).with_key(key))
    }

    fn invalid(&self, action: &'static str) -> EngineError {
        EngineError::invalid_transition(&self.transfer_no, self.status, action)
    }
}

impl AggregateRoot for StockTransfer {
    type Id = TransferId;

    fn id(&self) -> &Self::Id {
        &self.id
    }

    fn version(&self) -> u64 {
        self.version
    }
}

impl Entity for StockTransfer {
    type Id = TransferId;

    fn id(&self) -> &Self::Id {
        &self.id
    }
}

/// Command: CreateTransfer.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CreateTransfer {
    pub transfer_id: TransferId,
    pub transfer_no: String,
    pub from_warehouse_id: WarehouseId,
    pub to_warehouse_id: WarehouseId,
    pub sku_id: SkuId,
    pub quantity: i64,
    pub created_by: Option<UserId>,
    pub occurred_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum TransferCommand {
    Create(CreateTransfer),
    Approve { occurred_at: DateTime<Utc> },
    Ship { occurred_at: DateTime<Utc> },
    Receive { occurred_at: DateTime<Utc> },
    Complete { occurred_at: DateTime<Utc> },
    Cancel {
        reason: Option<String>,
        occurred_at: DateTime<Utc>,
    },
}

/// Event: TransferCreated.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TransferCreated {
    pub transfer_id: TransferId,
    pub transfer_no: String,
    pub from_warehouse_id: WarehouseId,
    pub to_warehouse_id: WarehouseId,
    pub sku_id: SkuId,
    pub quantity: i64,
    pub created_by: Option<UserId>,
    pub occurred_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum TransferEvent {
    Created(TransferCreated),
    Approved { occurred_at: DateTime<Utc> },
    Shipped { occurred_at: DateTime<Utc> },
    Received { occurred_at: DateTime<Utc> },
    Completed { occurred_at: DateTime<Utc> },
    Cancelled {
        reason: Option<String>,
        occurred_at: DateTime<Utc>,
    },
}

impl Event for TransferEvent {
    fn event_type(&self) -> &'static str {
        match self {
            TransferEvent::Created(_) => "warehouse.transfer.created",
            TransferEvent::Approved { .. } => "warehouse.transfer.approved",
            TransferEvent::Shipped { .. } => "warehouse.transfer.shipped",
            TransferEvent::Received { .. } => "warehouse.transfer.received",
            TransferEvent::Completed { .. } => "warehouse.transfer.completed",
            TransferEvent::Cancelled { .. } => "warehouse.transfer.cancelled",
        }
    }

    fn version(&self) -> u32 {
        1
    }

    fn occurred_at(&self) -> DateTime<Utc> {
        match self {
            TransferEvent::Created(e) => e.occurred_at,
            TransferEvent::Approved { occurred_at }
            | TransferEvent::Shipped { occurred_at }
            | TransferEvent::Received { occurred_at }
            | TransferEvent::Completed { occurred_at }
            | TransferEvent::Cancelled { occurred_at, .. } => *occurred_at,
        }
    }
}

impl Aggregate for StockTransfer {
    type Command = TransferCommand;
    type Event = TransferEvent;
    type Error = EngineError;

    fn apply(&mut self, event: &Self::Event) {
        match event {
            TransferEvent::Created(e) => {
                self.id = e.transfer_id;
                self.transfer_no = e.transfer_no.clone();
                self.from_warehouse_id = e.from_warehouse_id;
                self.to_warehouse_id = e.to_warehouse_id;
                self.sku_id = e.sku_id;
                self.quantity = e.quantity;
                self.status = TransferStatus::Pending;
                self.created_by = e.created_by;
                self.created_at = e.occurred_at;
                self.created = true;
            }
            TransferEvent::Approved { occurred_at } => {
                self.status = TransferStatus::Approved;
                self.approved_at = Some(*occurred_at);
            }
            TransferEvent::Shipped { occurred_at } => {
                self.status = TransferStatus::Shipped;
                self.shipped_at = Some(*occurred_at);
            }
            TransferEvent::Received { occurred_at } => {
                self.status = TransferStatus::Received;
                self.received_at = Some(*occurred_at);
            }
            TransferEvent::Completed { occurred_at } => {
                self.status = TransferStatus::Completed;
                self.received_at.get_or_insert(*occurred_at);
                self.completed_at = Some(*occurred_at);
            }
            TransferEvent::Cancelled {
                reason,
                occurred_at,
            } => {
                self.status = TransferStatus::Cancelled;
                self.cancel_reason = reason.clone();
                self.cancelled_at = Some(*occurred_at);
            }
        }

        self.updated_at = event.occurred_at();
        self.version += 1;
    }

    fn handle(&self, command: &Self::Command) -> Result<Vec<Self::Event>, Self::Error> {
        match command {
            TransferCommand::Create(cmd) => self.handle_create(cmd),
            _ if !self.created => Err(EngineError::not_found("transfer", self.id)),
            TransferCommand::Approve { occurred_at } => match self.status {
                TransferStatus::Pending => Ok(vec![TransferEvent::Approved {
                    occurred_at: *occurred_at,
                }]),
                _ => Err(self.invalid("approve")),
            },
            TransferCommand::Ship { occurred_at } => match self.status {
                TransferStatus::Approved => Ok(vec![TransferEvent::Shipped {
                    occurred_at: *occurred_at,
                }]),
                _ => Err(self.invalid("ship")),
            },
            TransferCommand::Receive { occurred_at } => match self.status {
                TransferStatus::Shipped => Ok(vec![TransferEvent::Received {
                    occurred_at: *occurred_at,
                }]),
                _ => Err(self.invalid("receive")),
            },
            TransferCommand::Complete { occurred_at } => match self.status {
                TransferStatus::Shipped | TransferStatus::Received => {
                    Ok(vec![TransferEvent::Completed {
                        occurred_at: *occurred_at,
                    }])
                }
                _ => Err(self.invalid("complete")),
            },
            TransferCommand::Cancel {
                reason,
                occurred_at,
            } => {
                if self.status.is_terminal() {
                    return Err(self.invalid("cancel"));
                }
                Ok(vec![TransferEvent::Cancelled {
                    reason: reason.clone(),
                    occurred_at: *occurred_at,
                }])
            }
        }
    }
}

impl StockTransfer {
    fn handle_create(&self, cmd: &CreateTransfer) -> Result<Vec<TransferEvent>, EngineError> {
        if self.created {
            return Err(EngineError::conflict(format!(
                "transfer {} already exists",
                self.id
            )));
        }
        if cmd.from_warehouse_id == cmd.to_warehouse_id {
            return Err(EngineError::invalid(
                "source and destination warehouse must differ",
            ));
        }
        validate_quantity(cmd.quantity)?;
        if cmd.transfer_no.trim().is_empty() {
            return Err(EngineError::invalid("transfer number cannot be empty"));
        }

        Ok(vec![TransferEvent::Created(TransferCreated {
            transfer_id: cmd.transfer_id,
            transfer_no: cmd.transfer_no.clone(),
            from_warehouse_id: cmd.from_warehouse_id,
            to_warehouse_id: cmd.to_warehouse_id,
            sku_id: cmd.sku_id,
            quantity: cmd.quantity,
            created_by: cmd.created_by,
            occurred_at: cmd.occurred_at,
        })])
    }
}

/// Filter for transfer listings and reconciliation sweeps.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct TransferFilter {
    pub status: Option<TransferStatus>,
    /// Matches either the source or the destination.
    pub warehouse_id: Option<WarehouseId>,
    pub sku_id: Option<SkuId>,
    pub created_before: Option<DateTime<Utc>>,
    /// Only transfers last updated strictly before this instant.
    pub updated_before: Option<DateTime<Utc>>,
    /// Only non-terminal transfers.
    pub open_only: bool,
}

impl TransferFilter {
    pub fn matches(&self, t: &StockTransfer) -> bool {
        self.status.is_none_or(|s| t.status == s)
            && self
                .warehouse_id
                .is_none_or(|w| t.from_warehouse_id == w || t.to_warehouse_id == w)
            && self.sku_id.is_none_or(|s| t.sku_id == s)
            && self.created_before.is_none_or(|cutoff| t.created_at < cutoff)
            && self.updated_before.is_none_or(|cutoff| t.updated_at < cutoff)
            && (!self.open_only || !t.status.is_terminal())
    }
}
