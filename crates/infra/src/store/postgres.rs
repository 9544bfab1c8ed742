//! Postgres-backed engine store.
//!
//! Every ledger batch runs in one transaction: the idempotency key is claimed
//! first, then each touched `(warehouse, sku)` row is locked with
//! `SELECT ... FOR UPDATE` in a fixed order, the lines are checked against the
//! locked rows and the final states are written back. Transfer rows and their
//! batch share the same transaction.
//!
//! ## Error Mapping
//!
//! | SQLx Error | PostgreSQL Error Code | StoreError |
//! |------------|----------------------|------------|
//! | Database (unique violation) | `23505` | `DuplicateKey` |
//! | Database (foreign key violation) | `23503` | `NotFound` (warehouse) |
//! | Database (check constraint violation) | `23514` | `Conflict` |
//! | Database (serialization failure) | `40001` | `Conflict` |
//! | Any other | N/A | `Backend` |

use std::collections::{BTreeSet, HashMap};
use std::future::Future;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde_json::Value as JsonValue;
use sqlx::postgres::{PgPoolOptions, PgRow};
use sqlx::{PgPool, Postgres, Row, Transaction};
use tracing::{debug, instrument};
use uuid::Uuid;

use stockflow_core::{
    ExpectedVersion, Page, Paged, SkuId, TransferId, UserId, WarehouseId,
};
use stockflow_warehouse::stock::final_states;
use stockflow_warehouse::{
    AdjustmentBatch, AdjustmentReason, BatchOutcome, Candidate, GeoPoint, IdempotencyKey,
    StockAdjustment, StockRecord, StockTransfer, TransferFilter, TransferStatus, Warehouse,
    WarehouseFilter, WarehouseStatus, apply_lines,
};

use super::r#trait::{AppliedBatch, StockStore, StoreError, TransferStore, WarehouseStore};

const SCHEMA: &str = include_str!("../../migrations/0001_warehouse_engine.sql");

/// Postgres-backed engine store.
///
/// `Send + Sync`; all operations go through the SQLx connection pool. The
/// synchronous store traits block on the current tokio runtime handle, so call
/// them from a blocking context inside that runtime (`spawn_blocking`).
#[derive(Debug, Clone)]
pub struct PostgresStore {
    pool: Arc<PgPool>,
}

impl PostgresStore {
    pub fn new(pool: PgPool) -> Self {
        Self {
            pool: Arc::new(pool),
        }
    }

    /// Connect with a small pool sized for an embedded engine.
    pub async fn connect(database_url: &str) -> Result<Self, StoreError> {
        let pool = PgPoolOptions::new()
            .max_connections(8)
            .connect(database_url)
            .await
            .map_err(|e| map_sqlx_error("connect", e))?;
        Ok(Self::new(pool))
    }

    /// Create tables and indexes if they do not exist.
    pub async fn migrate(&self) -> Result<(), StoreError> {
        sqlx::raw_sql(SCHEMA)
            .execute(&*self.pool)
            .await
            .map_err(|e| map_sqlx_error("migrate", e))?;
        Ok(())
    }

    #[instrument(skip(self, batch), fields(lines = batch.lines.len(), reason = batch.reason.as_str()), err)]
    pub async fn apply_batch_async(
        &self,
        batch: &AdjustmentBatch,
        now: DateTime<Utc>,
    ) -> Result<BatchOutcome, StoreError> {
        let mut tx = self.begin().await?;
        let outcome = apply_batch_in(&mut tx, batch, now).await?;
        tx.commit()
            .await
            .map_err(|e| map_sqlx_error("commit_transaction", e))?;
        Ok(outcome)
    }

    pub async fn get_stock_async(
        &self,
        warehouse_id: WarehouseId,
        sku_id: SkuId,
    ) -> Result<Option<StockRecord>, StoreError> {
        let row = sqlx::query(&format!(
            "SELECT {STOCK_COLUMNS} FROM stock_records WHERE warehouse_id = $1 AND sku_id = $2"
        ))
        .bind(warehouse_id.as_uuid())
        .bind(sku_id.as_uuid())
        .fetch_optional(&*self.pool)
        .await
        .map_err(|e| map_sqlx_error("get_stock", e))?;

        row.as_ref().map(stock_from_row).transpose()
    }

    pub async fn list_stock_async(
        &self,
        warehouse_id: Option<WarehouseId>,
        sku_id: Option<SkuId>,
    ) -> Result<Vec<StockRecord>, StoreError> {
        let rows = sqlx::query(&format!(
            r#"
            SELECT {STOCK_COLUMNS}
            FROM stock_records
            WHERE ($1::uuid IS NULL OR warehouse_id = $1)
              AND ($2::uuid IS NULL OR sku_id = $2)
            ORDER BY warehouse_id, sku_id
            "#
        ))
        .bind(warehouse_id.map(|w| *w.as_uuid()))
        .bind(sku_id.map(|s| *s.as_uuid()))
        .fetch_all(&*self.pool)
        .await
        .map_err(|e| map_sqlx_error("list_stock", e))?;

        rows.iter().map(stock_from_row).collect()
    }

    pub async fn set_limits_async(
        &self,
        warehouse_id: WarehouseId,
        sku_id: SkuId,
        safe_stock: i64,
        max_stock: i64,
        now: DateTime<Utc>,
    ) -> Result<StockRecord, StoreError> {
        let row = sqlx::query(&format!(
            r#"
            INSERT INTO stock_records
                (warehouse_id, sku_id, stock, locked, safe_stock, max_stock, version, updated_at)
            VALUES ($1, $2, 0, 0, $3, $4, 1, $5)
            ON CONFLICT (warehouse_id, sku_id) DO UPDATE SET
                safe_stock = EXCLUDED.safe_stock,
                max_stock = EXCLUDED.max_stock,
                version = stock_records.version + 1,
                updated_at = EXCLUDED.updated_at
            RETURNING {STOCK_COLUMNS}
            "#
        ))
        .bind(warehouse_id.as_uuid())
        .bind(sku_id.as_uuid())
        .bind(safe_stock)
        .bind(max_stock)
        .bind(now)
        .fetch_one(&*self.pool)
        .await
        .map_err(|e| map_sqlx_error("set_limits", e))?;

        stock_from_row(&row)
    }

    pub async fn applied_batch_async(
        &self,
        key: &IdempotencyKey,
    ) -> Result<Option<AppliedBatch>, StoreError> {
        let row = sqlx::query(
            "SELECT idempotency_key, reason, lines, applied_at FROM applied_batches WHERE idempotency_key = $1",
        )
        .bind(key.as_str())
        .fetch_optional(&*self.pool)
        .await
        .map_err(|e| map_sqlx_error("applied_batch", e))?;

        row.as_ref().map(applied_from_row).transpose()
    }

    pub async fn insert_warehouse_async(&self, w: &Warehouse) -> Result<(), StoreError> {
        sqlx::query(
            r#"
            INSERT INTO warehouses
                (id, code, name, status, latitude, longitude, priority, capacity, version, created_at, updated_at)
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11)
            "#,
        )
        .bind(w.id.as_uuid())
        .bind(&w.code)
        .bind(&w.name)
        .bind(w.status.as_str())
        .bind(w.location.map(|l| l.latitude()))
        .bind(w.location.map(|l| l.longitude()))
        .bind(w.priority)
        .bind(w.capacity)
        .bind(w.version as i64)
        .bind(w.created_at)
        .bind(w.updated_at)
        .execute(&*self.pool)
        .await
        .map_err(|e| map_sqlx_error("insert_warehouse", e))?;
        Ok(())
    }

    pub async fn update_warehouse_async(
        &self,
        w: &Warehouse,
        expected_version: ExpectedVersion,
    ) -> Result<(), StoreError> {
        let expected = match expected_version {
            ExpectedVersion::Any => None,
            ExpectedVersion::Exact(v) => Some(v as i64),
        };
        let result = sqlx::query(
            r#"
            UPDATE warehouses SET
                name = $2, status = $3, latitude = $4, longitude = $5,
                priority = $6, capacity = $7, version = $8, updated_at = $9
            WHERE id = $1 AND code = $10 AND ($11::bigint IS NULL OR version = $11)
            "#,
        )
        .bind(w.id.as_uuid())
        .bind(&w.name)
        .bind(w.status.as_str())
        .bind(w.location.map(|l| l.latitude()))
        .bind(w.location.map(|l| l.longitude()))
        .bind(w.priority)
        .bind(w.capacity)
        .bind(w.version as i64)
        .bind(w.updated_at)
        .bind(&w.code)
        .bind(expected)
        .execute(&*self.pool)
        .await
        .map_err(|e| map_sqlx_error("update_warehouse", e))?;

        if result.rows_affected() == 0 {
            return match self.get_warehouse_async(w.id).await? {
                None => Err(StoreError::NotFound {
                    entity: "warehouse",
                    id: w.id.to_string(),
                }),
                Some(current) => Err(StoreError::Conflict(format!(
                    "warehouse {}: expected {expected_version:?}, found {}",
                    current.code, current.version
                ))),
            };
        }
        Ok(())
    }

    pub async fn get_warehouse_async(&self, id: WarehouseId) -> Result<Option<Warehouse>, StoreError> {
        let row = sqlx::query(&format!("SELECT {WAREHOUSE_COLUMNS} FROM warehouses WHERE id = $1"))
            .bind(id.as_uuid())
            .fetch_optional(&*self.pool)
            .await
            .map_err(|e| map_sqlx_error("get_warehouse", e))?;
        row.as_ref().map(warehouse_from_row).transpose()
    }

    pub async fn get_warehouse_by_code_async(&self, code: &str) -> Result<Option<Warehouse>, StoreError> {
        let row = sqlx::query(&format!("SELECT {WAREHOUSE_COLUMNS} FROM warehouses WHERE code = $1"))
            .bind(code)
            .fetch_optional(&*self.pool)
            .await
            .map_err(|e| map_sqlx_error("get_warehouse_by_code", e))?;
        row.as_ref().map(warehouse_from_row).transpose()
    }

    pub async fn list_warehouses_async(
        &self,
        filter: WarehouseFilter,
        page: Page,
    ) -> Result<Paged<Warehouse>, StoreError> {
        let status = filter.status.map(|s| s.as_str());

        let total: i64 = sqlx::query(
            "SELECT COUNT(*) AS total FROM warehouses WHERE ($1::text IS NULL OR status = $1)",
        )
        .bind(status)
        .fetch_one(&*self.pool)
        .await
        .map_err(|e| map_sqlx_error("count_warehouses", e))?
        .try_get("total")
        .map_err(decode_error)?;

        let rows = sqlx::query(&format!(
            r#"
            SELECT {WAREHOUSE_COLUMNS}
            FROM warehouses
            WHERE ($1::text IS NULL OR status = $1)
            ORDER BY code
            LIMIT $2 OFFSET $3
            "#
        ))
        .bind(status)
        .bind(page.limit() as i64)
        .bind(page.offset() as i64)
        .fetch_all(&*self.pool)
        .await
        .map_err(|e| map_sqlx_error("list_warehouses", e))?;

        Ok(Paged {
            items: rows.iter().map(warehouse_from_row).collect::<Result<_, _>>()?,
            total: total as u64,
        })
    }

    pub async fn candidates_with_stock_async(
        &self,
        sku_id: SkuId,
        min_available: i64,
    ) -> Result<Vec<Candidate>, StoreError> {
        let rows = sqlx::query(
            r#"
            SELECT w.id, w.code, w.name, w.status, w.latitude, w.longitude, w.priority,
                   w.capacity, w.version, w.created_at, w.updated_at,
                   s.stock - s.locked AS available
            FROM warehouses w
            JOIN stock_records s ON s.warehouse_id = w.id
            WHERE s.sku_id = $1 AND w.status = 'ACTIVE' AND s.stock - s.locked >= $2
            ORDER BY w.id
            "#,
        )
        .bind(sku_id.as_uuid())
        .bind(min_available)
        .fetch_all(&*self.pool)
        .await
        .map_err(|e| map_sqlx_error("candidates_with_stock", e))?;

        rows.iter()
            .map(|row| {
                Ok(Candidate {
                    warehouse: warehouse_from_row(row)?,
                    available: row.try_get("available").map_err(decode_error)?,
                })
            })
            .collect()
    }

    #[instrument(skip(self, transfer, batch), fields(transfer_no = %transfer.transfer_no), err)]
    pub async fn insert_transfer_async(
        &self,
        transfer: &StockTransfer,
        batch: &AdjustmentBatch,
        now: DateTime<Utc>,
    ) -> Result<Vec<StockRecord>, StoreError> {
        let mut tx = self.begin().await?;

        let records = match apply_batch_in(&mut tx, batch, now).await? {
            BatchOutcome::Applied(records) => records,
            BatchOutcome::Duplicate => {
                return Err(StoreError::Conflict(format!(
                    "stock for transfer {} was already locked",
                    transfer.transfer_no
                )));
            }
        };

        sqlx::query(&format!(
            "INSERT INTO stock_transfers ({TRANSFER_COLUMNS}) VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12, $13, $14, $15, $16, $17)"
        ))
        .bind(transfer.id.as_uuid())
        .bind(&transfer.transfer_no)
        .bind(transfer.from_warehouse_id.as_uuid())
        .bind(transfer.to_warehouse_id.as_uuid())
        .bind(transfer.sku_id.as_uuid())
        .bind(transfer.quantity)
        .bind(transfer.status.as_str())
        .bind(transfer.created_by.map(|u| *u.as_uuid()))
        .bind(transfer.cancel_reason.as_deref())
        .bind(transfer.created_at)
        .bind(transfer.approved_at)
        .bind(transfer.shipped_at)
        .bind(transfer.received_at)
        .bind(transfer.completed_at)
        .bind(transfer.cancelled_at)
        .bind(transfer.updated_at)
        .bind(transfer.version as i64)
        .execute(&mut *tx)
        .await
        .map_err(|e| map_sqlx_error("insert_transfer", e))?;

        tx.commit()
            .await
            .map_err(|e| map_sqlx_error("commit_transaction", e))?;
        Ok(records)
    }

    #[instrument(skip(self, transfer, batch), fields(transfer_no = %transfer.transfer_no, status = %transfer.status), err)]
    pub async fn transition_transfer_async(
        &self,
        transfer: &StockTransfer,
        expected_version: ExpectedVersion,
        batch: Option<&AdjustmentBatch>,
        now: DateTime<Utc>,
    ) -> Result<Vec<StockRecord>, StoreError> {
        let mut tx = self.begin().await?;

        let current: Option<i64> = sqlx::query("SELECT version FROM stock_transfers WHERE id = $1 FOR UPDATE")
            .bind(transfer.id.as_uuid())
            .fetch_optional(&mut *tx)
            .await
            .map_err(|e| map_sqlx_error("lock_transfer", e))?
            .map(|row| row.try_get("version"))
            .transpose()
            .map_err(decode_error)?;

        let current = current.ok_or_else(|| StoreError::NotFound {
            entity: "transfer",
            id: transfer.id.to_string(),
        })? as u64;
        if !expected_version.matches(current) {
            return Err(StoreError::Conflict(format!(
                "transfer {}: expected {expected_version:?}, found {current}",
                transfer.transfer_no
            )));
        }

        let records = match batch {
            Some(batch) => apply_batch_in(&mut tx, batch, now).await?.records().to_vec(),
            None => Vec::new(),
        };

        sqlx::query(
            r#"
            UPDATE stock_transfers SET
                status = $2, cancel_reason = $3, approved_at = $4, shipped_at = $5,
                received_at = $6, completed_at = $7, cancelled_at = $8, updated_at = $9, version = $10
            WHERE id = $1
            "#,
        )
        .bind(transfer.id.as_uuid())
        .bind(transfer.status.as_str())
        .bind(transfer.cancel_reason.as_deref())
        .bind(transfer.approved_at)
        .bind(transfer.shipped_at)
        .bind(transfer.received_at)
        .bind(transfer.completed_at)
        .bind(transfer.cancelled_at)
        .bind(transfer.updated_at)
        .bind(transfer.version as i64)
        .execute(&mut *tx)
        .await
        .map_err(|e| map_sqlx_error("update_transfer", e))?;

        tx.commit()
            .await
            .map_err(|e| map_sqlx_error("commit_transaction", e))?;
        Ok(records)
    }

    pub async fn get_transfer_async(&self, id: TransferId) -> Result<Option<StockTransfer>, StoreError> {
        let row = sqlx::query(&format!("SELECT {TRANSFER_COLUMNS} FROM stock_transfers WHERE id = $1"))
            .bind(id.as_uuid())
            .fetch_optional(&*self.pool)
            .await
            .map_err(|e| map_sqlx_error("get_transfer", e))?;
        row.as_ref().map(transfer_from_row).transpose()
    }

    pub async fn get_transfer_by_no_async(
        &self,
        transfer_no: &str,
    ) -> Result<Option<StockTransfer>, StoreError> {
        let row = sqlx::query(&format!(
            "SELECT {TRANSFER_COLUMNS} FROM stock_transfers WHERE transfer_no = $1"
        ))
        .bind(transfer_no)
        .fetch_optional(&*self.pool)
        .await
        .map_err(|e| map_sqlx_error("get_transfer_by_no", e))?;
        row.as_ref().map(transfer_from_row).transpose()
    }

    pub async fn list_transfers_async(
        &self,
        filter: &TransferFilter,
        page: Page,
    ) -> Result<Paged<StockTransfer>, StoreError> {
        const WHERE: &str = r#"
            WHERE ($1::text IS NULL OR status = $1)
              AND ($2::uuid IS NULL OR from_warehouse_id = $2 OR to_warehouse_id = $2)
              AND ($3::uuid IS NULL OR sku_id = $3)
              AND ($4::timestamptz IS NULL OR created_at < $4)
              AND ($5::timestamptz IS NULL OR updated_at < $5)
              AND (NOT $6 OR status NOT IN ('COMPLETED', 'CANCELLED'))
        "#;
        let status = filter.status.map(|s| s.as_str());
        let warehouse = filter.warehouse_id.map(|w| *w.as_uuid());
        let sku = filter.sku_id.map(|s| *s.as_uuid());

        let total: i64 = sqlx::query(&format!("SELECT COUNT(*) AS total FROM stock_transfers {WHERE}"))
            .bind(status)
            .bind(warehouse)
            .bind(sku)
            .bind(filter.created_before)
            .bind(filter.updated_before)
            .bind(filter.open_only)
            .fetch_one(&*self.pool)
            .await
            .map_err(|e| map_sqlx_error("count_transfers", e))?
            .try_get("total")
            .map_err(decode_error)?;

        let rows = sqlx::query(&format!(
            "SELECT {TRANSFER_COLUMNS} FROM stock_transfers {WHERE} ORDER BY created_at DESC, id DESC LIMIT $7 OFFSET $8"
        ))
        .bind(status)
        .bind(warehouse)
        .bind(sku)
        .bind(filter.created_before)
        .bind(filter.updated_before)
        .bind(filter.open_only)
        .bind(page.limit() as i64)
        .bind(page.offset() as i64)
        .fetch_all(&*self.pool)
        .await
        .map_err(|e| map_sqlx_error("list_transfers", e))?;

        Ok(Paged {
            items: rows.iter().map(transfer_from_row).collect::<Result<_, _>>()?,
            total: total as u64,
        })
    }

    async fn begin(&self) -> Result<Transaction<'static, Postgres>, StoreError> {
        self.pool
            .begin()
            .await
            .map_err(|e| map_sqlx_error("begin_transaction", e))
    }
}

/// Apply a batch inside an open transaction.
async fn apply_batch_in(
    tx: &mut Transaction<'_, Postgres>,
    batch: &AdjustmentBatch,
    now: DateTime<Utc>,
) -> Result<BatchOutcome, StoreError> {
    // Claim the key first: a concurrent holder of the same key makes this wait
    // until it commits or rolls back.
    if let Some(key) = &batch.key {
        let lines = serde_json::to_value(&batch.lines)
            .map_err(|e| StoreError::Backend(format!("failed to encode batch lines: {e}")))?;
        let claimed = sqlx::query(
            r#"
            INSERT INTO applied_batches (idempotency_key, reason, lines, applied_at)
            VALUES ($1, $2, $3, $4)
            ON CONFLICT (idempotency_key) DO NOTHING
            "#,
        )
        .bind(key.as_str())
        .bind(batch.reason.as_str())
        .bind(&lines)
        .bind(now)
        .execute(&mut **tx)
        .await
        .map_err(|e| map_sqlx_error("claim_key", e))?
        .rows_affected()
            == 1;

        if !claimed {
            let row = sqlx::query(
                "SELECT idempotency_key, reason, lines, applied_at FROM applied_batches WHERE idempotency_key = $1",
            )
            .bind(key.as_str())
            .fetch_one(&mut **tx)
            .await
            .map_err(|e| map_sqlx_error("load_key", e))?;
            let previous = applied_from_row(&row)?;
            if previous.batch.same_effect(batch) {
                debug!(key = %key, "duplicate batch ignored");
                return Ok(BatchOutcome::Duplicate);
            }
            return Err(StoreError::Conflict(format!(
                "idempotency key '{key}' was already used for a different adjustment"
            )));
        }
    }

    // Lock rows in a fixed order so concurrent batches cannot deadlock.
    let pairs: BTreeSet<(Uuid, Uuid)> = batch
        .lines
        .iter()
        .map(|l| (*l.warehouse_id.as_uuid(), *l.sku_id.as_uuid()))
        .collect();

    let mut locked: HashMap<(WarehouseId, SkuId), StockRecord> = HashMap::new();
    for (w, s) in pairs {
        sqlx::query(
            r#"
            INSERT INTO stock_records (warehouse_id, sku_id, stock, locked, version, updated_at)
            VALUES ($1, $2, 0, 0, 0, $3)
            ON CONFLICT (warehouse_id, sku_id) DO NOTHING
            "#,
        )
        .bind(w)
        .bind(s)
        .bind(now)
        .execute(&mut **tx)
        .await
        .map_err(|e| map_sqlx_error("ensure_stock_row", e))?;

        let row = sqlx::query(&format!(
            "SELECT {STOCK_COLUMNS} FROM stock_records WHERE warehouse_id = $1 AND sku_id = $2 FOR UPDATE"
        ))
        .bind(w)
        .bind(s)
        .fetch_one(&mut **tx)
        .await
        .map_err(|e| map_sqlx_error("lock_stock_row", e))?;
        let record = stock_from_row(&row)?;
        locked.insert((record.warehouse_id, record.sku_id), record);
    }

    let records = apply_lines(&batch.lines, now, |w, s| Ok(locked.get(&(w, s)).cloned()))
        .map_err(StoreError::from_rule)?;

    for r in final_states(&records) {
        sqlx::query(
            r#"
            UPDATE stock_records
            SET stock = $3, locked = $4, version = $5, updated_at = $6
            WHERE warehouse_id = $1 AND sku_id = $2
            "#,
        )
        .bind(r.warehouse_id.as_uuid())
        .bind(r.sku_id.as_uuid())
        .bind(r.stock)
        .bind(r.locked)
        .bind(r.version as i64)
        .bind(r.updated_at)
        .execute(&mut **tx)
        .await
        .map_err(|e| map_sqlx_error("write_stock_row", e))?;
    }

    Ok(BatchOutcome::Applied(records))
}

const STOCK_COLUMNS: &str =
    "warehouse_id, sku_id, stock, locked, safe_stock, max_stock, version, updated_at";

const WAREHOUSE_COLUMNS: &str =
    "id, code, name, status, latitude, longitude, priority, capacity, version, created_at, updated_at";

const TRANSFER_COLUMNS: &str = "id, transfer_no, from_warehouse_id, to_warehouse_id, sku_id, quantity, status, created_by, cancel_reason, created_at, approved_at, shipped_at, received_at, completed_at, cancelled_at, updated_at, version";

fn decode_error(e: sqlx::Error) -> StoreError {
    StoreError::Backend(format!("failed to decode row: {e}"))
}

fn stock_from_row(row: &PgRow) -> Result<StockRecord, StoreError> {
    Ok(StockRecord {
        warehouse_id: WarehouseId::from_uuid(row.try_get("warehouse_id").map_err(decode_error)?),
        sku_id: SkuId::from_uuid(row.try_get("sku_id").map_err(decode_error)?),
        stock: row.try_get("stock").map_err(decode_error)?,
        locked: row.try_get("locked").map_err(decode_error)?,
        safe_stock: row.try_get("safe_stock").map_err(decode_error)?,
        max_stock: row.try_get("max_stock").map_err(decode_error)?,
        version: row.try_get::<i64, _>("version").map_err(decode_error)? as u64,
        updated_at: row.try_get("updated_at").map_err(decode_error)?,
    })
}

fn warehouse_from_row(row: &PgRow) -> Result<Warehouse, StoreError> {
    let status: String = row.try_get("status").map_err(decode_error)?;
    let latitude: Option<f64> = row.try_get("latitude").map_err(decode_error)?;
    let longitude: Option<f64> = row.try_get("longitude").map_err(decode_error)?;
    let location = match (latitude, longitude) {
        (Some(lat), Some(lon)) => Some(
            GeoPoint::new(lat, lon)
                .map_err(|e| StoreError::Backend(format!("stored location is invalid: {e}")))?,
        ),
        _ => None,
    };

    Ok(Warehouse {
        id: WarehouseId::from_uuid(row.try_get("id").map_err(decode_error)?),
        code: row.try_get("code").map_err(decode_error)?,
        name: row.try_get("name").map_err(decode_error)?,
        status: WarehouseStatus::parse(&status)
            .map_err(|e| StoreError::Backend(format!("stored status is invalid: {e}")))?,
        location,
        priority: row.try_get("priority").map_err(decode_error)?,
        capacity: row.try_get("capacity").map_err(decode_error)?,
        version: row.try_get::<i64, _>("version").map_err(decode_error)? as u64,
        created_at: row.try_get("created_at").map_err(decode_error)?,
        updated_at: row.try_get("updated_at").map_err(decode_error)?,
    })
}

fn transfer_from_row(row: &PgRow) -> Result<StockTransfer, StoreError> {
    let status: String = row.try_get("status").map_err(decode_error)?;
    let created_by: Option<Uuid> = row.try_get("created_by").map_err(decode_error)?;

    let mut t = StockTransfer::empty(TransferId::from_uuid(row.try_get("id").map_err(decode_error)?));
    t.transfer_no = row.try_get("transfer_no").map_err(decode_error)?;
    t.from_warehouse_id = WarehouseId::from_uuid(row.try_get("from_warehouse_id").map_err(decode_error)?);
    t.to_warehouse_id = WarehouseId::from_uuid(row.try_get("to_warehouse_id").map_err(decode_error)?);
    t.sku_id = SkuId::from_uuid(row.try_get("sku_id").map_err(decode_error)?);
    t.quantity = row.try_get("quantity").map_err(decode_error)?;
    t.status = TransferStatus::parse(&status)
        .ok_or_else(|| StoreError::Backend(format!("stored transfer status '{status}' is invalid")))?;
    t.created_by = created_by.map(UserId::from_uuid);
    t.cancel_reason = row.try_get("cancel_reason").map_err(decode_error)?;
    t.created_at = row.try_get("created_at").map_err(decode_error)?;
    t.approved_at = row.try_get("approved_at").map_err(decode_error)?;
    t.shipped_at = row.try_get("shipped_at").map_err(decode_error)?;
    t.received_at = row.try_get("received_at").map_err(decode_error)?;
    t.completed_at = row.try_get("completed_at").map_err(decode_error)?;
    t.cancelled_at = row.try_get("cancelled_at").map_err(decode_error)?;
    t.updated_at = row.try_get("updated_at").map_err(decode_error)?;
    t.version = row.try_get::<i64, _>("version").map_err(decode_error)? as u64;
    Ok(t.restored())
}

fn applied_from_row(row: &PgRow) -> Result<AppliedBatch, StoreError> {
    let key: String = row.try_get("idempotency_key").map_err(decode_error)?;
    let reason: String = row.try_get("reason").map_err(decode_error)?;
    let lines: JsonValue = row.try_get("lines").map_err(decode_error)?;

    let key = IdempotencyKey::new(key)
        .map_err(|e| StoreError::Backend(format!("stored key is invalid: {e}")))?;
    let reason = AdjustmentReason::parse(&reason)
        .ok_or_else(|| StoreError::Backend(format!("stored reason '{reason}' is invalid")))?;
    let lines: Vec<StockAdjustment> = serde_json::from_value(lines)
        .map_err(|e| StoreError::Backend(format!("stored batch lines are invalid: {e}")))?;

    Ok(AppliedBatch {
        batch: AdjustmentBatch::new(reason, lines).with_key(key.clone()),
        key,
        applied_at: row.try_get("applied_at").map_err(decode_error)?,
    })
}

/// Map SQLx errors to StoreError.
fn map_sqlx_error(operation: &str, err: sqlx::Error) -> StoreError {
    match err {
        sqlx::Error::Database(db_err) => {
            let msg = format!("database error in {}: {}", operation, db_err.message());
            match db_err.code().as_deref() {
                Some("23505") => StoreError::DuplicateKey(msg),
                Some("23503") => StoreError::NotFound {
                    entity: "warehouse",
                    id: db_err.constraint().unwrap_or("unknown").to_string(),
                },
                Some("23514") | Some("40001") => StoreError::Conflict(msg),
                _ => StoreError::Backend(msg),
            }
        }
        sqlx::Error::PoolClosed => {
            StoreError::Backend(format!("connection pool closed in {}", operation))
        }
        _ => StoreError::Backend(format!("sqlx error in {}: {}", operation, err)),
    }
}

/// Run an async store operation from the synchronous trait methods.
///
/// Requires a tokio runtime; call from a blocking context (e.g. `spawn_blocking`).
fn block_on<F, T>(fut: F) -> Result<T, StoreError>
where
    F: Future<Output = Result<T, StoreError>>,
{
    let handle = tokio::runtime::Handle::try_current().map_err(|_| {
        StoreError::Backend(
            "PostgresStore requires async runtime (tokio). Ensure you're calling from within a tokio runtime context."
                .to_string(),
        )
    })?;
    handle.block_on(fut)
}

impl StockStore for PostgresStore {
    fn get_stock(
        &self,
        warehouse_id: WarehouseId,
        sku_id: SkuId,
    ) -> Result<Option<StockRecord>, StoreError> {
        block_on(self.get_stock_async(warehouse_id, sku_id))
    }

    fn list_stock_by_warehouse(
        &self,
        warehouse_id: WarehouseId,
    ) -> Result<Vec<StockRecord>, StoreError> {
        block_on(self.list_stock_async(Some(warehouse_id), None))
    }

    fn list_stock_by_sku(&self, sku_id: SkuId) -> Result<Vec<StockRecord>, StoreError> {
        block_on(self.list_stock_async(None, Some(sku_id)))
    }

    fn apply_batch(
        &self,
        batch: &AdjustmentBatch,
        now: DateTime<Utc>,
    ) -> Result<BatchOutcome, StoreError> {
        block_on(self.apply_batch_async(batch, now))
    }

    fn set_limits(
        &self,
        warehouse_id: WarehouseId,
        sku_id: SkuId,
        safe_stock: i64,
        max_stock: i64,
        now: DateTime<Utc>,
    ) -> Result<StockRecord, StoreError> {
        block_on(self.set_limits_async(warehouse_id, sku_id, safe_stock, max_stock, now))
    }

    fn applied_batch(&self, key: &IdempotencyKey) -> Result<Option<AppliedBatch>, StoreError> {
        block_on(self.applied_batch_async(key))
    }
}

impl WarehouseStore for PostgresStore {
    fn insert_warehouse(&self, warehouse: &Warehouse) -> Result<(), StoreError> {
        block_on(self.insert_warehouse_async(warehouse))
    }

    fn update_warehouse(
        &self,
        warehouse: &Warehouse,
        expected_version: ExpectedVersion,
    ) -> Result<(), StoreError> {
        block_on(self.update_warehouse_async(warehouse, expected_version))
    }

    fn get_warehouse(&self, id: WarehouseId) -> Result<Option<Warehouse>, StoreError> {
        block_on(self.get_warehouse_async(id))
    }

    fn get_warehouse_by_code(&self, code: &str) -> Result<Option<Warehouse>, StoreError> {
        block_on(self.get_warehouse_by_code_async(code))
    }

    fn list_warehouses(
        &self,
        filter: WarehouseFilter,
        page: Page,
    ) -> Result<Paged<Warehouse>, StoreError> {
        block_on(self.list_warehouses_async(filter, page))
    }

    fn candidates_with_stock(
        &self,
        sku_id: SkuId,
        min_available: i64,
    ) -> Result<Vec<Candidate>, StoreError> {
        block_on(self.candidates_with_stock_async(sku_id, min_available))
    }
}

impl TransferStore for PostgresStore {
    fn insert_transfer(
        &self,
        transfer: &StockTransfer,
        batch: &AdjustmentBatch,
        now: DateTime<Utc>,
    ) -> Result<Vec<StockRecord>, StoreError> {
        block_on(self.insert_transfer_async(transfer, batch, now))
    }

    fn transition_transfer(
        &self,
        transfer: &StockTransfer,
        expected_version: ExpectedVersion,
        batch: Option<&AdjustmentBatch>,
        now: DateTime<Utc>,
    ) -> Result<Vec<StockRecord>, StoreError> {
        block_on(self.transition_transfer_async(transfer, expected_version, batch, now))
    }

    fn get_transfer(&self, id: TransferId) -> Result<Option<StockTransfer>, StoreError> {
        block_on(self.get_transfer_async(id))
    }

    fn get_transfer_by_no(&self, transfer_no: &str) -> Result<Option<StockTransfer>, StoreError> {
        block_on(self.get_transfer_by_no_async(transfer_no))
    }

    fn list_transfers(
        &self,
        filter: &TransferFilter,
        page: Page,
    ) -> Result<Paged<StockTransfer>, StoreError> {
        block_on(self.list_transfers_async(filter, page))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn sync_calls_outside_a_runtime_fail_cleanly() {
        let err = block_on(async { Ok::<_, StoreError>(1) }).unwrap_err();
        assert!(matches!(err, StoreError::Backend(_)));
    }

    #[test]
    fn schema_defines_every_table() {
        for table in ["warehouses", "stock_records", "applied_batches", "stock_transfers"] {
            assert!(SCHEMA.contains(&format!("CREATE TABLE IF NOT EXISTS {table}")));
        }
    }
}
