//! Postgres-backed ledger store.
//!
//! Works over the relational layout shipped in `migrations/0001_inventory.sql`:
//! `inventory` holds one row per (product, warehouse) with the cached
//! `quantity`, and `inventory_transactions` holds the append-only ledger with a
//! per-row `seq`.
//!
//! ## Commit protocol
//!
//! A batch runs in one SQL transaction:
//! 1. `SELECT … FOR UPDATE` every affected inventory row, ascending by id
//! 2. read each row's ledger sum and last `seq`
//! 3. validate every entry (version, sign, non-negativity) against those values
//! 4. insert the ledger rows and bump `inventory.quantity` by the same deltas
//! 5. commit
//!
//! Any failure rolls the whole batch back.
//!
//! ## Error mapping
//!
//! | SQLx error | Postgres code | `LedgerError` |
//! |---|---|---|
//! | Database (unique violation) | `23505` | `Concurrency` |
//! | Database (check / FK violation) | `23514` / `23503` | `Storage` |
//! | anything else | n/a | `Storage` |

use std::collections::{BTreeSet, HashMap};
use std::future::Future;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use sqlx::postgres::PgRow;
use sqlx::{PgPool, Postgres, Row, Transaction};
use tracing::{Span, instrument};

use stockforge_core::{CompanyId, InventoryId, ProductId, WarehouseId};
use stockforge_inventory::{
    ChangeType, InventoryRow, LedgerEntry, PendingEntry, TransactionId, apply_delta,
};

use super::r#trait::{LedgerError, LedgerStore};

const SCHEMA: &str = include_str!("../../migrations/0001_inventory.sql");

/// Postgres ledger store.
///
/// The [`LedgerStore`] trait is synchronous; each call blocks on the current
/// tokio runtime handle, so it must run on a thread where blocking is allowed
/// (e.g. inside `spawn_blocking`). The async methods can be awaited directly.
#[derive(Debug, Clone)]
pub struct PostgresLedgerStore {
    pool: Arc<PgPool>,
}

impl PostgresLedgerStore {
    pub fn new(pool: PgPool) -> Self {
        Self {
            pool: Arc::new(pool),
        }
    }

    /// Apply the schema. Idempotent, so it can run on every startup.
    #[instrument(skip(self), err)]
    pub async fn migrate(&self) -> Result<(), LedgerError> {
        sqlx::raw_sql(SCHEMA)
            .execute(&*self.pool)
            .await
            .map_err(|e| map_sqlx_error("migrate", e))?;
        Ok(())
    }

    #[instrument(
        skip(self),
        fields(
            company_id = %company_id,
            product_id = %product_id,
            warehouse_id = %warehouse_id
        ),
        err
    )]
    pub async fn open_row_async(
        &self,
        company_id: CompanyId,
        product_id: ProductId,
        warehouse_id: WarehouseId,
    ) -> Result<InventoryRow, LedgerError> {
        // ON CONFLICT DO NOTHING + re-select keeps concurrent openers on one row.
        sqlx::query(
            r#"
            INSERT INTO inventory (id, company_id, product_id, warehouse_id, quantity)
            VALUES ($1, $2, $3, $4, 0)
            ON CONFLICT (product_id, warehouse_id) DO NOTHING
            "#,
        )
        .bind(InventoryId::new().as_uuid())
        .bind(company_id.as_uuid())
        .bind(product_id.as_uuid())
        .bind(warehouse_id.as_uuid())
        .execute(&*self.pool)
        .await
        .map_err(|e| map_sqlx_error("open_row", e))?;

        let row = self
            .find_row_async(product_id, warehouse_id)
            .await?
            .ok_or_else(|| LedgerError::Storage("inventory row vanished after insert".into()))?;

        if row.company_id != company_id {
            return Err(LedgerError::Storage(format!(
                "inventory row {} belongs to company {}, requested for {company_id}",
                row.id, row.company_id
            )));
        }
        Ok(row)
    }

    pub async fn find_row_async(
        &self,
        product_id: ProductId,
        warehouse_id: WarehouseId,
    ) -> Result<Option<InventoryRow>, LedgerError> {
        let row = sqlx::query(
            r#"
            SELECT id, company_id, product_id, warehouse_id
            FROM inventory
            WHERE product_id = $1 AND warehouse_id = $2
            "#,
        )
        .bind(product_id.as_uuid())
        .bind(warehouse_id.as_uuid())
        .fetch_optional(&*self.pool)
        .await
        .map_err(|e| map_sqlx_error("find_row", e))?;

        row.map(|r| inventory_row(&r)).transpose()
    }

    pub async fn row_async(
        &self,
        inventory_id: InventoryId,
    ) -> Result<Option<InventoryRow>, LedgerError> {
        let row = sqlx::query(
            "SELECT id, company_id, product_id, warehouse_id FROM inventory WHERE id = $1",
        )
        .bind(inventory_id.as_uuid())
        .fetch_optional(&*self.pool)
        .await
        .map_err(|e| map_sqlx_error("row", e))?;

        row.map(|r| inventory_row(&r)).transpose()
    }

    pub async fn rows_of_async(&self, company_id: CompanyId) -> Result<Vec<InventoryRow>, LedgerError> {
        let rows = sqlx::query(
            r#"
            SELECT id, company_id, product_id, warehouse_id
            FROM inventory
            WHERE company_id = $1
            ORDER BY id ASC
            "#,
        )
        .bind(company_id.as_uuid())
        .fetch_all(&*self.pool)
        .await
        .map_err(|e| map_sqlx_error("rows_of", e))?;

        rows.iter().map(inventory_row).collect()
    }

    /// Commit a batch (see the module docs for the protocol).
    #[instrument(
        skip(self, batch),
        fields(entry_count = batch.len(), committed_entries = tracing::field::Empty),
        err
    )]
    pub async fn append_async(&self, batch: Vec<PendingEntry>) -> Result<Vec<LedgerEntry>, LedgerError> {
        if batch.is_empty() {
            return Ok(vec![]);
        }

        let span = Span::current();
        let mut tx = self
            .pool
            .begin()
            .await
            .map_err(|e| map_sqlx_error("begin_transaction", e))?;

        let ids: BTreeSet<InventoryId> = batch.iter().map(|p| p.inventory_id).collect();
        let uuids: Vec<uuid::Uuid> = ids.iter().map(|id| *id.as_uuid()).collect();

        let locked = sqlx::query("SELECT id FROM inventory WHERE id = ANY($1) ORDER BY id ASC FOR UPDATE")
            .bind(uuids.as_slice())
            .fetch_all(&mut *tx)
            .await
            .map_err(|e| map_sqlx_error("lock_rows", e))?;
        let locked: BTreeSet<InventoryId> = locked
            .iter()
            .map(|r| r.try_get::<uuid::Uuid, _>("id").map(InventoryId::from_uuid))
            .collect::<Result<_, _>>()
            .map_err(|e| map_sqlx_error("lock_rows", e))?;
        if let Some(missing) = ids.iter().find(|id| !locked.contains(id)) {
            rollback(tx).await?;
            return Err(LedgerError::UnknownRow(*missing));
        }

        // (ledger quantity, version) per row before the batch.
        let mut base: HashMap<InventoryId, (i64, u64)> = HashMap::new();
        for id in &ids {
            base.insert(*id, ledger_position(&mut tx, *id).await?);
        }

        let mut staged = base.clone();
        let mut validated = Vec::with_capacity(batch.len());
        for pending in batch {
            let (_, base_version) = base[&pending.inventory_id];
            if !pending.expected_version.matches(base_version) {
                rollback(tx).await?;
                return Err(LedgerError::Concurrency(format!(
                    "row {}: expected {:?}, found {base_version}",
                    pending.inventory_id, pending.expected_version
                )));
            }
            let slot = staged
                .get_mut(&pending.inventory_id)
                .ok_or(LedgerError::UnknownRow(pending.inventory_id))?;
            let next = match apply_delta(pending.change_type, slot.0, pending.delta, pending.allow_negative) {
                Ok(next) => next,
                Err(source) => {
                    rollback(tx).await?;
                    return Err(LedgerError::InvalidDelta {
                        inventory_id: pending.inventory_id,
                        source,
                    });
                }
            };
            *slot = (next, slot.1 + 1);
            validated.push((pending, slot.1));
        }

        let mut committed = Vec::with_capacity(validated.len());
        for (pending, seq) in validated {
            let row = sqlx::query(
                r#"
                INSERT INTO inventory_transactions
                    (inventory_id, seq, change_type, quantity_change, note)
                VALUES ($1, $2, $3, $4, $5)
                RETURNING id, recorded_at
                "#,
            )
            .bind(pending.inventory_id.as_uuid())
            .bind(to_i64(seq)?)
            .bind(pending.change_type.as_str())
            .bind(pending.delta)
            .bind(pending.note.as_deref())
            .fetch_one(&mut *tx)
            .await
            .map_err(|e| map_sqlx_error("insert_transaction", e))?;

            let id: i64 = row.try_get("id").map_err(|e| map_sqlx_error("insert_transaction", e))?;
            let recorded_at: DateTime<Utc> = row
                .try_get("recorded_at")
                .map_err(|e| map_sqlx_error("insert_transaction", e))?;

            committed.push(LedgerEntry {
                transaction_id: TransactionId(from_i64(id)?),
                inventory_id: pending.inventory_id,
                seq,
                change_type: pending.change_type,
                delta: pending.delta,
                note: pending.note,
                recorded_at,
            });
        }

        for id in &ids {
            let delta = staged[id].0 - base[id].0;
            sqlx::query(
                "UPDATE inventory SET quantity = quantity + $2, updated_at = now() WHERE id = $1",
            )
            .bind(id.as_uuid())
            .bind(delta)
            .execute(&mut *tx)
            .await
            .map_err(|e| map_sqlx_error("update_cache", e))?;
        }

        tx.commit()
            .await
            .map_err(|e| map_sqlx_error("commit_transaction", e))?;

        span.record("committed_entries", committed.len());
        Ok(committed)
    }

    pub async fn read_since_async(
        &self,
        inventory_id: InventoryId,
        after_seq: u64,
    ) -> Result<Vec<LedgerEntry>, LedgerError> {
        if self.row_async(inventory_id).await?.is_none() {
            return Err(LedgerError::UnknownRow(inventory_id));
        }

        let rows = sqlx::query(
            r#"
            SELECT id, inventory_id, seq, change_type, quantity_change, note, recorded_at
            FROM inventory_transactions
            WHERE inventory_id = $1 AND seq > $2
            ORDER BY seq ASC
            "#,
        )
        .bind(inventory_id.as_uuid())
        .bind(to_i64(after_seq)?)
        .fetch_all(&*self.pool)
        .await
        .map_err(|e| map_sqlx_error("read_since", e))?;

        rows.iter().map(ledger_entry).collect()
    }

    pub async fn version_async(&self, inventory_id: InventoryId) -> Result<u64, LedgerError> {
        let version: Option<i64> = sqlx::query_scalar(
            r#"
            SELECT COALESCE(MAX(t.seq), 0)
            FROM inventory i
            LEFT JOIN inventory_transactions t ON t.inventory_id = i.id
            WHERE i.id = $1
            GROUP BY i.id
            "#,
        )
        .bind(inventory_id.as_uuid())
        .fetch_optional(&*self.pool)
        .await
        .map_err(|e| map_sqlx_error("version", e))?;

        from_i64(version.ok_or(LedgerError::UnknownRow(inventory_id))?)
    }

    pub async fn cached_quantity_async(&self, inventory_id: InventoryId) -> Result<i64, LedgerError> {
        let quantity: Option<i64> = sqlx::query_scalar("SELECT quantity FROM inventory WHERE id = $1")
            .bind(inventory_id.as_uuid())
            .fetch_optional(&*self.pool)
            .await
            .map_err(|e| map_sqlx_error("cached_quantity", e))?;

        quantity.ok_or(LedgerError::UnknownRow(inventory_id))
    }

    #[instrument(skip(self), fields(inventory_id = %inventory_id), err)]
    pub async fn write_cached_quantity_async(
        &self,
        inventory_id: InventoryId,
        quantity: i64,
    ) -> Result<(), LedgerError> {
        let result = sqlx::query("UPDATE inventory SET quantity = $2, updated_at = now() WHERE id = $1")
            .bind(inventory_id.as_uuid())
            .bind(quantity)
            .execute(&*self.pool)
            .await
            .map_err(|e| map_sqlx_error("write_cached_quantity", e))?;

        if result.rows_affected() == 0 {
            return Err(LedgerError::UnknownRow(inventory_id));
        }
        Ok(())
    }

    pub async fn discard_empty_row_async(&self, inventory_id: InventoryId) -> Result<(), LedgerError> {
        let result = sqlx::query(
            r#"
            DELETE FROM inventory i
            WHERE i.id = $1
              AND NOT EXISTS (SELECT 1 FROM inventory_transactions t WHERE t.inventory_id = i.id)
            "#,
        )
        .bind(inventory_id.as_uuid())
        .execute(&*self.pool)
        .await
        .map_err(|e| map_sqlx_error("discard_empty_row", e))?;

        if result.rows_affected() == 1 {
            return Ok(());
        }
        match self.row_async(inventory_id).await? {
            Some(_) => Err(LedgerError::RowInUse(inventory_id)),
            None => Err(LedgerError::UnknownRow(inventory_id)),
        }
    }

    fn block_on<F: Future>(&self, fut: F) -> Result<F::Output, LedgerError> {
        let handle = tokio::runtime::Handle::try_current().map_err(|_| {
            LedgerError::Storage(
                "PostgresLedgerStore requires a tokio runtime; call from within a runtime context"
                    .to_string(),
            )
        })?;
        Ok(handle.block_on(fut))
    }
}

async fn ledger_position(
    tx: &mut Transaction<'_, Postgres>,
    inventory_id: InventoryId,
) -> Result<(i64, u64), LedgerError> {
    let row = sqlx::query(
        r#"
        SELECT COALESCE(SUM(quantity_change), 0)::BIGINT AS total,
               COALESCE(MAX(seq), 0)::BIGINT AS version
        FROM inventory_transactions
        WHERE inventory_id = $1
        "#,
    )
    .bind(inventory_id.as_uuid())
    .fetch_one(&mut **tx)
    .await
    .map_err(|e| map_sqlx_error("ledger_position", e))?;

    let total: i64 = row.try_get("total").map_err(|e| map_sqlx_error("ledger_position", e))?;
    let version: i64 = row
        .try_get("version")
        .map_err(|e| map_sqlx_error("ledger_position", e))?;
    Ok((total, from_i64(version)?))
}

async fn rollback(tx: Transaction<'_, Postgres>) -> Result<(), LedgerError> {
    tx.rollback().await.map_err(|e| map_sqlx_error("rollback", e))
}

fn inventory_row(row: &PgRow) -> Result<InventoryRow, LedgerError> {
    let get = |col: &str| -> Result<uuid::Uuid, LedgerError> {
        row.try_get(col).map_err(|e| map_sqlx_error("decode_inventory_row", e))
    };
    Ok(InventoryRow {
        id: InventoryId::from_uuid(get("id")?),
        company_id: CompanyId::from_uuid(get("company_id")?),
        product_id: ProductId::from_uuid(get("product_id")?),
        warehouse_id: WarehouseId::from_uuid(get("warehouse_id")?),
    })
}

fn ledger_entry(row: &PgRow) -> Result<LedgerEntry, LedgerError> {
    let decode = |e: sqlx::Error| map_sqlx_error("decode_ledger_entry", e);

    let change_type: String = row.try_get("change_type").map_err(decode)?;
    let change_type: ChangeType = change_type
        .parse()
        .map_err(|e| LedgerError::Storage(format!("corrupt ledger row: {e}")))?;

    Ok(LedgerEntry {
        transaction_id: TransactionId(from_i64(row.try_get("id").map_err(decode)?)?),
        inventory_id: InventoryId::from_uuid(row.try_get("inventory_id").map_err(decode)?),
        seq: from_i64(row.try_get("seq").map_err(decode)?)?,
        change_type,
        delta: row.try_get("quantity_change").map_err(decode)?,
        note: row.try_get("note").map_err(decode)?,
        recorded_at: row.try_get("recorded_at").map_err(decode)?,
    })
}

fn to_i64(value: u64) -> Result<i64, LedgerError> {
    i64::try_from(value).map_err(|_| LedgerError::Storage(format!("{value} exceeds BIGINT")))
}

fn from_i64(value: i64) -> Result<u64, LedgerError> {
    u64::try_from(value).map_err(|_| LedgerError::Storage(format!("negative counter {value}")))
}

/// Map SQLx errors to `LedgerError`.
fn map_sqlx_error(operation: &str, err: sqlx::Error) -> LedgerError {
    match err {
        sqlx::Error::Database(db_err) => {
            let msg = format!("database error in {operation}: {}", db_err.message());
            match db_err.code().as_deref() {
                // Another writer took the same (inventory_id, seq).
                Some("23505") => LedgerError::Concurrency(msg),
                _ => LedgerError::Storage(msg),
            }
        }
        sqlx::Error::PoolClosed => {
            LedgerError::Storage(format!("connection pool closed in {operation}"))
        }
        _ => LedgerError::Storage(format!("sqlx error in {operation}: {err}")),
    }
}

impl LedgerStore for PostgresLedgerStore {
    fn open_row(
        &self,
        company_id: CompanyId,
        product_id: ProductId,
        warehouse_id: WarehouseId,
    ) -> Result<InventoryRow, LedgerError> {
        self.block_on(self.open_row_async(company_id, product_id, warehouse_id))?
    }

    fn find_row(
        &self,
        product_id: ProductId,
        warehouse_id: WarehouseId,
    ) -> Result<Option<InventoryRow>, LedgerError> {
        self.block_on(self.find_row_async(product_id, warehouse_id))?
    }

    fn row(&self, inventory_id: InventoryId) -> Result<Option<InventoryRow>, LedgerError> {
        self.block_on(self.row_async(inventory_id))?
    }

    fn rows_of(&self, company_id: CompanyId) -> Result<Vec<InventoryRow>, LedgerError> {
        self.block_on(self.rows_of_async(company_id))?
    }

    fn append(&self, batch: Vec<PendingEntry>) -> Result<Vec<LedgerEntry>, LedgerError> {
        self.block_on(self.append_async(batch))?
    }

    fn read_since(
        &self,
        inventory_id: InventoryId,
        after_seq: u64,
    ) -> Result<Vec<LedgerEntry>, LedgerError> {
        self.block_on(self.read_since_async(inventory_id, after_seq))?
    }

    fn version(&self, inventory_id: InventoryId) -> Result<u64, LedgerError> {
        self.block_on(self.version_async(inventory_id))?
    }

    fn cached_quantity(&self, inventory_id: InventoryId) -> Result<i64, LedgerError> {
        self.block_on(self.cached_quantity_async(inventory_id))?
    }

    fn write_cached_quantity(
        &self,
        inventory_id: InventoryId,
        quantity: i64,
    ) -> Result<(), LedgerError> {
        self.block_on(self.write_cached_quantity_async(inventory_id, quantity))?
    }

    fn discard_empty_row(&self, inventory_id: InventoryId) -> Result<(), LedgerError> {
        self.block_on(self.discard_empty_row_async(inventory_id))?
    }
}
