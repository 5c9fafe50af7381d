//! Checkpoint and ledger operations for the repository.

use crate::domain::{Address, EntryType, EventPosition, LedgerEntry, LedgerKey, StreamType};
use sqlx::sqlite::SqliteRow;
use sqlx::{QueryBuilder, Row, Sqlite};
use std::str::FromStr;

use super::events::position_columns;
use super::{address_column, decimal_column, now_ms, optional_code_column, Repository};

// Keeps IN lists well below SQLite's bound-parameter limit.
const USER_CHUNK: usize = 500;

impl Repository {
    // =========================================================================
    // Checkpoints
    // =========================================================================

    /// Last consumed position of `stream`.
    ///
    /// Creates the zero checkpoint on first use.
    ///
    /// # Errors
    /// Returns an error if the query fails.
    pub async fn get_checkpoint(&self, stream: StreamType) -> Result<EventPosition, sqlx::Error> {
        sqlx::query(
            r#"
            INSERT INTO checkpoints (stream, block_number, tx_index, event_index, updated_at)
            VALUES (?, 0, 0, 0, ?)
            ON CONFLICT(stream) DO NOTHING
            "#,
        )
        .bind(stream.as_str())
        .bind(now_ms())
        .execute(&self.pool)
        .await?;

        let row = sqlx::query(
            "SELECT block_number, tx_index, event_index FROM checkpoints WHERE stream = ?",
        )
        .bind(stream.as_str())
        .fetch_one(&self.pool)
        .await?;

        position_columns(&row)
    }

    // =========================================================================
    // Ledger
    // =========================================================================

    /// Append ledger entries and advance checkpoints in one transaction.
    ///
    /// Entries must be in ledger order; ids are assigned in that order and
    /// returned. Checkpoints only ever move together with the rows they cover.
    ///
    /// # Errors
    /// Returns an error if the transaction fails; nothing is written then.
    pub async fn commit_ledger_sync(
        &self,
        entries: &[LedgerEntry],
        checkpoints: &[(StreamType, EventPosition)],
    ) -> Result<Vec<i64>, sqlx::Error> {
        let created_at = now_ms();
        let mut ids = Vec::with_capacity(entries.len());
        let mut tx = self.pool.begin().await?;

        for entry in entries {
            let result = sqlx::query(
                r#"
                INSERT INTO ledger (
                    block_number, tx_index, event_index, order_index, timestamp,
                    user, amount, entry_type, referral_code, created_at
                ) VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
                "#,
            )
            .bind(entry.key.position.block_number)
            .bind(entry.key.position.tx_index)
            .bind(entry.key.position.event_index)
            .bind(entry.key.order_index)
            .bind(entry.timestamp)
            .bind(entry.user.as_str())
            .bind(entry.amount.to_canonical_string())
            .bind(entry.entry_type.as_str())
            .bind(entry.referral_code.as_ref().map(|c| c.as_str()))
            .bind(created_at)
            .execute(&mut *tx)
            .await?;

            ids.push(result.last_insert_rowid());
        }

        for (stream, position) in checkpoints {
            sqlx::query(
                r#"
                INSERT INTO checkpoints (stream, block_number, tx_index, event_index, updated_at)
                VALUES (?, ?, ?, ?, ?)
                ON CONFLICT(stream) DO UPDATE SET
                    block_number = excluded.block_number,
                    tx_index = excluded.tx_index,
                    event_index = excluded.event_index,
                    updated_at = excluded.updated_at
                "#,
            )
            .bind(stream.as_str())
            .bind(position.block_number)
            .bind(position.tx_index)
            .bind(position.event_index)
            .bind(created_at)
            .execute(&mut *tx)
            .await?;
        }

        tx.commit().await?;
        Ok(ids)
    }

    /// Every ledger row of the given users, in ledger order.
    ///
    /// # Errors
    /// Returns an error if the query fails or a stored value does not decode.
    pub async fn ledger_history_for_users(
        &self,
        users: &[Address],
    ) -> Result<Vec<LedgerEntry>, sqlx::Error> {
        let mut entries = Vec::new();
        for chunk in users.chunks(USER_CHUNK) {
            let mut query: QueryBuilder<Sqlite> = QueryBuilder::new(
                "SELECT id, block_number, tx_index, event_index, order_index, timestamp, \
                 user, amount, entry_type, referral_code FROM ledger WHERE user IN (",
            );
            let mut separated = query.separated(", ");
            for user in chunk {
                separated.push_bind(user.as_str());
            }
            separated.push_unseparated(")");

            let rows = query.build().fetch_all(&self.pool).await?;
            for row in &rows {
                entries.push(ledger_row(row)?);
            }
        }

        // Chunks interleave users; restore global order.
        entries.sort_by_key(|e| (e.key, e.id));
        Ok(entries)
    }

    /// The full ledger in ledger order.
    ///
    /// # Errors
    /// Returns an error if the query fails or a stored value does not decode.
    pub async fn ledger_ordered(&self) -> Result<Vec<LedgerEntry>, sqlx::Error> {
        let rows = sqlx::query(
            r#"
            SELECT id, block_number, tx_index, event_index, order_index, timestamp,
                   user, amount, entry_type, referral_code
            FROM ledger
            ORDER BY block_number ASC, tx_index ASC, event_index ASC, order_index ASC, id ASC
            "#,
        )
        .fetch_all(&self.pool)
        .await?;

        rows.iter().map(ledger_row).collect()
    }

    /// Id of the newest ledger row, if any.
    ///
    /// # Errors
    /// Returns an error if the query fails.
    pub async fn last_ledger_id(&self) -> Result<Option<i64>, sqlx::Error> {
        let row = sqlx::query("SELECT MAX(id) AS max_id FROM ledger")
            .fetch_one(&self.pool)
            .await?;
        row.try_get("max_id")
    }

    /// Position of the newest ledger row in ledger order, if any.
    ///
    /// # Errors
    /// Returns an error if the query fails.
    pub async fn last_ledger_position(&self) -> Result<Option<EventPosition>, sqlx::Error> {
        let row = sqlx::query(
            r#"
            SELECT block_number, tx_index, event_index
            FROM ledger
            ORDER BY block_number DESC, tx_index DESC, event_index DESC, order_index DESC
            LIMIT 1
            "#,
        )
        .fetch_optional(&self.pool)
        .await?;

        row.as_ref().map(position_columns).transpose()
    }

    /// Total ledger rows.
    ///
    /// # Errors
    /// Returns an error if the query fails.
    pub async fn ledger_len(&self) -> Result<i64, sqlx::Error> {
        let row = sqlx::query("SELECT COUNT(*) AS n FROM ledger")
            .fetch_one(&self.pool)
            .await?;
        row.try_get("n")
    }

    /// Distinct ledger block numbers greater than `after`, ascending.
    ///
    /// `None` returns every block.
    ///
    /// # Errors
    /// Returns an error if the query fails.
    pub async fn distinct_ledger_blocks_after(
        &self,
        after: Option<i64>,
    ) -> Result<Vec<i64>, sqlx::Error> {
        let rows = sqlx::query(
            r#"
            SELECT DISTINCT block_number
            FROM ledger
            WHERE ? IS NULL OR block_number > ?
            ORDER BY block_number ASC
            "#,
        )
        .bind(after)
        .bind(after)
        .fetch_all(&self.pool)
        .await?;

        rows.iter().map(|r| r.try_get("block_number")).collect()
    }
}

fn ledger_row(row: &SqliteRow) -> Result<LedgerEntry, sqlx::Error> {
    let entry_type: String = row.try_get("entry_type")?;
    let entry_type = EntryType::from_str(&entry_type).map_err(|e| sqlx::Error::ColumnDecode {
        index: "entry_type".to_string(),
        source: e.into(),
    })?;

    Ok(LedgerEntry {
        id: Some(row.try_get("id")?),
        key: LedgerKey::new(position_columns(row)?, row.try_get("order_index")?),
        timestamp: row.try_get("timestamp")?,
        user: address_column(row, "user")?,
        amount: decimal_column(row, "amount")?,
        entry_type,
        referral_code: optional_code_column(row, "referral_code")?,
    })
}
