//! Raw event rows.
//!
//! The insert helpers stand in for the ingestion pipeline and are idempotent
//! on the `(block_number, tx_index, event_index)` key.

use crate::domain::{DepositEvent, EventPosition, TransferEvent, WithdrawalEvent};
use sqlx::sqlite::SqliteRow;
use sqlx::Row;

use super::{address_column, decimal_column, optional_code_column, Repository};

impl Repository {
    /// Insert deposits in a single transaction.
    ///
    /// Returns the number of newly inserted rows (excludes duplicates).
    ///
    /// # Errors
    /// Returns an error if the transaction fails.
    pub async fn insert_deposits(&self, deposits: &[DepositEvent]) -> Result<usize, sqlx::Error> {
        if deposits.is_empty() {
            return Ok(0);
        }

        let mut inserted = 0usize;
        let mut tx = self.pool.begin().await?;

        for deposit in deposits {
            let result = sqlx::query(
                r#"
                INSERT INTO deposits (
                    block_number, tx_index, event_index, timestamp,
                    sender, owner, assets, shares, referral_code
                ) VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?)
                ON CONFLICT(block_number, tx_index, event_index) DO NOTHING
                "#,
            )
            .bind(deposit.position.block_number)
            .bind(deposit.position.tx_index)
            .bind(deposit.position.event_index)
            .bind(deposit.timestamp)
            .bind(deposit.sender.as_str())
            .bind(deposit.owner.as_str())
            .bind(deposit.assets.to_canonical_string())
            .bind(deposit.shares.to_canonical_string())
            .bind(deposit.referral_code.as_ref().map(|c| c.as_str()))
            .execute(&mut *tx)
            .await?;

            if result.rows_affected() > 0 {
                inserted += 1;
            }
        }

        tx.commit().await?;
        Ok(inserted)
    }

    /// Insert withdrawals in a single transaction.
    ///
    /// # Errors
    /// Returns an error if the transaction fails.
    pub async fn insert_withdrawals(
        &self,
        withdrawals: &[WithdrawalEvent],
    ) -> Result<usize, sqlx::Error> {
        if withdrawals.is_empty() {
            return Ok(0);
        }

        let mut inserted = 0usize;
        let mut tx = self.pool.begin().await?;

        for withdrawal in withdrawals {
            let result = sqlx::query(
                r#"
                INSERT INTO withdrawals (
                    block_number, tx_index, event_index, timestamp,
                    sender, receiver, owner, assets, shares
                ) VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?)
                ON CONFLICT(block_number, tx_index, event_index) DO NOTHING
                "#,
            )
            .bind(withdrawal.position.block_number)
            .bind(withdrawal.position.tx_index)
            .bind(withdrawal.position.event_index)
            .bind(withdrawal.timestamp)
            .bind(withdrawal.sender.as_str())
            .bind(withdrawal.receiver.as_str())
            .bind(withdrawal.owner.as_str())
            .bind(withdrawal.assets.to_canonical_string())
            .bind(withdrawal.shares.to_canonical_string())
            .execute(&mut *tx)
            .await?;

            if result.rows_affected() > 0 {
                inserted += 1;
            }
        }

        tx.commit().await?;
        Ok(inserted)
    }

    /// Insert transfers in a single transaction.
    ///
    /// # Errors
    /// Returns an error if the transaction fails.
    pub async fn insert_transfers(
        &self,
        transfers: &[TransferEvent],
    ) -> Result<usize, sqlx::Error> {
        if transfers.is_empty() {
            return Ok(0);
        }

        let mut inserted = 0usize;
        let mut tx = self.pool.begin().await?;

        for transfer in transfers {
            let result = sqlx::query(
                r#"
                INSERT INTO transfers (
                    block_number, tx_index, event_index, timestamp,
                    from_address, to_address, value
                ) VALUES (?, ?, ?, ?, ?, ?, ?)
                ON CONFLICT(block_number, tx_index, event_index) DO NOTHING
                "#,
            )
            .bind(transfer.position.block_number)
            .bind(transfer.position.tx_index)
            .bind(transfer.position.event_index)
            .bind(transfer.timestamp)
            .bind(transfer.from.as_str())
            .bind(transfer.to.as_str())
            .bind(transfer.value.to_canonical_string())
            .execute(&mut *tx)
            .await?;

            if result.rows_affected() > 0 {
                inserted += 1;
            }
        }

        tx.commit().await?;
        Ok(inserted)
    }

    /// Deposits strictly after `after`, in chain order.
    ///
    /// # Errors
    /// Returns an error if the query fails or a stored value does not decode.
    pub async fn deposits_after(
        &self,
        after: EventPosition,
    ) -> Result<Vec<DepositEvent>, sqlx::Error> {
        let rows = sqlx::query(
            r#"
            SELECT block_number, tx_index, event_index, timestamp,
                   sender, owner, assets, shares, referral_code
            FROM deposits
            WHERE (block_number, tx_index, event_index) > (?, ?, ?)
            ORDER BY block_number ASC, tx_index ASC, event_index ASC
            "#,
        )
        .bind(after.block_number)
        .bind(after.tx_index)
        .bind(after.event_index)
        .fetch_all(&self.pool)
        .await?;

        rows.iter()
            .map(|row| -> Result<DepositEvent, sqlx::Error> {
                Ok(DepositEvent {
                    position: position_columns(row)?,
                    timestamp: row.try_get("timestamp")?,
                    sender: address_column(row, "sender")?,
                    owner: address_column(row, "owner")?,
                    assets: decimal_column(row, "assets")?,
                    shares: decimal_column(row, "shares")?,
                    referral_code: optional_code_column(row, "referral_code")?,
                })
            })
            .collect()
    }

    /// Withdrawals strictly after `after`, in chain order.
    ///
    /// # Errors
    /// Returns an error if the query fails or a stored value does not decode.
    pub async fn withdrawals_after(
        &self,
        after: EventPosition,
    ) -> Result<Vec<WithdrawalEvent>, sqlx::Error> {
        let rows = sqlx::query(
            r#"
            SELECT block_number, tx_index, event_index, timestamp,
                   sender, receiver, owner, assets, shares
            FROM withdrawals
            WHERE (block_number, tx_index, event_index) > (?, ?, ?)
            ORDER BY block_number ASC, tx_index ASC, event_index ASC
            "#,
        )
        .bind(after.block_number)
        .bind(after.tx_index)
        .bind(after.event_index)
        .fetch_all(&self.pool)
        .await?;

        rows.iter()
            .map(|row| -> Result<WithdrawalEvent, sqlx::Error> {
                Ok(WithdrawalEvent {
                    position: position_columns(row)?,
                    timestamp: row.try_get("timestamp")?,
                    sender: address_column(row, "sender")?,
                    receiver: address_column(row, "receiver")?,
                    owner: address_column(row, "owner")?,
                    assets: decimal_column(row, "assets")?,
                    shares: decimal_column(row, "shares")?,
                })
            })
            .collect()
    }

    /// Transfers strictly after `after`, in chain order.
    ///
    /// # Errors
    /// Returns an error if the query fails or a stored value does not decode.
    pub async fn transfers_after(
        &self,
        after: EventPosition,
    ) -> Result<Vec<TransferEvent>, sqlx::Error> {
        let rows = sqlx::query(
            r#"
            SELECT block_number, tx_index, event_index, timestamp,
                   from_address, to_address, value
            FROM transfers
            WHERE (block_number, tx_index, event_index) > (?, ?, ?)
            ORDER BY block_number ASC, tx_index ASC, event_index ASC
            "#,
        )
        .bind(after.block_number)
        .bind(after.tx_index)
        .bind(after.event_index)
        .fetch_all(&self.pool)
        .await?;

        rows.iter()
            .map(|row| -> Result<TransferEvent, sqlx::Error> {
                Ok(TransferEvent {
                    position: position_columns(row)?,
                    timestamp: row.try_get("timestamp")?,
                    from: address_column(row, "from_address")?,
                    to: address_column(row, "to_address")?,
                    value: decimal_column(row, "value")?,
                })
            })
            .collect()
    }
}

pub(super) fn position_columns(row: &SqliteRow) -> Result<EventPosition, sqlx::Error> {
    Ok(EventPosition::new(
        row.try_get("block_number")?,
        row.try_get("tx_index")?,
        row.try_get("event_index")?,
    ))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::migrations::init_db;
    use crate::domain::{Address, Decimal, ReferralCode};
    use tempfile::TempDir;

    async fn setup_test_db() -> (Repository, TempDir) {
        let temp_dir = TempDir::new().unwrap();
        let db_path = temp_dir
            .path()
            .join("test.db")
            .to_string_lossy()
            .to_string();
        let pool = init_db(&db_path).await.expect("init_db failed");
        (Repository::new(pool), temp_dir)
    }

    fn deposit(block: i64, tx: i64, event: i64) -> DepositEvent {
        DepositEvent {
            position: EventPosition::new(block, tx, event),
            timestamp: 1_700_000_000,
            sender: Address::parse("0x1").unwrap(),
            owner: Address::parse("0x2").unwrap(),
            assets: Decimal::from_str_canonical("1000000000000000000000").unwrap(),
            shares: Decimal::from_str_canonical("999999999999999999999").unwrap(),
            referral_code: ReferralCode::new("9EFE5"),
        }
    }

    #[tokio::test]
    async fn test_duplicate_events_are_ignored() {
        let (repo, _temp) = setup_test_db().await;
        assert_eq!(repo.insert_deposits(&[deposit(1, 0, 0)]).await.unwrap(), 1);
        assert_eq!(
            repo.insert_deposits(&[deposit(1, 0, 0), deposit(1, 0, 1)])
                .await
                .unwrap(),
            1
        );
    }

    #[tokio::test]
    async fn test_after_is_strict_and_ordered() {
        let (repo, _temp) = setup_test_db().await;
        repo.insert_deposits(&[deposit(2, 0, 0), deposit(1, 3, 0), deposit(1, 2, 5)])
            .await
            .unwrap();

        let rows = repo
            .deposits_after(EventPosition::new(1, 2, 5))
            .await
            .unwrap();
        let positions: Vec<_> = rows.iter().map(|d| d.position).collect();
        assert_eq!(
            positions,
            vec![EventPosition::new(1, 3, 0), EventPosition::new(2, 0, 0)]
        );
        assert_eq!(rows[0], deposit(1, 3, 0));
    }
}
