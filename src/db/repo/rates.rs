//! Exchange-rate samples.

use crate::domain::{Decimal, ExchangeRateSample};
use sqlx::Row;
use std::collections::HashMap;

use super::{decimal_column, now_ms, Repository};

impl Repository {
    /// Highest sampled block, if any.
    ///
    /// # Errors
    /// Returns an error if the query fails.
    pub async fn max_sampled_block(&self) -> Result<Option<i64>, sqlx::Error> {
        let row = sqlx::query("SELECT MAX(block_number) AS max_block FROM exchange_rates")
            .fetch_one(&self.pool)
            .await?;
        row.try_get("max_block")
    }

    /// Insert samples in one transaction, ignoring blocks already sampled.
    ///
    /// Returns the number of newly inserted rows.
    ///
    /// # Errors
    /// Returns an error if the transaction fails.
    pub async fn insert_exchange_rates(
        &self,
        samples: &[ExchangeRateSample],
    ) -> Result<usize, sqlx::Error> {
        if samples.is_empty() {
            return Ok(0);
        }

        let created_at = now_ms();
        let mut inserted = 0usize;
        let mut tx = self.pool.begin().await?;

        for sample in samples {
            let result = sqlx::query(
                r#"
                INSERT INTO exchange_rates (block_number, rate, created_at)
                VALUES (?, ?, ?)
                ON CONFLICT(block_number) DO NOTHING
                "#,
            )
            .bind(sample.block_number)
            .bind(sample.rate.to_canonical_string())
            .bind(created_at)
            .execute(&mut *tx)
            .await?;

            if result.rows_affected() > 0 {
                inserted += 1;
            }
        }

        tx.commit().await?;
        Ok(inserted)
    }

    /// All samples keyed by block number.
    ///
    /// # Errors
    /// Returns an error if the query fails or a stored rate does not decode.
    pub async fn exchange_rates(&self) -> Result<HashMap<i64, Decimal>, sqlx::Error> {
        let rows = sqlx::query("SELECT block_number, rate FROM exchange_rates")
            .fetch_all(&self.pool)
            .await?;

        rows.iter()
            .map(|row| -> Result<(i64, Decimal), sqlx::Error> {
                Ok((row.try_get("block_number")?, decimal_column(row, "rate")?))
            })
            .collect()
    }

    /// Sample at exactly `block_number`.
    ///
    /// # Errors
    /// Returns an error if the query fails or the stored rate does not decode.
    pub async fn exchange_rate_at(&self, block_number: i64) -> Result<Option<Decimal>, sqlx::Error> {
        let row = sqlx::query("SELECT rate FROM exchange_rates WHERE block_number = ?")
            .bind(block_number)
            .fetch_optional(&self.pool)
            .await?;

        row.as_ref().map(|r| decimal_column(r, "rate")).transpose()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::migrations::init_db;
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

    #[tokio::test]
    async fn test_resampling_a_block_keeps_first_value() {
        let (repo, _temp) = setup_test_db().await;
        assert_eq!(repo.max_sampled_block().await.unwrap(), None);

        let first = ExchangeRateSample {
            block_number: 7,
            rate: Decimal::from_str_canonical("1.05").unwrap(),
        };
        let second = ExchangeRateSample {
            block_number: 7,
            rate: Decimal::from_str_canonical("9.99").unwrap(),
        };

        assert_eq!(repo.insert_exchange_rates(&[first]).await.unwrap(), 1);
        assert_eq!(repo.insert_exchange_rates(&[second]).await.unwrap(), 0);

        let rates = repo.exchange_rates().await.unwrap();
        assert_eq!(rates.len(), 1);
        assert_eq!(rates[&7], first.rate);
        assert_eq!(repo.max_sampled_block().await.unwrap(), Some(7));
    }
}
