//! Referrer and commission operations for the repository.

use crate::domain::{Commission, ReferralCode, Referrer};
use serde::Serialize;
use sqlx::sqlite::SqliteRow;
use sqlx::Row;
use tracing::info;

use super::{code_column, decimal_column, now_ms, RepoError, Repository};

/// Outcome of a referrer upsert.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct UpsertSummary {
    pub inserted: usize,
    pub unchanged: usize,
}

impl Repository {
    // =========================================================================
    // Referrers
    // =========================================================================

    /// Insert new referrers; identical existing rows are left alone.
    ///
    /// A referrer's percentage is fixed once created. All-or-nothing: one
    /// conflicting percentage rejects the whole batch.
    ///
    /// # Errors
    /// Returns `ImmutablePercentage` if an existing code is given a different
    /// percentage, or a database error.
    pub async fn upsert_referrers(&self, referrers: &[Referrer]) -> Result<UpsertSummary, RepoError> {
        let created_at = now_ms();
        let mut summary = UpsertSummary::default();
        let mut tx = self.pool.begin().await?;

        for referrer in referrers {
            let existing = sqlx::query("SELECT percentage FROM referrers WHERE referral_code = ?")
                .bind(referrer.referral_code.as_str())
                .fetch_optional(&mut *tx)
                .await?;

            match existing {
                Some(row) => {
                    let existing = percentage_column(&row)?;
                    if existing != referrer.percentage_bps {
                        return Err(RepoError::ImmutablePercentage {
                            referral_code: referrer.referral_code.clone(),
                            existing,
                            requested: referrer.percentage_bps,
                        });
                    }
                    summary.unchanged += 1;
                }
                None => {
                    sqlx::query(
                        "INSERT INTO referrers (referral_code, percentage, created_at) VALUES (?, ?, ?)",
                    )
                    .bind(referrer.referral_code.as_str())
                    .bind(i64::from(referrer.percentage_bps))
                    .bind(created_at)
                    .execute(&mut *tx)
                    .await?;
                    summary.inserted += 1;
                }
            }
        }

        tx.commit().await?;
        info!(
            inserted = summary.inserted,
            unchanged = summary.unchanged,
            "Upserted referrers"
        );
        Ok(summary)
    }

    /// All referrers ordered by code.
    ///
    /// # Errors
    /// Returns an error if the query fails or a stored value does not decode.
    pub async fn list_referrers(&self) -> Result<Vec<Referrer>, sqlx::Error> {
        let rows = sqlx::query(
            "SELECT referral_code, percentage FROM referrers ORDER BY referral_code ASC",
        )
        .fetch_all(&self.pool)
        .await?;

        rows.iter()
            .map(|row| -> Result<Referrer, sqlx::Error> {
                Ok(Referrer {
                    referral_code: code_column(row, "referral_code")?,
                    percentage_bps: percentage_column(row)?,
                })
            })
            .collect()
    }

    /// One referrer by code.
    ///
    /// # Errors
    /// Returns an error if the query fails or a stored value does not decode.
    pub async fn get_referrer(&self, code: &ReferralCode) -> Result<Option<Referrer>, sqlx::Error> {
        let row = sqlx::query("SELECT referral_code, percentage FROM referrers WHERE referral_code = ?")
            .bind(code.as_str())
            .fetch_optional(&self.pool)
            .await?;

        row.as_ref()
            .map(|row| -> Result<Referrer, sqlx::Error> {
                Ok(Referrer {
                    referral_code: code_column(row, "referral_code")?,
                    percentage_bps: percentage_column(row)?,
                })
            })
            .transpose()
    }

    // =========================================================================
    // Commissions
    // =========================================================================

    /// Most recent commission row of a referrer, if any.
    ///
    /// # Errors
    /// Returns an error if the query fails or a stored value does not decode.
    pub async fn latest_commission_for(
        &self,
        code: &ReferralCode,
    ) -> Result<Option<Commission>, sqlx::Error> {
        let row = sqlx::query(
            r#"
            SELECT id, referral_code, commission_amount, is_paid, ledger_id
            FROM commissions
            WHERE referral_code = ?
            ORDER BY id DESC
            LIMIT 1
            "#,
        )
        .bind(code.as_str())
        .fetch_optional(&self.pool)
        .await?;

        row.as_ref().map(commission_row).transpose()
    }

    /// Append commission rows in one transaction; returns their ids.
    ///
    /// # Errors
    /// Returns an error if the transaction fails; nothing is written then.
    pub async fn insert_commissions(
        &self,
        commissions: &[Commission],
    ) -> Result<Vec<i64>, sqlx::Error> {
        if commissions.is_empty() {
            return Ok(Vec::new());
        }

        let created_at = now_ms();
        let mut ids = Vec::with_capacity(commissions.len());
        let mut tx = self.pool.begin().await?;

        for commission in commissions {
            let result = sqlx::query(
                r#"
                INSERT INTO commissions (referral_code, commission_amount, is_paid, ledger_id, created_at)
                VALUES (?, ?, ?, ?, ?)
                "#,
            )
            .bind(commission.referral_code.as_str())
            .bind(commission.commission_amount.to_canonical_string())
            .bind(commission.is_paid)
            .bind(commission.ledger_id)
            .bind(created_at)
            .execute(&mut *tx)
            .await?;

            ids.push(result.last_insert_rowid());
        }

        tx.commit().await?;
        Ok(ids)
    }

    /// Commission rows, optionally for one referrer, oldest first.
    ///
    /// # Errors
    /// Returns an error if the query fails or a stored value does not decode.
    pub async fn commissions_for(
        &self,
        code: Option<&ReferralCode>,
    ) -> Result<Vec<Commission>, sqlx::Error> {
        let rows = sqlx::query(
            r#"
            SELECT id, referral_code, commission_amount, is_paid, ledger_id
            FROM commissions
            WHERE ? IS NULL OR referral_code = ?
            ORDER BY id ASC
            "#,
        )
        .bind(code.map(|c| c.as_str()))
        .bind(code.map(|c| c.as_str()))
        .fetch_all(&self.pool)
        .await?;

        rows.iter().map(commission_row).collect()
    }
}

fn percentage_column(row: &SqliteRow) -> Result<u32, sqlx::Error> {
    let raw: i64 = row.try_get("percentage")?;
    u32::try_from(raw).map_err(|e| sqlx::Error::ColumnDecode {
        index: "percentage".to_string(),
        source: Box::new(e),
    })
}

fn commission_row(row: &SqliteRow) -> Result<Commission, sqlx::Error> {
    Ok(Commission {
        id: Some(row.try_get("id")?),
        referral_code: code_column(row, "referral_code")?,
        commission_amount: decimal_column(row, "commission_amount")?,
        is_paid: row.try_get("is_paid")?,
        ledger_id: row.try_get("ledger_id")?,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::migrations::init_db;
    use crate::domain::{
        Address, Decimal, EntryType, EventPosition, LedgerEntry, LedgerKey,
    };
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

    fn referrer(code: &str, bps: u32) -> Referrer {
        Referrer {
            referral_code: ReferralCode::new(code).unwrap(),
            percentage_bps: bps,
        }
    }

    #[tokio::test]
    async fn test_upsert_inserts_new_and_ignores_identical() {
        let (repo, _temp) = setup_test_db().await;
        let first = repo.upsert_referrers(&[referrer("A", 100)]).await.unwrap();
        assert_eq!(first, UpsertSummary { inserted: 1, unchanged: 0 });

        let second = repo
            .upsert_referrers(&[referrer("A", 100), referrer("B", 200)])
            .await
            .unwrap();
        assert_eq!(second, UpsertSummary { inserted: 1, unchanged: 1 });
        assert_eq!(
            repo.list_referrers().await.unwrap(),
            vec![referrer("A", 100), referrer("B", 200)]
        );
    }

    #[tokio::test]
    async fn test_latest_commission_is_highest_id() {
        let (repo, _temp) = setup_test_db().await;
        repo.upsert_referrers(&[referrer("A", 100)]).await.unwrap();
        let entry = LedgerEntry {
            id: None,
            key: LedgerKey::new(EventPosition::new(1, 0, 0), 0),
            timestamp: 0,
            user: Address::parse("0x1").unwrap(),
            amount: Decimal::from_i64(1),
            entry_type: EntryType::Deposit,
            referral_code: ReferralCode::new("A"),
        };
        let ledger_ids = repo
            .commit_ledger_sync(&[entry.clone(), entry], &[])
            .await
            .unwrap();

        let rows: Vec<Commission> = ledger_ids
            .iter()
            .map(|&ledger_id| Commission {
                id: None,
                referral_code: ReferralCode::new("A").unwrap(),
                commission_amount: Decimal::from_str_canonical("0.5").unwrap(),
                is_paid: false,
                ledger_id,
            })
            .collect();
        let ids = repo.insert_commissions(&rows).await.unwrap();

        let latest = repo
            .latest_commission_for(&ReferralCode::new("A").unwrap())
            .await
            .unwrap()
            .unwrap();
        assert_eq!(latest.id, ids.last().copied());
        assert_eq!(latest.ledger_id, ledger_ids[1]);
        assert_eq!(repo.commissions_for(None).await.unwrap().len(), 2);
        assert!(repo
            .latest_commission_for(&ReferralCode::new("B").unwrap())
            .await
            .unwrap()
            .is_none());
    }
}
