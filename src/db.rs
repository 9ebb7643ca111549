use async_trait::async_trait;
use sqlx::{PgPool, Row};

use crate::error::FetchError;
use crate::models::{BatchKey, XpRecord};

/// Read-side handle to the remote XP table.
///
/// The aggregator only sees this trait, so the production Postgres store can
/// be swapped for a stub in tests.
#[async_trait]
pub trait XpSource: Send + Sync {
    /// Fetch every XP record for one cohort batch, in store order.
    async fn fetch_batch(&self, batch: &BatchKey) -> Result<Vec<XpRecord>, FetchError>;
}

/// Postgres-backed XP store.
pub struct PgXpStore {
    pool: PgPool,
}

impl PgXpStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl XpSource for PgXpStore {
    async fn fetch_batch(&self, batch: &BatchKey) -> Result<Vec<XpRecord>, FetchError> {
        let rows = sqlx::query(
            "SELECT enrollment_id, full_name, email, cohort_type, cohort_number, \
             xp, last_updated \
             FROM xp_leaderboard.cohort_xp \
             WHERE cohort_type = $1 AND cohort_number = $2",
        )
        .bind(&batch.cohort_type)
        .bind(&batch.cohort_number)
        .fetch_all(&self.pool)
        .await
        .map_err(|err| FetchError::new(batch, err))?;

        let mut records = Vec::with_capacity(rows.len());
        for row in rows {
            records.push(XpRecord {
                enrollment_id: row.get("enrollment_id"),
                full_name: row.get("full_name"),
                email: row.get("email"),
                cohort_type: row.get("cohort_type"),
                cohort_number: row.get("cohort_number"),
                xp: row.get("xp"),
                last_updated: row.get("last_updated"),
            });
        }

        Ok(records)
    }
}
