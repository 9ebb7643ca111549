use std::fmt;

use anyhow::Context;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// One cohort/batch combination, used as a query filter against the XP store.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct BatchKey {
    pub cohort_type: String,
    pub cohort_number: String,
}

impl BatchKey {
    /// Parse a `TYPE:NUMBER` pair as given on the command line.
    pub fn parse(raw: &str) -> anyhow::Result<Self> {
        let (cohort_type, cohort_number) = raw
            .split_once(':')
            .context("cohort must be given as TYPE:NUMBER, e.g. bootcamp:12")?;
        if cohort_type.is_empty() || cohort_number.is_empty() {
            anyhow::bail!("cohort must be given as TYPE:NUMBER, e.g. bootcamp:12");
        }
        Ok(Self {
            cohort_type: cohort_type.to_string(),
            cohort_number: cohort_number.to_string(),
        })
    }
}

impl fmt::Display for BatchKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.cohort_type, self.cohort_number)
    }
}

/// One student's XP standing within a batch, as stored remotely.
#[derive(Debug, Clone, Serialize)]
pub struct XpRecord {
    pub enrollment_id: String,
    pub full_name: String,
    pub email: String,
    pub cohort_type: String,
    pub cohort_number: String,
    pub xp: i64,
    pub last_updated: DateTime<Utc>,
}

/// An [`XpRecord`] with its 1-based position in the merged standings.
///
/// Rank is positional and recomputed on every aggregation; it is never
/// stored, and a filtered view of the board keeps these numbers as-is.
#[derive(Debug, Clone, Serialize)]
pub struct RankedEntry {
    pub rank: usize,
    #[serde(flatten)]
    pub record: XpRecord,
}

/// Aggregate XP figures for one batch, used in reports.
#[derive(Debug, Clone)]
pub struct BatchSummary {
    pub batch: String,
    pub student_count: usize,
    pub total_xp: i64,
    pub avg_xp: f64,
}

/// The principal attached to an identity-provider session. Only `role` is
/// consumed by the gate; everything else is display metadata.
#[derive(Debug, Clone, Deserialize)]
pub struct AuthUser {
    pub id: Uuid,
    pub email: String,
    pub role: String,
}

/// A live identity-provider session.
#[derive(Debug, Clone, Deserialize)]
pub struct Session {
    pub access_token: String,
    pub user: AuthUser,
}

/// Session-change notification from the identity provider handle.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[allow(dead_code)] // SignedIn/TokenRefreshed come from interactive providers
pub enum AuthEvent {
    SignedIn,
    SignedOut,
    TokenRefreshed,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn batch_key_parses_type_and_number() {
        let key = BatchKey::parse("bootcamp:12").unwrap();
        assert_eq!(key.cohort_type, "bootcamp");
        assert_eq!(key.cohort_number, "12");
        assert_eq!(key.to_string(), "bootcamp:12");
    }

    #[test]
    fn batch_key_rejects_malformed_input() {
        assert!(BatchKey::parse("bootcamp").is_err());
        assert!(BatchKey::parse(":12").is_err());
        assert!(BatchKey::parse("bootcamp:").is_err());
    }
}
