use thiserror::Error;

use crate::models::BatchKey;

/// A batch query against the XP store failed.
///
/// Carries the first underlying failure; results from sibling queries that
/// had already completed are discarded, never returned partially.
#[derive(Debug, Error)]
#[error("failed to fetch batch {batch}: {source}")]
pub struct FetchError {
    batch: String,
    #[source]
    source: Box<dyn std::error::Error + Send + Sync>,
}

impl FetchError {
    pub fn new(
        batch: &BatchKey,
        source: impl Into<Box<dyn std::error::Error + Send + Sync>>,
    ) -> Self {
        Self {
            batch: batch.to_string(),
            source: source.into(),
        }
    }
}

/// Failures talking to the identity provider.
///
/// The session gate swallows these at its boundary and resolves to the
/// signed-out state; they never surface to the end user.
#[derive(Debug, Error)]
pub enum AuthError {
    #[error("identity provider request failed: {0}")]
    Http(#[from] reqwest::Error),

    #[error("identity provider rejected the request with status {0}")]
    Status(reqwest::StatusCode),

    #[error("malformed session payload: {0}")]
    Decode(#[from] serde_json::Error),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn fetch_error_names_the_batch() {
        let batch = BatchKey {
            cohort_type: "bootcamp".to_string(),
            cohort_number: "12".to_string(),
        };
        let err = FetchError::new(&batch, "connection reset");
        assert_eq!(
            err.to_string(),
            "failed to fetch batch bootcamp:12: connection reset"
        );
    }
}
