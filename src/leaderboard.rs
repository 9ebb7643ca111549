use std::collections::HashSet;

use futures_util::future::try_join_all;

use crate::db::XpSource;
use crate::error::FetchError;
use crate::models::{BatchKey, RankedEntry, XpRecord};

/// Fetch and rank the XP standings across a set of cohort batches.
///
/// All batch queries run concurrently and are awaited together, so latency
/// is bounded by the slowest batch. If any query fails the whole call fails
/// with the first underlying error and no partial result. Result sets are
/// concatenated in input-batch order, which makes de-duplication
/// deterministic: a student enrolled in several of the queried batches keeps
/// the record from the earliest batch in the caller's list.
///
/// An empty batch list yields an empty board, not an error.
pub async fn aggregate<S>(
    source: &S,
    batches: &[BatchKey],
) -> Result<Vec<RankedEntry>, FetchError>
where
    S: XpSource + ?Sized,
{
    let per_batch = try_join_all(batches.iter().map(|batch| source.fetch_batch(batch))).await?;
    let merged: Vec<XpRecord> = per_batch.into_iter().flatten().collect();

    Ok(rank(dedupe(merged)))
}

/// Keep the first occurrence of each `enrollment_id`, in input order.
fn dedupe(records: Vec<XpRecord>) -> Vec<XpRecord> {
    let mut seen = HashSet::new();
    records
        .into_iter()
        .filter(|record| seen.insert(record.enrollment_id.clone()))
        .collect()
}

/// Sort by XP descending (stable, so ties keep merge order) and assign
/// contiguous 1-based ranks. Ties do not share a rank.
fn rank(mut records: Vec<XpRecord>) -> Vec<RankedEntry> {
    records.sort_by(|a, b| b.xp.cmp(&a.xp));
    records
        .into_iter()
        .enumerate()
        .map(|(index, record)| RankedEntry {
            rank: index + 1,
            record,
        })
        .collect()
}

/// Case-insensitive substring filter on student names.
///
/// Produces a view of the board, not a new ranking: surviving entries keep
/// the rank they hold in the full standings.
pub fn filter_by_name(entries: &[RankedEntry], needle: &str) -> Vec<RankedEntry> {
    let needle = needle.to_lowercase();
    entries
        .iter()
        .filter(|entry| entry.record.full_name.to_lowercase().contains(&needle))
        .cloned()
        .collect()
}
