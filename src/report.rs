use std::fmt::Write as _;
use std::io;

use crate::models::{BatchSummary, RankedEntry};

pub fn summarize_by_batch(entries: &[RankedEntry]) -> Vec<BatchSummary> {
    let mut map: std::collections::HashMap<String, (usize, i64)> =
        std::collections::HashMap::new();

    for entry in entries {
        let label = format!("{}:{}", entry.record.cohort_type, entry.record.cohort_number);
        let slot = map.entry(label).or_insert((0, 0));
        slot.0 += 1;
        slot.1 += entry.record.xp;
    }

    let mut summaries: Vec<BatchSummary> = map
        .into_iter()
        .map(|(batch, (student_count, total_xp))| BatchSummary {
            batch,
            student_count,
            total_xp,
            avg_xp: if student_count == 0 {
                0.0
            } else {
                total_xp as f64 / student_count as f64
            },
        })
        .collect();

    summaries.sort_by(|a, b| b.student_count.cmp(&a.student_count));
    summaries
}

pub fn build_report(scope: &str, entries: &[RankedEntry]) -> String {
    let summaries = summarize_by_batch(entries);

    let mut output = String::new();

    let _ = writeln!(output, "# Cohort XP Leaderboard");
    let _ = writeln!(output, "Generated for {}", scope);
    let _ = writeln!(output);
    let _ = writeln!(output, "## Batch Mix");

    if summaries.is_empty() {
        let _ = writeln!(output, "No students found for these batches.");
    } else {
        for summary in summaries.iter() {
            let _ = writeln!(
                output,
                "- {}: {} students (total {} xp, avg {:.1})",
                summary.batch, summary.student_count, summary.total_xp, summary.avg_xp
            );
        }
    }

    let _ = writeln!(output);
    let _ = writeln!(output, "## Standings");

    if entries.is_empty() {
        let _ = writeln!(output, "No students found for these batches.");
    } else {
        for entry in entries.iter().take(10) {
            let _ = writeln!(
                output,
                "- #{} {} ({}, {}:{}) {} xp",
                entry.rank,
                entry.record.full_name,
                entry.record.email,
                entry.record.cohort_type,
                entry.record.cohort_number,
                entry.record.xp
            );
        }
    }

    let mut recent = entries.to_vec();
    recent.sort_by(|a, b| b.record.last_updated.cmp(&a.record.last_updated));
    let _ = writeln!(output);
    let _ = writeln!(output, "## Recently Updated");

    if recent.is_empty() {
        let _ = writeln!(output, "No students found for these batches.");
    } else {
        for entry in recent.iter().take(5) {
            let _ = writeln!(
                output,
                "- {} ({}:{}) updated {}",
                entry.record.full_name,
                entry.record.cohort_type,
                entry.record.cohort_number,
                entry.record.last_updated.format("%Y-%m-%d %H:%M")
            );
        }
    }

    output
}

/// Write the ranked board as CSV, returning the number of data rows.
pub fn write_csv<W: io::Write>(entries: &[RankedEntry], writer: W) -> anyhow::Result<usize> {
    #[derive(serde::Serialize)]
    struct CsvRow<'a> {
        rank: usize,
        enrollment_id: &'a str,
        full_name: &'a str,
        email: &'a str,
        cohort_type: &'a str,
        cohort_number: &'a str,
        xp: i64,
        last_updated: String,
    }

    let mut csv_writer = csv::Writer::from_writer(writer);
    let mut written = 0usize;

    for entry in entries {
        csv_writer.serialize(CsvRow {
            rank: entry.rank,
            enrollment_id: &entry.record.enrollment_id,
            full_name: &entry.record.full_name,
            email: &entry.record.email,
            cohort_type: &entry.record.cohort_type,
            cohort_number: &entry.record.cohort_number,
            xp: entry.record.xp,
            last_updated: entry.record.last_updated.to_rfc3339(),
        })?;
        written += 1;
    }

    csv_writer.flush()?;
    Ok(written)
}

#[cfg(test)]
mod tests {
    use chrono::{TimeZone, Utc};

    use super::*;
    use crate::models::XpRecord;

    fn entry(rank: usize, enrollment_id: &str, name: &str, cohort_number: &str, xp: i64) -> RankedEntry {
        RankedEntry {
            rank,
            record: XpRecord {
                enrollment_id: enrollment_id.to_string(),
                full_name: name.to_string(),
                email: format!("{}@groupscholar.com", enrollment_id),
                cohort_type: "bootcamp".to_string(),
                cohort_number: cohort_number.to_string(),
                xp,
                last_updated: Utc.with_ymd_and_hms(2026, 2, 1, 12, 0, 0).unwrap(),
            },
        }
    }

    #[test]
    fn summaries_accumulate_per_batch() {
        let entries = vec![
            entry(1, "s3", "Kiara Patel", "13", 900),
            entry(2, "s1", "Avery Lee", "12", 500),
            entry(3, "s2", "Jules Moreno", "12", 300),
        ];

        let summaries = summarize_by_batch(&entries);

        assert_eq!(summaries.len(), 2);
        assert_eq!(summaries[0].batch, "bootcamp:12");
        assert_eq!(summaries[0].student_count, 2);
        assert_eq!(summaries[0].total_xp, 800);
        assert!((summaries[0].avg_xp - 400.0).abs() < 0.001);
    }

    #[test]
    fn report_lists_standings_and_batch_mix() {
        let entries = vec![
            entry(1, "s3", "Kiara Patel", "13", 900),
            entry(2, "s1", "Avery Lee", "12", 500),
        ];

        let report = build_report("bootcamp:12, bootcamp:13", &entries);

        assert!(report.contains("# Cohort XP Leaderboard"));
        assert!(report.contains("Generated for bootcamp:12, bootcamp:13"));
        assert!(report.contains("- #1 Kiara Patel"));
        assert!(report.contains("- bootcamp:12: 1 students"));
        assert!(report.contains("## Recently Updated"));
    }

    #[test]
    fn empty_board_still_renders_sections() {
        let report = build_report("bootcamp:12", &[]);
        assert!(report.contains("No students found for these batches."));
    }

    #[test]
    fn csv_export_writes_header_and_rows() {
        let entries = vec![
            entry(1, "s3", "Kiara Patel", "13", 900),
            entry(2, "s1", "Avery Lee", "12", 500),
        ];

        let mut buffer = Vec::new();
        let written = write_csv(&entries, &mut buffer).unwrap();
        let text = String::from_utf8(buffer).unwrap();

        assert_eq!(written, 2);
        let mut lines = text.lines();
        assert_eq!(
            lines.next().unwrap(),
            "rank,enrollment_id,full_name,email,cohort_type,cohort_number,xp,last_updated"
        );
        assert!(lines.next().unwrap().starts_with("1,s3,Kiara Patel"));
    }
}
