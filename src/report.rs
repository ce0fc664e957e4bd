//! Run statistics, removal log entries and the console summary table.

use std::collections::{BTreeMap, BTreeSet};

use chrono::{DateTime, Utc};
use serde::Serialize;

use crate::dedup::fingerprinter::RELEVANT_FIELDS;
use crate::error::{DedupError, Result};
use crate::model::fingerprint::{Bucket, Fingerprint};

/// Width of every column in the summary table.
const COLUMN_WIDTH: usize = 20;

/// Operator-facing rendering of one record, built from its relaxed
/// fingerprint. Small enough to keep for every kept record.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RecordDescription {
    pub tag: String,
    /// `(field, "v1 | v2")` in [`RELEVANT_FIELDS`] order, absent fields omitted.
    pub fields: Vec<(&'static str, String)>,
}

impl RecordDescription {
    /// Collect the distinct values of each relevant field. Values of
    /// `field_length_limit` characters or more are replaced by a placeholder.
    pub fn from_fingerprint(tag: &str, fingerprint: &Fingerprint, field_length_limit: usize) -> Self {
        let mut fields = Vec::new();
        for field in RELEVANT_FIELDS {
            let values: BTreeSet<String> = fingerprint
                .pairs()
                .iter()
                .filter(|(name, _)| name == field)
                .map(|(_, value)| render_value(field, value, field_length_limit))
                .collect();
            if !values.is_empty() {
                fields.push((field, values.into_iter().collect::<Vec<_>>().join(" | ")));
            }
        }
        Self {
            tag: tag.to_string(),
            fields,
        }
    }
}

fn render_value(field: &str, value: &str, field_length_limit: usize) -> String {
    let length = value.chars().count();
    if length >= field_length_limit {
        return format!("<LENGTH {length} OMISSION>");
    }
    if field == "date" {
        if let Some(when) = value.parse::<i64>().ok().and_then(DateTime::<Utc>::from_timestamp_millis) {
            return format!("{value} ({})", when.format("%Y-%m-%d %H:%M:%S%.3f UTC"));
        }
    }
    value.to_string()
}

/// Two-part removal log entry: the removed record, then the record kept in
/// its place.
pub fn removal_entry(removed: &RecordDescription, kept: &RecordDescription) -> String {
    let mut lines = Vec::new();
    for (intro, description) in [
        (format!("Removing {}:", removed.tag), removed),
        (format!("\nIn favor of keeping {}:", kept.tag), kept),
    ] {
        lines.push(intro);
        for (field, values) in &description.fields {
            lines.push(format!("{field:>8}: {values}"));
        }
    }
    lines.join("\n") + "\n\n"
}

/// Counts for one resolver bucket.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct KindCounts {
    /// Records read.
    pub seen: u64,
    /// Records removed, for any reason.
    pub removed: u64,
    /// Of `removed`, those that only lacked the attachment of a kept record.
    pub removed_missing_attachment: u64,
    /// Records written to the output.
    pub kept: u64,
}

/// Per-bucket counts for a whole run.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct DedupStats {
    pub buckets: BTreeMap<Bucket, KindCounts>,
}

impl DedupStats {
    pub fn total(&self) -> KindCounts {
        self.buckets
            .values()
            .fold(KindCounts::default(), |acc, c| KindCounts {
                seen: acc.seen + c.seen,
                removed: acc.removed + c.removed,
                removed_missing_attachment: acc.removed_missing_attachment
                    + c.removed_missing_attachment,
                kept: acc.kept + c.kept,
            })
    }

    /// `seen − removed == kept`, per bucket and in total.
    pub fn verify_counts(&self) -> Result<()> {
        for (bucket, counts) in self
            .buckets
            .iter()
            .map(|(b, c)| (b.to_string(), *c))
            .chain(std::iter::once(("total".to_string(), self.total())))
        {
            if counts.seen.checked_sub(counts.removed) != Some(counts.kept) {
                return Err(DedupError::Inconsistent(format!(
                    "removed {} of {} '{bucket}' messages, but ended up with {}",
                    counts.removed, counts.seen, counts.kept
                )));
            }
        }
        Ok(())
    }

    /// Every bucket present on input keeps at least one record.
    pub fn verify_no_kind_loss(&self) -> Result<()> {
        match self
            .buckets
            .iter()
            .find(|(_, counts)| counts.seen > 0 && counts.kept == 0)
        {
            Some((bucket, _)) => Err(DedupError::KindLost(bucket.to_string())),
            None => Ok(()),
        }
    }
}

/// Fixed-width summary table, one row per bucket.
pub fn summary_table(stats: &DedupStats) -> String {
    let row = |cells: [String; 4]| {
        cells
            .iter()
            .map(|c| format!("{c:^width$}", width = COLUMN_WIDTH))
            .collect::<Vec<_>>()
            .join("|")
    };

    let mut out = vec![
        "Deduplication Summary:".to_string(),
        row([
            "Message Type".into(),
            "Original Count".into(),
            "Removed".into(),
            "Deduplicated Count".into(),
        ]),
    ];
    for (bucket, counts) in &stats.buckets {
        out.push(row([
            bucket.to_string(),
            counts.seen.to_string(),
            counts.removed.to_string(),
            counts.kept.to_string(),
        ]));
    }
    out.join("\n")
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::record::RecordKind;

    fn fp(pairs: &[(&str, &str)]) -> Fingerprint {
        Fingerprint::new(
            pairs
                .iter()
                .map(|(f, v)| (f.to_string(), v.to_string()))
                .collect(),
        )
    }

    #[test]
    fn test_description_orders_fields_and_merges_values() {
        let d = RecordDescription::from_fingerprint(
            "mms",
            &fp(&[("text", "b"), ("address", "+1555"), ("text", "a"), ("text", "a")]),
            1000,
        );
        assert_eq!(
            d.fields,
            vec![("address", "+1555".to_string()), ("text", "a | b".to_string())]
        );
    }

    #[test]
    fn test_description_omits_long_values() {
        let payload = "A".repeat(1500);
        let d = RecordDescription::from_fingerprint("mms", &fp(&[("data", payload.as_str())]), 1000);
        assert_eq!(d.fields, vec![("data", "<LENGTH 1500 OMISSION>".to_string())]);
    }

    #[test]
    fn test_description_annotates_dates() {
        let d = RecordDescription::from_fingerprint("sms", &fp(&[("date", "1690000000123")]), 1000);
        assert_eq!(
            d.fields[0].1,
            "1690000000123 (2023-07-22 04:26:40.123 UTC)"
        );
    }

    #[test]
    fn test_removal_entry_layout() {
        let removed = RecordDescription {
            tag: "sms".into(),
            fields: vec![("body", "hi".into())],
        };
        let kept = RecordDescription {
            tag: "sms".into(),
            fields: vec![("address", "+1555".into())],
        };
        assert_eq!(
            removal_entry(&removed, &kept),
            "Removing sms:\n    body: hi\n\nIn favor of keeping sms:\n address: +1555\n\n"
        );
    }

    #[test]
    fn test_verify_counts() {
        let mut stats = DedupStats::default();
        stats.buckets.insert(
            Bucket::Kind(RecordKind::Sms),
            KindCounts {
                seen: 4,
                removed: 3,
                removed_missing_attachment: 0,
                kept: 1,
            },
        );
        assert!(stats.verify_counts().is_ok());

        stats.buckets.insert(
            Bucket::Kind(RecordKind::Mms),
            KindCounts {
                seen: 2,
                removed: 0,
                removed_missing_attachment: 0,
                kept: 1,
            },
        );
        assert!(matches!(
            stats.verify_counts(),
            Err(DedupError::Inconsistent(_))
        ));
    }

    #[test]
    fn test_verify_no_kind_loss() {
        let mut stats = DedupStats::default();
        stats.buckets.insert(
            Bucket::Kind(RecordKind::Mms),
            KindCounts {
                seen: 2,
                removed: 2,
                removed_missing_attachment: 1,
                kept: 0,
            },
        );
        match stats.verify_no_kind_loss() {
            Err(DedupError::KindLost(kind)) => assert_eq!(kind, "mms"),
            other => panic!("expected KindLost, got {other:?}"),
        }
    }

    #[test]
    fn test_summary_table() {
        let mut stats = DedupStats::default();
        stats.buckets.insert(
            Bucket::Kind(RecordKind::Sms),
            KindCounts {
                seen: 10,
                removed: 4,
                removed_missing_attachment: 0,
                kept: 6,
            },
        );
        let table = summary_table(&stats);
        let lines: Vec<&str> = table.lines().collect();
        assert_eq!(lines.len(), 3);
        assert_eq!(lines[1].split('|').count(), 4);
        assert!(lines[1].contains("  Original Count  "));
        assert_eq!(lines[2].len(), 4 * COLUMN_WIDTH + 3);
        assert_eq!(lines[2].split('|').next().unwrap().trim(), "sms");
    }
}
