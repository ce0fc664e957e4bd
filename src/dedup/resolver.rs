//! Duplicate resolution.
//!
//! The resolver sees the same ordered record stream twice:
//!
//! 1. [`Resolver::observe`] records the first-seen record for every
//!    fingerprint, plus the data-stripped form of every kept record that
//!    carries an attachment.
//! 2. [`Resolver::resolve`] classifies each record: exact duplicates of an
//!    earlier record, kept records that are only an earlier or later kept
//!    record minus its attachment, and everything else (kept).
//!
//! Running the attachment fallback after the whole stream has been observed
//! means a record with its attachment is never removed in favor of one
//! without, whichever comes first.
//!
//! Bookkeeping is keyed by [`FingerprintKey`] digests and grows with the
//! number of kept records only.

use std::collections::{BTreeMap, HashMap};

use tracing::{debug, trace};

use crate::error::{DedupError, Result};
use crate::model::fingerprint::{Bucket, FingerprintKey};
use crate::model::record::Record;
use crate::report::{DedupStats, KindCounts, RecordDescription};

use super::fingerprinter::Fingerprinter;

/// Why a record was removed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DuplicateReason {
    /// Same fingerprint as an earlier record.
    Exact,
    /// Same fingerprint as a kept record's fingerprint minus its attachment.
    MissingAttachment,
}

/// First-pass result for one record.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Observation {
    /// First record with this fingerprint.
    New,
    /// Fingerprint already seen.
    Repeat,
}

/// Second-pass result for one record.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Verdict {
    Keep,
    Duplicate {
        reason: DuplicateReason,
        removed: RecordDescription,
        kept: RecordDescription,
    },
}

#[derive(Debug)]
struct KeptRecord {
    ordinal: u64,
    has_data: bool,
    description: RecordDescription,
}

#[derive(Debug, Default)]
struct BucketState {
    kept: HashMap<FingerprintKey, KeptRecord>,
    /// Data-stripped key → full key of the kept record it came from.
    stripped: HashMap<FingerprintKey, FingerprintKey>,
    observed: u64,
    counts: KindCounts,
}

impl BucketState {
    /// The record that finally survives for `key`: the kept record itself,
    /// unless that record is going to lose to a data-bearing one.
    fn survivor(&self, key: FingerprintKey) -> FingerprintKey {
        match self.kept.get(&key) {
            Some(kept) if !kept.has_data => self.stripped.get(&key).copied().unwrap_or(key),
            _ => key,
        }
    }
}

/// Two-pass duplicate resolver. Holds all run-wide counters.
#[derive(Debug)]
pub struct Resolver {
    fingerprinter: Fingerprinter,
    field_length_limit: usize,
    buckets: BTreeMap<Bucket, BucketState>,
    observed: u64,
    resolved: u64,
}

impl Resolver {
    pub fn new(fingerprinter: Fingerprinter, field_length_limit: usize) -> Self {
        Self {
            fingerprinter,
            field_length_limit,
            buckets: BTreeMap::new(),
            observed: 0,
            resolved: 0,
        }
    }

    /// Number of distinct fingerprints kept so far.
    pub fn kept_fingerprints(&self) -> usize {
        self.buckets.values().map(|s| s.kept.len()).sum()
    }

    /// First pass: register a record in input order.
    pub fn observe(&mut self, record: &Record) -> Result<Observation> {
        let bucket = self.fingerprinter.bucket(record.kind);
        let fingerprint = self.fingerprinter.fingerprint(record, false)?;
        let key = fingerprint.key();
        let ordinal = self.observed;
        self.observed += 1;

        let state = self.buckets.entry(bucket).or_default();
        state.observed += 1;

        if state.kept.contains_key(&key) {
            trace!(ordinal, ?key, %bucket, "Repeated fingerprint");
            return Ok(Observation::Repeat);
        }

        let has_data = fingerprint.has_data();
        if has_data {
            // First registration wins, like every other kept entry.
            state
                .stripped
                .entry(fingerprint.without_data().key())
                .or_insert(key);
        }
        let description = self
            .fingerprinter
            .describe(record, self.field_length_limit)?;
        state.kept.insert(
            key,
            KeptRecord {
                ordinal,
                has_data,
                description,
            },
        );
        Ok(Observation::New)
    }

    /// Second pass: classify a record. Must see exactly the records given to
    /// [`observe`](Self::observe), in the same order.
    pub fn resolve(&mut self, record: &Record) -> Result<Verdict> {
        let bucket = self.fingerprinter.bucket(record.kind);
        let fingerprint = self.fingerprinter.fingerprint(record, false)?;
        let key = fingerprint.key();
        let ordinal = self.resolved;
        self.resolved += 1;

        let state = self.buckets.get_mut(&bucket).ok_or_else(|| {
            DedupError::Inconsistent(format!(
                "record #{ordinal} belongs to bucket '{bucket}' which the first pass never saw"
            ))
        })?;
        state.counts.seen += 1;

        let kept = state.kept.get(&key).ok_or_else(|| {
            DedupError::Inconsistent(format!(
                "record #{ordinal} has a fingerprint the first pass never saw; did the input change?"
            ))
        })?;

        let (reason, survivor) = if kept.ordinal != ordinal {
            (DuplicateReason::Exact, state.survivor(key))
        } else if let Some(full) = state.stripped.get(&key).filter(|_| !kept.has_data) {
            (DuplicateReason::MissingAttachment, *full)
        } else {
            state.counts.kept += 1;
            return Ok(Verdict::Keep);
        };

        state.counts.removed += 1;
        if reason == DuplicateReason::MissingAttachment {
            state.counts.removed_missing_attachment += 1;
        }
        let kept = state
            .kept
            .get(&survivor)
            .map(|k| k.description.clone())
            .ok_or_else(|| {
                DedupError::Inconsistent(format!(
                    "record #{ordinal} matched a kept fingerprint that is not recorded"
                ))
            })?;
        debug!(ordinal, ?reason, %bucket, "Removing duplicate");

        let removed = self
            .fingerprinter
            .describe(record, self.field_length_limit)?;
        Ok(Verdict::Duplicate {
            reason,
            removed,
            kept,
        })
    }

    /// Check the bookkeeping and return the run statistics.
    ///
    /// Fails if the two passes disagree, or if `seen − removed != kept` for
    /// any bucket or in total.
    pub fn finish(self) -> Result<DedupStats> {
        if self.observed != self.resolved {
            return Err(DedupError::Inconsistent(format!(
                "first pass saw {} messages, second pass saw {}",
                self.observed, self.resolved
            )));
        }

        let mut stats = DedupStats::default();
        for (bucket, state) in self.buckets {
            if state.observed != state.counts.seen {
                return Err(DedupError::Inconsistent(format!(
                    "first pass saw {} '{bucket}' messages, second pass saw {}",
                    state.observed, state.counts.seen
                )));
            }
            let unique = state.kept.len() as u64 - state.counts.removed_missing_attachment;
            if unique != state.counts.kept {
                return Err(DedupError::Inconsistent(format!(
                    "{unique} unique '{bucket}' fingerprints but {} messages kept",
                    state.counts.kept
                )));
            }
            stats.buckets.insert(bucket, state.counts);
        }
        stats.verify_counts()?;
        Ok(stats)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::MatchConfig;
    use crate::model::record::{Element, RecordKind};

    fn sms(date: &str, address: &str, body: &str) -> Record {
        Record::new(
            RecordKind::Sms,
            Element::new("sms")
                .with_attr("address", address)
                .with_attr("date", date)
                .with_attr("type", "1")
                .with_attr("body", body),
        )
    }

    fn mms(date: &str, text: &str, data: Option<&str>) -> Record {
        let mut part = Element::new("part").with_attr("ct", "image/png");
        if let Some(data) = data {
            part = part.with_attr("data", data);
        }
        Record::new(
            RecordKind::Mms,
            Element::new("mms")
                .with_attr("date", date)
                .with_attr("address", "+15550001")
                .with_child(
                    Element::new("parts")
                        .with_child(Element::new("part").with_attr("text", text))
                        .with_child(part),
                ),
        )
    }

    fn run(config: MatchConfig, records: &[Record]) -> (Vec<Verdict>, DedupStats) {
        let mut resolver = Resolver::new(Fingerprinter::new(config), 1000);
        for r in records {
            resolver.observe(r).unwrap();
        }
        let verdicts = records.iter().map(|r| resolver.resolve(r).unwrap()).collect();
        (verdicts, resolver.finish().unwrap())
    }

    fn kept_flags(verdicts: &[Verdict]) -> Vec<bool> {
        verdicts.iter().map(|v| *v == Verdict::Keep).collect()
    }

    #[test]
    fn test_first_seen_wins() {
        let records = vec![
            sms("1", "+1555", "hi"),
            sms("2", "+1555", "other"),
            sms("1", "+1555", "hi"),
            sms("1", "+1555", "hi"),
        ];
        let (verdicts, stats) = run(MatchConfig::default(), &records);
        assert_eq!(kept_flags(&verdicts), vec![true, true, false, false]);
        let counts = stats.buckets[&Bucket::Kind(RecordKind::Sms)];
        assert_eq!((counts.seen, counts.removed, counts.kept), (4, 2, 2));
        match &verdicts[2] {
            Verdict::Duplicate { reason, kept, .. } => {
                assert_eq!(*reason, DuplicateReason::Exact);
                assert!(kept.fields.iter().any(|(f, v)| *f == "body" && v == "hi"));
            }
            Verdict::Keep => panic!("expected duplicate"),
        }
    }

    #[test]
    fn test_missing_attachment_after_data_bearing() {
        let records = vec![mms("1", "pic", Some("QUJD")), mms("1", "pic", None)];
        let (verdicts, stats) = run(MatchConfig::default(), &records);
        assert_eq!(kept_flags(&verdicts), vec![true, false]);
        match &verdicts[1] {
            Verdict::Duplicate { reason, kept, removed } => {
                assert_eq!(*reason, DuplicateReason::MissingAttachment);
                assert!(kept.fields.iter().any(|(f, _)| *f == "data"));
                assert!(!removed.fields.iter().any(|(f, _)| *f == "data"));
            }
            Verdict::Keep => panic!("expected duplicate"),
        }
        let counts = stats.buckets[&Bucket::Kind(RecordKind::Mms)];
        assert_eq!(counts.removed_missing_attachment, 1);
    }

    #[test]
    fn test_data_bearing_record_survives_when_later() {
        let records = vec![
            mms("1", "pic", None),
            mms("1", "pic", None),
            mms("1", "pic", Some("QUJD")),
        ];
        let (verdicts, stats) = run(MatchConfig::default(), &records);
        assert_eq!(kept_flags(&verdicts), vec![false, false, true]);
        // The exact duplicate is logged against the final survivor.
        for verdict in &verdicts[..2] {
            match verdict {
                Verdict::Duplicate { kept, .. } => {
                    assert!(kept.fields.iter().any(|(f, _)| *f == "data"))
                }
                Verdict::Keep => panic!("expected duplicate"),
            }
        }
        let counts = stats.buckets[&Bucket::Kind(RecordKind::Mms)];
        assert_eq!((counts.seen, counts.removed, counts.kept), (3, 2, 1));
    }

    #[test]
    fn test_different_attachments_are_distinct() {
        let records = vec![mms("1", "pic", Some("QUJD")), mms("1", "pic", Some("REVG"))];
        let (verdicts, _) = run(MatchConfig::default(), &records);
        assert_eq!(kept_flags(&verdicts), vec![true, true]);
    }

    #[test]
    fn test_kinds_do_not_match_unless_aggressive() {
        let records = vec![
            sms("1690000000000", "+1555", "hello"),
            Record::new(
                RecordKind::Mms,
                Element::new("mms")
                    .with_attr("date", "1690000000000")
                    .with_attr("address", "+1999")
                    .with_child(Element::new("part").with_attr("text", "hello")),
            ),
        ];
        let (verdicts, stats) = run(MatchConfig::default(), &records);
        assert_eq!(kept_flags(&verdicts), vec![true, true]);
        assert_eq!(stats.buckets.len(), 2);

        let aggressive = MatchConfig {
            aggressive: true,
            ..MatchConfig::default()
        };
        let (verdicts, stats) = run(aggressive, &records);
        assert_eq!(kept_flags(&verdicts), vec![true, false]);
        assert_eq!(stats.buckets.keys().collect::<Vec<_>>(), vec![&Bucket::Any]);
    }

    #[test]
    fn test_mismatched_second_pass_is_inconsistent() {
        let mut resolver = Resolver::new(Fingerprinter::new(MatchConfig::default()), 1000);
        resolver.observe(&sms("1", "+1555", "hi")).unwrap();
        let err = resolver.resolve(&sms("2", "+1555", "changed")).unwrap_err();
        assert!(matches!(err, DedupError::Inconsistent(_)));
    }

    #[test]
    fn test_finish_requires_both_passes() {
        let mut resolver = Resolver::new(Fingerprinter::new(MatchConfig::default()), 1000);
        resolver.observe(&sms("1", "+1555", "hi")).unwrap();
        assert!(matches!(
            resolver.finish(),
            Err(DedupError::Inconsistent(_))
        ));
    }

    #[test]
    fn test_observe_reports_repeats() {
        let mut resolver = Resolver::new(Fingerprinter::new(MatchConfig::default()), 1000);
        assert_eq!(resolver.observe(&sms("1", "5", "a")).unwrap(), Observation::New);
        assert_eq!(resolver.observe(&sms("1", "+15", "a")).unwrap(), Observation::Repeat);
        assert_eq!(resolver.kept_fingerprints(), 1);
    }
}
