//! Record fingerprinting.
//!
//! A fingerprint covers the record element and every descendant part and
//! address element. Comparing only the top-level attributes would treat two
//! MMS with different attachments as equal.

use crate::config::MatchConfig;
use crate::error::{DedupError, Result};
use crate::model::fingerprint::{Bucket, Fingerprint};
use crate::model::record::{Element, Record, RecordKind};
use crate::report::RecordDescription;

use super::normalize::{classify_markup, normalize, Markup};

/// Fields compared by default.
pub const RELEVANT_FIELDS: [&str; 8] = [
    "date", "address", "body", "text", "subject", "m_type", "type", "data",
];

/// Fields compared in aggressive mode.
pub const AGGRESSIVE_RELEVANT_FIELDS: [&str; 4] = ["date", "body", "text", "data"];

/// SMS keep their text in `body`, MMS parts in `text`. Aggressive mode
/// compares both under this name.
const UNIFIED_TEXT_FIELD: &str = "text";

/// Computes fingerprints and buckets under one immutable configuration.
#[derive(Debug, Clone)]
pub struct Fingerprinter {
    config: MatchConfig,
}

impl Fingerprinter {
    pub fn new(config: MatchConfig) -> Self {
        Self { config }
    }

    /// Resolver partition for a record kind.
    pub fn bucket(&self, kind: RecordKind) -> Bucket {
        if self.config.aggressive {
            Bucket::Any
        } else {
            Bucket::Kind(kind)
        }
    }

    /// Fingerprint a record and all of its parts.
    ///
    /// `relax` disables every normalization except address canonicalization,
    /// always uses the full field set and never merges `body` into `text`.
    /// It is meant for describing records to the operator, not for matching.
    pub fn fingerprint(&self, record: &Record, relax: bool) -> Result<Fingerprint> {
        let aggressive = self.config.aggressive && !relax;
        let fields: &[&str] = if aggressive {
            &AGGRESSIVE_RELEVANT_FIELDS
        } else {
            &RELEVANT_FIELDS
        };

        let mut pairs = Vec::new();
        for flat in record.flatten() {
            if !fields.contains(&flat.field) {
                continue;
            }
            if classify_markup(flat.value)? == Markup::Opaque {
                continue;
            }
            let name = if aggressive && flat.field == "body" {
                UNIFIED_TEXT_FIELD
            } else {
                flat.field
            };
            let value = normalize(flat.field, flat.value, &self.config, relax);
            pairs.push((name.to_string(), value));
        }

        if pairs.is_empty() {
            return Err(DedupError::EmptyFingerprint(render_element(&record.element)));
        }
        Ok(Fingerprint::new(pairs))
    }

    /// Log-ready description of a record built from its relaxed fingerprint.
    pub fn describe(&self, record: &Record, field_length_limit: usize) -> Result<RecordDescription> {
        let relaxed = self.fingerprint(record, true)?;
        Ok(RecordDescription::from_fingerprint(
            record.kind.tag(),
            &relaxed,
            field_length_limit,
        ))
    }
}

/// Compact one-line rendering of an element tree for error messages.
fn render_element(element: &Element) -> String {
    let mut out = format!("<{}", element.tag);
    for (name, value) in &element.attributes {
        out.push_str(&format!(" {name}={value:?}"));
    }
    if element.children.is_empty() {
        out.push_str("/>");
    } else {
        out.push('>');
        for child in &element.children {
            out.push_str(&render_element(child));
        }
        out.push_str(&format!("</{}>", element.tag));
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sms(date: &str, address: &str, body: &str) -> Record {
        Record::new(
            RecordKind::Sms,
            Element::new("sms")
                .with_attr("protocol", "0")
                .with_attr("address", address)
                .with_attr("date", date)
                .with_attr("type", "1")
                .with_attr("subject", "null")
                .with_attr("body", body)
                .with_attr("_id", "17"),
        )
    }

    fn mms(date: &str, text: &str, data: Option<&str>) -> Record {
        let mut parts = Element::new("parts").with_child(
            Element::new("part")
                .with_attr("ct", "application/smil")
                .with_attr("text", "<smil><body><par/></body></smil>"),
        );
        parts = parts.with_child(
            Element::new("part")
                .with_attr("ct", "text/plain")
                .with_attr("text", text),
        );
        if let Some(data) = data {
            parts = parts.with_child(
                Element::new("part")
                    .with_attr("ct", "image/jpeg")
                    .with_attr("data", data),
            );
        }
        Record::new(
            RecordKind::Mms,
            Element::new("mms")
                .with_attr("date", date)
                .with_attr("address", "5550001~+15550002")
                .with_attr("m_type", "132")
                .with_child(parts),
        )
    }

    fn pair_names(fp: &Fingerprint) -> Vec<&str> {
        fp.pairs().iter().map(|(f, _)| f.as_str()).collect()
    }

    #[test]
    fn test_fingerprint_skips_irrelevant_and_null_fields() {
        let fp = Fingerprinter::new(MatchConfig::default())
            .fingerprint(&sms("1", "5550001", "hi"), false)
            .unwrap();
        assert_eq!(pair_names(&fp), vec!["address", "date", "type", "body"]);
        assert!(fp.pairs().contains(&("address".into(), "+15550001".into())));
    }

    #[test]
    fn test_fingerprint_includes_parts_and_drops_smil() {
        let fp = Fingerprinter::new(MatchConfig::default())
            .fingerprint(&mms("1", "hello", Some("QUJD")), false)
            .unwrap();
        assert_eq!(
            pair_names(&fp),
            vec!["date", "address", "m_type", "text", "data"]
        );
        assert!(fp.has_data());
        assert!(!fp.pairs().iter().any(|(_, v)| v.contains("smil")));
    }

    #[test]
    fn test_parts_distinguish_records() {
        let f = Fingerprinter::new(MatchConfig::default());
        let a = f.fingerprint(&mms("1", "hello", None), false).unwrap();
        let b = f.fingerprint(&mms("1", "goodbye", None), false).unwrap();
        assert_ne!(a, b);
    }

    #[test]
    fn test_aggressive_unifies_body_and_text() {
        let f = Fingerprinter::new(MatchConfig {
            aggressive: true,
            ..MatchConfig::default()
        });
        let s = f.fingerprint(&sms("1690000000000", "5550001", "hello"), false).unwrap();
        let m = f.fingerprint(&mms("1690000000000", "hello", None), false).unwrap();
        assert_eq!(s, m);
        assert_eq!(f.bucket(RecordKind::Sms), f.bucket(RecordKind::Mms));
    }

    #[test]
    fn test_aggressive_matches_mms_with_repeated_text_parts() {
        let f = Fingerprinter::new(MatchConfig {
            aggressive: true,
            ..MatchConfig::default()
        });
        let mms = Record::new(
            RecordKind::Mms,
            Element::new("mms").with_attr("date", "1").with_child(
                Element::new("parts")
                    .with_child(Element::new("part").with_attr("text", "hi"))
                    .with_child(Element::new("part").with_attr("text", "hi")),
            ),
        );
        let s = f.fingerprint(&sms("1", "5550001", "hi"), false).unwrap();
        let m = f.fingerprint(&mms, false).unwrap();
        assert_eq!(s, m);
        assert_eq!(s.key(), m.key());
    }

    #[test]
    fn test_relaxed_fingerprint_keeps_raw_values() {
        let f = Fingerprinter::new(MatchConfig {
            aggressive: true,
            ignore_date_milliseconds: true,
            ignore_whitespace_differences: true,
            ..MatchConfig::default()
        });
        let fp = f.fingerprint(&sms("1690000000123", "5550001", "a  b"), true).unwrap();
        assert!(fp.pairs().contains(&("date".into(), "1690000000123".into())));
        assert!(fp.pairs().contains(&("body".into(), "a  b".into())));
        assert!(fp.pairs().contains(&("address".into(), "+15550001".into())));
    }

    #[test]
    fn test_empty_fingerprint_is_error() {
        let record = Record::new(
            RecordKind::Sms,
            Element::new("sms").with_attr("body", "null").with_attr("read", "1"),
        );
        let err = Fingerprinter::new(MatchConfig::default())
            .fingerprint(&record, false)
            .unwrap_err();
        match err {
            DedupError::EmptyFingerprint(rendered) => assert!(rendered.contains("read=\"1\"")),
            other => panic!("expected EmptyFingerprint, got {other:?}"),
        }
    }

    #[test]
    fn test_unknown_smil_variant_propagates() {
        let record = Record::new(
            RecordKind::Sms,
            Element::new("sms").with_attr("body", "see <smil>x</smil> trailing"),
        );
        let err = Fingerprinter::new(MatchConfig::default())
            .fingerprint(&record, false)
            .unwrap_err();
        assert!(matches!(err, DedupError::UnknownSmilVariant(_)));
    }
}
