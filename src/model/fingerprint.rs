//! Fingerprints: the comparison-relevant content of a record.

use std::fmt;
use std::hash::{Hash, Hasher};

use sha2::{Digest, Sha256};

use super::record::RecordKind;

/// Field holding a base64 attachment payload.
pub const DATA_FIELD: &str = "data";

/// Normalized `(field, value)` pairs drawn from a record and all its parts.
///
/// Pairs are kept in iteration order for display, but equality and hashing
/// treat the fingerprint as a set of pairs.
#[derive(Debug, Clone)]
pub struct Fingerprint {
    pairs: Vec<(String, String)>,
}

impl Fingerprint {
    pub fn new(pairs: Vec<(String, String)>) -> Self {
        Self { pairs }
    }

    pub fn pairs(&self) -> &[(String, String)] {
        &self.pairs
    }

    pub fn is_empty(&self) -> bool {
        self.pairs.is_empty()
    }

    /// Whether the record carries attachment payload data.
    pub fn has_data(&self) -> bool {
        self.pairs.iter().any(|(field, _)| field == DATA_FIELD)
    }

    /// The data-stripped form: every pair except attachment payloads.
    pub fn without_data(&self) -> Fingerprint {
        Fingerprint::new(
            self.pairs
                .iter()
                .filter(|(field, _)| field != DATA_FIELD)
                .cloned()
                .collect(),
        )
    }

    fn canonical(&self) -> Vec<&(String, String)> {
        let mut sorted: Vec<&(String, String)> = self.pairs.iter().collect();
        sorted.sort();
        sorted.dedup();
        sorted
    }

    /// SHA-256 over the canonical (sorted, deduplicated, length-framed) pairs.
    ///
    /// Used as the bookkeeping key so that memory per kept record does not
    /// depend on attachment size.
    pub fn key(&self) -> FingerprintKey {
        let mut hasher = Sha256::new();
        for (field, value) in self.canonical() {
            hasher.update((field.len() as u64).to_le_bytes());
            hasher.update(field.as_bytes());
            hasher.update((value.len() as u64).to_le_bytes());
            hasher.update(value.as_bytes());
        }
        FingerprintKey(hasher.finalize().into())
    }
}

impl PartialEq for Fingerprint {
    fn eq(&self, other: &Self) -> bool {
        self.canonical() == other.canonical()
    }
}

impl Eq for Fingerprint {}

impl Hash for Fingerprint {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.canonical().hash(state);
    }
}

/// Digest of a [`Fingerprint`]; equal fingerprints have equal keys.
#[derive(Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct FingerprintKey([u8; 32]);

impl fmt::Debug for FingerprintKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for b in &self.0[..8] {
            write!(f, "{b:02x}")?;
        }
        Ok(())
    }
}

/// Partition of the resolver state. Records only match within a bucket.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum Bucket {
    Kind(RecordKind),
    /// Aggressive mode: every kind shares one bucket.
    Any,
}

impl fmt::Display for Bucket {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Bucket::Kind(kind) => write!(f, "{kind}"),
            Bucket::Any => f.write_str("sms or mms"),
        }
    }
}

impl serde::Serialize for Bucket {
    fn serialize<S: serde::Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.collect_str(self)
    }
}
