//! Core data model types for message records and their fingerprints.

pub mod fingerprint;
pub mod record;
