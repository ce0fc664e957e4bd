//! Duplicate detection: field normalization, fingerprinting and the
//! two-pass resolver.

pub mod fingerprinter;
pub mod normalize;
pub mod resolver;

pub use fingerprinter::Fingerprinter;
pub use resolver::{DuplicateReason, Observation, Resolver, Verdict};
