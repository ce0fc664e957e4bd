//! Input parsing: streaming reader for SMS backup XML documents.

pub mod backup;
