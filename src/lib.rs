//! `smsdedup`: remove duplicate messages from SMS/MMS backup XML files.
//!
//! This crate provides the duplicate-detection engine (field normalization,
//! record fingerprinting, two-pass resolution), a streaming XML parser and
//! writer, and the pipeline that ties them together in bounded memory.

pub mod config;
pub mod dedup;
pub mod error;
pub mod export;
pub mod model;
pub mod parser;
pub mod pipeline;
pub mod report;
