//! Streaming deduplication run over one or more backup files.
//!
//! Two sequential passes over the inputs, in the order given:
//!
//! 1. Every record is observed by the [`Resolver`]; only fingerprint digests
//!    and short descriptions of kept records stay in memory.
//! 2. Every record is resolved again; kept records are spooled to a
//!    temporary file with fresh identifiers, removed records produce one
//!    removal log entry each.
//!
//! Nothing is persisted until the bookkeeping has been verified. The log and
//! output document are written to temporary files next to their final paths
//! and renamed into place at the very end.

use std::fs::File;
use std::io::{BufWriter, Seek, SeekFrom, Write};
use std::path::{Path, PathBuf};
use std::time::Instant;

use tempfile::NamedTempFile;
use tracing::{debug, info};

use crate::config::Config;
use crate::dedup::{Fingerprinter, Resolver, Verdict};
use crate::error::{DedupError, Result};
use crate::export::xml::{write_document, RecordWriter};
use crate::model::record::Container;
use crate::parser::backup::BackupParser;
use crate::report::{removal_entry, DedupStats};

/// Where a run reads from and writes to.
#[derive(Debug, Clone)]
pub struct RunPaths {
    /// Input documents, processed in this order.
    pub inputs: Vec<PathBuf>,
    /// Deduplicated document (only written if something was removed).
    pub output: PathBuf,
    /// Removal log.
    pub log: PathBuf,
}

/// Whether an output document was produced.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum OutputStatus {
    Written(PathBuf),
    /// Nothing was removed, so no output document was written.
    NoDuplicates,
}

/// Result of a successful run.
#[derive(Debug, Clone)]
pub struct RunOutcome {
    pub stats: DedupStats,
    pub output: OutputStatus,
    pub log: PathBuf,
}

/// Deduplicate `paths.inputs` into `paths.output`.
///
/// `progress` receives `(bytes_processed, total_bytes)` across both passes.
pub fn run(
    paths: &RunPaths,
    config: &Config,
    progress: Option<&dyn Fn(u64, u64)>,
) -> Result<RunOutcome> {
    if paths.inputs.is_empty() {
        return Err(DedupError::Config("at least one input file is required".into()));
    }

    let parsers = paths
        .inputs
        .iter()
        .map(|p| {
            BackupParser::new(p).map(|b| b.with_buffer_size(config.performance.read_buffer_size))
        })
        .collect::<Result<Vec<_>>>()?;
    let total_bytes: u64 = parsers.iter().map(|p| p.file_size()).sum::<u64>() * 2;
    let mut done_bytes: u64 = 0;

    let mut resolver = Resolver::new(
        Fingerprinter::new(config.matching.clone()),
        config.log.field_length_limit,
    );

    // ── Pass 1: observe ─────────────────────────────────────────
    let start = Instant::now();
    for parser in &parsers {
        let offset = done_bytes;
        let file_progress = |current: u64, _total: u64| {
            if let Some(cb) = progress {
                cb(offset + current, total_bytes);
            }
        };
        let outcome = parser.parse(
            &mut |record| resolver.observe(&record).map(|_| ()),
            Some(&file_progress),
        )?;
        debug!(
            path = %parser.path().display(),
            records = outcome.records,
            "Scanned input"
        );
        done_bytes += parser.file_size();
    }
    info!(
        unique = resolver.kept_fingerprints(),
        elapsed = ?start.elapsed(),
        "Fingerprinting complete"
    );

    // ── Pass 2: resolve and spool ───────────────────────────────
    let start = Instant::now();
    let log_tmp = NamedTempFile::new_in(parent_dir(&paths.log))
        .map_err(|e| DedupError::io(&paths.log, e))?;
    let mut log = BufWriter::new(log_tmp);
    let spool = tempfile::tempfile().map_err(|e| DedupError::io(&paths.output, e))?;
    let mut records = RecordWriter::new(BufWriter::new(spool), &paths.output);
    let mut container: Option<Container> = None;

    for parser in &parsers {
        let offset = done_bytes;
        let file_progress = |current: u64, _total: u64| {
            if let Some(cb) = progress {
                cb(offset + current, total_bytes);
            }
        };
        let outcome = parser.parse(
            &mut |record| match resolver.resolve(&record)? {
                Verdict::Keep => records.write_record(&record),
                Verdict::Duplicate { removed, kept, .. } => log
                    .write_all(removal_entry(&removed, &kept).as_bytes())
                    .map_err(|e| DedupError::io(&paths.log, e)),
            },
            Some(&file_progress),
        )?;
        container.get_or_insert(outcome.container);
        done_bytes += parser.file_size();
    }
    info!(elapsed = ?start.elapsed(), "Resolution complete");

    // ── Verify before anything is persisted ─────────────────────
    let stats = resolver.finish()?;
    stats.verify_no_kind_loss()?;
    let total = stats.total();
    if records.records_written() != total.kept {
        return Err(DedupError::Inconsistent(format!(
            "{} messages kept but {} written",
            total.kept,
            records.records_written()
        )));
    }
    let container = container.ok_or_else(|| DedupError::MissingContainer(paths.inputs[0].clone()))?;

    let log_tmp = log
        .into_inner()
        .map_err(|e| DedupError::io(&paths.log, e.into_error()))?;
    log_tmp
        .persist(&paths.log)
        .map_err(|e| DedupError::io(&paths.log, e.error))?;

    if total.removed == 0 {
        info!("No duplicates found; not writing output");
        return Ok(RunOutcome {
            stats,
            output: OutputStatus::NoDuplicates,
            log: paths.log.clone(),
        });
    }

    let mut spool: File = records
        .into_inner()
        .into_inner()
        .map_err(|e| DedupError::io(&paths.output, e.into_error()))?;
    spool
        .seek(SeekFrom::Start(0))
        .map_err(|e| DedupError::io(&paths.output, e))?;

    let out_tmp = NamedTempFile::new_in(parent_dir(&paths.output))
        .map_err(|e| DedupError::io(&paths.output, e))?;
    let mut out = BufWriter::new(out_tmp);
    write_document(&mut out, &paths.output, &container, total.kept, &mut spool)?;
    let out_tmp = out
        .into_inner()
        .map_err(|e| DedupError::io(&paths.output, e.into_error()))?;
    out_tmp
        .persist(&paths.output)
        .map_err(|e| DedupError::io(&paths.output, e.error))?;

    info!(
        path = %paths.output.display(),
        kept = total.kept,
        removed = total.removed,
        "Wrote deduplicated backup"
    );
    Ok(RunOutcome {
        stats,
        output: OutputStatus::Written(paths.output.clone()),
        log: paths.log.clone(),
    })
}

fn parent_dir(path: &Path) -> &Path {
    match path.parent() {
        Some(parent) if !parent.as_os_str().is_empty() => parent,
        _ => Path::new("."),
    }
}
