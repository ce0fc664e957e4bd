//! Streaming parser for SMS backup XML documents.
//!
//! Only the record currently being read is held in memory. Structural
//! surprises (wrong container, unknown record kind, a second top-level
//! element) are fatal: silently skipping them would let unrecognized data
//! through deduplication unchecked.

use std::fs::File;
use std::io::BufReader;
use std::path::{Path, PathBuf};

use quick_xml::events::{BytesStart, Event};
use quick_xml::Reader;
use tracing::{debug, warn};

use crate::error::{DedupError, Result};
use crate::model::record::{Container, Element, Record, RecordKind, CONTAINER_TAG};

/// Size of the internal read buffer (1 MB for fast sequential reads on modern SSDs).
const READ_BUFFER_SIZE: usize = 1024 * 1024;

/// Report progress roughly every 4 MB.
const PROGRESS_INTERVAL: u64 = 4 * 1024 * 1024;

/// What a completed parse saw besides the records themselves.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ParseOutcome {
    /// The top-level container element.
    pub container: Container,
    /// Number of records handed to the callback.
    pub records: u64,
}

/// Streaming backup parser.
///
/// Reads the document sequentially, invoking a caller-supplied callback for
/// every direct child record of the `smses` container.
pub struct BackupParser {
    path: PathBuf,
    file_size: u64,
    read_buffer_size: usize,
}

impl BackupParser {
    /// Create a parser for the given backup file.
    ///
    /// Verifies that the file exists and is readable, but does NOT validate
    /// its contents.
    pub fn new(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref().to_path_buf();
        let metadata = std::fs::metadata(&path).map_err(|e| {
            if e.kind() == std::io::ErrorKind::NotFound {
                DedupError::FileNotFound(path.clone())
            } else {
                DedupError::io(&path, e)
            }
        })?;
        Ok(Self {
            path,
            file_size: metadata.len(),
            read_buffer_size: READ_BUFFER_SIZE,
        })
    }

    /// Override the read buffer size.
    pub fn with_buffer_size(mut self, read_buffer_size: usize) -> Self {
        self.read_buffer_size = read_buffer_size.max(4096);
        self
    }

    /// Total size of the underlying file in bytes.
    pub fn file_size(&self) -> u64 {
        self.file_size
    }

    /// Path to the backup file.
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Parse the whole document, calling `record_callback` for each record.
    ///
    /// Errors returned by the callback abort the parse and are propagated.
    /// `progress_callback` receives `(bytes_read, file_size)`.
    pub fn parse(
        &self,
        record_callback: &mut dyn FnMut(Record) -> Result<()>,
        progress_callback: Option<&dyn Fn(u64, u64)>,
    ) -> Result<ParseOutcome> {
        let file = File::open(&self.path).map_err(|e| DedupError::io(&self.path, e))?;
        let mut reader = Reader::from_reader(BufReader::with_capacity(self.read_buffer_size, file));
        reader.config_mut().trim_text(true);

        let mut buf: Vec<u8> = Vec::with_capacity(64 * 1024);
        let mut container: Option<Container> = None;
        let mut container_open = false;
        // Open elements of the record being read; empty between records.
        let mut stack: Vec<Element> = Vec::new();
        let mut count: u64 = 0;
        let mut last_progress: u64 = 0;

        loop {
            let event = reader
                .read_event_into(&mut buf)
                .map_err(|e| DedupError::xml(&self.path, e))?;

            match event {
                Event::Start(ref start) | Event::Empty(ref start) => {
                    let is_empty = matches!(event, Event::Empty(_));
                    let element = self.element_from(start)?;

                    if !container_open {
                        if container.is_some() {
                            return Err(DedupError::MultipleContainers(self.path.clone()));
                        }
                        if element.tag != CONTAINER_TAG {
                            return Err(DedupError::UnexpectedContainer {
                                path: self.path.clone(),
                                tag: element.tag,
                            });
                        }
                        container = Some(Container {
                            tag: element.tag,
                            attributes: element.attributes,
                        });
                        container_open = !is_empty;
                    } else if stack.is_empty() {
                        let kind = self.record_kind(&element.tag)?;
                        if is_empty {
                            record_callback(Record::new(kind, element))?;
                            count += 1;
                        } else {
                            stack.push(element);
                        }
                    } else if is_empty {
                        if let Some(parent) = stack.last_mut() {
                            parent.children.push(element);
                        }
                    } else {
                        stack.push(element);
                    }
                }
                Event::End(_) => {
                    if let Some(element) = stack.pop() {
                        match stack.last_mut() {
                            Some(parent) => parent.children.push(element),
                            None => {
                                let kind = self.record_kind(&element.tag)?;
                                record_callback(Record::new(kind, element))?;
                                count += 1;
                            }
                        }
                    } else {
                        container_open = false;
                    }
                }
                Event::Text(_) | Event::CData(_) => {
                    debug!(path = %self.path.display(), "Ignoring character data");
                }
                Event::Eof => break,
                _ => {}
            }
            buf.clear();

            if let Some(cb) = progress_callback {
                let position = reader.buffer_position() as u64;
                if position - last_progress >= PROGRESS_INTERVAL {
                    cb(position, self.file_size);
                    last_progress = position;
                }
            }
        }

        if container_open || !stack.is_empty() {
            return Err(DedupError::xml(
                &self.path,
                "unexpected end of file inside the message container",
            ));
        }
        let container = container.ok_or_else(|| DedupError::MissingContainer(self.path.clone()))?;

        match container.declared_count() {
            Some(declared) if declared != count => warn!(
                path = %self.path.display(),
                declared,
                actual = count,
                "Container count attribute does not match the number of messages"
            ),
            None => warn!(path = %self.path.display(), "Container has no usable count attribute"),
            _ => {}
        }

        if let Some(cb) = progress_callback {
            cb(self.file_size, self.file_size);
        }

        Ok(ParseOutcome {
            container,
            records: count,
        })
    }

    fn record_kind(&self, tag: &str) -> Result<RecordKind> {
        RecordKind::from_tag(tag).ok_or_else(|| DedupError::UnexpectedRecordKind {
            path: self.path.clone(),
            tag: tag.to_string(),
        })
    }

    /// Owned element (tag plus unescaped attributes) from a start tag.
    fn element_from(&self, start: &BytesStart<'_>) -> Result<Element> {
        let tag = std::str::from_utf8(start.name().as_ref())
            .map_err(|e| DedupError::xml(&self.path, e))?
            .to_string();
        let mut element = Element::new(tag);
        for attr in start.attributes() {
            let attr = attr.map_err(|e| DedupError::xml(&self.path, e))?;
            let key = std::str::from_utf8(attr.key.as_ref())
                .map_err(|e| DedupError::xml(&self.path, e))?
                .to_string();
            let value = attr
                .unescape_value()
                .map_err(|e| DedupError::xml(&self.path, e))?
                .into_owned();
            element.attributes.push((key, value));
        }
        Ok(element)
    }
}
