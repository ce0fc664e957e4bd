//! Serialization of kept records into a backup XML document.
//!
//! Records are streamed into a spool first, because the container's `count`
//! attribute is only known once resolution has finished. The final document
//! is then assembled from the container start tag, the spool and the end tag.

use std::borrow::Cow;
use std::io::{Read, Write};
use std::path::{Path, PathBuf};

use quick_xml::events::attributes::Attribute;
use quick_xml::events::{BytesDecl, BytesEnd, BytesStart, Event};
use quick_xml::name::QName;
use quick_xml::Writer;

use crate::error::{DedupError, Result};
use crate::model::record::{Container, Element, Record, COUNT_ATTRIBUTE, ID_ATTRIBUTE};

/// Indentation of records inside the container.
const RECORD_INDENT: &[u8] = b"  ";

/// Writes records one per line, renumbering every `_id` from zero.
pub struct RecordWriter<W: Write> {
    writer: Writer<W>,
    path: PathBuf,
    next_id: u64,
    records: u64,
}

impl<W: Write> RecordWriter<W> {
    /// `path` only labels errors.
    pub fn new(inner: W, path: impl Into<PathBuf>) -> Self {
        Self {
            writer: Writer::new(inner),
            path: path.into(),
            next_id: 0,
            records: 0,
        }
    }

    /// Number of records written so far.
    pub fn records_written(&self) -> u64 {
        self.records
    }

    /// Append one record, overwriting the identifiers it carried.
    pub fn write_record(&mut self, record: &Record) -> Result<()> {
        self.write_raw(RECORD_INDENT)?;
        self.write_element(&record.element)?;
        self.write_raw(b"\n")?;
        self.records += 1;
        Ok(())
    }

    pub fn into_inner(self) -> W {
        self.writer.into_inner()
    }

    fn write_element(&mut self, element: &Element) -> Result<()> {
        let mut start = BytesStart::new(element.tag.as_str());
        for (name, value) in &element.attributes {
            let value = if name == ID_ATTRIBUTE {
                let id = self.next_id;
                self.next_id += 1;
                id.to_string()
            } else {
                value.clone()
            };
            start.push_attribute(attribute(name, &value));
        }

        if element.children.is_empty() {
            return self.write_event(Event::Empty(start));
        }
        self.write_event(Event::Start(start))?;
        for child in &element.children {
            self.write_element(child)?;
        }
        self.write_event(Event::End(BytesEnd::new(element.tag.as_str())))
    }

    fn write_event(&mut self, event: Event<'_>) -> Result<()> {
        self.writer
            .write_event(event)
            .map_err(|e| DedupError::xml(&self.path, e))
    }

    fn write_raw(&mut self, bytes: &[u8]) -> Result<()> {
        self.writer
            .get_mut()
            .write_all(bytes)
            .map_err(|e| DedupError::io(&self.path, e))
    }
}

/// Assemble the final document: declaration, container with `count` set to
/// `record_count`, the spooled records, closing tag.
pub fn write_document(
    out: &mut dyn Write,
    path: &Path,
    container: &Container,
    record_count: u64,
    records: &mut dyn Read,
) -> Result<()> {
    let mut writer = Writer::new(out);
    let xml_err = |e| DedupError::xml(path, e);
    let io_err = |e| DedupError::io(path, e);

    writer
        .write_event(Event::Decl(BytesDecl::new("1.0", Some("UTF-8"), Some("yes"))))
        .map_err(xml_err)?;
    writer.get_mut().write_all(b"\n").map_err(io_err)?;

    let count = record_count.to_string();
    let mut start = BytesStart::new(container.tag.as_str());
    let mut has_count = false;
    for (name, value) in &container.attributes {
        if name == COUNT_ATTRIBUTE {
            has_count = true;
            start.push_attribute(attribute(name, &count));
        } else {
            start.push_attribute(attribute(name, value));
        }
    }
    if !has_count {
        start.push_attribute(attribute(COUNT_ATTRIBUTE, &count));
    }

    writer.write_event(Event::Start(start)).map_err(xml_err)?;
    writer.get_mut().write_all(b"\n").map_err(io_err)?;
    std::io::copy(records, writer.get_mut()).map_err(io_err)?;
    writer
        .write_event(Event::End(BytesEnd::new(container.tag.as_str())))
        .map_err(xml_err)?;
    writer.get_mut().write_all(b"\n").map_err(io_err)?;
    Ok(())
}

fn attribute<'a>(name: &'a str, value: &str) -> Attribute<'a> {
    Attribute {
        key: QName(name.as_bytes()),
        value: Cow::Owned(escape_attribute(value).into_owned().into_bytes()),
    }
}

/// Escape an attribute value, including line breaks and tabs so that
/// conforming parsers do not normalize them to spaces on re-read.
fn escape_attribute(value: &str) -> Cow<'_, str> {
    if !value
        .chars()
        .any(|c| matches!(c, '&' | '<' | '>' | '"' | '\'' | '\n' | '\r' | '\t'))
    {
        return Cow::Borrowed(value);
    }
    let mut out = String::with_capacity(value.len() + 16);
    for c in value.chars() {
        match c {
            '&' => out.push_str("&amp;"),
            '<' => out.push_str("&lt;"),
            '>' => out.push_str("&gt;"),
            '"' => out.push_str("&quot;"),
            '\'' => out.push_str("&apos;"),
            '\n' => out.push_str("&#10;"),
            '\r' => out.push_str("&#13;"),
            '\t' => out.push_str("&#9;"),
            c => out.push(c),
        }
    }
    Cow::Owned(out)
}
