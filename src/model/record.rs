//! Message records as they appear in a backup document.

use std::fmt;

/// Attribute value some backup agents write instead of omitting the attribute.
pub const NULL_MARKER: &str = "null";

/// Attribute renumbered on every identifier-bearing element of the output.
pub const ID_ATTRIBUTE: &str = "_id";

/// Tag of the top-level container element.
pub const CONTAINER_TAG: &str = "smses";

/// Attribute of the container holding the message count.
pub const COUNT_ATTRIBUTE: &str = "count";

/// The kinds of record allowed directly under the container.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, serde::Serialize)]
#[serde(rename_all = "lowercase")]
pub enum RecordKind {
    /// Plain text message.
    Sms,
    /// Multimedia message (also used for RCS). Carries nested parts.
    Mms,
}

impl RecordKind {
    /// Parse a record element tag. Returns `None` for unrecognized tags.
    pub fn from_tag(tag: &str) -> Option<Self> {
        match tag {
            "sms" => Some(Self::Sms),
            "mms" => Some(Self::Mms),
            _ => None,
        }
    }

    /// The element tag for this kind.
    pub fn tag(self) -> &'static str {
        match self {
            Self::Sms => "sms",
            Self::Mms => "mms",
        }
    }
}

impl fmt::Display for RecordKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.tag())
    }
}

/// One XML element: tag, attributes in document order, child elements.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct Element {
    pub tag: String,
    pub attributes: Vec<(String, String)>,
    pub children: Vec<Element>,
}

impl Element {
    pub fn new(tag: impl Into<String>) -> Self {
        Self {
            tag: tag.into(),
            attributes: Vec::new(),
            children: Vec::new(),
        }
    }

    /// Builder-style attribute append.
    pub fn with_attr(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.attributes.push((name.into(), value.into()));
        self
    }

    /// Builder-style child append.
    pub fn with_child(mut self, child: Element) -> Self {
        self.children.push(child);
        self
    }

    /// Raw attribute value, including a literal `"null"`.
    pub fn raw_attr(&self, name: &str) -> Option<&str> {
        self.attributes
            .iter()
            .find(|(k, _)| k == name)
            .map(|(_, v)| v.as_str())
    }

    /// Attribute value, treating the `"null"` marker as absent.
    pub fn attr(&self, name: &str) -> Option<&str> {
        self.raw_attr(name).filter(|v| *v != NULL_MARKER)
    }

    /// Visit this element and all descendants in document order (pre-order).
    pub fn walk<'a>(&'a self, visit: &mut dyn FnMut(&'a Element)) {
        visit(self);
        for child in &self.children {
            child.walk(visit);
        }
    }
}

/// A single field of a flattened record.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FlatField<'a> {
    /// Position of the owning element in document order (0 = the record itself).
    pub owner: usize,
    pub field: &'a str,
    pub value: &'a str,
}

/// One message: a direct child of the container.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Record {
    pub kind: RecordKind,
    pub element: Element,
}

impl Record {
    pub fn new(kind: RecordKind, element: Element) -> Self {
        Self { kind, element }
    }

    /// Flatten the record and all of its parts into `(owner, field, value)`
    /// triples, in document order. `"null"` attributes are skipped.
    pub fn flatten(&self) -> Vec<FlatField<'_>> {
        let mut fields = Vec::new();
        let mut owner = 0usize;
        self.element.walk(&mut |element| {
            for (name, value) in &element.attributes {
                if value != NULL_MARKER {
                    fields.push(FlatField {
                        owner,
                        field: name,
                        value,
                    });
                }
            }
            owner += 1;
        });
        fields
    }
}

/// The top-level element of a backup document.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct Container {
    pub tag: String,
    pub attributes: Vec<(String, String)>,
}

impl Container {
    /// The declared record count. Informational only, never trusted.
    pub fn declared_count(&self) -> Option<u64> {
        self.attributes
            .iter()
            .find(|(k, _)| k == COUNT_ATTRIBUTE)
            .and_then(|(_, v)| v.parse().ok())
    }
}
