//! Field normalization: canonical comparison values for raw attribute values.
//!
//! Every function here is pure. Normalized values are only ever used for
//! comparison; the output document always carries the original values.

use crate::config::MatchConfig;
use crate::error::{DedupError, Result};

/// Multi-recipient address field (`~`-delimited).
pub const ADDRESS_FIELD: &str = "address";

/// Millisecond epoch timestamp field.
pub const DATE_FIELD: &str = "date";

/// Free-text fields subject to whitespace normalization.
pub const TEXT_FIELDS: [&str; 3] = ["body", "text", "subject"];

/// Separator between endpoints in the address field.
const ADDRESS_SEPARATOR: char = '~';

/// How a raw value relates to embedded SMIL markup.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Markup {
    /// Ordinary value, takes part in comparison.
    Plain,
    /// A complete SMIL document. Agents re-serialize these with cosmetic
    /// differences, so they are excluded from fingerprints.
    Opaque,
}

/// Normalize one `(field, value)` pair for comparison.
///
/// With `relax` set only address canonicalization runs, so log output shows
/// the real timestamps and text.
pub fn normalize(field: &str, value: &str, config: &MatchConfig, relax: bool) -> String {
    let mut value = if field == ADDRESS_FIELD {
        canonical_address(value, &config.default_country_code)
    } else {
        value.to_string()
    };

    if relax {
        return value;
    }

    if field == DATE_FIELD && config.ignore_date_milliseconds {
        value = truncate_millis(&value);
    }
    if TEXT_FIELDS.contains(&field) && config.ignore_whitespace_differences {
        value = collapse_whitespace(&value);
    }
    value
}

/// Prefix endpoints lacking a `+` with the default country code, then sort.
///
/// Backup agents disagree on whether the country code is implied, and order
/// multi-recipient lists differently.
pub fn canonical_address(value: &str, default_country_code: &str) -> String {
    let mut endpoints: Vec<String> = value
        .split(ADDRESS_SEPARATOR)
        .map(|endpoint| {
            if endpoint.starts_with('+') {
                endpoint.to_string()
            } else {
                format!("{default_country_code}{endpoint}")
            }
        })
        .collect();
    endpoints.sort();
    endpoints.join(&ADDRESS_SEPARATOR.to_string())
}

/// Replace the millisecond digits of an epoch-millis timestamp with `000`.
///
/// Values that are not plain decimal digits are returned unchanged.
pub fn truncate_millis(value: &str) -> String {
    if value.len() < 3 || !value.bytes().all(|b| b.is_ascii_digit()) {
        return value.to_string();
    }
    format!("{}000", &value[..value.len() - 3])
}

/// Trim and collapse every whitespace run to a single space.
pub fn collapse_whitespace(value: &str) -> String {
    value.split_whitespace().collect::<Vec<_>>().join(" ")
}

/// Decide whether a raw value is a complete embedded SMIL document.
///
/// A leading `<?xml ...?>` declaration and `<!DOCTYPE ...>` are tolerated.
/// Anything that mentions SMIL tags without being a complete document is an
/// unrecognized variant and fails loudly rather than silently skewing
/// fingerprints.
pub fn classify_markup(raw: &str) -> Result<Markup> {
    let mut s = raw.trim();

    if s.contains("<smil") && s.contains("</smil>") {
        if s.starts_with("<?xml") {
            if let Some(end) = s.find("?>") {
                s = s[end + 2..].trim();
            }
        }
        if s.starts_with("<!DOCTYPE") {
            if let Some(end) = s.find('>') {
                s = s[end + 1..].trim();
            }
        }
    }

    let complete = s.starts_with("<smil") && s.ends_with("</smil>");
    if complete {
        return Ok(Markup::Opaque);
    }

    let looks_like_smil =
        s.contains('<') && s.contains('>') && s.contains("smil") && s.contains("/smil");
    if looks_like_smil {
        return Err(DedupError::UnknownSmilVariant(raw.to_string()));
    }
    Ok(Markup::Plain)
}
