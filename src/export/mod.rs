//! Output: serialization of kept records into a backup XML document.

pub mod xml;
