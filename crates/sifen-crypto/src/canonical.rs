//! # Canonical XML — Exclusive-Canonicalization Byte Production
//!
//! Defines `CanonicalXml`, the sole construction path for the bytes that
//! feed digest computation and signing. Two textually different renderings
//! of the same document (attribute order, self-closing tags, entity forms)
//! must digest identically, so every digest in the stack flows through this
//! pipeline.
//!
//! ## Invariant
//!
//! The `CanonicalXml` newtype has a private inner field. The only way to
//! construct it is [`CanonicalXml::canonicalize()`], which applies the full
//! pipeline: declaration and DOCTYPE removal, optional comment/PI stripping,
//! attribute ordering, self-closing-tag expansion, CDATA unfolding, and
//! consistent re-escaping. Signing and verification both accept
//! `&CanonicalXml`, never a raw string, so a non-canonical byte sequence
//! cannot reach the digest.
//!
//! ## Comment and PI handling
//!
//! The signature profile leaves comment and processing-instruction handling
//! to configuration. [`C14nConfig::default()`] strips both — the profile the
//! tax authority's validator applies — but both flags are explicit.

use quick_xml::events::{BytesEnd, BytesStart, BytesText, Event};
use quick_xml::{Reader, Writer};
use thiserror::Error;

/// Error during XML canonicalization.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum C14nError {
    /// The input is not well-formed XML.
    #[error("malformed XML: {0}")]
    Malformed(String),

    /// An attribute could not be decoded.
    #[error("malformed attribute: {0}")]
    Attribute(String),

    /// The document contains no root element.
    #[error("document has no root element")]
    Empty,
}

/// Configuration constants for the canonicalization profile.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct C14nConfig {
    /// Remove comments from the canonical form.
    pub strip_comments: bool,
    /// Remove processing instructions from the canonical form.
    pub strip_pis: bool,
}

impl Default for C14nConfig {
    fn default() -> Self {
        Self {
            strip_comments: true,
            strip_pis: true,
        }
    }
}

/// Bytes produced exclusively by the canonicalization pipeline.
///
/// # Invariants
///
/// - The only constructor is [`CanonicalXml::canonicalize()`].
/// - No XML declaration, no DOCTYPE, no byte-order mark.
/// - Attributes sorted byte-wise by qualified name.
/// - Self-closing tags expanded to start/end pairs.
/// - CDATA sections unfolded into escaped text.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct CanonicalXml(Vec<u8>);

impl CanonicalXml {
    /// Canonicalize an XML document.
    ///
    /// # Errors
    ///
    /// Returns [`C14nError::Malformed`] if the input is not well-formed and
    /// [`C14nError::Empty`] if it contains no element content.
    pub fn canonicalize(xml: &str, config: C14nConfig) -> Result<Self, C14nError> {
        let mut reader = Reader::from_str(xml);
        let mut writer = Writer::new(Vec::new());
        let mut saw_element = false;

        loop {
            let event = reader
                .read_event()
                .map_err(|e| C14nError::Malformed(e.to_string()))?;
            match event {
                Event::Eof => break,
                // The canonical form carries no declaration or DOCTYPE.
                Event::Decl(_) | Event::DocType(_) => {}
                Event::Comment(c) => {
                    if !config.strip_comments {
                        write_event(&mut writer, Event::Comment(c))?;
                    }
                }
                Event::PI(pi) => {
                    if !config.strip_pis {
                        write_event(&mut writer, Event::PI(pi))?;
                    }
                }
                Event::Start(start) => {
                    saw_element = true;
                    let ordered = reorder_attributes(&start)?;
                    write_event(&mut writer, Event::Start(ordered))?;
                }
                Event::Empty(start) => {
                    // Self-closing tags expand to an explicit start/end pair.
                    saw_element = true;
                    let name = qname_owned(&start);
                    let ordered = reorder_attributes(&start)?;
                    write_event(&mut writer, Event::Start(ordered))?;
                    write_event(&mut writer, Event::End(BytesEnd::new(name)))?;
                }
                Event::End(end) => {
                    write_event(&mut writer, Event::End(end))?;
                }
                Event::Text(text) => {
                    let unescaped = text
                        .unescape()
                        .map_err(|e| C14nError::Malformed(e.to_string()))?;
                    write_event(&mut writer, Event::Text(BytesText::new(&unescaped)))?;
                }
                Event::CData(cdata) => {
                    // CDATA unfolds into ordinary escaped text.
                    let text = cdata
                        .escape()
                        .map_err(|e| C14nError::Malformed(e.to_string()))?;
                    write_event(&mut writer, Event::Text(text))?;
                }
            }
        }

        if !saw_element {
            return Err(C14nError::Empty);
        }
        Ok(Self(writer.into_inner()))
    }

    /// Access the canonical bytes for digest computation.
    pub fn as_bytes(&self) -> &[u8] {
        &self.0
    }

    /// The canonical form as UTF-8 text.
    pub fn as_str(&self) -> &str {
        // The pipeline only ever writes UTF-8.
        std::str::from_utf8(&self.0).unwrap_or("")
    }

    /// Returns the length of the canonical byte sequence.
    pub fn len(&self) -> usize {
        self.0.len()
    }

    /// Returns true if the canonical byte sequence is empty.
    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

fn write_event(writer: &mut Writer<Vec<u8>>, event: Event<'_>) -> Result<(), C14nError> {
    writer
        .write_event(event)
        .map_err(|e| C14nError::Malformed(e.to_string()))
}

fn qname_owned(start: &BytesStart<'_>) -> String {
    String::from_utf8_lossy(start.name().as_ref()).into_owned()
}

/// Rebuild a start tag with attributes sorted byte-wise by qualified name.
fn reorder_attributes(start: &BytesStart<'_>) -> Result<BytesStart<'static>, C14nError> {
    let name = qname_owned(start);
    let mut attrs: Vec<(String, String)> = Vec::new();
    for attr in start.attributes() {
        let attr = attr.map_err(|e| C14nError::Attribute(e.to_string()))?;
        let key = String::from_utf8_lossy(attr.key.as_ref()).into_owned();
        let value = attr
            .unescape_value()
            .map_err(|e| C14nError::Attribute(e.to_string()))?
            .into_owned();
        attrs.push((key, value));
    }
    attrs.sort_by(|a, b| a.0.cmp(&b.0));

    let mut rebuilt = BytesStart::new(name);
    for (key, value) in &attrs {
        rebuilt.push_attribute((key.as_str(), value.as_str()));
    }
    Ok(rebuilt.into_owned())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn c14n(xml: &str) -> CanonicalXml {
        CanonicalXml::canonicalize(xml, C14nConfig::default()).unwrap()
    }

    // -- normalization ----------------------------------------------------------

    #[test]
    fn declaration_is_removed() {
        let out = c14n("<?xml version=\"1.0\" encoding=\"UTF-8\"?><a>x</a>");
        assert_eq!(out.as_str(), "<a>x</a>");
    }

    #[test]
    fn attributes_are_sorted() {
        let out = c14n("<a z=\"1\" b=\"2\" m=\"3\"/>");
        assert_eq!(out.as_str(), "<a b=\"2\" m=\"3\" z=\"1\"></a>");
    }

    #[test]
    fn self_closing_expands() {
        let out = c14n("<a><b/></a>");
        assert_eq!(out.as_str(), "<a><b></b></a>");
    }

    #[test]
    fn cdata_unfolds_to_escaped_text() {
        let out = c14n("<a><![CDATA[1 < 2 & 3]]></a>");
        assert_eq!(out.as_str(), "<a>1 &lt; 2 &amp; 3</a>");
    }

    #[test]
    fn comments_stripped_by_default() {
        let out = c14n("<a><!-- note -->x</a>");
        assert_eq!(out.as_str(), "<a>x</a>");
    }

    #[test]
    fn comments_kept_when_configured() {
        let cfg = C14nConfig {
            strip_comments: false,
            strip_pis: true,
        };
        let out = CanonicalXml::canonicalize("<a><!-- note -->x</a>", cfg).unwrap();
        assert_eq!(out.as_str(), "<a><!-- note -->x</a>");
    }

    #[test]
    fn pis_stripped_by_default() {
        let out = c14n("<a><?target data?>x</a>");
        assert_eq!(out.as_str(), "<a>x</a>");
    }

    // -- determinism ------------------------------------------------------------

    #[test]
    fn equivalent_documents_share_canonical_form() {
        let a = c14n("<?xml version=\"1.0\"?><doc b=\"2\" a=\"1\"><e/></doc>");
        let b = c14n("<doc a=\"1\" b=\"2\"><e></e></doc>");
        assert_eq!(a, b);
    }

    #[test]
    fn canonicalization_is_idempotent() {
        let once = c14n("<doc z=\"1\" a=\"2\"><b/>text</doc>");
        let twice = c14n(once.as_str());
        assert_eq!(once, twice);
    }

    #[test]
    fn text_content_is_preserved() {
        let out = c14n("<a>  spaced  text  </a>");
        assert_eq!(out.as_str(), "<a>  spaced  text  </a>");
    }

    // -- errors -----------------------------------------------------------------

    #[test]
    fn malformed_xml_rejected() {
        assert!(CanonicalXml::canonicalize("<a><b></a>", C14nConfig::default()).is_err());
    }

    #[test]
    fn empty_document_rejected() {
        let err = CanonicalXml::canonicalize("", C14nConfig::default()).unwrap_err();
        assert_eq!(err, C14nError::Empty);
        assert!(CanonicalXml::canonicalize("<!-- only -->", C14nConfig::default()).is_err());
    }
}
