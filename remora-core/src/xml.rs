//! Minimal owned XML tree used for signaling stanzas.
//!
//! Stanzas are small, so a DOM-style tree is simpler to work with than a
//! streaming API. Namespaces are kept as plain `xmlns` attributes on the
//! element that declares them; element names are stored exactly as they
//! appear on the wire.

use quick_xml::events::{BytesEnd, BytesStart, BytesText, Event};
use quick_xml::reader::Reader;
use quick_xml::writer::Writer;

use crate::error::RemotingError;

/// A single XML element with its attributes, children and text content.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct XmlElement {
    name: String,
    attributes: Vec<(String, String)>,
    children: Vec<XmlElement>,
    text: String,
}

impl XmlElement {
    /// Create an empty element.
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            ..Default::default()
        }
    }

    /// Create an element carrying an `xmlns` declaration.
    pub fn with_namespace(name: impl Into<String>, namespace: &str) -> Self {
        Self::new(name).with_attr("xmlns", namespace)
    }

    /// Builder-style attribute setter.
    pub fn with_attr(mut self, key: &str, value: impl Into<String>) -> Self {
        self.set_attr(key, value);
        self
    }

    /// Builder-style child append.
    pub fn with_child(mut self, child: XmlElement) -> Self {
        self.children.push(child);
        self
    }

    /// Builder-style text setter.
    pub fn with_text(mut self, text: impl Into<String>) -> Self {
        self.text = text.into();
        self
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// The `xmlns` declared on this element, if any.
    pub fn namespace(&self) -> Option<&str> {
        self.attr("xmlns")
    }

    pub fn attr(&self, key: &str) -> Option<&str> {
        self.attributes
            .iter()
            .find(|(k, _)| k == key)
            .map(|(_, v)| v.as_str())
    }

    /// Set or replace an attribute.
    pub fn set_attr(&mut self, key: &str, value: impl Into<String>) {
        let value = value.into();
        match self.attributes.iter_mut().find(|(k, _)| k == key) {
            Some(slot) => slot.1 = value,
            None => self.attributes.push((key.to_string(), value)),
        }
    }

    pub fn attributes(&self) -> impl Iterator<Item = (&str, &str)> {
        self.attributes.iter().map(|(k, v)| (k.as_str(), v.as_str()))
    }

    pub fn add_child(&mut self, child: XmlElement) {
        self.children.push(child);
    }

    pub fn children(&self) -> &[XmlElement] {
        &self.children
    }

    /// First child with the given name.
    pub fn child(&self, name: &str) -> Option<&XmlElement> {
        self.children.iter().find(|c| c.name == name)
    }

    /// All children with the given name, in document order.
    pub fn children_named<'a>(&'a self, name: &'a str) -> impl Iterator<Item = &'a XmlElement> {
        self.children.iter().filter(move |c| c.name == name)
    }

    pub fn text(&self) -> &str {
        &self.text
    }

    pub fn set_text(&mut self, text: impl Into<String>) {
        self.text = text.into();
    }

    // ── Parsing ──────────────────────────────────────────────────

    /// Parse a complete document. The first root element is returned;
    /// declarations, comments and processing instructions are skipped.
    pub fn parse(input: &str) -> Result<Self, RemotingError> {
        let mut reader = Reader::from_str(input);
        reader.trim_text(true);

        let mut stack: Vec<XmlElement> = Vec::new();

        loop {
            match reader.read_event()? {
                Event::Start(start) => {
                    stack.push(Self::from_start(&start)?);
                }
                Event::Empty(start) => {
                    let element = Self::from_start(&start)?;
                    match stack.last_mut() {
                        Some(parent) => parent.children.push(element),
                        None => return Ok(element),
                    }
                }
                Event::End(_) => {
                    let element = stack
                        .pop()
                        .ok_or_else(|| RemotingError::Xml("unbalanced end tag".into()))?;
                    match stack.last_mut() {
                        Some(parent) => parent.children.push(element),
                        None => return Ok(element),
                    }
                }
                Event::Text(text) => {
                    if let Some(current) = stack.last_mut() {
                        current.text.push_str(&text.unescape()?);
                    }
                }
                Event::CData(data) => {
                    if let Some(current) = stack.last_mut() {
                        let bytes = data.into_inner();
                        current.text.push_str(&String::from_utf8_lossy(&bytes));
                    }
                }
                Event::Eof => {
                    return Err(RemotingError::Xml("unexpected end of document".into()));
                }
                _ => {}
            }
        }
    }

    fn from_start(start: &BytesStart<'_>) -> Result<Self, RemotingError> {
        let name = std::str::from_utf8(start.name().as_ref())
            .map_err(|e| RemotingError::Xml(e.to_string()))?
            .to_string();
        let mut element = XmlElement::new(name);
        for attr in start.attributes() {
            let attr = attr.map_err(|e| RemotingError::Xml(e.to_string()))?;
            let key = std::str::from_utf8(attr.key.as_ref())
                .map_err(|e| RemotingError::Xml(e.to_string()))?
                .to_string();
            let value = attr.unescape_value()?.into_owned();
            element.attributes.push((key, value));
        }
        Ok(element)
    }

    // ── Writing ──────────────────────────────────────────────────

    /// Serialize to a compact XML string.
    pub fn to_xml(&self) -> Result<String, RemotingError> {
        let mut writer = Writer::new(Vec::new());
        self.write_into(&mut writer)?;
        String::from_utf8(writer.into_inner()).map_err(|e| RemotingError::Xml(e.to_string()))
    }

    fn write_into(&self, writer: &mut Writer<Vec<u8>>) -> Result<(), RemotingError> {
        let mut start = BytesStart::new(self.name.as_str());
        for (k, v) in &self.attributes {
            start.push_attribute((k.as_str(), v.as_str()));
        }

        if self.children.is_empty() && self.text.is_empty() {
            return writer
                .write_event(Event::Empty(start))
                .map_err(|e| RemotingError::Xml(e.to_string()));
        }

        writer
            .write_event(Event::Start(start))
            .map_err(|e| RemotingError::Xml(e.to_string()))?;
        if !self.text.is_empty() {
            writer
                .write_event(Event::Text(BytesText::new(&self.text)))
                .map_err(|e| RemotingError::Xml(e.to_string()))?;
        }
        for child in &self.children {
            child.write_into(writer)?;
        }
        writer
            .write_event(Event::End(BytesEnd::new(self.name.as_str())))
            .map_err(|e| RemotingError::Xml(e.to_string()))
    }
}
