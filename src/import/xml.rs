use quick_xml::events::{BytesStart, Event};
use quick_xml::Reader;
use thiserror::Error;

#[derive(Debug, Error, PartialEq, Eq)]
pub enum XmlError {
    #[error("malformed xml: {0}")]
    Syntax(String),
    #[error("document has no root element")]
    Empty,
    #[error("element <{0}> is never closed")]
    Unclosed(String),
}

/// Minimal owned element tree: enough for seed descriptors, which only use
/// attributes, nested elements and text.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Element {
    pub name: String,
    pub attributes: Vec<(String, String)>,
    pub children: Vec<Element>,
    pub text: String,
}

impl Element {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            ..Self::default()
        }
    }

    pub fn attr(&self, key: &str) -> Option<&str> {
        self.attributes
            .iter()
            .find(|(k, _)| k == key)
            .map(|(_, v)| v.as_str())
    }

    /// Attribute value, treating an empty value as absent.
    pub fn non_empty_attr(&self, key: &str) -> Option<&str> {
        self.attr(key).filter(|v| !v.is_empty())
    }

    pub fn child(&self, name: &str) -> Option<&Element> {
        self.children.iter().find(|c| c.name == name)
    }

    pub fn children_named<'a>(&'a self, name: &'a str) -> impl Iterator<Item = &'a Element> + 'a {
        self.children.iter().filter(move |c| c.name == name)
    }
}

pub fn parse_document(text: &str) -> Result<Element, XmlError> {
    let mut reader = Reader::from_str(text);

    let mut stack: Vec<Element> = Vec::new();
    let mut root: Option<Element> = None;

    loop {
        match reader.read_event() {
            Ok(Event::Start(e)) => stack.push(start_element(&e)?),
            Ok(Event::Empty(e)) => {
                let element = start_element(&e)?;
                attach(&mut stack, &mut root, element);
            }
            Ok(Event::End(_)) => {
                if let Some(mut element) = stack.pop() {
                    // indentation between child elements is not content
                    if !element.children.is_empty() && element.text.trim().is_empty() {
                        element.text.clear();
                    }
                    attach(&mut stack, &mut root, element);
                }
            }
            Ok(Event::Text(e)) => {
                let text = e
                    .unescape()
                    .map_err(|err| XmlError::Syntax(err.to_string()))?;
                if let Some(top) = stack.last_mut() {
                    top.text.push_str(&text);
                }
            }
            Ok(Event::CData(e)) => {
                if let Some(top) = stack.last_mut() {
                    top.text.push_str(&String::from_utf8_lossy(&e.into_inner()));
                }
            }
            Ok(Event::Eof) => break,
            Ok(_) => {}
            Err(err) => {
                return Err(XmlError::Syntax(format!(
                    "at byte {}: {err}",
                    reader.buffer_position()
                )))
            }
        }
    }

    if let Some(open) = stack.pop() {
        return Err(XmlError::Unclosed(open.name));
    }
    root.ok_or(XmlError::Empty)
}

fn start_element(start: &BytesStart<'_>) -> Result<Element, XmlError> {
    let mut element = Element::new(String::from_utf8_lossy(start.name().as_ref()));
    for attr in start.attributes() {
        let attr = attr.map_err(|err| XmlError::Syntax(err.to_string()))?;
        let key = String::from_utf8_lossy(attr.key.as_ref()).into_owned();
        let value = attr
            .unescape_value()
            .map_err(|err| XmlError::Syntax(err.to_string()))?
            .into_owned();
        element.attributes.push((key, value));
    }
    Ok(element)
}

fn attach(stack: &mut [Element], root: &mut Option<Element>, element: Element) {
    match stack.last_mut() {
        Some(parent) => parent.children.push(element),
        None => {
            if root.is_none() {
                *root = Some(element);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_attributes_children_and_cdata() {
        let doc = parse_document(
            r#"<?xml version="1.0"?>
            <entity_product>
              <entities>
                <product id="ipod_nano" price="99.5" name="iPod &amp; co">
                  <description><![CDATA[<p>Small</p>]]></description>
                </product>
                <product id="ipod_mini"/>
              </entities>
            </entity_product>"#,
        )
        .unwrap();

        assert_eq!(doc.name, "entity_product");
        let entities = doc.child("entities").unwrap();
        let rows: Vec<&Element> = entities.children_named("product").collect();
        assert_eq!(rows.len(), 2);
        assert_eq!(rows[0].attr("name"), Some("iPod & co"));
        assert_eq!(rows[0].child("description").unwrap().text, "<p>Small</p>");
        assert_eq!(rows[1].attr("id"), Some("ipod_mini"));
        assert!(rows[1].non_empty_attr("price").is_none());
    }

    #[test]
    fn text_is_kept_verbatim_around_cdata() {
        let doc = parse_document(
            "<r>\n  <d>Price: <![CDATA[<b>]]> now</d>\n  <e>  two  spaces  </e>\n  <f> </f>\n</r>",
        )
        .unwrap();
        assert_eq!(doc.text, "");
        assert_eq!(doc.child("d").unwrap().text, "Price: <b> now");
        assert_eq!(doc.child("e").unwrap().text, "  two  spaces  ");
        assert_eq!(doc.child("f").unwrap().text, " ");
    }

    #[test]
    fn rejects_unbalanced_documents() {
        assert!(parse_document("<a><b></a>").is_err());
        assert_eq!(parse_document(""), Err(XmlError::Empty));
        assert!(parse_document("<a><b/>").is_err());
    }
}
