use std::collections::HashMap;
use std::fs;
use std::io;
use std::path::Path;

use indexmap::IndexMap;
use quick_xml::events::{BytesDecl, BytesEnd, BytesStart, BytesText, Event};
use quick_xml::Writer;

use crate::error::{LoaderError, LoaderResult};
use crate::import::xml::Element;

/// Row nodes keyed by symbolic identifier; each node maps column to value.
pub type NodeMap = IndexMap<String, IndexMap<String, String>>;

/// One element per node. Text columns become child elements, everything
/// else an attribute.
pub fn entity_nodes(entity: &str, nodes: &NodeMap, text_columns: &HashMap<String, bool>) -> Vec<Element> {
    nodes
        .iter()
        .map(|(id, node)| {
            let mut element = Element::new(entity);
            element.attributes.push(("id".to_string(), id.clone()));
            for (column, value) in node {
                if text_columns.get(column).copied().unwrap_or(false) {
                    let mut child = Element::new(column.as_str());
                    child.text = value.clone();
                    element.children.push(child);
                } else {
                    element.attributes.push((column.clone(), value.clone()));
                }
            }
            element
        })
        .collect()
}

/// Indented document with an XML declaration.
pub fn render(root: &Element) -> Result<Vec<u8>, quick_xml::Error> {
    let mut writer = Writer::new_with_indent(Vec::new(), b' ', 2);
    writer.write_event(Event::Decl(BytesDecl::new("1.0", Some("UTF-8"), None)))?;
    write_element(&mut writer, root)?;
    let mut out = writer.into_inner();
    out.push(b'\n');
    Ok(out)
}

fn write_element(writer: &mut Writer<Vec<u8>>, element: &Element) -> Result<(), quick_xml::Error> {
    let mut start = BytesStart::new(element.name.as_str());
    for (key, value) in &element.attributes {
        start.push_attribute((key.as_str(), value.as_str()));
    }
    if element.children.is_empty() && element.text.is_empty() {
        return writer.write_event(Event::Empty(start));
    }

    writer.write_event(Event::Start(start))?;
    if !element.text.is_empty() {
        writer.write_event(Event::Text(BytesText::new(&element.text)))?;
    }
    for child in &element.children {
        write_element(writer, child)?;
    }
    writer.write_event(Event::End(BytesEnd::new(element.name.as_str())))
}

pub fn write_file(root: &Element, path: &Path) -> LoaderResult<()> {
    let bytes = render(root).map_err(|err| LoaderError::io(path, io::Error::other(err.to_string())))?;
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent).map_err(|err| LoaderError::io(parent, err))?;
    }
    fs::write(path, bytes).map_err(|err| LoaderError::io(path, err))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::import::xml::parse_document;

    #[test]
    fn text_columns_become_children_and_survive_reparsing() {
        let mut nodes = NodeMap::new();
        let mut node = IndexMap::new();
        node.insert("iso_code".to_string(), "FR".to_string());
        node.insert("description".to_string(), "Cheese & <wine>".to_string());
        node.insert("motto".to_string(), "  Liberté  ".to_string());
        nodes.insert("france".to_string(), node);
        let text = HashMap::from([
            ("description".to_string(), true),
            ("motto".to_string(), true),
            ("iso_code".to_string(), false),
        ]);

        let mut root = Element::new("entity_country");
        let mut entities = Element::new("entities");
        entities.children = entity_nodes("country", &nodes, &text);
        root.children.push(entities);

        let bytes = render(&root).unwrap();
        let rendered = String::from_utf8(bytes).unwrap();
        assert!(rendered.starts_with("<?xml version=\"1.0\" encoding=\"UTF-8\"?>"));
        assert!(rendered.contains("<country id=\"france\" iso_code=\"FR\">"));
        assert!(rendered.contains("<description>Cheese &amp; &lt;wine&gt;</description>"));

        let parsed = parse_document(&rendered).unwrap();
        let country = &parsed.child("entities").unwrap().children[0];
        assert_eq!(country.child("description").unwrap().text, "Cheese & <wine>");
        assert_eq!(country.child("motto").unwrap().text, "  Liberté  ");
    }

    #[test]
    fn empty_elements_are_self_closing() {
        let root = Element::new("entity_tag");
        let rendered = String::from_utf8(render(&root).unwrap()).unwrap();
        assert!(rendered.contains("<entity_tag/>"));
    }
}
