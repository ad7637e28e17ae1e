//! Document analyzer
//!
//! Reduces one XML document to a [`FrequencyTree`]. Every element at any
//! depth is visited in document order, root included. Namespace
//! declarations count as attributes under their local name.
//!
//! [`visit_document`] is the strict walk shared with the combination
//! counter; it hands every start or empty tag to a callback.

use std::collections::BTreeMap;
use std::path::Path;

use quick_xml::Reader;
use quick_xml::events::{BytesStart, Event};

use crate::error::AnalyzeError;
use crate::tree::{Bucket, Frequency, FrequencyTree};

/// One attribute of a visited element
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AttributeEvent {
    /// Name as written, prefix included
    pub name: String,
    /// Name without its prefix; `xmlns:p` becomes `p`
    pub local_name: String,
    /// Unescaped value
    pub value: String,
}

/// A start or empty tag
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ElementEvent {
    /// Qualified element name
    pub name: String,
    pub attributes: Vec<AttributeEvent>,
}

#[derive(Default)]
struct AttributeCounts {
    total: u64,
    values: BTreeMap<String, u64>,
}

#[derive(Default)]
struct ElementCounts {
    total: u64,
    attributes: BTreeMap<String, AttributeCounts>,
}

/// Accumulates counts while the document is read
#[derive(Default)]
struct TreeBuilder {
    total_elements: u64,
    total_attributes: u64,
    elements: BTreeMap<String, ElementCounts>,
}

impl TreeBuilder {
    fn record(&mut self, element: ElementEvent) {
        self.total_elements += 1;
        self.total_attributes += element.attributes.len() as u64;

        let counts = self.elements.entry(element.name).or_default();
        counts.total += 1;
        for attribute in element.attributes {
            let values = counts.attributes.entry(attribute.local_name).or_default();
            values.total += 1;
            *values.values.entry(attribute.value).or_insert(0) += 1;
        }
    }

    fn finish(self, file_name: &Path) -> FrequencyTree {
        let elements = self
            .elements
            .into_iter()
            .map(|(name, element)| {
                let children = element
                    .attributes
                    .into_iter()
                    .map(|(attribute, counts)| {
                        let values = counts
                            .values
                            .into_iter()
                            .map(|(value, count)| (value, Frequency::Leaf(count)))
                            .collect();
                        let bucket = Bucket {
                            total: counts.total,
                            children: values,
                        };
                        (attribute, Frequency::Node(bucket))
                    })
                    .collect();
                let bucket = Bucket {
                    total: element.total,
                    children,
                };
                (name, Frequency::Node(bucket))
            })
            .collect();

        FrequencyTree {
            file_name: Some(file_name.to_path_buf()),
            total_elements: self.total_elements,
            total_attributes: self.total_attributes,
            elements,
        }
    }
}

/// Read the raw content of one file
pub async fn read_file(path: &Path) -> Result<Vec<u8>, AnalyzeError> {
    tokio::fs::read(path)
        .await
        .map_err(|source| AnalyzeError::Read {
            path: path.to_path_buf(),
            source,
        })
}

/// View raw file content as text; invalid UTF-8 is a parse error
pub fn document_text<'a>(bytes: &'a [u8], file_name: &Path) -> Result<&'a str, AnalyzeError> {
    std::str::from_utf8(bytes).map_err(|e| AnalyzeError::Parse {
        path: file_name.to_path_buf(),
        position: e.valid_up_to() as u64,
        details: "document is not valid UTF-8".to_string(),
    })
}

/// Read one file and analyze it
pub async fn analyze_file(path: &Path) -> Result<FrequencyTree, AnalyzeError> {
    let bytes = read_file(path).await?;
    analyze_bytes(&bytes, path)
}

/// Analyze raw file content
pub fn analyze_bytes(bytes: &[u8], file_name: &Path) -> Result<FrequencyTree, AnalyzeError> {
    analyze_document(document_text(bytes, file_name)?, file_name)
}

/// Analyze the text of one XML document
pub fn analyze_document(text: &str, file_name: &Path) -> Result<FrequencyTree, AnalyzeError> {
    let mut builder = TreeBuilder::default();
    visit_document(text, file_name, |element| builder.record(element))?;
    Ok(builder.finish(file_name))
}

/// Walk a whole document, calling `visit` for every element in document order
///
/// Elements before a well-formedness error have already been visited when
/// the error is returned; callers must discard what they accumulated.
pub fn visit_document<F>(text: &str, file_name: &Path, mut visit: F) -> Result<(), AnalyzeError>
where
    F: FnMut(ElementEvent),
{
    let text = text.strip_prefix('\u{feff}').unwrap_or(text);
    let mut reader = Reader::from_str(text);
    reader.config_mut().check_end_names = true;

    let parse_error = |reader: &Reader<&[u8]>, details: String| AnalyzeError::Parse {
        path: file_name.to_path_buf(),
        position: reader.buffer_position() as u64,
        details,
    };

    let mut depth = 0usize;
    let mut seen_root = false;

    loop {
        let event = reader
            .read_event()
            .map_err(|e| parse_error(&reader, e.to_string()))?;

        match event {
            Event::Start(ref e) | Event::Empty(ref e) => {
                if depth == 0 && seen_root {
                    return Err(parse_error(
                        &reader,
                        "content after the root element".to_string(),
                    ));
                }
                seen_root = true;

                let element = read_element(e).map_err(|details| parse_error(&reader, details))?;
                visit(element);

                if matches!(event, Event::Start(_)) {
                    depth += 1;
                }
            }
            Event::End(_) => {
                // End names are checked by the reader; an unmatched end tag
                // at depth zero is reported there as well.
                depth = depth.saturating_sub(1);
            }
            Event::Text(ref e) if depth == 0 => {
                if !e.iter().all(u8::is_ascii_whitespace) {
                    return Err(parse_error(
                        &reader,
                        "text outside the root element".to_string(),
                    ));
                }
            }
            Event::CData(_) | Event::GeneralRef(_) if depth == 0 => {
                return Err(parse_error(
                    &reader,
                    "content outside the root element".to_string(),
                ));
            }
            Event::Eof => break,
            _ => {}
        }
    }

    if !seen_root {
        return Err(parse_error(&reader, "no root element".to_string()));
    }
    if depth > 0 {
        return Err(parse_error(
            &reader,
            format!("unexpected end of document, {} element(s) left open", depth),
        ));
    }

    Ok(())
}

fn read_element(e: &BytesStart) -> Result<ElementEvent, String> {
    let name = std::str::from_utf8(e.name().as_ref())
        .map_err(|e| e.to_string())?
        .to_string();

    let mut attributes = Vec::new();
    for attr in e.attributes() {
        let attr = attr.map_err(|e| format!("attribute error: {}", e))?;
        let qualified = std::str::from_utf8(attr.key.as_ref())
            .map_err(|e| e.to_string())?
            .to_string();
        // `xmlns` keeps its name; `xmlns:p` is counted as `p`
        let local_name = std::str::from_utf8(attr.key.local_name().as_ref())
            .map_err(|e| e.to_string())?
            .to_string();
        let value = attr
            .unescape_value()
            .map_err(|e| format!("attribute '{}': {}", qualified, e))?
            .into_owned();
        attributes.push(AttributeEvent {
            name: qualified,
            local_name,
            value,
        });
    }

    Ok(ElementEvent { name, attributes })
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::path::PathBuf;

    fn analyze(xml: &str) -> FrequencyTree {
        analyze_document(xml, Path::new("test.xml")).unwrap()
    }

    #[test]
    fn test_counts_every_element_including_root() {
        let tree = analyze(
            r#"<?xml version="1.0" encoding="UTF-8"?>
<library>
    <book id="1"><title>One</title></book>
    <book id="2"><title>Two</title></book>
    <shelf><book id="1"/></shelf>
</library>"#,
        );

        assert_eq!(tree.file_name, Some(PathBuf::from("test.xml")));
        assert_eq!(tree.total_elements, 7);
        assert_eq!(tree.total_attributes, 3);
        assert_eq!(tree.element("library").unwrap().total, 1);
        assert_eq!(tree.element("book").unwrap().total, 3);
        assert_eq!(tree.element("title").unwrap().total, 2);
        assert_eq!(tree.attribute("book", "id").unwrap().total, 3);
        assert_eq!(tree.value_count("book", "id", "1"), 2);
        assert_eq!(tree.value_count("book", "id", "2"), 1);
        assert!(tree.attribute_totals_consistent());
    }

    #[test]
    fn test_element_without_attributes_has_no_children() {
        let tree = analyze("<root><a/><a x=\"1\"/></root>");

        let a = tree.element("a").unwrap();
        assert_eq!(a.total, 2);
        assert_eq!(a.bucket("x").unwrap().total, 1);
        assert!(tree.element("root").unwrap().children.is_empty());
    }

    #[test]
    fn test_attribute_local_names_and_qualified_element_names() {
        let tree = analyze(
            r#"<xs:schema xmlns:xs="http://www.w3.org/2001/XMLSchema" xmlns="urn:default">
    <xs:element name="root" xml:lang="en"/>
</xs:schema>"#,
        );

        assert_eq!(tree.element("xs:schema").unwrap().total, 1);
        assert_eq!(
            tree.value_count("xs:schema", "xs", "http://www.w3.org/2001/XMLSchema"),
            1
        );
        assert_eq!(tree.value_count("xs:schema", "xmlns", "urn:default"), 1);
        assert_eq!(tree.value_count("xs:element", "lang", "en"), 1);
        assert_eq!(tree.value_count("xs:element", "name", "root"), 1);
        assert_eq!(tree.total_attributes, 4);
    }

    #[test]
    fn test_namespace_declarations_count_as_attributes() {
        let tree = analyze(r#"<a xmlns="urn:x" xmlns:p="urn:p" p:k="v"/>"#);

        assert_eq!(tree.total_attributes, 3);
        let a = tree.element("a").unwrap();
        let names: Vec<&str> = a.children.keys().map(String::as_str).collect();
        assert_eq!(names, vec!["k", "p", "xmlns"]);
        assert_eq!(tree.value_count("a", "xmlns", "urn:x"), 1);
        assert_eq!(tree.value_count("a", "p", "urn:p"), 1);
        assert_eq!(tree.value_count("a", "k", "v"), 1);
        assert!(tree.attribute_totals_consistent());
    }

    #[test]
    fn test_visit_reports_qualified_and_local_attribute_names() {
        let mut seen = Vec::new();
        visit_document(
            r#"<r xmlns:p="urn:p"><p:e p:k="1" k="2"/></r>"#,
            Path::new("visit.xml"),
            |element| seen.push(element),
        )
        .unwrap();

        assert_eq!(seen.len(), 2);
        assert_eq!(seen[0].name, "r");
        assert_eq!(seen[1].name, "p:e");
        let names: Vec<(&str, &str)> = seen[1]
            .attributes
            .iter()
            .map(|a| (a.name.as_str(), a.local_name.as_str()))
            .collect();
        assert_eq!(names, vec![("p:k", "k"), ("k", "k")]);
        assert_eq!(seen[1].attributes[1].value, "2");
    }

    #[test]
    fn test_attribute_values_are_unescaped() {
        let tree = analyze(r#"<a title="Tom &amp; Jerry"/>"#);
        assert_eq!(tree.value_count("a", "title", "Tom & Jerry"), 1);
    }

    #[test]
    fn test_reserved_looking_names_are_counted_as_data() {
        let tree = analyze(r#"<total total="total"><fileName/></total>"#);

        assert_eq!(tree.total_elements, 2);
        assert_eq!(tree.element("total").unwrap().total, 1);
        assert_eq!(tree.value_count("total", "total", "total"), 1);
        assert_eq!(tree.element("fileName").unwrap().total, 1);
    }

    #[test]
    fn test_byte_order_mark_is_ignored() {
        let tree = analyze("\u{feff}<root/>");
        assert_eq!(tree.total_elements, 1);
    }

    #[test]
    fn test_whitespace_around_root_is_allowed() {
        let tree = analyze("\n  <?xml-stylesheet href=\"s.xsl\"?>\n<root/>\n\t \n");
        assert_eq!(tree.total_elements, 1);

        let err = analyze_document("<root/>\n trailing", Path::new("t.xml")).unwrap_err();
        assert!(err.to_string().contains("text outside the root element"));
    }

    #[test]
    fn test_malformed_documents_fail() {
        let cases = [
            "<root><unclosed></root>",
            "<root>",
            "",
            "   ",
            "just text",
            "<a/><b/>",
            "<a x=\"1\" x=\"2\"/>",
            "<a x=\"&unknown;\"/>",
        ];

        for xml in cases {
            let result = analyze_document(xml, Path::new("bad.xml"));
            match result {
                Err(AnalyzeError::Parse { path, .. }) => {
                    assert_eq!(path, PathBuf::from("bad.xml"), "input: {:?}", xml)
                }
                other => panic!("expected parse error for {:?}, got {:?}", xml, other),
            }
        }
    }

    #[test]
    fn test_invalid_utf8_is_a_parse_error() {
        let result = analyze_bytes(&[b'<', b'a', 0xff, b'/', b'>'], Path::new("latin1.xml"));
        assert!(matches!(result, Err(AnalyzeError::Parse { .. })));
    }

    #[tokio::test]
    async fn test_analyze_file_reads_from_disk() {
        let dir = tempfile::TempDir::new().unwrap();
        let path = dir.path().join("doc.xml");
        std::fs::write(&path, r#"<root a="1"/>"#).unwrap();

        let tree = analyze_file(&path).await.unwrap();
        assert_eq!(tree.file_name.as_deref(), Some(path.as_path()));
        assert_eq!(tree.value_count("root", "a", "1"), 1);

        let missing = dir.path().join("missing.xml");
        let err = analyze_file(&missing).await.unwrap_err();
        assert!(matches!(err, AnalyzeError::Read { .. }));
        assert_eq!(err.path(), &missing);
    }
}
