//! Lookups over MediaWiki preprocessor parse trees.
//!
//! `prop=parsetree` returns wikitext as XML: every `{{template}}` becomes a
//! `<template>` element with a `<title>` and one `<part>` per parameter,
//! each holding a `<name>` and a `<value>`.

use std::sync::LazyLock;

use quick_xml::Reader;
use quick_xml::escape::unescape;
use quick_xml::events::Event;
use regex::Regex;

use etlflow_shared::{EtlError, Result};

/// Navbox wrapper template listing a page's navigation boxes.
pub const NAVBOXES_TEMPLATE: &str = "Navboxes";

/// Template used by county navigation boxes in the US.
pub const COUNTY_NAVBOX_TEMPLATE: &str = "US county navigation box";

/// List entries of the form `* [[Target|Label]]`, optionally followed by `‡`.
static LISTED_LINK: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?m)^\* *\[\[([^|\]]+)\|[^|\]]+\]\]‡? *$").expect("valid list regex")
});

/// An element of a parse tree.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Node {
    pub name: String,
    /// Text directly inside this element, children excluded.
    pub text: String,
    pub children: Vec<Node>,
}

impl Node {
    fn element(name: String) -> Self {
        Self {
            name,
            ..Self::default()
        }
    }

    /// This node and everything below it, depth-first in document order.
    pub fn descendants(&self) -> Descendants<'_> {
        Descendants { stack: vec![self] }
    }

    /// First direct child called `name`.
    pub fn child(&self, name: &str) -> Option<&Node> {
        self.children.iter().find(|c| c.name == name)
    }

    /// Trimmed direct text.
    pub fn trimmed_text(&self) -> &str {
        self.text.trim()
    }

    /// Title of a `<template>` element.
    pub fn template_title(&self) -> Option<&str> {
        if self.name != "template" {
            return None;
        }
        self.child("title").map(Node::trimmed_text)
    }

    /// Every template below this node whose title is `title`.
    pub fn templates<'a>(&'a self, title: &'a str) -> impl Iterator<Item = &'a Node> + 'a {
        self.descendants()
            .filter(move |n| n.template_title() == Some(title))
    }

    /// The `<value>` of the first `<part>` below this node named `name`.
    pub fn part_value(&self, name: &str) -> Option<&Node> {
        self.descendants()
            .filter(|n| n.name == "part")
            .find(|part| part.child("name").map(Node::trimmed_text) == Some(name))
            .and_then(|part| part.child("value"))
    }
}

/// Depth-first iterator returned by [`Node::descendants`].
pub struct Descendants<'a> {
    stack: Vec<&'a Node>,
}

impl<'a> Iterator for Descendants<'a> {
    type Item = &'a Node;

    fn next(&mut self) -> Option<Self::Item> {
        let node = self.stack.pop()?;
        self.stack.extend(node.children.iter().rev());
        Some(node)
    }
}

/// Parse an XML parse tree into a [`Node`] tree.
///
/// The returned node is a nameless document node whose children are the
/// top-level elements (normally a single `<root>`).
pub fn parse(xml: &str) -> Result<Node> {
    let mut reader = Reader::from_str(xml);
    let mut stack = vec![Node::default()];

    loop {
        let event = reader
            .read_event()
            .map_err(|e| EtlError::parse(format!("invalid parse tree XML: {e}")))?;

        match event {
            Event::Start(start) => {
                let name = String::from_utf8_lossy(start.name().as_ref()).into_owned();
                stack.push(Node::element(name));
            }
            Event::Empty(empty) => {
                let name = String::from_utf8_lossy(empty.name().as_ref()).into_owned();
                current(&mut stack)?.children.push(Node::element(name));
            }
            Event::End(_) => {
                if stack.len() < 2 {
                    return Err(EtlError::parse("unbalanced closing tag in parse tree"));
                }
                let node = stack.pop().unwrap_or_default();
                current(&mut stack)?.children.push(node);
            }
            Event::Text(text) => {
                let text = text
                    .unescape()
                    .map_err(|e| EtlError::parse(format!("invalid text in parse tree: {e}")))?;
                current(&mut stack)?.text.push_str(&text);
            }
            Event::CData(data) => {
                current(&mut stack)?
                    .text
                    .push_str(&String::from_utf8_lossy(&data));
            }
            Event::Eof => break,
            _ => {}
        }
    }

    match (stack.pop(), stack.is_empty()) {
        (Some(document), true) => Ok(document),
        _ => Err(EtlError::parse("unclosed element in parse tree")),
    }
}

fn current(stack: &mut [Node]) -> Result<&mut Node> {
    stack
        .last_mut()
        .ok_or_else(|| EtlError::parse("parse tree has no open element"))
}

/// `Template:` page titles listed in the page's `{{Navboxes|list=...}}`.
pub fn navbox_templates(page: &Node) -> Vec<String> {
    page.templates(NAVBOXES_TEMPLATE)
        .filter_map(|navboxes| navboxes.part_value("list"))
        .flat_map(|list| list.children.iter())
        .filter_map(Node::template_title)
        .map(|title| format!("Template:{title}"))
        .collect()
}

/// Link targets of every `* [[Target|Label]]` line in raw parse tree text,
/// with XML entities decoded.
pub fn listed_links(raw: &str) -> Result<Vec<String>> {
    LISTED_LINK
        .captures_iter(raw)
        .map(|caps| {
            let target = caps[1].trim();
            unescape(target)
                .map(|text| text.into_owned())
                .map_err(|e| EtlError::parse(format!("bad entity in link '{target}': {e}")))
        })
        .collect()
}

/// Strip wiki link markup: `[[Target|Label]]` becomes `Target`.
pub fn link_target(text: &str) -> &str {
    let text = text.trim();
    let inner = text
        .strip_prefix("[[")
        .and_then(|t| t.strip_suffix("]]"))
        .unwrap_or(text);
    inner.split('|').next().unwrap_or(inner).trim()
}

#[cfg(test)]
mod tests {
    use super::*;

    const CITY_TREE: &str = r#"<root>'''Cincinnati''' is a city.
<template><title>Navboxes</title><part><name>list</name><equals>=</equals><value>
<template><title>Hamilton County, Ohio</title></template>
<template><title>Ohio cities</title></template>
</value></part></template></root>"#;

    const COUNTY_TREE: &str = r#"<root><template><title>US county navigation box</title>
<part><name>county</name><equals>=</equals><value>Hamilton County</value></part>
<part><name>seat</name><equals>=</equals><value>[[Cincinnati]]</value></part>
<part><name>cities</name><equals>=</equals><value>
* [[Cincinnati|Cincinnati]]‡
* [[Norwood, Ohio|Norwood]]
*[[Reading, Ohio|Reading]]
* [[Anderson Township]]
</value></part></template></root>"#;

    #[test]
    fn test_parse_builds_nested_nodes() {
        let doc = parse("<root>a<b>x &amp; y</b><c/>z</root>").unwrap();
        let root = doc.child("root").expect("root");
        assert_eq!(root.text, "az");
        assert_eq!(root.children.len(), 2);
        assert_eq!(root.children[0].text, "x & y");
        assert_eq!(root.children[1].name, "c");
    }

    #[test]
    fn test_parse_rejects_broken_xml() {
        assert!(parse("<root><template></root>").is_err());
        assert!(parse("<root>").is_err());
    }

    #[test]
    fn test_navbox_templates() {
        let doc = parse(CITY_TREE).unwrap();
        assert_eq!(
            navbox_templates(&doc),
            vec!["Template:Hamilton County, Ohio", "Template:Ohio cities"]
        );
    }

    #[test]
    fn test_navbox_templates_without_navboxes() {
        let doc = parse("<root>No navigation here.</root>").unwrap();
        assert!(navbox_templates(&doc).is_empty());
    }

    #[test]
    fn test_county_navbox_seat() {
        let doc = parse(COUNTY_TREE).unwrap();
        let navbox = doc.templates(COUNTY_NAVBOX_TEMPLATE).next().expect("navbox");
        let seat = navbox.part_value("seat").expect("seat");
        assert_eq!(link_target(&seat.text), "Cincinnati");
    }

    #[test]
    fn test_listed_links() {
        assert_eq!(
            listed_links(COUNTY_TREE).unwrap(),
            vec!["Cincinnati", "Norwood, Ohio", "Reading, Ohio"]
        );
    }

    #[test]
    fn test_listed_links_decode_entities() {
        let raw = "<value>\n* [[Fairfax &amp; Mariemont|Fairfax]]\n* [[O&apos;Bannon, Ohio|O'Bannon]]\n</value>";
        assert_eq!(
            listed_links(raw).unwrap(),
            vec!["Fairfax & Mariemont", "O'Bannon, Ohio"]
        );
        assert!(listed_links("* [[Broken &bogus; Town|Town]]").is_err());
    }

    #[test]
    fn test_link_target() {
        assert_eq!(link_target("[[Cincinnati]]"), "Cincinnati");
        assert_eq!(link_target(" [[Batavia, Ohio|Batavia]] "), "Batavia, Ohio");
        assert_eq!(link_target("Georgetown"), "Georgetown");
    }
}
