//! Ordered configuration trees.
//!
//! A [`ConfigTree`] node carries a string value and an ordered list of
//! keyed children; keys may repeat. Trees loaded from XML keep element
//! attributes under a `<xmlattr>` child, so `<service uid="a"/>` becomes
//! `service.<xmlattr>.uid = "a"`.

use std::fmt;
use std::str::FromStr;

use quick_xml::Reader;
use quick_xml::events::{BytesStart, Event};

use crate::error::{ConfigError, ConfigResult};

/// Key of the child holding XML attributes.
pub const XMLATTR: &str = "<xmlattr>";

/// Parses the boolean spellings accepted in configuration files.
pub fn parse_bool(value: &str) -> Option<bool> {
    match value.trim() {
        "true" | "yes" | "on" | "1" => Some(true),
        "false" | "no" | "off" | "0" => Some(false),
        _ => None,
    }
}

/// A node of a configuration tree.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ConfigTree {
    data: String,
    children: Vec<(String, ConfigTree)>,
}

impl ConfigTree {
    pub fn new() -> Self {
        Self::default()
    }

    /// A leaf holding `data`.
    pub fn with_data(data: impl Into<String>) -> Self {
        Self {
            data: data.into(),
            children: Vec::new(),
        }
    }

    pub fn data(&self) -> &str {
        &self.data
    }

    pub fn set_data(&mut self, data: impl Into<String>) {
        self.data = data.into();
    }

    pub fn is_empty(&self) -> bool {
        self.data.is_empty() && self.children.is_empty()
    }

    pub fn len(&self) -> usize {
        self.children.len()
    }

    /// Direct children in document order.
    pub fn children(&self) -> impl Iterator<Item = (&str, &ConfigTree)> {
        self.children.iter().map(|(k, v)| (k.as_str(), v))
    }

    /// Direct children named `key`, in document order.
    pub fn equal_range<'a>(&'a self, key: &'a str) -> impl Iterator<Item = &'a ConfigTree> + 'a {
        self.children
            .iter()
            .filter(move |(k, _)| k == key)
            .map(|(_, v)| v)
    }

    pub fn count(&self, key: &str) -> usize {
        self.equal_range(key).count()
    }

    /// Appends a child, even if one with the same key exists.
    pub fn push_child(&mut self, key: impl Into<String>, child: ConfigTree) -> &mut ConfigTree {
        self.children.push((key.into(), child));
        let last = self.children.len() - 1;
        &mut self.children[last].1
    }

    /// Appends a child at the dotted `path`; intermediate nodes are reused
    /// or created.
    pub fn add(&mut self, path: &str, value: impl Into<String>) -> &mut ConfigTree {
        match path.rsplit_once('.') {
            Some((parent, leaf)) => self
                .ensure_path(parent)
                .push_child(leaf, ConfigTree::with_data(value)),
            None => self.push_child(path, ConfigTree::with_data(value)),
        }
    }

    /// Sets the value at the dotted `path`, creating nodes as needed.
    pub fn put(&mut self, path: &str, value: impl Into<String>) -> &mut ConfigTree {
        let node = self.ensure_path(path);
        node.data = value.into();
        node
    }

    fn ensure_path(&mut self, path: &str) -> &mut ConfigTree {
        let mut node = self;
        for segment in path.split('.') {
            let index = match node.children.iter().position(|(k, _)| k == segment) {
                Some(index) => index,
                None => {
                    node.children.push((segment.to_string(), ConfigTree::new()));
                    node.children.len() - 1
                }
            };
            node = &mut node.children[index].1;
        }
        node
    }

    /// The first node at the dotted `path`, if any.
    pub fn get_child_optional(&self, path: &str) -> Option<&ConfigTree> {
        let mut node = self;
        for segment in path.split('.') {
            node = node
                .children
                .iter()
                .find(|(k, _)| k == segment)
                .map(|(_, v)| v)?;
        }
        Some(node)
    }

    /// The first node at the dotted `path`.
    pub fn get_child(&self, path: &str) -> ConfigResult<&ConfigTree> {
        self.get_child_optional(path)
            .ok_or_else(|| ConfigError::PathNotFound(path.to_string()))
    }

    /// Converts the value at `path`.
    pub fn get<T: FromStr>(&self, path: &str) -> ConfigResult<T> {
        let node = self.get_child(path)?;
        node.data.trim().parse().map_err(|_| ConfigError::BadValue {
            path: path.to_string(),
            value: node.data.clone(),
        })
    }

    /// Converts the value at `path`; `None` if missing or unconvertible.
    pub fn get_optional<T: FromStr>(&self, path: &str) -> Option<T> {
        self.get(path).ok()
    }

    /// Converts the value at `path`, falling back to `default`.
    pub fn get_or<T: FromStr>(&self, path: &str, default: T) -> T {
        self.get_optional(path).unwrap_or(default)
    }

    /// Reads a boolean written as `true/false`, `yes/no`, `on/off` or `1/0`.
    pub fn get_bool(&self, path: &str) -> ConfigResult<bool> {
        let node = self.get_child(path)?;
        parse_bool(&node.data).ok_or_else(|| ConfigError::BadValue {
            path: path.to_string(),
            value: node.data.clone(),
        })
    }

    /// Calls `f` on the value of this node and of every descendant,
    /// attributes included.
    pub fn for_each_data_mut(&mut self, f: &mut impl FnMut(&mut String)) {
        f(&mut self.data);
        for (_, child) in &mut self.children {
            child.for_each_data_mut(f);
        }
    }

    /// The XML attribute `name` of this node.
    pub fn attr(&self, name: &str) -> Option<&str> {
        self.get_child_optional(XMLATTR)?
            .get_child_optional(name)
            .map(ConfigTree::data)
    }

    /// Sets the XML attribute `name` of this node.
    pub fn set_attr(&mut self, name: &str, value: impl Into<String>) {
        self.ensure_path(XMLATTR).put(name, value);
    }

    /// Parses an XML document. The returned tree is the document node:
    /// its single child is the root element.
    pub fn from_xml(xml: &str) -> ConfigResult<ConfigTree> {
        let mut reader = Reader::from_str(xml);
        reader.config_mut().trim_text(true);

        let mut stack: Vec<(String, ConfigTree)> = vec![(String::new(), ConfigTree::new())];
        loop {
            match reader.read_event()? {
                Event::Start(start) => {
                    let name = element_name(&start);
                    stack.push((name, element_tree(&start)?));
                }
                Event::Empty(start) => {
                    let name = element_name(&start);
                    let node = element_tree(&start)?;
                    if let Some((_, parent)) = stack.last_mut() {
                        parent.children.push((name, node));
                    }
                }
                Event::End(_) => {
                    let Some((name, node)) = stack.pop() else {
                        return Err(ConfigError::Xml("unbalanced closing tag".into()));
                    };
                    let Some((_, parent)) = stack.last_mut() else {
                        return Err(ConfigError::Xml("unbalanced closing tag".into()));
                    };
                    parent.children.push((name, node));
                }
                Event::Text(text) => {
                    let text = text.unescape()?;
                    if let Some((_, node)) = stack.last_mut() {
                        node.data.push_str(text.trim());
                    }
                }
                Event::CData(data) => {
                    let text = String::from_utf8_lossy(&data).into_owned();
                    if let Some((_, node)) = stack.last_mut() {
                        node.data.push_str(&text);
                    }
                }
                Event::Eof => break,
                _ => {}
            }
        }

        match (stack.pop(), stack.is_empty()) {
            (Some((_, document)), true) => Ok(document),
            _ => Err(ConfigError::Xml("unclosed element".into())),
        }
    }

    fn dump(&self, f: &mut fmt::Formatter<'_>, depth: usize) -> fmt::Result {
        for (key, child) in &self.children {
            write!(f, "{:indent$}{key}", "", indent = depth * 4)?;
            if !child.data.is_empty() {
                write!(f, " \"{}\"", child.data)?;
            }
            writeln!(f)?;
            child.dump(f, depth + 1)?;
        }
        Ok(())
    }
}

fn element_name(start: &BytesStart<'_>) -> String {
    String::from_utf8_lossy(start.name().as_ref()).into_owned()
}

fn element_tree(start: &BytesStart<'_>) -> ConfigResult<ConfigTree> {
    let mut node = ConfigTree::new();
    let mut attrs = ConfigTree::new();
    for attr in start.attributes() {
        let attr = attr?;
        let key = String::from_utf8_lossy(attr.key.as_ref()).into_owned();
        let value = attr.unescape_value()?.into_owned();
        attrs.children.push((key, ConfigTree::with_data(value)));
    }
    if !attrs.children.is_empty() {
        node.children.push((XMLATTR.to_string(), attrs));
    }
    Ok(node)
}

impl fmt::Display for ConfigTree {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if !self.data.is_empty() {
            writeln!(f, "\"{}\"", self.data)?;
        }
        self.dump(f, 0)
    }
}

impl FromStr for ConfigTree {
    type Err = ConfigError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::from_xml(s)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const SERVICE: &str = r#"
        <service uid="reader" type="demo::Reader" autoConnect="yes">
            <in key="image" uid="img"/>
            <in key="mask" uid="msk" optional="true"/>
            <config threshold="4">
                <label>Hello &amp; bye</label>
            </config>
        </service>
    "#;

    #[test]
    fn test_xml_attributes_and_children() {
        let doc = ConfigTree::from_xml(SERVICE).unwrap();
        let service = doc.get_child("service").unwrap();

        assert_eq!(service.attr("uid"), Some("reader"));
        assert_eq!(service.get::<String>("<xmlattr>.type").unwrap(), "demo::Reader");
        assert_eq!(service.get_bool("<xmlattr>.autoConnect"), Ok(true));
        assert_eq!(service.count("in"), 2);

        let keys: Vec<_> = service
            .equal_range("in")
            .filter_map(|n| n.attr("key"))
            .collect();
        assert_eq!(keys, vec!["image", "mask"]);
        assert_eq!(service.get::<i32>("config.<xmlattr>.threshold"), Ok(4));
        assert_eq!(service.get::<String>("config.label").unwrap(), "Hello & bye");
    }

    #[test]
    fn test_missing_and_bad_values() {
        let doc = ConfigTree::from_xml(SERVICE).unwrap();
        let service = doc.get_child("service").unwrap();

        assert_eq!(
            service.get::<i32>("nope"),
            Err(ConfigError::PathNotFound("nope".into()))
        );
        assert!(matches!(
            service.get::<i32>("<xmlattr>.uid"),
            Err(ConfigError::BadValue { .. })
        ));
        assert_eq!(service.get_or("config.<xmlattr>.missing", 7), 7);
        assert_eq!(service.get_optional::<u8>("<xmlattr>.uid"), None);
    }

    #[test]
    fn test_malformed_xml_is_rejected() {
        assert!(matches!(
            ConfigTree::from_xml("<a><b></a>"),
            Err(ConfigError::Xml(_))
        ));
        assert!(matches!(ConfigTree::from_xml("<a>"), Err(ConfigError::Xml(_))));
    }

    #[test]
    fn test_put_and_add() {
        let mut tree = ConfigTree::new();
        tree.put("a.b", "1");
        tree.put("a.b", "2");
        tree.add("a.c", "x");
        tree.add("a.c", "y");
        tree.set_attr("id", "root");

        assert_eq!(tree.get::<i32>("a.b"), Ok(2));
        let values: Vec<_> = tree
            .get_child("a")
            .unwrap()
            .equal_range("c")
            .map(ConfigTree::data)
            .collect();
        assert_eq!(values, vec!["x", "y"]);
        assert_eq!(tree.attr("id"), Some("root"));
    }

    #[test]
    fn test_for_each_data_mut_reaches_attributes() {
        let mut tree = ConfigTree::from_xml(SERVICE).unwrap();
        tree.for_each_data_mut(&mut |value| *value = value.to_uppercase());
        let service = tree.get_child("service").unwrap();
        assert_eq!(service.attr("uid"), Some("READER"));
        assert_eq!(service.get::<String>("config.label"), Ok("HELLO & BYE".into()));
    }

    #[test]
    fn test_display_dumps_nested_nodes() {
        let mut tree = ConfigTree::new();
        tree.put("service.<xmlattr>.uid", "reader");
        let dump = tree.to_string();
        assert_eq!(dump, "service\n    <xmlattr>\n        uid \"reader\"\n");
    }
}
