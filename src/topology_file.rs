//! Parser for explicit topology files.
//!
//! The format is line-oriented and split into sections. Blank lines and lines starting with `#` are ignored.
//!
//! ```text
//! [ids]
//! 0 1 2 3
//! [count]
//! 4
//! [root]
//! random
//! [edges]
//! 0 1
//! 1 2
//! 2 3
//! [attributes]
//! 0 color="red" weight=3
//! ```
//!
//! `[ids]`, `[count]`, `[root]` and `[edges]` are required, `[attributes]` is optional. Identifiers may be separated
//! by whitespace or commas. Attribute values are parsed as JSON and fall back to plain strings.

use std::path::Path;

use rustc_hash::FxHashSet;
use serde_json::Value;

use crate::error::ConfigError;
use crate::node::NodeId;

/// Root declared by a topology file.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum DeclaredRoot {
    /// Pick a root uniformly at random.
    Random,
    /// Use this node.
    Node(NodeId),
}

/// Parsed and validated contents of a topology file.
#[derive(Clone, Debug, PartialEq)]
pub struct TopologyFile {
    /// Declared identifiers in declaration order.
    pub ids: Vec<NodeId>,
    /// Declared node count.
    pub count: usize,
    /// Declared root.
    pub root: DeclaredRoot,
    /// Undirected edges.
    pub edges: Vec<(NodeId, NodeId)>,
    /// Initial node fields.
    pub attributes: Vec<(NodeId, String, Value)>,
}

#[derive(Clone, Copy, PartialEq, Eq, Debug)]
enum Section {
    Ids,
    Count,
    Root,
    Edges,
    Attributes,
}

impl Section {
    fn parse(name: &str) -> Option<Self> {
        match name.trim().to_ascii_lowercase().as_str() {
            "ids" => Some(Section::Ids),
            "count" => Some(Section::Count),
            "root" => Some(Section::Root),
            "edges" => Some(Section::Edges),
            "attributes" => Some(Section::Attributes),
            _ => None,
        }
    }
}

fn parse_error(line: usize, message: impl Into<String>) -> ConfigError {
    ConfigError::TopologyParse {
        line,
        message: message.into(),
    }
}

fn parse_id(token: &str, line: usize) -> Result<NodeId, ConfigError> {
    token
        .trim()
        .parse::<NodeId>()
        .map_err(|_| parse_error(line, format!("`{}` is not a valid node identifier", token.trim())))
}

fn tokens(line: &str) -> impl Iterator<Item = &str> {
    line.split(|c: char| c.is_whitespace() || c == ',').filter(|t| !t.is_empty())
}

impl TopologyFile {
    /// Reads and parses a topology file.
    pub fn load(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        let text = std::fs::read_to_string(path).map_err(|source| ConfigError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        Self::parse(&text)
    }

    /// Parses topology file contents and validates their consistency.
    pub fn parse(text: &str) -> Result<Self, ConfigError> {
        let mut seen = Vec::new();
        let mut section = None;
        let mut ids = Vec::new();
        let mut count = None;
        let mut root = None;
        let mut edges = Vec::new();
        let mut attributes = Vec::new();

        for (idx, raw) in text.lines().enumerate() {
            let line_no = idx + 1;
            let line = raw.trim();
            if line.is_empty() || line.starts_with('#') {
                continue;
            }
            if let Some(name) = line.strip_prefix('[').and_then(|l| l.strip_suffix(']')) {
                let next = Section::parse(name).ok_or_else(|| parse_error(line_no, format!("unknown section [{}]", name)))?;
                if seen.contains(&next) {
                    return Err(parse_error(line_no, format!("duplicate section [{}]", name)));
                }
                seen.push(next);
                section = Some(next);
                continue;
            }
            match section {
                None => return Err(parse_error(line_no, "content before the first section")),
                Some(Section::Ids) => {
                    for token in tokens(line) {
                        ids.push(parse_id(token, line_no)?);
                    }
                }
                Some(Section::Count) => {
                    if count.is_some() {
                        return Err(parse_error(line_no, "node count declared twice"));
                    }
                    let value = line
                        .parse::<usize>()
                        .map_err(|_| parse_error(line_no, format!("`{}` is not a valid node count", line)))?;
                    count = Some(value);
                }
                Some(Section::Root) => {
                    if root.is_some() {
                        return Err(parse_error(line_no, "root declared twice"));
                    }
                    root = Some(if line.eq_ignore_ascii_case("random") {
                        DeclaredRoot::Random
                    } else {
                        DeclaredRoot::Node(parse_id(line, line_no)?)
                    });
                }
                Some(Section::Edges) => {
                    let endpoints = tokens(line).collect::<Vec<_>>();
                    if endpoints.len() != 2 {
                        return Err(parse_error(line_no, "an edge must have exactly two endpoints"));
                    }
                    let u = parse_id(endpoints[0], line_no)?;
                    let v = parse_id(endpoints[1], line_no)?;
                    if u == v {
                        return Err(parse_error(line_no, format!("self-loop on node {}", u)));
                    }
                    edges.push((u, v));
                }
                Some(Section::Attributes) => {
                    let mut parts = line.split_whitespace();
                    let node = parse_id(parts.next().unwrap_or_default(), line_no)?;
                    for pair in parts {
                        let (name, value) = pair
                            .split_once('=')
                            .ok_or_else(|| parse_error(line_no, format!("attribute `{}` is not name=value", pair)))?;
                        if name.is_empty() {
                            return Err(parse_error(line_no, "empty attribute name"));
                        }
                        let value = serde_json::from_str(value).unwrap_or_else(|_| Value::String(value.to_string()));
                        attributes.push((node, name.to_string(), value));
                    }
                }
            }
        }

        let missing = [
            (Section::Ids, "ids"),
            (Section::Count, "count"),
            (Section::Root, "root"),
            (Section::Edges, "edges"),
        ]
        .into_iter()
        .find(|(s, _)| !seen.contains(s));
        if let Some((_, name)) = missing {
            return Err(ConfigError::TopologyInvalid(format!("missing section [{}]", name)));
        }

        let file = TopologyFile {
            ids,
            count: count.ok_or_else(|| ConfigError::TopologyInvalid("node count is empty".to_string()))?,
            root: root.ok_or_else(|| ConfigError::TopologyInvalid("root is empty".to_string()))?,
            edges,
            attributes,
        };
        file.validate()?;
        Ok(file)
    }

    fn validate(&self) -> Result<(), ConfigError> {
        let mut declared = FxHashSet::default();
        for id in &self.ids {
            if !declared.insert(*id) {
                return Err(ConfigError::TopologyInvalid(format!("identifier {} declared twice", id)));
            }
        }
        if self.ids.len() != self.count {
            return Err(ConfigError::TopologyInvalid(format!(
                "{} identifiers declared but node count is {}",
                self.ids.len(),
                self.count
            )));
        }
        if self.count == 0 {
            return Err(ConfigError::InvalidNodeCount(0));
        }
        if let DeclaredRoot::Node(root) = self.root {
            if !declared.contains(&root) {
                return Err(ConfigError::TopologyInvalid(format!("root {} is not a declared identifier", root)));
            }
        }
        for (u, v) in &self.edges {
            for endpoint in [u, v] {
                if !declared.contains(endpoint) {
                    return Err(ConfigError::TopologyInvalid(format!(
                        "edge {}-{} references undeclared identifier {}",
                        u, v, endpoint
                    )));
                }
            }
        }
        for (node, name, _) in &self.attributes {
            if !declared.contains(node) {
                return Err(ConfigError::TopologyInvalid(format!(
                    "attribute `{}` set on undeclared identifier {}",
                    name, node
                )));
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const SQUARE: &str = "
# four nodes in a ring
[ids]
10, 20, 30, 40
[count]
4
[root]
20
[edges]
10 20
20 30
30 40
40 10
[attributes]
10 color=\"red\" weight=3 label=plain
";

    #[test]
    fn test_parse_valid_file() {
        let file = TopologyFile::parse(SQUARE).unwrap();
        assert_eq!(file.ids, vec![10, 20, 30, 40]);
        assert_eq!(file.count, 4);
        assert_eq!(file.root, DeclaredRoot::Node(20));
        assert_eq!(file.edges.len(), 4);
        assert_eq!(file.attributes.len(), 3);
        assert_eq!(file.attributes[0].2, Value::from("red"));
        assert_eq!(file.attributes[1].2, Value::from(3));
        assert_eq!(file.attributes[2].2, Value::from("plain"));
    }

    #[test]
    fn test_random_root() {
        let file = TopologyFile::parse("[ids]\n1 2\n[count]\n2\n[root]\nRandom\n[edges]\n1 2\n").unwrap();
        assert_eq!(file.root, DeclaredRoot::Random);
    }

    #[test]
    fn test_undeclared_endpoint() {
        let err = TopologyFile::parse("[ids]\n1 2\n[count]\n2\n[root]\n1\n[edges]\n1 3\n").unwrap_err();
        assert!(matches!(err, ConfigError::TopologyInvalid(_)));
    }

    #[test]
    fn test_undeclared_root() {
        let err = TopologyFile::parse("[ids]\n1 2\n[count]\n2\n[root]\n5\n[edges]\n1 2\n").unwrap_err();
        assert!(matches!(err, ConfigError::TopologyInvalid(_)));
    }

    #[test]
    fn test_count_mismatch() {
        let err = TopologyFile::parse("[ids]\n1 2\n[count]\n3\n[root]\n1\n[edges]\n1 2\n").unwrap_err();
        assert!(matches!(err, ConfigError::TopologyInvalid(_)));
    }

    #[test]
    fn test_malformed_lines() {
        let err = TopologyFile::parse("[ids]\n1 x\n").unwrap_err();
        assert!(matches!(err, ConfigError::TopologyParse { line: 2, .. }));
        let err = TopologyFile::parse("1 2\n[ids]\n").unwrap_err();
        assert!(matches!(err, ConfigError::TopologyParse { line: 1, .. }));
        let err = TopologyFile::parse("[ids]\n1 2\n[nodes]\n").unwrap_err();
        assert!(matches!(err, ConfigError::TopologyParse { line: 3, .. }));
        let err = TopologyFile::parse("[ids]\n1 2\n[count]\n2\n[root]\n1\n[edges]\n1 2 3\n").unwrap_err();
        assert!(matches!(err, ConfigError::TopologyParse { line: 8, .. }));
    }

    #[test]
    fn test_missing_section() {
        let err = TopologyFile::parse("[ids]\n1 2\n[count]\n2\n[edges]\n1 2\n").unwrap_err();
        assert!(matches!(err, ConfigError::TopologyInvalid(_)));
    }
}
