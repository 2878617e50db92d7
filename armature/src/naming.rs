//! Bone and object naming
//!
//! NIF skeletons mark sides inside the name (`Bip01 L Thigh`), while the host
//! mirrors bones by suffix (`Bip01 Thigh.L`). Host names are also limited in
//! length and must be unique, so the import can be lossy; the original long
//! names are kept in a `FullNames` text block so an export can restore them.

use hashbrown::{HashMap, HashSet};

use crate::graph::{NodeGraph, NodeId, NodeKind};

/// Longest name the host accepts for objects and bones
pub const MAX_NAME_LENGTH: usize = 63;

/// Name of the side-channel text block holding `short;long` pairs
pub const FULL_NAMES_TEXT: &str = "FullNames";

const SIDE_PREFIXES: [&str; 2] = ["Bip01", "NPC"];

/// `Bip01 L Foo` -> `Bip01 Foo.L` (same for `R` and the `NPC` prefix)
pub fn bone_name_for_host(name: &str) -> String {
    for prefix in SIDE_PREFIXES {
        for side in ["L", "R"] {
            let marker = format!("{prefix} {side} ");
            if let Some(rest) = name.strip_prefix(marker.as_str()) {
                return format!("{prefix} {rest}.{side}");
            }
        }
    }
    name.to_string()
}

/// `Bip01 Foo.L` -> `Bip01 L Foo`, the inverse of [`bone_name_for_host`]
pub fn bone_name_for_nif(name: &str) -> String {
    for prefix in SIDE_PREFIXES {
        let Some(rest) = name
            .strip_prefix(prefix)
            .and_then(|rest| rest.strip_prefix(' '))
        else {
            continue;
        };
        for side in ["L", "R"] {
            if let Some(base) = rest.strip_suffix(&format!(".{side}")) {
                return format!("{prefix} {side} {base}");
            }
        }
    }
    name.to_string()
}

/// Errors while assigning host names
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum NamingError {
    #[error("ran out of unique names for '{0}'")]
    Exhausted(String),
}

/// Assigns unique host names to nodes and remembers the mapping
#[derive(Debug, Clone, Default)]
pub struct NameRegistry {
    /// Names already taken in the host scene
    taken: HashSet<String>,
    names: HashMap<NodeId, String>,
    blocks: HashMap<String, NodeId>,
    /// Assignment order, for stable `FullNames` output
    order: Vec<NodeId>,
}

impl NameRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registry aware of names that already exist in the host scene
    pub fn with_taken<I, S>(taken: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            taken: taken.into_iter().map(Into::into).collect(),
            ..Self::default()
        }
    }

    /// Bind a node to a name chosen elsewhere (e.g. an existing host bone)
    pub fn bind(&mut self, node: NodeId, name: impl Into<String>) {
        let name = name.into();
        if !self.names.contains_key(&node) {
            self.order.push(node);
        }
        self.taken.insert(name.clone());
        self.blocks.insert(name.clone(), node);
        self.names.insert(node, name);
    }

    /// Unique host name for `node`, assigned on first use
    pub fn import_name(&mut self, graph: &NodeGraph, node: NodeId) -> Result<String, NamingError> {
        if let Some(name) = self.names.get(&node) {
            return Ok(name.clone());
        }

        let block = graph.node(node);
        let nif_name = if !block.name.is_empty() {
            block.name.as_str()
        } else if block.kind == NodeKind::RootCollisionNode {
            "RootCollisionNode"
        } else {
            "noname"
        };

        let mut chosen = None;
        for unique in -1..1000 {
            let short = if unique < 0 {
                truncate(nif_name, MAX_NAME_LENGTH - 1).to_string()
            } else {
                format!("{}.{:02}", truncate(nif_name, MAX_NAME_LENGTH - 4), unique)
            };
            let short = bone_name_for_host(&short);
            if !self.taken.contains(&short) {
                chosen = Some(short);
                break;
            }
        }
        let short = chosen.ok_or_else(|| NamingError::Exhausted(nif_name.to_string()))?;

        tracing::debug!("Selected unique name '{}' for '{}'", short, block.name);
        self.bind(node, short.clone());
        Ok(short)
    }

    pub fn name(&self, node: NodeId) -> Option<&str> {
        self.names.get(&node).map(String::as_str)
    }

    pub fn block(&self, name: &str) -> Option<NodeId> {
        self.blocks.get(name).copied()
    }

    /// Long names for every node whose host name differs from its NIF name
    pub fn full_names(&self, graph: &NodeGraph) -> FullNames {
        let mut full = FullNames::default();
        for &node in &self.order {
            let long = &graph.node(node).name;
            let short = &self.names[&node];
            if !long.is_empty() && short != long {
                full.insert(short.clone(), long.clone());
            }
        }
        full
    }
}

/// Truncate to at most `max` characters
fn truncate(name: &str, max: usize) -> &str {
    match name.char_indices().nth(max) {
        Some((end, _)) => &name[..end],
        None => name,
    }
}

/// `short;long` name pairs stored next to the imported scene
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct FullNames {
    entries: Vec<(String, String)>,
}

impl FullNames {
    pub fn insert(&mut self, short: String, long: String) {
        match self.entries.iter_mut().find(|(s, _)| *s == short) {
            Some(entry) => entry.1 = long,
            None => self.entries.push((short, long)),
        }
    }

    /// Original NIF name for a host name; unknown names map to themselves
    pub fn full_name<'a>(&'a self, short: &'a str) -> &'a str {
        self.entries
            .iter()
            .find(|(s, _)| s == short)
            .map(|(_, long)| long.as_str())
            .unwrap_or(short)
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &str)> {
        self.entries.iter().map(|(s, l)| (s.as_str(), l.as_str()))
    }

    /// Parse the text block; malformed lines are ignored
    pub fn parse(text: &str) -> Self {
        let mut full = Self::default();
        for line in text.lines() {
            if let Some((short, long)) = line.split_once(';') {
                full.insert(short.to_string(), long.to_string());
            } else if !line.trim().is_empty() {
                tracing::warn!("Ignoring malformed {} line '{}'", FULL_NAMES_TEXT, line);
            }
        }
        full
    }

    pub fn to_text(&self) -> String {
        self.entries
            .iter()
            .map(|(short, long)| format!("{short};{long}\n"))
            .collect()
    }
}
