//! Read-only NIF node graph
//!
//! Nodes live in a flat arena and refer to each other by [`NodeId`]. The graph
//! is built once from the blocks handed over by the format layer; parent links
//! are derived from the children lists, the same way the importer re-parents
//! the tree before walking it.

use hashbrown::HashSet;
use serde::{Deserialize, Serialize};

use crate::error::StructureError;

/// Stable reference to a node in a [`NodeGraph`]
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct NodeId(pub usize);

impl NodeId {
    pub fn index(self) -> usize {
        self.0
    }
}

/// Block type tag
///
/// The variant set is closed: NiNode-like containers, geometry, and the
/// handful of other block types the importer distinguishes.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum NodeKind {
    /// Plain NiNode
    #[default]
    Node,
    /// NiLODNode (never a bone, never a grouping node)
    LodNode,
    /// RootCollisionNode
    RootCollisionNode,
    /// NiTriShape
    TriShape,
    /// NiTriStrips
    TriStrips,
    /// NiCamera
    Camera,
    /// Any other block with a transform
    Other,
    /// NiProperty and friends (no transform)
    Property,
    /// NiExtraData and friends (no transform)
    ExtraData,
}

impl NodeKind {
    /// NiNode or one of its subclasses
    pub fn is_ninode(self) -> bool {
        matches!(self, Self::Node | Self::LodNode | Self::RootCollisionNode)
    }

    /// Triangle-based geometry
    pub fn is_geometry(self) -> bool {
        matches!(self, Self::TriShape | Self::TriStrips)
    }

    /// Blocks that carry a transform and take part in the scene hierarchy
    pub fn is_spatial(self) -> bool {
        !matches!(self, Self::Property | Self::ExtraData)
    }
}

/// Local transform in NIF convention
///
/// `rotation` holds the matrix rows exactly as stored in the file, which are
/// the columns of the rotation acting on column vectors. Scale is uniform.
#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct NifTransform {
    pub translation: [f32; 3],
    pub rotation: [[f32; 3]; 3],
    pub scale: f32,
}

impl NifTransform {
    pub const IDENTITY: Self = Self {
        translation: [0.0, 0.0, 0.0],
        rotation: [[1.0, 0.0, 0.0], [0.0, 1.0, 0.0], [0.0, 0.0, 1.0]],
        scale: 1.0,
    };

    pub fn from_translation(translation: [f32; 3]) -> Self {
        Self {
            translation,
            ..Self::IDENTITY
        }
    }
}

impl Default for NifTransform {
    fn default() -> Self {
        Self::IDENTITY
    }
}

/// Skin instance attached to a geometry block
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct SkinInstance {
    /// Node the skin is bound to
    pub skeleton_root: NodeId,
    /// Influencing bones; entries can be null in real files
    #[serde(default)]
    pub bones: Vec<Option<NodeId>>,
}

/// A single block of the scene graph
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Node {
    #[serde(default)]
    pub name: String,
    #[serde(default)]
    pub kind: NodeKind,
    #[serde(default)]
    pub children: Vec<NodeId>,
    #[serde(default)]
    pub transform: NifTransform,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub skin: Option<SkinInstance>,
    #[serde(skip)]
    parent: Option<NodeId>,
}

impl Node {
    pub fn new(name: impl Into<String>, kind: NodeKind) -> Self {
        Self {
            name: name.into(),
            kind,
            children: Vec::new(),
            transform: NifTransform::IDENTITY,
            skin: None,
            parent: None,
        }
    }

    pub fn with_transform(mut self, transform: NifTransform) -> Self {
        self.transform = transform;
        self
    }

    pub fn with_children(mut self, children: impl IntoIterator<Item = NodeId>) -> Self {
        self.children = children.into_iter().collect();
        self
    }

    pub fn with_skin(mut self, skin: SkinInstance) -> Self {
        self.skin = Some(skin);
        self
    }

    pub fn parent(&self) -> Option<NodeId> {
        self.parent
    }

    /// Geometry carrying a skin instance
    pub fn skin_instance(&self) -> Option<&SkinInstance> {
        if self.kind.is_geometry() {
            self.skin.as_ref()
        } else {
            None
        }
    }
}

/// Arena of nodes with derived parent links
#[derive(Clone, Debug, Default, PartialEq)]
pub struct NodeGraph {
    nodes: Vec<Node>,
}

impl NodeGraph {
    /// Validate references and derive parent links
    pub fn new(mut nodes: Vec<Node>) -> Result<Self, StructureError> {
        let len = nodes.len();
        let check = |from: usize, id: NodeId| {
            if id.0 < len {
                Ok(())
            } else {
                Err(StructureError::DanglingReference { from, index: id.0 })
            }
        };

        for (index, node) in nodes.iter().enumerate() {
            for &child in &node.children {
                check(index, child)?;
            }
            if let Some(skin) = &node.skin {
                check(index, skin.skeleton_root)?;
                for bone in skin.bones.iter().flatten() {
                    check(index, *bone)?;
                }
            }
        }

        for node in &mut nodes {
            node.parent = None;
        }
        for index in 0..len {
            let children = nodes[index].children.clone();
            for child in children {
                if !nodes[child.0].kind.is_spatial() {
                    continue;
                }
                if let Some(previous) = nodes[child.0].parent {
                    tracing::debug!(
                        "'{}' is shared by '{}' and '{}', keeping the latter as parent",
                        nodes[child.0].name,
                        nodes[previous.0].name,
                        nodes[index].name
                    );
                }
                nodes[child.0].parent = Some(NodeId(index));
            }
        }

        let graph = Self { nodes };
        for id in graph.ids() {
            if graph.ancestors(id).nth(len).is_some() {
                return Err(StructureError::ParentCycle(graph.node(id).name.clone()));
            }
        }
        Ok(graph)
    }

    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }

    /// Node by id; panics on an id from another graph
    pub fn node(&self, id: NodeId) -> &Node {
        &self.nodes[id.0]
    }

    pub fn get(&self, id: NodeId) -> Option<&Node> {
        self.nodes.get(id.0)
    }

    pub fn ids(&self) -> impl Iterator<Item = NodeId> + '_ {
        (0..self.nodes.len()).map(NodeId)
    }

    pub fn parent(&self, id: NodeId) -> Option<NodeId> {
        self.node(id).parent
    }

    /// Parentless spatial nodes, in arena order
    pub fn roots(&self) -> impl Iterator<Item = NodeId> + '_ {
        self.ids().filter(|&id| {
            let node = self.node(id);
            node.kind.is_spatial() && node.parent.is_none()
        })
    }

    /// Spatial children of a node; non-spatial references are skipped
    pub fn spatial_children(&self, id: NodeId) -> impl Iterator<Item = NodeId> + '_ {
        self.node(id)
            .children
            .iter()
            .copied()
            .filter(|&child| self.node(child).kind.is_spatial())
    }

    /// Parent, grandparent, ... up to the top of the tree
    pub fn ancestors(&self, id: NodeId) -> Ancestors<'_> {
        Ancestors {
            graph: self,
            next: self.parent(id),
        }
    }

    /// Pre-order walk of `start` and everything spatial below it
    pub fn tree(&self, start: NodeId) -> Tree<'_> {
        Tree {
            graph: self,
            stack: vec![start],
            visited: HashSet::new(),
        }
    }

    /// First node below `start` (inclusive) with the given name
    pub fn find(&self, start: NodeId, name: &str) -> Option<NodeId> {
        self.tree(start).find(|&id| self.node(id).name == name)
    }

    /// Like [`NodeGraph::find`], restricted to NiNode-like blocks
    pub fn find_ninode(&self, start: NodeId, name: &str) -> Option<NodeId> {
        self.tree(start).find(|&id| {
            let node = self.node(id);
            node.kind.is_ninode() && node.name == name
        })
    }
}

/// Iterator over the ancestors of a node
pub struct Ancestors<'a> {
    graph: &'a NodeGraph,
    next: Option<NodeId>,
}

impl Iterator for Ancestors<'_> {
    type Item = NodeId;

    fn next(&mut self) -> Option<NodeId> {
        let current = self.next?;
        self.next = self.graph.parent(current);
        Some(current)
    }
}

/// Explicit-stack pre-order traversal
///
/// Shared subtrees are visited once.
pub struct Tree<'a> {
    graph: &'a NodeGraph,
    stack: Vec<NodeId>,
    visited: HashSet<NodeId>,
}

impl Iterator for Tree<'_> {
    type Item = NodeId;

    fn next(&mut self) -> Option<NodeId> {
        while let Some(id) = self.stack.pop() {
            if !self.visited.insert(id) {
                continue;
            }
            let children: Vec<NodeId> = self.graph.spatial_children(id).collect();
            self.stack.extend(children.into_iter().rev());
            return Some(id);
        }
        None
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn chain() -> NodeGraph {
        NodeGraph::new(vec![
            Node::new("Scene Root", NodeKind::Node).with_children([NodeId(1), NodeId(3)]),
            Node::new("Bip01", NodeKind::Node).with_children([NodeId(2), NodeId(4)]),
            Node::new("Bip01 Spine", NodeKind::Node),
            Node::new("Body", NodeKind::TriShape),
            Node::new("Alpha", NodeKind::Property),
        ])
        .unwrap()
    }

    #[test]
    fn test_parents_derived_from_children() {
        let graph = chain();
        assert_eq!(graph.parent(NodeId(0)), None);
        assert_eq!(graph.parent(NodeId(1)), Some(NodeId(0)));
        assert_eq!(graph.parent(NodeId(2)), Some(NodeId(1)));
        // Properties are not part of the spatial hierarchy
        assert_eq!(graph.parent(NodeId(4)), None);
    }

    #[test]
    fn test_nodes_from_json() {
        let nodes: Vec<Node> = serde_json::from_str(
            r#"[
                { "name": "Root", "children": [1, 2] },
                { "name": "Lod", "kind": "lod_node", "transform": { "translation": [1.0, 2.0, 3.0] } },
                { "name": "Body", "kind": "tri_strips", "skin": { "skeleton_root": 0, "bones": [1, null] } }
            ]"#,
        )
        .unwrap();
        let graph = NodeGraph::new(nodes).unwrap();

        assert_eq!(graph.node(NodeId(0)).kind, NodeKind::Node);
        let lod = graph.node(NodeId(1));
        assert_eq!(lod.kind, NodeKind::LodNode);
        assert_eq!(lod.transform.translation, [1.0, 2.0, 3.0]);
        // Missing transform fields keep their identity values
        assert_eq!(lod.transform.scale, 1.0);
        assert_eq!(lod.transform.rotation, NifTransform::IDENTITY.rotation);
        assert_eq!(lod.parent(), Some(NodeId(0)));

        let skin = graph.node(NodeId(2)).skin_instance().unwrap();
        assert_eq!(skin.skeleton_root, NodeId(0));
        assert_eq!(skin.bones, vec![Some(NodeId(1)), None]);
    }

    #[test]
    fn test_unknown_kind_is_rejected() {
        let node: Result<Node, _> = serde_json::from_str(r#"{ "name": "X", "kind": "ni_billboard" }"#);
        assert!(node.is_err());
    }

    #[test]
    fn test_tree_is_preorder_and_skips_properties() {
        let graph = chain();
        let order: Vec<_> = graph.tree(NodeId(0)).collect();
        assert_eq!(order, vec![NodeId(0), NodeId(1), NodeId(2), NodeId(3)]);
    }

    #[test]
    fn test_ancestors() {
        let graph = chain();
        let up: Vec<_> = graph.ancestors(NodeId(2)).collect();
        assert_eq!(up, vec![NodeId(1), NodeId(0)]);
    }

    #[test]
    fn test_roots_excludes_non_spatial() {
        let graph = chain();
        assert_eq!(graph.roots().collect::<Vec<_>>(), vec![NodeId(0)]);
    }

    #[test]
    fn test_find() {
        let graph = chain();
        assert_eq!(graph.find(NodeId(0), "Bip01 Spine"), Some(NodeId(2)));
        assert_eq!(graph.find(NodeId(0), "Body"), Some(NodeId(3)));
        assert_eq!(graph.find_ninode(NodeId(0), "Body"), None);
        assert_eq!(graph.find(NodeId(1), "Body"), None);
    }

    #[test]
    fn test_dangling_reference_rejected() {
        let err = NodeGraph::new(vec![Node::new("A", NodeKind::Node).with_children([NodeId(7)])])
            .unwrap_err();
        assert_eq!(err, StructureError::DanglingReference { from: 0, index: 7 });
    }

    #[test]
    fn test_cycle_rejected() {
        let err = NodeGraph::new(vec![
            Node::new("A", NodeKind::Node).with_children([NodeId(1)]),
            Node::new("B", NodeKind::Node).with_children([NodeId(0)]),
        ])
        .unwrap_err();
        assert!(matches!(err, StructureError::ParentCycle(_)));
    }

    #[test]
    fn test_skin_only_on_geometry() {
        let skin = SkinInstance {
            skeleton_root: NodeId(0),
            bones: vec![None],
        };
        let shape = Node::new("Body", NodeKind::TriShape).with_skin(skin.clone());
        assert!(shape.skin_instance().is_some());
        let node = Node::new("Odd", NodeKind::Node).with_skin(skin);
        assert!(node.skin_instance().is_none());
    }
}
