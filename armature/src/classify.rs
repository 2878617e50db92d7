//! Bone classification
//!
//! Walks a NIF node graph once and decides which nodes are armature roots and
//! which are bones. Skins name their skeleton root and the bones influencing
//! them; everything between a bone and its root is pulled into the armature
//! so the bone hierarchy has no gaps.
//!
//! # Partitioning
//!
//! A node is a bone of at most one armature, and bones are always reached
//! from their root without passing through another root:
//!
//! - a skin bound to a node that is already a bone of another armature is
//!   bound to that armature instead;
//! - bone references whose parent chain crosses another armature (or never
//!   reaches the root) are skipped with a warning;
//! - tree population stops at other armature roots and at nodes that can
//!   never be bones (LOD and grouping nodes).

use hashbrown::{HashMap, HashSet};
use serde::{Deserialize, Serialize};

use crate::error::StructureError;
use crate::graph::{NodeGraph, NodeId, NodeKind, SkinInstance};
use crate::naming::bone_name_for_nif;
use crate::settings::ImportSettings;

/// Morrowind
pub const NIF_VERSION_MORROWIND: u32 = 0x0400_0002;
/// Oblivion
pub const NIF_VERSION_OBLIVION: u32 = 0x1400_0005;
/// Fallout 3
pub const NIF_VERSION_FALLOUT_3: u32 = 0x1402_0007;

/// Skeleton root of Morrowind skeletons
const MORROWIND_SKELETON_ROOT: &str = "Bip01";

/// Oblivion/Fallout 3 skeleton files, always imported skeleton-only
const SKELETON_FILE_NAMES: [&str; 2] = ["skeleton.nif", "skeletonbeast.nif"];

/// Suffix ignored when matching grouping node names
const NON_ACCUM_SUFFIX: &str = " nonaccum";

/// How armatures and bones are discovered
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum SkeletonPolicy {
    /// Armatures come from skin instances
    #[default]
    Everything,
    /// Every NiNode below the root is a bone of one armature
    SkeletonOnly,
    /// Attach geometry to an armature that already exists in the host scene
    GeometryOnly,
}

/// Armature that already exists in the host scene
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ExternalArmature {
    /// Object name, matched against node names
    pub name: String,
    /// Host bone names (host naming convention)
    pub bone_names: Vec<String>,
}

/// Everything classification needs besides the graph
#[derive(Clone, Debug, Default, PartialEq)]
pub struct ClassifyOptions {
    pub policy: SkeletonPolicy,
    /// NIF file version
    pub nif_version: u32,
    /// File name the graph was loaded from
    pub file_name: Option<String>,
    /// Required for [`SkeletonPolicy::GeometryOnly`]
    pub external_armature: Option<ExternalArmature>,
    /// Grouping nodes are only recognized when shapes are combined
    pub combine_shapes: bool,
}

impl ClassifyOptions {
    pub fn from_settings(settings: &ImportSettings) -> Self {
        Self {
            policy: settings.skeleton,
            combine_shapes: settings.combine_shapes,
            ..Self::default()
        }
    }

    /// Requested policy, overridden for Oblivion/Fallout 3 skeleton files
    pub fn effective_policy(&self) -> SkeletonPolicy {
        if self.is_skeleton_file() {
            SkeletonPolicy::SkeletonOnly
        } else {
            self.policy
        }
    }

    fn is_skeleton_file(&self) -> bool {
        if !matches!(
            self.nif_version,
            NIF_VERSION_OBLIVION | NIF_VERSION_FALLOUT_3
        ) {
            return false;
        }
        let Some(file_name) = &self.file_name else {
            return false;
        };
        let base = file_name
            .rsplit(['/', '\\'])
            .next()
            .unwrap_or(file_name)
            .to_lowercase();
        SKELETON_FILE_NAMES.contains(&base.as_str())
    }
}

/// Armature roots and their bones
#[derive(Clone, Debug, Default, PartialEq)]
pub struct ArmatureSet {
    roots: Vec<NodeId>,
    bones: HashMap<NodeId, Vec<NodeId>>,
    owners: HashMap<NodeId, NodeId>,
    host_names: HashMap<NodeId, String>,
}

impl ArmatureSet {
    /// Armature roots in discovery order
    pub fn roots(&self) -> &[NodeId] {
        &self.roots
    }

    /// Bones of `root` in registration order; empty for non-roots
    pub fn bones(&self, root: NodeId) -> &[NodeId] {
        self.bones.get(&root).map(Vec::as_slice).unwrap_or(&[])
    }

    pub fn is_armature_root(&self, node: NodeId) -> bool {
        self.bones.contains_key(&node)
    }

    pub fn is_bone(&self, node: NodeId) -> bool {
        self.owners.contains_key(&node)
    }

    /// Armature root owning `bone`
    pub fn owner(&self, bone: NodeId) -> Option<NodeId> {
        self.owners.get(&bone).copied()
    }

    /// Existing host bone name matched during geometry-only import
    pub fn host_name(&self, node: NodeId) -> Option<&str> {
        self.host_names.get(&node).map(String::as_str)
    }

    pub fn host_names(&self) -> impl Iterator<Item = (NodeId, &str)> {
        self.host_names.iter().map(|(&node, name)| (node, name.as_str()))
    }

    /// Number of armatures
    pub fn len(&self) -> usize {
        self.roots.len()
    }

    pub fn is_empty(&self) -> bool {
        self.roots.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = (NodeId, &[NodeId])> {
        self.roots.iter().map(|&root| (root, self.bones(root)))
    }

    fn add_root(&mut self, root: NodeId) -> bool {
        if self.bones.contains_key(&root) {
            return false;
        }
        self.roots.push(root);
        self.bones.insert(root, Vec::new());
        true
    }

    fn add_bone(&mut self, root: NodeId, bone: NodeId) -> bool {
        if self.owners.contains_key(&bone) {
            return false;
        }
        self.owners.insert(bone, root);
        self.bones.entry(root).or_default().push(bone);
        true
    }
}

/// Classify `root` and everything below it
pub fn classify(
    graph: &NodeGraph,
    root: NodeId,
    options: &ClassifyOptions,
) -> Result<ArmatureSet, StructureError> {
    if graph.get(root).is_none() {
        return Err(StructureError::MissingRoot(root.index()));
    }
    let mut classifier = Classifier::new(graph, options);
    classifier.mark_armatures_bones(root)?;
    Ok(classifier.into_armatures())
}

/// Whether a node only groups geometry that gets merged into one object
///
/// Only meaningful when shapes are combined. A named NiNode groups the
/// geometry children whose names contain its own (minus a ` NonAccum`
/// suffix); a root collision node groups all its geometry.
pub fn is_grouping_node(graph: &NodeGraph, id: NodeId, combine_shapes: bool) -> bool {
    if !combine_shapes {
        return false;
    }
    let node = graph.node(id);
    let mut geometry = graph
        .spatial_children(id)
        .map(|child| graph.node(child))
        .filter(|child| child.kind.is_geometry());

    match node.kind {
        NodeKind::RootCollisionNode => geometry.next().is_some(),
        NodeKind::Node if !node.name.is_empty() => {
            let name = strip_non_accum(&node.name);
            geometry.any(|child| child.name.contains(name))
        }
        _ => false,
    }
}

fn strip_non_accum(name: &str) -> &str {
    let Some(split) = name.len().checked_sub(NON_ACCUM_SUFFIX.len()) else {
        return name;
    };
    match (name.get(..split), name.get(split..)) {
        (Some(head), Some(tail)) if tail.eq_ignore_ascii_case(NON_ACCUM_SUFFIX) => head,
        _ => name,
    }
}

/// Classification context
///
/// Holds the armature set while the graph is walked. Marking the same subtree
/// twice adds nothing new.
pub struct Classifier<'a> {
    graph: &'a NodeGraph,
    options: &'a ClassifyOptions,
    policy: SkeletonPolicy,
    armatures: ArmatureSet,
    /// Unsupported blocks already reported
    unsupported: HashSet<NodeId>,
}

impl<'a> Classifier<'a> {
    pub fn new(graph: &'a NodeGraph, options: &'a ClassifyOptions) -> Self {
        Self {
            graph,
            options,
            policy: options.effective_policy(),
            armatures: ArmatureSet::default(),
            unsupported: HashSet::new(),
        }
    }

    pub fn armatures(&self) -> &ArmatureSet {
        &self.armatures
    }

    pub fn into_armatures(self) -> ArmatureSet {
        self.armatures
    }

    /// Number of unsupported blocks met so far; each is reported once
    pub fn unsupported_blocks(&self) -> usize {
        self.unsupported.len()
    }

    /// Mark armatures and bones by looking at the skin instances below `root`
    pub fn mark_armatures_bones(&mut self, root: NodeId) -> Result<(), StructureError> {
        let graph = self.graph;
        match self.policy {
            SkeletonPolicy::SkeletonOnly => return self.mark_skeleton(root),
            SkeletonPolicy::GeometryOnly if self.armatures.is_empty() => {
                self.mark_external_armature(root)?;
            }
            _ => {}
        }

        let mut stack = vec![root];
        let mut visited = HashSet::new();
        while let Some(id) = stack.pop() {
            if !visited.insert(id) {
                continue;
            }
            let node = graph.node(id);
            if node.kind == NodeKind::Other && self.unsupported.insert(id) {
                tracing::warn!("Skipping unsupported block '{}'", node.name);
            }
            if let Some(skin) = node.skin_instance() {
                tracing::debug!("Skin found on block '{}'", node.name);
                self.mark_skin(id, skin)?;
            }
            // Descend through every spatial child; only registration is gated
            let children: Vec<NodeId> = graph.spatial_children(id).collect();
            stack.extend(children.into_iter().rev());
        }
        Ok(())
    }

    /// Skeleton-only import: every NiNode is a bone of a single armature
    fn mark_skeleton(&mut self, root: NodeId) -> Result<(), StructureError> {
        let graph = self.graph;
        let options = self.options;
        let node = graph.node(root);
        if !node.kind.is_ninode() {
            return Err(StructureError::RootNotNode(node.name.clone()));
        }
        let skeleton_root = if options.nif_version == NIF_VERSION_MORROWIND {
            graph
                .find_ninode(root, MORROWIND_SKELETON_ROOT)
                .unwrap_or(root)
        } else {
            root
        };
        self.armatures.add_root(skeleton_root);
        tracing::info!(
            "Selecting node '{}' as skeleton root",
            graph.node(skeleton_root).name
        );
        self.populate_bone_tree(skeleton_root);
        Ok(())
    }

    /// Geometry-only import: find the external armature and its bones
    fn mark_external_armature(&mut self, root: NodeId) -> Result<(), StructureError> {
        let graph = self.graph;
        let options = self.options;
        let external = options
            .external_armature
            .as_ref()
            .ok_or(StructureError::NoExternalArmature)?;
        let skeleton_root = graph
            .find(root, &external.name)
            .ok_or_else(|| StructureError::MissingArmature(external.name.clone()))?;
        tracing::debug!("Identified '{}' as armature", external.name);
        self.armatures.add_root(skeleton_root);

        for bone_name in &external.bone_names {
            let nif_name = bone_name_for_nif(bone_name);
            match graph.find(skeleton_root, &nif_name) {
                Some(bone) if bone != skeleton_root => {
                    tracing::info!(
                        "Identified nif block '{}' with bone '{}' in selected armature",
                        nif_name,
                        bone_name
                    );
                    if self.register_bone(skeleton_root, bone) {
                        self.armatures.host_names.insert(bone, bone_name.clone());
                    }
                }
                _ => tracing::warn!(
                    "Bone '{}' of armature '{}' has no block '{}' in the nif",
                    bone_name,
                    external.name,
                    nif_name
                ),
            }
        }
        Ok(())
    }

    fn mark_skin(&mut self, geometry: NodeId, skin: &SkinInstance) -> Result<(), StructureError> {
        let graph = self.graph;
        let options = self.options;
        let mut skeleton_root = skin.skeleton_root;

        if self.policy == SkeletonPolicy::GeometryOnly {
            if !self.armatures.is_armature_root(skeleton_root) {
                let armature = options
                    .external_armature
                    .as_ref()
                    .map(|external| external.name.clone())
                    .unwrap_or_default();
                return Err(StructureError::IncompatibleSkeleton {
                    armature,
                    geometry: graph.node(geometry).name.clone(),
                    skeleton_root: graph.node(skeleton_root).name.clone(),
                });
            }
        } else {
            if let Some(owner) = self.armatures.owner(skeleton_root) {
                tracing::warn!(
                    "Skeleton root '{}' of '{}' is a bone of armature '{}', binding to that armature",
                    graph.node(skeleton_root).name,
                    graph.node(geometry).name,
                    graph.node(owner).name
                );
                skeleton_root = owner;
            }
            if self.armatures.add_root(skeleton_root) {
                tracing::debug!("'{}' is an armature", graph.node(skeleton_root).name);
            }
        }

        for bone in &skin.bones {
            // Null bone references do occur in real files
            let Some(bone) = *bone else {
                continue;
            };
            self.register_bone(skeleton_root, bone);
        }

        self.populate_bone_tree(skeleton_root);
        Ok(())
    }

    /// Register `bone` under `root` together with every node between them
    ///
    /// Returns false (after logging) when the bone cannot belong to `root`.
    fn register_bone(&mut self, root: NodeId, bone: NodeId) -> bool {
        let graph = self.graph;
        let bone_name = &graph.node(bone).name;
        let root_name = &graph.node(root).name;

        if bone == root || self.armatures.is_armature_root(bone) {
            tracing::warn!(
                "'{}' is an armature root and cannot be a bone of '{}'",
                bone_name,
                root_name
            );
            return false;
        }
        if let Some(owner) = self.armatures.owner(bone) {
            if owner != root {
                tracing::warn!(
                    "'{}' is already a bone of armature '{}', skipping it for '{}'",
                    bone_name,
                    graph.node(owner).name,
                    root_name
                );
                return false;
            }
        }
        let Some(chain) = self.complete_bone_tree(root, bone) else {
            tracing::warn!(
                "'{}' cannot be resolved in the tree of armature '{}', skipping it",
                bone_name,
                root_name
            );
            return false;
        };

        if self.armatures.add_bone(root, bone) {
            tracing::debug!("'{}' is a bone of armature '{}'", bone_name, root_name);
        }
        for parent in chain {
            if self.armatures.add_bone(root, parent) {
                tracing::debug!(
                    "'{}' is a bone of armature '{}'",
                    graph.node(parent).name,
                    root_name
                );
            }
        }
        true
    }

    /// Nodes strictly between `bone` and `root`, nearest first
    ///
    /// `None` when the parent chain misses `root` or runs through another
    /// armature.
    fn complete_bone_tree(&self, root: NodeId, bone: NodeId) -> Option<Vec<NodeId>> {
        let graph = self.graph;
        let mut chain = Vec::new();
        for ancestor in graph.ancestors(bone) {
            if ancestor == root {
                return Some(chain);
            }
            if self.armatures.is_armature_root(ancestor) {
                return None;
            }
            if matches!(self.armatures.owner(ancestor), Some(owner) if owner != root) {
                return None;
            }
            chain.push(ancestor);
        }
        None
    }

    /// Register every NiNode below `root` as a bone
    ///
    /// LOD and grouping nodes are never bones; nothing below them is
    /// registered either, so the bone tree stays gap-free.
    fn populate_bone_tree(&mut self, root: NodeId) {
        let graph = self.graph;
        let options = self.options;
        let mut stack: Vec<NodeId> = graph.spatial_children(root).collect();
        stack.reverse();
        let mut visited = HashSet::new();

        while let Some(id) = stack.pop() {
            if !visited.insert(id) || id == root {
                continue;
            }
            if self.armatures.is_armature_root(id) {
                continue;
            }
            if matches!(self.armatures.owner(id), Some(owner) if owner != root) {
                continue;
            }
            let node = graph.node(id);
            if !node.kind.is_ninode() {
                continue;
            }
            if node.kind == NodeKind::LodNode
                || is_grouping_node(graph, id, options.combine_shapes)
            {
                continue;
            }
            if self.armatures.add_bone(root, id) {
                tracing::debug!(
                    "'{}' marked as extra bone of armature '{}'",
                    node.name,
                    graph.node(root).name
                );
            }
            let children: Vec<NodeId> = graph.spatial_children(id).collect();
            stack.extend(children.into_iter().rev());
        }
    }
}
