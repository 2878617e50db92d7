//! Scene descriptions
//!
//! A scene description is the node graph of one NIF file written out as JSON
//! or TOML. Transforms are stored flat on each node, in NIF convention.

use anyhow::{Context, Result};
use nif_armature::{
    ExternalArmature, ImportSettings, NifTransform, Node, NodeGraph, NodeId, NodeKind, SkinInstance,
};
use serde::{Deserialize, Serialize};
use std::path::Path;

#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct SceneDescription {
    /// NIF file version, e.g. `0x04000002` for Morrowind
    #[serde(default)]
    pub version: u32,
    /// Name of the NIF file the graph came from
    #[serde(default)]
    pub file_name: Option<String>,
    /// Root node index; the first parentless spatial node when omitted
    #[serde(default)]
    pub root: Option<usize>,
    /// Armature already present in the host scene
    #[serde(default)]
    pub external_armature: Option<ExternalArmature>,
    pub nodes: Vec<SceneNode>,
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct SceneNode {
    #[serde(default)]
    pub name: String,
    #[serde(default)]
    pub kind: NodeKind,
    #[serde(default)]
    pub children: Vec<usize>,
    #[serde(default)]
    pub translation: [f32; 3],
    #[serde(default = "identity_rotation")]
    pub rotation: [[f32; 3]; 3],
    #[serde(default = "unit_scale")]
    pub scale: f32,
    #[serde(default)]
    pub skin: Option<SceneSkin>,
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct SceneSkin {
    pub skeleton_root: usize,
    #[serde(default)]
    pub bones: Vec<Option<usize>>,
}

fn identity_rotation() -> [[f32; 3]; 3] {
    NifTransform::IDENTITY.rotation
}

fn unit_scale() -> f32 {
    1.0
}

impl From<&SceneNode> for Node {
    fn from(scene: &SceneNode) -> Self {
        let mut node = Node::new(scene.name.clone(), scene.kind)
            .with_transform(NifTransform {
                translation: scene.translation,
                rotation: scene.rotation,
                scale: scene.scale,
            })
            .with_children(scene.children.iter().map(|&i| NodeId(i)));
        if let Some(skin) = &scene.skin {
            node = node.with_skin(SkinInstance {
                skeleton_root: NodeId(skin.skeleton_root),
                bones: skin.bones.iter().map(|bone| bone.map(NodeId)).collect(),
            });
        }
        node
    }
}

impl SceneDescription {
    /// Build the validated node graph
    pub fn to_graph(&self) -> Result<NodeGraph> {
        let graph = NodeGraph::new(self.nodes.iter().map(Node::from).collect())?;
        Ok(graph)
    }

    /// Node the import starts from
    pub fn root_id(&self, graph: &NodeGraph) -> Result<NodeId> {
        match self.root {
            Some(index) => Ok(NodeId(index)),
            None => graph
                .roots()
                .next()
                .context("Scene has no parentless spatial node to start from"),
        }
    }
}

/// Load a scene description, format chosen by extension
pub fn load_scene(path: &Path) -> Result<SceneDescription> {
    let text = std::fs::read_to_string(path).with_context(|| format!("Failed to read scene: {:?}", path))?;

    let ext = path
        .extension()
        .and_then(|e| e.to_str())
        .map(|s| s.to_lowercase())
        .unwrap_or_default();

    let scene = match ext.as_str() {
        "json" => serde_json::from_str(&text).with_context(|| format!("Failed to parse scene: {:?}", path))?,
        "toml" => toml::from_str(&text).with_context(|| format!("Failed to parse scene: {:?}", path))?,
        _ => anyhow::bail!("Unsupported scene format: {:?} (use .json or .toml)", path),
    };
    Ok(scene)
}

/// Load import settings from a TOML file, or the defaults
pub fn load_settings(path: Option<&Path>) -> Result<ImportSettings> {
    let Some(path) = path else {
        return Ok(ImportSettings::default());
    };
    let text = std::fs::read_to_string(path).with_context(|| format!("Failed to read settings: {:?}", path))?;
    toml::from_str(&text).with_context(|| format!("Failed to parse settings: {:?}", path))
}
