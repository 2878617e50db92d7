//! Classification and bone building for a loaded scene

use anyhow::{Context, Result};
use nif_armature::{
    ArmatureSet, BindPoseConverter, ClassifyOptions, EditBone, ExternalArmature, FullNames, ImportSettings,
    NameRegistry, NodeGraph, NodeId,
};
use serde::{Deserialize, Serialize};

use crate::scene::SceneDescription;

/// Everything the import needs next to the graph
#[derive(Clone, Debug, Default)]
pub struct RigOptions {
    pub settings: ImportSettings,
    /// Overrides the scene's external armature
    pub external_armature: Option<ExternalArmature>,
}

impl RigOptions {
    fn classify_options(&self, scene: &SceneDescription) -> ClassifyOptions {
        ClassifyOptions {
            nif_version: scene.version,
            file_name: scene.file_name.clone(),
            external_armature: self
                .external_armature
                .clone()
                .or_else(|| scene.external_armature.clone()),
            ..ClassifyOptions::from_settings(&self.settings)
        }
    }
}

/// Loaded graph with its classification
pub struct Rig {
    pub graph: NodeGraph,
    pub root: NodeId,
    pub armatures: ArmatureSet,
}

/// Build the graph and classify it
pub fn classify_scene(scene: &SceneDescription, options: &RigOptions) -> Result<Rig> {
    let graph = scene.to_graph()?;
    let root = scene.root_id(&graph)?;
    let classify_options = options.classify_options(scene);
    let armatures = nif_armature::classify(&graph, root, &classify_options)?;
    Ok(Rig {
        graph,
        root,
        armatures,
    })
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct RigReport {
    pub armatures: Vec<ArmatureReport>,
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct ArmatureReport {
    /// Host object name
    pub name: String,
    pub node: usize,
    pub bones: Vec<BoneReport>,
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct BoneReport {
    /// Host bone name
    pub name: String,
    /// Name in the NIF file
    pub nif_name: String,
    pub parent: Option<String>,
    pub head: [f32; 3],
    pub tail: [f32; 3],
    pub roll: f32,
    pub length: f32,
}

impl BoneReport {
    fn new(graph: &NodeGraph, bone: &EditBone, names: &NameRegistry) -> Self {
        Self {
            name: bone.name.clone(),
            nif_name: graph.node(bone.node).name.clone(),
            parent: bone
                .parent
                .and_then(|parent| names.name(parent))
                .map(str::to_string),
            head: bone.geometry.head.to_array(),
            tail: bone.geometry.tail.to_array(),
            roll: bone.geometry.roll,
            length: bone.geometry.length,
        }
    }
}

/// Edit bones of every armature, plus the long names lost on the way
pub fn build_report(rig: &Rig, settings: &ImportSettings) -> Result<(RigReport, FullNames)> {
    let converter = BindPoseConverter::from_settings(&rig.graph, &rig.armatures, settings)?;
    let mut names = NameRegistry::new();
    let mut armatures = Vec::with_capacity(rig.armatures.len());

    for &root in rig.armatures.roots() {
        // The armature object is named before its bones
        let name = names.import_name(&rig.graph, root)?;
        let bones = converter
            .build_armature(root, settings.default_bone_length, &mut names)
            .with_context(|| format!("Failed to build armature '{}'", name))?;
        tracing::info!("Armature '{}': {} bones", name, bones.len());

        armatures.push(ArmatureReport {
            name,
            node: root.index(),
            bones: bones
                .iter()
                .map(|bone| BoneReport::new(&rig.graph, bone, &names))
                .collect(),
        });
    }

    let full_names = names.full_names(&rig.graph);
    Ok((RigReport { armatures }, full_names))
}

/// Log armatures and their bones
pub fn log_classification(rig: &Rig) {
    if rig.armatures.is_empty() {
        tracing::info!("No armatures found");
        return;
    }
    for (root, bones) in rig.armatures.iter() {
        tracing::info!(
            "Armature '{}' ({} bones)",
            rig.graph.node(root).name,
            bones.len()
        );
        for &bone in bones {
            tracing::info!("  {}", rig.graph.node(bone).name);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use nif_armature::SkeletonPolicy;

    fn skinned_scene() -> SceneDescription {
        serde_json::from_str(
            r#"{
                "nodes": [
                    { "name": "Scene Root", "children": [1, 4] },
                    { "name": "Bip01", "children": [2] },
                    { "name": "Bip01 Pelvis", "translation": [0.0, 0.0, 1.0], "children": [3] },
                    { "name": "Bip01 L Thigh", "translation": [0.5, 0.0, 0.0] },
                    { "name": "Body", "kind": "tri_shape", "skin": { "skeleton_root": 1, "bones": [3] } }
                ]
            }"#,
        )
        .unwrap()
    }

    #[test]
    fn test_report_for_skinned_scene() {
        let options = RigOptions::default();
        let rig = classify_scene(&skinned_scene(), &options).unwrap();
        assert_eq!(rig.armatures.roots(), &[NodeId(1)]);

        let (report, full_names) = build_report(&rig, &options.settings).unwrap();
        assert_eq!(report.armatures.len(), 1);
        let armature = &report.armatures[0];
        assert_eq!(armature.name, "Bip01");

        let names: Vec<_> = armature.bones.iter().map(|bone| bone.name.as_str()).collect();
        assert_eq!(names, ["Bip01 Pelvis", "Bip01 Thigh.L"]);
        assert_eq!(armature.bones[1].parent.as_deref(), Some("Bip01 Pelvis"));
        assert_eq!(armature.bones[1].head, [0.5, 0.0, 1.0]);
        assert_eq!(full_names.full_name("Bip01 Thigh.L"), "Bip01 L Thigh");
    }

    #[test]
    fn test_external_armature_override() {
        let options = RigOptions {
            settings: ImportSettings {
                skeleton: SkeletonPolicy::GeometryOnly,
                ..ImportSettings::default()
            },
            external_armature: Some(ExternalArmature {
                name: "Bip01".into(),
                bone_names: vec!["Bip01 Thigh.L".into()],
            }),
        };
        let rig = classify_scene(&skinned_scene(), &options).unwrap();
        assert_eq!(rig.armatures.host_name(NodeId(3)), Some("Bip01 Thigh.L"));
        assert!(rig.armatures.is_bone(NodeId(2)));
    }
}
