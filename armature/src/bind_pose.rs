//! Bind pose conversion
//!
//! Composes the armature-space bind transform of every bone and converts it to
//! the host's edit-bone encoding (head, tail, roll). Host bones also need a
//! length, which NIF bones do not have; it is inferred from where the child
//! bones start.

use glam::{Mat3, Mat4, Vec3};
use hashbrown::HashMap;

use crate::classify::ArmatureSet;
use crate::error::{ArmatureError, GeometryError};
use crate::graph::{NodeGraph, NodeId};
use crate::math::{mat3_to_vec_roll, nif_transform_to_mat4, vec_roll_to_mat3, AxisError, BoneAxes};
use crate::naming::NameRegistry;
use crate::settings::ImportSettings;

/// Inferred lengths below this are considered degenerate
pub const MIN_BONE_LENGTH: f32 = 0.01;
/// Length used instead of a degenerate one
pub const FALLBACK_BONE_LENGTH: f32 = 0.25;

/// Head/tail/roll encoding of a bone
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct EditBoneGeometry {
    pub head: Vec3,
    pub tail: Vec3,
    pub roll: f32,
    pub length: f32,
}

impl EditBoneGeometry {
    /// Unit vector from head to tail
    pub fn direction(&self) -> Vec3 {
        (self.tail - self.head).normalize_or_zero()
    }

    /// Orientation rebuilt from direction and roll
    pub fn orientation(&self) -> Mat3 {
        vec_roll_to_mat3(self.tail - self.head, self.roll)
    }

    /// Same bone, tail moved along the bone to the given length
    pub fn with_length(self, length: f32) -> Self {
        Self {
            tail: self.head + self.direction() * length,
            length,
            ..self
        }
    }
}

/// Result of converting a single node
#[derive(Clone, Copy, Debug, PartialEq)]
pub enum BindPose {
    Bone(EditBoneGeometry),
    /// The node is not a bone of the requested armature
    NotABone,
}

/// A bone ready for the scene builder
#[derive(Clone, Debug, PartialEq)]
pub struct EditBone {
    pub node: NodeId,
    /// Host bone name
    pub name: String,
    /// Parent bone; `None` for bones directly below the armature root
    pub parent: Option<NodeId>,
    pub geometry: EditBoneGeometry,
}

/// Bone placed in creation order, before length fitting
struct PlacedBone {
    node: NodeId,
    parent: Option<usize>,
    children: Vec<usize>,
    geometry: EditBoneGeometry,
}

/// Converts classified bones into edit-bone geometry
pub struct BindPoseConverter<'a> {
    graph: &'a NodeGraph,
    armatures: &'a ArmatureSet,
    axes: BoneAxes,
    scale_correction: f32,
}

impl<'a> BindPoseConverter<'a> {
    pub fn new(graph: &'a NodeGraph, armatures: &'a ArmatureSet) -> Self {
        Self {
            graph,
            armatures,
            axes: BoneAxes::default(),
            scale_correction: 1.0,
        }
    }

    pub fn from_settings(
        graph: &'a NodeGraph,
        armatures: &'a ArmatureSet,
        settings: &ImportSettings,
    ) -> Result<Self, AxisError> {
        Ok(Self::new(graph, armatures)
            .with_axes(settings.bone_axes()?)
            .with_scale_correction(settings.scale_correction))
    }

    pub fn with_axes(mut self, axes: BoneAxes) -> Self {
        self.axes = axes;
        self
    }

    pub fn with_scale_correction(mut self, scale_correction: f32) -> Self {
        self.scale_correction = scale_correction;
        self
    }

    /// Bone transform in the local space of `root`
    ///
    /// Product of the local transforms of `bone` and every ancestor below
    /// `root`.
    pub fn bind_transform(&self, bone: NodeId, root: NodeId) -> Result<Mat4, GeometryError> {
        let local = |id: NodeId| nif_transform_to_mat4(&self.graph.node(id).transform, self.scale_correction);

        let mut bind = local(bone);
        let mut current = bone;
        loop {
            match self.graph.parent(current) {
                Some(parent) if parent == root => break,
                Some(parent) => {
                    bind = local(parent) * bind;
                    current = parent;
                }
                None => return Err(GeometryError::not_an_ancestor(self.graph, bone, root)),
            }
        }
        Ok(bind)
    }

    /// Head/tail/roll of `bone`, or [`BindPose::NotABone`] when it is not
    /// classified under `root`
    ///
    /// The tail sits one unit from the head until lengths are inferred.
    pub fn compute_bind_geometry(&self, bone: NodeId, root: NodeId) -> Result<BindPose, GeometryError> {
        if self.armatures.owner(bone) != Some(root) {
            return Ok(BindPose::NotABone);
        }
        self.bone_geometry(bone, root).map(BindPose::Bone)
    }

    fn bone_geometry(&self, bone: NodeId, root: NodeId) -> Result<EditBoneGeometry, GeometryError> {
        let name = || self.graph.node(bone).name.clone();

        let nif_bind = self.bind_transform(bone, root)?;
        if !nif_bind.is_finite() {
            return Err(GeometryError::NonFinite(name()));
        }
        let host_bind = self.axes.nif_bind_to_host_bind(nif_bind);
        let linear = Mat3::from_mat4(host_bind);
        let determinant = linear.determinant();
        if !determinant.is_finite() {
            return Err(GeometryError::NonFinite(name()));
        }
        // Zero or subnormal: no usable inverse, however small the scale
        if !determinant.is_normal() {
            return Err(GeometryError::Singular(name()));
        }

        // NIF scale is uniform, so the cube root recovers it (sign included)
        let orientation = linear * determinant.cbrt().recip();
        let (direction, roll) = mat3_to_vec_roll(orientation);
        let head = nif_bind.w_axis.truncate();
        Ok(EditBoneGeometry {
            head,
            tail: head + direction.normalize(),
            roll,
            length: 1.0,
        })
    }

    /// Children of `id` whose parent link points back at `id`
    ///
    /// A block listed by several nodes is only reached through the parent the
    /// graph settled on, the same one [`Self::bind_transform`] walks.
    fn owned_children(&self, id: NodeId) -> impl Iterator<Item = NodeId> + '_ {
        self.graph
            .spatial_children(id)
            .filter(move |&child| self.graph.parent(child) == Some(id))
    }

    /// Bones of `root` in creation order with their parent bone
    ///
    /// Depth-first from the root's children, descending only through bones of
    /// this armature. Every bone appears at most once.
    fn bone_order(&self, root: NodeId) -> Vec<(NodeId, Option<NodeId>)> {
        let mut order = Vec::new();
        let mut stack: Vec<(NodeId, Option<NodeId>)> =
            self.owned_children(root).map(|child| (child, None)).collect();
        stack.reverse();

        while let Some((id, parent)) = stack.pop() {
            if self.armatures.owner(id) != Some(root) {
                continue;
            }
            order.push((id, parent));
            let children: Vec<_> = self
                .owned_children(id)
                .map(|child| (child, Some(id)))
                .collect();
            stack.extend(children.into_iter().rev());
        }

        if order.len() < self.armatures.bones(root).len() {
            for &bone in self.armatures.bones(root) {
                if !order.iter().any(|&(id, _)| id == bone) {
                    tracing::warn!(
                        "Bone '{}' is not connected to armature '{}' through bones, skipping it",
                        self.graph.node(bone).name,
                        self.graph.node(root).name
                    );
                }
            }
        }
        order
    }

    fn place_bones(&self, root: NodeId, default_length: f32) -> Result<Vec<PlacedBone>, GeometryError> {
        let order = self.bone_order(root);
        let index: HashMap<NodeId, usize> = order
            .iter()
            .enumerate()
            .map(|(i, &(node, _))| (node, i))
            .collect();

        let mut placed = Vec::with_capacity(order.len());
        for &(node, parent) in &order {
            placed.push(PlacedBone {
                node,
                parent: parent.map(|parent| index[&parent]),
                children: Vec::new(),
                geometry: self.bone_geometry(node, root)?,
            });
        }
        for i in 0..placed.len() {
            if let Some(parent) = placed[i].parent {
                placed[parent].children.push(i);
            }
        }

        // Parents come before their children, so parent lengths are final
        for i in 0..placed.len() {
            let length = match placed[i].parent {
                None => default_length,
                Some(parent) if placed[i].children.is_empty() => placed[parent].geometry.length,
                Some(_) => {
                    let children = &placed[i].children;
                    let sum: Vec3 = children.iter().map(|&c| placed[c].geometry.head).sum();
                    let mean = sum / children.len() as f32;
                    let length = (placed[i].geometry.head - mean).length();
                    if length < MIN_BONE_LENGTH {
                        FALLBACK_BONE_LENGTH
                    } else {
                        length
                    }
                }
            };
            placed[i].geometry = placed[i].geometry.with_length(length);
        }
        Ok(placed)
    }

    /// Length of every bone of `root`
    ///
    /// Bones directly below the root get `default_length`. Other bones span to
    /// the mean head of their child bones, or inherit their parent's length at
    /// the end of a chain.
    pub fn infer_lengths(&self, root: NodeId, default_length: f32) -> Result<HashMap<NodeId, f32>, GeometryError> {
        Ok(self
            .place_bones(root, default_length)?
            .into_iter()
            .map(|bone| (bone.node, bone.geometry.length))
            .collect())
    }

    /// All bones of `root` in creation order, named and length-fitted
    pub fn build_armature(
        &self,
        root: NodeId,
        default_length: f32,
        names: &mut NameRegistry,
    ) -> Result<Vec<EditBone>, ArmatureError> {
        let placed = self.place_bones(root, default_length)?;
        let mut bones = Vec::with_capacity(placed.len());
        for bone in &placed {
            if let Some(host_name) = self.armatures.host_name(bone.node) {
                names.bind(bone.node, host_name);
            }
            bones.push(EditBone {
                node: bone.node,
                name: names.import_name(self.graph, bone.node)?,
                parent: bone.parent.map(|parent| placed[parent].node),
                geometry: bone.geometry,
            });
        }
        tracing::debug!(
            "Built {} bones for armature '{}'",
            bones.len(),
            self.graph.node(root).name
        );
        Ok(bones)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::classify::{classify, ClassifyOptions, SkeletonPolicy};
    use crate::graph::{NifTransform, Node, NodeKind};
    use std::f32::consts::FRAC_PI_2;

    const EPSILON: f32 = 1e-5;

    fn rotated(translation: [f32; 3], rotation: Mat3, scale: f32) -> NifTransform {
        NifTransform {
            translation,
            rotation: rotation.to_cols_array_2d(),
            scale,
        }
    }

    fn bone(name: &str, transform: NifTransform, children: &[usize]) -> Node {
        Node::new(name, NodeKind::Node)
            .with_transform(transform)
            .with_children(children.iter().map(|&i| NodeId(i)))
    }

    fn skeleton_only(graph: &NodeGraph) -> ArmatureSet {
        let options = ClassifyOptions {
            policy: SkeletonPolicy::SkeletonOnly,
            ..ClassifyOptions::default()
        };
        classify(graph, NodeId(0), &options).unwrap()
    }

    /// Root -> Upper (rotated) -> Lower (rotated, scaled)
    fn arm() -> NodeGraph {
        NodeGraph::new(vec![
            bone("Root", NifTransform::from_translation([5.0, 5.0, 5.0]), &[1]),
            bone(
                "Upper",
                rotated([1.0, 0.0, 0.0], Mat3::from_rotation_z(FRAC_PI_2), 1.0),
                &[2],
            ),
            bone(
                "Lower",
                rotated([0.0, 2.0, 0.5], Mat3::from_rotation_x(0.5), 1.5),
                &[],
            ),
        ])
        .unwrap()
    }

    #[test]
    fn test_bind_transform_excludes_root() {
        let graph = arm();
        let set = skeleton_only(&graph);
        let converter = BindPoseConverter::new(&graph, &set);

        let bind = converter.bind_transform(NodeId(2), NodeId(0)).unwrap();
        let expected = nif_transform_to_mat4(&graph.node(NodeId(1)).transform, 1.0)
            * nif_transform_to_mat4(&graph.node(NodeId(2)).transform, 1.0);
        assert!(bind.abs_diff_eq(expected, EPSILON));
        // Upper rotates Lower's offset (0, 2, 0.5) onto (-2, 0, 0.5)
        assert!(bind.w_axis.truncate().abs_diff_eq(Vec3::new(-1.0, 0.0, 0.5), EPSILON));
    }

    #[test]
    fn test_geometry_round_trip() {
        let graph = arm();
        let set = skeleton_only(&graph);
        let converter = BindPoseConverter::new(&graph, &set).with_axes(BoneAxes::IDENTITY);

        for node in [NodeId(1), NodeId(2)] {
            let bind = converter.bind_transform(node, NodeId(0)).unwrap();
            let BindPose::Bone(geometry) = converter.compute_bind_geometry(node, NodeId(0)).unwrap() else {
                panic!("{node:?} should be a bone");
            };
            assert_eq!(geometry.head, bind.w_axis.truncate());
            assert!(((geometry.tail - geometry.head).length() - 1.0).abs() < EPSILON);

            let scale = Mat3::from_mat4(bind).determinant().cbrt();
            let rotation = Mat3::from_mat4(bind) * scale.recip();
            assert!(
                geometry.orientation().abs_diff_eq(rotation, EPSILON),
                "orientation of {node:?} does not round-trip"
            );
        }
    }

    #[test]
    fn test_geometry_applies_bone_axes() {
        let graph = arm();
        let set = skeleton_only(&graph);
        let axes = BoneAxes::default();
        let converter = BindPoseConverter::new(&graph, &set).with_axes(axes);

        let bind = converter.bind_transform(NodeId(1), NodeId(0)).unwrap();
        let BindPose::Bone(geometry) = converter.compute_bind_geometry(NodeId(1), NodeId(0)).unwrap() else {
            panic!("Upper should be a bone");
        };
        let expected = Mat3::from_mat4(bind) * axes.correction().transpose();
        assert!(geometry.orientation().abs_diff_eq(expected, EPSILON));
        // NIF bones point along +X; Upper is turned onto +Y
        assert!(geometry.direction().abs_diff_eq(Vec3::Y, EPSILON));
    }

    #[test]
    fn test_not_a_bone() {
        let graph = arm();
        let set = skeleton_only(&graph);
        let converter = BindPoseConverter::new(&graph, &set);

        assert_eq!(
            converter.compute_bind_geometry(NodeId(0), NodeId(0)),
            Ok(BindPose::NotABone)
        );
        assert_eq!(
            converter.compute_bind_geometry(NodeId(2), NodeId(1)),
            Ok(BindPose::NotABone)
        );
    }

    #[test]
    fn test_singular_and_non_finite() {
        let graph = NodeGraph::new(vec![
            bone("Root", NifTransform::IDENTITY, &[1, 2]),
            bone("Flat", rotated([0.0; 3], Mat3::IDENTITY, 0.0), &[]),
            bone("Broken", NifTransform::from_translation([f32::NAN, 0.0, 0.0]), &[]),
        ])
        .unwrap();
        let set = skeleton_only(&graph);
        let converter = BindPoseConverter::new(&graph, &set);

        assert_eq!(
            converter.compute_bind_geometry(NodeId(1), NodeId(0)),
            Err(GeometryError::Singular("Flat".into()))
        );
        assert_eq!(
            converter.compute_bind_geometry(NodeId(2), NodeId(0)),
            Err(GeometryError::NonFinite("Broken".into()))
        );
    }

    #[test]
    fn test_bind_transform_requires_ancestor() {
        let graph = arm();
        let set = skeleton_only(&graph);
        let converter = BindPoseConverter::new(&graph, &set);
        assert_eq!(
            converter.bind_transform(NodeId(1), NodeId(2)),
            Err(GeometryError::NotAnAncestor {
                bone: "Upper".into(),
                root: "Lower".into(),
            })
        );
    }

    #[test]
    fn test_scale_correction() {
        let graph = arm();
        let set = skeleton_only(&graph);
        let converter = BindPoseConverter::new(&graph, &set).with_scale_correction(0.1);
        let BindPose::Bone(geometry) = converter.compute_bind_geometry(NodeId(1), NodeId(0)).unwrap() else {
            panic!("Upper should be a bone");
        };
        assert!(geometry.head.abs_diff_eq(Vec3::new(0.1, 0.0, 0.0), EPSILON));
    }

    #[test]
    fn test_small_scale_is_not_singular() {
        let graph = NodeGraph::new(vec![
            bone("Root", NifTransform::IDENTITY, &[1]),
            bone("Outer", rotated([0.0; 3], Mat3::IDENTITY, 0.005), &[2]),
            bone("Inner", rotated([1.0, 0.0, 0.0], Mat3::from_rotation_y(0.4), 0.005), &[]),
        ])
        .unwrap();
        let set = skeleton_only(&graph);
        let converter = BindPoseConverter::new(&graph, &set).with_axes(BoneAxes::IDENTITY);

        let BindPose::Bone(geometry) = converter.compute_bind_geometry(NodeId(2), NodeId(0)).unwrap() else {
            panic!("Inner should be a bone");
        };
        assert!(geometry.head.abs_diff_eq(Vec3::new(0.005, 0.0, 0.0), EPSILON));
        assert!(geometry.orientation().abs_diff_eq(Mat3::from_rotation_y(0.4), EPSILON));
    }

    #[test]
    fn test_shared_child_built_once() {
        // C is listed by both A and B; B lists it last and becomes its parent
        let at = NifTransform::from_translation;
        let graph = NodeGraph::new(vec![
            bone("Root", NifTransform::IDENTITY, &[1, 2]),
            bone("A", at([1.0, 0.0, 0.0]), &[3]),
            bone("B", at([0.0, 1.0, 0.0]), &[3, 4]),
            bone("C", at([0.0, 0.0, 5.0]), &[5]),
            bone("D", at([0.0, 2.0, 0.0]), &[]),
            bone("E", at([0.0, 0.0, 1.0]), &[]),
        ])
        .unwrap();
        let set = skeleton_only(&graph);
        assert_eq!(set.bones(NodeId(0)).len(), 5);
        let converter = BindPoseConverter::new(&graph, &set).with_axes(BoneAxes::IDENTITY);
        let mut names = NameRegistry::new();

        let bones = converter.build_armature(NodeId(0), 1.0, &mut names).unwrap();
        let order: Vec<_> = bones.iter().map(|bone| bone.name.as_str()).collect();
        assert_eq!(order, ["A", "B", "C", "E", "D"]);

        let c = &bones[2];
        assert_eq!(c.parent, Some(NodeId(2)));
        assert!(c.geometry.head.abs_diff_eq(Vec3::new(0.0, 1.0, 5.0), EPSILON));
        // E ends the chain below C, so it inherits C's span to E
        assert!((c.geometry.length - 1.0).abs() < EPSILON);
        assert_eq!(bones[3].geometry.length, c.geometry.length);
        // A has no bone children of its own and inherits the root-level default
        assert_eq!(bones[0].geometry.length, 1.0);
    }

    /// Root
    /// └ A (root-level)
    ///   ├ B ── C          chain with a real span
    ///   ├ E ── F          degenerate span
    ///   └ G               leaf below a root-level bone
    fn limbs() -> NodeGraph {
        let at = NifTransform::from_translation;
        NodeGraph::new(vec![
            bone("Root", NifTransform::IDENTITY, &[1]),
            bone("A", at([0.0, 1.0, 0.0]), &[2, 4, 6]),
            bone("B", at([0.0, 2.0, 0.0]), &[3]),
            bone("C", at([0.0, 3.0, 0.0]), &[]),
            bone("E", at([0.0, 0.0, 1.0]), &[5]),
            bone("F", at([0.001, 0.0, 0.0]), &[]),
            bone("G", at([1.0, 0.0, 0.0]), &[]),
        ])
        .unwrap()
    }

    #[test]
    fn test_infer_lengths() {
        let graph = limbs();
        let set = skeleton_only(&graph);
        let converter = BindPoseConverter::new(&graph, &set).with_axes(BoneAxes::IDENTITY);

        let lengths = converter.infer_lengths(NodeId(0), 1.5).unwrap();
        assert_eq!(lengths.len(), 6);
        assert_eq!(lengths[&NodeId(1)], 1.5);
        assert!((lengths[&NodeId(2)] - 3.0).abs() < EPSILON);
        // End of chain inherits the parent's length exactly
        assert_eq!(lengths[&NodeId(3)], lengths[&NodeId(2)]);
        assert_eq!(lengths[&NodeId(4)], FALLBACK_BONE_LENGTH);
        assert_eq!(lengths[&NodeId(5)], FALLBACK_BONE_LENGTH);
        assert_eq!(lengths[&NodeId(6)], 1.5);
    }

    #[test]
    fn test_build_armature_fits_tails() {
        let graph = limbs();
        let set = skeleton_only(&graph);
        let converter = BindPoseConverter::new(&graph, &set).with_axes(BoneAxes::IDENTITY);
        let mut names = NameRegistry::new();

        let bones = converter.build_armature(NodeId(0), 1.0, &mut names).unwrap();
        let order: Vec<_> = bones.iter().map(|bone| bone.name.as_str()).collect();
        assert_eq!(order, ["A", "B", "C", "E", "F", "G"]);
        assert_eq!(bones[0].parent, None);
        assert_eq!(bones[1].parent, Some(NodeId(1)));

        let b = &bones[1].geometry;
        assert!(b.head.abs_diff_eq(Vec3::new(0.0, 3.0, 0.0), EPSILON));
        assert!(b.tail.abs_diff_eq(Vec3::new(0.0, 6.0, 0.0), EPSILON));
        assert!((b.length - 3.0).abs() < EPSILON);
    }

    #[test]
    fn test_build_armature_uses_host_names() {
        let graph = NodeGraph::new(vec![
            bone("Bip01", NifTransform::IDENTITY, &[1]),
            bone("Bip01 L Thigh", NifTransform::from_translation([0.0, 1.0, 0.0]), &[]),
        ])
        .unwrap();
        let set = skeleton_only(&graph);
        let converter = BindPoseConverter::new(&graph, &set);
        let mut names = NameRegistry::new();

        let bones = converter.build_armature(NodeId(0), 1.0, &mut names).unwrap();
        assert_eq!(bones[0].name, "Bip01 Thigh.L");
        assert_eq!(
            names.full_names(&graph).full_name("Bip01 Thigh.L"),
            "Bip01 L Thigh"
        );
    }
}
