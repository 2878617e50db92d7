//! Armature reconciliation for NIF scene graphs
//!
//! NIF files have no notion of an armature: skins simply reference the nodes
//! that deform them, and whole skeleton files are plain node trees. This crate
//! decides which nodes become armatures and bones, and converts their NIF bind
//! transforms into head/tail/roll edit bones.
//!
//! ```text
//! NodeGraph ──classify──▶ ArmatureSet ──BindPoseConverter──▶ EditBone list
//! ```

pub mod bind_pose;
pub mod classify;
pub mod error;
pub mod graph;
pub mod math;
pub mod naming;
pub mod settings;

pub use bind_pose::{BindPose, BindPoseConverter, EditBone, EditBoneGeometry};
pub use classify::{classify, ArmatureSet, Classifier, ClassifyOptions, ExternalArmature, SkeletonPolicy};
pub use error::{ArmatureError, GeometryError, StructureError};
pub use graph::{NifTransform, Node, NodeGraph, NodeId, NodeKind, SkinInstance};
pub use math::{Axis, AxisError, BoneAxes};
pub use naming::{FullNames, NameRegistry, NamingError, FULL_NAMES_TEXT};
pub use settings::ImportSettings;
