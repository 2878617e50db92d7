//! Error types for armature reconciliation
//!
//! Structural and geometry errors are fatal to the whole import. Soft problems
//! (unresolvable bone references, unhandled node types) are logged with
//! `tracing::warn!` and never surface here.

use crate::graph::NodeId;
use crate::naming::NamingError;

/// The node graph does not match what the selected skeleton policy expects
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum StructureError {
    /// Skeleton-only import needs a NiNode at the root
    #[error("cannot import skeleton: root '{0}' is not a NiNode")]
    RootNotNode(String),

    /// The external armature has no counterpart in the graph
    #[error("nif has no armature '{0}'")]
    MissingArmature(String),

    /// Geometry-only import was requested without an external armature
    #[error("geometry-only import requires an external armature")]
    NoExternalArmature,

    /// A skin is bound to a skeleton root other than the external armature
    #[error(
        "nif structure incompatible with '{armature}' as armature: \
         node '{geometry}' has '{skeleton_root}' as armature"
    )]
    IncompatibleSkeleton {
        armature: String,
        geometry: String,
        skeleton_root: String,
    },

    /// A child or skin reference points outside the node arena
    #[error("node {from} references missing node index {index}")]
    DanglingReference { from: usize, index: usize },

    /// Parent links loop back on themselves
    #[error("parent chain of node '{0}' forms a cycle")]
    ParentCycle(String),

    /// The requested root does not exist
    #[error("root node index {0} is out of range")]
    MissingRoot(usize),
}

/// A composed bind transform cannot be turned into head/tail/roll
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum GeometryError {
    /// NaN or infinite component somewhere in the chain
    #[error("bind transform of '{0}' has non-finite components")]
    NonFinite(String),

    /// Zero scale or otherwise non-invertible rotation part
    #[error("bind transform of '{0}' is singular")]
    Singular(String),

    /// Walking up from the bone never reached the armature root
    #[error("'{root}' is not an ancestor of '{bone}'")]
    NotAnAncestor { bone: String, root: String },
}

/// Any fatal reconciliation error
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ArmatureError {
    #[error(transparent)]
    Structure(#[from] StructureError),

    #[error(transparent)]
    Geometry(#[from] GeometryError),

    #[error(transparent)]
    Naming(#[from] NamingError),
}

impl GeometryError {
    pub(crate) fn not_an_ancestor(graph: &crate::graph::NodeGraph, bone: NodeId, root: NodeId) -> Self {
        Self::NotAnAncestor {
            bone: graph.node(bone).name.clone(),
            root: graph.node(root).name.clone(),
        }
    }
}
