//! Import settings
//!
//! Mirrors the options the importer exposes to the user. Every field has a
//! default so a settings file only needs to name what it changes.

use serde::{Deserialize, Serialize};

use crate::classify::SkeletonPolicy;
use crate::math::{Axis, AxisError, BoneAxes};

/// Default length of root-level bones
pub const DEFAULT_BONE_LENGTH: f32 = 1.0;

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ImportSettings {
    /// How armatures and bones are discovered
    pub skeleton: SkeletonPolicy,
    /// Axis NIF bones point along
    pub axis_forward: Axis,
    /// Axis pointing up in NIF bone space
    pub axis_up: Axis,
    /// Merge geometry children into their parent node (grouping nodes)
    pub combine_shapes: bool,
    /// Global scale applied to all translations
    pub scale_correction: f32,
    /// Length given to bones directly below the armature root
    pub default_bone_length: f32,
}

impl Default for ImportSettings {
    fn default() -> Self {
        Self {
            skeleton: SkeletonPolicy::Everything,
            axis_forward: Axis::X,
            axis_up: Axis::Y,
            combine_shapes: false,
            scale_correction: 1.0,
            default_bone_length: DEFAULT_BONE_LENGTH,
        }
    }
}

impl ImportSettings {
    pub fn bone_axes(&self) -> Result<BoneAxes, AxisError> {
        BoneAxes::new(self.axis_forward, self.axis_up)
    }
}
