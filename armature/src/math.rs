//! Coordinate conversion helpers
//!
//! NIF stores rotations transposed relative to the column-vector convention
//! used by glam, with a single uniform scale. Host bones are encoded by head,
//! tail and roll around the bone's local Y axis rather than by a full matrix.

use glam::{Mat3, Mat4, Vec3};
use serde::{Deserialize, Serialize};

use crate::graph::NifTransform;

/// Convert a NIF local transform to a column-vector affine matrix
///
/// The translation is multiplied by `scale_correction`, the importer's global
/// unit scale.
pub fn nif_transform_to_mat4(transform: &NifTransform, scale_correction: f32) -> Mat4 {
    let rotation = Mat3::from_cols_array_2d(&transform.rotation);
    let translation = Vec3::from_array(transform.translation) * scale_correction;
    Mat4::from_translation(translation)
        * Mat4::from_mat3(rotation)
        * Mat4::from_scale(Vec3::splat(transform.scale))
}

/// Signed coordinate axis
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum Axis {
    #[serde(rename = "X")]
    X,
    #[serde(rename = "Y")]
    Y,
    #[serde(rename = "Z")]
    Z,
    #[serde(rename = "-X")]
    NegX,
    #[serde(rename = "-Y")]
    NegY,
    #[serde(rename = "-Z")]
    NegZ,
}

impl Axis {
    pub fn to_vec3(self) -> Vec3 {
        match self {
            Self::X => Vec3::X,
            Self::Y => Vec3::Y,
            Self::Z => Vec3::Z,
            Self::NegX => Vec3::NEG_X,
            Self::NegY => Vec3::NEG_Y,
            Self::NegZ => Vec3::NEG_Z,
        }
    }

    fn base(self) -> u8 {
        match self {
            Self::X | Self::NegX => 0,
            Self::Y | Self::NegY => 1,
            Self::Z | Self::NegZ => 2,
        }
    }
}

impl std::str::FromStr for Axis {
    type Err = AxisError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_uppercase().as_str() {
            "X" | "+X" => Ok(Self::X),
            "Y" | "+Y" => Ok(Self::Y),
            "Z" | "+Z" => Ok(Self::Z),
            "-X" => Ok(Self::NegX),
            "-Y" => Ok(Self::NegY),
            "-Z" => Ok(Self::NegZ),
            _ => Err(AxisError::Unknown(s.to_string())),
        }
    }
}

/// Invalid bone axis configuration
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum AxisError {
    #[error("unknown axis '{0}' (expected X, Y, Z, -X, -Y or -Z)")]
    Unknown(String),

    #[error("forward axis {forward:?} and up axis {up:?} must be perpendicular")]
    Parallel { forward: Axis, up: Axis },
}

/// Orientation of NIF bones relative to host bones
///
/// Host bones point along their local +Y with +Z up. NIF skeletons usually
/// point bones along another axis; `forward` and `up` name those axes in NIF
/// bone space.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct BoneAxes {
    forward: Axis,
    up: Axis,
}

impl BoneAxes {
    /// No correction: NIF bones already point along +Y with +Z up
    pub const IDENTITY: Self = Self {
        forward: Axis::Y,
        up: Axis::Z,
    };

    pub fn new(forward: Axis, up: Axis) -> Result<Self, AxisError> {
        if forward.base() == up.base() {
            return Err(AxisError::Parallel { forward, up });
        }
        Ok(Self { forward, up })
    }

    pub fn forward(&self) -> Axis {
        self.forward
    }

    pub fn up(&self) -> Axis {
        self.up
    }

    /// Rotation taking NIF bone space to host bone space (forward -> Y, up -> Z)
    pub fn correction(&self) -> Mat3 {
        let forward = self.forward.to_vec3();
        let up = self.up.to_vec3();
        Mat3::from_cols(forward.cross(up), forward, up).transpose()
    }

    /// Armature-space NIF bind matrix -> host bone matrix
    pub fn nif_bind_to_host_bind(&self, nif_bind: Mat4) -> Mat4 {
        nif_bind * Mat4::from_mat3(self.correction().transpose())
    }

    /// Host bone matrix -> armature-space NIF bind matrix, for export
    pub fn host_bind_to_nif_bind(&self, host_bind: Mat4) -> Mat4 {
        host_bind * Mat4::from_mat3(self.correction())
    }
}

impl Default for BoneAxes {
    /// Bip01-style skeletons: bones along +X, +Y up
    fn default() -> Self {
        Self {
            forward: Axis::X,
            up: Axis::Y,
        }
    }
}

/// Below this `1 + y` the bone is treated as pointing (almost) straight down -Y
const SAFE_THRESHOLD: f32 = 6.1e-3;

/// Minimal rotation taking +Y onto `dir` (unit length)
///
/// Closed form of the shortest-arc rotation. Only an exactly antiparallel
/// `dir` is ambiguous; the half turn about Z is used there so the bone's Z
/// axis keeps its reference orientation.
fn rotation_from_y(dir: Vec3) -> Mat3 {
    let (x, y, z) = (dir.x, dir.y, dir.z);
    let mut theta = 1.0 + y;
    let theta_alt = x * x + z * z;

    if theta > SAFE_THRESHOLD || theta_alt > 0.0 {
        if theta <= SAFE_THRESHOLD {
            // Near -Y, 1 + y loses precision; use the series of 1 - sqrt(1 - r^2)
            theta = theta_alt * 0.5 + theta_alt * theta_alt * 0.125;
        }
        Mat3::from_cols(
            Vec3::new(1.0 - x * x / theta, -x, -x * z / theta),
            Vec3::new(x, y, z),
            Vec3::new(-x * z / theta, -z, 1.0 - z * z / theta),
        )
    } else {
        Mat3::from_cols(Vec3::NEG_X, Vec3::NEG_Y, Vec3::Z)
    }
}

/// Rebuild a bone orientation from its direction and roll
pub fn vec_roll_to_mat3(dir: Vec3, roll: f32) -> Mat3 {
    let dir = dir.normalize();
    Mat3::from_axis_angle(dir, roll) * rotation_from_y(dir)
}

/// Split a bone orientation into its Y direction and roll
///
/// `orientation` must be a pure rotation. The returned direction is the
/// orientation's Y column, so `vec_roll_to_mat3(dir, roll)` reproduces it.
pub fn mat3_to_vec_roll(orientation: Mat3) -> (Vec3, f32) {
    let dir = orientation.y_axis;
    let base = rotation_from_y(dir.normalize());
    let roll_matrix = base.transpose() * orientation;
    let roll = roll_matrix.z_axis.x.atan2(roll_matrix.z_axis.z);
    (dir, roll)
}
