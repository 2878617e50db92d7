//! nif-rig library
//!
//! Scene loading and the classify/build pipeline behind the `nif-rig` binary.

pub mod rig;
pub mod scene;

pub use rig::{build_report, classify_scene, Rig, RigOptions, RigReport};
pub use scene::{load_scene, load_settings, SceneDescription};
