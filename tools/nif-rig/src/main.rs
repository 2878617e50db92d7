//! nif-rig - NIF armature inspection tool
//!
//! Loads a node graph description, decides which nodes become armatures and
//! bones, and writes the resulting edit bones.

use anyhow::{Context, Result};
use clap::{Args, Parser, Subcommand, ValueEnum};
use nif_armature::{ExternalArmature, FULL_NAMES_TEXT, SkeletonPolicy};
use std::path::{Path, PathBuf};

use nif_rig::{rig, scene, RigOptions};

#[derive(Parser)]
#[command(name = "nif-rig")]
#[command(about = "NIF armature inspection tool")]
#[command(version)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// List armatures and their bones
    Classify {
        /// Scene description (.json or .toml)
        scene: PathBuf,

        #[command(flatten)]
        import: ImportArgs,
    },

    /// Build edit bones and write them as JSON
    Bones {
        /// Scene description (.json or .toml)
        scene: PathBuf,

        /// Output .rig.json file
        #[arg(short, long)]
        output: Option<PathBuf>,

        /// Also write the FullNames text
        #[arg(long)]
        full_names: Option<PathBuf>,

        #[command(flatten)]
        import: ImportArgs,
    },

    /// Validate a scene description
    Check {
        /// Scene description (.json or .toml)
        scene: PathBuf,
    },
}

#[derive(Args)]
struct ImportArgs {
    /// Import settings (TOML)
    #[arg(long)]
    settings: Option<PathBuf>,

    /// Skeleton policy (overrides settings)
    #[arg(long, value_enum)]
    policy: Option<Policy>,

    /// Existing armature to import geometry onto
    #[arg(long)]
    armature: Option<String>,

    /// Bone of the existing armature (repeatable)
    #[arg(long = "bone", requires = "armature")]
    bones: Vec<String>,

    /// Length of root-level bones (overrides settings)
    #[arg(long)]
    default_length: Option<f32>,
}

#[derive(Clone, Copy, ValueEnum)]
enum Policy {
    Everything,
    SkeletonOnly,
    GeometryOnly,
}

impl From<Policy> for SkeletonPolicy {
    fn from(policy: Policy) -> Self {
        match policy {
            Policy::Everything => Self::Everything,
            Policy::SkeletonOnly => Self::SkeletonOnly,
            Policy::GeometryOnly => Self::GeometryOnly,
        }
    }
}

impl ImportArgs {
    fn into_options(self) -> Result<RigOptions> {
        let mut settings = scene::load_settings(self.settings.as_deref())?;
        if let Some(policy) = self.policy {
            settings.skeleton = policy.into();
        }
        if let Some(length) = self.default_length {
            settings.default_bone_length = length;
        }
        let external_armature = self.armature.map(|name| ExternalArmature {
            name,
            bone_names: self.bones,
        });
        Ok(RigOptions {
            settings,
            external_armature,
        })
    }
}

fn main() -> Result<()> {
    // Initialize logging
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::from_default_env()
                .add_directive(tracing::Level::INFO.into()),
        )
        .init();

    let cli = Cli::parse();

    match cli.command {
        Commands::Classify { scene: path, import } => {
            let options = import.into_options()?;
            let scene = scene::load_scene(&path)?;
            let rig = rig::classify_scene(&scene, &options)?;
            rig::log_classification(&rig);
        }

        Commands::Bones {
            scene: path,
            output,
            full_names,
            import,
        } => {
            let output = output.unwrap_or_else(|| path.with_extension("rig.json"));
            tracing::info!("Building bones {:?} -> {:?}", path, output);

            let options = import.into_options()?;
            let scene = scene::load_scene(&path)?;
            let rig = rig::classify_scene(&scene, &options)?;
            let (report, names) = rig::build_report(&rig, &options.settings)?;

            let json = serde_json::to_string_pretty(&report)?;
            write_file(&output, &json)?;
            if let Some(full_names) = full_names {
                tracing::info!("Writing {} ({} names) to {:?}", FULL_NAMES_TEXT, names.len(), full_names);
                write_file(&full_names, &names.to_text())?;
            }
            tracing::info!("Done!");
        }

        Commands::Check { scene: path } => {
            tracing::info!("Checking scene {:?}", path);
            let scene = scene::load_scene(&path)?;
            let graph = scene.to_graph()?;
            let root = scene.root_id(&graph)?;
            if graph.get(root).is_none() {
                anyhow::bail!("Root index {} is out of range ({} nodes)", root.index(), graph.len());
            }
            tracing::info!("Scene is valid! ({} nodes, root '{}')", graph.len(), graph.node(root).name);
        }
    }

    Ok(())
}

fn write_file(path: &Path, contents: &str) -> Result<()> {
    std::fs::write(path, contents).with_context(|| format!("Failed to write {:?}", path))
}
