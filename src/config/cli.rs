use crate::config::connection::DEFAULT_CONFIG_FILE;
use crate::core::connections::ProjectSelector;
use crate::core::linking::PruneMode;
use crate::core::reupload::{TranslationUnit, UploadOptions, PRIMARY_NEURITE_RADIUS};
use crate::domain::model::{SkeletonId, VolumeId};
use crate::utils::error::{AddonsError, Result};
use crate::utils::validation::{
    validate_non_empty_string, validate_path, validate_range, Validate,
};
use clap::{Args, Parser, Subcommand};
use std::path::PathBuf;

#[derive(Debug, Clone, Parser)]
#[command(name = "catmaid-addons")]
#[command(about = "Pull, transform and re-upload CATMAID neurons between projects")]
pub struct Cli {
    /// Connection config: a file path, a file in the config directory, or a nickname
    #[arg(short, long, global = true, default_value = DEFAULT_CONFIG_FILE)]
    pub config: String,

    #[arg(short, long, global = true, help = "Enable verbose output")]
    pub verbose: bool,

    /// Log as JSON lines instead of human-readable text
    #[arg(long, global = true)]
    pub json_logs: bool,

    /// Answer yes to every confirmation prompt
    #[arg(short = 'y', long, global = true)]
    pub yes: bool,

    #[command(subcommand)]
    pub command: Command,
}

/// Neurons picked by id or by annotations (all of which must match).
#[derive(Debug, Clone, Args)]
#[group(required = true, multiple = false)]
pub struct NeuronSelection {
    #[arg(long, value_delimiter = ',')]
    pub skids: Vec<SkeletonId>,

    #[arg(short = 'a', long = "annotation")]
    pub annotations: Vec<String>,
}

#[derive(Debug, Clone, Args)]
pub struct UploadFlags {
    /// Actually upload. Without this only the plan is reported.
    #[arg(long)]
    pub live: bool,

    /// Annotate each source neuron with a link to its upload
    #[arg(long)]
    pub annotate_source: bool,

    #[arg(long)]
    pub import_connectors: bool,

    /// Create new connectors even where matching ones already exist
    #[arg(long)]
    pub no_reuse_connectors: bool,

    /// Overwrite target neurons that are already linked
    #[arg(long)]
    pub allow_update: bool,
}

impl UploadFlags {
    pub fn options(&self) -> UploadOptions {
        UploadOptions {
            annotate_source_neuron: self.annotate_source,
            import_connectors: self.import_connectors,
            reuse_existing_connectors: !self.no_reuse_connectors,
            refuse_to_update: !self.allow_update,
            fake: !self.live,
            ..UploadOptions::default()
        }
    }
}

#[derive(Debug, Clone, Subcommand)]
pub enum Command {
    /// List the projects visible to the source API key
    Projects,

    /// Write a 3D viewer JSON document from a colour → annotations mapping file
    ViewerJson {
        #[arg(long)]
        mapping: PathBuf,
        #[arg(short, long)]
        output: PathBuf,
        #[arg(long, default_value_t = 1.0)]
        opacity: f64,
        #[arg(long, default_value = "source")]
        project: ProjectSelector,
    },

    Copy {
        #[command(flatten)]
        selection: NeuronSelection,
        #[command(flatten)]
        upload: UploadFlags,
    },

    Translate {
        #[command(flatten)]
        selection: NeuronSelection,
        #[arg(long, num_args = 3, value_names = ["X", "Y", "Z"], allow_negative_numbers = true, required = true)]
        by: Vec<f64>,
        /// Interpret the translation in pixels of 4 x 4 x 40 nm
        #[arg(long)]
        pixels: bool,
        #[command(flatten)]
        upload: UploadFlags,
    },

    Affine {
        #[command(flatten)]
        selection: NeuronSelection,
        #[arg(long)]
        transform_file: PathBuf,
        #[command(flatten)]
        upload: UploadFlags,
    },

    /// Warp FANC neurons into the template space with transformix
    Elastic {
        #[command(flatten)]
        selection: NeuronSelection,
        #[arg(long)]
        flip: bool,
        #[arg(long)]
        include_connectors: bool,
        #[command(flatten)]
        upload: UploadFlags,
    },

    RadiusPrune {
        #[command(flatten)]
        selection: NeuronSelection,
        #[arg(long, default_value_t = PRIMARY_NEURITE_RADIUS)]
        radius: f64,
        /// Keep only nodes with exactly this radius
        #[arg(long)]
        exact: bool,
        #[command(flatten)]
        upload: UploadFlags,
    },

    VolumePrune {
        #[command(flatten)]
        selection: NeuronSelection,
        #[arg(long)]
        volume: VolumeId,
        /// fele (first entry, last exit) or strict
        #[arg(long, default_value = "fele")]
        mode: PruneMode,
        #[arg(long)]
        largest_fragment: bool,
        #[command(flatten)]
        upload: UploadFlags,
    },

    /// Re-run linked operations for source neurons to refresh their targets
    PushUpdates {
        #[command(flatten)]
        selection: NeuronSelection,
        #[arg(long)]
        recurse: bool,
        #[arg(long)]
        skip_dates: Vec<String>,
        /// Translation to re-apply to neurons linked by translation
        #[arg(long, num_args = 3, value_names = ["X", "Y", "Z"], allow_negative_numbers = true)]
        translation: Option<Vec<f64>>,
        #[arg(long)]
        pixels: bool,
        #[command(flatten)]
        upload: UploadFlags,
    },

    /// Refresh target neurons from the source neurons they link to
    PullUpdates {
        #[command(flatten)]
        selection: NeuronSelection,
        #[command(flatten)]
        upload: UploadFlags,
    },

    FindDesyncs {
        #[arg(short = 'a', long = "annotation")]
        annotations: Vec<String>,
    },

    UnlinkedConnectors {
        #[arg(long, default_value = "target")]
        project: ProjectSelector,
        #[arg(long)]
        delete: bool,
    },

    OverlappingConnectors {
        #[arg(long, default_value = "target")]
        project: ProjectSelector,
    },

    PurgeAnnotations {
        #[arg(long, default_value = "target")]
        project: ProjectSelector,
        /// Don't ask before each annotation
        #[arg(long)]
        force: bool,
    },

    /// Replace a skeleton's nodes with an SWC file, keeping its ids and name
    ReplaceSwc {
        #[arg(long)]
        skid: SkeletonId,
        #[arg(long)]
        swc: PathBuf,
        #[arg(long, default_value = "target")]
        project: ProjectSelector,
        #[arg(long)]
        live: bool,
    },

    DummyNodes {
        #[command(subcommand)]
        action: DummyNodeAction,
    },
}

#[derive(Debug, Clone, Subcommand)]
pub enum DummyNodeAction {
    /// Give single-node neurons a second node at (-1, -1, z)
    Add {
        #[command(flatten)]
        selection: NeuronSelection,
        #[arg(long, default_value = "target")]
        project: ProjectSelector,
        #[arg(long)]
        live: bool,
    },
    /// Remove the dummy node from two-node neurons
    Delete {
        #[command(flatten)]
        selection: NeuronSelection,
        #[arg(long, default_value = "target")]
        project: ProjectSelector,
        #[arg(long)]
        live: bool,
    },
}

/// `[x, y, z]` from a three-value argument.
pub fn translation_vector(values: &[f64]) -> Result<[f64; 3]> {
    match values {
        [x, y, z] => Ok([*x, *y, *z]),
        _ => Err(AddonsError::validation(format!(
            "translation needs exactly three values, got {}",
            values.len()
        ))),
    }
}

pub fn translation_unit(pixels: bool) -> TranslationUnit {
    if pixels {
        TranslationUnit::pixels()
    } else {
        TranslationUnit::Nanometers
    }
}

impl Command {
    fn selection(&self) -> Option<&NeuronSelection> {
        match self {
            Command::Copy { selection, .. }
            | Command::Translate { selection, .. }
            | Command::Affine { selection, .. }
            | Command::Elastic { selection, .. }
            | Command::RadiusPrune { selection, .. }
            | Command::VolumePrune { selection, .. }
            | Command::PushUpdates { selection, .. }
            | Command::PullUpdates { selection, .. } => Some(selection),
            Command::DummyNodes { action } => match action {
                DummyNodeAction::Add { selection, .. }
                | DummyNodeAction::Delete { selection, .. } => Some(selection),
            },
            _ => None,
        }
    }
}

impl Validate for Cli {
    fn validate(&self) -> Result<()> {
        validate_path("config", &self.config)?;
        if let Some(selection) = self.command.selection() {
            for annotation in &selection.annotations {
                validate_non_empty_string("annotation", annotation)?;
            }
        }
        match &self.command {
            Command::ViewerJson { opacity, .. } => validate_range("opacity", *opacity, 0.0, 1.0),
            Command::RadiusPrune { radius, .. } => {
                if *radius <= 0.0 {
                    return Err(AddonsError::InvalidConfigValueError {
                        field: "radius".to_string(),
                        value: radius.to_string(),
                        reason: "must be positive".to_string(),
                    });
                }
                Ok(())
            }
            Command::PushUpdates {
                translation: Some(values),
                ..
            } => translation_vector(values).map(|_| ()),
            _ => Ok(()),
        }
    }
}
