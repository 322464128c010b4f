use catmaid_addons::config::ConnectionConfig;
use catmaid_addons::transforms::{
    warp_points_fanc_to_template, warp_points_template_to_fanc, AffineTransform, Points, Units,
};
use catmaid_addons::utils::error::{AddonsError, Result};
use catmaid_addons::utils::logger;
use clap::{Parser, ValueEnum};
use std::path::PathBuf;

#[derive(Debug, Clone, Copy, ValueEnum)]
enum FancDirection {
    /// FANC voxel space to the VNC template
    ToTemplate,
    /// VNC template to FANC voxel space
    ToFanc,
}

#[derive(Debug, Parser)]
#[command(name = "warp-points")]
#[command(about = "Apply an affine or FANC/template elastic transform to a CSV of x,y,z points")]
struct Args {
    /// CSV with x,y,z columns; `-` reads stdin
    input: String,

    /// Output CSV; stdout when omitted
    #[arg(short, long)]
    output: Option<PathBuf>,

    /// 4x4 row-vector affine transform file
    #[arg(long, conflicts_with_all = ["preset", "fanc"])]
    affine: Option<PathBuf>,

    /// Built-in affine transform, e.g. reflect_x
    #[arg(long, conflicts_with = "fanc")]
    preset: Option<String>,

    /// Use the inverse of the affine transform
    #[arg(long)]
    inverse: bool,

    #[arg(long, value_enum)]
    fanc: Option<FancDirection>,

    #[arg(long, default_value = "nm")]
    units: Units,

    /// Defaults to the input units
    #[arg(long)]
    output_units: Option<Units>,

    /// Mirror across the template midline
    #[arg(long)]
    reflect: bool,

    /// Directory holding the transformix parameter files
    #[arg(long)]
    params_dir: Option<String>,

    #[arg(long)]
    transformix: Option<String>,

    #[arg(short, long, help = "Enable verbose output")]
    verbose: bool,
}

fn read_points(input: &str) -> Result<Points> {
    if input == "-" {
        Points::read_csv(std::io::stdin().lock())
    } else {
        Points::read_csv(std::fs::File::open(input)?)
    }
}

fn affine(args: &Args) -> Result<Option<AffineTransform>> {
    let transform = match (&args.affine, &args.preset) {
        (Some(path), _) => AffineTransform::from_file(path)?,
        (None, Some(name)) => AffineTransform::preset(name)
            .ok_or_else(|| AddonsError::validation(format!("unknown affine preset '{}'", name)))?,
        (None, None) => return Ok(None),
    };
    if args.inverse {
        return transform.inverse().map(Some);
    }
    Ok(Some(transform))
}

async fn run(args: &Args) -> Result<Points> {
    let points = read_points(&args.input)?;
    tracing::info!("📥 Read {} points", points.len());

    if let Some(transform) = affine(args)? {
        return Ok(transform.apply(&points));
    }

    let Some(direction) = args.fanc else {
        return Err(AddonsError::validation(
            "nothing to do: pass --affine, --preset or --fanc",
        ));
    };
    let config = ConnectionConfig {
        transformix_binary: args.transformix.clone(),
        transform_parameters_dir: args.params_dir.clone(),
        ..ConnectionConfig::default()
    };
    let context = config.warp_context();
    let output_units = args.output_units.unwrap_or(args.units);
    match direction {
        FancDirection::ToTemplate => {
            warp_points_fanc_to_template(&context, &points, args.units, output_units, args.reflect)
                .await
        }
        FancDirection::ToFanc => {
            warp_points_template_to_fanc(&context, &points, args.units, output_units, args.reflect)
                .await
        }
    }
}

#[tokio::main]
async fn main() -> std::result::Result<(), Box<dyn std::error::Error>> {
    let args = Args::parse();
    logger::init_cli_logger(args.verbose);

    match run(&args).await {
        Ok(points) => {
            match &args.output {
                Some(path) => {
                    points.write_csv(std::fs::File::create(path)?)?;
                    eprintln!("✅ Wrote {} points to {}", points.len(), path.display());
                }
                None => points.write_csv(std::io::stdout().lock())?,
            }
            Ok(())
        }
        Err(e) => {
            tracing::error!("❌ Warp failed: {} (Category: {:?})", e, e.category());
            eprintln!("❌ {}", e.user_friendly_message());
            eprintln!("💡 Suggestion: {}", e.recovery_suggestion());
            std::process::exit(1);
        }
    }
}
