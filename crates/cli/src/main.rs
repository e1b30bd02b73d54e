mod cmd;
mod output;

use std::path::PathBuf;
use std::process::ExitCode;

use clap::{ArgAction, Parser, Subcommand};
use tracing_subscriber::EnvFilter;

use strata_lib::bind::{BindError, PortBinding};
use strata_lib::build::BuildError;
use strata_lib::config::ConfigError;
use strata_lib::context::ContextError;
use strata_lib::error::ErrorKind;
use strata_lib::execute::StepError;
use strata_lib::image::ImageError;
use strata_lib::plan::PlanError;
use strata_lib::recipe::RecipeError;
use strata_lib::step::parse_env_pair;
use strata_lib::store_lock::StoreLockError;

use crate::output::{OutputFormat, print_error, print_json};

/// strata - layered image builder with per-step caching
#[derive(Parser)]
#[command(name = "strata")]
#[command(author, version, about, long_about = None)]
struct Cli {
  /// Increase log verbosity (-v debug, -vv trace)
  #[arg(short, long, global = true, action = ArgAction::Count)]
  verbose: u8,

  /// Output format
  #[arg(short, long, global = true, value_enum, default_value_t)]
  output: OutputFormat,

  #[command(subcommand)]
  command: Commands,
}

#[derive(Subcommand)]
enum Commands {
  /// Build an image from a recipe and tag it
  Build {
    /// Build context directory
    #[arg(default_value = ".")]
    context: PathBuf,

    /// Tag for the built image (name[:tag])
    #[arg(short, long)]
    tag: String,

    /// Recipe file (default: <context>/strata.json)
    #[arg(short = 'f', long = "file")]
    recipe: Option<PathBuf>,

    /// Per-command timeout, e.g. 90s or 10m; 0 disables
    #[arg(long)]
    timeout: Option<String>,
  },

  /// Resolve how an image would be launched
  Run {
    /// Image tag or id
    image: String,

    /// Publish a container port (host:container or port)
    #[arg(short, long = "publish")]
    publish: Vec<PortBinding>,

    /// Set an environment variable (KEY=VALUE)
    #[arg(short, long = "env", value_parser = parse_env_pair)]
    env: Vec<(String, String)>,

    /// Replace the image entrypoint
    #[arg(long, num_args = 1.., allow_hyphen_values = true)]
    entrypoint: Option<Vec<String>>,
  },

  /// List tagged images
  Images,

  /// Remove an image tag
  Rmi {
    /// Tag to remove (name[:tag])
    tag: String,
  },

  /// Remove layers and blobs no tagged image references
  Gc {
    /// Report what would be removed without deleting anything
    #[arg(long)]
    dry_run: bool,
  },
}

fn init_tracing(verbose: u8) {
  let default = match verbose {
    0 => "warn",
    1 => "debug",
    _ => "trace",
  };
  let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default));
  tracing_subscriber::fmt()
    .with_env_filter(filter)
    .with_writer(std::io::stderr)
    .without_time()
    .init();
}

fn main() -> ExitCode {
  let cli = Cli::parse();
  init_tracing(cli.verbose);

  let output = cli.output;
  let result = match cli.command {
    Commands::Build {
      context,
      tag,
      recipe,
      timeout,
    } => cmd::cmd_build(
      &cmd::BuildArgs {
        context,
        tag,
        recipe,
        timeout,
      },
      output,
    ),
    Commands::Run {
      image,
      publish,
      env,
      entrypoint,
    } => cmd::cmd_run(
      &cmd::RunArgs {
        image,
        publish,
        env: env.into_iter().collect(),
        entrypoint,
      },
      output,
    ),
    Commands::Images => cmd::cmd_images(output),
    Commands::Rmi { tag } => cmd::cmd_rmi(&tag, output),
    Commands::Gc { dry_run } => cmd::cmd_gc(dry_run, output),
  };

  match result {
    Ok(()) => ExitCode::SUCCESS,
    Err(err) => {
      let kind = error_kind(&err);
      if output.is_json() {
        let report = serde_json::json!({
          "error": format!("{:#}", err),
          "kind": kind,
          "exit_code": exit_code(kind),
        });
        // Nothing useful remains to report if stdout itself is broken.
        let _ = print_json(&report);
      }
      print_error(&format!("{:#}", err));
      ExitCode::from(exit_code(kind))
    }
  }
}

/// Classify an error by the first library error found in its chain.
fn error_kind(err: &anyhow::Error) -> Option<ErrorKind> {
  err.chain().find_map(|cause| {
    if let Some(e) = cause.downcast_ref::<BuildError>() {
      Some(e.kind())
    } else if let Some(e) = cause.downcast_ref::<PlanError>() {
      Some(e.kind())
    } else if let Some(e) = cause.downcast_ref::<StepError>() {
      Some(e.kind())
    } else if let Some(e) = cause.downcast_ref::<BindError>() {
      Some(e.kind())
    } else if let Some(e) = cause.downcast_ref::<ImageError>() {
      Some(e.kind())
    } else if let Some(e) = cause.downcast_ref::<RecipeError>() {
      Some(e.kind())
    } else if let Some(e) = cause.downcast_ref::<ContextError>() {
      Some(e.kind())
    } else if let Some(e) = cause.downcast_ref::<StoreLockError>() {
      Some(e.kind())
    } else {
      cause.downcast_ref::<ConfigError>().map(ConfigError::kind)
    }
  })
}

fn exit_code(kind: Option<ErrorKind>) -> u8 {
  kind
    .map(|k| k.exit_code())
    .and_then(|code| u8::try_from(code).ok())
    .unwrap_or(1)
}
