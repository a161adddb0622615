use clap::{Parser, Subcommand};
use std::fs;
use std::path::{Path, PathBuf};

use tracing::info;
use tracing_subscriber::EnvFilter;

use protocrd::{
    cel::expand, check_compatibility, compile_schema, generate_crds, run_fixtures, to_yaml, Config,
    CrdError, Snapshot,
};

#[derive(Parser)]
#[command(name = "protocrd")]
#[command(about = "Compile annotated protobuf schemas into Kubernetes CRD validation schemas", long_about = None)]
struct Cli {
    /// Log at debug level unless RUST_LOG says otherwise
    #[arg(short, long, global = true)]
    verbose: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Compile a `.proto` file to CRD manifests (or per-message schemas without a config)
    Compile {
        /// Input `.proto` file
        #[arg(short, long)]
        input: PathBuf,

        /// Resource configuration (`protocrd.yaml`)
        #[arg(short, long, env = "PROTOCRD_CONFIG")]
        config: Option<PathBuf>,

        /// Output YAML file (if omitted, prints to stdout)
        #[arg(short, long)]
        output: Option<PathBuf>,
    },

    /// Expand the `default`, `oneof` and `index` macros in a CEL expression
    Expand {
        /// CEL expression
        expr: String,
    },

    /// Check `valid.yaml` / `invalid.yaml` fixtures against the compiled CRDs
    Validate {
        /// Input `.proto` file
        #[arg(short, long)]
        input: PathBuf,

        /// Resource configuration (`protocrd.yaml`)
        #[arg(short, long, env = "PROTOCRD_CONFIG")]
        config: PathBuf,

        /// Directory holding one sub-directory of fixtures per resource
        #[arg(short, long)]
        fixtures: PathBuf,
    },

    /// Report breaking changes between two versions of a `.proto` file
    Compat {
        /// `.proto` file of the previous release
        #[arg(short, long)]
        previous: PathBuf,

        /// Candidate `.proto` file
        #[arg(short = 'n', long)]
        candidate: PathBuf,
    },
}

fn init_logging(verbose: bool) {
    let default = if verbose { "debug" } else { "warn" };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();
}

fn write_output(output: Option<&Path>, text: &str) -> Result<(), CrdError> {
    match output {
        Some(path) => {
            fs::write(path, text)?;
            info!(path = %path.display(), "wrote output");
        }
        None => print!("{}", text),
    }
    Ok(())
}

fn main() -> Result<(), CrdError> {
    let cli = Cli::parse();
    init_logging(cli.verbose);

    match &cli.command {
        Commands::Compile { input, config, output } => {
            let text = fs::read_to_string(input)?;
            let (_file, schemas) = compile_schema(&text)?;
            let yaml = match config {
                Some(config) => to_yaml(&generate_crds(&schemas, &Config::load(config)?)?)?,
                None => schemas.to_yaml()?,
            };
            write_output(output.as_deref(), &yaml)
        }

        Commands::Expand { expr } => {
            let expanded = expand(expr).map_err(|e| CrdError::from_cel("<command line>", expr, e))?;
            println!("{}", expanded);
            Ok(())
        }

        Commands::Validate { input, config, fixtures } => {
            let text = fs::read_to_string(input)?;
            let (_file, schemas) = compile_schema(&text)?;
            let crds = generate_crds(&schemas, &Config::load(config)?)?;
            let report = run_fixtures(&crds, fixtures)?;
            for failure in &report.failures {
                println!("FAIL {}", failure);
            }
            println!("{} document(s) checked, {} failure(s)", report.checked, report.failures.len());
            if report.is_ok() {
                Ok(())
            } else {
                Err(CrdError::Fixtures(report.failures.len()))
            }
        }

        Commands::Compat { previous, candidate } => {
            let previous = Snapshot::compile(&fs::read_to_string(previous)?)?;
            let candidate = Snapshot::compile(&fs::read_to_string(candidate)?)?;
            let breakages = check_compatibility(&previous, &candidate)?;
            for breakage in &breakages {
                println!("{}", breakage);
            }
            if breakages.is_empty() {
                println!("No breaking changes");
                Ok(())
            } else {
                Err(CrdError::Incompatible(breakages.len()))
            }
        }
    }
}
