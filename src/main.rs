use std::path::PathBuf;

use clap::{ArgAction, Parser, Subcommand};
use revbundle::error::BundleError;
use revbundle::output::Format;
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(
    name = "revbundle",
    version,
    about = "Detect, inspect and upgrade review project bundles"
)]
struct Cli {
    /// Output format
    #[arg(long, global = true, value_enum, default_value = "json")]
    format: Format,
    /// Shorthand for --format pretty
    #[arg(long, global = true, hide = true)]
    pretty: bool,
    /// Increase log verbosity (-v info, -vv debug); REVBUNDLE_LOG overrides
    #[arg(short, long, global = true, action = ArgAction::Count)]
    verbose: u8,
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Print the project file version of a bundle
    Detect {
        /// Project bundle directory
        bundle: PathBuf,
    },
    /// Upgrade a bundle to a newer project file version
    Migrate {
        /// Project bundle directory
        bundle: PathBuf,
        /// Source version (default: detected from project.json)
        #[arg(long)]
        from: Option<u32>,
        /// Destination version (default: newest supported)
        #[arg(long)]
        to: Option<u32>,
    },
    /// Report layout and health of a bundle without changing it
    Inspect {
        /// Project bundle directory
        bundle: PathBuf,
    },
}

fn init_logging(verbose: u8) {
    let default = match verbose {
        0 => "warn",
        1 => "info",
        _ => "debug",
    };
    let filter =
        EnvFilter::try_from_env("REVBUNDLE_LOG").unwrap_or_else(|_| EnvFilter::new(default));
    let _ = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .with_target(false)
        .try_init();
}

fn run(cli: Cli, format: Format) -> Result<(), BundleError> {
    match cli.command {
        Commands::Detect { bundle } => revbundle::commands::detect::run(&bundle, format),
        Commands::Migrate { bundle, from, to } => {
            revbundle::commands::migrate::run(&bundle, from, to, format)
        }
        Commands::Inspect { bundle } => revbundle::commands::inspect::run(&bundle, format),
    }
}

fn main() {
    let cli = Cli::parse();
    init_logging(cli.verbose);
    let format = if cli.pretty {
        Format::Pretty
    } else {
        cli.format
    };
    if let Err(e) = run(cli, format) {
        match format {
            Format::Json => {
                eprintln!(
                    "{}",
                    serde_json::json!({
                        "error": e.code(),
                        "message": e.to_string(),
                        "bundle_unmodified": e.bundle_unmodified(),
                    })
                );
            }
            _ => eprintln!("error: {e}"),
        }
        std::process::exit(1);
    }
}
