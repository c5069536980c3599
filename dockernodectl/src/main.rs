use std::path::PathBuf;

use anyhow::Result;
use clap::{Parser, Subcommand};
use config_loader::{load_step, ConfigError, ControllerSettings};
use node_step::descriptor::StepDescriptor;
use tracing_subscriber::{fmt, EnvFilter};

mod commands;

#[derive(Parser)]
#[command(name = "dockernodectl", version)]
struct Cli {
    #[command(subcommand)]
    cmd: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Run a command inside a one-shot container node
    Run(commands::run::RunArgs),
    /// Print the connectors a step may use, as JSON
    Connectors,
    /// Validate a step definition file
    Validate {
        /// Path to a YAML or JSON step definition
        #[arg(value_name = "FILE")]
        file: PathBuf,
    },
    /// Resume a crashed run and release its node
    Recover(commands::recover::RecoverArgs),
    /// Print version and exit
    Version,
}

fn init_tracing() {
    let _ = fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .with_target(false)
        .with_writer(std::io::stderr)
        .try_init();
}

#[tokio::main]
async fn main() -> Result<()> {
    init_tracing();
    let cli = Cli::parse();

    match cli.cmd {
        Commands::Run(args) => {
            let code = commands::run::run(args).await?;
            std::process::exit(code);
        }
        Commands::Connectors => {
            let settings = ControllerSettings::from_env()?;
            let descriptors = StepDescriptor.acceptable_connector_descriptors(&settings.registry());
            println!("{}", serde_json::to_string_pretty(&descriptors)?);
        }
        Commands::Validate { file } => {
            if let Err(message) = validate(&file) {
                eprintln!("✗ Invalid step definition '{}'", file.display());
                eprintln!("{message}");
                std::process::exit(1);
            }
        }
        Commands::Recover(args) => {
            commands::recover::run(args).await?;
        }
        Commands::Version => {
            println!("{}", env!("CARGO_PKG_VERSION"));
        }
    }
    Ok(())
}

fn validate(file: &std::path::Path) -> std::result::Result<(), String> {
    let step = match load_step(file) {
        Ok(step) => step,
        Err(ConfigError::ValidationFailed { errors }) => {
            let details: Vec<String> = errors
                .iter()
                .map(|e| format!("  - {}: {}", display_pointer(&e.json_pointer), e.message))
                .collect();
            return Err(details.join("\n"));
        }
        Err(err) => return Err(format!("  - {err}")),
    };

    let settings = ControllerSettings::from_env().map_err(|e| format!("  - {e}"))?;
    settings
        .registry()
        .resolve_ref(&step)
        .map_err(|e| format!("  - connector: {e}"))?;

    println!("✓ Valid step definition: image {}", step.image());
    Ok(())
}

fn display_pointer(pointer: &str) -> &str {
    if pointer.is_empty() {
        "(root)"
    } else {
        pointer
    }
}
