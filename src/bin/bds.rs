use std::process::ExitCode;

use camino::Utf8PathBuf;
use clap::{Args, Parser, Subcommand};
use miette::IntoDiagnostic;
use tracing_subscriber::EnvFilter;

use bds_hcs::app::App;
use bds_hcs::config::ConfigLoader;
use bds_hcs::error::{BdsError, ErrorKind};
use bds_hcs::format::FormatRegistry;
use bds_hcs::output::{JsonOutput, LogProgress};

#[derive(Parser)]
#[command(name = "bds")]
#[command(about = "Create, inspect and verify BDS containers of HCS image data")]
#[command(version, author)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    #[command(about = "Create a container from a bds.json description")]
    Create(CreateArgs),
    #[command(about = "Describe a closed container")]
    Info(RootArgs),
    #[command(about = "Verify the checksums of the original data")]
    Verify(RootArgs),
    #[command(about = "Resolve a channel/plate/well coordinate to its standard node")]
    Locate(LocateArgs),
}

#[derive(Args)]
struct CreateArgs {
    root: Utf8PathBuf,

    #[arg(long)]
    config: Option<String>,

    /// File or directory copied into data/original.
    #[arg(long)]
    originals: Option<Utf8PathBuf>,
}

#[derive(Args)]
struct RootArgs {
    root: Utf8PathBuf,
}

#[derive(Args)]
struct LocateArgs {
    root: Utf8PathBuf,

    #[arg(long)]
    channel: u32,

    /// Plate coordinate such as B3.
    #[arg(long)]
    plate: String,

    /// Linear tile position inside the well.
    #[arg(long)]
    well: u32,
}

fn main() -> ExitCode {
    if let Err(report) = run() {
        eprintln!("{report:?}");
        if let Some(error) = report.downcast_ref::<BdsError>() {
            return ExitCode::from(map_exit_code(error));
        }
        return ExitCode::from(1);
    }
    ExitCode::SUCCESS
}

fn map_exit_code(error: &BdsError) -> u8 {
    match error {
        BdsError::MissingConfig | BdsError::ConfigRead(_) | BdsError::ConfigParse(_) => 1,
        _ => match error.kind() {
            ErrorKind::Structural => 2,
            ErrorKind::ContractViolation => 3,
            ErrorKind::Storage => 4,
            ErrorKind::NotFound => 5,
        },
    }
}

fn run() -> miette::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .with_target(false)
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();
    let app = App::new(FormatRegistry::with_defaults());

    match cli.command {
        Commands::Create(args) => {
            let config = ConfigLoader::resolve(args.config.as_deref(), app.registry())?;
            let result =
                app.create_container(&args.root, &config, args.originals.as_deref(), &LogProgress)?;
            JsonOutput::print_create(&result).into_diagnostic()?;
            Ok(())
        }
        Commands::Info(args) => {
            let result = app.info(&args.root, &LogProgress)?;
            JsonOutput::print_info(&result).into_diagnostic()?;
            Ok(())
        }
        Commands::Verify(args) => {
            let result = app.verify(&args.root, &LogProgress)?;
            JsonOutput::print_verify(&result).into_diagnostic()?;
            if result.ok {
                Ok(())
            } else {
                Err(miette::Report::msg(format!(
                    "checksum verification failed for {}",
                    result.root
                )))
            }
        }
        Commands::Locate(args) => {
            let result = app.locate(&args.root, args.channel, &args.plate, args.well)?;
            JsonOutput::print_locate(&result).into_diagnostic()?;
            Ok(())
        }
    }
}
