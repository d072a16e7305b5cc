mod commands;

use std::path::PathBuf;

use clap::{Parser, Subcommand};

use commands::PipelineArgs;

#[derive(Parser)]
#[command(name = "ferry", about = "Build and push function images from templates")]
#[command(version)]
struct Cli {
    /// Project directory containing ferry.toml
    #[arg(long, short = 'd', global = true, default_value = ".")]
    working_dir: PathBuf,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Fetch the templates used by the selected functions
    Fetch {
        /// Functions to process (default: all)
        functions: Vec<String>,
        /// How many templates to fetch together
        #[arg(long)]
        pool_size: Option<usize>,
    },
    /// Fetch templates and build function images
    Build {
        #[command(flatten)]
        args: PipelineArgs,
        /// Push images to the registry after building
        #[arg(long)]
        push: bool,
    },
    /// Build function images and push them to the registry
    Push {
        #[command(flatten)]
        args: PipelineArgs,
    },
    /// Check the container engine and local setup
    Doctor,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_writer(std::io::stderr)
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .init();

    let cli = Cli::parse();
    let project_dir = cli.working_dir;

    match cli.command {
        Commands::Fetch {
            functions,
            pool_size,
        } => commands::fetch(&project_dir, &functions, pool_size).await?,
        Commands::Build { args, push } => commands::build(&project_dir, &args, push).await?,
        Commands::Push { args } => commands::build(&project_dir, &args, true).await?,
        Commands::Doctor => commands::doctor(&project_dir).await?,
    }

    Ok(())
}
