use std::path::Path;
use std::sync::Arc;

use clap::Args;
use tokio_util::sync::CancellationToken;

use ferry_build::{GetterFetcher, TemplateSources};
use ferry_core::{FerryConfig, ProgressLog, merge_args, parse_build_args};
use ferry_engine::DockerEngine;
use ferry_pipeline::{Scheduler, SchedulerOptions};

pub(crate) type DockerScheduler = Scheduler<DockerEngine, GetterFetcher>;

/// Flags shared by `build` and `push`. Each one overrides ferry.toml.
#[derive(Args, Debug, Default)]
pub struct PipelineArgs {
    /// Functions to process (default: all)
    pub functions: Vec<String>,
    /// How many functions to process together
    #[arg(long)]
    pub pool_size: Option<usize>,
    /// Registry host (and namespace) for the images
    #[arg(long)]
    pub registry: Option<String>,
    /// Prefix for every image name
    #[arg(long)]
    pub prefix: Option<String>,
    /// Tag for the images
    #[arg(long, short = 't')]
    pub tag: Option<String>,
    /// Network mode for build containers
    #[arg(long)]
    pub network: Option<String>,
    /// Build argument applied to every function (repeatable)
    #[arg(long = "build-arg", value_name = "KEY=VALUE")]
    pub build_args: Vec<String>,
    /// Registry username
    #[arg(long)]
    pub username: Option<String>,
    /// Registry password
    #[arg(long)]
    pub password: Option<String>,
}

impl PipelineArgs {
    pub fn apply(&self, options: &mut SchedulerOptions) {
        if let Some(size) = self.pool_size {
            options.pool_size = size;
        }
        if let Some(registry) = &self.registry {
            options.registry = registry.clone();
        }
        if let Some(prefix) = &self.prefix {
            options.prefix = prefix.clone();
        }
        if let Some(tag) = &self.tag {
            options.tag = tag.clone();
        }
        if let Some(network) = &self.network {
            options.network = network.clone();
        }
        if self.username.is_some() {
            options.username = self.username.clone();
        }
        if self.password.is_some() {
            options.password = self.password.clone();
        }
    }
}

/// Prints progress lines to stdout as they arrive.
pub struct ConsoleLog;

impl ProgressLog for ConsoleLog {
    fn print(&self, line: &str) {
        if line.ends_with('\n') {
            print!("{line}");
        } else {
            println!("{line}");
        }
    }
}

/// Loads ferry.toml and registers the selected functions.
///
/// Returns `None` (after saying so) when the selection is empty. Global
/// build args sit under each function's own args.
pub fn prepare(
    project_dir: &Path,
    functions: &[String],
    build_args: &[String],
    overrides: impl FnOnce(&mut SchedulerOptions),
) -> anyhow::Result<Option<DockerScheduler>> {
    let config = FerryConfig::load(project_dir)?;
    let selected = config.select_functions(functions)?;
    if selected.is_empty() {
        eprintln!("No functions found");
        return Ok(None);
    }

    let global_args = parse_build_args(build_args, "build-args")?;

    let mut options = SchedulerOptions::from_config(&config, project_dir);
    overrides(&mut options);
    let templates = TemplateSources::from_config(&config.templates, project_dir);
    let engine = Arc::new(DockerEngine::connect()?);

    let mut scheduler = Scheduler::new(
        options,
        templates,
        engine,
        Arc::new(GetterFetcher),
        Arc::new(ConsoleLog),
    );
    for (name, function) in selected {
        let args = merge_args(&global_args, &function.build_args());
        scheduler.add_service(name, function.template.as_deref(), args)?;
    }
    Ok(Some(scheduler))
}

/// Token cancelled on Ctrl-C. Running jobs finish their current call;
/// nothing new starts.
pub fn interrupt_token() -> CancellationToken {
    let token = CancellationToken::new();
    let on_signal = token.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            tracing::warn!("interrupted, waiting for running jobs to stop");
            on_signal.cancel();
        }
    });
    token
}
