use std::io::Write;
use std::process::ExitCode;
use std::sync::Arc;

use anyhow::{Context, bail};
use tracing::{debug, info};

use xml_stats::cli::{Cli, Command};
use xml_stats::combinations::CombinationQuery;
use xml_stats::config::{Config, ConfigManager};
use xml_stats::dispatcher::{BatchDispatcher, BatchProgress, ProgressCallback};
use xml_stats::file_source::FileSource;
use xml_stats::logging::init_tracing;
use xml_stats::output::Output;
use xml_stats::worker::{self, ProcessSpawner, TaskSpawner, WorkerSpawner};

#[tokio::main]
async fn main() -> ExitCode {
    let cli = Cli::parse_args();
    init_tracing(cli.verbosity());

    let result = if cli.worker {
        worker::serve_stdio().await.context("Worker failed")
    } else {
        run(cli).await
    };

    match result {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            eprintln!("Error: {:#}", e);
            ExitCode::FAILURE
        }
    }
}

async fn run(cli: Cli) -> anyhow::Result<()> {
    if let Err(e) = cli.validate() {
        bail!(e);
    }

    let config = ConfigManager::load_config(&cli)
        .await
        .context("Failed to load configuration")?;
    debug!(?config, "Effective configuration");

    let files = collect_files(&config)?;
    info!("Found {} files to analyze", files.len());

    let spawner: Arc<dyn WorkerSpawner> = if config.batch.in_process {
        Arc::new(TaskSpawner::new())
    } else {
        let spawner = ProcessSpawner::current_exe(config.verbosity())
            .context("Cannot locate worker executable")?;
        Arc::new(spawner)
    };

    let progress: ProgressCallback = Arc::new(|progress: BatchProgress| {
        debug!(
            "Dispatching batch {}/{} ({} files)",
            progress.batch_index, progress.total_batches, progress.batch_len
        );
    });
    let dispatcher =
        BatchDispatcher::new(spawner, config.dispatch_config())?.with_progress(progress);

    let output = Output::new(config.verbosity(), config.report_options());
    let report = match cli.command {
        Some(Command::Combinations(args)) => {
            let query = CombinationQuery::new(args.elements, args.attributes);
            let statistics = dispatcher.collect_combinations(files, query).await?;
            output.render_combinations(&statistics)?
        }
        None => {
            let statistics = dispatcher.collect(files).await?;
            output.render(&statistics)?
        }
    };

    let mut stdout = std::io::stdout().lock();
    stdout.write_all(report.as_bytes())?;
    stdout.flush()?;

    Ok(())
}

fn collect_files(config: &Config) -> anyhow::Result<Vec<std::path::PathBuf>> {
    let source = FileSource::new()
        .with_files(config.files.files.clone())
        .with_patterns(config.files.globs.clone())?
        .with_exclude_patterns(config.files.exclude_patterns.clone())?;

    Ok(source.collect()?)
}
