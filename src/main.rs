use anyhow::Result;
use clap::Parser;
use console::style;
use futures_util::future::join_all;
use indicatif::MultiProgress;
use std::path::Path;
use std::sync::Arc;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use ytgrab::cli::{Cli, Commands, DownloadArgs};
use ytgrab::config::Config;
use ytgrab::output::{self, ConsoleView, LogWriter};
use ytgrab::{utils, Orchestrator, ProgressEvent, ProgressReporter};

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let progress = output::progress_area(cli.quiet);

    // Log lines share stderr with the progress bars
    let default_filter = if cli.verbose { "ytgrab=debug" } else { "ytgrab=info" };
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| default_filter.into()),
        )
        .with(tracing_subscriber::fmt::layer().with_writer(LogWriter::new(progress.clone())))
        .init();

    let config_path = Config::config_path(cli.config.as_deref())?;
    let mut config = Config::load_from(&config_path)?;

    match cli.command {
        Commands::Download(args) => {
            let code = download(args, &mut config, &config_path, progress).await?;
            if code != 0 {
                std::process::exit(code);
            }
        }
        Commands::Config { show, set_dir } => {
            let changing = set_dir.is_some();
            if let Some(dir) = set_dir {
                if config.set_download_dir(dir) {
                    config.save_to(&config_path)?;
                }
                println!("Download folder: {}", config.download_dir.display());
            }
            if show || !changing {
                config.display();
            }
        }
        Commands::Open => {
            utils::open_folder(&config.download_dir)?;
        }
        Commands::Check => {
            let missing = utils::check_dependencies(&config).await;
            if missing.is_empty() {
                println!("{} yt-dlp and ffmpeg are available", style("✓").green());
            } else {
                for dep in &missing {
                    eprintln!("{} missing: {}", style("✗").red(), dep);
                }
                std::process::exit(1);
            }
        }
    }

    Ok(())
}

/// Run one form submission; returns the process exit code
async fn download(
    args: DownloadArgs,
    config: &mut Config,
    config_path: &Path,
    progress: MultiProgress,
) -> Result<i32> {
    let form = args.into_form(config);
    let directory = form.directory.clone();

    let requests = match form.into_requests() {
        Ok(requests) => requests,
        Err(err) => {
            tracing::debug!("Rejected form: {}", err);
            eprintln!("{} {}", style("Error:").red(), err.user_message());
            return Ok(2);
        }
    };

    // Check for required external dependencies (non-fatal)
    let missing_deps = utils::check_dependencies(config).await;
    if !missing_deps.is_empty() {
        eprintln!("⚠️  Dependency check warnings:");
        for dep in missing_deps {
            eprintln!("   • {}", dep);
        }
        eprintln!("   (Continuing anyway - tools may be available)");
    }

    let orchestrator = Orchestrator::from_config(config);
    let (tx, rx) = tokio::sync::mpsc::unbounded_channel::<ProgressEvent>();
    let view = tokio::spawn(ConsoleView::new(progress).run(rx));

    let reporter: Arc<dyn ProgressReporter> = Arc::new(tx);
    let mut handles = Vec::new();
    let mut rejected = 0;
    for request in requests {
        match orchestrator.submit(request, reporter.clone()) {
            Ok(handle) => handles.push(handle),
            Err(err) => {
                rejected += 1;
                eprintln!("{} {}", style("Error:").red(), err.user_message());
            }
        }
    }
    // the view stops once every tracker has dropped its sender
    drop(reporter);

    let outcomes = join_all(handles.into_iter().map(|handle| handle.wait())).await;
    let view = view.await?;

    output::print_report(&outcomes, view.status_line());

    config.set_download_dir(directory);
    config.save_to(config_path)?;

    let failed = outcomes.iter().filter(|outcome| !outcome.is_success()).count() + rejected;
    Ok(if failed == 0 { 0 } else { 1 })
}
