use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use chrono::{DateTime, Local};
use clap::Parser;
use indicatif::{HumanBytes, ProgressBar, ProgressStyle};

use sgdl::cli::ExistingMode;
use sgdl::daemon;
use sgdl::error::DownloadError;
use sgdl::utils::{get_filename_from_url, get_unique_filepath, sanitize_filename};
use sgdl::{ControlSignal, Downloader, ProgressAggregator};

#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Args {
    /// URL of the file to download
    #[arg(index = 1, required_unless_present_any = ["stop", "pause", "resume"])]
    url: Option<String>,

    /// Directory to save the downloaded file
    #[arg(short = 'd', long = "download-dir", default_value = "downloads")]
    download_dir: PathBuf,

    /// Output filename (defaults to the name taken from the URL)
    #[arg(short = 'o', long)]
    output: Option<String>,

    /// Number of segments downloaded concurrently (defaults to number of logical CPUs)
    #[arg(short = 's', long)]
    split: Option<usize>,

    /// Rate limit in bytes per second (e.g., 1048576 for 1MB/s)
    #[arg(short = 'r', long)]
    rate_limit: Option<u32>,

    /// What to do when the destination file already exists
    #[arg(long = "on-existing", value_enum, default_value = "skip")]
    on_existing: ExistingMode,

    /// Print progress as JSON lines instead of a progress bar
    #[arg(long)]
    json: bool,

    /// Run in background (daemon mode) [Unix only]
    #[arg(long)]
    daemon: bool,

    /// Stop the daemon process, cancelling its download [Unix only]
    #[arg(short = 'x', long)]
    stop: bool,

    /// Pause the daemon's download [Unix only]
    #[arg(short = 'p', long)]
    pause: bool,

    /// Resume the daemon's download [Unix only]
    #[arg(short = 'u', long)]
    resume: bool,
}

fn main() -> Result<()> {
    let mut args = Args::parse();

    // Resolve the output directory before daemonizing changes the working directory
    if args.download_dir.is_relative() {
        if let Ok(cwd) = std::env::current_dir() {
            args.download_dir = cwd.join(&args.download_dir);
        }
    }

    // Daemon control commands run without a download of their own
    if args.stop || args.pause || args.resume {
        return handle_control_commands(&args);
    }

    #[cfg(unix)]
    if args.daemon {
        daemon::start_daemon()?;
    }

    let rt = tokio::runtime::Runtime::new()?;
    rt.block_on(run(args))
}

fn handle_control_commands(args: &Args) -> Result<()> {
    #[cfg(unix)]
    {
        if args.stop {
            return daemon::stop_daemon();
        }
        if args.pause {
            return daemon::pause_daemon();
        }
        if args.resume {
            return daemon::resume_daemon();
        }
    }
    #[cfg(not(unix))]
    let _ = args;
    Ok(())
}

async fn run(args: Args) -> Result<()> {
    let Some(url) = args.url.clone() else {
        anyhow::bail!("no URL given");
    };

    if !args.download_dir.exists() {
        tokio::fs::create_dir_all(&args.download_dir)
            .await
            .context("Failed to create output directory")?;
    }

    let filename = match &args.output {
        Some(name) => name.clone(),
        None => sanitize_filename(&get_filename_from_url(&url)?),
    };
    let mut dest = args.download_dir.join(&filename);

    if dest.exists() {
        match args.on_existing {
            ExistingMode::Skip => {
                let metadata = tokio::fs::metadata(&dest).await?;
                let modified: DateTime<Local> = metadata.modified()?.into();
                println!(
                    "{} already exists ({}, {}); skipping. Use --on-existing overwrite to replace it.",
                    dest.display(),
                    HumanBytes(metadata.len()),
                    modified.format("%Y-%m-%d %H:%M")
                );
                return Ok(());
            }
            ExistingMode::Overwrite => {}
            ExistingMode::Unique => {
                dest = get_unique_filepath(&args.download_dir, &filename);
            }
        }
    }

    let control = Arc::new(ControlSignal::new());
    let progress = Arc::new(ProgressAggregator::new());

    install_signal_handlers(&control)?;

    let pb = if args.json {
        None
    } else {
        let pb = ProgressBar::new(0);
        pb.set_style(
            ProgressStyle::default_bar()
                .template("{spinner:.green} [{elapsed_precise}] [{bar:40.cyan/blue}] {bytes:>12}/{total_bytes:<12} {msg}")
                .unwrap()
                .progress_chars("=>-"),
        );
        pb.set_message(format!("Downloading {}", filename));
        Some(pb)
    };

    // Periodically re-sample the aggregator and refresh whatever view is active
    let display = {
        let progress = progress.clone();
        let control = control.clone();
        let pb = pb.clone();
        let tick = if args.json { 500 } else { 200 };
        tokio::spawn(async move {
            loop {
                let snapshot = progress.sample();
                match &pb {
                    Some(pb) => {
                        if pb.length() != Some(snapshot.total) {
                            pb.set_length(snapshot.total);
                        }
                        pb.set_position(snapshot.downloaded);
                        let paused = if control.is_paused() { " [paused]" } else { "" };
                        pb.set_message(format!(
                            "{}/s (avg {}/s){}",
                            HumanBytes(snapshot.speed as u64),
                            HumanBytes(snapshot.average_speed as u64),
                            paused
                        ));
                    }
                    None => {
                        if let Ok(line) = serde_json::to_string(&snapshot) {
                            println!("{}", line);
                        }
                    }
                }
                tokio::time::sleep(Duration::from_millis(tick)).await;
            }
        })
    };

    let downloader = Downloader::new(args.rate_limit, control.clone(), progress.clone());
    let split = args.split.unwrap_or_else(num_cpus::get).max(1);
    let engine = {
        let url = url.clone();
        let dest = dest.clone();
        tokio::spawn(async move { downloader.run(&url, &dest, split).await })
    };

    let result = engine.await?;
    display.abort();

    #[cfg(unix)]
    if args.daemon {
        daemon::cleanup_pid_file();
    }

    match result {
        Ok(path) => {
            let snapshot = progress.sample();
            if let Some(pb) = &pb {
                pb.set_position(snapshot.downloaded);
                pb.finish_with_message(format!(
                    "Completed in {:.2}s (avg {}/s)",
                    snapshot.elapsed_secs,
                    HumanBytes(snapshot.average_speed as u64)
                ));
            }
            println!("Saved to {}", path.display());
            Ok(())
        }
        Err(err) => {
            if let Some(pb) = &pb {
                let message = match &err {
                    DownloadError::Cancelled => "Cancelled".to_string(),
                    other => format!("Failed: {}", other),
                };
                pb.abandon_with_message(message);
            }
            Err(err.into())
        }
    }
}

/// SIGINT/SIGTERM cancel; SIGUSR1/SIGUSR2 pause and resume. This is the
/// whole control surface of a running download.
fn install_signal_handlers(control: &Arc<ControlSignal>) -> Result<()> {
    #[cfg(unix)]
    {
        use tokio::signal::unix::{signal, SignalKind};

        let mut usr1 = signal(SignalKind::user_defined1())?;
        let mut usr2 = signal(SignalKind::user_defined2())?;
        let mut term = signal(SignalKind::terminate())?;
        let control = control.clone();
        tokio::spawn(async move {
            loop {
                tokio::select! {
                    _ = usr1.recv() => control.request_pause(),
                    _ = usr2.recv() => control.request_resume(),
                    _ = term.recv() => {
                        control.request_cancel();
                        break;
                    }
                }
            }
        });
    }

    let control = control.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            control.request_cancel();
        }
    });
    Ok(())
}
