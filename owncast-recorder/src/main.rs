use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{Context, bail};
use clap::Parser;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info};

use owncast_recorder::cli::Args;
use owncast_recorder::config::RecorderConfig;
use owncast_recorder::logging::init_logging;
use owncast_recorder::monitor::LiveMonitor;
use owncast_recorder::owncast::{OwncastClient, RetryPolicy};
use owncast_recorder::pipeline::{MergeQueue, MergeSettings};
use owncast_recorder::process::{OutputSink, TracingSink};
use owncast_recorder::recorder::Recorder;
use owncast_recorder::utils::{fs, is_docker};

/// Output directory used inside the container image.
const DOCKER_OUTPUT_DIR: &str = "/data";

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenvy::dotenv().ok();
    let args = Args::parse();

    let _log_guard = init_logging(args.effective_verbosity(), args.log_dir.as_deref())
        .context("failed to initialize logging")?;

    if let Err(e) = run(args).await {
        error!("{:#}", e);
        std::process::exit(1);
    }
    Ok(())
}

async fn run(args: Args) -> anyhow::Result<()> {
    let docker = is_docker();
    let default_output = if docker {
        PathBuf::from(DOCKER_OUTPUT_DIR)
    } else {
        std::env::current_dir().context("failed to resolve the current directory")?
    };
    let config = args.into_config(default_output)?;
    debug!(docker, ?config, "Loaded configuration");

    probe_ffmpeg(&config).await?;
    fs::ensure_writable_dir(&config.output_dir)?;

    let client = OwncastClient::new(
        config.server_base(),
        RetryPolicy::from_retries(config.retries),
    )?;
    if !client.ping().await? {
        bail!("Could not reach the Owncast server at \"{}\"", client.base_url());
    }
    let (_, status) = client.status().await?;
    if status.server_version.is_empty() {
        info!("Connected to {}", client.base_url());
    } else {
        info!("Connected to {} (Owncast {})", client.base_url(), status.server_version);
    }

    let sink: Arc<dyn OutputSink> = Arc::new(TracingSink);
    let recorder = Recorder::new(
        client.stream_url(),
        &config.output_dir,
        config.segment_secs,
        config.ffmpeg.clone(),
        sink.clone(),
    );
    let queue = Arc::new(MergeQueue::new(
        MergeSettings::new(&config.output_dir, config.ffmpeg.clone(), config.delete_segments),
        sink,
    ));
    queue.process_existing().await?;

    let shutdown = CancellationToken::new();
    tokio::spawn({
        let shutdown = shutdown.clone();
        async move {
            shutdown_signal().await;
            info!("Stopping, this may take a moment");
            shutdown.cancel();
        }
    });

    LiveMonitor::new(client, recorder, queue, config.name_format, config.poll_interval)
        .run(shutdown)
        .await;
    info!("Stopped");
    Ok(())
}

/// Fail early when the configured ffmpeg cannot be executed.
async fn probe_ffmpeg(config: &RecorderConfig) -> anyhow::Result<()> {
    let binary = &config.ffmpeg.binary_path;
    let output = process_utils::tokio_command(binary)
        .arg("-version")
        .output()
        .await
        .with_context(|| format!("ffmpeg not found at \"{}\"", binary.display()))?;
    if !output.status.success() {
        bail!("\"{} -version\" exited with {}", binary.display(), output.status);
    }

    let stdout = String::from_utf8_lossy(&output.stdout);
    if let Some(version) = stdout.lines().next() {
        debug!("{}", version);
    }
    Ok(())
}

/// Wait for Ctrl+C or SIGTERM.
async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            error!("Failed to install Ctrl+C handler: {}", e);
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut signal) => {
                signal.recv().await;
            }
            Err(e) => {
                error!("Failed to install SIGTERM handler: {}", e);
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        () = ctrl_c => info!("Received Ctrl+C"),
        () = terminate => info!("Received SIGTERM"),
    }
}
