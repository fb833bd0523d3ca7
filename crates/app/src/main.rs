use std::path::PathBuf;
use std::sync::atomic::Ordering;
use std::sync::Arc;
use std::time::Duration;

use clap::Parser;
use percept_app::loopback::EchoConnector;
use percept_app::session::{SessionController, SessionOptions};
use percept_app::{ui, Settings};
use percept_link::{LiveConnector, SessionConfig};
use percept_media::{
    CpalMediaDevices, CpalOutputDevice, MediaDevices, OutputDevice, SimMediaDevices,
    TestPatternFactory, VirtualOutput,
};
use tracing_appender::rolling::{RollingFileAppender, Rotation};
use tracing_subscriber::fmt::writer::MakeWriterExt;
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

#[derive(Parser)]
#[command(author, version, about = "Interactive perception pipeline")]
struct Cli {
    /// Capture device name (default: host default device)
    #[arg(short = 'D', long)]
    device: Option<String>,
    /// Use simulated devices and the local echo backend
    #[arg(long)]
    simulate: bool,
    /// Run without the terminal dashboard
    #[arg(long)]
    headless: bool,
    /// Log level filter (overrides RUST_LOG)
    #[arg(
        long = "log-level",
        default_value = "info,percept_media=debug,percept_link=debug"
    )]
    log_level: String,
    /// Path to a settings file (default: config/default.toml if present)
    #[arg(long)]
    config: Option<PathBuf>,
}

fn init_logging(cli_level: &str, headless: bool) -> Result<(), Box<dyn std::error::Error>> {
    std::fs::create_dir_all("logs")?;
    let file_appender = RollingFileAppender::new(Rotation::DAILY, "logs", "percept.log");
    let (non_blocking_file, _guard) = tracing_appender::non_blocking(file_appender);
    let effective_level = if !cli_level.is_empty() {
        cli_level.to_string()
    } else {
        std::env::var("RUST_LOG").unwrap_or_else(|_| "info".to_string())
    };
    let env_filter = EnvFilter::try_new(effective_level).unwrap_or_else(|_| EnvFilter::new("info"));

    if headless {
        tracing_subscriber::fmt()
            .with_writer(std::io::stdout.and(non_blocking_file))
            .with_env_filter(env_filter)
            .init();
    } else {
        // File-only in dashboard mode so log lines never corrupt the display.
        let file_layer = fmt::layer()
            .with_writer(non_blocking_file)
            .with_ansi(false)
            .with_target(true)
            .with_file(true)
            .with_line_number(true)
            .with_level(true);
        tracing_subscriber::registry()
            .with(env_filter)
            .with(file_layer)
            .init();
    }
    std::mem::forget(_guard);
    Ok(())
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let cli = Cli::parse();
    init_logging(&cli.log_level, cli.headless)?;

    let settings = match &cli.config {
        Some(path) => Settings::from_path(path)?,
        None => Settings::load()?,
    };

    let opts = SessionOptions {
        // The echo backend answers locally; simulated runs need no real key.
        api_key: if cli.simulate {
            Some("local-echo".to_string())
        } else {
            settings.api_key.clone()
        },
        device: cli.device.clone().or_else(|| settings.device.clone()),
        session: SessionConfig {
            model: settings.model.clone(),
            ..SessionConfig::default()
        },
        connect_timeout: Duration::from_millis(settings.connect_timeout_ms),
        video_poll_period: Duration::from_millis(settings.video_poll_interval_ms),
        stats_period: Duration::from_secs(1),
    };

    let connector: Arc<dyn LiveConnector> = Arc::new(EchoConnector::default());
    let (devices, output): (Arc<dyn MediaDevices>, Arc<dyn OutputDevice>) = if cli.simulate {
        (
            Arc::new(SimMediaDevices::tone()),
            Arc::new(VirtualOutput::realtime()),
        )
    } else {
        (
            Arc::new(CpalMediaDevices::new(Box::new(TestPatternFactory))),
            Arc::new(CpalOutputDevice),
        )
    };

    let controller = SessionController::new(connector, devices, output, opts);

    if cli.headless {
        run_headless(controller).await?;
    } else {
        ui::run(controller).await?;
    }
    Ok(())
}

async fn run_headless(
    controller: Arc<SessionController>,
) -> Result<(), Box<dyn std::error::Error>> {
    tracing::info!("Starting perception pipeline");
    let shutdown = percept_foundation::ShutdownHandler::new().install().await;

    controller.connect().await?;

    let mut stats_interval = tokio::time::interval(Duration::from_secs(30));
    loop {
        tokio::select! {
            _ = shutdown.wait() => {
                tracing::info!("Shutdown signal received");
                break;
            }
            _ = stats_interval.tick() => {
                let m = controller.metrics();
                tracing::info!(
                    audio_sent = m.audio_frames_sent.load(Ordering::Relaxed),
                    video_sent = m.video_frames_sent.load(Ordering::Relaxed),
                    speaking = m.speaking(),
                    "Pipeline running"
                );
            }
        }
    }

    tracing::info!("Beginning graceful shutdown");
    controller.disconnect().await;
    tracing::info!("Shutdown complete");
    Ok(())
}
