use clap::{ArgAction, Parser};
use notify::event::ModifyKind;
use notify::{Event, EventKind, RecommendedWatcher, RecursiveMode, Result as NotifyResult, Watcher};
use signal_hook::consts::{SIGINT, SIGTERM};
use signal_hook::iterator::Signals;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::thread;
use std::time::Duration;
use tokio::sync::{broadcast, mpsc, oneshot, RwLock};
use tracing::{debug, error, info, warn};
use tracing_subscriber::EnvFilter;

use gallery_wall::config::{ConfigUpdate, DisplayConfig};
use gallery_wall::gallery::{Gallery, GalleryCommand};
use gallery_wall::headless::HeadlessGrid;
use gallery_wall::http_server::{run_http_server, ApiState};
use gallery_wall::library::{self, ScanOptions};
use gallery_wall::media::FitMode;

type BoxError = Box<dyn std::error::Error + Send + Sync>;

const RESCAN_DEBOUNCE: Duration = Duration::from_millis(750);

#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Args {
    /// Directory containing images to display
    #[arg(short, long, default_value = ".")]
    image_dir: PathBuf,

    /// Configuration file, written with defaults if missing
    #[arg(short, long, default_value = "config.json")]
    config: PathBuf,

    /// Scan subdirectories of the image directory
    #[arg(long, default_value_t = true, action = ArgAction::Set)]
    recursive: bool,

    /// Include .mp4, .webm and .mov files
    #[arg(long)]
    include_videos: bool,

    /// Grid rows (overrides the config file)
    #[arg(long)]
    rows: Option<usize>,

    /// Grid columns (overrides the config file)
    #[arg(long)]
    columns: Option<usize>,

    /// Seconds between rotations of a cell (overrides the config file)
    #[arg(long)]
    interval: Option<u64>,

    /// fill, fit or stretch (overrides the config file)
    #[arg(long)]
    fit: Option<FitMode>,

    /// HTTP server port for local control
    #[arg(long, default_value_t = 8080)]
    http_port: u16,

    /// Rescan when files in the image directory change
    #[arg(long)]
    watch: bool,
}

impl Args {
    fn overrides(&self) -> ConfigUpdate {
        ConfigUpdate {
            grid_rows: self.rows,
            grid_columns: self.columns,
            rotation_interval: self.interval,
            image_fit_mode: self.fit,
            ..ConfigUpdate::default()
        }
    }

    fn scan_options(&self, config: &DisplayConfig) -> ScanOptions {
        ScanOptions {
            recursive: self.recursive,
            include_videos: self.include_videos || config.enable_videos,
        }
    }
}

fn setup_filesystem_watcher(
    tx: mpsc::Sender<()>,
    watch_dir: &Path,
    recursive: bool,
) -> NotifyResult<RecommendedWatcher> {
    let mut watcher = notify::recommended_watcher(move |res: NotifyResult<Event>| match res {
        Ok(event) => {
            let relevant = matches!(
                event.kind,
                EventKind::Create(_) | EventKind::Remove(_) | EventKind::Modify(ModifyKind::Name(_))
            ) && event.paths.iter().any(|p| library::media_kind(p, true).is_some());
            if relevant {
                debug!(paths = ?event.paths, "media folder changed");
                // Full means a rescan is already queued.
                let _ = tx.try_send(());
            }
        }
        Err(e) => warn!("filesystem watch error: {:?}", e),
    })?;

    let mode = if recursive {
        RecursiveMode::Recursive
    } else {
        RecursiveMode::NonRecursive
    };
    watcher.watch(watch_dir, mode)?;
    Ok(watcher)
}

fn setup_signal_handler(tx: oneshot::Sender<()>) -> std::io::Result<thread::JoinHandle<()>> {
    let mut signals = Signals::new([SIGINT, SIGTERM])?;
    Ok(thread::spawn(move || {
        if let Some(sig) = signals.forever().next() {
            info!(signal = sig, "received signal, shutting down");
            let _ = tx.send(());
        }
    }))
}

/// Rescans the image directory on request and hands the result to the
/// command handler. Requests that arrive while one is settling are merged.
async fn run_rescanner(
    image_dir: PathBuf,
    base: ScanOptions,
    config: Arc<RwLock<DisplayConfig>>,
    mut requests: mpsc::Receiver<()>,
    commands: broadcast::Sender<GalleryCommand>,
) {
    while requests.recv().await.is_some() {
        tokio::time::sleep(RESCAN_DEBOUNCE).await;
        while requests.try_recv().is_ok() {}

        let options = ScanOptions {
            include_videos: base.include_videos || config.read().await.enable_videos,
            ..base.clone()
        };
        let dir = image_dir.clone();
        match tokio::task::spawn_blocking(move || library::scan_folder(&dir, &options)).await {
            Ok(Ok(items)) => {
                info!(count = items.len(), "rescan complete");
                if commands.send(GalleryCommand::LoadMedia { items }).is_err() {
                    break;
                }
            }
            Ok(Err(e)) => error!("rescan of {} failed: {}", image_dir.display(), e),
            Err(e) => error!("rescan task failed: {}", e),
        }
    }
}

#[tokio::main]
async fn main() -> Result<(), BoxError> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    let args = Args::parse();

    let mut config = DisplayConfig::load_or_create(&args.config)?;
    config.apply(args.overrides())?;
    let scan = args.scan_options(&config);

    info!("Gallery wall {}", env!("CARGO_PKG_VERSION"));
    info!("Image directory: {}", args.image_dir.display());
    info!("Config file: {}", args.config.display());
    info!(
        "Grid: {}x{}, rotation every {}s, fit {}",
        config.grid_rows, config.grid_columns, config.rotation_interval, config.image_fit_mode
    );

    let grid = Arc::new(HeadlessGrid::new(config.grid_rows, config.grid_columns));
    let gallery = Gallery::new(grid, config.gallery_options());

    let media = library::scan_folder(&args.image_dir, &scan)?;
    if gallery.set_images(media).await > 0 {
        gallery.start().await?;
    } else {
        warn!("no media found in {}, waiting for a rescan", args.image_dir.display());
    }

    // Create communication channels
    let (command_sender, command_receiver) = broadcast::channel::<GalleryCommand>(100);
    let (rescan_sender, rescan_receiver) = mpsc::channel::<()>(1);
    let config = Arc::new(RwLock::new(config));

    let handler = gallery.clone();
    tokio::spawn(async move { handler.run_command_handler(command_receiver).await });

    tokio::spawn(run_rescanner(
        args.image_dir.clone(),
        scan,
        config.clone(),
        rescan_receiver,
        command_sender.clone(),
    ));

    let _watcher = if args.watch {
        let watcher = setup_filesystem_watcher(rescan_sender.clone(), &args.image_dir, args.recursive)?;
        info!("watching {} for changes", args.image_dir.display());
        Some(watcher)
    } else {
        None
    };

    let state = ApiState {
        gallery: gallery.clone(),
        config,
        config_path: args.config.clone(),
        commands: command_sender,
        rescan: rescan_sender,
    };
    tokio::spawn(run_http_server(args.http_port, state));

    let (shutdown_tx, shutdown_rx) = oneshot::channel();
    setup_signal_handler(shutdown_tx)?;
    let _ = shutdown_rx.await;

    gallery.stop().await;
    info!("Gallery wall stopped");
    Ok(())
}
