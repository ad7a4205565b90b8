use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use std::path::PathBuf;
use warden_core::{Gallery, SqliteAuditLog};
use warden_hw::Camera;

// `#[zbus::proxy]` generates both `WardenProxy` (async) and `WardenProxyBlocking`.
#[zbus::proxy(
    interface = "org.freedesktop.Warden1",
    default_service = "org.freedesktop.Warden1",
    default_path = "/org/freedesktop/Warden1"
)]
trait Warden {
    async fn status(&self) -> zbus::Result<String>;
    async fn stop(&self) -> zbus::Result<bool>;
}

#[derive(Parser)]
#[command(name = "warden", about = "Warden access-control CLI")]
struct Cli {
    /// Talk to the daemon on the system bus instead of the session bus
    #[arg(long, global = true)]
    system: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Show daemon status
    Status,
    /// Ask the daemon to stop its pipeline
    Stop,
    /// Validate a gallery file and list its identities
    Gallery {
        /// Path to the gallery JSON
        path: PathBuf,
    },
    /// Show recent audit log entries
    Logs {
        /// Number of rows to show
        #[arg(short, long, default_value_t = 20)]
        limit: usize,
        /// Audit database (default: $WARDEN_DB_PATH or ~/.local/share/warden/access.db)
        #[arg(long)]
        db: Option<PathBuf>,
    },
    /// Show attempt counts from the audit log
    Stats {
        #[arg(long)]
        db: Option<PathBuf>,
    },
    /// Run camera diagnostics
    Test {
        /// Camera device
        #[arg(short, long, default_value = "/dev/video0")]
        device: String,
        /// Save the captured frame as PNG
        #[arg(short, long)]
        output: Option<PathBuf>,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .init();

    let cli = Cli::parse();

    match cli.command {
        Commands::Status => {
            let proxy = connect(cli.system).await?;
            let raw = proxy.status().await.context("Status() call failed")?;
            let value: serde_json::Value =
                serde_json::from_str(&raw).context("daemon returned invalid status JSON")?;
            println!("{}", serde_json::to_string_pretty(&value)?);
        }
        Commands::Stop => {
            let proxy = connect(cli.system).await?;
            if proxy.stop().await.context("Stop() call failed")? {
                println!("stop requested");
            } else {
                println!("stop already pending");
            }
        }
        Commands::Gallery { path } => {
            let gallery = Gallery::load(&path)
                .with_context(|| format!("failed to load {}", path.display()))?;
            println!(
                "{}: {} encodings, dimension {}",
                path.display(),
                gallery.len(),
                gallery
                    .dimension()
                    .map_or_else(|| "-".to_string(), |d| d.to_string())
            );
            for name in gallery.identities() {
                println!("  {name}");
            }
        }
        Commands::Logs { limit, db } => {
            let log = open_audit(db)?;
            let entries = log.recent(limit)?;
            if entries.is_empty() {
                println!("no access attempts recorded");
            }
            for e in entries {
                println!(
                    "{}  {:<8} {:<24} {:.2}",
                    e.access_time, e.access_status, e.person_name, e.confidence
                );
            }
        }
        Commands::Stats { db } => {
            let summary = open_audit(db)?.summary()?;
            println!("total:   {}", summary.total);
            println!("granted: {}", summary.granted);
            println!("warning: {}", summary.warning);
            println!("denied:  {}", summary.denied);
        }
        Commands::Test { device, output } => run_camera_test(&device, output)?,
    }

    Ok(())
}

async fn connect(system: bool) -> Result<WardenProxy<'static>> {
    let conn = if system {
        zbus::Connection::system().await
    } else {
        zbus::Connection::session().await
    }
    .context("failed to connect to D-Bus")?;
    WardenProxy::new(&conn)
        .await
        .context("wardend is not reachable")
}

fn open_audit(db: Option<PathBuf>) -> Result<SqliteAuditLog> {
    let path = db.unwrap_or_else(default_db_path);
    SqliteAuditLog::open(&path).with_context(|| format!("failed to open {}", path.display()))
}

fn default_db_path() -> PathBuf {
    if let Ok(path) = std::env::var("WARDEN_DB_PATH") {
        return PathBuf::from(path);
    }
    std::env::var("XDG_DATA_HOME")
        .map(PathBuf::from)
        .unwrap_or_else(|_| {
            let home = std::env::var("HOME").unwrap_or_else(|_| "/tmp".to_string());
            PathBuf::from(home).join(".local/share")
        })
        .join("warden/access.db")
}

fn run_camera_test(device: &str, output: Option<PathBuf>) -> Result<()> {
    println!("Capture devices:");
    for info in Camera::list_devices() {
        println!("  {}  {} ({}, {})", info.path, info.name, info.driver, info.bus);
    }

    let camera = Camera::open(device, 640, 480)
        .with_context(|| format!("failed to open {device}"))?;
    println!(
        "{device}: {}x{} {:?}",
        camera.width,
        camera.height,
        camera.pixel_format()
    );

    let frame = camera.capture_frame().context("capture failed")?;
    println!("captured frame #{} ({} bytes)", frame.sequence, frame.data.len());

    if let Some(path) = output {
        frame
            .to_rgb()
            .save(&path)
            .with_context(|| format!("failed to write {}", path.display()))?;
        println!("saved {}", path.display());
    }
    Ok(())
}
