use anyhow::{Context, Result};
use std::sync::Arc;
use tracing_subscriber::EnvFilter;
use warden_core::{Gallery, MatchError, SqliteAuditLog};

mod config;
mod dbus_interface;
mod display;
mod engine;

use config::{BusKind, Config};
use dbus_interface::{WardenService, BUS_NAME, OBJECT_PATH};

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .init();

    tracing::info!(version = env!("CARGO_PKG_VERSION"), "wardend starting");

    let config = Config::load().context("failed to load configuration")?;

    let gallery = Gallery::load(&config.gallery_path).with_context(|| {
        format!("failed to load gallery {}", config.gallery_path.display())
    })?;
    if gallery.is_empty() {
        return Err(MatchError::EmptyGallery)
            .with_context(|| format!("{} has no identities", config.gallery_path.display()));
    }

    let audit = SqliteAuditLog::open(&config.db_path)
        .with_context(|| format!("failed to open audit log {}", config.db_path.display()))?;

    let engine = engine::spawn_engine(&config, Arc::new(gallery), audit)
        .context("failed to start pipeline")?;
    let control = engine.control();

    // Keep the connection alive for the lifetime of the daemon.
    let _connection = match config.dbus {
        BusKind::Off => {
            tracing::info!("D-Bus control interface disabled");
            None
        }
        bus => match serve_dbus(bus, WardenService::new(control.clone())).await {
            Ok(conn) => {
                tracing::info!(bus = ?bus, name = BUS_NAME, "D-Bus control interface ready");
                Some(conn)
            }
            Err(e) => {
                tracing::warn!(error = %e, "D-Bus unavailable; continuing without control interface");
                None
            }
        },
    };

    tracing::info!("wardend ready");

    let exit = tokio::select! {
        signal = tokio::signal::ctrl_c() => {
            signal.context("failed to listen for ctrl-c")?;
            tracing::info!("wardend shutting down");
            None
        }
        status = control.finished() => Some(status),
    };

    tokio::task::spawn_blocking(move || engine.shutdown())
        .await
        .context("shutdown task failed")?;

    match exit {
        Some(status) if status.state == engine::EngineState::Failed => {
            anyhow::bail!(
                "pipeline failed: {}",
                status.error.unwrap_or_else(|| "unknown error".into())
            )
        }
        Some(status) => {
            tracing::info!(summary = ?status.summary, "pipeline finished");
            Ok(())
        }
        None => Ok(()),
    }
}

async fn serve_dbus(bus: BusKind, service: WardenService) -> zbus::Result<zbus::Connection> {
    let builder = match bus {
        BusKind::System => zbus::connection::Builder::system()?,
        _ => zbus::connection::Builder::session()?,
    };
    builder
        .name(BUS_NAME)?
        .serve_at(OBJECT_PATH, service)?
        .build()
        .await
}
