//! # TOOL-E Kiosk
//!
//! Headless kiosk station: loads the configuration, opens storage, picks
//! the validation and storage backends and runs the kiosk loop until
//! Ctrl-C or SIGTERM.
//!
//! ## Usage
//! ```text
//! toole-kiosk [--config <path>]
//!
//! RUST_LOG=debug toole-kiosk
//! TOOLE_SERVER_URL=http://10.0.0.5:5000 toole-kiosk
//! ```
//!
//! Devices are the simulated ones from `toole_station::hardware`; a build
//! for real hardware swaps in drivers implementing the same traits.

use std::path::PathBuf;
use std::sync::Arc;

use anyhow::Context;
use tracing::{error, info, warn};
use tracing_subscriber::EnvFilter;

use toole_db::{Database, DbConfig};
use toole_station::{
    DirectoryValidator, HttpClassifier, HttpGateway, HttpUserValidator, ImageStore, KioskBuilder,
    KioskConfig, SimulatedCamera, SimulatedCardReader, SimulatedSensor, SqliteGateway,
    StorageBackend, StorageGateway, UserValidator, ValidationSource,
};

const DEFAULT_LOG_FILTER: &str = "info,toole=debug,sqlx=warn";

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    init_tracing();

    let config = KioskConfig::load_or_default(config_path_arg());
    info!(
        kiosk = %config.kiosk.name,
        validation = ?config.validation.source,
        storage = ?config.storage.backend,
        "Starting TOOL-E kiosk"
    );

    let images = ImageStore::new(config.image_root());
    match images.cleanup_temp(config.temp_max_age()).await {
        Ok(removed) => info!(removed, root = %images.root().display(), "Image store ready"),
        Err(e) => warn!(error = %e, "Temp image cleanup failed"),
    }

    let db = open_database(&config).await?;

    let validator: Arc<dyn UserValidator> = match config.validation.source {
        ValidationSource::Server => Arc::new(HttpUserValidator::new(
            &config.validation.url,
            config.validation_timeout(),
        )?),
        ValidationSource::Directory => {
            let db = db.as_ref().context("directory validation needs the database")?;
            Arc::new(DirectoryValidator::new(db.users()))
        }
    };

    let gateway: Arc<dyn StorageGateway> = match config.storage.backend {
        StorageBackend::Sqlite => {
            let db = db.as_ref().context("SQLite storage needs the database")?;
            Arc::new(SqliteGateway::new(db.transactions()))
        }
        StorageBackend::Server => Arc::new(HttpGateway::new(
            &config.storage.batch_url,
            &config.storage.tools_url,
            config.submit_timeout(),
        )?),
    };

    let classifier = Arc::new(HttpClassifier::new(
        &config.classifier.url,
        config.identify_timeout(),
    )?);

    warn!("No hardware drivers configured, using simulated devices");
    let kiosk = KioskBuilder::new(config)
        .with_sensor(Arc::new(SimulatedSensor::new(0)))
        .with_camera(Arc::new(SimulatedCamera::default()))
        .with_card_reader(Arc::new(SimulatedCardReader::new()))
        .with_classifier(classifier)
        .with_validator(validator)
        .with_gateway(gateway)
        .with_images(images)
        .build()?;

    let handle = kiosk.handle();
    let loop_task = tokio::spawn(kiosk.run());

    shutdown_signal().await;
    handle.shutdown().await;

    match loop_task.await {
        Ok(Ok(())) => {}
        Ok(Err(e)) => error!(error = %e, "Kiosk loop ended with an error"),
        Err(e) => error!(error = %e, "Kiosk loop task panicked"),
    }

    if let Some(db) = db {
        db.close().await;
    }
    info!("Kiosk shutdown complete");
    Ok(())
}

/// `RUST_LOG` wins; otherwise the kiosk crates log at debug.
fn init_tracing() {
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(DEFAULT_LOG_FILTER));

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(true)
        .init();
}

/// `--config <path>`, if given.
fn config_path_arg() -> Option<PathBuf> {
    let mut args = std::env::args().skip(1);
    while let Some(arg) = args.next() {
        if arg == "--config" {
            return args.next().map(PathBuf::from);
        }
    }
    None
}

/// Opens SQLite when any configured backend needs it.
async fn open_database(config: &KioskConfig) -> anyhow::Result<Option<Database>> {
    let needed = config.storage.backend == StorageBackend::Sqlite
        || config.validation.source == ValidationSource::Directory;
    if !needed {
        return Ok(None);
    }

    let path = config.database_path();
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent)
            .with_context(|| format!("creating {}", parent.display()))?;
    }

    let db = Database::new(DbConfig::new(&path))
        .await
        .with_context(|| format!("opening {}", path.display()))?;
    if !db.health_check().await {
        warn!(path = %path.display(), "Database health check failed");
    }
    Ok(Some(db))
}

/// Resolves on Ctrl-C, or SIGTERM on unix.
async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            error!(error = %e, "Failed to listen for Ctrl-C");
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
                error!(error = %e, "Failed to install SIGTERM handler");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }

    info!("Shutdown signal received");
}
