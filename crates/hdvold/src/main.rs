//! hdvold - volume plugin daemon.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use anyhow::Context;
use clap::Parser;
use tokio::net::UnixListener;

use hdvol::DriverArgs;
use hdvold::{DEFAULT_SOCKET, api};

#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Args {
    #[command(flatten)]
    driver: DriverArgs,

    /// Unix socket to serve the plugin API on
    #[arg(long, env = "HDVOL_SOCKET", default_value = DEFAULT_SOCKET)]
    socket: PathBuf,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let args = Args::parse();
    hdvol::logging::init(args.driver.verbosity())?;

    let config = args
        .driver
        .into_config()
        .context("Invalid driver configuration")?;
    let home = config.home.clone();
    let driver = tokio::task::spawn_blocking(move || -> anyhow::Result<_> {
        let driver = config
            .build()
            .with_context(|| format!("Can't open driver home {}", config.home.display()))?;
        let attached = driver.reconcile()?;
        tracing::info!(attached, "Recovered mount state");
        Ok(driver)
    })
    .await??;

    let listener = bind(&args.socket)?;
    tracing::info!(
        socket = %args.socket.display(),
        home = %home.display(),
        scope = %driver.scope(),
        "hdvold listening"
    );

    axum::serve(listener, api::app(Arc::new(driver)))
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    if let Err(e) = std::fs::remove_file(&args.socket) {
        tracing::warn!(socket = %args.socket.display(), error = %e, "Can't remove socket");
    }
    tracing::info!("hdvold stopped");
    Ok(())
}

/// Bind the plugin socket, replacing a stale one.
fn bind(socket: &Path) -> anyhow::Result<UnixListener> {
    if let Some(dir) = socket.parent() {
        std::fs::create_dir_all(dir)
            .with_context(|| format!("Can't create socket directory {}", dir.display()))?;
    }
    match std::fs::remove_file(socket) {
        Ok(()) => tracing::debug!(socket = %socket.display(), "Removed stale socket"),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
        Err(e) => {
            return Err(e).with_context(|| format!("Can't remove stale socket {}", socket.display()));
        }
    }
    UnixListener::bind(socket).with_context(|| format!("Can't bind {}", socket.display()))
}

async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            tracing::error!(error = %e, "Can't listen for Ctrl-C");
            std::future::pending::<()>().await;
        }
    };

    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut signal) => {
                signal.recv().await;
            }
            Err(e) => {
                tracing::error!(error = %e, "Can't listen for SIGTERM");
                std::future::pending::<()>().await;
            }
        }
    };

    tokio::select! {
        () = ctrl_c => {},
        () = terminate => {},
    }
    tracing::info!("Shutting down");
}
