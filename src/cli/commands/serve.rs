//! Serve command - artifact API plus background sweeper

use crate::api::{self, accessor_from_config};
use crate::cli::args::ServeArgs;
use crate::config::Config;
use crate::error::{HangarError, HangarResult};
use crate::node::Node;
use std::sync::Arc;
use tokio::net::TcpListener;
use tokio::sync::watch;
use tracing::{info, warn};

/// Execute the serve command
pub async fn execute(args: ServeArgs, config: &Config) -> HangarResult<()> {
    let node = Arc::new(Node::open(config).await?);
    let listen = args.listen.unwrap_or_else(|| config.api.listen.clone());

    let app = api::router(node.api_state(accessor_from_config(&config.api)));
    let listener = TcpListener::bind(&listen)
        .await
        .map_err(|e| HangarError::io(format!("binding {}", listen), e))?;
    info!("Artifact API listening on {}", listen);

    let (shutdown_tx, shutdown_rx) = watch::channel(false);

    let sweeper = if args.no_sweep {
        None
    } else {
        let sweeper = node.sweeper();
        let rx = shutdown_rx.clone();
        Some(tokio::spawn(async move { sweeper.run(rx).await }))
    };

    let snapshots = {
        let node = node.clone();
        let mut rx = shutdown_rx.clone();
        let interval = config.gc.interval();
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(interval);
            ticker.tick().await;
            loop {
                tokio::select! {
                    _ = ticker.tick() => {
                        if let Err(e) = node.save().await {
                            warn!("Failed to save ledger snapshot: {}", e);
                        }
                    }
                    changed = rx.changed() => {
                        if changed.is_err() || *rx.borrow() {
                            break;
                        }
                    }
                }
            }
        })
    };

    axum::serve(listener, app)
        .with_graceful_shutdown(async move {
            if let Err(e) = tokio::signal::ctrl_c().await {
                warn!("Failed to listen for Ctrl-C: {}", e);
                std::future::pending::<()>().await;
            }
            info!("Shutting down");
            shutdown_tx.send(true).ok();
        })
        .await
        .map_err(|e| HangarError::io("serving artifact API", e))?;

    if let Some(handle) = sweeper {
        handle.await.ok();
    }
    snapshots.await.ok();

    node.save().await?;
    info!("Ledger snapshot saved");
    Ok(())
}
