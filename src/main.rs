//! Scout - Entry Point
//!
//! Generates targets, scans them under the ethical policy and prints every
//! detected proxy as a JSON line on stdout.

use std::sync::Arc;

use anyhow::Context;
use futures::stream::{self, StreamExt};
use tokio::signal;
use tokio::sync::broadcast::error::RecvError;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use scout::asn::StaticAsnDirectory;
use scout::config::{Config, LogConfig};
use scout::models::ScanTarget;
use scout::scanner::{EthicalScanManager, TargetSelector};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let config = Config::from_env().context("Failed to load configuration")?;
    init_tracing(&config.log);

    info!("Starting Scout");

    let manager = EthicalScanManager::from_config(&config)
        .await
        .context("Failed to initialize scan manager")?;

    let selector = Arc::new(TargetSelector::new(
        Arc::new(StaticAsnDirectory::builtin()),
        config.targets.clone(),
    ));
    let targets: Vec<ScanTarget> = selector
        .generate_targets(&config.targets.seed_ips, config.targets.max_targets)
        .await
        .collect();

    let estimate = selector.estimate_scan_size(&targets);
    info!(
        "Scan plan: {} targets, ~{:.0}s, ~{:.2} MB, {} risk",
        estimate.total_targets,
        estimate.estimated_duration_seconds,
        estimate.estimated_bandwidth_mb,
        estimate.risk_level
    );

    // Print detections as they arrive rather than per batch.
    let mut results = manager.subscribe();
    let annotator = selector.clone();
    let printer = tokio::spawn(async move {
        let mut detected = 0usize;
        loop {
            match results.recv().await {
                Ok(mut result) if result.is_proxy => {
                    detected += 1;
                    if let Some(info) = annotator.asn_info(&result.ip).await {
                        result = result
                            .with_metadata("asn", info.asn)
                            .with_metadata("asn_name", info.name);
                    }
                    match serde_json::to_string(&result) {
                        Ok(line) => println!("{}", line),
                        Err(e) => error!("Failed to serialize result: {}", e),
                    }
                }
                Ok(_) => {}
                Err(RecvError::Lagged(skipped)) => {
                    warn!("Result printer lagged, {} result(s) skipped", skipped)
                }
                Err(RecvError::Closed) => break,
            }
        }
        detected
    });

    let cancel = CancellationToken::new();
    let shutdown = cancel.clone();
    tokio::spawn(async move {
        shutdown_signal().await;
        info!("Shutdown signal received");
        shutdown.cancel();
    });

    let batch_size = manager.max_concurrent() * 2;
    let mut batches = stream::iter(targets).chunks(batch_size);
    let mut scanned = 0usize;

    while let Some(batch) = batches.next().await {
        if cancel.is_cancelled() {
            break;
        }
        scanned += manager
            .scan_batch_with_cancel(batch, cancel.clone())
            .await
            .len();
    }

    let stats = manager.get_scan_statistics();
    info!(
        "Scan statistics: {} scans, {} active IPs, {} blocklisted, {} abuse contacts cached",
        stats.total_scans, stats.active_ips, stats.blocklist_size, stats.cached_abuse_contacts
    );

    // Dropping the last manager handle closes the result channel.
    drop(manager);
    let detected = printer.await.unwrap_or_else(|e| {
        error!("Result printer failed: {}", e);
        0
    });

    info!("Scout stopped: {} scanned, {} proxies found", scanned, detected);
    Ok(())
}

fn init_tracing(log: &LogConfig) {
    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| format!("scout={}", log.level).into());

    let json = log.format.eq_ignore_ascii_case("json");
    tracing_subscriber::registry()
        .with(filter)
        .with(json.then(|| tracing_subscriber::fmt::layer().json()))
        .with((!json).then(|| tracing_subscriber::fmt::layer()))
        .init();
}

/// Wait for shutdown signal (Ctrl+C or SIGTERM)
async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = signal::ctrl_c().await {
            error!("Failed to install Ctrl+C handler: {}", e);
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut sigterm) => {
                sigterm.recv().await;
            }
            Err(e) => {
                error!("Failed to install signal handler: {}", e);
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
}
