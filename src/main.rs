//! nautilus-operator entry point.
//!
//! Runs the NautilusCluster and EcsCluster controllers behind a leader
//! election lease, next to the health server and the optional admission
//! webhook server.

use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use kube::Client;
use kube_leader_election::{LeaseLock, LeaseLockParams};
use tokio::signal;
use tokio::task::JoinHandle;
use tracing::{error, info, warn};

use nautilus_operator::health::{HealthState, run_health_server};
use nautilus_operator::{OperatorConfig, run_controllers};
use nautilus_operator::{WEBHOOK_CERT_PATH, WEBHOOK_KEY_PATH, run_webhook_server};

const LEASE_NAME: &str = "nautilus-operator-leader";
const LEASE_TTL_SECS: u64 = 15;
const LEASE_RENEW_INTERVAL_SECS: u64 = 5;

/// Time given to in-flight reconciliations after a shutdown signal.
const SHUTDOWN_GRACE_PERIOD_SECS: u64 = 5;

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    init_tracing()?;
    info!(version = env!("CARGO_PKG_VERSION"), "Starting nautilus-operator");

    let mut config = OperatorConfig::from_env();
    let holder_id = config.pod_name.clone().unwrap_or_else(|| {
        warn!("POD_NAME not set, falling back to hostname");
        hostname::get()
            .map(|h| h.to_string_lossy().into_owned())
            .unwrap_or_else(|_| "unknown".to_string())
    });
    config.pod_name = Some(holder_id.clone());
    let lease_namespace = config.pod_namespace.clone().unwrap_or_else(|| {
        warn!("POD_NAMESPACE not set, placing the lease in 'default'");
        "default".to_string()
    });
    info!(
        holder_id = %holder_id,
        lease_namespace = %lease_namespace,
        watch_namespace = config.watch_namespace.as_deref().unwrap_or("cluster-wide"),
        test_mode = config.test_mode,
        health_port = config.health_port,
        "Loaded configuration"
    );

    let client = Client::try_default().await?;
    let health_state = Arc::new(HealthState::new());

    // Probes answer before leadership is held; readiness flips once controllers run
    let health_handle = {
        let state = health_state.clone();
        let port = config.health_port;
        tokio::spawn(async move {
            if let Err(e) = run_health_server(state, port).await {
                error!(error = %e, "Health server failed");
            }
        })
    };

    acquire_leadership(&lease_lock(&client, &lease_namespace, &holder_id)).await;
    let renewal_handle = spawn_lease_renewal(lease_lock(&client, &lease_namespace, &holder_id));

    let controller_handle = {
        let state = health_state.clone();
        let client = client.clone();
        tokio::spawn(async move {
            run_controllers(client, Some(state), &config).await;
        })
    };

    let webhook_handle = spawn_webhook_server();

    tokio::select! {
        result = controller_handle => {
            if let Err(e) = result {
                error!(error = %e, "Controller task panicked");
            }
        }
        result = health_handle => {
            if let Err(e) = result {
                error!(error = %e, "Health server task panicked");
            }
        }
        result = async {
            match webhook_handle {
                Some(handle) => handle.await,
                None => std::future::pending().await,
            }
        } => {
            if let Err(e) = result {
                error!(error = %e, "Webhook server task panicked");
            }
        }
        // Renewal only returns by panicking; a lost lease exits the process
        Err(e) = renewal_handle => {
            error!(error = %e, "Lease renewal task panicked");
        }
        _ = shutdown_signal() => {
            info!("Shutdown signal received");
            health_state.set_ready(false).await;
            info!(
                grace_period_secs = SHUTDOWN_GRACE_PERIOD_SECS,
                "Draining in-flight reconciliations"
            );
            tokio::time::sleep(Duration::from_secs(SHUTDOWN_GRACE_PERIOD_SECS)).await;
        }
    }

    info!("Operator stopped");
    Ok(())
}

/// JSON logs, filtered by `RUST_LOG` on top of per-crate info defaults.
fn init_tracing() -> Result<(), Box<dyn std::error::Error>> {
    let filter = tracing_subscriber::EnvFilter::from_default_env()
        .add_directive("nautilus_operator=info".parse()?)
        .add_directive("kube=info".parse()?)
        .add_directive("kube_leader_election=info".parse()?);
    tracing_subscriber::fmt().with_env_filter(filter).json().init();
    Ok(())
}

fn lease_lock(client: &Client, namespace: &str, holder_id: &str) -> LeaseLock {
    LeaseLock::new(
        client.clone(),
        namespace,
        LeaseLockParams {
            holder_id: holder_id.to_string(),
            lease_name: LEASE_NAME.to_string(),
            lease_ttl: Duration::from_secs(LEASE_TTL_SECS),
        },
    )
}

/// Block until this instance holds the lease.
async fn acquire_leadership(lock: &LeaseLock) {
    info!(lease_name = LEASE_NAME, "Waiting for leadership");
    loop {
        match lock.try_acquire_or_renew().await {
            Ok(result) if result.acquired_lease => {
                info!("Acquired leadership");
                return;
            }
            Ok(_) => info!("Lease held by another instance"),
            Err(e) => warn!(error = %e, "Lease acquisition failed, retrying"),
        }
        tokio::time::sleep(Duration::from_secs(LEASE_RENEW_INTERVAL_SECS)).await;
    }
}

/// Keep renewing the lease. Losing it exits the process so the pod restarts
/// and rejoins the election instead of running a second active controller.
#[allow(clippy::exit)]
fn spawn_lease_renewal(lock: LeaseLock) -> JoinHandle<()> {
    tokio::spawn(async move {
        loop {
            tokio::time::sleep(Duration::from_secs(LEASE_RENEW_INTERVAL_SECS)).await;
            match lock.try_acquire_or_renew().await {
                Ok(result) if result.acquired_lease => {}
                Ok(_) => {
                    error!("Leadership lost, exiting");
                    std::process::exit(1);
                }
                Err(e) => {
                    error!(error = %e, "Lease renewal failed, exiting");
                    std::process::exit(1);
                }
            }
        }
    })
}

/// Start the admission webhook server when its certificate is mounted.
fn spawn_webhook_server() -> Option<JoinHandle<()>> {
    if !Path::new(WEBHOOK_CERT_PATH).exists() || !Path::new(WEBHOOK_KEY_PATH).exists() {
        info!("Webhook certificate not mounted, admission webhooks disabled");
        return None;
    }
    info!("Webhook certificate found, starting admission webhook server");
    Some(tokio::spawn(async {
        if let Err(e) = run_webhook_server(WEBHOOK_CERT_PATH, WEBHOOK_KEY_PATH).await {
            error!(error = %e, "Webhook server failed");
        }
    }))
}

/// Resolves on SIGTERM or SIGINT.
///
/// Without signal handlers the operator cannot shut down cleanly, so failing
/// to install them aborts startup.
#[allow(clippy::expect_used)]
async fn shutdown_signal() {
    let ctrl_c = async {
        signal::ctrl_c()
            .await
            .expect("Failed to install Ctrl+C handler");
    };

    #[cfg(unix)]
    let terminate = async {
        signal::unix::signal(signal::unix::SignalKind::terminate())
            .expect("Failed to install SIGTERM handler")
            .recv()
            .await;
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }
}
