//! Control plane wiring.
//!
//! The daemon:
//! 1. Builds the cluster state from the configuration
//! 2. Provisions an in-process agent for every node through the controller
//! 3. Runs the health monitor and, when enabled, the autoscaler
//! 4. Serves the REST API until Ctrl-C, then stops every loop and agent

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::watch;
use tracing::{error, info};

use kubesim_autoscale::{AutoscalePolicy, Autoscaler, ScaleCallback, ScaleDecision};
use kubesim_cluster::{ClusterController, InProcessProvisioner};
use kubesim_core::{KubesimConfig, NodeId};
use kubesim_health::{EvictFn, HealthMonitor};
use kubesim_state::ClusterState;

/// Run the control plane until Ctrl-C.
pub async fn run_control_plane(config: KubesimConfig, initial_nodes: u32) -> anyhow::Result<()> {
    info!(
        algorithm = %config.scheduler.algorithm,
        heartbeat_timeout_secs = config.health.heartbeat_timeout_secs,
        auto_scale = config.autoscale.enabled,
        "kubesim daemon starting"
    );

    // ── Core ───────────────────────────────────────────────────

    let state = ClusterState::from_config(&config);
    let provisioner = Arc::new(InProcessProvisioner::from_config(state.clone(), &config.agent));
    let controller = ClusterController::new(state.clone(), provisioner.clone());

    let default_capacity = config.autoscale.default_node_capacity;
    for _ in 0..initial_nodes {
        let added = controller.add_node(i64::from(default_capacity)).await?;
        info!(node_id = %added.node_id, capacity = added.capacity, "initial node created");
    }

    // ── Shutdown signal ────────────────────────────────────────

    let (shutdown_tx, shutdown_rx) = watch::channel(false);

    // ── Background tasks ───────────────────────────────────────

    let monitor = HealthMonitor::from_config(state.clone(), &config.health).with_evict_fn(evict_via(controller.clone()));
    let health_shutdown = shutdown_rx.clone();
    let health_handle = tokio::spawn(async move {
        monitor.run(health_shutdown).await;
    });

    let autoscale_handle = if config.autoscale.enabled {
        let mut autoscaler = Autoscaler::new(state.clone(), AutoscalePolicy::from_config(&config.autoscale))
            .with_scale_fn(scale_via(controller.clone()));
        let interval = config.autoscale.interval();
        let autoscale_shutdown = shutdown_rx.clone();
        Some(tokio::spawn(async move {
            autoscaler.run(interval, autoscale_shutdown).await;
        }))
    } else {
        info!("autoscaler disabled");
        None
    };

    // ── API server ─────────────────────────────────────────────

    let router = kubesim_api::build_router(controller, default_capacity);
    let listener = tokio::net::TcpListener::bind(&config.api.bind).await?;
    info!(addr = %listener.local_addr()?, "API server starting");

    axum::serve(listener, router)
        .with_graceful_shutdown(async move {
            if let Err(e) = tokio::signal::ctrl_c().await {
                error!(error = %e, "failed to listen for Ctrl-C");
            }
            info!("shutdown signal received");
            let _ = shutdown_tx.send(true);
        })
        .await?;

    // Wait for background tasks.
    let _ = health_handle.await;
    if let Some(handle) = autoscale_handle {
        let _ = handle.await;
    }
    provisioner.stop_all().await;

    info!("kubesim daemon stopped");
    Ok(())
}

/// Dead-node eviction goes through the controller so the agent is torn down too.
fn evict_via(controller: ClusterController) -> EvictFn {
    Arc::new(move |node_id: NodeId, window: Duration| {
        let controller = controller.clone();
        Box::pin(async move { Ok(controller.evict_node(&node_id, window).await?) })
    })
}

fn scale_via(controller: ClusterController) -> ScaleCallback {
    Box::new(move |decision: ScaleDecision| {
        let controller = controller.clone();
        Box::pin(async move {
            match decision {
                ScaleDecision::ScaleOut { capacity } => {
                    controller.add_node(i64::from(capacity)).await?;
                }
                ScaleDecision::ScaleIn { node_id } => {
                    controller.remove_node(&node_id).await?;
                }
                ScaleDecision::NoChange => {}
            }
            Ok(())
        })
    })
}
