//! kubesim-api — REST API for kubesim.
//!
//! Thin axum transport over [`ClusterController`] and
//! [`ClusterState`](kubesim_state::ClusterState). Every response uses the
//! `{success, data?, error?}` envelope.
//!
//! # API Routes
//!
//! | Method | Path | Description |
//! |---|---|---|
//! | POST | `/add-node` | Add a node (`{cores?}`) |
//! | DELETE | `/delete-node` | Remove a node and evacuate its pods (`{node_id}`) |
//! | POST | `/launch-pod` | Place or queue a pod (`{pod_id?, cpu}`) |
//! | DELETE | `/delete-pod` | Delete a running pod (`{node_id, pod_id}`) |
//! | DELETE | `/pending-pods/{pod_id}` | Drop a queued pod |
//! | POST | `/heartbeat` | Node heartbeat (always 200) |
//! | GET | `/list-nodes` | Nodes with health, capacity and heartbeat age |
//! | GET | `/pod-status` | Per-node pod usage and health |
//! | GET | `/pending-pods` | The pending queue, FIFO |
//! | GET | `/cluster` | Full snapshot with totals |
//! | GET | `/debug/audit` | Consistency violations, if any |

pub mod handlers;

use axum::Router;
use axum::routing::{delete, get, post};
use kubesim_cluster::ClusterController;

/// Shared state for API handlers.
#[derive(Clone)]
pub struct ApiState {
    pub controller: ClusterController,
    /// Capacity used when `add-node` omits `cores`.
    pub default_capacity: u32,
}

/// Build the complete API router.
pub fn build_router(controller: ClusterController, default_capacity: u32) -> Router {
    let api_state = ApiState {
        controller,
        default_capacity,
    };

    Router::new()
        .route("/add-node", post(handlers::add_node))
        .route("/delete-node", delete(handlers::delete_node))
        .route("/launch-pod", post(handlers::launch_pod))
        .route("/delete-pod", delete(handlers::delete_pod))
        .route("/heartbeat", post(handlers::heartbeat))
        .route("/list-nodes", get(handlers::list_nodes))
        .route("/pod-status", get(handlers::pod_status))
        .route("/pending-pods", get(handlers::pending_pods))
        .route("/pending-pods/{pod_id}", delete(handlers::delete_pending_pod))
        .route("/cluster", get(handlers::cluster))
        .route("/debug/audit", get(handlers::audit))
        .with_state(api_state)
}
