//! REST API handlers.
//!
//! Each handler calls one cluster operation and returns JSON. Validation
//! failures map to 400 (409 for a duplicate pod id), unknown ids to 404.
//! A pod that cannot be placed is a successful launch with status
//! `pending`.

use axum::Json;
use axum::extract::{Path, State};
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use serde::Deserialize;
use serde_json::{Value, json};
use tracing::debug;

use kubesim_state::*;

use crate::ApiState;

/// Response wrapper for consistent API format.
#[derive(serde::Serialize)]
struct ApiResponse<T: serde::Serialize> {
    success: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    data: Option<T>,
    #[serde(skip_serializing_if = "Option::is_none")]
    error: Option<String>,
}

impl<T: serde::Serialize> ApiResponse<T> {
    fn ok(data: T) -> Json<Self> {
        Json(Self {
            success: true,
            data: Some(data),
            error: None,
        })
    }
}

fn error_response(msg: &str, status: StatusCode) -> Response {
    (
        status,
        Json(ApiResponse::<()> {
            success: false,
            data: None,
            error: Some(msg.to_string()),
        }),
    )
        .into_response()
}

fn cluster_error(err: &ClusterError) -> Response {
    let status = match err {
        ClusterError::DuplicatePod(_) => StatusCode::CONFLICT,
        e if e.is_validation() => StatusCode::BAD_REQUEST,
        e if e.is_not_found() => StatusCode::NOT_FOUND,
        _ => StatusCode::INTERNAL_SERVER_ERROR,
    };
    debug!(error = %err, %status, "request rejected");
    error_response(&err.to_string(), status)
}

/// Integer field that may arrive as any JSON value.
fn int_field(value: &Value, name: &str) -> Result<i64, Response> {
    value.as_i64().ok_or_else(|| {
        error_response(&format!("{name} must be a positive integer"), StatusCode::BAD_REQUEST)
    })
}

// ── Nodes ──────────────────────────────────────────────────────

#[derive(Debug, Default, Deserialize)]
pub struct AddNodeRequest {
    #[serde(default)]
    pub cores: Option<Value>,
}

/// POST /add-node
pub async fn add_node(State(state): State<ApiState>, Json(req): Json<AddNodeRequest>) -> Response {
    let capacity = match &req.cores {
        None | Some(Value::Null) => i64::from(state.default_capacity),
        Some(v) => match int_field(v, "cores") {
            Ok(c) => c,
            Err(resp) => return resp,
        },
    };

    match state.controller.add_node(capacity).await {
        Ok(outcome) => (
            StatusCode::CREATED,
            ApiResponse::ok(json!({
                "node_id": outcome.node_id,
                "capacity": outcome.capacity,
                "placed_from_pending": outcome.reconciled.placed,
            })),
        )
            .into_response(),
        Err(e) => cluster_error(&e),
    }
}

#[derive(Debug, Deserialize)]
pub struct DeleteNodeRequest {
    pub node_id: String,
}

/// DELETE /delete-node
pub async fn delete_node(State(state): State<ApiState>, Json(req): Json<DeleteNodeRequest>) -> Response {
    match state.controller.remove_node(&req.node_id).await {
        Ok(report) => ApiResponse::ok(json!({
            "node_id": report.node_id,
            "rescheduled_count": report.rescheduled_count(),
            "pending_count": report.pending_count(),
            "rescheduled": report.rescheduled,
            "pending": report.pending,
        }))
        .into_response(),
        Err(e) => cluster_error(&e),
    }
}

/// GET /list-nodes
pub async fn list_nodes(State(state): State<ApiState>) -> impl IntoResponse {
    ApiResponse::ok(state.controller.state().list_nodes())
}

// ── Pods ───────────────────────────────────────────────────────

#[derive(Debug, Default, Deserialize)]
pub struct LaunchPodRequest {
    #[serde(default)]
    pub pod_id: Option<String>,
    /// Defaults to one core when omitted.
    #[serde(default, alias = "cpu_request")]
    pub cpu: Value,
}

const DEFAULT_POD_CPU: i64 = 1;

/// POST /launch-pod
pub async fn launch_pod(State(state): State<ApiState>, Json(req): Json<LaunchPodRequest>) -> Response {
    let cpu = match &req.cpu {
        Value::Null => DEFAULT_POD_CPU,
        v => match int_field(v, "cpu") {
            Ok(cpu) => cpu,
            Err(resp) => return resp,
        },
    };

    match state.controller.state().launch_pod(req.pod_id.as_deref(), cpu) {
        Ok(outcome) => {
            let status = match outcome.placement {
                PodPlacement::Running { .. } => "running",
                PodPlacement::Pending => "pending",
            };
            (
                StatusCode::CREATED,
                ApiResponse::ok(json!({
                    "pod_id": outcome.pod_id,
                    "node_id": outcome.placement.node_id(),
                    "status": status,
                })),
            )
                .into_response()
        }
        Err(e) => cluster_error(&e),
    }
}

#[derive(Debug, Deserialize)]
pub struct DeletePodRequest {
    pub node_id: String,
    pub pod_id: String,
}

/// DELETE /delete-pod
pub async fn delete_pod(State(state): State<ApiState>, Json(req): Json<DeletePodRequest>) -> Response {
    match state.controller.state().delete_pod(&req.node_id, &req.pod_id) {
        Ok(reconciled) => ApiResponse::ok(json!({
            "deleted": req.pod_id,
            "node_id": req.node_id,
            "placed_from_pending": reconciled.placed,
        }))
        .into_response(),
        Err(e) => cluster_error(&e),
    }
}

/// GET /pod-status
pub async fn pod_status(State(state): State<ApiState>) -> impl IntoResponse {
    ApiResponse::ok(state.controller.state().snapshot().pod_status_by_node())
}

/// GET /pending-pods
pub async fn pending_pods(State(state): State<ApiState>) -> impl IntoResponse {
    let pending = state.controller.state().pending_pods();
    ApiResponse::ok(json!({
        "count": pending.len(),
        "pending_pods": pending,
    }))
}

/// DELETE /pending-pods/{pod_id}
pub async fn delete_pending_pod(State(state): State<ApiState>, Path(pod_id): Path<String>) -> Response {
    match state.controller.state().delete_pending_pod(&pod_id) {
        Ok(removed) => ApiResponse::ok(json!({ "deleted": removed.pod_id })).into_response(),
        Err(e) => cluster_error(&e),
    }
}

// ── Heartbeats ─────────────────────────────────────────────────

/// POST /heartbeat
///
/// Always 200: a dropped heartbeat is reported, never an error for the node.
pub async fn heartbeat(State(state): State<ApiState>, Json(report): Json<HeartbeatReport>) -> impl IntoResponse {
    let ack = state.controller.state().heartbeat(&report);
    let body = match ack {
        HeartbeatAck::Accepted { updated_pods } => json!({
            "accepted": true,
            "updated_pods": updated_pods,
        }),
        HeartbeatAck::Stale { last_heartbeat } => json!({
            "accepted": false,
            "reason": "stale",
            "last_heartbeat": last_heartbeat,
        }),
        HeartbeatAck::FromFuture { timestamp, now } => json!({
            "accepted": false,
            "reason": "clock_skew",
            "timestamp": timestamp,
            "now": now,
        }),
        HeartbeatAck::UnknownNode => json!({
            "accepted": false,
            "reason": "unknown_node",
        }),
    };
    ApiResponse::ok(body)
}

// ── Cluster ────────────────────────────────────────────────────

/// GET /cluster
pub async fn cluster(State(state): State<ApiState>) -> impl IntoResponse {
    ApiResponse::ok(state.controller.state().snapshot())
}

/// GET /debug/audit
pub async fn audit(State(state): State<ApiState>) -> impl IntoResponse {
    let violations = state.controller.state().audit();
    ApiResponse::ok(json!({
        "consistent": violations.is_empty(),
        "violations": violations,
    }))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use std::time::Duration;

    use axum::body::to_bytes;
    use kubesim_cluster::{ClusterController, ExternalProvisioner};
    use kubesim_core::SchedulingAlgorithm;

    fn test_state() -> ApiState {
        let state = ClusterState::new(SchedulingAlgorithm::FirstFit, Duration::from_secs(10));
        ApiState {
            controller: ClusterController::new(state, Arc::new(ExternalProvisioner)),
            default_capacity: 4,
        }
    }

    async fn body(resp: Response) -> Value {
        let bytes = to_bytes(resp.into_body(), usize::MAX).await.unwrap();
        serde_json::from_slice(&bytes).unwrap()
    }

    fn launch(pod_id: Option<&str>, cpu: Value) -> Json<LaunchPodRequest> {
        Json(LaunchPodRequest {
            pod_id: pod_id.map(str::to_string),
            cpu,
        })
    }

    #[tokio::test]
    async fn add_node_uses_default_capacity() {
        let state = test_state();
        let resp = add_node(State(state.clone()), Json(AddNodeRequest::default())).await;
        assert_eq!(resp.status(), StatusCode::CREATED);

        let json = body(resp).await;
        assert_eq!(json["success"], true);
        assert_eq!(json["data"]["node_id"], "node_1");
        assert_eq!(json["data"]["capacity"], 4);
    }

    #[tokio::test]
    async fn add_node_rejects_bad_capacity() {
        let state = test_state();
        for cores in [json!(0), json!(-1), json!("four"), json!(2.5)] {
            let req = AddNodeRequest { cores: Some(cores) };
            let resp = add_node(State(state.clone()), Json(req)).await;
            assert_eq!(resp.status(), StatusCode::BAD_REQUEST);
        }
        assert_eq!(state.controller.state().node_count(), 0);
    }

    #[tokio::test]
    async fn launch_reports_running_or_pending() {
        let state = test_state();
        let resp = launch_pod(State(state.clone()), launch(Some("web"), json!(2))).await;
        assert_eq!(resp.status(), StatusCode::CREATED);
        let json = body(resp).await;
        assert_eq!(json["data"]["status"], "pending");
        assert!(json["data"]["node_id"].is_null());

        add_node(State(state.clone()), Json(AddNodeRequest::default())).await;
        let resp = launch_pod(State(state), launch(None, json!(1))).await;
        let json = body(resp).await;
        assert_eq!(json["data"]["status"], "running");
        assert_eq!(json["data"]["node_id"], "node_1");
    }

    #[tokio::test]
    async fn launch_defaults_to_one_core() {
        let state = test_state();
        add_node(State(state.clone()), Json(AddNodeRequest::default())).await;

        let resp = launch_pod(State(state.clone()), Json(LaunchPodRequest::default())).await;
        assert_eq!(resp.status(), StatusCode::CREATED);

        let json = body(list_nodes(State(state)).await.into_response()).await;
        assert_eq!(json["data"][0]["allocated"], 1);
    }

    #[tokio::test]
    async fn future_heartbeat_is_reported_as_skew() {
        let state = test_state();
        add_node(State(state.clone()), Json(AddNodeRequest::default())).await;

        let report = HeartbeatReport::new("node_1").at(u64::MAX);
        let resp = heartbeat(State(state), Json(report)).await.into_response();
        assert_eq!(resp.status(), StatusCode::OK);
        let json = body(resp).await;
        assert_eq!(json["data"]["accepted"], false);
        assert_eq!(json["data"]["reason"], "clock_skew");
    }

    #[tokio::test]
    async fn launch_validation_and_conflict() {
        let state = test_state();
        for cpu in [json!(0), json!("2"), json!(-1)] {
            let resp = launch_pod(State(state.clone()), launch(None, cpu)).await;
            assert_eq!(resp.status(), StatusCode::BAD_REQUEST);
        }
        let resp = launch_pod(State(state.clone()), launch(Some("no spaces"), json!(1))).await;
        assert_eq!(resp.status(), StatusCode::BAD_REQUEST);

        launch_pod(State(state.clone()), launch(Some("p"), json!(1))).await;
        let resp = launch_pod(State(state), launch(Some("p"), json!(1))).await;
        assert_eq!(resp.status(), StatusCode::CONFLICT);
    }

    #[tokio::test]
    async fn delete_unknown_ids_are_not_found() {
        let state = test_state();
        let resp = delete_node(
            State(state.clone()),
            Json(DeleteNodeRequest {
                node_id: "node_9".into(),
            }),
        )
        .await;
        assert_eq!(resp.status(), StatusCode::NOT_FOUND);
        assert_eq!(body(resp).await["success"], false);

        let resp = delete_pod(
            State(state.clone()),
            Json(DeletePodRequest {
                node_id: "node_9".into(),
                pod_id: "p".into(),
            }),
        )
        .await;
        assert_eq!(resp.status(), StatusCode::NOT_FOUND);

        let resp = delete_pending_pod(State(state), Path("p".to_string())).await;
        assert_eq!(resp.status(), StatusCode::NOT_FOUND);
    }

    #[tokio::test]
    async fn delete_node_reports_evacuation() {
        let state = test_state();
        add_node(State(state.clone()), Json(AddNodeRequest::default())).await;
        launch_pod(State(state.clone()), launch(Some("p1"), json!(2))).await;
        launch_pod(State(state.clone()), launch(Some("p2"), json!(2))).await;

        let resp = delete_node(
            State(state.clone()),
            Json(DeleteNodeRequest {
                node_id: "node_1".into(),
            }),
        )
        .await;
        assert_eq!(resp.status(), StatusCode::OK);
        let json = body(resp).await;
        assert_eq!(json["data"]["rescheduled_count"], 0);
        assert_eq!(json["data"]["pending_count"], 2);
        assert_eq!(json["data"]["pending"], json!(["p1", "p2"]));
    }

    #[tokio::test]
    async fn heartbeat_is_always_ok() {
        let state = test_state();
        let resp = heartbeat(State(state.clone()), Json(HeartbeatReport::new("ghost")))
            .await
            .into_response();
        assert_eq!(resp.status(), StatusCode::OK);
        let json = body(resp).await;
        assert_eq!(json["data"]["accepted"], false);
        assert_eq!(json["data"]["reason"], "unknown_node");

        add_node(State(state.clone()), Json(AddNodeRequest::default())).await;
        let resp = heartbeat(State(state), Json(HeartbeatReport::new("node_1")))
            .await
            .into_response();
        assert_eq!(body(resp).await["data"]["accepted"], true);
    }

    #[tokio::test]
    async fn read_views_return_ok() {
        let state = test_state();
        add_node(State(state.clone()), Json(AddNodeRequest::default())).await;
        launch_pod(State(state.clone()), launch(Some("p1"), json!(1))).await;
        launch_pod(State(state.clone()), launch(Some("big"), json!(9))).await;

        let json = body(list_nodes(State(state.clone())).await.into_response()).await;
        assert_eq!(json["data"][0]["allocated"], 1);

        let json = body(pod_status(State(state.clone())).await.into_response()).await;
        assert_eq!(json["data"]["node_1"]["p1"]["cpu_request"], 1);

        let json = body(pending_pods(State(state.clone())).await.into_response()).await;
        assert_eq!(json["data"]["count"], 1);
        assert_eq!(json["data"]["pending_pods"][0]["pod_id"], "big");

        let json = body(cluster(State(state.clone())).await.into_response()).await;
        assert_eq!(json["data"]["totals"]["running_pods"], 1);
        assert_eq!(json["data"]["algorithm"], "first-fit");

        let json = body(audit(State(state)).await.into_response()).await;
        assert_eq!(json["data"]["consistent"], true);
    }
}
