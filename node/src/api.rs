//! # REST + WebSocket API
//!
//! Builds the axum router that exposes the vault engine over HTTP. All
//! endpoints share application state through axum's `State` extractor.
//! Callers identify themselves with an `actor` field; authentication is
//! expected to happen in front of this service.
//!
//! ## Endpoints
//!
//! | Method | Path                                  | Description                    |
//! |--------|---------------------------------------|--------------------------------|
//! | GET    | `/health`                             | Liveness check                 |
//! | GET    | `/status`                             | Engine status summary          |
//! | POST   | `/vaults`                             | Create a vault                 |
//! | GET    | `/vaults`                             | List vaults                    |
//! | GET    | `/vaults/:id`                         | Vault by id                    |
//! | POST   | `/vaults/:id/deposits`                | Credit an asset to a vault     |
//! | GET    | `/vaults/:id/balances/:asset`         | Vault balance of one asset     |
//! | POST   | `/vaults/:id/proposals`               | Create a proposal              |
//! | GET    | `/vaults/:id/proposals`               | Proposals of a vault           |
//! | POST   | `/vaults/:id/proposals/:pid/approve`  | Approve a proposal             |
//! | POST   | `/vaults/:id/proposals/:pid/execute`  | Execute a proposal             |
//! | POST   | `/vaults/:id/proposals/:pid/cancel`   | Cancel a proposal              |
//! | GET    | `/proposals/:id`                      | Proposal by id, with status    |
//! | GET    | `/accounts/:address/balances/:asset`  | Recipient account balance      |
//! | GET    | `/events?since=N&limit=M`             | Page of the event journal      |
//! | GET    | `/ws`                                 | WebSocket for live events      |

use axum::{
    extract::{
        rejection::{JsonRejection, PathRejection, QueryRejection},
        ws::{Message, WebSocket, WebSocketUpgrade},
        Path, Query, State,
    },
    http::{Method, StatusCode},
    response::{IntoResponse, Response},
    routing::{get, post},
    Json, Router,
};
use futures::{SinkExt, StreamExt};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tokio::sync::broadcast;
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;

use warden_protocol::authorization::lifetime_from_secs;
use warden_protocol::config::MAX_EVENTS_PER_PAGE;
use warden_protocol::{
    Address, AssetId, ErrorCategory, EventRecord, ProposalAction, ProposalId, ProposalView,
    Receipt, Recovery, Vault, VaultEngine, VaultError, VaultId, VaultResult,
};

use crate::metrics::SharedMetrics;

// ---------------------------------------------------------------------------
// Application State
// ---------------------------------------------------------------------------

/// Shared application state available to all request handlers.
///
/// Cheap to clone: everything behind `Arc`.
#[derive(Clone)]
pub struct AppState {
    /// The node's reported version string.
    pub version: String,
    /// The vault engine. Every mutation goes through it.
    pub engine: Arc<VaultEngine>,
    /// Broadcast channel fed by the engine's sink, one message per record.
    pub event_tx: broadcast::Sender<EventRecord>,
    /// Reference to Prometheus metrics for in-handler recording.
    pub metrics: SharedMetrics,
}

impl AppState {
    /// Logs and counts an engine rejection, then wraps it for the response.
    fn rejected(&self, err: VaultError) -> ApiError {
        let category = err.category();
        self.metrics.record_rejection(category);
        match category {
            ErrorCategory::Internal => tracing::error!(code = err.code(), "engine failure: {}", err),
            _ => tracing::warn!(
                code = err.code(),
                category = category.as_str(),
                "request rejected: {}",
                err
            ),
        }
        ApiError::Engine(err)
    }

    /// Runs an engine call on tokio's blocking pool.
    ///
    /// Commits hold vault and ledger locks across a sled transaction and an
    /// fsync, and any engine call may wait on those locks.
    async fn blocking<T, F>(&self, call: F) -> ApiResult<T>
    where
        F: FnOnce(&VaultEngine) -> VaultResult<T> + Send + 'static,
        T: Send + 'static,
    {
        let engine = Arc::clone(&self.engine);
        match tokio::task::spawn_blocking(move || call(&engine)).await {
            Ok(result) => result.map_err(|e| self.rejected(e)),
            Err(e) => {
                tracing::error!("engine task failed: {}", e);
                Err(ApiError::Internal("engine task failed".to_string()))
            }
        }
    }
}

// ---------------------------------------------------------------------------
// Router Construction
// ---------------------------------------------------------------------------

/// Builds the full axum [`Router`] with all API routes, CORS, and tracing.
pub fn create_router(state: AppState) -> Router {
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods([Method::GET, Method::POST, Method::OPTIONS])
        .allow_headers(Any);

    Router::new()
        .route("/health", get(health_handler))
        .route("/status", get(status_handler))
        .route("/vaults", post(create_vault_handler).get(list_vaults_handler))
        .route("/vaults/:id", get(vault_handler))
        .route("/vaults/:id/deposits", post(deposit_handler))
        .route("/vaults/:id/balances/:asset", get(vault_balance_handler))
        .route(
            "/vaults/:id/proposals",
            post(propose_handler).get(list_proposals_handler),
        )
        .route("/vaults/:id/proposals/:pid/approve", post(approve_handler))
        .route("/vaults/:id/proposals/:pid/execute", post(execute_handler))
        .route("/vaults/:id/proposals/:pid/cancel", post(cancel_handler))
        .route("/proposals/:id", get(proposal_handler))
        .route(
            "/accounts/:address/balances/:asset",
            get(account_balance_handler),
        )
        .route("/events", get(events_handler))
        .route("/ws", get(ws_handler))
        .layer(cors)
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

// ---------------------------------------------------------------------------
// Errors
// ---------------------------------------------------------------------------

/// A failed request.
#[derive(Debug)]
pub enum ApiError {
    /// The engine refused the call.
    Engine(VaultError),
    /// The request could not be decoded.
    BadRequest(String),
    /// The engine call never returned.
    Internal(String),
}

/// Body of every error response.
#[derive(Debug, Serialize, Deserialize)]
pub struct ErrorBody {
    /// Human-readable message.
    pub error: String,
    /// Stable machine-readable code.
    pub code: String,
    pub category: ErrorCategory,
    pub recovery: Recovery,
}

/// HTTP status for an engine error.
pub fn status_for(err: &VaultError) -> StatusCode {
    match err {
        VaultError::VaultNotFound(_) | VaultError::ProposalNotFound(_) => StatusCode::NOT_FOUND,
        VaultError::NotOwner { .. } | VaultError::NotProposer { .. } => StatusCode::FORBIDDEN,
        VaultError::ProposalExpired { .. } => StatusCode::GONE,
        _ => match err.category() {
            ErrorCategory::Validation => StatusCode::BAD_REQUEST,
            ErrorCategory::Internal => StatusCode::INTERNAL_SERVER_ERROR,
            ErrorCategory::Authorization
            | ErrorCategory::State
            | ErrorCategory::Configuration
            | ErrorCategory::Resource => StatusCode::CONFLICT,
        },
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let (status, body) = match self {
            ApiError::Engine(err) => (
                status_for(&err),
                ErrorBody {
                    error: err.to_string(),
                    code: err.code().to_string(),
                    category: err.category(),
                    recovery: err.recovery(),
                },
            ),
            ApiError::BadRequest(message) => (
                StatusCode::BAD_REQUEST,
                ErrorBody {
                    error: message,
                    code: "bad_request".into(),
                    category: ErrorCategory::Validation,
                    recovery: Recovery::FixAndResubmit,
                },
            ),
            ApiError::Internal(message) => (
                StatusCode::INTERNAL_SERVER_ERROR,
                ErrorBody {
                    error: message,
                    code: "internal".into(),
                    category: ErrorCategory::Internal,
                    recovery: Recovery::Retry,
                },
            ),
        };
        (status, Json(body)).into_response()
    }
}

impl From<JsonRejection> for ApiError {
    fn from(rejection: JsonRejection) -> Self {
        ApiError::BadRequest(rejection.body_text())
    }
}

impl From<PathRejection> for ApiError {
    fn from(rejection: PathRejection) -> Self {
        ApiError::BadRequest(rejection.body_text())
    }
}

impl From<QueryRejection> for ApiError {
    fn from(rejection: QueryRejection) -> Self {
        ApiError::BadRequest(rejection.body_text())
    }
}

type ApiResult<T> = Result<T, ApiError>;

// ---------------------------------------------------------------------------
// Request Types
// ---------------------------------------------------------------------------

/// Body of `POST /vaults`.
#[derive(Debug, Serialize, Deserialize)]
pub struct CreateVaultRequest {
    pub owners: Vec<Address>,
    pub threshold: u32,
}

/// Body of `POST /vaults/:id/deposits`.
#[derive(Debug, Serialize, Deserialize)]
pub struct DepositRequest {
    pub depositor: Address,
    pub asset: AssetId,
    pub amount: u64,
}

/// Body of `POST /vaults/:id/proposals`.
#[derive(Debug, Serialize, Deserialize)]
pub struct ProposeRequest {
    pub actor: Address,
    pub action: ActionRequest,
    /// Lifetime override in seconds.
    #[serde(default)]
    pub expiry_secs: Option<i64>,
}

/// Proposal action as it appears on the wire, tagged by `type`.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ActionRequest {
    Transfer {
        asset: AssetId,
        recipient: Address,
        amount: u64,
    },
    AddOwner {
        owner: Address,
    },
    RemoveOwner {
        owner: Address,
    },
    UpdateThreshold {
        threshold: u32,
    },
}

impl From<ActionRequest> for ProposalAction {
    fn from(action: ActionRequest) -> Self {
        match action {
            ActionRequest::Transfer {
                asset,
                recipient,
                amount,
            } => ProposalAction::Transfer {
                asset,
                recipient,
                amount,
            },
            ActionRequest::AddOwner { owner } => ProposalAction::AddOwner { owner },
            ActionRequest::RemoveOwner { owner } => ProposalAction::RemoveOwner { owner },
            ActionRequest::UpdateThreshold { threshold } => {
                ProposalAction::UpdateThreshold { threshold }
            }
        }
    }
}

/// Body of the approve, execute and cancel endpoints.
#[derive(Debug, Serialize, Deserialize)]
pub struct ActorRequest {
    pub actor: Address,
}

/// Query string of `GET /events`.
#[derive(Debug, Deserialize)]
pub struct EventsQuery {
    /// First sequence number to return.
    #[serde(default)]
    pub since: u64,
    /// Page size, capped at [`MAX_EVENTS_PER_PAGE`].
    pub limit: Option<usize>,
}

// ---------------------------------------------------------------------------
// Response Types
// ---------------------------------------------------------------------------

/// Response payload for `GET /status`.
#[derive(Debug, Serialize, Deserialize)]
pub struct StatusResponse {
    /// Node software version.
    pub version: String,
    /// Number of vaults.
    pub vaults: usize,
    /// Number of records in the event journal.
    pub events: u64,
    /// Sequence of the latest record, absent while the journal is empty.
    pub last_sequence: Option<u64>,
    /// Hash at the head of the journal.
    pub head_hash: String,
    /// Whether commits are written to disk.
    pub persistent: bool,
    /// `false` while a committed write is waiting for a successful flush.
    pub durable: bool,
    /// ISO-8601 timestamp of the response.
    pub timestamp: String,
}

/// A balance of one asset.
#[derive(Debug, Serialize, Deserialize)]
pub struct BalanceResponse {
    pub asset: AssetId,
    pub balance: u64,
}

/// A recipient account's balance of one asset.
#[derive(Debug, Serialize, Deserialize)]
pub struct AccountBalanceResponse {
    pub address: Address,
    pub asset: AssetId,
    pub balance: u64,
}

/// Response payload for an accepted approval.
#[derive(Debug, Serialize, Deserialize)]
pub struct ApprovalResponse {
    pub proposal_id: ProposalId,
    /// Recorded approvals, including this one.
    pub approvals: usize,
    /// Whether the proposal can now be executed.
    pub executable: bool,
}

// ---------------------------------------------------------------------------
// Handlers
// ---------------------------------------------------------------------------

/// `GET /health`: returns 200 if the node is alive.
async fn health_handler() -> impl IntoResponse {
    (StatusCode::OK, Json(serde_json::json!({ "status": "ok" })))
}

/// `GET /status`: returns engine status summary.
async fn status_handler(State(state): State<AppState>) -> ApiResult<Json<StatusResponse>> {
    let version = state.version.clone();
    state
        .blocking(move |engine| {
            let events = engine.event_count();
            Ok(StatusResponse {
                version,
                vaults: engine.vault_count(),
                events,
                last_sequence: events.checked_sub(1),
                head_hash: engine.head_hash(),
                persistent: engine.is_persistent(),
                durable: engine.is_durable(),
                timestamp: chrono::Utc::now().to_rfc3339(),
            })
        })
        .await
        .map(Json)
}

/// `POST /vaults`: creates a vault and returns it with status 201.
async fn create_vault_handler(
    State(state): State<AppState>,
    body: Result<Json<CreateVaultRequest>, JsonRejection>,
) -> ApiResult<(StatusCode, Json<Vault>)> {
    let Json(req) = body?;
    let vault = state
        .blocking(move |engine| {
            engine
                .create_vault(req.owners, req.threshold)
                .and_then(|id| engine.get_vault(id))
        })
        .await?;
    Ok((StatusCode::CREATED, Json(vault)))
}

/// `GET /vaults`
async fn list_vaults_handler(State(state): State<AppState>) -> ApiResult<Json<Vec<Vault>>> {
    state
        .blocking(|engine| Ok(engine.list_vaults()))
        .await
        .map(Json)
}

/// `GET /vaults/:id`
async fn vault_handler(
    State(state): State<AppState>,
    path: Result<Path<VaultId>, PathRejection>,
) -> ApiResult<Json<Vault>> {
    let Path(vault_id) = path?;
    state
        .blocking(move |engine| engine.get_vault(vault_id))
        .await
        .map(Json)
}

/// `POST /vaults/:id/deposits`: credits the vault; returns the new balance.
async fn deposit_handler(
    State(state): State<AppState>,
    path: Result<Path<VaultId>, PathRejection>,
    body: Result<Json<DepositRequest>, JsonRejection>,
) -> ApiResult<Json<BalanceResponse>> {
    let Path(vault_id) = path?;
    let Json(req) = body?;
    let DepositRequest {
        depositor,
        asset,
        amount,
    } = req;
    let credited = asset.clone();
    let balance = state
        .blocking(move |engine| engine.deposit(vault_id, &depositor, &credited, amount))
        .await?;
    Ok(Json(BalanceResponse { asset, balance }))
}

/// `GET /vaults/:id/balances/:asset`
async fn vault_balance_handler(
    State(state): State<AppState>,
    path: Result<Path<(VaultId, AssetId)>, PathRejection>,
) -> ApiResult<Json<BalanceResponse>> {
    let Path((vault_id, asset)) = path?;
    let queried = asset.clone();
    let balance = state
        .blocking(move |engine| engine.get_balance(vault_id, &queried))
        .await?;
    Ok(Json(BalanceResponse { asset, balance }))
}

/// `POST /vaults/:id/proposals`: creates a proposal and returns its view
/// with status 201.
async fn propose_handler(
    State(state): State<AppState>,
    path: Result<Path<VaultId>, PathRejection>,
    body: Result<Json<ProposeRequest>, JsonRejection>,
) -> ApiResult<(StatusCode, Json<ProposalView>)> {
    let Path(vault_id) = path?;
    let Json(req) = body?;
    let expiry = req
        .expiry_secs
        .map(|secs| lifetime_from_secs(state.engine.config(), secs))
        .transpose()
        .map_err(|e| state.rejected(e))?;
    let view = state
        .blocking(move |engine| {
            engine
                .propose(vault_id, &req.actor, req.action.into(), expiry)
                .and_then(|id| engine.proposal_view(id))
        })
        .await?;
    Ok((StatusCode::CREATED, Json(view)))
}

/// `GET /vaults/:id/proposals`
async fn list_proposals_handler(
    State(state): State<AppState>,
    path: Result<Path<VaultId>, PathRejection>,
) -> ApiResult<Json<Vec<ProposalView>>> {
    let Path(vault_id) = path?;
    state
        .blocking(move |engine| engine.list_proposal_views(vault_id))
        .await
        .map(Json)
}

/// `POST /vaults/:id/proposals/:pid/approve`
async fn approve_handler(
    State(state): State<AppState>,
    path: Result<Path<(VaultId, ProposalId)>, PathRejection>,
    body: Result<Json<ActorRequest>, JsonRejection>,
) -> ApiResult<Json<ApprovalResponse>> {
    let Path((vault_id, proposal_id)) = path?;
    let Json(req) = body?;
    let (approvals, executable) = state
        .blocking(move |engine| {
            let approvals = engine.approve_in(vault_id, proposal_id, &req.actor)?;
            Ok((approvals, engine.is_executable(proposal_id)?))
        })
        .await?;
    Ok(Json(ApprovalResponse {
        proposal_id,
        approvals,
        executable,
    }))
}

/// `POST /vaults/:id/proposals/:pid/execute`: returns the execution receipt.
async fn execute_handler(
    State(state): State<AppState>,
    path: Result<Path<(VaultId, ProposalId)>, PathRejection>,
    body: Result<Json<ActorRequest>, JsonRejection>,
) -> ApiResult<Json<Receipt>> {
    let Path((vault_id, proposal_id)) = path?;
    let Json(req) = body?;
    let timer = state.metrics.execution_latency_seconds.start_timer();
    let result = state
        .blocking(move |engine| engine.execute_in(vault_id, proposal_id, &req.actor))
        .await;
    timer.observe_duration();
    result.map(Json)
}

/// `POST /vaults/:id/proposals/:pid/cancel`: returns the cancelled proposal.
async fn cancel_handler(
    State(state): State<AppState>,
    path: Result<Path<(VaultId, ProposalId)>, PathRejection>,
    body: Result<Json<ActorRequest>, JsonRejection>,
) -> ApiResult<Json<ProposalView>> {
    let Path((vault_id, proposal_id)) = path?;
    let Json(req) = body?;
    state
        .blocking(move |engine| {
            engine
                .cancel_in(vault_id, proposal_id, &req.actor)
                .and_then(|()| engine.proposal_view(proposal_id))
        })
        .await
        .map(Json)
}

/// `GET /proposals/:id`
async fn proposal_handler(
    State(state): State<AppState>,
    path: Result<Path<ProposalId>, PathRejection>,
) -> ApiResult<Json<ProposalView>> {
    let Path(proposal_id) = path?;
    state
        .blocking(move |engine| engine.proposal_view(proposal_id))
        .await
        .map(Json)
}

/// `GET /accounts/:address/balances/:asset`: balance credited to an
/// external account by executed transfers. Unknown accounts read as zero.
async fn account_balance_handler(
    State(state): State<AppState>,
    path: Result<Path<(Address, AssetId)>, PathRejection>,
) -> ApiResult<Json<AccountBalanceResponse>> {
    let Path((address, asset)) = path?;
    let (holder, queried) = (address.clone(), asset.clone());
    let balance = state
        .blocking(move |engine| Ok(engine.get_account_balance(&holder, &queried)))
        .await?;
    Ok(Json(AccountBalanceResponse {
        address,
        asset,
        balance,
    }))
}

/// `GET /events`: records with `sequence >= since`, in order.
async fn events_handler(
    State(state): State<AppState>,
    query: Result<Query<EventsQuery>, QueryRejection>,
) -> ApiResult<Json<Vec<EventRecord>>> {
    let Query(q) = query?;
    let limit = q.limit.unwrap_or(MAX_EVENTS_PER_PAGE);
    state
        .blocking(move |engine| engine.events_since(q.since, limit))
        .await
        .map(Json)
}

/// `GET /ws`: WebSocket upgrade for live event streaming.
///
/// Clients receive every committed [`EventRecord`] as a JSON text message.
/// The stream is push-only; client messages are ignored.
async fn ws_handler(ws: WebSocketUpgrade, State(state): State<AppState>) -> impl IntoResponse {
    ws.on_upgrade(move |socket| handle_ws_connection(socket, state))
}

/// Drives a single WebSocket connection, forwarding broadcast events
/// until the client disconnects or the channel is closed.
async fn handle_ws_connection(socket: WebSocket, state: AppState) {
    let mut rx = state.event_tx.subscribe();
    let (mut sender, mut receiver) = socket.split();

    loop {
        tokio::select! {
            event = rx.recv() => {
                match event {
                    Ok(record) => {
                        let payload = match serde_json::to_string(&record) {
                            Ok(s) => s,
                            Err(e) => {
                                tracing::warn!("failed to serialize ws event: {}", e);
                                continue;
                            }
                        };
                        if sender.send(Message::Text(payload)).await.is_err() {
                            break;
                        }
                    }
                    Err(broadcast::error::RecvError::Lagged(n)) => {
                        // The client can backfill from `/events`.
                        tracing::warn!("ws subscriber lagged by {} events", n);
                    }
                    Err(broadcast::error::RecvError::Closed) => {
                        break;
                    }
                }
            }
            msg = receiver.next() => {
                match msg {
                    Some(Ok(Message::Close(_))) | Some(Err(_)) | None => break,
                    Some(Ok(_)) => {}
                }
            }
        }
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use crate::metrics::{BroadcastSink, NodeMetrics};
    use axum::body::Body;
    use axum::http::Request;
    use http_body_util::BodyExt;
    use serde_json::{json, Value};
    use tower::ServiceExt;

    /// Creates a test AppState backed by an in-memory engine.
    fn test_app_state() -> AppState {
        let engine = Arc::new(VaultEngine::in_memory());
        let (event_tx, _) = broadcast::channel(64);
        let metrics = Arc::new(NodeMetrics::new().unwrap());
        engine.add_sink(Arc::new(BroadcastSink::new(
            Arc::clone(&metrics),
            event_tx.clone(),
        )));

        AppState {
            version: "0.1.0-test".into(),
            engine,
            event_tx,
            metrics,
        }
    }

    async fn send(router: &Router, req: Request<Body>) -> (StatusCode, Value) {
        let resp = router.clone().oneshot(req).await.unwrap();
        let status = resp.status();
        let body = resp.into_body().collect().await.unwrap().to_bytes();
        let json = if body.is_empty() {
            Value::Null
        } else {
            serde_json::from_slice(&body).unwrap()
        };
        (status, json)
    }

    /// Sends a GET request and returns the (status, json body).
    async fn get(router: &Router, path: &str) -> (StatusCode, Value) {
        let req = Request::builder().uri(path).body(Body::empty()).unwrap();
        send(router, req).await
    }

    /// Sends a POST request with JSON body and returns (status, json body).
    async fn post_json(router: &Router, path: &str, body: Value) -> (StatusCode, Value) {
        let req = Request::builder()
            .method("POST")
            .uri(path)
            .header("content-type", "application/json")
            .body(Body::from(serde_json::to_vec(&body).unwrap()))
            .unwrap();
        send(router, req).await
    }

    /// Creates a 2-of-3 vault owned by alice, bob and carol holding 100 SUI.
    async fn funded_vault(router: &Router) -> String {
        let (status, vault) = post_json(
            router,
            "/vaults",
            json!({ "owners": ["alice", "bob", "carol"], "threshold": 2 }),
        )
        .await;
        assert_eq!(status, StatusCode::CREATED);
        let id = vault["id"].as_str().unwrap().to_string();

        let (status, body) = post_json(
            router,
            &format!("/vaults/{id}/deposits"),
            json!({ "depositor": "alice", "asset": "SUI", "amount": 100 }),
        )
        .await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["balance"], 100);
        id
    }

    async fn propose_transfer(router: &Router, vault: &str, amount: u64) -> String {
        let (status, view) = post_json(
            router,
            &format!("/vaults/{vault}/proposals"),
            json!({
                "actor": "alice",
                "action": { "type": "transfer", "asset": "SUI", "recipient": "dave", "amount": amount },
            }),
        )
        .await;
        assert_eq!(status, StatusCode::CREATED);
        assert_eq!(view["status"], "pending");
        view["proposal"]["id"].as_str().unwrap().to_string()
    }

    #[tokio::test]
    async fn health_endpoint_returns_ok() {
        let router = create_router(test_app_state());
        let (status, body) = get(&router, "/health").await;

        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["status"], "ok");
    }

    #[tokio::test]
    async fn transfer_lifecycle_over_http() {
        let state = test_app_state();
        let metrics = Arc::clone(&state.metrics);
        let router = create_router(state);
        let v = funded_vault(&router).await;
        let p = propose_transfer(&router, &v, 40).await;
        let base = format!("/vaults/{v}/proposals/{p}");

        let (status, body) =
            post_json(&router, &format!("{base}/approve"), json!({ "actor": "alice" })).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["approvals"], 1);
        assert_eq!(body["executable"], false);

        let (status, body) =
            post_json(&router, &format!("{base}/execute"), json!({ "actor": "bob" })).await;
        assert_eq!(status, StatusCode::CONFLICT);
        assert_eq!(body["code"], "insufficient_approvals");
        assert_eq!(body["category"], "state");
        assert_eq!(body["recovery"], "repropose");

        let (_, body) =
            post_json(&router, &format!("{base}/approve"), json!({ "actor": "bob" })).await;
        assert_eq!(body["executable"], true);

        let (status, receipt) =
            post_json(&router, &format!("{base}/execute"), json!({ "actor": "carol" })).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(receipt["proposal_id"], p.as_str());

        let (_, body) = get(&router, &format!("/vaults/{v}/balances/SUI")).await;
        assert_eq!(body["balance"], 60);
        let (_, body) = get(&router, "/accounts/dave/balances/SUI").await;
        assert_eq!(body["balance"], 40);
        let (_, body) = get(&router, &format!("/proposals/{p}")).await;
        assert_eq!(body["status"], "executed");

        assert_eq!(
            metrics
                .rejections_total
                .with_label_values(&["state"])
                .get(),
            1
        );
        assert_eq!(metrics.execution_latency_seconds.get_sample_count(), 2);
    }

    #[tokio::test]
    async fn errors_map_to_status_codes() {
        let router = create_router(test_app_state());
        let v = funded_vault(&router).await;
        let p = propose_transfer(&router, &v, 10).await;
        let base = format!("/vaults/{v}/proposals/{p}");

        let (status, body) =
            post_json(&router, &format!("{base}/approve"), json!({ "actor": "mallory" })).await;
        assert_eq!(status, StatusCode::FORBIDDEN);
        assert_eq!(body["code"], "not_owner");

        let (status, body) =
            post_json(&router, &format!("{base}/cancel"), json!({ "actor": "bob" })).await;
        assert_eq!(status, StatusCode::FORBIDDEN);
        assert_eq!(body["code"], "not_proposer");

        let missing = "00000000-0000-0000-0000-000000000000";
        let (status, body) = get(&router, &format!("/vaults/{missing}")).await;
        assert_eq!(status, StatusCode::NOT_FOUND);
        assert_eq!(body["code"], "vault_not_found");

        let (status, body) = post_json(
            &router,
            "/vaults",
            json!({ "owners": ["a", "b", "c"], "threshold": 4 }),
        )
        .await;
        assert_eq!(status, StatusCode::CONFLICT);
        assert_eq!(body["category"], "configuration");

        let (status, body) = post_json(
            &router,
            &format!("/vaults/{v}/deposits"),
            json!({ "depositor": "alice", "asset": "SUI", "amount": 0 }),
        )
        .await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert_eq!(body["code"], "zero_amount");

        let (status, body) = get(&router, "/vaults/not-a-uuid").await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert_eq!(body["code"], "bad_request");
    }

    #[tokio::test]
    async fn expired_proposal_returns_gone() {
        use warden_protocol::{EngineConfig, ManualClock};

        let clock = Arc::new(ManualClock::starting_now());
        let engine = Arc::new(VaultEngine::new(EngineConfig::default(), clock.clone()));
        let mut state = test_app_state();
        state.engine = engine;
        let router = create_router(state);

        let v = funded_vault(&router).await;
        let (_, view) = post_json(
            &router,
            &format!("/vaults/{v}/proposals"),
            json!({
                "actor": "alice",
                "action": { "type": "update_threshold", "threshold": 3 },
                "expiry_secs": 1,
            }),
        )
        .await;
        let p = view["proposal"]["id"].as_str().unwrap().to_string();

        clock.advance(chrono::Duration::seconds(2));
        let (status, body) = post_json(
            &router,
            &format!("/vaults/{v}/proposals/{p}/approve"),
            json!({ "actor": "bob" }),
        )
        .await;
        assert_eq!(status, StatusCode::GONE);
        assert_eq!(body["code"], "proposal_expired");
    }

    #[tokio::test]
    async fn out_of_range_expiry_is_a_bad_request() {
        let router = create_router(test_app_state());
        let v = funded_vault(&router).await;

        for secs in [i64::MAX, i64::MIN, 0, 91 * 24 * 60 * 60] {
            let (status, body) = post_json(
                &router,
                &format!("/vaults/{v}/proposals"),
                json!({
                    "actor": "alice",
                    "action": { "type": "add_owner", "owner": "erin" },
                    "expiry_secs": secs,
                }),
            )
            .await;
            assert_eq!(status, StatusCode::BAD_REQUEST, "expiry_secs = {secs}");
            assert_eq!(body["code"], "invalid_expiry");
        }

        let (status, proposals) = get(&router, &format!("/vaults/{v}/proposals")).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(proposals.as_array().unwrap().len(), 0);
    }

    #[tokio::test]
    async fn cancelled_proposal_cannot_be_approved() {
        let router = create_router(test_app_state());
        let v = funded_vault(&router).await;
        let p = propose_transfer(&router, &v, 10).await;
        let base = format!("/vaults/{v}/proposals/{p}");

        let (status, view) =
            post_json(&router, &format!("{base}/cancel"), json!({ "actor": "alice" })).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(view["status"], "cancelled");

        let (status, body) =
            post_json(&router, &format!("{base}/approve"), json!({ "actor": "bob" })).await;
        assert_eq!(status, StatusCode::CONFLICT);
        assert_eq!(body["code"], "proposal_cancelled");
        assert_eq!(body["recovery"], "terminal");
    }

    #[tokio::test]
    async fn events_endpoint_pages_the_journal() {
        let router = create_router(test_app_state());
        let v = funded_vault(&router).await;
        propose_transfer(&router, &v, 1).await;

        let (status, events) = get(&router, "/events").await;
        assert_eq!(status, StatusCode::OK);
        let events = events.as_array().unwrap();
        assert_eq!(events.len(), 3);
        assert_eq!(events[0]["sequence"], 0);
        assert_eq!(events[1]["prev_hash"], events[0]["hash"]);

        let (_, page) = get(&router, "/events?since=1&limit=1").await;
        let page = page.as_array().unwrap();
        assert_eq!(page.len(), 1);
        assert_eq!(page[0]["sequence"], 1);
        assert!(page[0]["kind"]["deposited"].is_object());

        let (_, status) = get(&router, "/status").await;
        assert_eq!(status["vaults"], 1);
        assert_eq!(status["events"], 3);
        assert_eq!(status["last_sequence"], 2);
        assert_eq!(status["persistent"], false);
        assert_eq!(status["durable"], true);
    }

    #[tokio::test]
    async fn list_endpoints_return_vaults_and_proposals() {
        let router = create_router(test_app_state());
        let v = funded_vault(&router).await;
        propose_transfer(&router, &v, 5).await;

        let (_, vaults) = get(&router, "/vaults").await;
        assert_eq!(vaults.as_array().unwrap().len(), 1);
        let (_, proposals) = get(&router, &format!("/vaults/{v}/proposals")).await;
        let proposals = proposals.as_array().unwrap();
        assert_eq!(proposals.len(), 1);
        assert_eq!(proposals[0]["threshold"], 2);
        assert_eq!(proposals[0]["approvals"], 0);
    }
}
