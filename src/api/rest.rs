// Operator control surface (§6): strategy CRUD, explicit start/stop/pause/
// resume, emergency stop gated by a PIN, session rollover, manual position
// close, and settings import/export. Grounded on the teacher's router/CORS
// shape and its "read auth, touch state, bump version, respond" handler
// idiom — the handlers themselves are new since this engine has no
// dashboard snapshot to serve, only operator commands to execute.

use std::sync::Arc;

use axum::{
    extract::{Json, Path, State},
    http::StatusCode,
    response::IntoResponse,
    routing::{delete, get, post, put},
    Router,
};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use tower_http::cors::{Any, CorsLayer};
use tracing::{info, warn};

use crate::api::auth::AuthBearer;
use crate::app_state::AppState;
use crate::db::models::StrategyParams;
use crate::db::{orders, positions, sessions, strategy};
use crate::error::EngineError;
use crate::execution;
use crate::types::{EngineMode, OrderPurpose, Side};

pub fn router(state: Arc<AppState>) -> Router {
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any);

    Router::new()
        .route("/api/v1/health", get(health))
        .route("/api/v1/strategy", get(get_strategy))
        .route("/api/v1/strategy", post(create_strategy))
        .route("/api/v1/strategy/:id", put(update_strategy))
        .route("/api/v1/strategy/:id", delete(delete_strategy))
        .route("/api/v1/control/start", post(control_start))
        .route("/api/v1/control/stop", post(control_stop))
        .route("/api/v1/control/pause", post(control_pause))
        .route("/api/v1/control/resume", post(control_resume))
        .route("/api/v1/control/emergency-stop", post(control_emergency_stop))
        .route("/api/v1/session/new", post(new_session))
        .route("/api/v1/positions", get(list_positions))
        .route("/api/v1/positions/:symbol/:side/close", post(manual_close))
        .route("/api/v1/settings/export", get(export_settings))
        .route("/api/v1/settings/import", post(import_settings))
        .layer(cors)
        .with_state(state)
}

fn now_ms() -> i64 {
    crate::exchange::ExchangeClient::timestamp_ms() as i64
}

fn err_response(err: EngineError) -> (StatusCode, Json<serde_json::Value>) {
    let status = match &err {
        EngineError::PreconditionFailed(_) | EngineError::Duplicate(_) => StatusCode::CONFLICT,
        EngineError::Invariant(_) => StatusCode::INTERNAL_SERVER_ERROR,
        EngineError::Transient(_) => StatusCode::SERVICE_UNAVAILABLE,
        EngineError::Permanent { .. } => StatusCode::BAD_GATEWAY,
    };
    (status, Json(serde_json::json!({ "error": err.to_string() })))
}

// ── Health (public) ─────────────────────────────────────────────────

#[derive(Serialize)]
struct HealthResponse {
    status: &'static str,
    mode: String,
    server_time: i64,
}

async fn health(State(state): State<Arc<AppState>>) -> impl IntoResponse {
    Json(HealthResponse {
        status: "ok",
        mode: state.mode().await.to_string(),
        server_time: now_ms(),
    })
}

// ── Strategy CRUD ───────────────────────────────────────────────────

async fn get_strategy(
    _auth: AuthBearer,
    State(state): State<Arc<AppState>>,
) -> Result<impl IntoResponse, (StatusCode, Json<serde_json::Value>)> {
    match strategy::get_active(&state.pool).await {
        Ok(Some(row)) => Ok(Json(serde_json::json!(row.params)).into_response()),
        Ok(None) => Ok((StatusCode::NOT_FOUND, Json(serde_json::json!({ "error": "no active strategy" }))).into_response()),
        Err(err) => Err(err_response(err)),
    }
}

async fn create_strategy(
    _auth: AuthBearer,
    State(state): State<Arc<AppState>>,
    Json(params): Json<StrategyParams>,
) -> Result<impl IntoResponse, (StatusCode, Json<serde_json::Value>)> {
    let row = strategy::create(&state.pool, &params, now_ms()).await.map_err(err_response)?;
    info!(strategy_id = row.id, "strategy created via API");
    Ok(Json(row.params))
}

async fn update_strategy(
    _auth: AuthBearer,
    State(state): State<Arc<AppState>>,
    Path(id): Path<i64>,
    Json(params): Json<StrategyParams>,
) -> Result<impl IntoResponse, (StatusCode, Json<serde_json::Value>)> {
    let session = sessions::get_active(&state.pool, id).await.map_err(err_response)?;
    let row = strategy::update(&state.pool, id, &params, session.map(|s| s.id), now_ms())
        .await
        .map_err(err_response)?;
    info!(strategy_id = id, "strategy updated via API");
    Ok(Json(row.params))
}

async fn delete_strategy(
    _auth: AuthBearer,
    State(state): State<Arc<AppState>>,
    Path(id): Path<i64>,
) -> Result<impl IntoResponse, (StatusCode, Json<serde_json::Value>)> {
    strategy::delete(&state.pool, id).await.map_err(err_response)?;
    warn!(strategy_id = id, "strategy deleted via API");
    Ok(StatusCode::NO_CONTENT)
}

// ── Start / stop / pause / resume ───────────────────────────────────

#[derive(Serialize)]
struct ControlResponse {
    mode: String,
    message: String,
}

async fn control_start(
    _auth: AuthBearer,
    State(state): State<Arc<AppState>>,
) -> impl IntoResponse {
    state.arm().await;
    Json(ControlResponse { mode: EngineMode::Running.to_string(), message: "engine started".into() })
}

async fn control_stop(
    _auth: AuthBearer,
    State(state): State<Arc<AppState>>,
) -> Result<impl IntoResponse, (StatusCode, Json<serde_json::Value>)> {
    let cancelled = state.emergency_stop().await.map_err(err_response)?;
    Ok(Json(serde_json::json!({
        "mode": EngineMode::Killed.to_string(),
        "cancelled_orders": cancelled,
    })))
}

async fn control_pause(
    _auth: AuthBearer,
    State(state): State<Arc<AppState>>,
) -> Result<impl IntoResponse, (StatusCode, Json<serde_json::Value>)> {
    let Some(row) = strategy::get_active(&state.pool).await.map_err(err_response)? else {
        return Err((StatusCode::NOT_FOUND, Json(serde_json::json!({ "error": "no active strategy" }))));
    };
    let mut params = row.params;
    params.paused = true;
    let session = sessions::get_active(&state.pool, row.id).await.map_err(err_response)?;
    strategy::update(&state.pool, row.id, &params, session.map(|s| s.id), now_ms())
        .await
        .map_err(err_response)?;
    info!(strategy_id = row.id, "strategy paused via API");
    Ok(Json(ControlResponse { mode: "paused".into(), message: "strategy paused".into() }))
}

async fn control_resume(
    _auth: AuthBearer,
    State(state): State<Arc<AppState>>,
) -> Result<impl IntoResponse, (StatusCode, Json<serde_json::Value>)> {
    let Some(row) = strategy::get_active(&state.pool).await.map_err(err_response)? else {
        return Err((StatusCode::NOT_FOUND, Json(serde_json::json!({ "error": "no active strategy" }))));
    };
    let mut params = row.params;
    params.paused = false;
    let session = sessions::get_active(&state.pool, row.id).await.map_err(err_response)?;
    strategy::update(&state.pool, row.id, &params, session.map(|s| s.id), now_ms())
        .await
        .map_err(err_response)?;
    info!(strategy_id = row.id, "strategy resumed via API");
    Ok(Json(ControlResponse { mode: "resumed".into(), message: "strategy resumed".into() }))
}

// ── Emergency stop (PIN-protected) ──────────────────────────────────

#[derive(Deserialize)]
struct EmergencyStopRequest {
    pin: String,
}

async fn control_emergency_stop(
    _auth: AuthBearer,
    State(state): State<Arc<AppState>>,
    Json(req): Json<EmergencyStopRequest>,
) -> Result<impl IntoResponse, (StatusCode, Json<serde_json::Value>)> {
    if !state.emergency_pin_matches(&req.pin) {
        warn!("emergency stop rejected — PIN mismatch");
        return Err((StatusCode::FORBIDDEN, Json(serde_json::json!({ "error": "invalid PIN" }))));
    }
    let cancelled = state.emergency_stop().await.map_err(err_response)?;
    warn!(cancelled_orders = cancelled, "emergency stop executed via API");
    Ok(Json(serde_json::json!({
        "mode": EngineMode::Killed.to_string(),
        "cancelled_orders": cancelled,
    })))
}

// ── Session rollover (§6: "never deletes history") ──────────────────

async fn new_session(
    _auth: AuthBearer,
    State(state): State<Arc<AppState>>,
) -> Result<impl IntoResponse, (StatusCode, Json<serde_json::Value>)> {
    let Some(strat) = strategy::get_active(&state.pool).await.map_err(err_response)? else {
        return Err((StatusCode::NOT_FOUND, Json(serde_json::json!({ "error": "no active strategy" }))));
    };
    let starting_balance = match sessions::get_active(&state.pool, strat.id).await.map_err(err_response)? {
        Some(active) => active.current_balance,
        None => Decimal::ZERO,
    };
    let session = sessions::start_new_session(&state.pool, strat.id, starting_balance, now_ms())
        .await
        .map_err(err_response)?;
    info!(session_id = session.id, "new trade session started via API");
    Ok(Json(session))
}

// ── Positions ────────────────────────────────────────────────────────

async fn list_positions(
    _auth: AuthBearer,
    State(state): State<Arc<AppState>>,
) -> Result<impl IntoResponse, (StatusCode, Json<serde_json::Value>)> {
    let Some(strat) = strategy::get_active(&state.pool).await.map_err(err_response)? else {
        return Ok(Json(Vec::<crate::db::models::PositionRow>::new()));
    };
    let Some(session) = sessions::get_active(&state.pool, strat.id).await.map_err(err_response)? else {
        return Ok(Json(Vec::new()));
    };
    let open = positions::list_open(&state.pool, session.id).await.map_err(err_response)?;
    Ok(Json(open))
}

fn parse_side(raw: &str) -> Result<Side, (StatusCode, Json<serde_json::Value>)> {
    match raw.to_lowercase().as_str() {
        "long" => Ok(Side::Long),
        "short" => Ok(Side::Short),
        _ => Err((StatusCode::BAD_REQUEST, Json(serde_json::json!({ "error": "side must be 'long' or 'short'" })))),
    }
}

/// Manual close (§6): operator closes a single open position at the current
/// market price, bypassing the strategy's own exit logic entirely.
async fn manual_close(
    _auth: AuthBearer,
    State(state): State<Arc<AppState>>,
    Path((symbol, side)): Path<(String, String)>,
) -> Result<impl IntoResponse, (StatusCode, Json<serde_json::Value>)> {
    let side = parse_side(&side)?;
    let Some(strat) = strategy::get_active(&state.pool).await.map_err(err_response)? else {
        return Err((StatusCode::NOT_FOUND, Json(serde_json::json!({ "error": "no active strategy" }))));
    };
    let Some(session) = sessions::get_active(&state.pool, strat.id).await.map_err(err_response)? else {
        return Err((StatusCode::NOT_FOUND, Json(serde_json::json!({ "error": "no active session" }))));
    };
    let Some(position) = positions::get_open(&state.pool, session.id, &symbol, side).await.map_err(err_response)? else {
        return Err((StatusCode::NOT_FOUND, Json(serde_json::json!({ "error": "no open position for symbol/side" }))));
    };

    let prices = state.exchange.get_all_ticker_prices().await.map_err(err_response)?;
    let Some((_, price)) = prices.into_iter().find(|(sym, _)| sym == &symbol) else {
        return Err((StatusCode::SERVICE_UNAVAILABLE, Json(serde_json::json!({ "error": "no ticker price available" }))));
    };

    let response = execution::submit_manual_close(&state.exchange, &symbol, side, position.quantity, price)
        .await
        .map_err(err_response)?;

    orders::create(
        &state.pool,
        &response.venue_order_id,
        session.id,
        Some(position.id),
        &symbol,
        side,
        OrderPurpose::ManualClose,
        crate::types::OrderType::Limit,
        Some(price),
        position.quantity,
        None,
        now_ms(),
    )
    .await
    .map_err(err_response)?;

    warn!(%symbol, %side, position_id = position.id, "manual close submitted via API");
    Ok(Json(serde_json::json!({ "order_id": response.venue_order_id, "price": price })))
}

// ── Settings import/export ───────────────────────────────────────────

async fn export_settings(
    _auth: AuthBearer,
    State(state): State<Arc<AppState>>,
) -> Result<impl IntoResponse, (StatusCode, Json<serde_json::Value>)> {
    let Some(row) = strategy::get_active(&state.pool).await.map_err(err_response)? else {
        return Err((StatusCode::NOT_FOUND, Json(serde_json::json!({ "error": "no active strategy" }))));
    };
    Ok(Json(row.params))
}

async fn import_settings(
    _auth: AuthBearer,
    State(state): State<Arc<AppState>>,
    Json(params): Json<StrategyParams>,
) -> Result<impl IntoResponse, (StatusCode, Json<serde_json::Value>)> {
    let row = match strategy::get_active(&state.pool).await.map_err(err_response)? {
        Some(existing) => {
            let session = sessions::get_active(&state.pool, existing.id).await.map_err(err_response)?;
            strategy::update(&state.pool, existing.id, &params, session.map(|s| s.id), now_ms())
                .await
                .map_err(err_response)?
        }
        None => strategy::create(&state.pool, &params, now_ms()).await.map_err(err_response)?,
    };
    info!(strategy_id = row.id, "settings imported via API");
    Ok(Json(row.params))
}
