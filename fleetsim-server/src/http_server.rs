//! HTTP server for the fleet dashboard
//!
//! REST API under `/api/v1`:
//! - Inventory: devices, fleet summary
//! - Rollouts: list, active, delete, intro marker
//! - Update wizard: edit, navigate, compatibility check, submit
//! - Activity log and login session
//!
//! Reads are open; anything that mutates state requires a logged-in session.

use std::sync::Arc;
use std::time::Duration;

use axum::{
    extract::{Path, Query, State},
    http::{Method, StatusCode},
    response::Json,
    routing::{get, post},
    Router,
};
use chrono::Utc;
use fleetsim_core::{
    inventory, version::Compatibility, AuthGate, DevicePage, DeviceQuery, Event, EventCategory,
    EventLevel, EventLog, FleetError, FleetSummary, Navigation, ReviewSummary, Rollout, RolloutId,
    SharedStore, UserSession, ValidationErrors, WizardData, WizardSession,
};
use serde::{Deserialize, Serialize};
use tokio::sync::RwLock;
use tower_http::{
    cors::{Any, CorsLayer},
    trace::TraceLayer,
};
use tracing::{debug, info};

/// Shared state for HTTP handlers
pub struct AppState {
    /// The fleet store, shared with the simulation ticker
    pub store: SharedStore,
    /// Login gate
    pub auth: RwLock<AuthGate>,
    /// Activity log
    pub events: Arc<EventLog>,
    /// Simulated latency of the wizard compatibility check
    pub compatibility_delay: Duration,
}

// ============================================================================
// API Response Types
// ============================================================================

#[derive(Serialize)]
struct ApiError {
    error: String,
    message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    fields: Option<ValidationErrors>,
}

impl ApiError {
    fn new(error: &str, message: &str) -> Self {
        Self {
            error: error.to_string(),
            message: message.to_string(),
            fields: None,
        }
    }
}

type ApiFailure = (StatusCode, Json<ApiError>);
type ApiResult<T> = Result<Json<T>, ApiFailure>;

/// Map a store error to a status code and error body.
fn fleet_error(e: FleetError) -> ApiFailure {
    match e {
        FleetError::RolloutNotFound(_) | FleetError::DeviceNotFound(_) => {
            (StatusCode::NOT_FOUND, Json(ApiError::new("not_found", &e.to_string())))
        }
        FleetError::Validation(errors) => (
            StatusCode::UNPROCESSABLE_ENTITY,
            Json(ApiError {
                error: "validation_failed".to_string(),
                message: "Please fix the highlighted fields".to_string(),
                fields: Some(errors),
            }),
        ),
        FleetError::InvalidCredentials => (
            StatusCode::UNAUTHORIZED,
            Json(ApiError::new("invalid_credentials", &e.to_string())),
        ),
        other => (
            StatusCode::INTERNAL_SERVER_ERROR,
            Json(ApiError::new("internal_error", &other.to_string())),
        ),
    }
}

fn unauthorized() -> ApiFailure {
    (
        StatusCode::UNAUTHORIZED,
        Json(ApiError::new("unauthorized", "Login required")),
    )
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct HealthResponse {
    status: &'static str,
    version: &'static str,
    devices: usize,
    rollouts: usize,
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct RolloutListResponse {
    rollouts: Vec<Rollout>,
    total_count: usize,
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct ActiveRolloutResponse {
    rollout: Option<Rollout>,
    /// Whether the intro animation for this rollout already played
    intro_played: bool,
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct IntroResponse {
    rollout_id: RolloutId,
    /// True only the first time the intro is marked
    first_play: bool,
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct WizardResponse {
    step: usize,
    step_title: &'static str,
    data: WizardData,
    /// Errors currently blocking the next step
    errors: ValidationErrors,
}

impl From<&WizardSession> for WizardResponse {
    fn from(session: &WizardSession) -> Self {
        Self {
            step: session.step.index(),
            step_title: session.step.title(),
            data: session.data.clone(),
            errors: session.current_errors(),
        }
    }
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct NavigationResponse {
    #[serde(flatten)]
    navigation: Navigation,
    wizard: WizardResponse,
}

#[derive(Deserialize)]
struct EventQuery {
    level: Option<String>,
    category: Option<String>,
    limit: Option<usize>,
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct EventListResponse {
    events: Vec<Event>,
    total_count: usize,
}

#[derive(Deserialize)]
struct LoginRequest {
    username: String,
    password: String,
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct SessionResponse {
    authenticated: bool,
    session: Option<UserSession>,
}

// ============================================================================
// Router
// ============================================================================

/// Build the application router with all routes
pub fn build_router(state: Arc<AppState>) -> Router {
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods([Method::GET, Method::POST, Method::PUT, Method::DELETE, Method::OPTIONS])
        .allow_headers(Any);

    let api_routes = Router::new()
        .route("/health", get(health))
        // Inventory
        .route("/devices", get(list_devices))
        .route("/devices/:device_id", get(get_device))
        .route("/fleet/summary", get(fleet_summary))
        // Rollouts
        .route("/rollouts", get(list_rollouts))
        .route("/rollouts/active", get(get_active_rollout))
        .route("/rollouts/:rollout_id", get(get_rollout).delete(delete_rollout))
        .route("/rollouts/:rollout_id/intro", post(mark_intro_played))
        // Update wizard
        .route("/wizard", get(get_wizard).put(update_wizard).delete(reset_wizard))
        .route("/wizard/compatibility", post(check_compatibility))
        .route("/wizard/next", post(wizard_next))
        .route("/wizard/back", post(wizard_back))
        .route("/wizard/summary", get(wizard_summary))
        .route("/wizard/submit", post(submit_wizard))
        // Activity
        .route("/events", get(list_events))
        // Session
        .route("/auth/login", post(login))
        .route("/auth/logout", post(logout))
        .route("/auth/session", get(get_session));

    Router::new()
        .nest("/api/v1", api_routes)
        .with_state(state)
        .layer(cors)
        .layer(TraceLayer::new_for_http())
}

/// Reject the request unless an operator is logged in.
async fn require_session(state: &AppState) -> Result<(), ApiFailure> {
    if state.auth.read().await.is_authenticated() {
        Ok(())
    } else {
        Err(unauthorized())
    }
}

// ============================================================================
// Inventory Handlers
// ============================================================================

/// GET /api/v1/health
async fn health(State(state): State<Arc<AppState>>) -> Json<HealthResponse> {
    let store = state.store.read().await;
    Json(HealthResponse {
        status: "ok",
        version: env!("CARGO_PKG_VERSION"),
        devices: store.devices().len(),
        rollouts: store.rollouts().len(),
    })
}

/// GET /api/v1/devices - Search and filter the inventory
async fn list_devices(
    State(state): State<Arc<AppState>>,
    Query(query): Query<DeviceQuery>,
) -> Json<DevicePage> {
    let devices = state.store.read().await.devices();
    Json(inventory::query_devices(&devices, &query))
}

/// GET /api/v1/devices/:device_id
async fn get_device(
    State(state): State<Arc<AppState>>,
    Path(device_id): Path<String>,
) -> ApiResult<fleetsim_core::Device> {
    state
        .store
        .read()
        .await
        .device(&device_id)
        .map(Json)
        .map_err(fleet_error)
}

/// GET /api/v1/fleet/summary - Dashboard KPIs
async fn fleet_summary(State(state): State<Arc<AppState>>) -> Json<FleetSummary> {
    let (devices, rollouts) = {
        let store = state.store.read().await;
        (store.devices(), store.rollouts())
    };
    Json(inventory::fleet_summary(&devices, &rollouts))
}

// ============================================================================
// Rollout Handlers
// ============================================================================

/// GET /api/v1/rollouts
async fn list_rollouts(State(state): State<Arc<AppState>>) -> Json<RolloutListResponse> {
    let rollouts = state.store.read().await.rollouts();
    Json(RolloutListResponse {
        total_count: rollouts.len(),
        rollouts: rollouts.as_ref().clone(),
    })
}

/// GET /api/v1/rollouts/active - The featured rollout, if any
async fn get_active_rollout(State(state): State<Arc<AppState>>) -> Json<ActiveRolloutResponse> {
    let store = state.store.read().await;
    let rollout = store.active_rollout();
    let intro_played = rollout.as_ref().map_or(false, |r| store.intro_played(r.id));
    Json(ActiveRolloutResponse {
        rollout,
        intro_played,
    })
}

/// GET /api/v1/rollouts/:rollout_id
async fn get_rollout(
    State(state): State<Arc<AppState>>,
    Path(rollout_id): Path<RolloutId>,
) -> ApiResult<Rollout> {
    state
        .store
        .read()
        .await
        .rollout(rollout_id)
        .map(Json)
        .map_err(fleet_error)
}

/// DELETE /api/v1/rollouts/:rollout_id
async fn delete_rollout(
    State(state): State<Arc<AppState>>,
    Path(rollout_id): Path<RolloutId>,
) -> Result<StatusCode, ApiFailure> {
    require_session(&state).await?;
    state
        .store
        .write()
        .await
        .delete_rollout(rollout_id)
        .map(|_| StatusCode::NO_CONTENT)
        .map_err(fleet_error)
}

/// POST /api/v1/rollouts/:rollout_id/intro - Mark the intro animation as played
async fn mark_intro_played(
    State(state): State<Arc<AppState>>,
    Path(rollout_id): Path<RolloutId>,
) -> ApiResult<IntroResponse> {
    require_session(&state).await?;
    let first_play = state
        .store
        .write()
        .await
        .mark_intro_played(rollout_id)
        .map_err(fleet_error)?;
    Ok(Json(IntroResponse {
        rollout_id,
        first_play,
    }))
}

// ============================================================================
// Wizard Handlers
// ============================================================================

/// GET /api/v1/wizard
async fn get_wizard(State(state): State<Arc<AppState>>) -> Json<WizardResponse> {
    let store = state.store.read().await;
    Json(WizardResponse::from(store.wizard()))
}

/// PUT /api/v1/wizard - Replace the form data
async fn update_wizard(
    State(state): State<Arc<AppState>>,
    Json(data): Json<WizardData>,
) -> ApiResult<WizardResponse> {
    require_session(&state).await?;
    let mut store = state.store.write().await;
    Ok(Json(WizardResponse::from(store.update_wizard(data))))
}

/// DELETE /api/v1/wizard - Abandon the session
async fn reset_wizard(State(state): State<Arc<AppState>>) -> Result<StatusCode, ApiFailure> {
    require_session(&state).await?;
    state.store.write().await.reset_wizard();
    Ok(StatusCode::NO_CONTENT)
}

/// POST /api/v1/wizard/compatibility - Run the compatibility check
async fn check_compatibility(State(state): State<Arc<AppState>>) -> ApiResult<Compatibility> {
    require_session(&state).await?;
    // Simulated check latency, outside the store lock
    tokio::time::sleep(state.compatibility_delay).await;
    let result = state.store.write().await.check_compatibility();
    debug!(compatible = result.is_compatible, "Compatibility check finished");
    Ok(Json(result))
}

/// POST /api/v1/wizard/next - Validate the current step and advance
async fn wizard_next(State(state): State<Arc<AppState>>) -> ApiResult<NavigationResponse> {
    require_session(&state).await?;
    let mut store = state.store.write().await;
    let navigation = store.wizard_next().map_err(fleet_error)?;
    Ok(Json(NavigationResponse {
        navigation,
        wizard: WizardResponse::from(store.wizard()),
    }))
}

/// POST /api/v1/wizard/back
async fn wizard_back(State(state): State<Arc<AppState>>) -> ApiResult<WizardResponse> {
    require_session(&state).await?;
    let mut store = state.store.write().await;
    store.wizard_back();
    Ok(Json(WizardResponse::from(store.wizard())))
}

/// GET /api/v1/wizard/summary - Impact estimate for the review step
async fn wizard_summary(State(state): State<Arc<AppState>>) -> Json<ReviewSummary> {
    Json(state.store.read().await.review_summary())
}

/// POST /api/v1/wizard/submit - Create the rollout
async fn submit_wizard(
    State(state): State<Arc<AppState>>,
) -> Result<(StatusCode, Json<Rollout>), ApiFailure> {
    require_session(&state).await?;
    let rollout = state
        .store
        .write()
        .await
        .submit_wizard(Utc::now())
        .map_err(fleet_error)?;
    info!(rollout_id = %rollout.id, devices = rollout.aggregates.total_devices, "Rollout submitted");
    Ok((StatusCode::CREATED, Json(rollout)))
}

// ============================================================================
// Activity Handlers
// ============================================================================

/// GET /api/v1/events - Activity log, newest first
async fn list_events(
    State(state): State<Arc<AppState>>,
    Query(query): Query<EventQuery>,
) -> Json<EventListResponse> {
    let level = query.level.as_deref().map(EventLevel::from);
    let category = query.category.as_deref().map(EventCategory::from);
    let events = state.events.query(level, category, query.limit);
    Json(EventListResponse {
        total_count: events.len(),
        events,
    })
}

// ============================================================================
// Session Handlers
// ============================================================================

/// POST /api/v1/auth/login
async fn login(
    State(state): State<Arc<AppState>>,
    Json(request): Json<LoginRequest>,
) -> ApiResult<UserSession> {
    state
        .auth
        .write()
        .await
        .login(&request.username, &request.password, Utc::now())
        .map(Json)
        .map_err(fleet_error)
}

/// POST /api/v1/auth/logout
async fn logout(State(state): State<Arc<AppState>>) -> StatusCode {
    state.auth.write().await.logout();
    StatusCode::NO_CONTENT
}

/// GET /api/v1/auth/session
async fn get_session(State(state): State<Arc<AppState>>) -> Json<SessionResponse> {
    let session = state.auth.read().await.session().cloned();
    Json(SessionResponse {
        authenticated: session.is_some(),
        session,
    })
}
