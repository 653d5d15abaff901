//! REST API endpoints for the airstation-service.
//!
//! # Endpoints
//!
//! - `GET /api/health` - Service health check
//! - `GET /api/status` - Evaluation, persistence and alarm state
//! - `GET /api/readings/{kind}?window_secs=N` - Windowed history, oldest first
//! - `GET /api/readings/{kind}/latest` - Most recent stored reading
//! - `GET /api/readings/{kind}/stats?window_secs=N` - Window aggregates
//! - `GET /api/thresholds`, `PUT /api/thresholds` - Alert thresholds
//!
//! `{kind}` accepts the storage name (`pm25`, `co`, ...) or the display
//! label (`PM2.5`). Errors are returned as `{"error": "..."}` via [`AppError`].

use std::sync::Arc;
use std::time::Duration;

use axum::{
    Json, Router,
    extract::{Path, Query, State},
    http::StatusCode,
    response::IntoResponse,
    routing::get,
};
use serde::{Deserialize, Serialize};
use time::OffsetDateTime;

use airstation_core::{
    AlarmSession, HistoryStore, PersistedReading, PersistenceStats, QualityLevel, SensorKind,
    ThresholdConfig, window_start,
};

use crate::scheduler::EvaluationStatus;
use crate::state::AppState;

/// Create the API router.
pub fn router() -> Router<Arc<AppState>> {
    Router::new()
        .route("/api/health", get(health))
        .route("/api/status", get(get_status))
        .route("/api/readings/{kind}", get(get_readings))
        .route("/api/readings/{kind}/latest", get(get_latest))
        .route("/api/readings/{kind}/stats", get(get_stats))
        .route("/api/thresholds", get(get_thresholds).put(update_thresholds))
}

/// Health check response.
#[derive(Debug, Serialize)]
pub struct HealthResponse {
    pub status: &'static str,
    pub version: &'static str,
    #[serde(with = "time::serde::rfc3339")]
    pub timestamp: OffsetDateTime,
}

async fn health() -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "ok",
        version: env!("CARGO_PKG_VERSION"),
        timestamp: OffsetDateTime::now_utc(),
    })
}

/// Service status.
#[derive(Debug, Serialize)]
pub struct StatusResponse {
    pub version: &'static str,
    /// Alert evaluation loop.
    pub evaluation: EvaluationStatus,
    /// Persistence counters, absent when no monitor is running.
    pub persistence: Option<PersistenceStats>,
    /// The sounding alarm, if any.
    pub alarm: Option<AlarmSession>,
    /// Rows in the history database.
    pub stored_readings: u64,
    /// Connected WebSocket clients.
    pub live_clients: usize,
}

async fn get_status(State(state): State<Arc<AppState>>) -> Result<Json<StatusResponse>, AppError> {
    let stored_readings = state.history.lock().await.count(None)?;

    Ok(Json(StatusResponse {
        version: env!("CARGO_PKG_VERSION"),
        evaluation: state.evaluation.status(),
        persistence: state.persistence().map(|p| p.stats()),
        alarm: state.alarm().and_then(|a| a.active_session()),
        stored_readings,
        live_clients: state.readings_tx.receiver_count(),
    }))
}

/// Query parameters for windowed endpoints.
#[derive(Debug, Deserialize, Default)]
pub struct WindowQuery {
    /// Window length in seconds; defaults to the monitor's history window.
    pub window_secs: Option<u64>,
}

impl WindowQuery {
    /// The requested window, or `default_secs` when absent.
    pub fn window(&self, default_secs: u64) -> Result<Duration, AppError> {
        match self.window_secs.unwrap_or(default_secs) {
            0 => Err(AppError::BadRequest(
                "window_secs must be greater than 0".to_string(),
            )),
            secs => Ok(Duration::from_secs(secs)),
        }
    }
}

/// A stored reading with its unit and quality level.
#[derive(Debug, Serialize)]
pub struct ReadingView {
    pub id: i64,
    pub kind: SensorKind,
    pub value: f64,
    pub unit: &'static str,
    pub quality: QualityLevel,
    #[serde(with = "time::serde::rfc3339")]
    pub timestamp: OffsetDateTime,
}

impl From<PersistedReading> for ReadingView {
    fn from(row: PersistedReading) -> Self {
        let reading = row.reading;
        Self {
            id: row.id,
            kind: reading.kind,
            value: reading.value,
            unit: reading.unit(),
            quality: QualityLevel::of(&reading),
            timestamp: reading.timestamp,
        }
    }
}

/// Windowed history response.
#[derive(Debug, Serialize)]
pub struct ReadingsResponse {
    pub kind: SensorKind,
    pub unit: &'static str,
    pub window_secs: u64,
    pub count: usize,
    pub readings: Vec<ReadingView>,
}

fn parse_kind(raw: &str) -> Result<SensorKind, AppError> {
    raw.parse()
        .map_err(|_| AppError::BadRequest(format!("Unknown sensor kind: {}", raw)))
}

async fn get_readings(
    State(state): State<Arc<AppState>>,
    Path(kind): Path<String>,
    Query(params): Query<WindowQuery>,
) -> Result<Json<ReadingsResponse>, AppError> {
    let kind = parse_kind(&kind)?;
    let window = params.window(state.config.monitor.history_window_secs)?;

    let since = window_start(OffsetDateTime::now_utc(), window);
    let rows = state.history.query_since(kind, since).await?;
    let readings: Vec<ReadingView> = rows.into_iter().map(ReadingView::from).collect();

    Ok(Json(ReadingsResponse {
        kind,
        unit: kind.unit(),
        window_secs: window.as_secs(),
        count: readings.len(),
        readings,
    }))
}

async fn get_latest(
    State(state): State<Arc<AppState>>,
    Path(kind): Path<String>,
) -> Result<Json<ReadingView>, AppError> {
    let kind = parse_kind(&kind)?;
    let latest = state
        .history
        .latest(kind)
        .await?
        .ok_or_else(|| AppError::NotFound(format!("No readings for {}", kind)))?;
    Ok(Json(latest.into()))
}

/// Aggregates over a window.
#[derive(Debug, Serialize)]
pub struct StatsResponse {
    pub kind: SensorKind,
    pub unit: &'static str,
    pub window_secs: u64,
    pub count: u64,
    pub min: Option<f64>,
    pub max: Option<f64>,
    pub avg: Option<f64>,
    /// Quality level of the window mean.
    pub quality: Option<QualityLevel>,
}

async fn get_stats(
    State(state): State<Arc<AppState>>,
    Path(kind): Path<String>,
    Query(params): Query<WindowQuery>,
) -> Result<Json<StatsResponse>, AppError> {
    let kind = parse_kind(&kind)?;
    let window = params.window(state.config.monitor.history_window_secs)?;

    let since = window_start(OffsetDateTime::now_utc(), window);
    let stats = state.history.lock().await.stats(kind, since)?;

    Ok(Json(StatsResponse {
        kind,
        unit: kind.unit(),
        window_secs: window.as_secs(),
        count: stats.count,
        min: stats.min,
        max: stats.max,
        avg: stats.avg,
        quality: stats.avg.map(|avg| airstation_core::classify(kind, avg)),
    }))
}

async fn get_thresholds(State(state): State<Arc<AppState>>) -> Json<ThresholdConfig> {
    Json(state.preferences.snapshot())
}

/// Partial threshold update; omitted fields keep their value.
#[derive(Debug, Default, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ThresholdUpdate {
    pub pm25_threshold: Option<f64>,
    pub co_threshold: Option<f64>,
    pub notifications_enabled: Option<bool>,
}

impl ThresholdUpdate {
    fn apply(&self, config: &mut ThresholdConfig) {
        if let Some(value) = self.pm25_threshold {
            config.pm25_threshold = value;
        }
        if let Some(value) = self.co_threshold {
            config.co_threshold = value;
        }
        if let Some(enabled) = self.notifications_enabled {
            config.notifications_enabled = enabled;
        }
    }
}

/// Validate, persist and publish a threshold change.
///
/// The new values apply from the next evaluation tick.
async fn update_thresholds(
    State(state): State<Arc<AppState>>,
    Json(update): Json<ThresholdUpdate>,
) -> Result<Json<ThresholdConfig>, AppError> {
    let updated = state.preferences.update(|config| update.apply(config)).await?;
    tracing::info!(
        "Thresholds updated: PM2.5 > {}, CO > {}, notifications {}",
        updated.pm25_threshold,
        updated.co_threshold,
        if updated.notifications_enabled { "on" } else { "off" }
    );
    Ok(Json(updated))
}

/// Application error type.
#[derive(Debug)]
pub enum AppError {
    NotFound(String),
    BadRequest(String),
    Core(airstation_core::Error),
    Store(airstation_store::Error),
}

impl From<airstation_core::Error> for AppError {
    fn from(e: airstation_core::Error) -> Self {
        AppError::Core(e)
    }
}

impl From<airstation_store::Error> for AppError {
    fn from(e: airstation_store::Error) -> Self {
        AppError::Store(e)
    }
}

impl IntoResponse for AppError {
    fn into_response(self) -> axum::response::Response {
        let (status, message) = match self {
            AppError::NotFound(msg) => (StatusCode::NOT_FOUND, msg),
            AppError::BadRequest(msg) => (StatusCode::BAD_REQUEST, msg),
            AppError::Core(e @ airstation_core::Error::InvalidConfig(_)) => {
                (StatusCode::BAD_REQUEST, e.to_string())
            }
            AppError::Core(e) if e.is_retryable() => {
                (StatusCode::SERVICE_UNAVAILABLE, e.to_string())
            }
            AppError::Core(e) => (StatusCode::INTERNAL_SERVER_ERROR, e.to_string()),
            AppError::Store(e) => (StatusCode::INTERNAL_SERVER_ERROR, e.to_string()),
        };

        let body = serde_json::json!({
            "error": message,
        });

        (status, Json(body)).into_response()
    }
}
