use std::sync::Arc;
use std::time::Duration;

use axum::{
    extract::{DefaultBodyLimit, Query, State},
    http::{header, Method, StatusCode},
    response::IntoResponse,
    routing::{get, post},
    Json, Router,
};
use base64::Engine;
use chrono::{Datelike, Utc};
use serde::{Deserialize, Serialize};
use tower_http::cors::{Any, CorsLayer};
use tracing::{info, warn};
use vision_assessor::{assess, merge, VisualAssessment};

mod engine;
mod model;
mod sources;

use engine::{CoefficientTables, ValuationEngine};
use model::{GeoPoint, ManualOverrides, MarketStats, ParcelRecord, ValuationResult};
use sources::{EnergySource, HttpProvider, MarketSource, ParcelSource};

/// Photos accepted per multi-photo request.
const MAX_PHOTOS: usize = 10;
/// Accepted market search radii, in meters.
const RADIUS_BOUNDS_M: (u32, u32) = (50, 5000);

const PARCEL_TIMEOUT: Duration = Duration::from_secs(30);
const MARKET_TIMEOUT: Duration = Duration::from_secs(30);
const ENERGY_TIMEOUT: Duration = Duration::from_secs(20);

pub struct AppState {
    parcel: ParcelSource<HttpProvider>,
    market: MarketSource<HttpProvider>,
    energy: EnergySource<HttpProvider>,
    engine: ValuationEngine,
}

#[derive(Debug, Serialize)]
struct ErrorResponse {
    error: String,
    message: String,
}

type ApiError = (StatusCode, Json<ErrorResponse>);

fn bad_request(error: &str, message: impl Into<String>) -> ApiError {
    (
        StatusCode::BAD_REQUEST,
        Json(ErrorResponse {
            error: error.to_string(),
            message: message.into(),
        }),
    )
}

#[derive(Debug, Serialize)]
struct HealthResponse {
    status: String,
    version: String,
}

async fn health_check() -> impl IntoResponse {
    Json(HealthResponse {
        status: "healthy".to_string(),
        version: env!("CARGO_PKG_VERSION").to_string(),
    })
}

#[derive(Debug, Deserialize)]
struct EstimateRequest {
    latitude: f64,
    longitude: f64,
    image_base64: String,
}

#[derive(Debug, Deserialize)]
struct MultiEstimateRequest {
    latitude: f64,
    longitude: f64,
    images_base64: Vec<String>,
    #[serde(default)]
    manual_overrides: Option<ManualOverrides>,
}

#[derive(Debug, Deserialize)]
struct LocationQuery {
    latitude: f64,
    longitude: f64,
}

#[derive(Debug, Deserialize)]
struct MarketQuery {
    latitude: f64,
    longitude: f64,
    radius_m: Option<u32>,
}

fn validated_location(latitude: f64, longitude: f64) -> Result<GeoPoint, ApiError> {
    let location = GeoPoint {
        latitude,
        longitude,
    };
    if !location.is_valid() {
        return Err(bad_request(
            "INVALID_COORDINATES",
            format!("coordinates ({latitude}, {longitude}) are out of range"),
        ));
    }
    Ok(location)
}

/// Decode a base64 photo, tolerating a `data:image/...;base64,` prefix.
fn decode_photo(payload: &str) -> Result<Vec<u8>, ApiError> {
    let raw = match payload.split_once(";base64,") {
        Some((_, tail)) => tail,
        None => payload,
    };
    base64::engine::general_purpose::STANDARD
        .decode(raw.trim())
        .map_err(|e| bad_request("INVALID_IMAGE", format!("image is not valid base64: {e}")))
}

/// Decode a batch of photos, skipping entries that are not valid base64.
/// Callers reject the request only when nothing survives.
fn decode_usable_photos(payloads: &[String]) -> Vec<Vec<u8>> {
    payloads
        .iter()
        .filter_map(|payload| match decode_photo(payload) {
            Ok(bytes) => Some(bytes),
            Err(_) => {
                warn!("skipping photo that is not valid base64");
                None
            }
        })
        .collect()
}

/// Run the full pipeline: the three source fetches run concurrently, then
/// the engine fuses them with the already-computed visual assessment.
async fn run_pipeline(
    state: &AppState,
    location: GeoPoint,
    vision: VisualAssessment,
    overrides: Option<&ManualOverrides>,
    multi_photo: bool,
) -> ValuationResult {
    let now = Utc::now();
    let (mut parcel, market, energy) = tokio::join!(
        state.parcel.fetch(location),
        state.market.fetch(location, now.date_naive()),
        state.energy.fetch(location),
    );

    if let Some(overrides) = overrides {
        parcel = parcel.with_overrides(overrides);
    }

    state
        .engine
        .calculate(&parcel, &market, &vision, energy.as_ref(), multi_photo, now.month())
}

async fn estimate_handler(
    State(state): State<Arc<AppState>>,
    Json(request): Json<EstimateRequest>,
) -> Result<Json<ValuationResult>, ApiError> {
    let location = validated_location(request.latitude, request.longitude)?;
    let bytes = decode_photo(&request.image_base64)?;

    let vision = assess(&bytes);
    info!(
        latitude = location.latitude,
        longitude = location.longitude,
        confidence = vision.confidence,
        "single-photo estimate requested"
    );

    let result = run_pipeline(&state, location, vision, None, false).await;
    Ok(Json(result))
}

async fn multi_estimate_handler(
    State(state): State<Arc<AppState>>,
    Json(request): Json<MultiEstimateRequest>,
) -> Result<Json<ValuationResult>, ApiError> {
    let location = validated_location(request.latitude, request.longitude)?;

    if request.images_base64.is_empty() {
        return Err(bad_request("NO_IMAGES", "at least one photo is required"));
    }
    if request.images_base64.len() > MAX_PHOTOS {
        return Err(bad_request(
            "TOO_MANY_IMAGES",
            format!("at most {MAX_PHOTOS} photos are accepted"),
        ));
    }

    let photos = decode_usable_photos(&request.images_base64);
    if photos.is_empty() {
        return Err(bad_request("INVALID_IMAGE", "no photo could be decoded"));
    }

    let assessments: Vec<_> = photos.iter().map(|bytes| assess(bytes)).collect();
    let multi_photo = assessments.len() > 1;
    let vision = merge(&assessments);

    info!(
        latitude = location.latitude,
        longitude = location.longitude,
        photos = assessments.len(),
        confidence = vision.confidence,
        "multi-photo estimate requested"
    );

    let result = run_pipeline(
        &state,
        location,
        vision,
        request.manual_overrides.as_ref(),
        multi_photo,
    )
    .await;
    Ok(Json(result))
}

async fn parcel_handler(
    State(state): State<Arc<AppState>>,
    Query(query): Query<LocationQuery>,
) -> Result<Json<ParcelRecord>, ApiError> {
    let location = validated_location(query.latitude, query.longitude)?;
    Ok(Json(state.parcel.fetch(location).await))
}

async fn market_handler(
    State(state): State<Arc<AppState>>,
    Query(query): Query<MarketQuery>,
) -> Result<Json<MarketStats>, ApiError> {
    let location = validated_location(query.latitude, query.longitude)?;

    let radius_m = query.radius_m.unwrap_or(sources::market::DEFAULT_RADIUS_M);
    if radius_m < RADIUS_BOUNDS_M.0 || radius_m > RADIUS_BOUNDS_M.1 {
        return Err(bad_request(
            "INVALID_RADIUS",
            format!(
                "radius_m must be between {} and {}",
                RADIUS_BOUNDS_M.0, RADIUS_BOUNDS_M.1
            ),
        ));
    }

    let stats = state
        .market
        .fetch_with(
            location,
            radius_m,
            sources::market::DEFAULT_LOOKBACK_MONTHS,
            Utc::now().date_naive(),
        )
        .await;
    Ok(Json(stats))
}

pub fn create_app(state: Arc<AppState>) -> Router {
    // Configure CORS from environment or use localhost for development
    let allowed_origins = std::env::var("ALLOWED_ORIGINS")
        .unwrap_or_else(|_| "http://localhost:8080,http://127.0.0.1:8080".to_string());

    let origins: Vec<_> = allowed_origins
        .split(',')
        .filter_map(|s| s.trim().parse().ok())
        .collect();

    let cors = if origins.is_empty() {
        CorsLayer::new()
            .allow_origin(Any)
            .allow_methods([Method::GET, Method::POST])
            .allow_headers([header::CONTENT_TYPE])
    } else {
        CorsLayer::new()
            .allow_origin(origins)
            .allow_methods([Method::GET, Method::POST])
            .allow_headers([header::CONTENT_TYPE])
    };

    Router::new()
        .route("/health", get(health_check))
        .route("/estimate", post(estimate_handler))
        .route("/estimate/multi", post(multi_estimate_handler))
        .route("/parcel", get(parcel_handler))
        .route("/market", get(market_handler))
        .layer(DefaultBodyLimit::max(10 * 1024 * 1024)) // 10MB max for images
        .layer(cors)
        .with_state(state)
}

fn build_state() -> anyhow::Result<Arc<AppState>> {
    Ok(Arc::new(AppState {
        parcel: ParcelSource::new(HttpProvider::new(PARCEL_TIMEOUT)?),
        market: MarketSource::new(HttpProvider::new(MARKET_TIMEOUT)?),
        energy: EnergySource::new(HttpProvider::new(ENERGY_TIMEOUT)?),
        engine: ValuationEngine::new(CoefficientTables::default()),
    }))
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .init();

    info!("Starting valuation backend");

    let app = create_app(build_state()?);

    let addr = std::env::var("BIND_ADDR").unwrap_or_else(|_| "0.0.0.0:3000".to_string());
    info!("Server listening on {}", addr);

    let listener = tokio::net::TcpListener::bind(&addr).await?;
    axum::serve(listener, app).await?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn coordinates_are_validated_at_the_boundary() {
        assert!(validated_location(48.85, 2.35).is_ok());
        assert!(validated_location(90.5, 2.35).is_err());
        assert!(validated_location(48.85, -181.0).is_err());
    }

    #[test]
    fn decode_photo_accepts_raw_and_data_url_payloads() {
        let encoded = base64::engine::general_purpose::STANDARD.encode(b"pixels");
        assert_eq!(decode_photo(&encoded).unwrap(), b"pixels");

        let data_url = format!("data:image/png;base64,{encoded}");
        assert_eq!(decode_photo(&data_url).unwrap(), b"pixels");

        let err = decode_photo("not//valid==base64!").unwrap_err();
        assert_eq!(err.0, StatusCode::BAD_REQUEST);
    }

    #[test]
    fn batch_decoding_skips_bad_entries_instead_of_rejecting() {
        let good = base64::engine::general_purpose::STANDARD.encode(b"pixels");
        let payloads = vec![good, "not//valid==base64!".to_string()];

        let photos = decode_usable_photos(&payloads);
        assert_eq!(photos, vec![b"pixels".to_vec()]);

        let none = decode_usable_photos(&["!!!".to_string(), "???".to_string()]);
        assert!(none.is_empty());
    }

    #[test]
    fn error_payloads_carry_a_stable_code() {
        let (status, Json(body)) = bad_request("INVALID_RADIUS", "too wide");
        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert_eq!(body.error, "INVALID_RADIUS");
        assert_eq!(body.message, "too wide");
    }
}
