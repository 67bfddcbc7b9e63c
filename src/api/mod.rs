//! HTTP surface of the simulation.

pub mod admin;
pub mod kyc;
pub mod market;
pub mod portfolio;
pub mod prices;
pub mod ws;

use axum::{
    http::StatusCode,
    middleware,
    response::{IntoResponse, Json, Response},
    routing::{delete, get, post},
    Router,
};
use serde::{Deserialize, Serialize};
use serde_json::json;
use std::sync::Arc;
use tokio::sync::broadcast;
use tower_http::{cors::CorsLayer, trace::TraceLayer};

use crate::{
    admin::AdminStore,
    auth::{admin_middleware, user_middleware, LoginRequest, LoginResponse, UserResponse,
        UserStore},
    feeds::PriceFeed,
    kyc::{KycError, KycService},
    market::MarketOfferStore,
    middleware::{rate_limit_middleware, request_logging, RateLimitLayer},
    models::{Config, WsServerEvent},
    portfolio::{PortfolioError, PortfolioManager},
    stats::StatsAggregator,
};

/// Shared application state
#[derive(Clone)]
pub struct AppState {
    pub config: Config,
    pub users: Arc<UserStore>,
    pub cea_feed: Arc<PriceFeed>,
    pub eua_feed: Arc<PriceFeed>,
    pub market: Arc<MarketOfferStore>,
    pub portfolio: Arc<PortfolioManager>,
    pub kyc: Arc<KycService>,
    pub stats: Arc<StatsAggregator>,
    pub admin: Arc<AdminStore>,
    pub events: broadcast::Sender<WsServerEvent>,
}

/// Create the API router
pub fn create_router(state: AppState, limiter: RateLimitLayer) -> Router {
    let public_routes = Router::new()
        .route("/health", get(health_check))
        .route("/api/auth/login", post(login))
        .route("/api/cea/price", get(prices::get_cea_price))
        .route("/api/cea/history", get(prices::get_cea_history))
        .route("/api/eua/price", get(prices::get_eua_price))
        .route("/api/eua/history", get(prices::get_eua_history))
        .route("/api/access-requests", post(admin::post_access_request))
        .route("/ws", get(ws::websocket_handler));

    let user_routes = Router::new()
        .route("/api/market/offers", get(market::get_offers))
        .route("/api/market/stats", get(market::get_stats))
        .route("/api/market/purchase", post(market::post_purchase))
        .route("/api/portfolio", get(portfolio::get_portfolio))
        .route("/api/portfolio/transactions", get(portfolio::get_transactions))
        .route("/api/portfolio/emissions", get(portfolio::get_emissions))
        .route("/api/portfolio/activity", get(portfolio::get_activity))
        .route("/api/portfolio/convert", post(portfolio::post_convert))
        .route("/api/portfolio/verify", post(portfolio::post_verify))
        .route("/api/portfolio/surrender", post(portfolio::post_surrender))
        .route("/api/kyc/register", post(kyc::post_register))
        .route("/api/kyc/status", get(kyc::get_status))
        .route("/api/kyc/documents", get(kyc::get_documents))
        .route("/api/kyc/documents/upload", post(kyc::post_document_upload))
        .route("/api/kyc/documents/:id", delete(kyc::delete_document))
        .route("/api/kyc/submit", post(kyc::post_submit))
        .route("/api/kyc/eu-ets-verify", post(kyc::post_ets_verify))
        .route(
            "/api/kyc/suitability-assessment",
            post(kyc::post_suitability),
        )
        .route(
            "/api/kyc/appropriateness-assessment",
            post(kyc::post_appropriateness),
        )
        .route("/api/kyc/knowledge-questions", get(kyc::get_knowledge_questions))
        .route_layer(middleware::from_fn_with_state(
            state.users.clone(),
            user_middleware,
        ));

    let admin_routes = Router::new()
        .route("/api/admin/users", get(admin::get_users).post(admin::post_user))
        .route("/api/admin/users/:id", delete(admin::delete_user))
        .route("/api/admin/kyc", get(admin::get_kyc_profiles))
        .route(
            "/api/admin/config",
            get(admin::get_config).put(admin::put_config),
        )
        .route("/api/admin/access-requests", get(admin::get_access_requests))
        .route(
            "/api/admin/access-requests/:id/approve",
            post(admin::approve_access_request),
        )
        .route(
            "/api/admin/access-requests/:id/reject",
            post(admin::reject_access_request),
        )
        .route(
            "/api/admin/price-updates/status",
            get(admin::get_price_update_status),
        )
        .route_layer(middleware::from_fn_with_state(
            state.users.clone(),
            admin_middleware,
        ));

    Router::new()
        .merge(public_routes)
        .merge(user_routes)
        .merge(admin_routes)
        .layer(middleware::from_fn_with_state(
            limiter,
            rate_limit_middleware,
        ))
        .layer(middleware::from_fn(request_logging))
        .layer(TraceLayer::new_for_http())
        .layer(CorsLayer::permissive())
        .with_state(state)
}

// ===== Shared handlers =====

/// Health check endpoint
async fn health_check() -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "healthy".to_string(),
        version: env!("CARGO_PKG_VERSION").to_string(),
    })
}

/// Demo-credential login. On success the client derives no token: it keeps
/// the returned user id and replays it in the identity headers.
async fn login(
    axum::extract::State(state): axum::extract::State<AppState>,
    Json(request): Json<LoginRequest>,
) -> Result<Json<LoginResponse>, ApiError> {
    let valid = state
        .users
        .verify_password(&request.username, &request.password)
        .map_err(ApiError::Internal)?;

    if !valid {
        return Err(ApiError::Unauthorized("Invalid credentials".to_string()));
    }

    let user = state
        .users
        .get_user_by_username(&request.username)
        .map_err(ApiError::Internal)?
        .ok_or_else(|| ApiError::Unauthorized("Invalid credentials".to_string()))?;

    Ok(Json(LoginResponse {
        user: UserResponse::from_user(&user),
    }))
}

#[derive(Serialize)]
struct HealthResponse {
    status: String,
    version: String,
}

#[derive(Deserialize)]
pub(crate) struct DateRangeQuery {
    pub start_date: Option<chrono::NaiveDate>,
    pub end_date: Option<chrono::NaiveDate>,
    #[serde(default)]
    pub refresh: bool,
}

// ===== Error Handling =====

#[derive(Debug)]
pub enum ApiError {
    BadRequest(String),
    Unauthorized(String),
    NotFound { code: &'static str, message: String },
    Validation {
        code: &'static str,
        message: String,
        details: Option<serde_json::Value>,
    },
    Unavailable(String),
    Internal(anyhow::Error),
}

impl From<anyhow::Error> for ApiError {
    fn from(err: anyhow::Error) -> Self {
        ApiError::Internal(err)
    }
}

impl From<PortfolioError> for ApiError {
    fn from(err: PortfolioError) -> Self {
        match err {
            PortfolioError::UserNotFound => ApiError::NotFound {
                code: "USER_NOT_FOUND",
                message: err.to_string(),
            },
            PortfolioError::OfferNotFound => ApiError::NotFound {
                code: "OFFER_NOT_FOUND",
                message: err.to_string(),
            },
            PortfolioError::CertificateNotFound => ApiError::NotFound {
                code: "CERTIFICATE_NOT_FOUND",
                message: err.to_string(),
            },
            PortfolioError::InsufficientBalance { .. } => ApiError::Validation {
                code: "INSUFFICIENT_BALANCE",
                message: err.to_string(),
                details: None,
            },
            PortfolioError::InvalidState(_) => ApiError::Validation {
                code: "INVALID_STATE",
                message: err.to_string(),
                details: None,
            },
            PortfolioError::Storage(e) => ApiError::Internal(e),
        }
    }
}

impl From<KycError> for ApiError {
    fn from(err: KycError) -> Self {
        match err {
            KycError::NotStarted => ApiError::NotFound {
                code: "KYC_NOT_FOUND",
                message: err.to_string(),
            },
            KycError::DocumentNotFound => ApiError::NotFound {
                code: "DOCUMENT_NOT_FOUND",
                message: err.to_string(),
            },
            KycError::MissingDocuments(ref missing) => {
                let names: Vec<&str> = missing.iter().map(|d| d.as_str()).collect();
                ApiError::Validation {
                    code: "MISSING_DOCUMENTS",
                    message: "Missing required documents".to_string(),
                    details: Some(json!({ "missing_documents": names })),
                }
            }
            KycError::RegistryNotVerified => ApiError::Validation {
                code: "REGISTRY_NOT_VERIFIED",
                message: err.to_string(),
                details: None,
            },
            KycError::InvalidRequest(msg) => ApiError::BadRequest(msg),
            KycError::InvalidDocumentType(_) => ApiError::Validation {
                code: "INVALID_DOCUMENT_TYPE",
                message: err.to_string(),
                details: None,
            },
            KycError::InvalidFile(_) => ApiError::Validation {
                code: "INVALID_FILE",
                message: err.to_string(),
                details: None,
            },
            KycError::Storage(e) => ApiError::Internal(e),
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let (status, code, message, details) = match self {
            ApiError::BadRequest(msg) => (StatusCode::BAD_REQUEST, "BAD_REQUEST", msg, None),
            ApiError::Unauthorized(msg) => {
                (StatusCode::UNAUTHORIZED, "UNAUTHORIZED", msg, None)
            }
            ApiError::NotFound { code, message } => {
                (StatusCode::NOT_FOUND, code, message, None)
            }
            ApiError::Validation {
                code,
                message,
                details,
            } => (StatusCode::BAD_REQUEST, code, message, details),
            ApiError::Unavailable(msg) => {
                (StatusCode::SERVICE_UNAVAILABLE, "UNAVAILABLE", msg, None)
            }
            ApiError::Internal(err) => {
                tracing::error!("Internal error: {err:#}");
                (
                    StatusCode::INTERNAL_SERVER_ERROR,
                    "INTERNAL_ERROR",
                    "Internal server error".to_string(),
                    None,
                )
            }
        };

        let mut body = json!({
            "error": message,
            "code": code,
        });
        if let Some(details) = details {
            if let (Some(map), Some(extra)) = (body.as_object_mut(), details.as_object()) {
                for (k, v) in extra {
                    map.insert(k.clone(), v.clone());
                }
            }
        }

        (status, Json(body)).into_response()
    }
}
