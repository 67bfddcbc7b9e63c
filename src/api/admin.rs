//! Admin console endpoints (X-Admin-ID gated) plus the public
//! access-request form.

use axum::{
    extract::{Path, State},
    response::Json,
};
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use uuid::Uuid;

use super::{ApiError, AppState};
use crate::{
    admin::{AccessRequest, AccessRequestStatus, ConfigEntry, NewAccessRequest},
    auth::{UserResponse, UserRole},
    kyc::KycProfile,
};

// ===== Users =====

#[derive(Serialize)]
pub struct UsersResponse {
    pub count: usize,
    pub users: Vec<UserResponse>,
}

pub async fn get_users(State(state): State<AppState>) -> Result<Json<UsersResponse>, ApiError> {
    let users = state.users.list_users().map_err(ApiError::Internal)?;
    let users: Vec<UserResponse> = users.iter().map(UserResponse::from_user).collect();
    Ok(Json(UsersResponse {
        count: users.len(),
        users,
    }))
}

#[derive(Deserialize)]
pub struct CreateUserRequest {
    pub username: String,
    pub password: String,
    #[serde(default)]
    pub admin: bool,
}

pub async fn post_user(
    State(state): State<AppState>,
    Json(request): Json<CreateUserRequest>,
) -> Result<Json<Value>, ApiError> {
    if request.username.trim().is_empty() || request.password.len() < 8 {
        return Err(ApiError::BadRequest(
            "username and a password of at least 8 characters are required".to_string(),
        ));
    }

    let role = if request.admin {
        UserRole::Admin
    } else {
        UserRole::Trader
    };
    let user = state
        .users
        .create_user(request.username.trim(), &request.password, role)
        .map_err(ApiError::Internal)?;

    Ok(Json(json!({
        "message": "User created",
        "user": UserResponse::from_user(&user),
    })))
}

pub async fn delete_user(
    State(state): State<AppState>,
    Path(user_id): Path<Uuid>,
) -> Result<Json<Value>, ApiError> {
    state.users.delete_user(&user_id).map_err(|_| ApiError::NotFound {
        code: "USER_NOT_FOUND",
        message: "user not found".to_string(),
    })?;
    Ok(Json(json!({ "message": "User deleted" })))
}

// ===== KYC review =====

#[derive(Serialize)]
pub struct KycProfilesResponse {
    pub count: usize,
    pub profiles: Vec<KycProfile>,
}

pub async fn get_kyc_profiles(
    State(state): State<AppState>,
) -> Result<Json<KycProfilesResponse>, ApiError> {
    let profiles = state.kyc.list_profiles()?;
    Ok(Json(KycProfilesResponse {
        count: profiles.len(),
        profiles,
    }))
}

// ===== Platform config =====

#[derive(Serialize)]
pub struct ConfigResponse {
    pub entries: Vec<ConfigEntry>,
}

pub async fn get_config(State(state): State<AppState>) -> Result<Json<ConfigResponse>, ApiError> {
    Ok(Json(ConfigResponse {
        entries: state.admin.list_config().map_err(ApiError::Internal)?,
    }))
}

#[derive(Deserialize)]
pub struct ConfigUpdateRequest {
    pub key: String,
    pub value: String,
}

pub async fn put_config(
    State(state): State<AppState>,
    Json(request): Json<ConfigUpdateRequest>,
) -> Result<Json<Value>, ApiError> {
    if request.key.trim().is_empty() {
        return Err(ApiError::BadRequest("config key is required".to_string()));
    }
    state
        .admin
        .set_config(request.key.trim(), &request.value)
        .map_err(ApiError::Internal)?;
    Ok(Json(json!({ "message": "Config updated" })))
}

// ===== Access requests =====

/// Public endpoint backing the "request access" form.
pub async fn post_access_request(
    State(state): State<AppState>,
    Json(request): Json<NewAccessRequest>,
) -> Result<Json<Value>, ApiError> {
    let record = state
        .admin
        .create_access_request(&request)
        .map_err(|e| ApiError::BadRequest(e.to_string()))?;

    Ok(Json(json!({
        "message": "Access request received",
        "request_id": record.id,
    })))
}

#[derive(Serialize)]
pub struct AccessRequestsResponse {
    pub count: usize,
    pub requests: Vec<AccessRequest>,
}

pub async fn get_access_requests(
    State(state): State<AppState>,
) -> Result<Json<AccessRequestsResponse>, ApiError> {
    let requests = state
        .admin
        .list_access_requests()
        .map_err(ApiError::Internal)?;
    Ok(Json(AccessRequestsResponse {
        count: requests.len(),
        requests,
    }))
}

pub async fn approve_access_request(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
) -> Result<Json<Value>, ApiError> {
    decide(state, id, AccessRequestStatus::Approved).await
}

pub async fn reject_access_request(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
) -> Result<Json<Value>, ApiError> {
    decide(state, id, AccessRequestStatus::Rejected).await
}

async fn decide(
    state: AppState,
    id: Uuid,
    status: AccessRequestStatus,
) -> Result<Json<Value>, ApiError> {
    let found = state
        .admin
        .decide_access_request(&id, status)
        .map_err(ApiError::Internal)?;

    if !found {
        return Err(ApiError::NotFound {
            code: "REQUEST_NOT_FOUND",
            message: "access request not found".to_string(),
        });
    }
    Ok(Json(json!({ "message": "Access request updated", "status": status })))
}

// ===== Price feed status =====

#[derive(Serialize)]
pub struct PriceUpdateStatus {
    pub instrument: &'static str,
    pub last_price: Option<f64>,
    pub last_updated: Option<chrono::DateTime<chrono::Utc>>,
    pub poll_interval_secs: u64,
}

pub async fn get_price_update_status(
    State(state): State<AppState>,
) -> Json<Vec<PriceUpdateStatus>> {
    let poll = state.config.price_poll_secs;
    let status = |instrument: &'static str, quote: Option<crate::feeds::PriceQuote>| {
        PriceUpdateStatus {
            instrument,
            last_price: quote.as_ref().map(|q| q.price),
            last_updated: quote.as_ref().map(|q| q.timestamp),
            poll_interval_secs: poll,
        }
    };

    Json(vec![
        status("cea", state.cea_feed.latest()),
        status("eua", state.eua_feed.latest()),
    ])
}
