//! Portfolio and certificate lifecycle endpoints.

use axum::{extract::State, response::Json, Extension};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use super::{ApiError, AppState};
use crate::{
    auth::Identity,
    models::{Activity, Certificate, Co2Emissions, Portfolio, Transaction},
};

const ACTIVITY_LIMIT: usize = 100;

pub async fn get_portfolio(
    State(state): State<AppState>,
    Extension(identity): Extension<Identity>,
) -> Result<Json<Portfolio>, ApiError> {
    Ok(Json(state.portfolio.portfolio(identity.user_id)?))
}

#[derive(Serialize)]
pub struct TransactionsResponse {
    pub count: usize,
    pub transactions: Vec<Transaction>,
}

pub async fn get_transactions(
    State(state): State<AppState>,
    Extension(identity): Extension<Identity>,
) -> Result<Json<TransactionsResponse>, ApiError> {
    let transactions = state.portfolio.transactions(identity.user_id)?;
    Ok(Json(TransactionsResponse {
        count: transactions.len(),
        transactions,
    }))
}

pub async fn get_emissions(
    State(state): State<AppState>,
    Extension(identity): Extension<Identity>,
) -> Result<Json<Co2Emissions>, ApiError> {
    Ok(Json(state.portfolio.emissions(identity.user_id)?))
}

#[derive(Serialize)]
pub struct ActivityResponse {
    pub activities: Vec<Activity>,
}

pub async fn get_activity(
    State(state): State<AppState>,
    Extension(identity): Extension<Identity>,
) -> Json<ActivityResponse> {
    Json(ActivityResponse {
        activities: state.portfolio.activity_for(identity.user_id, ACTIVITY_LIMIT),
    })
}

#[derive(Deserialize)]
pub struct CertificateRequest {
    pub certificate_id: Uuid,
}

#[derive(Serialize)]
pub struct CertificateResponse {
    pub certificate: Certificate,
}

pub async fn post_convert(
    State(state): State<AppState>,
    Extension(identity): Extension<Identity>,
    Json(request): Json<CertificateRequest>,
) -> Result<Json<CertificateResponse>, ApiError> {
    let certificate = state
        .portfolio
        .convert(identity.user_id, request.certificate_id)
        .await?;
    Ok(Json(CertificateResponse { certificate }))
}

pub async fn post_verify(
    State(state): State<AppState>,
    Extension(identity): Extension<Identity>,
    Json(request): Json<CertificateRequest>,
) -> Result<Json<CertificateResponse>, ApiError> {
    let certificate = state
        .portfolio
        .verify(identity.user_id, request.certificate_id)
        .await?;
    Ok(Json(CertificateResponse { certificate }))
}

#[derive(Serialize)]
pub struct SurrenderResponse {
    pub emissions: Co2Emissions,
}

pub async fn post_surrender(
    State(state): State<AppState>,
    Extension(identity): Extension<Identity>,
    Json(request): Json<CertificateRequest>,
) -> Result<Json<SurrenderResponse>, ApiError> {
    let emissions = state
        .portfolio
        .surrender(identity.user_id, request.certificate_id)
        .await?;
    Ok(Json(SurrenderResponse { emissions }))
}
