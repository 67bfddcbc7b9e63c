//! Market offer and statistics endpoints.

use axum::{
    extract::State,
    response::Json,
    Extension,
};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use super::{ApiError, AppState};
use crate::{
    auth::Identity,
    models::{Certificate, MarketOffer, MarketStatistics},
};

#[derive(Serialize)]
pub struct OffersResponse {
    pub count: usize,
    pub offers: Vec<MarketOffer>,
}

pub async fn get_offers(State(state): State<AppState>) -> Json<OffersResponse> {
    let offers = state.market.snapshot();
    Json(OffersResponse {
        count: offers.len(),
        offers,
    })
}

pub async fn get_stats(
    State(state): State<AppState>,
    Extension(identity): Extension<Identity>,
) -> Result<Json<MarketStatistics>, ApiError> {
    let transactions = state.portfolio.transactions(identity.user_id)?;
    Ok(Json(state.stats.snapshot(&transactions)))
}

#[derive(Deserialize)]
pub struct PurchaseRequest {
    pub offer_id: Uuid,
}

#[derive(Serialize)]
pub struct PurchaseResponse {
    pub certificate: Certificate,
}

pub async fn post_purchase(
    State(state): State<AppState>,
    Extension(identity): Extension<Identity>,
    Json(request): Json<PurchaseRequest>,
) -> Result<Json<PurchaseResponse>, ApiError> {
    let certificate = state
        .portfolio
        .purchase(identity.user_id, request.offer_id)
        .await?;

    Ok(Json(PurchaseResponse { certificate }))
}
