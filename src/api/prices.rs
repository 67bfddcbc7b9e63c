//! Reference price endpoints.

use axum::extract::{Query, State};
use axum::response::Json;
use serde::Serialize;
use std::sync::Arc;

use super::{ApiError, AppState, DateRangeQuery};
use crate::feeds::{HistoricalPriceEntry, PriceFeed, PriceQuote};

#[derive(Serialize)]
pub struct HistoryResponse {
    pub data: Vec<HistoricalPriceEntry>,
    pub start_date: Option<String>,
    pub end_date: Option<String>,
    pub count: usize,
}

pub async fn get_cea_price(
    State(state): State<AppState>,
    Query(query): Query<DateRangeQuery>,
) -> Result<Json<PriceQuote>, ApiError> {
    price_for(&state.cea_feed, query.refresh).await
}

pub async fn get_eua_price(
    State(state): State<AppState>,
    Query(query): Query<DateRangeQuery>,
) -> Result<Json<PriceQuote>, ApiError> {
    price_for(&state.eua_feed, query.refresh).await
}

/// The plain path always answers (fallback included). `?refresh=true`
/// bypasses the fallback and may come back empty once retries are spent.
async fn price_for(feed: &Arc<PriceFeed>, refresh: bool) -> Result<Json<PriceQuote>, ApiError> {
    if refresh {
        return match feed.refresh().await {
            Some(quote) => Ok(Json(quote)),
            None => Err(ApiError::Unavailable(
                "reference price temporarily unavailable".to_string(),
            )),
        };
    }

    Ok(Json(feed.fetch_price().await))
}

pub async fn get_cea_history(
    State(state): State<AppState>,
    Query(query): Query<DateRangeQuery>,
) -> Result<Json<HistoryResponse>, ApiError> {
    history_for(&state.cea_feed, query).await
}

pub async fn get_eua_history(
    State(state): State<AppState>,
    Query(query): Query<DateRangeQuery>,
) -> Result<Json<HistoryResponse>, ApiError> {
    history_for(&state.eua_feed, query).await
}

async fn history_for(
    feed: &Arc<PriceFeed>,
    query: DateRangeQuery,
) -> Result<Json<HistoryResponse>, ApiError> {
    let data = feed
        .fetch_history(query.start_date, query.end_date)
        .await
        .map_err(ApiError::Internal)?;

    Ok(Json(HistoryResponse {
        count: data.len(),
        data,
        start_date: query.start_date.map(|d| d.format("%Y-%m-%d").to_string()),
        end_date: query.end_date.map(|d| d.format("%Y-%m-%d").to_string()),
    }))
}
