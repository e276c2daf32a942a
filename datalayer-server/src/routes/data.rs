//! Dataset routes: row listings and the provider directory.

use crate::{ApiError, AppState};
use axum::extract::rejection::QueryRejection;
use axum::extract::{Query, State};
use axum::Json;
use datalayer_core::{PriceQuery, QueryParams, RealEstateQuery, Row};

pub(crate) async fn prices(
    State(state): State<AppState>,
    params: Result<Query<QueryParams>, QueryRejection>,
) -> Result<Json<Vec<Row>>, ApiError> {
    let Query(params) = params?;
    let query = PriceQuery::try_from(params)?;
    let rows = state
        .with_repository(move |repo| repo.fetch_prices(&query))
        .await?;
    Ok(Json(rows))
}

pub(crate) async fn realestate(
    State(state): State<AppState>,
    params: Result<Query<QueryParams>, QueryRejection>,
) -> Result<Json<Vec<Row>>, ApiError> {
    let Query(params) = params?;
    let query = RealEstateQuery::try_from(params)?;
    let rows = state
        .with_repository(move |repo| repo.fetch_realestate(&query))
        .await?;
    Ok(Json(rows))
}

pub(crate) async fn providers(State(state): State<AppState>) -> Result<Json<Vec<String>>, ApiError> {
    let names = state.with_repository(|repo| repo.list_providers()).await?;
    Ok(Json(names))
}
