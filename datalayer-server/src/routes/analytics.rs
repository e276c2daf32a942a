use crate::{ApiError, AppState};
use axum::extract::rejection::QueryRejection;
use axum::extract::{Query, State};
use axum::Json;
use datalayer_core::data::PRICES_DATASET;
use datalayer_core::{AnalyticsQuery, ProviderSummary, QueryParams};

/// Per-provider mean, sum and count over the prices dataset.
pub(crate) async fn provider_summary(
    State(state): State<AppState>,
    params: Result<Query<QueryParams>, QueryRejection>,
) -> Result<Json<Vec<ProviderSummary>>, ApiError> {
    let Query(params) = params?;
    let query = AnalyticsQuery::try_from(params)?;
    let summary = state
        .with_repository(move |repo| repo.fetch_provider_summary(PRICES_DATASET, &query))
        .await?;
    Ok(Json(summary))
}
