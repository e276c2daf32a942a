use crate::AppState;
use axum::extract::State;
use axum::Json;
use serde::Serialize;

#[derive(Debug, Serialize)]
pub(crate) struct LiveResponse {
    status: &'static str,
}

#[derive(Debug, Serialize)]
pub(crate) struct ReadyResponse {
    status: &'static str,
    environment: String,
    storage_account: String,
    blob_container: String,
}

pub(crate) async fn live() -> Json<LiveResponse> {
    Json(LiveResponse { status: "live" })
}

pub(crate) async fn ready(State(state): State<AppState>) -> Json<ReadyResponse> {
    let settings = &state.settings;
    Json(ReadyResponse {
        status: "ready",
        environment: settings.environment.clone(),
        storage_account: settings.storage_account.clone(),
        blob_container: settings.blob_container.clone(),
    })
}
