//! Account linking and token handlers

use axum::{
    extract::{OriginalUri, State},
    response::Redirect,
    Json,
};
use serde::Serialize;
use std::sync::Arc;

use super::ActionResponse;
use crate::auth::{Navigation, StepOutcome};
use crate::error::Result;
use crate::state::AppState;

/// Send the user to the partner connections page
pub async fn sign_in(State(state): State<Arc<AppState>>) -> Result<Redirect> {
    let url = state.auth_flow().sign_in_url()?;
    Ok(Redirect::temporary(&url))
}

pub async fn sign_out(State(state): State<Arc<AppState>>) -> Json<ActionResponse> {
    state.sign_out().await;
    ActionResponse::ok("Signed out")
}

#[derive(Serialize)]
pub struct RefreshResponse {
    pub success: bool,
    pub outcome: StepOutcome,
}

/// Mint a new access token from the stored refresh token
pub async fn refresh(State(state): State<Arc<AppState>>) -> Json<RefreshResponse> {
    let outcome = state.auth_flow().refresh_access().await;
    Json(RefreshResponse {
        success: outcome != StepOutcome::Failed,
        outcome,
    })
}

/// OAuth redirect target (`GET /auth?code=...`)
pub async fn callback(State(state): State<Arc<AppState>>, OriginalUri(uri): OriginalUri) -> Redirect {
    match state.handle_auth_callback(uri.path(), uri.query()).await {
        Navigation::Rewrite(location) => Redirect::to(&location),
        Navigation::Stay => Redirect::to("/"),
    }
}
