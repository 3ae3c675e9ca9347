use axum::{extract::State, Json};
use serde::Serialize;
use std::sync::Arc;

use crate::error::Result;
use crate::pubsub::PollerState;
use crate::state::AppState;

#[derive(Serialize)]
pub struct SubscriptionResponse {
    pub success: bool,
    pub state: PollerState,
    pub subscription_id: String,
}

fn subscription_response(state: &AppState) -> Json<SubscriptionResponse> {
    Json(SubscriptionResponse {
        success: true,
        state: state.poller.state(),
        subscription_id: state.config.get().events.subscription_id.clone(),
    })
}

pub async fn subscribe(State(state): State<Arc<AppState>>) -> Result<Json<SubscriptionResponse>> {
    state.subscribe_events().await?;
    Ok(subscription_response(&state))
}

pub async fn unsubscribe(State(state): State<Arc<AppState>>) -> Json<SubscriptionResponse> {
    state.unsubscribe_events().await;
    subscription_response(&state)
}
