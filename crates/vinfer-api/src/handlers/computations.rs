//! In-flight computation handlers.

use axum::extract::State;
use axum::Json;
use serde::Serialize;
use vinfer_worker::{CoordinatorStats, TicketSnapshot};

use crate::state::AppState;

/// Computations currently running plus coordinator counters.
#[derive(Serialize)]
pub struct ComputationsResponse {
    pub in_flight: Vec<TicketSnapshot>,
    pub stats: CoordinatorStats,
}

/// List in-flight computations.
pub async fn list_computations(State(state): State<AppState>) -> Json<ComputationsResponse> {
    Json(ComputationsResponse {
        in_flight: state.service.in_flight().await,
        stats: state.service.stats(),
    })
}
