//! Topic Routes
//!
//! - GET /topics - Topics known to the message bus with their types

use axum::{extract::State, Json};
use std::sync::Arc;

use crate::api::error::ApiResult;
use crate::api::state::AppState;
use crate::bus::TopicInfo;

/// GET /topics
pub async fn list_topics(State(state): State<Arc<AppState>>) -> ApiResult<Json<Vec<TopicInfo>>> {
    let topics = state.bus.topics().await?;
    Ok(Json(topics))
}
