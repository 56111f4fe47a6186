//! Range Routes
//!
//! - GET /range/*topic?start=<ms>&end=<ms>&decimate=<n> - Stream recorded
//!   messages as newline-delimited JSON
//!
//! The request is validated, the topic is probed in the newest files, and the
//! query is handed to the worker pool. The response body is the task's line
//! stream; a failure after streaming has started aborts the response.

use axum::{
    body::{Body, Bytes},
    extract::{Path, Query, State},
    http::header,
    response::Response,
};
use futures_util::StreamExt;
use std::sync::Arc;

use super::normalize_topic;
use crate::api::dto::RangeQueryParams;
use crate::api::error::{ApiError, ApiResult};
use crate::api::state::AppState;
use crate::storage::{probe_channel, RangeParams, TimeWindow};

pub const NDJSON: &str = "application/x-ndjson";

/// GET /range/*topic
pub async fn stream_range(
    State(state): State<Arc<AppState>>,
    Path(topic): Path<String>,
    Query(query): Query<RangeQueryParams>,
) -> ApiResult<Response> {
    let topic = normalize_topic(&topic);

    let (start, end) = match (
        parse_millis(query.start.as_deref()),
        parse_millis(query.end.as_deref()),
    ) {
        (Some(start), Some(end)) if end > start => (start, end),
        _ => return Err(ApiError::Validation("invalid start/end".to_string())),
    };
    let decimate = parse_decimate(query.decimate.as_deref())
        .ok_or_else(|| ApiError::Validation("invalid decimate".to_string()))?;

    if end.saturating_sub(start) > state.config.max_range_ms {
        return Err(ApiError::PolicyLimit("window too large".to_string()));
    }

    let files = state.catalog.files();
    if files.is_empty() {
        return Err(ApiError::NotFound("no log files".to_string()));
    }

    let channel = {
        let files = Arc::clone(&files);
        let topic = topic.clone();
        tokio::task::spawn_blocking(move || probe_channel(&files, &topic))
            .await
            .map_err(|e| ApiError::Internal(format!("channel probe failed: {}", e)))?
    };
    let Some(channel) = channel else {
        return Err(ApiError::NotFound("topic not found".to_string()));
    };

    let window =
        TimeWindow::new(start, end).map_err(|e| ApiError::Validation(e.to_string()))?;
    let params = RangeParams::new(files.to_vec(), topic.clone(), window)
        .decimate(decimate)
        .probed_channel(channel.channel_id);

    let stream = state
        .pool
        .schedule(params)
        .await
        .map_err(|e| ApiError::Scheduling(e.to_string()))?;

    let task = stream.id();
    tracing::info!(
        task,
        topic = %topic,
        start,
        end,
        decimate,
        files = files.len(),
        "Range query streaming"
    );

    let lines = stream.map(move |line| {
        line.map(Bytes::from).map_err(|e| {
            tracing::warn!(task, error = %e, "Range stream aborted");
            e
        })
    });

    Response::builder()
        .header(header::CONTENT_TYPE, NDJSON)
        .body(Body::from_stream(lines))
        .map_err(|e| ApiError::Internal(e.to_string()))
}

/// Epoch milliseconds; fractional values are truncated
fn parse_millis(value: Option<&str>) -> Option<i64> {
    let value = value?.trim();
    value.parse::<i64>().ok().or_else(|| {
        value
            .parse::<f64>()
            .ok()
            .filter(|v| v.is_finite())
            .map(|v| v.trunc() as i64)
    })
}

fn parse_decimate(value: Option<&str>) -> Option<u32> {
    match value {
        None => Some(1),
        Some(v) => v.trim().parse::<u32>().ok().filter(|n| *n >= 1),
    }
}
