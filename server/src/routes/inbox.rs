use std::sync::Arc;

use axum::{
    extract::{Path, Query, State},
    http::StatusCode,
    Json,
};
use serde::Deserialize;
use serde_json::{json, Value};

use crate::{
    auth::credential::AuthenticatedUser,
    email::mailbox::MailboxConnector,
    error::{AppError, AppJsonResult, AppResult},
    server_config::ApiLimits,
    state::inbox_processor::{
        EmailPage, InboxProcessor, ProcessorProgress, ProcessorRegistry, SenderSummary,
        StatsSnapshot,
    },
};

#[derive(Debug, Default, Deserialize)]
pub struct TopSendersParams {
    pub n: Option<usize>,
}

#[derive(Debug, Default, Deserialize)]
pub struct EmailPageParams {
    pub offset: Option<usize>,
    pub limit: Option<usize>,
}

pub async fn process(
    State(registry): State<ProcessorRegistry>,
    user: AuthenticatedUser,
) -> AppJsonResult<ProcessorProgress> {
    let progress = registry.start(&user.identity_key, &user.credential);
    Ok(Json(progress))
}

pub async fn status(
    State(registry): State<ProcessorRegistry>,
    user: AuthenticatedUser,
) -> AppJsonResult<ProcessorProgress> {
    let processor = find_processor(&registry, &user)?;
    Ok(Json(processor.progress()))
}

pub async fn top_senders(
    State(registry): State<ProcessorRegistry>,
    State(limits): State<ApiLimits>,
    user: AuthenticatedUser,
    Query(params): Query<TopSendersParams>,
) -> AppJsonResult<Vec<SenderSummary>> {
    let processor = find_processor(&registry, &user)?;
    let n = params
        .n
        .unwrap_or(limits.default_top_senders)
        .min(limits.max_top_senders);

    Ok(Json(processor.top_senders(n)))
}

pub async fn stats(
    State(registry): State<ProcessorRegistry>,
    user: AuthenticatedUser,
) -> AppJsonResult<StatsSnapshot> {
    let processor = find_processor(&registry, &user)?;
    Ok(Json(processor.stats_snapshot()))
}

pub async fn emails(
    State(registry): State<ProcessorRegistry>,
    State(limits): State<ApiLimits>,
    user: AuthenticatedUser,
    Query(params): Query<EmailPageParams>,
) -> AppJsonResult<EmailPage> {
    let processor = find_processor(&registry, &user)?;
    let limit = params
        .limit
        .unwrap_or(limits.default_email_page)
        .min(limits.max_email_page);

    Ok(Json(processor.emails(params.offset.unwrap_or(0), limit)))
}

pub async fn cancel(
    State(registry): State<ProcessorRegistry>,
    user: AuthenticatedUser,
) -> AppJsonResult<ProcessorProgress> {
    let processor = find_processor(&registry, &user)?;
    processor.cancel();
    tracing::info!("Cancel requested for {}", user.identity_key);
    Ok(Json(processor.progress()))
}

pub async fn remove(
    State(registry): State<ProcessorRegistry>,
    user: AuthenticatedUser,
) -> StatusCode {
    registry.remove(&user.identity_key);
    StatusCode::NO_CONTENT
}

/// Moves one message to the provider's trash. Aggregates already folded from
/// it stay as they are.
pub async fn trash_email(
    State(connector): State<Arc<dyn MailboxConnector>>,
    user: AuthenticatedUser,
    Path(message_id): Path<String>,
) -> AppJsonResult<Value> {
    connector
        .connect(&user.credential)
        .trash_message(&message_id)
        .await?;
    tracing::info!("Moved message {} to trash for {}", message_id, user.identity_key);

    Ok(Json(json!({
        "status": "success",
        "message": "Email moved to trash"
    })))
}

fn find_processor(
    registry: &ProcessorRegistry,
    user: &AuthenticatedUser,
) -> AppResult<Arc<InboxProcessor>> {
    registry
        .get(&user.identity_key)
        .ok_or_else(|| AppError::NotFound("No inbox processing started for this user".to_string()))
}
