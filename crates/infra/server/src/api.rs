//! Admin API handlers.

use std::sync::Arc;

use axum::extract::{Path, Query, State};
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use portal_webhooks::{
    AttemptPage, AttemptQuery, DEFAULT_PAGE_SIZE, DeliveryAttempt, NewSubscription, Subscription,
    SubscriptionStats, SubscriptionUpdate, WebhookError, WebhookSystem,
};

pub type AppState = Arc<WebhookSystem>;

type ApiResult<T> = Result<T, ApiError>;

/// Wrapper for WebhookError that implements IntoResponse.
#[derive(Debug)]
pub struct ApiError(pub WebhookError);

impl ApiError {
    fn status(&self) -> StatusCode {
        match self.0 {
            WebhookError::Validation(_) | WebhookError::InvalidPayload(_) => {
                StatusCode::BAD_REQUEST
            }
            WebhookError::InvalidSignature => StatusCode::UNAUTHORIZED,
            WebhookError::NotFound(_) => StatusCode::NOT_FOUND,
            WebhookError::Shutdown => StatusCode::SERVICE_UNAVAILABLE,
            _ => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = self.status();
        if status.is_server_error() {
            tracing::error!("Admin request failed: {}", self.0);
        }

        let body = serde_json::json!({
            "error": self.0.to_string(),
            "code": status.as_u16()
        });
        (status, Json(body)).into_response()
    }
}

impl From<WebhookError> for ApiError {
    fn from(err: WebhookError) -> Self {
        ApiError(err)
    }
}

// ==================== Request bodies ====================

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CreateSubscriptionRequest {
    pub name: String,
    pub url: String,
    #[serde(default)]
    pub events: Vec<String>,
    pub secret: Option<String>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UpdateSubscriptionRequest {
    pub name: String,
    pub url: String,
    #[serde(default)]
    pub events: Vec<String>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ToggleRequest {
    pub is_active: bool,
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ListQuery {
    #[serde(default)]
    pub active_only: bool,
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LogsQuery {
    pub page: Option<usize>,
    pub page_size: Option<usize>,
    pub success: Option<bool>,
    pub event: Option<String>,
}

impl LogsQuery {
    fn to_attempt_query(&self) -> AttemptQuery {
        let mut query = AttemptQuery::new().page(
            self.page.unwrap_or(1),
            self.page_size.unwrap_or(DEFAULT_PAGE_SIZE),
        );
        if let Some(success) = self.success {
            query = query.success(success);
        }
        if let Some(event) = &self.event {
            query = query.event(event.clone());
        }
        query
    }
}

// ==================== Response bodies ====================

/// Subscription as shown to admins. The secret is only present on create.
#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SubscriptionResponse {
    pub id: String,
    pub name: String,
    pub url: String,
    pub events: Vec<String>,
    pub is_active: bool,
    pub created_at: DateTime<Utc>,
    pub last_triggered_at: Option<DateTime<Utc>>,
    pub success_count: u64,
    pub failure_count: u64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub secret: Option<String>,
}

impl SubscriptionResponse {
    fn redacted(subscription: Subscription) -> Self {
        Self {
            id: subscription.id,
            name: subscription.name,
            url: subscription.url,
            events: subscription.events.iter().map(str::to_string).collect(),
            is_active: subscription.is_active,
            created_at: subscription.created_at,
            last_triggered_at: subscription.last_triggered_at,
            success_count: subscription.success_count,
            failure_count: subscription.failure_count,
            secret: None,
        }
    }

    fn with_secret(subscription: Subscription) -> Self {
        let secret = subscription.secret.clone();
        Self {
            secret: Some(secret),
            ..Self::redacted(subscription)
        }
    }
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct AttemptResponse {
    pub id: String,
    pub subscription_id: String,
    pub job_id: String,
    pub idempotency_key: String,
    pub event: String,
    pub payload: String,
    pub attempt_number: u32,
    pub status_code: Option<u16>,
    pub response_body: Option<String>,
    pub error: Option<String>,
    pub is_success: bool,
    pub triggered_at: DateTime<Utc>,
    pub response_time_ms: u64,
}

impl From<DeliveryAttempt> for AttemptResponse {
    fn from(attempt: DeliveryAttempt) -> Self {
        Self {
            id: attempt.id,
            subscription_id: attempt.subscription_id,
            job_id: attempt.job_id,
            idempotency_key: attempt.idempotency_key,
            event: attempt.event,
            payload: attempt.payload,
            attempt_number: attempt.attempt_number,
            status_code: attempt.status_code,
            response_body: attempt.response_body,
            error: attempt.error,
            is_success: attempt.is_success,
            triggered_at: attempt.triggered_at,
            response_time_ms: attempt.response_time_ms,
        }
    }
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct LogPageResponse {
    pub items: Vec<AttemptResponse>,
    pub total: usize,
    pub page: usize,
    pub page_size: usize,
}

impl From<AttemptPage> for LogPageResponse {
    fn from(page: AttemptPage) -> Self {
        Self {
            items: page.items.into_iter().map(AttemptResponse::from).collect(),
            total: page.total,
            page: page.page,
            page_size: page.page_size,
        }
    }
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ReplayResponse {
    pub job_id: String,
    pub subscription_id: String,
    pub idempotency_key: String,
}

// ==================== Handlers ====================

pub async fn health() -> Json<serde_json::Value> {
    Json(serde_json::json!({ "status": "ok" }))
}

pub async fn create_subscription(
    State(system): State<AppState>,
    Json(body): Json<CreateSubscriptionRequest>,
) -> ApiResult<(StatusCode, Json<SubscriptionResponse>)> {
    let mut request = NewSubscription::new(body.name, body.url).events(body.events);
    if let Some(secret) = body.secret {
        request = request.secret(secret);
    }

    let subscription = system.registry().create(request).await?;
    Ok((StatusCode::CREATED, Json(SubscriptionResponse::with_secret(subscription))))
}

pub async fn list_subscriptions(
    State(system): State<AppState>,
    Query(query): Query<ListQuery>,
) -> ApiResult<Json<Vec<SubscriptionResponse>>> {
    let subscriptions = system.registry().list(query.active_only).await?;
    Ok(Json(
        subscriptions.into_iter().map(SubscriptionResponse::redacted).collect(),
    ))
}

pub async fn get_subscription(
    State(system): State<AppState>,
    Path(id): Path<String>,
) -> ApiResult<Json<SubscriptionResponse>> {
    let subscription = system.registry().get(&id).await?;
    Ok(Json(SubscriptionResponse::redacted(subscription)))
}

pub async fn toggle_subscription(
    State(system): State<AppState>,
    Path(id): Path<String>,
    Json(body): Json<ToggleRequest>,
) -> ApiResult<Json<SubscriptionResponse>> {
    let subscription = system.registry().set_active(&id, body.is_active).await?;
    Ok(Json(SubscriptionResponse::redacted(subscription)))
}

pub async fn update_subscription(
    State(system): State<AppState>,
    Path(id): Path<String>,
    Json(body): Json<UpdateSubscriptionRequest>,
) -> ApiResult<Json<SubscriptionResponse>> {
    let update = SubscriptionUpdate::new(&body.name, &body.url, body.events)?;
    let subscription = system.registry().update(&id, update).await?;
    Ok(Json(SubscriptionResponse::redacted(subscription)))
}

pub async fn delete_subscription(
    State(system): State<AppState>,
    Path(id): Path<String>,
) -> ApiResult<StatusCode> {
    system.registry().delete(&id).await?;
    Ok(StatusCode::NO_CONTENT)
}

pub async fn list_logs(
    State(system): State<AppState>,
    Path(id): Path<String>,
    Query(query): Query<LogsQuery>,
) -> ApiResult<Json<LogPageResponse>> {
    // 404 rather than an empty page for unknown subscriptions.
    system.registry().get(&id).await?;
    let page = system.logs().list_attempts(&id, &query.to_attempt_query()).await?;
    Ok(Json(page.into()))
}

pub async fn subscription_stats(
    State(system): State<AppState>,
    Path(id): Path<String>,
) -> ApiResult<Json<SubscriptionStats>> {
    Ok(Json(system.statistics(&id).await?))
}

pub async fn test_subscription(
    State(system): State<AppState>,
    Path(id): Path<String>,
) -> ApiResult<Json<AttemptResponse>> {
    let attempt = system.send_test(&id).await?;
    Ok(Json(attempt.into()))
}

pub async fn reset_stats(
    State(system): State<AppState>,
    Path(id): Path<String>,
) -> ApiResult<Json<SubscriptionResponse>> {
    let subscription = system.reset_counters(&id).await?;
    Ok(Json(SubscriptionResponse::redacted(subscription)))
}

pub async fn retry_log(
    State(system): State<AppState>,
    Path(log_id): Path<String>,
) -> ApiResult<(StatusCode, Json<ReplayResponse>)> {
    let job = system.replay_attempt(&log_id).await?;
    Ok((
        StatusCode::ACCEPTED,
        Json(ReplayResponse {
            job_id: job.id,
            subscription_id: job.subscription_id,
            idempotency_key: job.idempotency_key,
        }),
    ))
}
