use std::time::Duration;

use actix_web::{
    get, post,
    web::{self, Json},
    Scope,
};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::{
    error::Error,
    message::{Message, MessageStatus, NewMessage, StatusSummary},
    service::Service,
};

#[get("/status")]
async fn status(service: web::Data<Service>) -> Result<Json<StatusSummary>, Error> {
    service.status_summary().await.map(Json)
}

#[derive(Debug, Deserialize)]
pub struct CleanupQuery {
    days: Option<u32>,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct CleanupResponse {
    pub deleted: u64,
}

#[post("/cleanup")]
async fn cleanup(
    service: web::Data<Service>,
    query: web::Query<CleanupQuery>,
) -> Result<Json<CleanupResponse>, Error> {
    let days = query.days.unwrap_or(service.config().retention_days);

    let deleted = service.cleanup(days).await?;

    Ok(Json(CleanupResponse { deleted }))
}

#[derive(Debug, Serialize, Deserialize)]
pub struct EnqueueRequest {
    pub kind: String,
    pub recipient: String,
    pub subject: String,
    pub payload: serde_json::Value,
    #[serde(default)]
    pub delay_secs: u64,
    pub max_attempts: Option<u32>,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct EnqueueResponse {
    pub id: i64,
}

#[post("/messages")]
async fn enqueue(
    service: web::Data<Service>,
    data: web::Json<EnqueueRequest>,
) -> Result<Json<EnqueueResponse>, Error> {
    let EnqueueRequest {
        kind,
        recipient,
        subject,
        payload,
        delay_secs,
        max_attempts,
    } = data.into_inner();

    if kind.is_empty() {
        return Err(Error::invalid_parameter("kind must not be empty"));
    }

    let payload = serde_json::to_vec(&payload).map_err(Error::internal)?;

    let id = service
        .enqueue(
            NewMessage::builder()
                .kind(kind)
                .recipient(recipient)
                .subject(subject)
                .payload(payload)
                .delay(Duration::from_secs(delay_secs))
                .maybe_max_attempts(max_attempts)
                .build(),
        )
        .await?;

    Ok(Json(EnqueueResponse { id }))
}

/// A message as shown to operators, with the payload rendered as JSON when
/// it is JSON.
#[derive(Debug, Serialize)]
pub struct MessageView {
    pub id: i64,
    pub kind: String,
    pub recipient: String,
    pub subject: String,
    pub payload: Option<serde_json::Value>,
    pub status: MessageStatus,
    pub attempts: u32,
    pub max_attempts: u32,
    pub created_at: DateTime<Utc>,
    pub scheduled_at: DateTime<Utc>,
    pub sent_at: Option<DateTime<Utc>>,
    pub error_message: Option<String>,
}

impl From<Message> for MessageView {
    fn from(message: Message) -> Self {
        Self {
            payload: serde_json::from_slice(&message.payload).ok(),
            id: message.id,
            kind: message.kind,
            recipient: message.recipient,
            subject: message.subject,
            status: message.status,
            attempts: message.attempts,
            max_attempts: message.max_attempts,
            created_at: message.created_at,
            scheduled_at: message.scheduled_at,
            sent_at: message.sent_at,
            error_message: message.error_message,
        }
    }
}

#[get("/messages/{id}")]
async fn get_message(
    service: web::Data<Service>,
    path: web::Path<i64>,
) -> Result<Json<MessageView>, Error> {
    let message = service.message(path.into_inner()).await?;

    Ok(Json(message.into()))
}

pub fn service() -> Scope {
    web::scope("/queue")
        .service(status)
        .service(cleanup)
        .service(enqueue)
        .service(get_message)
}
