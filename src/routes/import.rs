//! Import entry points.

use crate::error::ApiError;
use crate::models::{ImportRequest, ImportResult, PubSubRequest};
use crate::pipeline::ImportService;
use base64::Engine;
use base64::engine::general_purpose::STANDARD;
use rocket::serde::json::{self, Json};
use rocket::{State, post};

/// Stream one gzip CSV object into a table and report the outcome.
#[post("/import_async", format = "json", data = "<request>")]
pub async fn import_async(
    service: &State<ImportService>,
    request: Result<Json<ImportRequest>, json::Error<'_>>,
) -> Result<Json<ImportResult>, ApiError> {
    let request = request
        .map_err(|e| ApiError::BadRequest(format!("invalid import request: {e}")))?
        .into_inner();

    let result = service.run_with_timeout(&request).await?;
    Ok(Json(result))
}

/// Pub/Sub push delivery carrying a base64 encoded [`ImportRequest`].
#[post("/pubsub/push", format = "json", data = "<envelope>")]
pub async fn pubsub_push(
    service: &State<ImportService>,
    envelope: Result<Json<PubSubRequest>, json::Error<'_>>,
) -> Result<Json<ImportResult>, ApiError> {
    let envelope = envelope
        .map_err(|e| ApiError::BadRequest(format!("invalid push envelope: {e}")))?
        .into_inner();
    let request = decode_push_message(&envelope)?;

    log::info!(
        "pubsub message {} from {}",
        envelope.message.message_id.as_deref().unwrap_or("-"),
        envelope.subscription
    );

    let result = service.run_with_timeout(&request).await?;
    Ok(Json(result))
}

pub fn decode_push_message(envelope: &PubSubRequest) -> Result<ImportRequest, ApiError> {
    let data = envelope
        .message
        .data
        .as_deref()
        .ok_or_else(|| ApiError::BadRequest("push message has no data".to_string()))?;

    let bytes = STANDARD
        .decode(data.trim())
        .map_err(|e| ApiError::BadRequest(format!("push message data is not base64: {e}")))?;

    serde_json::from_slice(&bytes)
        .map_err(|e| ApiError::BadRequest(format!("push message is not an import request: {e}")))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::PubSubMessage;

    fn envelope(data: Option<String>) -> PubSubRequest {
        PubSubRequest {
            message: PubSubMessage {
                data,
                message_id: Some("42".to_string()),
            },
            subscription: "projects/p/subscriptions/s".to_string(),
        }
    }

    #[test]
    fn decodes_embedded_request() {
        let payload = r#"{"table_name":"t","bucket_name":"b","file_path":"f.csv.gz",
            "instance_connection_name":"p:r:i","columns":["a","b"],"chunk_size":10}"#;
        let request = decode_push_message(&envelope(Some(STANDARD.encode(payload))))
            .expect("decodable message");

        assert_eq!(request.table_name, "t");
        assert_eq!(request.table_schema, "public");
        assert_eq!(request.chunk_size, 10);
        assert_eq!(request.columns, vec!["a", "b"]);
    }

    #[test]
    fn rejects_missing_or_garbled_data() {
        assert!(matches!(
            decode_push_message(&envelope(None)),
            Err(ApiError::BadRequest(_))
        ));
        assert!(matches!(
            decode_push_message(&envelope(Some("%%%".to_string()))),
            Err(ApiError::BadRequest(_))
        ));
        assert!(matches!(
            decode_push_message(&envelope(Some(STANDARD.encode("{\"table_name\":1}")))),
            Err(ApiError::BadRequest(_))
        ));
    }
}
