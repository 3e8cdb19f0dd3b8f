use crate::pipeline::{ImportError, ImportFailure, ImportState};
use rocket::http::Status;
use rocket::response::{self, Responder};
use rocket::{Request, Response};
use serde::Serialize;
use std::io::Cursor;

#[derive(Debug)]
pub enum ApiError {
    Import(ImportFailure),
    BadRequest(String),
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct ErrorResponse {
    error: String,
    message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    state: Option<ImportState>,
    rows_committed: u64,
}

impl ApiError {
    pub fn status(&self) -> Status {
        match self {
            ApiError::Import(failure) => match failure.error {
                ImportError::Configuration(_)
                | ImportError::StorageAccess(_)
                | ImportError::Parse(_)
                | ImportError::Load(_) => Status::BadRequest,
                ImportError::TableNotFound(_) => Status::NotFound,
                ImportError::Connection(_) => Status::InternalServerError,
                ImportError::Timeout(_) => Status::GatewayTimeout,
            },
            ApiError::BadRequest(_) => Status::BadRequest,
        }
    }
}

impl<'r> Responder<'r, 'static> for ApiError {
    fn respond_to(self, _: &'r Request<'_>) -> response::Result<'static> {
        let status = self.status();
        let error_response = match self {
            ApiError::Import(failure) => {
                log::debug!("import failed: {}", failure);
                ErrorResponse {
                    error: failure.error.kind().to_string(),
                    message: failure.error.to_string(),
                    state: Some(failure.state),
                    rows_committed: failure.rows_committed,
                }
            }
            ApiError::BadRequest(msg) => {
                log::debug!("bad request: {}", msg);
                ErrorResponse {
                    error: "BadRequest".to_string(),
                    message: msg,
                    state: None,
                    rows_committed: 0,
                }
            }
        };

        let json = serde_json::to_string(&error_response)
            .unwrap_or_else(|_| r#"{"error":"SerializationError","message":"Failed to serialize error"}"#.to_string());

        Response::build()
            .status(status)
            .header(rocket::http::ContentType::JSON)
            .sized_body(json.len(), Cursor::new(json))
            .ok()
    }
}

impl From<ImportFailure> for ApiError {
    fn from(failure: ImportFailure) -> Self {
        ApiError::Import(failure)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::StorageError;
    use std::time::Duration;

    fn status_of(error: ImportError) -> Status {
        ApiError::from(ImportFailure::new(error, ImportState::Aborted)).status()
    }

    #[test]
    fn import_errors_map_to_statuses() {
        assert_eq!(status_of(ImportError::Configuration("x".into())), Status::BadRequest);
        assert_eq!(
            status_of(ImportError::StorageAccess(StorageError::NotFound {
                bucket: "b".into(),
                path: "p".into(),
            })),
            Status::BadRequest
        );
        assert_eq!(status_of(ImportError::Parse("x".into())), Status::BadRequest);
        assert_eq!(status_of(ImportError::Load("x".into())), Status::BadRequest);
        assert_eq!(status_of(ImportError::TableNotFound("x".into())), Status::NotFound);
        assert_eq!(
            status_of(ImportError::Connection("x".into())),
            Status::InternalServerError
        );
        assert_eq!(
            status_of(ImportError::Timeout(Duration::from_secs(1))),
            Status::GatewayTimeout
        );
    }

    #[test]
    fn malformed_bodies_are_bad_requests() {
        let error = ApiError::BadRequest("invalid import request".into());
        assert_eq!(error.status(), Status::BadRequest);
    }

    #[test]
    fn error_body_uses_camel_case() {
        let body = serde_json::to_value(ErrorResponse {
            error: "LoadError".into(),
            message: "m".into(),
            state: Some(ImportState::Streaming),
            rows_committed: 4,
        })
        .expect("serializable");

        assert_eq!(body["state"], "streaming");
        assert_eq!(body["rowsCommitted"], 4);
    }
}
