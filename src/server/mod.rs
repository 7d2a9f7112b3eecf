//! The JSON web front end. Routes only read the request, call the
//! [`Classifier`](crate::pipeline::Classifier) and map its errors to status
//! codes.

use crate::error::{ClassifyError, ValidationError};
use crate::pipeline::Classifier;
use actix_web::http::header::ContentType;
use actix_web::http::StatusCode;
use actix_web::{web, HttpResponse};
use std::collections::HashMap;
use tracing::error;

mod protocol;
pub mod routes;

/// Shared by every worker of the HTTP server
pub struct AppState {
    pub classifier: Classifier,
    /// Largest accepted image, in bytes
    pub max_upload_bytes: usize,
}

/// Register every route on an app
pub fn configure(cfg: &mut web::ServiceConfig) {
    cfg.service(routes::classify_upload)
        .service(routes::classify_base64)
        .service(routes::classes)
        .service(routes::health);
}

#[derive(Debug)]
pub struct WebError {
    status: StatusCode,
    message: String,
}

impl WebError {
    pub fn bad_request(message: impl Into<String>) -> Self {
        WebError {
            status: StatusCode::BAD_REQUEST,
            message: message.into(),
        }
    }
}

impl std::fmt::Display for WebError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.message)
    }
}

impl actix_web::error::ResponseError for WebError {
    fn error_response(&self) -> HttpResponse {
        let err = HashMap::from([("errors", vec![self.to_string()])]);

        HttpResponse::build(self.status_code())
            .insert_header(ContentType::json())
            .json(err)
    }

    fn status_code(&self) -> StatusCode {
        self.status
    }
}

fn validation_status(err: &ValidationError) -> StatusCode {
    match err {
        ValidationError::MissingFile(_) | ValidationError::EmptyFilename => StatusCode::BAD_REQUEST,
        ValidationError::UnsupportedExtension { .. } => StatusCode::UNSUPPORTED_MEDIA_TYPE,
        ValidationError::TooLarge { .. } => StatusCode::PAYLOAD_TOO_LARGE,
    }
}

impl From<ValidationError> for WebError {
    fn from(err: ValidationError) -> WebError {
        WebError {
            status: validation_status(&err),
            message: err.to_string(),
        }
    }
}

impl From<ClassifyError> for WebError {
    fn from(err: ClassifyError) -> WebError {
        let status = match &err {
            ClassifyError::Validation(v) => validation_status(v),
            ClassifyError::Decode(_) => StatusCode::UNPROCESSABLE_ENTITY,
            ClassifyError::InferenceTimeout(_) => StatusCode::SERVICE_UNAVAILABLE,
            _ => StatusCode::INTERNAL_SERVER_ERROR,
        };
        if status.is_server_error() {
            error!("classification failed: {err}");
        }
        WebError {
            status,
            message: err.to_string(),
        }
    }
}

impl From<actix_multipart::MultipartError> for WebError {
    fn from(err: actix_multipart::MultipartError) -> Self {
        WebError::bad_request(format!("malformed multipart body: {err}"))
    }
}

impl From<base64::DecodeError> for WebError {
    fn from(err: base64::DecodeError) -> Self {
        WebError::bad_request(format!("image is not valid base64: {err}"))
    }
}
