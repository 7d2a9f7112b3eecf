//! The user-facing routes. Each classification route reads one file from the
//! request and hands it to the classifier.

use super::{protocol, AppState, WebError};
use crate::error::ValidationError;
use crate::upload::UploadField;
use actix_multipart::Multipart;
use actix_web::{get, post, web, Responder};
use base64::{engine::general_purpose, Engine as _};
use futures_util::TryStreamExt;
use tracing::debug;

type Result<T> = std::result::Result<T, WebError>;

/// Classify an image sent as `multipart/form-data`
#[post("/bristol-chart")]
pub async fn classify_upload(payload: Multipart, state: web::Data<AppState>) -> Result<impl Responder> {
    let gate = state.classifier.gate();
    let field = read_file_field(payload, gate.field_name(), state.max_upload_bytes).await?;
    let upload = gate.accept(field)?;

    let response = state.classifier.classify(upload).await?;
    Ok(web::Json(response))
}

/// Classify an image sent as base 64 in a JSON body
#[post("/bristol-chart/base64")]
pub async fn classify_base64(
    req: web::Json<protocol::Base64Upload>,
    state: web::Data<AppState>,
) -> Result<impl Responder> {
    let req = req.into_inner();
    let field = match req.image {
        Some(image) => {
            let bytes = general_purpose::STANDARD.decode(image)?;
            if bytes.len() > state.max_upload_bytes {
                return Err(ValidationError::TooLarge {
                    limit: state.max_upload_bytes,
                }
                .into());
            }
            Some(UploadField {
                filename: req.filename,
                bytes,
            })
        }
        None => None,
    };
    let upload = state.classifier.gate().accept(field)?;

    let response = state.classifier.classify(upload).await?;
    Ok(web::Json(response))
}

/// The class registry, in model output order
#[get("/classes")]
pub async fn classes(state: web::Data<AppState>) -> impl Responder {
    web::Json(protocol::ClassesResponse {
        classes: state.classifier.registry().classes(),
    })
}

#[get("/health")]
pub async fn health(state: web::Data<AppState>) -> impl Responder {
    web::Json(protocol::HealthResponse {
        status: "ok",
        backend: state.classifier.engine().backend_name(),
        classes: state.classifier.registry().len(),
    })
}

/// Read the first field called `name`, skipping any others. `None` when the
/// body has no such field.
async fn read_file_field(
    mut payload: Multipart,
    name: &str,
    limit: usize,
) -> Result<Option<UploadField>> {
    while let Some(mut field) = payload.try_next().await? {
        if field.name() != Some(name) {
            debug!("skipping multipart field {:?}", field.name());
            continue;
        }

        let filename = field
            .content_disposition()
            .and_then(|cd| cd.get_filename())
            .map(str::to_owned);

        let mut bytes = Vec::new();
        while let Some(chunk) = field.try_next().await? {
            if bytes.len() + chunk.len() > limit {
                return Err(ValidationError::TooLarge { limit }.into());
            }
            bytes.extend_from_slice(&chunk);
        }
        return Ok(Some(UploadField { filename, bytes }));
    }
    Ok(None)
}
