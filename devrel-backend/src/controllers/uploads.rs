use actix_multipart::Multipart;
use actix_web::{web, HttpResponse};
use futures_util::TryStreamExt;
use serde::Serialize;
use uuid::Uuid;

use crate::errors::{ServiceError, ServiceResult};
use crate::middleware::AuthContext;
use crate::AppState;

/// Accepted content types and the extension files are stored under
const ALLOWED_TYPES: &[(&str, &str)] = &[
    ("image/png", "png"),
    ("image/jpeg", "jpg"),
    ("image/gif", "gif"),
    ("image/webp", "webp"),
    ("text/csv", "csv"),
];

#[derive(Debug, Serialize)]
pub struct UploadResponse {
    pub url: String,
    pub content_type: String,
    pub size: usize,
    pub original_name: Option<String>,
}

pub fn config(cfg: &mut web::ServiceConfig) {
    cfg.service(web::resource("/api/uploads").route(web::post().to(upload)));
}

fn extension_for(content_type: &str) -> Option<&'static str> {
    ALLOWED_TYPES
        .iter()
        .find(|(mime, _)| *mime == content_type)
        .map(|(_, ext)| *ext)
}

async fn upload(
    state: web::Data<AppState>,
    auth: AuthContext,
    mut payload: Multipart,
) -> ServiceResult<HttpResponse> {
    auth.require_user()?;
    let limit = state.config.max_upload_bytes;
    let bad_form = |e: actix_multipart::MultipartError| ServiceError::invalid("file", format!("malformed upload: {}", e));

    while let Some(mut field) = payload.try_next().await.map_err(bad_form)? {
        if field.content_disposition().get_name() != Some("file") {
            continue;
        }

        let content_type = field
            .content_type()
            .map(|m| m.essence_str().to_string())
            .unwrap_or_default();
        let ext = extension_for(&content_type).ok_or_else(|| {
            ServiceError::invalid("file", format!("content type '{}' is not allowed", content_type))
        })?;
        let original_name = field.content_disposition().get_filename().map(str::to_string);

        let mut data = Vec::new();
        while let Some(chunk) = field.try_next().await.map_err(bad_form)? {
            if data.len() + chunk.len() > limit {
                return Err(ServiceError::PayloadTooLarge(format!("uploads are limited to {} bytes", limit)));
            }
            data.extend_from_slice(&chunk);
        }
        if data.is_empty() {
            return Err(ServiceError::invalid("file", "is empty"));
        }

        let tenant_dir = state.config.uploads_dir.join(&auth.tenant_id);
        tokio::fs::create_dir_all(&tenant_dir)
            .await
            .map_err(|e| ServiceError::Internal(format!("cannot create upload directory: {}", e)))?;
        let file_name = format!("{}.{}", Uuid::new_v4(), ext);
        tokio::fs::write(tenant_dir.join(&file_name), &data)
            .await
            .map_err(|e| ServiceError::Internal(format!("cannot store upload: {}", e)))?;

        log::info!("Stored upload {}/{} ({} bytes)", auth.tenant_id, file_name, data.len());
        return Ok(HttpResponse::Created().json(UploadResponse {
            url: format!("/uploads/{}/{}", auth.tenant_id, file_name),
            content_type,
            size: data.len(),
            original_name,
        }));
    }

    Err(ServiceError::invalid("file", "is required"))
}
