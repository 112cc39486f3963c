use crate::AppState;
use crate::api::error::AppError;
use crate::services::upload_service::UploadReport;
use axum::{
    Json,
    extract::{Multipart, State, multipart::MultipartError},
    http::{HeaderMap, StatusCode, header},
    response::{IntoResponse, Response},
};
use tracing::{info, warn};

/// Form field carrying the uploaded files
pub const FILES_FIELD: &str = "files";

#[utoipa::path(
    post,
    path = "/upload",
    request_body(
        content = Multipart,
        description = "One or more files under the repeatable `files` field",
        content_type = "multipart/form-data"
    ),
    responses(
        (status = 200, description = "Every file was stored", body = UploadReport),
        (status = 400, description = "No files, malformed form or rejected filename"),
        (status = 409, description = "A file with that name already exists", body = UploadReport),
        (status = 413, description = "Request body exceeds the size limit"),
        (status = 500, description = "Storing or post processing a file failed", body = UploadReport)
    ),
    tag = "upload"
)]
pub async fn upload_files(
    State(state): State<AppState>,
    headers: HeaderMap,
    mut multipart: Multipart,
) -> Result<Response, AppError> {
    let limit = state.config.max_size_bytes();
    if let Some(length) = content_length(&headers)
        && length > limit
    {
        warn!("Rejecting upload of {} bytes, limit is {} bytes", length, limit);
        return Err(payload_too_large());
    }

    // Read the whole form before committing anything, so a request that
    // fails halfway leaves no files behind
    let mut pending = Vec::new();
    while let Some(field) = multipart.next_field().await.map_err(multipart_error)? {
        if field.name() != Some(FILES_FIELD) {
            continue;
        }
        // Browsers send an empty filename for a file input left blank
        let Some(filename) = field
            .file_name()
            .filter(|name| !name.is_empty())
            .map(str::to_string)
        else {
            continue;
        };

        let upload = state
            .uploads
            .stage(filename, field)
            .await
            .map_err(multipart_error)?;
        pending.push(upload);
    }

    if pending.is_empty() {
        return Err(AppError::BadRequest("No files provided".to_string()));
    }

    let report = state.uploads.commit(pending).await;
    info!(
        "📦 Upload finished: {} of {} files stored",
        report.created(),
        report.files.len()
    );

    Ok(render_report(report, &headers))
}

fn render_report(report: UploadReport, headers: &HeaderMap) -> Response {
    let status = report.status();
    if wants_json(headers) {
        (status, Json(report)).into_response()
    } else {
        (status, report.to_text()).into_response()
    }
}

fn payload_too_large() -> AppError {
    AppError::PayloadTooLarge("Request body exceeds the maximum allowed limit".to_string())
}

fn multipart_error(e: MultipartError) -> AppError {
    let status = e.status();
    warn!("Upload rejected while reading the form: {}", e);

    if status == StatusCode::PAYLOAD_TOO_LARGE {
        payload_too_large()
    } else if status.is_server_error() {
        AppError::Internal(e.body_text())
    } else {
        AppError::BadRequest(e.body_text())
    }
}

fn content_length(headers: &HeaderMap) -> Option<u64> {
    headers
        .get(header::CONTENT_LENGTH)
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.trim().parse().ok())
}

fn wants_json(headers: &HeaderMap) -> bool {
    headers
        .get_all(header::ACCEPT)
        .iter()
        .filter_map(|v| v.to_str().ok())
        .flat_map(|v| v.split(','))
        .filter_map(|item| item.trim().parse::<mime::Mime>().ok())
        .any(|m| m.essence_str() == mime::APPLICATION_JSON.essence_str())
}
