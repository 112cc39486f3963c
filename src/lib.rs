pub mod api;
pub mod config;
pub mod services;
pub mod utils;

use crate::config::UploadConfig;
use crate::services::upload_service::UploadService;
use axum::{
    Json, Router,
    extract::DefaultBodyLimit,
    middleware::from_fn,
    routing::{get, get_service, post},
};
use std::sync::Arc;
use tower_http::services::ServeFile;
use utoipa::OpenApi;

#[derive(OpenApi)]
#[openapi(
    paths(
        api::handlers::upload::upload_files,
        api::handlers::health::health_check,
    ),
    components(
        schemas(
            services::upload_service::UploadReport,
            services::upload_service::FileResult,
            services::upload_service::FileStatus,
            api::handlers::health::HealthResponse,
        )
    ),
    tags(
        (name = "upload", description = "Multipart file upload"),
        (name = "system", description = "Service status")
    )
)]
pub struct ApiDoc;

#[derive(Clone)]
pub struct AppState {
    pub config: Arc<UploadConfig>,
    pub uploads: Arc<UploadService>,
}

impl AppState {
    pub fn new(config: UploadConfig) -> Self {
        let uploads = UploadService::from_config(&config);
        Self::with_uploads(config, uploads)
    }

    pub fn with_uploads(config: UploadConfig, uploads: UploadService) -> Self {
        Self {
            config: Arc::new(config),
            uploads: Arc::new(uploads),
        }
    }
}

pub fn create_app(state: AppState) -> Router {
    let index = ServeFile::new_with_mime(&state.config.index_file, &mime::TEXT_HTML_UTF_8);

    Router::new()
        .route("/", get_service(index))
        .route(
            "/upload",
            post(api::handlers::upload_files)
                .layer(DefaultBodyLimit::max(state.config.body_limit())),
        )
        .route("/health", get(api::handlers::health_check))
        .route("/api-docs/openapi.json", get(openapi_json))
        .layer(from_fn(api::middleware::request_id_middleware))
        .with_state(state)
}

async fn openapi_json() -> Json<utoipa::openapi::OpenApi> {
    Json(ApiDoc::openapi())
}
