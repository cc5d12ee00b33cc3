pub mod api;
pub mod config;
pub mod infrastructure;
pub mod services;
pub mod utils;

use crate::config::AppConfig;
use crate::services::job_service::JobService;
use crate::services::processor::ExternalProcessor;
use crate::services::retention::RetentionSweeper;
use crate::services::storage::StorageArea;
use crate::services::upload_service::UploadService;
use axum::{
    Router,
    http::Method,
    middleware::from_fn,
    routing::{delete, get, post},
};
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tower_http::cors::{Any, CorsLayer};
use tower_http::services::ServeDir;
use tower_http::trace::TraceLayer;
use utoipa::OpenApi;
use utoipa_swagger_ui::SwaggerUi;

#[derive(OpenApi)]
#[openapi(
    paths(
        api::handlers::health::health_check,
        api::handlers::upload::upload_file,
        api::handlers::process::process_data,
        api::handlers::files::download_file,
        api::handlers::files::list_files,
        api::handlers::files::list_outputs,
        api::handlers::cleanup::cleanup_files,
    ),
    components(
        schemas(
            api::handlers::health::HealthResponse,
            api::handlers::OperationResponse,
            api::handlers::UploadedFileEntry,
            api::handlers::OutputFileEntry,
            api::handlers::UploadListResponse,
            api::handlers::OutputListResponse,
            api::handlers::CleanupResponse,
            services::job_service::ProcessingRequest,
            services::job_service::RateConfig,
        )
    ),
    tags(
        (name = "system", description = "Service status"),
        (name = "files", description = "Staged uploads and generated dashboards"),
        (name = "jobs", description = "Dashboard processing")
    )
)]
pub struct ApiDoc;

#[derive(Clone)]
pub struct AppState {
    pub uploads: Arc<StorageArea>,
    pub outputs: Arc<StorageArea>,
    pub upload_service: Arc<UploadService>,
    pub job_service: Arc<JobService>,
    pub retention: Arc<RetentionSweeper>,
    pub config: AppConfig,
    pub shutdown: CancellationToken,
}

impl AppState {
    /// Wires the services around two storage areas and a processor.
    pub fn new(
        config: AppConfig,
        uploads: Arc<StorageArea>,
        outputs: Arc<StorageArea>,
        processor: Arc<dyn ExternalProcessor>,
        shutdown: CancellationToken,
    ) -> Self {
        let upload_service = Arc::new(UploadService::new(
            uploads.clone(),
            config.allowed_extensions.clone(),
            config.max_upload_size as u64,
        ));
        let job_service = Arc::new(JobService::new(uploads.clone(), outputs.clone(), processor));
        let retention = Arc::new(RetentionSweeper::new(
            uploads.clone(),
            outputs.clone(),
            config.retention,
        ));

        Self {
            uploads,
            outputs,
            upload_service,
            job_service,
            retention,
            config,
            shutdown,
        }
    }
}

fn api_routes() -> Router<AppState> {
    Router::new()
        .route("/health", get(api::handlers::health::health_check))
        .route("/upload", post(api::handlers::upload::upload_file))
        .route("/process", post(api::handlers::process::process_data))
        .route(
            "/download/:filename",
            get(api::handlers::files::download_file),
        )
        .route("/files", get(api::handlers::files::list_files))
        .route("/outputs", get(api::handlers::files::list_outputs))
        .route("/cleanup", delete(api::handlers::cleanup::cleanup_files))
}

pub fn create_app(state: AppState) -> Router {
    // Room for multipart framing; the file itself is held to max_upload_size while staging
    let body_limit = state.config.max_upload_size + 1024 * 1024;
    let static_files = ServeDir::new(&state.config.static_dir);

    Router::new()
        .merge(SwaggerUi::new("/swagger-ui").url("/api-docs/openapi.json", ApiDoc::openapi()))
        .nest("/api", api_routes())
        .merge(api_routes())
        .fallback_service(static_files)
        .layer(
            CorsLayer::new()
                .allow_origin(Any)
                .allow_methods([Method::GET, Method::POST, Method::DELETE, Method::OPTIONS])
                .allow_headers(Any),
        )
        .layer(axum::extract::DefaultBodyLimit::max(body_limit))
        .layer(
            TraceLayer::new_for_http()
                .make_span_with(|request: &axum::http::Request<_>| {
                    let request_id = request
                        .headers()
                        .get(&api::middleware::request_id::REQUEST_ID_HEADER)
                        .and_then(|v| v.to_str().ok())
                        .unwrap_or("unknown");
                    tracing::info_span!(
                        "http_request",
                        method = %request.method(),
                        uri = %request.uri(),
                        request_id = %request_id,
                    )
                })
                .on_request(|request: &axum::http::Request<_>, _span: &tracing::Span| {
                    tracing::info!("📥 {} {}", request.method(), request.uri());
                })
                .on_response(
                    |response: &axum::http::Response<_>,
                     latency: std::time::Duration,
                     _span: &tracing::Span| {
                        tracing::info!(
                            "📤 Finished in {:?} with status {}",
                            latency,
                            response.status()
                        );
                    },
                ),
        )
        // Outermost so the trace span sees the assigned id
        .layer(from_fn(api::middleware::request_id::request_id_middleware))
        .with_state(state)
}
