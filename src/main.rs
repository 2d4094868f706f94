//! Image Extractor - OCR / Vision / hybrid content extraction server.

mod chain;
mod config;
mod error;
mod features;
mod ocr;
mod processor;
mod quality;
mod result;
mod strategy;
mod upload;
mod vision;

#[cfg(test)]
mod testing;

use axum::{
    extract::{DefaultBodyLimit, Multipart, Query, State},
    http::StatusCode,
    response::Json,
    routing::{get, post},
    Router,
};
use chain::Provider;
use config::{ProcessingConfig, ProviderConfig, ServerConfig};
use processor::ImageProcessor;
use result::ProcessingResult;
use std::sync::Arc;
use strategy::ProcessorKind;
use tokio_util::sync::CancellationToken;
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;
use tracing::{info, Instrument};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};
use upload::{validate_image, UploadedImage, ValidationReport};

/// Application state shared across handlers.
#[derive(Clone)]
struct AppState {
    processor: Arc<ImageProcessor>,
    server: Arc<ServerConfig>,
    shutdown: CancellationToken,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Load .env file if present
    dotenvy::dotenv().ok();

    // Initialize tracing
    tracing_subscriber::registry()
        .with(tracing_subscriber::EnvFilter::try_from_default_env()
            .unwrap_or_else(|_| "image_extractor=debug,tower_http=debug".into()))
        .with(tracing_subscriber::fmt::layer())
        .init();

    let providers = ProviderConfig::load()?;
    let server = ServerConfig::from_env();

    let client = reqwest::Client::builder().build()?;
    let ocr_chain = ocr::build_chain(&providers, &client)?;
    let vision_chain = vision::build_chain(&providers, &client)?;
    info!(
        "OCR chain: {:?}, vision chain: {:?}, per-call timeout {:?}",
        providers.ocr_ids(),
        providers.vision_ids(),
        providers.call_timeout()
    );

    let shutdown = CancellationToken::new();
    let bind_addr = server.bind_addr.clone();

    let state = AppState {
        processor: Arc::new(ImageProcessor::new(ocr_chain, vision_chain)),
        server: Arc::new(server),
        shutdown: shutdown.clone(),
    };

    let listener = tokio::net::TcpListener::bind(&bind_addr).await?;
    info!("Server listening on http://{}", bind_addr);
    axum::serve(listener, router(state))
        .with_graceful_shutdown(shutdown_signal(shutdown))
        .await?;

    Ok(())
}

fn router(state: AppState) -> Router {
    let body_limit = body_limit(state.server.limits.max_bytes);
    Router::new()
        .route("/health", get(health))
        .route("/providers", get(list_providers))
        .route("/validate", post(validate_upload))
        .route("/process", post(process_upload))
        .layer(DefaultBodyLimit::max(body_limit))
        .layer(TraceLayer::new_for_http())
        .layer(CorsLayer::permissive())
        .with_state(state)
}

/// Room for the multipart framing on top of the largest accepted image.
fn body_limit(max_image_bytes: u64) -> usize {
    usize::try_from(max_image_bytes)
        .unwrap_or(usize::MAX)
        .saturating_add(1024 * 1024)
}

// ============================================================================
// Handlers
// ============================================================================

/// Health check endpoint.
async fn health() -> &'static str {
    "ok"
}

#[derive(serde::Serialize)]
struct ProviderStatus {
    id: String,
    available: bool,
}

#[derive(serde::Serialize)]
struct ProvidersResponse {
    ocr: Vec<ProviderStatus>,
    vision: Vec<ProviderStatus>,
}

fn status_of<P: Provider + ?Sized>(providers: &[Arc<P>]) -> Vec<ProviderStatus> {
    providers
        .iter()
        .map(|p| ProviderStatus {
            id: p.name().to_string(),
            available: p.is_available(),
        })
        .collect()
}

/// Configured chain order and which providers have credentials.
async fn list_providers(State(state): State<AppState>) -> Json<ProvidersResponse> {
    Json(ProvidersResponse {
        ocr: status_of(state.processor.ocr_chain().providers()),
        vision: status_of(state.processor.vision_chain().providers()),
    })
}

/// Check size and format without touching any provider.
async fn validate_upload(
    State(state): State<AppState>,
    multipart: Multipart,
) -> Result<Json<ValidationReport>, (StatusCode, String)> {
    let image = read_upload(multipart).await?;
    Ok(Json(validate_image(&image, &state.server.limits)))
}

#[derive(serde::Deserialize)]
struct ProcessQuery {
    method: Option<String>,
    fallback_to_vision: Option<bool>,
}

/// Upload an image and extract its content.
async fn process_upload(
    State(state): State<AppState>,
    Query(query): Query<ProcessQuery>,
    multipart: Multipart,
) -> Result<Json<ProcessingResult>, (StatusCode, String)> {
    let method = parse_method(query.method.as_deref())?;
    let image = read_upload(multipart).await?;
    let config = ProcessingConfig {
        method,
        fallback_to_vision: query.fallback_to_vision.unwrap_or(true),
        limits: state.server.limits.clone(),
    };

    let request_id = uuid::Uuid::new_v4();
    let span = tracing::info_span!("process", %request_id);
    info!(
        parent: &span,
        "Received {} ({} bytes, {}) method={:?}",
        image.filename,
        image.byte_size(),
        image.mime_type,
        config.method
    );

    // Cancelled on server shutdown or when the request deadline passes.
    let cancel = state.shutdown.child_token();
    let deadline = {
        let cancel = cancel.clone();
        let after = state.server.request_deadline;
        tokio::spawn(async move {
            tokio::time::sleep(after).await;
            cancel.cancel();
        })
    };

    let result = state
        .processor
        .process_image(&image, &config, &cancel)
        .instrument(span.clone())
        .await;
    deadline.abort();

    info!(
        parent: &span,
        "Finished: success={} method={:?} in {}ms",
        result.success(),
        result.method,
        result.processing_time_ms
    );
    Ok(Json(result))
}

// ============================================================================
// Helper functions
// ============================================================================

/// `None` (or `auto`) lets the feature analyzer pick the processor.
fn parse_method(method: Option<&str>) -> Result<Option<ProcessorKind>, (StatusCode, String)> {
    match method {
        None | Some("auto") => Ok(None),
        Some(m) => ProcessorKind::from_str(m).map(Some).ok_or_else(|| {
            (
                StatusCode::BAD_REQUEST,
                format!("Unknown method: {}. Expected ocr, vision, hybrid or auto", m),
            )
        }),
    }
}

/// Read the `file` field plus optional `width` / `height` fields.
async fn read_upload(mut multipart: Multipart) -> Result<UploadedImage, (StatusCode, String)> {
    let mut image: Option<UploadedImage> = None;
    let mut width = None;
    let mut height = None;

    while let Some(field) = multipart.next_field().await.map_err(|e| {
        (StatusCode::BAD_REQUEST, format!("Multipart error: {}", e))
    })? {
        let name = field.name().map(str::to_string);
        match name.as_deref() {
            Some("file") => {
                let filename = field.file_name().unwrap_or("image").to_string();
                let mime_type = field
                    .content_type()
                    .unwrap_or("application/octet-stream")
                    .to_string();
                let data = field.bytes().await.map_err(|e| {
                    (StatusCode::BAD_REQUEST, format!("Failed to read file: {}", e))
                })?;
                image = Some(UploadedImage::new(filename, mime_type, data.to_vec()));
            }
            Some("width") => width = parse_dimension(field).await?,
            Some("height") => height = parse_dimension(field).await?,
            _ => {}
        }
    }

    let mut image =
        image.ok_or_else(|| (StatusCode::BAD_REQUEST, "No file uploaded".to_string()))?;
    image.width = width;
    image.height = height;
    Ok(image)
}

async fn parse_dimension(
    field: axum::extract::multipart::Field<'_>,
) -> Result<Option<u32>, (StatusCode, String)> {
    let text = field.text().await.map_err(|e| {
        (StatusCode::BAD_REQUEST, format!("Failed to read field: {}", e))
    })?;
    text.trim()
        .parse::<u32>()
        .map(Some)
        .map_err(|_| (StatusCode::BAD_REQUEST, format!("Invalid dimension: {}", text)))
}

async fn shutdown_signal(shutdown: CancellationToken) {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            tracing::error!("Failed to listen for Ctrl+C: {}", e);
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut signal) => {
                signal.recv().await;
            }
            Err(e) => {
                tracing::error!("Failed to install SIGTERM handler: {}", e);
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }

    info!("Shutdown signal received, cancelling in-flight processing...");
    shutdown.cancel();
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::chain::FallbackChain;
    use crate::ocr::OcrProvider;
    use crate::testing::{StubOcr, StubVision};
    use crate::upload::ImageLimits;
    use crate::vision::VisionProvider;
    use axum::body::Body;
    use axum::http::{header, Request};
    use axum::response::Response;
    use pretty_assertions::assert_eq;
    use std::time::Duration;
    use tower::ServiceExt;

    const BOUNDARY: &str = "image-extractor-test";
    const PNG: &[u8] = b"\x89PNG\r\n\x1a\nstub";

    fn test_app(ocr: &[Arc<StubOcr>], vision: &[Arc<StubVision>]) -> Router {
        let processor = ImageProcessor::new(
            FallbackChain::new(
                "ocr",
                ocr.iter().map(|s| s.clone() as Arc<dyn OcrProvider>).collect(),
            ),
            FallbackChain::new(
                "vision",
                vision
                    .iter()
                    .map(|s| s.clone() as Arc<dyn VisionProvider>)
                    .collect(),
            ),
        );
        router(AppState {
            processor: Arc::new(processor),
            server: Arc::new(ServerConfig {
                bind_addr: "127.0.0.1:0".to_string(),
                request_deadline: Duration::from_secs(60),
                limits: ImageLimits::default(),
            }),
            shutdown: CancellationToken::new(),
        })
    }

    /// Multipart body with an optional `file` part followed by plain text fields.
    fn multipart(file: Option<(&str, &str, &[u8])>, fields: &[(&str, &str)]) -> Body {
        let mut body = Vec::new();
        if let Some((filename, mime, data)) = file {
            body.extend_from_slice(
                format!(
                    "--{BOUNDARY}\r\nContent-Disposition: form-data; name=\"file\"; filename=\"{filename}\"\r\nContent-Type: {mime}\r\n\r\n"
                )
                .as_bytes(),
            );
            body.extend_from_slice(data);
            body.extend_from_slice(b"\r\n");
        }
        for (name, value) in fields {
            body.extend_from_slice(
                format!(
                    "--{BOUNDARY}\r\nContent-Disposition: form-data; name=\"{name}\"\r\n\r\n{value}\r\n"
                )
                .as_bytes(),
            );
        }
        body.extend_from_slice(format!("--{BOUNDARY}--\r\n").as_bytes());
        Body::from(body)
    }

    fn post_multipart(uri: &str, body: Body) -> Request<Body> {
        Request::builder()
            .method("POST")
            .uri(uri)
            .header(
                header::CONTENT_TYPE,
                format!("multipart/form-data; boundary={BOUNDARY}"),
            )
            .body(body)
            .unwrap()
    }

    async fn json_body(response: Response) -> (StatusCode, serde_json::Value) {
        let status = response.status();
        let body = axum::body::to_bytes(response.into_body(), usize::MAX)
            .await
            .unwrap();
        (status, serde_json::from_slice(&body).unwrap())
    }

    #[test]
    fn test_parse_method() {
        assert_eq!(parse_method(None).unwrap(), None);
        assert_eq!(parse_method(Some("auto")).unwrap(), None);
        assert_eq!(parse_method(Some("ocr")).unwrap(), Some(ProcessorKind::Ocr));
        assert_eq!(parse_method(Some("vision")).unwrap(), Some(ProcessorKind::Vision));
        assert_eq!(parse_method(Some("hybrid")).unwrap(), Some(ProcessorKind::Hybrid));
        assert_eq!(parse_method(Some("magic")).unwrap_err().0, StatusCode::BAD_REQUEST);
    }

    #[test]
    fn test_body_limit_never_overflows() {
        assert_eq!(body_limit(10 * 1024 * 1024), 11 * 1024 * 1024);
        assert_eq!(body_limit(u64::MAX), usize::MAX);
    }

    #[tokio::test]
    async fn test_validate_never_calls_providers() {
        let ocr = vec![StubOcr::text("ocr", "unused text")];
        let vision = vec![StubVision::text("vision", "unused")];
        let app = test_app(&ocr, &vision);

        let (status, json) = json_body(
            app.clone()
                .oneshot(post_multipart(
                    "/validate",
                    multipart(Some(("notes.pdf", "application/pdf", b"%PDF-1.4")), &[]),
                ))
                .await
                .unwrap(),
        )
        .await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(json["valid"], false);
        assert!(json["error"].as_str().unwrap().contains("pdf"));

        let (status, json) = json_body(
            app.oneshot(post_multipart(
                "/validate",
                multipart(Some(("receipt.png", "image/png", PNG)), &[]),
            ))
            .await
            .unwrap(),
        )
        .await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(json["valid"], true);
        assert_eq!(ocr[0].calls(), 0);
        assert_eq!(vision[0].calls(), 0);
    }

    #[tokio::test]
    async fn test_method_query_selects_the_chain() {
        for (query, expected, ocr_calls, vision_calls) in [
            ("ocr", "ocr", 1, 0),
            ("vision", "vision", 0, 1),
            ("hybrid", "ocr", 1, 0),
        ] {
            let ocr = vec![StubOcr::text("ocr", "Invoice 2024-001, total 99.00")];
            let vision = vec![StubVision::text("vision", "A printed invoice")];
            let (status, json) = json_body(
                test_app(&ocr, &vision)
                    .oneshot(post_multipart(
                        &format!("/process?method={query}"),
                        multipart(Some(("receipt.png", "image/png", PNG)), &[]),
                    ))
                    .await
                    .unwrap(),
            )
            .await;

            assert_eq!(status, StatusCode::OK, "method={query}");
            assert_eq!(json["success"], true, "method={query}");
            assert_eq!(json["method"], expected, "method={query}");
            assert_eq!(ocr[0].calls(), ocr_calls, "method={query}");
            assert_eq!(vision[0].calls(), vision_calls, "method={query}");
        }
    }

    #[tokio::test]
    async fn test_auto_mode_uses_uploaded_dimensions() {
        let ocr = vec![StubOcr::text("ocr", "plenty of OCR text here")];
        let vision = vec![StubVision::text("vision", "A panoramic skyline")];
        let (status, json) = json_body(
            test_app(&ocr, &vision)
                .oneshot(post_multipart(
                    "/process?method=auto",
                    multipart(
                        Some(("skyline.png", "image/png", PNG)),
                        &[("width", "3000"), ("height", " 1000 ")],
                    ),
                ))
                .await
                .unwrap(),
        )
        .await;

        assert_eq!(status, StatusCode::OK);
        assert_eq!(json["method"], "vision");
        assert_eq!(json["strategy"], "vision-first");
        assert_eq!(ocr[0].calls(), 0);
    }

    #[tokio::test]
    async fn test_rejected_image_and_failed_chains_still_return_200() {
        let ocr = vec![StubOcr::failing("ocr", "HTTP 503")];
        let vision = vec![StubVision::failing("vision", "HTTP 500")];
        let app = test_app(&ocr, &vision);

        let (status, json) = json_body(
            app.clone()
                .oneshot(post_multipart(
                    "/process",
                    multipart(Some(("notes.pdf", "application/pdf", b"%PDF-1.4")), &[]),
                ))
                .await
                .unwrap(),
        )
        .await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(json["success"], false);
        assert_eq!(json["error_kind"], "validation");
        assert_eq!(ocr[0].calls(), 0);

        let (status, json) = json_body(
            app.oneshot(post_multipart(
                "/process?method=hybrid",
                multipart(Some(("receipt.png", "image/png", PNG)), &[]),
            ))
            .await
            .unwrap(),
        )
        .await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(json["success"], false);
        assert_eq!(json["error_kind"], "chain_exhausted");
        assert_eq!(vision[0].calls(), 1);
    }

    #[tokio::test]
    async fn test_malformed_requests_are_bad_request() {
        let ocr = vec![StubOcr::text("ocr", "unused text")];
        let vision = vec![StubVision::text("vision", "unused")];
        let app = test_app(&ocr, &vision);

        let cases = [
            (
                "/process?method=magic",
                multipart(Some(("receipt.png", "image/png", PNG)), &[]),
            ),
            (
                "/process",
                multipart(Some(("receipt.png", "image/png", PNG)), &[("width", "wide")]),
            ),
            ("/process", multipart(None, &[("width", "800")])),
        ];
        for (uri, body) in cases {
            let response = app.clone().oneshot(post_multipart(uri, body)).await.unwrap();
            assert_eq!(response.status(), StatusCode::BAD_REQUEST, "{uri}");
        }
        assert_eq!(ocr[0].calls(), 0);
        assert_eq!(vision[0].calls(), 0);
    }
}
