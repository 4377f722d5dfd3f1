use axum::{extract::State, response::Json, routing::get, routing::post, Router};
use axum_server::{tls_rustls::RustlsConfig, Handle};
use kube::core::{admission::AdmissionReview, DynamicObject};
use std::net::SocketAddr;
use std::sync::Arc;
use tekton_operator::settings::Platform;
use tokio::time::{sleep, Duration};
use tower_http::trace::TraceLayer;
use tracing::{info, warn};

mod cert_reloader;
mod validator;

use cert_reloader::CertificateReloader;
use validator::ComponentValidator;

const CERT_DIR: &str = "/etc/certs";
const HEALTH_ADDR: &str = "0.0.0.0:8080";
const WEBHOOK_ADDR: &str = "0.0.0.0:8443";

#[derive(Clone)]
struct AppState {
    validator: ComponentValidator,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    rustls::crypto::CryptoProvider::install_default(rustls::crypto::aws_lc_rs::default_provider()).ok();

    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .init();

    let platform = Platform::from_env_value(std::env::var("PLATFORM").ok().as_deref());
    info!("Starting tekton operator admission webhook on {platform}");
    let state = Arc::new(AppState {
        validator: ComponentValidator::new(platform),
    });

    tokio::spawn(serve_health());

    let reloader = CertificateReloader::new();
    reloader.start_watching(CERT_DIR).await?;

    let addr: SocketAddr = WEBHOOK_ADDR.parse()?;
    // Each pass serves with the certificate on disk until it rotates.
    loop {
        let tls = RustlsConfig::from_pem_file(
            format!("{CERT_DIR}/tls.crt"),
            format!("{CERT_DIR}/tls.key"),
        )
        .await?;
        let app = Router::new()
            .route("/validate", post(validate_handler))
            .layer(TraceLayer::new_for_http())
            .with_state(state.clone());

        let handle = Handle::new();
        let server = tokio::spawn(
            axum_server::bind_rustls(addr, tls)
                .handle(handle.clone())
                .serve(app.into_make_service()),
        );
        info!("Admission webhook listening on {WEBHOOK_ADDR}");

        while !server.is_finished() && !reloader.take_restart() {
            sleep(Duration::from_secs(1)).await;
        }
        if server.is_finished() {
            match server.await {
                Ok(Ok(())) => return Ok(()),
                Ok(Err(e)) => warn!("Webhook server error: {}", e),
                Err(e) => warn!("Webhook server task failed: {}", e),
            }
        } else {
            info!("Certificate rotated, restarting the webhook server");
            handle.graceful_shutdown(Some(Duration::from_secs(5)));
            let _ = server.await;
        }
        sleep(Duration::from_secs(1)).await;
    }
}

async fn serve_health() {
    let app = Router::new().route("/health", get(health_handler));
    let listener = match tokio::net::TcpListener::bind(HEALTH_ADDR).await {
        Ok(listener) => listener,
        Err(e) => {
            warn!("Health server failed to bind {HEALTH_ADDR}: {}", e);
            return;
        }
    };
    info!("Health server listening on {HEALTH_ADDR}");
    if let Err(e) = axum::serve(listener, app).await {
        warn!("Health server error: {}", e);
    }
}

async fn validate_handler(
    State(state): State<Arc<AppState>>,
    Json(review): Json<AdmissionReview<DynamicObject>>,
) -> Json<AdmissionReview<DynamicObject>> {
    info!("Received admission review request");
    Json(state.validator.review(review))
}

async fn health_handler() -> &'static str {
    "healthy"
}
