//! Admission webhook server.
//!
//! Provides HTTP endpoints for Kubernetes admission webhooks.
//!
//! To enable webhooks:
//! 1. Deploy cert-manager for TLS certificates
//! 2. Create a ValidatingWebhookConfiguration
//! 3. Mount the TLS certificate secret to the operator pod at /etc/webhook/certs/
//!
//! The webhook server starts automatically when certificates are present.

use axum::{Json, Router, http::StatusCode, routing::post};
use kube::Resource;
use kube::core::DynamicObject;
use kube::core::admission::{AdmissionRequest, AdmissionResponse, AdmissionReview, Operation};
use serde::de::DeserializeOwned;
use thiserror::Error;
use tracing::{debug, error, info, warn};

use crate::crd::{EcsCluster, NautilusCluster};
use crate::webhooks::policies::{
    ValidationContext, ValidationResult, validate_ecs_cluster, validate_nautilus_cluster,
};

/// Default path to webhook TLS certificate
pub const WEBHOOK_CERT_PATH: &str = "/etc/webhook/certs/tls.crt";
/// Default path to webhook TLS private key
pub const WEBHOOK_KEY_PATH: &str = "/etc/webhook/certs/tls.key";
/// Default webhook server port
pub const WEBHOOK_PORT: u16 = 9443;

type ReviewResponse = (StatusCode, Json<AdmissionReview<DynamicObject>>);

fn ok(review: AdmissionReview<DynamicObject>) -> ReviewResponse {
    (StatusCode::OK, Json(review))
}

/// Deny `request`, prefixing the message with `[reason]`.
///
/// The admission response only carries a message, so the policy reason
/// travels inside it.
fn deny<T: Resource<DynamicType = ()>>(
    request: &AdmissionRequest<T>,
    reason: &str,
    message: &str,
) -> ReviewResponse {
    ok(AdmissionResponse::from(request)
        .deny(format!("[{reason}] {message}"))
        .into_review())
}

/// Create the webhook router
pub fn create_webhook_router() -> Router {
    Router::new()
        .route("/validate-nautiluscluster", post(validate_nautiluscluster))
        .route("/validate-ecscluster", post(validate_ecscluster))
}

async fn validate_nautiluscluster(
    Json(review): Json<AdmissionReview<NautilusCluster>>,
) -> ReviewResponse {
    handle_review(review, validate_nautilus_cluster)
}

async fn validate_ecscluster(Json(review): Json<AdmissionReview<EcsCluster>>) -> ReviewResponse {
    handle_review(review, validate_ecs_cluster)
}

/// Run `policies` against the object of an admission review.
///
/// Deletions are always admitted. A review without a request is answered
/// with 400; every other outcome is a 200 carrying the verdict.
fn handle_review<K>(
    review: AdmissionReview<K>,
    policies: fn(&ValidationContext<'_, K>) -> ValidationResult,
) -> ReviewResponse
where
    K: Resource<DynamicType = ()> + Clone + DeserializeOwned,
{
    let request: AdmissionRequest<K> = match review.try_into() {
        Ok(request) => request,
        Err(e) => {
            error!(error = %e, "Malformed AdmissionReview");
            let review = AdmissionResponse::invalid(format!("Invalid AdmissionReview: {e}"));
            return (StatusCode::BAD_REQUEST, Json(review.into_review()));
        }
    };

    let kind = K::kind(&());
    debug!(
        uid = %request.uid,
        kind = %kind,
        operation = ?request.operation,
        namespace = ?request.namespace,
        name = ?request.name,
        "Reviewing admission request"
    );

    if request.operation == Operation::Delete {
        return ok(AdmissionResponse::from(&request).into_review());
    }

    let Some(resource) = request.object.as_ref() else {
        error!(uid = %request.uid, kind = %kind, "Admission request has no object");
        return deny(&request, "InvalidRequest", "Missing object in request");
    };

    let verdict = policies(&ValidationContext {
        resource,
        old_resource: request.old_object.as_ref(),
        dry_run: request.dry_run,
        namespace: request.namespace.as_deref(),
    });

    if verdict.allowed {
        info!(uid = %request.uid, kind = %kind, "Admitted");
        return ok(AdmissionResponse::from(&request).into_review());
    }

    let reason = verdict.reason.as_deref().unwrap_or("ValidationFailed");
    let message = verdict.message.as_deref().unwrap_or("Validation failed");
    warn!(uid = %request.uid, kind = %kind, reason, message, "Denied");
    deny(&request, reason, message)
}

/// Errors that can occur when running the webhook server
#[derive(Error, Debug)]
pub enum WebhookError {
    #[error("TLS configuration error: {0}")]
    TlsConfig(String),
    #[error("Webhook server error: {0}")]
    Server(String),
}

/// Run the webhook server with TLS
///
/// Binds to 0.0.0.0:9443 and serves the validation endpoints.
/// TLS certificates are loaded from the paths specified.
pub async fn run_webhook_server(cert_path: &str, key_path: &str) -> Result<(), WebhookError> {
    use axum_server::tls_rustls::RustlsConfig;
    use std::net::SocketAddr;
    use std::path::PathBuf;

    let app = create_webhook_router();

    let config = RustlsConfig::from_pem_file(PathBuf::from(cert_path), PathBuf::from(key_path))
        .await
        .map_err(|e| WebhookError::TlsConfig(e.to_string()))?;

    let addr = SocketAddr::from(([0, 0, 0, 0], WEBHOOK_PORT));
    info!(port = WEBHOOK_PORT, "Webhook server listening with TLS");

    axum_server::bind_rustls(addr, config)
        .serve(app.into_make_service())
        .await
        .map_err(|e| WebhookError::Server(e.to_string()))?;

    Ok(())
}
