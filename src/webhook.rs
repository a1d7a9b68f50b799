//! # Webhook Reconciler
//!
//! Validates and applies inbound GitHub webhook events against the stores,
//! bypassing the scheduled sync path for low-latency reconciliation.
//! Signatures are HMAC-SHA256 over the raw body bytes and compared in
//! constant time before the body is ever interpreted as JSON.

use axum::{
    extract::State,
    http::{HeaderMap, StatusCode},
    response::Json,
};
use hmac::{Hmac, Mac};
use serde::{Deserialize, Serialize};
use serde_json::Value as JsonValue;
use sha2::Sha256;
use std::sync::Arc;
use tracing::{debug, info, warn};
use utoipa::ToSchema;

use crate::cache::{ReleaseEvent, ReleaseNotifier, UpdateCache};
use crate::error::{ApiError, bad_request, unauthorized};
use crate::repositories::AppConnectionRepository;
use crate::server::AppState;

type HmacSha256 = Hmac<Sha256>;

/// Errors that can occur during webhook signature verification
#[derive(Debug, thiserror::Error)]
pub enum VerificationError {
    #[error("Missing required signature header: X-Hub-Signature-256")]
    MissingSignature,

    #[error("Invalid signature format: {0}")]
    InvalidSignatureFormat(&'static str),

    #[error("Signature verification failed")]
    VerificationFailed,
}

/// Verifies a GitHub webhook signature using HMAC-SHA256.
///
/// The digest is computed over the exact raw body bytes; comparison uses
/// `subtle` so signature mismatches are not distinguishable by timing.
pub fn verify_signature(
    body: &[u8],
    signature_header: &str,
    secret: &str,
) -> Result<(), VerificationError> {
    debug!(body_size = body.len(), "Starting webhook signature verification");

    if signature_header.is_empty() {
        return Err(VerificationError::MissingSignature);
    }

    // GitHub signatures are prefixed with "sha256="
    let signature_prefix = "sha256=";
    let Some(provided_hex) = signature_header.strip_prefix(signature_prefix) else {
        return Err(VerificationError::InvalidSignatureFormat(
            "X-Hub-Signature-256 must start with 'sha256='",
        ));
    };

    let mut mac = HmacSha256::new_from_slice(secret.as_bytes())
        .map_err(|_| VerificationError::VerificationFailed)?;
    mac.update(body);
    let expected_bytes = mac.finalize().into_bytes();

    let provided_bytes = hex::decode(provided_hex).map_err(|_| {
        VerificationError::InvalidSignatureFormat("X-Hub-Signature-256 contains invalid hex")
    })?;

    let expected_bytes_array: &[u8] = expected_bytes.as_ref();
    if subtle::ConstantTimeEq::ct_eq(expected_bytes_array, &provided_bytes[..]).into() {
        Ok(())
    } else {
        Err(VerificationError::VerificationFailed)
    }
}

/// What a processed webhook ended up doing.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum WebhookDisposition {
    /// An installation event bound (or rebound) an installation id.
    InstallationBound { slug: String, installation_id: i64 },
    /// A published release invalidated the cached update state.
    UpdatesInvalidated,
    /// The event was authenticated but produced no state change.
    Ignored,
}

impl WebhookDisposition {
    fn message(&self) -> String {
        match self {
            WebhookDisposition::InstallationBound {
                slug,
                installation_id,
            } => format!("installation {} bound to app '{}'", installation_id, slug),
            WebhookDisposition::UpdatesInvalidated => "update cache invalidated".to_string(),
            WebhookDisposition::Ignored => "event acknowledged".to_string(),
        }
    }
}

/// Applies signed webhook events to local state.
pub struct WebhookReconciler {
    connections: AppConnectionRepository,
    cache: Arc<UpdateCache>,
    notifier: Arc<ReleaseNotifier>,
    secret: Option<String>,
}

impl WebhookReconciler {
    pub fn new(
        connections: AppConnectionRepository,
        cache: Arc<UpdateCache>,
        notifier: Arc<ReleaseNotifier>,
        secret: Option<String>,
    ) -> Self {
        Self {
            connections,
            cache,
            notifier,
            secret,
        }
    }

    /// Run one event through the full pipeline: authenticate the raw body,
    /// parse it, then apply the matching branch. Every valid event is
    /// answered, including ones no branch cares about.
    pub async fn process(
        &self,
        event_type: &str,
        body: &[u8],
        signature_header: Option<&str>,
    ) -> Result<WebhookDisposition, ApiError> {
        if body.is_empty() {
            return Err(bad_request("missing request body"));
        }
        let Some(signature) = signature_header else {
            return Err(bad_request("missing X-Hub-Signature-256 header"));
        };

        // No secret means verification cannot happen; fail closed.
        let Some(secret) = self.secret.as_deref() else {
            warn!("Webhook received but no secret is configured; rejecting");
            return Err(unauthorized("webhook secret not configured"));
        };

        verify_signature(body, signature, secret).map_err(|err| {
            warn!(event_type, error = %err, "Webhook signature verification failed");
            unauthorized("invalid webhook signature")
        })?;

        let payload: JsonValue = serde_json::from_slice(body)
            .map_err(|_| bad_request("request body is not valid JSON"))?;

        let action = payload
            .get("action")
            .and_then(|v| v.as_str())
            .unwrap_or_default();

        let disposition = match (event_type, action) {
            ("installation", _) => self.apply_installation(&payload).await?,
            ("release", "published") => self.apply_release(payload),
            _ => {
                debug!(event_type, action, "Webhook event carries no state change");
                WebhookDisposition::Ignored
            }
        };

        Ok(disposition)
    }

    /// Bind the installation id carried by an installation event to its
    /// target app connection. The target is resolved by the app slug in the
    /// payload; the write trusts signature validity alone and is
    /// last-write-wins, so replays converge to the same state.
    async fn apply_installation(
        &self,
        payload: &JsonValue,
    ) -> Result<WebhookDisposition, ApiError> {
        let Some(installation_id) = payload.pointer("/installation/id").and_then(|v| v.as_i64())
        else {
            debug!("Installation event without installation.id; ignoring");
            return Ok(WebhookDisposition::Ignored);
        };

        let Some(app_slug) = payload
            .pointer("/installation/app_slug")
            .and_then(|v| v.as_str())
        else {
            warn!(installation_id, "Installation event without app_slug; ignoring");
            return Ok(WebhookDisposition::Ignored);
        };

        let Some(connection) = self
            .connections
            .find_by_slug(app_slug)
            .await
            .map_err(ApiError::from)?
        else {
            warn!(
                app_slug,
                installation_id, "Installation event for unknown app; ignoring"
            );
            return Ok(WebhookDisposition::Ignored);
        };

        info!(
            slug = %connection.slug,
            previous_installation_id = ?connection.installation_id,
            installation_id,
            "Binding installation id from webhook"
        );

        self.connections
            .set_installation_id(&connection.id, installation_id)
            .await
            .map_err(ApiError::from)?;

        Ok(WebhookDisposition::InstallationBound {
            slug: connection.slug,
            installation_id,
        })
    }

    /// A published release may change which updates are available anywhere,
    /// so the cached update state is dropped broadly rather than per
    /// repository, and the payload is forwarded to in-process listeners.
    fn apply_release(&self, payload: JsonValue) -> WebhookDisposition {
        self.cache.invalidate_updates();
        self.notifier.publish(ReleaseEvent { payload });
        info!("Published release invalidated cached update state");
        WebhookDisposition::UpdatesInvalidated
    }
}

/// Webhook acknowledgement response
#[derive(Debug, Serialize, Deserialize, ToSchema)]
pub struct WebhookResponse {
    /// What processing the event resulted in
    pub message: String,
}

/// Receive a signed GitHub webhook event
///
/// Validates the HMAC-SHA256 signature over the raw body, then applies the
/// event: installation events bind installation ids, published releases
/// invalidate the cached update state, everything else is acknowledged
/// without a state change.
#[utoipa::path(
    post,
    path = "/api/v1/webhook",
    params(
        ("X-GitHub-Event" = String, Header, description = "GitHub event type name"),
        ("X-Hub-Signature-256" = String, Header, description = "HMAC-SHA256 signature of the request body (hex string with sha256= prefix)"),
    ),
    request_body(content = JsonValue, description = "Raw webhook payload", content_type = "application/json"),
    responses(
        (status = 200, description = "Event validated and processed (including no-op branches)", body = WebhookResponse),
        (status = 400, description = "Missing payload/signature/event header or invalid JSON", body = ApiError),
        (status = 401, description = "Unconfigured secret or signature mismatch", body = ApiError),
    ),
    tag = "webhooks"
)]
pub async fn handle_webhook(
    State(state): State<AppState>,
    headers: HeaderMap,
    body: axum::body::Bytes,
) -> Result<(StatusCode, Json<WebhookResponse>), ApiError> {
    let Some(event_type) = headers
        .get("x-github-event")
        .and_then(|h| h.to_str().ok())
        .filter(|v| !v.is_empty())
    else {
        return Err(bad_request("missing X-GitHub-Event header"));
    };

    let signature = headers
        .get("x-hub-signature-256")
        .and_then(|h| h.to_str().ok());

    let disposition = state
        .reconciler
        .process(event_type, &body, signature)
        .await?;

    Ok((
        StatusCode::OK,
        Json(WebhookResponse {
            message: disposition.message(),
        }),
    ))
}

/// Generate a GitHub HMAC-SHA256 signature for testing
#[cfg(test)]
pub(crate) fn sign(body: &[u8], secret: &str) -> String {
    let mut mac = HmacSha256::new_from_slice(secret.as_bytes()).unwrap();
    mac.update(body);
    format!("sha256={}", hex::encode(mac.finalize().into_bytes()))
}
