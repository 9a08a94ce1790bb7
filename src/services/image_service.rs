//! Image generation collaborators. Calls run outside the game lock; their
//! outcome re-enters the coordinator as an ordinary event.

use std::{env, sync::Arc, time::Duration};

use futures::future::BoxFuture;
use reqwest::{Client, StatusCode};
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::{debug, warn};

use crate::{
    config::ImageBackendConfig,
    state::{
        coordinator::GenerationRequest,
        ledger::{GenerationErrorKind, GenerationOutcome},
    },
};

const API_KEY_ENV: &str = "IMAGE_API_KEY";

/// Produces an image, or a classified error, for a prompt.
pub trait ImageGenerator: Send + Sync {
    /// Generate an image for `request`. Never fails: failures are part of the outcome.
    fn generate(&self, request: GenerationRequest) -> BoxFuture<'static, GenerationOutcome>;
}

/// Build the generator selected in the configuration.
pub fn from_config(config: &ImageBackendConfig) -> Result<Arc<dyn ImageGenerator>, ImageBackendError> {
    match config {
        ImageBackendConfig::Placeholder { fail_keyword } => {
            Ok(Arc::new(PlaceholderGenerator::new(fail_keyword.clone())))
        }
        ImageBackendConfig::Http {
            endpoint,
            api_key,
            timeout_secs,
        } => {
            let api_key = api_key.clone().or_else(|| env::var(API_KEY_ENV).ok());
            let generator = HttpImageGenerator::new(
                endpoint.clone(),
                api_key,
                Duration::from_secs(*timeout_secs),
            )?;
            Ok(Arc::new(generator))
        }
    }
}

/// Setup failures of a generation backend.
#[derive(Debug, Error)]
pub enum ImageBackendError {
    /// Building the HTTP client failed.
    #[error("failed to build image backend client")]
    ClientBuilder {
        #[source]
        source: reqwest::Error,
    },
}

/// Offline generator returning deterministic references, for rehearsals and tests.
#[derive(Debug, Clone, Default)]
pub struct PlaceholderGenerator {
    fail_keyword: Option<String>,
}

impl PlaceholderGenerator {
    /// Prompts containing `fail_keyword` (case-insensitive) fail with a policy violation.
    pub fn new(fail_keyword: Option<String>) -> Self {
        Self {
            fail_keyword: fail_keyword
                .map(|k| k.trim().to_lowercase())
                .filter(|k| !k.is_empty()),
        }
    }

    fn outcome(&self, request: &GenerationRequest) -> GenerationOutcome {
        if let Some(keyword) = &self.fail_keyword
            && request.prompt.to_lowercase().contains(keyword.as_str())
        {
            return GenerationOutcome::Failed {
                error_type: GenerationErrorKind::PolicyViolation,
                message: Some("prompt blocked by the rehearsal filter".into()),
            };
        }
        GenerationOutcome::Image {
            image_ref: format!(
                "/generated/round{}/{}-{}.png",
                request.round,
                request.player.simple(),
                request.entry
            ),
        }
    }
}

impl ImageGenerator for PlaceholderGenerator {
    fn generate(&self, request: GenerationRequest) -> BoxFuture<'static, GenerationOutcome> {
        let outcome = self.outcome(&request);
        Box::pin(async move { outcome })
    }
}

/// Remote generation API speaking a small JSON protocol.
#[derive(Clone)]
pub struct HttpImageGenerator {
    client: Client,
    endpoint: Arc<str>,
    api_key: Option<Arc<str>>,
}

#[derive(Debug, Serialize)]
struct GenerateBody<'a> {
    prompt: &'a str,
    /// Earlier prompts of the same player in the round.
    context: &'a [String],
}

#[derive(Debug, Default, Deserialize)]
struct GenerateResponse {
    #[serde(default)]
    candidates: Vec<ResponseCandidate>,
    #[serde(default)]
    error: Option<ResponseError>,
}

#[derive(Debug, Default, Deserialize)]
struct ResponseCandidate {
    #[serde(default)]
    finish_reason: Option<String>,
    #[serde(default)]
    image_ref: Option<String>,
}

#[derive(Debug, Deserialize)]
struct ResponseError {
    #[serde(default)]
    message: Option<String>,
}

impl HttpImageGenerator {
    /// Build the HTTP client.
    pub fn new(
        endpoint: String,
        api_key: Option<String>,
        timeout: Duration,
    ) -> Result<Self, ImageBackendError> {
        let client = Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|source| ImageBackendError::ClientBuilder { source })?;
        if api_key.is_none() {
            warn!("image backend configured without an API key");
        }
        Ok(Self {
            client,
            endpoint: Arc::from(endpoint),
            api_key: api_key.map(Arc::from),
        })
    }

    async fn call(&self, request: GenerationRequest) -> GenerationOutcome {
        let mut builder = self.client.post(self.endpoint.as_ref()).json(&GenerateBody {
            prompt: &request.prompt,
            context: &request.context,
        });
        if let Some(key) = &self.api_key {
            builder = builder.bearer_auth(key.as_ref());
        }

        let response = match builder.send().await {
            Ok(response) => response,
            Err(err) => {
                warn!(entry = %request.entry, error = %err, "image backend unreachable");
                return failed(GenerationErrorKind::Unavailable, err.to_string());
            }
        };
        let status = response.status();
        let body = match response.json::<GenerateResponse>().await {
            Ok(body) => Some(body),
            Err(err) => {
                debug!(entry = %request.entry, error = %err, "image backend returned an unreadable body");
                None
            }
        };
        let outcome = classify(status, body);
        if let GenerationOutcome::Failed { error_type, .. } = &outcome {
            warn!(entry = %request.entry, %status, error_type = error_type.as_str(), "image generation failed");
        }
        outcome
    }
}

impl ImageGenerator for HttpImageGenerator {
    fn generate(&self, request: GenerationRequest) -> BoxFuture<'static, GenerationOutcome> {
        let generator = self.clone();
        Box::pin(async move { generator.call(request).await })
    }
}

fn failed(error_type: GenerationErrorKind, message: impl Into<String>) -> GenerationOutcome {
    GenerationOutcome::Failed {
        error_type,
        message: Some(message.into()),
    }
}

/// Map a backend answer to an outcome.
fn classify(status: StatusCode, body: Option<GenerateResponse>) -> GenerationOutcome {
    let detail = body
        .as_ref()
        .and_then(|b| b.error.as_ref())
        .and_then(|e| e.message.clone());

    if status == StatusCode::TOO_MANY_REQUESTS || status.is_server_error() {
        return failed(
            GenerationErrorKind::Unavailable,
            detail.unwrap_or_else(|| format!("image backend answered {status}")),
        );
    }
    if !status.is_success() {
        return failed(
            GenerationErrorKind::ApiError,
            detail.unwrap_or_else(|| format!("image backend answered {status}")),
        );
    }

    let Some(body) = body else {
        return failed(GenerationErrorKind::ApiError, "unreadable response body");
    };
    let Some(candidate) = body.candidates.into_iter().next() else {
        return failed(
            GenerationErrorKind::NoCandidates,
            "no candidates returned (possible policy violation)",
        );
    };
    match candidate.finish_reason.as_deref() {
        Some(reason @ ("SAFETY" | "RECITATION" | "PROHIBITED_CONTENT")) => {
            return failed(
                GenerationErrorKind::PolicyViolation,
                format!("content blocked: {reason}"),
            );
        }
        Some(reason @ ("OTHER" | "MAX_TOKENS")) => {
            return failed(
                GenerationErrorKind::ApiError,
                format!("finish reason {reason}"),
            );
        }
        _ => {}
    }
    match candidate.image_ref.filter(|r| !r.is_empty()) {
        Some(image_ref) => GenerationOutcome::Image { image_ref },
        None => failed(GenerationErrorKind::NoImageData, "response carried no image"),
    }
}

#[cfg(test)]
mod tests {
    use uuid::Uuid;

    use super::*;
    use crate::state::game::EntryId;

    fn request(prompt: &str) -> GenerationRequest {
        GenerationRequest {
            entry: EntryId(4),
            player: Uuid::nil(),
            round: 2,
            prompt: prompt.into(),
            context: Vec::new(),
        }
    }

    fn body(json: &str) -> Option<GenerateResponse> {
        Some(serde_json::from_str(json).unwrap())
    }

    fn error_kind(outcome: GenerationOutcome) -> Option<GenerationErrorKind> {
        match outcome {
            GenerationOutcome::Failed { error_type, .. } => Some(error_type),
            GenerationOutcome::Image { .. } => None,
        }
    }

    #[tokio::test]
    async fn placeholder_fails_on_keyword_only() {
        let generator = PlaceholderGenerator::new(Some("Forbidden".into()));

        let ok = generator.generate(request("a calm lake")).await;
        assert!(matches!(ok, GenerationOutcome::Image { image_ref } if image_ref.contains("round2")));

        let blocked = generator.generate(request("something FORBIDDEN")).await;
        assert_eq!(error_kind(blocked), Some(GenerationErrorKind::PolicyViolation));
    }

    #[test]
    fn classify_maps_backend_answers() {
        assert_eq!(
            error_kind(classify(StatusCode::OK, body(r#"{"candidates": []}"#))),
            Some(GenerationErrorKind::NoCandidates)
        );
        assert_eq!(
            error_kind(classify(
                StatusCode::OK,
                body(r#"{"candidates": [{"finish_reason": "SAFETY"}]}"#)
            )),
            Some(GenerationErrorKind::PolicyViolation)
        );
        assert_eq!(
            error_kind(classify(
                StatusCode::OK,
                body(r#"{"candidates": [{"finish_reason": "STOP"}]}"#)
            )),
            Some(GenerationErrorKind::NoImageData)
        );
        assert_eq!(
            error_kind(classify(StatusCode::SERVICE_UNAVAILABLE, None)),
            Some(GenerationErrorKind::Unavailable)
        );
        assert_eq!(
            error_kind(classify(StatusCode::BAD_REQUEST, None)),
            Some(GenerationErrorKind::ApiError)
        );
        assert_eq!(
            error_kind(classify(
                StatusCode::OK,
                body(r#"{"candidates": [{"finish_reason": "STOP", "image_ref": "/i/1.png"}]}"#)
            )),
            None
        );
    }
}
