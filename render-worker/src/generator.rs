//! The image-generation backend seam.
//!
//! The GPU pipeline itself runs in a separate inference process on the same
//! node; the worker drives it over a small local HTTP contract and treats it
//! as opaque: bytes in, `{image, seed, runtime}` out.

use async_trait::async_trait;
use base64::prelude::*;
use serde::Deserialize;
use thiserror::Error;

use render_common::job::GenerationRequest;

/// Enumeration of errors for generator calls.
#[derive(Error, Debug)]
pub enum GeneratorError {
    #[error("generator request failed: {0}")]
    Request(#[from] reqwest::Error),
    #[error("generator returned an invalid payload: {0}")]
    InvalidPayload(String),
}

/// One completed generator run.
#[derive(Debug, Clone, PartialEq)]
pub struct GeneratorExecution {
    pub image: Vec<u8>,
    pub seed: i64,
    /// Inference wall-clock in milliseconds, as reported by the backend.
    pub runtime: i64,
}

/// The generation contract the consumer depends on. `request.seed` is
/// always set by the caller before a call.
#[async_trait]
pub trait Generator: Send + Sync {
    async fn text_to_image(
        &self,
        request: &GenerationRequest,
    ) -> Result<GeneratorExecution, GeneratorError>;
}

/// Client for the local inference sidecar.
pub struct HttpGenerator {
    client: reqwest::Client,
    base_url: String,
}

#[derive(Deserialize)]
struct SidecarResponse {
    /// Base64-encoded PNG bytes.
    image: String,
    seed: i64,
    runtime: i64,
}

impl HttpGenerator {
    pub fn new(base_url: &str) -> Self {
        Self {
            client: reqwest::Client::new(),
            base_url: base_url.trim_end_matches('/').to_owned(),
        }
    }
}

#[async_trait]
impl Generator for HttpGenerator {
    async fn text_to_image(
        &self,
        request: &GenerationRequest,
    ) -> Result<GeneratorExecution, GeneratorError> {
        let response = self
            .client
            .post(format!("{}/generate", self.base_url))
            .json(request)
            .send()
            .await?
            .error_for_status()?;

        let payload: SidecarResponse = response.json().await?;
        let image = BASE64_STANDARD
            .decode(payload.image.as_bytes())
            .map_err(|error| {
                GeneratorError::InvalidPayload(format!("image is not valid base64: {error}"))
            })?;

        Ok(GeneratorExecution {
            image,
            seed: payload.seed,
            runtime: payload.runtime,
        })
    }
}
