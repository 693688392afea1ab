//! Prompt moderation.
//!
//! Two decision rules run against the classifier's category map: a general
//! block that always applies, and an NSFW block that applies when the
//! requesting team (or the portrait pipeline) does not allow sexual
//! content. The general rule runs first, so `sexual/minors` can never be
//! waved through by an NSFW-enabled team.

use std::collections::HashMap;

use async_trait::async_trait;
use serde::Deserialize;
use thiserror::Error;

/// Category bases blocked regardless of team settings, including their
/// `/` sub-variants (e.g. `harassment/threatening`).
const GENERAL_BLOCK: &[&str] = &["harassment", "hate", "self-harm", "violence"];

const MODERATIONS_URL: &str = "https://api.openai.com/v1/moderations";

/// Enumeration of moderation outcomes that fail a job.
#[derive(Error, Debug)]
pub enum ModerationError {
    #[error("prompt contains inappropriate content")]
    Inappropriate,
    #[error("nsfw is not enabled for this team or not allowed for this job")]
    NsfwNotAllowed,
    #[error("moderation request failed: {0}")]
    Unavailable(String),
}

/// Classifier verdict: category name to flagged.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct Moderation {
    pub categories: HashMap<String, bool>,
}

// Category names arrive in provider spelling (`self-harm/intent`); accept
// underscore spellings as well.
fn normalize(name: &str) -> String {
    name.replace('_', "-")
}

impl Moderation {
    fn flagged(&self, category: &str) -> bool {
        self.categories
            .iter()
            .any(|(name, &flagged)| flagged && normalize(name) == category)
    }

    /// Flagged in `base` or any of its `/` sub-variants.
    fn flagged_in(&self, base: &str) -> bool {
        self.categories.iter().any(|(name, &flagged)| {
            let name = normalize(name);
            flagged
                && (name == base
                    || name
                        .strip_prefix(base)
                        .is_some_and(|rest| rest.starts_with('/')))
        })
    }
}

/// The prompt classifier contract the consumer depends on.
#[async_trait]
pub trait Moderator: Send + Sync {
    async fn classify(&self, prompt: &str) -> Result<Moderation, ModerationError>;
}

/// Apply both decision rules to `prompt`.
pub async fn sanitize_prompt(
    moderator: &dyn Moderator,
    prompt: &str,
    nsfw_allowed: bool,
) -> Result<(), ModerationError> {
    let moderation = moderator.classify(prompt).await?;

    if GENERAL_BLOCK.iter().any(|base| moderation.flagged_in(base))
        || moderation.flagged("sexual/minors")
    {
        return Err(ModerationError::Inappropriate);
    }

    if !nsfw_allowed && moderation.flagged("sexual") {
        return Err(ModerationError::NsfwNotAllowed);
    }

    Ok(())
}

/// Classifier backed by the OpenAI moderations endpoint.
pub struct OpenAiModerator {
    client: reqwest::Client,
    api_key: String,
}

#[derive(Deserialize)]
struct ModerationsResponse {
    results: Vec<Moderation>,
}

impl OpenAiModerator {
    pub fn new(api_key: &str) -> Self {
        Self {
            client: reqwest::Client::new(),
            api_key: api_key.to_owned(),
        }
    }
}

#[async_trait]
impl Moderator for OpenAiModerator {
    async fn classify(&self, prompt: &str) -> Result<Moderation, ModerationError> {
        let response = self
            .client
            .post(MODERATIONS_URL)
            .bearer_auth(&self.api_key)
            .json(&serde_json::json!({ "input": prompt }))
            .send()
            .await
            .and_then(reqwest::Response::error_for_status)
            .map_err(|error| ModerationError::Unavailable(error.to_string()))?;

        let payload: ModerationsResponse = response
            .json()
            .await
            .map_err(|error| ModerationError::Unavailable(error.to_string()))?;

        payload
            .results
            .into_iter()
            .next()
            .ok_or_else(|| ModerationError::Unavailable("empty moderation results".to_owned()))
    }
}
