//! # Job model
//!
//! The canonical job record shared by the filler and consumer roles, and
//! its JSON codec. The same shape lives in the `job_queue` table and on the
//! broker wire, so both sides decode with identical rules: unknown fields
//! are ignored, missing required fields fail loudly.

use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Enumeration of errors for job decoding and validation.
#[derive(Error, Debug)]
pub enum JobError {
    #[error("{0} is not a valid JobStatus")]
    ParseJobStatus(String),
    #[error("{0} is not a valid JobType")]
    ParseJobType(String),
    #[error("failed to decode job: {0}")]
    Decode(#[from] serde_json::Error),
    #[error("invalid request: {0}")]
    InvalidRequest(String),
}

/// Enumeration of possible statuses for a Job.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum JobStatus {
    /// Waiting in `job_queue` to be picked up by a filler.
    Queued,
    /// Claimed by a filler and handed to the broker.
    Assigned,
    /// Being executed by a consumer. Ephemeral; this fleet does not persist it.
    Running,
    /// Completed successfully; `images` rows reference the job.
    Succeeded,
    /// Completed unsuccessfully; the diagnostic lives in `execution_metadata`.
    Failed,
    /// Reaped before execution, e.g. after expiring in the queue.
    Stopped,
}

impl JobStatus {
    /// Terminal statuses are never transitioned out of.
    pub fn is_terminal(self) -> bool {
        matches!(
            self,
            JobStatus::Succeeded | JobStatus::Failed | JobStatus::Stopped
        )
    }

    pub fn as_str(self) -> &'static str {
        match self {
            JobStatus::Queued => "queued",
            JobStatus::Assigned => "assigned",
            JobStatus::Running => "running",
            JobStatus::Succeeded => "succeeded",
            JobStatus::Failed => "failed",
            JobStatus::Stopped => "stopped",
        }
    }
}

/// Allow casting JobStatus from strings, e.g. when read from the database.
impl FromStr for JobStatus {
    type Err = JobError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "queued" => Ok(JobStatus::Queued),
            "assigned" => Ok(JobStatus::Assigned),
            "running" => Ok(JobStatus::Running),
            "succeeded" => Ok(JobStatus::Succeeded),
            "failed" => Ok(JobStatus::Failed),
            "stopped" => Ok(JobStatus::Stopped),
            invalid => Err(JobError::ParseJobStatus(invalid.to_owned())),
        }
    }
}

impl fmt::Display for JobStatus {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Enumeration of the job kinds this fleet can execute.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum JobType {
    #[serde(rename = "text-to-image")]
    TextToImage,
    #[serde(rename = "text-to-portrait")]
    TextToPortrait,
}

impl JobType {
    pub fn as_str(self) -> &'static str {
        match self {
            JobType::TextToImage => "text-to-image",
            JobType::TextToPortrait => "text-to-portrait",
        }
    }
}

impl FromStr for JobType {
    type Err = JobError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "text-to-image" => Ok(JobType::TextToImage),
            "text-to-portrait" => Ok(JobType::TextToPortrait),
            invalid => Err(JobError::ParseJobType(invalid.to_owned())),
        }
    }
}

impl fmt::Display for JobType {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// An auxiliary (LoRA) weight reference consumed by the generator. The
/// weights themselves live in blob storage, keyed by `id`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Plugin {
    pub id: String,
    pub weight: i64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub data: Option<serde_json::Value>,
}

fn default_num_options() -> u32 {
    1
}

fn default_dimension() -> u32 {
    1024
}

/// Parameters for one image-generation request, as submitted by producers.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GenerationRequest {
    pub prompt: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub negative_prompt: Option<String>,
    #[serde(default = "default_num_options")]
    pub num_options: u32,
    #[serde(default = "default_dimension")]
    pub height: u32,
    #[serde(default = "default_dimension")]
    pub width: u32,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub seed: Option<i64>,
    #[serde(default)]
    pub plugins: Vec<Plugin>,
}

impl GenerationRequest {
    /// Check the field constraints producers are expected to uphold.
    /// Decoding alone does not enforce these, so the consumer validates
    /// before dispatching to the generator.
    pub fn validate(&self) -> Result<(), JobError> {
        if self.prompt.trim().is_empty() {
            return Err(JobError::InvalidRequest("prompt cannot be empty".to_owned()));
        }
        if self.num_options == 0 {
            return Err(JobError::InvalidRequest(
                "num_options must be positive".to_owned(),
            ));
        }
        if self.height == 0 || self.width == 0 {
            return Err(JobError::InvalidRequest(
                "height and width must be positive".to_owned(),
            ));
        }
        Ok(())
    }
}

/// A row in `job_queue`, as carried on the broker wire.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Job {
    pub id: String,
    pub job_type: JobType,
    pub request_data: GenerationRequest,
    pub job_status: JobStatus,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub team: Option<String>,
    pub created_at: DateTime<Utc>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub execution_metadata: Option<serde_json::Value>,
}

impl Job {
    /// Encode for the broker wire.
    pub fn to_wire(&self) -> Result<Vec<u8>, JobError> {
        Ok(serde_json::to_vec(self)?)
    }

    /// Decode a broker message body.
    pub fn from_wire(body: &[u8]) -> Result<Self, JobError> {
        Ok(serde_json::from_slice(body)?)
    }

    /// Age of the job relative to `now`. `created_at` is assigned by the
    /// database and assumed UTC-aware.
    pub fn age(&self, now: DateTime<Utc>) -> chrono::Duration {
        now - self.created_at
    }
}
