//! In-memory doubles for the gateway and adapter seams, shared by the
//! loop tests.

use std::collections::{HashMap, HashSet, VecDeque};
use std::sync::atomic::{AtomicBool, AtomicU32, AtomicUsize, Ordering};
use std::sync::Mutex;

use async_trait::async_trait;
use chrono::{Duration, Utc};

use render_common::broker::{Acknowledger, BrokerError, JobTransport};
use render_common::job::{GenerationRequest, Job, JobStatus, JobType};
use render_common::jobqueue::{ImageRecord, JobQueueError, JobRepository};
use render_common::metadata::ExecutionMetadata;

use crate::generator::{Generator, GeneratorError, GeneratorExecution};
use crate::moderate::{Moderation, ModerationError, Moderator};
use crate::storage::{BlobStore, StorageError};

pub fn make_job(id: &str, job_type: JobType, num_options: u32, age_minutes: i64) -> Job {
    Job {
        id: id.to_owned(),
        job_type,
        request_data: GenerationRequest {
            prompt: "a cat wearing a tiny hat".to_owned(),
            negative_prompt: None,
            num_options,
            height: 1024,
            width: 1024,
            seed: None,
            plugins: Vec::new(),
        },
        job_status: JobStatus::Queued,
        team: Some("team-1".to_owned()),
        created_at: Utc::now() - Duration::minutes(age_minutes),
        execution_metadata: None,
    }
}

fn query_error(message: &str) -> JobQueueError {
    JobQueueError::QueryError {
        command: "TEST".to_owned(),
        error: sqlx::Error::Protocol(message.to_owned()),
    }
}

fn broker_error(command: &str) -> BrokerError {
    BrokerError::ProtocolError {
        command: command.to_owned(),
        error: lapin::Error::ChannelsLimitReached,
    }
}

#[derive(Default)]
pub struct MockRepository {
    pub jobs: Mutex<VecDeque<Job>>,
    pub terminal: Mutex<Vec<(String, JobStatus, ExecutionMetadata)>>,
    pub requeued: Mutex<Vec<(String, String)>>,
    pub images: Mutex<Vec<(String, Vec<ImageRecord>)>>,
    pub nsfw_teams: Mutex<HashSet<String>>,
    pub plugin_ids: Vec<String>,
    pub fail_inserts: AtomicBool,
}

impl MockRepository {
    pub fn with_jobs(jobs: Vec<Job>) -> Self {
        Self {
            jobs: Mutex::new(jobs.into()),
            ..Default::default()
        }
    }

    pub fn with_plugin_ids(mut self, ids: &[&str]) -> Self {
        self.plugin_ids = ids.iter().map(|id| (*id).to_owned()).collect();
        self
    }

    pub fn allow_nsfw(&self, team_id: &str) {
        self.nsfw_teams.lock().unwrap().insert(team_id.to_owned());
    }

    pub fn terminal_for(&self, job_id: &str) -> Option<(JobStatus, ExecutionMetadata)> {
        self.terminal
            .lock()
            .unwrap()
            .iter()
            .find(|(id, _, _)| id == job_id)
            .map(|(_, status, metadata)| (*status, metadata.clone()))
    }
}

#[async_trait]
impl JobRepository for MockRepository {
    async fn claim_next_queued(&self, _node_id: &str) -> Result<Option<Job>, JobQueueError> {
        Ok(self.jobs.lock().unwrap().pop_front().map(|mut job| {
            job.job_status = JobStatus::Assigned;
            job
        }))
    }

    async fn mark_terminal(
        &self,
        job_id: &str,
        status: JobStatus,
        metadata: &ExecutionMetadata,
    ) -> Result<(), JobQueueError> {
        self.terminal
            .lock()
            .unwrap()
            .push((job_id.to_owned(), status, metadata.clone()));
        Ok(())
    }

    async fn requeue(&self, job_id: &str, error: &str) -> Result<(), JobQueueError> {
        self.requeued
            .lock()
            .unwrap()
            .push((job_id.to_owned(), error.to_owned()));
        Ok(())
    }

    async fn insert_images(
        &self,
        job_id: &str,
        records: &[ImageRecord],
    ) -> Result<(), JobQueueError> {
        if self.fail_inserts.load(Ordering::SeqCst) {
            return Err(query_error("insert failed"));
        }
        self.images
            .lock()
            .unwrap()
            .push((job_id.to_owned(), records.to_vec()));
        Ok(())
    }

    async fn is_team_nsfw_allowed(&self, team_id: &str) -> Result<bool, JobQueueError> {
        Ok(self.nsfw_teams.lock().unwrap().contains(team_id))
    }

    async fn list_plugin_ids(&self) -> Result<Vec<String>, JobQueueError> {
        Ok(self.plugin_ids.clone())
    }
}

#[derive(Default)]
pub struct MockTransport {
    pub depth: AtomicU32,
    pub published: Mutex<Vec<Job>>,
    pub fail_publish: AtomicBool,
}

#[async_trait]
impl JobTransport for MockTransport {
    async fn depth(&self) -> Result<u32, BrokerError> {
        Ok(self.depth.load(Ordering::SeqCst))
    }

    async fn publish(&self, job: &Job) -> Result<(), BrokerError> {
        if self.fail_publish.load(Ordering::SeqCst) {
            return Err(broker_error("basic.publish"));
        }
        self.published.lock().unwrap().push(job.clone());
        self.depth.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }
}

#[derive(Default)]
pub struct MockAcker {
    pub acks: AtomicUsize,
    pub nacks: AtomicUsize,
    pub fail_ack: AtomicBool,
}

#[async_trait]
impl Acknowledger for MockAcker {
    async fn ack(&self) -> Result<(), BrokerError> {
        if self.fail_ack.load(Ordering::SeqCst) {
            return Err(broker_error("basic.ack"));
        }
        self.acks.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }

    async fn nack_discard(&self) -> Result<(), BrokerError> {
        self.nacks.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }
}

#[derive(Default)]
pub struct MockBlobStore {
    pub objects: Mutex<HashMap<String, Vec<u8>>>,
    pub uploads: Mutex<Vec<Vec<u8>>>,
    pub downloads: AtomicUsize,
    pub fail_uploads: AtomicBool,
}

impl MockBlobStore {
    pub fn put(&self, bucket: &str, object: &str, bytes: &[u8]) {
        self.objects
            .lock()
            .unwrap()
            .insert(format!("{bucket}/{object}"), bytes.to_vec());
    }
}

#[async_trait]
impl BlobStore for MockBlobStore {
    async fn upload(&self, _bucket: &str, bytes: Vec<u8>) -> Result<String, StorageError> {
        if self.fail_uploads.load(Ordering::SeqCst) {
            return Err(StorageError::Other("upload refused".to_owned()));
        }
        let mut uploads = self.uploads.lock().unwrap();
        uploads.push(bytes);
        Ok(format!("upload-{}.png", uploads.len()))
    }

    async fn download(&self, bucket: &str, object: &str) -> Result<Vec<u8>, StorageError> {
        self.downloads.fetch_add(1, Ordering::SeqCst);
        self.objects
            .lock()
            .unwrap()
            .get(&format!("{bucket}/{object}"))
            .cloned()
            .ok_or_else(|| StorageError::NotFound {
                bucket: bucket.to_owned(),
                object: object.to_owned(),
            })
    }
}

#[derive(Default)]
pub struct MockModerator {
    pub categories: Mutex<HashMap<String, bool>>,
}

impl MockModerator {
    pub fn flag(&self, category: &str) {
        self.categories
            .lock()
            .unwrap()
            .insert(category.to_owned(), true);
    }
}

#[async_trait]
impl Moderator for MockModerator {
    async fn classify(&self, _prompt: &str) -> Result<Moderation, ModerationError> {
        Ok(Moderation {
            categories: self.categories.lock().unwrap().clone(),
        })
    }
}

pub struct MockGenerator {
    pub fail: AtomicBool,
    pub calls: AtomicUsize,
    pub seeds_seen: Mutex<Vec<i64>>,
    runtime: i64,
}

impl MockGenerator {
    pub fn with_runtime(runtime: i64) -> Self {
        Self {
            fail: AtomicBool::new(false),
            calls: AtomicUsize::new(0),
            seeds_seen: Mutex::new(Vec::new()),
            runtime,
        }
    }
}

#[async_trait]
impl Generator for MockGenerator {
    async fn text_to_image(
        &self,
        request: &GenerationRequest,
    ) -> Result<GeneratorExecution, GeneratorError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        if self.fail.load(Ordering::SeqCst) {
            return Err(GeneratorError::InvalidPayload("stub failure".to_owned()));
        }
        let seed = request.seed.expect("caller always sets a seed");
        self.seeds_seen.lock().unwrap().push(seed);
        Ok(GeneratorExecution {
            image: vec![0x89, 0x50, 0x4e, 0x47],
            seed,
            runtime: self.runtime,
        })
    }
}
