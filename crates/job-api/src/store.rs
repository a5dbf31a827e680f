//! In-memory job storage.

use std::collections::HashMap;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tokio::sync::RwLock;
use uuid::Uuid;

/// A stored job.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Job {
    pub id: Uuid,
    pub title: String,
    #[serde(default)]
    pub description: Option<String>,
    #[serde(default)]
    pub date: Option<DateTime<Utc>>,
}

/// Client-supplied job fields, used for both create and update.
#[derive(Debug, Clone, Deserialize)]
pub struct JobInput {
    pub title: String,
    #[serde(default)]
    pub description: Option<String>,
    #[serde(default)]
    pub date: Option<DateTime<Utc>>,
}

impl JobInput {
    /// Checks the fields a job cannot do without.
    pub fn validate(&self) -> Result<(), String> {
        if self.title.trim().is_empty() {
            return Err("title must not be empty".to_string());
        }
        Ok(())
    }
}

/// In-memory job store shared by the routes and the reversal handlers.
#[derive(Debug, Clone, Default)]
pub struct InMemoryJobStore {
    jobs: Arc<RwLock<HashMap<Uuid, Job>>>,
}

impl InMemoryJobStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn create(&self, input: JobInput) -> Job {
        let job = Job {
            id: Uuid::new_v4(),
            title: input.title,
            description: input.description,
            date: input.date,
        };
        self.jobs.write().await.insert(job.id, job.clone());
        job
    }

    /// Inserts or overwrites a job as-is, keeping its id.
    pub async fn put(&self, job: Job) {
        self.jobs.write().await.insert(job.id, job);
    }

    pub async fn read(&self, id: Uuid) -> Option<Job> {
        self.jobs.read().await.get(&id).cloned()
    }

    /// Replaces the fields of an existing job. Returns `None` if it does not exist.
    pub async fn update(&self, id: Uuid, input: JobInput) -> Option<Job> {
        let mut jobs = self.jobs.write().await;
        let job = jobs.get_mut(&id)?;
        job.title = input.title;
        job.description = input.description;
        job.date = input.date;
        Some(job.clone())
    }

    /// Removes a job, returning it if it existed.
    pub async fn delete(&self, id: Uuid) -> Option<Job> {
        self.jobs.write().await.remove(&id)
    }

    pub async fn count(&self) -> usize {
        self.jobs.read().await.len()
    }
}
