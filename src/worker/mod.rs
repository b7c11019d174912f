//! Satellite-side workers.
//!
//! A worker executes the site-specific half of a handler. Every request and
//! response is a list of strings; failures are encoded in the response
//! rather than returned as errors.

pub mod join;

pub use join::JoinWorker;

use async_trait::async_trait;

use crate::dispatcher::{Subtask, SubtaskKind, SubtaskResult};

#[async_trait]
pub trait Worker: Send + Sync {
    async fn login(&self, data: Vec<String>) -> Vec<String>;

    async fn list_courses(&self, data: Vec<String>) -> Vec<String>;

    async fn elect(&self, data: Vec<String>) -> Vec<String>;
}

/// Run `subtask` on `worker` according to its kind.
pub async fn execute(worker: &dyn Worker, subtask: Subtask) -> SubtaskResult {
    let data = match subtask.kind {
        SubtaskKind::Login => worker.login(subtask.data).await,
        SubtaskKind::List => worker.list_courses(subtask.data).await,
        SubtaskKind::Elect => worker.elect(subtask.data).await,
    };
    SubtaskResult::new(data)
}
