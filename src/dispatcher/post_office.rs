//! Satellite-side client of the worker-facing endpoints.

use reqwest::StatusCode;
use tracing::warn;

use super::types::{Subtask, SubtaskResult, TaskRequest, TaskResponse, WorkResponse};
use crate::cipher::{self, SatelliteKey, SymmetricKey};
use crate::error::DispatchError;

/// Fetches subtasks for a fixed set of handlers from one broker.
#[derive(Debug, Clone)]
pub struct PostOffice {
    client: reqwest::Client,
    root: String,
    accepts: Vec<String>,
    key: SatelliteKey,
}

/// One fetched subtask plus the key needed to answer it.
#[derive(Debug)]
pub struct Postman<'a> {
    office: &'a PostOffice,
    key: SymmetricKey,
    pub subtask: Subtask,
}

impl PostOffice {
    pub fn new(root: impl Into<String>, accepts: Vec<String>, key: SatelliteKey) -> Self {
        Self {
            client: reqwest::Client::new(),
            root: root.into().trim_end_matches('/').to_string(),
            accepts,
            key,
        }
    }

    /// Ask the broker for work.
    ///
    /// Returns [`DispatchError::NoNewTasks`] when the broker had nothing
    /// within its pull window.
    pub async fn get_task(&self) -> Result<Postman<'_>, DispatchError> {
        let (key, sealed) = self.key.seal()?;
        let request = TaskRequest {
            accepts: self.accepts.join(","),
            cipher: sealed,
        };

        let resp = self
            .client
            .post(format!("{}/get_task", self.root))
            .json(&request)
            .send()
            .await?;

        let status = resp.status();
        if status != StatusCode::OK {
            let body = resp.text().await.unwrap_or_default();
            warn!("get_task: server responded HTTP {status}: {body}");
            return Err(DispatchError::Server {
                status: status.as_u16(),
                body,
            });
        }

        let response: TaskResponse = resp.json().await?;
        if !response.ok {
            return Err(DispatchError::NoNewTasks);
        }

        let content = cipher::decrypt(&response.content, &key)?;
        let subtask: Subtask = serde_json::from_str(&content)?;
        Ok(Postman {
            office: self,
            key,
            subtask,
        })
    }
}

impl Postman<'_> {
    /// Encrypt and report the result. 410 maps to [`DispatchError::Vanished`].
    pub async fn send_result(&self, result: &SubtaskResult) -> Result<(), DispatchError> {
        let raw = serde_json::to_string(result)?;
        let work = WorkResponse {
            content: cipher::encrypt(&raw, &self.key)?,
            task_id: self.subtask.id,
        };

        let resp = self
            .office
            .client
            .post(format!("{}/put_result", self.office.root))
            .json(&work)
            .send()
            .await?;

        match resp.status() {
            StatusCode::OK => Ok(()),
            StatusCode::GONE => Err(DispatchError::Vanished),
            status => {
                let body = resp.text().await.unwrap_or_default();
                warn!(task_id = self.subtask.id, "put_result: server responded HTTP {status}: {body}");
                Err(DispatchError::Server {
                    status: status.as_u16(),
                    body,
                })
            }
        }
    }
}
