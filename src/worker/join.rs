use async_trait::async_trait;

use super::Worker;

/// Diagnostic worker: answers every subtask with its payload joined by a
/// separator.
#[derive(Debug, Clone)]
pub struct JoinWorker {
    separator: String,
}

impl JoinWorker {
    pub fn new(separator: impl Into<String>) -> Self {
        Self {
            separator: separator.into(),
        }
    }

    fn join(&self, data: Vec<String>) -> Vec<String> {
        vec![data.join(&self.separator)]
    }
}

impl Default for JoinWorker {
    fn default() -> Self {
        Self::new(",")
    }
}

#[async_trait]
impl Worker for JoinWorker {
    async fn login(&self, data: Vec<String>) -> Vec<String> {
        self.join(data)
    }

    async fn list_courses(&self, data: Vec<String>) -> Vec<String> {
        self.join(data)
    }

    async fn elect(&self, data: Vec<String>) -> Vec<String> {
        self.join(data)
    }
}
