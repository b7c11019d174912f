//! Collaborator seams consumed by the scheduler and the manager.

use std::sync::Arc;

use async_trait::async_trait;

use super::model::{CourseData, LoginSession};
use crate::error::ClientError;

/// The user a task acts for.
#[async_trait]
pub trait User: Send + Sync {
    fn name(&self) -> &str;

    /// Authenticate and return a fresh session.
    async fn login(&self) -> Result<LoginSession, ClientError>;

    /// Courses currently offered to this user.
    async fn list_courses(&self) -> Result<Vec<CourseData>, ClientError>;
}

/// One candidate course.
#[async_trait]
pub trait Course: Send + Sync {
    fn name(&self) -> &str;

    /// Try to take a seat. `Ok(false)` means the course is full.
    ///
    /// Returns [`ClientError::SessionExpired`] when the session must be
    /// renewed before the next attempt.
    async fn elect(&self, session: &LoginSession) -> Result<bool, ClientError>;
}

/// Server-side factory for one site's users and courses.
pub trait SiteHandler: Send + Sync {
    fn make_user(&self, userid: &str, password: &str) -> Arc<dyn User>;

    fn make_course(&self, name: &str, desc: &str, token: &str) -> Arc<dyn Course>;
}
