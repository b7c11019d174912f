//! Task configuration and status records.

use serde::{Deserialize, Serialize};

/// Credentials of the user a task acts for.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UserData {
    pub userid: String,
    pub password: String,
}

/// One candidate course, as stored.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CourseData {
    pub name: String,
    #[serde(default)]
    pub desc: String,
    /// Handler-defined token identifying the course to the remote site.
    pub token: String,
}

/// Persisted task configuration, optionally with live statistics.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TaskData {
    #[serde(default)]
    pub id: i64,
    /// Site handler name.
    pub handle: String,
    pub user: UserData,
    pub courses: Vec<CourseData>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub stat: Option<Stat>,
}

impl TaskData {
    /// Copy with the password and course tokens blanked out.
    pub fn redacted(&self) -> Self {
        Self {
            user: UserData {
                userid: self.user.userid.clone(),
                password: String::new(),
            },
            courses: self
                .courses
                .iter()
                .map(|c| CourseData {
                    token: String::new(),
                    ..c.clone()
                })
                .collect(),
            ..self.clone()
        }
    }
}

/// Point-in-time task statistics.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Stat {
    pub running: bool,
    pub succeeded: u64,
    pub failed: u64,
    pub last_error: String,
    pub elected: bool,
}

/// Opaque handler-defined session handle returned by a login.
#[derive(Clone, PartialEq, Eq)]
pub struct LoginSession(String);

impl LoginSession {
    pub fn new(raw: impl Into<String>) -> Self {
        Self(raw.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl std::fmt::Debug for LoginSession {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str("LoginSession(..)")
    }
}
