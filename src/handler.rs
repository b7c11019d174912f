//! Brokered site handler: users and courses whose every operation is a
//! subtask executed by a satellite.
//!
//! Payload conventions, positional strings:
//!
//! | kind  | request             | response                                             |
//! |-------|---------------------|------------------------------------------------------|
//! | login | `[userid, password]`| `["succeeded", session]` or `["failed", reason]`     |
//! | list  | `[userid, password]`| `["succeeded", n, (name, desc, token) × n]` or error |
//! | elect | `[token, session]`  | `"succeeded"`, `"full"`, `"session expired"` or error|

use std::sync::Arc;

use async_trait::async_trait;
use secrecy::{ExposeSecret, SecretString};
use tracing::{info, warn};

use crate::dispatcher::{
    Dispatcher, STATUS_FAILED, STATUS_FULL, STATUS_SESSION_EXPIRED, STATUS_SUCCEEDED, Subtask,
    SubtaskKind, SubtaskResult,
};
use crate::error::ClientError;
use crate::task::{Course, CourseData, LoginSession, SiteHandler, User};

/// `SiteHandler` that routes through the dispatcher under `name`.
pub struct BrokeredHandler {
    name: String,
    dispatcher: Arc<Dispatcher>,
}

impl BrokeredHandler {
    pub fn new(name: impl Into<String>, dispatcher: Arc<Dispatcher>) -> Self {
        Self {
            name: name.into(),
            dispatcher,
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }
}

impl SiteHandler for BrokeredHandler {
    fn make_user(&self, userid: &str, password: &str) -> Arc<dyn User> {
        Arc::new(BrokeredUser {
            handler: self.name.clone(),
            dispatcher: Arc::clone(&self.dispatcher),
            userid: userid.to_string(),
            password: SecretString::from(password.to_string()),
        })
    }

    fn make_course(&self, name: &str, _desc: &str, token: &str) -> Arc<dyn Course> {
        Arc::new(BrokeredCourse {
            handler: self.name.clone(),
            dispatcher: Arc::clone(&self.dispatcher),
            name: name.to_string(),
            token: token.to_string(),
        })
    }
}

pub struct BrokeredUser {
    handler: String,
    dispatcher: Arc<Dispatcher>,
    userid: String,
    password: SecretString,
}

impl BrokeredUser {
    async fn run(&self, kind: SubtaskKind) -> Result<SubtaskResult, ClientError> {
        let data = vec![
            self.userid.clone(),
            self.password.expose_secret().to_string(),
        ];
        let result = self
            .dispatcher
            .submit(Subtask::new(&self.handler, kind, data))
            .await?;
        Ok(result)
    }
}

#[async_trait]
impl User for BrokeredUser {
    fn name(&self) -> &str {
        &self.userid
    }

    async fn login(&self) -> Result<LoginSession, ClientError> {
        let res = self.run(SubtaskKind::Login).await?;
        parse_login(res, &self.userid)
    }

    async fn list_courses(&self) -> Result<Vec<CourseData>, ClientError> {
        let res = self.run(SubtaskKind::List).await?;
        parse_course_list(res, &self.userid)
    }
}

pub struct BrokeredCourse {
    handler: String,
    dispatcher: Arc<Dispatcher>,
    name: String,
    token: String,
}

#[async_trait]
impl Course for BrokeredCourse {
    fn name(&self) -> &str {
        &self.name
    }

    async fn elect(&self, session: &LoginSession) -> Result<bool, ClientError> {
        let data = vec![self.token.clone(), session.as_str().to_string()];
        let res = self
            .dispatcher
            .submit(Subtask::new(&self.handler, SubtaskKind::Elect, data))
            .await?;
        parse_elect(res, &self.name)
    }
}

fn parse_login(res: SubtaskResult, userid: &str) -> Result<LoginSession, ClientError> {
    match res.data.as_slice() {
        [status, session, ..] if status == STATUS_SUCCEEDED => {
            info!(user = %userid, "Login succeeded");
            Ok(LoginSession::new(session.clone()))
        }
        [status, reason, ..] if status == STATUS_FAILED => {
            warn!(user = %userid, "Failed to login: {reason}");
            Err(ClientError::LoginRejected(reason.clone()))
        }
        _ => {
            warn!(user = %userid, "Invalid login data: {:?}", res.data);
            Err(ClientError::InvalidData(res.data))
        }
    }
}

fn parse_course_list(res: SubtaskResult, userid: &str) -> Result<Vec<CourseData>, ClientError> {
    let (status, rest) = match res.data.split_first() {
        Some(split) => split,
        None => return Err(ClientError::InvalidData(res.data)),
    };
    if status != STATUS_SUCCEEDED {
        return Err(ClientError::Domain(status.clone()));
    }

    let count = rest.first().and_then(|n| n.trim().parse::<usize>().ok());
    let fields = rest.get(1..).unwrap_or_default();
    let Some(count) = count.filter(|&n| fields.len() >= n.saturating_mul(3)) else {
        warn!(user = %userid, "Invalid course list: {:?}", res.data);
        return Err(ClientError::InvalidData(res.data));
    };

    Ok(fields
        .chunks_exact(3)
        .take(count)
        .map(|c| CourseData {
            name: c[0].clone(),
            desc: c[1].clone(),
            token: c[2].clone(),
        })
        .collect())
}

fn parse_elect(res: SubtaskResult, course: &str) -> Result<bool, ClientError> {
    match res.status() {
        Some(STATUS_SUCCEEDED) => {
            info!(course = %course, "Elected");
            Ok(true)
        }
        Some(STATUS_FULL) => Ok(false),
        Some(STATUS_SESSION_EXPIRED) => Err(ClientError::SessionExpired),
        Some(other) => Err(ClientError::Domain(other.to_string())),
        None => {
            warn!(course = %course, "Invalid elect response: {:?}", res.data);
            Err(ClientError::InvalidData(res.data))
        }
    }
}
