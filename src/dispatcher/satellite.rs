//! The standard satellite loop: fetch, execute, report, pause.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use tokio::task::JoinHandle;
use tracing::{error, info, warn};

use super::post_office::PostOffice;
use crate::error::DispatchError;
use crate::registry::WorkerRegistry;
use crate::worker;

/// Outcome of one fetch/execute/report round.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Round {
    /// A result was delivered for this subtask id.
    Delivered(u64),
    /// The broker had no work for us.
    Idle,
    /// The work was done but the submitter had already given up.
    Vanished(u64),
    /// Fetch or report failed, or the handler is unknown here.
    Failed,
}

/// Run one round against the broker.
pub async fn run_once(office: &PostOffice, workers: &WorkerRegistry, silent: bool) -> Round {
    let postman = match office.get_task().await {
        Ok(p) => p,
        Err(DispatchError::NoNewTasks) => {
            if !silent {
                info!("No new task available");
            }
            return Round::Idle;
        }
        Err(e) => {
            warn!("Error fetching new task: {e}");
            return Round::Failed;
        }
    };

    let subtask = postman.subtask.clone();
    let id = subtask.id;
    if !silent {
        info!(task_id = id, handler = %subtask.handler, kind = %subtask.kind, "Got task");
    }

    let worker = match workers.get(&subtask.handler) {
        Ok(w) => w,
        Err(_) => {
            error!(task_id = id, "Unknown handler: {}", subtask.handler);
            return Round::Failed;
        }
    };

    let result = worker::execute(worker.as_ref(), subtask).await;
    match postman.send_result(&result).await {
        Ok(()) => Round::Delivered(id),
        Err(DispatchError::Vanished) => {
            if !silent {
                warn!(task_id = id, "Task has gone");
            }
            Round::Vanished(id)
        }
        Err(e) => {
            warn!(task_id = id, "Error sending back result: {e}");
            Round::Failed
        }
    }
}

/// Spawn a polling routine that runs rounds until the shutdown flag is set.
///
/// Returns a `JoinHandle` and the shutdown flag.
pub fn spawn_satellite(
    office: Arc<PostOffice>,
    workers: Arc<WorkerRegistry>,
    delay: Duration,
    silent: bool,
) -> (JoinHandle<()>, Arc<AtomicBool>) {
    let shutdown = Arc::new(AtomicBool::new(false));
    let shutdown_flag = Arc::clone(&shutdown);

    let handle = tokio::spawn(async move {
        loop {
            if shutdown_flag.load(Ordering::Relaxed) {
                info!("Satellite routine shutting down");
                break;
            }
            run_once(&office, &workers, silent).await;
            tokio::time::sleep(delay).await;
        }
    });

    (handle, shutdown)
}
