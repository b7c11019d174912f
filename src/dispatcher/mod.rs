//! Task broker: rendezvous between subtask submitters and remote satellites.
//!
//! Core components:
//! - `types`: wire types (`Subtask`, `SubtaskResult`, request/response bodies)
//! - `broker`: `Dispatcher`: per-handler queues, pending map, timeouts
//! - `routes`: worker-facing HTTP endpoints (`/get_task`, `/put_result`)
//! - `post_office`: satellite-side HTTP client for those endpoints
//! - `satellite`: the standard satellite polling loop

pub mod broker;
pub mod post_office;
pub mod routes;
pub mod satellite;
pub mod types;

pub use broker::Dispatcher;
pub use post_office::{PostOffice, Postman};
pub use routes::{BrokerState, task_routes};
pub use satellite::{Round, run_once, spawn_satellite};
pub use types::{
    STATUS_FAILED, STATUS_FULL, STATUS_SESSION_EXPIRED, STATUS_SUCCEEDED, Subtask, SubtaskKind,
    SubtaskResult, TaskRequest, TaskResponse, WorkResponse,
};
