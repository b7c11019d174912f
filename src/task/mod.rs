//! Task scheduling: per-user retry loops and their manager.
//!
//! - `model`: stored task records and `Stat`
//! - `traits`: `User`, `Course` and `SiteHandler` seams
//! - `scheduler`: the `Task` state machine
//! - `store`: `TaskStore` persistence seam
//! - `manager`: live task table

pub mod manager;
pub mod model;
pub mod scheduler;
pub mod store;
pub mod traits;

pub use manager::Manager;
pub use model::{CourseData, LoginSession, Stat, TaskData, UserData};
pub use scheduler::Task;
pub use store::{MemoryTaskStore, TaskStore};
pub use traits::{Course, SiteHandler, User};
