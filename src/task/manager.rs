//! Task manager: owns every live `Task` and keeps the store in sync.

use std::collections::BTreeMap;
use std::sync::Arc;

use tokio::sync::Mutex;
use tracing::info;

use super::model::TaskData;
use super::scheduler::Task;
use super::store::TaskStore;
use crate::config::SchedulerConfig;
use crate::error::ManagerError;
use crate::registry::HandlerRegistry;

struct TaskEntry {
    header: TaskData,
    task: Task,
}

pub struct Manager {
    handlers: Arc<HandlerRegistry>,
    store: Arc<dyn TaskStore>,
    config: SchedulerConfig,
    tasks: Mutex<BTreeMap<i64, TaskEntry>>,
}

impl Manager {
    pub fn new(
        handlers: Arc<HandlerRegistry>,
        store: Arc<dyn TaskStore>,
        config: SchedulerConfig,
    ) -> Self {
        Self {
            handlers,
            store,
            config,
            tasks: Mutex::new(BTreeMap::new()),
        }
    }

    /// Load every stored task and start it. Returns the number started.
    pub async fn init(&self) -> Result<usize, ManagerError> {
        let stored = self.store.list_tasks().await?;
        let mut tasks = self.tasks.lock().await;
        for header in stored {
            let task = self.build(&header)?;
            task.start();
            tasks.insert(header.id, TaskEntry { header, task });
        }
        info!(count = tasks.len(), "Task manager initialised");
        Ok(tasks.len())
    }

    fn build(&self, data: &TaskData) -> Result<Task, ManagerError> {
        let handler = self.handlers.get(&data.handle)?;
        let user = handler.make_user(&data.user.userid, &data.user.password);
        let courses = data
            .courses
            .iter()
            .map(|c| handler.make_course(&c.name, &c.desc, &c.token))
            .collect();
        Ok(Task::new(user, courses, self.config))
    }

    /// Persist and instantiate a task. The task is returned idle.
    pub async fn create_task(&self, mut data: TaskData) -> Result<(i64, Task), ManagerError> {
        let mut tasks = self.tasks.lock().await;
        let task = self.build(&data)?;

        data.stat = None;
        let id = self.store.create_task(data.clone()).await?;
        data.id = id;

        info!(task_id = id, handle = %data.handle, user = %data.user.userid, "Task created");
        tasks.insert(
            id,
            TaskEntry {
                header: data,
                task: task.clone(),
            },
        );
        Ok((id, task))
    }

    /// Stop and remove a task.
    pub async fn delete_task(&self, id: i64) -> Result<(), ManagerError> {
        let mut tasks = self.tasks.lock().await;
        if !tasks.contains_key(&id) {
            return Err(ManagerError::NotFound(id));
        }
        self.store.delete_task(id).await?;
        if let Some(entry) = tasks.remove(&id) {
            entry.task.stop();
        }
        info!(task_id = id, "Task deleted");
        Ok(())
    }

    pub async fn get_task(&self, id: i64) -> Result<Task, ManagerError> {
        self.tasks
            .lock()
            .await
            .get(&id)
            .map(|entry| entry.task.clone())
            .ok_or(ManagerError::NotFound(id))
    }

    pub async fn get_task_data(&self, id: i64) -> Result<TaskData, ManagerError> {
        self.tasks
            .lock()
            .await
            .get(&id)
            .map(|entry| entry.header.clone())
            .ok_or(ManagerError::NotFound(id))
    }

    pub async fn list_tasks(&self) -> Vec<Task> {
        self.tasks
            .lock()
            .await
            .values()
            .map(|entry| entry.task.clone())
            .collect()
    }

    /// Stored headers with live statistics attached.
    pub async fn list_task_data(&self) -> Vec<TaskData> {
        self.tasks
            .lock()
            .await
            .values()
            .map(|entry| TaskData {
                stat: Some(entry.task.statistics()),
                ..entry.header.clone()
            })
            .collect()
    }

    pub fn handlers(&self) -> &Arc<HandlerRegistry> {
        &self.handlers
    }
}
