use std::sync::mpsc::Receiver;
use std::sync::Arc;
use std::time::Duration;

use serde_json::Value;

use crate::error::{EngineError, StoreError};
use crate::model::{Project, Task};
use crate::store::{ChangeEvent, DocumentStore, WriteSerializer};

/// Key prefix for per-task documents. Tasks are persisted one document per
/// task so concurrent edits to different tasks never share a revision.
pub const TASK_PREFIX: &str = "task/";

/// The whole project list lives in a single document.
pub const PROJECTS_DOC_ID: &str = "projects";

pub fn task_doc_id(task_id: &str) -> String {
    format!("{TASK_PREFIX}{task_id}")
}

/// Typed adapter between the engine's records and the raw document store.
/// Owns the write serializer so all persistence flows through its lanes.
pub struct StoreAdapter {
    store: Arc<dyn DocumentStore>,
    serializer: WriteSerializer,
}

impl StoreAdapter {
    pub fn new(store: Arc<dyn DocumentStore>) -> Self {
        Self {
            store,
            serializer: WriteSerializer::new(),
        }
    }

    /// Poll the store until it answers or the attempt ceiling is hit.
    /// The caller decides whether to degrade or fail.
    pub fn wait_until_ready(&self, attempts: u32, interval: Duration) -> Result<(), EngineError> {
        for attempt in 0..attempts {
            if self.store.ping() {
                return Ok(());
            }
            tracing::debug!(attempt, "document store not ready yet");
            std::thread::sleep(interval);
        }
        Err(EngineError::StoreUnavailable { attempts })
    }

    /// Load all task documents. Malformed bodies are logged and skipped,
    /// never fatal.
    pub fn load_tasks(&self) -> Result<Vec<Task>, StoreError> {
        let mut tasks = Vec::new();
        for doc in self.store.enumerate(TASK_PREFIX)? {
            match serde_json::from_value::<Task>(doc.body) {
                Ok(task) => tasks.push(task),
                Err(err) => {
                    tracing::warn!(doc_id = %doc.id, error = %err, "skipping malformed task document");
                }
            }
        }
        Ok(tasks)
    }

    pub fn load_projects(&self) -> Result<Vec<Project>, StoreError> {
        let doc = match self.store.get(PROJECTS_DOC_ID) {
            Ok(doc) => doc,
            Err(StoreError::NotFound { .. }) => return Ok(Vec::new()),
            Err(err) => return Err(err),
        };
        match serde_json::from_value::<Vec<Project>>(doc.body) {
            Ok(projects) => Ok(projects),
            Err(err) => {
                tracing::warn!(error = %err, "projects document malformed, starting empty");
                Ok(Vec::new())
            }
        }
    }

    pub fn save_task(&self, task: &Task) -> Result<u64, StoreError> {
        let body = serde_json::to_value(task)?;
        self.serializer
            .save("tasks", self.store.as_ref(), &task_doc_id(&task.id), &body)
    }

    pub fn delete_task(&self, task_id: &str) -> Result<(), StoreError> {
        self.serializer
            .remove("tasks", self.store.as_ref(), &task_doc_id(task_id))
    }

    pub fn save_projects(&self, projects: &[Project]) -> Result<u64, StoreError> {
        let body = serde_json::to_value(projects)?;
        self.serializer
            .save("projects", self.store.as_ref(), PROJECTS_DOC_ID, &body)
    }

    /// Bulk-save every task, then reconcile: any stored task document whose
    /// id is no longer in the collection is deleted.
    pub fn save_all_tasks(&self, tasks: &[Task]) -> Result<(), StoreError> {
        let mut docs: Vec<(String, Value)> = Vec::with_capacity(tasks.len());
        for task in tasks {
            docs.push((task_doc_id(&task.id), serde_json::to_value(task)?));
        }
        self.serializer
            .save_all("tasks", self.store.as_ref(), &docs)?;

        let live: std::collections::HashSet<String> =
            tasks.iter().map(|t| task_doc_id(&t.id)).collect();
        let removed =
            self.serializer
                .reconcile("tasks", self.store.as_ref(), TASK_PREFIX, |id| {
                    live.contains(id)
                })?;
        if !removed.is_empty() {
            tracing::debug!(count = removed.len(), "reconciled stale task documents");
        }
        Ok(())
    }

    pub fn subscribe(&self) -> Receiver<ChangeEvent> {
        self.store.subscribe()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::{new_id, TaskStatus};
    use crate::store::SqliteStore;
    use chrono::Utc;
    use pretty_assertions::assert_eq;
    use serde_json::json;
    use tempfile::TempDir;

    fn sample_task(title: &str) -> Task {
        let now = Utc::now();
        Task {
            id: new_id(),
            title: title.into(),
            description: String::new(),
            status: TaskStatus::Planned,
            priority: None,
            project_id: None,
            is_uncategorized: true,
            parent_task_id: None,
            canvas_position: None,
            is_in_inbox: true,
            instances: vec![],
            subtasks: vec![],
            due_date: None,
            scheduled_date: None,
            scheduled_time: None,
            created_at: now,
            updated_at: now,
        }
    }

    fn adapter_with_store() -> (StoreAdapter, Arc<SqliteStore>, TempDir) {
        let dir = TempDir::new().unwrap();
        let store = Arc::new(SqliteStore::open(&dir.path().join("store.sqlite3")).unwrap());
        (StoreAdapter::new(store.clone()), store, dir)
    }

    #[test]
    fn tasks_round_trip_one_document_each() {
        let (adapter, store, _dir) = adapter_with_store();
        let a = sample_task("a");
        let b = sample_task("b");
        adapter.save_task(&a).unwrap();
        adapter.save_task(&b).unwrap();

        assert!(store.get(&task_doc_id(&a.id)).is_ok());
        assert!(store.get(&task_doc_id(&b.id)).is_ok());

        let mut loaded = adapter.load_tasks().unwrap();
        loaded.sort_by(|x, y| x.title.cmp(&y.title));
        assert_eq!(loaded, vec![a, b]);
    }

    #[test]
    fn malformed_task_documents_are_skipped() {
        let (adapter, store, _dir) = adapter_with_store();
        adapter.save_task(&sample_task("good")).unwrap();
        store
            .put("task/broken", None, &json!({"not": "a task"}))
            .unwrap();

        let loaded = adapter.load_tasks().unwrap();
        assert_eq!(loaded.len(), 1);
        assert_eq!(loaded[0].title, "good");
    }

    #[test]
    fn missing_projects_document_loads_empty() {
        let (adapter, _store, _dir) = adapter_with_store();
        assert!(adapter.load_projects().unwrap().is_empty());
    }

    #[test]
    fn save_all_reconciles_deleted_tasks() {
        let (adapter, store, _dir) = adapter_with_store();
        let keep = sample_task("keep");
        let drop = sample_task("drop");
        adapter.save_task(&keep).unwrap();
        adapter.save_task(&drop).unwrap();

        adapter.save_all_tasks(std::slice::from_ref(&keep)).unwrap();
        assert!(store.get(&task_doc_id(&keep.id)).is_ok());
        assert!(store.get(&task_doc_id(&drop.id)).is_err());
    }

    #[test]
    fn readiness_polling_gives_up_at_the_ceiling() {
        struct DeadStore;
        impl DocumentStore for DeadStore {
            fn get(&self, id: &str) -> Result<crate::store::Document, StoreError> {
                Err(StoreError::NotFound { id: id.into() })
            }
            fn put(&self, _: &str, _: Option<u64>, _: &Value) -> Result<u64, StoreError> {
                Err(StoreError::Unavailable)
            }
            fn delete(&self, _: &str, _: u64) -> Result<(), StoreError> {
                Err(StoreError::Unavailable)
            }
            fn enumerate(&self, _: &str) -> Result<Vec<crate::store::Document>, StoreError> {
                Err(StoreError::Unavailable)
            }
            fn changes(&self, _: u64) -> Result<Vec<ChangeEvent>, StoreError> {
                Err(StoreError::Unavailable)
            }
            fn subscribe(&self) -> Receiver<ChangeEvent> {
                std::sync::mpsc::channel().1
            }
            fn ping(&self) -> bool {
                false
            }
        }

        let adapter = StoreAdapter::new(Arc::new(DeadStore));
        let err = adapter
            .wait_until_ready(3, Duration::from_millis(1))
            .unwrap_err();
        assert!(matches!(
            err,
            EngineError::StoreUnavailable { attempts: 3 }
        ));
    }
}
