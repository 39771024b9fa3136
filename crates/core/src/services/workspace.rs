//! The task/project state container: owns the canonical in-memory
//! collections, orchestrates persistence, migration, filtering, undo and
//! cross-tab reloads, and is the sole authority the UI reads from.

use std::sync::Arc;
use std::time::{Duration, Instant};

use chrono::{Datelike, Duration as ChronoDuration, NaiveDate, Utc};

use crate::config::{cache_keys, AppConfig, LocalCache};
use crate::error::EngineError;
use crate::filter::{self, FilterSelection, SmartView};
use crate::history::{History, HistoryEntry};
use crate::import;
use crate::migrate;
use crate::model::{
    is_date_key, is_time_key, new_id, CanvasPosition, DateBucket, Instance, Project, ProjectDraft,
    ProjectPatch, Task, TaskDraft, TaskPatch, TaskStatus,
};
use crate::store::{DocumentStore, SqliteStore, StoreAdapter};
use crate::watch::{ChangeListener, DEFAULT_SUPPRESSION};

/// Store-availability polling ceiling: 50 attempts at 100ms, then the
/// workspace proceeds with an empty, degraded state instead of hanging.
const READINESS_ATTEMPTS: u32 = 50;
const READINESS_INTERVAL: Duration = Duration::from_millis(100);

pub struct Workspace {
    adapter: StoreAdapter,
    listener: ChangeListener,
    cache: LocalCache,
    tasks: Vec<Task>,
    projects: Vec<Project>,
    selection: FilterSelection,
    history: History,
    manual_ops_in_flight: u32,
    degraded: bool,
    readiness_attempts: u32,
    readiness_interval: Duration,
}

impl Workspace {
    pub fn open(config: &AppConfig) -> Result<Self, EngineError> {
        let store = SqliteStore::open(config.db_path())?;
        Ok(Self::with_store(config, Arc::new(store)))
    }

    /// Build a workspace over any store implementation. Multiple workspaces
    /// sharing one store behave like multiple tabs over the same origin.
    pub fn with_store(config: &AppConfig, store: Arc<dyn DocumentStore>) -> Self {
        let adapter = StoreAdapter::new(store);
        let listener = ChangeListener::new(adapter.subscribe());
        Self {
            adapter,
            listener,
            cache: LocalCache::new(config.cache_path().to_path_buf()),
            tasks: Vec::new(),
            projects: Vec::new(),
            selection: FilterSelection::default(),
            history: History::default(),
            manual_ops_in_flight: 0,
            degraded: false,
            readiness_attempts: READINESS_ATTEMPTS,
            readiness_interval: READINESS_INTERVAL,
        }
    }

    pub fn set_readiness_polling(&mut self, attempts: u32, interval: Duration) {
        self.readiness_attempts = attempts;
        self.readiness_interval = interval;
    }

    pub fn tasks(&self) -> &[Task] {
        &self.tasks
    }

    pub fn projects(&self) -> &[Project] {
        &self.projects
    }

    pub fn get_task(&self, id: &str) -> Option<&Task> {
        self.tasks.iter().find(|t| t.id == id)
    }

    pub fn get_project(&self, id: &str) -> Option<&Project> {
        self.projects.iter().find(|p| p.id == id)
    }

    /// True when the last load gave up on the store and proceeded empty.
    pub fn is_degraded(&self) -> bool {
        self.degraded
    }

    pub fn manual_operation_active(&self) -> bool {
        self.manual_ops_in_flight > 0
    }

    // --- loading -----------------------------------------------------------

    /// Populate memory from the store: poll for readiness, enumerate and
    /// decode documents, run the migration pipeline, persist repairs. If
    /// the store never becomes reachable the workspace degrades to an
    /// empty working set instead of failing.
    pub fn load_from_store(&mut self) -> Result<(), EngineError> {
        if let Some(selection) = self.cache.get::<FilterSelection>(cache_keys::FILTER_PREFERENCES)
        {
            self.selection = selection;
        }

        match self
            .adapter
            .wait_until_ready(self.readiness_attempts, self.readiness_interval)
        {
            Ok(()) => {}
            Err(EngineError::StoreUnavailable { attempts }) => {
                tracing::warn!(attempts, "store unavailable, degrading to empty state");
                self.tasks.clear();
                self.projects.clear();
                self.degraded = true;
                return Ok(());
            }
            Err(err) => return Err(err),
        }
        self.degraded = false;

        self.tasks = self.adapter.load_tasks()?;
        self.projects = self.adapter.load_projects()?;

        // Last-resort recovery: an empty store with a cached backup means
        // the documents were lost, not that the user never had any.
        let mut recovered = false;
        if self.tasks.is_empty() {
            if let Some(backup) = self
                .cache
                .get::<Vec<Task>>(cache_keys::USER_BACKUP)
                .or_else(|| self.cache.get::<Vec<Task>>(cache_keys::IMPORTED_TASKS))
            {
                if !backup.is_empty() {
                    tracing::warn!(count = backup.len(), "store empty, recovering from cached backup");
                    self.tasks = backup;
                    recovered = true;
                }
            }
        }

        let changed = migrate::run(&mut self.tasks, &mut self.projects);
        if changed || recovered {
            self.save_all()?;
        } else {
            self.cache.set(cache_keys::USER_BACKUP, &self.tasks);
        }
        tracing::debug!(
            tasks = self.tasks.len(),
            projects = self.projects.len(),
            "loaded from store"
        );
        Ok(())
    }

    /// Persist everything: one document per task, the project list, then
    /// reconcile stale task documents. Also refreshes the cached backup.
    pub fn save_all(&mut self) -> Result<(), EngineError> {
        self.adapter
            .save_all_tasks(&self.tasks)
            .map_err(|err| EngineError::from_store("save_all", "tasks", err))?;
        self.adapter
            .save_projects(&self.projects)
            .map_err(|err| EngineError::from_store("save_all", "projects", err))?;
        self.cache.set(cache_keys::USER_BACKUP, &self.tasks);
        self.suppress_echo();
        Ok(())
    }

    /// Escape hatch for callers that must bypass the debounce window: save
    /// one task immediately and suppress the reload echo of that write.
    pub fn force_save_task(&mut self, id: &str) -> Result<(), EngineError> {
        let task = self
            .get_task(id)
            .cloned()
            .ok_or_else(|| unknown_task("force_save_task", id))?;
        self.adapter
            .save_task(&task)
            .map_err(|err| EngineError::from_store("force_save_task", id, err))?;
        self.suppress_echo();
        Ok(())
    }

    /// Drain the cross-tab change feed; reload when the debounced gate
    /// fires. Returns true when a reload happened.
    pub fn poll_external_changes(&mut self, now: Instant) -> Result<bool, EngineError> {
        if !self.listener.pump(now) {
            return Ok(false);
        }
        tracing::debug!("external change settled, reloading");
        self.load_from_store()?;
        Ok(true)
    }

    // --- task operations ---------------------------------------------------

    pub fn create_task(&mut self, draft: TaskDraft) -> Result<Task, EngineError> {
        self.with_manual_op(|ws| {
            let now = Utc::now();
            let project_id = draft.project_id.filter(|p| !p.trim().is_empty());

            let mut instances = Vec::new();
            if let (Some(date), Some(time)) = (&draft.scheduled_date, &draft.scheduled_time) {
                if is_date_key(date) && is_time_key(time) {
                    instances.push(Instance::new(date.clone(), time.clone()));
                }
            }

            let is_in_inbox = instances.is_empty() && draft.canvas_position.is_none();
            let task = Task {
                id: new_id(),
                title: draft.title,
                description: draft.description.unwrap_or_default(),
                status: draft.status.unwrap_or(TaskStatus::Planned),
                priority: draft.priority,
                is_uncategorized: project_id.is_none(),
                project_id,
                parent_task_id: draft.parent_task_id,
                canvas_position: if instances.is_empty() {
                    draft.canvas_position
                } else {
                    None
                },
                is_in_inbox,
                instances,
                subtasks: vec![],
                due_date: draft.due_date.filter(|d| is_date_key(d)),
                scheduled_date: None,
                scheduled_time: None,
                created_at: now,
                updated_at: now,
            };

            ws.tasks.push(task.clone());
            if let Err(err) = ws.adapter.save_task(&task) {
                // Roll back the in-memory append and re-raise.
                ws.tasks.retain(|t| t.id != task.id);
                return Err(EngineError::from_store("create_task", &task.id, err));
            }
            ws.history.record(HistoryEntry::Created(task.clone()));
            ws.suppress_echo();
            tracing::debug!(task_id = %task.id, "task created");
            Ok(task)
        })
    }

    pub fn update_task(&mut self, id: &str, patch: TaskPatch) -> Result<Task, EngineError> {
        self.with_manual_op(|ws| {
            let index = ws
                .tasks
                .iter()
                .position(|t| t.id == id)
                .ok_or_else(|| unknown_task("update_task", id))?;
            let before = ws.tasks[index].clone();

            let patch = apply_transition_rules(&before, patch);
            let mut after = before.clone();
            patch.merge_into(&mut after);
            after.updated_at = Utc::now();

            ws.tasks[index] = after.clone();
            ws.adapter
                .save_task(&after)
                .map_err(|err| EngineError::from_store("update_task", id, err))?;
            ws.history.record(HistoryEntry::Updated {
                before,
                after: after.clone(),
            });
            ws.suppress_echo();
            Ok(after)
        })
    }

    /// Remove the task from memory, persist the deletion with one retry;
    /// if the retry also fails the task is restored in memory and the
    /// error propagated.
    pub fn delete_task(&mut self, id: &str) -> Result<(), EngineError> {
        self.with_manual_op(|ws| {
            let index = ws
                .tasks
                .iter()
                .position(|t| t.id == id)
                .ok_or_else(|| unknown_task("delete_task", id))?;
            let removed = ws.tasks.remove(index);

            let result = ws.adapter.delete_task(id).or_else(|first| {
                tracing::warn!(task_id = id, error = %first, "delete failed, retrying");
                ws.adapter.delete_task(id)
            });
            if let Err(err) = result {
                ws.tasks.insert(index, removed);
                return Err(EngineError::from_store("delete_task", id, err));
            }
            ws.history.record(HistoryEntry::Deleted(removed));
            ws.suppress_echo();
            tracing::debug!(task_id = id, "task deleted");
            Ok(())
        })
    }

    pub fn move_task_to_date(&mut self, id: &str, bucket: DateBucket) -> Result<Task, EngineError> {
        self.move_task_to_date_on(id, bucket, Utc::now().date_naive())
    }

    /// Replace the task's entire instance list with at most one instance
    /// for the bucket's target date. Deterministic variant with an
    /// injected `today`.
    pub fn move_task_to_date_on(
        &mut self,
        id: &str,
        bucket: DateBucket,
        today: NaiveDate,
    ) -> Result<Task, EngineError> {
        let instances = match resolve_bucket_date(bucket, today) {
            Some(date) => vec![Instance::new(date.format("%Y-%m-%d").to_string(), "09:00")],
            None => Vec::new(),
        };
        let patch = TaskPatch {
            instances: Some(instances),
            ..TaskPatch::default()
        };
        self.update_task(id, patch)
    }

    /// Clear instances and legacy date/time fields and return the task to
    /// the inbox. Deliberately bypasses the transition rules: `due_date`
    /// and `canvas_position` are preserved.
    pub fn unschedule_task(&mut self, id: &str) -> Result<Task, EngineError> {
        self.with_manual_op(|ws| {
            let index = ws
                .tasks
                .iter()
                .position(|t| t.id == id)
                .ok_or_else(|| unknown_task("unschedule_task", id))?;
            let before = ws.tasks[index].clone();

            let mut after = before.clone();
            after.instances.clear();
            after.scheduled_date = None;
            after.scheduled_time = None;
            after.is_in_inbox = true;
            after.updated_at = Utc::now();

            ws.tasks[index] = after.clone();
            ws.adapter
                .save_task(&after)
                .map_err(|err| EngineError::from_store("unschedule_task", id, err))?;
            ws.history.record(HistoryEntry::Updated {
                before,
                after: after.clone(),
            });
            ws.suppress_echo();
            Ok(after)
        })
    }

    // --- project operations ------------------------------------------------

    pub fn create_project(&mut self, draft: ProjectDraft) -> Result<Project, EngineError> {
        self.with_manual_op(|ws| {
            let project = Project {
                id: new_id(),
                name: draft.name,
                color: draft.color,
                color_type: draft.color_type,
                emoji: draft.emoji,
                parent_id: draft.parent_id,
                view_type: draft.view_type,
            };
            ws.projects.push(project.clone());
            if let Err(err) = ws.adapter.save_projects(&ws.projects) {
                ws.projects.retain(|p| p.id != project.id);
                return Err(EngineError::from_store("create_project", &project.id, err));
            }
            ws.suppress_echo();
            Ok(project)
        })
    }

    pub fn update_project(&mut self, id: &str, patch: ProjectPatch) -> Result<Project, EngineError> {
        self.with_manual_op(|ws| {
            let index = ws
                .projects
                .iter()
                .position(|p| p.id == id)
                .ok_or_else(|| EngineError::Validation {
                    operation: "update_project",
                    reason: format!("unknown project '{id}'"),
                })?;

            // Reparenting must not introduce a cycle in the project tree.
            if let Some(Some(new_parent)) = &patch.parent_id {
                if ws.would_create_project_cycle(id, new_parent) {
                    return Err(EngineError::Validation {
                        operation: "update_project",
                        reason: format!("reparenting '{id}' under '{new_parent}' creates a cycle"),
                    });
                }
            }

            let project = &mut ws.projects[index];
            if let Some(name) = patch.name {
                project.name = name;
            }
            if let Some(color) = patch.color {
                project.color = color;
            }
            if let Some(color_type) = patch.color_type {
                project.color_type = color_type;
            }
            if let Some(emoji) = patch.emoji {
                project.emoji = emoji;
            }
            if let Some(parent_id) = patch.parent_id {
                project.parent_id = parent_id;
            }
            if let Some(view_type) = patch.view_type {
                project.view_type = view_type;
            }
            let updated = project.clone();

            ws.adapter
                .save_projects(&ws.projects)
                .map_err(|err| EngineError::from_store("update_project", id, err))?;
            ws.suppress_echo();
            Ok(updated)
        })
    }

    /// Delete a project: member tasks become uncategorized, child projects
    /// reparent to the deleted project's former parent.
    pub fn delete_project(&mut self, id: &str) -> Result<(), EngineError> {
        self.with_manual_op(|ws| {
            let index = ws
                .projects
                .iter()
                .position(|p| p.id == id)
                .ok_or_else(|| EngineError::Validation {
                    operation: "delete_project",
                    reason: format!("unknown project '{id}'"),
                })?;
            let removed = ws.projects.remove(index);

            for project in ws.projects.iter_mut() {
                if project.parent_id.as_deref() == Some(id) {
                    project.parent_id = removed.parent_id.clone();
                }
            }
            let now = Utc::now();
            for task in ws.tasks.iter_mut() {
                if task.project_id.as_deref() == Some(id) {
                    task.project_id = None;
                    task.is_uncategorized = true;
                    task.updated_at = now;
                }
            }

            ws.adapter
                .save_projects(&ws.projects)
                .map_err(|err| EngineError::from_store("delete_project", id, err))?;
            ws.adapter
                .save_all_tasks(&ws.tasks)
                .map_err(|err| EngineError::from_store("delete_project", id, err))?;
            ws.selection.active_project_ids.remove(id);
            ws.suppress_echo();
            tracing::debug!(project_id = id, "project deleted, members uncategorized");
            Ok(())
        })
    }

    fn would_create_project_cycle(&self, project_id: &str, new_parent: &str) -> bool {
        let mut current = Some(new_parent.to_string());
        let mut visited = std::collections::HashSet::new();
        while let Some(ancestor) = current {
            if ancestor == project_id {
                return true;
            }
            if !visited.insert(ancestor.clone()) {
                return true;
            }
            current = self
                .projects
                .iter()
                .find(|p| p.id == ancestor)
                .and_then(|p| p.parent_id.clone());
        }
        false
    }

    // --- filters -----------------------------------------------------------

    pub fn selection(&self) -> &FilterSelection {
        &self.selection
    }

    pub fn toggle_smart_view(&mut self, view: SmartView) {
        self.selection.toggle_smart_view(view);
        self.persist_selection();
    }

    pub fn toggle_project_filter(&mut self, project_id: &str) {
        self.selection.toggle_project(project_id);
        self.persist_selection();
    }

    pub fn set_status_filter(&mut self, status: Option<TaskStatus>) {
        self.selection.active_status = status;
        self.persist_selection();
    }

    pub fn set_hide_done_tasks(&mut self, hide: bool) {
        self.selection.hide_done_tasks = hide;
        self.persist_selection();
    }

    pub fn clear_filters(&mut self) {
        self.selection = FilterSelection::default();
        // An empty selection is the absence of a preference, not a
        // preference worth storing.
        self.cache.remove(cache_keys::FILTER_PREFERENCES);
    }

    fn persist_selection(&self) {
        self.cache
            .set(cache_keys::FILTER_PREFERENCES, &self.selection);
    }

    /// The derived task list, recomputed on read from current state.
    pub fn filtered_tasks(&self) -> Vec<Task> {
        self.filtered_tasks_on(Utc::now().date_naive())
    }

    pub fn filtered_tasks_on(&self, today: NaiveDate) -> Vec<Task> {
        filter::filter_tasks(&self.tasks, &self.projects, &self.selection, today)
    }

    pub fn calendar_tasks(&self) -> Vec<Task> {
        self.calendar_tasks_on(Utc::now().date_naive())
    }

    pub fn calendar_tasks_on(&self, today: NaiveDate) -> Vec<Task> {
        filter::calendar_tasks(&self.tasks, &self.projects, &self.selection, today)
    }

    // --- undo / redo ---------------------------------------------------------

    pub fn can_undo(&self) -> bool {
        self.history.can_undo()
    }

    pub fn can_redo(&self) -> bool {
        self.history.can_redo()
    }

    /// Invert the most recent recorded action. Returns false when there is
    /// nothing to undo. A failed inversion leaves the entry on the undo
    /// stack and surfaces the error.
    pub fn undo(&mut self) -> Result<bool, EngineError> {
        let Some(entry) = self.history.take_undo() else {
            return Ok(false);
        };
        match self.apply_inverse(&entry) {
            Ok(()) => {
                self.history.confirm_undo(entry);
                self.suppress_echo();
                Ok(true)
            }
            Err(err) => {
                self.history.revert_undo(entry);
                Err(err)
            }
        }
    }

    pub fn redo(&mut self) -> Result<bool, EngineError> {
        let Some(entry) = self.history.take_redo() else {
            return Ok(false);
        };
        match self.apply_forward(&entry) {
            Ok(()) => {
                self.history.confirm_redo(entry);
                self.suppress_echo();
                Ok(true)
            }
            Err(err) => {
                self.history.revert_redo(entry);
                Err(err)
            }
        }
    }

    fn apply_inverse(&mut self, entry: &HistoryEntry) -> Result<(), EngineError> {
        match entry {
            HistoryEntry::Created(task) => {
                self.tasks.retain(|t| t.id != task.id);
                self.adapter
                    .delete_task(&task.id)
                    .map_err(|err| EngineError::from_store("undo", &task.id, err))
            }
            HistoryEntry::Updated { before, .. } => self.put_in_memory_and_store("undo", before),
            HistoryEntry::Deleted(task) => self.put_in_memory_and_store("undo", task),
        }
    }

    fn apply_forward(&mut self, entry: &HistoryEntry) -> Result<(), EngineError> {
        match entry {
            HistoryEntry::Created(task) => self.put_in_memory_and_store("redo", task),
            HistoryEntry::Updated { after, .. } => self.put_in_memory_and_store("redo", after),
            HistoryEntry::Deleted(task) => {
                self.tasks.retain(|t| t.id != task.id);
                self.adapter
                    .delete_task(&task.id)
                    .map_err(|err| EngineError::from_store("redo", &task.id, err))
            }
        }
    }

    fn put_in_memory_and_store(
        &mut self,
        operation: &'static str,
        task: &Task,
    ) -> Result<(), EngineError> {
        match self.tasks.iter_mut().find(|t| t.id == task.id) {
            Some(slot) => *slot = task.clone(),
            None => self.tasks.push(task.clone()),
        }
        self.adapter
            .save_task(task)
            .map(|_| ())
            .map_err(|err| EngineError::from_store(operation, &task.id, err))
    }

    // --- import / restore ----------------------------------------------------

    /// Replace the working set with a backup snapshot. An empty snapshot
    /// over non-empty state is refused: that is data loss, not a restore.
    pub fn restore_backup(&mut self, snapshot: Vec<Task>) -> Result<(), EngineError> {
        if snapshot.is_empty() && !self.tasks.is_empty() {
            return Err(EngineError::Validation {
                operation: "restore_backup",
                reason: format!(
                    "refusing empty snapshot over {} in-memory tasks",
                    self.tasks.len()
                ),
            });
        }
        if let Some(bad) = snapshot.iter().find(|t| t.id.trim().is_empty()) {
            return Err(EngineError::Validation {
                operation: "restore_backup",
                reason: format!("snapshot record '{}' has no id", bad.title),
            });
        }

        self.tasks = snapshot;
        migrate::run(&mut self.tasks, &mut self.projects);
        self.save_all()
    }

    /// Import tasks from the loose JSON format, skipping ids already
    /// present. Returns how many tasks were added.
    pub fn import_json(&mut self, raw: &str) -> Result<usize, EngineError> {
        let imported = import::parse_import(raw)?;
        self.cache.set(cache_keys::IMPORTED_TASKS, &imported);

        let mut added = 0;
        for task in imported {
            if self.get_task(&task.id).is_none() {
                self.tasks.push(task);
                added += 1;
            }
        }
        if added > 0 {
            self.save_all()?;
        }
        tracing::debug!(added, "import finished");
        Ok(added)
    }

    // --- internals -------------------------------------------------------------

    /// Background auto-persistence hook. Skipped while a manual operation
    /// is in flight so a debounced saver cannot race ahead with a stale
    /// snapshot.
    pub fn maybe_autosave(&mut self) -> Result<bool, EngineError> {
        if self.manual_operation_active() {
            return Ok(false);
        }
        self.save_all()?;
        Ok(true)
    }

    fn with_manual_op<T>(
        &mut self,
        op: impl FnOnce(&mut Self) -> Result<T, EngineError>,
    ) -> Result<T, EngineError> {
        self.manual_ops_in_flight += 1;
        let result = op(self);
        // Guaranteed release: runs on the error path too.
        self.manual_ops_in_flight -= 1;
        result
    }

    fn suppress_echo(&mut self) {
        self.listener.suppress_for(DEFAULT_SUPPRESSION, Instant::now());
    }
}

fn unknown_task(operation: &'static str, id: &str) -> EngineError {
    EngineError::Validation {
        operation,
        reason: format!("unknown task '{id}'"),
    }
}

/// The fixed state-transition rules of `update_task`, evaluated in order.
/// Each rule may add forced fields to the patch before the final merge;
/// none of them touches the task itself.
fn apply_transition_rules(prev: &Task, mut patch: TaskPatch) -> TaskPatch {
    // Rule 1: completing a task returns it to the inbox.
    if patch.status == Some(TaskStatus::Done) {
        patch.is_in_inbox = Some(true);
        patch.canvas_position = Some(None);
        if patch.instances.is_none() && !prev.instances.is_empty() {
            patch.instances = Some(Vec::new());
        }
    }

    // Rule 2: a newly assigned canvas position leaves the inbox; canvas and
    // schedule are mutually exclusive placements.
    if matches!(patch.canvas_position, Some(Some(_))) && prev.canvas_position.is_none() {
        patch.is_in_inbox = Some(false);
        if patch.instances.is_none() && !prev.instances.is_empty() {
            patch.instances = Some(Vec::new());
        }
    }

    // Rule 3: clearing the canvas position with no schedule left returns
    // the task to the inbox.
    if matches!(patch.canvas_position, Some(None)) && prev.canvas_position.is_some() {
        let instances_after = patch.instances.as_ref().unwrap_or(&prev.instances);
        if instances_after.is_empty() {
            patch.is_in_inbox = Some(true);
        }
    }

    // Rule 4: scheduling wins over inbox and canvas.
    if patch.instances.as_ref().map_or(false, |i| !i.is_empty()) {
        patch.is_in_inbox = Some(false);
        patch.canvas_position = Some(None);
    }

    // Rule 5: unscheduling with no canvas position falls back to the inbox.
    if patch.instances.as_ref().map_or(false, |i| i.is_empty()) && !prev.instances.is_empty() {
        let canvas_after = match &patch.canvas_position {
            Some(value) => value.is_some(),
            None => prev.canvas_position.is_some(),
        };
        if !canvas_after {
            patch.is_in_inbox = Some(true);
        }
    }

    // Rule 6: keep the denormalized uncategorized flag in lockstep with the
    // effective project id. Recomputed unconditionally so a stray flag in
    // the patch can never desync it.
    let project_after = match &patch.project_id {
        Some(value) => value.is_some(),
        None => prev.project_id.is_some(),
    };
    patch.is_uncategorized = Some(!project_after);

    // Rule 7: leaving the inbox without a canvas position or schedule gets
    // the default canvas spot.
    if patch.is_in_inbox == Some(false) {
        let canvas_after = match &patch.canvas_position {
            Some(value) => value.is_some(),
            None => prev.canvas_position.is_some(),
        };
        let instances_after = patch.instances.as_ref().unwrap_or(&prev.instances);
        if !canvas_after && instances_after.is_empty() {
            patch.canvas_position = Some(Some(CanvasPosition::DEFAULT));
        }
    }

    // Rule 8: an explicit move to the inbox clears the canvas position and
    // any remaining schedule.
    if patch.is_in_inbox == Some(true) {
        patch.canvas_position = Some(None);
        let instances_after = patch.instances.as_ref().unwrap_or(&prev.instances);
        if !instances_after.is_empty() {
            patch.instances = Some(Vec::new());
        }
    }

    patch
}

/// Map a bucket name to its target date. `None` means unscheduled.
fn resolve_bucket_date(bucket: DateBucket, today: NaiveDate) -> Option<NaiveDate> {
    match bucket {
        DateBucket::Overdue => Some(today - ChronoDuration::days(1)),
        DateBucket::Today => Some(today),
        DateBucket::Tomorrow => Some(today + ChronoDuration::days(1)),
        DateBucket::ThisWeek => {
            let to_sunday = 6 - today.weekday().num_days_from_monday() as i64;
            Some(today + ChronoDuration::days(to_sunday))
        }
        DateBucket::NextWeek => {
            let to_next_monday = 7 - today.weekday().num_days_from_monday() as i64;
            Some(today + ChronoDuration::days(to_next_monday))
        }
        DateBucket::Later => Some(today + ChronoDuration::days(14)),
        DateBucket::NoDate => None,
    }
}
