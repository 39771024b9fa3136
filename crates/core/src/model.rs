use std::fmt;
use std::str::FromStr;

use anyhow::{anyhow, Result};
use chrono::{DateTime, NaiveDate, Utc};
use once_cell::sync::Lazy;
use regex::Regex;
use serde::{Deserialize, Serialize};
use ulid::Ulid;

/// Retired project id still present in historical documents. Migration
/// rewrites every reference to the uncategorized representation.
pub const LEGACY_DEFAULT_PROJECT_ID: &str = "default-project";

/// Legacy sentinel some documents carry instead of a null project id.
pub const LEGACY_UNCATEGORIZED_ID: &str = "uncategorized";

static DATE_KEY: Lazy<Regex> = Lazy::new(|| Regex::new(r"^\d{4}-\d{2}-\d{2}$").unwrap());
static TIME_KEY: Lazy<Regex> = Lazy::new(|| Regex::new(r"^\d{2}:\d{2}$").unwrap());

/// Validates a `YYYY-MM-DD` date key.
pub fn is_date_key(value: &str) -> bool {
    DATE_KEY.is_match(value) && NaiveDate::parse_from_str(value, "%Y-%m-%d").is_ok()
}

/// Validates an `HH:MM` clock key.
pub fn is_time_key(value: &str) -> bool {
    TIME_KEY.is_match(value)
}

/// Time-ordered unique token used for every record id.
pub fn new_id() -> String {
    Ulid::new().to_string()
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TaskStatus {
    Planned,
    InProgress,
    Done,
    Backlog,
    OnHold,
    /// Retired value; kept so historical documents deserialize. The
    /// migration pipeline rewrites it to [`TaskStatus::Planned`].
    Todo,
}

impl TaskStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            TaskStatus::Planned => "planned",
            TaskStatus::InProgress => "in_progress",
            TaskStatus::Done => "done",
            TaskStatus::Backlog => "backlog",
            TaskStatus::OnHold => "on_hold",
            TaskStatus::Todo => "todo",
        }
    }
}

impl fmt::Display for TaskStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl FromStr for TaskStatus {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "planned" => Ok(TaskStatus::Planned),
            "in_progress" | "in-progress" => Ok(TaskStatus::InProgress),
            "done" => Ok(TaskStatus::Done),
            "backlog" => Ok(TaskStatus::Backlog),
            "on_hold" | "on-hold" => Ok(TaskStatus::OnHold),
            "todo" => Ok(TaskStatus::Todo),
            other => Err(anyhow!(
                "Unknown status '{}': expected planned|in_progress|done|backlog|on_hold",
                other
            )),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Priority {
    High,
    Medium,
    Low,
}

impl Priority {
    pub fn as_str(&self) -> &'static str {
        match self {
            Priority::High => "high",
            Priority::Medium => "medium",
            Priority::Low => "low",
        }
    }
}

impl fmt::Display for Priority {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl FromStr for Priority {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "high" => Ok(Priority::High),
            "medium" | "med" => Ok(Priority::Medium),
            "low" => Ok(Priority::Low),
            other => Err(anyhow!(
                "Unknown priority '{}': expected high|medium|low",
                other
            )),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct CanvasPosition {
    pub x: f64,
    pub y: f64,
}

impl CanvasPosition {
    /// Spot assigned when a task leaves the inbox without an explicit drop
    /// position.
    pub const DEFAULT: CanvasPosition = CanvasPosition { x: 120.0, y: 120.0 };
}

/// One concrete scheduled occurrence of a task on the calendar.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Instance {
    pub id: String,
    pub scheduled_date: String,
    pub scheduled_time: String,
    #[serde(default = "default_duration")]
    pub duration_minutes: u32,
}

pub(crate) fn default_duration() -> u32 {
    60
}

impl Instance {
    pub fn new(scheduled_date: impl Into<String>, scheduled_time: impl Into<String>) -> Self {
        Self {
            id: new_id(),
            scheduled_date: scheduled_date.into(),
            scheduled_time: scheduled_time.into(),
            duration_minutes: default_duration(),
        }
    }

    pub fn date(&self) -> Option<NaiveDate> {
        NaiveDate::parse_from_str(&self.scheduled_date, "%Y-%m-%d").ok()
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Subtask {
    pub id: String,
    pub title: String,
    #[serde(default)]
    pub is_completed: bool,
}

/// The three mutually exclusive placement states a task can occupy.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Placement {
    Inbox,
    Canvas,
    Scheduled,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Task {
    pub id: String,
    pub title: String,
    #[serde(default)]
    pub description: String,
    pub status: TaskStatus,
    #[serde(default)]
    pub priority: Option<Priority>,
    /// `None` means uncategorized. Legacy sentinel strings are normalized
    /// away by the migration pipeline.
    #[serde(default)]
    pub project_id: Option<String>,
    /// Denormalized; must equal `project_id.is_none()` after any mutation.
    #[serde(default)]
    pub is_uncategorized: bool,
    #[serde(default)]
    pub parent_task_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub canvas_position: Option<CanvasPosition>,
    #[serde(default)]
    pub is_in_inbox: bool,
    #[serde(default)]
    pub instances: Vec<Instance>,
    #[serde(default)]
    pub subtasks: Vec<Subtask>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub due_date: Option<String>,
    /// Legacy scalar schedule fields; superseded by `instances` but still
    /// read by migration and cleared by unschedule.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub scheduled_date: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub scheduled_time: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Task {
    pub fn placement(&self) -> Placement {
        if !self.instances.is_empty() {
            Placement::Scheduled
        } else if self.canvas_position.is_some() {
            Placement::Canvas
        } else {
            Placement::Inbox
        }
    }

    /// True when exactly one placement state holds.
    pub fn placement_is_consistent(&self) -> bool {
        match (
            self.is_in_inbox,
            self.canvas_position.is_some(),
            !self.instances.is_empty(),
        ) {
            (true, false, false) => true,
            (false, true, false) => true,
            (false, false, true) => true,
            _ => false,
        }
    }

    pub fn is_scheduled_on(&self, date: NaiveDate) -> bool {
        self.instances.iter().any(|i| i.date() == Some(date))
    }

    pub fn due_on(&self) -> Option<NaiveDate> {
        self.due_date
            .as_deref()
            .and_then(|d| NaiveDate::parse_from_str(d, "%Y-%m-%d").ok())
    }
}

/// Input for creating a task. Unset fields fall back to engine defaults,
/// the way capture input defaults are resolved before insert.
#[derive(Debug, Clone, Default)]
pub struct TaskDraft {
    pub title: String,
    pub description: Option<String>,
    pub status: Option<TaskStatus>,
    pub priority: Option<Priority>,
    pub project_id: Option<String>,
    pub parent_task_id: Option<String>,
    pub due_date: Option<String>,
    pub scheduled_date: Option<String>,
    pub scheduled_time: Option<String>,
    pub canvas_position: Option<CanvasPosition>,
}

/// Field-wise patch for `update_task`. `None` leaves a field alone; the
/// doubly-wrapped fields distinguish "absent" from "set to null".
#[derive(Debug, Clone, Default)]
pub struct TaskPatch {
    pub title: Option<String>,
    pub description: Option<String>,
    pub status: Option<TaskStatus>,
    pub priority: Option<Option<Priority>>,
    pub project_id: Option<Option<String>>,
    pub parent_task_id: Option<Option<String>>,
    pub canvas_position: Option<Option<CanvasPosition>>,
    pub is_in_inbox: Option<bool>,
    pub instances: Option<Vec<Instance>>,
    pub subtasks: Option<Vec<Subtask>>,
    pub due_date: Option<Option<String>>,
    pub scheduled_date: Option<Option<String>>,
    pub scheduled_time: Option<Option<String>>,
    pub is_uncategorized: Option<bool>,
}

impl TaskPatch {
    pub fn merge_into(&self, task: &mut Task) {
        if let Some(title) = &self.title {
            task.title = title.clone();
        }
        if let Some(description) = &self.description {
            task.description = description.clone();
        }
        if let Some(status) = self.status {
            task.status = status;
        }
        if let Some(priority) = self.priority {
            task.priority = priority;
        }
        if let Some(project_id) = &self.project_id {
            task.project_id = project_id.clone();
        }
        if let Some(parent) = &self.parent_task_id {
            task.parent_task_id = parent.clone();
        }
        if let Some(position) = self.canvas_position {
            task.canvas_position = position;
        }
        if let Some(in_inbox) = self.is_in_inbox {
            task.is_in_inbox = in_inbox;
        }
        if let Some(instances) = &self.instances {
            task.instances = instances.clone();
        }
        if let Some(subtasks) = &self.subtasks {
            task.subtasks = subtasks.clone();
        }
        if let Some(due_date) = &self.due_date {
            task.due_date = due_date.clone();
        }
        if let Some(scheduled_date) = &self.scheduled_date {
            task.scheduled_date = scheduled_date.clone();
        }
        if let Some(scheduled_time) = &self.scheduled_time {
            task.scheduled_time = scheduled_time.clone();
        }
        if let Some(flag) = self.is_uncategorized {
            task.is_uncategorized = flag;
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Project {
    pub id: String,
    pub name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub color: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub color_type: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub emoji: Option<String>,
    #[serde(default)]
    pub parent_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub view_type: Option<String>,
}

#[derive(Debug, Clone, Default)]
pub struct ProjectDraft {
    pub name: String,
    pub color: Option<String>,
    pub color_type: Option<String>,
    pub emoji: Option<String>,
    pub parent_id: Option<String>,
    pub view_type: Option<String>,
}

#[derive(Debug, Clone, Default)]
pub struct ProjectPatch {
    pub name: Option<String>,
    pub color: Option<Option<String>>,
    pub color_type: Option<Option<String>>,
    pub emoji: Option<Option<String>>,
    pub parent_id: Option<Option<String>>,
    pub view_type: Option<Option<String>>,
}

/// Target vocabulary for `move_task_to_date`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DateBucket {
    Overdue,
    Today,
    Tomorrow,
    ThisWeek,
    NextWeek,
    Later,
    NoDate,
}

impl DateBucket {
    pub fn as_str(&self) -> &'static str {
        match self {
            DateBucket::Overdue => "overdue",
            DateBucket::Today => "today",
            DateBucket::Tomorrow => "tomorrow",
            DateBucket::ThisWeek => "thisWeek",
            DateBucket::NextWeek => "nextWeek",
            DateBucket::Later => "later",
            DateBucket::NoDate => "noDate",
        }
    }
}

impl FromStr for DateBucket {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "overdue" => Ok(DateBucket::Overdue),
            "today" => Ok(DateBucket::Today),
            "tomorrow" => Ok(DateBucket::Tomorrow),
            "thisWeek" => Ok(DateBucket::ThisWeek),
            "nextWeek" => Ok(DateBucket::NextWeek),
            "later" => Ok(DateBucket::Later),
            "noDate" => Ok(DateBucket::NoDate),
            other => Err(anyhow!(
                "Unknown date bucket '{}': expected overdue|today|tomorrow|thisWeek|nextWeek|later|noDate",
                other
            )),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn status_round_trips_through_strings() {
        for status in [
            TaskStatus::Planned,
            TaskStatus::InProgress,
            TaskStatus::Done,
            TaskStatus::Backlog,
            TaskStatus::OnHold,
        ] {
            assert_eq!(status.as_str().parse::<TaskStatus>().unwrap(), status);
        }
        assert_eq!("todo".parse::<TaskStatus>().unwrap(), TaskStatus::Todo);
        assert!("nope".parse::<TaskStatus>().is_err());
    }

    #[test]
    fn date_and_time_keys_validate() {
        assert!(is_date_key("2025-01-10"));
        assert!(!is_date_key("2025-13-40"));
        assert!(!is_date_key("Jan 10"));
        assert!(is_time_key("09:00"));
        assert!(!is_time_key("9am"));
    }

    #[test]
    fn placement_reflects_fields() {
        let now = Utc::now();
        let mut task = Task {
            id: new_id(),
            title: "t".into(),
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
        };
        assert_eq!(task.placement(), Placement::Inbox);
        assert!(task.placement_is_consistent());

        task.is_in_inbox = false;
        task.canvas_position = Some(CanvasPosition::DEFAULT);
        assert_eq!(task.placement(), Placement::Canvas);
        assert!(task.placement_is_consistent());

        task.canvas_position = None;
        task.instances = vec![Instance::new("2025-01-10", "09:00")];
        assert_eq!(task.placement(), Placement::Scheduled);
        assert!(task.placement_is_consistent());
    }

    #[test]
    fn patch_merge_distinguishes_absent_from_null() {
        let now = Utc::now();
        let mut task = Task {
            id: new_id(),
            title: "t".into(),
            description: String::new(),
            status: TaskStatus::Planned,
            priority: Some(Priority::High),
            project_id: Some("p1".into()),
            is_uncategorized: false,
            parent_task_id: None,
            canvas_position: None,
            is_in_inbox: true,
            instances: vec![],
            subtasks: vec![],
            due_date: Some("2025-02-01".into()),
            scheduled_date: None,
            scheduled_time: None,
            created_at: now,
            updated_at: now,
        };

        let patch = TaskPatch {
            priority: Some(None),
            ..TaskPatch::default()
        };
        patch.merge_into(&mut task);
        assert_eq!(task.priority, None);
        // Untouched fields survive.
        assert_eq!(task.project_id.as_deref(), Some("p1"));
        assert_eq!(task.due_date.as_deref(), Some("2025-02-01"));
    }

    #[test]
    fn legacy_task_json_deserializes_with_defaults() {
        let raw = r#"{
            "id": "01ARZ3NDEKTSV4RRFFQ69G5FAV",
            "title": "Old task",
            "status": "todo",
            "created_at": "2023-04-01T12:00:00Z",
            "updated_at": "2023-04-01T12:00:00Z"
        }"#;
        let task: Task = serde_json::from_str(raw).unwrap();
        assert_eq!(task.status, TaskStatus::Todo);
        assert!(task.instances.is_empty());
        assert!(task.project_id.is_none());
        assert!(!task.is_in_inbox);
    }
}
