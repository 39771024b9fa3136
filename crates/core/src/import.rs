//! Loosely-typed JSON task import. Accepts an array of task-like records
//! (or `{"data": [...]}`), maps legacy field spellings, and pushes the
//! result through the same normalization the migration pipeline applies to
//! loaded documents.

use chrono::{DateTime, Utc};
use serde_json::Value;

use crate::error::EngineError;
use crate::migrate;
use crate::model::{is_date_key, is_time_key, new_id, Priority, Task, TaskStatus};

/// Parse an import payload into normalized tasks. Malformed records (a
/// non-object entry, or a record with no usable title) are refused with a
/// [`EngineError::Validation`] naming the offending index rather than being
/// silently dropped.
pub fn parse_import(raw: &str) -> Result<Vec<Task>, EngineError> {
    let value: Value = serde_json::from_str(raw).map_err(|err| EngineError::Validation {
        operation: "import",
        reason: format!("payload is not valid JSON: {err}"),
    })?;

    let records = match value {
        Value::Array(items) => items,
        Value::Object(mut map) => match map.remove("data") {
            Some(Value::Array(items)) => items,
            _ => {
                return Err(EngineError::Validation {
                    operation: "import",
                    reason: "expected an array or an object with a 'data' array".into(),
                })
            }
        },
        _ => {
            return Err(EngineError::Validation {
                operation: "import",
                reason: "expected an array or an object with a 'data' array".into(),
            })
        }
    };

    let mut tasks = Vec::with_capacity(records.len());
    for (index, record) in records.into_iter().enumerate() {
        let Value::Object(fields) = record else {
            return Err(EngineError::Validation {
                operation: "import",
                reason: format!("record {index} is not an object"),
            });
        };
        tasks.push(map_record(index, &fields)?);
    }

    // Imported records go through the same normalization as loaded ones.
    migrate::run(&mut tasks, &mut Vec::new());
    Ok(tasks)
}

fn map_record(
    index: usize,
    fields: &serde_json::Map<String, Value>,
) -> Result<Task, EngineError> {
    let title = string_field(fields, &["title", "name"])
        .filter(|t| !t.trim().is_empty())
        .ok_or_else(|| EngineError::Validation {
            operation: "import",
            reason: format!("record {index} has no title"),
        })?;

    let status = string_field(fields, &["status"])
        .and_then(|s| s.parse::<TaskStatus>().ok())
        .unwrap_or(TaskStatus::Planned);

    let priority = string_field(fields, &["priority"]).and_then(|s| s.parse::<Priority>().ok());

    let project_id = string_field(fields, &["projectId", "project_id", "project"])
        .filter(|p| !p.trim().is_empty());

    let created_at = string_field(fields, &["createdAt", "created_at", "created"])
        .and_then(|s| DateTime::parse_from_rfc3339(&s).ok())
        .map(|dt| dt.with_timezone(&Utc))
        .unwrap_or_else(Utc::now);

    let due_date = string_field(fields, &["dueDate", "due_date"]).filter(|d| is_date_key(d));
    let scheduled_date =
        string_field(fields, &["scheduledDate", "scheduled_date"]).filter(|d| is_date_key(d));
    let scheduled_time =
        string_field(fields, &["scheduledTime", "scheduled_time"]).filter(|t| is_time_key(t));

    let id = string_field(fields, &["id"])
        .filter(|i| !i.trim().is_empty())
        .unwrap_or_else(new_id);

    Ok(Task {
        id,
        title,
        description: string_field(fields, &["description", "notes"]).unwrap_or_default(),
        status,
        priority,
        is_uncategorized: project_id.is_none(),
        project_id,
        parent_task_id: string_field(fields, &["parentTaskId", "parent_task_id"]),
        canvas_position: None,
        is_in_inbox: true,
        instances: vec![],
        subtasks: vec![],
        due_date,
        scheduled_date,
        scheduled_time,
        created_at,
        updated_at: created_at,
    })
}

fn string_field(fields: &serde_json::Map<String, Value>, names: &[&str]) -> Option<String> {
    names
        .iter()
        .find_map(|name| fields.get(*name))
        .and_then(|v| v.as_str())
        .map(str::to_string)
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn imports_plain_array() {
        let raw = r#"[
            {"title": "First", "status": "todo", "priority": "high", "project": "p1"},
            {"title": "Second", "created": "2024-06-01T10:00:00Z"}
        ]"#;
        let tasks = parse_import(raw).unwrap();
        assert_eq!(tasks.len(), 2);
        assert_eq!(tasks[0].status, TaskStatus::Planned);
        assert_eq!(tasks[0].priority, Some(Priority::High));
        assert_eq!(tasks[0].project_id.as_deref(), Some("p1"));
        assert!(!tasks[0].is_uncategorized);
        assert_eq!(
            tasks[1].created_at.to_rfc3339(),
            "2024-06-01T10:00:00+00:00"
        );
    }

    #[test]
    fn imports_data_wrapper() {
        let raw = r#"{"data": [{"title": "Wrapped"}]}"#;
        let tasks = parse_import(raw).unwrap();
        assert_eq!(tasks.len(), 1);
        assert!(tasks[0].is_uncategorized);
        assert!(tasks[0].is_in_inbox);
    }

    #[test]
    fn legacy_schedule_fields_become_instances() {
        let raw = r#"[{"title": "Call", "scheduledDate": "2025-01-10", "scheduledTime": "09:00"}]"#;
        let tasks = parse_import(raw).unwrap();
        assert_eq!(tasks[0].instances.len(), 1);
        assert!(!tasks[0].is_in_inbox);
    }

    #[test]
    fn malformed_records_are_refused_with_context() {
        let err = parse_import(r#"[{"title": "ok"}, 42]"#).unwrap_err();
        match err {
            EngineError::Validation { reason, .. } => assert!(reason.contains("record 1")),
            other => panic!("expected validation failure, got {other:?}"),
        }

        let err = parse_import(r#"[{"notes": "no title"}]"#).unwrap_err();
        match err {
            EngineError::Validation { reason, .. } => assert!(reason.contains("no title")),
            other => panic!("expected validation failure, got {other:?}"),
        }
    }

    #[test]
    fn unknown_loose_values_fall_back_to_defaults() {
        let raw = r#"[{"title": "Loose", "status": "someday", "priority": "urgent", "dueDate": "whenever"}]"#;
        let tasks = parse_import(raw).unwrap();
        assert_eq!(tasks[0].status, TaskStatus::Planned);
        assert_eq!(tasks[0].priority, None);
        assert_eq!(tasks[0].due_date, None);
    }
}
