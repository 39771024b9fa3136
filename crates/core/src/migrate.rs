//! Fixed, ordered sequence of pure transforms run once per load to
//! normalize legacy document shapes into the current schema. Every
//! transform is safe to re-run: the pipeline applied twice yields the same
//! collections as applied once.

use std::collections::{HashMap, HashSet};

use crate::model::{
    is_date_key, is_time_key, Instance, Project, Task, TaskStatus, LEGACY_DEFAULT_PROJECT_ID,
    LEGACY_UNCATEGORIZED_ID,
};

/// Run all transforms in order. Returns true when anything changed so the
/// caller can persist the repaired state.
pub fn run(tasks: &mut Vec<Task>, projects: &mut Vec<Project>) -> bool {
    let before_tasks = tasks.clone();
    let before_projects = projects.clone();

    synthesize_instances_from_legacy_schedule(tasks);
    normalize_retired_statuses(tasks);
    repair_inbox_flags(tasks);
    inherit_parent_projects(tasks);
    backfill_uncategorized_flags(tasks);
    retire_legacy_default_project(tasks, projects);

    let changed = *tasks != before_tasks || *projects != before_projects;
    if changed {
        tracing::debug!(
            tasks = tasks.len(),
            projects = projects.len(),
            "migration pipeline repaired loaded records"
        );
    }
    changed
}

/// Transform 1: a task carrying legacy scalar date/time fields and no
/// instances gets one instance synthesized from them.
fn synthesize_instances_from_legacy_schedule(tasks: &mut [Task]) {
    for task in tasks.iter_mut() {
        if !task.instances.is_empty() {
            continue;
        }
        let (Some(date), Some(time)) = (task.scheduled_date.clone(), task.scheduled_time.clone())
        else {
            continue;
        };
        if !is_date_key(&date) || !is_time_key(&time) {
            continue;
        }
        task.instances.push(Instance::new(date, time));
    }
}

/// Transform 2: map the retired `todo` status to `planned`.
fn normalize_retired_statuses(tasks: &mut [Task]) {
    for task in tasks.iter_mut() {
        if task.status == TaskStatus::Todo {
            task.status = TaskStatus::Planned;
        }
    }
}

/// Transform 3: derive the inbox flag from placement. A canvas position or
/// a schedule forces the task out of the inbox; a task with neither is in
/// the inbox.
fn repair_inbox_flags(tasks: &mut [Task]) {
    for task in tasks.iter_mut() {
        task.is_in_inbox = task.canvas_position.is_none() && task.instances.is_empty();
    }
}

/// Transform 4: a nested task adopts its parent's project. The project is
/// resolved through the topmost ancestor so a single pass reaches the
/// fixpoint even on deep chains; a visited set guards against parent
/// cycles in corrupt data.
fn inherit_parent_projects(tasks: &mut Vec<Task>) {
    let parents: HashMap<String, (Option<String>, Option<String>)> = tasks
        .iter()
        .map(|t| (t.id.clone(), (t.parent_task_id.clone(), t.project_id.clone())))
        .collect();

    let resolve = |start: &str| -> Option<String> {
        let mut current = start.to_string();
        let mut visited = HashSet::new();
        loop {
            if !visited.insert(current.clone()) {
                return None;
            }
            match parents.get(&current) {
                Some((Some(parent), _)) if parents.contains_key(parent) => {
                    current = parent.clone();
                }
                Some((_, project)) => return project.clone(),
                None => return None,
            }
        }
    };

    for task in tasks.iter_mut() {
        let Some(parent_id) = task.parent_task_id.clone() else {
            continue;
        };
        if !parents.contains_key(&parent_id) {
            continue;
        }
        let inherited = resolve(&parent_id);
        if task.project_id != inherited {
            task.project_id = inherited;
        }
    }
}

/// Transform 5: normalize empty-string project ids and recompute the
/// denormalized uncategorized flag everywhere.
fn backfill_uncategorized_flags(tasks: &mut [Task]) {
    for task in tasks.iter_mut() {
        if task.project_id.as_deref() == Some("") {
            task.project_id = None;
        }
        task.is_uncategorized = task.project_id.is_none();
    }
}

/// Transform 6: rewrite every reference to the retired default project id
/// (and the legacy uncategorized sentinel) to the uncategorized
/// representation, and drop the retired project record itself.
fn retire_legacy_default_project(tasks: &mut [Task], projects: &mut Vec<Project>) {
    for task in tasks.iter_mut() {
        let legacy = matches!(
            task.project_id.as_deref(),
            Some(LEGACY_DEFAULT_PROJECT_ID) | Some(LEGACY_UNCATEGORIZED_ID)
        );
        if legacy {
            task.project_id = None;
            task.is_uncategorized = true;
        }
    }

    projects.retain(|p| p.id != LEGACY_DEFAULT_PROJECT_ID);
    for project in projects.iter_mut() {
        if project.parent_id.as_deref() == Some(LEGACY_DEFAULT_PROJECT_ID) {
            project.parent_id = None;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::{new_id, CanvasPosition};
    use chrono::Utc;
    use pretty_assertions::assert_eq;

    fn task(title: &str) -> Task {
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

    fn project(id: &str, parent: Option<&str>) -> Project {
        Project {
            id: id.into(),
            name: id.into(),
            color: None,
            color_type: None,
            emoji: None,
            parent_id: parent.map(String::from),
            view_type: None,
        }
    }

    #[test]
    fn pipeline_is_idempotent() {
        let mut legacy = task("legacy schedule");
        legacy.scheduled_date = Some("2025-01-10".into());
        legacy.scheduled_time = Some("09:00".into());

        let mut retired = task("retired status");
        retired.status = TaskStatus::Todo;

        let mut canvas = task("canvas");
        canvas.canvas_position = Some(CanvasPosition::DEFAULT);
        canvas.is_in_inbox = true; // wrong on purpose

        let mut parent = task("parent");
        parent.project_id = Some("p1".into());
        let mut child = task("child");
        child.parent_task_id = Some(parent.id.clone());

        let mut defaulted = task("old default");
        defaulted.project_id = Some(LEGACY_DEFAULT_PROJECT_ID.into());

        let mut tasks = vec![legacy, retired, canvas, parent, child, defaulted];
        let mut projects = vec![
            project(LEGACY_DEFAULT_PROJECT_ID, None),
            project("p1", Some(LEGACY_DEFAULT_PROJECT_ID)),
        ];

        assert!(run(&mut tasks, &mut projects));
        let once_tasks = tasks.clone();
        let once_projects = projects.clone();

        assert!(!run(&mut tasks, &mut projects));
        assert_eq!(tasks, once_tasks);
        assert_eq!(projects, once_projects);
    }

    #[test]
    fn legacy_schedule_becomes_one_instance() {
        let mut t = task("t");
        t.scheduled_date = Some("2025-01-10".into());
        t.scheduled_time = Some("09:00".into());
        let mut tasks = vec![t];
        run(&mut tasks, &mut vec![]);

        assert_eq!(tasks[0].instances.len(), 1);
        assert_eq!(tasks[0].instances[0].scheduled_date, "2025-01-10");
        assert!(!tasks[0].is_in_inbox);

        // Re-running never accumulates duplicate instances.
        run(&mut tasks, &mut vec![]);
        assert_eq!(tasks[0].instances.len(), 1);
    }

    #[test]
    fn invalid_legacy_schedule_is_ignored() {
        let mut t = task("t");
        t.scheduled_date = Some("next tuesday".into());
        t.scheduled_time = Some("morning".into());
        let mut tasks = vec![t];
        run(&mut tasks, &mut vec![]);
        assert!(tasks[0].instances.is_empty());
        assert!(tasks[0].is_in_inbox);
    }

    #[test]
    fn todo_status_maps_to_planned() {
        let mut t = task("t");
        t.status = TaskStatus::Todo;
        let mut tasks = vec![t];
        run(&mut tasks, &mut vec![]);
        assert_eq!(tasks[0].status, TaskStatus::Planned);
    }

    #[test]
    fn deep_subtask_chains_inherit_in_one_pass() {
        let mut root = task("root");
        root.project_id = Some("p1".into());
        let mut mid = task("mid");
        mid.parent_task_id = Some(root.id.clone());
        mid.project_id = Some("stale".into());
        let mut leaf = task("leaf");
        leaf.parent_task_id = Some(mid.id.clone());

        let mut tasks = vec![root, mid, leaf];
        run(&mut tasks, &mut vec![]);

        assert_eq!(tasks[1].project_id.as_deref(), Some("p1"));
        assert_eq!(tasks[2].project_id.as_deref(), Some("p1"));
    }

    #[test]
    fn parent_cycles_do_not_hang() {
        let mut a = task("a");
        let mut b = task("b");
        let (a_id, b_id) = (a.id.clone(), b.id.clone());
        a.parent_task_id = Some(b_id);
        b.parent_task_id = Some(a_id);
        let mut tasks = vec![a, b];
        run(&mut tasks, &mut vec![]);
        assert!(tasks[0].project_id.is_none());
    }

    #[test]
    fn retired_default_project_is_rewritten_everywhere() {
        let mut t = task("t");
        t.project_id = Some(LEGACY_DEFAULT_PROJECT_ID.into());
        t.is_uncategorized = false;
        let mut u = task("u");
        u.project_id = Some(LEGACY_UNCATEGORIZED_ID.into());

        let mut tasks = vec![t, u];
        let mut projects = vec![
            project(LEGACY_DEFAULT_PROJECT_ID, None),
            project("child", Some(LEGACY_DEFAULT_PROJECT_ID)),
        ];
        run(&mut tasks, &mut projects);

        for task in &tasks {
            assert!(task.project_id.is_none());
            assert!(task.is_uncategorized);
        }
        assert_eq!(projects.len(), 1);
        assert_eq!(projects[0].id, "child");
        assert!(projects[0].parent_id.is_none());
    }

    #[test]
    fn uncategorized_flag_tracks_project_id() {
        let mut flagged_wrong = task("wrong");
        flagged_wrong.project_id = Some("p1".into());
        flagged_wrong.is_uncategorized = true;
        let mut empty_string = task("empty");
        empty_string.project_id = Some(String::new());
        empty_string.is_uncategorized = false;

        let mut tasks = vec![flagged_wrong, empty_string];
        run(&mut tasks, &mut vec![]);

        assert!(!tasks[0].is_uncategorized);
        assert!(tasks[1].project_id.is_none());
        assert!(tasks[1].is_uncategorized);
    }
}
