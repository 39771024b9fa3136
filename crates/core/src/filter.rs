//! Deterministic, composable filter pipeline. Stages intersect: a task is
//! in the derived list only if every active stage admits it, then every
//! descendant of a surviving task is re-checked individually against the
//! project/status/visibility stages before being re-included.

use std::collections::{BTreeSet, HashMap, HashSet};
use std::fmt;
use std::str::FromStr;

use anyhow::anyhow;
use chrono::{Duration, NaiveDate};
use serde::{Deserialize, Serialize};

use crate::model::{Project, Task, TaskStatus};

#[derive(
    Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize,
)]
#[serde(rename_all = "snake_case")]
pub enum SmartView {
    Today,
    Week,
    Uncategorized,
    Unscheduled,
    InProgress,
}

impl SmartView {
    pub fn as_str(&self) -> &'static str {
        match self {
            SmartView::Today => "today",
            SmartView::Week => "week",
            SmartView::Uncategorized => "uncategorized",
            SmartView::Unscheduled => "unscheduled",
            SmartView::InProgress => "in_progress",
        }
    }
}

impl fmt::Display for SmartView {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl FromStr for SmartView {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "today" => Ok(SmartView::Today),
            "week" => Ok(SmartView::Week),
            "uncategorized" => Ok(SmartView::Uncategorized),
            "unscheduled" => Ok(SmartView::Unscheduled),
            "in_progress" => Ok(SmartView::InProgress),
            other => Err(anyhow!(
                "Unknown smart view '{}': expected today|week|uncategorized|unscheduled|in_progress",
                other
            )),
        }
    }
}

/// Active filter selection. Persisted as filter preferences between
/// sessions; the pipeline itself is a pure function of this value.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct FilterSelection {
    #[serde(default)]
    pub active_project_ids: BTreeSet<String>,
    #[serde(default)]
    pub active_smart_views: BTreeSet<SmartView>,
    #[serde(default)]
    pub active_status: Option<TaskStatus>,
    #[serde(default)]
    pub hide_done_tasks: bool,
}

impl FilterSelection {
    /// Toggle a smart view on or off. `today` and `week` are mutually
    /// exclusive: selecting one clears the other.
    pub fn toggle_smart_view(&mut self, view: SmartView) {
        if self.active_smart_views.remove(&view) {
            return;
        }
        match view {
            SmartView::Today => {
                self.active_smart_views.remove(&SmartView::Week);
            }
            SmartView::Week => {
                self.active_smart_views.remove(&SmartView::Today);
            }
            _ => {}
        }
        self.active_smart_views.insert(view);
    }

    pub fn toggle_project(&mut self, project_id: &str) {
        if !self.active_project_ids.remove(project_id) {
            self.active_project_ids.insert(project_id.to_string());
        }
    }

    pub fn is_empty(&self) -> bool {
        self.active_project_ids.is_empty()
            && self.active_smart_views.is_empty()
            && self.active_status.is_none()
            && !self.hide_done_tasks
    }
}

/// Expand the active project set with every transitive descendant project,
/// walking parent pointers with a visited set so cycles cannot recurse.
fn expand_project_selection(projects: &[Project], active: &BTreeSet<String>) -> HashSet<String> {
    let mut expanded: HashSet<String> = active.iter().cloned().collect();
    loop {
        let mut grew = false;
        for project in projects {
            let Some(parent) = &project.parent_id else {
                continue;
            };
            if expanded.contains(parent) && expanded.insert(project.id.clone()) {
                grew = true;
            }
        }
        if !grew {
            break;
        }
    }
    expanded
}

fn matches_smart_view(task: &Task, view: SmartView, today: NaiveDate) -> bool {
    match view {
        SmartView::Today => task.is_scheduled_on(today) || task.due_on() == Some(today),
        SmartView::Week => {
            let end = today + Duration::days(6);
            let in_window = |d: NaiveDate| d >= today && d <= end;
            task.instances
                .iter()
                .filter_map(|i| i.date())
                .any(in_window)
                || task.due_on().map(in_window).unwrap_or(false)
        }
        SmartView::Uncategorized => task.is_uncategorized,
        SmartView::Unscheduled => task.instances.is_empty() && task.scheduled_date.is_none(),
        SmartView::InProgress => task.status == TaskStatus::InProgress,
    }
}

fn passes_smart_views(task: &Task, selection: &FilterSelection, today: NaiveDate) -> bool {
    selection
        .active_smart_views
        .iter()
        .all(|view| matches_smart_view(task, *view, today))
}

fn passes_projects(task: &Task, expanded: &HashSet<String>, has_selection: bool) -> bool {
    if !has_selection {
        return true;
    }
    task.project_id
        .as_deref()
        .map(|id| expanded.contains(id))
        .unwrap_or(false)
}

fn passes_status(task: &Task, selection: &FilterSelection) -> bool {
    selection
        .active_status
        .map(|status| task.status == status)
        .unwrap_or(true)
}

fn passes_done_visibility(task: &Task, selection: &FilterSelection) -> bool {
    !(selection.hide_done_tasks && task.status == TaskStatus::Done)
}

/// Stages 2-4, applied both to top-level survivors and individually to
/// every re-included descendant.
fn passes_structural_stages(
    task: &Task,
    selection: &FilterSelection,
    expanded: &HashSet<String>,
) -> bool {
    passes_projects(task, expanded, !selection.active_project_ids.is_empty())
        && passes_status(task, selection)
        && passes_done_visibility(task, selection)
}

/// Produce the UI-facing task list from the canonical collection. Pure
/// function of its inputs; `today` is injected so results are deterministic.
pub fn filter_tasks(
    tasks: &[Task],
    projects: &[Project],
    selection: &FilterSelection,
    today: NaiveDate,
) -> Vec<Task> {
    let expanded = expand_project_selection(projects, &selection.active_project_ids);

    let mut children: HashMap<&str, Vec<&Task>> = HashMap::new();
    for task in tasks {
        if let Some(parent) = &task.parent_task_id {
            children.entry(parent.as_str()).or_default().push(task);
        }
    }

    let mut included: HashSet<&str> = HashSet::new();
    let mut result: Vec<Task> = Vec::new();

    for task in tasks {
        if !passes_smart_views(task, selection, today)
            || !passes_structural_stages(task, selection, &expanded)
        {
            continue;
        }
        if included.insert(task.id.as_str()) {
            result.push(task.clone());
        }

        // Re-include descendants that pass the structural stages on their
        // own; the smart-view stage is not re-applied to them.
        let mut visited: HashSet<&str> = HashSet::new();
        let mut stack: Vec<&str> = vec![task.id.as_str()];
        while let Some(current) = stack.pop() {
            if !visited.insert(current) {
                continue;
            }
            for child in children.get(current).map(|v| v.as_slice()).unwrap_or(&[]) {
                stack.push(child.id.as_str());
                if passes_structural_stages(child, selection, &expanded)
                    && included.insert(child.id.as_str())
                {
                    result.push((*child).clone());
                }
            }
        }
    }

    result
}

/// Calendar view: the filtered list, plus inbox tasks with no schedule and
/// no instances when the `today` smart view is active, still honoring the
/// project/status/visibility stages.
pub fn calendar_tasks(
    tasks: &[Task],
    projects: &[Project],
    selection: &FilterSelection,
    today: NaiveDate,
) -> Vec<Task> {
    let mut result = filter_tasks(tasks, projects, selection, today);

    if selection.active_smart_views.contains(&SmartView::Today) {
        let expanded = expand_project_selection(projects, &selection.active_project_ids);
        let mut included: HashSet<String> = result.iter().map(|t| t.id.clone()).collect();
        for task in tasks {
            if task.is_in_inbox
                && task.instances.is_empty()
                && task.scheduled_date.is_none()
                && passes_structural_stages(task, selection, &expanded)
                && included.insert(task.id.clone())
            {
                result.push(task.clone());
            }
        }
    }

    result
}
