use std::collections::HashSet;

use anyhow::Result;
use chrono::NaiveDate;
use serde::{Deserialize, Serialize};

use crate::error::TaskError;
use crate::model::{Priority, Status, TaskDetail};

/// A submitted task, as posted by the create and edit forms.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct TaskForm {
    pub category_id: Option<i64>,
    pub title: String,
    pub description: Option<String>,
    pub status: Status,
    pub priority: Priority,
    pub due_date: Option<NaiveDate>,
    pub subtasks: Vec<SubtaskForm>,
}

/// One submitted subtask row. `id` is absent for rows added in the form.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct SubtaskForm {
    pub id: Option<i64>,
    pub title: String,
    pub is_completed: bool,
}

impl SubtaskForm {
    pub fn new(title: &str) -> Self {
        Self {
            id: None,
            title: title.to_string(),
            is_completed: false,
        }
    }
}

impl From<&TaskDetail> for TaskForm {
    fn from(detail: &TaskDetail) -> Self {
        let task = &detail.task;
        Self {
            category_id: task.category_id,
            title: task.title.clone(),
            description: task.description.clone(),
            status: task.status,
            priority: task.priority,
            due_date: task.due_date,
            subtasks: detail
                .subtasks
                .iter()
                .map(|s| SubtaskForm {
                    id: Some(s.id),
                    title: s.title.clone(),
                    is_completed: s.is_completed,
                })
                .collect(),
        }
    }
}

/// The flat `application/x-www-form-urlencoded` shape of a task form.
///
/// Subtask rows arrive as parallel repeated fields: `subtask_id` (blank for a
/// new row) and `subtask_title`. `subtask_done` repeats once per ticked
/// checkbox and carries that row's position.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct TaskFormFields {
    pub category_id: String,
    pub title: String,
    pub description: String,
    pub status: String,
    pub priority: String,
    pub due_date: String,
    pub subtask_id: Vec<String>,
    pub subtask_title: Vec<String>,
    pub subtask_done: Vec<String>,
}

fn blank_to_none(value: &str) -> Option<&str> {
    let value = value.trim();
    (!value.is_empty()).then_some(value)
}

/// Parse an optional numeric id from a text field; blank means absent.
pub fn parse_id(field: &str, value: &str) -> Result<Option<i64>> {
    match blank_to_none(value) {
        None => Ok(None),
        Some(v) => v
            .parse::<i64>()
            .map(Some)
            .map_err(|_| TaskError::invalid(field, format!("'{v}' is not a valid id")).into()),
    }
}

impl TaskFormFields {
    pub fn into_form(self) -> Result<TaskForm> {
        if self.subtask_id.len() != self.subtask_title.len() {
            return Err(TaskError::invalid(
                "subtasks",
                "every subtask row needs both subtask_id and subtask_title",
            )
            .into());
        }
        let done: HashSet<usize> = self
            .subtask_done
            .iter()
            .map(|v| {
                v.trim().parse::<usize>().map_err(|_| {
                    TaskError::invalid("subtask_done", format!("'{v}' is not a row position"))
                })
            })
            .collect::<Result<_, _>>()?;

        let mut subtasks = Vec::with_capacity(self.subtask_title.len());
        for (i, (id, title)) in self.subtask_id.iter().zip(self.subtask_title).enumerate() {
            subtasks.push(SubtaskForm {
                id: parse_id(&format!("subtask_id[{i}]"), id)?,
                title,
                is_completed: done.contains(&i),
            });
        }

        let due_date = match blank_to_none(&self.due_date) {
            None => None,
            Some(d) => Some(NaiveDate::parse_from_str(d, "%Y-%m-%d").map_err(|_| {
                TaskError::invalid("due_date", format!("'{d}' is not a date (YYYY-MM-DD)"))
            })?),
        };

        Ok(TaskForm {
            category_id: parse_id("category_id", &self.category_id)?,
            title: self.title,
            description: Some(self.description),
            status: blank_to_none(&self.status)
                .map(Status::parse)
                .transpose()?
                .unwrap_or_default(),
            priority: blank_to_none(&self.priority)
                .map(Priority::parse)
                .transpose()?
                .unwrap_or_default(),
            due_date,
            subtasks,
        })
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct CategoryForm {
    pub name: String,
}

/// A subtask after blank rows are stripped, with its dense position in the list.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct IncomingSubtask {
    pub id: Option<i64>,
    pub title: String,
    pub is_completed: bool,
    pub sort_order: i64,
}

/// Drop blank-titled rows and number the rest 0..n-1 in submission order.
pub fn incoming_subtasks(subtasks: &[SubtaskForm]) -> Vec<IncomingSubtask> {
    subtasks
        .iter()
        .filter(|s| !s.title.trim().is_empty())
        .enumerate()
        .map(|(i, s)| IncomingSubtask {
            id: s.id,
            title: s.title.trim().to_string(),
            is_completed: s.is_completed,
            sort_order: i as i64,
        })
        .collect()
}

/// Blank descriptions are stored as absent.
pub fn normalize_description(description: Option<&str>) -> Option<String> {
    description
        .map(str::trim)
        .filter(|d| !d.is_empty())
        .map(str::to_string)
}
