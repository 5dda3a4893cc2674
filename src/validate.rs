use anyhow::Result;
use chrono::{NaiveDate, Utc};
use rusqlite::Connection;

use crate::error::{FieldError, TaskError};
use crate::form::{normalize_description, TaskForm};

pub const TITLE_MAX: usize = 120;
pub const DESCRIPTION_MAX: usize = 4000;
pub const CATEGORY_NAME_MAX: usize = 80;

/// Current calendar date in UTC, used for the due date rule.
pub fn today_utc() -> NaiveDate {
    Utc::now().date_naive()
}

/// Titles and names are single-line text: no control characters at all.
fn has_control(s: &str) -> bool {
    s.chars().any(char::is_control)
}

/// Descriptions may span lines but must not carry other control characters.
fn has_binary(s: &str) -> bool {
    s.chars()
        .any(|c| c.is_control() && !matches!(c, '\n' | '\r' | '\t'))
}

fn push(errors: &mut Vec<FieldError>, field: &str, message: impl Into<String>) {
    errors.push(FieldError {
        field: field.to_string(),
        message: message.into(),
    });
}

/// A due date strictly before `today` is rejected; today itself is allowed.
pub fn validate_due_date(due: Option<NaiveDate>, today: NaiveDate) -> Option<String> {
    match due {
        Some(d) if d < today => Some("due date cannot be in the past".to_string()),
        _ => None,
    }
}

/// Validate a submitted task. Every problem is collected so the form can show them all.
pub fn validate_task_form(conn: &Connection, form: &TaskForm, today: NaiveDate) -> Result<()> {
    let mut errors = Vec::new();

    let title = form.title.trim();
    if title.is_empty() {
        push(&mut errors, "title", "title is required");
    } else if has_control(title) {
        push(&mut errors, "title", "title must not contain control characters");
    } else if title.chars().count() > TITLE_MAX {
        push(
            &mut errors,
            "title",
            format!("title must be at most {TITLE_MAX} characters"),
        );
    }

    if let Some(desc) = normalize_description(form.description.as_deref()) {
        if has_binary(&desc) {
            push(
                &mut errors,
                "description",
                "description must not contain control characters",
            );
        } else if desc.chars().count() > DESCRIPTION_MAX {
            push(
                &mut errors,
                "description",
                format!("description must be at most {DESCRIPTION_MAX} characters"),
            );
        }
    }

    if let Some(msg) = validate_due_date(form.due_date, today) {
        push(&mut errors, "due_date", msg);
    }

    if let Some(id) = form.category_id {
        let count: i64 = conn.query_row(
            "SELECT COUNT(*) FROM categories WHERE id = ?1",
            [id],
            |row| row.get(0),
        )?;
        if count == 0 {
            push(&mut errors, "category_id", format!("category {id} does not exist"));
        }
    }

    for (i, sub) in form.subtasks.iter().enumerate() {
        let sub_title = sub.title.trim();
        if has_control(sub_title) {
            push(
                &mut errors,
                &format!("subtasks[{i}].title"),
                "subtask title must not contain control characters",
            );
        } else if sub_title.chars().count() > TITLE_MAX {
            push(
                &mut errors,
                &format!("subtasks[{i}].title"),
                format!("subtask title must be at most {TITLE_MAX} characters"),
            );
        }
    }

    if errors.is_empty() {
        Ok(())
    } else {
        Err(TaskError::Invalid(errors).into())
    }
}

/// Validate a category name: non-blank and at most 80 characters.
pub fn validate_category_name(name: &str) -> Result<()> {
    let name = name.trim();
    if name.is_empty() {
        return Err(TaskError::invalid("name", "category name is required").into());
    }
    if has_control(name) {
        return Err(
            TaskError::invalid("name", "category name must not contain control characters").into(),
        );
    }
    if name.chars().count() > CATEGORY_NAME_MAX {
        return Err(TaskError::invalid(
            "name",
            format!("category name must be at most {CATEGORY_NAME_MAX} characters"),
        )
        .into());
    }
    Ok(())
}
