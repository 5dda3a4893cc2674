use std::collections::HashSet;

use anyhow::Result;
use chrono::NaiveDate;
use rusqlite::{Connection, OptionalExtension};

use crate::error::{FieldError, TaskError};
use crate::form::{incoming_subtasks, normalize_description, TaskForm};
use crate::model::{Category, Priority, Status, Subtask, Task, TaskDetail};
use crate::validate::{validate_category_name, validate_task_form};

const TASK_SELECT: &str = "
SELECT t.id, t.category_id, c.name, t.title, t.description, t.status, t.priority,
       t.due_date, t.created_at, t.updated_at,
       (SELECT COUNT(*) FROM subtasks s WHERE s.task_id = t.id),
       (SELECT COUNT(*) FROM subtasks s WHERE s.task_id = t.id AND s.is_completed = 1)
FROM tasks t
LEFT JOIN categories c ON c.id = t.category_id
";

const INSERT_TASK: &str = "
INSERT INTO tasks (category_id, title, description, status, priority, due_date)
VALUES (?1, ?2, ?3, ?4, ?5, ?6)
";

const UPDATE_TASK: &str = "
UPDATE tasks
SET category_id = ?1, title = ?2, description = ?3, status = ?4, priority = ?5,
    due_date = ?6,
    updated_at = strftime('%Y-%m-%dT%H:%M:%SZ', 'now')
WHERE id = ?7 AND is_deleted = 0
";

const SET_STATUS: &str = "
UPDATE tasks
SET status = ?1,
    updated_at = strftime('%Y-%m-%dT%H:%M:%SZ', 'now')
WHERE id = ?2 AND is_deleted = 0
";

const TOUCH_TASK: &str = "
UPDATE tasks
SET updated_at = strftime('%Y-%m-%dT%H:%M:%SZ', 'now')
WHERE id = ?1
";

const SOFT_DELETE: &str = "
UPDATE tasks
SET is_deleted = 1,
    deleted_at = strftime('%Y-%m-%dT%H:%M:%SZ', 'now')
WHERE id = ?1 AND is_deleted = 0
";

const INSERT_SUBTASK: &str = "
INSERT INTO subtasks (task_id, title, is_completed, sort_order)
VALUES (?1, ?2, ?3, ?4)
";

const UPDATE_SUBTASK: &str = "
UPDATE subtasks
SET title = ?1, is_completed = ?2, sort_order = ?3
WHERE id = ?4 AND task_id = ?5
";

fn read_task_row(row: &rusqlite::Row) -> rusqlite::Result<Task> {
    Ok(Task {
        id: row.get(0)?,
        category_id: row.get(1)?,
        category: row.get(2)?,
        title: row.get(3)?,
        description: row.get(4)?,
        status: row.get(5)?,
        priority: row.get(6)?,
        due_date: row.get(7)?,
        created_at: row.get(8)?,
        updated_at: row.get(9)?,
        subtask_count: row.get(10)?,
        subtasks_done: row.get(11)?,
    })
}

fn read_subtask_row(row: &rusqlite::Row) -> rusqlite::Result<Subtask> {
    Ok(Subtask {
        id: row.get(0)?,
        task_id: row.get(1)?,
        title: row.get(2)?,
        is_completed: row.get(3)?,
        sort_order: row.get(4)?,
    })
}

/// Run `f` inside a SAVEPOINT: released on success, rolled back on error.
/// Works both standalone and nested inside an outer transaction.
fn in_savepoint<T>(conn: &Connection, name: &str, f: impl FnOnce() -> Result<T>) -> Result<T> {
    conn.execute_batch(&format!("SAVEPOINT {name}"))?;
    match f() {
        Ok(v) => {
            conn.execute_batch(&format!("RELEASE {name}"))?;
            Ok(v)
        }
        Err(e) => {
            let _ = conn.execute_batch(&format!("ROLLBACK TO {name}"));
            let _ = conn.execute_batch(&format!("RELEASE {name}"));
            Err(e)
        }
    }
}

/// Status of a task that has not been soft-deleted.
fn live_status(conn: &Connection, id: i64) -> Result<Status> {
    let status: Option<Status> = conn
        .query_row(
            "SELECT status FROM tasks WHERE id = ?1 AND is_deleted = 0",
            [id],
            |row| row.get(0),
        )
        .optional()?;
    status.ok_or_else(|| TaskError::NotFound(format!("task {id}")).into())
}

fn reject_done(id: i64, status: Status) -> Result<()> {
    if status == Status::Done {
        return Err(TaskError::Rejected(format!("task {id} is done and cannot be edited")).into());
    }
    Ok(())
}

pub fn add_category(conn: &Connection, name: &str) -> Result<i64> {
    validate_category_name(name)?;
    let name = name.trim();
    let exists: i64 = conn.query_row(
        "SELECT COUNT(*) FROM categories WHERE name = ?1",
        [name],
        |row| row.get(0),
    )?;
    if exists > 0 {
        return Err(
            TaskError::invalid("name", format!("category '{name}' already exists")).into(),
        );
    }
    conn.execute("INSERT INTO categories (name) VALUES (?1)", [name])?;
    Ok(conn.last_insert_rowid())
}

pub fn list_categories(conn: &Connection) -> Result<Vec<Category>> {
    let mut stmt = conn.prepare("SELECT id, name FROM categories ORDER BY name, id")?;
    let rows = stmt.query_map([], |row| {
        Ok(Category {
            id: row.get(0)?,
            name: row.get(1)?,
        })
    })?;
    rows.collect::<rusqlite::Result<Vec<_>>>()
        .map_err(Into::into)
}

/// Create a task with its subtasks. Blank subtasks are dropped and the rest are
/// numbered 0..n-1 in submission order. Returns the new task id.
pub fn create_task(conn: &Connection, form: &TaskForm, today: NaiveDate) -> Result<i64> {
    validate_task_form(conn, form, today)?;
    let description = normalize_description(form.description.as_deref());
    let subtasks = incoming_subtasks(&form.subtasks);

    in_savepoint(conn, "create_task", || {
        conn.execute(
            INSERT_TASK,
            rusqlite::params![
                form.category_id,
                form.title.trim(),
                description,
                form.status,
                form.priority,
                form.due_date,
            ],
        )?;
        let id = conn.last_insert_rowid();
        for sub in &subtasks {
            conn.execute(
                INSERT_SUBTASK,
                rusqlite::params![id, sub.title, sub.is_completed, sub.sort_order],
            )?;
        }
        log::debug!("created task {id} with {} subtasks", subtasks.len());
        Ok(id)
    })
}

pub fn get_task(conn: &Connection, id: i64) -> Result<Task> {
    let query = format!("{TASK_SELECT} WHERE t.id = ?1 AND t.is_deleted = 0");
    let task = conn.query_row(&query, [id], read_task_row).optional()?;
    task.ok_or_else(|| TaskError::NotFound(format!("task {id}")).into())
}

/// Subtasks of a live task, in sort order. Empty if the task is soft-deleted.
pub fn list_subtasks(conn: &Connection, task_id: i64) -> Result<Vec<Subtask>> {
    let mut stmt = conn.prepare(
        "SELECT s.id, s.task_id, s.title, s.is_completed, s.sort_order
         FROM subtasks s
         JOIN tasks t ON t.id = s.task_id
         WHERE s.task_id = ?1 AND t.is_deleted = 0
         ORDER BY s.sort_order, s.id",
    )?;
    let rows = stmt.query_map([task_id], read_subtask_row)?;
    rows.collect::<rusqlite::Result<Vec<_>>>()
        .map_err(Into::into)
}

pub fn get_task_detail(conn: &Connection, id: i64) -> Result<TaskDetail> {
    let task = get_task(conn, id)?;
    let subtasks = list_subtasks(conn, id)?;
    Ok(TaskDetail { task, subtasks })
}

/// A blank create form. The due date starts at tomorrow.
pub fn new_form(today: NaiveDate) -> TaskForm {
    TaskForm {
        due_date: today.succ_opt(),
        ..TaskForm::default()
    }
}

/// The edit form pre-filled from the stored task. Done tasks cannot be edited.
pub fn edit_form(conn: &Connection, id: i64) -> Result<TaskForm> {
    let detail = get_task_detail(conn, id)?;
    reject_done(id, detail.task.status)?;
    Ok(TaskForm::from(&detail))
}

fn stored_subtask_ids(conn: &Connection, task_id: i64) -> Result<HashSet<i64>> {
    let mut stmt = conn.prepare("SELECT id FROM subtasks WHERE task_id = ?1")?;
    let rows = stmt.query_map([task_id], |row| row.get::<_, i64>(0))?;
    rows.collect::<rusqlite::Result<HashSet<_>>>()
        .map_err(Into::into)
}

/// Apply an edit and reconcile the subtask list against what is stored.
///
/// Submitted rows with an id update the matching stored row, stored rows whose
/// id was not submitted are deleted, and rows without an id are inserted. Sort
/// order is reassigned from submission order. Everything happens in one
/// savepoint, so a failed edit leaves the task untouched.
pub fn edit_task(conn: &Connection, id: i64, form: &TaskForm, today: NaiveDate) -> Result<()> {
    in_savepoint(conn, "edit_task", || {
        let status = live_status(conn, id)?;
        reject_done(id, status)?;
        validate_task_form(conn, form, today)?;

        let incoming = incoming_subtasks(&form.subtasks);
        let stored = stored_subtask_ids(conn, id)?;

        let mut keep = HashSet::new();
        let mut errors = Vec::new();
        for (i, sub) in incoming.iter().enumerate() {
            let Some(sub_id) = sub.id else { continue };
            if !stored.contains(&sub_id) {
                errors.push(FieldError {
                    field: format!("subtasks[{i}].id"),
                    message: format!("subtask {sub_id} does not belong to task {id}"),
                });
            } else if !keep.insert(sub_id) {
                errors.push(FieldError {
                    field: format!("subtasks[{i}].id"),
                    message: format!("subtask {sub_id} submitted more than once"),
                });
            }
        }
        if !errors.is_empty() {
            return Err(TaskError::Invalid(errors).into());
        }

        let description = normalize_description(form.description.as_deref());
        conn.execute(
            UPDATE_TASK,
            rusqlite::params![
                form.category_id,
                form.title.trim(),
                description,
                form.status,
                form.priority,
                form.due_date,
                id,
            ],
        )?;

        let mut updated = 0;
        for sub in &incoming {
            if let Some(sub_id) = sub.id {
                updated += conn.execute(
                    UPDATE_SUBTASK,
                    rusqlite::params![sub.title, sub.is_completed, sub.sort_order, sub_id, id],
                )?;
            }
        }

        let mut removed = 0;
        for stale in stored.difference(&keep) {
            removed += conn.execute("DELETE FROM subtasks WHERE id = ?1", [stale])?;
        }

        let mut added = 0;
        for sub in incoming.iter().filter(|s| s.id.is_none()) {
            added += conn.execute(
                INSERT_SUBTASK,
                rusqlite::params![id, sub.title, sub.is_completed, sub.sort_order],
            )?;
        }

        log::debug!("task {id}: {updated} subtasks updated, {removed} removed, {added} added");
        Ok(())
    })
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum SortKey {
    /// Newest first.
    #[default]
    Created,
    /// Most recently updated first.
    Updated,
    /// Soonest due first; tasks without a due date last.
    Due,
}

impl SortKey {
    pub fn parse(s: &str) -> Result<Self> {
        match s {
            "created" => Ok(Self::Created),
            "updated" => Ok(Self::Updated),
            "due" => Ok(Self::Due),
            _ => Err(TaskError::invalid(
                "sort",
                format!("invalid sort '{s}': must be created, updated, or due"),
            )
            .into()),
        }
    }

    fn order_by(self) -> &'static str {
        match self {
            Self::Created => "t.created_at DESC, t.id DESC",
            Self::Updated => "t.updated_at DESC, t.id DESC",
            Self::Due => "t.due_date IS NULL, t.due_date ASC, t.id ASC",
        }
    }
}

/// Filters and ordering for `list_tasks`. Every filter is optional.
#[derive(Debug, Clone, Default)]
pub struct ListQuery {
    pub category_id: Option<i64>,
    pub status: Option<Status>,
    pub priority: Option<Priority>,
    pub sort: SortKey,
}

pub fn list_tasks(conn: &Connection, query: &ListQuery) -> Result<Vec<Task>> {
    let sql = format!(
        "{TASK_SELECT}
         WHERE t.is_deleted = 0
           AND (?1 IS NULL OR t.category_id = ?1)
           AND (?2 IS NULL OR t.status = ?2)
           AND (?3 IS NULL OR t.priority = ?3)
         ORDER BY {}",
        query.sort.order_by()
    );
    let mut stmt = conn.prepare(&sql)?;
    let rows = stmt.query_map(
        rusqlite::params![query.category_id, query.status, query.priority],
        read_task_row,
    )?;
    rows.collect::<rusqlite::Result<Vec<_>>>()
        .map_err(Into::into)
}

fn set_status(conn: &Connection, id: i64, status: Status) -> Result<()> {
    conn.execute(SET_STATUS, rusqlite::params![status, id])?;
    Ok(())
}

pub fn start_task(conn: &Connection, id: i64) -> Result<()> {
    match live_status(conn, id)? {
        Status::Open => set_status(conn, id, Status::InProgress),
        Status::InProgress => {
            Err(TaskError::Rejected(format!("task {id} is already in progress")).into())
        }
        Status::Done => Err(TaskError::Rejected(format!("task {id} is done")).into()),
    }
}

pub fn complete_task(conn: &Connection, id: i64) -> Result<()> {
    match live_status(conn, id)? {
        Status::Open | Status::InProgress => set_status(conn, id, Status::Done),
        Status::Done => Err(TaskError::Rejected(format!("task {id} is already done")).into()),
    }
}

pub fn reopen_task(conn: &Connection, id: i64) -> Result<()> {
    match live_status(conn, id)? {
        Status::InProgress => set_status(conn, id, Status::Open),
        Status::Open => Err(TaskError::Rejected(format!("task {id} is already open")).into()),
        Status::Done => {
            Err(TaskError::Rejected(format!("task {id} is done and cannot be reopened")).into())
        }
    }
}

/// Flip a subtask's completion flag. Returns the parent task id.
pub fn toggle_subtask(conn: &Connection, subtask_id: i64) -> Result<i64> {
    let parent: Option<(i64, Status)> = conn
        .query_row(
            "SELECT s.task_id, t.status
             FROM subtasks s
             JOIN tasks t ON t.id = s.task_id
             WHERE s.id = ?1 AND t.is_deleted = 0",
            [subtask_id],
            |row| Ok((row.get(0)?, row.get(1)?)),
        )
        .optional()?;
    let Some((task_id, status)) = parent else {
        return Err(TaskError::NotFound(format!("subtask {subtask_id}")).into());
    };
    if status == Status::Done {
        return Err(TaskError::Rejected(format!(
            "task {task_id} is done; its subtasks cannot be changed"
        ))
        .into());
    }

    in_savepoint(conn, "toggle_subtask", || {
        conn.execute(
            "UPDATE subtasks SET is_completed = 1 - is_completed WHERE id = ?1",
            [subtask_id],
        )?;
        conn.execute(TOUCH_TASK, [task_id])?;
        Ok(task_id)
    })
}

/// Hide a task from every query without removing its row.
pub fn delete_task(conn: &Connection, id: i64) -> Result<()> {
    let rows = conn.execute(SOFT_DELETE, [id])?;
    if rows == 0 {
        return Err(TaskError::NotFound(format!("task {id}")).into());
    }
    Ok(())
}
