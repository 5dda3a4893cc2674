use crate::model::{Category, Subtask, Task, TaskDetail};

fn progress(task: &Task) -> String {
    if task.subtask_count == 0 {
        String::new()
    } else {
        format!(" [{}/{}]", task.subtasks_done, task.subtask_count)
    }
}

pub fn format_task_detail(detail: &TaskDetail) -> String {
    let task = &detail.task;
    let mut out = String::new();
    out.push_str(&format!("Id:          {}\n", task.id));
    out.push_str(&format!("Title:       {}\n", task.title));
    out.push_str(&format!("Status:      {}\n", task.status));
    out.push_str(&format!("Priority:    {}\n", task.priority));
    if let Some(ref c) = task.category {
        out.push_str(&format!("Category:    {}\n", c));
    }
    if let Some(due) = task.due_date {
        out.push_str(&format!("Due:         {}\n", due));
    }
    if let Some(ref desc) = task.description {
        out.push_str(&format!("Description: {}\n", desc));
    }
    out.push_str(&format!("Created:     {}\n", task.created_at));
    out.push_str(&format!("Updated:     {}\n", task.updated_at));

    if !detail.subtasks.is_empty() {
        out.push('\n');
        out.push_str("Subtasks:\n");
        out.push_str(&format_subtasks(&detail.subtasks));
    }

    out
}

pub fn format_subtasks(subtasks: &[Subtask]) -> String {
    let mut out = String::new();
    for sub in subtasks {
        let mark = if sub.is_completed { "x" } else { " " };
        out.push_str(&format!("  [{}] {} (#{})\n", mark, sub.title, sub.id));
    }
    out
}

pub fn format_task_list(tasks: &[Task]) -> String {
    let mut out = String::new();
    for task in tasks {
        let category = task
            .category
            .as_ref()
            .map(|c| format!(" ({c})"))
            .unwrap_or_default();
        let due = task
            .due_date
            .map(|d| format!("  due {d}"))
            .unwrap_or_default();
        out.push_str(&format!(
            "{} #{} {}{}{}{}\n",
            task.status.icon(),
            task.id,
            task.title,
            category,
            progress(task),
            due
        ));
    }
    out
}

pub fn format_categories(categories: &[Category]) -> String {
    let mut out = String::new();
    for c in categories {
        out.push_str(&format!("#{} {}\n", c.id, c.name));
    }
    out
}
