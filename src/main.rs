mod cli;

use std::io::Read as _;
use std::path::PathBuf;

use anyhow::{Context, Result};
use chrono::NaiveDate;
use clap::Parser;
use rusqlite::Connection;

use cli::{CategoryCommand, Cli, Command};
use taskdesk::form::{SubtaskForm, TaskForm};
use taskdesk::model::{Priority, Status};
use taskdesk::ops::{ListQuery, SortKey};
use taskdesk::validate::today_utc;
use taskdesk::{db, ops, output, web};

fn default_db_path() -> Result<PathBuf> {
    let home = std::env::var("HOME").context("HOME environment variable not set")?;
    Ok(PathBuf::from(home).join(".taskdesk").join("taskdesk.db"))
}

fn resolve_db_path(cli_db: Option<String>) -> Result<String> {
    match cli_db {
        Some(p) => Ok(p),
        None => {
            let path = default_db_path()?;
            Ok(path
                .to_str()
                .context("default DB path is not valid UTF-8")?
                .to_string())
        }
    }
}

fn ensure_db_dir(db_path: &str) -> Result<()> {
    if let Some(parent) = std::path::Path::new(db_path).parent() {
        if !parent.as_os_str().is_empty() && !parent.exists() {
            std::fs::create_dir_all(parent)
                .with_context(|| format!("failed to create directory {}", parent.display()))?;
        }
    }
    Ok(())
}

fn open_db(db_path: &str) -> Result<Connection> {
    let conn = db::open(db_path)?;
    db::init(&conn)?;
    Ok(conn)
}

/// `RUST_LOG` wins; otherwise the server logs at info and the CLI only warns.
fn setup_logging(default_level: &str) {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or(default_level))
        .format_timestamp_secs()
        .init();
}

fn parse_due(due: Option<&str>) -> Result<Option<NaiveDate>> {
    due.map(|d| {
        NaiveDate::parse_from_str(d, "%Y-%m-%d")
            .with_context(|| format!("invalid due date '{d}': expected YYYY-MM-DD"))
    })
    .transpose()
}

fn edit_from_json(conn: &Connection, id: i64, input: &str) -> Result<()> {
    let form: TaskForm = serde_json::from_str(input).context("invalid task form JSON")?;
    ops::edit_task(conn, id, &form, today_utc())
}

/// Run one command against an open database connection.
fn dispatch(conn: &Connection, command: Command) -> Result<()> {
    match command {
        Command::Init | Command::Serve { .. } => {}

        Command::Category { command } => match command {
            CategoryCommand::Add { name } => {
                let id = ops::add_category(conn, &name)?;
                eprintln!("Added category #{id} '{}'", name.trim());
            }
            CategoryCommand::List { json } => {
                let categories = ops::list_categories(conn)?;
                if json {
                    println!("{}", serde_json::to_string_pretty(&categories)?);
                } else {
                    print!("{}", output::format_categories(&categories));
                }
            }
        },

        Command::Add {
            title,
            desc,
            category,
            priority,
            due,
            subtasks,
            json,
        } => {
            let form = TaskForm {
                category_id: category,
                title,
                description: desc,
                status: Status::Open,
                priority: Priority::parse(&priority)?,
                due_date: parse_due(due.as_deref())?,
                subtasks: subtasks.iter().map(|s| SubtaskForm::new(s)).collect(),
            };
            let id = ops::create_task(conn, &form, today_utc())?;
            if json {
                let detail = ops::get_task_detail(conn, id)?;
                println!("{}", serde_json::to_string_pretty(&detail)?);
            }
            eprintln!("Added task #{id}");
        }

        Command::Edit { id } => {
            let mut input = String::new();
            std::io::stdin().read_to_string(&mut input)?;
            edit_from_json(conn, id, &input)?;
            eprintln!("Updated task #{id}");
        }

        Command::Show { id, json } => {
            let detail = ops::get_task_detail(conn, id)?;
            if json {
                println!("{}", serde_json::to_string_pretty(&detail)?);
            } else {
                print!("{}", output::format_task_detail(&detail));
            }
        }

        Command::List {
            category,
            status,
            priority,
            sort,
            json,
        } => {
            let query = ListQuery {
                category_id: category,
                status: status.as_deref().map(Status::parse).transpose()?,
                priority: priority.as_deref().map(Priority::parse).transpose()?,
                sort: SortKey::parse(&sort)?,
            };
            let tasks = ops::list_tasks(conn, &query)?;
            if json {
                println!("{}", serde_json::to_string_pretty(&tasks)?);
            } else {
                print!("{}", output::format_task_list(&tasks));
            }
        }

        Command::Start { id } => {
            ops::start_task(conn, id)?;
            eprintln!("Started task #{id}");
        }

        Command::Done { id } => {
            ops::complete_task(conn, id)?;
            eprintln!("Marked task #{id} as done");
        }

        Command::Reopen { id } => {
            ops::reopen_task(conn, id)?;
            eprintln!("Reopened task #{id}");
        }

        Command::Toggle { id } => {
            let task_id = ops::toggle_subtask(conn, id)?;
            eprintln!("Toggled subtask #{id} of task #{task_id}");
        }

        Command::Rm { id } => {
            ops::delete_task(conn, id)?;
            eprintln!("Removed task #{id}");
        }
    }
    Ok(())
}

fn main() {
    if let Err(e) = run() {
        eprintln!("error: {e:#}");
        std::process::exit(1);
    }
}

fn run() -> Result<()> {
    let cli = Cli::parse();
    let db_path = resolve_db_path(cli.db)?;
    ensure_db_dir(&db_path)?;

    match cli.command {
        Command::Serve { bind } => {
            setup_logging("info");
            let conn = open_db(&db_path)?;
            log::info!("using database {db_path}");
            let runtime = tokio::runtime::Runtime::new().context("failed to start runtime")?;
            runtime.block_on(web::serve(web::AppState::new(conn), &bind))?;
        }
        Command::Init => {
            setup_logging("warn");
            open_db(&db_path)?;
            eprintln!("Initialized {db_path}");
        }
        command => {
            setup_logging("warn");
            let conn = open_db(&db_path)?;
            dispatch(&conn, command)?;
        }
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn test_conn() -> Connection {
        let conn = Connection::open_in_memory().unwrap();
        conn.execute_batch("PRAGMA foreign_keys = ON;").unwrap();
        db::init(&conn).unwrap();
        conn
    }

    #[test]
    fn add_keeps_subtask_order() {
        let conn = test_conn();
        let cli = Cli::try_parse_from(["taskdesk", "add", "Pack", "-s", "socks", "-s", "", "-s", "shoes"])
            .unwrap();
        dispatch(&conn, cli.command).unwrap();
        let tasks = ops::list_tasks(&conn, &ListQuery::default()).unwrap();
        let subtasks = ops::list_subtasks(&conn, tasks[0].id).unwrap();
        let titles: Vec<&str> = subtasks.iter().map(|s| s.title.as_str()).collect();
        assert_eq!(titles, vec!["socks", "shoes"]);
    }

    #[test]
    fn add_rejects_bad_due_date() {
        let conn = test_conn();
        let cli = Cli::try_parse_from(["taskdesk", "add", "x", "--due", "tomorrow"]).unwrap();
        let err = dispatch(&conn, cli.command).unwrap_err();
        assert!(err.to_string().contains("invalid due date"));
    }

    #[test]
    fn list_rejects_unknown_sort() {
        let conn = test_conn();
        let cli = Cli::try_parse_from(["taskdesk", "list", "--sort", "title"]).unwrap();
        assert!(dispatch(&conn, cli.command).is_err());
    }

    #[test]
    fn edit_from_json_reconciles() {
        let conn = test_conn();
        let cli = Cli::try_parse_from(["taskdesk", "add", "t", "-s", "a", "-s", "b"]).unwrap();
        dispatch(&conn, cli.command).unwrap();
        let id = ops::list_tasks(&conn, &ListQuery::default()).unwrap()[0].id;
        let b = ops::list_subtasks(&conn, id).unwrap()[1].id;

        let input = format!(
            r#"{{"title":"t2","subtasks":[{{"id":{b},"title":"b","is_completed":true}},{{"title":"c"}}]}}"#
        );
        edit_from_json(&conn, id, &input).unwrap();

        let subtasks = ops::list_subtasks(&conn, id).unwrap();
        assert_eq!(subtasks.len(), 2);
        assert_eq!(subtasks[0].id, b);
        assert!(subtasks[0].is_completed);
        assert_eq!(subtasks[1].title, "c");
        assert_eq!(subtasks[1].sort_order, 1);
    }

    #[test]
    fn edit_from_json_rejects_garbage() {
        let conn = test_conn();
        let err = edit_from_json(&conn, 1, "not json").unwrap_err();
        assert!(err.to_string().contains("invalid task form JSON"));
    }

    #[test]
    fn ensure_db_dir_creates_parent() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("nested").join("taskdesk.db");
        let path = path.to_str().unwrap();
        ensure_db_dir(path).unwrap();
        let conn = open_db(path).unwrap();
        dispatch(
            &conn,
            Command::Category {
                command: CategoryCommand::Add {
                    name: "Work".into(),
                },
            },
        )
        .unwrap();
        assert_eq!(ops::list_categories(&conn).unwrap().len(), 1);
    }
}
