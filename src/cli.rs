use clap::{Parser, Subcommand};

#[derive(Parser)]
#[command(name = "taskdesk", about = "Task manager with categories and subtasks")]
pub struct Cli {
    /// Path to the SQLite database [default: ~/.taskdesk/taskdesk.db]
    #[arg(long, env = "TASKDESK_DB", global = true)]
    pub db: Option<String>,

    #[command(subcommand)]
    pub command: Command,
}

#[derive(Subcommand)]
pub enum Command {
    /// Create database and tables (idempotent)
    Init,

    /// Manage categories
    Category {
        #[command(subcommand)]
        command: CategoryCommand,
    },

    /// Add a task
    Add {
        /// Task title
        title: String,
        /// Task description
        #[arg(short, long)]
        desc: Option<String>,
        /// Category id
        #[arg(short, long)]
        category: Option<i64>,
        /// Priority (low, normal, high)
        #[arg(short, long, default_value = "normal")]
        priority: String,
        /// Due date (YYYY-MM-DD)
        #[arg(long)]
        due: Option<String>,
        /// Subtask title (repeatable, kept in order)
        #[arg(short, long = "subtask")]
        subtasks: Vec<String>,
        /// Print the created task as JSON
        #[arg(long)]
        json: bool,
    },

    /// Replace a task and its subtasks with a JSON form read from stdin
    Edit {
        /// Task id
        id: i64,
    },

    /// Show task details
    Show {
        /// Task id
        id: i64,
        /// Output as JSON
        #[arg(long)]
        json: bool,
    },

    /// List tasks
    List {
        /// Filter by category id
        #[arg(long)]
        category: Option<i64>,
        /// Filter by status (open, in_progress, done)
        #[arg(long)]
        status: Option<String>,
        /// Filter by priority (low, normal, high)
        #[arg(long)]
        priority: Option<String>,
        /// Sort by created, updated, or due
        #[arg(long, default_value = "created")]
        sort: String,
        /// Output as JSON
        #[arg(long)]
        json: bool,
    },

    /// Move an open task to in progress
    Start {
        /// Task id
        id: i64,
    },

    /// Mark a task as done
    Done {
        /// Task id
        id: i64,
    },

    /// Move an in-progress task back to open
    Reopen {
        /// Task id
        id: i64,
    },

    /// Flip a subtask between done and not done
    Toggle {
        /// Subtask id
        id: i64,
    },

    /// Delete a task (soft delete)
    Rm {
        /// Task id
        id: i64,
    },

    /// Run the HTTP server
    Serve {
        /// Address to listen on
        #[arg(long, env = "TASKDESK_BIND", default_value = "127.0.0.1:8080")]
        bind: String,
    },
}

#[derive(Subcommand)]
pub enum CategoryCommand {
    /// Add a category
    Add {
        /// Category name (unique)
        name: String,
    },
    /// List categories
    List {
        /// Output as JSON
        #[arg(long)]
        json: bool,
    },
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn add_collects_subtasks_in_order() {
        let cli = Cli::try_parse_from([
            "taskdesk", "add", "Pack", "-s", "socks", "--subtask", "shoes", "--due", "2030-01-01",
        ])
        .unwrap();
        match cli.command {
            Command::Add {
                title,
                subtasks,
                due,
                priority,
                ..
            } => {
                assert_eq!(title, "Pack");
                assert_eq!(subtasks, vec!["socks", "shoes"]);
                assert_eq!(due.as_deref(), Some("2030-01-01"));
                assert_eq!(priority, "normal");
            }
            _ => panic!("expected add"),
        }
    }

    #[test]
    fn global_db_flag_after_subcommand() {
        let cli = Cli::try_parse_from(["taskdesk", "list", "--db", "/tmp/x.db"]).unwrap();
        assert_eq!(cli.db.as_deref(), Some("/tmp/x.db"));
    }

    #[test]
    fn category_subcommands() {
        let cli = Cli::try_parse_from(["taskdesk", "category", "add", "Work"]).unwrap();
        assert!(matches!(
            cli.command,
            Command::Category {
                command: CategoryCommand::Add { .. }
            }
        ));
    }
}
