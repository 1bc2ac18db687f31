//! Subcommands and their plain-text output.

use std::io::Write;

use anyhow::{Context, Result, bail};
use chrono::{TimeDelta, Utc};
use clap::Subcommand;

use tally_client::Session;
use tally_types::{
    Account, BrainState, RecommendedTask, SessionChanges, SessionUpdate, StartSession, Task,
    WorkSession,
};

const DEFAULT_SESSION_MINUTES: u32 = 30;

#[derive(Subcommand, Debug)]
pub enum Command {
    /// Show the signed-in account
    Account,

    /// Sign out and invalidate the refresh credential
    Logout,

    /// Task management
    #[command(subcommand)]
    Tasks(TaskCommand),

    /// Work session management
    #[command(subcommand)]
    Session(SessionCommand),
}

#[derive(Subcommand, Debug)]
pub enum TaskCommand {
    /// List tasks and their weekly budgets
    #[command(alias = "ls")]
    List,

    /// Add a task
    Add {
        /// Task name
        name: String,

        /// Weekly time budget in hours
        #[arg(long)]
        hours: f64,
    },

    /// Change a task's weekly budget
    Edit {
        /// Task name
        name: String,

        /// Weekly time budget in hours
        #[arg(long)]
        hours: f64,
    },

    /// Show recommended tasks with progress this week
    Recommend,
}

#[derive(Subcommand, Debug)]
pub enum SessionCommand {
    /// Start a work session
    Start {
        /// Task to work on
        task: String,

        /// Session length in minutes
        #[arg(short, long, default_value_t = DEFAULT_SESSION_MINUTES)]
        minutes: u32,
    },

    /// End the running session
    End,

    /// Replace the notes on the running session
    Notes {
        /// Note text
        text: String,
    },

    /// List past sessions
    History,

    /// Edit a past session
    Update {
        /// Session id, as shown by `tally session history`
        id: String,

        /// New duration in minutes
        #[arg(long)]
        minutes: u32,

        /// New notes
        #[arg(long, default_value = "")]
        notes: String,
    },
}

pub async fn run(session: &Session, command: Command, out: &mut impl Write) -> Result<()> {
    match command {
        Command::Account => match session.account().await? {
            Some(account) => writeln!(out, "{}", format_account(&account))?,
            None => bail!("not signed in"),
        },
        Command::Logout => {
            if !session.logout().await {
                bail!("logout was not confirmed by the server");
            }
            writeln!(out, "Logged out")?;
        }
        Command::Tasks(command) => run_tasks(session, command, out).await?,
        Command::Session(command) => run_session(session, command, out).await?,
    }
    Ok(())
}

async fn run_tasks(session: &Session, command: TaskCommand, out: &mut impl Write) -> Result<()> {
    match command {
        TaskCommand::List => {
            let tasks = session.tasks().await?;
            if tasks.is_empty() {
                writeln!(out, "No tasks")?;
            }
            for task in &tasks {
                writeln!(out, "{}", format_task(task))?;
            }
        }
        TaskCommand::Add { name, hours } => {
            session.add_task(&validated_task(&name, hours)?).await?;
            writeln!(out, "Task added")?;
        }
        TaskCommand::Edit { name, hours } => {
            session.edit_task(&validated_task(&name, hours)?).await?;
            writeln!(out, "Task updated")?;
        }
        TaskCommand::Recommend => {
            for task in &session.recommended_tasks().await? {
                writeln!(out, "{}", format_recommendation(task))?;
            }
        }
    }
    Ok(())
}

async fn run_session(
    session: &Session,
    command: SessionCommand,
    out: &mut impl Write,
) -> Result<()> {
    match command {
        SessionCommand::Start { task, minutes } => {
            if minutes == 0 {
                bail!("session length must be at least one minute");
            }
            let start =
                StartSession::lasting(task, Utc::now(), TimeDelta::minutes(i64::from(minutes)));
            let state = session
                .start_session(&start)
                .await
                .context("failed to start session")?;
            writeln!(out, "Session started, ends at {}", start.end_ts.format("%H:%M"))?;
            if let Some(state) = state {
                writeln!(out, "{}", format_brain_state(&state))?;
            }
        }
        SessionCommand::End => {
            session.end_session().await?;
            writeln!(out, "Session ended")?;
        }
        SessionCommand::Notes { text } => {
            session.update_notes(&text).await?;
            writeln!(out, "Notes saved")?;
        }
        SessionCommand::History => {
            let history = session.session_history().await?;
            if history.is_empty() {
                writeln!(out, "No sessions yet")?;
            }
            for entry in &history {
                writeln!(out, "{}", format_work_session(entry))?;
            }
        }
        SessionCommand::Update { id, minutes, notes } => {
            let update = SessionUpdate {
                id,
                changes: SessionChanges {
                    duration: minutes,
                    notes,
                },
            };
            session.update_session(&update).await?;
            writeln!(out, "Session updated")?;
        }
    }
    Ok(())
}

fn validated_task(name: &str, hours: f64) -> Result<Task> {
    if name.trim().is_empty() {
        bail!("task name cannot be empty");
    }
    if !hours.is_finite() || hours <= 0.0 {
        bail!("hours per week must be a positive number");
    }
    Ok(Task::new(name.trim(), hours))
}

fn format_account(account: &Account) -> String {
    match (&account.name, &account.email) {
        (Some(name), Some(email)) => format!("{name} <{email}>"),
        (Some(name), None) => name.clone(),
        (None, Some(email)) => email.clone(),
        (None, None) => "Signed in".to_string(),
    }
}

fn format_task(task: &Task) -> String {
    format!("{}\t{} h/week", task.task_name, task.hours_per_week)
}

fn format_recommendation(task: &RecommendedTask) -> String {
    format!(
        "{}\t{:.1}/{} h ({:.0}%)",
        task.task_name,
        task.completed_effort(),
        task.desired_effort,
        task.current_percent_effort
    )
}

fn format_brain_state(state: &BrainState) -> String {
    format!("Status: {}", state.brain_status.as_str())
}

/// `45 min` below an hour, `1h 30m` above.
fn format_duration(minutes: i64) -> String {
    if minutes < 60 {
        return format!("{minutes} min");
    }
    format!("{}h {}m", minutes / 60, minutes % 60)
}

fn format_work_session(entry: &WorkSession) -> String {
    let mut line = format!(
        "{}\t{}\t{}\t{}",
        entry.id.as_deref().unwrap_or("-"),
        entry.start_ts.format("%Y-%m-%d %H:%M"),
        entry.task_name,
        format_duration(entry.duration_minutes())
    );
    if let Some(notes) = entry.notes.as_deref().filter(|n| !n.is_empty()) {
        line.push('\t');
        line.push_str(notes);
    }
    line
}
