use std::path::Path;

use chorely_core::models::Task;
use chorely_core::util::normalize_text_option;
use chorely_core::{EntityKind, Record};
use chrono::Utc;
use serde::Serialize;

use crate::cli::TaskCommands;
use crate::commands::common::{
    format_relative_time, normalize_title, open_service, resolve_record, short_id,
};
use crate::error::CliError;

#[derive(Debug, Serialize)]
pub struct TaskListItem {
    pub id: String,
    pub title: String,
    pub points: i64,
    pub assignee_id: Option<String>,
    pub recurrence: Option<String>,
    pub archived: bool,
    pub updated_at: i64,
    pub relative_time: String,
}

pub async fn run_task(command: TaskCommands, db_path: &Path) -> Result<(), CliError> {
    match command {
        TaskCommands::Add {
            title,
            points,
            assignee,
            recurrence,
        } => run_task_add(&title, points, assignee, recurrence, db_path).await,
        TaskCommands::List { all, json } => run_task_list(all, json, db_path).await,
        TaskCommands::Done { id } => run_task_done(&id, db_path).await,
        TaskCommands::Delete { id } => run_task_delete(&id, db_path).await,
    }
}

async fn run_task_add(
    title_parts: &[String],
    points: i64,
    assignee: Option<String>,
    recurrence: Option<String>,
    db_path: &Path,
) -> Result<(), CliError> {
    let mut task = Task::new(normalize_title(title_parts)?, points);
    task.assignee_id = normalize_text_option(assignee);
    task.recurrence = normalize_text_option(recurrence);

    let service = open_service(db_path)?;
    let saved = service.save(task).await?;
    println!("Created task {}", short_id(saved.id()));
    Ok(())
}

async fn run_task_list(
    include_archived: bool,
    as_json: bool,
    db_path: &Path,
) -> Result<(), CliError> {
    let service = open_service(db_path)?;
    let tasks = service
        .list(EntityKind::Task)
        .await?
        .into_iter()
        .filter_map(|record| match record {
            Record::Task(task) if include_archived || !task.archived => Some(task),
            _ => None,
        })
        .collect::<Vec<_>>();

    let now_ms = Utc::now().timestamp_millis();
    if as_json {
        let items = tasks
            .iter()
            .map(|task| task_to_list_item(task, now_ms))
            .collect::<Vec<_>>();
        println!("{}", serde_json::to_string_pretty(&items)?);
        return Ok(());
    }

    if tasks.is_empty() {
        println!("No tasks yet.");
        return Ok(());
    }

    for line in format_task_lines(&tasks, now_ms) {
        println!("{line}");
    }
    Ok(())
}

async fn run_task_done(id: &str, db_path: &Path) -> Result<(), CliError> {
    let service = open_service(db_path)?;
    let task = resolve_record(&service, EntityKind::Task, id).await?;
    let completion = service.complete_task(task.id()).await?;
    println!(
        "Completed task {} (+{} points)",
        short_id(task.id()),
        completion.points
    );
    Ok(())
}

async fn run_task_delete(id: &str, db_path: &Path) -> Result<(), CliError> {
    let service = open_service(db_path)?;
    let task = resolve_record(&service, EntityKind::Task, id).await?;
    service.remove(EntityKind::Task, task.id()).await?;
    println!("Deleted task {}", short_id(task.id()));
    Ok(())
}

pub fn task_to_list_item(task: &Task, now_ms: i64) -> TaskListItem {
    TaskListItem {
        id: task.id.clone(),
        title: task.title.clone(),
        points: task.points,
        assignee_id: task.assignee_id.clone(),
        recurrence: task.recurrence.clone(),
        archived: task.archived,
        updated_at: task.updated_at,
        relative_time: format_relative_time(task.updated_at, now_ms),
    }
}

pub fn format_task_lines(tasks: &[Task], now_ms: i64) -> Vec<String> {
    tasks
        .iter()
        .map(|task| {
            let mut line = format!(
                "{:<13}  {:<40}  {:>4} pts  {}",
                short_id(&task.id),
                task.title,
                task.points,
                format_relative_time(task.updated_at, now_ms)
            );
            if let Some(recurrence) = &task.recurrence {
                line.push_str(&format!("  ({recurrence})"));
            }
            if task.archived {
                line.push_str("  [archived]");
            }
            line
        })
        .collect()
}
