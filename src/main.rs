use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use clap::{Parser, Subcommand};
use futures::StreamExt;
use std::io::{self, Write};
use std::path::PathBuf;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use taskdeck::api::HttpTaskApi;
use taskdeck::board::{Board, MoveOutcome};
use taskdeck::chat::{ChatClient, ChatMessage, REFETCH_MARKER};
use taskdeck::config::ClientConfig;
use taskdeck::store::TaskStore;
use taskdeck::logging;
use taskdeck::task::{ALL_STATUSES, Attachment, TaskDraft, TaskStatus};
use tokio_util::sync::CancellationToken;

#[derive(Parser, Debug)]
#[command(name = "taskdeck")]
#[command(version)]
#[command(about = "Terminal front for the task board: list, move, edit, chat")]
struct Args {
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Print the board grouped by status column
    Board,

    /// Create a task
    Add {
        /// Task title (at most 50 characters)
        title: String,
        #[arg(long)]
        description: Option<String>,
        #[arg(long)]
        assignee: Option<String>,
        /// Due date, RFC 3339 (e.g. 2026-09-01T12:00:00Z)
        #[arg(long)]
        due: Option<String>,
        /// Files to attach; repeatable
        #[arg(long = "file")]
        files: Vec<PathBuf>,
    },

    /// Edit a task's fields
    Edit {
        id: String,
        /// New title (at most 50 characters)
        title: String,
        #[arg(long)]
        description: Option<String>,
        #[arg(long)]
        assignee: Option<String>,
        #[arg(long)]
        due: Option<String>,
        #[arg(long = "file")]
        files: Vec<PathBuf>,
    },

    /// Move a task to another status column
    Move {
        id: String,
        /// Target status: pending, in_progress, in_review or completed
        status: String,
    },

    /// Ask the project assistant; the reply streams in live
    Chat {
        message: String,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    logging::init();
    logging::cleanup_old_logs();

    let args = Args::parse();
    let config = ClientConfig::load();

    let store = Arc::new(TaskStore::new());
    let api = Arc::new(HttpTaskApi::new(config.clone())?);
    let board = Board::new(store, api);

    match args.command {
        Command::Board => {
            board.refresh().await?;
            print_board(&board);
        }

        Command::Add {
            title,
            description,
            assignee,
            due,
            files,
        } => {
            let draft = build_draft(title, description, assignee, due, &files)?;
            board.create_task(&draft).await?;
            println!("created \"{}\"", draft.title);
        }

        Command::Edit {
            id,
            title,
            description,
            assignee,
            due,
            files,
        } => {
            let draft = build_draft(title, description, assignee, due, &files)?;
            board.edit_task(&id, &draft).await?;
            println!("edited {}", id);
        }

        Command::Move { id, status } => {
            let status: TaskStatus = status
                .parse()
                .with_context(|| format!("valid statuses: {}", status_names()))?;
            board.refresh().await?;
            match board.move_task(&id, status).await? {
                MoveOutcome::Moved => println!("moved {} to {}", id, status),
                MoveOutcome::Unchanged => println!("{} is already {}", id, status),
                MoveOutcome::Abandoned => println!("no task {} on the board", id),
            }
        }

        Command::Chat { message } => {
            run_chat(&board, config, &message).await?;
        }
    }

    Ok(())
}

fn status_names() -> String {
    ALL_STATUSES
        .iter()
        .map(|s| s.as_str())
        .collect::<Vec<_>>()
        .join(", ")
}

fn print_board(board: &Board) {
    for status in ALL_STATUSES {
        let column = board.tasks_by_status(*status);
        println!("{} ({})", status, column.len());
        for task in &column {
            let short_id = &task.id[..task.id.len().min(8)];
            print!("  [{}] {}", short_id, task.title);
            if let Some(assignee) = &task.assignee {
                print!("  @{}", assignee);
            }
            if let Some(due) = &task.due_date {
                print!("  (due {})", due.format("%Y-%m-%d"));
            }
            println!();
        }
        println!();
    }
}

fn build_draft(
    title: String,
    description: Option<String>,
    assignee: Option<String>,
    due: Option<String>,
    files: &[PathBuf],
) -> Result<TaskDraft> {
    let due_date = due
        .map(|d| {
            DateTime::parse_from_rfc3339(&d)
                .map(|d| d.with_timezone(&Utc))
                .with_context(|| format!("invalid due date: {}", d))
        })
        .transpose()?;
    let attachments = files
        .iter()
        .map(|p| Attachment::from_path(p))
        .collect::<Result<Vec<_>>>()?;
    let draft = TaskDraft {
        title,
        description,
        due_date,
        assignee,
        attachments,
    };
    draft.validate()?;
    Ok(draft)
}

async fn run_chat(board: &Board, config: ClientConfig, message: &str) -> Result<()> {
    let chat = ChatClient::new(config)?;
    let cancel = CancellationToken::new();
    {
        let cancel = cancel.clone();
        tokio::spawn(async move {
            if tokio::signal::ctrl_c().await.is_ok() {
                cancel.cancel();
            }
        });
    }

    let wants_refetch = Arc::new(AtomicBool::new(false));
    let flag = wants_refetch.clone();
    let messages = vec![ChatMessage::user(message)];
    let mut stream = chat
        .stream_chat(
            &messages,
            cancel,
            Some(Box::new(move || {
                flag.store(true, Ordering::SeqCst);
            })),
        )
        .await?;

    // print each snapshot's new suffix, holding back any tail that could
    // still turn out to be the start of the refetch marker
    let mut printed = 0usize;
    let mut failed = false;
    while let Some(item) = stream.next().await {
        match item {
            Ok(snapshot) => {
                let visible = snapshot.len() - marker_overlap(&snapshot);
                if visible > printed {
                    print!("{}", &snapshot[printed..visible]);
                    io::stdout().flush()?;
                    printed = visible;
                }
            }
            Err(err) => {
                failed = true;
                logging::error(&format!("chat stream: {}", err));
                println!();
                eprintln!("[stream error: {}]", err);
                break;
            }
        }
    }

    if !failed {
        let rest = stream.text();
        if rest.len() > printed {
            print!("{}", &rest[printed..]);
        }
        println!();
    }

    if wants_refetch.load(Ordering::SeqCst) {
        board.refresh().await?;
        println!("(assistant changed the board)");
        print_board(board);
    }

    Ok(())
}

/// Length of the longest suffix of `text` that is a prefix of the refetch
/// marker: the bytes not safe to print yet.
fn marker_overlap(text: &str) -> usize {
    let marker = REFETCH_MARKER.as_bytes();
    let bytes = text.as_bytes();
    for len in (1..=marker.len().min(bytes.len())).rev() {
        if bytes[bytes.len() - len..] == marker[..len] {
            return len;
        }
    }
    0
}
