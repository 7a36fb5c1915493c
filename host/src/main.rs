use anyhow::{bail, Context, Result};
use clap::{Parser, Subcommand};
use taskboard_core::{
    CreateTask, Notice, NoticeKind, PageSize, StatusFilter, Task, TaskId, TaskStatus, TasksPage, UpdateTask,
};
use taskboard_host::{connect, Config, ListPage, ListSession, StoreError};
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(name = "taskboard")]
#[command(about = "Browse and edit tasks on a taskboard server")]
#[command(version)]
struct Cli {
    /// Base URL of the tasks API (overrides TASKBOARD_API_URL)
    #[arg(long, value_name = "URL")]
    api_url: Option<String>,

    /// Print raw JSON instead of text
    #[arg(long)]
    json: bool,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// List tasks, one page at a time
    List {
        /// TO_DO, IN_PROGRESS, DONE or all
        #[arg(short, long, default_value = "all")]
        status: StatusFilter,
        #[arg(short, long, default_value_t = 1)]
        page: u32,
        /// 6, 12, 24 or 48
        #[arg(short, long, default_value_t = 6)]
        limit: u32,
    },
    /// Show one task
    Show { id: String },
    /// Create a task
    Create {
        #[arg(short, long)]
        title: String,
        #[arg(short, long)]
        description: Option<String>,
    },
    /// Change a task's title, description or status
    Edit {
        id: String,
        #[arg(short, long)]
        title: Option<String>,
        #[arg(short, long)]
        description: Option<String>,
        #[arg(short, long)]
        status: Option<TaskStatus>,
    },
    /// Delete a task
    Delete {
        id: String,
        /// Skip the confirmation prompt
        #[arg(short, long)]
        yes: bool,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    dotenvy::dotenv().ok();
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| "taskboard_host=info,taskboard_core=info".into()),
        )
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();
    let mut config = Config::from_env().context("reading configuration")?;
    if let Some(url) = &cli.api_url {
        config = config.with_api_url(url);
    }
    let store = connect(&config).context("building HTTP client")?;
    tracing::debug!(api_url = %config.api_url, "connected");

    match cli.command {
        Command::List { status, page, limit } => {
            let size = PageSize::try_from(limit)?;
            let session = ListSession::new(store, Default::default());
            session.set_status_filter(status);
            session.set_page_size(size);
            session.set_page(page)?;
            match session.load().await {
                Ok(Some(page)) if cli.json => println!("{}", serde_json::to_string_pretty(&page.tasks)?),
                Ok(Some(page)) => print_page(&page),
                Ok(None) => {}
                Err(err) => return fail(Notice::tasks_load_failed(), err),
            }
        }
        Command::Show { id } => match store.task(&TaskId::new(id)).await {
            Ok(task) if cli.json => println!("{}", serde_json::to_string_pretty(&task)?),
            Ok(task) => print_task(&task),
            Err(StoreError::Api(err)) => return fail(Notice::task_load_failed(&err), err.into()),
            Err(err) => return Err(err.into()),
        },
        Command::Create { title, description } => {
            let input = CreateTask { title, description };
            match store.create_task(input).await {
                Ok(task) => {
                    print_notice(&Notice::task_created(&task.title));
                    print_task(&task);
                }
                Err(err @ StoreError::Validation(_)) => return Err(err.into()),
                Err(err) => return fail(Notice::create_failed(), err),
            }
        }
        Command::Edit {
            id,
            title,
            description,
            status,
        } => {
            let changes = UpdateTask {
                title,
                description,
                status,
            };
            if changes.is_empty() {
                bail!("nothing to change: pass --title, --description or --status");
            }
            match store.update_task(&TaskId::new(id), changes).await {
                Ok(task) => {
                    print_notice(&Notice::task_updated(&task.title));
                    print_task(&task);
                }
                Err(err @ StoreError::Validation(_)) => return Err(err.into()),
                Err(err) => return fail(Notice::update_failed(), err),
            }
        }
        Command::Delete { id, yes } => {
            let id = TaskId::new(id);
            let task = match store.task(&id).await {
                Ok(task) => task,
                Err(StoreError::Api(err)) => return fail(Notice::task_load_failed(&err), err.into()),
                Err(err) => return Err(err.into()),
            };
            if !yes && !confirm(&Notice::confirm_delete(&task.title))? {
                return Ok(());
            }
            match store.delete_task(&id).await {
                Ok(()) => print_notice(&Notice::task_deleted(&task.title)),
                Err(err) => return fail(Notice::delete_failed(), err),
            }
        }
    }
    Ok(())
}

fn fail(notice: Notice, err: StoreError) -> Result<()> {
    print_notice(&notice);
    Err(err.into())
}

fn print_notice(notice: &Notice) {
    match notice.kind {
        NoticeKind::Success => println!("{}", notice.message),
        NoticeKind::Failure => eprintln!("{}", notice.message),
    }
}

fn print_page(page: &ListPage) {
    println!(
        "{} ({} per page)",
        page.view.status_filter().label(),
        page.view.page_size()
    );
    print_rows(&page.tasks);
    if let Some(range) = &page.range {
        println!("{}", range.describe());
    }
    if let Some(window) = &page.window {
        println!("{}", window.render());
    }
}

fn print_rows(tasks: &TasksPage) {
    if tasks.data.is_empty() {
        println!("No tasks found.");
        return;
    }
    for task in &tasks.data {
        println!("{:<38} {:<12} {}", task.id.as_str(), task.status.label(), task.title);
    }
}

fn print_task(task: &Task) {
    println!("{}  [{}]", task.title, task.status.label());
    if let Some(description) = &task.description {
        println!("{description}");
    }
    println!("id:      {}", task.id);
    println!("created: {}", task.created_at.format("%Y-%m-%d %H:%M"));
    println!("updated: {}", task.updated_at.format("%Y-%m-%d %H:%M"));
}

fn confirm(prompt: &str) -> Result<bool> {
    use std::io::{BufRead, Write};

    print!("{prompt} [y/N] ");
    std::io::stdout().flush()?;
    let mut answer = String::new();
    std::io::stdin().lock().read_line(&mut answer)?;
    Ok(matches!(answer.trim(), "y" | "Y" | "yes"))
}
