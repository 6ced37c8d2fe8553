use clap::Parser;
use serde_json::json;
use time::macros::format_description;
use time::OffsetDateTime;
use tracing_subscriber::EnvFilter;
use uuid::Uuid;

use lorebook::config::Config;
use lorebook::db::Database;
use lorebook::domain::Note;
use lorebook::error::{LorebookError, Result};
use lorebook::mentions::EntityRef;
use lorebook::migrations::{catalog, MigrationRunner};
use lorebook::notes::{LinkStatus, Notebook};
use lorebook::storage;

#[derive(Parser, Debug)]
#[command(name = "lorebook")]
#[command(about = "Campaign notes with a versioned local store and backlinks")]
struct Cli {
    #[arg(long, env = "LOREBOOK_CONFIG")]
    config: Option<String>,

    #[arg(long, help = "Database path; overrides config and LOREBOOK_DB")]
    db: Option<String>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(clap::Subcommand, Debug)]
enum Commands {
    /// Bring the schema to the latest version
    Migrate,
    /// Show installed and pending migrations
    Status,
    Note {
        #[command(subcommand)]
        command: NoteCommand,
    },
    /// List what mentions an entity, given as kind:id
    Backlinks { target: String },
    /// Rebuild every note's mention links
    Reindex,
    /// Print an empty migration step for the next version
    MigrationStub { name: String },
}

#[derive(clap::Subcommand, Debug)]
enum NoteCommand {
    Add {
        #[arg(long)]
        title: String,

        #[arg(long, default_value = "")]
        content: String,

        #[arg(long = "tag")]
        tags: Vec<String>,
    },
    Edit {
        id: Uuid,

        #[arg(long)]
        title: Option<String>,

        #[arg(long)]
        content: Option<String>,
    },
    Rm {
        id: Uuid,
    },
    Show {
        id: Uuid,
    },
    List,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    let mut config = Config::load(cli.config.as_deref())?;
    if let Some(db) = cli.db {
        config.database.path = db;
    }

    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(config.log_filter()));
    tracing_subscriber::fmt().with_env_filter(filter).init();

    match cli.command {
        Commands::Migrate => {
            let db = Database::boot(&config.database).await?;
            println!(
                "schema at version {}",
                db.ready_version().unwrap_or_default()
            );
        }
        Commands::Status => {
            let db = Database::open(&config.database).await?;
            let runner = MigrationRunner::new(db.clone(), catalog::registry()?);
            println!("installed: {}", runner.installed_version().await?);
            for applied in runner.history().await? {
                println!("  applied  {}  {}", applied.key, format_ts(applied.applied_at));
            }
            for step in runner.pending().await? {
                println!("  pending  {}", step.key());
            }
            let stores = db.run(storage::list_stores).await?;
            println!("stores: {}", stores.join(", "));
        }
        Commands::Note { command } => {
            let db = Database::boot(&config.database).await?;
            run_note_command(Notebook::new(db), command).await?;
        }
        Commands::Backlinks { target } => {
            let target = EntityRef::parse(&target)?;
            let db = Database::boot(&config.database).await?;
            for source in Notebook::new(db).backlinks(&target).await? {
                println!("{source}");
            }
        }
        Commands::Reindex => {
            let db = Database::boot(&config.database).await?;
            let count = Notebook::new(db).reindex_all().await?;
            println!("reindexed {count} notes");
        }
        Commands::MigrationStub { name } => {
            print!("{}", catalog::registry()?.stub(&name)?);
        }
    }
    Ok(())
}

async fn run_note_command(notebook: Notebook, command: NoteCommand) -> Result<()> {
    match command {
        NoteCommand::Add {
            title,
            content,
            tags,
        } => {
            let saved = notebook
                .create(Note {
                    title,
                    content,
                    tags,
                })
                .await?;
            report_links(&saved.links);
            print_json(&saved.entity)?;
        }
        NoteCommand::Edit { id, title, content } => {
            let mut patch = serde_json::Map::new();
            if let Some(title) = title {
                patch.insert("title".to_string(), json!(title));
            }
            if let Some(content) = content {
                patch.insert("content".to_string(), json!(content));
            }
            let saved = notebook.update(id, patch.into()).await?;
            report_links(&saved.links);
            print_json(&saved.entity)?;
        }
        NoteCommand::Rm { id } => {
            report_links(&notebook.remove(id).await?);
        }
        NoteCommand::Show { id } => {
            let note = notebook.get(id).await?.ok_or(LorebookError::NotFound {
                store: "notes".to_string(),
                id: id.to_string(),
            })?;
            print_json(&note)?;
            let backlinks = notebook.backlinks(&note.entity_ref()).await?;
            if !backlinks.is_empty() {
                println!("mentioned by:");
                for source in backlinks {
                    println!("  {source}");
                }
            }
        }
        NoteCommand::List => {
            for note in notebook.list().await? {
                println!("{}  {}  {}", note.id, format_ts(note.updated_at), note.data.title);
            }
        }
    }
    Ok(())
}

fn report_links(status: &LinkStatus) {
    if let LinkStatus::Stale(reason) = status {
        eprintln!("warning: saved, but mention links were not updated: {reason}");
    }
}

fn print_json<T: serde::Serialize>(value: &T) -> Result<()> {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}

fn format_ts(ms: i64) -> String {
    let format = format_description!("[year]-[month]-[day] [hour]:[minute]:[second]");
    OffsetDateTime::from_unix_timestamp_nanos(i128::from(ms) * 1_000_000)
        .ok()
        .and_then(|ts| ts.format(format).ok())
        .unwrap_or_else(|| ms.to_string())
}
