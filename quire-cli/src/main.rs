//! Quire CLI - manage documents and edit them through collaboration sessions
//!
//! Usage: quire [--data-dir DIR] <command> [options]

mod workspace;

use anyhow::Result;
use clap::{Parser, Subcommand};
use std::path::PathBuf;
use std::process::ExitCode;

use quire_core::{DocumentRecord, RocksConfig, RocksPartition};
use workspace::{render_listing, render_record, Edit, Workspace};

#[derive(Parser)]
#[command(name = "quire", version, about = "Document records with collaborative editing")]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Database directory
    #[arg(long, global = true, env = "QUIRE_DATA_DIR", default_value = "quire_data")]
    data_dir: PathBuf,

    /// fsync every write
    #[arg(long, global = true)]
    sync_writes: bool,

    /// Output records as JSON
    #[arg(long, global = true)]
    json: bool,
}

#[derive(Subcommand)]
enum Commands {
    /// Create a document
    Create {
        /// Slug (generated when omitted)
        #[arg(long)]
        slug: Option<String>,

        /// Title (defaults to the slug)
        #[arg(long)]
        title: Option<String>,
    },

    /// List documents, most recently updated first
    List {
        /// Include archived documents
        #[arg(long)]
        all: bool,
    },

    /// Show one document
    Show { slug: String },

    /// Change a document's slug
    Rename { slug: String, new_slug: String },

    /// Archive a document
    Archive { slug: String },

    /// Restore an archived document
    Restore { slug: String },

    /// Permanently delete an archived document and its room
    Delete { slug: String },

    /// Find documents by title or content
    Search {
        query: String,

        /// Include archived documents
        #[arg(long)]
        all: bool,
    },

    /// Edit a document through a collaboration session
    Edit {
        slug: String,

        /// Replace the content
        #[arg(long)]
        set: Option<String>,

        /// Append to the content
        #[arg(long)]
        append: Option<String>,

        /// Replace the title
        #[arg(long)]
        title: Option<String>,
    },
}

enum Output {
    Record(DocumentRecord),
    Records(Vec<DocumentRecord>),
    Message(String),
}

async fn run(
    workspace: &Workspace<RocksPartition, RocksPartition>,
    command: Commands,
) -> Result<Output> {
    let output = match command {
        Commands::Create { slug, title } => {
            Output::Record(workspace.create(slug.as_deref(), title.as_deref()).await?)
        }
        Commands::List { all } => Output::Records(workspace.list(all).await?),
        Commands::Show { slug } => Output::Record(workspace.show(&slug).await?),
        Commands::Rename { slug, new_slug } => {
            Output::Record(workspace.rename(&slug, &new_slug).await?)
        }
        Commands::Archive { slug } => Output::Record(workspace.archive(&slug).await?),
        Commands::Restore { slug } => Output::Record(workspace.restore(&slug).await?),
        Commands::Delete { slug } => {
            let record = workspace.delete(&slug).await?;
            Output::Message(format!("deleted {} ({})", record.slug, record.id))
        }
        Commands::Search { query, all } => Output::Records(workspace.search(&query, all).await?),
        Commands::Edit {
            slug,
            set,
            append,
            title,
        } => Output::Record(workspace.edit(&slug, Edit { set, append, title }).await?),
    };
    Ok(output)
}

fn print(output: Output, json: bool) -> Result<()> {
    match output {
        Output::Record(record) if json => println!("{}", serde_json::to_string_pretty(&record)?),
        Output::Records(records) if json => println!("{}", serde_json::to_string_pretty(&records)?),
        Output::Record(record) => print!("{}", render_record(&record)),
        Output::Records(records) => print!("{}", render_listing(&records)),
        Output::Message(message) => println!("{message}"),
    }
    Ok(())
}

#[tokio::main]
async fn main() -> ExitCode {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();

    let cli = Cli::parse();
    let config = RocksConfig {
        path: cli.data_dir,
        sync_writes: cli.sync_writes,
        ..RocksConfig::default()
    };

    let workspace = match Workspace::open(config) {
        Ok(workspace) => workspace,
        Err(e) => {
            eprintln!("error: {e:#}");
            return ExitCode::FAILURE;
        }
    };

    let outcome = run(&workspace, cli.command).await;
    workspace.shutdown().await;

    match outcome.and_then(|output| print(output, cli.json)) {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            log::debug!("Command failed: {e:?}");
            eprintln!("error: {e:#}");
            ExitCode::FAILURE
        }
    }
}
