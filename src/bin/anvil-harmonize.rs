//! anvil-harmonize CLI: load extracted entities and normalize them.
//!
//! Usage:
//!   anvil-harmonize load <entities.jsonl> [--db path]
//!   anvil-harmonize index [--db path]
//!   anvil-harmonize status [--db path]
//!   anvil-harmonize rules
//!   anvil-harmonize normalize --out <dir> [--db path] [--config tables.yaml] ...

use anvil_harmonizer::batch::{run_batch, BatchOptions, BatchSummary};
use anvil_harmonizer::model::{keys, WorkspaceRecord};
use anvil_harmonizer::rules::rule_key;
use anvil_harmonizer::storage::{load_jsonl, EntityStore, LabelScan, OpenStore, SqliteStore};
use anvil_harmonizer::{HarmonizerConfig, RuleRegistry};
use clap::{Parser, Subcommand};
use std::fs::File;
use std::io::{self, BufRead, BufReader};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(
    name = "anvil-harmonize",
    version,
    about = "Reconcile consortium entity graphs into Patient/Specimen/Task/Document"
)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Load an extractor's JSON-lines output into the entity store
    Load {
        /// JSON-lines file, or - for stdin
        input: PathBuf,
        /// Path to SQLite database file
        #[arg(long)]
        db: Option<PathBuf>,
    },
    /// Build the store's secondary indexes
    Index {
        /// Path to SQLite database file
        #[arg(long)]
        db: Option<PathBuf>,
    },
    /// List the workspaces in the store
    Status {
        /// Path to SQLite database file
        #[arg(long)]
        db: Option<PathBuf>,
    },
    /// Print the registered normalization rules, most specific first
    Rules,
    /// Normalize every workspace and write the canonical models
    Normalize {
        /// Directory for canonical workspaces and the error report
        #[arg(long)]
        out: PathBuf,
        /// Path to SQLite database file
        #[arg(long)]
        db: Option<PathBuf>,
        /// YAML alias tables (built-in tables when omitted)
        #[arg(long)]
        config: Option<PathBuf>,
        /// Store holding blob and DRS records
        #[arg(long)]
        blobs: Option<PathBuf>,
        /// Workspaces normalized at once
        #[arg(long)]
        workers: Option<usize>,
        /// Cache normalized workspaces here between runs
        #[arg(long)]
        cache_dir: Option<PathBuf>,
        /// Only normalize this workspace (repeatable)
        #[arg(long)]
        only: Vec<String>,
    },
}

/// Get the default database path (~/.local/share/anvil-harmonizer/entities.db)
fn default_db_path() -> PathBuf {
    let data_dir = dirs::data_dir()
        .unwrap_or_else(|| dirs::home_dir().unwrap_or_default().join(".local/share"));
    let dir = data_dir.join("anvil-harmonizer");
    std::fs::create_dir_all(&dir).ok();
    dir.join("entities.db")
}

fn cmd_load(db: &Path, input: &Path) -> i32 {
    let store = match SqliteStore::open(db) {
        Ok(s) => s,
        Err(e) => {
            eprintln!("Error: failed to open database: {}", e);
            return 1;
        }
    };
    let reader: Box<dyn BufRead> = if input == Path::new("-") {
        Box::new(io::stdin().lock())
    } else {
        match File::open(input) {
            Ok(f) => Box::new(BufReader::new(f)),
            Err(e) => {
                eprintln!("Error: cannot read {}: {}", input.display(), e);
                return 1;
            }
        }
    };
    match load_jsonl(&store, reader) {
        Ok(stats) => {
            println!("Loaded {} vertices and {} edges", stats.vertices, stats.edges);
            0
        }
        Err(e) => {
            eprintln!("Error: {}", e);
            1
        }
    }
}

fn cmd_index(db: &Path) -> i32 {
    let result = SqliteStore::open(db).and_then(|store| store.index());
    match result {
        Ok(()) => {
            println!("Indexes built");
            0
        }
        Err(e) => {
            eprintln!("Error: {}", e);
            1
        }
    }
}

fn cmd_status(db: &Path) -> i32 {
    let store = match SqliteStore::open_read_only(db) {
        Ok(s) => s,
        Err(e) => {
            eprintln!("Error: failed to open database: {}", e);
            return 1;
        }
    };
    let mut records: Vec<WorkspaceRecord> = Vec::new();
    for entry in LabelScan::new(&store, keys::WORKSPACE_LABEL).entries() {
        let (key, payload) = match entry {
            Ok(entry) => entry,
            Err(e) => {
                eprintln!("Error: {}", e);
                return 1;
            }
        };
        match serde_json::from_value(payload) {
            Ok(record) => records.push(record),
            Err(e) => eprintln!("Warning: skipping malformed workspace {}: {}", key, e),
        }
    }
    if records.is_empty() {
        println!("No workspaces.");
        return 0;
    }
    println!("{:<12} WORKSPACE", "CONSORTIUM");
    for record in &records {
        println!("{:<12} {}", record.consortium, record.name);
    }
    for label in [keys::BLOB_LABEL, keys::DRS_LABEL] {
        match store.count_by_label(label) {
            Ok(n) if n > 0 => println!("{} {} records", n, label),
            Ok(_) => {}
            Err(e) => eprintln!("Warning: cannot count {} records: {}", label, e),
        }
    }
    println!("{} workspace(s)", records.len());
    0
}

fn cmd_rules() -> i32 {
    let registry = RuleRegistry::with_defaults();
    for (scope, operation) in registry.rules() {
        println!("{}", rule_key(&scope, operation));
    }
    0
}

fn write_json(path: &Path, value: &impl serde::Serialize) -> Result<(), String> {
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent)
            .map_err(|e| format!("cannot create {}: {}", parent.display(), e))?;
    }
    let json = serde_json::to_vec_pretty(value).map_err(|e| e.to_string())?;
    std::fs::write(path, json).map_err(|e| format!("cannot write {}: {}", path.display(), e))
}

fn write_outputs(out: &Path, summary: &BatchSummary) -> Result<(), String> {
    for workspace in &summary.normalized {
        let path = out
            .join(&workspace.consortium)
            .join(format!("{}.json", workspace.name));
        write_json(&path, workspace)?;
    }
    write_json(&out.join("errors.json"), &summary.reports)
}

fn cmd_normalize(db: PathBuf, out: &Path, config: Option<PathBuf>, options: BatchOptions) -> i32 {
    let config = match config {
        Some(path) => match HarmonizerConfig::from_path(&path) {
            Ok(c) => c,
            Err(e) => {
                eprintln!("Error: {}", e);
                return 1;
            }
        },
        None => HarmonizerConfig::builtin(),
    };
    let rules = Arc::new(RuleRegistry::with_defaults());

    let rt = match tokio::runtime::Runtime::new() {
        Ok(rt) => rt,
        Err(e) => {
            eprintln!("failed to create tokio runtime: {}", e);
            return 1;
        }
    };
    let summary = match rt.block_on(run_batch(db, Arc::new(config), rules, options)) {
        Ok(summary) => summary,
        Err(e) => {
            eprintln!("Error: {}", e);
            return 1;
        }
    };

    if let Err(e) = write_outputs(out, &summary) {
        eprintln!("Error: {}", e);
        return 1;
    }
    println!(
        "Normalized {} workspace(s), abandoned {}, failed {} ({} from cache)",
        summary.normalized.len(),
        summary.abandoned.len(),
        summary.failed.len(),
        summary.cache_hits
    );
    for (workspace, reason) in summary.abandoned.iter().chain(&summary.failed) {
        println!("  skipped {}: {}", workspace, reason);
    }
    0
}

fn main() {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .with_writer(io::stderr)
        .init();

    let cli = Cli::parse();
    let code = match cli.command {
        Commands::Load { input, db } => cmd_load(&db.unwrap_or_else(default_db_path), &input),
        Commands::Index { db } => cmd_index(&db.unwrap_or_else(default_db_path)),
        Commands::Status { db } => cmd_status(&db.unwrap_or_else(default_db_path)),
        Commands::Rules => cmd_rules(),
        Commands::Normalize {
            out,
            db,
            config,
            blobs,
            workers,
            cache_dir,
            only,
        } => {
            let defaults = BatchOptions::default();
            let options = BatchOptions {
                workers: workers.unwrap_or(defaults.workers),
                cache_dir,
                blob_store: blobs,
                only,
            };
            cmd_normalize(db.unwrap_or_else(default_db_path), &out, config, options)
        }
    };
    std::process::exit(code);
}
