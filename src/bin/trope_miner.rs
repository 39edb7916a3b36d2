//! trope-miner CLI.
//!
//! Usage:
//!   trope-miner ingest --db path --title T --input file.txt
//!   trope-miner trope add --db path --id 1 --name "Chosen One" --summary "..." [--alias a]* [--anti-alias a]*
//!   trope-miner mine --db path --work-id 1

use clap::{Parser, Subcommand};
use std::path::PathBuf;
use trope_miner::catalog::Trope;
use trope_miner::config::Config;
use trope_miner::embedding::HttpEmbedder;
use trope_miner::pipeline::Pipeline;
use trope_miner::reasoner::HttpReasoner;
use trope_miner::store::{OpenTropeStore, SqliteTropeStore, TropeStore};
use trope_miner::text::{Codec, TropeId};
use trope_miner::vector::sqlite_vec::SqliteVecIndex;
use trope_miner::vector::VectorIndex;

#[derive(Parser)]
#[command(name = "trope-miner", version, about = "Narrative-trope evidence mining over prose")]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Decode, segment, chunk, and embed a work into the store and vector index.
    Ingest {
        #[arg(long)]
        db: PathBuf,
        #[arg(long)]
        title: String,
        #[arg(long)]
        author: Option<String>,
        #[arg(long)]
        input: PathBuf,
        /// Force a specific source codec instead of auto-detecting.
        #[arg(long)]
        codec: Option<String>,
    },
    /// Manage the trope catalog.
    Trope {
        #[command(subcommand)]
        action: TropeCommands,
    },
    /// Run candidate seeding plus the per-scene rerank/judge/verify pipeline
    /// for a previously ingested work.
    Mine {
        #[arg(long)]
        db: PathBuf,
        #[arg(long)]
        work_id: i64,
    },
}

#[derive(Subcommand)]
enum TropeCommands {
    /// Insert or update one trope definition.
    Add {
        #[arg(long)]
        db: PathBuf,
        #[arg(long)]
        id: i64,
        #[arg(long)]
        name: String,
        #[arg(long, default_value = "")]
        summary: String,
        #[arg(long = "alias")]
        aliases: Vec<String>,
        #[arg(long = "anti-alias")]
        anti_aliases: Vec<String>,
    },
}

fn parse_codec(s: &str) -> Option<Codec> {
    match s.to_ascii_lowercase().as_str() {
        "utf8" | "utf-8" => Some(Codec::Utf8),
        "utf16le" | "utf-16le" => Some(Codec::Utf16Le),
        "utf16be" | "utf-16be" => Some(Codec::Utf16Be),
        "utf32le" | "utf-32le" => Some(Codec::Utf32Le),
        "utf32be" | "utf-32be" => Some(Codec::Utf32Be),
        "cp1252" | "windows-1252" => Some(Codec::Cp1252),
        "macroman" | "mac-roman" => Some(Codec::MacRoman),
        "latin1" | "iso-8859-1" => Some(Codec::Latin1),
        _ => None,
    }
}

#[tokio::main]
async fn main() {
    let env_filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info"));
    tracing_subscriber::fmt().with_env_filter(env_filter).init();

    let cli = Cli::parse();
    let code = match cli.command {
        Commands::Ingest { db, title, author, input, codec } => run_ingest(db, title, author, input, codec).await,
        Commands::Trope { action: TropeCommands::Add { db, id, name, summary, aliases, anti_aliases } } => {
            run_trope_add(db, id, name, summary, aliases, anti_aliases)
        }
        Commands::Mine { db, work_id } => run_mine(db, work_id).await,
    };
    std::process::exit(code);
}

async fn run_ingest(db: PathBuf, title: String, author: Option<String>, input: PathBuf, codec: Option<String>) -> i32 {
    let cfg = Config::from_env();
    if let Err(e) = cfg.validate() {
        eprintln!("error: invalid configuration: {e}");
        return 1;
    }

    let codec = match codec.as_deref().map(parse_codec) {
        Some(Some(c)) => Some(c),
        Some(None) => {
            eprintln!("error: unknown codec");
            return 1;
        }
        None => None,
    };

    let raw_bytes = match std::fs::read(&input) {
        Ok(b) => b,
        Err(e) => {
            eprintln!("error: failed to read {}: {e}", input.display());
            return 1;
        }
    };

    let store = match SqliteTropeStore::open(&db) {
        Ok(s) => s,
        Err(e) => {
            eprintln!("error: failed to open store: {e}");
            return 1;
        }
    };
    let vec_db = vector_db_path(&db);
    let index = match SqliteVecIndex::open(&vec_db, embedding_dim(&cfg)) {
        Ok(i) => i,
        Err(e) => {
            eprintln!("error: failed to open vector index at {}: {e}", vec_db.display());
            return 1;
        }
    };
    let embedder = HttpEmbedder::new(&cfg);
    let reasoner = HttpReasoner::new(&cfg);
    let pipeline = Pipeline::new(&store, &embedder, &index, &reasoner, &cfg);

    match pipeline.ingest_work(&title, author.as_deref(), &raw_bytes, codec).await {
        Ok(work_id) => {
            println!("ingested work {}", work_id.get());
            0
        }
        Err(e) => {
            eprintln!("error: ingest failed: {e}");
            1
        }
    }
}

fn run_trope_add(db: PathBuf, id: i64, name: String, summary: String, aliases: Vec<String>, anti_aliases: Vec<String>) -> i32 {
    let store = match SqliteTropeStore::open(&db) {
        Ok(s) => s,
        Err(e) => {
            eprintln!("error: failed to open store: {e}");
            return 1;
        }
    };
    let trope = Trope {
        id: TropeId::from(id),
        name,
        summary,
        aliases,
        anti_aliases,
    };
    match store.upsert_trope(&trope) {
        Ok(()) => 0,
        Err(e) => {
            eprintln!("error: failed to save trope: {e}");
            1
        }
    }
}

async fn run_mine(db: PathBuf, work_id: i64) -> i32 {
    let cfg = Config::from_env();
    if let Err(e) = cfg.validate() {
        eprintln!("error: invalid configuration: {e}");
        return 1;
    }

    let store = match SqliteTropeStore::open(&db) {
        Ok(s) => s,
        Err(e) => {
            eprintln!("error: failed to open store: {e}");
            return 1;
        }
    };
    let vec_db = vector_db_path(&db);
    let index = match SqliteVecIndex::open(&vec_db, embedding_dim(&cfg)) {
        Ok(i) => i,
        Err(e) => {
            eprintln!("error: failed to open vector index at {}: {e}", vec_db.display());
            return 1;
        }
    };
    let embedder = HttpEmbedder::new(&cfg);
    let reasoner = HttpReasoner::new(&cfg);
    let pipeline = Pipeline::new(&store, &embedder, &index, &reasoner, &cfg);

    let tropes = match store.list_tropes() {
        Ok(t) => t,
        Err(e) => {
            eprintln!("error: failed to load trope catalog: {e}");
            return 1;
        }
    };
    if tropes.is_empty() {
        eprintln!("error: no tropes in the catalog; use `trope add` first");
        return 1;
    }

    let work_id = trope_miner::text::WorkId::from(work_id);
    if let Err(e) = pipeline.seed_candidates(work_id, &tropes).await {
        eprintln!("error: candidate seeding failed: {e}");
        return 1;
    }
    if let Err(e) = pipeline.mine_work(work_id, &tropes).await {
        eprintln!("error: scene mining failed: {e}");
        return 1;
    }
    println!("mined work {} against {} tropes", work_id.get(), tropes.len());
    0
}

fn embedding_dim(_cfg: &Config) -> usize {
    // nomic-embed-text and similar Ollama embedding models default to 768
    // dimensions; override EMBED_DIM if a different model is configured.
    std::env::var("EMBED_DIM").ok().and_then(|v| v.parse().ok()).unwrap_or(768)
}

/// The vector index lives in a sibling file next to the relational store
/// (`foo.db` -> `foo.vec.db`) so `ingest` and `mine` against the same `--db`
/// share one on-disk vec0 table instead of each starting from empty.
fn vector_db_path(db: &std::path::Path) -> PathBuf {
    match db.extension() {
        Some(ext) => db.with_extension(format!("vec.{}", ext.to_string_lossy())),
        None => db.with_extension("vec"),
    }
}
