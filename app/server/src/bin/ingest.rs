//! Load reference passages into a subject's LanceDB table.

use std::fs::File;
use std::io::BufReader;
use std::path::PathBuf;

use anyhow::{Context, Result};
use clap::Parser;
use syllabus_rag::embeddings::RemoteEmbeddings;
use syllabus_rag::{ingest_passages, read_passages, LanceStore, Subject};

#[derive(Parser, Debug)]
#[command(name = "ingest", about = "Embed syllabus passages and store them for retrieval")]
struct Args {
    /// Subject namespace to write into: biology, physics or chemistry
    #[arg(long, short)]
    subject: Subject,

    /// Passage records as a JSON array or JSONL; `-` reads stdin
    input: PathBuf,

    /// JSON config file; defaults plus environment overrides without it
    #[arg(long, env = "SYLLABUS_RAG_CONFIG")]
    config: Option<PathBuf>,

    /// Max passages per embedding request
    #[arg(long, default_value_t = 32)]
    batch_size: usize,
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .with_writer(std::io::stderr)
        .init();

    let args = Args::parse();
    let config = syllabus_rag_server_lib::load_config_from(args.config.as_deref())?;

    let passages = if args.input.as_os_str() == "-" {
        read_passages(BufReader::new(std::io::stdin().lock()))?
    } else {
        let file = File::open(&args.input)
            .with_context(|| format!("failed to open {:?}", args.input))?;
        read_passages(BufReader::new(file))?
    };
    if passages.is_empty() {
        tracing::warn!(input = ?args.input, "No passages to ingest");
        return Ok(());
    }

    let embeddings = RemoteEmbeddings::new(&config.embedding)?;
    let store = LanceStore::connect(&config.lance_path(), config.embedding.dimension).await?;
    let written = ingest_passages(&embeddings, &store, args.subject, passages, args.batch_size).await?;
    let total = store.count(args.subject).await?;

    eprintln!(
        "ingested {} passages into {} ({} total)",
        written,
        LanceStore::table_name(args.subject),
        total
    );
    Ok(())
}
