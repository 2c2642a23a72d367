//! Command-line client: prints the answer as it streams, then the cited sources.

use std::io::Write;

use clap::Parser;
use syllabus_rag::{ChatClient, ChatRequest, ClientError, TurnPair};

#[derive(Parser, Debug)]
#[command(name = "ask", about = "Ask the syllabus assistant a question and stream the answer")]
struct Args {
    /// Subject assistant to ask: biology, physics or chemistry
    #[arg(long, short)]
    subject: String,

    /// Answer server root
    #[arg(long, env = "SYLLABUS_RAG_URL", default_value = "http://127.0.0.1:3000")]
    url: String,

    /// Previous exchange as "question|answer"; repeat for longer history, oldest first
    #[arg(long = "history")]
    history: Vec<String>,

    /// The question
    #[arg(required = true)]
    question: Vec<String>,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("warn")),
        )
        .with_writer(std::io::stderr)
        .init();

    let args = Args::parse();
    let history = args
        .history
        .iter()
        .map(|pair| match pair.split_once('|') {
            Some((q, a)) => Ok(TurnPair::new(q.trim(), a.trim())),
            None => Err(anyhow::anyhow!("history entry {:?} must look like \"question|answer\"", pair)),
        })
        .collect::<anyhow::Result<Vec<_>>>()?;
    let request = ChatRequest::new(args.question.join(" "), args.subject).with_history(history);

    let client = ChatClient::new(&args.url)?;
    let mut printed = 0usize;
    let result = client
        .ask(&request, |update| {
            if update.content.len() > printed && update.content.is_char_boundary(printed) {
                print!("{}", &update.content[printed..]);
                let _ = std::io::stdout().flush();
                printed = update.content.len();
            }
        })
        .await;

    let answer = match result {
        Ok(answer) => answer,
        Err(ClientError::Rejected { message, .. }) => anyhow::bail!(message),
        Err(err) => return Err(err.into()),
    };
    println!();

    if !answer.completed {
        eprintln!("(answer interrupted, sources unavailable)");
        return Ok(());
    }
    if !answer.citations.is_empty() {
        println!("\nSources:");
        for citation in &answer.citations {
            println!(
                "- Unit {}, {} ({}, pp. {}-{})",
                citation.unit_number,
                citation.subtopic,
                citation.source_file,
                citation.page_start,
                citation.page_end
            );
        }
    }
    Ok(())
}
