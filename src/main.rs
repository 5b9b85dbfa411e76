//! owl - 研究助理智能体命令行
//!
//! 入口：初始化日志、加载配置、装配组件，然后执行子命令（ask / index / search / pages）。

use std::path::PathBuf;

use anyhow::Context;
use clap::{Parser, Subcommand};
use tokio::sync::mpsc;

use owl::agent::create_agent_components;
use owl::config::load_config;

#[derive(Parser)]
#[command(name = "owl", version, about = "Tool-augmented research agent with vector memory")]
struct Cli {
    /// Extra config file layered over config/default.toml.
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Ask a question and run the agent loop.
    Ask {
        query: String,

        /// Continue an existing session.
        #[arg(long)]
        session: Option<String>,

        /// Print loop events as JSON lines on stderr.
        #[arg(long)]
        events: bool,
    },

    /// Index an HTML file under the given URL.
    Index { url: String, file: PathBuf },

    /// Semantic search over indexed pages.
    Search {
        query: String,

        #[arg(long, default_value = "5")]
        top_k: usize,
    },

    /// List indexed pages.
    Pages,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    owl::observability::init();
    let cli = Cli::parse();

    let cfg = load_config(cli.config).context("Failed to load config")?;
    let components = create_agent_components(cfg).await;

    match cli.command {
        Commands::Ask {
            query,
            session,
            events,
        } => {
            let tools = components.builtin_tools();
            let mut agent = components.agent();
            let printer = if events {
                let (tx, mut rx) = mpsc::unbounded_channel();
                agent = agent.with_event_tx(tx);
                Some(tokio::spawn(async move {
                    while let Some(ev) = rx.recv().await {
                        if let Ok(line) = serde_json::to_string(&ev) {
                            eprintln!("{line}");
                        }
                    }
                }))
            } else {
                None
            };

            let response = agent.process_query(&tools, &query, session.as_deref()).await;
            drop(agent);
            if let Some(handle) = printer {
                let _ = handle.await;
            }
            println!("{}", response.response_text);
            eprintln!("session: {}", response.session_id);
        }
        Commands::Index { url, file } => {
            let html = std::fs::read_to_string(&file)
                .with_context(|| format!("Failed to read {}", file.display()))?;
            match components.index_page(&url, &html).await {
                Ok(true) => println!("indexed {url}"),
                Ok(false) => anyhow::bail!("failed to index {url}"),
                Err(reason) => anyhow::bail!("{url} rejected: {reason}"),
            }
        }
        Commands::Search { query, top_k } => {
            let hits = components.documents.search(&query, top_k).await;
            if hits.is_empty() {
                println!("no results");
            }
            for hit in hits {
                let preview: String = hit.content.chars().take(160).collect();
                println!("{:.4}  {}\n        {}", hit.distance, hit.url, preview);
            }
        }
        Commands::Pages => {
            for page in components.documents.list() {
                println!("{}  {}  {}", page.timestamp.to_rfc3339(), page.short_hash(), page.url);
            }
        }
    }

    Ok(())
}
