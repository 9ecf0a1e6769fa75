// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: MIT
mod cli;
mod stdio;

use std::path::Path;
use std::sync::Arc;

use anyhow::Context;
use clap::Parser;
use tracing::{info, warn};
use tracing_subscriber::{filter::EnvFilter, fmt, prelude::*};

use cli::{Cli, Commands, CronCommands};
use tomte_agent::{build_agent_options, AgentRunner, EchoExecutor};
use tomte_config::Config;
use tomte_gateway::{
    validate_heartbeat_target, AdapterMessage, Dispatcher, MessageQueue, Router,
};
use tomte_memory::{
    collect_documents, hybrid_search, ChunkParams, Embedder, HashEmbedder, Indexer, SearchParams,
    SqliteVectorStore,
};
use tomte_sandbox::pre_tool_use;
use tomte_scheduler::{
    resolve_heartbeat_prompt, CronStore, CronTimer, HeartbeatScheduler, SystemEventKind,
    SystemEvents,
};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    init_logging(cli.verbose);

    let config = Arc::new(tomte_config::load(cli.config.as_deref())?);

    match cli.command {
        Some(Commands::ShowConfig) => {
            println!("{}", serde_yaml::to_string(config.as_ref()).unwrap_or_default());
            Ok(())
        }
        Some(Commands::Index) => run_index(&config).await,
        Some(Commands::Search { query }) => run_search(&config, &query).await,
        Some(Commands::Cron { command }) => run_cron(&config, command),
        Some(Commands::Start) | None => run_daemon(config).await,
    }
}

fn init_logging(verbose: bool) {
    let filter = EnvFilter::try_from_env("TOMTE_LOG").unwrap_or_else(|_| {
        EnvFilter::new(if verbose { "debug" } else { "info" })
    });
    if let Ok(path) = std::env::var("TOMTE_LOG_FILE") {
        if let Ok(file) = std::fs::OpenOptions::new().create(true).append(true).open(&path) {
            tracing_subscriber::registry()
                .with(filter)
                .with(fmt::layer().with_writer(Arc::new(file)).with_ansi(false))
                .init();
            return;
        }
    }
    tracing_subscriber::registry()
        .with(filter)
        .with(fmt::layer().with_writer(std::io::stderr))
        .init();
}

// ── Subcommands ───────────────────────────────────────────────────────────────

fn open_memory(config: &Config) -> anyhow::Result<(Arc<SqliteVectorStore>, Arc<HashEmbedder>)> {
    let store = SqliteVectorStore::open(&config.security.data_dir.join("vectors.db"))?;
    Ok((Arc::new(store), Arc::new(HashEmbedder::default())))
}

async fn run_index(config: &Config) -> anyhow::Result<()> {
    let (store, embedder) = open_memory(config)?;
    let indexer = Indexer::new(
        store,
        embedder,
        ChunkParams {
            tokens: config.memory.search.chunk_tokens,
            overlap: config.memory.search.chunk_overlap,
        },
    );
    let docs = collect_documents(&config.memory_dir());
    let stats = indexer.sync_files(&docs).await?;
    println!(
        "indexed {} file(s), {} unchanged, {} removed",
        stats.indexed, stats.unchanged, stats.removed
    );
    Ok(())
}

async fn run_search(config: &Config, query: &str) -> anyhow::Result<()> {
    let (store, embedder) = open_memory(config)?;
    let results = hybrid_search(
        query,
        store.as_ref(),
        embedder.as_ref() as &dyn Embedder,
        &SearchParams::from(&config.memory.search),
    )
    .await?;

    if results.is_empty() {
        println!("no matches");
        return Ok(());
    }
    for r in results {
        println!(
            "{:.3}  {}:{}-{}\n       {}",
            r.score,
            r.path,
            r.start_line,
            r.end_line,
            r.snippet.lines().next().unwrap_or_default()
        );
    }
    Ok(())
}

fn run_cron(config: &Config, command: CronCommands) -> anyhow::Result<()> {
    let store = CronStore::new(config.security.data_dir.join("cron-jobs.json"));
    match command {
        CronCommands::List => {
            let jobs = store.list();
            if jobs.is_empty() {
                println!("no cron jobs");
            }
            for job in jobs {
                println!(
                    "{}  [{}] {}  last fired: {}",
                    job.id,
                    if job.enabled { "on " } else { "off" },
                    job.label,
                    job.last_fired_at
                        .map(|t| t.to_rfc3339())
                        .unwrap_or_else(|| "never".into()),
                );
            }
        }
        CronCommands::Remove { id } => {
            let id = id.parse().context("not a valid job id")?;
            let result = store.remove(id);
            println!("{}", result.message);
        }
    }
    Ok(())
}

// ── The daemon ────────────────────────────────────────────────────────────────

async fn run_daemon(config: Arc<Config>) -> anyhow::Result<()> {
    tomte_config::bootstrap_workspace(&config)?;

    // Memory index: sync at boot, watch for edits, re-sync on heartbeat.
    let (store, embedder) = open_memory(&config)?;
    let indexer = Arc::new(Indexer::new(
        store,
        embedder,
        ChunkParams {
            tokens: config.memory.search.chunk_tokens,
            overlap: config.memory.search.chunk_overlap,
        },
    ));
    let memory_dir = config.memory_dir();
    let stats = indexer.sync_files(&collect_documents(&memory_dir)).await?;
    info!(indexed = stats.indexed, "memory index ready");
    let _watcher = watch_memory_dir(&memory_dir, indexer.clone())?;

    // Agent runner over the configured executor, sandboxed by the
    // PreToolUse gate.  The echo executor stands in until a model
    // provider binding is configured.
    let memory_content =
        std::fs::read_to_string(config.security.workspace.join("MEMORY.md")).unwrap_or_default();
    let options = build_agent_options(&config, &memory_content, Vec::new());
    let hook_config = config.clone();
    let runner = Arc::new(
        AgentRunner::new(Arc::new(EchoExecutor), options, config.clone()).with_pre_tool_hook(
            Arc::new(move |tool, input| pre_tool_use(tool, input, &hook_config.security)),
        ),
    );

    // Dispatch core.
    let queue = Arc::new(MessageQueue::new(config.gateway.max_queue_size));
    let router = Arc::new(Router::new());
    router.register(Arc::new(stdio::StdioChannel));
    validate_heartbeat_target(&config, &router)?;
    let dispatcher = Arc::new(Dispatcher::new(
        queue.clone(),
        router.clone(),
        runner,
        config.clone(),
    ));

    // Cron: fires become queue messages, or buffered events when the
    // queue is full (the next heartbeat reports them).
    let events = Arc::new(SystemEvents::new());
    let cron_store = CronStore::new(config.security.data_dir.join("cron-jobs.json"));
    let timer = {
        let queue = queue.clone();
        let events = events.clone();
        CronTimer::new(cron_store, move |job| {
            let text = job.payload.text.clone();
            if !queue.enqueue(AdapterMessage::cron(&text)).accepted {
                warn!(job = %job.label, "queue full, deferring cron fire to the next heartbeat");
                events.enqueue(text, SystemEventKind::Cron);
            }
        })
    };
    timer.rearm();

    // Heartbeat: resolve buffered events into a prompt and enqueue it.
    let heartbeat = if config.heartbeat.enabled {
        let queue = queue.clone();
        let events = events.clone();
        let indexer = indexer.clone();
        let docs_dir = memory_dir.clone();
        Some(HeartbeatScheduler::start(&config.heartbeat, move || {
            let prompt = resolve_heartbeat_prompt(&events.drain());
            if !queue.enqueue(AdapterMessage::heartbeat(prompt)).accepted {
                warn!("queue full, skipping heartbeat tick");
            }
            let indexer = indexer.clone();
            let docs = collect_documents(&docs_dir);
            tokio::spawn(async move {
                if let Err(e) = indexer.sync_if_dirty(&docs).await {
                    warn!(error = %e, "memory re-sync failed");
                }
            });
        }))
    } else {
        None
    };

    // Stdin is the fallback transport; real channels register here too.
    tokio::spawn(stdio::pump_stdin(queue.clone()));

    info!(workspace = %config.security.workspace.display(), "tomte is up");
    let loop_task = {
        let dispatcher = dispatcher.clone();
        tokio::spawn(async move { dispatcher.run().await })
    };

    tokio::signal::ctrl_c().await.context("waiting for ctrl-c")?;
    info!("shutting down");
    if let Some(hb) = &heartbeat {
        hb.stop();
    }
    timer.disarm();
    dispatcher.stop();
    let _ = loop_task.await;
    Ok(())
}

/// Watch the memory directory and flip the indexer's dirty bit on any
/// change; the heartbeat tick performs the actual re-sync.
fn watch_memory_dir(
    dir: &Path,
    indexer: Arc<Indexer>,
) -> anyhow::Result<notify::RecommendedWatcher> {
    use notify::Watcher;

    let mut watcher = notify::recommended_watcher(
        move |event: Result<notify::Event, notify::Error>| match event {
            Ok(_) => indexer.mark_dirty(),
            Err(e) => warn!(error = %e, "memory watcher error"),
        },
    )
    .context("creating memory watcher")?;
    watcher
        .watch(dir, notify::RecursiveMode::Recursive)
        .with_context(|| format!("watching {}", dir.display()))?;
    Ok(watcher)
}
