use std::error::Error;
use std::path::PathBuf;
use std::sync::Arc;

use clap::{Parser, Subcommand};
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::sync::{mpsc, watch};

use clipdock::clipboard::ExportFormat;
use clipdock::config::Config;
use clipdock::export::download_export;
use clipdock::sync::{ApiClient, ChannelEvent, ChannelOptions, ClipboardGateway, SubscriptionChannel};
use clipdock::view::{render, ControllerSettings, NoticeLevel, ViewCommand, ViewController};

/// Terminal client for a clipboard-history backend.
#[derive(Debug, Parser)]
#[command(name = "clipdock", version, about)]
struct Cli {
    /// Backend base URL (overrides CLIPDOCK_SERVER_URL)
    #[arg(long, global = true)]
    server: Option<String>,

    /// Write logs to this file instead of stderr
    #[arg(long, global = true)]
    log_file: Option<PathBuf>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Debug, Subcommand)]
enum Command {
    /// List stored entries
    List {
        #[arg(long, default_value_t = 0)]
        page: u32,
        #[arg(long)]
        size: Option<u32>,
    },
    /// Search entries by content
    Search {
        query: String,
        #[arg(long, default_value_t = 0)]
        page: u32,
        #[arg(long)]
        size: Option<u32>,
    },
    /// List pinned entries
    Pinned,
    /// Entries captured in the last N hours
    Recent {
        #[arg(long, default_value_t = 24)]
        hours: u32,
    },
    /// Toggle the pin on an entry
    Pin { id: i64 },
    /// Delete one entry
    Delete { id: i64 },
    /// Delete all unpinned entries (or everything with --include-pinned)
    Clear {
        #[arg(long)]
        include_pinned: bool,
    },
    /// Show storage statistics
    Stats,
    /// Download an export file
    Export {
        format: ExportFormat,
        #[arg(long)]
        out: Option<PathBuf>,
        #[arg(long)]
        exclude_pinned: bool,
    },
    /// Check that the backend is up
    Health,
    /// Ask the backend to stop monitoring the clipboard
    Stop,
    /// Live view: follow the event bus and accept commands on stdin
    Watch,
}

#[tokio::main]
async fn main() {
    if let Err(e) = run(Cli::parse()).await {
        log::error!("{}", e);
        eprintln!("error: {}", e);
        std::process::exit(1);
    }
}

async fn run(cli: Cli) -> Result<(), Box<dyn Error>> {
    let mut config = Config::from_env()?;
    if let Some(server) = cli.server {
        config = config.with_server_url(server);
    }
    if cli.log_file.is_some() {
        config.log_file = cli.log_file;
    }
    clipdock::logging::init(config.log_file.as_deref());
    log::debug!("Using backend {}", config.server_url);

    let api = ApiClient::new(&config.server_url);
    match cli.command {
        Command::List { page, size } => {
            let page = api.list_entries(page, size.unwrap_or(config.page_size)).await?;
            print_lines(render::entry_lines(&page.content));
            println!(
                "page {}/{} ({} total)",
                page.number + 1,
                page.total_pages.max(1),
                page.total_elements
            );
        }
        Command::Search { query, page, size } => {
            let page = api
                .search_entries(&query, page, size.unwrap_or(config.page_size))
                .await?;
            print_lines(render::entry_lines(&page.content));
        }
        Command::Pinned => print_lines(render::entry_lines(&api.pinned_entries().await?)),
        Command::Recent { hours } => {
            print_lines(render::entry_lines(&api.recent_entries(hours).await?))
        }
        Command::Pin { id } => {
            let entry = api.toggle_pin(id).await?;
            println!("{}", render::entry_line(&entry));
        }
        Command::Delete { id } => {
            api.delete_entry(id).await?;
            println!("Deleted {}", id);
        }
        Command::Clear { include_pinned } => {
            api.delete_all(include_pinned).await?;
            println!(
                "{}",
                if include_pinned {
                    "All entries cleared"
                } else {
                    "Unpinned entries cleared"
                }
            );
        }
        Command::Stats => print_lines(render::stats_lines(&api.stats().await?)),
        Command::Export {
            format,
            out,
            exclude_pinned,
        } => {
            let dir = out.unwrap_or_else(|| config.export_dir.clone());
            let path = download_export(&api, &dir, format, !exclude_pinned).await?;
            println!("Exported to {}", path.display());
        }
        Command::Health => {
            let body = api.health().await?;
            println!("{}", serde_json::to_string_pretty(&body)?);
        }
        Command::Stop => {
            let resp = api.stop_monitoring().await?;
            println!("{}", resp.message);
        }
        Command::Watch => watch_view(&config, api).await?,
    }
    Ok(())
}

fn print_lines(lines: Vec<String>) {
    if lines.is_empty() {
        println!("(no entries)");
    }
    for line in lines {
        println!("{}", line);
    }
}

/// Map one line typed in watch mode to a view command.
fn parse_line(line: &str) -> Result<Option<ViewCommand>, String> {
    let line = line.trim();
    if line.is_empty() {
        return Ok(None);
    }
    if let Some(query) = line.strip_prefix('/') {
        return Ok(Some(ViewCommand::SetSearch(query.trim().to_string())));
    }

    let (word, rest) = match line.split_once(char::is_whitespace) {
        Some((w, r)) => (w, r.trim()),
        None => (line, ""),
    };
    let id = || {
        rest.parse::<i64>()
            .map_err(|_| format!("Expected an entry id, got '{}'", rest))
    };
    let command = match word {
        "pin" => ViewCommand::TogglePin(id()?),
        "del" | "delete" => ViewCommand::Delete(id()?),
        "clear" => ViewCommand::DeleteAllUnpinned,
        "refresh" => ViewCommand::Refresh,
        "stats" => ViewCommand::LoadStats,
        "export" => ViewCommand::Export(rest.parse()?),
        "mode" => ViewCommand::ToggleDisplayMode,
        "next" => ViewCommand::NextPage,
        "prev" => ViewCommand::PrevPage,
        "quit" | "q" | "exit" => ViewCommand::Shutdown,
        other => return Err(format!("Unknown command: {}", other)),
    };
    Ok(Some(command))
}

async fn watch_view(config: &Config, api: ApiClient) -> Result<(), Box<dyn Error>> {
    let (event_tx, event_rx) = mpsc::unbounded_channel::<ChannelEvent>();
    let mut channel = SubscriptionChannel::new(ChannelOptions::from_config(config), event_tx);
    channel.set_enabled(true).await?;

    let (notice_tx, mut notice_rx) = mpsc::unbounded_channel();
    let controller = ViewController::new(
        Arc::new(api),
        ControllerSettings::from_config(config),
        notice_tx,
    );
    let mut snapshots = controller.subscribe();
    let (cmd_tx, cmd_rx) = mpsc::channel::<ViewCommand>(16);
    let view = tokio::spawn(controller.run(cmd_rx, event_rx, channel.watch_state()));

    let printer = tokio::spawn(async move {
        loop {
            tokio::select! {
                changed = snapshots.changed() => {
                    if changed.is_err() {
                        break;
                    }
                    let snapshot = snapshots.borrow_and_update().clone();
                    println!("\n{}", render::render(&snapshot));
                }
                Some(notice) = notice_rx.recv() => {
                    let tag = match notice.level {
                        NoticeLevel::Success => "ok",
                        NoticeLevel::Info => "info",
                        NoticeLevel::Error => "error",
                    };
                    println!("[{}] {}", tag, notice.message);
                }
            }
        }
    });

    let (stop_tx, mut stop_rx) = watch::channel(false);
    let input = tokio::spawn(async move {
        let mut lines = BufReader::new(tokio::io::stdin()).lines();
        loop {
            let line = tokio::select! {
                line = lines.next_line() => line,
                _ = stop_rx.changed() => break,
            };
            let line = match line {
                Ok(Some(line)) => line,
                Ok(None) => break,
                Err(e) => {
                    log::error!("stdin: {}", e);
                    break;
                }
            };
            match parse_line(&line) {
                Ok(Some(command)) => {
                    let quit = command == ViewCommand::Shutdown;
                    if cmd_tx.send(command).await.is_err() || quit {
                        break;
                    }
                }
                Ok(None) => {}
                Err(e) => eprintln!("{}", e),
            }
        }
        let _ = cmd_tx.send(ViewCommand::Shutdown).await;
    });

    tokio::select! {
        _ = tokio::signal::ctrl_c() => log::info!("Interrupted"),
        _ = input => {}
    }
    let _ = stop_tx.send(true);
    if let Err(e) = view.await {
        log::error!("View task failed: {}", e);
    }
    channel.disconnect().await;
    printer.abort();
    Ok(())
}
