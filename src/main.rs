use std::collections::BTreeSet;
use std::fmt::Write as _;
use std::process::ExitCode;
use std::sync::Arc;

use clap::Parser;
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::sync::{mpsc, watch};
use tracing::{info, warn};

use taskboard_sync::api::FetchQuery;
use taskboard_sync::config::{ClientConfig, SyncConfig};
use taskboard_sync::consts::CHANNEL_CAPACITY;
use taskboard_sync::driver::{Command, Driver, DriverHandle};
use taskboard_sync::feed::PushFeed;
use taskboard_sync::http::HttpBoardApi;
use taskboard_sync::item::{Slot, Status, WorkItemId};
use taskboard_sync::store::BoardSnapshot;

#[cfg(test)]
#[path = "main_test.rs"]
mod main_test;

/// One line of stdin.
#[derive(Debug, PartialEq, Eq)]
enum Input {
    Move { id: WorkItemId, slot: Slot },
    Refresh,
    Show,
    Quit,
}

fn parse_input(line: &str) -> Result<Input, String> {
    let mut words = line.split_whitespace();
    match words.next() {
        Some("move") => {
            let (Some(id), Some(status), Some(index)) = (words.next(), words.next(), words.next()) else {
                return Err("usage: move <id> <status> <index>".into());
            };
            let status: Status = status.parse().map_err(|e| format!("{e}"))?;
            let index: usize = index.parse().map_err(|_| format!("invalid index: {index}"))?;
            Ok(Input::Move { id: WorkItemId::new(id), slot: Slot::new(status, index) })
        }
        Some("refresh") => Ok(Input::Refresh),
        Some("show") => Ok(Input::Show),
        Some("quit" | "exit") => Ok(Input::Quit),
        Some(other) => Err(format!("unknown command: {other}")),
        None => Err("empty command".into()),
    }
}

/// A move from the terminal is a complete gesture: pick up, hover, release.
fn gesture(id: WorkItemId, slot: Slot) -> [Command; 3] {
    [
        Command::BeginDrag(id),
        Command::Hover(Some(slot)),
        Command::Drop { target: Some(slot), mounted: None },
    ]
}

fn render_board(view: &BoardSnapshot, busy: &BTreeSet<WorkItemId>) -> String {
    let mut out = String::new();
    for status in Status::ALL {
        let cards: Vec<String> = view
            .column(status)
            .iter()
            .map(|id| {
                let mut card = if busy.contains(id) { format!("{id}*") } else { id.to_string() };
                let title = view.get(id).map_or("", |item| item.meta().title());
                if !title.is_empty() {
                    card.push_str(&format!(" ({title})"));
                }
                card
            })
            .collect();
        // Writing to a String cannot fail.
        if writeln!(out, "{status:>12}: {}", cards.join(", ")).is_err() {
            break;
        }
    }
    out
}

async fn read_commands(
    commands: mpsc::Sender<Command>,
    view: watch::Receiver<Arc<BoardSnapshot>>,
    busy: watch::Receiver<BTreeSet<WorkItemId>>,
) {
    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    loop {
        let line = match lines.next_line().await {
            Ok(Some(line)) => line,
            Ok(None) => break,
            Err(err) => {
                warn!(%err, "stdin read failed");
                break;
            }
        };
        if line.trim().is_empty() {
            continue;
        }
        let outgoing: Vec<Command> = match parse_input(&line) {
            Ok(Input::Move { id, slot }) => gesture(id, slot).into(),
            Ok(Input::Refresh) => vec![Command::Refresh],
            Ok(Input::Show) => {
                print!("{}", render_board(&view.borrow(), &busy.borrow()));
                continue;
            }
            Ok(Input::Quit) => break,
            Err(message) => {
                eprintln!("{message}");
                continue;
            }
        };
        for command in outgoing {
            if commands.send(command).await.is_err() {
                return;
            }
        }
    }
    if commands.send(Command::Shutdown).await.is_err() {
        info!("driver already stopped");
    }
}

#[tokio::main(flavor = "current_thread")]
async fn main() -> ExitCode {
    tracing_subscriber::fmt::init();

    let config = match ClientConfig::parse().validated() {
        Ok(config) => config,
        Err(err) => {
            eprintln!("{err}");
            return ExitCode::from(2);
        }
    };
    let sync_config = SyncConfig::from_env();
    let api = match HttpBoardApi::new(&config) {
        Ok(api) => Arc::new(api),
        Err(err) => {
            eprintln!("{err}");
            return ExitCode::FAILURE;
        }
    };

    let (feed_tx, feed_rx) = mpsc::channel(CHANNEL_CAPACITY);
    let feed = tokio::spawn(PushFeed::new(&config, Arc::clone(&api)).run(feed_tx));

    let query = FetchQuery { assignee: config.assignee.clone(), ..FetchQuery::board(config.board_id.clone()) };
    let (driver, handle) = Driver::new(&sync_config, api, query, feed_rx);
    let DriverHandle { commands, view, busy, mut notices, .. } = handle;

    let mut updates = view.clone();
    let input = tokio::spawn(read_commands(commands, view, busy));
    let watcher = tokio::spawn(async move {
        while updates.changed().await.is_ok() {
            let board = Arc::clone(&updates.borrow_and_update());
            info!(items = board.len(), "board updated");
        }
    });
    let printer = tokio::spawn(async move {
        while let Some(notice) = notices.recv().await {
            eprintln!("! {} ({})", notice.message, notice.code);
        }
    });

    info!(board_id = %config.board_id, base_url = %config.base_url, "taskboard sync starting");
    driver.run().await;

    feed.abort();
    input.abort();
    watcher.abort();
    printer.abort();
    ExitCode::SUCCESS
}
