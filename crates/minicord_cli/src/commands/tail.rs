//! Tail command implementation.

use super::format_message;
use minicord_protocol::{Message, MessageId};
use minicord_sync::{
    ChannelRef, ClientConfig, ConnectionManager, ConnectionState, Credentials, DetachedViewport,
    HttpHistoryFetcher, PageOutcome, SyncCoordinator, SyncEvent,
};
use std::collections::HashSet;
use std::sync::Arc;
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::sync::broadcast::error::RecvError;
use tracing::{info, warn};

/// Runs the tail command until Ctrl-C or the connection closes.
pub async fn run(
    config: ClientConfig,
    credentials: Credentials,
    channel: ChannelRef,
    backfill: u32,
) -> Result<(), Box<dyn std::error::Error>> {
    let fetcher = Arc::new(HttpHistoryFetcher::new(&config, credentials.clone())?);
    let connection = ConnectionManager::new(config.reconnect.clone()).connect(
        &config.ws_endpoint,
        &credentials,
        Some(channel.channel_id),
    )?;
    let sync = SyncCoordinator::new(config, fetcher, connection.clone());
    let mut events = sync.subscribe();
    let mut states = connection.watch_state();

    sync.activate(channel).await?;
    for _ in 0..backfill {
        match sync.load_older(&mut DetachedViewport).await? {
            PageOutcome::Loaded { has_more: true, .. } => {}
            _ => break,
        }
    }
    // Events queued during activation and backfill repeat the snapshot.
    let snapshot = sync.messages();
    let shown: HashSet<MessageId> = snapshot.iter().map(|m| m.id.clone()).collect();
    for message in &snapshot {
        println!("{}", format_message(message));
    }
    info!(%channel, loaded = sync.len(), "following channel");

    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    let mut stdin_open = true;
    loop {
        tokio::select! {
            event = events.recv() => match event {
                Ok(SyncEvent::Deactivated { .. }) | Err(RecvError::Closed) => break,
                Ok(event) => {
                    if let Some(message) = newly_appended(&event, &shown) {
                        println!("{}", format_message(message));
                    }
                }
                Err(RecvError::Lagged(skipped)) => warn!(skipped, "display fell behind"),
            },
            changed = states.changed() => {
                if changed.is_err() {
                    break;
                }
                let state = *states.borrow_and_update();
                eprintln!("-- connection {state}");
                if state == ConnectionState::Closed {
                    break;
                }
            }
            line = lines.next_line(), if stdin_open => match line? {
                Some(line) if line.trim().is_empty() => {}
                Some(line) => {
                    if let Err(err) = sync.send(&line).await {
                        warn!(error = %err, "message not sent");
                    }
                }
                None => stdin_open = false,
            },
            _ = tokio::signal::ctrl_c() => break,
        }
    }

    sync.deactivate();
    connection.close();
    Ok(())
}

/// Returns the message an `Appended` event adds, unless it was already shown.
fn newly_appended<'a>(event: &'a SyncEvent, shown: &HashSet<MessageId>) -> Option<&'a Message> {
    match event {
        SyncEvent::Appended { message, .. } if !shown.contains(&message.id) => Some(message),
        _ => None,
    }
}
