//! History command implementation.

use super::format_message;
use minicord_protocol::{ChannelId, Message, MessageId};
use minicord_sync::{
    ClientConfig, Credentials, HistoryFetcher, HttpHistoryFetcher, MessageStore, PaginationCursor,
};
use serde::Serialize;
use tracing::debug;

/// History output for `--format json`.
#[derive(Debug, Serialize)]
pub struct HistoryOutput<'a> {
    /// Channel read.
    pub channel_id: ChannelId,
    /// Whether older messages remain.
    pub has_more: bool,
    /// Messages, oldest first.
    pub messages: &'a [Message],
}

/// Runs the history command.
pub async fn run(
    config: &ClientConfig,
    credentials: Credentials,
    channel_id: ChannelId,
    before: Option<MessageId>,
    all: bool,
    format: &str,
) -> Result<(), Box<dyn std::error::Error>> {
    let fetcher = HttpHistoryFetcher::new(config, credentials)?;
    let (store, cursor) = collect_pages(&fetcher, channel_id, before, config.page_limit, all).await?;

    match format {
        "json" => {
            let output = HistoryOutput {
                channel_id,
                has_more: cursor.has_more,
                messages: store.all(),
            };
            println!("{}", serde_json::to_string_pretty(&output)?);
        }
        _ => {
            for message in store.all() {
                println!("{}", format_message(message));
            }
            if let (true, Some(oldest)) = (cursor.has_more, &cursor.oldest_loaded_id) {
                println!("-- older messages remain, continue with --before {oldest}");
            } else {
                println!("-- start of channel");
            }
        }
    }

    Ok(())
}

/// Fetches one page, or every page when `all` is set.
async fn collect_pages(
    fetcher: &dyn HistoryFetcher,
    channel_id: ChannelId,
    before: Option<MessageId>,
    limit: u32,
    all: bool,
) -> Result<(MessageStore, PaginationCursor), Box<dyn std::error::Error>> {
    let mut store = MessageStore::new();
    let mut cursor = PaginationCursor::new(channel_id);
    cursor.oldest_loaded_id = before;

    loop {
        let page = fetcher
            .fetch_page(channel_id, cursor.oldest_loaded_id.as_ref(), limit)
            .await?;
        cursor.record_page(page.len(), limit);
        let inserted = store.merge_older(page);
        if let Some(oldest) = store.oldest() {
            cursor.oldest_loaded_id = Some(oldest.id.clone());
        }
        debug!(%channel_id, inserted, has_more = cursor.has_more, "history page");

        if !all || !cursor.has_more {
            break;
        }
    }

    Ok((store, cursor))
}
