use eyre::Result;
use indicatif::ProgressBar;
use serde::Deserialize;
use tracing::warn;
use url::Url;

use crate::checkpoint::CheckpointStore;
use crate::error::FetchError;
use crate::fetcher::PageFetcher;
use crate::model::{Conversation, RawChat, RawMember};

/// Member names shown before a one-on-one chat name is cut short.
const MAX_NAMED_MEMBERS: usize = 7;

/// `<base>/<chat id>/<leaf>`.
pub fn chat_url(base: &Url, chat_id: &str, leaf: &str) -> String {
    let mut url = base.clone();
    if let Ok(mut segments) = url.path_segments_mut() {
        segments.pop_if_empty().push(chat_id).push(leaf);
    }
    url.to_string()
}

/// Checks a credential by asking for the first chat only.
pub fn probe<F: PageFetcher>(fetcher: &F, base: &Url) -> Result<(), FetchError> {
    fetcher.fetch(base.as_str(), &[("$top", "1")]).map(|_| ())
}

/// Walks the listing endpoint and names every chat.
pub fn list_conversations<F: PageFetcher>(
    fetcher: &F,
    base: &Url,
    page_size: u32,
    pb: &ProgressBar,
) -> Result<Vec<Conversation>, FetchError> {
    let top = page_size.to_string();
    let mut chats: Vec<(Conversation, bool)> = Vec::new();
    let mut url = base.to_string();
    let mut params: Vec<(&str, &str)> = vec![("$top", top.as_str())];

    loop {
        let page = fetcher.fetch(&url, &params)?;
        for record in &page.records {
            match RawChat::deserialize(record) {
                Ok(raw) => {
                    let unnamed = raw.topic.is_none();
                    chats.push((
                        Conversation {
                            id: raw.id,
                            name: raw.topic.unwrap_or_default(),
                            full_name: None,
                            created: raw.created_date_time,
                            updated: raw.last_updated_date_time,
                            chat_type: raw.chat_type,
                        },
                        unnamed,
                    ));
                }
                Err(e) => warn!(error = %e, %record, "skipping malformed chat record"),
            }
        }
        pb.set_message(format!("Loaded {} chats", chats.len()));
        match page.next_url {
            Some(next) => {
                url = next;
                params.clear();
            }
            None => break,
        }
    }

    let unnamed = chats.iter().filter(|(_, u)| *u).count();
    pb.println(format!(
        "Done, found {} chats. Loading names of the {} one on one chats",
        chats.len(),
        unnamed
    ));

    let mut i = 0;
    for (chat, is_unnamed) in chats.iter_mut() {
        if !*is_unnamed {
            continue;
        }
        i += 1;
        pb.set_message(format!("Loading names {i}/{unnamed}"));
        match member_names(fetcher, base, &chat.id) {
            Ok(names) => apply_member_names(chat, &names),
            Err(e) if e.is_auth() => return Err(e),
            Err(e) => {
                let name = format!("OneToOne chat {i}");
                warn!(error = %e, "could not get members of one to one chat {i}, using name {name:?}");
                chat.name = name;
            }
        }
    }

    Ok(chats.into_iter().map(|(c, _)| c).collect())
}

fn member_names<F: PageFetcher>(
    fetcher: &F,
    base: &Url,
    chat_id: &str,
) -> Result<Vec<String>, FetchError> {
    let page = fetcher.fetch(&chat_url(base, chat_id, "members"), &[])?;
    Ok(page
        .records
        .iter()
        .map(|r| {
            RawMember::deserialize(r)
                .ok()
                .and_then(|m| m.display_name)
                .unwrap_or_else(|| "unknown".to_string())
        })
        .collect())
}

fn apply_member_names(chat: &mut Conversation, names: &[String]) {
    if names.len() > MAX_NAMED_MEMBERS {
        let short = names[..MAX_NAMED_MEMBERS].join("; ");
        let token = uuid::Uuid::new_v4().simple().to_string();
        chat.full_name = Some(names.join("; "));
        chat.name = format!("{short}; et.al.{}", &token[..8]);
    } else {
        chat.name = names.join("; ");
    }
}

/// Cached chat list, or a fresh listing saved to the cache.
pub fn load_conversations<F: PageFetcher>(
    fetcher: &F,
    store: &CheckpointStore,
    base: &Url,
    page_size: u32,
    refresh: bool,
    pb: &ProgressBar,
) -> Result<Vec<Conversation>> {
    if !refresh {
        let cached = store.cached_chat_list()?;
        if !cached.is_empty() {
            tracing::info!(count = cached.len(), "using cached chat list");
            return Ok(cached);
        }
    }
    let chats = list_conversations(fetcher, base, page_size, pb)?;
    store.save_chat_list(&chats)?;
    Ok(chats)
}

/// First chat whose name contains `needle`, ignoring case.
pub fn find_conversation<'a>(chats: &'a [Conversation], needle: &str) -> Option<&'a Conversation> {
    let needle = needle.trim().to_lowercase();
    chats
        .iter()
        .find(|c| c.name.to_lowercase().contains(&needle))
}
