//! Resumable download of one conversation.
//!
//! The loop fetches pages newest-first, classifies every record, buffers the
//! accepted messages and checkpoints the server cursor after each page. The
//! checkpoint is written before any stop condition is evaluated, so a crash
//! loses at most the unflushed buffer, never the cursor position.
use chrono::NaiveDate;
use indicatif::ProgressBar;
use tracing::{info, warn};
use url::Url;

use crate::archive::ArchiveWriter;
use crate::checkpoint::CheckpointStore;
use crate::error::{DownloadError, FetchError};
use crate::fetcher::PageFetcher;
use crate::listing::chat_url;
use crate::model::{Classified, Conversation, Message, classify};
use crate::prompt::Decider;

/// Buffered messages above this count are flushed to the archive mid-run.
pub const SAVE_EVERY: usize = 250;

#[derive(Debug, Clone)]
pub struct DownloadOptions {
    /// `Some(0)` stops before the first request.
    pub max_messages: Option<u64>,
    /// Messages dated strictly before this day stop the download.
    pub oldest_date: Option<NaiveDate>,
    /// Ask before every N-th further request; `<= 0` never asks.
    pub ask_continue: i64,
    /// Return immediately for conversations that were read to the end.
    pub skip_downloaded: bool,
    pub page_size: u32,
}

impl Default for DownloadOptions {
    fn default() -> Self {
        Self {
            max_messages: None,
            oldest_date: None,
            ask_continue: crate::utils::DEFAULT_ASK_CONTINUE,
            skip_downloaded: false,
            page_size: crate::utils::DEFAULT_PAGE_SIZE,
        }
    }
}

/// Why a download ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StopReason {
    /// Checkpoint says the conversation is complete and no re-run was wanted.
    AlreadyDownloaded,
    /// `max_messages` accepted messages were collected.
    MaxMessages,
    /// A message older than `oldest_date` was reached.
    OldestDate,
    /// The server returned no further cursor.
    Exhausted,
    /// The continue gate was answered with no.
    Declined,
    /// The server refused access to this conversation.
    Forbidden,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DownloadReport {
    pub reason: StopReason,
    /// Messages accepted during this run.
    pub messages: u64,
    /// Archive entries written during this run.
    pub written: usize,
    /// Requests issued during this run.
    pub requests: u64,
}

/// Where the first request goes.
#[derive(Debug, Clone, PartialEq, Eq)]
enum Start {
    FirstPage,
    Cursor { url: String, requests_done: u64 },
}

/// Counters and buffer of one running download.
#[derive(Debug)]
struct LoopState {
    url: String,
    first_page: bool,
    /// Number of the request in flight, continuing a resumed checkpoint's count.
    request_no: u64,
    issued: u64,
    since_confirm: i64,
    accepted: u64,
    written: usize,
    buffer: Vec<Message>,
}

impl LoopState {
    fn new(url: String, first_page: bool, requests_done: u64) -> Self {
        Self {
            url,
            first_page,
            request_no: requests_done + 1,
            issued: 0,
            since_confirm: 1,
            accepted: 0,
            written: 0,
            buffer: Vec::new(),
        }
    }
}

/// Page outcome after filtering.
enum PageStop {
    Continue,
    MaxMessages,
    OldestDate,
}

pub struct Downloader<'a, F, D> {
    fetcher: &'a F,
    decider: &'a mut D,
    store: &'a CheckpointStore,
    archive: &'a ArchiveWriter,
    base: &'a Url,
    pb: &'a ProgressBar,
}

impl<'a, F: PageFetcher, D: Decider> Downloader<'a, F, D> {
    pub fn new(
        fetcher: &'a F,
        decider: &'a mut D,
        store: &'a CheckpointStore,
        archive: &'a ArchiveWriter,
        base: &'a Url,
        pb: &'a ProgressBar,
    ) -> Self {
        Self {
            fetcher,
            decider,
            store,
            archive,
            base,
            pb,
        }
    }

    pub fn download(
        &mut self,
        chat: &Conversation,
        opts: &DownloadOptions,
    ) -> Result<DownloadReport, DownloadError> {
        let start = match self.resume_point(chat, opts)? {
            Some(start) => start,
            None => {
                return Ok(DownloadReport {
                    reason: StopReason::AlreadyDownloaded,
                    messages: 0,
                    written: 0,
                    requests: 0,
                });
            }
        };

        self.pb.println(format!("Downloading chat {}", chat.name));
        let mut state = match start {
            Start::FirstPage => LoopState::new(chat_url(self.base, &chat.id, "messages"), true, 0),
            Start::Cursor { url, requests_done } => LoopState::new(url, false, requests_done),
        };

        let result = self.run(chat, opts, &mut state);
        // Pages behind the buffer are already checkpointed: keep them on every path.
        let flushed = self.flush(chat, &mut state);

        let reason = match result {
            Ok(reason) => reason,
            Err(DownloadError::Fetch(FetchError::Forbidden(msg))) => {
                warn!(chat = %chat.name, reason = %msg, "cannot download chat, skipping");
                self.pb
                    .println(format!("Cannot download chat {}. Skipping", chat.name));
                StopReason::Forbidden
            }
            Err(e) => {
                if let Err(flush_err) = flushed {
                    warn!(chat = %chat.name, error = %flush_err, "failed to flush buffered messages");
                }
                return Err(e);
            }
        };
        flushed?;

        match reason {
            StopReason::Exhausted => self.pb.println(format!(
                "Chat download complete. File is saved in the folder {}",
                self.archive.dir().display()
            )),
            StopReason::MaxMessages => self.pb.println(format!(
                "Stopping since {} messages were downloaded.",
                state.accepted
            )),
            StopReason::OldestDate => {
                if let Some(date) = opts.oldest_date {
                    self.pb.println(format!(
                        "Stopping since downloaded messages older than {date}"
                    ));
                }
            }
            _ => {}
        }
        info!(
            chat = %chat.name,
            messages = state.accepted,
            requests = state.issued,
            ?reason,
            "download finished"
        );
        self.pb.println(format!(
            "Done. Total {} downloaded in {} requests.",
            state.accepted, state.issued
        ));

        Ok(DownloadReport {
            reason,
            messages: state.accepted,
            written: state.written,
            requests: state.issued,
        })
    }

    /// `None` when the conversation should not be downloaded at all.
    fn resume_point(
        &mut self,
        chat: &Conversation,
        opts: &DownloadOptions,
    ) -> Result<Option<Start>, DownloadError> {
        let Some(checkpoint) = self.store.get(&chat.id)? else {
            return Ok(Some(Start::FirstPage));
        };
        match checkpoint.next_cursor {
            Some(url) => {
                self.pb.println(format!(
                    "Found previous work on this chat. Downloaded {} requests",
                    checkpoint.requests_done
                ));
                let resume = self
                    .pb
                    .suspend(|| self.decider.confirm("Continue from it?", false));
                if resume {
                    Ok(Some(Start::Cursor {
                        url,
                        requests_done: checkpoint.requests_done,
                    }))
                } else {
                    Ok(Some(Start::FirstPage))
                }
            }
            None => {
                if opts.skip_downloaded
                    || !self.pb.suspend(|| {
                        self.decider
                            .confirm("Chat already downloaded. Continue anyway?", true)
                    })
                {
                    info!(chat = %chat.name, "already downloaded");
                    Ok(None)
                } else {
                    Ok(Some(Start::FirstPage))
                }
            }
        }
    }

    fn run(
        &mut self,
        chat: &Conversation,
        opts: &DownloadOptions,
        state: &mut LoopState,
    ) -> Result<StopReason, DownloadError> {
        if opts.max_messages == Some(0) {
            return Ok(StopReason::MaxMessages);
        }
        let top = opts.page_size.to_string();
        let first_params = [("$top", top.as_str())];
        loop {
            let params: &[(&str, &str)] = if state.first_page {
                &first_params
            } else {
                &[]
            };
            let page = self.fetcher.fetch(&state.url, params)?;
            state.issued += 1;

            let stop = self.consume(&page.records, opts, state);

            if state.buffer.len() > SAVE_EVERY {
                self.flush(chat, state)?;
            }
            self.store
                .save(&chat.id, page.next_url.as_deref(), state.request_no)?;

            match stop {
                PageStop::MaxMessages => return Ok(StopReason::MaxMessages),
                PageStop::OldestDate => return Ok(StopReason::OldestDate),
                PageStop::Continue => {}
            }
            let Some(next) = page.next_url else {
                return Ok(StopReason::Exhausted);
            };

            if opts.ask_continue > 0 && state.since_confirm >= opts.ask_continue {
                let question = format!(
                    "Done {} requests loading {} messages. Continue?",
                    state.issued, state.accepted
                );
                if !self.pb.suspend(|| self.decider.confirm(&question, true)) {
                    return Ok(StopReason::Declined);
                }
                state.since_confirm = 0;
            }

            self.pb
                .set_message(format!("Downloaded messages: {}", state.accepted));
            self.pb.tick();
            state.request_no += 1;
            state.since_confirm += 1;
            state.url = next;
            state.first_page = false;
        }
    }

    /// Buffers the page's messages until a cutoff fires.
    fn consume(
        &self,
        records: &[serde_json::Value],
        opts: &DownloadOptions,
        state: &mut LoopState,
    ) -> PageStop {
        let too_old = |date: NaiveDate| opts.oldest_date.is_some_and(|oldest| date < oldest);
        for record in records {
            let (message, date) = match classify(record) {
                Ok(Classified::Message { message, date }) => (message, date),
                Ok(Classified::Event) => continue,
                Err(e) if e.date.is_some_and(too_old) => return PageStop::OldestDate,
                Err(e) => {
                    warn!(error = %e, %record, "skipping record");
                    continue;
                }
            };
            if too_old(date) {
                return PageStop::OldestDate;
            }
            state.buffer.push(message);
            state.accepted += 1;
            if opts.max_messages.is_some_and(|max| state.accepted >= max) {
                return PageStop::MaxMessages;
            }
        }
        PageStop::Continue
    }

    fn flush(&self, chat: &Conversation, state: &mut LoopState) -> Result<(), DownloadError> {
        if state.buffer.is_empty() {
            return Ok(());
        }
        state.written += self.archive.flush(&chat.name, &state.buffer, false)?;
        state.buffer.clear();
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::fetcher::Page;
    use serde_json::{Value, json};
    use std::cell::RefCell;
    use tempfile::TempDir;

    fn msg(i: u32, date: &str) -> Value {
        json!({
            "messageType": "message",
            "createdDateTime": format!("{date}T12:00:{:02}Z", i % 60),
            "from": { "user": { "displayName": format!("user{i}") } },
            "body": { "content": format!("body {i}") },
            "attachments": [],
        })
    }

    struct OnePage(RefCell<Vec<String>>, Page);

    impl PageFetcher for OnePage {
        fn fetch(&self, url: &str, params: &[(&str, &str)]) -> Result<Page, FetchError> {
            self.0
                .borrow_mut()
                .push(format!("{url}{}", if params.is_empty() { "" } else { "?p" }));
            Ok(self.1.clone())
        }
    }

    struct Never;

    impl Decider for Never {
        fn confirm(&mut self, _q: &str, _d: bool) -> bool {
            false
        }
        fn choose(&mut self, _p: &str, _o: &[String]) -> Option<usize> {
            None
        }
    }

    fn chat() -> Conversation {
        Conversation {
            id: "c1".into(),
            name: "Chat One".into(),
            full_name: None,
            created: String::new(),
            updated: String::new(),
            chat_type: "group".into(),
        }
    }

    #[test]
    fn consume_stops_on_cutoffs() {
        let dir = TempDir::new().unwrap();
        let store = CheckpointStore::new(dir.path().join("s.json"));
        let archive = ArchiveWriter::new(dir.path());
        let base = Url::parse("https://g/chats").unwrap();
        let fetcher = OnePage(RefCell::new(vec![]), Page::default());
        let pb = ProgressBar::hidden();
        let mut decider = Never;
        let dl = Downloader::new(&fetcher, &mut decider, &store, &archive, &base, &pb);

        let records = vec![
            msg(1, "2024-03-02"),
            json!({"messageType": "systemEventMessage"}),
            json!({"messageType": "message"}),
            msg(2, "2024-03-01"),
            msg(3, "2024-02-29"),
            msg(4, "2024-02-28"),
        ];
        let opts = DownloadOptions {
            oldest_date: NaiveDate::from_ymd_opt(2024, 3, 1),
            ..Default::default()
        };
        let mut state = LoopState::new(String::new(), true, 0);
        assert!(matches!(
            dl.consume(&records, &opts, &mut state),
            PageStop::OldestDate
        ));
        assert_eq!(state.accepted, 2);

        let opts = DownloadOptions {
            max_messages: Some(3),
            ..Default::default()
        };
        let mut state = LoopState::new(String::new(), true, 0);
        assert!(matches!(
            dl.consume(&records, &opts, &mut state),
            PageStop::MaxMessages
        ));
        assert_eq!(state.buffer.len(), 3);
        assert_eq!(state.buffer[2].body, "body 3");
    }

    #[test]
    fn cutoff_applies_to_records_without_sender() {
        let dir = TempDir::new().unwrap();
        let store = CheckpointStore::new(dir.path().join("s.json"));
        let archive = ArchiveWriter::new(dir.path());
        let base = Url::parse("https://g/chats").unwrap();
        let fetcher = OnePage(RefCell::new(vec![]), Page::default());
        let pb = ProgressBar::hidden();
        let mut decider = Never;
        let dl = Downloader::new(&fetcher, &mut decider, &store, &archive, &base, &pb);

        let mut orphan = msg(2, "2024-02-01");
        orphan["from"] = json!({ "user": null });
        let records = vec![msg(1, "2024-03-05"), orphan.clone(), msg(3, "2024-03-04")];
        let opts = DownloadOptions {
            oldest_date: NaiveDate::from_ymd_opt(2024, 3, 1),
            ..Default::default()
        };
        let mut state = LoopState::new(String::new(), true, 0);
        assert!(matches!(
            dl.consume(&records, &opts, &mut state),
            PageStop::OldestDate
        ));
        assert_eq!(state.accepted, 1);

        // Without a cutoff the same record is only skipped.
        let mut state = LoopState::new(String::new(), true, 0);
        assert!(matches!(
            dl.consume(&records, &DownloadOptions::default(), &mut state),
            PageStop::Continue
        ));
        assert_eq!(state.accepted, 2);
    }

    #[test]
    fn zero_limit_issues_no_request() {
        let dir = TempDir::new().unwrap();
        let store = CheckpointStore::new(dir.path().join("s.json"));
        let archive = ArchiveWriter::new(dir.path().join("chats"));
        let base = Url::parse("https://g/chats").unwrap();
        let fetcher = OnePage(RefCell::new(vec![]), Page::default());
        let pb = ProgressBar::hidden();
        let mut decider = Never;
        let opts = DownloadOptions {
            max_messages: Some(0),
            ..Default::default()
        };
        let report = Downloader::new(&fetcher, &mut decider, &store, &archive, &base, &pb)
            .download(&chat(), &opts)
            .unwrap();

        assert_eq!(report.reason, StopReason::MaxMessages);
        assert_eq!(report.requests, 0);
        assert!(fetcher.0.borrow().is_empty());
        assert!(store.get("c1").unwrap().is_none());
    }

    #[test]
    fn first_request_carries_page_size() {
        let dir = TempDir::new().unwrap();
        let store = CheckpointStore::new(dir.path().join("s.json"));
        let archive = ArchiveWriter::new(dir.path());
        let base = Url::parse("https://g/chats").unwrap();
        let fetcher = OnePage(
            RefCell::new(vec![]),
            Page {
                records: vec![msg(1, "2024-01-01")],
                next_url: None,
            },
        );
        let pb = ProgressBar::hidden();
        let mut decider = Never;
        let report = Downloader::new(&fetcher, &mut decider, &store, &archive, &base, &pb)
            .download(&chat(), &DownloadOptions::default())
            .unwrap();

        assert_eq!(report.reason, StopReason::Exhausted);
        assert_eq!(report.requests, 1);
        assert_eq!(fetcher.0.borrow().as_slice(), ["https://g/chats/c1/messages?p"]);
        let cp = store.get("c1").unwrap().unwrap();
        assert!(cp.is_exhausted());
        assert_eq!(cp.requests_done, 1);
    }
}
