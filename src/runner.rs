use eyre::{Result, eyre};
use indicatif::{ProgressBar, ProgressStyle};
use std::time::Duration;

use crate::archive::ArchiveWriter;
use crate::checkpoint::CheckpointStore;
use crate::download::{DownloadOptions, Downloader, StopReason};
use crate::error::{DownloadError, FetchError};
use crate::fetcher::PageFetcher;
use crate::listing::{find_conversation, load_conversations};
use crate::model::Conversation;
use crate::prompt::Decider;
use crate::utils::{ExportConfig, ProcessResult};

/// Which conversations a run downloads.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Selection {
    /// First conversation whose name contains the substring.
    Name(String),
    All,
    /// Let the decider pick one.
    Interactive,
}

#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct RunSummary {
    pub downloaded: usize,
    pub skipped: usize,
    pub forbidden: usize,
    pub errors: usize,
}

impl RunSummary {
    fn record(&mut self, result: ProcessResult) {
        match result {
            ProcessResult::Downloaded => self.downloaded += 1,
            ProcessResult::Skipped => self.skipped += 1,
            ProcessResult::Forbidden => self.forbidden += 1,
        }
    }

    /// Counts one conversation's result. Only credential failures end the run.
    fn tally(&mut self, chat: &Conversation, result: Result<ProcessResult>) -> Result<()> {
        match result {
            Ok(r) => self.record(r),
            Err(e) if is_auth(&e) => return Err(e),
            Err(e) => {
                self.errors += 1;
                eprintln!("Error [{}]: {:#}", chat.name, e);
            }
        }
        Ok(())
    }
}

fn spinner(quiet: bool) -> ProgressBar {
    if quiet {
        return ProgressBar::hidden();
    }
    let s = ProgressBar::new_spinner();
    if let Ok(style) = ProgressStyle::with_template("{spinner:.green} {msg}") {
        s.set_style(style.tick_strings(&["⠋", "⠙", "⠹", "⠸", "⠼", "⠴", "⠦", "⠧", "⠇", "⠏"]));
    }
    s.enable_steady_tick(Duration::from_millis(80));
    s
}

/// The main entry point for the business logic.
/// Lists conversations, then downloads the selected ones one at a time.
pub fn execute<F: PageFetcher, D: Decider>(
    config: &ExportConfig,
    fetcher: &F,
    decider: &mut D,
    selection: Selection,
) -> Result<RunSummary> {
    let store = CheckpointStore::new(&config.state_path);
    let archive = ArchiveWriter::new(&config.target_dir);

    let pb = spinner(config.quiet);
    pb.set_message("Loading chats");
    let chats = load_conversations(
        fetcher,
        &store,
        &config.graph_url,
        config.page_size,
        config.refresh_chats,
        &pb,
    )?;
    pb.finish_and_clear();

    let opts = DownloadOptions {
        max_messages: config.max_messages,
        oldest_date: config.oldest_date,
        ask_continue: config.ask_continue,
        skip_downloaded: false,
        page_size: config.page_size,
    };
    let mut summary = RunSummary::default();

    let selected: Option<&Conversation> = match selection {
        Selection::All => {
            let bulk = DownloadOptions {
                ask_continue: -1,
                skip_downloaded: true,
                ..opts.clone()
            };
            for chat in &chats {
                let pb = spinner(config.quiet);
                let result = download_one(config, fetcher, decider, &store, &archive, &pb, chat, &bulk);
                pb.finish_and_clear();
                summary.tally(chat, result)?;
                if !config.quiet {
                    eprintln!("----");
                }
            }
            None
        }
        Selection::Name(name) => match find_conversation(&chats, &name) {
            Some(chat) => {
                if !config.quiet {
                    eprintln!("Found chat titled {}", chat.name);
                }
                Some(chat)
            }
            None => {
                eprintln!("No chat found containing name {name:?}");
                if decider.confirm("List all chats?", false) {
                    choose(&chats, decider)
                } else {
                    None
                }
            }
        },
        Selection::Interactive => choose(&chats, decider),
    };

    if let Some(chat) = selected {
        let pb = spinner(config.quiet);
        let result = download_one(config, fetcher, decider, &store, &archive, &pb, chat, &opts);
        pb.finish_and_clear();
        summary.tally(chat, result)?;
    }

    if !config.quiet {
        let mut line = format!(
            "Done. {} downloaded, {} skipped, {} forbidden.",
            summary.downloaded, summary.skipped, summary.forbidden
        );
        if summary.errors > 0 {
            line.push_str(&format!(" Completed with {} error(s).", summary.errors));
        }
        eprintln!("{}", line);
    }

    Ok(summary)
}

fn choose<'a, D: Decider>(chats: &'a [Conversation], decider: &mut D) -> Option<&'a Conversation> {
    let options: Vec<String> = chats
        .iter()
        .map(|c| {
            let update = c
                .last_update()
                .map(|d| d.to_string())
                .unwrap_or_else(|| c.updated.clone());
            format!("Last update {}: {}", update, c.name)
        })
        .collect();
    decider
        .choose("Select the chat to download", &options)
        .and_then(|i| chats.get(i))
}

#[allow(clippy::too_many_arguments)]
fn download_one<F: PageFetcher, D: Decider>(
    config: &ExportConfig,
    fetcher: &F,
    decider: &mut D,
    store: &CheckpointStore,
    archive: &ArchiveWriter,
    pb: &ProgressBar,
    chat: &Conversation,
    opts: &DownloadOptions,
) -> Result<ProcessResult> {
    let report = Downloader::new(fetcher, decider, store, archive, &config.graph_url, pb)
        .download(chat, opts)
        .map_err(|e| match e {
            DownloadError::Fetch(f) => eyre::Report::new(f),
            DownloadError::Io(r) => r,
        })?;

    Ok(match report.reason {
        StopReason::AlreadyDownloaded => ProcessResult::Skipped,
        StopReason::Forbidden => ProcessResult::Forbidden,
        StopReason::MaxMessages
        | StopReason::OldestDate
        | StopReason::Exhausted
        | StopReason::Declined => ProcessResult::Downloaded,
    })
}

fn is_auth(report: &eyre::Report) -> bool {
    report
        .downcast_ref::<FetchError>()
        .is_some_and(FetchError::is_auth)
}

/// Turns a fatal credential failure into the message shown to the user.
pub fn explain(report: eyre::Report) -> eyre::Report {
    if is_auth(&report) {
        eyre!("{report:#}\nThe access token is invalid or expired. Obtain a new one and retry.")
    } else {
        report
    }
}
