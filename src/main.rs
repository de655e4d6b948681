use chrono::NaiveDate;
use clap::Parser;
use eyre::{Context, Result, eyre};
use serde::Deserialize;
use std::fs;
use dialoguer::Password;
use std::io;
use std::path::{Path, PathBuf};
use tracing_subscriber::EnvFilter;
use url::Url;

use teams_chat_export::credentials::{TOKEN_HELP, TokenStore};
use teams_chat_export::utils::{
    DEFAULT_ASK_CONTINUE, DEFAULT_GRAPH_URL, DEFAULT_PAGE_SIZE, ExportConfig,
};
use teams_chat_export::{
    AutoDecider, ConsoleDecider, Credential, FetchError, GraphClient, Selection, listing, runner,
};

const APP_DIR: &str = "teams-chat-export";

/// Export Microsoft Teams chat history to Markdown files.
/// Interrupted downloads resume from the last fetched page.
#[derive(Parser)]
#[command(author, version, about, long_about = None)]
struct Cli {
    /// Directory to write the chat archives to.
    /// Defaults to ./chats if not set in config.
    #[arg(value_name = "TARGET_DIR")]
    target_dir: Option<PathBuf>,

    /// Download the first chat whose name contains this text.
    #[arg(long, conflicts_with = "download_all")]
    name: Option<String>,

    /// Download all the chats.
    #[arg(long)]
    download_all: bool,

    /// Download at most this number of messages per chat.
    #[arg(long, value_parser = clap::value_parser!(u64).range(1..))]
    max_messages: Option<u64>,

    /// Download messages up to this date, inclusive (YYYY-MM-DD).
    #[arg(long, value_name = "DATE")]
    oldest_date: Option<NaiveDate>,

    /// Ask whether to continue after this number of requests. Set to -1 to disable.
    /// Defaults to 100 if not set in config.
    #[arg(long, value_name = "N", allow_negative_numbers = true)]
    ask_continue: Option<i64>,

    /// Path to the progress/state file.
    /// Defaults to $XDG_DATA_HOME/teams-chat-export/state.json
    #[arg(long, value_name = "PATH")]
    state: Option<PathBuf>,

    /// Path to a specific configuration file.
    /// Defaults to $XDG_CONFIG_HOME/teams-chat-export/config.toml
    #[arg(long, value_name = "PATH")]
    config: Option<PathBuf>,

    /// Graph access token. Stored credentials are used if omitted.
    #[arg(long, env = "TEAMS_EXPORT_TOKEN", hide_env_values = true)]
    token: Option<String>,

    /// Ignore the cached chat list and fetch it again.
    #[arg(long)]
    refresh_chats: bool,

    /// Answer yes to every question (resume, continue).
    #[arg(short, long)]
    yes: bool,

    /// Log what is being fetched and written.
    #[arg(short, long)]
    verbose: bool,

    /// Suppress standard output (progress spinners).
    #[arg(short, long, conflicts_with = "verbose")]
    quiet: bool,
}

#[derive(Deserialize, Default)]
struct FileConfig {
    target_dir: Option<PathBuf>,
    state_path: Option<PathBuf>,
    graph_url: Option<Url>,
    page_size: Option<u32>,
    ask_continue: Option<i64>,
}

fn default_state_path() -> PathBuf {
    dirs::data_local_dir()
        .map(|d| d.join(APP_DIR).join("state.json"))
        .unwrap_or_else(|| PathBuf::from(".teams-chat-export.json"))
}

fn default_credentials_path() -> PathBuf {
    dirs::config_dir()
        .map(|d| d.join(APP_DIR).join("credentials.json"))
        .unwrap_or_else(|| PathBuf::from(".teams-chat-export-credentials.json"))
}

fn load_file_config(explicit_path: Option<&Path>) -> Result<FileConfig> {
    let path = if let Some(p) = explicit_path {
        if !p.exists() {
            return Err(eyre!("Config file not found: {}", p.display()));
        }
        Some(p.to_path_buf())
    } else {
        // Search: XDG/OS config dir, then nothing
        dirs::config_dir()
            .map(|d| d.join(APP_DIR).join("config.toml"))
            .filter(|p| p.exists())
    };

    match path {
        None => Ok(FileConfig::default()),
        Some(p) => {
            let content = fs::read_to_string(&p)
                .wrap_err_with(|| format!("Failed to read config: {}", p.display()))?;
            toml::from_str(&content)
                .wrap_err_with(|| format!("Failed to parse config: {}", p.display()))
        }
    }
}

fn init_tracing(verbose: bool, quiet: bool) {
    let default = if verbose {
        "info"
    } else if quiet {
        "error"
    } else {
        "warn"
    };
    tracing_subscriber::fmt()
        .with_writer(io::stderr)
        .with_target(false)
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default)),
        )
        .init();
}

/// CLI/env token > stored token > interactive prompt (validated, then stored).
fn resolve_credential(explicit: Option<String>, store: &TokenStore, base: &Url) -> Result<Credential> {
    if let Some(token) = explicit.filter(|t| !t.trim().is_empty()) {
        return Ok(Credential::new(token));
    }
    if let Some(credential) = store.load()? {
        return Ok(credential);
    }

    eprintln!("{TOKEN_HELP}");
    loop {
        let line = Password::new()
            .with_prompt("Paste the token here. (Type exit to close)")
            .interact()
            .wrap_err("No token provided")?;
        let candidate = line.trim();
        if candidate.is_empty() {
            continue;
        }
        if candidate.eq_ignore_ascii_case("exit") {
            eprintln!("bye");
            std::process::exit(0);
        }

        let credential = Credential::new(candidate);
        let client = GraphClient::new(credential.clone())?;
        match listing::probe(&client, base) {
            Ok(()) => {}
            Err(FetchError::Auth(_) | FetchError::Forbidden(_)) => {
                eprintln!("Token not valid. Please retry");
                continue;
            }
            Err(e) => return Err(e).wrap_err("Could not validate the token"),
        }
        eprintln!("Token valid");
        store.store(&credential)?;
        return Ok(credential);
    }
}

fn main() -> Result<()> {
    let cli = Cli::parse();
    init_tracing(cli.verbose, cli.quiet);

    // 1. Load config file (CLI path > default path)
    let file_cfg = load_file_config(cli.config.as_deref())?;

    // 2. Resolve paths and endpoint (CLI > Config > Default)
    let target_dir = cli
        .target_dir
        .or(file_cfg.target_dir)
        .unwrap_or_else(|| PathBuf::from("chats"));
    let state_path = cli
        .state
        .or(file_cfg.state_path)
        .unwrap_or_else(default_state_path);
    let graph_url = match file_cfg.graph_url {
        Some(url) => url,
        None => Url::parse(DEFAULT_GRAPH_URL).wrap_err("Invalid default Graph URL")?,
    };

    // 3. Build the Export Config
    let config = ExportConfig {
        target_dir,
        state_path,
        graph_url,
        page_size: file_cfg.page_size.unwrap_or(DEFAULT_PAGE_SIZE),
        max_messages: cli.max_messages,
        oldest_date: cli.oldest_date,
        ask_continue: cli
            .ask_continue
            .or(file_cfg.ask_continue)
            .unwrap_or(DEFAULT_ASK_CONTINUE),
        refresh_chats: cli.refresh_chats,
        quiet: cli.quiet,
    };

    // 4. Credentials are resolved once and never change during the run
    let tokens = TokenStore::new(default_credentials_path());
    let credential = resolve_credential(cli.token, &tokens, &config.graph_url)?;
    let client = GraphClient::new(credential)?;

    let selection = match (cli.name, cli.download_all) {
        (Some(name), _) => Selection::Name(name),
        (None, true) => Selection::All,
        (None, false) => Selection::Interactive,
    };

    // 5. Run the Business Logic
    let result = if cli.yes {
        runner::execute(&config, &client, &mut AutoDecider { answer: true }, selection)
    } else {
        runner::execute(&config, &client, &mut ConsoleDecider::new(), selection)
    };
    result.map_err(runner::explain)?;
    if !config.quiet {
        eprintln!("bye");
    }
    Ok(())
}
