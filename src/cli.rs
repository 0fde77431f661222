use crate::engine::CommandDispatcher;
use crate::error::{DispatchError, StoreError};
use crate::logging::{self, LogTarget};
use crate::model::{Command, CommandReport, DispatchConfig, Outcome};
use crate::registry::SubscriptionRegistry;
use crate::user_name::{UserNameSource, UserNameStore};
use anyhow::{Context, Result};
use clap::Parser;
use std::io::Write;
use std::path::PathBuf;
use std::time::Duration;
use tokio::sync::mpsc;
use tracing::error;

pub const DEFAULT_BASE_URL: &str = "https://server-manager.majecty.tech/api/dev2";

/// Output line routing for stdout/stderr writer.
enum OutputLine {
    Stdout(String),
    Stderr(String),
}

/// Spawn a blocking writer for stdout/stderr to avoid blocking async tasks.
fn spawn_output_writer() -> (
    mpsc::UnboundedSender<OutputLine>,
    tokio::task::JoinHandle<()>,
) {
    let (tx, mut rx) = mpsc::unbounded_channel::<OutputLine>();
    let handle = tokio::task::spawn_blocking(move || {
        let stdout = std::io::stdout();
        let stderr = std::io::stderr();
        let mut out = std::io::LineWriter::new(stdout.lock());
        let mut err = std::io::LineWriter::new(stderr.lock());

        while let Some(line) = rx.blocking_recv() {
            match line {
                OutputLine::Stdout(msg) => {
                    let _ = writeln!(out, "{}", msg);
                }
                OutputLine::Stderr(msg) => {
                    let _ = writeln!(err, "{}", msg);
                }
            }
        }

        let _ = out.flush();
        let _ = err.flush();
    });
    (tx, handle)
}

#[derive(Debug, Parser, Clone)]
#[command(
    name = "server-manager-cli",
    version,
    about = "Check, start and stop a remote server, with optional TUI"
)]
pub struct Cli {
    /// Base URL of the server manager API
    #[arg(long, default_value = DEFAULT_BASE_URL)]
    pub base_url: String,

    /// API key sent with every command (not needed for --set-user-name)
    #[arg(long, env = "SERVER_MANAGER_API_KEY", hide_env_values = true)]
    pub api_key: Option<String>,

    /// Connect timeout for start/stop
    #[arg(long, default_value = "5s")]
    pub connect_timeout: humantime::Duration,

    /// Read timeout for start/stop
    #[arg(long, default_value = "60s")]
    pub read_timeout: humantime::Duration,

    /// Run a single command and exit (no TUI)
    #[arg(long, value_enum, conflicts_with = "set_user_name")]
    pub command: Option<Command>,

    /// Update the stored user name and exit (no TUI)
    #[arg(long)]
    pub set_user_name: Option<String>,

    /// Print a JSON report instead of text (with --command or --set-user-name)
    #[arg(long)]
    pub json: bool,

    /// File holding the user name
    #[arg(long)]
    pub user_name_file: Option<PathBuf>,

    /// Check server health when the screen opens
    #[arg(long, default_value_t = true, action = clap::ArgAction::Set)]
    pub health_on_launch: bool,

    /// Log level, overridden by RUST_LOG
    #[arg(long, default_value = "info")]
    pub log_level: String,

    /// Log file for the interactive screen
    #[arg(long)]
    pub log_file: Option<PathBuf>,
}

impl Cli {
    pub fn is_one_shot(&self) -> bool {
        self.command.is_some() || self.set_user_name.is_some()
    }
}

/// Run the selected mode. Returns `Ok(false)` when a one-shot command failed.
pub async fn run(args: Cli) -> Result<bool> {
    if args.json && !args.is_one_shot() {
        return Err(anyhow::anyhow!(
            "--json needs --command or --set-user-name."
        ));
    }

    if let Some(command) = args.command {
        logging::init(&args.log_level, &LogTarget::Stderr)?;
        return run_command(&args, command).await;
    }
    if let Some(name) = args.set_user_name.clone() {
        logging::init(&args.log_level, &LogTarget::Stderr)?;
        return run_set_user_name(&args, name).await;
    }

    run_interactive(args).await
}

#[cfg(feature = "tui")]
async fn run_interactive(args: Cli) -> Result<bool> {
    if let Some(path) = args.log_file.clone().or_else(logging::default_log_file) {
        logging::init(&args.log_level, &LogTarget::File(path))?;
    }
    crate::tui::run(args).await?;
    Ok(true)
}

#[cfg(not(feature = "tui"))]
async fn run_interactive(_args: Cli) -> Result<bool> {
    // Fallback when built without TUI support.
    Err(anyhow::anyhow!(
        "built without TUI support; use --command or --set-user-name."
    ))
}

/// Build a `DispatchConfig` from CLI arguments. Fails without an API key.
pub fn build_config(args: &Cli) -> Result<DispatchConfig> {
    let api_key = args
        .api_key
        .clone()
        .context("--api-key (or SERVER_MANAGER_API_KEY) is required to contact the server")?;
    Ok(DispatchConfig::new(args.base_url.clone(), api_key).with_state_change_timeouts(
        Duration::from(args.connect_timeout),
        Duration::from(args.read_timeout),
    ))
}

pub fn open_user_name_store(args: &Cli) -> Result<UserNameStore> {
    match args.user_name_file.clone().or_else(UserNameStore::default_path) {
        Some(path) => UserNameStore::open(&path)
            .with_context(|| format!("failed to open user name file {}", path.display())),
        None => Ok(UserNameStore::in_memory("")),
    }
}

fn timestamp_utc() -> String {
    time::OffsetDateTime::now_utc()
        .format(&time::format_description::well_known::Rfc3339)
        .unwrap_or_else(|_| "now".into())
}

type ExchangeSlot = Option<std::result::Result<String, DispatchError>>;

/// Issue one command, wait for its outcome (or Ctrl-C) and print it.
async fn run_command(args: &Cli, command: Command) -> Result<bool> {
    let cfg = build_config(args)?;
    let dispatcher = CommandDispatcher::new(&cfg)?;
    let (registry, mut queue) = SubscriptionRegistry::<ExchangeSlot>::new();
    let (out_tx, out_handle) = spawn_output_writer();

    // The raw exchange keeps the error kind, so the report can flag timeouts.
    registry.add(
        dispatcher.exchange(command),
        |slot: &mut ExchangeSlot, body| *slot = Some(Ok(body)),
        |slot: &mut ExchangeSlot, e| *slot = Some(Err(e)),
    );

    let mut slot = None;
    tokio::select! {
        _ = queue.deliver_next(&mut slot) => {}
        _ = tokio::signal::ctrl_c() => {
            registry.cancel_all();
            let _ = out_tx.send(OutputLine::Stderr("Interrupted".into()));
        }
    }

    let success = match slot {
        Some(result) => {
            let timed_out = matches!(&result, Err(e) if e.is_timeout());
            let outcome = match result {
                Ok(body) => Outcome::success(body),
                Err(e) => {
                    error!(%command, error = %e, "command failed");
                    Outcome::failure(e.to_string())
                }
            };
            let success = outcome.is_success();
            if args.json {
                let report = CommandReport {
                    timestamp_utc: timestamp_utc(),
                    command,
                    url: dispatcher.url(command).to_string(),
                    timeouts: dispatcher.policy(command),
                    timed_out,
                    outcome,
                };
                let _ = out_tx.send(OutputLine::Stdout(serde_json::to_string_pretty(&report)?));
            } else {
                match outcome {
                    Outcome::Success { body } => {
                        let _ = out_tx.send(OutputLine::Stdout(body));
                    }
                    Outcome::Failure { error } => {
                        let _ = out_tx.send(OutputLine::Stderr(format!("Failed: {error}")));
                    }
                }
            }
            success
        }
        None => false,
    };

    drop(out_tx);
    let _ = out_handle.await;
    Ok(success)
}

async fn run_set_user_name(args: &Cli, name: String) -> Result<bool> {
    let store = open_user_name_store(args)?;
    let previous = store.current();
    let (registry, mut queue) = SubscriptionRegistry::<Option<Result<(), String>>>::new();
    let (out_tx, out_handle) = spawn_output_writer();

    registry.add(
        store.update(name.clone()),
        |slot: &mut Option<Result<(), String>>, ()| *slot = Some(Ok(())),
        |slot: &mut Option<Result<(), String>>, e: StoreError| *slot = Some(Err(e.to_string())),
    );

    let mut slot = None;
    tokio::select! {
        _ = queue.deliver_next(&mut slot) => {}
        _ = tokio::signal::ctrl_c() => {
            registry.cancel_all();
            let _ = out_tx.send(OutputLine::Stderr("Interrupted".into()));
        }
    }

    let success = matches!(slot, Some(Ok(())));
    if args.json {
        let report = serde_json::json!({
            "timestamp_utc": timestamp_utc(),
            "user_name": name,
            "previous_user_name": previous,
            "outcome": if success { "success" } else { "failure" },
            "error": slot.and_then(|r| r.err()),
        });
        let _ = out_tx.send(OutputLine::Stdout(serde_json::to_string_pretty(&report)?));
    } else {
        match slot {
            Some(Ok(())) => {
                let _ = out_tx.send(OutputLine::Stdout(format!("User name updated: {name}")));
            }
            Some(Err(e)) => {
                let _ = out_tx.send(OutputLine::Stderr(format!("Unable to update user name: {e}")));
            }
            None => {}
        }
    }
    if let Some(line) = saved_line(success, &store) {
        let _ = out_tx.send(OutputLine::Stderr(line));
    }

    drop(out_tx);
    let _ = out_handle.await;
    Ok(success)
}

/// Where the name went, only when it was actually written.
fn saved_line(success: bool, store: &UserNameStore) -> Option<String> {
    if !success {
        return None;
    }
    store.path().map(|p| format!("Saved: {}", p.display()))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn parse(args: &[&str]) -> Cli {
        let mut full = vec!["server-manager-cli", "--api-key", "k"];
        full.extend_from_slice(args);
        Cli::try_parse_from(full).unwrap()
    }

    #[test]
    fn defaults_match_stock_timeouts() {
        let cli = parse(&[]);
        let cfg = build_config(&cli).unwrap();
        assert_eq!(cfg.base_url, DEFAULT_BASE_URL);
        assert_eq!(cfg.start.connect, Some(Duration::from_secs(5)));
        assert_eq!(cfg.stop.read, Some(Duration::from_secs(60)));
        assert!(cli.health_on_launch);
        assert!(!cli.is_one_shot());
    }

    #[test]
    fn timeouts_and_command_parse() {
        let cli = parse(&["--command", "health", "--read-timeout", "2s", "--connect-timeout", "250ms"]);
        assert_eq!(cli.command, Some(Command::HealthCheck));
        let cfg = build_config(&cli).unwrap();
        assert_eq!(cfg.start.read, Some(Duration::from_secs(2)));
        assert_eq!(cfg.stop.connect, Some(Duration::from_millis(250)));
        assert_eq!(cfg.health.read, None);
    }

    #[test]
    fn command_conflicts_with_user_name_update() {
        let res = Cli::try_parse_from([
            "server-manager-cli",
            "--api-key",
            "k",
            "--command",
            "start",
            "--set-user-name",
            "x",
        ]);
        assert!(res.is_err());
    }

    #[tokio::test]
    async fn json_requires_one_shot_mode() {
        let err = run(parse(&["--json"])).await.unwrap_err();
        assert!(err.to_string().contains("--json"));
    }

    #[test]
    fn command_mode_requires_an_api_key() {
        if std::env::var_os("SERVER_MANAGER_API_KEY").is_some() {
            return;
        }
        let cli = Cli::try_parse_from(["server-manager-cli", "--command", "stop"]).unwrap();
        let err = build_config(&cli).unwrap_err();
        assert!(err.to_string().contains("--api-key"));
    }

    #[tokio::test]
    async fn user_name_update_needs_no_api_key() {
        if std::env::var_os("SERVER_MANAGER_API_KEY").is_some() {
            return;
        }
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("user.json");
        let cli = Cli::try_parse_from([
            "server-manager-cli",
            "--set-user-name",
            "ada",
            "--user-name-file",
            path.to_str().unwrap(),
        ])
        .unwrap();
        assert!(cli.api_key.is_none());

        assert!(run_set_user_name(&cli, "ada".into()).await.unwrap());
        assert_eq!(UserNameStore::open(&path).unwrap().current(), "ada");
    }

    #[test]
    fn saved_path_is_reported_only_after_success() {
        let dir = tempfile::tempdir().unwrap();
        let store = UserNameStore::open(dir.path().join("user.json")).unwrap();
        assert_eq!(saved_line(false, &store), None);
        assert!(saved_line(true, &store).unwrap().starts_with("Saved: "));
        assert_eq!(saved_line(true, &UserNameStore::in_memory("ada")), None);
    }
}
