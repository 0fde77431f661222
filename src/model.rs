use serde::{Deserialize, Serialize};
use std::fmt;
use std::time::Duration;

/// Default connect timeout for commands that change server state.
pub const STATE_CHANGE_CONNECT_TIMEOUT: Duration = Duration::from_millis(5_000);
/// Default read timeout for commands that change server state.
pub const STATE_CHANGE_READ_TIMEOUT: Duration = Duration::from_millis(60_000);

/// The three remote operations exposed by the server manager.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, clap::ValueEnum)]
#[serde(rename_all = "snake_case")]
pub enum Command {
    #[value(name = "health")]
    HealthCheck,
    Start,
    Stop,
}

impl Command {
    /// Path segment appended to the base URL.
    pub fn path(self) -> &'static str {
        match self {
            Command::HealthCheck => "health",
            Command::Start => "start",
            Command::Stop => "stop",
        }
    }
}

impl fmt::Display for Command {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.path())
    }
}

/// Connect/read timeouts applied to one command. `None` leaves the transport default.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct TimeoutPolicy {
    #[serde(default, with = "humantime_serde")]
    pub connect: Option<Duration>,
    #[serde(default, with = "humantime_serde")]
    pub read: Option<Duration>,
}

impl TimeoutPolicy {
    pub fn transport_default() -> Self {
        Self::default()
    }

    pub fn new(connect: Duration, read: Duration) -> Self {
        Self {
            connect: Some(connect),
            read: Some(read),
        }
    }

    /// Upper bound for a whole exchange, when both timeouts are set.
    pub fn exchange_deadline(&self) -> Option<Duration> {
        match (self.connect, self.read) {
            (Some(c), Some(r)) => Some(c + r),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DispatchConfig {
    pub base_url: String,
    /// Sent as `apiKey` in every request body.
    #[serde(skip_serializing)]
    pub api_key: String,
    pub user_agent: String,
    pub health: TimeoutPolicy,
    pub start: TimeoutPolicy,
    pub stop: TimeoutPolicy,
}

impl DispatchConfig {
    /// Config with the stock timeout table: health uses transport defaults,
    /// start/stop use 5s connect and 60s read.
    pub fn new(base_url: impl Into<String>, api_key: impl Into<String>) -> Self {
        let state_change = TimeoutPolicy::new(STATE_CHANGE_CONNECT_TIMEOUT, STATE_CHANGE_READ_TIMEOUT);
        Self {
            base_url: base_url.into(),
            api_key: api_key.into(),
            user_agent: format!("server-manager-cli/{}", env!("CARGO_PKG_VERSION")),
            health: TimeoutPolicy::transport_default(),
            start: state_change,
            stop: state_change,
        }
    }

    /// Override connect/read timeouts for the state-changing commands.
    pub fn with_state_change_timeouts(mut self, connect: Duration, read: Duration) -> Self {
        let policy = TimeoutPolicy::new(connect, read);
        self.start = policy;
        self.stop = policy;
        self
    }

    pub fn policy(&self, command: Command) -> TimeoutPolicy {
        match command {
            Command::HealthCheck => self.health,
            Command::Start => self.start,
            Command::Stop => self.stop,
        }
    }
}

/// Request body shared by every command.
#[derive(Debug, Clone, Serialize)]
pub struct CommandBody<'a> {
    #[serde(rename = "apiKey")]
    pub api_key: &'a str,
}

/// Terminal result of one issued command.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "outcome", rename_all = "snake_case")]
pub enum Outcome {
    Success { body: String },
    Failure { error: String },
}

impl Outcome {
    pub fn success(body: impl Into<String>) -> Self {
        Outcome::Success { body: body.into() }
    }

    pub fn failure(error: impl Into<String>) -> Self {
        Outcome::Failure {
            error: error.into(),
        }
    }

    pub fn is_success(&self) -> bool {
        matches!(self, Outcome::Success { .. })
    }

    /// Text shown in a status line.
    pub fn text(&self) -> &str {
        match self {
            Outcome::Success { body } => body,
            Outcome::Failure { error } => error,
        }
    }
}

/// JSON report printed by the one-shot mode.
#[derive(Debug, Clone, Serialize)]
pub struct CommandReport {
    pub timestamp_utc: String,
    pub command: Command,
    pub url: String,
    pub timeouts: TimeoutPolicy,
    /// Whether a failure was caused by a connect or read timeout.
    pub timed_out: bool,
    #[serde(flatten)]
    pub outcome: Outcome,
}
