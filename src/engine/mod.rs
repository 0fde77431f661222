mod client;

use crate::error::DispatchError;
use crate::model::{Command, DispatchConfig, Outcome, TimeoutPolicy};
use crate::operation::Operation;
use anyhow::Result;
use client::Route;
use reqwest::Url;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info};

/// Issues the three server commands. One route (URL, timeout policy, HTTP
/// client) per command; everything else is shared.
#[derive(Debug, Clone)]
pub struct CommandDispatcher {
    api_key: Arc<str>,
    health: Route,
    start: Route,
    stop: Route,
}

impl CommandDispatcher {
    pub fn new(cfg: &DispatchConfig) -> Result<Self> {
        Ok(Self {
            api_key: Arc::from(cfg.api_key.as_str()),
            health: Route::new(cfg, Command::HealthCheck)?,
            start: Route::new(cfg, Command::Start)?,
            stop: Route::new(cfg, Command::Stop)?,
        })
    }

    fn route(&self, command: Command) -> &Route {
        match command {
            Command::HealthCheck => &self.health,
            Command::Start => &self.start,
            Command::Stop => &self.stop,
        }
    }

    pub fn url(&self, command: Command) -> &Url {
        &self.route(command).url
    }

    pub fn policy(&self, command: Command) -> TimeoutPolicy {
        self.route(command).policy
    }

    /// Send `command` and resolve to the raw response body. Errors keep their
    /// classification; see [`Self::issue`] for the reduced form.
    pub fn exchange(&self, command: Command) -> Operation<String> {
        let route = self.route(command).clone();
        let api_key = self.api_key.clone();
        Operation::with_token(move |token| run_exchange(route, api_key, token))
    }

    /// Send `command` and reduce the result to an [`Outcome`]. Only
    /// cancellation is left as an error.
    pub fn issue(&self, command: Command) -> Operation<Outcome> {
        let route = self.route(command).clone();
        let api_key = self.api_key.clone();
        Operation::with_token(move |token| async move {
            match run_exchange(route, api_key, token).await {
                Ok(body) => {
                    debug!(%command, "command succeeded");
                    Ok(Outcome::success(body))
                }
                Err(DispatchError::Cancelled) => {
                    debug!(%command, "command cancelled");
                    Err(DispatchError::Cancelled)
                }
                Err(e) => {
                    error!(%command, error = %e, "command failed");
                    Ok(Outcome::failure(e.to_string()))
                }
            }
        })
    }
}

async fn run_exchange(
    route: Route,
    api_key: Arc<str>,
    token: CancellationToken,
) -> std::result::Result<String, DispatchError> {
    info!(command = %route.command, url = %route.url, "issuing command");
    let exchange = client::post_command(&route, &api_key, &token);
    match route.policy.exchange_deadline() {
        // Backstop for stalls the transport's own timeouts do not cover.
        Some(deadline) => match tokio::time::timeout(deadline, exchange).await {
            Ok(res) => res,
            Err(_) => Err(DispatchError::timeout(format!(
                "no response from {} within {}",
                route.url,
                humantime::format_duration(deadline)
            ))),
        },
        None => exchange.await,
    }
}
