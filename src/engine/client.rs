use crate::error::DispatchError;
use crate::model::{Command, CommandBody, DispatchConfig, TimeoutPolicy};
use anyhow::{Context, Result};
use reqwest::Url;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

/// Everything needed to send one command: where, how long to wait, and the
/// HTTP client configured with that policy.
#[derive(Debug, Clone)]
pub(crate) struct Route {
    pub command: Command,
    pub url: Url,
    pub policy: TimeoutPolicy,
    pub http: reqwest::Client,
}

impl Route {
    pub fn new(cfg: &DispatchConfig, command: Command) -> Result<Self> {
        let url = command_url(&cfg.base_url, command)?;
        let policy = cfg.policy(command);
        let http = build_http(&cfg.user_agent, policy)
            .with_context(|| format!("build http client for {command}"))?;
        Ok(Self {
            command,
            url,
            policy,
            http,
        })
    }
}

pub(crate) fn command_url(base_url: &str, command: Command) -> Result<Url> {
    let raw = format!("{}/{}", base_url.trim_end_matches('/'), command.path());
    Url::parse(&raw).with_context(|| format!("invalid command url: {raw}"))
}

fn build_http(user_agent: &str, policy: TimeoutPolicy) -> reqwest::Result<reqwest::Client> {
    let mut builder = reqwest::Client::builder().user_agent(user_agent);
    if let Some(connect) = policy.connect {
        builder = builder.connect_timeout(connect);
    }
    if let Some(read) = policy.read {
        builder = builder.read_timeout(read);
    }
    builder.build()
}

/// POST the command body and return the response text, whatever the status.
pub(crate) async fn post_command(
    route: &Route,
    api_key: &str,
    token: &CancellationToken,
) -> std::result::Result<String, DispatchError> {
    let request = route
        .http
        .post(route.url.clone())
        .json(&CommandBody { api_key });

    let response = tokio::select! {
        biased;
        _ = token.cancelled() => return Err(DispatchError::Cancelled),
        res = request.send() => res.map_err(DispatchError::from_reqwest)?,
    };

    let status = response.status();
    if !status.is_success() {
        // Still a success outcome as long as a body comes back.
        warn!(command = %route.command, %status, "server answered with non-success status");
    }

    let body = tokio::select! {
        biased;
        _ = token.cancelled() => return Err(DispatchError::Cancelled),
        text = response.text() => text.map_err(DispatchError::from_reqwest)?,
    };
    debug!(command = %route.command, %status, bytes = body.len(), "response received");
    Ok(body)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn url_joins_base_and_path() {
        let u = command_url("https://example.com/api/dev2", Command::Start).unwrap();
        assert_eq!(u.as_str(), "https://example.com/api/dev2/start");
        let u = command_url("https://example.com/api/dev2/", Command::HealthCheck).unwrap();
        assert_eq!(u.as_str(), "https://example.com/api/dev2/health");
    }

    #[test]
    fn invalid_base_is_rejected() {
        assert!(command_url("not a url", Command::Stop).is_err());
    }
}
